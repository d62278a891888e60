//! Writes small FST images for the integration tests.

#![allow(dead_code)]

use std::io::Write;

use flate2::write::{GzEncoder, ZlibEncoder};
use fstq::{
    varint::{encode_svarint, encode_varint},
    VarDirection, VarKind,
};

pub fn logging_setup() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Length {
    Bits(u32),
    Real,
    Variable,
}

/// How per-stream wave data is packed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Packing {
    Stored,
    Zlib,
    Lz4,
    /// FastLZ for waves of 16 bytes or more, stored below that.
    FastLz,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HierarchyPacking {
    Stored,
    Gzip,
    Lz4,
    Lz4Duo,
}

pub fn varint(out: &mut Vec<u8>, v: u64) {
    let mut buf = [0u8; 10];
    let n = encode_varint(&mut buf, v);
    out.extend_from_slice(&buf[..n]);
}

pub fn svarint(out: &mut Vec<u8>, v: i64) {
    let mut buf = [0u8; 10];
    let n = encode_svarint(&mut buf, v);
    out.extend_from_slice(&buf[..n]);
}

fn cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

pub fn block(out: &mut Vec<u8>, kind: u8, payload: &[u8]) {
    out.push(kind);
    out.extend_from_slice(&(payload.len() as u64 + 8).to_be_bytes());
    out.extend_from_slice(payload);
}

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// Zlib-compress `data` unless that does not make it smaller. The reader
/// tells the two apart by comparing lengths.
fn zlib_if_smaller(data: &[u8]) -> Vec<u8> {
    let z = zlib(data);
    if z.len() < data.len() {
        z
    } else {
        data.to_vec()
    }
}

enum Position {
    Empty,
    Data(u64),
    Alias(usize),
}

pub struct FstBuilder {
    pub timescale: i8,
    pub time_zero: i64,
    pub start_time: u64,
    pub end_time: Option<u64>,
    pub writer: String,
    pub date: String,
    pub wave_packing: Packing,
    pub hierarchy_packing: HierarchyPacking,
    /// Write value-change blocks with the older position table (block kind 5).
    pub legacy_positions: bool,
    pub geometry: bool,
    pub gzip_wrapper: bool,
    pub big_endian_reals: bool,
    /// Store identical wave data once and alias it from the position table.
    pub dedupe_waves: bool,
    pub omit_hierarchy: bool,
    pub skip_block: bool,
    tokens: Vec<u8>,
    num_scopes: u64,
    num_vars: u64,
    lengths: Vec<Length>,
    changes: Vec<Vec<(u64, Vec<u8>)>>,
    epoch_starts: Vec<u64>,
    blackouts: Vec<(bool, u64)>,
}

impl Default for FstBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FstBuilder {
    pub fn new() -> Self {
        Self {
            timescale: -9,
            time_zero: 0,
            start_time: 0,
            end_time: None,
            writer: "fstq test builder".to_string(),
            date: "Thu Jan  1 00:00:00 1970".to_string(),
            wave_packing: Packing::Stored,
            hierarchy_packing: HierarchyPacking::Gzip,
            legacy_positions: false,
            geometry: true,
            gzip_wrapper: false,
            big_endian_reals: false,
            dedupe_waves: false,
            omit_hierarchy: false,
            skip_block: false,
            tokens: Vec::new(),
            num_scopes: 0,
            num_vars: 0,
            lengths: Vec::new(),
            changes: Vec::new(),
            epoch_starts: Vec::new(),
            blackouts: Vec::new(),
        }
    }

    pub fn scope(&mut self, name: &str) -> &mut Self {
        self.tokens.push(254);
        self.tokens.push(0);
        cstr(&mut self.tokens, name);
        cstr(&mut self.tokens, "");
        self.num_scopes += 1;
        self
    }

    pub fn upscope(&mut self) -> &mut Self {
        self.tokens.push(255);
        self
    }

    pub fn attribute(&mut self, kind: u8, subtype: u8, name: &str, arg: u64) -> &mut Self {
        self.tokens.push(252);
        self.tokens.push(kind);
        self.tokens.push(subtype);
        cstr(&mut self.tokens, name);
        varint(&mut self.tokens, arg);
        self
    }

    /// Declare an enum table the way the writer does: an open attribute
    /// carrying the definition, never closed.
    pub fn enum_table(&mut self, handle: u64, definition: &str) -> &mut Self {
        self.attribute(0, 7, definition, handle)
    }

    fn var_token(&mut self, kind: VarKind, name: &str, declared_length: u64, alias: u64) {
        self.tokens.push(kind as u8);
        self.tokens.push(VarDirection::Output as u8);
        cstr(&mut self.tokens, name);
        varint(&mut self.tokens, declared_length);
        varint(&mut self.tokens, alias);
        self.num_vars += 1;
    }

    /// Declare a variable on a new stream. Returns the stream index.
    pub fn var(&mut self, kind: VarKind, name: &str, length: Length) -> usize {
        let declared = match length {
            Length::Bits(n) => n as u64,
            Length::Real => 64,
            Length::Variable => 0,
        };
        self.var_token(kind, name, declared, 0);
        self.lengths.push(length);
        self.changes.push(Vec::new());
        self.lengths.len() - 1
    }

    /// Declare a variable sharing `stream`'s value changes.
    pub fn alias(&mut self, kind: VarKind, name: &str, stream: usize) -> &mut Self {
        let declared = match self.lengths[stream] {
            Length::Bits(n) => n as u64,
            _ => 0,
        };
        self.var_token(kind, name, declared, stream as u64 + 1);
        self
    }

    /// Record a change. `value` is the bit literal or, for strings, the text.
    pub fn change(&mut self, stream: usize, time: u64, value: &str) -> &mut Self {
        if let Length::Bits(n) = self.lengths[stream] {
            assert_eq!(value.len(), n as usize, "literal width");
        }
        self.push_change(stream, time, value.as_bytes().to_vec())
    }

    pub fn change_real(&mut self, stream: usize, time: u64, value: f64) -> &mut Self {
        assert_eq!(self.lengths[stream], Length::Real);
        self.push_change(stream, time, value.to_le_bytes().to_vec())
    }

    fn push_change(&mut self, stream: usize, time: u64, value: Vec<u8>) -> &mut Self {
        self.changes[stream].push((time, value));
        self.changes[stream].sort_by_key(|(t, _)| *t);
        self
    }

    /// Start a new value-change block at `time`.
    pub fn split_at(&mut self, time: u64) -> &mut Self {
        self.epoch_starts.push(time);
        self.epoch_starts.sort();
        self
    }

    pub fn dump_off(&mut self, time: u64) -> &mut Self {
        self.blackouts.push((false, time));
        self
    }

    pub fn dump_on(&mut self, time: u64) -> &mut Self {
        self.blackouts.push((true, time));
        self
    }

    fn end(&self) -> u64 {
        self.end_time.unwrap_or_else(|| {
            self.changes
                .iter()
                .flatten()
                .map(|(t, _)| *t)
                .max()
                .unwrap_or(self.start_time)
        })
    }

    fn real_bytes(&self, le: &[u8]) -> Vec<u8> {
        let mut bytes = le.to_vec();
        if self.big_endian_reals {
            bytes.reverse();
        }
        bytes
    }

    fn header(&self, num_blocks: u64) -> Vec<u8> {
        let mut p = vec![];
        p.extend_from_slice(&self.start_time.to_be_bytes());
        p.extend_from_slice(&self.end().to_be_bytes());
        let marker: u64 = if self.big_endian_reals {
            0x6957148B0ABF0540
        } else {
            0x4005BF0A8B145769
        };
        p.extend_from_slice(&marker.to_le_bytes());
        p.extend_from_slice(&0u64.to_be_bytes());
        p.extend_from_slice(&self.num_scopes.to_be_bytes());
        p.extend_from_slice(&self.num_vars.to_be_bytes());
        p.extend_from_slice(&(self.lengths.len() as u64).to_be_bytes());
        p.extend_from_slice(&num_blocks.to_be_bytes());
        p.push(self.timescale as u8);
        let mut writer = [0u8; 128];
        writer[..self.writer.len()].copy_from_slice(self.writer.as_bytes());
        p.extend_from_slice(&writer);
        let mut date = [0u8; 26];
        date[..self.date.len()].copy_from_slice(self.date.as_bytes());
        p.extend_from_slice(&date);
        p.extend_from_slice(&[0u8; 93]);
        p.push(0);
        p.extend_from_slice(&self.time_zero.to_be_bytes());
        assert_eq!(p.len(), 321);
        p
    }

    fn encode_records(&self, length: Length, records: &[&(u64, Vec<u8>)], times: &[u64]) -> Vec<u8> {
        let mut out = vec![];
        let mut prev_index = 0;
        for (time, value) in records.iter().map(|r| (&r.0, &r.1)) {
            let index = times.binary_search(time).unwrap();
            let delta = (index - prev_index) as u64;
            prev_index = index;
            match length {
                Length::Bits(1) => {
                    let c = value[0];
                    if c == b'0' || c == b'1' {
                        varint(&mut out, (delta << 2) | (((c - b'0') as u64) << 1));
                    } else {
                        let state = b"xzhuwl-?".iter().position(|&s| s == c).unwrap() as u64;
                        varint(&mut out, (delta << 4) | (state << 1) | 1);
                    }
                }
                Length::Bits(n) => {
                    if value.iter().all(|&c| c == b'0' || c == b'1') {
                        varint(&mut out, delta << 1);
                        let mut packed = vec![0u8; (n as usize + 7) / 8];
                        for (i, &c) in value.iter().enumerate() {
                            if c == b'1' {
                                packed[i / 8] |= 0x80 >> (i % 8);
                            }
                        }
                        out.extend_from_slice(&packed);
                    } else {
                        varint(&mut out, (delta << 1) | 1);
                        out.extend_from_slice(value);
                    }
                }
                Length::Real => {
                    varint(&mut out, (delta << 1) | 1);
                    out.extend_from_slice(&self.real_bytes(value));
                }
                Length::Variable => {
                    varint(&mut out, delta << 1);
                    varint(&mut out, value.len() as u64);
                    out.extend_from_slice(value);
                }
            }
        }
        out
    }

    fn pack_wave(&self, raw: &[u8]) -> Vec<u8> {
        let mut out = vec![];
        match self.wave_packing {
            Packing::Stored => {
                varint(&mut out, 0);
                out.extend_from_slice(raw);
            }
            Packing::Zlib => {
                varint(&mut out, raw.len() as u64);
                out.extend_from_slice(&zlib(raw));
            }
            Packing::Lz4 => {
                varint(&mut out, raw.len() as u64);
                out.extend_from_slice(&lz4_flex::block::compress(raw));
            }
            Packing::FastLz if raw.len() < 16 => {
                varint(&mut out, 0);
                out.extend_from_slice(raw);
            }
            Packing::FastLz => {
                let mut buf = vec![0u8; raw.len() + raw.len() / 16 + 66];
                let compressed = fastlz::compress(raw, &mut buf).unwrap();
                varint(&mut out, raw.len() as u64);
                out.extend_from_slice(compressed);
            }
        }
        out
    }

    /// One value-change block covering `start..end`.
    fn value_change_block(&self, start: u64, end: Option<u64>) -> Vec<u8> {
        let in_epoch = |t: u64| t >= start && end.map_or(true, |e| t < e);

        let mut times: Vec<u64> = self
            .changes
            .iter()
            .flatten()
            .map(|(t, _)| *t)
            .filter(|&t| in_epoch(t))
            .collect();
        times.sort();
        times.dedup();

        let mut bits = vec![];
        for (stream, &length) in self.lengths.iter().enumerate() {
            let prior = self.changes[stream].iter().filter(|(t, _)| *t < start).last();
            match length {
                Length::Bits(n) => match prior {
                    Some((_, v)) => bits.extend_from_slice(v),
                    None => bits.extend(std::iter::repeat(b'x').take(n as usize)),
                },
                Length::Real => match prior {
                    Some((_, v)) => bits.extend(self.real_bytes(v)),
                    None => bits.extend(self.real_bytes(&0f64.to_le_bytes())),
                },
                Length::Variable => {}
            }
        }
        let bits_data = if self.wave_packing == Packing::Zlib {
            zlib_if_smaller(&bits)
        } else {
            bits.clone()
        };

        let mut waves = vec![];
        let mut positions = vec![];
        let mut raws: Vec<Option<Vec<u8>>> = vec![];
        for (stream, &length) in self.lengths.iter().enumerate() {
            let records: Vec<_> = self.changes[stream].iter().filter(|(t, _)| in_epoch(*t)).collect();
            if records.is_empty() {
                positions.push(Position::Empty);
                raws.push(None);
                continue;
            }
            let raw = self.encode_records(length, &records, &times);
            let duplicate = raws
                .iter()
                .enumerate()
                .position(|(i, r)| r.as_ref() == Some(&raw) && self.lengths[i] == length);
            match duplicate {
                Some(target) if self.dedupe_waves => positions.push(Position::Alias(target)),
                _ => {
                    positions.push(Position::Data(waves.len() as u64));
                    waves.extend(self.pack_wave(&raw));
                }
            }
            raws.push(Some(raw));
        }

        let table = self.position_table(&positions);

        let mut time_raw = vec![];
        let mut prev = 0;
        for &t in &times {
            varint(&mut time_raw, t - prev);
            prev = t;
        }
        let time_data = if self.wave_packing == Packing::Zlib {
            zlib_if_smaller(&time_raw)
        } else {
            time_raw.clone()
        };

        let mut p = vec![];
        p.extend_from_slice(&start.to_be_bytes());
        p.extend_from_slice(&times.last().copied().unwrap_or(start).to_be_bytes());
        p.extend_from_slice(&0u64.to_be_bytes());
        varint(&mut p, bits.len() as u64);
        varint(&mut p, bits_data.len() as u64);
        varint(&mut p, self.lengths.len() as u64);
        p.extend_from_slice(&bits_data);
        varint(&mut p, self.lengths.len() as u64);
        p.push(match self.wave_packing {
            Packing::Lz4 => b'4',
            Packing::FastLz => b'F',
            _ => b'Z',
        });
        p.extend_from_slice(&waves);
        p.extend_from_slice(&table);
        p.extend_from_slice(&(table.len() as u64).to_be_bytes());
        p.extend_from_slice(&time_data);
        p.extend_from_slice(&(time_raw.len() as u64).to_be_bytes());
        p.extend_from_slice(&(time_data.len() as u64).to_be_bytes());
        p.extend_from_slice(&(times.len() as u64).to_be_bytes());
        p
    }

    fn position_table(&self, positions: &[Position]) -> Vec<u8> {
        let mut out = vec![];
        let mut prev = 0;
        let mut run = 0u64;
        for position in positions {
            if let Position::Empty = position {
                run += 1;
                continue;
            }
            if run > 0 {
                varint(&mut out, run << 1);
                run = 0;
            }
            match *position {
                Position::Data(offset) => {
                    // Offsets count from the pack type byte.
                    let offset = offset + 1;
                    let delta = offset - prev;
                    prev = offset;
                    if self.legacy_positions {
                        varint(&mut out, (delta << 1) | 1);
                    } else {
                        svarint(&mut out, ((delta as i64) << 1) | 1);
                    }
                }
                Position::Alias(target) => {
                    if self.legacy_positions {
                        varint(&mut out, 0);
                        varint(&mut out, target as u64 + 1);
                    } else {
                        svarint(&mut out, ((-(target as i64) - 1) << 1) | 1);
                    }
                }
                Position::Empty => {}
            }
        }
        if run > 0 {
            varint(&mut out, run << 1);
        }
        out
    }

    fn geometry_block(&self) -> Vec<u8> {
        let mut raw = vec![];
        for length in &self.lengths {
            varint(
                &mut raw,
                match *length {
                    Length::Bits(n) => n as u64,
                    Length::Real => 0,
                    Length::Variable => 0xFFFF_FFFF,
                },
            );
        }
        let data = zlib_if_smaller(&raw);
        let mut p = vec![];
        p.extend_from_slice(&(raw.len() as u64).to_be_bytes());
        p.extend_from_slice(&(self.lengths.len() as u64).to_be_bytes());
        p.extend_from_slice(&data);
        p
    }

    fn hierarchy_block(&self) -> (u8, Vec<u8>) {
        let raw = &self.tokens;
        let mut p = (raw.len() as u64).to_be_bytes().to_vec();
        let kind = match self.hierarchy_packing {
            HierarchyPacking::Stored => {
                p.extend_from_slice(raw);
                4
            }
            HierarchyPacking::Gzip => {
                p.extend_from_slice(&gzip(raw));
                4
            }
            HierarchyPacking::Lz4 => {
                p.extend_from_slice(&lz4_flex::block::compress(raw));
                6
            }
            HierarchyPacking::Lz4Duo => {
                let once = lz4_flex::block::compress(raw);
                p.extend_from_slice(&(once.len() as u64).to_be_bytes());
                p.extend_from_slice(&lz4_flex::block::compress(&once));
                7
            }
        };
        (kind, p)
    }

    fn blackout_block(&self) -> Vec<u8> {
        let mut p = vec![];
        varint(&mut p, self.blackouts.len() as u64);
        let mut prev = 0;
        for &(on, time) in &self.blackouts {
            p.push(on as u8);
            varint(&mut p, time - prev);
            prev = time;
        }
        p
    }

    pub fn build(&self) -> Vec<u8> {
        let mut starts = vec![self.start_time];
        starts.extend(self.epoch_starts.iter().copied());

        let mut out = vec![];
        block(&mut out, 0, &self.header(starts.len() as u64));
        for (k, &start) in starts.iter().enumerate() {
            let kind = if self.legacy_positions { 5 } else { 8 };
            block(&mut out, kind, &self.value_change_block(start, starts.get(k + 1).copied()));
        }
        if self.skip_block {
            block(&mut out, 255, b"unfinished");
        }
        if !self.blackouts.is_empty() {
            block(&mut out, 2, &self.blackout_block());
        }
        if self.geometry {
            block(&mut out, 3, &self.geometry_block());
        }
        if !self.omit_hierarchy {
            let (kind, payload) = self.hierarchy_block();
            block(&mut out, kind, &payload);
        }

        if self.gzip_wrapper {
            let mut payload = (out.len() as u64).to_be_bytes().to_vec();
            payload.extend_from_slice(&gzip(&out));
            let mut wrapped = vec![];
            block(&mut wrapped, 254, &payload);
            wrapped
        } else {
            out
        }
    }
}

/// Enum table used by [`alu_trace`].
pub const OP_E: &str = "op_e 3 NOP ADD SUB 0000 0010 0011";

/// A 4-bit `ALU_OP` changing at 0, 50 and 120 in a 1ns trace running to 200,
/// plus a clock and an alias of it under `TOP`.
pub fn alu_builder() -> FstBuilder {
    let mut b = FstBuilder::new();
    b.end_time = Some(200);
    b.enum_table(1, OP_E);
    b.attribute(0, 7, "", 1);
    let alu = b.var(VarKind::Logic, "ALU_OP", Length::Bits(4));
    b.scope("TOP");
    let clk = b.var(VarKind::Wire, "clk", Length::Bits(1));
    b.scope("cpu");
    b.alias(VarKind::Wire, "clk_in", clk);
    b.upscope();
    b.upscope();

    b.change(alu, 0, "0001").change(alu, 50, "0010").change(alu, 120, "1000");
    for t in (0..=200).step_by(10) {
        b.change(clk, t, if (t / 10) % 2 == 0 { "0" } else { "1" });
    }
    b
}
