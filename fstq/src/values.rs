//! Value-change data: where each stream's changes live in each epoch, and a
//! cache of the changes decoded so far.
//!
//! Nothing is decoded when a trace is opened beyond the block layouts and time
//! tables. The first query touching a `(stream, epoch)` pair reads and decodes
//! that stream's slice of the epoch and every later query reuses the result.

use std::{
    collections::HashMap,
    hash::Hash,
    io,
    io::{Read, Seek},
    ops::Range,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::debug;
use typed_index_collections::TiVec;

use crate::{
    block::{
        decompress, read_at, zlib_unless_equal, BlockHeader, BlockStream, BlockType, ByteReader,
        Compression, FloatEndian, ReadSeek,
    },
    error::{corrupt, Result, TraceError},
    geometry::SignalLength,
    hierarchy::StreamId,
    timetable::{decode_times, BlockId, Epoch, TimeTable},
    valvec::{ChangeRecord, ValAndTimeVec, Value},
};

/// Characters for the non-binary 1-bit values, indexed by `(v >> 1) & 7`.
const NINE_STATE: &[u8; 8] = b"xzhuwl-?";

/// Where the pieces of one value-change block are, relative to its payload.
#[derive(Clone, Debug)]
pub struct EpochLayout {
    payload_offset: u64,
    bits_offset: u64,
    bits_uncompressed_length: u64,
    bits_compressed_length: u64,
    bits_count: u64,
    /// Start of the wave data, just after the pack type byte.
    waves_offset: u64,
    pack: Compression,
    /// Each stream's wave data, relative to `waves_offset`. Empty if the
    /// stream does not change in this block.
    slices: TiVec<StreamId, Range<u64>>,
}

impl EpochLayout {
    /// Read the framing, position table and time table of a value-change
    /// block. The wave data itself is left in the file.
    pub fn read<R: Read + Seek>(
        blocks: &mut BlockStream<R>,
        block: &BlockHeader,
        num_streams: usize,
    ) -> Result<(Self, Epoch)> {
        let head = blocks.read_prefix_in_block(block, 0, 24 + 3 * 10, "value change block header")?;
        let mut r = ByteReader::new(&head, "value change block header");
        let start_time = r.read_u64()?;
        let end_time = r.read_u64()?;
        let _memory_required = r.read_u64()?;
        let bits_uncompressed_length = r.read_varint()?;
        let bits_compressed_length = r.read_varint()?;
        let bits_count = r.read_varint()?;
        let bits_offset = r.position() as u64;

        let after_bits = match bits_offset.checked_add(bits_compressed_length) {
            Some(o) => o,
            None => corrupt!("value change block at {} has an insane bits length", block.offset),
        };
        let mid = blocks.read_prefix_in_block(block, after_bits, 10 + 1, "value change wave header")?;
        let mut r = ByteReader::new(&mid, "value change wave header");
        let _waves_count = r.read_varint()?;
        let pack = match r.read_u8()? {
            b'4' => Compression::Lz4,
            b'F' => Compression::FastLz,
            _ => Compression::Zlib,
        };
        let waves_offset = after_bits + r.position() as u64;

        if block.length < 24 {
            return Err(TraceError::TruncatedData {
                what: "value change time table footer",
                needed: 24,
                available: block.length,
            });
        }
        let tail = blocks.read_in_block(block, block.length - 24, 24, "value change time table footer")?;
        let mut r = ByteReader::new(&tail, "value change time table footer");
        let time_uncompressed_length = r.read_u64()?;
        let time_compressed_length = r.read_u64()?;
        let time_count = r.read_u64()?;

        let position_length_offset = match time_compressed_length
            .checked_add(32)
            .and_then(|l| block.length.checked_sub(l))
        {
            Some(o) => o,
            None => corrupt!(
                "value change block at {} has a time table longer than the block",
                block.offset
            ),
        };
        let raw = blocks.read_in_block(block, position_length_offset, 8, "position table length")?;
        let position_length = ByteReader::new(&raw, "position table length").read_u64()?;
        let position_offset = match position_length_offset.checked_sub(position_length) {
            Some(o) if o >= waves_offset => o,
            _ => corrupt!(
                "value change block at {} has a position table overlapping its wave data",
                block.offset
            ),
        };

        let time_data = blocks.read_in_block(
            block,
            position_length_offset + 8,
            time_compressed_length,
            "value change time table",
        )?;
        let times = decode_times(&time_data, time_uncompressed_length, time_count)?;

        let position_data = blocks.read_in_block(block, position_offset, position_length, "position table")?;
        let slices = parse_position_table(
            block.kind,
            &position_data,
            num_streams,
            position_offset - waves_offset,
        )?;

        debug!(
            "Value change block {start_time}..={end_time}: {} times, pack {pack:?}",
            times.len()
        );

        Ok((
            EpochLayout {
                payload_offset: block.offset,
                bits_offset,
                bits_uncompressed_length,
                bits_compressed_length,
                bits_count,
                waves_offset,
                pack,
                slices,
            },
            Epoch {
                start_time,
                end_time,
                times,
            },
        ))
    }

    pub fn slice(&self, stream: StreamId) -> Range<u64> {
        self.slices.get(stream).cloned().unwrap_or(0..0)
    }
}

enum PositionEntry {
    Empty,
    /// Data offset counted from the pack type byte.
    Data(u64),
    Alias(usize),
}

/// Decode a position table into one wave data range per stream. `waves_len`
/// is the distance from the end of the pack type byte to the table itself.
pub fn parse_position_table(
    kind: BlockType,
    data: &[u8],
    num_streams: usize,
    waves_len: u64,
) -> Result<TiVec<StreamId, Range<u64>>> {
    let mut r = ByteReader::new(data, "position table");
    let mut entries: Vec<PositionEntry> = Vec::with_capacity(num_streams);
    let mut offset: u64 = 0;
    let mut prev_alias: Option<usize> = None;

    let push_run = |entries: &mut Vec<PositionEntry>, run: u64| {
        let run = run.min((num_streams - entries.len()) as u64);
        entries.extend((0..run).map(|_| PositionEntry::Empty));
    };

    while entries.len() < num_streams && !r.is_empty() {
        if kind == BlockType::ValueChangeDynAlias2 {
            if r.peek_u8()? & 1 == 1 {
                let value = r.read_svarint()? >> 1;
                if value > 0 {
                    offset = offset.saturating_add(value as u64);
                    entries.push(PositionEntry::Data(offset));
                } else if value < 0 {
                    let target = (-(value + 1)) as usize;
                    prev_alias = Some(target);
                    entries.push(PositionEntry::Alias(target));
                } else {
                    match prev_alias {
                        Some(target) => entries.push(PositionEntry::Alias(target)),
                        None => corrupt!(
                            "position table repeats a dynamic alias for stream {} before any was given",
                            entries.len()
                        ),
                    }
                }
            } else {
                let run = r.read_varint()? >> 1;
                push_run(&mut entries, run);
            }
        } else {
            let value = r.read_varint()?;
            if value == 0 {
                let handle = r.read_varint()?;
                match handle.checked_sub(1) {
                    Some(target) => entries.push(PositionEntry::Alias(target as usize)),
                    None => corrupt!("position table aliases stream {} to handle 0", entries.len()),
                }
            } else if value & 1 == 1 {
                offset = offset.saturating_add(value >> 1);
                entries.push(PositionEntry::Data(offset));
            } else {
                push_run(&mut entries, value >> 1);
            }
        }
    }

    let data_entries: Vec<(usize, u64)> = entries
        .iter()
        .enumerate()
        .filter_map(|(i, e)| match e {
            PositionEntry::Data(o) => Some((i, *o)),
            _ => None,
        })
        .collect();

    let mut slices: TiVec<StreamId, Range<u64>> = (0..num_streams).map(|_| 0..0).collect();
    for (n, &(stream, packed_offset)) in data_entries.iter().enumerate() {
        let start = match packed_offset.checked_sub(1) {
            Some(s) => s,
            None => corrupt!("position table gives stream {stream} offset 0"),
        };
        let end = match data_entries.get(n + 1) {
            Some(&(_, next)) => next - 1,
            None => waves_len,
        };
        if start > end || end > waves_len {
            corrupt!(
                "wave data for stream {stream} ({start}..{end}) lies outside the {waves_len} wave bytes"
            );
        }
        slices[StreamId(stream)] = start..end;
    }
    for (stream, entry) in entries.iter().enumerate() {
        if let PositionEntry::Alias(target) = *entry {
            if target >= stream {
                corrupt!("position table aliases stream {stream} to later stream {target}");
            }
            slices[StreamId(stream)] = slices[StreamId(target)].clone();
        }
    }
    Ok(slices)
}

/// Decode one stream's uncompressed wave data, appending to `wave`.
pub fn decode_wave(
    data: &[u8],
    length: SignalLength,
    times: &[u64],
    float_endian: FloatEndian,
    wave: &mut ValAndTimeVec,
) -> Result<()> {
    let mut r = ByteReader::new(data, "wave data");
    let mut time_index: u64 = 0;

    while !r.is_empty() {
        let (value, delta) = match length {
            SignalLength::Bits(1) => {
                let v = r.read_varint()?;
                if v & 1 == 0 {
                    (Value::from_bytes(&[b'0' + ((v >> 1) & 1) as u8]), v >> 2)
                } else {
                    (Value::from_bytes(&[NINE_STATE[((v >> 1) & 7) as usize]]), v >> 4)
                }
            }
            SignalLength::Bits(bits) => {
                let v = r.read_varint()?;
                let value = if v & 1 == 0 {
                    let packed = r.read_bytes((bits as usize + 7) / 8)?;
                    unpack_bits(packed, bits)
                } else {
                    Value::from_bytes(r.read_bytes(bits as usize)?)
                };
                (value, v >> 1)
            }
            SignalLength::Real => {
                // Writers set the low bit on every real record.
                let v = r.read_varint()?;
                if v & 1 == 0 {
                    return Err(TraceError::Unsupported(
                        "real value in packed form".to_string(),
                    ));
                }
                let real = r.read_f64(float_endian)?;
                (format_real(real), v >> 1)
            }
            SignalLength::Variable => {
                let v = r.read_varint()?;
                let len = r.read_varint()?;
                let bytes = r.read_bytes(len as usize)?;
                (Value::from_bytes(bytes), v >> 1)
            }
        };

        time_index = time_index.saturating_add(delta);
        let time = match times.get(time_index as usize) {
            Some(&t) => t,
            None => corrupt!(
                "wave data refers to time index {time_index} but the block has {} times",
                times.len()
            ),
        };
        if let Some(last) = wave.records().last() {
            if time < last.time {
                corrupt!("wave data goes back in time from {} to {time}", last.time);
            }
        }
        wave.push(time, value);
    }
    Ok(())
}

/// MSB-first packed bits to a `0`/`1` literal.
fn unpack_bits(packed: &[u8], bits: u32) -> Value {
    let mut val = Value::default();
    val.0.reserve(bits as usize);
    for i in 0..bits as usize {
        let bit = (packed[i / 8] >> (7 - (i % 8))) & 1;
        val.0.push(b'0' + bit);
    }
    val
}

fn format_real(real: f64) -> Value {
    Value::from_bytes(real.to_string().as_bytes())
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Memoized results with at most one computation in flight per key. Callers
/// asking for a key that is being computed wait for that computation.
struct KeyedCache<K, V> {
    slots: Mutex<HashMap<K, Arc<Mutex<Option<Arc<V>>>>>>,
}

impl<K: Eq + Hash + Copy, V> KeyedCache<K, V> {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn get_or_try_insert(&self, key: K, compute: impl FnOnce() -> Result<V>) -> Result<Arc<V>> {
        let slot = lock(&self.slots).entry(key).or_default().clone();
        let mut value = lock::<Option<Arc<V>>>(&slot);
        if let Some(v) = value.as_ref() {
            return Ok(v.clone());
        }
        // A failed computation leaves the slot empty so a later query retries.
        let v = Arc::new(compute()?);
        *value = Some(v.clone());
        Ok(v)
    }

    fn len(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|slot| lock::<Option<Arc<V>>>(slot).is_some())
            .count()
    }
}

/// The lazily decoded value changes of every stream.
pub struct ValueStore {
    source: Mutex<Box<dyn ReadSeek>>,
    /// Set once a read fails. The trace is unusable from then on.
    failure: Mutex<Option<Arc<io::Error>>>,
    float_endian: FloatEndian,
    lengths: TiVec<StreamId, SignalLength>,
    /// Offset of each stream's initial value in a block's bits array.
    frame_offsets: TiVec<StreamId, usize>,
    layouts: TiVec<BlockId, EpochLayout>,
    frames: KeyedCache<BlockId, Vec<u8>>,
    waves: KeyedCache<(StreamId, BlockId), ValAndTimeVec>,
}

impl ValueStore {
    pub fn new(
        source: Box<dyn ReadSeek>,
        float_endian: FloatEndian,
        lengths: TiVec<StreamId, SignalLength>,
        layouts: TiVec<BlockId, EpochLayout>,
    ) -> Self {
        let mut frame_offsets = TiVec::with_capacity(lengths.len());
        let mut offset = 0;
        for length in lengths.iter() {
            frame_offsets.push(offset);
            offset += length.initial_value_bytes();
        }
        Self {
            source: Mutex::new(source),
            failure: Mutex::new(None),
            float_endian,
            lengths,
            frame_offsets,
            layouts,
            frames: KeyedCache::new(),
            waves: KeyedCache::new(),
        }
    }

    pub fn length(&self, stream: StreamId) -> Option<SignalLength> {
        self.lengths.get(stream).copied()
    }

    pub fn layouts(&self) -> &TiVec<BlockId, EpochLayout> {
        &self.layouts
    }

    /// Number of `(stream, epoch)` pairs decoded so far.
    pub fn decoded_count(&self) -> usize {
        self.waves.len()
    }

    /// Fails every query, cached or not, once a read has failed.
    fn check_failure(&self, what: &str) -> Result<()> {
        match lock(&self.failure).as_ref() {
            Some(err) => Err(TraceError::IoFailure {
                context: format!("{what} after an earlier read failure"),
                source: err.clone(),
            }),
            None => Ok(()),
        }
    }

    fn read(&self, offset: u64, len: u64, what: &'static str) -> Result<Vec<u8>> {
        self.check_failure(what)?;
        let len = match usize::try_from(len) {
            Ok(l) => l,
            Err(_) => corrupt!("{what}: insane length {len}"),
        };
        let result = read_at(&mut *lock(&self.source), offset, len, what);
        if let Err(TraceError::IoFailure { source, .. }) = &result {
            *lock(&self.failure) = Some(source.clone());
        }
        result
    }

    /// The decompressed bits array (initial values) of a block.
    fn frame(&self, block: BlockId) -> Result<Arc<Vec<u8>>> {
        self.frames.get_or_try_insert(block, || {
            let layout = &self.layouts[block];
            let data = self.read(
                layout.payload_offset + layout.bits_offset,
                layout.bits_compressed_length,
                "bits array",
            )?;
            decompress(
                &data,
                zlib_unless_equal(layout.bits_compressed_length, layout.bits_uncompressed_length),
                layout.bits_uncompressed_length,
                "bits array",
            )
        })
    }

    fn initial_value(&self, stream: StreamId, block: BlockId, length: SignalLength) -> Result<Option<Value>> {
        let layout = &self.layouts[block];
        if stream.0 as u64 >= layout.bits_count || length == SignalLength::Variable {
            return Ok(None);
        }
        let frame = self.frame(block)?;
        let start = self.frame_offsets[stream];
        let len = length.initial_value_bytes();
        let bytes = match frame.get(start..start + len) {
            Some(b) => b,
            None => {
                return Err(TraceError::TruncatedData {
                    what: "bits array",
                    needed: (start + len) as u64,
                    available: frame.len() as u64,
                })
            }
        };
        Ok(Some(match length {
            SignalLength::Real => {
                format_real(ByteReader::new(bytes, "bits array").read_f64(self.float_endian)?)
            }
            _ => Value::from_bytes(bytes),
        }))
    }

    /// All records of `stream` in one epoch: its value at the epoch start
    /// followed by its changes, last one wins at equal times.
    pub fn epoch_changes(
        &self,
        times: &TimeTable,
        stream: StreamId,
        block: BlockId,
    ) -> Result<Arc<ValAndTimeVec>> {
        self.check_failure("value changes")?;
        self.waves.get_or_try_insert((stream, block), || {
            let length = match self.length(stream) {
                Some(l) => l,
                None => corrupt!("stream {} has no length", stream.0),
            };
            debug!("Decoding stream {} in block {}", stream.0, block.0);

            let epoch = times.epoch(block);
            let mut wave = ValAndTimeVec::with_capacity(1);
            if let Some(initial) = self.initial_value(stream, block, length)? {
                wave.push(epoch.start_time, initial);
            }

            let layout = &self.layouts[block];
            let slice = layout.slice(stream);
            if slice.is_empty() {
                return Ok(wave);
            }
            let raw = self.read(
                layout.payload_offset + layout.waves_offset + slice.start,
                slice.end - slice.start,
                "wave data",
            )?;
            let mut r = ByteReader::new(&raw, "wave data");
            let uncompressed_length = r.read_varint()?;
            let payload = r.read_bytes(r.remaining())?;
            if uncompressed_length == 0 {
                decode_wave(payload, length, &epoch.times, self.float_endian, &mut wave)?;
            } else {
                let data = decompress(payload, layout.pack, uncompressed_length, "wave data")?;
                decode_wave(&data, length, &epoch.times, self.float_endian, &mut wave)?;
            }
            Ok(wave)
        })
    }

    /// The record holding at `time`, ignoring blackouts.
    pub fn value_at(&self, times: &TimeTable, stream: StreamId, time: u64) -> Result<Option<ChangeRecord>> {
        self.check_failure("value lookup")?;
        let Some(last) = times.epoch_for(time) else {
            return Ok(None);
        };
        // Streams without an initial value can go several epochs without a record.
        for block in (0..=last.0).rev().map(BlockId) {
            if let Some(record) = self.epoch_changes(times, stream, block)?.at(time) {
                return Ok(Some(record.clone()));
            }
        }
        Ok(None)
    }

    /// The first recorded time after `time` at which the value differs from
    /// the value holding at `time`.
    pub fn next_change_after(&self, times: &TimeTable, stream: StreamId, time: u64) -> Result<Option<u64>> {
        self.check_failure("next change lookup")?;
        let current = self.value_at(times, stream, time)?.map(|r| r.value);
        let first = times.epoch_for(time).unwrap_or_default();
        for block in (first.0..times.epochs().len()).map(BlockId) {
            let wave = self.epoch_changes(times, stream, block)?;
            if let Some(record) = wave
                .after(time)
                .iter()
                .find(|r| Some(&r.value) != current.as_ref())
            {
                return Ok(Some(record.time));
            }
        }
        Ok(None)
    }

    /// Every change of `stream` across the trace, dropping records that repeat
    /// the previous value.
    pub fn all_changes(&self, times: &TimeTable, stream: StreamId) -> Result<Vec<ChangeRecord>> {
        self.check_failure("value changes")?;
        let mut out: Vec<ChangeRecord> = Vec::new();
        for block in times.epochs().keys() {
            for record in self.epoch_changes(times, stream, block)?.records() {
                match out.last_mut() {
                    Some(last) if last.value == record.value => {}
                    Some(last) if last.time == record.time => last.value = record.value.clone(),
                    _ => out.push(record.clone()),
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::varint::{encode_svarint, encode_varint};

    fn varint(out: &mut Vec<u8>, v: u64) {
        let mut buf = [0u8; 10];
        let n = encode_varint(&mut buf, v);
        out.extend_from_slice(&buf[..n]);
    }

    fn svarint(out: &mut Vec<u8>, v: i64) {
        let mut buf = [0u8; 10];
        let n = encode_svarint(&mut buf, v);
        out.extend_from_slice(&buf[..n]);
    }

    #[test]
    fn test_alias2_position_table() {
        // stream 0: data at 1, stream 1: none, stream 2: data at 11,
        // stream 3: alias of 0, stream 4: same alias again.
        let mut t = vec![];
        svarint(&mut t, (1 << 1) | 1);
        varint(&mut t, 1 << 1);
        svarint(&mut t, (10 << 1) | 1);
        svarint(&mut t, (-1 << 1) | 1);
        svarint(&mut t, 1);
        let slices = parse_position_table(BlockType::ValueChangeDynAlias2, &t, 5, 30).unwrap();
        assert_eq!(slices.raw, vec![0..10, 0..0, 10..30, 0..10, 0..10]);
    }

    #[test]
    fn test_legacy_position_table() {
        let mut t = vec![];
        varint(&mut t, (1 << 1) | 1);
        varint(&mut t, 0);
        varint(&mut t, 1);
        varint(&mut t, (5 << 1) | 1);
        let slices = parse_position_table(BlockType::ValueChangeDynAlias, &t, 4, 8).unwrap();
        assert_eq!(slices.raw, vec![0..5, 0..5, 5..8, 0..0]);
    }

    #[test]
    fn test_position_table_errors() {
        let mut t = vec![];
        svarint(&mut t, 1);
        assert!(parse_position_table(BlockType::ValueChangeDynAlias2, &t, 1, 10).is_err());

        let mut t = vec![];
        svarint(&mut t, (-2 << 1) | 1);
        assert!(parse_position_table(BlockType::ValueChangeDynAlias2, &t, 1, 10).is_err());

        let mut t = vec![];
        svarint(&mut t, (20 << 1) | 1);
        assert!(parse_position_table(BlockType::ValueChangeDynAlias2, &t, 1, 10).is_err());
    }

    #[test]
    fn test_decode_one_bit() {
        let mut data = vec![];
        varint(&mut data, 0b10); // 1 at index 0
        varint(&mut data, (2 << 2) | 0b00); // 0 at index 2
        varint(&mut data, (1 << 4) | (1 << 1) | 1); // z at index 3
        let mut wave = ValAndTimeVec::default();
        decode_wave(&data, SignalLength::Bits(1), &[0, 5, 10, 15], FloatEndian::Little, &mut wave).unwrap();
        let got: Vec<_> = wave.records().iter().map(|r| (r.time, r.value.to_string())).collect();
        assert_eq!(got, vec![(0, "1".into()), (10, "0".into()), (15, "z".into())]);
    }

    #[test]
    fn test_decode_vector() {
        let mut data = vec![];
        varint(&mut data, 0);
        data.push(0b1010_0000);
        varint(&mut data, (1 << 1) | 1);
        data.extend_from_slice(b"x01z");
        let mut wave = ValAndTimeVec::default();
        decode_wave(&data, SignalLength::Bits(4), &[3, 9], FloatEndian::Little, &mut wave).unwrap();
        assert_eq!(wave.records()[0].value, "1010");
        assert_eq!(wave.records()[1].value, "x01z");
        assert_eq!(wave.records()[1].time, 9);
    }

    #[test]
    fn test_decode_real_and_string() {
        let mut data = vec![];
        varint(&mut data, 1);
        data.extend_from_slice(&1.5f64.to_le_bytes());
        varint(&mut data, (1 << 1) | 1);
        data.extend_from_slice(&(-0.25f64).to_le_bytes());
        let mut wave = ValAndTimeVec::default();
        decode_wave(&data, SignalLength::Real, &[7, 8], FloatEndian::Little, &mut wave).unwrap();
        assert_eq!(wave.records()[0].value, "1.5");
        assert_eq!(wave.records()[1].value, "-0.25");
        assert_eq!(wave.records()[1].time, 8);

        let mut data = vec![];
        varint(&mut data, 0);
        data.extend_from_slice(&1.5f64.to_le_bytes());
        let err = decode_wave(&data, SignalLength::Real, &[7], FloatEndian::Little, &mut ValAndTimeVec::default())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unsupported);

        let mut data = vec![];
        varint(&mut data, 1 << 1);
        varint(&mut data, 5);
        data.extend_from_slice(b"hello");
        let mut wave = ValAndTimeVec::default();
        decode_wave(&data, SignalLength::Variable, &[0, 4], FloatEndian::Little, &mut wave).unwrap();
        assert_eq!(wave.records()[0].time, 4);
        assert_eq!(wave.records()[0].value, "hello");
    }

    #[test]
    fn test_time_index_out_of_range() {
        let mut data = vec![];
        varint(&mut data, 5 << 2);
        let err = decode_wave(&data, SignalLength::Bits(1), &[0, 1], FloatEndian::Little, &mut ValAndTimeVec::default())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CorruptFormat);
    }

    #[test]
    fn test_keyed_cache_computes_once() {
        let cache: KeyedCache<u32, String> = KeyedCache::new();
        let mut calls = 0;
        let a = cache
            .get_or_try_insert(1, || {
                calls += 1;
                Ok("one".to_string())
            })
            .unwrap();
        let b = cache
            .get_or_try_insert(1, || {
                calls += 1;
                Ok("uno".to_string())
            })
            .unwrap();
        assert_eq!(calls, 1);
        assert!(Arc::ptr_eq(&a, &b));

        assert!(cache
            .get_or_try_insert(2, || Err(TraceError::Unsupported("x".into())))
            .is_err());
        assert_eq!(cache.len(), 1);
    }
}
