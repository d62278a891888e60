use std::fmt;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::{
    block::{ByteReader, FloatEndian},
    error::{corrupt, Result},
};

/// Payload length of the header block.
pub const HEADER_LENGTH: u64 = 321;

// The writer stores e (2.718281828...) in its native byte order. One byte is
// not much of a magic number so this doubles as one.
const REAL_ENDIANNESS_LITTLE: u64 = 0x4005BF0A8B145769;
const REAL_ENDIANNESS_BIG: u64 = 0x6957148B0ABF0540;

#[derive(FromPrimitive, Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FileType {
    Verilog = 0,
    Vhdl = 1,
    VerilogVhdl = 2,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileType::Verilog => "Verilog",
            FileType::Vhdl => "VHDL",
            FileType::VerilogVhdl => "Verilog/VHDL",
        })
    }
}

#[derive(Clone, Debug)]
pub struct Header {
    pub start_time: u64,
    pub end_time: u64,
    pub float_endian: FloatEndian,
    pub num_scopes: u64,
    pub num_hierarchy_vars: u64,
    /// Number of distinct value-change streams (the writer's max handle).
    pub num_streams: u64,
    pub num_vc_blocks: u64,
    pub timescale: Timescale,
    pub writer: String,
    pub date: String,
    pub file_type: Option<FileType>,
    pub time_zero: i64,
}

impl Header {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() as u64 != HEADER_LENGTH {
            corrupt!(
                "invalid header block length {} (should be {HEADER_LENGTH})",
                payload.len()
            );
        }
        let mut r = ByteReader::new(payload, "header");

        let start_time = r.read_u64()?;
        let end_time = r.read_u64()?;
        let float_endian = match u64::from_le_bytes(r.read_array()?) {
            REAL_ENDIANNESS_LITTLE => FloatEndian::Little,
            REAL_ENDIANNESS_BIG => FloatEndian::Big,
            other => corrupt!("not an FST file (bad endianness marker {other:#x})"),
        };
        let _writer_memory_use = r.read_u64()?;
        let num_scopes = r.read_u64()?;
        let num_hierarchy_vars = r.read_u64()?;
        let num_streams = r.read_u64()?;
        let num_vc_blocks = r.read_u64()?;
        let timescale = Timescale::new(r.read_i8()?);
        let writer = r.read_fixed_str(128)?;
        let date = r.read_fixed_str(26)?;
        let _reserved = r.read_bytes(93)?;
        let file_type = FileType::from_u8(r.read_u8()?);
        let time_zero = r.read_i64()?;

        if start_time > end_time {
            corrupt!("header start time {start_time} is after end time {end_time}");
        }

        Ok(Header {
            start_time,
            end_time,
            float_endian,
            num_scopes,
            num_hierarchy_vars,
            num_streams,
            num_vc_blocks,
            timescale,
            writer,
            date: date.trim_end().to_string(),
            file_type,
            time_zero,
        })
    }
}

/// The real time one tick represents: `10^exponent` seconds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Timescale {
    pub exponent: i8,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TimescaleUnit {
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
    Picoseconds,
    Femtoseconds,
    Attoseconds,
    Zeptoseconds,
}

impl TimescaleUnit {
    pub fn exponent(self) -> i8 {
        match self {
            TimescaleUnit::Seconds => 0,
            TimescaleUnit::Milliseconds => -3,
            TimescaleUnit::Microseconds => -6,
            TimescaleUnit::Nanoseconds => -9,
            TimescaleUnit::Picoseconds => -12,
            TimescaleUnit::Femtoseconds => -15,
            TimescaleUnit::Attoseconds => -18,
            TimescaleUnit::Zeptoseconds => -21,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            TimescaleUnit::Seconds => "s",
            TimescaleUnit::Milliseconds => "ms",
            TimescaleUnit::Microseconds => "us",
            TimescaleUnit::Nanoseconds => "ns",
            TimescaleUnit::Picoseconds => "ps",
            TimescaleUnit::Femtoseconds => "fs",
            TimescaleUnit::Attoseconds => "as",
            TimescaleUnit::Zeptoseconds => "zs",
        }
    }
}

impl Timescale {
    pub fn new(exponent: i8) -> Self {
        Self { exponent }
    }

    /// Split into `factor * unit`, e.g. -10 is 100ps. Exponents finer than a
    /// zeptosecond have no unit.
    pub fn unit_and_factor(&self) -> Option<(TimescaleUnit, u64)> {
        let e = self.exponent as i32;
        let unit = match e {
            e if e >= 0 => TimescaleUnit::Seconds,
            -3..=-1 => TimescaleUnit::Milliseconds,
            -6..=-4 => TimescaleUnit::Microseconds,
            -9..=-7 => TimescaleUnit::Nanoseconds,
            -12..=-10 => TimescaleUnit::Picoseconds,
            -15..=-13 => TimescaleUnit::Femtoseconds,
            -18..=-16 => TimescaleUnit::Attoseconds,
            -21..=-19 => TimescaleUnit::Zeptoseconds,
            _ => return None,
        };
        let power = u32::try_from(e - unit.exponent() as i32).ok()?;
        Some((unit, 10u64.checked_pow(power)?))
    }
}

impl fmt::Display for Timescale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit_and_factor() {
            Some((unit, factor)) => write!(f, "{factor}{}", unit.suffix()),
            None => write!(f, "1e{}s", self.exponent),
        }
    }
}
