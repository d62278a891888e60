use std::collections::HashMap;

use typed_index_collections::TiVec;

use crate::{
    block::{decompress, zlib_unless_equal, ByteReader},
    error::{corrupt, Result},
    hierarchy::StreamId,
};

/// How the values of one stream are stored.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub enum SignalLength {
    Bits(u32),
    /// 64-bit float.
    Real,
    /// Variable-length byte string.
    Variable,
}

impl SignalLength {
    /// Width reported to callers; reals count as 64 bits and strings as 0.
    pub fn bit_width(self) -> u32 {
        match self {
            SignalLength::Bits(n) => n,
            SignalLength::Real => 64,
            SignalLength::Variable => 0,
        }
    }

    /// Bytes this stream takes in a value-change block's initial value array.
    pub fn initial_value_bytes(self) -> usize {
        match self {
            SignalLength::Bits(n) => n as usize,
            SignalLength::Real => 8,
            SignalLength::Variable => 0,
        }
    }
}

const VAR_LENGTH_VARIABLE: u8 = 0xFD;
const VAR_LENGTH_REAL: u8 = 0xFE;
const VAR_LENGTH_LONG: u8 = 0xFF;

/// The geometry block: one length per stream. Most signals are narrow, so
/// the common case is one byte per stream. The sentinels above mark reals,
/// strings, and lengths that live in `lengths_long`.
#[derive(Clone, Debug, Default)]
pub struct VarLengths {
    lengths: TiVec<StreamId, u8>,
    lengths_long: HashMap<StreamId, u32>,
}

impl VarLengths {
    /// Decode a geometry block payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload, "geometry block");
        let uncompressed_length = r.read_u64()?;
        let count = r.read_u64()?;
        let data = r.read_bytes(r.remaining())?;

        let data = decompress(
            data,
            zlib_unless_equal(data.len() as u64, uncompressed_length),
            uncompressed_length,
            "geometry block",
        )?;

        let mut r = ByteReader::new(&data, "geometry entries");
        let mut var_lengths = VarLengths::default();
        for _ in 0..count {
            let length = match r.read_varint()? {
                0 => SignalLength::Real,
                0xFFFF_FFFF => SignalLength::Variable,
                n => match u32::try_from(n) {
                    Ok(n) => SignalLength::Bits(n),
                    Err(_) => corrupt!("variable has an insane number of bits: {n}"),
                },
            };
            var_lengths.push(length);
        }
        Ok(var_lengths)
    }

    pub fn push(&mut self, length: SignalLength) {
        let code = match length {
            SignalLength::Real => VAR_LENGTH_REAL,
            SignalLength::Variable => VAR_LENGTH_VARIABLE,
            SignalLength::Bits(n) if n < VAR_LENGTH_VARIABLE as u32 => n as u8,
            SignalLength::Bits(n) => {
                self.lengths_long.insert(StreamId(self.lengths.len()), n);
                VAR_LENGTH_LONG
            }
        };
        self.lengths.push(code);
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    pub fn length(&self, stream: StreamId) -> Option<SignalLength> {
        Some(match *self.lengths.get(stream)? {
            VAR_LENGTH_REAL => SignalLength::Real,
            VAR_LENGTH_VARIABLE => SignalLength::Variable,
            VAR_LENGTH_LONG => SignalLength::Bits(*self.lengths_long.get(&stream)?),
            x => SignalLength::Bits(x as u32),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = SignalLength> + '_ {
        self.lengths
            .keys()
            .filter_map(move |stream| self.length(stream))
    }
}
