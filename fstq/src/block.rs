//! Block-level access to an FST container: the block walk, bounds-checked
//! primitive reads over a block payload, and decompression.

use std::io::{BufRead, Read, Seek, SeekFrom};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use flate2::read::{GzDecoder, ZlibDecoder};
use log::debug;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::{
    error::{corrupt, Result, TraceError},
    varint::{decode_svarint, decode_varint},
};

#[derive(FromPrimitive, Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BlockType {
    Header = 0,
    ValueChange = 1,
    Blackout = 2,
    Geometry = 3,
    Hierarchy = 4,
    ValueChangeDynAlias = 5,
    HierarchyLz4 = 6,
    HierarchyLz4Duo = 7,
    ValueChangeDynAlias2 = 8,
    GzipWrapper = 254,
    Skip = 255,
}

/// Location of one block in the input.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub kind: BlockType,
    /// Absolute offset of the first payload byte (just after the length field).
    pub offset: u64,
    /// Payload length, not counting the 8-byte length field.
    pub length: u64,
}

impl BlockHeader {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Anything the engine can read blocks from: a buffered file or an in-memory image.
pub trait ReadSeek: BufRead + Seek + Send {}

impl<T> ReadSeek for T where T: BufRead + Seek + Send {}

/// Sequential walk over the blocks of an FST file, with random access into
/// the payload of any block already visited.
pub struct BlockStream<R> {
    reader: R,
    input_len: u64,
    next_block: u64,
}

impl<R: Read + Seek> BlockStream<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let input_len = reader
            .seek(SeekFrom::End(0))
            .map_err(|e| TraceError::io("measuring input", e))?;
        Ok(Self {
            reader,
            input_len,
            next_block: 0,
        })
    }

    /// Read the framing of the next block and skip over its payload. Returns
    /// `None` at the end of input.
    pub fn next_block(&mut self) -> Result<Option<BlockHeader>> {
        if self.next_block >= self.input_len {
            return Ok(None);
        }
        let frame = self.read_exact_at(self.next_block, 9, "block framing")?;
        let kind = match BlockType::from_u8(frame[0]) {
            Some(k) => k,
            None => corrupt!("unknown block type {} at offset {}", frame[0], self.next_block),
        };
        let section_length = BigEndian::read_u64(&frame[1..]);
        let length = match section_length.checked_sub(8) {
            Some(l) => l,
            None => corrupt!(
                "block {:?} at offset {} has invalid length {} (must be >= 8)",
                kind,
                self.next_block,
                section_length
            ),
        };
        let offset = self.next_block + 9;
        let available = self.input_len - offset;
        if length > available {
            return Err(TraceError::TruncatedData {
                what: "block payload",
                needed: length,
                available,
            });
        }
        debug!("Block {kind:?} at offset {offset}, {length} bytes");
        self.next_block = offset + length;
        Ok(Some(BlockHeader {
            kind,
            offset,
            length,
        }))
    }

    /// The whole payload of `block`.
    pub fn read_payload(&mut self, block: &BlockHeader) -> Result<Vec<u8>> {
        self.read_exact_at(block.offset, block.length, "block payload")
    }

    /// `len` bytes starting `start` bytes into the payload of `block`.
    pub fn read_in_block(
        &mut self,
        block: &BlockHeader,
        start: u64,
        len: u64,
        what: &'static str,
    ) -> Result<Vec<u8>> {
        let available = block.length.saturating_sub(start);
        if start > block.length || len > available {
            return Err(TraceError::TruncatedData {
                what,
                needed: len,
                available,
            });
        }
        self.read_exact_at(block.offset + start, len, what)
    }

    /// Up to `len` bytes starting `start` bytes into the payload of `block`,
    /// stopping early at the end of the block.
    pub fn read_prefix_in_block(
        &mut self,
        block: &BlockHeader,
        start: u64,
        len: u64,
        what: &'static str,
    ) -> Result<Vec<u8>> {
        let len = len.min(block.length.saturating_sub(start));
        self.read_in_block(block, start, len, what)
    }

    fn read_exact_at(&mut self, offset: u64, len: u64, what: &'static str) -> Result<Vec<u8>> {
        let available = self.input_len.saturating_sub(offset);
        if len > available {
            return Err(TraceError::TruncatedData {
                what,
                needed: len,
                available,
            });
        }
        read_at(&mut self.reader, offset, len as usize, what)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Seek to `offset` and read exactly `len` bytes. Running out of input is
/// truncation, not an I/O failure.
pub fn read_at(reader: &mut (impl Read + Seek), offset: u64, len: usize, what: &'static str) -> Result<Vec<u8>> {
    reader
        .seek(SeekFrom::Start(offset))
        .map_err(|e| TraceError::io(what, e))?;
    // The length comes from the file. Let the buffer grow as data arrives.
    let mut buf = Vec::with_capacity(len.min(1 << 20));
    reader
        .by_ref()
        .take(len as u64)
        .read_to_end(&mut buf)
        .map_err(|e| TraceError::io(what, e))?;
    if buf.len() < len {
        return Err(TraceError::TruncatedData {
            what,
            needed: len as u64,
            available: buf.len() as u64,
        });
    }
    Ok(buf)
}

/// Bounds-checked cursor over a block payload (or a decompressed section of one).
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8], what: &'static str) -> Self {
        Self { data, pos: 0, what }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn truncated(&self, needed: usize) -> TraceError {
        TraceError::TruncatedData {
            what: self.what,
            needed: needed as u64,
            available: self.remaining() as u64,
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(self.truncated(len));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0; N];
        buf.copy_from_slice(self.read_bytes(N)?);
        Ok(buf)
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.data.get(self.pos).copied().ok_or_else(|| self.truncated(1))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(BigEndian::read_u64(self.read_bytes(8)?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(BigEndian::read_i64(self.read_bytes(8)?))
    }

    pub fn read_f64(&mut self, endian: FloatEndian) -> Result<f64> {
        let bytes = self.read_bytes(8)?;
        Ok(match endian {
            FloatEndian::Little => LittleEndian::read_f64(bytes),
            FloatEndian::Big => BigEndian::read_f64(bytes),
        })
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let rest = &self.data[self.pos..];
        match decode_varint(rest) {
            Some((value, len)) => {
                self.pos += len;
                Ok(value)
            }
            None if rest.len() >= 10 => corrupt!("varint overflow in {}", self.what),
            None => Err(self.truncated(rest.len() + 1)),
        }
    }

    pub fn read_svarint(&mut self) -> Result<i64> {
        let rest = &self.data[self.pos..];
        match decode_svarint(rest) {
            Some((value, len)) => {
                self.pos += len;
                Ok(value)
            }
            None if rest.len() >= 10 => corrupt!("svarint overflow in {}", self.what),
            None => Err(self.truncated(rest.len() + 1)),
        }
    }

    /// A NUL-terminated string. The terminator is consumed but not returned.
    pub fn read_cstr(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let len = match rest.iter().position(|b| *b == 0) {
            Some(len) => len,
            None => return Err(self.truncated(rest.len() + 1)),
        };
        let s = String::from_utf8_lossy(&rest[..len]).to_string();
        self.pos += len + 1;
        Ok(s)
    }

    /// A fixed-size field holding a NUL-padded string.
    pub fn read_fixed_str(&mut self, size: usize) -> Result<String> {
        let bytes = self.read_bytes(size)?;
        let len = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..len]).to_string())
    }
}

/// Byte order of the 8-byte floats in the file, read from the header marker.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FloatEndian {
    Little,
    Big,
}

/// How a section of the file is compressed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Compression {
    Stored,
    Zlib,
    Gzip,
    Lz4,
    /// LZ4 applied twice; holds the length after the first decompression.
    Lz4Duo(u64),
    FastLz,
}

/// The most any of the supported compressors can expand its input by,
/// rounded up. Zlib tops out just over 1000:1, LZ4 and FastLZ near 255:1.
fn max_expansion(compression: Compression) -> u64 {
    match compression {
        Compression::Stored => 1,
        Compression::Zlib | Compression::Gzip => 1032,
        Compression::Lz4 | Compression::Lz4Duo(_) | Compression::FastLz => 256,
    }
}

/// Decompress `data`, checking that it expands to exactly `expected_len` bytes.
/// Declared lengths no compressor could produce from `data` are rejected
/// before anything is allocated.
pub fn decompress(
    data: &[u8],
    compression: Compression,
    expected_len: u64,
    what: &'static str,
) -> Result<Vec<u8>> {
    let input_len = match compression {
        Compression::Lz4Duo(once_len) => once_len,
        _ => data.len() as u64,
    };
    let limit = input_len
        .saturating_mul(max_expansion(compression))
        .saturating_add(64);
    if expected_len > limit {
        corrupt!("{what}: {input_len} compressed bytes cannot expand to the declared {expected_len}");
    }
    let expected = usize::try_from(expected_len)
        .map_err(|_| TraceError::CorruptFormat(format!("{what}: insane length {expected_len}")))?;

    let out = match compression {
        Compression::Stored => data.to_vec(),
        Compression::Zlib => {
            let mut out = Vec::new();
            ZlibDecoder::new(data)
                .take(expected_len.saturating_add(1))
                .read_to_end(&mut out)
                .map_err(|e| TraceError::CorruptFormat(format!("{what}: zlib: {e}")))?;
            out
        }
        Compression::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(data)
                .take(expected_len.saturating_add(1))
                .read_to_end(&mut out)
                .map_err(|e| TraceError::CorruptFormat(format!("{what}: gzip: {e}")))?;
            out
        }
        Compression::Lz4 => lz4_flex::block::decompress(data, expected)
            .map_err(|e| TraceError::CorruptFormat(format!("{what}: lz4: {e}")))?,
        Compression::Lz4Duo(once_len) => {
            let once = decompress(data, Compression::Lz4, once_len, what)?;
            lz4_flex::block::decompress(&once, expected)
                .map_err(|e| TraceError::CorruptFormat(format!("{what}: lz4: {e}")))?
        }
        Compression::FastLz => {
            let mut out = vec![0; expected];
            let written = fastlz::decompress(data, &mut out)
                .map_err(|_| TraceError::CorruptFormat(format!("{what}: fastlz stream is invalid")))?
                .len();
            out.truncate(written);
            out
        }
    };

    if out.len() != expected {
        corrupt!(
            "{what}: decompressed to {} bytes but {} were declared",
            out.len(),
            expected
        );
    }
    Ok(out)
}

/// Sections stored verbatim when the writer's compression did not pay off
/// are recognisable by equal compressed and uncompressed lengths.
pub fn zlib_unless_equal(compressed_len: u64, uncompressed_len: u64) -> Compression {
    if compressed_len == uncompressed_len {
        Compression::Stored
    } else {
        Compression::Zlib
    }
}
