//! LEB128 varints as used throughout FST.

/// Decode an unsigned varint from the start of `input`. Returns the value and
/// the number of bytes it occupied, or None if it overflows a u64 or the
/// input ends before the terminating byte.
pub fn decode_varint(input: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, byte) in input.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        // The 10th byte only has one usable bit; we don't check the rest.
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }
    None
}

/// Decode a signed varint from the start of `input`. Same failure modes as
/// [`decode_varint`].
pub fn decode_svarint(input: &[u8]) -> Option<(i64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, byte) in input.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            // Sign-extend from bit 6 of the last byte.
            if byte & 0x40 != 0 && shift + 7 < 64 {
                value |= u64::MAX << (shift + 7);
            }
            return Some((value as i64, i + 1));
        }
        shift += 7;
    }
    None
}

/// Encode an unsigned varint. Return the number of bytes written. There must be
/// enough space in the output. The maximum number of bytes written is 10.
pub fn encode_varint(output: &mut [u8], mut value: u64) -> usize {
    static MAX_BYTES: usize = 10; // 10 bytes with 7 bits each required for 64-bit.
    for i in 0..MAX_BYTES {
        let mut bits = value as u8 & 0x7F;
        value >>= 7;
        let more = value != 0;
        if more {
            bits |= 0x80;
        }
        output[i] = bits;
        if !more {
            return i + 1;
        }
    }
    MAX_BYTES
}

/// Encode a signed varint. Return the number of bytes written. There must be
/// enough space in the output. The maximum number of bytes written is 10.
pub fn encode_svarint(output: &mut [u8], mut value: i64) -> usize {
    static MAX_BYTES: usize = 10;
    for i in 0..MAX_BYTES {
        let mut bits = value as u8 & 0x7F;
        value >>= 7;
        // More if:
        // * the value has more non-sign bits in it, or
        // * the top bit of the current byte doesn't equal the sign bit.
        let more = (value != 0 && value != -1) || ((value as u8) & 0x40) != (bits & 0x40);
        if more {
            bits |= 0x80;
        }
        output[i] = bits;
        if !more {
            return i + 1;
        }
    }
    MAX_BYTES
}
