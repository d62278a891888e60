#![no_main]

use fstq::varint::{decode_svarint, decode_varint, encode_svarint, encode_varint};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|value: (u64, i64)| {
    let (unsigned, signed) = value;
    let mut output = [0u8; 10];

    let n = encode_varint(&mut output, unsigned);
    assert_eq!(decode_varint(&output[..n]), Some((unsigned, n)));

    let n = encode_svarint(&mut output, signed);
    assert_eq!(decode_svarint(&output[..n]), Some((signed, n)));
});
