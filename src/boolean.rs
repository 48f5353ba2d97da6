//! Boolean (EXI 1.0 §7.1.2).
//!
//! A Boolean is an n-bit unsigned integer with `n = 1`: one bit when
//! bit-packed, one byte in byte-aligned streams.

use crate::bitstream::{BitReader, BitWriter};
use crate::{Result, n_bit_unsigned_integer};

/// Writes a Boolean.
#[inline]
pub fn encode(writer: &mut BitWriter, value: bool, byte_aligned: bool) {
    if byte_aligned {
        n_bit_unsigned_integer::encode_aligned(writer, u64::from(value), 1);
    } else {
        writer.write_bit(value);
    }
}

/// Reads a Boolean. Any non-zero byte is `true` in byte-aligned mode.
#[inline]
pub fn decode(reader: &mut BitReader, byte_aligned: bool) -> Result<bool> {
    if byte_aligned {
        Ok(n_bit_unsigned_integer::decode_aligned(reader, 1)? != 0)
    } else {
        reader.read_bit()
    }
}

/// Parses the four lexical forms of `xs:boolean`.
pub fn parse_lexical(s: &str) -> Option<bool> {
    match s.trim() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}
