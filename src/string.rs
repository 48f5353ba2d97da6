//! Strings (EXI 1.0 §7.1.10).
//!
//! Length in characters as an unsigned integer, then one unsigned integer per
//! Unicode code point. Restricted character sets are not implemented.
//! String-table codes (hit/miss) live in [`string_table`](crate::string_table)
//! and the stream; this module only writes the raw characters.

use crate::bitstream::{BitReader, BitWriter};
use crate::{Error, Result, unsigned_integer};

/// Upper bound for pre-allocation when decoding untrusted lengths.
const MAX_PREALLOC_CHARS: usize = 64 * 1024;

/// Writes `value` as length + code points.
pub fn encode(writer: &mut BitWriter, value: &str) {
    encode_with_offset(writer, value, 0);
}

/// Writes `char count + offset` followed by the code points.
///
/// String-table misses use offsets 1 (local names) and 2 (values).
pub fn encode_with_offset(writer: &mut BitWriter, value: &str, offset: u64) {
    if value.is_ascii() {
        unsigned_integer::encode(writer, value.len() as u64 + offset);
        // ASCII-Codepoints sind einzelne Oktette ohne Continuation-Bit
        writer.write_bytes(value.as_bytes());
        return;
    }
    unsigned_integer::encode(writer, value.chars().count() as u64 + offset);
    encode_chars(writer, value);
}

/// Writes only the code points, without a length prefix.
pub fn encode_chars(writer: &mut BitWriter, value: &str) {
    for ch in value.chars() {
        unsigned_integer::encode(writer, u64::from(u32::from(ch)));
    }
}

/// Reads a length-prefixed string.
pub fn decode(reader: &mut BitReader) -> Result<String> {
    let len = unsigned_integer::decode(reader)?;
    decode_chars(reader, len)
}

/// Reads `len` code points.
///
/// Surrogates and values above U+10FFFF give [`Error::InvalidCodePoint`].
pub fn decode_chars(reader: &mut BitReader, len: u64) -> Result<String> {
    let cap = usize::try_from(len).unwrap_or(usize::MAX).min(MAX_PREALLOC_CHARS);
    let mut s = String::with_capacity(cap);
    for _ in 0..len {
        let cp = unsigned_integer::decode(reader)?;
        let ch = u32::try_from(cp)
            .ok()
            .and_then(char::from_u32)
            .ok_or(Error::InvalidCodePoint(cp))?;
        s.push(ch);
    }
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: &str) -> String {
        let mut w = BitWriter::new();
        encode(&mut w, value);
        let data = w.into_vec();
        decode(&mut BitReader::new(&data)).unwrap()
    }

    #[test]
    fn empty_string_is_single_zero() {
        let mut w = BitWriter::new();
        encode(&mut w, "");
        assert_eq!(w.into_vec(), vec![0x00]);
    }

    #[test]
    fn ascii_layout() {
        let mut w = BitWriter::new();
        encode(&mut w, "hello");
        assert_eq!(w.into_vec(), vec![5, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let mut w = BitWriter::new();
        encode(&mut w, "ä€");
        let data = w.into_vec();
        assert_eq!(data[0], 2);
        assert_eq!(round_trip("ä€"), "ä€");
    }

    #[test]
    fn supplementary_plane() {
        assert_eq!(round_trip("a😀b"), "a😀b");
    }

    #[test]
    fn offset_is_added_to_length() {
        let mut w = BitWriter::new();
        encode_with_offset(&mut w, "ab", 2);
        assert_eq!(w.into_vec(), vec![4, b'a', b'b']);
    }

    #[test]
    fn surrogate_rejected() {
        let mut w = BitWriter::new();
        unsigned_integer::encode(&mut w, 1);
        unsigned_integer::encode(&mut w, 0xD800);
        let data = w.into_vec();
        assert_eq!(decode(&mut BitReader::new(&data)), Err(Error::InvalidCodePoint(0xD800)));
    }

    #[test]
    fn truncated_string() {
        assert_eq!(decode(&mut BitReader::new(&[3, b'a'])), Err(Error::PrematureEndOfStream));
    }
}
