//! Variable-length unsigned integers (EXI 1.0 §7.1.6).
//!
//! Each octet carries 7 data bits and a continuation flag in its MSB. The
//! least significant group comes first; the last octet has the flag cleared.

use crate::bitstream::{BitReader, BitWriter};
use crate::{Error, Result};

/// Encodes `value` as a sequence of septets.
#[inline]
pub fn encode(writer: &mut BitWriter, value: u64) {
    let mut v = value;
    loop {
        let low7 = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            writer.write_byte(low7);
            return;
        }
        writer.write_byte(0x80 | low7);
    }
}

/// Decodes a septet sequence.
///
/// Returns [`Error::IntegerOverflow`] if the value needs more than 64 bits.
#[inline]
pub fn decode(reader: &mut BitReader) -> Result<u64> {
    let mut result = 0u64;
    let mut shift: u32 = 0;
    loop {
        let byte = reader.read_byte()?;
        let data = u64::from(byte & 0x7F);
        // Beim 10. Oktett ist nur noch Daten-Bit 0 gueltig
        if shift == 63 && (data > 1 || byte & 0x80 != 0) {
            return Err(Error::IntegerOverflow);
        }
        result |= data << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

/// Encoded length in octets: `max(1, ceil(bitlength / 7))`.
pub fn encoded_len(value: u64) -> usize {
    let bits = u64::BITS - value.leading_zeros();
    (bits as usize).div_ceil(7).max(1)
}
