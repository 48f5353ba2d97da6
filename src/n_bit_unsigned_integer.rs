//! n-bit unsigned integers (EXI 1.0 §7.1.9).
//!
//! Bit-packed: exactly `n` bits, MSB first. Byte-aligned and pre-compression:
//! the minimum number of bytes that hold `n` bits, least significant byte
//! first. `n == 0` omits the value in both representations.

use crate::Result;
use crate::bitstream::{BitReader, BitWriter};

/// Writes `value` using exactly `n` bits.
#[inline]
pub fn encode(writer: &mut BitWriter, value: u64, n: u8) {
    debug_assert!(n == 64 || value < (1u64 << n), "value {value} does not fit in {n} bits");
    writer.write_bits(value, n);
}

/// Reads an `n`-bit value.
#[inline]
pub fn decode(reader: &mut BitReader, n: u8) -> Result<u64> {
    reader.read_bits(n)
}

/// Writes `value` as `ceil(n / 8)` little-endian bytes.
pub fn encode_aligned(writer: &mut BitWriter, value: u64, n: u8) {
    for i in 0..n.div_ceil(8) {
        writer.write_byte((value >> (u32::from(i) * 8)) as u8);
    }
}

/// Reads a value written by [`encode_aligned`].
pub fn decode_aligned(reader: &mut BitReader, n: u8) -> Result<u64> {
    let mut value = 0u64;
    for i in 0..n.div_ceil(8) {
        value |= u64::from(reader.read_byte()?) << (u32::from(i) * 8);
    }
    Ok(value)
}

/// Picks the bit-packed or the byte-aligned representation.
#[inline]
pub fn write(writer: &mut BitWriter, value: u64, n: u8, byte_aligned: bool) {
    if byte_aligned {
        encode_aligned(writer, value, n);
    } else {
        encode(writer, value, n);
    }
}

/// Counterpart of [`write`].
#[inline]
pub fn read(reader: &mut BitReader, n: u8, byte_aligned: bool) -> Result<u64> {
    if byte_aligned { decode_aligned(reader, n) } else { decode(reader, n) }
}
