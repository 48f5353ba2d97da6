//! Signed integers (EXI 1.0 §7.1.5).
//!
//! A Boolean sign (0 = non-negative) followed by the magnitude as an unsigned
//! integer. Negative values store `-value`, so `-5` becomes sign `1` and the
//! octet `0x05`. The sign follows the Boolean rules, i.e. it occupies a full
//! byte in byte-aligned streams.
//!
//! Bounded ranges (facets with fewer than 4096 values) use an n-bit offset
//! from the minimum instead, see [`encode_bounded`].

use crate::bit_width;
use crate::bitstream::{BitReader, BitWriter};
use crate::{Error, Result, boolean, n_bit_unsigned_integer, unsigned_integer};

/// Largest range that is written as an n-bit offset.
pub const MAX_BOUNDED_RANGE: u64 = 4096;

/// Encodes a signed integer as sign + magnitude.
pub fn encode(writer: &mut BitWriter, value: i64, byte_aligned: bool) {
    boolean::encode(writer, value < 0, byte_aligned);
    unsigned_integer::encode(writer, value.unsigned_abs());
}

/// Decodes a signed integer written by [`encode`].
///
/// A magnitude beyond the `i64` range is [`Error::IntegerOverflow`]. A negative
/// zero decodes as 0.
pub fn decode(reader: &mut BitReader, byte_aligned: bool) -> Result<i64> {
    let negative = boolean::decode(reader, byte_aligned)?;
    let magnitude = unsigned_integer::decode(reader)?;
    if negative {
        if magnitude > i64::MIN.unsigned_abs() {
            return Err(Error::IntegerOverflow);
        }
        Ok((magnitude as i64).wrapping_neg())
    } else {
        i64::try_from(magnitude).map_err(|_| Error::IntegerOverflow)
    }
}

/// Bit width of the offset for the inclusive range `[min, max]`.
pub fn bounded_bits(min: i64, max: i64) -> u8 {
    let range = max.abs_diff(min).saturating_add(1);
    bit_width::for_count(usize::try_from(range).unwrap_or(usize::MAX))
}

/// Encodes `value` as an n-bit offset from `min` (EXI 1.0 §7.1.5, bounded case).
pub fn encode_bounded(
    writer: &mut BitWriter,
    value: i64,
    min: i64,
    max: i64,
    byte_aligned: bool,
) -> Result<()> {
    if value < min || value > max {
        return Err(Error::InvalidValue(format!("{value} outside [{min}, {max}]")));
    }
    let n = bounded_bits(min, max);
    let offset = value.abs_diff(min);
    if byte_aligned {
        n_bit_unsigned_integer::encode_aligned(writer, offset, n);
    } else {
        n_bit_unsigned_integer::encode(writer, offset, n);
    }
    Ok(())
}

/// Decodes a value written by [`encode_bounded`].
pub fn decode_bounded(reader: &mut BitReader, min: i64, max: i64, byte_aligned: bool) -> Result<i64> {
    let n = bounded_bits(min, max);
    let offset = if byte_aligned {
        n_bit_unsigned_integer::decode_aligned(reader, n)?
    } else {
        n_bit_unsigned_integer::decode(reader, n)?
    };
    let value = min
        .checked_add_unsigned(offset)
        .filter(|v| *v <= max)
        .ok_or(Error::IntegerOverflow)?;
    Ok(value)
}
