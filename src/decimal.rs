//! Decimal (EXI 1.0 §7.1.3).
//!
//! Boolean sign, integral part as unsigned integer, then the fractional digits
//! in reverse order as unsigned integer. Reversal keeps leading fraction zeros:
//! `1.05` stores fraction `50`. Trailing fraction zeros are not significant.

use core::fmt;

use crate::bitstream::{BitReader, BitWriter};
use crate::{Error, Result, boolean, unsigned_integer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Decimal {
    /// Sign; `true` for negative values including minus zero.
    pub negative: bool,
    pub integral: u64,
    /// Fractional digits, reversed.
    pub fraction_reversed: u64,
}

impl Decimal {
    /// Parses the lexical space of `xs:decimal`.
    ///
    /// More than 19 integral or fractional digits do not fit the 64-bit parts
    /// and give [`Error::InvalidValue`]; the value is never approximated.
    pub fn parse_lexical(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidValue(format!("invalid decimal '{s}'"));
        let t = s.trim();
        let (negative, t) = match t.as_bytes().first() {
            Some(b'-') => (true, &t[1..]),
            Some(b'+') => (false, &t[1..]),
            _ => (false, t),
        };
        let (int_part, frac_part) = t.split_once('.').unwrap_or((t, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let integral = if int_part.is_empty() { 0 } else { int_part.parse::<u64>().map_err(|_| invalid())? };
        let frac = frac_part.trim_end_matches('0');
        let reversed: String = frac.chars().rev().collect();
        let fraction_reversed = if reversed.is_empty() { 0 } else { reversed.parse::<u64>().map_err(|_| invalid())? };
        Ok(Decimal { negative, integral, fraction_reversed })
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        write!(f, "{}", self.integral)?;
        if self.fraction_reversed != 0 {
            let digits: String = self.fraction_reversed.to_string().chars().rev().collect();
            write!(f, ".{digits}")?;
        }
        Ok(())
    }
}

pub fn encode(writer: &mut BitWriter, value: Decimal, byte_aligned: bool) {
    boolean::encode(writer, value.negative, byte_aligned);
    unsigned_integer::encode(writer, value.integral);
    unsigned_integer::encode(writer, value.fraction_reversed);
}

pub fn decode(reader: &mut BitReader, byte_aligned: bool) -> Result<Decimal> {
    let negative = boolean::decode(reader, byte_aligned)?;
    let integral = unsigned_integer::decode(reader)?;
    let fraction_reversed = unsigned_integer::decode(reader)?;
    Ok(Decimal { negative, integral, fraction_reversed })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Decimal) -> Decimal {
        let mut w = BitWriter::new();
        encode(&mut w, value, false);
        let data = w.into_vec();
        decode(&mut BitReader::new(&data), false).unwrap()
    }

    #[test]
    fn fraction_is_reversed() {
        let d = Decimal::parse_lexical("12.34").unwrap();
        assert_eq!(d, Decimal { negative: false, integral: 12, fraction_reversed: 43 });
        assert_eq!(round_trip(d), d);
        assert_eq!(d.to_string(), "12.34");
    }

    #[test]
    fn leading_fraction_zeros_survive() {
        let d = Decimal::parse_lexical("1.05").unwrap();
        assert_eq!(d.fraction_reversed, 50);
        assert_eq!(d.to_string(), "1.05");
    }

    #[test]
    fn trailing_fraction_zeros_dropped() {
        assert_eq!(Decimal::parse_lexical("3.100").unwrap().to_string(), "3.1");
        assert_eq!(Decimal::parse_lexical("7.").unwrap().to_string(), "7");
        assert_eq!(Decimal::parse_lexical(".5").unwrap().to_string(), "0.5");
    }

    #[test]
    fn negative_and_minus_zero() {
        let d = Decimal::parse_lexical("-5.6").unwrap();
        assert!(d.negative);
        assert_eq!(round_trip(d).to_string(), "-5.6");
        assert_eq!(round_trip(Decimal::parse_lexical("-0").unwrap()).to_string(), "-0");
    }

    #[test]
    fn no_silent_approximation() {
        assert!(Decimal::parse_lexical("123456789012345678901234").is_err());
        assert!(Decimal::parse_lexical("0.12345678901234567890123").is_err());
        assert!(Decimal::parse_lexical("1,5").is_err());
        assert!(Decimal::parse_lexical("").is_err());
    }

    #[test]
    fn byte_aligned_sign() {
        let mut w = BitWriter::new();
        encode(&mut w, Decimal { negative: true, integral: 1, fraction_reversed: 5 }, true);
        assert_eq!(w.into_vec(), vec![0x01, 0x01, 0x05]);
    }
}
