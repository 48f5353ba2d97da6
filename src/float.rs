//! Float (EXI 1.0 §7.1.4).
//!
//! Two consecutive signed integers: a decimal mantissa and a base-10 exponent.
//! The exponent -(2^14) is reserved for the special values: mantissa 1 = INF,
//! mantissa -1 = -INF, any other mantissa = NaN.

use core::fmt;

use crate::bitstream::{BitReader, BitWriter};
use crate::{Error, Result, integer};

/// Normal exponent range: -(2^14-1) to 2^14-1.
pub const EXPONENT_MIN: i64 = -(1 << 14) + 1;
pub const EXPONENT_MAX: i64 = (1 << 14) - 1;

/// Sentinel exponent for INF, -INF, NaN.
pub const SPECIAL_EXPONENT: i64 = -(1 << 14);

/// A float value as transported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Float {
    /// `mantissa × 10^exponent`.
    Value { mantissa: i64, exponent: i64 },
    Infinity,
    NegativeInfinity,
    NaN,
}

impl Float {
    /// Converts to `f64` by repeated multiplication or division by ten.
    ///
    /// Repeated scaling can lose the last ulp for large exponents; exactness is
    /// only guaranteed on the wire, not in this conversion.
    pub fn to_f64(self) -> f64 {
        match self {
            Float::Infinity => f64::INFINITY,
            Float::NegativeInfinity => f64::NEG_INFINITY,
            Float::NaN => f64::NAN,
            Float::Value { mantissa, exponent } => {
                let mut v = mantissa as f64;
                if exponent >= 0 {
                    for _ in 0..exponent {
                        v *= 10.0;
                        if v.is_infinite() {
                            break;
                        }
                    }
                } else {
                    for _ in 0..exponent.unsigned_abs() {
                        v /= 10.0;
                        if v == 0.0 {
                            break;
                        }
                    }
                }
                v
            }
        }
    }

    /// Shortest decimal mantissa/exponent pair that reads back as `value`.
    pub fn from_f64(value: f64) -> Self {
        if value.is_nan() {
            return Float::NaN;
        }
        if value.is_infinite() {
            return if value > 0.0 { Float::Infinity } else { Float::NegativeInfinity };
        }
        if value == 0.0 {
            return Float::Value { mantissa: 0, exponent: 0 };
        }
        // `{:e}` liefert die kürzeste Darstellung, z.B. "1.5e-3"
        let repr = format!("{value:e}");
        parse_scientific(&repr).unwrap_or(Float::NaN)
    }

    /// Parses the lexical space of `xs:float` / `xs:double`.
    ///
    /// Accepts `INF`, `-INF`, `NaN` and decimal or scientific notation. Digits
    /// beyond the `i64` mantissa range are dropped and the exponent adjusted.
    pub fn parse_lexical(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            "INF" | "+INF" => return Ok(Float::Infinity),
            "-INF" => return Ok(Float::NegativeInfinity),
            "NaN" => return Ok(Float::NaN),
            _ => {}
        }
        parse_scientific(s).ok_or_else(|| Error::InvalidValue(format!("invalid float '{s}'")))
    }
}

fn parse_scientific(s: &str) -> Option<Float> {
    let (num, exp) = match s.find(['e', 'E']) {
        Some(pos) => (&s[..pos], s[pos + 1..].parse::<i64>().ok()?),
        None => (s, 0),
    };
    let (negative, num) = match num.as_bytes().first()? {
        b'-' => (true, &num[1..]),
        b'+' => (false, &num[1..]),
        _ => (false, num),
    };
    let (int_part, frac_part) = num.split_once('.').unwrap_or((num, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }

    let mut mantissa: i64 = 0;
    let mut exponent = exp;
    let mut saturated = false;
    for (i, c) in int_part.bytes().chain(frac_part.bytes()).enumerate() {
        if !c.is_ascii_digit() {
            return None;
        }
        let in_fraction = i >= int_part.len();
        let digit = i64::from(c - b'0');
        if !saturated {
            match mantissa.checked_mul(10).and_then(|m| m.checked_add(digit)) {
                Some(m) => {
                    mantissa = m;
                    if in_fraction {
                        exponent -= 1;
                    }
                    continue;
                }
                None => saturated = true,
            }
        }
        if !in_fraction {
            exponent += 1;
        }
    }

    // trailing zeros normalisieren: 1500 -> 15E2
    while mantissa != 0 && mantissa % 10 == 0 {
        mantissa /= 10;
        exponent += 1;
    }
    if mantissa == 0 {
        exponent = 0;
    }
    if !(EXPONENT_MIN..=EXPONENT_MAX).contains(&exponent) {
        return None;
    }
    Some(Float::Value { mantissa: if negative { -mantissa } else { mantissa }, exponent })
}

impl fmt::Display for Float {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Float::Value { mantissa, exponent } => write!(f, "{mantissa}E{exponent}"),
            Float::Infinity => f.write_str("INF"),
            Float::NegativeInfinity => f.write_str("-INF"),
            Float::NaN => f.write_str("NaN"),
        }
    }
}

/// Writes a float. An exponent outside the normal range is [`Error::InvalidValue`].
pub fn encode(writer: &mut BitWriter, value: Float, byte_aligned: bool) -> Result<()> {
    let (mantissa, exponent) = match value {
        Float::Value { mantissa, exponent } => {
            if !(EXPONENT_MIN..=EXPONENT_MAX).contains(&exponent) {
                return Err(Error::InvalidValue(format!("float exponent {exponent} out of range")));
            }
            (mantissa, exponent)
        }
        Float::Infinity => (1, SPECIAL_EXPONENT),
        Float::NegativeInfinity => (-1, SPECIAL_EXPONENT),
        Float::NaN => (0, SPECIAL_EXPONENT),
    };
    integer::encode(writer, mantissa, byte_aligned);
    integer::encode(writer, exponent, byte_aligned);
    Ok(())
}

/// Reads a float.
pub fn decode(reader: &mut BitReader, byte_aligned: bool) -> Result<Float> {
    let mantissa = integer::decode(reader, byte_aligned)?;
    let exponent = integer::decode(reader, byte_aligned)?;

    if exponent == SPECIAL_EXPONENT {
        return Ok(match mantissa {
            1 => Float::Infinity,
            -1 => Float::NegativeInfinity,
            _ => Float::NaN,
        });
    }
    if !(EXPONENT_MIN..=EXPONENT_MAX).contains(&exponent) {
        return Err(Error::InvalidValue(format!("float exponent {exponent} out of range")));
    }
    Ok(Float::Value { mantissa, exponent })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Float) -> Float {
        let mut w = BitWriter::new();
        encode(&mut w, value, false).unwrap();
        let data = w.into_vec();
        decode(&mut BitReader::new(&data), false).unwrap()
    }

    fn wire(mantissa: i64, exponent: i64) -> Vec<u8> {
        let mut w = BitWriter::new();
        integer::encode(&mut w, mantissa, false);
        integer::encode(&mut w, exponent, false);
        w.into_vec()
    }

    #[test]
    fn sentinel_values() {
        let dec = |m, e| decode(&mut BitReader::new(&wire(m, e)), false).unwrap();
        assert_eq!(dec(1, SPECIAL_EXPONENT), Float::Infinity);
        assert_eq!(dec(-1, SPECIAL_EXPONENT), Float::NegativeInfinity);
        assert_eq!(dec(7, SPECIAL_EXPONENT), Float::NaN);
        assert_eq!(dec(0, SPECIAL_EXPONENT), Float::NaN);

        assert_eq!(dec(1, SPECIAL_EXPONENT).to_f64(), f64::INFINITY);
        assert_eq!(dec(-1, SPECIAL_EXPONENT).to_f64(), f64::NEG_INFINITY);
        assert!(dec(7, SPECIAL_EXPONENT).to_f64().is_nan());
    }

    #[test]
    fn finite_values_round_trip() {
        for f in [
            Float::Value { mantissa: 15, exponent: -1 },
            Float::Value { mantissa: 0, exponent: 0 },
            Float::Value { mantissa: i64::MIN, exponent: EXPONENT_MAX },
            Float::Value { mantissa: i64::MAX, exponent: EXPONENT_MIN },
            Float::Infinity,
            Float::NegativeInfinity,
            Float::NaN,
        ] {
            assert_eq!(round_trip(f), f);
        }
    }

    #[test]
    fn exponent_out_of_range() {
        let mut w = BitWriter::new();
        let f = Float::Value { mantissa: 1, exponent: EXPONENT_MAX + 1 };
        assert!(matches!(encode(&mut w, f, false), Err(Error::InvalidValue(_))));

        let data = wire(1, -20000);
        assert!(matches!(decode(&mut BitReader::new(&data), false), Err(Error::InvalidValue(_))));
    }

    #[test]
    fn to_f64_scales_by_ten() {
        assert_eq!(Float::Value { mantissa: 15, exponent: -1 }.to_f64(), 1.5);
        assert_eq!(Float::Value { mantissa: -3, exponent: 2 }.to_f64(), -300.0);
    }

    #[test]
    fn from_f64_is_shortest() {
        assert_eq!(Float::from_f64(1.5), Float::Value { mantissa: 15, exponent: -1 });
        assert_eq!(Float::from_f64(0.1), Float::Value { mantissa: 1, exponent: -1 });
        assert_eq!(Float::from_f64(-2500.0), Float::Value { mantissa: -25, exponent: 2 });
        assert_eq!(Float::from_f64(0.0), Float::Value { mantissa: 0, exponent: 0 });
        assert_eq!(Float::from_f64(f64::NEG_INFINITY), Float::NegativeInfinity);
        assert_eq!(Float::from_f64(f64::NAN), Float::NaN);
    }

    #[test]
    fn lexical_forms() {
        assert_eq!(Float::parse_lexical("1.5").unwrap(), Float::Value { mantissa: 15, exponent: -1 });
        assert_eq!(Float::parse_lexical("-1.5E3").unwrap(), Float::Value { mantissa: -15, exponent: 2 });
        assert_eq!(Float::parse_lexical("12e-2").unwrap(), Float::Value { mantissa: 12, exponent: -2 });
        assert_eq!(Float::parse_lexical(".5").unwrap(), Float::Value { mantissa: 5, exponent: -1 });
        assert_eq!(Float::parse_lexical("INF").unwrap(), Float::Infinity);
        assert_eq!(Float::parse_lexical("-INF").unwrap(), Float::NegativeInfinity);
        assert_eq!(Float::parse_lexical("NaN").unwrap(), Float::NaN);
        assert!(Float::parse_lexical("1.2.3").is_err());
        assert!(Float::parse_lexical("").is_err());
        assert!(Float::parse_lexical("e5").is_err());
    }

    #[test]
    fn display() {
        assert_eq!(Float::Value { mantissa: 15, exponent: -1 }.to_string(), "15E-1");
        assert_eq!(Float::NegativeInfinity.to_string(), "-INF");
    }
}
