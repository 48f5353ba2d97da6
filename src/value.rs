//! Typed values (EXI 1.0 §7, Table 7-1).
//!
//! [`ValueType`] is the datatype a grammar production assigns to its CH or AT
//! content; [`Value`] is the content itself. Strings are not handled here:
//! they go through the string tables in [`stream`](crate::stream). Every other
//! type has a fixed representation implemented in the primitive modules.

use core::fmt;
use std::rc::Rc;

use crate::bitstream::{BitReader, BitWriter};
use crate::binary::BinaryKind;
use crate::datetime::{DateTime, DateTimeKind};
use crate::decimal::Decimal;
use crate::float::Float;
use crate::{Error, Result, binary, boolean, datetime, decimal, float, integer, unsigned_integer};

/// Datatype of a production's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValueType {
    /// The production carries no value (SE, EE, SD, ...).
    #[default]
    None,
    String,
    Integer,
    UnsignedInteger,
    /// Bounded integer, written as an n-bit offset from `min`.
    BoundedInteger { min: i64, max: i64 },
    Float,
    Decimal,
    Boolean,
    Binary(BinaryKind),
    DateTime(DateTimeKind),
}

impl ValueType {
    /// Representation of an XSD built-in simple type, by local name.
    ///
    /// Unknown names (including list and duration types) fall back to
    /// [`ValueType::String`].
    pub fn for_builtin(local_name: &str) -> Self {
        match local_name {
            "boolean" => Self::Boolean,
            "decimal" => Self::Decimal,
            "float" | "double" => Self::Float,
            "integer" | "long" | "int" | "short" | "nonPositiveInteger" | "negativeInteger" => Self::Integer,
            "byte" => Self::BoundedInteger { min: -128, max: 127 },
            "unsignedByte" => Self::BoundedInteger { min: 0, max: 255 },
            "nonNegativeInteger" | "positiveInteger" | "unsignedLong" | "unsignedInt" | "unsignedShort" => {
                Self::UnsignedInteger
            }
            "base64Binary" => Self::Binary(BinaryKind::Base64),
            "hexBinary" => Self::Binary(BinaryKind::Hex),
            other => match DateTimeKind::from_type_name(other) {
                Some(kind) => Self::DateTime(kind),
                None => Self::String,
            },
        }
    }

    /// True for the integer family, which accepts range facets.
    pub fn is_integer(self) -> bool {
        matches!(self, Self::Integer | Self::UnsignedInteger | Self::BoundedInteger { .. })
    }
}

/// Content of a CH or AT event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    String(Rc<str>),
    Integer(i64),
    UnsignedInteger(u64),
    Float(Float),
    Decimal(Decimal),
    Boolean(bool),
    /// Octets of `base64Binary`/`hexBinary`, with the lexical space they print in.
    Binary(BinaryKind, Rc<[u8]>),
    DateTime(DateTime),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Integer(v) => write!(f, "{v}"),
            Value::UnsignedInteger(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Decimal(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Binary(kind, v) => f.write_str(&kind.to_lexical(v)),
            Value::DateTime(v) => write!(f, "{v}"),
        }
    }
}

impl Value {
    /// Parses a lexical value into the representation of `vt`.
    pub fn parse(vt: ValueType, lexical: &str) -> Result<Value> {
        let invalid = |what: &str| Error::InvalidValue(format!("'{lexical}' is not a valid {what}"));
        Ok(match vt {
            ValueType::None | ValueType::String => Value::String(lexical.into()),
            ValueType::Integer => Value::Integer(lexical.trim().trim_start_matches('+').parse().map_err(|_| invalid("integer"))?),
            ValueType::UnsignedInteger => {
                Value::UnsignedInteger(lexical.trim().trim_start_matches('+').parse().map_err(|_| invalid("unsigned integer"))?)
            }
            ValueType::BoundedInteger { min, max } => {
                let v: i64 = lexical.trim().trim_start_matches('+').parse().map_err(|_| invalid("integer"))?;
                if v < min || v > max {
                    return Err(Error::InvalidValue(format!("{v} outside [{min}, {max}]")));
                }
                Value::Integer(v)
            }
            ValueType::Float => Value::Float(Float::parse_lexical(lexical)?),
            ValueType::Decimal => Value::Decimal(Decimal::parse_lexical(lexical)?),
            ValueType::Boolean => Value::Boolean(boolean::parse_lexical(lexical).ok_or_else(|| invalid("boolean"))?),
            ValueType::Binary(kind) => Value::Binary(kind, kind.parse_lexical(lexical)?.into()),
            ValueType::DateTime(kind) => Value::DateTime(DateTime::parse_lexical(kind, lexical)?),
        })
    }

    /// Converts `self` to the representation of `vt`, parsing the lexical
    /// form when the variants differ.
    pub fn coerce(&self, vt: ValueType) -> Result<Value> {
        match (self, vt) {
            (Value::String(_), ValueType::None | ValueType::String)
            | (Value::Integer(_), ValueType::Integer)
            | (Value::UnsignedInteger(_), ValueType::UnsignedInteger)
            | (Value::Float(_), ValueType::Float)
            | (Value::Decimal(_), ValueType::Decimal)
            | (Value::Boolean(_), ValueType::Boolean) => Ok(self.clone()),
            (Value::Binary(_, octets), ValueType::Binary(kind)) => Ok(Value::Binary(kind, Rc::clone(octets))),
            (Value::DateTime(dt), ValueType::DateTime(kind)) if dt.kind == kind => Ok(self.clone()),
            (Value::String(s), _) => Value::parse(vt, s),
            (_, ValueType::None | ValueType::String) => Ok(Value::String(self.to_string().into())),
            _ => Value::parse(vt, &self.to_string()),
        }
    }

    /// The string content, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Writes a non-string value with the representation of `vt`.
///
/// `value` must already match `vt` (see [`Value::coerce`]).
pub fn encode_typed(writer: &mut BitWriter, value: &Value, vt: ValueType, byte_aligned: bool) -> Result<()> {
    match (vt, value) {
        (ValueType::Integer, Value::Integer(v)) => integer::encode(writer, *v, byte_aligned),
        (ValueType::UnsignedInteger, Value::UnsignedInteger(v)) => unsigned_integer::encode(writer, *v),
        (ValueType::BoundedInteger { min, max }, Value::Integer(v)) => {
            integer::encode_bounded(writer, *v, min, max, byte_aligned)?
        }
        (ValueType::Float, Value::Float(v)) => float::encode(writer, *v, byte_aligned)?,
        (ValueType::Decimal, Value::Decimal(v)) => decimal::encode(writer, *v, byte_aligned),
        (ValueType::Boolean, Value::Boolean(v)) => boolean::encode(writer, *v, byte_aligned),
        (ValueType::Binary(_), Value::Binary(_, v)) => binary::encode(writer, v),
        (ValueType::DateTime(_), Value::DateTime(v)) => datetime::encode(writer, v, byte_aligned)?,
        (vt, value) => {
            return Err(Error::inconsistent(format!("value {value:?} does not match type {vt:?}")));
        }
    }
    Ok(())
}

/// Reads a non-string value of type `vt`.
pub fn decode_typed(reader: &mut BitReader, vt: ValueType, byte_aligned: bool) -> Result<Value> {
    Ok(match vt {
        ValueType::Integer => Value::Integer(integer::decode(reader, byte_aligned)?),
        ValueType::UnsignedInteger => Value::UnsignedInteger(unsigned_integer::decode(reader)?),
        ValueType::BoundedInteger { min, max } => {
            Value::Integer(integer::decode_bounded(reader, min, max, byte_aligned)?)
        }
        ValueType::Float => Value::Float(float::decode(reader, byte_aligned)?),
        ValueType::Decimal => Value::Decimal(decimal::decode(reader, byte_aligned)?),
        ValueType::Boolean => Value::Boolean(boolean::decode(reader, byte_aligned)?),
        ValueType::Binary(kind) => Value::Binary(kind, binary::decode(reader)?.into()),
        ValueType::DateTime(kind) => Value::DateTime(datetime::decode(reader, kind, byte_aligned)?),
        ValueType::None | ValueType::String => {
            return Err(Error::inconsistent("string values are decoded through the string tables"));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(vt: ValueType, lexical: &str) -> Value {
        let value = Value::parse(vt, lexical).unwrap();
        let mut w = BitWriter::new();
        encode_typed(&mut w, &value, vt, false).unwrap();
        let data = w.into_vec();
        let decoded = decode_typed(&mut BitReader::new(&data), vt, false).unwrap();
        assert_eq!(decoded, value);
        decoded
    }

    #[test]
    fn builtin_type_mapping() {
        assert_eq!(ValueType::for_builtin("int"), ValueType::Integer);
        assert_eq!(ValueType::for_builtin("unsignedLong"), ValueType::UnsignedInteger);
        assert_eq!(ValueType::for_builtin("unsignedByte"), ValueType::BoundedInteger { min: 0, max: 255 });
        assert_eq!(ValueType::for_builtin("double"), ValueType::Float);
        assert_eq!(ValueType::for_builtin("gDay"), ValueType::DateTime(DateTimeKind::GDay));
        assert_eq!(ValueType::for_builtin("token"), ValueType::String);
        assert_eq!(ValueType::for_builtin("duration"), ValueType::String);
        assert_eq!(ValueType::for_builtin("hexBinary"), ValueType::Binary(BinaryKind::Hex));
    }

    /// Gleiche Oktette, aber hexBinary liest und schreibt Hex.
    #[test]
    fn hex_binary_is_not_base64() {
        let hex = Value::parse(ValueType::Binary(BinaryKind::Hex), "0a").unwrap();
        assert_eq!(hex, Value::Binary(BinaryKind::Hex, Rc::from(&[0x0Au8][..])));
        assert!(Value::parse(ValueType::Binary(BinaryKind::Hex), "Cg==").is_err());
    }

    #[test]
    fn typed_round_trips() {
        assert_eq!(round_trip(ValueType::Integer, "-5"), Value::Integer(-5));
        assert_eq!(round_trip(ValueType::UnsignedInteger, "+300"), Value::UnsignedInteger(300));
        assert_eq!(round_trip(ValueType::BoundedInteger { min: 10, max: 20 }, "17"), Value::Integer(17));
        assert_eq!(round_trip(ValueType::Boolean, "1"), Value::Boolean(true));
        assert_eq!(round_trip(ValueType::Float, "2.5").to_string(), "25E-1");
        assert_eq!(round_trip(ValueType::Decimal, "-0.25").to_string(), "-0.25");
        assert_eq!(round_trip(ValueType::Binary(BinaryKind::Base64), "AQID").to_string(), "AQID");
        assert_eq!(round_trip(ValueType::Binary(BinaryKind::Hex), "0a").to_string(), "0A");
        assert_eq!(
            round_trip(ValueType::DateTime(DateTimeKind::Date), "2020-02-02").to_string(),
            "2020-02-02"
        );
    }

    #[test]
    fn bounded_integer_uses_offset_bits() {
        let vt = ValueType::BoundedInteger { min: 10, max: 20 };
        let mut w = BitWriter::new();
        encode_typed(&mut w, &Value::Integer(17), vt, false).unwrap();
        assert_eq!(w.bit_position(), 4);
    }

    #[test]
    fn coerce_parses_strings_and_keeps_matching_values() {
        assert_eq!(Value::from("42").coerce(ValueType::Integer).unwrap(), Value::Integer(42));
        assert_eq!(Value::Integer(7).coerce(ValueType::Integer).unwrap(), Value::Integer(7));
        assert_eq!(Value::Integer(7).coerce(ValueType::String).unwrap(), Value::from("7"));
        assert_eq!(Value::Integer(7).coerce(ValueType::Decimal).unwrap().to_string(), "7");
        assert!(matches!(Value::from("x").coerce(ValueType::Boolean), Err(Error::InvalidValue(_))));
        assert!(Value::from("300").coerce(ValueType::BoundedInteger { min: 0, max: 255 }).is_err());
    }

    #[test]
    fn mismatched_value_is_internal_error() {
        let mut w = BitWriter::new();
        let err = encode_typed(&mut w, &Value::Boolean(true), ValueType::Integer, false).unwrap_err();
        assert!(matches!(err, Error::InconsistentState(_)));
    }
}
