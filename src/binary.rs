//! Binary (EXI 1.0 §7.1.1): length as unsigned integer, then raw octets.
//!
//! Also holds the lexical conversions for `xs:base64Binary` and
//! `xs:hexBinary`, which share this representation.

use base64::Engine;

use crate::bitstream::{BitReader, BitWriter};
use crate::{Error, Result, unsigned_integer};

/// Writes a length-prefixed octet sequence.
pub fn encode(writer: &mut BitWriter, value: &[u8]) {
    unsigned_integer::encode(writer, value.len() as u64);
    writer.write_bytes(value);
}

/// Reads a length-prefixed octet sequence.
pub fn decode(reader: &mut BitReader) -> Result<Vec<u8>> {
    let len = unsigned_integer::decode(reader)?;
    let len = usize::try_from(len).map_err(|_| Error::IntegerOverflow)?;
    if len.saturating_mul(8) > reader.remaining_bits() {
        return Err(Error::PrematureEndOfStream);
    }
    let mut buf = vec![0u8; len];
    reader.read_bytes(&mut buf)?;
    Ok(buf)
}

/// Lexical space of a binary type; both share the octet representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BinaryKind {
    /// `xs:base64Binary`
    #[default]
    Base64,
    /// `xs:hexBinary`
    Hex,
}

impl BinaryKind {
    pub fn parse_lexical(self, s: &str) -> Result<Vec<u8>> {
        match self {
            BinaryKind::Base64 => from_base64(s),
            BinaryKind::Hex => from_hex(s),
        }
    }

    pub fn to_lexical(self, bytes: &[u8]) -> String {
        match self {
            BinaryKind::Base64 => to_base64(bytes),
            BinaryKind::Hex => to_hex(bytes),
        }
    }
}

/// Lexical form of `xs:base64Binary` (RFC 4648, with padding).
pub fn to_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Parses `xs:base64Binary`; whitespace is ignored.
pub fn from_base64(s: &str) -> Result<Vec<u8>> {
    let compact: String = s.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| Error::InvalidValue(format!("invalid base64Binary '{s}': {e}")))
}

/// Lexical form of `xs:hexBinary` (upper case).
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

/// Parses `xs:hexBinary`.
pub fn from_hex(s: &str) -> Result<Vec<u8>> {
    let s = s.trim();
    if !s.is_ascii() || s.len() % 2 != 0 {
        return Err(Error::InvalidValue(format!("invalid hexBinary '{s}'")));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|_| Error::InvalidValue(format!("invalid hexBinary '{s}'")))
        })
        .collect()
}
