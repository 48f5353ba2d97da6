//! Central error types for the codec.
//!
//! Die Varianten sind nach Fehlerklassen gruppiert: I/O, fehlerhafte Eingabe,
//! Schema-Kompilierung, interne Invarianten und nicht unterstützte Features.
//! Ein `Stop` aus einem [`ContentHandler`](crate::event::ContentHandler) ist
//! bewusst *kein* Fehler, siehe [`DecodeOutcome`](crate::decoder::DecodeOutcome).

use core::fmt;
use std::borrow::Cow;

/// All error kinds reported by the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // --- I/O ---
    /// The underlying byte sink or source failed.
    Io(String),
    /// The EXI stream ended in the middle of a value or event code.
    PrematureEndOfStream,

    // --- Malformed input ---
    /// No production of the current rule matched the decoded event code (EXI §6.1).
    InvalidEventCode {
        /// The code parts read so far, e.g. `"1.3"`.
        code: String,
        /// Non-terminal the rule was looked up for.
        non_terminal: u16,
    },
    /// An unsigned integer needs more than 64 bits (EXI §7.1.6).
    IntegerOverflow,
    /// A code point is a surrogate or above U+10FFFF (EXI §7.1.10).
    InvalidCodePoint(u64),
    /// The distinguishing bits are not `10` (EXI §5.2).
    InvalidDistinguishingBits(u8),
    /// A lexical value could not be converted to the datatype of the production.
    InvalidValue(String),
    /// The event does not fit any production of the current grammar state.
    UnexpectedEvent(String),
    /// XML text handed to [`xml::parse_xml_events`](crate::xml::parse_xml_events) is not well-formed.
    XmlParse(String),

    // --- Schema compilation ---
    /// The schema document is structurally invalid.
    SchemaCompilation(Cow<'static, str>),
    /// A type or base type could not be resolved after the whole schema was read.
    UnresolvedReference(String),

    // --- Internal invariants ---
    /// Processing state is inconsistent, e.g. an empty grammar stack or a
    /// qname production without a grammar. Indicates a bug, not bad input.
    InconsistentState(Cow<'static, str>),

    // --- Not supported ---
    /// A feature the codec deliberately does not implement.
    Unsupported(Cow<'static, str>),
    /// Preview versions and versions other than 1 (EXI §5.3).
    UnsupportedVersion,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
            Self::PrematureEndOfStream => write!(f, "premature end of EXI stream"),
            Self::InvalidEventCode { code, non_terminal } => {
                write!(f, "invalid event code '{code}' for non-terminal {non_terminal} (EXI 6.1)")
            }
            Self::IntegerOverflow => write!(f, "unsigned integer exceeds 64 bits (EXI 7.1.6)"),
            Self::InvalidCodePoint(cp) => write!(f, "invalid Unicode code point U+{cp:X} (EXI 7.1.10)"),
            Self::InvalidDistinguishingBits(bits) => {
                write!(f, "invalid distinguishing bits {bits:02b}, expected 10 (EXI 5.2)")
            }
            Self::InvalidValue(msg) => write!(f, "invalid typed value: {msg}"),
            Self::UnexpectedEvent(msg) => write!(f, "event not allowed here: {msg}"),
            Self::XmlParse(msg) => write!(f, "XML parse error: {msg}"),
            Self::SchemaCompilation(msg) => write!(f, "schema compilation failed: {msg}"),
            Self::UnresolvedReference(name) => write!(f, "unresolvable type reference '{name}'"),
            Self::InconsistentState(msg) => write!(f, "inconsistent processing state: {msg}"),
            Self::Unsupported(what) => write!(f, "unsupported feature: {what}"),
            Self::UnsupportedVersion => write!(f, "unsupported EXI version (EXI 5.3)"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::PrematureEndOfStream
        } else {
            Self::Io(err.to_string())
        }
    }
}

impl Error {
    /// Erstellt einen `SchemaCompilation` Fehler mit Nachricht.
    pub fn schema(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::SchemaCompilation(msg.into())
    }

    /// Erstellt einen `InconsistentState` Fehler mit Nachricht.
    pub fn inconsistent(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::InconsistentState(msg.into())
    }

    /// Erstellt einen `Unsupported` Fehler mit Nachricht.
    pub fn unsupported(what: impl Into<Cow<'static, str>>) -> Self {
        Self::Unsupported(what.into())
    }

    /// True for errors caused by the input data rather than by the codec itself.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            Self::PrematureEndOfStream
                | Self::InvalidEventCode { .. }
                | Self::IntegerOverflow
                | Self::InvalidCodePoint(_)
                | Self::InvalidDistinguishingBits(_)
                | Self::InvalidValue(_)
                | Self::XmlParse(_)
        )
    }
}

/// A convenience `Result` type alias using [`Error`].
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_event_code_display() {
        let e = Error::InvalidEventCode { code: "1.3".into(), non_terminal: 5 };
        let msg = e.to_string();
        assert!(msg.contains("1.3"), "{msg}");
        assert!(msg.contains("non-terminal 5"), "{msg}");
    }

    #[test]
    fn code_point_display_is_hex() {
        let msg = Error::InvalidCodePoint(0xD800).to_string();
        assert!(msg.contains("D800"), "{msg}");
    }

    #[test]
    fn io_eof_maps_to_premature_end() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(Error::from(io), Error::PrematureEndOfStream);
        let io = std::io::Error::other("disk on fire");
        assert!(matches!(Error::from(io), Error::Io(_)));
    }

    #[test]
    fn malformed_input_is_distinct_from_internal_state() {
        assert!(Error::PrematureEndOfStream.is_malformed_input());
        assert!(Error::InvalidEventCode { code: "0".into(), non_terminal: 1 }.is_malformed_input());
        assert!(!Error::inconsistent("empty stack").is_malformed_input());
        assert!(!Error::unsupported("decimal").is_malformed_input());
    }

    #[test]
    fn error_implements_std_error() {
        let e: Box<dyn std::error::Error> = Box::new(Error::UnsupportedVersion);
        assert!(!e.to_string().is_empty());
    }

    #[test]
    fn error_is_clone_and_eq() {
        let e1 = Error::schema("missing <schema> root");
        let e2 = e1.clone();
        assert_eq!(e1, e2);
    }
}
