//! exigram – EXI 1.0 (W3C Second Edition) codec with grammar learning
//!
//! Encodiert XML-Event-Sequenzen in einen kompakten EXI Bitstream und
//! zurück. Ohne Schema lernen die Built-in Grammars während des Codings;
//! mit Schema ([`xsd::compile_schema`]) werden Werte typisiert kodiert.
//!
//! # Beispiel
//!
//! ```
//! use std::rc::Rc;
//! use exigram::{ExiEvent, ExiOptions, QName};
//! use exigram::encoder::encode;
//! use exigram::decoder::decode;
//!
//! // Encode
//! let events = vec![
//!     ExiEvent::StartDocument,
//!     ExiEvent::StartElement(Rc::new(QName::new("", "greeting"))),
//!     ExiEvent::text("Hello"),
//!     ExiEvent::EndElement,
//!     ExiEvent::EndDocument,
//! ];
//! let bytes = encode(&events, &ExiOptions::default(), None).unwrap();
//!
//! // Decode
//! let decoded = decode(&bytes, None).unwrap();
//! assert_eq!(decoded, events);
//! ```
//!
//! Schema-informed:
//!
//! ```
//! use exigram::{decode, encode, parse_xml_events, ExiOptions};
//! use exigram::xsd::compile_schema;
//!
//! let schema = compile_schema(
//!     r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
//!          <xs:element name="n" type="xs:int"/>
//!        </xs:schema>"#,
//! )
//! .unwrap()
//! .into_rc();
//! let events = parse_xml_events("<n>42</n>", &ExiOptions::default()).unwrap();
//! let bytes = encode(&events, &ExiOptions::default(), Some(schema.clone())).unwrap();
//! let decoded = decode(&bytes, Some(schema)).unwrap();
//! assert_eq!(decoded.len(), events.len());
//! ```

pub mod binary;
pub mod bit_width;
pub mod bitstream;
pub mod boolean;
pub mod datetime;
pub mod decimal;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod event;
pub mod event_code;
pub mod float;
pub mod grammar;
pub mod header;
pub mod integer;
pub mod n_bit_unsigned_integer;
pub mod options;
pub mod options_codec;
pub mod proto_grammar;
pub mod qname;
pub mod schema;
pub mod stream;
pub mod string;
pub mod string_table;
pub mod undeclared;
pub mod unsigned_integer;
pub mod value;
pub mod xml;
pub mod xsd;

pub use error::{Error, Result};

/// HashMap mit ahash (schneller, nicht DoS-resistent, nur für interne Datenstrukturen).
pub(crate) type FastHashMap<K, V> = hashbrown::HashMap<K, V, ahash::RandomState>;

/// HashSet mit ahash.
pub(crate) type FastHashSet<K> = hashbrown::HashSet<K, ahash::RandomState>;

/// IndexMap mit ahash (deterministische Iteration + schnelles Hashing).
pub(crate) type FastIndexMap<K, V> = indexmap::IndexMap<K, V, ahash::RandomState>;

// Public API: Events
pub use event::{AtContent, ContentHandler, DtContent, EventCollector, ExiEvent, HandlerControl, NsContent, PiContent};

// Public API: Options
pub use options::{Alignment, EncoderConfig, ExiOptions, Preserve, SchemaId};

// Public API: Header
pub use header::ExiHeader;

// Public API: Encoder/Decoder
pub use decoder::{decode, decode_with_handler, decode_with_options, DecodeOutcome, Decoder};
pub use encoder::{encode, encode_with_config, Encoder};

// Public API: Types
pub use qname::QName;
pub use schema::Schema;
pub use value::{Value, ValueType};

// Public API: XSD/XML
pub use xml::parse_xml_events;
