//! EXI Stream Encoder (EXI 1.0 §4, §5, §6).
//!
//! Encodiert EXI Events zu einem EXI Stream, schema-less oder
//! schema-informed. Der Header wird beim Erzeugen des [`Encoder`]s
//! geschrieben, danach Event für Event der Body.
//!
//! # Beispiel
//!
//! ```
//! use std::rc::Rc;
//! use exigram::encoder::encode;
//! use exigram::event::ExiEvent;
//! use exigram::options::ExiOptions;
//! use exigram::qname::QName;
//!
//! let events = vec![
//!     ExiEvent::StartDocument,
//!     ExiEvent::StartElement(Rc::new(QName::new("", "root"))),
//!     ExiEvent::EndElement,
//!     ExiEvent::EndDocument,
//! ];
//! let bytes = encode(&events, &ExiOptions::default(), None).unwrap();
//! assert!(!bytes.is_empty());
//! ```

use std::io::Write;
use std::rc::Rc;

use crate::bitstream::BitWriter;
use crate::error::{Error, Result};
use crate::event::ExiEvent;
use crate::header::{self, ExiHeader};
use crate::options::{EncoderConfig, ExiOptions};
use crate::schema::Schema;
use crate::stream::ExiStream;

// ============================================================================
// Encoder
// ============================================================================

/// EXI Stream Encoder.
pub struct Encoder {
    /// Ausgabe; der Header steht schon drin.
    writer: BitWriter,
    /// Grammar-Stack, String Tables, Pool.
    stream: ExiStream,
}

impl Encoder {
    /// Writes the header described by `config`.
    pub fn new(config: &EncoderConfig, schema: Option<Rc<Schema>>) -> Result<Self> {
        let options = &config.options;
        options.validate()?;
        let mut head = ExiHeader::new();
        if config.include_cookie {
            head = head.with_cookie();
        }
        if config.include_options {
            head = head.with_options();
        }
        let mut writer = BitWriter::new();
        header::encode(&mut writer, &head, options)?;
        log::debug!("header written ({} bits), schema-informed: {}", writer.bit_position(), schema.is_some());
        let stream = ExiStream::new(options.clone(), schema)?;
        Ok(Self { writer, stream })
    }

    pub fn options(&self) -> &ExiOptions {
        self.stream.options()
    }

    pub fn encode_event(&mut self, event: &ExiEvent) -> Result<()> {
        self.stream.encode_event(&mut self.writer, event)
    }

    pub fn encode_events(&mut self, events: &[ExiEvent]) -> Result<()> {
        events.iter().try_for_each(|e| self.encode_event(e))
    }

    /// Writes all complete bytes to `sink`.
    pub fn flush_to<W: Write>(&mut self, sink: &mut W) -> Result<()> {
        self.writer.drain_to(sink)
    }

    /// Checks that ED was written and returns the remaining bytes, padded.
    pub fn finish(self) -> Result<Vec<u8>> {
        if !self.stream.is_finished() {
            return Err(Error::UnexpectedEvent("stream ended before ED".into()));
        }
        Ok(self.writer.into_vec())
    }
}

/// Options go into the header when they differ from the defaults.
fn auto_config(options: &ExiOptions) -> EncoderConfig {
    let config = EncoderConfig::new(options.clone());
    if *options != ExiOptions::default() { config.with_options_in_header() } else { config }
}

// ============================================================================
// High-Level API
// ============================================================================

/// Encodiert EXI Events zu einem EXI Stream.
///
/// Non-default Options werden in den Header geschrieben, damit der Stream
/// selbst-beschreibend ist. Für explizite Kontrolle [`encode_with_config`].
pub fn encode(events: &[ExiEvent], options: &ExiOptions, schema: Option<Rc<Schema>>) -> Result<Vec<u8>> {
    encode_with_config(events, &auto_config(options), schema)
}

/// Encodiert EXI Events mit expliziter Header-Konfiguration.
pub fn encode_with_config(events: &[ExiEvent], config: &EncoderConfig, schema: Option<Rc<Schema>>) -> Result<Vec<u8>> {
    let mut encoder = Encoder::new(config, schema)?;
    encoder.encode_events(events)?;
    encoder.finish()
}

/// Encodes into `sink`, flushing complete bytes after every event.
pub fn encode_to_writer<W: Write>(
    events: &[ExiEvent],
    config: &EncoderConfig,
    schema: Option<Rc<Schema>>,
    sink: &mut W,
) -> Result<()> {
    let mut encoder = Encoder::new(config, schema)?;
    for event in events {
        encoder.encode_event(event)?;
        encoder.flush_to(sink)?;
    }
    let rest = encoder.finish()?;
    sink.write_all(&rest)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
