//! EXI Stream Decoder (EXI 1.0 §4, §5, §6).
//!
//! Decodiert einen EXI Stream entweder in eine Event-Liste, als Iterator oder
//! push-basiert über einen [`ContentHandler`]. Schema-less und
//! schema-informed Decoding teilen sich den Runtime-Kern in
//! [`stream`](crate::stream).
//!
//! # Beispiel
//!
//! ```
//! use exigram::decoder::decode;
//! use exigram::encoder::encode;
//! use exigram::event::ExiEvent;
//! use exigram::options::ExiOptions;
//!
//! let events_in = vec![
//!     ExiEvent::StartDocument,
//!     ExiEvent::start("root"),
//!     ExiEvent::text("hello"),
//!     ExiEvent::EndElement,
//!     ExiEvent::EndDocument,
//! ];
//! let bytes = encode(&events_in, &ExiOptions::default(), None).unwrap();
//! let events_out = decode(&bytes, None).unwrap();
//! assert_eq!(events_out, events_in);
//! ```

use std::collections::VecDeque;
use std::io::Read;
use std::rc::Rc;

use crate::bitstream::BitReader;
use crate::error::{Error, Result};
use crate::event::{ContentHandler, EventCollector, ExiEvent};
use crate::header::{self, ExiHeader};
use crate::options::{ExiOptions, SchemaId};
use crate::schema::Schema;
use crate::stream::{ExiStream, Step};

/// How a push decode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// ED was reached.
    Completed,
    /// The handler returned [`Stop`](crate::event::HandlerControl::Stop).
    Stopped,
}

// ============================================================================
// Decoder
// ============================================================================

/// EXI Stream Decoder.
///
/// Liest den Header beim Erzeugen; danach liefert jeder Schritt genau eine
/// Production des Bodys.
pub struct Decoder<'a> {
    /// BitReader für Header und Body.
    reader: BitReader<'a>,
    /// Grammar-Stack, String Tables, Pool.
    stream: ExiStream,
    header: ExiHeader,
    /// Fertige Events für den Iterator.
    ready: VecDeque<ExiEvent>,
    /// Sammelt Events eines Schritts; SE bleibt hier, bis alle NS gelesen sind.
    collector: EventCollector,
    /// Nach einem Fehler liefert der Iterator nichts mehr.
    failed: bool,
}

impl<'a> Decoder<'a> {
    /// Reads the header of `data`.
    ///
    /// `options` are used when the header carries none (EXI 1.0 §5.4).
    /// A supplied `schema` is used for the body whatever the schemaId says.
    pub fn new(data: &'a [u8], options: &ExiOptions, schema: Option<Rc<Schema>>) -> Result<Self> {
        let mut reader = BitReader::new(data);
        let (header, options) = header::decode(&mut reader, options)?;
        if let (Some(SchemaId::Id(id)), None) = (options.schema_id(), &schema) {
            return Err(Error::InvalidValue(format!("stream needs schema '{id}' but none was given")));
        }
        log::debug!("decoding body with {options:?}, schema-informed: {}", schema.is_some());
        let stream = ExiStream::new(options, schema)?;
        Ok(Self {
            reader,
            stream,
            header,
            ready: VecDeque::new(),
            collector: EventCollector::new(),
            failed: false,
        })
    }

    /// Effective options of the body.
    pub fn options(&self) -> &ExiOptions {
        self.stream.options()
    }

    pub fn header(&self) -> &ExiHeader {
        &self.header
    }

    /// Decodes one production and reports it to `handler`.
    pub fn decode_next<H: ContentHandler + ?Sized>(&mut self, handler: &mut H) -> Result<Step> {
        self.stream.process_next_production(&mut self.reader, handler)
    }

    /// Decodes the remaining body into `handler`.
    ///
    /// On error [`ContentHandler::fatal_error`] is called before the error is
    /// returned.
    pub fn run<H: ContentHandler + ?Sized>(&mut self, handler: &mut H) -> Result<DecodeOutcome> {
        loop {
            match self.decode_next(handler) {
                Ok(Step::Continue) => {}
                Ok(Step::Finished) => return Ok(DecodeOutcome::Completed),
                Ok(Step::Stopped) => {
                    log::debug!("handler stopped decoding at bit {}", self.reader.bit_position());
                    return Ok(DecodeOutcome::Stopped);
                }
                Err(err) => {
                    log::debug!("decoding failed at bit {}: {err}", self.reader.bit_position());
                    handler.fatal_error(&err);
                    return Err(err);
                }
            }
        }
    }

    /// Decodiert, bis mindestens ein Event fertig ist.
    ///
    /// Bei preserve.prefixes bleibt ein SE im Collector, bis ein Event folgt,
    /// das kein NS ist: erst dann steht sein Prefix fest.
    fn fill(&mut self) -> Result<()> {
        let prefixes = self.stream.options().preserve().prefixes;
        loop {
            let settled = match self.collector.events.last() {
                None => false,
                Some(ExiEvent::StartElement(_) | ExiEvent::NamespaceDeclaration(_)) => !prefixes,
                Some(_) => true,
            };
            if settled || self.stream.is_finished() {
                self.ready.extend(self.collector.events.drain(..));
                return Ok(());
            }
            self.stream.process_next_production(&mut self.reader, &mut self.collector)?;
        }
    }
}

impl Iterator for Decoder<'_> {
    type Item = Result<ExiEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.ready.is_empty() {
            if let Err(err) = self.fill() {
                self.failed = true;
                return Some(Err(err));
            }
        }
        self.ready.pop_front().map(Ok)
    }
}

// ============================================================================
// High-Level API
// ============================================================================

/// Decodes a stream into its event list; options come from the header or
/// default to [`ExiOptions::default`].
pub fn decode(data: &[u8], schema: Option<Rc<Schema>>) -> Result<Vec<ExiEvent>> {
    decode_with_options(data, &ExiOptions::default(), schema).map(|(events, _)| events)
}

/// Decodes with out-of-band `options` (EXI 1.0 §5.4).
///
/// Returns: (events, effective options)
pub fn decode_with_options(
    data: &[u8],
    options: &ExiOptions,
    schema: Option<Rc<Schema>>,
) -> Result<(Vec<ExiEvent>, ExiOptions)> {
    let decoder = Decoder::new(data, options, schema)?;
    let options = decoder.options().clone();
    let events = decoder.collect::<Result<Vec<_>>>()?;
    Ok((events, options))
}

/// Push decoding into `handler`.
pub fn decode_with_handler<H: ContentHandler + ?Sized>(
    data: &[u8],
    options: &ExiOptions,
    schema: Option<Rc<Schema>>,
    handler: &mut H,
) -> Result<DecodeOutcome> {
    match Decoder::new(data, options, schema) {
        Ok(mut decoder) => decoder.run(handler),
        Err(err) => {
            handler.fatal_error(&err);
            Err(err)
        }
    }
}

/// Reads the whole `source` and decodes it.
pub fn decode_from_reader<R: Read>(
    mut source: R,
    options: &ExiOptions,
    schema: Option<Rc<Schema>>,
) -> Result<(Vec<ExiEvent>, ExiOptions)> {
    let mut data = Vec::new();
    source.read_to_end(&mut data)?;
    decode_with_options(&data, options, schema)
}

// ============================================================================
// Tests
// ============================================================================
