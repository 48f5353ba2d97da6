//! EXI Options Document (EXI 1.0 §5.4, Appendix C).
//!
//! Die Options werden als EXI Body ohne Header encodiert, informiert durch das
//! Options-Schema aus Appendix C, mit `strict=true` und bit-packed. Statt einer
//! handgeschriebenen Zustandsmaschine läuft hier ein verschachtelter
//! [`ExiStream`] über dasselbe Bit-Cursor wie der äußere Header.
//!
//! Bei `strict=true` sind SD/ED und die meisten EE implizit (0 bits). SE(header)
//! braucht 1 bit (DocContent: SE(header)=0, SE(*)=1):
//! ```text
//! [SD] → SE(header)[1 bit] → Header-Content → [EE(header)] → [ED]
//! ```
//!
//! `schemaId` wird als String-Wert geschrieben; ein leerer Wert steht für
//! [`SchemaId::BuiltinOnly`]. `xsi:nil` (= [`SchemaId::None`]) und
//! `datatypeRepresentationMap` werden nicht unterstützt.

use std::rc::Rc;

use crate::bitstream::{BitReader, BitWriter};
use crate::event::{ContentHandler, ExiEvent, HandlerControl};
use crate::options::{Alignment, ExiOptions, SchemaId};
use crate::qname::QName;
use crate::schema::Schema;
use crate::stream::{ExiStream, Step};
use crate::value::Value;
use crate::{Error, Result, xsd};

/// Namespace of the options document.
pub const EXI_NS: &str = "http://www.w3.org/2009/exi";

const DEFAULT_BLOCK_SIZE: u32 = 1_000_000;

/// Appendix C, ohne die `##other`-Erweiterungspunkte.
const OPTIONS_XSD: &str = r###"<xsd:schema targetNamespace="http://www.w3.org/2009/exi"
            xmlns:xsd="http://www.w3.org/2001/XMLSchema"
            elementFormDefault="qualified">
  <xsd:element name="header">
    <xsd:complexType>
      <xsd:sequence>
        <xsd:element name="lesscommon" minOccurs="0">
          <xsd:complexType>
            <xsd:sequence>
              <xsd:element name="uncommon" minOccurs="0">
                <xsd:complexType>
                  <xsd:sequence>
                    <xsd:element name="alignment" minOccurs="0">
                      <xsd:complexType>
                        <xsd:choice>
                          <xsd:element name="byte"><xsd:complexType/></xsd:element>
                          <xsd:element name="pre-compress"><xsd:complexType/></xsd:element>
                        </xsd:choice>
                      </xsd:complexType>
                    </xsd:element>
                    <xsd:element name="selfContained" minOccurs="0"><xsd:complexType/></xsd:element>
                    <xsd:element name="valueMaxLength" minOccurs="0" type="xsd:unsignedInt"/>
                    <xsd:element name="valuePartitionCapacity" minOccurs="0" type="xsd:unsignedInt"/>
                    <xsd:element name="datatypeRepresentationMap" minOccurs="0" maxOccurs="unbounded">
                      <xsd:complexType>
                        <xsd:sequence>
                          <xsd:any namespace="##any" processContents="skip"/>
                          <xsd:any namespace="##any" processContents="skip"/>
                        </xsd:sequence>
                      </xsd:complexType>
                    </xsd:element>
                  </xsd:sequence>
                </xsd:complexType>
              </xsd:element>
              <xsd:element name="preserve" minOccurs="0">
                <xsd:complexType>
                  <xsd:sequence>
                    <xsd:element name="dtd" minOccurs="0"><xsd:complexType/></xsd:element>
                    <xsd:element name="prefixes" minOccurs="0"><xsd:complexType/></xsd:element>
                    <xsd:element name="lexicalValues" minOccurs="0"><xsd:complexType/></xsd:element>
                    <xsd:element name="comments" minOccurs="0"><xsd:complexType/></xsd:element>
                    <xsd:element name="pis" minOccurs="0"><xsd:complexType/></xsd:element>
                  </xsd:sequence>
                </xsd:complexType>
              </xsd:element>
              <xsd:element name="blockSize" minOccurs="0">
                <xsd:simpleType>
                  <xsd:restriction base="xsd:unsignedInt">
                    <xsd:minInclusive value="1"/>
                  </xsd:restriction>
                </xsd:simpleType>
              </xsd:element>
            </xsd:sequence>
          </xsd:complexType>
        </xsd:element>
        <xsd:element name="common" minOccurs="0">
          <xsd:complexType>
            <xsd:sequence>
              <xsd:element name="compression" minOccurs="0"><xsd:complexType/></xsd:element>
              <xsd:element name="fragment" minOccurs="0"><xsd:complexType/></xsd:element>
              <xsd:element name="schemaId" minOccurs="0" nillable="true" type="xsd:string"/>
            </xsd:sequence>
          </xsd:complexType>
        </xsd:element>
        <xsd:element name="strict" minOccurs="0"><xsd:complexType/></xsd:element>
      </xsd:sequence>
    </xsd:complexType>
  </xsd:element>
</xsd:schema>
"###;

thread_local! {
    static OPTIONS_SCHEMA: Result<Rc<Schema>> = xsd::compile_schema(OPTIONS_XSD).map(Schema::into_rc);
}

/// Compiled Appendix C schema, built once per thread.
fn options_schema() -> Result<Rc<Schema>> {
    OPTIONS_SCHEMA.with(|s| s.clone())
}

fn stream_options() -> ExiOptions {
    ExiOptions::default().with_strict()
}

// ============================================================================
// Encoding
// ============================================================================

/// Event-Liste des Options-Dokuments; Default-Werte werden weggelassen.
struct OptionsEvents(Vec<ExiEvent>);

impl OptionsEvents {
    fn start(&mut self, name: &str) {
        self.0.push(ExiEvent::StartElement(Rc::new(QName::new(EXI_NS, name))));
    }

    fn end(&mut self) {
        self.0.push(ExiEvent::EndElement);
    }

    fn flag(&mut self, name: &str) {
        self.start(name);
        self.end();
    }

    fn value(&mut self, name: &str, value: Value) {
        self.start(name);
        self.0.push(ExiEvent::Characters(value));
        self.end();
    }
}

fn needs_uncommon(opts: &ExiOptions) -> bool {
    opts.alignment() != Alignment::BitPacked
        || opts.self_contained()
        || opts.value_max_length().is_some()
        || opts.value_partition_capacity().is_some()
}

fn needs_lesscommon(opts: &ExiOptions) -> bool {
    needs_uncommon(opts) || opts.preserve().any() || opts.block_size() != DEFAULT_BLOCK_SIZE
}

fn needs_common(opts: &ExiOptions) -> bool {
    opts.compression() || opts.fragment() || opts.schema_id().is_some()
}

fn options_events(opts: &ExiOptions) -> Result<Vec<ExiEvent>> {
    let mut ev = OptionsEvents(vec![ExiEvent::StartDocument]);
    ev.start("header");

    if needs_lesscommon(opts) {
        ev.start("lesscommon");
        if needs_uncommon(opts) {
            ev.start("uncommon");
            match opts.alignment() {
                Alignment::BitPacked => {}
                Alignment::ByteAlignment => {
                    ev.start("alignment");
                    ev.flag("byte");
                    ev.end();
                }
                Alignment::PreCompression => {
                    ev.start("alignment");
                    ev.flag("pre-compress");
                    ev.end();
                }
            }
            if opts.self_contained() {
                ev.flag("selfContained");
            }
            if let Some(len) = opts.value_max_length() {
                ev.value("valueMaxLength", Value::UnsignedInteger(u64::from(len)));
            }
            if let Some(cap) = opts.value_partition_capacity() {
                ev.value("valuePartitionCapacity", Value::UnsignedInteger(u64::from(cap)));
            }
            ev.end();
        }
        let p = opts.preserve();
        if p.any() {
            ev.start("preserve");
            for (set, name) in [
                (p.dtd, "dtd"),
                (p.prefixes, "prefixes"),
                (p.lexical_values, "lexicalValues"),
                (p.comments, "comments"),
                (p.pis, "pis"),
            ] {
                if set {
                    ev.flag(name);
                }
            }
            ev.end();
        }
        if opts.block_size() != DEFAULT_BLOCK_SIZE {
            ev.value("blockSize", Value::UnsignedInteger(u64::from(opts.block_size())));
        }
        ev.end();
    }

    if needs_common(opts) {
        ev.start("common");
        if opts.compression() {
            ev.flag("compression");
        }
        if opts.fragment() {
            ev.flag("fragment");
        }
        match opts.schema_id() {
            None => {}
            Some(SchemaId::None) => return Err(Error::unsupported("nil schemaId in the options document")),
            Some(SchemaId::BuiltinOnly) => ev.value("schemaId", Value::from("")),
            Some(SchemaId::Id(id)) => ev.value("schemaId", Value::from(id.as_str())),
        }
        ev.end();
    }

    if opts.strict() {
        ev.flag("strict");
    }
    ev.end();
    ev.0.push(ExiEvent::EndDocument);
    Ok(ev.0)
}

/// Writes `options` as an options document.
///
/// # Errors
///
/// - [`Error::InvalidValue`] for an invalid option combination
/// - [`Error::Unsupported`] for a nil schemaId
pub fn encode(writer: &mut BitWriter, options: &ExiOptions) -> Result<()> {
    options.validate()?;
    let events = options_events(options)?;
    let mut stream = ExiStream::new(stream_options(), Some(options_schema()?))?;
    for event in &events {
        stream.encode_event(writer, event)?;
    }
    Ok(())
}

// ============================================================================
// Decoding
// ============================================================================

/// Sammelt die Options aus den Events des Options-Dokuments.
struct OptionsBuilder {
    options: ExiOptions,
    /// Local names der offenen Elemente.
    path: Vec<Rc<str>>,
    error: Option<Error>,
}

impl OptionsBuilder {
    fn current(&self) -> &str {
        self.path.last().map_or("", |s| s)
    }

    fn fail(&mut self, err: Error) -> HandlerControl {
        self.error = Some(err);
        HandlerControl::Stop
    }

    fn number(&mut self, value: u64) -> HandlerControl {
        let Ok(v) = u32::try_from(value) else {
            return self.fail(Error::IntegerOverflow);
        };
        match self.current() {
            "valueMaxLength" => self.options.set_value_max_length(Some(v)),
            "valuePartitionCapacity" => self.options.set_value_partition_capacity(Some(v)),
            "blockSize" => self.options.set_block_size(v),
            other => {
                let msg = format!("unsigned value in <{other}>");
                return self.fail(Error::InvalidValue(msg));
            }
        }
        HandlerControl::Continue
    }
}

impl ContentHandler for OptionsBuilder {
    fn start_element(&mut self, qname: &QName) -> HandlerControl {
        let name = qname.local_name.clone();
        match &*name {
            "byte" => self.options.set_alignment(Alignment::ByteAlignment),
            "pre-compress" => self.options.set_alignment(Alignment::PreCompression),
            "selfContained" => self.options.set_self_contained(true),
            "dtd" => self.options.preserve_mut().dtd = true,
            "prefixes" => self.options.preserve_mut().prefixes = true,
            "lexicalValues" => self.options.preserve_mut().lexical_values = true,
            "comments" => self.options.preserve_mut().comments = true,
            "pis" => self.options.preserve_mut().pis = true,
            "compression" => self.options.set_compression(true),
            "fragment" => self.options.set_fragment(true),
            "strict" => self.options.set_strict(true),
            "datatypeRepresentationMap" => return self.fail(Error::unsupported("datatypeRepresentationMap")),
            _ => {}
        }
        self.path.push(name);
        HandlerControl::Continue
    }

    fn end_element(&mut self) -> HandlerControl {
        self.path.pop();
        HandlerControl::Continue
    }

    fn string_data(&mut self, value: &str) -> HandlerControl {
        if self.current() != "schemaId" {
            let msg = format!("string value in <{}>", self.current());
            return self.fail(Error::InvalidValue(msg));
        }
        let id = if value.is_empty() { SchemaId::BuiltinOnly } else { SchemaId::Id(value.to_owned()) };
        self.options.set_schema_id(Some(id));
        HandlerControl::Continue
    }

    fn unsigned_int_data(&mut self, value: u64) -> HandlerControl {
        self.number(value)
    }
}

/// Reads an options document.
///
/// # Errors
///
/// - [`Error::PrematureEndOfStream`], [`Error::InvalidEventCode`] for malformed input
/// - [`Error::InvalidValue`] if the decoded combination is invalid
/// - [`Error::Unsupported`] for `datatypeRepresentationMap`
pub fn decode(reader: &mut BitReader) -> Result<ExiOptions> {
    let mut stream = ExiStream::new(stream_options(), Some(options_schema()?))?;
    let mut builder = OptionsBuilder { options: ExiOptions::default(), path: Vec::new(), error: None };
    loop {
        match stream.process_next_production(reader, &mut builder)? {
            Step::Continue => {}
            Step::Finished => break,
            Step::Stopped => {
                return Err(builder.error.take().unwrap_or_else(|| Error::inconsistent("options decoding stopped")));
            }
        }
    }
    builder.options.validate()?;
    log::debug!("decoded header options: {:?}", builder.options);
    Ok(builder.options)
}
