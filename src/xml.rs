//! XML text to EXI events.
//!
//! Uses quick-xml's namespace-aware reader. Only what the EXI event model
//! needs is produced: no DTD entity expansion, no validation. Which
//! fidelity events (CM, PI, DT, ER, NS) come out is decided by the
//! [`Preserve`] flags of the options, exactly like the grammars decide what
//! is encodable.

use std::rc::Rc;

use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{QName as XmlQName, ResolveResult};
use quick_xml::reader::NsReader;

use crate::error::{Error, Result};
use crate::event::{AtContent, DtContent, ExiEvent, NsContent, PiContent};
use crate::options::{ExiOptions, Preserve};
use crate::qname::QName;
use crate::value::Value;

/// Parses `xml` into an event sequence framed by SD and ED.
///
/// Whitespace-only text next to child elements is dropped, attributes are
/// sorted by local name and URI (the order of schema-informed AT
/// productions). Several top-level elements are accepted, so the result
/// can also feed a fragment encoder.
pub fn parse_xml_events(xml: &str, options: &ExiOptions) -> Result<Vec<ExiEvent>> {
    let xml = xml.replace("\r\n", "\n").replace('\r', "\n");
    let mut reader = NsReader::from_str(&xml);
    reader.config_mut().trim_text(false);

    let mut out = Parsed::new(options.preserve());
    out.events.push(ExiEvent::StartDocument);

    loop {
        let event = reader.read_event().map_err(|e| {
            Error::XmlParse(format!("at byte {}: {e}", reader.buffer_position()))
        })?;
        match event {
            Event::Start(e) => {
                out.start_element(&reader, &e)?;
            }
            Event::Empty(e) => {
                out.start_element(&reader, &e)?;
                out.end_element()?;
            }
            Event::End(_) => out.end_element()?,
            Event::Text(e) => {
                let raw = utf8(&e)?;
                let text = unescape(raw).map_err(|er| Error::XmlParse(er.to_string()))?;
                out.text(&text)?;
            }
            Event::CData(e) => {
                let raw = e.into_inner();
                out.text(utf8(&raw)?)?;
            }
            Event::GeneralRef(e) => {
                out.reference(utf8(e.as_ref())?)?;
            }
            Event::Comment(e) => {
                if out.preserve.comments {
                    out.flush_text(false);
                    out.events.push(ExiEvent::Comment(utf8(e.as_ref())?.into()));
                }
            }
            Event::PI(e) => {
                if out.preserve.pis {
                    out.flush_text(false);
                    // Der Separator zwischen Target und Daten gehört nicht zu den Daten
                    let data = utf8(e.content())?.trim_start();
                    out.events.push(ExiEvent::ProcessingInstruction(PiContent {
                        target: utf8(e.target())?.into(),
                        data: data.into(),
                    }));
                }
            }
            Event::DocType(e) => {
                if out.preserve.dtd {
                    out.flush_text(false);
                    out.events.push(ExiEvent::DocType(parse_doctype(utf8(e.as_ref())?)));
                }
            }
            Event::Decl(_) => {}
            Event::Eof => break,
        }
    }

    if !out.open.is_empty() {
        return Err(Error::XmlParse(format!("{} element(s) not closed", out.open.len())));
    }
    out.events.push(ExiEvent::EndDocument);
    log::debug!("parsed {} XML events", out.events.len());
    Ok(out.events)
}

// ============================================================================
// Event-Aufbau
// ============================================================================

/// Events built so far plus the text run not yet emitted.
struct Parsed {
    preserve: Preserve,
    events: Vec<ExiEvent>,
    /// Pro offenem Element: hatte es schon ein Kind-Element?
    open: Vec<bool>,
    /// Zusammenhängender Text, erst beim nächsten Nicht-CH-Event ausgegeben.
    pending: String,
}

impl Parsed {
    fn new(preserve: &Preserve) -> Self {
        Self { preserve: *preserve, events: Vec::new(), open: Vec::new(), pending: String::new() }
    }

    fn start_element(&mut self, reader: &NsReader<&[u8]>, e: &BytesStart<'_>) -> Result<()> {
        self.flush_text(true);
        if let Some(parent) = self.open.last_mut() {
            *parent = true;
        }
        self.open.push(false);

        let name = e.name();
        let (resolved, local) = reader.resolver().resolve_element(name);
        let uri = bound_uri(resolved)?;
        let prefix = prefix_of(name)?;
        let local = utf8(local.as_ref())?;
        let element = if self.preserve.prefixes {
            QName::with_prefix(uri.as_str(), local, prefix.unwrap_or(""))
        } else {
            QName::new(uri.as_str(), local)
        };
        self.events.push(ExiEvent::StartElement(Rc::new(element)));

        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|er| Error::XmlParse(er.to_string()))?;
            let key = attr.key.as_ref();
            let value = unescape(utf8(&attr.value)?).map_err(|er| Error::XmlParse(er.to_string()))?;

            let declared = if key == b"xmlns" {
                Some("")
            } else {
                key.strip_prefix(b"xmlns:").map(utf8).transpose()?
            };
            if let Some(ns_prefix) = declared {
                if self.preserve.prefixes {
                    let local_element_ns = uri == *value && prefix.unwrap_or("") == ns_prefix;
                    self.events.push(ExiEvent::NamespaceDeclaration(NsContent {
                        uri: (*value).into(),
                        prefix: ns_prefix.into(),
                        local_element_ns,
                    }));
                }
                continue;
            }

            let (resolved, at_local) = reader.resolver().resolve_attribute(attr.key);
            let at_uri = bound_uri(resolved)?;
            let at_local = utf8(at_local.as_ref())?;
            let qname = match prefix_of(attr.key)? {
                Some(p) if self.preserve.prefixes => QName::with_prefix(at_uri.as_str(), at_local, p),
                _ => QName::new(at_uri.as_str(), at_local),
            };
            attributes.push(AtContent { qname: Rc::new(qname), value: Value::from(&*value) });
        }
        attributes.sort_by(|a, b| a.qname.cmp_local_first(&b.qname));
        self.events.extend(attributes.into_iter().map(ExiEvent::Attribute));
        Ok(())
    }

    fn end_element(&mut self) -> Result<()> {
        let had_children = self
            .open
            .pop()
            .ok_or_else(|| Error::XmlParse("end tag without start tag".into()))?;
        self.flush_text(had_children);
        self.events.push(ExiEvent::EndElement);
        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<()> {
        if self.open.is_empty() {
            if text.trim().is_empty() {
                return Ok(());
            }
            return Err(Error::XmlParse("character data outside of an element".into()));
        }
        self.pending.push_str(text);
        Ok(())
    }

    /// Character, predefined and (with preserve.dtd) other entity references.
    fn reference(&mut self, name: &str) -> Result<()> {
        if let Some(code) = name.strip_prefix('#') {
            let parsed = match code.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16),
                None => code.parse(),
            };
            let ch = parsed
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| Error::XmlParse(format!("invalid character reference &{name};")))?;
            return self.text(ch.encode_utf8(&mut [0; 4]));
        }
        if let Some(resolved) = resolve_predefined_entity(name) {
            return self.text(resolved);
        }
        if self.preserve.dtd && !self.open.is_empty() {
            self.flush_text(false);
            self.events.push(ExiEvent::EntityReference(name.into()));
            return Ok(());
        }
        Err(Error::XmlParse(format!("undeclared entity &{name};")))
    }

    /// Emits the pending text run as one CH. Whitespace-only runs are
    /// dropped when `element_boundary` says they only separate elements.
    fn flush_text(&mut self, element_boundary: bool) {
        if self.pending.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.pending);
        if element_boundary && text.trim().is_empty() {
            return;
        }
        self.events.push(ExiEvent::Characters(Value::from(text)));
    }
}

// ============================================================================
// Hilfsfunktionen
// ============================================================================

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| Error::XmlParse(e.to_string()))
}

fn bound_uri(resolved: ResolveResult<'_>) -> Result<String> {
    match resolved {
        ResolveResult::Bound(ns) => Ok(utf8(ns.as_ref())?.to_owned()),
        ResolveResult::Unbound => Ok(String::new()),
        ResolveResult::Unknown(prefix) => {
            Err(Error::XmlParse(format!("unbound namespace prefix '{}'", String::from_utf8_lossy(&prefix))))
        }
    }
}

fn prefix_of(name: XmlQName<'_>) -> Result<Option<&str>> {
    name.prefix().map(|p| utf8(p.into_inner())).transpose()
}

/// Splits `<!DOCTYPE ...>` content into name, public id, system id and
/// internal subset.
fn parse_doctype(raw: &str) -> DtContent {
    let raw = raw.trim();
    let name_end = raw.find(|c: char| c.is_whitespace() || c == '[').unwrap_or(raw.len());
    let (name, mut rest) = raw.split_at(name_end);
    rest = rest.trim_start();

    let mut public = "";
    let mut system = "";
    if let Some(after) = rest.strip_prefix("PUBLIC") {
        let (p, after) = quoted(after);
        let (s, after) = quoted(after);
        (public, system, rest) = (p, s, after);
    } else if let Some(after) = rest.strip_prefix("SYSTEM") {
        let (s, after) = quoted(after);
        (system, rest) = (s, after);
    }

    let rest = rest.trim();
    let text = match (rest.find('['), rest.rfind(']')) {
        (Some(open), Some(close)) if open < close => &rest[open + 1..close],
        _ => "",
    };
    DtContent { name: name.into(), public: public.into(), system: system.into(), text: text.into() }
}

/// Next quoted literal of `s` and the text after it.
fn quoted(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    let Some(quote) = s.chars().next().filter(|c| *c == '"' || *c == '\'') else {
        return ("", s);
    };
    let body = &s[1..];
    match body.find(quote) {
        Some(end) => (&body[..end], &body[end + 1..]),
        None => (body, ""),
    }
}

// ============================================================================
// Tests
// ============================================================================
