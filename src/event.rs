//! Event model (EXI 1.0 §4, Table 4-1) and the content-handler interface.
//!
//! Two ways to consume a decoded stream:
//! - push: implement [`ContentHandler`] and pass it to
//!   [`decoder::decode_with_handler`](crate::decoder::decode_with_handler);
//! - pull a list: [`decoder::decode`](crate::decoder::decode) collects
//!   [`ExiEvent`]s through [`EventCollector`].

use std::rc::Rc;

use crate::binary::BinaryKind;
use crate::datetime::DateTime;
use crate::decimal::Decimal;
use crate::float::Float;
use crate::qname::QName;
use crate::value::Value;
use crate::Error;

/// NS: binds a prefix to a URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsContent {
    pub uri: Rc<str>,
    /// Empty for the default namespace.
    pub prefix: Rc<str>,
    /// The declaration names the namespace of the enclosing element.
    pub local_element_ns: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtContent {
    pub qname: Rc<QName>,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiContent {
    pub target: Rc<str>,
    pub data: Rc<str>,
}

/// DT: name, public id, system id, internal subset (each possibly empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtContent {
    pub name: Rc<str>,
    pub public: Rc<str>,
    pub system: Rc<str>,
    pub text: Rc<str>,
}

/// One EXI event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExiEvent {
    StartDocument,
    EndDocument,
    StartElement(Rc<QName>),
    EndElement,
    Attribute(AtContent),
    Characters(Value),
    NamespaceDeclaration(NsContent),
    Comment(Rc<str>),
    ProcessingInstruction(PiContent),
    DocType(DtContent),
    EntityReference(Rc<str>),
    /// SC: the element just started is self-contained.
    SelfContained,
}

impl ExiEvent {
    /// Shorthand for an element without namespace.
    pub fn start(local_name: &str) -> Self {
        ExiEvent::StartElement(Rc::new(QName::new("", local_name)))
    }

    /// Shorthand for untyped character data.
    pub fn text(value: &str) -> Self {
        ExiEvent::Characters(Value::from(value))
    }

    /// Shorthand for an untyped attribute without namespace.
    pub fn attribute(local_name: &str, value: &str) -> Self {
        ExiEvent::Attribute(AtContent { qname: Rc::new(QName::new("", local_name)), value: Value::from(value) })
    }
}

/// Returned by every handler callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerControl {
    #[default]
    Continue,
    /// Ends decoding early; reported as
    /// [`DecodeOutcome::Stopped`](crate::decoder::DecodeOutcome::Stopped).
    Stop,
}

/// Receives decoded events.
///
/// An attribute is reported as `attribute(qname)` followed by exactly one
/// value callback. Typed value callbacks forward their lexical form to
/// [`string_data`](Self::string_data) unless overridden.
pub trait ContentHandler {
    fn start_document(&mut self) -> HandlerControl {
        HandlerControl::Continue
    }

    fn end_document(&mut self) -> HandlerControl {
        HandlerControl::Continue
    }

    fn start_element(&mut self, _qname: &QName) -> HandlerControl {
        HandlerControl::Continue
    }

    fn end_element(&mut self) -> HandlerControl {
        HandlerControl::Continue
    }

    fn attribute(&mut self, _qname: &QName) -> HandlerControl {
        HandlerControl::Continue
    }

    fn string_data(&mut self, _value: &str) -> HandlerControl {
        HandlerControl::Continue
    }

    fn int_data(&mut self, value: i64) -> HandlerControl {
        self.string_data(&value.to_string())
    }

    fn unsigned_int_data(&mut self, value: u64) -> HandlerControl {
        self.string_data(&value.to_string())
    }

    fn float_data(&mut self, value: Float) -> HandlerControl {
        self.string_data(&value.to_string())
    }

    fn boolean_data(&mut self, value: bool) -> HandlerControl {
        self.string_data(if value { "true" } else { "false" })
    }

    fn decimal_data(&mut self, value: Decimal) -> HandlerControl {
        self.string_data(&value.to_string())
    }

    fn binary_data(&mut self, kind: BinaryKind, value: &[u8]) -> HandlerControl {
        self.string_data(&kind.to_lexical(value))
    }

    fn date_time_data(&mut self, value: &DateTime) -> HandlerControl {
        self.string_data(&value.to_string())
    }

    fn namespace_declaration(&mut self, _uri: &str, _prefix: &str, _local_element_ns: bool) -> HandlerControl {
        HandlerControl::Continue
    }

    fn self_contained(&mut self) -> HandlerControl {
        HandlerControl::Continue
    }

    fn comment(&mut self, _text: &str) -> HandlerControl {
        HandlerControl::Continue
    }

    fn processing_instruction(&mut self, _target: &str, _data: &str) -> HandlerControl {
        HandlerControl::Continue
    }

    fn doc_type(&mut self, _name: &str, _public: &str, _system: &str, _text: &str) -> HandlerControl {
        HandlerControl::Continue
    }

    fn entity_reference(&mut self, _name: &str) -> HandlerControl {
        HandlerControl::Continue
    }

    /// Called once before a decode error is returned.
    fn fatal_error(&mut self, _error: &Error) {}
}

/// Routes a value to the matching typed callback.
pub fn dispatch_value<H: ContentHandler + ?Sized>(handler: &mut H, value: &Value) -> HandlerControl {
    match value {
        Value::String(s) => handler.string_data(s),
        Value::Integer(v) => handler.int_data(*v),
        Value::UnsignedInteger(v) => handler.unsigned_int_data(*v),
        Value::Float(v) => handler.float_data(*v),
        Value::Decimal(v) => handler.decimal_data(*v),
        Value::Boolean(v) => handler.boolean_data(*v),
        Value::Binary(kind, v) => handler.binary_data(*kind, v),
        Value::DateTime(v) => handler.date_time_data(v),
    }
}

/// Builds an [`ExiEvent`] list from handler callbacks.
#[derive(Debug, Default)]
pub struct EventCollector {
    pub events: Vec<ExiEvent>,
    pending_attribute: Option<Rc<QName>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_events(self) -> Vec<ExiEvent> {
        self.events
    }

    fn value(&mut self, value: Value) -> HandlerControl {
        match self.pending_attribute.take() {
            Some(qname) => self.events.push(ExiEvent::Attribute(AtContent { qname, value })),
            None => self.events.push(ExiEvent::Characters(value)),
        }
        HandlerControl::Continue
    }

    fn push(&mut self, event: ExiEvent) -> HandlerControl {
        self.events.push(event);
        HandlerControl::Continue
    }
}

impl ContentHandler for EventCollector {
    fn start_document(&mut self) -> HandlerControl {
        self.push(ExiEvent::StartDocument)
    }

    fn end_document(&mut self) -> HandlerControl {
        self.push(ExiEvent::EndDocument)
    }

    fn start_element(&mut self, qname: &QName) -> HandlerControl {
        self.push(ExiEvent::StartElement(Rc::new(qname.clone())))
    }

    fn end_element(&mut self) -> HandlerControl {
        self.push(ExiEvent::EndElement)
    }

    fn attribute(&mut self, qname: &QName) -> HandlerControl {
        self.pending_attribute = Some(Rc::new(qname.clone()));
        HandlerControl::Continue
    }

    fn string_data(&mut self, value: &str) -> HandlerControl {
        self.value(Value::from(value))
    }

    fn int_data(&mut self, value: i64) -> HandlerControl {
        self.value(Value::Integer(value))
    }

    fn unsigned_int_data(&mut self, value: u64) -> HandlerControl {
        self.value(Value::UnsignedInteger(value))
    }

    fn float_data(&mut self, value: Float) -> HandlerControl {
        self.value(Value::Float(value))
    }

    fn boolean_data(&mut self, value: bool) -> HandlerControl {
        self.value(Value::Boolean(value))
    }

    fn decimal_data(&mut self, value: Decimal) -> HandlerControl {
        self.value(Value::Decimal(value))
    }

    fn binary_data(&mut self, kind: BinaryKind, value: &[u8]) -> HandlerControl {
        self.value(Value::Binary(kind, value.into()))
    }

    fn date_time_data(&mut self, value: &DateTime) -> HandlerControl {
        self.value(Value::DateTime(*value))
    }

    fn namespace_declaration(&mut self, uri: &str, prefix: &str, local_element_ns: bool) -> HandlerControl {
        // Der Prefix des Elements steht erst in dessen lokalem NS fest
        if local_element_ns {
            let last_start = self.events.iter_mut().rev().find_map(|e| match e {
                ExiEvent::StartElement(q) => Some(q),
                _ => None,
            });
            if let Some(qname) = last_start {
                *qname = Rc::new(QName::with_prefix(qname.uri.clone(), qname.local_name.clone(), prefix));
            }
        }
        self.push(ExiEvent::NamespaceDeclaration(NsContent {
            uri: uri.into(),
            prefix: prefix.into(),
            local_element_ns,
        }))
    }

    fn self_contained(&mut self) -> HandlerControl {
        self.push(ExiEvent::SelfContained)
    }

    fn comment(&mut self, text: &str) -> HandlerControl {
        self.push(ExiEvent::Comment(text.into()))
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> HandlerControl {
        self.push(ExiEvent::ProcessingInstruction(PiContent { target: target.into(), data: data.into() }))
    }

    fn doc_type(&mut self, name: &str, public: &str, system: &str, text: &str) -> HandlerControl {
        self.push(ExiEvent::DocType(DtContent {
            name: name.into(),
            public: public.into(),
            system: system.into(),
            text: text.into(),
        }))
    }

    fn entity_reference(&mut self, name: &str) -> HandlerControl {
        self.push(ExiEvent::EntityReference(name.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Zählt nur string_data-Aufrufe; alle typisierten Werte landen dort.
    #[derive(Default)]
    struct Lexical(Vec<String>);

    impl ContentHandler for Lexical {
        fn string_data(&mut self, value: &str) -> HandlerControl {
            self.0.push(value.to_owned());
            HandlerControl::Continue
        }
    }

    #[test]
    fn typed_callbacks_default_to_lexical_form() {
        let mut h = Lexical::default();
        dispatch_value(&mut h, &Value::Integer(-5));
        dispatch_value(&mut h, &Value::Boolean(true));
        dispatch_value(&mut h, &Value::Float(Float::Value { mantissa: 15, exponent: -1 }));
        dispatch_value(&mut h, &Value::Binary(BinaryKind::Base64, Rc::from(&b"Man"[..])));
        dispatch_value(&mut h, &Value::Binary(BinaryKind::Hex, Rc::from(&b"Man"[..])));
        assert_eq!(h.0, ["-5", "true", "15E-1", "TWFu", "4D616E"]);
    }

    #[test]
    fn collector_pairs_attribute_with_value() {
        let mut c = EventCollector::new();
        c.start_element(&QName::new("", "a"));
        c.attribute(&QName::new("", "id"));
        c.int_data(7);
        c.string_data("text");
        c.end_element();
        assert_eq!(
            c.into_events(),
            vec![
                ExiEvent::start("a"),
                ExiEvent::Attribute(AtContent { qname: Rc::new(QName::new("", "id")), value: Value::Integer(7) }),
                ExiEvent::text("text"),
                ExiEvent::EndElement,
            ]
        );
    }

    #[test]
    fn handler_control_defaults_to_continue() {
        assert_eq!(HandlerControl::default(), HandlerControl::Continue);
    }

    #[test]
    fn local_element_ns_sets_element_prefix() {
        let mut c = EventCollector::new();
        c.start_element(&QName::new("urn:x", "root"));
        c.namespace_declaration("urn:y", "y", false);
        c.namespace_declaration("urn:x", "x", true);
        let events = c.into_events();
        let ExiEvent::StartElement(q) = &events[0] else { panic!("{events:?}") };
        assert_eq!(q.prefix.as_deref(), Some("x"));
        assert_eq!(&*q.local_name, "root");
    }
}
