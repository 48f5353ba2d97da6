//! Grammar model (EXI 1.0 §8.1 - §8.4).
//!
//! A [`Grammar`] is an ordered list of [`GrammarRule`]s, one per non-terminal.
//! Each rule maps event codes of 1-3 parts to productions and stores the bit
//! width of every code part in `bits`. Widths are always derived from the
//! codes themselves (`bits_number(max part value)`), so a rule is consistent
//! after every insertion.
//!
//! Built-in grammars (document, fragment, element) are created here; schema
//! grammars come from [`proto_grammar`](crate::proto_grammar).

use core::fmt;

use crate::bit_width::bits_number;
use crate::bitstream::BitReader;
use crate::event_code::{self, EventCode};
use crate::qname::QNameId;
use crate::value::ValueType;
use crate::{Error, Result};

pub type NonTermId = u16;

// ============================================================================
// Non-terminals
// ============================================================================

/// No right-hand side (EE, ED).
pub const VOID: NonTermId = 0;
pub const DOCUMENT: NonTermId = 1;
pub const DOC_CONTENT: NonTermId = 2;
pub const DOC_END: NonTermId = 3;
/// First rule of every element grammar; schema grammars number their further
/// rules upwards from here.
pub const START_TAG_CONTENT: NonTermId = 4;
pub const ELEMENT_CONTENT: NonTermId = 5;
pub const FRAGMENT: NonTermId = 6;
pub const FRAGMENT_CONTENT: NonTermId = 7;

/// Index of a schema grammar in [`Schema::grammars`](crate::schema::Schema).
pub type GrammarId = usize;

/// Terminal symbols (EXI 1.0 Table 4-1, wildcard forms split out).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    StartDocument,
    EndDocument,
    StartElementQName,
    StartElementUri,
    StartElementAll,
    EndElement,
    AttributeQName,
    AttributeUri,
    AttributeAll,
    Characters,
    NamespaceDeclaration,
    Comment,
    ProcessingInstruction,
    DocType,
    EntityReference,
    SelfContained,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StartDocument => "SD",
            Self::EndDocument => "ED",
            Self::StartElementQName => "SE(qname)",
            Self::StartElementUri => "SE(uri:*)",
            Self::StartElementAll => "SE(*)",
            Self::EndElement => "EE",
            Self::AttributeQName => "AT(qname)",
            Self::AttributeUri => "AT(uri:*)",
            Self::AttributeAll => "AT(*)",
            Self::Characters => "CH",
            Self::NamespaceDeclaration => "NS",
            Self::Comment => "CM",
            Self::ProcessingInstruction => "PI",
            Self::DocType => "DT",
            Self::EntityReference => "ER",
            Self::SelfContained => "SC",
        })
    }
}

/// One production: `LeftHandSide : event RightHandSide` with its code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Production {
    pub code: EventCode,
    pub event_type: EventType,
    pub value_type: ValueType,
    pub rhs: NonTermId,
    /// For SE(qname) and AT(qname).
    pub qname: Option<QNameId>,
    /// For SE(uri:*) and AT(uri:*).
    pub uri: Option<u32>,
    /// For schema SE(qname): the grammar of the element's type.
    pub grammar: Option<GrammarId>,
}

impl Production {
    pub fn new(code: EventCode, event_type: EventType, rhs: NonTermId) -> Self {
        let value_type = match event_type {
            EventType::Characters | EventType::AttributeQName | EventType::AttributeUri | EventType::AttributeAll => {
                ValueType::String
            }
            _ => ValueType::None,
        };
        Self { code, event_type, value_type, rhs, qname: None, uri: None, grammar: None }
    }

    pub fn with_qname(mut self, qname: QNameId) -> Self {
        self.qname = Some(qname);
        self
    }

    pub fn with_value_type(mut self, vt: ValueType) -> Self {
        self.value_type = vt;
        self
    }

    /// Same terminal (event, name, value type), ignoring code and rhs.
    pub fn same_terminal(&self, other: &Production) -> bool {
        self.event_type == other.event_type
            && self.qname == other.qname
            && self.uri == other.uri
            && self.value_type == other.value_type
    }
}

impl fmt::Display for Production {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.event_type)?;
        if let Some(q) = self.qname {
            write!(f, "[{q}]")?;
        }
        write!(f, " -> {} ({})", self.rhs, self.code)
    }
}

/// All productions of one non-terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarRule {
    pub non_term_id: NonTermId,
    pub productions: Vec<Production>,
    pub bits: [u8; 3],
}

impl GrammarRule {
    pub fn new(non_term_id: NonTermId, productions: Vec<Production>) -> Self {
        let mut rule = Self { non_term_id, productions, bits: [0; 3] };
        rule.recompute_bits();
        rule
    }

    /// `bits[b] = bits_number(max code part b)`, 0 where no code has part b.
    pub fn recompute_bits(&mut self) {
        let mut max = [0u32; 3];
        for p in &self.productions {
            for (b, &part) in p.code.parts().iter().enumerate() {
                max[b] = max[b].max(part);
            }
        }
        self.bits = max.map(|m| bits_number(u64::from(m)));
    }

    /// Inserts `production` with code `0` and shifts the first code part of
    /// every other production by one (EXI 1.0 §8.4.3).
    pub fn insert_zero_production(&mut self, mut production: Production) {
        for p in &mut self.productions {
            p.code = p.code.with_first_incremented();
        }
        production.code = EventCode::one(0);
        self.productions.insert(0, production);
        self.recompute_bits();
    }

    /// A production with a 1-part code for the same event and name exists.
    pub fn has_one_part(&self, event_type: EventType, qname: Option<QNameId>) -> bool {
        self.productions
            .iter()
            .any(|p| p.code.len() == 1 && p.event_type == event_type && p.qname == qname)
    }

    /// Reads an event code and returns the index of the matching production.
    ///
    /// Candidates are narrowed part by part; parts with 0 bits read nothing
    /// and stand for the value 0.
    pub fn decode_production(&self, reader: &mut BitReader, byte_aligned: bool) -> Result<usize> {
        let mut candidates: Vec<usize> = (0..self.productions.len()).collect();
        let mut read = Vec::with_capacity(3);
        for b in 0..3 {
            let value = event_code::read_part(reader, self.bits[b], byte_aligned)?;
            read.push(value);
            candidates.retain(|&i| self.productions[i].code.part(b) == Some(value));
            if let Some(&hit) = candidates.iter().find(|&&i| self.productions[i].code.len() == b + 1) {
                log::trace!("nt {} matched {}", self.non_term_id, self.productions[hit]);
                return Ok(hit);
            }
            if candidates.is_empty() {
                break;
            }
        }
        let code = read.iter().map(u32::to_string).collect::<Vec<_>>().join(".");
        Err(Error::InvalidEventCode { code, non_terminal: self.non_term_id })
    }
}

/// What a grammar is used for; decides learning and stack handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrammarKind {
    Document,
    Fragment,
    /// Built-in element grammar, mutable through learning.
    BuiltInElement,
    /// Schema-informed element grammar, immutable.
    Schema,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grammar {
    pub kind: GrammarKind,
    pub rules: Vec<GrammarRule>,
}

impl Grammar {
    pub fn rule(&self, nt: NonTermId) -> Option<&GrammarRule> {
        self.rules.iter().find(|r| r.non_term_id == nt)
    }

    pub fn rule_mut(&mut self, nt: NonTermId) -> Option<&mut GrammarRule> {
        self.rules.iter_mut().find(|r| r.non_term_id == nt)
    }

    /// Productions of `nt`, empty for an unknown non-terminal.
    pub fn productions_of(&self, nt: NonTermId) -> &[Production] {
        self.rule(nt).map_or(&[], |r| r.productions.as_slice())
    }

    pub fn is_document(&self) -> bool {
        matches!(self.kind, GrammarKind::Document | GrammarKind::Fragment)
    }
}

// ============================================================================
// Built-in grammars
// ============================================================================

/// A global element known to the document or fragment grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalElement {
    pub qname: QNameId,
    pub grammar: GrammarId,
}

fn se_qname(code: EventCode, elem: &GlobalElement, rhs: NonTermId) -> Production {
    let mut p = Production::new(code, EventType::StartElementQName, rhs).with_qname(elem.qname);
    p.grammar = Some(elem.grammar);
    p
}

/// Document grammar (EXI 1.0 §8.4.1, §8.5.1).
///
/// `preserve` adds DT, CM and PI productions.
pub fn document_grammar(global_elements: &[GlobalElement], preserve: bool) -> Grammar {
    let n = global_elements.len() as u32;

    let document = GrammarRule::new(
        DOCUMENT,
        vec![Production::new(EventCode::one(0), EventType::StartDocument, DOC_CONTENT)],
    );

    let mut content: Vec<Production> = global_elements
        .iter()
        .enumerate()
        .map(|(i, e)| se_qname(EventCode::one(i as u32), e, DOC_END))
        .collect();
    content.push(Production::new(EventCode::one(n), EventType::StartElementAll, DOC_END));
    if preserve {
        content.push(Production::new(EventCode::two(n + 1, 0), EventType::DocType, DOC_CONTENT));
        content.push(Production::new(EventCode::three(n + 1, 1, 0), EventType::Comment, DOC_CONTENT));
        content.push(Production::new(EventCode::three(n + 1, 1, 1), EventType::ProcessingInstruction, DOC_CONTENT));
    }

    let mut end = vec![Production::new(EventCode::one(0), EventType::EndDocument, VOID)];
    if preserve {
        end.push(Production::new(EventCode::two(1, 0), EventType::Comment, DOC_END));
        end.push(Production::new(EventCode::two(1, 1), EventType::ProcessingInstruction, DOC_END));
    }

    Grammar {
        kind: GrammarKind::Document,
        rules: vec![document, GrammarRule::new(DOC_CONTENT, content), GrammarRule::new(DOC_END, end)],
    }
}

/// Fragment grammar (EXI 1.0 §8.4.2, §8.5.2).
pub fn fragment_grammar(fragment_elements: &[GlobalElement], preserve: bool) -> Grammar {
    let n = fragment_elements.len() as u32;

    let fragment = GrammarRule::new(
        FRAGMENT,
        vec![Production::new(EventCode::one(0), EventType::StartDocument, FRAGMENT_CONTENT)],
    );

    let mut content: Vec<Production> = fragment_elements
        .iter()
        .enumerate()
        .map(|(i, e)| se_qname(EventCode::one(i as u32), e, FRAGMENT_CONTENT))
        .collect();
    content.push(Production::new(EventCode::one(n), EventType::StartElementAll, FRAGMENT_CONTENT));
    content.push(Production::new(EventCode::one(n + 1), EventType::EndDocument, VOID));
    if preserve {
        content.push(Production::new(EventCode::two(n + 2, 0), EventType::Comment, FRAGMENT_CONTENT));
        content.push(Production::new(EventCode::two(n + 2, 1), EventType::ProcessingInstruction, FRAGMENT_CONTENT));
    }

    Grammar { kind: GrammarKind::Fragment, rules: vec![fragment, GrammarRule::new(FRAGMENT_CONTENT, content)] }
}

/// Built-in element grammar (EXI 1.0 §8.4.3).
///
/// `non_default` (any preserve option or selfContained) adds NS, SC, ER, CM
/// and PI productions.
pub fn built_in_element_grammar(non_default: bool) -> Grammar {
    use EventType::*;

    let start_tag = if non_default {
        vec![
            Production::new(EventCode::two(0, 0), EndElement, VOID),
            Production::new(EventCode::two(0, 1), AttributeAll, START_TAG_CONTENT),
            Production::new(EventCode::two(0, 2), NamespaceDeclaration, START_TAG_CONTENT),
            Production::new(EventCode::two(0, 3), SelfContained, FRAGMENT),
            Production::new(EventCode::two(0, 4), StartElementAll, ELEMENT_CONTENT),
            Production::new(EventCode::two(0, 5), Characters, ELEMENT_CONTENT),
            Production::new(EventCode::two(0, 6), EntityReference, ELEMENT_CONTENT),
            Production::new(EventCode::three(0, 7, 0), Comment, ELEMENT_CONTENT),
            Production::new(EventCode::three(0, 7, 1), ProcessingInstruction, ELEMENT_CONTENT),
        ]
    } else {
        vec![
            Production::new(EventCode::two(0, 0), EndElement, VOID),
            Production::new(EventCode::two(0, 1), AttributeAll, START_TAG_CONTENT),
            Production::new(EventCode::two(0, 2), StartElementAll, ELEMENT_CONTENT),
            Production::new(EventCode::two(0, 3), Characters, ELEMENT_CONTENT),
        ]
    };

    let mut element_content = vec![
        Production::new(EventCode::one(0), EndElement, VOID),
        Production::new(EventCode::two(1, 0), StartElementAll, ELEMENT_CONTENT),
        Production::new(EventCode::two(1, 1), Characters, ELEMENT_CONTENT),
    ];
    if non_default {
        element_content.push(Production::new(EventCode::two(1, 2), EntityReference, ELEMENT_CONTENT));
        element_content.push(Production::new(EventCode::three(1, 3, 0), Comment, ELEMENT_CONTENT));
        element_content.push(Production::new(EventCode::three(1, 3, 1), ProcessingInstruction, ELEMENT_CONTENT));
    }

    Grammar {
        kind: GrammarKind::BuiltInElement,
        rules: vec![
            GrammarRule::new(START_TAG_CONTENT, start_tag),
            GrammarRule::new(ELEMENT_CONTENT, element_content),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::BitWriter;

    fn codes(rule: &GrammarRule) -> Vec<String> {
        rule.productions.iter().map(|p| format!("{} {}", p.event_type, p.code)).collect()
    }

    #[test]
    fn default_element_grammar_shape() {
        let g = built_in_element_grammar(false);
        let stc = g.rule(START_TAG_CONTENT).unwrap();
        assert_eq!(stc.bits, [0, 2, 0]);
        assert_eq!(codes(stc), ["EE 0.0", "AT(*) 0.1", "SE(*) 0.2", "CH 0.3"]);
        let ec = g.rule(ELEMENT_CONTENT).unwrap();
        assert_eq!(ec.bits, [1, 1, 0]);
        assert_eq!(codes(ec), ["EE 0", "SE(*) 1.0", "CH 1.1"]);
    }

    #[test]
    fn non_default_element_grammar_shape() {
        let g = built_in_element_grammar(true);
        let stc = g.rule(START_TAG_CONTENT).unwrap();
        assert_eq!(stc.productions.len(), 9);
        assert_eq!(stc.bits, [0, 3, 1]);
        let ec = g.rule(ELEMENT_CONTENT).unwrap();
        assert_eq!(ec.bits, [1, 2, 1]);
        assert_eq!(codes(ec).last().map(String::as_str), Some("PI 1.3.1"));
    }

    #[test]
    fn document_grammar_widths() {
        let g = document_grammar(&[], false);
        assert_eq!(g.rule(DOC_CONTENT).unwrap().bits, [0, 0, 0]);
        assert_eq!(g.rule(DOC_END).unwrap().bits, [0, 0, 0]);

        let elems = [
            GlobalElement { qname: QNameId::new(4, 0), grammar: 0 },
            GlobalElement { qname: QNameId::new(4, 1), grammar: 1 },
        ];
        let g = document_grammar(&elems, true);
        let dc = g.rule(DOC_CONTENT).unwrap();
        assert_eq!(codes(dc), ["SE(qname) 0", "SE(qname) 1", "SE(*) 2", "DT 3.0", "CM 3.1.0", "PI 3.1.1"]);
        assert_eq!(dc.bits, [2, 1, 1]);
        assert_eq!(g.rule(DOC_END).unwrap().bits, [1, 1, 0]);
    }

    #[test]
    fn insert_zero_production_shifts_codes() {
        let mut g = built_in_element_grammar(false);
        let stc = g.rule_mut(START_TAG_CONTENT).unwrap();
        stc.insert_zero_production(
            Production::new(EventCode::one(0), EventType::AttributeQName, START_TAG_CONTENT)
                .with_qname(QNameId::new(0, 0)),
        );
        assert_eq!(codes(stc), ["AT(qname) 0", "EE 1.0", "AT(*) 1.1", "SE(*) 1.2", "CH 1.3"]);
        assert_eq!(stc.bits, [1, 2, 0]);
        assert!(stc.has_one_part(EventType::AttributeQName, Some(QNameId::new(0, 0))));
        assert!(!stc.has_one_part(EventType::EndElement, None));
    }

    #[test]
    fn decode_narrows_part_by_part() {
        let g = built_in_element_grammar(true);
        let ec = g.rule(ELEMENT_CONTENT).unwrap();
        let mut w = BitWriter::new();
        // PI 1.3.1 mit bits [1, 2, 1]
        w.write_bits(0b1_11_1, 4);
        // EE 0
        w.write_bits(0, 1);
        let data = w.into_vec();
        let mut r = BitReader::new(&data);
        let pi = ec.decode_production(&mut r, false).unwrap();
        assert_eq!(ec.productions[pi].event_type, EventType::ProcessingInstruction);
        let ee = ec.decode_production(&mut r, false).unwrap();
        assert_eq!(ec.productions[ee].event_type, EventType::EndElement);
    }

    #[test]
    fn unknown_code_is_invalid_event_code() {
        let elems = [
            GlobalElement { qname: QNameId::new(4, 0), grammar: 0 },
            GlobalElement { qname: QNameId::new(4, 1), grammar: 1 },
        ];
        let g = document_grammar(&elems, false);
        // SE(q0) 0, SE(q1) 1, SE(*) 2 mit 2 Bit: Code 3 ist unbelegt
        let dc = g.rule(DOC_CONTENT).unwrap();
        let mut w = BitWriter::new();
        w.write_bits(0b11, 2);
        let data = w.into_vec();
        let err = dc.decode_production(&mut BitReader::new(&data), false).unwrap_err();
        assert_eq!(err, Error::InvalidEventCode { code: "3".into(), non_terminal: DOC_CONTENT });
    }
}
