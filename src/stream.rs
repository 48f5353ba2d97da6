//! Grammar-stack runtime (EXI 1.0 §6, §8.4).
//!
//! [`ExiStream`] hält den kompletten Zustand einer EXI-Session: String
//! Tables, Grammar-Stack, Grammar-Pool und die Fortschrittsinformation der
//! Document Grammar. Encoder und Decoder teilen sich dieselbe Logik für
//! Learning, Grammar-Auflösung und Self-Contained-Elemente; sie unterscheiden
//! sich nur darin, ob Event Codes und Inhalte gelesen oder geschrieben werden.
//!
//! Der Bit-Cursor gehört nicht zum Stream, sondern wird pro Aufruf übergeben.
//! So kann der Header-Codec einen verschachtelten Stream auf demselben
//! Reader/Writer laufen lassen.
//!
//! # Learning (EXI 1.0 §8.4.3)
//!
//! Nur Built-in Element Grammars (Pool-Einträge) lernen:
//!
//! - EE in StartTagContent mit mehrteiligem Code → `EE` mit Code 0
//! - CH in StartTagContent mit mehrteiligem Code → `CH ElementContent` mit Code 0
//! - SE(*) → `SE(qname)` mit der rechten Seite von SE(*)
//! - AT(*) → `AT(qname)` mit der rechten Seite von AT(*)
//!
//! Existiert die Production bereits mit einteiligem Code, wird nichts
//! eingefügt. Schema Grammars sind unveränderlich.

use std::mem;
use std::rc::Rc;

use crate::bitstream::{BitReader, BitWriter};
use crate::event::{AtContent, ContentHandler, DtContent, ExiEvent, HandlerControl, NsContent, PiContent, dispatch_value};
use crate::event_code::{self, EventCode};
use crate::grammar::{
    self, DOCUMENT, EventType, FRAGMENT, FRAGMENT_CONTENT, Grammar, GrammarId, GrammarKind, GrammarRule, NonTermId,
    Production, START_TAG_CONTENT, VOID,
};
use crate::options::ExiOptions;
use crate::qname::{QName, QNameId};
use crate::schema::Schema;
use crate::string_table::StringTables;
use crate::undeclared;
use crate::value::{self, Value, ValueType};
use crate::{Error, FastIndexMap, Result, boolean, string};

// ============================================================================
// GrammarPool
// ============================================================================

/// Built-in element grammars of one session, one per element QName.
#[derive(Debug, Clone, Default)]
pub struct GrammarPool {
    grammars: FastIndexMap<QNameId, Grammar>,
}

impl GrammarPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.grammars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grammars.is_empty()
    }

    pub fn contains(&self, qname: QNameId) -> bool {
        self.grammars.contains_key(&qname)
    }

    pub fn get(&self, qname: QNameId) -> Option<&Grammar> {
        self.grammars.get(&qname)
    }

    fn get_mut(&mut self, qname: QNameId) -> Option<&mut Grammar> {
        self.grammars.get_mut(&qname)
    }

    fn insert(&mut self, qname: QNameId, grammar: Grammar) {
        log::debug!("pool: built-in grammar for {qname}");
        self.grammars.insert(qname, grammar);
    }

    /// Grammars in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (QNameId, &Grammar)> {
        self.grammars.iter().map(|(q, g)| (*q, g))
    }
}

// ============================================================================
// Stack
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GrammarRef {
    /// Document oder Fragment Grammar des Streams.
    Document,
    /// Fragment Grammar des n-ten Self-Contained-Bereichs.
    SelfContained(usize),
    Schema(GrammarId),
    Pool(QNameId),
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    grammar: GrammarRef,
    /// Current non-terminal. While a child element is open this holds the
    /// right-hand side to continue with after its EE.
    non_term: NonTermId,
    /// Element of this frame; `None` for document and fragment frames.
    element: Option<QNameId>,
}

/// Gesicherter äußerer Zustand eines SC-Elements (EXI 1.0 §8.5.4.4.1).
#[derive(Debug)]
struct ScScope {
    tables: StringTables,
    pool: GrammarPool,
    fragment: Grammar,
    /// SD und SE des Fragments sind schon verarbeitet.
    started: bool,
}

/// Result of one decoding step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// The handler returned [`HandlerControl::Stop`].
    Stopped,
    /// ED was processed.
    Finished,
}

impl From<HandlerControl> for Step {
    fn from(control: HandlerControl) -> Self {
        match control {
            HandlerControl::Continue => Step::Continue,
            HandlerControl::Stop => Step::Stopped,
        }
    }
}

// ============================================================================
// ExiStream
// ============================================================================

/// State of one EXI body.
#[derive(Debug)]
pub struct ExiStream {
    options: ExiOptions,
    schema: Option<Rc<Schema>>,
    tables: StringTables,
    document: Grammar,
    /// Schema-Arena mit Undeclared Productions; leer bei `strict`.
    undeclared: Vec<Grammar>,
    pool: GrammarPool,
    stack: Vec<Frame>,
    sc_scopes: Vec<ScScope>,
    byte_aligned: bool,
    finished: bool,
}

impl ExiStream {
    /// Creates the body state for `options`, optionally schema-informed.
    pub fn new(options: ExiOptions, schema: Option<Rc<Schema>>) -> Result<Self> {
        options.check_body_supported()?;
        let preserve = options.preserve.any();
        let document = match (&schema, options.fragment) {
            (Some(s), false) => s.document_grammar(preserve),
            (Some(s), true) => s.fragment_grammar(preserve),
            (None, false) => grammar::document_grammar(&[], preserve),
            (None, true) => grammar::fragment_grammar(&[], preserve),
        };
        let undeclared = match &schema {
            Some(s) if !options.strict => undeclared::augment_schema(s, &options)?,
            _ => Vec::new(),
        };
        let start = if options.fragment { FRAGMENT } else { DOCUMENT };
        let mut stream = Self {
            byte_aligned: options.byte_aligned(),
            tables: StringTables::default(),
            options,
            schema,
            document,
            undeclared,
            pool: GrammarPool::new(),
            stack: vec![Frame { grammar: GrammarRef::Document, non_term: start, element: None }],
            sc_scopes: Vec::new(),
            finished: false,
        };
        stream.tables = stream.initial_tables();
        Ok(stream)
    }

    pub fn options(&self) -> &ExiOptions {
        &self.options
    }

    pub fn tables(&self) -> &StringTables {
        &self.tables
    }

    pub fn pool(&self) -> &GrammarPool {
        &self.pool
    }

    /// Number of open elements.
    pub fn depth(&self) -> usize {
        self.stack.iter().filter(|f| f.element.is_some()).count()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn initial_tables(&self) -> StringTables {
        let mut tables = match &self.schema {
            Some(schema) => schema.tables().clone(),
            None => StringTables::new(false),
        };
        tables.set_value_limits(self.options.value_max_length, self.options.value_partition_capacity);
        tables
    }

    // ========================================================================
    // Grammar-Zugriff
    // ========================================================================

    fn top(&self) -> Result<Frame> {
        self.stack.last().copied().ok_or_else(|| Error::inconsistent("grammar stack is empty"))
    }

    fn set_non_term(&mut self, nt: NonTermId) -> Result<()> {
        let frame = self.stack.last_mut().ok_or_else(|| Error::inconsistent("grammar stack is empty"))?;
        frame.non_term = nt;
        Ok(())
    }

    fn grammar(&self, r: GrammarRef) -> Result<&Grammar> {
        match r {
            GrammarRef::Document => Ok(&self.document),
            GrammarRef::SelfContained(i) => self
                .sc_scopes
                .get(i)
                .map(|s| &s.fragment)
                .ok_or_else(|| Error::inconsistent("self-contained scope missing")),
            GrammarRef::Schema(id) => self
                .undeclared
                .get(id)
                .or_else(|| self.schema.as_ref().and_then(|s| s.grammar(id)))
                .ok_or_else(|| Error::inconsistent(format!("schema grammar {id} missing"))),
            GrammarRef::Pool(q) => self.pool.get(q).ok_or_else(|| Error::inconsistent(format!("pool grammar {q} missing"))),
        }
    }

    fn rule(&self, frame: &Frame) -> Result<&GrammarRule> {
        self.grammar(frame.grammar)?
            .rule(frame.non_term)
            .ok_or_else(|| Error::inconsistent(format!("no rule for non-terminal {}", frame.non_term)))
    }

    fn current_element(&self) -> Result<QNameId> {
        self.top()?.element.ok_or_else(|| Error::UnexpectedEvent("content outside of an element".into()))
    }

    /// Grammar for a new element (EXI 1.0 §8.4.3, §8.5.4).
    ///
    /// Reihenfolge: typisierte Referenz der Production, globales Element des
    /// Schemas, Pool; SE(*) legt sonst eine Built-in Grammar an.
    fn resolve_element_grammar(&mut self, prod: &Production, qname: QNameId) -> Result<GrammarRef> {
        if let Some(id) = prod.grammar {
            return Ok(GrammarRef::Schema(id));
        }
        if let Some(id) = self.schema.as_ref().and_then(|s| s.global_element(qname)) {
            return Ok(GrammarRef::Schema(id));
        }
        if self.pool.contains(qname) {
            return Ok(GrammarRef::Pool(qname));
        }
        match prod.event_type {
            EventType::StartElementQName => Err(Error::inconsistent(format!("SE({qname}) without grammar"))),
            _ => {
                self.pool.insert(qname, grammar::built_in_element_grammar(self.options.non_default_grammars()));
                Ok(GrammarRef::Pool(qname))
            }
        }
    }

    // ========================================================================
    // Learning
    // ========================================================================

    /// Applies the learning rules for `prod`, matched at `nt` of the top frame.
    ///
    /// Built-in element grammars im Pool lernen SE, AT, EE und CH; die
    /// schema-lose Fragment Grammar lernt SE(qname) in FragmentContent.
    fn learn(&mut self, prod: &Production, nt: NonTermId, qname: Option<QNameId>) -> Result<()> {
        let owner = match self.top()?.grammar {
            GrammarRef::Pool(owner) => Some(owner),
            GrammarRef::Document if self.learns_fragment_content() && nt == FRAGMENT_CONTENT => None,
            _ => return Ok(()),
        };
        let learned = match prod.event_type {
            EventType::EndElement if nt == START_TAG_CONTENT && prod.code.len() > 1 => {
                Some(Production::new(EventCode::one(0), EventType::EndElement, VOID))
            }
            EventType::Characters if prod.code.len() > 1 => {
                Some(Production::new(EventCode::one(0), EventType::Characters, prod.rhs))
            }
            EventType::StartElementAll => {
                qname.map(|q| Production::new(EventCode::one(0), EventType::StartElementQName, prod.rhs).with_qname(q))
            }
            EventType::AttributeAll => {
                qname.map(|q| Production::new(EventCode::one(0), EventType::AttributeQName, prod.rhs).with_qname(q))
            }
            _ => None,
        };
        let Some(production) = learned else {
            return Ok(());
        };
        let rule = match owner {
            Some(owner) => self
                .pool
                .get_mut(owner)
                .and_then(|g| g.rule_mut(nt))
                .ok_or_else(|| Error::inconsistent(format!("no rule {nt} in pool grammar {owner}")))?,
            None => self
                .document
                .rule_mut(nt)
                .ok_or_else(|| Error::inconsistent(format!("no rule {nt} in fragment grammar")))?,
        };
        if rule.has_one_part(production.event_type, production.qname) {
            return Ok(());
        }
        log::debug!("learned {production} at non-terminal {nt} of {owner:?}");
        rule.insert_zero_production(production);
        Ok(())
    }

    /// Nur die Built-in Fragment Grammar (ohne Schema) ist lernfähig.
    fn learns_fragment_content(&self) -> bool {
        self.schema.is_none() && self.document.kind == GrammarKind::Fragment
    }

    // ========================================================================
    // Gemeinsame Übergänge
    // ========================================================================

    fn start_element(&mut self, prod: &Production, nt: NonTermId, qname: QNameId) -> Result<()> {
        self.learn(prod, nt, Some(qname))?;
        self.set_non_term(prod.rhs)?;
        let grammar = self.resolve_element_grammar(prod, qname)?;
        log::debug!("push {grammar:?} for {qname}");
        self.stack.push(Frame { grammar, non_term: START_TAG_CONTENT, element: Some(qname) });
        Ok(())
    }

    fn end_element(&mut self, prod: &Production, nt: NonTermId) -> Result<()> {
        self.learn(prod, nt, None)?;
        let frame = self.stack.pop().ok_or_else(|| Error::inconsistent("EE on empty grammar stack"))?;
        log::debug!("pop {:?}", frame.grammar);
        if self.stack.is_empty() {
            return Err(Error::inconsistent("EE popped the document grammar"));
        }
        Ok(())
    }

    fn is_self_contained_top(&self) -> bool {
        matches!(self.stack.last(), Some(Frame { grammar: GrammarRef::SelfContained(_), .. }))
    }

    /// SD und das erste SE eines SC-Fragments werden nicht gemeldet.
    fn take_hidden_start(&mut self) -> bool {
        let Some(Frame { grammar: GrammarRef::SelfContained(i), .. }) = self.stack.last().copied() else {
            return false;
        };
        match self.sc_scopes.get_mut(i) {
            Some(scope) if !scope.started => {
                scope.started = true;
                true
            }
            _ => false,
        }
    }

    /// SC: fresh string tables and pool, content continues in a fragment
    /// grammar until its ED.
    fn enter_self_contained(&mut self, prod: &Production) -> Result<()> {
        self.set_non_term(prod.rhs)?;
        let preserve = self.options.preserve.any();
        let fragment = match &self.schema {
            Some(s) => s.fragment_grammar(preserve),
            None => grammar::fragment_grammar(&[], preserve),
        };
        let fresh = self.initial_tables();
        let tables = mem::replace(&mut self.tables, fresh);
        let pool = mem::take(&mut self.pool);
        self.sc_scopes.push(ScScope { tables, pool, fragment, started: false });
        let idx = self.sc_scopes.len() - 1;
        log::debug!("enter self-contained scope {idx}");
        self.stack.push(Frame { grammar: GrammarRef::SelfContained(idx), non_term: FRAGMENT, element: None });
        Ok(())
    }

    /// ED of an SC fragment: restores the outer state and closes the element.
    fn leave_self_contained(&mut self) -> Result<()> {
        self.stack.pop();
        let scope = self.sc_scopes.pop().ok_or_else(|| Error::inconsistent("no self-contained scope"))?;
        self.tables = scope.tables;
        self.pool = scope.pool;
        let element = self.stack.pop().ok_or_else(|| Error::inconsistent("self-contained element frame missing"))?;
        log::debug!("leave self-contained scope for {:?}", element.element);
        if self.stack.is_empty() {
            return Err(Error::inconsistent("self-contained scope popped the document grammar"));
        }
        Ok(())
    }

    fn effective_type(&self, vt: ValueType) -> ValueType {
        if self.options.preserve.lexical_values { ValueType::String } else { vt }
    }

    // ========================================================================
    // Decoding
    // ========================================================================

    /// Reads one event code, applies the production and reports the event.
    pub fn process_next_production<H: ContentHandler + ?Sized>(
        &mut self,
        reader: &mut BitReader,
        handler: &mut H,
    ) -> Result<Step> {
        if self.finished {
            return Ok(Step::Finished);
        }
        let frame = self.top()?;
        let prod = {
            let rule = self.rule(&frame)?;
            let idx = rule.decode_production(reader, self.byte_aligned)?;
            rule.productions[idx].clone()
        };
        let nt = frame.non_term;
        let aligned = self.byte_aligned;

        let control = match prod.event_type {
            EventType::StartDocument => {
                self.set_non_term(prod.rhs)?;
                if self.is_self_contained_top() { HandlerControl::Continue } else { handler.start_document() }
            }
            EventType::EndDocument => {
                if self.is_self_contained_top() {
                    self.leave_self_contained()?;
                    HandlerControl::Continue
                } else {
                    self.finished = true;
                    return Ok(match handler.end_document() {
                        HandlerControl::Stop => Step::Stopped,
                        HandlerControl::Continue => Step::Finished,
                    });
                }
            }
            EventType::StartElementQName | EventType::StartElementUri | EventType::StartElementAll => {
                let qid = self.decode_qname_content(reader, &prod)?;
                let mut qname = self.tables.qname(qid)?;
                if self.options.preserve.prefixes {
                    qname.prefix = self.tables.decode_qname_prefix(reader, qid.uri, aligned)?;
                }
                let hidden = self.take_hidden_start();
                self.start_element(&prod, nt, qid)?;
                if hidden { HandlerControl::Continue } else { handler.start_element(&qname) }
            }
            EventType::EndElement => {
                self.end_element(&prod, nt)?;
                handler.end_element()
            }
            EventType::AttributeQName | EventType::AttributeUri | EventType::AttributeAll => {
                let qid = self.decode_qname_content(reader, &prod)?;
                let mut qname = self.tables.qname(qid)?;
                if self.options.preserve.prefixes {
                    qname.prefix = self.tables.decode_qname_prefix(reader, qid.uri, aligned)?;
                }
                let value = self.decode_value(reader, qid, prod.value_type)?;
                self.learn(&prod, nt, Some(qid))?;
                self.set_non_term(prod.rhs)?;
                match handler.attribute(&qname) {
                    HandlerControl::Stop => HandlerControl::Stop,
                    HandlerControl::Continue => dispatch_value(handler, &value),
                }
            }
            EventType::Characters => {
                let element = self.current_element()?;
                let value = self.decode_value(reader, element, prod.value_type)?;
                self.learn(&prod, nt, None)?;
                self.set_non_term(prod.rhs)?;
                dispatch_value(handler, &value)
            }
            EventType::NamespaceDeclaration => {
                let uri = self.tables.decode_uri(reader, aligned)?;
                let prefix = self.tables.decode_prefix(reader, uri, aligned)?;
                let local = boolean::decode(reader, aligned)?;
                self.set_non_term(prod.rhs)?;
                let uri = self.tables.uri(uri).cloned().ok_or_else(|| Error::inconsistent("NS uri missing"))?;
                handler.namespace_declaration(&uri, &prefix, local)
            }
            EventType::Comment => {
                let text = string::decode(reader)?;
                self.set_non_term(prod.rhs)?;
                handler.comment(&text)
            }
            EventType::ProcessingInstruction => {
                let target = string::decode(reader)?;
                let data = string::decode(reader)?;
                self.set_non_term(prod.rhs)?;
                handler.processing_instruction(&target, &data)
            }
            EventType::DocType => {
                let name = string::decode(reader)?;
                let public = string::decode(reader)?;
                let system = string::decode(reader)?;
                let text = string::decode(reader)?;
                self.set_non_term(prod.rhs)?;
                handler.doc_type(&name, &public, &system, &text)
            }
            EventType::EntityReference => {
                let name = string::decode(reader)?;
                self.set_non_term(prod.rhs)?;
                handler.entity_reference(&name)
            }
            EventType::SelfContained => {
                let control = handler.self_contained();
                reader.align_to_byte();
                self.enter_self_contained(&prod)?;
                control
            }
        };
        Ok(control.into())
    }

    fn decode_qname_content(&mut self, reader: &mut BitReader, prod: &Production) -> Result<QNameId> {
        match prod.event_type {
            EventType::StartElementQName | EventType::AttributeQName => {
                prod.qname.ok_or_else(|| Error::inconsistent("qname production without qname"))
            }
            EventType::StartElementUri | EventType::AttributeUri => {
                let uri = prod.uri.ok_or_else(|| Error::inconsistent("uri production without uri"))?;
                let ln = self.tables.decode_local_name(reader, uri, self.byte_aligned)?;
                Ok(QNameId::new(uri, ln))
            }
            _ => self.tables.decode_qname(reader, self.byte_aligned),
        }
    }

    fn decode_value(&mut self, reader: &mut BitReader, qname: QNameId, vt: ValueType) -> Result<Value> {
        match self.effective_type(vt) {
            ValueType::None | ValueType::String => {
                Ok(Value::String(self.tables.decode_value(reader, qname, self.byte_aligned)?))
            }
            vt => value::decode_typed(reader, vt, self.byte_aligned),
        }
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Writes the event code and content of `event`.
    pub fn encode_event(&mut self, writer: &mut BitWriter, event: &ExiEvent) -> Result<()> {
        if self.finished {
            return Err(Error::UnexpectedEvent(format!("{event:?} after ED")));
        }
        let aligned = self.byte_aligned;
        match event {
            ExiEvent::StartDocument => {
                let (prod, _) = self.emit(writer, by_type(EventType::StartDocument), "SD")?;
                self.set_non_term(prod.rhs)
            }
            ExiEvent::EndDocument => {
                self.emit(writer, by_type(EventType::EndDocument), "ED")?;
                self.finished = true;
                Ok(())
            }
            ExiEvent::StartElement(qname) => self.encode_start_element(writer, qname),
            ExiEvent::EndElement => self.encode_end_element(writer),
            ExiEvent::Attribute(at) => self.encode_attribute(writer, at),
            ExiEvent::Characters(value) => {
                let lexical = self.options.preserve.lexical_values;
                let (prod, nt) = self.emit(writer, |ps| select_characters(ps, value, lexical), "CH")?;
                let element = self.current_element()?;
                self.encode_value(writer, element, prod.value_type, value)?;
                self.learn(&prod, nt, None)?;
                self.set_non_term(prod.rhs)
            }
            ExiEvent::NamespaceDeclaration(NsContent { uri, prefix, local_element_ns }) => {
                let (prod, _) = self.emit(writer, by_type(EventType::NamespaceDeclaration), "NS")?;
                let uri = self.tables.encode_uri(writer, uri, aligned);
                self.tables.encode_prefix(writer, uri, prefix, aligned)?;
                boolean::encode(writer, *local_element_ns, aligned);
                self.set_non_term(prod.rhs)
            }
            ExiEvent::Comment(text) => {
                let (prod, _) = self.emit(writer, by_type(EventType::Comment), "CM")?;
                string::encode(writer, text);
                self.set_non_term(prod.rhs)
            }
            ExiEvent::ProcessingInstruction(PiContent { target, data }) => {
                let (prod, _) = self.emit(writer, by_type(EventType::ProcessingInstruction), "PI")?;
                string::encode(writer, target);
                string::encode(writer, data);
                self.set_non_term(prod.rhs)
            }
            ExiEvent::DocType(DtContent { name, public, system, text }) => {
                let (prod, _) = self.emit(writer, by_type(EventType::DocType), "DT")?;
                for s in [name, public, system, text] {
                    string::encode(writer, s);
                }
                self.set_non_term(prod.rhs)
            }
            ExiEvent::EntityReference(name) => {
                let (prod, _) = self.emit(writer, by_type(EventType::EntityReference), "ER")?;
                string::encode(writer, name);
                self.set_non_term(prod.rhs)
            }
            ExiEvent::SelfContained => self.encode_self_contained(writer),
        }
    }

    /// Selects a production of the current rule and writes its event code.
    fn emit(
        &mut self,
        writer: &mut BitWriter,
        pick: impl Fn(&[Production]) -> Option<usize>,
        what: &str,
    ) -> Result<(Production, NonTermId)> {
        let frame = self.top()?;
        let rule = self.rule(&frame)?;
        let idx = pick(&rule.productions)
            .ok_or_else(|| Error::UnexpectedEvent(format!("{what} at non-terminal {}", frame.non_term)))?;
        let prod = rule.productions[idx].clone();
        event_code::encode(writer, prod.code, &rule.bits, self.byte_aligned);
        log::trace!("nt {} wrote {}", frame.non_term, prod);
        Ok((prod, frame.non_term))
    }

    fn lookup(&self, qname: &QName) -> (Option<u32>, Option<QNameId>) {
        let uri = self.tables.lookup_uri(&qname.uri);
        let qid = uri.and_then(|u| self.tables.lookup_local_name(u, &qname.local_name).map(|ln| QNameId::new(u, ln)));
        (uri, qid)
    }

    fn encode_start_element(&mut self, writer: &mut BitWriter, qname: &QName) -> Result<()> {
        let (uri, qid) = self.lookup(qname);
        let (prod, nt) = self.emit(
            writer,
            |ps| {
                select_named(
                    ps,
                    [EventType::StartElementQName, EventType::StartElementUri, EventType::StartElementAll],
                    qid,
                    uri,
                )
            },
            "SE",
        )?;
        let qid = self.encode_qname_content(writer, &prod, qname)?;
        if self.options.preserve.prefixes {
            self.tables.encode_qname_prefix(writer, qid.uri, qname.prefix.as_deref(), self.byte_aligned);
        }
        self.take_hidden_start();
        self.start_element(&prod, nt, qid)
    }

    fn encode_end_element(&mut self, writer: &mut BitWriter) -> Result<()> {
        let (prod, nt) = self.emit(writer, by_type(EventType::EndElement), "EE")?;
        self.end_element(&prod, nt)?;
        if self.is_self_contained_top() {
            self.emit(writer, by_type(EventType::EndDocument), "ED")?;
            self.leave_self_contained()?;
        }
        Ok(())
    }

    fn encode_attribute(&mut self, writer: &mut BitWriter, at: &AtContent) -> Result<()> {
        let (uri, qid) = self.lookup(&at.qname);
        let (prod, nt) = self.emit(
            writer,
            |ps| {
                select_named(ps, [EventType::AttributeQName, EventType::AttributeUri, EventType::AttributeAll], qid, uri)
            },
            "AT",
        )?;
        let qid = self.encode_qname_content(writer, &prod, &at.qname)?;
        if self.options.preserve.prefixes {
            self.tables.encode_qname_prefix(writer, qid.uri, at.qname.prefix.as_deref(), self.byte_aligned);
        }
        self.encode_value(writer, qid, prod.value_type, &at.value)?;
        self.learn(&prod, nt, Some(qid))?;
        self.set_non_term(prod.rhs)
    }

    fn encode_self_contained(&mut self, writer: &mut BitWriter) -> Result<()> {
        let (prod, _) = self.emit(writer, by_type(EventType::SelfContained), "SC")?;
        let qname = self.tables.qname(self.current_element()?)?;
        writer.align_to_byte();
        self.enter_self_contained(&prod)?;
        let (sd, _) = self.emit(writer, by_type(EventType::StartDocument), "SD")?;
        self.set_non_term(sd.rhs)?;
        self.encode_start_element(writer, &qname)
    }

    fn encode_qname_content(&mut self, writer: &mut BitWriter, prod: &Production, qname: &QName) -> Result<QNameId> {
        match prod.event_type {
            EventType::StartElementQName | EventType::AttributeQName => {
                prod.qname.ok_or_else(|| Error::inconsistent("qname production without qname"))
            }
            EventType::StartElementUri | EventType::AttributeUri => {
                let uri = prod.uri.ok_or_else(|| Error::inconsistent("uri production without uri"))?;
                let ln = self.tables.encode_local_name(writer, uri, &qname.local_name, self.byte_aligned);
                Ok(QNameId::new(uri, ln))
            }
            _ => Ok(self.tables.encode_qname(writer, qname, self.byte_aligned)),
        }
    }

    fn encode_value(&mut self, writer: &mut BitWriter, qname: QNameId, vt: ValueType, value: &Value) -> Result<()> {
        match self.effective_type(vt) {
            ValueType::None | ValueType::String => match value.as_str() {
                Some(s) => self.tables.encode_value(writer, qname, s, self.byte_aligned),
                None => self.tables.encode_value(writer, qname, &value.to_string(), self.byte_aligned),
            },
            vt => value::encode_typed(writer, &value.coerce(vt)?, vt, self.byte_aligned),
        }
    }
}

fn by_type(event_type: EventType) -> impl Fn(&[Production]) -> Option<usize> {
    move |ps| ps.iter().position(|p| p.event_type == event_type)
}

/// Most specific production: `[qname, uri:*, *]` in this order.
fn select_named(ps: &[Production], kinds: [EventType; 3], qname: Option<QNameId>, uri: Option<u32>) -> Option<usize> {
    let [by_qname, by_uri, any] = kinds;
    qname
        .and_then(|q| ps.iter().position(|p| p.event_type == by_qname && p.qname == Some(q)))
        .or_else(|| uri.and_then(|u| ps.iter().position(|p| p.event_type == by_uri && p.uri == Some(u))))
        .or_else(|| ps.iter().position(|p| p.event_type == any))
}

/// CH whose value type accepts `value`, else the first CH.
fn select_characters(ps: &[Production], value: &Value, lexical: bool) -> Option<usize> {
    let mut first = None;
    for (i, p) in ps.iter().enumerate().filter(|(_, p)| p.event_type == EventType::Characters) {
        if lexical || value.coerce(p.value_type).is_ok() {
            return Some(i);
        }
        first.get_or_insert(i);
    }
    first
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventCollector;
    use crate::grammar::ELEMENT_CONTENT;
    use crate::options::Preserve;

    fn encode_all(stream: &mut ExiStream, events: &[ExiEvent]) -> Vec<u8> {
        let mut w = BitWriter::new();
        for e in events {
            stream.encode_event(&mut w, e).unwrap();
        }
        w.into_vec()
    }

    fn decode_all(stream: &mut ExiStream, data: &[u8]) -> Vec<ExiEvent> {
        let mut r = BitReader::new(data);
        let mut c = EventCollector::new();
        while stream.process_next_production(&mut r, &mut c).unwrap() == Step::Continue {}
        c.into_events()
    }

    fn repeated_children() -> Vec<ExiEvent> {
        vec![
            ExiEvent::StartDocument,
            ExiEvent::start("a"),
            ExiEvent::start("b"),
            ExiEvent::EndElement,
            ExiEvent::start("b"),
            ExiEvent::EndElement,
            ExiEvent::start("b"),
            ExiEvent::EndElement,
            ExiEvent::EndElement,
            ExiEvent::EndDocument,
        ]
    }

    #[test]
    fn pool_has_one_grammar_per_qname() {
        let mut s = ExiStream::new(ExiOptions::default(), None).unwrap();
        encode_all(&mut s, &repeated_children());
        assert_eq!(s.pool().len(), 2);
        assert!(s.is_finished());
    }

    #[test]
    fn learning_is_idempotent() {
        let mut s = ExiStream::new(ExiOptions::default(), None).unwrap();
        encode_all(&mut s, &repeated_children());
        let a = s.tables().lookup_qname("", "a").unwrap();
        let b = s.tables().lookup_qname("", "b").unwrap();

        // a: SE(b) einmal in StartTagContent, einmal in ElementContent gelernt
        let ga = s.pool().get(a).unwrap();
        assert_eq!(ga.productions_of(START_TAG_CONTENT).len(), 5);
        assert_eq!(ga.productions_of(ELEMENT_CONTENT).len(), 4);

        // b: EE genau einmal gelernt, obwohl b dreimal leer war
        let gb = s.pool().get(b).unwrap();
        let stc = gb.rule(START_TAG_CONTENT).unwrap();
        assert_eq!(stc.productions.len(), 5);
        assert_eq!(stc.productions[0].event_type, EventType::EndElement);
        assert_eq!(stc.productions[0].code, EventCode::one(0));
        assert_eq!(stc.bits, [1, 2, 0]);
    }

    #[test]
    fn decoder_learns_like_encoder() {
        let events = repeated_children();
        let mut enc = ExiStream::new(ExiOptions::default(), None).unwrap();
        let data = encode_all(&mut enc, &events);
        let mut dec = ExiStream::new(ExiOptions::default(), None).unwrap();
        assert_eq!(decode_all(&mut dec, &data), events);
        assert_eq!(dec.pool().len(), enc.pool().len());
        for ((qe, ge), (qd, gd)) in enc.pool().iter().zip(dec.pool().iter()) {
            assert_eq!(qe, qd);
            assert_eq!(ge, gd);
        }
    }

    #[test]
    fn characters_learned_in_both_content_rules() {
        let events = vec![
            ExiEvent::StartDocument,
            ExiEvent::start("p"),
            ExiEvent::text("x"),
            ExiEvent::start("i"),
            ExiEvent::EndElement,
            ExiEvent::text("y"),
            ExiEvent::EndElement,
            ExiEvent::EndDocument,
        ];
        let mut s = ExiStream::new(ExiOptions::default(), None).unwrap();
        let data = encode_all(&mut s, &events);
        let p = s.tables().lookup_qname("", "p").unwrap();
        let g = s.pool().get(p).unwrap();
        let stc = g.productions_of(START_TAG_CONTENT);
        assert_eq!(stc[0].event_type, EventType::Characters);
        assert_eq!(stc[0].rhs, ELEMENT_CONTENT);
        // ElementContent: CH nach SE(i) gelernt, landet vor SE(i)
        let ec = g.productions_of(ELEMENT_CONTENT);
        assert_eq!(ec.len(), 5);
        assert_eq!(ec[0].event_type, EventType::Characters);
        assert_eq!(ec[0].code, EventCode::one(0));
        assert_eq!(ec[0].rhs, ELEMENT_CONTENT);
        assert_eq!(ec[1].event_type, EventType::StartElementQName);

        let mut d = ExiStream::new(ExiOptions::default(), None).unwrap();
        assert_eq!(decode_all(&mut d, &data), events);
        assert_eq!(d.pool().get(p), Some(g));
    }

    #[test]
    fn characters_after_child_learned_in_element_content() {
        let events = vec![
            ExiEvent::StartDocument,
            ExiEvent::start("p"),
            ExiEvent::start("i"),
            ExiEvent::EndElement,
            ExiEvent::text("y"),
            ExiEvent::EndElement,
            ExiEvent::EndDocument,
        ];
        let mut s = ExiStream::new(ExiOptions::default(), None).unwrap();
        encode_all(&mut s, &events);
        let p = s.tables().lookup_qname("", "p").unwrap();
        let ec = s.pool().get(p).unwrap().rule(ELEMENT_CONTENT).unwrap();
        assert!(ec.has_one_part(EventType::Characters, None));
        assert_eq!(ec.productions[0].event_type, EventType::Characters);
        assert_eq!(ec.productions[0].code, EventCode::one(0));
    }

    #[test]
    fn fragment_content_learns_element_names() {
        let events = vec![
            ExiEvent::StartDocument,
            ExiEvent::start("a"),
            ExiEvent::EndElement,
            ExiEvent::start("b"),
            ExiEvent::EndElement,
            ExiEvent::start("a"),
            ExiEvent::EndElement,
            ExiEvent::EndDocument,
        ];
        let options = ExiOptions::default().with_fragment();
        let mut s = ExiStream::new(options.clone(), None).unwrap();
        let data = encode_all(&mut s, &events);
        let a = s.tables().lookup_qname("", "a").unwrap();
        let b = s.tables().lookup_qname("", "b").unwrap();
        let content = s.document.rule(FRAGMENT_CONTENT).unwrap();
        assert!(content.has_one_part(EventType::StartElementQName, Some(a)));
        assert!(content.has_one_part(EventType::StartElementQName, Some(b)));
        // zuletzt gelerntes SE(b) steht vorne
        assert_eq!(content.productions[0].qname, Some(b));
        assert_eq!(content.productions[0].code, EventCode::one(0));
        assert_eq!(content.productions.len(), 4);

        let mut d = ExiStream::new(options, None).unwrap();
        assert_eq!(decode_all(&mut d, &data), events);
        assert_eq!(d.document, s.document);
    }

    #[test]
    fn attribute_learning() {
        let events = vec![
            ExiEvent::StartDocument,
            ExiEvent::start("r"),
            ExiEvent::attribute("id", "1"),
            ExiEvent::EndElement,
            ExiEvent::EndDocument,
        ];
        let mut s = ExiStream::new(ExiOptions::default(), None).unwrap();
        let data = encode_all(&mut s, &events);
        let r = s.tables().lookup_qname("", "r").unwrap();
        let id = s.tables().lookup_qname("", "id").unwrap();
        let stc = s.pool().get(r).unwrap().rule(START_TAG_CONTENT).unwrap();
        assert!(stc.has_one_part(EventType::AttributeQName, Some(id)));

        let mut d = ExiStream::new(ExiOptions::default(), None).unwrap();
        assert_eq!(decode_all(&mut d, &data), events);
    }

    #[test]
    fn unexpected_event_is_rejected() {
        let mut s = ExiStream::new(ExiOptions::default(), None).unwrap();
        let mut w = BitWriter::new();
        let err = s.encode_event(&mut w, &ExiEvent::EndElement).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEvent(_)), "{err}");
    }

    #[test]
    fn comment_requires_preserve() {
        let events = [ExiEvent::StartDocument, ExiEvent::Comment("c".into())];
        let mut s = ExiStream::new(ExiOptions::default(), None).unwrap();
        let mut w = BitWriter::new();
        s.encode_event(&mut w, &events[0]).unwrap();
        assert!(matches!(s.encode_event(&mut w, &events[1]), Err(Error::UnexpectedEvent(_))));

        let opts = ExiOptions::default().with_preserve(Preserve { comments: true, ..Preserve::default() });
        let mut s = ExiStream::new(opts, None).unwrap();
        s.encode_event(&mut w, &events[0]).unwrap();
        s.encode_event(&mut w, &events[1]).unwrap();
    }

    #[test]
    fn self_contained_round_trip() {
        let events = vec![
            ExiEvent::StartDocument,
            ExiEvent::start("a"),
            ExiEvent::SelfContained,
            ExiEvent::start("b"),
            ExiEvent::text("inner"),
            ExiEvent::EndElement,
            ExiEvent::EndElement,
            ExiEvent::EndDocument,
        ];
        let opts = ExiOptions::default().with_self_contained();
        let mut enc = ExiStream::new(opts.clone(), None).unwrap();
        let data = encode_all(&mut enc, &events);
        assert!(enc.sc_scopes.is_empty());
        // Der äußere Pool kennt b nicht: es wurde im SC-Bereich gelernt
        assert!(enc.tables().lookup_qname("", "b").is_none());

        let mut dec = ExiStream::new(opts, None).unwrap();
        assert_eq!(decode_all(&mut dec, &data), events);
    }

    #[test]
    fn compression_is_rejected() {
        let err = ExiStream::new(ExiOptions::default().with_compression(), None).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
