//! Proto-Grammars für schema-informed Grammars (EXI 1.0 §8.5.4.1 - §8.5.4.3).
//!
//! Proto-Grammars sind das Zwischenformat des XSD-Builders. Sie unterscheiden
//! sich von fertigen [`Grammar`]s durch:
//!
//! 1. **ε-Produktionen** (`LeftHandSide : RightHandSide`, kein Terminal)
//! 2. **doppelte Terminals** mit verschiedenen Zielen
//! 3. **keine Event Codes**
//!
//! ```text
//! XSD → ProtoGrammar (⊕, Partikel) → normalize → assign_codes → Grammar
//! ```
//!
//! EE ist in Proto-Grammars der Accept-Zustand; die Konkatenation ersetzt ihn
//! durch ε zum Start der rechten Grammar.

use std::cmp::Ordering;

use crate::event_code::EventCode;
use crate::grammar::{
    EventType, Grammar, GrammarId, GrammarKind, GrammarRule, NonTermId, Production, START_TAG_CONTENT, VOID,
};
use crate::qname::QNameId;
use crate::string_table::Remap;
use crate::value::ValueType;
use crate::{Error, FastHashMap, FastHashSet, FastIndexMap, Result};

/// maxOccurs oberhalb dieser Grenze wird wie `unbounded` behandelt.
pub const MAX_OCCURS_EXPANSION: u32 = 256;

// ============================================================================
// Terminal
// ============================================================================

/// Terminal symbol of a proto production.
///
/// `element` is a builder-side slot index for SE(qname); it is replaced by a
/// [`GrammarId`] in [`ProtoGrammar::into_grammar`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Terminal {
    pub event_type: EventType,
    pub qname: Option<QNameId>,
    pub uri: Option<u32>,
    pub value_type: ValueType,
    pub element: Option<usize>,
}

impl Terminal {
    fn plain(event_type: EventType) -> Self {
        Self { event_type, qname: None, uri: None, value_type: ValueType::None, element: None }
    }

    pub fn end_element() -> Self {
        Self::plain(EventType::EndElement)
    }

    pub fn characters(vt: ValueType) -> Self {
        Self { value_type: vt, ..Self::plain(EventType::Characters) }
    }

    pub fn start_element(qname: QNameId, element: usize) -> Self {
        Self { qname: Some(qname), element: Some(element), ..Self::plain(EventType::StartElementQName) }
    }

    pub fn start_element_uri(uri: u32) -> Self {
        Self { uri: Some(uri), ..Self::plain(EventType::StartElementUri) }
    }

    pub fn start_element_all() -> Self {
        Self::plain(EventType::StartElementAll)
    }

    pub fn attribute(qname: QNameId, vt: ValueType) -> Self {
        Self { qname: Some(qname), value_type: vt, ..Self::plain(EventType::AttributeQName) }
    }

    pub fn attribute_uri(uri: u32) -> Self {
        Self { uri: Some(uri), value_type: ValueType::String, ..Self::plain(EventType::AttributeUri) }
    }

    pub fn attribute_all() -> Self {
        Self { value_type: ValueType::String, ..Self::plain(EventType::AttributeAll) }
    }

    fn is_end_element(&self) -> bool {
        self.event_type == EventType::EndElement
    }

    /// Duplikat-Schlüssel (§8.5.4.2.2): Event und Name, nicht Typ oder Ziel.
    fn key(&self) -> (EventType, Option<QNameId>, Option<u32>) {
        (self.event_type, self.qname, self.uri)
    }

    /// Rang der Event-Code-Sortierung (§8.5.4.3).
    fn rank(&self) -> u8 {
        match self.event_type {
            EventType::AttributeQName => 0,
            EventType::AttributeUri => 1,
            EventType::AttributeAll => 2,
            EventType::StartElementQName => 3,
            EventType::StartElementUri => 4,
            EventType::StartElementAll => 5,
            EventType::EndElement => 6,
            EventType::Characters => 7,
            _ => 8,
        }
    }
}

// ============================================================================
// ProtoProduction / ProtoGrammar
// ============================================================================

/// Production in einer Proto-Grammar; `terminal = None` ist eine ε-Produktion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoProduction {
    pub terminal: Option<Terminal>,
    pub rhs: usize,
    /// Partikel-Reihenfolge für SE(qname)/SE(uri:*), depth-first.
    pub schema_order: Option<u32>,
}

impl ProtoProduction {
    pub fn new(terminal: Terminal, rhs: usize) -> Self {
        Self { terminal: Some(terminal), rhs, schema_order: None }
    }

    pub fn ordered(terminal: Terminal, rhs: usize, order: u32) -> Self {
        Self { terminal: Some(terminal), rhs, schema_order: Some(order) }
    }

    pub fn epsilon(rhs: usize) -> Self {
        Self { terminal: None, rhs, schema_order: None }
    }

    pub fn is_epsilon(&self) -> bool {
        self.terminal.is_none()
    }

    fn is_end_element(&self) -> bool {
        self.terminal.as_ref().is_some_and(Terminal::is_end_element)
    }

    fn shifted(&self, offset: usize) -> Self {
        Self { rhs: self.rhs + offset, ..self.clone() }
    }
}

/// Proto-Grammar: Zeilen von Productions, Index = Non-Terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtoGrammar {
    rows: Vec<Vec<ProtoProduction>>,
}

impl ProtoGrammar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Vec<ProtoProduction>>) -> Self {
        Self { rows }
    }

    pub fn add_row(&mut self, row: Vec<ProtoProduction>) -> usize {
        self.rows.push(row);
        self.rows.len() - 1
    }

    pub fn rows(&self) -> &[Vec<ProtoProduction>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    // ========================================================================
    // Bausteine (§8.5.4.1.3 - §8.5.4.1.8)
    // ========================================================================

    /// `G_0 : EE`
    pub fn end_element_only() -> Self {
        Self::with_rows(vec![vec![ProtoProduction::new(Terminal::end_element(), 0)]])
    }

    /// Simple-Type Grammar und ihre leere Variante (§8.5.4.1.3.1).
    ///
    /// ```text
    /// Type_0 : CH [vt] Type_1
    /// Type_1 : EE
    /// TypeEmpty_0 : EE
    /// ```
    pub fn simple_type(vt: ValueType) -> (Self, Self) {
        let full = Self::with_rows(vec![
            vec![ProtoProduction::new(Terminal::characters(vt), 1)],
            vec![ProtoProduction::new(Terminal::end_element(), 1)],
        ]);
        (full, Self::end_element_only())
    }

    /// Attribute use (§8.5.4.1.4); optionale Attribute bekommen EE am Start.
    pub fn attribute_use(qname: QNameId, vt: ValueType, required: bool) -> Self {
        let mut first = vec![ProtoProduction::new(Terminal::attribute(qname, vt), 1)];
        if !required {
            first.push(ProtoProduction::new(Terminal::end_element(), 0));
        }
        Self::with_rows(vec![first, vec![ProtoProduction::new(Terminal::end_element(), 1)]])
    }

    /// Element term (§8.5.4.1.6).
    pub fn element_term(qname: QNameId, element: usize, order: u32) -> Self {
        Self::with_rows(vec![
            vec![ProtoProduction::ordered(Terminal::start_element(qname, element), 1, order)],
            vec![ProtoProduction::new(Terminal::end_element(), 1)],
        ])
    }

    /// Wildcard term (§8.5.4.1.7): `None` für ##any/##other, sonst ein
    /// SE(uri:*) je URI.
    pub fn wildcard_term(uris: Option<&[u32]>, order: &mut u32) -> Self {
        let first = match uris {
            None => vec![ProtoProduction::new(Terminal::start_element_all(), 1)],
            Some(uris) => uris
                .iter()
                .map(|&uri| {
                    let o = *order;
                    *order += 1;
                    ProtoProduction::ordered(Terminal::start_element_uri(uri), 1, o)
                })
                .collect(),
        };
        Self::with_rows(vec![first, vec![ProtoProduction::new(Terminal::end_element(), 1)]])
    }

    /// Sequence (§8.5.4.1.8.1): `P_0 ⊕ P_1 ⊕ ... ⊕ P_n-1`, leer → EE.
    pub fn sequence(particles: Vec<Self>) -> Self {
        let mut iter = particles.into_iter();
        let Some(first) = iter.next() else {
            return Self::end_element_only();
        };
        let mut builder = ConcatBuilder::new(first);
        for p in iter {
            builder.append(p);
        }
        builder.finish()
    }

    /// Choice (§8.5.4.1.8.2): `G_0 : ε P_i,0` für alle i.
    pub fn choice(particles: Vec<Self>) -> Self {
        if particles.is_empty() {
            return Self::end_element_only();
        }
        let offsets = Self::offsets(&particles, 1);
        let mut grammar = Self::with_rows(vec![offsets.iter().map(|&o| ProtoProduction::epsilon(o)).collect()]);
        grammar.copy_with_offsets(&particles, &offsets, None);
        grammar
    }

    /// All (§8.5.4.1.8.3): `G_0 : EE | ε P_i,0`, EE in den Partikeln → ε G_0.
    pub fn all(particles: Vec<Self>) -> Self {
        if particles.is_empty() {
            return Self::end_element_only();
        }
        let offsets = Self::offsets(&particles, 1);
        let mut first = vec![ProtoProduction::new(Terminal::end_element(), 0)];
        first.extend(offsets.iter().map(|&o| ProtoProduction::epsilon(o)));
        let mut grammar = Self::with_rows(vec![first]);
        grammar.copy_with_offsets(&particles, &offsets, Some(0));
        grammar
    }

    /// Particle (§8.5.4.1.5): `min` Pflichtkopien, dann optionale Kopien
    /// oder eine Schleife für `max = None` (unbounded).
    pub fn particle(term: Self, min: u32, max: Option<u32>) -> Result<Self> {
        let max = max.filter(|&m| m <= MAX_OCCURS_EXPANSION);
        if let Some(m) = max
            && m < min
        {
            return Err(Error::schema(format!("maxOccurs {m} is smaller than minOccurs {min}")));
        }
        if min > MAX_OCCURS_EXPANSION {
            return Err(Error::schema(format!("minOccurs {min} is too large")));
        }
        match (min, max) {
            (_, Some(0)) => Ok(Self::end_element_only()),
            (1, Some(1)) => Ok(term),
            (0, Some(1)) => {
                let mut g = term;
                g.add_optional_ee();
                Ok(g)
            }
            (min, max) => {
                let mut copies = Vec::new();
                for _ in 0..min {
                    copies.push(term.clone());
                }
                match max {
                    None => {
                        let mut looped = term;
                        looped.make_loop();
                        looped.add_optional_ee();
                        copies.push(looped);
                    }
                    Some(max) => {
                        for _ in min..max {
                            let mut optional = term.clone();
                            optional.add_optional_ee();
                            copies.push(optional);
                        }
                    }
                }
                Ok(Self::sequence(copies))
            }
        }
    }

    /// Complex-Type Grammars (§8.5.4.1.3.2): `(Type, TypeEmpty)`.
    ///
    /// `attribute_uses` müssen bereits sortiert sein. `wildcard` ist `None`
    /// ohne anyAttribute, `Some(None)` für ##any und `Some(Some(uris))` für
    /// eine Namespace-Liste.
    pub fn complex_type(mut attribute_uses: Vec<Self>, wildcard: Option<Option<&[u32]>>, content: Self) -> (Self, Self) {
        if let Some(uris) = wildcard {
            attribute_uses.push(Self::end_element_only());
            for g in &mut attribute_uses {
                g.add_attribute_wildcard(uris);
            }
        } else if attribute_uses.is_empty() {
            attribute_uses.push(Self::end_element_only());
        }
        let mut full = attribute_uses.clone();
        full.push(content);
        let mut empty = attribute_uses;
        empty.push(Self::end_element_only());
        (Self::sequence(full), Self::sequence(empty))
    }

    /// `CH [untyped] G_j` an jedem Non-Terminal (mixed content).
    pub fn add_mixed_content(&mut self) {
        for (i, row) in self.rows.iter_mut().enumerate() {
            row.push(ProtoProduction::new(Terminal::characters(ValueType::String), i));
        }
    }

    fn add_attribute_wildcard(&mut self, uris: Option<&[u32]>) {
        let Some(first) = self.rows.first_mut() else {
            return;
        };
        match uris {
            None => first.push(ProtoProduction::new(Terminal::attribute_all(), 0)),
            Some(uris) => {
                for &uri in uris {
                    first.push(ProtoProduction::new(Terminal::attribute_uri(uri), 0));
                }
            }
        }
    }

    fn add_optional_ee(&mut self) {
        if let Some(first) = self.rows.first_mut() {
            first.push(ProtoProduction::new(Terminal::end_element(), 0));
        }
    }

    /// EE → ε G_0
    fn make_loop(&mut self) {
        for p in self.rows.iter_mut().flatten() {
            if p.is_end_element() {
                p.terminal = None;
                p.rhs = 0;
            }
        }
    }

    fn offsets(particles: &[Self], start: usize) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(particles.len());
        let mut current = start;
        for p in particles {
            offsets.push(current);
            current += p.len();
        }
        offsets
    }

    fn copy_with_offsets(&mut self, particles: &[Self], offsets: &[usize], ee_to: Option<usize>) {
        for (p, &offset) in particles.iter().zip(offsets) {
            for row in &p.rows {
                let row = row
                    .iter()
                    .map(|prod| match ee_to {
                        Some(target) if prod.is_end_element() => ProtoProduction::epsilon(target),
                        _ => prod.shifted(offset),
                    })
                    .collect();
                self.rows.push(row);
            }
        }
    }

    /// Grammar-Konkatenation ⊕ (§8.5.4.1.1).
    pub fn concatenate(self, other: Self) -> Self {
        let mut builder = ConcatBuilder::new(self);
        builder.append(other);
        builder.finish()
    }

    /// Wendet die Id-Umnummerierung nach `sort_initial` auf alle Namen an.
    pub fn remap(&mut self, remap: &Remap) {
        for t in self.rows.iter_mut().flatten().filter_map(|p| p.terminal.as_mut()) {
            if let Some(q) = t.qname.as_mut() {
                *q = remap.qname(*q);
            }
            if let Some(uri) = t.uri.as_mut() {
                *uri = remap.qname(QNameId::new(*uri, 0)).uri;
            }
        }
    }

    // ========================================================================
    // Normalisierung (§8.5.4.2)
    // ========================================================================

    /// Entfernt ε-Produktionen (§8.5.4.2.1): jede Zeile erhält die
    /// Terminal-Productions aller über ε erreichbaren Zeilen.
    pub fn eliminate_epsilon(&mut self) {
        let mut result = Vec::with_capacity(self.rows.len());
        for start in 0..self.rows.len() {
            let mut seen = FastHashSet::default();
            let mut stack = vec![start];
            let mut row = Vec::new();
            while let Some(i) = stack.pop() {
                if !seen.insert(i) {
                    continue;
                }
                for p in &self.rows[i] {
                    if p.is_epsilon() {
                        stack.push(p.rhs);
                    } else {
                        row.push(p.clone());
                    }
                }
            }
            result.push(row);
        }
        self.rows = result;
    }

    /// Vereinigt doppelte Terminals (§8.5.4.2.2). Verschiedene Ziele werden
    /// durch Union-Zeilen ersetzt, die ihrerseits wieder normalisiert werden.
    ///
    /// Union-Zeilen sind über die Menge der ursprünglichen Zeilen indiziert,
    /// die sie vereinigen (Teilmengenkonstruktion); eine Union aus Unions
    /// landet so wieder auf derselben Zeile.
    pub fn merge_duplicates(&mut self) {
        let mut bases: Vec<Vec<usize>> = (0..self.rows.len()).map(|i| vec![i]).collect();
        let mut unions: FastHashMap<Vec<usize>, usize> = FastHashMap::default();
        let mut i = 0;
        while i < self.rows.len() {
            let mut groups: FastIndexMap<_, (ProtoProduction, Vec<usize>)> = FastIndexMap::default();
            for p in &self.rows[i] {
                let Some(t) = &p.terminal else { continue };
                let entry = groups.entry(t.key()).or_insert_with(|| (p.clone(), Vec::new()));
                entry.0.schema_order = min_order(entry.0.schema_order, p.schema_order);
                if !t.is_end_element() && !entry.1.contains(&p.rhs) {
                    entry.1.push(p.rhs);
                }
            }
            let mut row = Vec::with_capacity(groups.len());
            for (_, (mut prod, targets)) in groups {
                if targets.len() > 1 {
                    let mut key: Vec<usize> = targets.iter().flat_map(|&t| bases[t].iter().copied()).collect();
                    key.sort_unstable();
                    key.dedup();
                    prod.rhs = match (key.as_slice(), unions.get(&key)) {
                        ([single], _) => *single,
                        (_, Some(&u)) => u,
                        _ => {
                            let merged: Vec<ProtoProduction> =
                                key.iter().flat_map(|&b| self.rows[b].iter().cloned()).collect();
                            let u = self.add_row(merged);
                            bases.push(key.clone());
                            unions.insert(key, u);
                            u
                        }
                    };
                }
                row.push(prod);
            }
            self.rows[i] = row;
            i += 1;
        }
    }

    /// Normalisiert und vergibt Event Codes (§8.5.4.3).
    ///
    /// Sortierung: AT(qname) nach `cmp_qname`, AT(uri:*), AT(*), SE(qname)
    /// und SE(uri:*) in Schema-Reihenfolge, SE(*), EE, CH. Jede Production
    /// erhält einen einteiligen Code gleich ihrem Index.
    pub fn assign_codes(&mut self, cmp_qname: &dyn Fn(QNameId, QNameId) -> Ordering) {
        self.eliminate_epsilon();
        self.merge_duplicates();
        for row in &mut self.rows {
            row.sort_by(|a, b| match (&a.terminal, &b.terminal) {
                (Some(ta), Some(tb)) => ta.rank().cmp(&tb.rank()).then_with(|| match ta.event_type {
                    EventType::AttributeQName => match (ta.qname, tb.qname) {
                        (Some(qa), Some(qb)) => cmp_qname(qa, qb),
                        _ => Ordering::Equal,
                    },
                    EventType::AttributeUri => ta.uri.cmp(&tb.uri),
                    EventType::StartElementQName | EventType::StartElementUri => {
                        a.schema_order.cmp(&b.schema_order)
                    }
                    _ => Ordering::Equal,
                }),
                _ => Ordering::Equal,
            });
        }
    }

    /// Erzeugt die fertige Grammar. Zeile `i` wird Non-Terminal
    /// `START_TAG_CONTENT + i`, EE zeigt auf `VOID`. `resolve` bildet
    /// Element-Slots auf Grammar-Ids ab.
    pub fn into_grammar(self, resolve: &dyn Fn(usize) -> Result<GrammarId>) -> Result<Grammar> {
        let nt = |i: usize| -> Result<NonTermId> {
            NonTermId::try_from(i + START_TAG_CONTENT as usize)
                .map_err(|_| Error::schema("grammar has too many non-terminals"))
        };
        let mut rules = Vec::with_capacity(self.rows.len());
        for (i, row) in self.rows.into_iter().enumerate() {
            let mut productions = Vec::with_capacity(row.len());
            for (code, p) in row.into_iter().enumerate() {
                let t = p.terminal.ok_or_else(|| Error::inconsistent("ε production after normalisation"))?;
                let rhs = if t.is_end_element() { VOID } else { nt(p.rhs)? };
                let grammar = t.element.map(resolve).transpose()?;
                productions.push(Production {
                    code: EventCode::one(code as u32),
                    event_type: t.event_type,
                    value_type: t.value_type,
                    rhs,
                    qname: t.qname,
                    uri: t.uri,
                    grammar,
                });
            }
            rules.push(GrammarRule::new(nt(i)?, productions));
        }
        Ok(Grammar { kind: GrammarKind::Schema, rules })
    }
}

fn min_order(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) | (None, x) => x,
    }
}

/// Konkatenation vieler Kopien: EE wird nur im jeweils letzten Block ersetzt.
struct ConcatBuilder {
    grammar: ProtoGrammar,
    tail_start: usize,
}

impl ConcatBuilder {
    fn new(grammar: ProtoGrammar) -> Self {
        Self { grammar, tail_start: 0 }
    }

    fn append(&mut self, other: ProtoGrammar) {
        if other.is_empty() {
            return;
        }
        let offset = self.grammar.len();
        for p in self.grammar.rows[self.tail_start..].iter_mut().flatten() {
            if p.is_end_element() {
                p.terminal = None;
                p.rhs = offset;
            }
        }
        for row in other.rows {
            self.grammar.rows.push(row.iter().map(|p| p.shifted(offset)).collect());
        }
        self.tail_start = offset;
    }

    fn finish(self) -> ProtoGrammar {
        self.grammar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn by_id(a: QNameId, b: QNameId) -> Ordering {
        (a.local_name, a.uri).cmp(&(b.local_name, b.uri))
    }

    fn compile(mut g: ProtoGrammar) -> Grammar {
        g.assign_codes(&by_id);
        g.into_grammar(&|slot| Ok(slot)).unwrap()
    }

    fn shape(rule: &GrammarRule) -> Vec<String> {
        rule.productions
            .iter()
            .map(|p| match p.qname {
                Some(q) => format!("{}[{}]>{}", p.event_type, q, p.rhs),
                None => format!("{}>{}", p.event_type, p.rhs),
            })
            .collect()
    }

    fn q(ln: u32) -> QNameId {
        QNameId::new(4, ln)
    }

    #[test]
    fn simple_type_grammar() {
        let (full, empty) = ProtoGrammar::simple_type(ValueType::Integer);
        let g = compile(full);
        assert_eq!(g.rules.len(), 2);
        assert_eq!(shape(&g.rules[0]), ["CH>5"]);
        assert_eq!(g.rules[0].productions[0].value_type, ValueType::Integer);
        assert_eq!(g.rules[0].bits, [0, 0, 0]);
        assert_eq!(shape(&g.rules[1]), ["EE>0"]);
        assert_eq!(compile(empty).rules.len(), 1);
    }

    #[test]
    fn sequence_of_elements() {
        let g = compile(ProtoGrammar::sequence(vec![
            ProtoGrammar::element_term(q(0), 7, 0),
            ProtoGrammar::element_term(q(1), 8, 1),
        ]));
        assert_eq!(shape(&g.rules[0]), ["SE(qname)[4:0]>5"]);
        assert_eq!(g.rules[0].productions[0].grammar, Some(7));
        assert_eq!(shape(&g.rules[1]), ["SE(qname)[4:1]>7"]);
        assert_eq!(shape(&g.rules[3]), ["EE>0"]);
    }

    #[test]
    fn optional_particle_adds_end_element() {
        let term = ProtoGrammar::element_term(q(0), 0, 0);
        let g = compile(ProtoGrammar::particle(term, 0, Some(1)).unwrap());
        assert_eq!(shape(&g.rules[0]), ["SE(qname)[4:0]>5", "EE>0"]);
        assert_eq!(g.rules[0].bits, [1, 0, 0]);
    }

    #[test]
    fn unbounded_particle_loops() {
        let term = ProtoGrammar::element_term(q(0), 0, 0);
        let g = compile(ProtoGrammar::particle(term, 1, None).unwrap());
        // a, dann a* : nach dem ersten a wieder SE(a) oder EE
        let after_first = g.productions_of(4)[0].rhs;
        let next: Vec<_> = g.productions_of(after_first).iter().map(|p| p.event_type).collect();
        assert_eq!(next, [EventType::StartElementQName, EventType::EndElement]);
    }

    #[test]
    fn choice_merges_alternatives() {
        let g = compile(ProtoGrammar::choice(vec![
            ProtoGrammar::element_term(q(1), 1, 0),
            ProtoGrammar::element_term(q(0), 0, 1),
        ]));
        // Schema-Reihenfolge, nicht Namensreihenfolge
        assert_eq!(shape(&g.rules[0])[0], "SE(qname)[4:1]>6");
        assert_eq!(g.rules[0].productions.len(), 2);
    }

    /// (b | i)* mit mixed content: CH-Schleifen an jeder Zeile erzeugen
    /// Unions aus Unions, die Zahl der Zeilen bleibt trotzdem klein.
    #[test]
    fn mixed_repeating_choice_has_finite_unions() {
        let choice = ProtoGrammar::choice(vec![
            ProtoGrammar::element_term(q(0), 0, 0),
            ProtoGrammar::element_term(q(1), 1, 1),
        ]);
        let mut content = ProtoGrammar::particle(choice, 0, None).unwrap();
        content.add_mixed_content();
        let (full, _) = ProtoGrammar::complex_type(Vec::new(), None, content);
        let rows_before = full.len();
        let g = compile(full);
        assert!(g.rules.len() < 4 * rows_before, "{} rules from {rows_before}", g.rules.len());
        for rule in &g.rules {
            let ch = rule.productions.iter().filter(|p| p.event_type == EventType::Characters).count();
            assert!(ch <= 1, "{:?}", shape(rule));
        }
        let first: Vec<_> = g.rules[0].productions.iter().map(|p| p.event_type).collect();
        assert_eq!(
            first,
            [EventType::StartElementQName, EventType::StartElementQName, EventType::EndElement, EventType::Characters]
        );
    }

    #[test]
    fn duplicate_terminals_get_union_target() {
        // (a b) | (a c): beide beginnen mit SE(a)
        let ab = ProtoGrammar::sequence(vec![
            ProtoGrammar::element_term(q(0), 0, 0),
            ProtoGrammar::element_term(q(1), 1, 1),
        ]);
        let ac = ProtoGrammar::sequence(vec![
            ProtoGrammar::element_term(q(0), 0, 2),
            ProtoGrammar::element_term(q(2), 2, 3),
        ]);
        let g = compile(ProtoGrammar::choice(vec![ab, ac]));
        let first = &g.rules[0];
        assert_eq!(first.productions.len(), 1);
        let union = g.productions_of(first.productions[0].rhs);
        let names: Vec<_> = union.iter().map(|p| p.qname).collect();
        assert_eq!(names, [Some(q(1)), Some(q(2))]);
    }

    #[test]
    fn attributes_sorted_and_wildcard_added() {
        let attrs = vec![
            ProtoGrammar::attribute_use(q(0), ValueType::String, false),
            ProtoGrammar::attribute_use(q(1), ValueType::Boolean, true),
        ];
        let (full, empty) = ProtoGrammar::complex_type(attrs, Some(None), ProtoGrammar::end_element_only());
        let g = compile(full);
        let first: Vec<_> = g.rules[0].productions.iter().map(|p| (p.event_type, p.qname)).collect();
        assert_eq!(
            first,
            [
                (EventType::AttributeQName, Some(q(0))),
                (EventType::AttributeQName, Some(q(1))),
                (EventType::AttributeAll, None),
            ]
        );
        assert_eq!(g.rules[0].bits, [2, 0, 0]);
        let e = compile(empty);
        assert_eq!(e.rules[0].productions.len(), 3);
    }

    #[test]
    fn mixed_content_adds_untyped_characters() {
        let mut content = ProtoGrammar::element_term(q(0), 0, 0);
        content.add_mixed_content();
        let g = compile(content);
        assert_eq!(shape(&g.rules[0]), ["SE(qname)[4:0]>5", "CH>4"]);
        assert_eq!(shape(&g.rules[1]), ["EE>0", "CH>5"]);
    }

    #[test]
    fn all_group_allows_any_order() {
        let g = compile(ProtoGrammar::all(vec![
            ProtoGrammar::element_term(q(0), 0, 0),
            ProtoGrammar::element_term(q(1), 1, 1),
        ]));
        assert_eq!(
            shape(&g.rules[0]).iter().map(|s| &s[..s.find('>').unwrap_or(s.len())]).collect::<Vec<_>>(),
            ["SE(qname)[4:0]", "SE(qname)[4:1]", "EE"]
        );
    }

    #[test]
    fn invalid_occurrence_bounds() {
        let term = ProtoGrammar::element_term(q(0), 0, 0);
        assert!(ProtoGrammar::particle(term.clone(), 3, Some(2)).is_err());
        let g = ProtoGrammar::particle(term, 0, Some(0)).unwrap();
        assert_eq!(g, ProtoGrammar::end_element_only());
    }

    #[test]
    fn bit_width_follows_production_count() {
        let terms = (0..5).map(|i| ProtoGrammar::element_term(q(i), 0, i)).collect();
        let g = compile(ProtoGrammar::choice(terms));
        assert_eq!(g.rules[0].productions.len(), 5);
        assert_eq!(g.rules[0].bits, [3, 0, 0]);
    }
}
