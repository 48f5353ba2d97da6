//! Compiled schema (EXI 1.0 §8.5).
//!
//! Ein [`Schema`] ist nach der Kompilierung unveränderlich und wird per `Rc`
//! zwischen Streams geteilt: initiale String-Tabellen (mit xml-, xsi- und
//! xsd-Zeilen), die Grammar-Arena, der Index der globalen Elemente und die
//! Typ-Grammars. Sitzungen klonen nur die Tabellen; schema-informed Grammars
//! werden nie gelernt.

use std::rc::Rc;

use crate::grammar::{self, GlobalElement, Grammar, GrammarId};
use crate::qname::{QName, QNameId};
use crate::string_table::StringTables;
use crate::{Error, FastHashMap, Result};

/// Full and empty grammar of one type (§8.5.4.1.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeGrammars {
    pub full: GrammarId,
    /// Used for elements with `xsi:nil="true"`.
    pub empty: GrammarId,
}

#[derive(Debug, Clone)]
pub struct Schema {
    tables: StringTables,
    grammars: Vec<Grammar>,
    /// Sortiert nach (local name, uri), wie SE(G_i) im Document-Grammar.
    global_elements: Vec<GlobalElement>,
    type_grammars: FastHashMap<QNameId, TypeGrammars>,
}

impl Schema {
    /// Assembles a schema; `global_elements` must already be in document
    /// grammar order and reference grammars of the arena.
    pub fn new(
        tables: StringTables,
        grammars: Vec<Grammar>,
        global_elements: Vec<GlobalElement>,
        type_grammars: FastHashMap<QNameId, TypeGrammars>,
    ) -> Result<Self> {
        let dangling = global_elements
            .iter()
            .map(|e| e.grammar)
            .chain(type_grammars.values().flat_map(|t| [t.full, t.empty]))
            .chain(grammars.iter().flat_map(|g| g.rules.iter()).flat_map(|r| r.productions.iter()).filter_map(|p| p.grammar))
            .find(|&id| id >= grammars.len());
        if let Some(id) = dangling {
            return Err(Error::inconsistent(format!("grammar id {id} outside of the schema arena")));
        }
        Ok(Self { tables, grammars, global_elements, type_grammars })
    }

    pub fn into_rc(self) -> Rc<Self> {
        Rc::new(self)
    }

    /// Initial string tables, to be cloned per stream.
    pub fn tables(&self) -> &StringTables {
        &self.tables
    }

    pub fn grammar(&self, id: GrammarId) -> Option<&Grammar> {
        self.grammars.get(id)
    }

    /// The whole grammar arena, indexed by [`GrammarId`].
    pub fn grammars(&self) -> &[Grammar] {
        &self.grammars
    }

    pub fn grammar_count(&self) -> usize {
        self.grammars.len()
    }

    pub fn global_elements(&self) -> &[GlobalElement] {
        &self.global_elements
    }

    /// Grammar of the global element `qname`.
    pub fn global_element(&self, qname: QNameId) -> Option<GrammarId> {
        self.global_elements.iter().find(|e| e.qname == qname).map(|e| e.grammar)
    }

    /// Grammars of the named type `qname`, including the XSD built-ins.
    pub fn type_grammars(&self, qname: QNameId) -> Option<TypeGrammars> {
        self.type_grammars.get(&qname).copied()
    }

    /// Looks up a type by expanded name.
    pub fn type_by_name(&self, uri: &str, local_name: &str) -> Option<TypeGrammars> {
        self.type_grammars(self.tables.lookup_qname(uri, local_name)?)
    }

    /// Resolves the global element ids to qualified names, in grammar order.
    pub fn global_element_names(&self) -> Result<Vec<QName>> {
        self.global_elements.iter().map(|e| self.tables.qname(e.qname)).collect()
    }

    /// Document grammar (§8.5.1) with `SE(G_i)` for every global element.
    pub fn document_grammar(&self, preserve: bool) -> Grammar {
        grammar::document_grammar(&self.global_elements, preserve)
    }

    /// Fragment grammar (§8.5.2). Nur globale Elemente bekommen ein
    /// `SE(F_i)`, alles andere läuft über `SE(*)`.
    pub fn fragment_grammar(&self, preserve: bool) -> Grammar {
        grammar::fragment_grammar(&self.global_elements, preserve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{DOC_CONTENT, EventType, GrammarKind, GrammarRule, START_TAG_CONTENT};

    fn tiny() -> Schema {
        let mut tables = StringTables::new(true);
        let a = tables.add_qname("urn:t", "a");
        let g = Grammar { kind: GrammarKind::Schema, rules: vec![GrammarRule::new(START_TAG_CONTENT, vec![])] };
        let mut types = FastHashMap::default();
        types.insert(a, TypeGrammars { full: 0, empty: 0 });
        Schema::new(tables, vec![g], vec![GlobalElement { qname: a, grammar: 0 }], types).unwrap()
    }

    #[test]
    fn global_element_lookup() {
        let s = tiny();
        let a = s.tables().lookup_qname("urn:t", "a").unwrap();
        assert_eq!(s.global_element(a), Some(0));
        assert_eq!(s.global_element_names().unwrap()[0].local_name.as_ref(), "a");
        assert_eq!(s.type_by_name("urn:t", "a").map(|t| t.full), Some(0));
        assert!(s.type_by_name("urn:t", "b").is_none());
    }

    #[test]
    fn document_grammar_lists_globals_first() {
        let s = tiny();
        let doc = s.document_grammar(false);
        let kinds: Vec<_> = doc.productions_of(DOC_CONTENT).iter().map(|p| p.event_type).collect();
        assert_eq!(kinds, [EventType::StartElementQName, EventType::StartElementAll]);
        assert_eq!(doc.productions_of(DOC_CONTENT)[0].grammar, Some(0));
    }

    #[test]
    fn dangling_grammar_reference_is_rejected() {
        let tables = StringTables::new(true);
        let q = QNameId::new(0, 0);
        let err = Schema::new(tables, vec![], vec![GlobalElement { qname: q, grammar: 3 }], FastHashMap::default())
            .unwrap_err();
        assert!(matches!(err, Error::InconsistentState(_)));
    }
}
