//! Undeclared Productions für schema-informed Grammars (EXI 1.0 §8.5.4.4.1).
//!
//! Bei `strict = false` bekommt jede Element- und Type-Grammar des Schemas
//! zweiteilige Productions für Events, die das Schema nicht deklariert:
//! EE, `xsi:type`, `xsi:nil`, AT(*), NS, SC, SE(*), CH [untyped], ER, CM
//! und PI. Die Schema-Arena selbst bleibt unverändert; jeder Stream arbeitet
//! auf einer augmentierten Kopie.
//!
//! ```text
//! Element_i,0       ... AT(xsi:type) AT(xsi:nil) AT(*) AT(*) NS SC SE(*) CH ...
//! Element_i,j       j <= content: wie oben ohne xsi/NS/SC, SE(*)/CH -> content2
//! Element_i,content2  Kopie von Element_i,content, SE(*)/CH -> content2
//! Element_i,j       j > content: EE, SE(*)/CH -> Element_i,j
//! ```

use crate::event_code::EventCode;
use crate::grammar::{EventType, FRAGMENT, Grammar, GrammarRule, NonTermId, Production, START_TAG_CONTENT, VOID};
use crate::options::ExiOptions;
use crate::schema::Schema;
use crate::string_table::{XSI_NIL, XSI_TYPE};
use crate::value::ValueType;
use crate::{Error, Result};

// ============================================================================
// Content-Index
// ============================================================================

/// Index der ersten Regel ohne AT-Production.
///
/// Alle Regeln davor erlauben noch Attribute; ab `content` beginnt der
/// Inhalt des Elements.
pub fn content_index(rules: &[GrammarRule]) -> usize {
    rules
        .iter()
        .position(|r| !r.productions.iter().any(|p| is_attribute(p.event_type)))
        .unwrap_or(rules.len())
}

fn is_attribute(event_type: EventType) -> bool {
    matches!(event_type, EventType::AttributeQName | EventType::AttributeUri | EventType::AttributeAll)
}

// ============================================================================
// Augmentierung
// ============================================================================

/// Augmentiert `grammar` für `strict = false`.
///
/// Hängt die Regel `content2` an und erweitert jede Regel um eine zweite
/// Code-Ebene hinter den deklarierten Productions.
pub fn augment_non_strict(grammar: &mut Grammar, options: &ExiOptions) -> Result<()> {
    let declared = grammar.rules.len();
    if declared == 0 {
        return Ok(());
    }
    let start = grammar.rules[0].non_term_id;
    let content = content_index(&grammar.rules);

    let content2 = if content < declared {
        let nt = NonTermId::try_from(START_TAG_CONTENT as usize + declared)
            .map_err(|_| Error::schema("grammar has too many non-terminals"))?;
        let copy = grammar.rules[content].productions.clone();
        grammar.rules.push(GrammarRule::new(nt, copy));
        Some(nt)
    } else {
        None
    };

    for (j, rule) in grammar.rules.iter_mut().enumerate() {
        let own = rule.non_term_id;
        let tier2 = if j < declared && j <= content {
            Tier2 { first: j == 0, attributes: true, start, target: content2.unwrap_or(own) }
        } else {
            Tier2 { first: false, attributes: false, start, target: own }
        };
        tier2.apply(rule, options);
    }
    Ok(())
}

/// Augmentierte Kopie der Schema-Arena; Ids bleiben gleich.
pub fn augment_schema(schema: &Schema, options: &ExiOptions) -> Result<Vec<Grammar>> {
    let grammars = schema
        .grammars()
        .iter()
        .map(|g| {
            let mut g = g.clone();
            augment_non_strict(&mut g, options)?;
            Ok(g)
        })
        .collect::<Result<Vec<_>>>()?;
    log::debug!("added undeclared productions to {} schema grammars", grammars.len());
    Ok(grammars)
}

/// Zweite Code-Ebene einer Regel.
#[derive(Debug, Clone, Copy)]
struct Tier2 {
    /// Element_i,0: xsi:type, xsi:nil, NS und SC.
    first: bool,
    /// j <= content: AT(*) und AT(*) [untyped].
    attributes: bool,
    start: NonTermId,
    /// Ziel von SE(*), CH, ER, CM und PI.
    target: NonTermId,
}

impl Tier2 {
    fn apply(self, rule: &mut GrammarRule, options: &ExiOptions) {
        let own = rule.non_term_id;
        let mut added = Vec::new();
        let production = |event_type, rhs| Production::new(EventCode::one(0), event_type, rhs);

        if !rule.productions.iter().any(|p| p.event_type == EventType::EndElement) {
            added.push(production(EventType::EndElement, VOID));
        }
        if self.first {
            added.push(production(EventType::AttributeQName, self.start).with_qname(XSI_TYPE));
            added.push(
                production(EventType::AttributeQName, self.start)
                    .with_qname(XSI_NIL)
                    .with_value_type(ValueType::Boolean),
            );
        }
        if self.attributes {
            // AT(*) und AT(*) [untyped value]; ohne globale Attribut-Deklarationen
            // sind beide untypisiert
            added.push(production(EventType::AttributeAll, own));
            added.push(production(EventType::AttributeAll, own));
        }
        if self.first && options.preserve.prefixes {
            added.push(production(EventType::NamespaceDeclaration, self.start));
        }
        if self.first && options.self_contained {
            added.push(production(EventType::SelfContained, FRAGMENT));
        }
        added.push(production(EventType::StartElementAll, self.target));
        added.push(production(EventType::Characters, self.target));
        if options.preserve.dtd {
            added.push(production(EventType::EntityReference, self.target));
        }

        let part1 = next_part1(rule);
        let mut part2 = 0;
        for p in &mut added {
            p.code = EventCode::two(part1, part2);
            part2 += 1;
        }
        match (options.preserve.comments, options.preserve.pis) {
            (true, true) => {
                added.push(Production::new(EventCode::three(part1, part2, 0), EventType::Comment, self.target));
                added.push(Production::new(
                    EventCode::three(part1, part2, 1),
                    EventType::ProcessingInstruction,
                    self.target,
                ));
            }
            (true, false) => added.push(Production::new(EventCode::two(part1, part2), EventType::Comment, self.target)),
            (false, true) => added.push(Production::new(
                EventCode::two(part1, part2),
                EventType::ProcessingInstruction,
                self.target,
            )),
            (false, false) => {}
        }

        rule.productions.extend(added);
        rule.recompute_bits();
    }
}

/// Erster freier Wert des ersten Code-Teils.
fn next_part1(rule: &GrammarRule) -> u32 {
    rule.productions.iter().filter_map(|p| p.code.part(0)).max().map_or(0, |m| m + 1)
}
