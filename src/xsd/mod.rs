//! XSD schema compiler (EXI 1.0 §8.5.4).
//!
//! Der Compiler arbeitet SAX-artig: ein Walk über das `roxmltree`-Dokument
//! ruft `start_element`, `namespace_declaration`, `attribute`, `characters`
//! und `end_element` auf. Jedes offene Schema-Element hat eine
//! [`ElementDescription`] auf dem Stack; beim schließenden Tag werden die
//! Proto-Grammars der Kinder komponiert und an den Parent weitergereicht.
//!
//! Vorwärtsreferenzen (Typen, Basistypen, globale Elemente) werden erst nach
//! dem Walk aufgelöst:
//!
//! 1. `resolve_derived_types`: Fixpunkt-Schleife über alle Typen, jede Runde
//!    muss mindestens einen Typ auflösen
//! 2. `resolve_element_types`: Element-Slot → Typ
//! 3. Proto-Grammars bauen, String-Tabellen sortieren, Ids umnummerieren,
//!    Event Codes vergeben
//!
//! # Unterstützter Umfang
//!
//! element, attribute, complexType, complexContent, simpleContent, sequence,
//! choice, all, extension (nicht von Complex Types mit Element-Inhalt),
//! restriction, any, anyAttribute, simpleType, list, union, Facets.
//! `xs:group`, `xs:attributeGroup` und `xs:redefine` werden abgelehnt;
//! `xs:import` macht nur den Namespace bekannt.

use std::cmp::Ordering;

use roxmltree::{Document, Node, ParsingOptions};

use crate::grammar::GlobalElement;
use crate::integer::MAX_BOUNDED_RANGE;
use crate::proto_grammar::ProtoGrammar;
use crate::qname::QNameId;
use crate::schema::{Schema, TypeGrammars};
use crate::string_table::{StringTables, URI_XML, URI_XSD, XSD_BUILTIN_TYPES};
use crate::value::ValueType;
use crate::{Error, FastHashMap, Result};

const XS_NS: &str = URI_XSD;

/// Obergrenze für Schema-Dokumente.
const MAX_XSD_SIZE: usize = 16 * 1024 * 1024;

/// Compiles an XSD document into a [`Schema`].
///
/// ```
/// let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
///     <xs:element name="a" type="xs:string"/>
/// </xs:schema>"#;
/// let schema = exigram::xsd::compile_schema(xsd).unwrap();
/// assert_eq!(schema.global_elements().len(), 1);
/// ```
pub fn compile_schema(xsd: &str) -> Result<Schema> {
    if xsd.len() > MAX_XSD_SIZE {
        return Err(Error::schema(format!("schema document too large: {} bytes", xsd.len())));
    }
    let opts = ParsingOptions { allow_dtd: true, ..Default::default() };
    let doc = Document::parse_with_options(xsd, opts).map_err(|e| Error::schema(format!("XML: {e}")))?;
    let root = doc.root_element();
    if root.tag_name().name() != "schema" || root.tag_name().namespace() != Some(XS_NS) {
        return Err(Error::schema("root element must be xs:schema"));
    }
    let mut builder = SchemaBuilder::new();
    walk(&mut builder, root)?;
    builder.finish()
}

/// Treibt die Builder-Callbacks über einen Teilbaum.
fn walk(builder: &mut SchemaBuilder, node: Node) -> Result<()> {
    if node.tag_name().namespace() != Some(XS_NS) {
        log::debug!("skipping foreign element {:?}", node.tag_name());
        return Ok(());
    }
    let construct = SchemaConstruct::from_local_name(node.tag_name().name())
        .ok_or_else(|| Error::schema(format!("unknown schema construct xs:{}", node.tag_name().name())))?;
    builder.start_element(construct)?;

    let inherited: Vec<(Option<&str>, &str)> = node
        .parent_element()
        .map(|p| p.namespaces().map(|ns| (ns.name(), ns.uri())).collect())
        .unwrap_or_default();
    for ns in node.namespaces() {
        if !inherited.contains(&(ns.name(), ns.uri())) {
            builder.namespace_declaration(ns.name(), ns.uri());
        }
    }
    for attr in node.attributes() {
        if attr.namespace().is_none() {
            builder.attribute(attr.name(), attr.value())?;
        }
    }
    if !construct.skips_content() {
        for child in node.children() {
            if child.is_element() {
                walk(builder, child)?;
            } else if let Some(text) = child.text().filter(|_| child.is_text()) {
                builder.characters(text)?;
            }
        }
    }
    builder.end_element()
}

// ============================================================================
// Schema constructs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Facet {
    MinInclusive,
    MaxInclusive,
    MinExclusive,
    MaxExclusive,
    MaxLength,
    MinLength,
    Length,
    Enumeration,
    Pattern,
    WhiteSpace,
    TotalDigits,
    FractionDigits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchemaConstruct {
    Schema,
    Element,
    Attribute,
    ComplexType,
    ComplexContent,
    SimpleContent,
    Sequence,
    Choice,
    All,
    Extension,
    Restriction,
    Any,
    AnyAttribute,
    SimpleType,
    List,
    Union,
    Facet(Facet),
    Annotation,
    Documentation,
    Appinfo,
    Import,
    Include,
    Group,
    AttributeGroup,
    Redefine,
    /// unique, key, keyref und ihre selector/field-Kinder
    IdentityConstraint,
    Notation,
}

impl SchemaConstruct {
    fn from_local_name(name: &str) -> Option<Self> {
        use SchemaConstruct::*;
        Some(match name {
            "schema" => Schema,
            "element" => Element,
            "attribute" => Attribute,
            "complexType" => ComplexType,
            "complexContent" => ComplexContent,
            "simpleContent" => SimpleContent,
            "sequence" => Sequence,
            "choice" => Choice,
            "all" => All,
            "extension" => Extension,
            "restriction" => Restriction,
            "any" => Any,
            "anyAttribute" => AnyAttribute,
            "simpleType" => SimpleType,
            "list" => List,
            "union" => Union,
            "minInclusive" => Facet(self::Facet::MinInclusive),
            "maxInclusive" => Facet(self::Facet::MaxInclusive),
            "minExclusive" => Facet(self::Facet::MinExclusive),
            "maxExclusive" => Facet(self::Facet::MaxExclusive),
            "maxLength" => Facet(self::Facet::MaxLength),
            "minLength" => Facet(self::Facet::MinLength),
            "length" => Facet(self::Facet::Length),
            "enumeration" => Facet(self::Facet::Enumeration),
            "pattern" => Facet(self::Facet::Pattern),
            "whiteSpace" => Facet(self::Facet::WhiteSpace),
            "totalDigits" => Facet(self::Facet::TotalDigits),
            "fractionDigits" => Facet(self::Facet::FractionDigits),
            "annotation" => Annotation,
            "documentation" => Documentation,
            "appinfo" => Appinfo,
            "import" => Import,
            "include" => Include,
            "group" => Group,
            "attributeGroup" => AttributeGroup,
            "redefine" => Redefine,
            "unique" | "key" | "keyref" | "selector" | "field" => IdentityConstraint,
            "notation" => Notation,
            _ => return None,
        })
    }

    /// Konstrukte, deren Inhalt nicht betrachtet wird.
    fn skips_content(self) -> bool {
        matches!(self, Self::Documentation | Self::Appinfo | Self::IdentityConstraint | Self::Notation)
    }

    fn is_model_group(self) -> bool {
        matches!(self, Self::Sequence | Self::Choice | Self::All)
    }
}

// ============================================================================
// Intermediate model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeRef {
    Named(QNameId),
    /// Index into `SchemaBuilder::types`.
    Anonymous(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Derivation {
    Extension,
    Restriction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SimpleBase {
    Builtin(ValueType),
    Restriction(TypeRef),
    List,
    Union,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Content {
    Empty,
    /// Simple content, value type known after derivation.
    Simple(Option<ValueType>),
    Elements { grammar: ProtoGrammar, mixed: bool },
}

/// `None` = ##any/##other, `Some(uris)` = Namespace-Liste.
type Wildcard = Option<Vec<u32>>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttributeUse {
    qname: QNameId,
    type_ref: Option<TypeRef>,
    /// `ref` auf eine globale Attribut-Deklaration.
    global_ref: Option<QNameId>,
    required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TypeDef {
    Simple {
        name: Option<QNameId>,
        base: SimpleBase,
        facets: Facets,
        resolved: Option<ValueType>,
    },
    Complex {
        name: Option<QNameId>,
        attribute_uses: Vec<AttributeUse>,
        wildcard: Option<Wildcard>,
        content: Content,
        derivation: Option<(Derivation, TypeRef)>,
        /// Facets einer simpleContent-Restriction.
        facets: Facets,
        resolved: bool,
    },
}

impl TypeDef {
    fn is_resolved(&self) -> bool {
        match self {
            Self::Simple { resolved, .. } => resolved.is_some(),
            Self::Complex { resolved, .. } => *resolved,
        }
    }
}

/// Range-Facets als lexikalische Werte; ausgewertet erst mit bekanntem Basistyp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Facets {
    range: Vec<(Facet, String)>,
    other: usize,
}

impl Facets {
    fn is_empty(&self) -> bool {
        self.range.is_empty() && self.other == 0
    }

    fn add(&mut self, facet: Facet, value: &str) {
        match facet {
            Facet::MinInclusive | Facet::MaxInclusive | Facet::MinExclusive | Facet::MaxExclusive => {
                self.range.push((facet, value.trim().to_owned()));
            }
            _ => self.other += 1,
        }
    }

    /// Schränkt `vt` ein (EXI 1.0 §7.1.5: bounded und unsigned Integer).
    fn apply(&self, vt: ValueType) -> Result<ValueType> {
        if self.range.is_empty() {
            return Ok(vt);
        }
        let (mut min, mut max) = match vt {
            ValueType::BoundedInteger { min, max } => (Some(min), Some(max)),
            ValueType::UnsignedInteger => (Some(0), None),
            ValueType::Integer => (None, None),
            ValueType::Float | ValueType::Decimal | ValueType::DateTime(_) => return Ok(vt),
            other => return Err(Error::schema(format!("range facet on non-ordered type {other:?}"))),
        };
        for (facet, lexical) in &self.range {
            let Ok(v) = lexical.trim_start_matches('+').parse::<i64>() else {
                log::warn!("range facet value '{lexical}' ignored");
                continue;
            };
            match facet {
                Facet::MinInclusive => min = Some(min.map_or(v, |m| m.max(v))),
                Facet::MinExclusive => min = Some(min.map_or(v.saturating_add(1), |m| m.max(v.saturating_add(1)))),
                Facet::MaxInclusive => max = Some(max.map_or(v, |m| m.min(v))),
                Facet::MaxExclusive => max = Some(max.map_or(v.saturating_sub(1), |m| m.min(v.saturating_sub(1)))),
                _ => {}
            }
        }
        Ok(match (min, max) {
            (Some(lo), Some(hi)) if hi < lo => {
                return Err(Error::schema(format!("empty value range [{lo}, {hi}]")));
            }
            (Some(lo), Some(hi)) if hi.abs_diff(lo) < MAX_BOUNDED_RANGE => ValueType::BoundedInteger { min: lo, max: hi },
            (Some(lo), _) if lo >= 0 => ValueType::UnsignedInteger,
            _ => ValueType::Integer,
        })
    }
}

/// Element-Deklaration; SE(qname)-Terminals zeigen per Index hierher.
#[derive(Debug, Clone)]
struct ElementSlot {
    qname: QNameId,
    type_ref: Option<TypeRef>,
    global: bool,
    declared: bool,
}

/// Kontext eines offenen Schema-Elements.
#[derive(Debug)]
struct ElementDescription {
    construct: SchemaConstruct,
    attributes: Vec<(String, String)>,
    namespaces: Vec<(Option<String>, String)>,
    /// Partikel-Grammars der Kinder, in Dokumentreihenfolge.
    grammars: Vec<ProtoGrammar>,
    attribute_uses: Vec<AttributeUse>,
    wildcard: Option<Wildcard>,
    facets: Facets,
    inline_type: Option<usize>,
    simple_base: Option<SimpleBase>,
    derivation: Option<(Derivation, TypeRef)>,
    simple_content: bool,
    mixed: bool,
}

impl ElementDescription {
    fn new(construct: SchemaConstruct) -> Self {
        Self {
            construct,
            attributes: Vec::new(),
            namespaces: Vec::new(),
            grammars: Vec::new(),
            attribute_uses: Vec::new(),
            wildcard: None,
            facets: Facets::default(),
            inline_type: None,
            simple_base: None,
            derivation: None,
            simple_content: false,
            mixed: false,
        }
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    fn required_attr(&self, name: &str) -> Result<&str> {
        self.attr(name).ok_or_else(|| Error::schema(format!("{:?} without '{name}' attribute", self.construct)))
    }

    /// `(minOccurs, maxOccurs)`, `None` = unbounded.
    fn occurs(&self) -> Result<(u32, Option<u32>)> {
        let min = match self.attr("minOccurs") {
            Some(s) => s.trim().parse().map_err(|_| Error::schema(format!("invalid minOccurs '{s}'")))?,
            None => 1,
        };
        let max = match self.attr("maxOccurs").map(str::trim) {
            Some("unbounded") => None,
            Some(s) => Some(s.parse().map_err(|_| Error::schema(format!("invalid maxOccurs '{s}'")))?),
            None => Some(1),
        };
        Ok((min, max))
    }

    fn is_true(&self, name: &str) -> bool {
        matches!(self.attr(name), Some("true" | "1"))
    }
}

// ============================================================================
// SchemaBuilder
// ============================================================================

struct SchemaBuilder {
    tables: StringTables,
    stack: Vec<ElementDescription>,
    target_ns: String,
    element_form_qualified: bool,
    attribute_form_qualified: bool,
    imported: Vec<String>,
    types: Vec<TypeDef>,
    named_types: FastHashMap<QNameId, usize>,
    elements: Vec<ElementSlot>,
    global_elements: FastHashMap<QNameId, usize>,
    global_attributes: FastHashMap<QNameId, Option<TypeRef>>,
    schema_order: u32,
}

impl SchemaBuilder {
    fn new() -> Self {
        let mut builder = Self {
            tables: StringTables::new(true),
            stack: Vec::new(),
            target_ns: String::new(),
            element_form_qualified: false,
            attribute_form_qualified: false,
            imported: Vec::new(),
            types: Vec::new(),
            named_types: FastHashMap::default(),
            elements: Vec::new(),
            global_elements: FastHashMap::default(),
            global_attributes: FastHashMap::default(),
            schema_order: 0,
        };
        builder.register_builtin_types();
        builder
    }

    /// XSD-Built-ins als benannte Typen; `anyType` ist der ur-type (§8.5.4.1.3.2).
    fn register_builtin_types(&mut self) {
        for name in XSD_BUILTIN_TYPES {
            let qname = self.tables.add_qname(URI_XSD, name);
            let def = if name == "anyType" {
                let mut content = ProtoGrammar::particle(ProtoGrammar::wildcard_term(None, &mut 0), 0, None)
                    .unwrap_or_else(|_| ProtoGrammar::end_element_only());
                content.add_mixed_content();
                TypeDef::Complex {
                    name: Some(qname),
                    attribute_uses: Vec::new(),
                    wildcard: Some(None),
                    content: Content::Elements { grammar: content, mixed: false },
                    derivation: None,
                    facets: Facets::default(),
                    resolved: true,
                }
            } else {
                let vt = ValueType::for_builtin(name);
                TypeDef::Simple { name: Some(qname), base: SimpleBase::Builtin(vt), facets: Facets::default(), resolved: Some(vt) }
            };
            self.named_types.insert(qname, self.types.len());
            self.types.push(def);
        }
    }

    fn any_type(&self) -> Result<usize> {
        self.tables
            .lookup_qname(URI_XSD, "anyType")
            .and_then(|q| self.named_types.get(&q).copied())
            .ok_or_else(|| Error::inconsistent("anyType missing"))
    }

    fn top_mut(&mut self) -> Result<&mut ElementDescription> {
        self.stack.last_mut().ok_or_else(|| Error::inconsistent("schema construct stack is empty"))
    }

    fn parent_construct(&self) -> Option<SchemaConstruct> {
        self.stack.last().map(|d| d.construct)
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    fn start_element(&mut self, construct: SchemaConstruct) -> Result<()> {
        match construct {
            SchemaConstruct::Group => return Err(Error::unsupported("xs:group")),
            SchemaConstruct::AttributeGroup => return Err(Error::unsupported("xs:attributeGroup")),
            SchemaConstruct::Redefine => return Err(Error::unsupported("xs:redefine")),
            SchemaConstruct::IdentityConstraint => log::warn!("identity constraints are ignored"),
            SchemaConstruct::Include => log::warn!("xs:include is not followed"),
            _ => {}
        }
        if self.stack.is_empty() && construct != SchemaConstruct::Schema {
            return Err(Error::schema("root element must be xs:schema"));
        }
        self.stack.push(ElementDescription::new(construct));
        Ok(())
    }

    fn namespace_declaration(&mut self, prefix: Option<&str>, uri: &str) {
        if let Some(top) = self.stack.last_mut() {
            top.namespaces.push((prefix.map(str::to_owned), uri.to_owned()));
        }
    }

    fn attribute(&mut self, name: &str, value: &str) -> Result<()> {
        let top = self.top_mut()?;
        top.attributes.push((name.to_owned(), value.to_owned()));
        if top.construct == SchemaConstruct::Schema {
            match name {
                "targetNamespace" => {
                    self.target_ns = value.to_owned();
                    self.tables.add_uri(value);
                }
                "elementFormDefault" => self.element_form_qualified = value == "qualified",
                "attributeFormDefault" => self.attribute_form_qualified = value == "qualified",
                _ => {}
            }
        }
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        Err(Error::schema(format!("unexpected character content '{}'", text.trim())))
    }

    fn end_element(&mut self) -> Result<()> {
        let desc = self.stack.pop().ok_or_else(|| Error::inconsistent("end without start"))?;
        match desc.construct {
            SchemaConstruct::Schema => Ok(()),
            SchemaConstruct::Element => self.end_element_declaration(desc),
            SchemaConstruct::Attribute => self.end_attribute(desc),
            SchemaConstruct::ComplexType => self.end_complex_type(desc),
            SchemaConstruct::SimpleType => self.end_simple_type(desc),
            SchemaConstruct::ComplexContent | SchemaConstruct::SimpleContent => self.end_content(desc),
            SchemaConstruct::Extension => self.end_derivation(desc, Derivation::Extension),
            SchemaConstruct::Restriction => self.end_derivation(desc, Derivation::Restriction),
            SchemaConstruct::Sequence | SchemaConstruct::Choice | SchemaConstruct::All => self.end_model_group(desc),
            SchemaConstruct::Any => self.end_any(desc),
            SchemaConstruct::AnyAttribute => {
                let wildcard = self.namespace_constraint(&desc)?;
                self.top_mut()?.wildcard = Some(wildcard);
                Ok(())
            }
            SchemaConstruct::List => {
                self.top_mut()?.simple_base = Some(SimpleBase::List);
                Ok(())
            }
            SchemaConstruct::Union => {
                self.top_mut()?.simple_base = Some(SimpleBase::Union);
                Ok(())
            }
            SchemaConstruct::Facet(facet) => {
                let value = desc.required_attr("value")?.to_owned();
                let parent = self.top_mut()?;
                if parent.construct != SchemaConstruct::Restriction {
                    return Err(Error::schema(format!("facet {facet:?} outside of xs:restriction")));
                }
                parent.facets.add(facet, &value);
                Ok(())
            }
            SchemaConstruct::Import => {
                let ns = desc.attr("namespace").unwrap_or("").to_owned();
                log::warn!("xs:import of '{ns}': components are not loaded");
                self.tables.add_uri(&ns);
                self.imported.push(ns);
                Ok(())
            }
            SchemaConstruct::Annotation
            | SchemaConstruct::Documentation
            | SchemaConstruct::Appinfo
            | SchemaConstruct::Include
            | SchemaConstruct::IdentityConstraint
            | SchemaConstruct::Notation => Ok(()),
            SchemaConstruct::Group | SchemaConstruct::AttributeGroup | SchemaConstruct::Redefine => {
                Err(Error::inconsistent("unsupported construct reached end_element"))
            }
        }
    }

    // ========================================================================
    // Konstrukt-Handler
    // ========================================================================

    fn end_element_declaration(&mut self, desc: ElementDescription) -> Result<()> {
        let parent = self.parent_construct();
        let type_ref = match (desc.attr("type"), desc.inline_type) {
            (Some(t), _) => Some(TypeRef::Named(self.get_type_qname(t, &desc)?)),
            (None, Some(idx)) => Some(TypeRef::Anonymous(idx)),
            (None, None) => None,
        };

        if parent == Some(SchemaConstruct::Schema) {
            let name = desc.required_attr("name")?;
            let qname = self.tables.add_qname(&self.target_ns.clone(), name);
            let slot = self.global_slot(qname);
            let decl = &mut self.elements[slot];
            if decl.declared {
                return Err(Error::schema(format!("duplicate global element '{name}'")));
            }
            decl.type_ref = type_ref;
            decl.declared = true;
            return Ok(());
        }
        if !parent.is_some_and(SchemaConstruct::is_model_group) {
            return Err(Error::schema(format!("xs:element inside {parent:?}")));
        }

        let (qname, slot) = match desc.attr("ref") {
            Some(r) => {
                let qname = self.get_type_qname(r, &desc)?;
                (qname, self.global_slot(qname))
            }
            None => {
                let name = desc.required_attr("name")?;
                let qualified = match desc.attr("form") {
                    Some(form) => form == "qualified",
                    None => self.element_form_qualified,
                };
                let ns = if qualified { self.target_ns.clone() } else { String::new() };
                let qname = self.tables.add_qname(&ns, name);
                self.elements.push(ElementSlot { qname, type_ref, global: false, declared: true });
                (qname, self.elements.len() - 1)
            }
        };
        let order = self.next_order();
        let (min, max) = desc.occurs()?;
        let particle = ProtoGrammar::particle(ProtoGrammar::element_term(qname, slot, order), min, max)?;
        self.top_mut()?.grammars.push(particle);
        Ok(())
    }

    fn end_attribute(&mut self, desc: ElementDescription) -> Result<()> {
        let type_ref = match (desc.attr("type"), desc.inline_type) {
            (Some(t), _) => Some(TypeRef::Named(self.get_type_qname(t, &desc)?)),
            (None, Some(idx)) => Some(TypeRef::Anonymous(idx)),
            (None, None) => None,
        };
        match self.parent_construct() {
            Some(SchemaConstruct::Schema) => {
                let name = desc.required_attr("name")?;
                let qname = self.tables.add_qname(&self.target_ns.clone(), name);
                if self.global_attributes.insert(qname, type_ref).is_some() {
                    return Err(Error::schema(format!("duplicate global attribute '{name}'")));
                }
                Ok(())
            }
            Some(SchemaConstruct::ComplexType | SchemaConstruct::Extension | SchemaConstruct::Restriction) => {
                let use_ = desc.attr("use").unwrap_or("optional");
                if use_ == "prohibited" {
                    return Ok(());
                }
                let (qname, global_ref) = match desc.attr("ref") {
                    Some(r) => {
                        let q = self.get_type_qname(r, &desc)?;
                        (q, Some(q))
                    }
                    None => {
                        let name = desc.required_attr("name")?;
                        let qualified = match desc.attr("form") {
                            Some(form) => form == "qualified",
                            None => self.attribute_form_qualified,
                        };
                        let ns = if qualified { self.target_ns.clone() } else { String::new() };
                        (self.tables.add_qname(&ns, name), None)
                    }
                };
                self.top_mut()?.attribute_uses.push(AttributeUse {
                    qname,
                    type_ref,
                    global_ref,
                    required: use_ == "required",
                });
                Ok(())
            }
            other => Err(Error::schema(format!("xs:attribute inside {other:?}"))),
        }
    }

    fn end_complex_type(&mut self, mut desc: ElementDescription) -> Result<()> {
        let name = desc.attr("name").map(str::to_owned);
        let mixed = desc.mixed || desc.is_true("mixed");
        if desc.grammars.len() > 1 {
            return Err(Error::schema("complex type with more than one content model"));
        }
        let content = if desc.simple_content {
            Content::Simple(None)
        } else {
            match desc.grammars.pop() {
                Some(grammar) => Content::Elements { grammar, mixed },
                None if mixed => Content::Elements { grammar: ProtoGrammar::end_element_only(), mixed },
                None => Content::Empty,
            }
        };
        let def = TypeDef::Complex {
            name: None,
            attribute_uses: desc.attribute_uses,
            wildcard: desc.wildcard,
            content,
            derivation: desc.derivation,
            facets: desc.facets,
            resolved: false,
        };
        self.register_type(def, name.as_deref())
    }

    fn end_simple_type(&mut self, desc: ElementDescription) -> Result<()> {
        let base = desc.simple_base.clone().ok_or_else(|| Error::schema("xs:simpleType without restriction, list or union"))?;
        let resolved = match base {
            SimpleBase::Builtin(vt) => Some(vt),
            SimpleBase::List | SimpleBase::Union => Some(ValueType::String),
            SimpleBase::Restriction(_) => None,
        };
        let def = TypeDef::Simple { name: None, base, facets: desc.facets.clone(), resolved };
        self.register_type(def, desc.attr("name"))
    }

    /// Legt einen Typ an: benannt (global) oder als Inline-Typ des Parents.
    fn register_type(&mut self, mut def: TypeDef, name: Option<&str>) -> Result<()> {
        let idx = self.types.len();
        match (self.parent_construct(), name) {
            (Some(SchemaConstruct::Schema), Some(name)) => {
                let qname = self.tables.add_qname(&self.target_ns.clone(), name);
                match &mut def {
                    TypeDef::Simple { name, .. } | TypeDef::Complex { name, .. } => *name = Some(qname),
                }
                if self.named_types.insert(qname, idx).is_some() {
                    return Err(Error::schema(format!("duplicate type definition '{name}'")));
                }
            }
            (Some(SchemaConstruct::Schema), None) => return Err(Error::schema("global type without name")),
            _ => self.top_mut()?.inline_type = Some(idx),
        }
        self.types.push(def);
        Ok(())
    }

    fn end_content(&mut self, desc: ElementDescription) -> Result<()> {
        let simple = desc.construct == SchemaConstruct::SimpleContent;
        let mixed = desc.is_true("mixed");
        let parent = self.top_mut()?;
        parent.simple_content = simple;
        parent.mixed |= mixed;
        parent.derivation = desc.derivation;
        parent.facets = desc.facets;
        parent.grammars.extend(desc.grammars);
        parent.attribute_uses.extend(desc.attribute_uses);
        if desc.wildcard.is_some() {
            parent.wildcard = desc.wildcard;
        }
        Ok(())
    }

    fn end_derivation(&mut self, desc: ElementDescription, kind: Derivation) -> Result<()> {
        let base = match (desc.attr("base"), desc.inline_type) {
            (Some(b), _) => TypeRef::Named(self.get_type_qname(b, &desc)?),
            (None, Some(idx)) => TypeRef::Anonymous(idx),
            (None, None) => return Err(Error::schema(format!("{kind:?} without base type"))),
        };
        let parent = self.top_mut()?;
        match parent.construct {
            SchemaConstruct::SimpleType if kind == Derivation::Restriction => {
                parent.simple_base = Some(SimpleBase::Restriction(base));
                parent.facets = desc.facets;
            }
            SchemaConstruct::SimpleContent => {
                parent.derivation = Some((kind, base));
                parent.facets = desc.facets;
                parent.attribute_uses.extend(desc.attribute_uses);
                parent.wildcard = desc.wildcard;
            }
            SchemaConstruct::ComplexContent => {
                if !desc.facets.is_empty() {
                    return Err(Error::schema("facet on a type with complex content"));
                }
                parent.derivation = Some((kind, base));
                parent.grammars.extend(desc.grammars);
                parent.attribute_uses.extend(desc.attribute_uses);
                parent.wildcard = desc.wildcard;
            }
            other => return Err(Error::schema(format!("{kind:?} inside {other:?}"))),
        }
        Ok(())
    }

    fn end_model_group(&mut self, desc: ElementDescription) -> Result<()> {
        let (min, max) = desc.occurs()?;
        let term = match desc.construct {
            SchemaConstruct::Sequence => ProtoGrammar::sequence(desc.grammars),
            SchemaConstruct::Choice => ProtoGrammar::choice(desc.grammars),
            _ => ProtoGrammar::all(desc.grammars),
        };
        let particle = ProtoGrammar::particle(term, min, max)?;
        let parent = self.top_mut()?;
        match parent.construct {
            SchemaConstruct::ComplexType
            | SchemaConstruct::Extension
            | SchemaConstruct::Restriction
            | SchemaConstruct::Sequence
            | SchemaConstruct::Choice
            | SchemaConstruct::All => {
                parent.grammars.push(particle);
                Ok(())
            }
            other => Err(Error::schema(format!("model group inside {other:?}"))),
        }
    }

    fn end_any(&mut self, desc: ElementDescription) -> Result<()> {
        let wildcard = self.namespace_constraint(&desc)?;
        let (min, max) = desc.occurs()?;
        let term = ProtoGrammar::wildcard_term(wildcard.as_deref(), &mut self.schema_order);
        let particle = ProtoGrammar::particle(term, min, max)?;
        let parent = self.top_mut()?;
        if !parent.construct.is_model_group() {
            return Err(Error::schema(format!("xs:any inside {:?}", parent.construct)));
        }
        parent.grammars.push(particle);
        Ok(())
    }

    /// `namespace`-Attribut von any/anyAttribute.
    fn namespace_constraint(&mut self, desc: &ElementDescription) -> Result<Wildcard> {
        let constraint = desc.attr("namespace").unwrap_or("##any").trim();
        if constraint == "##any" || constraint == "##other" {
            return Ok(None);
        }
        let mut uris = Vec::new();
        for token in constraint.split_whitespace() {
            let uri = match token {
                "##targetNamespace" => self.target_ns.clone(),
                "##local" => String::new(),
                t if t.starts_with("##") => return Err(Error::schema(format!("invalid namespace token '{t}'"))),
                t => t.to_owned(),
            };
            let id = self.tables.add_uri(&uri);
            if !uris.contains(&id) {
                uris.push(id);
            }
        }
        Ok(Some(uris))
    }

    fn global_slot(&mut self, qname: QNameId) -> usize {
        if let Some(&slot) = self.global_elements.get(&qname) {
            return slot;
        }
        self.elements.push(ElementSlot { qname, type_ref: None, global: true, declared: false });
        let slot = self.elements.len() - 1;
        self.global_elements.insert(qname, slot);
        slot
    }

    fn next_order(&mut self) -> u32 {
        let order = self.schema_order;
        self.schema_order += 1;
        order
    }

    /// Löst einen lexikalischen QName (type, base, ref) gegen die sichtbaren
    /// Namespace-Deklarationen auf (XSD 1.0 §3.15.3, Klausel 4.1/4.2).
    fn get_type_qname(&mut self, lexical: &str, current: &ElementDescription) -> Result<QNameId> {
        let lexical = lexical.trim();
        let (prefix, local) = match lexical.split_once(':') {
            Some((p, l)) => (Some(p), l),
            None => (None, lexical),
        };
        if local.is_empty() {
            return Err(Error::schema(format!("invalid QName '{lexical}'")));
        }
        let ns = if prefix == Some("xml") {
            URI_XML.to_owned()
        } else {
            let declared = std::iter::once(current)
                .chain(self.stack.iter().rev())
                .flat_map(|d| d.namespaces.iter().rev())
                .find(|(p, _)| p.as_deref() == prefix)
                .map(|(_, uri)| uri.clone());
            match (declared, prefix) {
                (Some(uri), _) => uri,
                (None, None) => String::new(),
                (None, Some(p)) => return Err(Error::schema(format!("undeclared prefix '{p}' in '{lexical}'"))),
            }
        };
        let allowed = ns == self.target_ns || ns == XS_NS || ns == URI_XML || self.imported.contains(&ns);
        if !allowed {
            return Err(Error::schema(format!("namespace '{ns}' of '{lexical}' is neither the target namespace nor imported")));
        }
        Ok(self.tables.add_qname(&ns, local))
    }

    // ========================================================================
    // Auflösung
    // ========================================================================

    fn type_index(&self, r: TypeRef) -> Option<usize> {
        match r {
            TypeRef::Named(q) => self.named_types.get(&q).copied(),
            TypeRef::Anonymous(i) => Some(i),
        }
    }

    fn describe(&self, r: TypeRef) -> String {
        match r {
            TypeRef::Named(q) => self.tables.qname(q).map_or_else(|_| q.to_string(), |q| q.to_string()),
            TypeRef::Anonymous(i) => format!("anonymous type #{i}"),
        }
    }

    /// Value type of simple content, `None` while the base is unresolved.
    fn simple_value_type(&self, r: TypeRef) -> Result<Option<ValueType>> {
        let Some(idx) = self.type_index(r) else { return Ok(None) };
        match &self.types[idx] {
            TypeDef::Simple { resolved, .. } => Ok(*resolved),
            TypeDef::Complex { resolved: false, .. } => Ok(None),
            TypeDef::Complex { content: Content::Simple(vt), .. } => Ok(*vt),
            TypeDef::Complex { .. } => {
                Err(Error::schema(format!("{} has no simple content", self.describe(r))))
            }
        }
    }

    fn is_any_type(&self, r: TypeRef) -> bool {
        matches!(r, TypeRef::Named(q) if self.tables.lookup_qname(URI_XSD, "anyType") == Some(q))
    }

    /// Fixpunkt-Schleife: jede Runde muss mindestens einen Typ auflösen.
    fn resolve_derived_types(&mut self) -> Result<()> {
        let mut pending: Vec<usize> = (0..self.types.len()).filter(|&i| !self.types[i].is_resolved()).collect();
        while !pending.is_empty() {
            let before = pending.len();
            let mut unresolved = Vec::new();
            for idx in pending {
                if !self.resolve_type(idx)? {
                    unresolved.push(idx);
                }
            }
            if unresolved.len() == before {
                let base = match &self.types[unresolved[0]] {
                    TypeDef::Simple { base: SimpleBase::Restriction(b), .. } => self.describe(*b),
                    TypeDef::Complex { derivation: Some((_, b)), .. } => self.describe(*b),
                    _ => format!("type #{}", unresolved[0]),
                };
                return Err(Error::UnresolvedReference(base));
            }
            pending = unresolved;
            log::debug!("{} derived types left after pass", pending.len());
        }
        Ok(())
    }

    fn resolve_type(&mut self, idx: usize) -> Result<bool> {
        match self.types[idx].clone() {
            TypeDef::Simple { base: SimpleBase::Restriction(base), facets, .. } => {
                let Some(vt) = self.simple_value_type(base)? else { return Ok(false) };
                let vt = facets.apply(vt)?;
                if let TypeDef::Simple { resolved, .. } = &mut self.types[idx] {
                    *resolved = Some(vt);
                }
                Ok(true)
            }
            TypeDef::Simple { .. } => Ok(true),
            TypeDef::Complex { derivation: None, .. } => {
                self.mark_complex_resolved(idx, None, Vec::new(), None);
                Ok(true)
            }
            TypeDef::Complex { derivation: Some((kind, base)), content, facets, .. } => {
                if self.is_any_type(base) {
                    self.mark_complex_resolved(idx, None, Vec::new(), None);
                    return Ok(true);
                }
                let Some(base_idx) = self.type_index(base) else { return Ok(false) };
                if !self.types[base_idx].is_resolved() {
                    return Ok(false);
                }
                let (base_attrs, base_wildcard) = match &self.types[base_idx] {
                    TypeDef::Complex { attribute_uses, wildcard, .. } => (attribute_uses.clone(), wildcard.clone()),
                    TypeDef::Simple { .. } => (Vec::new(), None),
                };
                match content {
                    Content::Simple(_) => {
                        let Some(vt) = self.simple_value_type(base)? else { return Ok(false) };
                        let vt = match kind {
                            Derivation::Restriction => facets.apply(vt)?,
                            Derivation::Extension => vt,
                        };
                        self.mark_complex_resolved(idx, Some(vt), base_attrs, base_wildcard);
                        Ok(true)
                    }
                    _ if kind == Derivation::Extension => Err(Error::unsupported(format!(
                        "extension of complex type {}",
                        self.describe(base)
                    ))),
                    _ => {
                        self.mark_complex_resolved(idx, None, base_attrs, base_wildcard);
                        Ok(true)
                    }
                }
            }
        }
    }

    fn mark_complex_resolved(
        &mut self,
        idx: usize,
        simple: Option<ValueType>,
        inherited: Vec<AttributeUse>,
        inherited_wildcard: Option<Wildcard>,
    ) {
        if let TypeDef::Complex { attribute_uses, wildcard, content, resolved, .. } = &mut self.types[idx] {
            if let Some(vt) = simple {
                *content = Content::Simple(Some(vt));
            }
            for base_use in inherited {
                if !attribute_uses.iter().any(|u| u.qname == base_use.qname) {
                    attribute_uses.push(base_use);
                }
            }
            if wildcard.is_none() {
                *wildcard = inherited_wildcard;
            }
            *resolved = true;
        }
    }

    /// Element-Slot → Typ-Index.
    fn resolve_element_types(&self) -> Result<Vec<usize>> {
        let any_type = self.any_type()?;
        self.elements
            .iter()
            .map(|slot| {
                if !slot.declared {
                    let name = self.tables.qname(slot.qname)?;
                    return Err(Error::UnresolvedReference(name.to_string()));
                }
                match slot.type_ref {
                    None => Ok(any_type),
                    Some(r) => self.type_index(r).ok_or_else(|| Error::UnresolvedReference(self.describe(r))),
                }
            })
            .collect()
    }

    fn attribute_value_type(&self, au: &AttributeUse) -> Result<ValueType> {
        let type_ref = match au.global_ref {
            Some(q) => *self.global_attributes.get(&q).ok_or_else(|| {
                Error::UnresolvedReference(self.tables.qname(q).map_or_else(|_| q.to_string(), |n| n.to_string()))
            })?,
            None => au.type_ref,
        };
        match type_ref {
            None => Ok(ValueType::String),
            Some(r) => self.simple_value_type(r)?.ok_or_else(|| Error::UnresolvedReference(self.describe(r))),
        }
    }

    /// Full and empty proto-grammar of a resolved type.
    fn type_protos(&self, def: &TypeDef) -> Result<(ProtoGrammar, ProtoGrammar)> {
        let cmp = |a: QNameId, b: QNameId| compare_qnames(&self.tables, a, b);
        match def {
            TypeDef::Simple { resolved, .. } => {
                let vt = resolved.ok_or_else(|| Error::inconsistent("unresolved simple type"))?;
                Ok(ProtoGrammar::simple_type(vt))
            }
            TypeDef::Complex { attribute_uses, wildcard, content, .. } => {
                let mut uses = attribute_uses.clone();
                uses.sort_by(|a, b| cmp(a.qname, b.qname));
                if let Some(dup) = uses.windows(2).find(|w| w[0].qname == w[1].qname) {
                    let name = self.tables.qname(dup[0].qname)?;
                    return Err(Error::schema(format!("duplicate attribute use {name}")));
                }
                let attrs = uses
                    .iter()
                    .map(|u| Ok(ProtoGrammar::attribute_use(u.qname, self.attribute_value_type(u)?, u.required)))
                    .collect::<Result<Vec<_>>>()?;
                let content = match content {
                    Content::Empty => ProtoGrammar::end_element_only(),
                    Content::Simple(vt) => ProtoGrammar::simple_type(vt.unwrap_or(ValueType::String)).0,
                    Content::Elements { grammar, mixed } => {
                        let mut g = grammar.clone();
                        if *mixed {
                            g.add_mixed_content();
                        }
                        g
                    }
                };
                Ok(ProtoGrammar::complex_type(attrs, wildcard.as_ref().map(|w| w.as_deref()), content))
            }
        }
    }

    fn finish(mut self) -> Result<Schema> {
        self.resolve_derived_types()?;
        let element_types = self.resolve_element_types()?;

        let mut protos = self.types.iter().map(|t| self.type_protos(t)).collect::<Result<Vec<_>>>()?;

        let remap = self.tables.sort_initial();
        let tables = self.tables;
        let cmp = |a: QNameId, b: QNameId| compare_qnames(&tables, a, b);

        let mut grammars = Vec::with_capacity(protos.len() * 2);
        let resolve = |slot: usize| -> Result<usize> {
            element_types.get(slot).map(|&t| 2 * t).ok_or_else(|| Error::inconsistent("unknown element slot"))
        };
        for (full, empty) in &mut protos {
            for proto in [full, empty] {
                proto.remap(&remap);
                proto.assign_codes(&cmp);
                grammars.push(std::mem::take(proto).into_grammar(&resolve)?);
            }
        }

        let mut global_elements: Vec<GlobalElement> = self
            .elements
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.global)
            .map(|(i, slot)| GlobalElement { qname: remap.qname(slot.qname), grammar: 2 * element_types[i] })
            .collect();
        global_elements.sort_by(|a, b| cmp(a.qname, b.qname));

        let type_grammars = self
            .named_types
            .iter()
            .map(|(&q, &idx)| (remap.qname(q), TypeGrammars { full: 2 * idx, empty: 2 * idx + 1 }))
            .collect::<FastHashMap<_, _>>();

        log::debug!(
            "schema compiled: {} grammars, {} global elements, {} types",
            grammars.len(),
            global_elements.len(),
            type_grammars.len()
        );
        Schema::new(tables, grammars, global_elements, type_grammars)
    }
}

/// Lexikalischer Vergleich: erst local name, dann URI (EXI 1.0 §8.5.4.3).
fn compare_qnames(tables: &StringTables, a: QNameId, b: QNameId) -> Ordering {
    let name = |q: QNameId| tables.local_name(q).map(|s| s.as_bytes().to_vec()).unwrap_or_default();
    let uri = |q: QNameId| tables.uri(q.uri).map(|s| s.as_bytes().to_vec()).unwrap_or_default();
    name(a).cmp(&name(b)).then_with(|| uri(a).cmp(&uri(b)))
}
