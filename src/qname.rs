//! Qualified names (EXI 1.0 §7.1.7).
//!
//! [`QName`] is the string form handed to content handlers; [`QNameId`] is the
//! `Copy` form used inside grammars and the grammar pool, i.e. the URI row and
//! local-name row of the string tables.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// A qualified name: namespace URI, local name and optional prefix.
///
/// Equality and hashing ignore the prefix (EXI 1.0 §7.1.7: two qnames are
/// equal if uri and local-name are equal).
#[derive(Clone)]
pub struct QName {
    /// Namespace URI; empty for no namespace.
    pub uri: Rc<str>,
    pub local_name: Rc<str>,
    /// Only set when prefixes are preserved.
    pub prefix: Option<Rc<str>>,
}

impl QName {
    pub fn new(uri: impl Into<Rc<str>>, local_name: impl Into<Rc<str>>) -> Self {
        Self { uri: uri.into(), local_name: local_name.into(), prefix: None }
    }

    pub fn with_prefix(
        uri: impl Into<Rc<str>>,
        local_name: impl Into<Rc<str>>,
        prefix: impl Into<Rc<str>>,
    ) -> Self {
        Self { uri: uri.into(), local_name: local_name.into(), prefix: Some(prefix.into()) }
    }

    /// Ordering of attribute uses and AT productions: local name first, then URI.
    pub fn cmp_local_first(&self, other: &Self) -> Ordering {
        self.local_name.cmp(&other.local_name).then_with(|| self.uri.cmp(&other.uri))
    }
}

impl fmt::Debug for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QName({self})")
    }
}

/// Clark notation, `{uri}local`, or just `local` without namespace.
impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.uri.is_empty() {
            f.write_str(&self.local_name)
        } else {
            write!(f, "{{{}}}{}", self.uri, self.local_name)
        }
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri && self.local_name == other.local_name
    }
}

impl Eq for QName {}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uri.hash(state);
        self.local_name.hash(state);
    }
}

/// A QName resolved against the string tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QNameId {
    pub uri: u32,
    pub local_name: u32,
}

impl QNameId {
    pub const fn new(uri: u32, local_name: u32) -> Self {
        Self { uri, local_name }
    }
}

impl fmt::Display for QNameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uri, self.local_name)
    }
}
