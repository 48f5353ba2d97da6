//! String tables (EXI 1.0 §7.3, Appendix D).
//!
//! URI partition → per URI a prefix partition and a local-name partition →
//! per local name a cross table into the global value partition. All ids are
//! append-only row indices; the only exception is the global value partition
//! once `valuePartitionCapacity` is reached, where slots are reused in a ring
//! and the evicted string disappears from its local partition too.
//!
//! The wire coding of compact ids lives here as well:
//!
//! | partition  | hit                                       | miss                     |
//! |------------|-------------------------------------------|--------------------------|
//! | URI        | `id + 1` in `bits_number(uris)` bits      | `0`, then string         |
//! | prefix     | `id + 1` in `bits_number(prefixes)` bits  | `0`, then string         |
//! | local name | `0`, then `bits_number(names-1)` bits     | `len + 1`, then chars    |
//! | value      | `0` local / `1` global, then id           | `len + 2`, then chars    |

use std::cmp::Ordering;
use std::rc::Rc;

use crate::bit_width::bits_number;
use crate::bitstream::{BitReader, BitWriter};
use crate::qname::{QName, QNameId};
use crate::{Error, FastHashMap, Result, n_bit_unsigned_integer, string, unsigned_integer};

pub const URI_EMPTY: &str = "";
pub const URI_XML: &str = "http://www.w3.org/XML/1998/namespace";
pub const URI_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub const URI_XSD: &str = "http://www.w3.org/2001/XMLSchema";

pub const URI_ID_EMPTY: u32 = 0;
pub const URI_ID_XML: u32 = 1;
pub const URI_ID_XSI: u32 = 2;
pub const URI_ID_XSD: u32 = 3;

const XML_LOCAL_NAMES: [&str; 4] = ["base", "id", "lang", "space"];
const XSI_LOCAL_NAMES: [&str; 2] = ["nil", "type"];

/// Table D-5: the XSD built-in type names, in sorted order.
pub const XSD_BUILTIN_TYPES: [&str; 46] = [
    "ENTITIES", "ENTITY", "ID", "IDREF", "IDREFS", "NCName", "NMTOKEN", "NMTOKENS", "NOTATION",
    "Name", "QName", "anySimpleType", "anyType", "anyURI", "base64Binary", "boolean", "byte",
    "date", "dateTime", "decimal", "double", "duration", "float", "gDay", "gMonth", "gMonthDay",
    "gYear", "gYearMonth", "hexBinary", "int", "integer", "language", "long", "negativeInteger",
    "nonNegativeInteger", "nonPositiveInteger", "normalizedString", "positiveInteger", "short",
    "string", "time", "token", "unsignedByte", "unsignedInt", "unsignedLong", "unsignedShort",
];

/// Well-known xsi:type / xsi:nil ids.
pub const XSI_NIL: QNameId = QNameId::new(URI_ID_XSI, 0);
pub const XSI_TYPE: QNameId = QNameId::new(URI_ID_XSI, 1);

// ============================================================================
// Rows
// ============================================================================

/// One entry of a local-name partition.
#[derive(Debug, Clone)]
pub struct LocalNameRow {
    pub name: Rc<str>,
    /// Local value partition: global ids, `None` once evicted.
    pub values: Vec<Option<u32>>,
}

/// One entry of the URI partition.
#[derive(Debug, Clone)]
pub struct UriRow {
    pub uri: Rc<str>,
    pub prefixes: Vec<Rc<str>>,
    pub local_names: Vec<LocalNameRow>,
    ln_lookup: FastHashMap<Rc<str>, u32>,
}

impl UriRow {
    fn new(uri: &str) -> Self {
        Self { uri: uri.into(), prefixes: Vec::new(), local_names: Vec::new(), ln_lookup: FastHashMap::default() }
    }

    fn rebuild_lookup(&mut self) {
        self.ln_lookup = self
            .local_names
            .iter()
            .enumerate()
            .map(|(i, row)| (Rc::clone(&row.name), i as u32))
            .collect();
    }
}

#[derive(Debug, Clone)]
struct GlobalValue {
    value: Rc<str>,
    owner: QNameId,
    local_id: u32,
}

/// Global value partition with optional ring-buffer capacity.
#[derive(Debug, Clone, Default)]
struct ValueTable {
    entries: Vec<GlobalValue>,
    lookup: FastHashMap<Rc<str>, u32>,
    capacity: Option<usize>,
    /// Next slot once the capacity has been reached.
    next: usize,
}

impl ValueTable {
    /// Id count relevant for the code width (EXI 1.0 §7.3.3).
    fn size(&self) -> usize {
        self.entries.len()
    }
}

/// Old-id → new-id mapping produced by [`StringTables::sort_initial`].
#[derive(Debug, Clone, Default)]
pub struct Remap {
    uris: Vec<u32>,
    local_names: Vec<Vec<u32>>,
}

impl Remap {
    pub fn qname(&self, old: QNameId) -> QNameId {
        let uri = self.uris.get(old.uri as usize).copied().unwrap_or(old.uri);
        let local_name = self
            .local_names
            .get(old.uri as usize)
            .and_then(|m| m.get(old.local_name as usize))
            .copied()
            .unwrap_or(old.local_name);
        QNameId { uri, local_name }
    }
}

// ============================================================================
// StringTables
// ============================================================================

/// All string-table partitions of one EXI stream (or of a compiled schema).
#[derive(Debug, Clone)]
pub struct StringTables {
    uris: Vec<UriRow>,
    uri_lookup: FastHashMap<Rc<str>, u32>,
    values: ValueTable,
    value_max_length: Option<usize>,
}

impl Default for StringTables {
    fn default() -> Self {
        Self::new(false)
    }
}

impl StringTables {
    /// Initial tables (Appendix D). The XSD row is only present for
    /// schema-informed streams.
    pub fn new(schema_informed: bool) -> Self {
        let mut tables = Self {
            uris: Vec::new(),
            uri_lookup: FastHashMap::default(),
            values: ValueTable::default(),
            value_max_length: None,
        };
        let empty = tables.add_uri(URI_EMPTY);
        tables.uris[empty as usize].prefixes.push("".into());
        let xml = tables.add_uri(URI_XML);
        tables.uris[xml as usize].prefixes.push("xml".into());
        for ln in XML_LOCAL_NAMES {
            tables.add_local_name(xml, ln);
        }
        let xsi = tables.add_uri(URI_XSI);
        tables.uris[xsi as usize].prefixes.push("xsi".into());
        for ln in XSI_LOCAL_NAMES {
            tables.add_local_name(xsi, ln);
        }
        if schema_informed {
            let xsd = tables.add_uri(URI_XSD);
            for ln in XSD_BUILTIN_TYPES {
                tables.add_local_name(xsd, ln);
            }
        }
        tables
    }

    /// Applies `valueMaxLength` and `valuePartitionCapacity`.
    pub fn set_value_limits(&mut self, max_length: Option<u32>, capacity: Option<u32>) {
        self.value_max_length = max_length.map(|v| v as usize);
        self.values.capacity = capacity.map(|v| v as usize);
    }

    // --- URI ---

    pub fn lookup_uri(&self, uri: &str) -> Option<u32> {
        self.uri_lookup.get(uri).copied()
    }

    /// Appends a URI row; returns the existing id if already present.
    pub fn add_uri(&mut self, uri: &str) -> u32 {
        if let Some(id) = self.lookup_uri(uri) {
            return id;
        }
        let id = self.uris.len() as u32;
        let row = UriRow::new(uri);
        self.uri_lookup.insert(Rc::clone(&row.uri), id);
        self.uris.push(row);
        id
    }

    pub fn uri_count(&self) -> usize {
        self.uris.len()
    }

    pub fn uri(&self, id: u32) -> Option<&Rc<str>> {
        self.uris.get(id as usize).map(|r| &r.uri)
    }

    pub fn uri_row(&self, id: u32) -> Option<&UriRow> {
        self.uris.get(id as usize)
    }

    // --- Prefix ---

    pub fn lookup_prefix(&self, uri: u32, prefix: &str) -> Option<u32> {
        self.uris.get(uri as usize)?.prefixes.iter().position(|p| &**p == prefix).map(|i| i as u32)
    }

    pub fn add_prefix(&mut self, uri: u32, prefix: &str) -> Result<u32> {
        if let Some(id) = self.lookup_prefix(uri, prefix) {
            return Ok(id);
        }
        let row = self.row_mut(uri)?;
        row.prefixes.push(prefix.into());
        Ok(row.prefixes.len() as u32 - 1)
    }

    pub fn prefix_count(&self, uri: u32) -> usize {
        self.uris.get(uri as usize).map_or(0, |r| r.prefixes.len())
    }

    /// The namespace a prefix is bound to, searching all URI rows.
    pub fn uri_for_prefix(&self, prefix: &str) -> Option<u32> {
        self.uris.iter().position(|r| r.prefixes.iter().any(|p| &**p == prefix)).map(|i| i as u32)
    }

    // --- Local names ---

    pub fn lookup_local_name(&self, uri: u32, name: &str) -> Option<u32> {
        self.uris.get(uri as usize)?.ln_lookup.get(name).copied()
    }

    /// Appends a local name to the URI row; returns the existing id if present.
    ///
    /// Panics never; an unknown `uri` creates no row and returns `u32::MAX`
    /// only in debug-asserting builds.
    pub fn add_local_name(&mut self, uri: u32, name: &str) -> u32 {
        debug_assert!((uri as usize) < self.uris.len(), "unknown uri id {uri}");
        let Some(row) = self.uris.get_mut(uri as usize) else {
            return u32::MAX;
        };
        if let Some(id) = row.ln_lookup.get(name) {
            return *id;
        }
        let id = row.local_names.len() as u32;
        let name: Rc<str> = name.into();
        row.ln_lookup.insert(Rc::clone(&name), id);
        row.local_names.push(LocalNameRow { name, values: Vec::new() });
        id
    }

    pub fn local_name_count(&self, uri: u32) -> usize {
        self.uris.get(uri as usize).map_or(0, |r| r.local_names.len())
    }

    pub fn local_name(&self, id: QNameId) -> Option<&Rc<str>> {
        self.uris.get(id.uri as usize)?.local_names.get(id.local_name as usize).map(|r| &r.name)
    }

    /// Resolves `uri` and `local_name` without adding anything.
    pub fn lookup_qname(&self, uri: &str, local_name: &str) -> Option<QNameId> {
        let uri = self.lookup_uri(uri)?;
        let ln = self.lookup_local_name(uri, local_name)?;
        Some(QNameId::new(uri, ln))
    }

    /// Resolves and adds missing rows.
    pub fn add_qname(&mut self, uri: &str, local_name: &str) -> QNameId {
        let uri = self.add_uri(uri);
        let ln = self.add_local_name(uri, local_name);
        QNameId::new(uri, ln)
    }

    /// String form of an id, without prefix.
    pub fn qname(&self, id: QNameId) -> Result<QName> {
        let row = self.row(id.uri)?;
        let ln = row
            .local_names
            .get(id.local_name as usize)
            .ok_or_else(|| Error::inconsistent(format!("unknown local-name id {id}")))?;
        Ok(QName { uri: Rc::clone(&row.uri), local_name: Rc::clone(&ln.name), prefix: None })
    }

    // --- Values ---

    pub fn lookup_global_value(&self, value: &str) -> Option<u32> {
        self.values.lookup.get(value).copied()
    }

    /// Local id of `value` in the partition of `qname`.
    pub fn lookup_local_value(&self, qname: QNameId, value: &str) -> Option<u32> {
        let global = self.lookup_global_value(value)?;
        let entry = &self.values.entries[global as usize];
        (entry.owner == qname).then_some(entry.local_id)
    }

    pub fn global_value_count(&self) -> usize {
        self.values.size()
    }

    pub fn local_value_count(&self, qname: QNameId) -> usize {
        self.ln_row(qname).map_or(0, |r| r.values.len())
    }

    pub fn global_value(&self, id: u32) -> Option<&Rc<str>> {
        self.values.entries.get(id as usize).map(|e| &e.value)
    }

    pub fn local_value(&self, qname: QNameId, id: u32) -> Option<&Rc<str>> {
        let global = (*self.ln_row(qname)?.values.get(id as usize)?)?;
        self.global_value(global)
    }

    /// Adds `value` to the global partition, owned by `qname`, and returns the
    /// global id. Once the capacity is reached the oldest slot is reused and
    /// its local entry invalidated.
    pub fn add_global_value(&mut self, qname: QNameId, value: &str) -> u32 {
        let value: Rc<str> = value.into();
        let slot = match self.values.capacity {
            Some(cap) if self.values.entries.len() >= cap => {
                let slot = self.values.next;
                self.values.next = (slot + 1) % cap;
                let old = self.values.entries[slot].clone();
                self.values.lookup.remove(&*old.value);
                if let Some(row) = self.ln_row_mut(old.owner)
                    && let Some(local) = row.values.get_mut(old.local_id as usize)
                {
                    *local = None;
                }
                log::trace!("value partition wrapped, slot {slot} evicted '{}'", old.value);
                self.values.entries[slot] = GlobalValue { value: Rc::clone(&value), owner: qname, local_id: 0 };
                slot
            }
            _ => {
                self.values.entries.push(GlobalValue { value: Rc::clone(&value), owner: qname, local_id: 0 });
                self.values.entries.len() - 1
            }
        };
        self.values.lookup.insert(value, slot as u32);
        slot as u32
    }

    /// Appends `global` to the local partition of `qname`; returns the local id.
    pub fn add_local_value(&mut self, qname: QNameId, global: u32) -> Result<u32> {
        let row = self
            .ln_row_mut(qname)
            .ok_or_else(|| Error::inconsistent(format!("no local-name row for {qname}")))?;
        row.values.push(Some(global));
        let local = row.values.len() as u32 - 1;
        if let Some(entry) = self.values.entries.get_mut(global as usize) {
            entry.local_id = local;
        }
        Ok(local)
    }

    /// Adds a value to both partitions, honouring the configured limits.
    /// Returns `false` if the value was not added.
    pub fn add_value(&mut self, qname: QNameId, value: &str) -> Result<bool> {
        if value.is_empty() || self.values.capacity == Some(0) {
            return Ok(false);
        }
        if let Some(max) = self.value_max_length
            && value.chars().count() > max
        {
            log::warn!("value of {} characters exceeds valueMaxLength {max}, not added", value.chars().count());
            return Ok(false);
        }
        let global = self.add_global_value(qname, value);
        self.add_local_value(qname, global)?;
        Ok(true)
    }

    fn row(&self, uri: u32) -> Result<&UriRow> {
        self.uris.get(uri as usize).ok_or_else(|| Error::inconsistent(format!("unknown uri id {uri}")))
    }

    fn row_mut(&mut self, uri: u32) -> Result<&mut UriRow> {
        self.uris.get_mut(uri as usize).ok_or_else(|| Error::inconsistent(format!("unknown uri id {uri}")))
    }

    fn ln_row(&self, id: QNameId) -> Option<&LocalNameRow> {
        self.uris.get(id.uri as usize)?.local_names.get(id.local_name as usize)
    }

    fn ln_row_mut(&mut self, id: QNameId) -> Option<&mut LocalNameRow> {
        self.uris.get_mut(id.uri as usize)?.local_names.get_mut(id.local_name as usize)
    }

    // ========================================================================
    // Initial sort
    // ========================================================================

    /// Sorts the schema-populated rows lexicographically (raw bytes) and
    /// returns the id remapping. The built-in URI rows and the built-in name
    /// prefixes of the xml, xsi and xsd rows keep their positions.
    pub fn sort_initial(&mut self) -> Remap {
        let by_bytes = |a: &str, b: &str| -> Ordering { a.as_bytes().cmp(b.as_bytes()) };

        let mut remap = Remap { uris: Vec::new(), local_names: Vec::with_capacity(self.uris.len()) };
        for (i, row) in self.uris.iter_mut().enumerate() {
            let fixed = match i as u32 {
                URI_ID_XML => XML_LOCAL_NAMES.len(),
                URI_ID_XSI => XSI_LOCAL_NAMES.len(),
                URI_ID_XSD => XSD_BUILTIN_TYPES.len(),
                _ => 0,
            }
            .min(row.local_names.len());
            let mut order: Vec<usize> = (0..row.local_names.len()).collect();
            order[fixed..].sort_by(|&a, &b| by_bytes(&row.local_names[a].name, &row.local_names[b].name));
            let mut map = vec![0u32; order.len()];
            for (new, &old) in order.iter().enumerate() {
                map[old] = new as u32;
            }
            let mut old_rows: Vec<Option<LocalNameRow>> = row.local_names.drain(..).map(Some).collect();
            row.local_names = order.iter().filter_map(|&old| old_rows[old].take()).collect();
            row.rebuild_lookup();
            remap.local_names.push(map);
        }

        let fixed = 4.min(self.uris.len());
        let mut order: Vec<usize> = (0..self.uris.len()).collect();
        order[fixed..].sort_by(|&a, &b| by_bytes(&self.uris[a].uri, &self.uris[b].uri));
        remap.uris = vec![0; order.len()];
        for (new, &old) in order.iter().enumerate() {
            remap.uris[old] = new as u32;
        }
        let mut old_rows: Vec<Option<UriRow>> = self.uris.drain(..).map(Some).collect();
        self.uris = order.iter().filter_map(|&old| old_rows[old].take()).collect();
        // remap.local_names bleibt nach alter URI-Id indiziert
        self.uri_lookup = self.uris.iter().enumerate().map(|(i, r)| (Rc::clone(&r.uri), i as u32)).collect();
        remap
    }

    // ========================================================================
    // Wire coding
    // ========================================================================

    pub fn encode_uri(&mut self, writer: &mut BitWriter, uri: &str, byte_aligned: bool) -> u32 {
        let n = bits_number(self.uri_count() as u64);
        match self.lookup_uri(uri) {
            Some(id) => {
                n_bit_unsigned_integer::write(writer, u64::from(id) + 1, n, byte_aligned);
                id
            }
            None => {
                n_bit_unsigned_integer::write(writer, 0, n, byte_aligned);
                string::encode(writer, uri);
                self.add_uri(uri)
            }
        }
    }

    pub fn decode_uri(&mut self, reader: &mut BitReader, byte_aligned: bool) -> Result<u32> {
        let n = bits_number(self.uri_count() as u64);
        let code = n_bit_unsigned_integer::read(reader, n, byte_aligned)?;
        if code == 0 {
            let uri = string::decode(reader)?;
            return Ok(self.add_uri(&uri));
        }
        let id = (code - 1) as u32;
        if id as usize >= self.uri_count() {
            return Err(Error::InvalidValue(format!("uri id {id} out of range")));
        }
        Ok(id)
    }

    pub fn encode_local_name(&mut self, writer: &mut BitWriter, uri: u32, name: &str, byte_aligned: bool) -> u32 {
        match self.lookup_local_name(uri, name) {
            Some(id) => {
                unsigned_integer::encode(writer, 0);
                let n = bits_number(self.local_name_count(uri).saturating_sub(1) as u64);
                n_bit_unsigned_integer::write(writer, u64::from(id), n, byte_aligned);
                id
            }
            None => {
                string::encode_with_offset(writer, name, 1);
                self.add_local_name(uri, name)
            }
        }
    }

    pub fn decode_local_name(&mut self, reader: &mut BitReader, uri: u32, byte_aligned: bool) -> Result<u32> {
        let len = unsigned_integer::decode(reader)?;
        if len == 0 {
            let count = self.local_name_count(uri);
            let n = bits_number(count.saturating_sub(1) as u64);
            let id = n_bit_unsigned_integer::read(reader, n, byte_aligned)?;
            if id as usize >= count {
                return Err(Error::InvalidValue(format!("local-name id {id} out of range")));
            }
            return Ok(id as u32);
        }
        let name = string::decode_chars(reader, len - 1)?;
        self.row(uri)?;
        Ok(self.add_local_name(uri, &name))
    }

    /// URI then local name, as for SE(*) and AT(*).
    pub fn encode_qname(&mut self, writer: &mut BitWriter, qname: &QName, byte_aligned: bool) -> QNameId {
        let uri = self.encode_uri(writer, &qname.uri, byte_aligned);
        let ln = self.encode_local_name(writer, uri, &qname.local_name, byte_aligned);
        QNameId::new(uri, ln)
    }

    pub fn decode_qname(&mut self, reader: &mut BitReader, byte_aligned: bool) -> Result<QNameId> {
        let uri = self.decode_uri(reader, byte_aligned)?;
        let ln = self.decode_local_name(reader, uri, byte_aligned)?;
        Ok(QNameId::new(uri, ln))
    }

    /// Prefix of an NS event (EXI 1.0 §7.3.2).
    pub fn encode_prefix(&mut self, writer: &mut BitWriter, uri: u32, prefix: &str, byte_aligned: bool) -> Result<u32> {
        let n = bits_number(self.prefix_count(uri) as u64);
        match self.lookup_prefix(uri, prefix) {
            Some(id) => {
                n_bit_unsigned_integer::write(writer, u64::from(id) + 1, n, byte_aligned);
                Ok(id)
            }
            None => {
                n_bit_unsigned_integer::write(writer, 0, n, byte_aligned);
                string::encode(writer, prefix);
                self.add_prefix(uri, prefix)
            }
        }
    }

    pub fn decode_prefix(&mut self, reader: &mut BitReader, uri: u32, byte_aligned: bool) -> Result<Rc<str>> {
        let n = bits_number(self.prefix_count(uri) as u64);
        let code = n_bit_unsigned_integer::read(reader, n, byte_aligned)?;
        let id = if code == 0 {
            let prefix = string::decode(reader)?;
            self.add_prefix(uri, &prefix)?
        } else {
            (code - 1) as u32
        };
        self.row(uri)?
            .prefixes
            .get(id as usize)
            .cloned()
            .ok_or_else(|| Error::InvalidValue(format!("prefix id {id} out of range")))
    }

    /// Prefix component of a QName when prefixes are preserved: an n-bit id
    /// into the URI's prefix partition, omitted when the partition is empty.
    pub fn encode_qname_prefix(&self, writer: &mut BitWriter, uri: u32, prefix: Option<&str>, byte_aligned: bool) {
        let count = self.prefix_count(uri);
        if count == 0 {
            return;
        }
        let id = prefix.and_then(|p| self.lookup_prefix(uri, p)).unwrap_or(0);
        let n = bits_number(count.saturating_sub(1) as u64);
        n_bit_unsigned_integer::write(writer, u64::from(id), n, byte_aligned);
    }

    pub fn decode_qname_prefix(&self, reader: &mut BitReader, uri: u32, byte_aligned: bool) -> Result<Option<Rc<str>>> {
        let count = self.prefix_count(uri);
        if count == 0 {
            return Ok(None);
        }
        let n = bits_number(count.saturating_sub(1) as u64);
        let id = n_bit_unsigned_integer::read(reader, n, byte_aligned)?;
        Ok(self.row(uri)?.prefixes.get(id as usize).cloned())
    }

    /// String value of CH/AT content, correlated with `qname`.
    pub fn encode_value(&mut self, writer: &mut BitWriter, qname: QNameId, value: &str, byte_aligned: bool) -> Result<()> {
        if let Some(local) = self.lookup_local_value(qname, value) {
            unsigned_integer::encode(writer, 0);
            let n = bits_number(self.local_value_count(qname).saturating_sub(1) as u64);
            n_bit_unsigned_integer::write(writer, u64::from(local), n, byte_aligned);
            return Ok(());
        }
        if let Some(global) = self.lookup_global_value(value) {
            unsigned_integer::encode(writer, 1);
            let n = bits_number(self.global_value_count().saturating_sub(1) as u64);
            n_bit_unsigned_integer::write(writer, u64::from(global), n, byte_aligned);
            return Ok(());
        }
        string::encode_with_offset(writer, value, 2);
        self.add_value(qname, value)?;
        Ok(())
    }

    pub fn decode_value(&mut self, reader: &mut BitReader, qname: QNameId, byte_aligned: bool) -> Result<Rc<str>> {
        match unsigned_integer::decode(reader)? {
            0 => {
                let n = bits_number(self.local_value_count(qname).saturating_sub(1) as u64);
                let id = n_bit_unsigned_integer::read(reader, n, byte_aligned)? as u32;
                self.local_value(qname, id)
                    .cloned()
                    .ok_or_else(|| Error::InvalidValue(format!("local value id {id} out of range for {qname}")))
            }
            1 => {
                let n = bits_number(self.global_value_count().saturating_sub(1) as u64);
                let id = n_bit_unsigned_integer::read(reader, n, byte_aligned)? as u32;
                self.global_value(id)
                    .cloned()
                    .ok_or_else(|| Error::InvalidValue(format!("global value id {id} out of range")))
            }
            len => {
                let value: Rc<str> = string::decode_chars(reader, len - 2)?.into();
                self.add_value(qname, &value)?;
                Ok(value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_entries() {
        let t = StringTables::new(false);
        assert_eq!(t.uri_count(), 3);
        assert_eq!(t.local_name_count(URI_ID_EMPTY), 0);
        assert_eq!(t.lookup_local_name(URI_ID_XML, "lang"), Some(2));
        assert_eq!(t.lookup_qname(URI_XSI, "type"), Some(XSI_TYPE));

        let t = StringTables::new(true);
        assert_eq!(t.uri_count(), 4);
        assert_eq!(t.local_name_count(URI_ID_XSD), 46);
        assert_eq!(t.lookup_local_name(URI_ID_XSD, "string"), Some(39));
    }

    #[test]
    fn ids_are_append_only_and_monotonic() {
        let mut t = StringTables::new(false);
        let before = t.uri_count();
        let id = t.add_uri("urn:a");
        assert_eq!(id as usize, before);
        assert_eq!(t.add_uri("urn:a"), id);
        assert_eq!(t.uri_count(), before + 1);

        let q = t.add_qname("urn:a", "x");
        assert_eq!(q.local_name, 0);
        assert_eq!(t.add_local_name(q.uri, "y"), 1);

        for (i, v) in ["one", "two", "three"].into_iter().enumerate() {
            assert!(t.add_value(q, v).unwrap());
            assert_eq!(t.global_value_count(), i + 1);
            assert_eq!(t.lookup_local_value(q, v), Some(i as u32));
        }
    }

    #[test]
    fn uri_and_local_name_codes() {
        let mut t = StringTables::new(false);
        let mut w = BitWriter::new();
        // 3 URIs → 2 bits; "" is a hit with code 1
        t.encode_uri(&mut w, "", false);
        assert_eq!(w.bit_position(), 2);
        // miss on a new local name: len+1 = 2, then 'a'
        t.encode_local_name(&mut w, URI_ID_EMPTY, "a", false);
        // hit: 0, then bits_number(0) = 0 bits
        t.encode_local_name(&mut w, URI_ID_EMPTY, "a", false);
        let data = w.into_vec();

        let mut t = StringTables::new(false);
        let mut r = BitReader::new(&data);
        assert_eq!(t.decode_uri(&mut r, false).unwrap(), URI_ID_EMPTY);
        assert_eq!(t.decode_local_name(&mut r, URI_ID_EMPTY, false).unwrap(), 0);
        assert_eq!(t.decode_local_name(&mut r, URI_ID_EMPTY, false).unwrap(), 0);
        assert_eq!(t.local_name_count(URI_ID_EMPTY), 1);
    }

    #[test]
    fn value_codes_local_global_miss() {
        let mut enc = StringTables::new(false);
        let a = enc.add_qname("", "a");
        let b = enc.add_qname("", "b");
        let mut w = BitWriter::new();
        enc.encode_value(&mut w, a, "v", false).unwrap(); // miss
        enc.encode_value(&mut w, a, "v", false).unwrap(); // local hit
        enc.encode_value(&mut w, b, "v", false).unwrap(); // global hit
        let data = w.into_vec();
        assert_eq!(data[0], 3, "miss is len + 2");

        let mut dec = StringTables::new(false);
        let a = dec.add_qname("", "a");
        let b = dec.add_qname("", "b");
        let mut r = BitReader::new(&data);
        assert_eq!(&*dec.decode_value(&mut r, a, false).unwrap(), "v");
        assert_eq!(&*dec.decode_value(&mut r, a, false).unwrap(), "v");
        assert_eq!(&*dec.decode_value(&mut r, b, false).unwrap(), "v");
        assert_eq!(dec.global_value_count(), 1);
    }

    #[test]
    fn capacity_wraps_and_evicts_local_entry() {
        let mut t = StringTables::new(false);
        t.set_value_limits(None, Some(2));
        let q = t.add_qname("", "e");
        t.add_value(q, "a").unwrap();
        t.add_value(q, "b").unwrap();
        t.add_value(q, "c").unwrap();
        assert_eq!(t.global_value_count(), 2);
        assert_eq!(t.lookup_global_value("a"), None);
        assert_eq!(t.lookup_global_value("c"), Some(0));
        assert_eq!(t.local_value(q, 0), None, "evicted");
        assert_eq!(t.lookup_local_value(q, "c"), Some(2));
        assert_eq!(t.local_value_count(q), 3);
    }

    #[test]
    fn max_length_and_empty_values_are_not_added() {
        let mut t = StringTables::new(false);
        t.set_value_limits(Some(3), None);
        let q = t.add_qname("", "e");
        assert!(!t.add_value(q, "long").unwrap());
        assert!(!t.add_value(q, "").unwrap());
        assert!(t.add_value(q, "abc").unwrap());
        assert_eq!(t.global_value_count(), 1);
    }

    #[test]
    fn sort_initial_keeps_builtin_prefix() {
        let mut t = StringTables::new(true);
        let z = t.add_qname("urn:z", "b");
        let z2 = t.add_qname("urn:z", "a");
        let a = t.add_qname("urn:a", "x");
        let xml_extra = t.add_qname(URI_XML, "aaa");
        let remap = t.sort_initial();

        assert_eq!(t.uri(4).map(|u| &**u), Some("urn:a"));
        assert_eq!(t.uri(5).map(|u| &**u), Some("urn:z"));
        assert_eq!(remap.qname(a), QNameId::new(4, 0));
        assert_eq!(remap.qname(z), QNameId::new(5, 1));
        assert_eq!(remap.qname(z2), QNameId::new(5, 0));
        // xml: base, id, lang, space bleiben vorne
        assert_eq!(remap.qname(xml_extra), QNameId::new(URI_ID_XML, 4));
        assert_eq!(t.lookup_qname("urn:z", "a"), Some(QNameId::new(5, 0)));
        assert_eq!(t.qname(QNameId::new(5, 1)).unwrap(), QName::new("urn:z", "b"));
    }

    #[test]
    fn prefix_codes() {
        let mut t = StringTables::new(false);
        let uri = t.add_uri("urn:p");
        let mut w = BitWriter::new();
        t.encode_prefix(&mut w, uri, "p", false).unwrap();
        t.encode_prefix(&mut w, uri, "p", false).unwrap();
        let data = w.into_vec();

        let mut d = StringTables::new(false);
        let uri = d.add_uri("urn:p");
        let mut r = BitReader::new(&data);
        assert_eq!(&*d.decode_prefix(&mut r, uri, false).unwrap(), "p");
        assert_eq!(&*d.decode_prefix(&mut r, uri, false).unwrap(), "p");
        assert_eq!(d.prefix_count(uri), 1);
    }
}
