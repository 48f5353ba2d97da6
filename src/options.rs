//! EXI options (EXI 1.0 §5.4, Table 5-1).
//!
//! [`ExiOptions`] steuert Encoding und Decoding eines Streams; die Werte
//! landen optional im Header (siehe [`options_codec`](crate::options_codec)).
//! [`EncoderConfig`] ergänzt die Schalter, die nur den Header betreffen.
//!
//! # Beispiel
//!
//! ```
//! use exigram::options::{Alignment, ExiOptions, Preserve};
//!
//! let opts = ExiOptions::default()
//!     .with_alignment(Alignment::ByteAlignment)
//!     .with_preserve(Preserve { comments: true, ..Preserve::default() })
//!     .with_value_max_length(1024);
//!
//! assert_eq!(opts.alignment(), Alignment::ByteAlignment);
//! assert!(opts.preserve().comments);
//! assert_eq!(opts.value_max_length(), Some(1024));
//! assert!(opts.validate().is_ok());
//! ```

use crate::{Error, Result};

/// Alignment of event codes and content items (EXI 1.0 §5.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    /// Event codes and values are packed without padding (default).
    #[default]
    BitPacked,
    /// Event codes and n-bit values occupy whole bytes.
    ByteAlignment,
    /// Channel layout of compression without DEFLATE. Read from headers,
    /// rejected by the body codec.
    PreCompression,
}

/// Schema identification for the EXI body (EXI 1.0 §5.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaId {
    /// `xsi:nil="true"`: the stream is schema-less.
    None,
    /// Empty string: only the built-in XML Schema types.
    BuiltinOnly,
    /// A user-defined schema identifier.
    Id(String),
}

/// Fidelity options (EXI 1.0 §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Preserve {
    /// CM events.
    pub comments: bool,
    /// PI events.
    pub pis: bool,
    /// DT and ER events.
    pub dtd: bool,
    /// NS events and QName prefixes.
    pub prefixes: bool,
    /// Values keep their lexical form; typed values are encoded as strings.
    pub lexical_values: bool,
}

impl Preserve {
    /// Mindestens ein Preserve-Flag ist gesetzt.
    pub fn any(&self) -> bool {
        self.comments || self.pis || self.dtd || self.prefixes || self.lexical_values
    }
}

/// EXI options (EXI 1.0 §5.4, Table 5-1).
#[derive(Debug, Clone, PartialEq)]
pub struct ExiOptions {
    pub(crate) alignment: Alignment,
    pub(crate) compression: bool,
    pub(crate) strict: bool,
    pub(crate) fragment: bool,
    pub(crate) preserve: Preserve,
    pub(crate) self_contained: bool,
    pub(crate) schema_id: Option<SchemaId>,
    pub(crate) block_size: u32,
    pub(crate) value_max_length: Option<u32>,
    pub(crate) value_partition_capacity: Option<u32>,
}

impl Default for ExiOptions {
    /// Default values of Table 5-1.
    fn default() -> Self {
        Self {
            alignment: Alignment::BitPacked,
            compression: false,
            strict: false,
            fragment: false,
            preserve: Preserve::default(),
            self_contained: false,
            schema_id: None,
            block_size: 1_000_000,
            value_max_length: None,
            value_partition_capacity: None,
        }
    }
}

impl ExiOptions {
    // --- Getter ---

    pub fn alignment(&self) -> Alignment { self.alignment }
    pub fn compression(&self) -> bool { self.compression }
    pub fn strict(&self) -> bool { self.strict }
    pub fn fragment(&self) -> bool { self.fragment }
    pub fn preserve(&self) -> &Preserve { &self.preserve }
    pub fn self_contained(&self) -> bool { self.self_contained }
    pub fn schema_id(&self) -> Option<&SchemaId> { self.schema_id.as_ref() }
    /// Block size for EXI compression (EXI 1.0 §9.1).
    pub fn block_size(&self) -> u32 { self.block_size }
    /// Strings longer than this are not added to the value tables.
    pub fn value_max_length(&self) -> Option<u32> { self.value_max_length }
    /// Total capacity of the global value partition.
    pub fn value_partition_capacity(&self) -> Option<u32> { self.value_partition_capacity }

    // --- Builder-Setter ---

    pub fn with_alignment(mut self, alignment: Alignment) -> Self { self.alignment = alignment; self }
    pub fn with_compression(mut self) -> Self { self.compression = true; self }
    pub fn with_strict(mut self) -> Self { self.strict = true; self }
    pub fn with_fragment(mut self) -> Self { self.fragment = true; self }
    pub fn with_preserve(mut self, preserve: Preserve) -> Self { self.preserve = preserve; self }
    pub fn with_self_contained(mut self) -> Self { self.self_contained = true; self }
    pub fn with_schema_id(mut self, schema_id: SchemaId) -> Self { self.schema_id = Some(schema_id); self }
    pub fn with_block_size(mut self, size: u32) -> Self { self.block_size = size; self }
    pub fn with_value_max_length(mut self, len: u32) -> Self { self.value_max_length = Some(len); self }
    pub fn with_value_partition_capacity(mut self, cap: u32) -> Self { self.value_partition_capacity = Some(cap); self }

    // --- Mutable Setter (Header-Decoding) ---

    pub(crate) fn set_alignment(&mut self, alignment: Alignment) { self.alignment = alignment; }
    pub(crate) fn set_compression(&mut self, val: bool) { self.compression = val; }
    pub(crate) fn set_strict(&mut self, val: bool) { self.strict = val; }
    pub(crate) fn set_fragment(&mut self, val: bool) { self.fragment = val; }
    pub(crate) fn preserve_mut(&mut self) -> &mut Preserve { &mut self.preserve }
    pub(crate) fn set_self_contained(&mut self, val: bool) { self.self_contained = val; }
    pub(crate) fn set_schema_id(&mut self, schema_id: Option<SchemaId>) { self.schema_id = schema_id; }
    pub(crate) fn set_block_size(&mut self, size: u32) { self.block_size = size; }
    pub(crate) fn set_value_max_length(&mut self, len: Option<u32>) { self.value_max_length = len; }
    pub(crate) fn set_value_partition_capacity(&mut self, cap: Option<u32>) { self.value_partition_capacity = cap; }

    /// Checks the constraints of EXI 1.0 §5.4.
    ///
    /// - `alignment` and `compression` exclude each other
    /// - `strict` excludes comments, pis, dtd, prefixes and selfContained
    /// - `selfContained` excludes compression and pre-compression
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::InvalidValue("blockSize must be positive".into()));
        }
        if self.compression && self.alignment != Alignment::BitPacked {
            return Err(Error::InvalidValue("alignment and compression are mutually exclusive".into()));
        }
        let p = &self.preserve;
        if self.strict && (p.comments || p.pis || p.dtd || p.prefixes || self.self_contained) {
            return Err(Error::InvalidValue("strict excludes comments, pis, dtd, prefixes and selfContained".into()));
        }
        if self.self_contained && (self.compression || self.alignment == Alignment::PreCompression) {
            return Err(Error::InvalidValue("selfContained excludes compression and pre-compression".into()));
        }
        Ok(())
    }

    /// Rejects what the body codec does not implement (DEFLATE and the
    /// channel layout of pre-compression).
    pub(crate) fn check_body_supported(&self) -> Result<()> {
        if self.compression {
            return Err(Error::unsupported("EXI compression"));
        }
        if self.alignment == Alignment::PreCompression {
            return Err(Error::unsupported("pre-compression alignment"));
        }
        Ok(())
    }

    /// Event codes and n-bit values use whole bytes (EXI 1.0 §6.2).
    pub fn byte_aligned(&self) -> bool {
        self.compression || self.alignment != Alignment::BitPacked
    }

    /// Built-in element grammars with NS, SC, ER, CM and PI productions.
    pub fn non_default_grammars(&self) -> bool {
        self.preserve.any() || self.self_contained
    }
}

/// Encoder-side settings: the options plus header layout switches.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub options: ExiOptions,
    /// Prepend the `$EXI` cookie (EXI 1.0 §5.1).
    pub include_cookie: bool,
    /// Write the options document into the header (EXI 1.0 §5.4).
    pub include_options: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self { options: ExiOptions::default(), include_cookie: false, include_options: false }
    }
}

impl EncoderConfig {
    pub fn new(options: ExiOptions) -> Self {
        Self { options, ..Self::default() }
    }

    pub fn with_cookie(mut self) -> Self {
        self.include_cookie = true;
        self
    }

    pub fn with_options_in_header(mut self) -> Self {
        self.include_options = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Defaults (Table 5-1) ====================

    #[test]
    fn defaults_match_table_5_1() {
        let opts = ExiOptions::default();
        assert_eq!(opts.alignment(), Alignment::BitPacked);
        assert!(!opts.compression());
        assert!(!opts.strict());
        assert!(!opts.fragment());
        assert!(!opts.preserve().any());
        assert!(!opts.self_contained());
        assert!(opts.schema_id().is_none());
        assert_eq!(opts.block_size(), 1_000_000);
        assert!(opts.value_max_length().is_none());
        assert!(opts.value_partition_capacity().is_none());
        assert!(opts.validate().is_ok());
    }

    // ==================== Gültige Kombinationen ====================

    #[test]
    fn strict_with_lexical_values_is_valid() {
        let opts = ExiOptions::default()
            .with_strict()
            .with_preserve(Preserve { lexical_values: true, ..Preserve::default() });
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn self_contained_with_byte_alignment_is_valid() {
        let opts = ExiOptions::default().with_self_contained().with_alignment(Alignment::ByteAlignment);
        assert!(opts.validate().is_ok());
        assert!(opts.byte_aligned());
        assert!(opts.non_default_grammars());
    }

    // ==================== Ungültige Kombinationen ====================

    #[test]
    fn compression_excludes_alignment() {
        let opts = ExiOptions::default().with_compression().with_alignment(Alignment::ByteAlignment);
        assert!(matches!(opts.validate(), Err(Error::InvalidValue(_))));
    }

    #[test]
    fn strict_excludes_fidelity_options() {
        for preserve in [
            Preserve { comments: true, ..Preserve::default() },
            Preserve { pis: true, ..Preserve::default() },
            Preserve { dtd: true, ..Preserve::default() },
            Preserve { prefixes: true, ..Preserve::default() },
        ] {
            let opts = ExiOptions::default().with_strict().with_preserve(preserve);
            assert!(opts.validate().is_err(), "{preserve:?}");
        }
        assert!(ExiOptions::default().with_strict().with_self_contained().validate().is_err());
    }

    #[test]
    fn self_contained_excludes_pre_compression() {
        let opts = ExiOptions::default().with_self_contained().with_alignment(Alignment::PreCompression);
        assert!(opts.validate().is_err());
    }

    #[test]
    fn zero_block_size_is_invalid() {
        assert!(ExiOptions::default().with_block_size(0).validate().is_err());
    }

    // ==================== Body-Unterstützung ====================

    #[test]
    fn compression_is_unsupported_in_body() {
        let opts = ExiOptions::default().with_compression();
        assert!(opts.validate().is_ok());
        assert!(matches!(opts.check_body_supported(), Err(Error::Unsupported(_))));
        let opts = ExiOptions::default().with_alignment(Alignment::PreCompression);
        assert!(matches!(opts.check_body_supported(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn lexical_values_alone_selects_non_default_grammars() {
        let opts = ExiOptions::default().with_preserve(Preserve { lexical_values: true, ..Preserve::default() });
        assert!(opts.non_default_grammars());
        assert!(!opts.byte_aligned());
    }

    #[test]
    fn encoder_config_builders() {
        let cfg = EncoderConfig::new(ExiOptions::default().with_fragment()).with_cookie().with_options_in_header();
        assert!(cfg.include_cookie);
        assert!(cfg.include_options);
        assert!(cfg.options.fragment());
    }
}
