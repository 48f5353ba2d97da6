//! EXI Header Encoding/Decoding (EXI 1.0 §5, §5.1, §5.2, §5.3).
//!
//! Der EXI Header hat folgende Struktur:
//! - [EXI Cookie] (optional): `$EXI` als 4 ASCII-Bytes (§5.1)
//! - Distinguishing Bits (required): `10` als 2 Bits (§5.2)
//! - Presence Bit (required): 1 Bit, 1=Options vorhanden (§5)
//! - EXI Format Version (required): Preview-Bit + 4-Bit-Chunks (§5.3)
//! - [EXI Options] (optional): siehe [`options_codec`](crate::options_codec)
//! - [Padding Bits] (optional): bei byte-alignment (§5)
//!
//! # Beispiel
//!
//! ```
//! use exigram::header::ExiHeader;
//!
//! let header = ExiHeader::default();
//! assert!(!header.cookie());
//! assert!(!header.preview());
//! assert_eq!(header.version(), 1);
//! ```

use std::num::NonZeroU16;

use crate::bitstream::{BitReader, BitWriter};
use crate::options::ExiOptions;
use crate::{Error, Result, n_bit_unsigned_integer, options_codec};

/// EXI Cookie als ASCII-Bytes: "$EXI"
const EXI_COOKIE: [u8; 4] = *b"$EXI";

/// Distinguishing Bits: `10` (§5.2)
const DISTINGUISHING_BITS: u8 = 0b10;

/// EXI Header (§5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExiHeader {
    cookie: bool,
    preview: bool,
    version: NonZeroU16,
    options_present: bool,
}

impl Default for ExiHeader {
    fn default() -> Self {
        Self { cookie: false, preview: false, version: NonZeroU16::MIN, options_present: false }
    }
}

impl ExiHeader {
    /// Header fuer EXI Final Version 1 ohne Cookie und ohne Options.
    pub fn new() -> Self {
        Self::default()
    }

    /// EXI Cookie vorhanden (§5.1).
    pub fn cookie(&self) -> bool {
        self.cookie
    }

    /// Preview-Version (true) oder Final-Version (false) (§5.3).
    pub fn preview(&self) -> bool {
        self.preview
    }

    /// Format-Versionsnummer, ab 1 (§5.3).
    pub fn version(&self) -> u16 {
        self.version.get()
    }

    /// EXI Options im Header vorhanden (§5).
    pub fn options_present(&self) -> bool {
        self.options_present
    }

    pub fn with_cookie(mut self) -> Self {
        self.cookie = true;
        self
    }

    pub fn with_options(mut self) -> Self {
        self.options_present = true;
        self
    }

    /// Setzt die Versionsnummer (0 wird auf 1 normalisiert).
    pub fn with_version(mut self, version: u16) -> Self {
        self.version = NonZeroU16::new(version).unwrap_or(NonZeroU16::MIN);
        self
    }

    pub fn as_preview(mut self) -> Self {
        self.preview = true;
        self
    }
}

/// Writes the header for a body with `options`.
///
/// The options document is written when `header.options_present()`; padding
/// follows when `options` are byte-aligned.
pub fn encode(writer: &mut BitWriter, header: &ExiHeader, options: &ExiOptions) -> Result<()> {
    if header.cookie {
        writer.write_bytes(&EXI_COOKIE);
    }
    writer.write_bits(u64::from(DISTINGUISHING_BITS), 2);
    writer.write_bit(header.options_present);
    encode_version(writer, header.preview, header.version.get());
    if header.options_present {
        options_codec::encode(writer, options)?;
    }
    if options.byte_aligned() {
        writer.align_to_byte();
    }
    Ok(())
}

/// Preview-Bit, dann (version - 1) als 4-Bit-Chunks; 15 heißt "weiter".
fn encode_version(writer: &mut BitWriter, preview: bool, version: u16) {
    writer.write_bit(preview);
    let mut remaining = version - 1;
    while remaining > 14 {
        n_bit_unsigned_integer::encode(writer, 15, 4);
        remaining -= 15;
    }
    n_bit_unsigned_integer::encode(writer, u64::from(remaining), 4);
}

/// Reads the header and returns it with the options that govern the body.
///
/// Without options in the header the body uses `out_of_band` (§5.4).
///
/// # Errors
///
/// - [`Error::InvalidDistinguishingBits`] wenn die Bits nicht `10` sind
/// - [`Error::UnsupportedVersion`] für Preview-Versionen und Version ≠ 1
/// - [`Error::PrematureEndOfStream`] bei unerwartetem Stream-Ende
pub fn decode(reader: &mut BitReader, out_of_band: &ExiOptions) -> Result<(ExiHeader, ExiOptions)> {
    let cookie = try_decode_cookie(reader)?;

    let dist_bits = n_bit_unsigned_integer::decode(reader, 2)? as u8;
    if dist_bits != DISTINGUISHING_BITS {
        return Err(Error::InvalidDistinguishingBits(dist_bits));
    }

    let options_present = reader.read_bit()?;
    let (preview, version) = decode_version(reader)?;
    if preview || version != 1 {
        return Err(Error::UnsupportedVersion);
    }

    let options = if options_present { options_codec::decode(reader)? } else { out_of_band.clone() };
    if options.byte_aligned() {
        reader.align_to_byte();
    }
    log::debug!("header: cookie={cookie} options_present={options_present}");
    Ok((ExiHeader { cookie, preview, version: NonZeroU16::MIN, options_present }, options))
}

/// Konsumiert `$EXI`, falls vorhanden; sonst bleibt der Reader unverändert.
///
/// Beginnt der Stream mit `$`, aber der Cookie ist abgeschnitten, gibt es
/// [`Error::PrematureEndOfStream`].
fn try_decode_cookie(reader: &mut BitReader) -> Result<bool> {
    let checkpoint = *reader;
    let mut bytes = [0u8; 4];
    for (i, byte) in bytes.iter_mut().enumerate() {
        match reader.read_byte() {
            Ok(b) => *byte = b,
            Err(e) => {
                if i > 0 && bytes[0] == EXI_COOKIE[0] {
                    return Err(e);
                }
                *reader = checkpoint;
                return Ok(false);
            }
        }
    }
    if bytes == EXI_COOKIE {
        Ok(true)
    } else {
        *reader = checkpoint;
        Ok(false)
    }
}

fn decode_version(reader: &mut BitReader) -> Result<(bool, u16)> {
    let preview = reader.read_bit()?;
    let mut version: u16 = 1;
    loop {
        let chunk = n_bit_unsigned_integer::decode(reader, 4)? as u16;
        version = version.saturating_add(chunk);
        if chunk <= 14 {
            break;
        }
    }
    Ok((preview, version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Alignment;

    fn encode_to_vec(header: &ExiHeader, options: &ExiOptions) -> Vec<u8> {
        let mut writer = BitWriter::new();
        encode(&mut writer, header, options).unwrap();
        writer.into_vec()
    }

    fn round_trip(header: &ExiHeader, options: &ExiOptions) -> (ExiHeader, ExiOptions) {
        let data = encode_to_vec(header, options);
        decode(&mut BitReader::new(&data), &ExiOptions::default()).unwrap()
    }

    fn version_round_trip(preview: bool, version: u16) -> (bool, u16) {
        let mut writer = BitWriter::new();
        encode_version(&mut writer, preview, version);
        let data = writer.into_vec();
        decode_version(&mut BitReader::new(&data)).unwrap()
    }

    // === §5.1: Cookie ===

    #[test]
    fn cookie_bytes_and_round_trip() {
        let header = ExiHeader::new().with_cookie();
        let data = encode_to_vec(&header, &ExiOptions::default());
        assert_eq!(&data[0..4], b"$EXI");
        assert!(round_trip(&header, &ExiOptions::default()).0.cookie());
    }

    /// 10 0 0 0000 = Dist-Bits + Presence=0 + Preview=0 + Version=1
    #[test]
    fn minimal_header_is_0x80() {
        let data = encode_to_vec(&ExiHeader::new(), &ExiOptions::default());
        assert_eq!(data, vec![0x80]);
        let (header, _) = decode(&mut BitReader::new(&data), &ExiOptions::default()).unwrap();
        assert!(!header.cookie());
        assert!(!header.options_present());
        assert_eq!(header.version(), 1);
    }

    // === §5.2: Distinguishing Bits ===

    /// Alles außer `10` ist kein EXI Stream, auch ohne Cookie ('A' = 0100_0001).
    #[test]
    fn only_10_starts_a_stream() {
        for first in [0x00u8, 0x40, 0xC0] {
            let err = decode(&mut BitReader::new(&[first]), &ExiOptions::default()).unwrap_err();
            assert_eq!(err, Error::InvalidDistinguishingBits(first >> 6));
        }
        let err = decode(&mut BitReader::new(b"ABC"), &ExiOptions::default()).unwrap_err();
        assert_eq!(err, Error::InvalidDistinguishingBits(1));
    }

    // === §5.3: Version ===

    #[test]
    fn version_chunks() {
        for v in [1u16, 15, 16, 17, 30, 31, 100, 1000] {
            assert_eq!(version_round_trip(false, v), (false, v));
        }
        assert_eq!(version_round_trip(true, 1), (true, 1));
    }

    /// Version 15 = `1110`, Version 16 = `1111 0000`
    #[test]
    fn version_bit_encoding() {
        let data = encode_to_vec(&ExiHeader::new().with_version(15), &ExiOptions::default());
        assert_eq!(data[0], 0x8E);
        let data = encode_to_vec(&ExiHeader::new().with_version(16), &ExiOptions::default());
        assert_eq!(data[0], 0x8F);
        assert_eq!(data[1] & 0xF0, 0x00);
    }

    #[test]
    fn preview_and_other_versions_rejected() {
        for header in [ExiHeader::new().as_preview(), ExiHeader::new().with_version(2)] {
            let data = encode_to_vec(&header, &ExiOptions::default());
            let err = decode(&mut BitReader::new(&data), &ExiOptions::default()).unwrap_err();
            assert_eq!(err, Error::UnsupportedVersion);
        }
    }

    #[test]
    fn version_zero_normalized_to_one() {
        assert_eq!(ExiHeader::new().with_version(0).version(), 1);
    }

    // === §5.4: Options ===

    #[test]
    fn options_in_header_override_out_of_band() {
        let opts = ExiOptions::default().with_strict();
        let (header, decoded) = round_trip(&ExiHeader::new().with_options(), &opts);
        assert!(header.options_present());
        assert_eq!(decoded, opts);
    }

    #[test]
    fn out_of_band_options_without_presence_bit() {
        let opts = ExiOptions::default().with_fragment();
        let data = encode_to_vec(&ExiHeader::new(), &opts);
        let (_, decoded) = decode(&mut BitReader::new(&data), &opts).unwrap();
        assert!(decoded.fragment());
    }

    /// Mit Cookie und Options: 10 1 0 0000 = 0xA0, dann Options
    #[test]
    fn cookie_with_options_encoding() {
        let data = encode_to_vec(&ExiHeader::new().with_cookie().with_options(), &ExiOptions::default());
        assert_eq!(&data[0..4], b"$EXI");
        assert_eq!(data[4], 0xA0);
    }

    // === §5: Padding ===

    #[test]
    fn byte_aligned_body_starts_on_byte_boundary() {
        let opts = ExiOptions::default().with_alignment(Alignment::ByteAlignment);
        let mut writer = BitWriter::new();
        encode(&mut writer, &ExiHeader::new().with_options(), &opts).unwrap();
        assert!(writer.is_aligned());
        writer.write_byte(0xAB);
        let data = writer.into_vec();
        let mut reader = BitReader::new(&data);
        let (_, decoded) = decode(&mut reader, &ExiOptions::default()).unwrap();
        assert_eq!(decoded.alignment(), Alignment::ByteAlignment);
        assert_eq!(reader.read_byte().unwrap(), 0xAB);
    }

    // === Abgeschnittene Header ===

    #[test]
    fn truncated_headers() {
        // leer, halber Cookie, Versions-Chunk 1111 ohne Fortsetzung
        let cases: [&[u8]; 3] = [&[], b"$EX", &[0x8F]];
        for data in cases {
            let err = decode(&mut BitReader::new(data), &ExiOptions::default()).unwrap_err();
            assert_eq!(err, Error::PrematureEndOfStream, "{data:?}");
        }
    }
}
