//! Bit-level stream reader and writer.
//!
//! EXI packs bits MSB first (EXI 1.0 §7.1): the first bit written lands in
//! bit 7 of the first byte. Both sides only know about bits; the choice between
//! bit-packed and byte-aligned representations is made one layer up, in
//! [`n_bit_unsigned_integer`](crate::n_bit_unsigned_integer) and the stream.

use std::io::Write;

use crate::{Error, Result};

/// Writes individual bits into a growable byte buffer, MSB first.
///
/// Bits werden in einem u64-Akkumulator gesammelt und erst als volle Bytes
/// in `buf` geschoben.
pub struct BitWriter {
    buf: Vec<u8>,
    /// Die nächsten `accum_bits` Bits, rechtsbündig (ältestes Bit links).
    accum: u64,
    /// Anzahl gültiger Bits im Akkumulator (0..=7 nach jedem Flush).
    accum_bits: u8,
}

impl BitWriter {
    /// Creates a new empty `BitWriter`.
    pub fn new() -> Self {
        Self { buf: Vec::new(), accum: 0, accum_bits: 0 }
    }

    #[inline(always)]
    fn flush_to_buf(&mut self) {
        while self.accum_bits >= 8 {
            self.accum_bits -= 8;
            self.buf.push((self.accum >> self.accum_bits) as u8);
        }
        if self.accum_bits > 0 {
            self.accum &= (1u64 << self.accum_bits) - 1;
        } else {
            self.accum = 0;
        }
    }

    /// Writes a single bit. `true` = 1, `false` = 0.
    #[inline(always)]
    pub fn write_bit(&mut self, val: bool) {
        self.accum = (self.accum << 1) | u64::from(val);
        self.accum_bits += 1;
        if self.accum_bits >= 8 {
            self.flush_to_buf();
        }
    }

    /// Writes the lower `n` bits of `val`, MSB first. `n == 0` writes nothing.
    #[inline]
    pub fn write_bits(&mut self, val: u64, n: u8) {
        debug_assert!(n <= 64, "bit count must be 0..=64, got {n}");
        if n == 0 {
            return;
        }
        let total = u16::from(self.accum_bits) + u16::from(n);
        if total <= 64 {
            self.accum = if n < 64 {
                (self.accum << n) | (val & ((1u64 << n) - 1))
            } else {
                val
            };
            self.accum_bits = total as u8;
        } else {
            // Nur bei n > 57 mit nicht-leerem Akkumulator
            let first = 64 - self.accum_bits;
            let rest = n - first;
            self.accum = (self.accum << first) | ((val >> rest) & ((1u64 << first) - 1));
            self.accum_bits = 64;
            self.flush_to_buf();
            self.accum = val & ((1u64 << rest) - 1);
            self.accum_bits = rest;
        }
        if self.accum_bits >= 8 {
            self.flush_to_buf();
        }
    }

    /// Pads with zero bits up to the next byte boundary. No-op if aligned.
    pub fn align_to_byte(&mut self) {
        if self.accum_bits > 0 {
            self.buf.push((self.accum << (8 - self.accum_bits)) as u8);
            self.accum = 0;
            self.accum_bits = 0;
        }
    }

    /// Writes one byte; takes the fast path when already aligned.
    #[inline(always)]
    pub fn write_byte(&mut self, val: u8) {
        if self.accum_bits == 0 {
            self.buf.push(val);
        } else {
            self.write_bits(u64::from(val), 8);
        }
    }

    /// Writes a byte slice, 8 bits per byte.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.accum_bits == 0 {
            self.buf.extend_from_slice(bytes);
        } else {
            for &b in bytes {
                self.write_bits(u64::from(b), 8);
            }
        }
    }

    /// Number of bits written so far.
    pub fn bit_position(&self) -> usize {
        self.buf.len() * 8 + self.accum_bits as usize
    }

    /// True when the next bit starts a new byte.
    pub fn is_aligned(&self) -> bool {
        self.accum_bits == 0
    }

    /// Writes all complete bytes into `sink` and drops them from the buffer.
    /// Partial bits stay in the accumulator.
    pub fn drain_to(&mut self, sink: &mut impl Write) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        sink.write_all(&self.buf)?;
        self.buf.clear();
        Ok(())
    }

    /// Pads the last byte with zero bits and returns the buffer.
    pub fn into_vec(mut self) -> Vec<u8> {
        self.align_to_byte();
        self.buf
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads individual bits from a byte slice, MSB first.
///
/// Der Akkumulator wird byteweise nachgeladen, linksbündig (Bit 63 = nächstes Bit).
#[derive(Clone, Copy)]
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_pos: usize,
    accum: u64,
    accum_bits: u8,
}

impl<'a> BitReader<'a> {
    /// Creates a new `BitReader` over the given byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, byte_pos: 0, accum: 0, accum_bits: 0 }
    }

    #[inline(always)]
    fn refill(&mut self) {
        while self.accum_bits <= 56 && self.byte_pos < self.data.len() {
            self.accum |= u64::from(self.data[self.byte_pos]) << (56 - self.accum_bits);
            self.byte_pos += 1;
            self.accum_bits += 8;
        }
    }

    /// Reads a single bit.
    #[inline(always)]
    pub fn read_bit(&mut self) -> Result<bool> {
        self.refill();
        if self.accum_bits == 0 {
            return Err(Error::PrematureEndOfStream);
        }
        let val = (self.accum >> 63) != 0;
        self.accum <<= 1;
        self.accum_bits -= 1;
        Ok(val)
    }

    /// Reads `n` bits, MSB first. `n == 0` returns 0 without consuming input.
    ///
    /// A short read leaves the reader untouched and returns
    /// [`Error::PrematureEndOfStream`].
    #[inline]
    pub fn read_bits(&mut self, n: u8) -> Result<u64> {
        debug_assert!(n <= 64, "bit count must be 0..=64, got {n}");
        if n == 0 {
            return Ok(0);
        }
        if usize::from(n) > self.remaining_bits() {
            return Err(Error::PrematureEndOfStream);
        }
        self.refill();
        if self.accum_bits >= n {
            let val = self.accum >> (64 - u32::from(n));
            self.accum = if n < 64 { self.accum << n } else { 0 };
            self.accum_bits -= n;
            return Ok(val);
        }
        // Zweistufig: Akkumulator leeren, nachladen, Rest lesen
        let first = self.accum_bits;
        let high = self.accum >> (64 - u32::from(first));
        self.accum = 0;
        self.accum_bits = 0;
        let rest = n - first;
        self.refill();
        let low = self.accum >> (64 - u32::from(rest));
        self.accum <<= rest;
        self.accum_bits -= rest;
        Ok((high << rest) | low)
    }

    /// Reads one byte (8 bits).
    #[inline(always)]
    pub fn read_byte(&mut self) -> Result<u8> {
        if self.accum_bits == 0 && self.byte_pos < self.data.len() {
            let val = self.data[self.byte_pos];
            self.byte_pos += 1;
            return Ok(val);
        }
        Ok(self.read_bits(8)? as u8)
    }

    /// Fills `buf` with the next bytes.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.accum_bits == 0 {
            let end = self.byte_pos + buf.len();
            if end > self.data.len() {
                return Err(Error::PrematureEndOfStream);
            }
            buf.copy_from_slice(&self.data[self.byte_pos..end]);
            self.byte_pos = end;
            return Ok(());
        }
        if buf.len() * 8 > self.remaining_bits() {
            return Err(Error::PrematureEndOfStream);
        }
        for slot in buf.iter_mut() {
            *slot = self.read_bits(8)? as u8;
        }
        Ok(())
    }

    /// Discards unread bits up to the next byte boundary.
    pub fn align_to_byte(&mut self) {
        let discard = self.accum_bits % 8;
        if discard > 0 {
            self.accum <<= discard;
            self.accum_bits -= discard;
        }
    }

    /// Current bit position from the start of the data.
    pub fn bit_position(&self) -> usize {
        self.byte_pos * 8 - self.accum_bits as usize
    }

    /// Bits left to read.
    pub fn remaining_bits(&self) -> usize {
        self.accum_bits as usize + (self.data.len() - self.byte_pos) * 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_bit_is_msb_first() {
        let mut w = BitWriter::new();
        w.write_bit(true);
        let data = w.into_vec();
        assert_eq!(data, vec![0b1000_0000]);

        let mut r = BitReader::new(&data);
        assert!(r.read_bit().unwrap());
    }

    #[test]
    fn three_bits_then_padding() {
        let mut w = BitWriter::new();
        w.write_bits(0b101, 3);
        let data = w.into_vec();
        assert_eq!(data, vec![0b1010_0000]);

        let mut r = BitReader::new(&data);
        assert_eq!(r.read_bits(3).unwrap(), 0b101);
    }

    #[test]
    fn cross_byte_boundary() {
        let mut w = BitWriter::new();
        w.write_bits(0b11, 2);
        w.write_bits(0b10_1010_1010, 10);
        let data = w.into_vec();
        assert_eq!(data, vec![0b1110_1010, 0b1010_0000]);

        let mut r = BitReader::new(&data);
        assert_eq!(r.read_bits(2).unwrap(), 0b11);
        assert_eq!(r.read_bits(10).unwrap(), 0b10_1010_1010);
    }

    #[test]
    fn sixty_four_bits_unaligned() {
        let val: u64 = 0xDEAD_BEEF_CAFE_BABE;
        let mut w = BitWriter::new();
        w.write_bits(0b101, 3);
        w.write_bits(val, 64);
        let data = w.into_vec();
        assert_eq!(data.len(), 9);

        let mut r = BitReader::new(&data);
        assert_eq!(r.read_bits(3).unwrap(), 0b101);
        assert_eq!(r.read_bits(64).unwrap(), val);
    }

    #[test]
    fn zero_bits_are_noops() {
        let mut w = BitWriter::new();
        w.write_bits(0xFF, 0);
        assert_eq!(w.bit_position(), 0);
        assert!(w.into_vec().is_empty());

        let mut r = BitReader::new(&[]);
        assert_eq!(r.read_bits(0).unwrap(), 0);
    }

    #[test]
    fn align_pads_with_zeros() {
        let mut w = BitWriter::new();
        w.write_bits(0b111, 3);
        w.align_to_byte();
        assert!(w.is_aligned());
        w.write_byte(0xAB);
        assert_eq!(w.into_vec(), vec![0b1110_0000, 0xAB]);
    }

    #[test]
    fn reader_align_skips_partial_byte() {
        let data = [0b1110_0000, 0xAB];
        let mut r = BitReader::new(&data);
        r.read_bits(3).unwrap();
        r.align_to_byte();
        assert_eq!(r.bit_position(), 8);
        assert_eq!(r.read_byte().unwrap(), 0xAB);
    }

    #[test]
    fn short_read_is_premature_end() {
        let data = [0xFF];
        let mut r = BitReader::new(&data);
        assert_eq!(r.read_bits(9), Err(Error::PrematureEndOfStream));
        // Zustand unverändert
        assert_eq!(r.read_bits(8).unwrap(), 0xFF);
        assert_eq!(r.read_bit(), Err(Error::PrematureEndOfStream));
    }

    #[test]
    fn unaligned_byte_slices() {
        let mut w = BitWriter::new();
        w.write_bit(true);
        w.write_bytes(&[0x12, 0x34]);
        let data = w.into_vec();

        let mut r = BitReader::new(&data);
        assert!(r.read_bit().unwrap());
        let mut buf = [0u8; 2];
        r.read_bytes(&mut buf).unwrap();
        assert_eq!(buf, [0x12, 0x34]);
    }

    #[test]
    fn drain_keeps_partial_bits() {
        let mut w = BitWriter::new();
        w.write_bits(0xABC, 12);
        let mut sink = Vec::new();
        w.drain_to(&mut sink).unwrap();
        assert_eq!(sink, vec![0xAB]);
        assert_eq!(w.into_vec(), vec![0xC0]);
    }
}
