//! Event codes (EXI 1.0 §6.1, §6.2).
//!
//! Ein Event Code hat 1 bis 3 Teile. Jeder Teil wird als n-bit unsigned
//! integer geschrieben, `n` steht in den `bits` der Grammatikregel. Teile mit
//! 0 Bits erscheinen nicht im Stream.

use core::fmt;

use crate::Result;
use crate::bitstream::{BitReader, BitWriter};
use crate::n_bit_unsigned_integer;

/// An event code of length 1, 2 or 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventCode {
    parts: [u32; 3],
    len: u8,
}

impl EventCode {
    pub const fn one(a: u32) -> Self {
        Self { parts: [a, 0, 0], len: 1 }
    }

    pub const fn two(a: u32, b: u32) -> Self {
        Self { parts: [a, b, 0], len: 2 }
    }

    pub const fn three(a: u32, b: u32, c: u32) -> Self {
        Self { parts: [a, b, c], len: 3 }
    }

    /// Number of parts.
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Part `i` (0-based), `None` beyond the length.
    #[inline]
    pub fn part(&self, i: usize) -> Option<u32> {
        (i < self.len()).then(|| self.parts[i])
    }

    pub fn parts(&self) -> &[u32] {
        &self.parts[..self.len()]
    }

    /// Same code with the first part shifted by one, as needed when a
    /// production is inserted at code 0.
    pub fn with_first_incremented(self) -> Self {
        let mut code = self;
        code.parts[0] += 1;
        code
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts[0])?;
        for p in &self.parts[1..self.len()] {
            write!(f, ".{p}")?;
        }
        Ok(())
    }
}

/// Writes one code part of `bits` width.
#[inline]
pub fn write_part(writer: &mut BitWriter, value: u32, bits: u8, byte_aligned: bool) {
    n_bit_unsigned_integer::write(writer, u64::from(value), bits, byte_aligned);
}

/// Reads one code part of `bits` width.
#[inline]
pub fn read_part(reader: &mut BitReader, bits: u8, byte_aligned: bool) -> Result<u32> {
    Ok(n_bit_unsigned_integer::read(reader, bits, byte_aligned)? as u32)
}

/// Writes all parts of `code` with the widths in `bits`.
pub fn encode(writer: &mut BitWriter, code: EventCode, bits: &[u8; 3], byte_aligned: bool) {
    for (i, &part) in code.parts().iter().enumerate() {
        write_part(writer, part, bits[i], byte_aligned);
    }
}
