//! Bitbreiten-Berechnung fuer Event Codes und String-Table-Indizes.
//!
//! Zwei Sichtweisen auf dieselbe Zahl:
//! - [`bits_number`]: Bitlaenge eines Wertes (`v = 0` braucht 0 Bits),
//!   so werden die Breiten der String-Table-Codes gebildet.
//! - [`for_count`]: `⌈log₂(n)⌉` fuer `n` Alternativen, wie bei Event-Code-Teilen.
//!
//! Es gilt `for_count(n) == bits_number(n - 1)` fuer `n >= 1`.

/// Number of bits needed to write `value` in binary; 0 for `value == 0`.
///
/// - `0` → 0, `1` → 1, `2..=3` → 2, `4..=7` → 3, ...
#[inline]
pub fn bits_number(value: u64) -> u8 {
    (u64::BITS - value.leading_zeros()) as u8
}

/// Bits needed to distinguish `n` alternatives: `⌈log₂(n)⌉`, 0 for `n <= 1`.
#[inline]
pub fn for_count(n: usize) -> u8 {
    if n <= 1 {
        0
    } else {
        (usize::BITS - (n - 1).leading_zeros()) as u8
    }
}
