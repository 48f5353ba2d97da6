//! Date-time (EXI 1.0 §7.1.8).
//!
//! Eight XML Schema kinds share one component layout; the kind selects which
//! components are on the wire (Table 7-3):
//!
//! | component       | encoding                                   |
//! |-----------------|--------------------------------------------|
//! | Year            | signed integer, offset from 2000           |
//! | MonthDay        | 9-bit, `month * 32 + day`                  |
//! | Time            | 17-bit, `(hour * 64 + minute) * 64 + sec`  |
//! | FractionalSecs  | presence bit, reversed digits as unsigned  |
//! | TimeZone        | presence bit, 11-bit, `h * 64 + m + 896`   |

use core::fmt;

use crate::bitstream::{BitReader, BitWriter};
use crate::{Error, Result, boolean, integer, n_bit_unsigned_integer, unsigned_integer};

const YEAR_OFFSET: i64 = 2000;
const MONTH_DAY_BITS: u8 = 9;
const TIME_BITS: u8 = 17;
const TIMEZONE_BITS: u8 = 11;
const TIMEZONE_OFFSET: i64 = 14 * 64;

/// The XML Schema date-time type of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateTimeKind {
    DateTime,
    Date,
    Time,
    GYear,
    GYearMonth,
    GMonthDay,
    GDay,
    GMonth,
}

impl DateTimeKind {
    fn has_year(self) -> bool {
        matches!(self, Self::GYear | Self::GYearMonth | Self::Date | Self::DateTime)
    }

    fn has_month_day(self) -> bool {
        !matches!(self, Self::GYear | Self::Time)
    }

    fn has_time(self) -> bool {
        matches!(self, Self::DateTime | Self::Time)
    }

    /// Maps an XSD built-in local name to a kind.
    pub fn from_type_name(name: &str) -> Option<Self> {
        Some(match name {
            "dateTime" => Self::DateTime,
            "date" => Self::Date,
            "time" => Self::Time,
            "gYear" => Self::GYear,
            "gYearMonth" => Self::GYearMonth,
            "gMonthDay" => Self::GMonthDay,
            "gDay" => Self::GDay,
            "gMonth" => Self::GMonth,
            _ => return None,
        })
    }
}

/// A date-time value. Components absent for the kind are `None`/zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateTime {
    pub kind: DateTimeKind,
    /// Calendar year (not the wire offset).
    pub year: i64,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Fractional second digits, reversed (`.125` → 521).
    pub fraction_reversed: Option<u64>,
    /// Offset from UTC in minutes.
    pub timezone_minutes: Option<i16>,
}

impl DateTime {
    fn empty(kind: DateTimeKind) -> Self {
        DateTime {
            kind,
            year: 0,
            month: 0,
            day: 0,
            hour: 0,
            minute: 0,
            second: 0,
            fraction_reversed: None,
            timezone_minutes: None,
        }
    }

    /// Parses the lexical form of `kind`.
    pub fn parse_lexical(kind: DateTimeKind, s: &str) -> Result<Self> {
        parse(kind, s.trim()).ok_or_else(|| Error::InvalidValue(format!("invalid {kind:?} '{s}'")))
    }
}

fn parse(kind: DateTimeKind, s: &str) -> Option<DateTime> {
    let (body, tz) = split_timezone(s)?;
    let mut dt = DateTime::empty(kind);
    dt.timezone_minutes = tz;

    let rest = match kind {
        DateTimeKind::GMonthDay | DateTimeKind::GMonth => body.strip_prefix("--")?,
        DateTimeKind::GDay => body.strip_prefix("---")?,
        _ => body,
    };

    let rest = if kind.has_year() {
        let (negative, digits) = match rest.strip_prefix('-') {
            Some(r) => (true, r),
            None => (false, rest),
        };
        let end = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
        if end < 4 {
            return None;
        }
        let year: i64 = digits[..end].parse().ok()?;
        dt.year = if negative { -year } else { year };
        &digits[end..]
    } else {
        rest
    };

    let rest = match kind {
        DateTimeKind::GYear => rest,
        DateTimeKind::GYearMonth => {
            dt.month = two_digits(rest.strip_prefix('-')?)?;
            &rest[3..]
        }
        DateTimeKind::Date | DateTimeKind::DateTime => {
            let r = rest.strip_prefix('-')?;
            dt.month = two_digits(r)?;
            let r = r.get(2..)?.strip_prefix('-')?;
            dt.day = two_digits(r)?;
            &r[2..]
        }
        DateTimeKind::GMonthDay => {
            dt.month = two_digits(rest)?;
            let r = rest.get(2..)?.strip_prefix('-')?;
            dt.day = two_digits(r)?;
            &r[2..]
        }
        DateTimeKind::GMonth => {
            dt.month = two_digits(rest)?;
            &rest[2..]
        }
        DateTimeKind::GDay => {
            dt.day = two_digits(rest)?;
            &rest[2..]
        }
        DateTimeKind::Time => rest,
    };

    let rest = match kind {
        DateTimeKind::DateTime => rest.strip_prefix('T')?,
        _ => rest,
    };

    let rest = if kind.has_time() {
        dt.hour = two_digits(rest)?;
        let r = rest.get(2..)?.strip_prefix(':')?;
        dt.minute = two_digits(r)?;
        let r = r.get(2..)?.strip_prefix(':')?;
        dt.second = two_digits(r)?;
        let r = &r[2..];
        match r.strip_prefix('.') {
            Some(frac) => {
                if frac.is_empty() || !frac.bytes().all(|c| c.is_ascii_digit()) {
                    return None;
                }
                let reversed: String = frac.trim_end_matches('0').chars().rev().collect();
                dt.fraction_reversed = Some(if reversed.is_empty() { 0 } else { reversed.parse().ok()? });
                ""
            }
            None => r,
        }
    } else {
        rest
    };

    if !rest.is_empty() {
        return None;
    }
    validate(&dt).ok()?;
    Some(dt)
}

fn two_digits(s: &str) -> Option<u8> {
    let b = s.as_bytes();
    if b.len() < 2 || !b[0].is_ascii_digit() || !b[1].is_ascii_digit() {
        return None;
    }
    Some((b[0] - b'0') * 10 + (b[1] - b'0'))
}

fn split_timezone(s: &str) -> Option<(&str, Option<i16>)> {
    if let Some(body) = s.strip_suffix('Z') {
        return Some((body, Some(0)));
    }
    let b = s.as_bytes();
    if b.len() >= 6 && matches!(b[b.len() - 6], b'+' | b'-') && b[b.len() - 3] == b':' {
        let tz = &s[s.len() - 5..];
        let hours = i16::from(two_digits(tz)?);
        let minutes = i16::from(two_digits(&tz[3..])?);
        if hours > 14 || minutes > 59 {
            return None;
        }
        let total = hours * 60 + minutes;
        let total = if b[b.len() - 6] == b'-' { -total } else { total };
        return Some((&s[..s.len() - 6], Some(total)));
    }
    Some((s, None))
}

fn validate(dt: &DateTime) -> Result<()> {
    let bad = |what: &str| Err(Error::InvalidValue(format!("{what} out of range in {:?}", dt.kind)));
    if dt.kind.has_month_day() {
        let month_ok = match dt.kind {
            DateTimeKind::GDay => dt.month == 0,
            _ => (1..=12).contains(&dt.month),
        };
        let day_ok = match dt.kind {
            DateTimeKind::GMonth | DateTimeKind::GYearMonth => dt.day <= 31,
            _ => (1..=31).contains(&dt.day),
        };
        if !month_ok {
            return bad("month");
        }
        if !day_ok {
            return bad("day");
        }
    }
    if dt.kind.has_time() && (dt.hour > 24 || dt.minute > 59 || dt.second > 60) {
        return bad("time");
    }
    Ok(())
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind.has_year() {
            if self.year < 0 {
                f.write_str("-")?;
            }
            write!(f, "{:04}", self.year.unsigned_abs())?;
        }
        match self.kind {
            DateTimeKind::GYearMonth => write!(f, "-{:02}", self.month)?,
            DateTimeKind::Date | DateTimeKind::DateTime => write!(f, "-{:02}-{:02}", self.month, self.day)?,
            DateTimeKind::GMonthDay => write!(f, "--{:02}-{:02}", self.month, self.day)?,
            DateTimeKind::GMonth => write!(f, "--{:02}", self.month)?,
            DateTimeKind::GDay => write!(f, "---{:02}", self.day)?,
            DateTimeKind::GYear | DateTimeKind::Time => {}
        }
        if self.kind == DateTimeKind::DateTime {
            f.write_str("T")?;
        }
        if self.kind.has_time() {
            write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)?;
            if let Some(frac) = self.fraction_reversed {
                let digits: String = frac.to_string().chars().rev().collect();
                write!(f, ".{digits}")?;
            }
        }
        match self.timezone_minutes {
            None => Ok(()),
            Some(0) => f.write_str("Z"),
            Some(tz) => {
                let sign = if tz < 0 { '-' } else { '+' };
                let abs = tz.unsigned_abs();
                write!(f, "{sign}{:02}:{:02}", abs / 60, abs % 60)
            }
        }
    }
}

/// Writes the components selected by `value.kind`.
pub fn encode(writer: &mut BitWriter, value: &DateTime, byte_aligned: bool) -> Result<()> {
    validate(value)?;
    let kind = value.kind;
    if kind.has_year() {
        let offset = value.year.checked_sub(YEAR_OFFSET).ok_or(Error::IntegerOverflow)?;
        integer::encode(writer, offset, byte_aligned);
    }
    if kind.has_month_day() {
        let md = u64::from(value.month) * 32 + u64::from(value.day);
        n_bit_unsigned_integer::write(writer, md, MONTH_DAY_BITS, byte_aligned);
    }
    if kind.has_time() {
        let t = (u64::from(value.hour) * 64 + u64::from(value.minute)) * 64 + u64::from(value.second);
        n_bit_unsigned_integer::write(writer, t, TIME_BITS, byte_aligned);
        boolean::encode(writer, value.fraction_reversed.is_some(), byte_aligned);
        if let Some(frac) = value.fraction_reversed {
            unsigned_integer::encode(writer, frac);
        }
    }
    boolean::encode(writer, value.timezone_minutes.is_some(), byte_aligned);
    if let Some(tz) = value.timezone_minutes {
        let tz = i64::from(tz);
        let packed = (tz / 60) * 64 + tz % 60 + TIMEZONE_OFFSET;
        let packed = u64::try_from(packed)
            .map_err(|_| Error::InvalidValue(format!("timezone offset {tz} minutes out of range")))?;
        n_bit_unsigned_integer::write(writer, packed, TIMEZONE_BITS, byte_aligned);
    }
    Ok(())
}

/// Reads a value of the given kind.
pub fn decode(reader: &mut BitReader, kind: DateTimeKind, byte_aligned: bool) -> Result<DateTime> {
    let mut dt = DateTime::empty(kind);
    if kind.has_year() {
        dt.year = integer::decode(reader, byte_aligned)?
            .checked_add(YEAR_OFFSET)
            .ok_or(Error::IntegerOverflow)?;
    }
    if kind.has_month_day() {
        let md = n_bit_unsigned_integer::read(reader, MONTH_DAY_BITS, byte_aligned)?;
        dt.month = (md / 32) as u8;
        dt.day = (md % 32) as u8;
    }
    if kind.has_time() {
        let t = n_bit_unsigned_integer::read(reader, TIME_BITS, byte_aligned)?;
        dt.second = (t % 64) as u8;
        dt.minute = ((t / 64) % 64) as u8;
        dt.hour = (t / 4096) as u8;
        if boolean::decode(reader, byte_aligned)? {
            dt.fraction_reversed = Some(unsigned_integer::decode(reader)?);
        }
    }
    if boolean::decode(reader, byte_aligned)? {
        let packed = n_bit_unsigned_integer::read(reader, TIMEZONE_BITS, byte_aligned)? as i64 - TIMEZONE_OFFSET;
        dt.timezone_minutes = Some(((packed / 64) * 60 + packed % 64) as i16);
    }
    validate(&dt)?;
    Ok(dt)
}
