//! XMLTV timestamp handling.
//!
//! XMLTV times are `YYYYMMDDHHMMSS` followed by an optional offset such as
//! ` +0800`. Feeds in the wild also use `+08:00`, zone abbreviations, or
//! append garbage after the digits.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset, NaiveDateTime};

/// Number of leading digits in an XMLTV timestamp.
pub const TIMESTAMP_DIGITS: usize = 14;

/// Length of the `YYYYMMDD` prefix.
pub const DATE_DIGITS: usize = 8;

/// `strftime` layout of the digit part.
pub const DIGITS_FORMAT: &str = "%Y%m%d%H%M%S";

/// Offset-carrying layouts, tried before the bare layout.
const NUMERIC_OFFSET_FORMATS: &[&str] = &["%Y%m%d%H%M%S %z", "%Y%m%d%H%M%S%z"];

/// `+HH:MM` layouts, tried after the bare layout.
const COLON_OFFSET_FORMATS: &[&str] = &["%Y%m%d%H%M%S %:z", "%Y%m%d%H%M%S%:z"];

/// Zone abbreviations accepted after the digits, with their UTC offset in seconds.
const ZONE_ABBREVIATIONS: &[(&str, i32)] = &[
    ("UTC", 0),
    ("GMT", 0),
    ("Z", 0),
    ("CST", 8 * 3600),
    ("HKT", 8 * 3600),
    ("SGT", 8 * 3600),
    ("MYT", 8 * 3600),
    ("JST", 9 * 3600),
    ("KST", 9 * 3600),
];

/// Timestamp parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampError {
    /// The value does not start with 14 digits.
    Malformed(String),
    /// The digits do not form a valid calendar date/time.
    OutOfRange(String),
}

impl std::fmt::Display for TimestampError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(v) => write!(f, "malformed XMLTV timestamp: {v:?}"),
            Self::OutOfRange(v) => write!(f, "XMLTV timestamp out of range: {v:?}"),
        }
    }
}

impl std::error::Error for TimestampError {}

/// A parsed XMLTV timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    /// Wall-clock value as written in the feed.
    pub local: NaiveDateTime,
    /// UTC offset, when the value carried one.
    pub offset: Option<FixedOffset>,
}

impl Timestamp {
    /// Compares two timestamps as instants.
    ///
    /// When both sides carry an offset they are compared in UTC; otherwise
    /// the wall-clock values are compared.
    #[must_use]
    pub fn cmp_instant(&self, other: &Self) -> Ordering {
        match (self.offset, other.offset) {
            (Some(a), Some(b)) => {
                let lhs = self.local.and_local_timezone(a).single();
                let rhs = other.local.and_local_timezone(b).single();
                match (lhs, rhs) {
                    (Some(l), Some(r)) => l.cmp(&r),
                    _ => self.local.cmp(&other.local),
                }
            }
            _ => self.local.cmp(&other.local),
        }
    }

    /// Formats the wall-clock digits (`YYYYMMDDHHMMSS`).
    #[must_use]
    pub fn digits(&self) -> String {
        self.local.format(DIGITS_FORMAT).to_string()
    }
}

/// Cheap validity filter applied before any parsing.
///
/// Accepts values of at least 14 bytes whose first 14 characters are
/// ASCII digits.
#[must_use]
pub fn is_valid_timestamp(value: &str) -> bool {
    value
        .as_bytes()
        .get(..TIMESTAMP_DIGITS)
        .is_some_and(|digits| digits.iter().all(u8::is_ascii_digit))
}

/// Parses an XMLTV timestamp.
///
/// Layouts are tried in order: digits with a numeric offset (`+0800`),
/// bare digits, digits with a `+08:00` offset or a zone abbreviation, and
/// finally the leading 14 digits alone.
///
/// # Errors
///
/// Returns `TimestampError::Malformed` when the value does not start with
/// 14 digits, or `TimestampError::OutOfRange` when the digits are not a
/// valid date/time (e.g. `240000`).
pub fn parse_timestamp(value: &str) -> Result<Timestamp, TimestampError> {
    let trimmed = value.trim();

    for format in NUMERIC_OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, format) {
            return Ok(from_datetime(dt));
        }
    }

    if let Ok(local) = NaiveDateTime::parse_from_str(trimmed, DIGITS_FORMAT) {
        return Ok(Timestamp {
            local,
            offset: None,
        });
    }

    for format in COLON_OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, format) {
            return Ok(from_datetime(dt));
        }
    }

    if !is_valid_timestamp(trimmed) {
        return Err(TimestampError::Malformed(value.to_owned()));
    }
    let (digits, suffix) = trimmed.split_at(TIMESTAMP_DIGITS);
    let local = NaiveDateTime::parse_from_str(digits, DIGITS_FORMAT)
        .map_err(|_| TimestampError::OutOfRange(value.to_owned()))?;

    let offset = zone_abbreviation_offset(suffix.trim());
    if offset.is_none() && !suffix.trim().is_empty() {
        tracing::trace!(value, "Unrecognised timestamp suffix, using leading digits");
    }
    Ok(Timestamp { local, offset })
}

/// Looks up a zone abbreviation.
fn zone_abbreviation_offset(suffix: &str) -> Option<FixedOffset> {
    ZONE_ABBREVIATIONS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(suffix))
        .and_then(|&(_, secs)| FixedOffset::east_opt(secs))
}

fn from_datetime(dt: DateTime<FixedOffset>) -> Timestamp {
    Timestamp {
        local: dt.naive_local(),
        offset: Some(*dt.offset()),
    }
}

/// `YYYYMMDD` digits of a value that passed [`is_valid_timestamp`].
#[must_use]
pub fn date_digits(value: &str) -> Option<&str> {
    value.get(..DATE_DIGITS)
}

/// `HHMMSS` digits of a value that passed [`is_valid_timestamp`].
#[must_use]
pub fn time_digits(value: &str) -> Option<&str> {
    value.get(DATE_DIGITS..TIMESTAMP_DIGITS)
}

/// Everything after the 14 digits (offset, zone name, ...), verbatim.
#[must_use]
pub fn suffix(value: &str) -> &str {
    value.get(TIMESTAMP_DIGITS..).unwrap_or_default()
}
