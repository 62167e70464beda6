//! Conversion of `+0000` programme times to another UTC offset.

use chrono::{FixedOffset, NaiveDateTime, TimeDelta};
use tracing::instrument;

use crate::model::XmltvDocument;
use crate::timestamp::DIGITS_FORMAT;

/// Suffix of the values this module rewrites.
const UTC_SUFFIX: &str = "+0000";

/// Largest accepted offset, in hours.
const MAX_OFFSET_HOURS: i32 = 14;

/// How `+0000` values are rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvertMode {
    /// Shift the wall clock by the target offset and relabel the suffix.
    #[default]
    Shift,
    /// Keep the wall clock, only relabel the suffix.
    Relabel,
}

/// Target offset parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetParseError(pub String);

impl std::fmt::Display for OffsetParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unsupported timezone {:?} (expected e.g. UTC+8, UTC-5 or UTC+5:30)",
            self.0
        )
    }
}

impl std::error::Error for OffsetParseError {}

/// Parses `UTC+8`, `utc-5` or `UTC+5:30` into a fixed offset.
///
/// # Errors
///
/// Returns `OffsetParseError` for anything else, including offsets beyond
/// 14 hours.
pub fn parse_utc_offset(value: &str) -> Result<FixedOffset, OffsetParseError> {
    let err = || OffsetParseError(value.to_owned());
    let trimmed = value.trim();
    let rest = trimmed
        .get(..3)
        .filter(|p| p.eq_ignore_ascii_case("UTC"))
        .and_then(|_| trimmed.get(3..))
        .ok_or_else(err)?;

    let (sign, body) = if let Some(body) = rest.strip_prefix('+') {
        (1, body)
    } else if let Some(body) = rest.strip_prefix('-') {
        (-1, body)
    } else {
        return Err(err());
    };

    let (hours, minutes) = body.split_once(':').unwrap_or((body, "0"));
    let hours: i32 = hours.parse().map_err(|_| err())?;
    let minutes: i32 = minutes.parse().map_err(|_| err())?;
    if !(0..=MAX_OFFSET_HOURS).contains(&hours) || !(0..60).contains(&minutes) {
        return Err(err());
    }

    let seconds = hours
        .checked_mul(3600)
        .and_then(|h| minutes.checked_mul(60).and_then(|m| h.checked_add(m)))
        .and_then(|s| s.checked_mul(sign))
        .ok_or_else(err)?;
    FixedOffset::east_opt(seconds).ok_or_else(err)
}

/// Formats an offset as an XMLTV suffix body (`+0800`).
#[must_use]
pub fn offset_suffix(offset: FixedOffset) -> String {
    let seconds = offset.local_minus_utc();
    let sign = if seconds < 0 { '-' } else { '+' };
    let minutes = seconds.unsigned_abs() / 60;
    format!("{sign}{:02}{:02}", minutes / 60, minutes % 60)
}

/// Rewrites a single `<14 digits> +0000` value, or returns `None`.
#[must_use]
pub fn convert_value(value: &str, target: FixedOffset, mode: ConvertMode) -> Option<String> {
    let mut parts = value.split_whitespace();
    let (digits, zone) = (parts.next()?, parts.next()?);
    if parts.next().is_some() || zone != UTC_SUFFIX {
        return None;
    }

    let label = offset_suffix(target);
    match mode {
        ConvertMode::Relabel => Some(format!("{digits} {label}")),
        ConvertMode::Shift => {
            let utc = NaiveDateTime::parse_from_str(digits, DIGITS_FORMAT).ok()?;
            let shifted = utc.checked_add_signed(TimeDelta::seconds(i64::from(
                target.local_minus_utc(),
            )))?;
            Some(format!("{} {label}", shifted.format(DIGITS_FORMAT)))
        }
    }
}

/// Converts every programme `start`/`stop` written with a `+0000` suffix.
/// Returns the number of rewritten attributes.
#[instrument(skip(doc))]
pub fn convert_utc_programmes(
    doc: &mut XmltvDocument,
    target: FixedOffset,
    mode: ConvertMode,
) -> usize {
    let mut converted: usize = 0;
    for programme in doc.programme_elements_mut() {
        for key in ["start", "stop"] {
            let Some(value) = programme.attr(key) else {
                continue;
            };
            if let Some(new_value) = convert_value(value, target, mode) {
                tracing::trace!(attr = key, from = value, to = %new_value, "Converted time");
                programme.set_attr(key, new_value);
                converted = converted.saturating_add(1);
            }
        }
    }
    tracing::info!(converted, target = %offset_suffix(target), "Converted UTC programme times");
    converted
}
