//! Stop-time corrections.

use std::cmp::Ordering;

use chrono::{NaiveDate, NaiveTime};

use crate::timestamp::{date_digits, parse_timestamp, suffix, time_digits};

/// Literal time digits some feeds use for "end of day".
const END_OF_DAY_DIGITS: &str = "240000";

/// Result of running both fixes over one programme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopFix {
    /// Possibly rewritten stop value.
    pub stop: String,
    /// The date was advanced by the rollover fix.
    pub rollover: bool,
    /// A `240000` time was rewritten to `000000` of the next day.
    pub end_of_day: bool,
}

/// Advances the stop date by one day when the feed forgot to roll it over.
///
/// Applies only when `stop` is strictly earlier than `start`, stop's
/// time-of-day is before `window_end`, and stop's `HHMMSS` digits sort
/// before start's. Time-of-day and suffix are kept. Both values must have
/// passed the validity filter.
#[must_use]
pub fn fix_rollover(start: &str, stop: &str, window_end: NaiveTime) -> Option<String> {
    let (Ok(start_ts), Ok(stop_ts)) = (parse_timestamp(start), parse_timestamp(stop)) else {
        return None;
    };
    if stop_ts.cmp_instant(&start_ts) != Ordering::Less {
        return None;
    }
    if stop_ts.local.time() >= window_end {
        return None;
    }

    let stop_hms = time_digits(stop)?;
    if stop_hms >= time_digits(start)? {
        return None;
    }

    let next_day = stop_ts.local.date().succ_opt()?;
    Some(format!(
        "{}{}{}",
        next_day.format("%Y%m%d"),
        stop_hms,
        suffix(stop)
    ))
}

/// Rewrites `YYYYMMDD240000` to the next day's `000000`, keeping the suffix.
#[must_use]
pub fn fix_end_of_day(stop: &str) -> Option<String> {
    if time_digits(stop)? != END_OF_DAY_DIGITS {
        return None;
    }
    let date = NaiveDate::parse_from_str(date_digits(stop)?, "%Y%m%d").ok()?;
    let next_day = date.succ_opt()?;
    Some(format!("{}000000{}", next_day.format("%Y%m%d"), suffix(stop)))
}

/// Runs the rollover fix, then the end-of-day fix on the updated stop.
#[must_use]
pub fn fix_stop(start: &str, stop: &str, window_end: NaiveTime) -> StopFix {
    let mut fix = StopFix {
        stop: stop.to_owned(),
        rollover: false,
        end_of_day: false,
    };

    if let Some(fixed) = fix_rollover(start, &fix.stop, window_end) {
        fix.stop = fixed;
        fix.rollover = true;
    }
    if let Some(fixed) = fix_end_of_day(&fix.stop) {
        fix.stop = fixed;
        fix.end_of_day = true;
    }
    fix
}
