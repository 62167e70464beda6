//! Programme repair engine.
//!
//! One forward pass over the programmes of a document:
//!
//! 1. drop programmes whose `start`/`stop` fail the validity filter,
//! 2. fix rollover and `240000` stop times,
//! 3. merge programmes split at midnight into their predecessor.
//!
//! The programme list is snapshotted first and the `<tv>` root is rebuilt
//! from the survivors afterwards; channels and any other root children are
//! left untouched.

mod fixer;
mod merger;

use std::collections::HashMap;
use std::ops::AddAssign;

use chrono::NaiveTime;
use serde::Serialize;
use tracing::instrument;

pub use fixer::{StopFix, fix_end_of_day, fix_rollover, fix_stop};
pub use merger::{MergeStep, MidnightMerger, Retained, continues_across_midnight};

use crate::model::{PROGRAMME_TAG, Programme, XmltvDocument};
use crate::timestamp::is_valid_timestamp;
use crate::xml::Node;

/// Default end of the rollover window (exclusive).
pub const DEFAULT_ROLLOVER_WINDOW_END: NaiveTime = match NaiveTime::from_hms_opt(6, 0, 0) {
    Some(t) => t,
    None => NaiveTime::MIN,
};

/// Tunables of the repair pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairOptions {
    /// A stop time-of-day in `[00:00:00, rollover_window_end)` that precedes
    /// its start is treated as a missed date rollover.
    pub rollover_window_end: NaiveTime,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            rollover_window_end: DEFAULT_ROLLOVER_WINDOW_END,
        }
    }
}

/// Counters produced by one repair pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// Programmes found in the input.
    pub input_programmes: usize,
    /// Programmes dropped by the timestamp validity filter.
    pub invalid_timestamps: usize,
    /// Stop dates advanced by the rollover fix.
    pub rollover_fixes: usize,
    /// `240000` stop times rewritten.
    pub end_of_day_fixes: usize,
    /// Programmes absorbed into their predecessor.
    pub merges: usize,
    /// Programmes written to the output.
    pub output_programmes: usize,
}

impl AddAssign for RepairReport {
    fn add_assign(&mut self, rhs: Self) {
        self.input_programmes = self.input_programmes.saturating_add(rhs.input_programmes);
        self.invalid_timestamps = self
            .invalid_timestamps
            .saturating_add(rhs.invalid_timestamps);
        self.rollover_fixes = self.rollover_fixes.saturating_add(rhs.rollover_fixes);
        self.end_of_day_fixes = self.end_of_day_fixes.saturating_add(rhs.end_of_day_fixes);
        self.merges = self.merges.saturating_add(rhs.merges);
        self.output_programmes = self
            .output_programmes
            .saturating_add(rhs.output_programmes);
    }
}

/// Repair failure for a whole document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairError {
    /// No programme survived; the report says why.
    EmptyResult(RepairReport),
}

impl std::fmt::Display for RepairError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyResult(report) => write!(
                f,
                "no programmes left after repair (input: {}, invalid timestamps: {})",
                report.input_programmes, report.invalid_timestamps
            ),
        }
    }
}

impl std::error::Error for RepairError {}

/// Repairs a document in place and returns what was changed.
///
/// # Errors
///
/// Returns `RepairError::EmptyResult` when no programme survives, including
/// when the input had none.
#[instrument(skip_all)]
pub fn repair_document(
    doc: &mut XmltvDocument,
    options: &RepairOptions,
) -> Result<RepairReport, RepairError> {
    let directory = doc.channel_directory();
    let mut report = RepairReport::default();

    let snapshot: Vec<Retained> = doc
        .root()
        .children
        .iter()
        .enumerate()
        .filter_map(|(slot, node)| match node {
            Node::Element(el) if el.name == PROGRAMME_TAG => Some(Retained {
                slot,
                programme: Programme::from_element(el),
            }),
            _ => None,
        })
        .collect();
    report.input_programmes = snapshot.len();

    let mut merger = MidnightMerger::new();
    for mut entry in snapshot {
        let programme = &mut entry.programme;
        let channel_name = directory.name_of(&programme.channel);

        if !is_valid_timestamp(&programme.start) || !is_valid_timestamp(&programme.stop) {
            report.invalid_timestamps = report.invalid_timestamps.saturating_add(1);
            tracing::debug!(
                channel = channel_name,
                start = %programme.start,
                stop = %programme.stop,
                title = programme.title.as_deref().unwrap_or("-"),
                "Dropping programme with invalid timestamp"
            );
            continue;
        }

        let fix = fix_stop(&programme.start, &programme.stop, options.rollover_window_end);
        if fix.rollover {
            report.rollover_fixes = report.rollover_fixes.saturating_add(1);
        }
        if fix.end_of_day {
            report.end_of_day_fixes = report.end_of_day_fixes.saturating_add(1);
        }
        if fix.stop != programme.stop {
            tracing::debug!(
                channel = channel_name,
                start = %programme.start,
                from = %programme.stop,
                to = %fix.stop,
                rollover = fix.rollover,
                end_of_day = fix.end_of_day,
                "Corrected stop time"
            );
            programme.stop = fix.stop;
        }

        if let MergeStep::Merged(absorbed) = merger.push(entry) {
            report.merges = report.merges.saturating_add(1);
            tracing::debug!(
                channel = directory.name_of(&absorbed.channel),
                boundary = %absorbed.start,
                stop = %absorbed.stop,
                title = absorbed.title.as_deref().unwrap_or("-"),
                "Merged programme split at midnight"
            );
        }
    }

    let stops: HashMap<usize, String> = merger
        .finish()
        .into_iter()
        .map(|r| (r.slot, r.programme.stop))
        .collect();
    report.output_programmes = stops.len();

    let root = doc.root_mut();
    let children = std::mem::take(&mut root.children);
    root.children = children
        .into_iter()
        .enumerate()
        .filter_map(|(slot, node)| match node {
            Node::Element(mut el) if el.name == PROGRAMME_TAG => {
                let stop = stops.get(&slot)?;
                if el.attr("stop") != Some(stop.as_str()) {
                    el.set_attr("stop", stop.as_str());
                }
                Some(Node::Element(el))
            }
            other => Some(other),
        })
        .collect();

    if report.output_programmes == 0 {
        tracing::warn!(
            input = report.input_programmes,
            invalid = report.invalid_timestamps,
            "No programmes left after repair"
        );
        return Err(RepairError::EmptyResult(report));
    }

    tracing::info!(
        input = report.input_programmes,
        invalid = report.invalid_timestamps,
        rollover_fixes = report.rollover_fixes,
        end_of_day_fixes = report.end_of_day_fixes,
        merges = report.merges,
        output = report.output_programmes,
        "Repair completed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use super::*;
    use crate::model::Channel;

    fn parse(xml: &str) -> XmltvDocument {
        XmltvDocument::parse(xml).unwrap()
    }

    #[test]
    fn test_merges_news_split_at_midnight() {
        // Arrange
        let mut doc = parse(
            r#"<tv>
  <channel id="C1"><display-name>One</display-name></channel>
  <programme start="20240101235000" stop="20240102000000" channel="C1"><title>News</title></programme>
  <programme start="20240102000000" stop="20240102003000" channel="C1"><title>News</title></programme>
</tv>"#,
        );

        // Act
        let report = repair_document(&mut doc, &RepairOptions::default()).unwrap();

        // Assert
        let programmes = doc.programmes();
        assert_eq!(programmes.len(), 1);
        assert_eq!(programmes[0].start, "20240101235000");
        assert_eq!(programmes[0].stop, "20240102003000");
        assert_eq!(programmes[0].channel, "C1");
        assert_eq!(report.merges, 1);
        assert_eq!(report.input_programmes, 2);
        assert_eq!(report.output_programmes, 1);
    }

    #[test]
    fn test_end_of_day_stop_corrected() {
        // Arrange
        let mut doc = parse(
            r#"<tv><programme start="20240101230000" stop="20240101240000" channel="C1"><title>Late</title></programme></tv>"#,
        );

        // Act
        let report = repair_document(&mut doc, &RepairOptions::default()).unwrap();

        // Assert
        assert_eq!(doc.programmes()[0].stop, "20240102000000");
        assert_eq!(report.end_of_day_fixes, 1);
        assert_eq!(report.rollover_fixes, 0);
    }

    #[test]
    fn test_rollover_window_boundary_left_alone() {
        // Arrange
        let mut doc = parse(
            r#"<tv><programme start="20240101230000" stop="20240101060000" channel="C1"><title>X</title></programme></tv>"#,
        );

        // Act
        let report = repair_document(&mut doc, &RepairOptions::default()).unwrap();

        // Assert
        assert_eq!(doc.programmes()[0].stop, "20240101060000");
        assert_eq!(report.rollover_fixes, 0);
    }

    #[test]
    fn test_rollover_then_merge() {
        // Arrange: first piece ends at "00:00" of the wrong day
        let mut doc = parse(
            r#"<tv>
  <programme start="20240101233000 +0800" stop="20240101000000 +0800" channel="C1"><title>Film</title></programme>
  <programme start="20240102000000 +0800" stop="20240102013000 +0800" channel="C1"><title>Film</title></programme>
</tv>"#,
        );

        // Act
        let report = repair_document(&mut doc, &RepairOptions::default()).unwrap();

        // Assert
        let programmes = doc.programmes();
        assert_eq!(report.rollover_fixes, 1);
        assert_eq!(report.merges, 1);
        assert_eq!(programmes.len(), 1);
        assert_eq!(programmes[0].start, "20240101233000 +0800");
        assert_eq!(programmes[0].stop, "20240102013000 +0800");
    }

    #[test]
    fn test_sub_title_difference_prevents_merge() {
        // Arrange
        let mut doc = parse(
            r#"<tv>
  <programme start="20240101235000" stop="20240102000000" channel="C1"><title>News</title><sub-title>A</sub-title></programme>
  <programme start="20240102000000" stop="20240102003000" channel="C1"><title>News</title><sub-title>B</sub-title></programme>
</tv>"#,
        );

        // Act
        let report = repair_document(&mut doc, &RepairOptions::default()).unwrap();

        // Assert
        assert_eq!(doc.programme_count(), 2);
        assert_eq!(report.merges, 0);
    }

    #[test]
    fn test_invalid_timestamps_dropped_and_counted() {
        // Arrange
        let mut doc = parse(
            r#"<tv>
  <programme start="2024010123" stop="20240102000000" channel="C1"><title>Short</title></programme>
  <programme start="2024-01-01 10:00" stop="20240102000000" channel="C1"><title>Dashed</title></programme>
  <programme start="20240101100000" channel="C1"><title>NoStop</title></programme>
  <programme start="20240101100000" stop="20240101110000" channel="C1"><title>Good</title></programme>
</tv>"#,
        );

        // Act
        let report = repair_document(&mut doc, &RepairOptions::default()).unwrap();

        // Assert
        assert_eq!(report.invalid_timestamps, 3);
        let programmes = doc.programmes();
        assert_eq!(programmes.len(), 1);
        assert_eq!(programmes[0].title.as_deref(), Some("Good"));
    }

    #[test]
    fn test_all_invalid_is_failure() {
        // Arrange
        let mut doc = parse(
            r#"<tv>
  <channel id="C1"/>
  <programme start="bad" stop="bad" channel="C1"><title>X</title></programme>
  <programme start="20240101" stop="20240102" channel="C1"><title>Y</title></programme>
</tv>"#,
        );

        // Act
        let result = repair_document(&mut doc, &RepairOptions::default());

        // Assert
        match result {
            Err(RepairError::EmptyResult(report)) => {
                assert_eq!(report.input_programmes, 2);
                assert_eq!(report.invalid_timestamps, 2);
                assert_eq!(report.output_programmes, 0);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_empty_document_is_failure() {
        // Arrange
        let mut doc = parse(r#"<tv><channel id="C1"/></tv>"#);

        // Act
        let result = repair_document(&mut doc, &RepairOptions::default());

        // Assert
        assert!(matches!(result, Err(RepairError::EmptyResult(_))));
    }

    #[test]
    fn test_starts_never_change_and_channels_pass_through() {
        // Arrange
        let xml = r#"<tv>
  <channel id="C1"><display-name>One</display-name><icon src="one.png"/></channel>
  <programme start="20240101220000" stop="20240101010000" channel="C1"><title>A</title><desc>kept</desc></programme>
  <programme start="20240101235000" stop="20240102000000" channel="C1"><title>B</title></programme>
  <programme start="20240102000000" stop="20240102240000" channel="C1"><title>B</title></programme>
  <programme start="20240102000000" stop="20240102010000" channel="C2"><title>B</title></programme>
</tv>"#;
        let mut doc = parse(xml);
        let channels_before: Vec<Channel> = doc.channels();
        let starts_before: Vec<String> = doc.programmes().into_iter().map(|p| p.start).collect();

        // Act
        repair_document(&mut doc, &RepairOptions::default()).unwrap();

        // Assert
        assert_eq!(doc.channels(), channels_before);
        let after = doc.programmes();
        for p in &after {
            assert!(starts_before.contains(&p.start));
        }
        assert_eq!(after.len(), 3);
        assert_eq!(after[0].stop, "20240102010000");
        assert_eq!(after[1].stop, "20240103000000");
        assert_eq!(after[2].channel, "C2");
        let desc = doc
            .root()
            .child_elements()
            .find(|el| el.name == PROGRAMME_TAG)
            .and_then(|el| el.first_child("desc"))
            .map(crate::xml::Element::text);
        assert_eq!(desc.as_deref(), Some("kept"));
    }

    #[test]
    fn test_configured_window_applies() {
        // Arrange
        let mut doc = parse(
            r#"<tv><programme start="20240101230000" stop="20240101063000" channel="C1"><title>X</title></programme></tv>"#,
        );
        let options = RepairOptions {
            rollover_window_end: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        };

        // Act
        let report = repair_document(&mut doc, &options).unwrap();

        // Assert
        assert_eq!(report.rollover_fixes, 1);
        assert_eq!(doc.programmes()[0].stop, "20240102063000");
    }

    #[test]
    fn test_repair_is_stable_on_second_pass() {
        // Arrange
        let mut doc = parse(
            r#"<tv>
  <programme start="20240101233000" stop="20240101003000" channel="C1"><title>A</title></programme>
  <programme start="20240102003000" stop="20240102240000" channel="C1"><title>B</title></programme>
  <programme start="20240103000000" stop="20240103010000" channel="C1"><title>B</title></programme>
</tv>"#,
        );
        repair_document(&mut doc, &RepairOptions::default()).unwrap();
        let first = doc.clone();

        // Act
        let report = repair_document(&mut doc, &RepairOptions::default()).unwrap();

        // Assert
        assert_eq!(doc, first);
        assert_eq!(report.rollover_fixes, 0);
        assert_eq!(report.end_of_day_fixes, 0);
        assert_eq!(report.merges, 0);
    }

    #[test]
    fn test_report_add_assign() {
        // Arrange
        let mut total = RepairReport {
            input_programmes: 3,
            merges: 1,
            ..RepairReport::default()
        };
        let other = RepairReport {
            input_programmes: 2,
            invalid_timestamps: 1,
            output_programmes: 1,
            ..RepairReport::default()
        };

        // Act
        total += other;

        // Assert
        assert_eq!(total.input_programmes, 5);
        assert_eq!(total.invalid_timestamps, 1);
        assert_eq!(total.merges, 1);
        assert_eq!(total.output_programmes, 1);
    }

    #[test]
    fn test_report_serializes_to_json() {
        // Arrange
        let report = RepairReport {
            merges: 2,
            ..RepairReport::default()
        };

        // Act
        let json = serde_json::to_value(report).unwrap();

        // Assert
        assert_eq!(json["merges"], 2);
        assert_eq!(json["invalid_timestamps"], 0);
    }
}
