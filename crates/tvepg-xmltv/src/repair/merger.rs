//! Midnight split-programme merging.

use crate::model::Programme;
use crate::timestamp::time_digits;

/// Time digits of a midnight boundary.
const MIDNIGHT_DIGITS: &str = "000000";

/// A programme that survived validation, tagged with its position in the
/// `<tv>` root so the document can be rebuilt afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retained {
    /// Index of the programme node among the root's children.
    pub slot: usize,
    /// Programme fields, with the stop already fixed.
    pub programme: Programme,
}

/// Outcome of feeding one programme to the merger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStep {
    /// The programme became the new lookback entry.
    Buffered,
    /// The programme was absorbed by the lookback entry and discarded.
    Merged(Programme),
}

/// Returns true when `current` continues `previous` across midnight.
///
/// The boundary is compared as text, so `20240102000000 +0800` and
/// `20240102000000 +0000` never match.
#[must_use]
pub fn continues_across_midnight(previous: &Programme, current: &Programme) -> bool {
    previous.stop == current.start
        && time_digits(&current.start) == Some(MIDNIGHT_DIGITS)
        && previous.channel == current.channel
        && match (&previous.title, &current.title) {
            (Some(a), Some(b)) => a.trim() == b.trim(),
            _ => false,
        }
        && previous.sub_title.as_deref().unwrap_or_default().trim()
            == current.sub_title.as_deref().unwrap_or_default().trim()
}

/// Single-pass merger with a one-element lookback buffer.
///
/// Chains of splits collapse pairwise: the buffered programme absorbs each
/// following piece for as long as the boundary conditions hold.
#[derive(Debug, Default)]
pub struct MidnightMerger {
    pending: Option<Retained>,
    emitted: Vec<Retained>,
}

impl MidnightMerger {
    /// Creates an empty merger.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: None,
            emitted: Vec::new(),
        }
    }

    /// The current lookback entry.
    #[must_use]
    pub const fn pending(&self) -> Option<&Retained> {
        self.pending.as_ref()
    }

    /// Feeds the next programme in document order.
    pub fn push(&mut self, current: Retained) -> MergeStep {
        if let Some(previous) = self.pending.as_mut()
            && continues_across_midnight(&previous.programme, &current.programme)
        {
            previous.programme.stop.clone_from(&current.programme.stop);
            return MergeStep::Merged(current.programme);
        }

        if let Some(previous) = self.pending.replace(current) {
            self.emitted.push(previous);
        }
        MergeStep::Buffered
    }

    /// Flushes the lookback entry and returns all survivors in order.
    #[must_use]
    pub fn finish(mut self) -> Vec<Retained> {
        if let Some(last) = self.pending.take() {
            self.emitted.push(last);
        }
        self.emitted
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use super::*;

    fn programme(channel: &str, start: &str, stop: &str, title: &str) -> Programme {
        Programme {
            channel: String::from(channel),
            start: String::from(start),
            stop: String::from(stop),
            title: Some(String::from(title)),
            sub_title: None,
        }
    }

    fn retained(slot: usize, programme: Programme) -> Retained {
        Retained { slot, programme }
    }

    #[test]
    fn test_merges_split_at_midnight() {
        // Arrange
        let mut merger = MidnightMerger::new();
        let a = programme("C1", "20240101235000", "20240102000000", "News");
        let b = programme("C1", "20240102000000", "20240102003000", "News");

        // Act
        let first = merger.push(retained(0, a));
        let second = merger.push(retained(1, b.clone()));
        let survivors = merger.finish();

        // Assert
        assert_eq!(first, MergeStep::Buffered);
        assert_eq!(second, MergeStep::Merged(b));
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].slot, 0);
        assert_eq!(survivors[0].programme.start, "20240101235000");
        assert_eq!(survivors[0].programme.stop, "20240102003000");
    }

    #[test]
    fn test_merges_chain_of_three() {
        // Arrange
        let mut merger = MidnightMerger::new();
        let pieces = [
            programme("C1", "20240101230000", "20240102000000", "Movie"),
            programme("C1", "20240102000000", "20240103000000", "Movie"),
            programme("C1", "20240103000000", "20240103010000", "Movie"),
        ];

        // Act
        for (slot, piece) in pieces.into_iter().enumerate() {
            merger.push(retained(slot, piece));
        }
        let survivors = merger.finish();

        // Assert
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].programme.start, "20240101230000");
        assert_eq!(survivors[0].programme.stop, "20240103010000");
    }

    #[test]
    fn test_chain_merge_is_stable_under_rescan() {
        // Arrange
        let pieces = vec![
            programme("C1", "20240101230000", "20240102000000", "Movie"),
            programme("C1", "20240102000000", "20240103000000", "Movie"),
            programme("C1", "20240103000000", "20240103010000", "Movie"),
        ];
        let run = |input: Vec<Programme>| {
            let mut merger = MidnightMerger::new();
            for (slot, p) in input.into_iter().enumerate() {
                merger.push(retained(slot, p));
            }
            merger
                .finish()
                .into_iter()
                .map(|r| r.programme)
                .collect::<Vec<_>>()
        };

        // Act
        let once = run(pieces);
        let twice = run(once.clone());

        // Assert
        assert_eq!(once, twice);
        assert_eq!(once.len(), 1);
    }

    #[test]
    fn test_boundary_must_be_midnight() {
        // Arrange
        let a = programme("C1", "20240101220000", "20240101230000", "News");
        let b = programme("C1", "20240101230000", "20240102000000", "News");

        // Act & Assert
        assert!(!continues_across_midnight(&a, &b));
    }

    #[test]
    fn test_boundary_compared_as_text() {
        // Arrange: same instant in UTC terms is irrelevant, suffixes differ
        let a = programme("C1", "20240101235000 +0800", "20240102000000 +0800", "News");
        let b = programme("C1", "20240102000000 +0000", "20240102003000 +0000", "News");

        // Act & Assert
        assert!(!continues_across_midnight(&a, &b));
    }

    #[test]
    fn test_channel_must_match() {
        // Arrange
        let a = programme("C1", "20240101235000", "20240102000000", "News");
        let b = programme("C2", "20240102000000", "20240102003000", "News");

        // Act & Assert
        assert!(!continues_across_midnight(&a, &b));
    }

    #[test]
    fn test_titles_compared_after_trim() {
        // Arrange
        let a = programme("C1", "20240101235000", "20240102000000", " News ");
        let b = programme("C1", "20240102000000", "20240102003000", "News");
        let c = programme("C1", "20240102000000", "20240102003000", "news");

        // Act & Assert
        assert!(continues_across_midnight(&a, &b));
        assert!(!continues_across_midnight(&a, &c));
    }

    #[test]
    fn test_missing_title_never_merges() {
        // Arrange
        let mut a = programme("C1", "20240101235000", "20240102000000", "News");
        let mut b = programme("C1", "20240102000000", "20240102003000", "News");
        a.title = None;
        b.title = None;

        // Act & Assert
        assert!(!continues_across_midnight(&a, &b));
    }

    #[test]
    fn test_sub_title_absent_equals_empty() {
        // Arrange
        let a = programme("C1", "20240101235000", "20240102000000", "News");
        let mut b = programme("C1", "20240102000000", "20240102003000", "News");
        b.sub_title = Some(String::from("  "));

        // Act & Assert
        assert!(continues_across_midnight(&a, &b));
    }

    #[test]
    fn test_sub_title_mismatch_keeps_both() {
        // Arrange
        let mut merger = MidnightMerger::new();
        let mut a = programme("C1", "20240101235000", "20240102000000", "News");
        let mut b = programme("C1", "20240102000000", "20240102003000", "News");
        a.sub_title = Some(String::from("Part 1"));
        b.sub_title = Some(String::from("Part 2"));

        // Act
        merger.push(retained(0, a));
        let step = merger.push(retained(1, b));
        let survivors = merger.finish();

        // Assert
        assert_eq!(step, MergeStep::Buffered);
        assert_eq!(survivors.len(), 2);
        assert_eq!(survivors[0].programme.stop, "20240102000000");
    }

    #[test]
    fn test_lookback_is_only_one_entry() {
        // Arrange: A and C would merge, but B sits between them
        let mut merger = MidnightMerger::new();
        let a = programme("C1", "20240101235000", "20240102000000", "News");
        let b = programme("C2", "20240101235000", "20240102000000", "Other");
        let c = programme("C1", "20240102000000", "20240102003000", "News");

        // Act
        merger.push(retained(0, a));
        merger.push(retained(1, b));
        merger.push(retained(2, c));
        let survivors = merger.finish();

        // Assert
        assert_eq!(survivors.len(), 3);
    }

    #[test]
    fn test_pending_tracks_last_survivor() {
        // Arrange
        let mut merger = MidnightMerger::new();

        // Act
        merger.push(retained(
            4,
            programme("C1", "20240101100000", "20240101110000", "A"),
        ));

        // Assert
        assert_eq!(merger.pending().map(|r| r.slot), Some(4));
    }
}
