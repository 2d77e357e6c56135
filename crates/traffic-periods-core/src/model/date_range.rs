//! Inclusive calendar date ranges.

use std::fmt;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::coverage::{Coverage, days};

/// Errors raised when constructing a [`DateRange`].
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum DateRangeError {
    /// The start date is after the end date.
    #[snafu(display("invalid date range: start {start} is after end {end}"))]
    StartAfterEnd {
        /// Requested first day.
        start: NaiveDate,
        /// Requested last day.
        end: NaiveDate,
    },

    /// Day numbers are counted from the Unix epoch; earlier dates are rejected.
    #[snafu(display("invalid date range: {date} is before 1970-01-01"))]
    BeforeEpoch {
        /// Offending date.
        date: NaiveDate,
    },
}

/// An inclusive `[start, end]` span of calendar days.
///
/// Serialized as a two-element array of ISO dates, for example
/// `["2025-09-01", "2025-10-24"]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "(NaiveDate, NaiveDate)", into = "(NaiveDate, NaiveDate)")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Build a range, rejecting `start > end` and pre-epoch dates.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        ensure!(start <= end, StartAfterEndSnafu { start, end });
        ensure!(start >= days::epoch(), BeforeEpochSnafu { date: start });
        Ok(Self { start, end })
    }

    pub(crate) fn from_ordered(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end && start >= days::epoch());
        Self { start, end }
    }

    /// A range covering a single day.
    pub fn single(day: NaiveDate) -> Result<Self, DateRangeError> {
        Self::new(day, day)
    }

    /// First day (inclusive).
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last day (inclusive).
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of days in the range; always at least 1.
    pub fn days(&self) -> u64 {
        (self.end - self.start).num_days() as u64 + 1
    }

    /// Whether `day` falls inside the range.
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Whether the two ranges share at least one day.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Iterate over every day of the range in order.
    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    /// The day after `end`, used as the exclusive upper bound on the wire.
    pub(crate) fn end_exclusive(&self) -> NaiveDate {
        self.end.checked_add_days(Days::new(1)).unwrap_or(NaiveDate::MAX)
    }

    /// Split into consecutive, non-overlapping sub-ranges of at most
    /// `max_days` days, offset from `start`.
    ///
    /// The union of the returned ranges is exactly `self`; only the last piece
    /// may be shorter than `max_days`. Returns an empty vector when
    /// `max_days == 0`.
    pub fn chunks(&self, max_days: u32) -> Vec<DateRange> {
        let expected = days::expected_days(self);
        Coverage::empty()
            .missing_runs(&expected, Some(u64::from(max_days)))
            .into_iter()
            .map(days::range_from_run)
            .collect()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} .. {}]", self.start, self.end)
    }
}

impl TryFrom<(NaiveDate, NaiveDate)> for DateRange {
    type Error = DateRangeError;

    fn try_from((start, end): (NaiveDate, NaiveDate)) -> Result<Self, Self::Error> {
        Self::new(start, end)
    }
}

impl From<DateRange> for (NaiveDate, NaiveDate) {
    fn from(value: DateRange) -> Self {
        (value.start, value.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    fn r(a: NaiveDate, b: NaiveDate) -> DateRange {
        DateRange::new(a, b).expect("valid range")
    }

    #[test]
    fn rejects_inverted_and_pre_epoch_ranges() {
        assert_eq!(
            DateRange::new(d(2024, 1, 2), d(2024, 1, 1)),
            Err(DateRangeError::StartAfterEnd {
                start: d(2024, 1, 2),
                end: d(2024, 1, 1)
            })
        );
        assert!(DateRange::new(d(1969, 12, 31), d(1970, 1, 2)).is_err());
        assert!(DateRange::new(d(1970, 1, 1), d(1970, 1, 1)).is_ok());
    }

    #[test]
    fn overlap_and_containment() {
        let a = r(d(2024, 1, 1), d(2024, 1, 10));
        let b = r(d(2024, 1, 5), d(2024, 1, 15));
        let c = r(d(2024, 1, 11), d(2024, 1, 12));

        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert!(a.contains(d(2024, 1, 10)));
        assert!(!a.contains(d(2024, 1, 11)));
        assert_eq!(a.days(), 10);
        assert_eq!(a.iter_days().count(), 10);
    }

    #[test]
    fn chunks_reconstruct_the_original_span() {
        let span = r(d(2023, 1, 1), d(2024, 3, 17));

        for max_days in [1u32, 7, 30, 90, 365, 1000] {
            let chunks = span.chunks(max_days);
            assert!(!chunks.is_empty());
            assert_eq!(chunks[0].start(), span.start());
            assert_eq!(chunks[chunks.len() - 1].end(), span.end());

            for c in &chunks {
                assert!(c.days() <= u64::from(max_days));
            }
            for pair in chunks.windows(2) {
                // contiguous, no gap and no overlap
                assert_eq!(pair[0].end_exclusive(), pair[1].start());
            }

            let total: u64 = chunks.iter().map(DateRange::days).sum();
            assert_eq!(total, span.days());
        }
    }

    #[test]
    fn chunks_are_offset_from_request_start() {
        let span = r(d(2024, 1, 15), d(2024, 7, 1));
        let chunks = span.chunks(90);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], r(d(2024, 1, 15), d(2024, 4, 13)));
        assert_eq!(chunks[1], r(d(2024, 4, 14), d(2024, 7, 1)));
    }

    #[test]
    fn serde_uses_date_pairs() -> Result<(), Box<dyn std::error::Error>> {
        let range = r(d(2025, 10, 27), d(2025, 10, 31));
        let json = serde_json::to_string(&range)?;
        assert_eq!(json, r#"["2025-10-27","2025-10-31"]"#);

        let back: DateRange = serde_json::from_str(&json)?;
        assert_eq!(back, range);

        let bad = serde_json::from_str::<DateRange>(r#"["2025-10-31","2025-10-27"]"#);
        assert!(bad.is_err());
        Ok(())
    }
}
