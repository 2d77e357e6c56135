//! Helpers for mapping calendar days into discrete day ids.
//!
//! - Day ids are `u32`, counted forward from the Unix epoch (1970-01-01 is
//!   day 0).
//! - The mapping is monotonic: later dates never map to a smaller id.
//! - [`DateRange`] rejects pre-epoch dates, so every range maps cleanly.

use chrono::{Days, NaiveDate};
use roaring::RoaringBitmap;

use crate::{
    coverage::{DayId, DayRun},
    model::DateRange,
};

/// Day 0.
pub fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// Map a date into its day id.
///
/// Pre-epoch dates clamp to 0 (with a debug assertion); they cannot come out
/// of a valid [`DateRange`].
pub fn day_id(date: NaiveDate) -> DayId {
    let days = (date - epoch()).num_days();
    debug_assert!(days >= 0, "day_id received pre-epoch date: {date}");
    days.clamp(0, i64::from(u32::MAX)) as DayId
}

/// Inverse of [`day_id`].
pub fn date_from_day_id(id: u64) -> NaiveDate {
    epoch()
        .checked_add_days(Days::new(id))
        .unwrap_or(NaiveDate::MAX)
}

/// Bitmap of every day id in `range`.
pub fn expected_days(range: &DateRange) -> RoaringBitmap {
    let first = day_id(range.start());
    let last = day_id(range.end());
    let mut bitmap = RoaringBitmap::new();
    bitmap.insert_range(first..=last);
    bitmap
}

/// Convert an inclusive run of day ids back into a [`DateRange`].
pub fn range_from_run(run: DayRun) -> DateRange {
    // Runs come from bitmaps of valid ranges: ordered and on or after the epoch.
    DateRange::from_ordered(
        date_from_day_id(*run.start()),
        date_from_day_id(*run.end()),
    )
}
