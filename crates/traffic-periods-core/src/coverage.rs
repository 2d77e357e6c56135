//! Which calendar days a cache entry holds complete data for.
//!
//! A [`Coverage`] is a RoaringBitmap of day ids (see [`days`]). The cache
//! store asks it for the runs of a requested span that are still missing;
//! the same run splitting, applied to an empty coverage, plans fetch chunks.
//!
//! ```
//! use roaring::RoaringBitmap;
//! use traffic_periods_core::coverage::Coverage;
//!
//! let wanted: RoaringBitmap = (0u32..10).collect();
//! let have: Coverage = (0u32..10).filter(|d| *d != 5).collect();
//!
//! assert_eq!(have.missing_runs(&wanted, None), vec![5..=5]);
//! ```

pub mod days;
pub mod serde;

use std::ops::RangeInclusive;

use roaring::RoaringBitmap;

/// Day id: days since 1970-01-01.
pub type DayId = u32;

/// Inclusive run of day ids.
pub type DayRun = RangeInclusive<u64>;

/// Set of covered day ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Coverage {
    days: RoaringBitmap,
}

impl Coverage {
    /// Nothing covered.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Coverage of exactly the days in `days`.
    pub fn from_bitmap(days: RoaringBitmap) -> Self {
        Self { days }
    }

    /// Whether no day is covered.
    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Number of covered days.
    pub fn cardinality(&self) -> u64 {
        self.days.len()
    }

    /// Mark every day of `more` as covered. Coverage never shrinks.
    pub fn extend(&mut self, more: &RoaringBitmap) {
        self.days |= more;
    }

    /// Runs of `wanted` days that are not covered, ascending.
    ///
    /// With `max_len`, longer runs are cut into consecutive pieces of at most
    /// that many days, counted from each run's first day. `Some(0)` yields no
    /// runs at all.
    pub fn missing_runs(&self, wanted: &RoaringBitmap, max_len: Option<u64>) -> Vec<DayRun> {
        let missing = wanted - &self.days;
        let runs = contiguous_runs(&missing);
        match max_len {
            None => runs,
            Some(0) => Vec::new(),
            Some(n) => runs.into_iter().flat_map(|r| cut_run(r, n)).collect(),
        }
    }

    /// Runs of covered days, ascending.
    pub fn present_runs(&self) -> Vec<DayRun> {
        contiguous_runs(&self.days)
    }
}

impl FromIterator<DayId> for Coverage {
    fn from_iter<I: IntoIterator<Item = DayId>>(iter: I) -> Self {
        Self::from_bitmap(iter.into_iter().collect())
    }
}

fn contiguous_runs(days: &RoaringBitmap) -> Vec<DayRun> {
    let mut runs: Vec<DayRun> = Vec::new();
    for day in days.iter().map(u64::from) {
        match runs.last_mut() {
            Some(run) if *run.end() + 1 == day => *run = *run.start()..=day,
            _ => runs.push(day..=day),
        }
    }
    runs
}

fn cut_run(run: DayRun, max_len: u64) -> impl Iterator<Item = DayRun> {
    let (first, last) = (*run.start(), *run.end());
    (first..=last)
        .step_by(max_len as usize)
        .map(move |lo| lo..=(lo + max_len - 1).min(last))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn days(lo: u32, hi_exclusive: u32) -> RoaringBitmap {
        (lo..hi_exclusive).collect()
    }

    #[test]
    fn fully_covered_span_has_nothing_missing() {
        let cov = Coverage::from_bitmap(days(0, 10));
        assert!(cov.missing_runs(&days(0, 10), None).is_empty());
        assert!(cov.missing_runs(&days(3, 7), Some(2)).is_empty());
    }

    #[test]
    fn gaps_before_and_after_cached_span() {
        // cached 10..=20, wanted 5..=25
        let cov = Coverage::from_bitmap(days(10, 21));
        assert_eq!(cov.missing_runs(&days(5, 26), None), vec![5..=9, 21..=25]);
    }

    #[test]
    fn holes_are_reported_and_cut() {
        let mut have = days(0, 20);
        for d in [3, 4, 10, 11, 12, 18] {
            have.remove(d);
        }
        let cov = Coverage::from_bitmap(have);
        let wanted = days(0, 20);

        assert_eq!(
            cov.missing_runs(&wanted, None),
            vec![3..=4, 10..=12, 18..=18]
        );
        assert_eq!(
            cov.missing_runs(&wanted, Some(2)),
            vec![3..=4, 10..=11, 12..=12, 18..=18]
        );
        assert!(cov.missing_runs(&wanted, Some(0)).is_empty());
    }

    #[test]
    fn extend_merges_adjacent_runs() {
        let mut cov = Coverage::from_bitmap(days(0, 3));
        cov.extend(&days(10, 12));
        assert_eq!(cov.cardinality(), 5);
        assert_eq!(cov.present_runs(), vec![0..=2, 10..=11]);

        cov.extend(&days(3, 10));
        assert_eq!(cov.present_runs(), vec![0..=11]);
        assert!(!cov.is_empty());
    }
}
