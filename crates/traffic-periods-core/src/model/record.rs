//! Time-bucketed traffic observations.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Modality;

/// Per-modality counts for one bucket.
///
/// Counts are `f64` because the remote service extrapolates raw sensor counts
/// by uptime. A modality the sensor does not report is `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModalityCounts {
    values: [Option<f64>; Modality::COUNT],
}

impl ModalityCounts {
    /// Counts with every modality absent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count for one modality, if reported.
    pub fn get(&self, modality: Modality) -> Option<f64> {
        self.values[modality.index()]
    }

    /// Set or clear the count for one modality.
    pub fn set(&mut self, modality: Modality, value: Option<f64>) {
        self.values[modality.index()] = value;
    }

    /// Builder-style [`ModalityCounts::set`].
    pub fn with(mut self, modality: Modality, value: f64) -> Self {
        self.set(modality, Some(value));
        self
    }

    /// Reported modalities and their counts, in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Modality, f64)> + '_ {
        Modality::ALL
            .into_iter()
            .filter_map(|m| self.get(m).map(|v| (m, v)))
    }
}

/// Bin layout of a car speed histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SpeedBinLayout {
    /// 5 km/h bins from 0 to 70, plus an open `70+` bin (15 bins).
    #[serde(rename = "car_speed_hist_0to70plus")]
    Kmh0To70Plus,
    /// 10 km/h bins from 0 to 120, plus an open `120+` bin (13 bins).
    #[serde(rename = "car_speed_hist_0to120plus")]
    Kmh0To120Plus,
}

impl SpeedBinLayout {
    /// Layouts in the order they are looked up in API responses.
    pub const PREFERENCE: [SpeedBinLayout; 2] =
        [SpeedBinLayout::Kmh0To120Plus, SpeedBinLayout::Kmh0To70Plus];

    /// Field name in API responses and value stored in cache files.
    pub fn wire_name(self) -> &'static str {
        match self {
            SpeedBinLayout::Kmh0To70Plus => "car_speed_hist_0to70plus",
            SpeedBinLayout::Kmh0To120Plus => "car_speed_hist_0to120plus",
        }
    }

    /// Width of each closed bin in km/h.
    pub fn step_kmh(self) -> u32 {
        match self {
            SpeedBinLayout::Kmh0To70Plus => 5,
            SpeedBinLayout::Kmh0To120Plus => 10,
        }
    }

    /// Number of bins, including the open last bin.
    pub fn bin_count(self) -> usize {
        match self {
            SpeedBinLayout::Kmh0To70Plus => 15,
            SpeedBinLayout::Kmh0To120Plus => 13,
        }
    }

    /// Lower and (for closed bins) upper bound in km/h of bin `index`.
    pub fn bounds_kmh(self, index: usize) -> (u32, Option<u32>) {
        let step = self.step_kmh();
        let lower = index as u32 * step;
        if index + 1 >= self.bin_count() {
            (lower, None)
        } else {
            (lower, Some(lower + step))
        }
    }
}

impl fmt::Display for SpeedBinLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for SpeedBinLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpeedBinLayout::PREFERENCE
            .into_iter()
            .find(|l| l.wire_name() == s)
            .ok_or_else(|| format!("unknown speed histogram layout {s:?}"))
    }
}

/// Car speed histogram for one bucket: the share (percent) of cars in each bin.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedHistogram {
    /// Bin layout.
    pub layout: SpeedBinLayout,
    /// One percentage per bin; length equals `layout.bin_count()`.
    pub shares: Vec<f64>,
}

/// One time-bucketed observation for a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficRecord {
    /// Start of the bucket (UTC).
    pub timestamp: DateTime<Utc>,
    /// Per-modality counts.
    pub counts: ModalityCounts,
    /// Car speed histogram; only present for the speed data kind.
    pub speed: Option<SpeedHistogram>,
}

impl TrafficRecord {
    /// A record with counts only.
    pub fn new(timestamp: DateTime<Utc>, counts: ModalityCounts) -> Self {
        Self {
            timestamp,
            counts,
            speed: None,
        }
    }

    /// Calendar day of the bucket (UTC).
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// Hour of day of the bucket (UTC), `0..24`.
    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_iterate_in_canonical_order() {
        let counts = ModalityCounts::new()
            .with(Modality::HeavyRgt, 1.0)
            .with(Modality::Car, 12.5)
            .with(Modality::Pedestrian, 3.0);

        let seen: Vec<_> = counts.iter().collect();
        assert_eq!(
            seen,
            vec![
                (Modality::Pedestrian, 3.0),
                (Modality::Car, 12.5),
                (Modality::HeavyRgt, 1.0)
            ]
        );
        assert_eq!(counts.get(Modality::Bike), None);
    }

    #[test]
    fn speed_layout_bounds() {
        let l = SpeedBinLayout::Kmh0To120Plus;
        assert_eq!(l.bounds_kmh(0), (0, Some(10)));
        assert_eq!(l.bounds_kmh(11), (110, Some(120)));
        assert_eq!(l.bounds_kmh(12), (120, None));

        let l = SpeedBinLayout::Kmh0To70Plus;
        assert_eq!(l.bounds_kmh(14), (70, None));
        assert_eq!(
            "car_speed_hist_0to70plus".parse::<SpeedBinLayout>(),
            Ok(SpeedBinLayout::Kmh0To70Plus)
        );
    }
}
