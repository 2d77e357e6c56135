//! The four comparison views and how each is computed from filtered records.
//!
//! Every view has a fixed axis so that groups line up side by side: 24 hour
//! slots, one point per calendar day of the group, the shared modality list,
//! and the full bin list of the speed layout.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::NaiveDate;
use serde::Serialize;

use crate::model::{Modality, SpeedBinLayout, TrafficRecord};

const KMH_TO_MPH: f64 = 0.621_371;

/// Which view to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum View {
    /// Mean per hour of day.
    HourlyProfile,
    /// Total per calendar day.
    DailyVolume,
    /// Percentage share per modality.
    ModalSplit,
    /// Car speed histogram.
    SpeedDistribution,
}

impl View {
    /// Every view.
    pub const ALL: [View; 4] = [
        View::HourlyProfile,
        View::DailyVolume,
        View::ModalSplit,
        View::SpeedDistribution,
    ];

    /// Short name used on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            View::HourlyProfile => "hourly",
            View::DailyVolume => "daily",
            View::ModalSplit => "modal",
            View::SpeedDistribution => "speed",
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" | "hourly-profile" | "profile" => Ok(View::HourlyProfile),
            "daily" | "daily-volume" | "volume" => Ok(View::DailyVolume),
            "modal" | "modal-split" | "split" => Ok(View::ModalSplit),
            "speed" | "speed-distribution" => Ok(View::SpeedDistribution),
            other => Err(format!(
                "unknown view {other:?} (expected hourly, daily, modal or speed)"
            )),
        }
    }
}

/// Unit for speed bin labels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SpeedUnit {
    /// Kilometres per hour.
    #[default]
    Kmh,
    /// Miles per hour.
    Mph,
}

impl SpeedUnit {
    fn factor(self) -> f64 {
        match self {
            SpeedUnit::Kmh => 1.0,
            SpeedUnit::Mph => KMH_TO_MPH,
        }
    }

    /// Unit suffix.
    pub fn suffix(self) -> &'static str {
        match self {
            SpeedUnit::Kmh => "km/h",
            SpeedUnit::Mph => "mph",
        }
    }
}

impl FromStr for SpeedUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kmh" | "km/h" | "kph" => Ok(SpeedUnit::Kmh),
            "mph" => Ok(SpeedUnit::Mph),
            other => Err(format!("unknown speed unit {other:?} (expected kmh or mph)")),
        }
    }
}

/// One hour-of-day slot of an [`HourlyProfile`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourSlot {
    /// Hour of day, `0..24`.
    pub hour: u32,
    /// Mean count per modality, aligned with [`HourlyProfile::modalities`].
    pub means: Vec<f64>,
    /// Records that fell in this hour.
    pub samples: usize,
}

/// Mean count per modality for each hour of the day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyProfile {
    /// Column order of [`HourSlot::means`].
    pub modalities: Vec<Modality>,
    /// Exactly 24 slots, hour 0 first.
    pub hours: Vec<HourSlot>,
}

impl HourlyProfile {
    /// Mean for one hour and modality, if the modality is reported.
    pub fn mean(&self, hour: u32, modality: Modality) -> Option<f64> {
        let col = self.modalities.iter().position(|m| *m == modality)?;
        self.hours.get(hour as usize).map(|slot| slot.means[col])
    }
}

/// Totals of one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayTotal {
    /// The day.
    pub date: NaiveDate,
    /// Summed counts, aligned with [`DailyVolume::modalities`].
    pub totals: Vec<f64>,
}

/// Total count per modality per calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyVolume {
    /// Column order of [`DayTotal::totals`].
    pub modalities: Vec<Modality>,
    /// One entry per day of the group, in date order.
    pub days: Vec<DayTotal>,
}

/// One modality's part of a [`ModalSplit`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModalShare {
    /// The modality.
    pub modality: Modality,
    /// Summed count.
    pub count: f64,
    /// Share of the total, in percent.
    pub percent: f64,
}

/// Share of each modality in the total count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModalSplit {
    /// Shares in modality order; percentages sum to 100 unless the total is 0.
    pub shares: Vec<ModalShare>,
    /// Sum over all selected modalities.
    pub total: f64,
}

/// One bin of a [`SpeedDistribution`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeedBin {
    /// Lower bound in km/h.
    pub lower_kmh: u32,
    /// Upper bound in km/h; `None` for the open last bin.
    pub upper_kmh: Option<u32>,
    /// Estimated cars in the bin.
    pub cars: f64,
    /// Share of all cars, in percent.
    pub percent: f64,
}

impl SpeedBin {
    /// Human label such as `30-40` or `120+`, converted to `unit`.
    pub fn label(&self, unit: SpeedUnit) -> String {
        let f = unit.factor();
        let lo = (f64::from(self.lower_kmh) * f).round();
        match self.upper_kmh {
            Some(hi) => format!("{lo}-{}", (f64::from(hi) * f).round()),
            None => format!("{lo}+"),
        }
    }
}

/// Car speed histogram weighted by car counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeedDistribution {
    /// Bin layout of [`SpeedDistribution::bins`].
    pub layout: SpeedBinLayout,
    /// Every bin of the layout, slowest first.
    pub bins: Vec<SpeedBin>,
    /// Cars behind the histogram.
    pub cars: f64,
    /// Cars of matching records whose histogram uses another layout. They
    /// cannot be placed on this axis and are left out of `bins`.
    pub excluded_cars: f64,
    /// Records contributing to `excluded_cars`.
    pub excluded_records: usize,
}

pub(crate) fn hourly_profile<'a>(
    records: impl IntoIterator<Item = &'a TrafficRecord>,
    modalities: &[Modality],
) -> HourlyProfile {
    let mut sums = vec![vec![0.0; modalities.len()]; 24];
    let mut counts = vec![vec![0usize; modalities.len()]; 24];
    let mut samples = [0usize; 24];

    for r in records {
        let h = r.hour() as usize;
        samples[h] += 1;
        for (col, m) in modalities.iter().enumerate() {
            if let Some(v) = r.counts.get(*m) {
                sums[h][col] += v;
                counts[h][col] += 1;
            }
        }
    }

    let hours = (0..24)
        .map(|h| HourSlot {
            hour: h as u32,
            means: sums[h]
                .iter()
                .zip(&counts[h])
                .map(|(s, n)| if *n == 0 { 0.0 } else { s / *n as f64 })
                .collect(),
            samples: samples[h],
        })
        .collect();

    HourlyProfile {
        modalities: modalities.to_vec(),
        hours,
    }
}

pub(crate) fn daily_volume<'a>(
    records: impl IntoIterator<Item = &'a TrafficRecord>,
    days: impl IntoIterator<Item = NaiveDate>,
    modalities: &[Modality],
) -> DailyVolume {
    let mut by_day: BTreeMap<NaiveDate, Vec<f64>> = days
        .into_iter()
        .map(|d| (d, vec![0.0; modalities.len()]))
        .collect();

    for r in records {
        let Some(totals) = by_day.get_mut(&r.date()) else {
            continue;
        };
        for (col, m) in modalities.iter().enumerate() {
            totals[col] += r.counts.get(*m).unwrap_or(0.0);
        }
    }

    DailyVolume {
        modalities: modalities.to_vec(),
        days: by_day
            .into_iter()
            .map(|(date, totals)| DayTotal { date, totals })
            .collect(),
    }
}

pub(crate) fn modal_split<'a>(
    records: impl IntoIterator<Item = &'a TrafficRecord>,
    modalities: &[Modality],
) -> ModalSplit {
    let mut counts = vec![0.0; modalities.len()];
    for r in records {
        for (col, m) in modalities.iter().enumerate() {
            counts[col] += r.counts.get(*m).unwrap_or(0.0);
        }
    }

    let total: f64 = counts.iter().sum();
    let shares = modalities
        .iter()
        .zip(counts)
        .map(|(m, count)| ModalShare {
            modality: *m,
            count,
            percent: if total > 0.0 { count / total * 100.0 } else { 0.0 },
        })
        .collect();

    ModalSplit { shares, total }
}

pub(crate) fn speed_distribution<'a>(
    records: impl IntoIterator<Item = &'a TrafficRecord>,
    layout: SpeedBinLayout,
) -> SpeedDistribution {
    let mut cars_per_bin = vec![0.0; layout.bin_count()];
    let mut excluded_cars = 0.0;
    let mut excluded_records = 0;

    for r in records {
        let Some(hist) = &r.speed else { continue };
        let cars = r.counts.get(Modality::Car).unwrap_or(0.0);
        if hist.layout != layout {
            excluded_cars += cars;
            excluded_records += 1;
            continue;
        }
        for (bin, share) in cars_per_bin.iter_mut().zip(&hist.shares) {
            *bin += share / 100.0 * cars;
        }
    }

    let cars: f64 = cars_per_bin.iter().sum();
    let bins = cars_per_bin
        .into_iter()
        .enumerate()
        .map(|(i, bin_cars)| {
            let (lower_kmh, upper_kmh) = layout.bounds_kmh(i);
            SpeedBin {
                lower_kmh,
                upper_kmh,
                cars: bin_cars,
                percent: if cars > 0.0 { bin_cars / cars * 100.0 } else { 0.0 },
            }
        })
        .collect();

    SpeedDistribution {
        layout,
        bins,
        cars,
        excluded_cars,
        excluded_records,
    }
}
