//! Identifiers and enumerations that key cached data and label columns.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Errors raised when parsing identifiers from user or wire input.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum IdParseError {
    /// Segment identifiers must be non-empty and filesystem-safe.
    #[snafu(display(
        "invalid segment id {value:?}: expected ASCII letters, digits, '-' or '_'"
    ))]
    InvalidSegment {
        /// The rejected input.
        value: String,
    },

    /// Unknown granularity name.
    #[snafu(display("unknown granularity {value:?} (expected hourly or daily)"))]
    UnknownGranularity {
        /// The rejected input.
        value: String,
    },

    /// Unknown data kind name.
    #[snafu(display("unknown data kind {value:?} (expected counts or speed)"))]
    UnknownDataKind {
        /// The rejected input.
        value: String,
    },

    /// Unknown modality name.
    #[snafu(display("unknown modality {value:?}"))]
    UnknownModality {
        /// The rejected input.
        value: String,
    },
}

/// Opaque identifier of one monitored road segment.
///
/// The id ends up in cache file names, so only ASCII alphanumerics, `-` and
/// `_` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SegmentId(String);

impl SegmentId {
    /// Validate and wrap a segment identifier.
    pub fn new(value: impl Into<String>) -> Result<Self, IdParseError> {
        let value = value.into();
        let valid = !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        ensure!(valid, InvalidSegmentSnafu { value });
        Ok(Self(value))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SegmentId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.trim())
    }
}

impl TryFrom<String> for SegmentId {
    type Error = IdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SegmentId> for String {
    fn from(value: SegmentId) -> Self {
        value.0
    }
}

/// Time-bucket size of the records returned by the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One record per hour.
    Hourly,
    /// One record per calendar day.
    Daily,
}

impl Granularity {
    /// Value of the `format` field sent to the remote API.
    pub fn wire_format(self) -> &'static str {
        match self {
            Granularity::Hourly => "per-hour",
            Granularity::Daily => "per-day",
        }
    }

    /// Short name used in cache file names and CLI flags.
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" | "hour" | "per-hour" | "1h" => Ok(Granularity::Hourly),
            "daily" | "day" | "per-day" | "1d" => Ok(Granularity::Daily),
            _ => UnknownGranularitySnafu { value: s }.fail(),
        }
    }
}

/// Which payload shape is requested and cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    /// Per-modality counts.
    Counts,
    /// Car counts plus the car speed histogram.
    #[serde(rename = "speed")]
    SpeedHistogram,
}

impl DataKind {
    /// Short name used in cache file names and CLI flags.
    pub fn as_str(self) -> &'static str {
        match self {
            DataKind::Counts => "counts",
            DataKind::SpeedHistogram => "speed",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataKind {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "counts" | "count" => Ok(DataKind::Counts),
            "speed" | "speed-histogram" | "speed_histogram" => Ok(DataKind::SpeedHistogram),
            _ => UnknownDataKindSnafu { value: s }.fail(),
        }
    }
}

/// A mode of transport counted by the sensor.
///
/// The declaration order is the canonical column order used in every output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Pedestrians, both directions.
    Pedestrian,
    /// Cyclists, both directions.
    Bike,
    /// Cars, both directions.
    Car,
    /// Heavy vehicles, both directions.
    Heavy,
    /// Pedestrians, left direction.
    PedestrianLft,
    /// Pedestrians, right direction.
    PedestrianRgt,
    /// Cyclists, left direction.
    BikeLft,
    /// Cyclists, right direction.
    BikeRgt,
    /// Cars, left direction.
    CarLft,
    /// Cars, right direction.
    CarRgt,
    /// Heavy vehicles, left direction.
    HeavyLft,
    /// Heavy vehicles, right direction.
    HeavyRgt,
}

impl Modality {
    /// Number of modalities.
    pub const COUNT: usize = 12;

    /// Every modality in canonical order.
    pub const ALL: [Modality; Modality::COUNT] = [
        Modality::Pedestrian,
        Modality::Bike,
        Modality::Car,
        Modality::Heavy,
        Modality::PedestrianLft,
        Modality::PedestrianRgt,
        Modality::BikeLft,
        Modality::BikeRgt,
        Modality::CarLft,
        Modality::CarRgt,
        Modality::HeavyLft,
        Modality::HeavyRgt,
    ];

    /// Modalities every sensor reports.
    pub const CLASSIC: [Modality; 4] = [
        Modality::Pedestrian,
        Modality::Bike,
        Modality::Car,
        Modality::Heavy,
    ];

    /// Field name in API responses and column name in cache files.
    pub fn wire_name(self) -> &'static str {
        match self {
            Modality::Pedestrian => "pedestrian",
            Modality::Bike => "bike",
            Modality::Car => "car",
            Modality::Heavy => "heavy",
            Modality::PedestrianLft => "pedestrian_lft",
            Modality::PedestrianRgt => "pedestrian_rgt",
            Modality::BikeLft => "bike_lft",
            Modality::BikeRgt => "bike_rgt",
            Modality::CarLft => "car_lft",
            Modality::CarRgt => "car_rgt",
            Modality::HeavyLft => "heavy_lft",
            Modality::HeavyRgt => "heavy_rgt",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for Modality {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Modality::ALL
            .into_iter()
            .find(|m| m.wire_name() == wanted)
            .context(UnknownModalitySnafu { value: s })
    }
}
