//! Domain types shared by the fetcher, the cache store and the aggregator.
//!
//! - [`SegmentId`], [`Granularity`], [`DataKind`] key cached data.
//! - [`TrafficRecord`] is one time-bucketed observation.
//! - [`DateRange`] and [`PeriodGroup`] describe what to compare.
//!
//! Period groups and date ranges are owned by configuration and passed by
//! value into the core; nothing here performs I/O.

pub mod date_range;
pub mod ids;
pub mod period_group;
pub mod record;

pub use date_range::{DateRange, DateRangeError};
pub use ids::{DataKind, Granularity, IdParseError, Modality, SegmentId};
pub use period_group::{InvalidPeriodGroupError, PeriodGroup, PeriodGroupDef, PeriodGroups};
pub use record::{ModalityCounts, SpeedBinLayout, SpeedHistogram, TrafficRecord};
