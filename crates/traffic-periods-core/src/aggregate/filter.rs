//! Record filters applied before aggregation.
//!
//! All filters are conjunctive and an absent filter does not restrict.
//! Hours and weekdays are evaluated in UTC, the timezone records are stored in.

use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::model::{Modality, TrafficRecord};

/// Invalid filter input.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum FilterError {
    /// Hour windows are `[start, end)` with `0 <= start < end <= 24`.
    #[snafu(display("invalid hour window {start}..{end}: need 0 <= start < end <= 24"))]
    BadHourWindow {
        /// First hour.
        start: u32,
        /// Hour after the last.
        end: u32,
    },

    /// Weekday names are `mon`..`sun` (full names also accepted).
    #[snafu(display("unknown weekday {value:?}"))]
    UnknownWeekday {
        /// The rejected input.
        value: String,
    },

    /// A weekday filter must keep at least one day.
    #[snafu(display("weekday filter selects no days"))]
    NoWeekdays,

    /// A modality filter must keep at least one modality.
    #[snafu(display("modality filter selects no modalities"))]
    NoModalities,
}

/// Half-open window of hours of the day, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "(u32, u32)", into = "(u32, u32)")]
pub struct HourWindow {
    start: u32,
    end: u32,
}

impl HourWindow {
    /// Build a window; `end` is exclusive.
    pub fn new(start: u32, end: u32) -> Result<Self, FilterError> {
        ensure!(start < end && end <= 24, BadHourWindowSnafu { start, end });
        Ok(Self { start, end })
    }

    /// First hour included.
    pub fn start(&self) -> u32 {
        self.start
    }

    /// First hour excluded.
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Whether `hour` lies in the window.
    pub fn contains(&self, hour: u32) -> bool {
        self.start <= hour && hour < self.end
    }
}

impl TryFrom<(u32, u32)> for HourWindow {
    type Error = FilterError;

    fn try_from((start, end): (u32, u32)) -> Result<Self, Self::Error> {
        Self::new(start, end)
    }
}

impl From<HourWindow> for (u32, u32) {
    fn from(w: HourWindow) -> Self {
        (w.start, w.end)
    }
}

impl fmt::Display for HourWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:00-{:02}:00", self.start, self.end)
    }
}

/// A set of weekdays.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct WeekdaySet(u8);

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn short_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

impl WeekdaySet {
    /// Monday to Friday.
    pub const WORKDAYS: WeekdaySet = WeekdaySet(0b001_1111);
    /// Saturday and Sunday.
    pub const WEEKEND: WeekdaySet = WeekdaySet(0b110_0000);
    /// Every day.
    pub const ALL: WeekdaySet = WeekdaySet(0b111_1111);

    /// Set holding `days`; fails if it would be empty.
    pub fn new(days: impl IntoIterator<Item = Weekday>) -> Result<Self, FilterError> {
        let set = days
            .into_iter()
            .fold(WeekdaySet(0), |acc, d| acc.with(d));
        ensure!(set.0 != 0, NoWeekdaysSnafu);
        Ok(set)
    }

    fn bit(day: Weekday) -> u8 {
        1 << day.num_days_from_monday()
    }

    fn with(self, day: Weekday) -> Self {
        WeekdaySet(self.0 | Self::bit(day))
    }

    /// Whether `day` is in the set.
    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & Self::bit(day) != 0
    }

    /// Days in the set, Monday first.
    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        WEEK.into_iter().filter(|d| self.contains(*d))
    }
}

impl fmt::Debug for WeekdaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(short_name)).finish()
    }
}

impl fmt::Display for WeekdaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(short_name).collect();
        f.write_str(&names.join(","))
    }
}

impl FromStr for WeekdaySet {
    type Err = FilterError;

    /// Comma-separated day names, or `weekdays` / `weekend` / `all`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = WeekdaySet(0);
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            set = match part.to_ascii_lowercase().as_str() {
                "weekdays" | "workdays" => WeekdaySet(set.0 | Self::WORKDAYS.0),
                "weekend" => WeekdaySet(set.0 | Self::WEEKEND.0),
                "all" => Self::ALL,
                other => {
                    let day: Weekday = other
                        .parse()
                        .map_err(|_| FilterError::UnknownWeekday {
                            value: part.to_string(),
                        })?;
                    set.with(day)
                }
            };
        }
        ensure!(set.0 != 0, NoWeekdaysSnafu);
        Ok(set)
    }
}

impl TryFrom<Vec<String>> for WeekdaySet {
    type Error = FilterError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        value.join(",").parse()
    }
}

impl From<WeekdaySet> for Vec<String> {
    fn from(set: WeekdaySet) -> Self {
        set.iter().map(|d| short_name(d).to_string()).collect()
    }
}

/// Filters applied to every group before aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Keep records whose hour lies in this window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_of_day: Option<HourWindow>,
    /// Keep records whose weekday is in this set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<WeekdaySet>,
    /// Modalities to report; all modalities present in the data when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modalities: Option<BTreeSet<Modality>>,
}

impl FilterSpec {
    /// No restriction at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to an hour window.
    pub fn with_hours(mut self, window: HourWindow) -> Self {
        self.time_of_day = Some(window);
        self
    }

    /// Restrict to a set of weekdays.
    pub fn with_days(mut self, days: WeekdaySet) -> Self {
        self.days_of_week = Some(days);
        self
    }

    /// Restrict the reported modalities.
    pub fn with_modalities(
        mut self,
        modalities: impl IntoIterator<Item = Modality>,
    ) -> Result<Self, FilterError> {
        let set: BTreeSet<Modality> = modalities.into_iter().collect();
        ensure!(!set.is_empty(), NoModalitiesSnafu);
        self.modalities = Some(set);
        Ok(self)
    }

    /// Whether a calendar day passes the weekday filter.
    pub fn keeps_day(&self, day: NaiveDate) -> bool {
        self.days_of_week
            .is_none_or(|set| set.contains(day.weekday()))
    }

    /// Whether a record passes the hour and weekday filters.
    pub fn keeps(&self, record: &TrafficRecord) -> bool {
        self.time_of_day.is_none_or(|w| w.contains(record.hour())) && self.keeps_day(record.date())
    }

    /// Reported modalities given those present in the data, in canonical order.
    pub fn select_modalities(&self, available: &[Modality]) -> Vec<Modality> {
        match &self.modalities {
            Some(wanted) => wanted.iter().copied().collect(),
            None => available.to_vec(),
        }
    }
}
