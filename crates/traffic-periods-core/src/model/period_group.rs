//! Named groups of disjoint date ranges.
//!
//! Groups come in two shapes:
//!
//! - [`PeriodGroupDef`] is the plain data read from configuration or a preset
//!   file. It is not validated.
//! - [`PeriodGroup`] is the validated form consumed by the aggregator: a
//!   non-empty name and at least one range, with ranges pairwise disjoint.
//!
//! Ranges in *different* groups may overlap freely.

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::model::DateRange;

/// A period group failed validation.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum InvalidPeriodGroupError {
    /// Groups are identified by name, so the name must not be blank.
    #[snafu(display("period group name must not be empty"))]
    EmptyName,

    /// A group needs at least one range.
    #[snafu(display("period group {group:?} has no date ranges"))]
    NoRanges {
        /// Group name.
        group: String,
    },

    /// Two ranges of the same group share at least one day.
    #[snafu(display("period group {group:?} has overlapping ranges {first} and {second}"))]
    OverlappingRanges {
        /// Group name.
        group: String,
        /// Earlier of the two overlapping ranges.
        first: DateRange,
        /// Later of the two overlapping ranges.
        second: DateRange,
    },
}

impl InvalidPeriodGroupError {
    /// Name of the rejected group, when it has one.
    pub fn group(&self) -> Option<&str> {
        match self {
            InvalidPeriodGroupError::EmptyName => None,
            InvalidPeriodGroupError::NoRanges { group }
            | InvalidPeriodGroupError::OverlappingRanges { group, .. } => Some(group),
        }
    }
}

/// Unvalidated period group definition, as stored in presets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodGroupDef {
    /// Group name; also its identity.
    pub name: String,
    /// Ordered date ranges.
    #[serde(default)]
    pub ranges: Vec<DateRange>,
}

impl PeriodGroupDef {
    /// Build a definition.
    pub fn new(name: impl Into<String>, ranges: Vec<DateRange>) -> Self {
        Self {
            name: name.into(),
            ranges,
        }
    }

    /// Validate into a [`PeriodGroup`].
    pub fn validate(&self) -> Result<PeriodGroup, InvalidPeriodGroupError> {
        PeriodGroup::new(self.name.clone(), self.ranges.clone())
    }
}

/// A validated, named set of pairwise-disjoint date ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodGroup {
    name: String,
    ranges: Vec<DateRange>,
}

impl PeriodGroup {
    /// Validate and build a group. The caller's range order is preserved.
    pub fn new(
        name: impl Into<String>,
        ranges: Vec<DateRange>,
    ) -> Result<Self, InvalidPeriodGroupError> {
        let name = name.into();
        ensure!(!name.trim().is_empty(), EmptyNameSnafu);
        ensure!(!ranges.is_empty(), NoRangesSnafu { group: name });

        let mut sorted = ranges.clone();
        sorted.sort();
        for pair in sorted.windows(2) {
            let (first, second) = (pair[0], pair[1]);
            ensure!(
                !first.overlaps(&second),
                OverlappingRangesSnafu {
                    group: name,
                    first,
                    second
                }
            );
        }

        Ok(Self { name, ranges })
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ranges in the order they were given.
    pub fn ranges(&self) -> &[DateRange] {
        &self.ranges
    }

    /// Whether `day` falls in any of the group's ranges.
    pub fn contains(&self, day: chrono::NaiveDate) -> bool {
        self.ranges.iter().any(|r| r.contains(day))
    }

    /// Total number of days across all ranges.
    pub fn total_days(&self) -> u64 {
        self.ranges.iter().map(DateRange::days).sum()
    }
}

impl TryFrom<PeriodGroupDef> for PeriodGroup {
    type Error = InvalidPeriodGroupError;

    fn try_from(def: PeriodGroupDef) -> Result<Self, Self::Error> {
        PeriodGroup::new(def.name, def.ranges)
    }
}

/// Ordered collection of groups keyed by name.
///
/// Inserting a group under an existing name replaces that group's ranges and
/// keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeriodGroups {
    groups: Vec<PeriodGroup>,
}

impl PeriodGroups {
    /// Empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a group. Returns the replaced group, if any.
    pub fn insert(&mut self, group: PeriodGroup) -> Option<PeriodGroup> {
        match self.groups.iter_mut().find(|g| g.name == group.name) {
            Some(slot) => Some(std::mem::replace(slot, group)),
            None => {
                self.groups.push(group);
                None
            }
        }
    }

    /// Remove a group by name.
    pub fn remove(&mut self, name: &str) -> Option<PeriodGroup> {
        let idx = self.groups.iter().position(|g| g.name == name)?;
        Some(self.groups.remove(idx))
    }

    /// Look up a group by name.
    pub fn get(&self, name: &str) -> Option<&PeriodGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Groups in insertion order.
    pub fn as_slice(&self) -> &[PeriodGroup] {
        &self.groups
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether there are no groups.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl FromIterator<PeriodGroup> for PeriodGroups {
    fn from_iter<I: IntoIterator<Item = PeriodGroup>>(iter: I) -> Self {
        let mut out = PeriodGroups::new();
        for g in iter {
            out.insert(g);
        }
        out
    }
}
