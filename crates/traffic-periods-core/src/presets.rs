//! Named period-group presets.
//!
//! A [`Preset`] bundles period group definitions with an optional weekday
//! filter. A few presets are built in; others are saved as pretty-printed
//! JSON files by a [`PresetStore`]:
//!
//! ```json
//! {
//!   "groups": [{"name": "Term time", "ranges": [["2025-09-01", "2025-10-24"]]}],
//!   "days": ["mon", "tue", "wed", "thu", "fri"]
//! }
//! ```
//!
//! Groups are stored unvalidated and checked when an analysis runs.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::{
    aggregate::WeekdaySet,
    model::{DateRange, PeriodGroupDef},
    storage::{self, CacheLocation, StorageError},
};

/// Errors from saving or loading presets.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PresetError {
    /// Preset names must contain at least one letter or digit.
    #[snafu(display("invalid preset name {name:?}"))]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// No built-in or saved preset has this name.
    #[snafu(display("no preset named {name:?}"))]
    NotFound {
        /// Requested name.
        name: String,
    },

    /// Filesystem error.
    #[snafu(display("preset I/O error at {path}: {source}"))]
    Io {
        /// File or directory involved.
        path: String,
        /// Underlying error.
        source: io::Error,
    },

    /// Writing a preset file failed.
    #[snafu(display("cannot save preset: {source}"))]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },

    /// A preset file is not valid JSON of the expected shape.
    #[snafu(display("invalid preset file {path}: {source}"))]
    Json {
        /// File involved.
        path: String,
        /// Underlying error.
        source: serde_json::Error,
    },
}

/// Period groups plus an optional weekday filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    /// Group definitions, in display order.
    pub groups: Vec<PeriodGroupDef>,
    /// Weekdays to keep when analysing; all days when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<WeekdaySet>,
}

fn ranges(spans: &[((i32, u32, u32), (i32, u32, u32))]) -> Vec<DateRange> {
    spans
        .iter()
        .filter_map(|&((y1, m1, d1), (y2, m2, d2))| {
            let start = NaiveDate::from_ymd_opt(y1, m1, d1)?;
            let end = NaiveDate::from_ymd_opt(y2, m2, d2)?;
            DateRange::new(start, end).ok()
        })
        .collect()
}

fn cambridge_terms_2025_26() -> PeriodGroupDef {
    PeriodGroupDef::new(
        "Term time",
        ranges(&[
            ((2025, 9, 1), (2025, 10, 24)),
            ((2025, 11, 3), (2025, 12, 19)),
            ((2026, 1, 5), (2026, 2, 13)),
            ((2026, 2, 23), (2026, 3, 27)),
            ((2026, 4, 13), (2026, 5, 22)),
            ((2026, 6, 1), (2026, 7, 20)),
        ]),
    )
}

fn cambridge_holidays_2025_26() -> PeriodGroupDef {
    PeriodGroupDef::new(
        "School holidays",
        ranges(&[
            ((2025, 10, 27), (2025, 10, 31)),
            ((2025, 12, 22), (2026, 1, 2)),
            ((2026, 2, 16), (2026, 2, 20)),
            ((2026, 3, 30), (2026, 4, 10)),
            ((2026, 5, 25), (2026, 5, 29)),
        ]),
    )
}

/// Presets shipped with the application, by name.
pub fn builtin_presets() -> Vec<(&'static str, Preset)> {
    let workdays = Some(WeekdaySet::WORKDAYS);
    vec![
        (
            "Cambridge: Term vs Holidays 2025-26",
            Preset {
                groups: vec![cambridge_terms_2025_26(), cambridge_holidays_2025_26()],
                days: workdays,
            },
        ),
        (
            "Cambridge: Term time 2025-26",
            Preset {
                groups: vec![cambridge_terms_2025_26()],
                days: workdays,
            },
        ),
        (
            "Cambridge: School holidays 2025-26",
            Preset {
                groups: vec![cambridge_holidays_2025_26()],
                days: workdays,
            },
        ),
    ]
}

/// Built-in preset by exact name.
pub fn builtin(name: &str) -> Option<Preset> {
    builtin_presets()
        .into_iter()
        .find(|(n, _)| *n == name)
        .map(|(_, p)| p)
}

/// File-name-safe form of a preset name.
fn file_stem(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Directory of saved presets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetStore {
    dir: PathBuf,
}

impl PresetStore {
    /// Store rooted at `dir`; the directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the preset files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name_for(name: &str) -> Result<String, PresetError> {
        let stem = file_stem(name);
        ensure!(
            stem.chars().any(char::is_alphanumeric),
            InvalidNameSnafu { name }
        );
        Ok(format!("{stem}.json"))
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, PresetError> {
        Ok(self.dir.join(Self::file_name_for(name)?))
    }

    /// Save `preset` under `name`, replacing any preset of the same name.
    ///
    /// The file is replaced atomically; a failed save leaves the previous
    /// version in place.
    pub fn save(&self, name: &str, preset: &Preset) -> Result<PathBuf, PresetError> {
        let file_name = Self::file_name_for(name)?;
        let path = self.dir.join(&file_name);
        let json = serde_json::to_string_pretty(preset).context(JsonSnafu {
            path: path.display().to_string(),
        })?;
        storage::write_atomic(
            &CacheLocation::local(&self.dir),
            Path::new(&file_name),
            json.as_bytes(),
        )
        .context(StorageSnafu)?;
        Ok(path)
    }

    /// Names of saved presets, sorted.
    pub fn list(&self) -> Result<Vec<String>, PresetError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).context(IoSnafu {
                    path: self.dir.display().to_string(),
                });
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.context(IoSnafu {
                path: self.dir.display().to_string(),
            })?;
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Load a saved preset.
    pub fn load(&self, name: &str) -> Result<Preset, PresetError> {
        let path = self.path_for(name)?;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return NotFoundSnafu { name }.fail();
            }
            Err(e) => {
                return Err(e).context(IoSnafu {
                    path: path.display().to_string(),
                });
            }
        };
        serde_json::from_str(&text).context(JsonSnafu {
            path: path.display().to_string(),
        })
    }

    /// A built-in preset, or else a saved one.
    pub fn resolve(&self, name: &str) -> Result<Preset, PresetError> {
        match builtin(name) {
            Some(preset) => Ok(preset),
            None => self.load(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PeriodGroup;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn builtins_are_valid_groups() -> TestResult {
        let all = builtin_presets();
        assert_eq!(all.len(), 3);
        for (_, preset) in &all {
            for def in &preset.groups {
                PeriodGroup::try_from(def.clone())?;
            }
            assert_eq!(preset.days, Some(WeekdaySet::WORKDAYS));
        }
        let both = builtin("Cambridge: Term vs Holidays 2025-26").ok_or("missing")?;
        assert_eq!(both.groups[0].ranges.len(), 6);
        assert_eq!(both.groups[1].ranges.len(), 5);
        Ok(())
    }

    #[test]
    fn save_list_load() -> TestResult {
        let tmp = TempDir::new()?;
        let store = PresetStore::new(tmp.path().join("saved_periods"));
        assert!(store.list()?.is_empty());

        let preset = Preset {
            groups: vec![cambridge_holidays_2025_26()],
            days: None,
        };
        let path = store.save("Spring/Summer", &preset)?;
        assert!(path.ends_with("Spring_Summer.json"));
        store.save("another", &preset)?;

        assert_eq!(store.list()?, vec!["Spring_Summer", "another"]);
        assert_eq!(store.load("Spring/Summer")?, preset);
        assert!(matches!(
            store.load("missing"),
            Err(PresetError::NotFound { .. })
        ));
        assert!(matches!(
            store.save("///", &preset),
            Err(PresetError::InvalidName { .. })
        ));
        Ok(())
    }

    #[test]
    fn failed_save_keeps_the_previous_version() -> TestResult {
        let tmp = TempDir::new()?;
        let store = PresetStore::new(tmp.path());
        let old = Preset {
            groups: vec![cambridge_terms_2025_26()],
            days: None,
        };
        store.save("weeks", &old)?;

        // occupy the temporary file name so the replacement cannot be written
        std::fs::create_dir(tmp.path().join("weeks.tmp"))?;
        let new = Preset {
            groups: vec![cambridge_holidays_2025_26()],
            days: Some(WeekdaySet::WEEKEND),
        };
        assert!(matches!(
            store.save("weeks", &new),
            Err(PresetError::Storage { .. })
        ));
        assert_eq!(store.load("weeks")?, old);
        assert_eq!(store.list()?, vec!["weeks"]);
        Ok(())
    }

    #[test]
    fn resolve_prefers_builtins() -> TestResult {
        let tmp = TempDir::new()?;
        let store = PresetStore::new(tmp.path());
        let p = store.resolve("Cambridge: Term time 2025-26")?;
        assert_eq!(p.groups.len(), 1);
        Ok(())
    }
}
