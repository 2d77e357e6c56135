//! Runtime configuration.
//!
//! A [`Config`] is built once at startup and its parts are handed to the
//! transport, fetcher and cache store constructors. Nothing reads the
//! environment after that.
//!
//! | variable              | meaning                                  |
//! |-----------------------|------------------------------------------|
//! | `TELRAAM_API_KEY`     | API key (required)                       |
//! | `TELRAAM_SEGMENT_IDS` | comma-separated segment ids (optional)   |
//! | `TELRAAM_CACHE_DIR`   | cache directory, default `data`          |
//! | `TELRAAM_PRESETS_DIR` | saved presets, default `saved_periods`   |
//! | `TELRAAM_API_BASE`    | API base URL, default [`DEFAULT_API_BASE`] |
//!
//! Commands that never touch the network only need [`LocalPaths`] and
//! [`segment_ids_from_env`], which do not require a key.

use std::{fmt, path::PathBuf};

use snafu::prelude::*;

use crate::{
    fetch::FetchSettings,
    model::{IdParseError, SegmentId},
};

/// Production API base URL.
pub const DEFAULT_API_BASE: &str = "https://telraam-api.net/v1";
/// Cache directory used when none is configured.
pub const DEFAULT_CACHE_DIR: &str = "data";
/// Preset directory used when none is configured.
pub const DEFAULT_PRESETS_DIR: &str = "saved_periods";

const API_KEY_VAR: &str = "TELRAAM_API_KEY";
const SEGMENTS_VAR: &str = "TELRAAM_SEGMENT_IDS";
const CACHE_DIR_VAR: &str = "TELRAAM_CACHE_DIR";
const PRESETS_DIR_VAR: &str = "TELRAAM_PRESETS_DIR";
const API_BASE_VAR: &str = "TELRAAM_API_BASE";

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Configuration could not be assembled.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    /// A required variable is unset or blank.
    #[snafu(display("{name} is not set"))]
    Missing {
        /// Variable name.
        name: String,
    },

    /// A segment id in the segment list is invalid.
    #[snafu(display("{name}: {source}"))]
    BadSegment {
        /// Variable name.
        name: String,
        /// Parse failure.
        source: IdParseError,
    },
}

/// API credential.
///
/// `Debug` and `Display` never print the value, and it is not serializable.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key; blank keys are rejected.
    pub fn new(key: impl Into<String>) -> Result<Self, ConfigError> {
        let key = key.into().trim().to_string();
        ensure!(!key.is_empty(), MissingSnafu { name: API_KEY_VAR });
        Ok(Self(key))
    }

    /// The raw key, for the request header only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Local directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPaths {
    /// Cache directory.
    pub cache_dir: PathBuf,
    /// Saved preset directory.
    pub presets_dir: PathBuf,
}

impl LocalPaths {
    /// Read the directories from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the directories through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let dir = |name: &str, default: &str| {
            non_blank(lookup(name)).map_or_else(|| PathBuf::from(default), PathBuf::from)
        };
        Self {
            cache_dir: dir(CACHE_DIR_VAR, DEFAULT_CACHE_DIR),
            presets_dir: dir(PRESETS_DIR_VAR, DEFAULT_PRESETS_DIR),
        }
    }
}

/// Everything the application needs to talk to the API and cache results.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// API credential.
    pub api_key: ApiKey,
    /// Segments of interest; may be empty.
    pub segment_ids: Vec<SegmentId>,
    /// Cache directory.
    pub cache_dir: PathBuf,
    /// Saved preset directory.
    pub presets_dir: PathBuf,
    /// API base URL without trailing path.
    pub api_base: String,
    /// Chunking, pacing and retry settings.
    pub fetch: FetchSettings,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| non_blank(lookup(name));

        let api_key = ApiKey::new(get(API_KEY_VAR).context(MissingSnafu { name: API_KEY_VAR })?)?;

        let segment_ids = segment_ids_from_lookup(&lookup)?;

        let LocalPaths {
            cache_dir,
            presets_dir,
        } = LocalPaths::from_lookup(&lookup);

        let api_base = get(API_BASE_VAR)
            .map(|b| b.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Ok(Self {
            api_key,
            segment_ids,
            cache_dir,
            presets_dir,
            api_base,
            fetch: FetchSettings::default(),
        })
    }
}

/// Segments of interest from `TELRAAM_SEGMENT_IDS` in the process environment.
///
/// Needs no key; empty when the variable is unset.
pub fn segment_ids_from_env() -> Result<Vec<SegmentId>, ConfigError> {
    segment_ids_from_lookup(|name| std::env::var(name).ok())
}

/// Segments of interest read through `lookup`.
pub fn segment_ids_from_lookup<F>(lookup: F) -> Result<Vec<SegmentId>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match non_blank(lookup(SEGMENTS_VAR)) {
        Some(raw) => parse_segment_list(&raw).context(BadSegmentSnafu { name: SEGMENTS_VAR }),
        None => Ok(Vec::new()),
    }
}

/// Parse a comma-separated list of segment ids, skipping blanks.
pub fn parse_segment_list(raw: &str) -> Result<Vec<SegmentId>, IdParseError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}
