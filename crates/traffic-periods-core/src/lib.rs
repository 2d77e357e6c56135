//! Core engine for comparing road-traffic counts across period groups.
//!
//! This crate provides the pieces behind the `tperiods` tool:
//!
//! - Domain types for segments, records, date ranges and period groups
//!   (`model` module).
//! - A rate-limited, chunked, retrying client for the traffic report API
//!   with a pluggable transport (`fetch` module).
//! - A local, coverage-aware Parquet cache that only fetches the days it
//!   lacks and persists after every chunk (`cache`, `storage` modules).
//! - RoaringBitmap-based day coverage used for gap detection and chunk
//!   planning (`coverage` module).
//! - Pure aggregation of records into hourly profiles, daily volumes, modal
//!   splits and speed distributions per group (`aggregate` module).
//! - Configuration, presets and an analysis session tying it together.
//!
//! Everything is synchronous; network calls block the calling thread.
#![deny(missing_docs)]
pub mod aggregate;
pub mod cache;
pub mod config;
pub mod coverage;
pub mod fetch;
pub mod model;
pub mod presets;
pub mod session;
pub mod storage;
