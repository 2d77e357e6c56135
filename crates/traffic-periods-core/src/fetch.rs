//! Rate-limited, chunked retrieval of traffic reports.
//!
//! A request for an inclusive date span is split into chunks of at most
//! [`FetchSettings::max_chunk_days`] days. Chunks are fetched one at a time on
//! the calling thread:
//!
//! - consecutive request *starts* are at least [`FetchSettings::min_interval`]
//!   apart, retries included,
//! - transient failures (network, timeout, 5xx, 429) are retried up to
//!   [`FetchSettings::max_attempts`] times with linear backoff, or after the
//!   server's `Retry-After`,
//! - each returned entry is validated and malformed entries are dropped.
//!
//! [`Fetcher::fetch_with`] calls back after every chunk, which lets callers
//! persist progress or stop early. The cache store drives
//! [`Fetcher::plan`] and [`Fetcher::fetch_chunk`] directly instead.

pub mod transport;
pub mod validate;

use std::{
    ops::ControlFlow,
    thread,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

pub use transport::{HttpTransport, ReportRequest, Transport, TransportError};
pub use validate::MalformedRecordError;

use crate::model::{DataKind, DateRange, Granularity, SegmentId, TrafficRecord};

/// Tunables for chunking, pacing and retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Largest span a single request may cover.
    pub max_chunk_days: u32,
    /// Minimum time between the starts of two consecutive requests.
    #[serde(with = "duration_secs")]
    pub min_interval: Duration,
    /// Total attempts per chunk, first try included.
    pub max_attempts: u32,
    /// Base delay of the linear retry backoff.
    #[serde(with = "duration_secs")]
    pub retry_backoff: Duration,
    /// Longest server-requested `Retry-After` wait that is honoured as is;
    /// longer values are cut to this.
    #[serde(with = "duration_secs")]
    pub max_retry_after: Duration,
    /// Per-request timeout enforced by the HTTP client.
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_chunk_days: 90,
            min_interval: Duration::from_secs(1),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            max_retry_after: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// One planned request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchChunk {
    /// Zero-based position in the plan.
    pub index: usize,
    /// Number of chunks in the plan.
    pub total: usize,
    /// Days covered by this chunk.
    pub range: DateRange,
}

/// Outcome of one successfully fetched chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkReport {
    /// The chunk that was fetched.
    pub chunk: FetchChunk,
    /// Accepted records, strictly increasing by timestamp.
    pub records: Vec<TrafficRecord>,
    /// Number of entries dropped by validation.
    pub dropped: usize,
}

/// Accumulated outcome of a fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchReport {
    /// Accepted records in chunk order.
    pub records: Vec<TrafficRecord>,
    /// Entries dropped by validation.
    pub dropped: usize,
    /// Chunks fetched successfully, in order.
    pub fetched: Vec<DateRange>,
}

impl FetchReport {
    pub(crate) fn absorb(&mut self, chunk: ChunkReport) {
        self.records.extend(chunk.records);
        self.dropped += chunk.dropped;
        self.fetched.push(chunk.chunk.range);
    }
}

/// A chunk that could not be fetched.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(display("chunk {chunk} failed after {attempts} attempt(s): {source}"))]
pub struct ChunkError {
    /// Span of the failing chunk.
    pub chunk: DateRange,
    /// Attempts made.
    pub attempts: u32,
    /// Last transport error.
    pub source: TransportError,
}

/// Errors returned by [`Fetcher::fetch`] and [`Fetcher::fetch_with`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FetchError {
    /// A chunk failed permanently; earlier chunks are in `partial`.
    #[snafu(display("fetch stopped, {remaining} not fetched: {source}"))]
    ChunkFailed {
        /// The failure.
        source: ChunkError,
        /// Days from the failing chunk to the end of the request.
        remaining: DateRange,
        /// Chunks fetched before the failure.
        partial: Box<FetchReport>,
    },

    /// The per-chunk callback asked to stop.
    #[snafu(display("fetch cancelled, {remaining} not fetched"))]
    Cancelled {
        /// Days not fetched.
        remaining: DateRange,
        /// Chunks fetched before cancellation.
        partial: Box<FetchReport>,
    },

    /// The request cannot be planned.
    #[snafu(display("invalid fetch request: {detail}"))]
    InvalidRequest {
        /// What is wrong.
        detail: String,
    },
}

impl FetchError {
    /// Days the caller asked for but did not receive.
    pub fn unsatisfied(&self) -> Option<DateRange> {
        match self {
            FetchError::ChunkFailed { remaining, .. } | FetchError::Cancelled { remaining, .. } => {
                Some(*remaining)
            }
            FetchError::InvalidRequest { .. } => None,
        }
    }

    /// Records obtained before the fetch stopped.
    pub fn partial(&self) -> Option<&FetchReport> {
        match self {
            FetchError::ChunkFailed { partial, .. } | FetchError::Cancelled { partial, .. } => {
                Some(partial)
            }
            FetchError::InvalidRequest { .. } => None,
        }
    }
}

/// Sequential, paced client for the report endpoint.
#[derive(Debug)]
pub struct Fetcher<T> {
    transport: T,
    settings: FetchSettings,
    last_request: Option<Instant>,
}

impl<T: Transport> Fetcher<T> {
    /// Wrap a transport.
    pub fn new(transport: T, settings: FetchSettings) -> Self {
        Self {
            transport,
            settings,
            last_request: None,
        }
    }

    /// Split `range` into request-sized chunks.
    pub fn plan(&self, range: &DateRange) -> Result<Vec<FetchChunk>, FetchError> {
        ensure!(
            self.settings.max_chunk_days > 0,
            InvalidRequestSnafu {
                detail: "max_chunk_days must be at least 1",
            }
        );
        let ranges = range.chunks(self.settings.max_chunk_days);
        let total = ranges.len();
        Ok(ranges
            .into_iter()
            .enumerate()
            .map(|(index, range)| FetchChunk {
                index,
                total,
                range,
            })
            .collect())
    }

    /// Fetch `range` in full.
    pub fn fetch(
        &mut self,
        segment: &SegmentId,
        granularity: Granularity,
        kind: DataKind,
        range: &DateRange,
    ) -> Result<FetchReport, FetchError> {
        self.fetch_with(segment, granularity, kind, range, |_| ControlFlow::Continue(()))
    }

    /// Fetch `range`, calling `on_chunk` after each chunk.
    ///
    /// Returning `ControlFlow::Break` stops before the next chunk.
    pub fn fetch_with<F>(
        &mut self,
        segment: &SegmentId,
        granularity: Granularity,
        kind: DataKind,
        range: &DateRange,
        mut on_chunk: F,
    ) -> Result<FetchReport, FetchError>
    where
        F: FnMut(&ChunkReport) -> ControlFlow<()>,
    {
        let chunks = self.plan(range)?;
        let mut report = FetchReport::default();

        for (pos, chunk) in chunks.iter().enumerate() {
            let chunk_report = match self.fetch_chunk(segment, granularity, kind, chunk) {
                Ok(r) => r,
                Err(source) => {
                    return Err(FetchError::ChunkFailed {
                        source,
                        remaining: DateRange::from_ordered(chunk.range.start(), range.end()),
                        partial: Box::new(report),
                    });
                }
            };

            let flow = on_chunk(&chunk_report);
            report.absorb(chunk_report);

            if flow.is_break()
                && let Some(next) = chunks.get(pos + 1)
            {
                info!("fetch of {segment} cancelled before {}", next.range);
                return CancelledSnafu {
                    remaining: DateRange::from_ordered(next.range.start(), range.end()),
                    partial: Box::new(report),
                }
                .fail();
            }
        }

        Ok(report)
    }

    /// Fetch a single chunk with pacing and retries.
    pub fn fetch_chunk(
        &mut self,
        segment: &SegmentId,
        granularity: Granularity,
        kind: DataKind,
        chunk: &FetchChunk,
    ) -> Result<ChunkReport, ChunkError> {
        let request = ReportRequest::new(segment, granularity, &chunk.range);
        let max_attempts = self.settings.max_attempts.max(1);

        info!(
            "fetching {segment} {granularity} {kind} chunk {}/{} {}",
            chunk.index + 1,
            chunk.total,
            chunk.range
        );

        let mut attempt = 0;
        let raw = loop {
            attempt += 1;
            self.pace();
            match self.transport.send(&request) {
                Ok(raw) => break raw,
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let wait = match e.retry_after() {
                        Some(asked) => asked.min(self.settings.max_retry_after),
                        None => self.settings.retry_backoff * attempt,
                    };
                    warn!(
                        "chunk {} attempt {attempt}/{max_attempts} failed: {e}; retrying in {:.1}s",
                        chunk.range,
                        wait.as_secs_f64()
                    );
                    thread::sleep(wait);
                }
                Err(source) => {
                    return Err(ChunkError {
                        chunk: chunk.range,
                        attempts: attempt,
                        source,
                    });
                }
            }
        };

        let (records, dropped) = accept_records(&raw, kind, &chunk.range);
        if dropped > 0 {
            info!("dropped {dropped} malformed entries from chunk {}", chunk.range);
        }
        Ok(ChunkReport {
            chunk: *chunk,
            records,
            dropped,
        })
    }

    fn pace(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.settings.min_interval {
                thread::sleep(self.settings.min_interval - elapsed);
            }
        }
        self.last_request = Some(Instant::now());
    }
}

fn accept_records(
    raw: &[serde_json::Value],
    kind: DataKind,
    span: &DateRange,
) -> (Vec<TrafficRecord>, usize) {
    let mut records = Vec::with_capacity(raw.len());
    let mut dropped = 0;
    let mut previous: Option<DateTime<Utc>> = None;

    for entry in raw {
        match validate::parse_record(entry, kind, span, previous) {
            Ok(record) => {
                previous = Some(record.timestamp);
                records.push(record);
            }
            Err(reason) => {
                debug!("dropping entry: {reason}");
                dropped += 1;
            }
        }
    }
    (records, dropped)
}
