//! Local, coverage-aware cache of fetched records.
//!
//! Each [`CacheKey`] maps to one Parquet file under the cache directory,
//! `<segment>_<granularity>_<kind>.parquet`. The file holds the records of
//! every day fetched so far and the day coverage that says which days those
//! are (see [`crate::storage::columnar`]).
//!
//! [`CacheStore::get`] computes the days of the requested span that the
//! coverage lacks, fetches them chunk by chunk, and rewrites the file after
//! every chunk. A request that lies entirely inside the coverage does not
//! touch the network. Coverage only grows; [`CacheStore::clear`] is the only
//! way to invalidate an entry.

use std::{collections::BTreeMap, ops::ControlFlow, path::PathBuf};

use log::{debug, info, warn};
use snafu::prelude::*;

use crate::{
    coverage::{Coverage, days, serde::coverage_to_ranges},
    fetch::{FetchChunk, FetchError, FetchReport, Fetcher, Transport},
    model::{DataKind, DateRange, Granularity, SegmentId, TrafficRecord},
    storage::{
        self, CacheLocation, ColumnarSnafu, StorageError,
        columnar::{self, ColumnarError},
    },
};

/// Identity of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Road segment.
    pub segment: SegmentId,
    /// Record granularity.
    pub granularity: Granularity,
    /// Payload shape.
    pub kind: DataKind,
}

impl CacheKey {
    /// Build a key.
    pub fn new(segment: SegmentId, granularity: Granularity, kind: DataKind) -> Self {
        Self {
            segment,
            granularity,
            kind,
        }
    }

    /// File name of the entry inside the cache directory.
    pub fn file_name(&self) -> String {
        format!("{}_{}_{}.parquet", self.segment, self.granularity, self.kind)
    }

    fn rel_path(&self) -> PathBuf {
        PathBuf::from(self.file_name())
    }
}

/// Why an existing cache file could not be used.
///
/// These are recovered from by treating the entry as empty.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CacheReadError {
    /// The file exists but could not be read.
    #[snafu(display("cannot read cache file: {source}"))]
    Unreadable {
        /// Underlying I/O error.
        source: StorageError,
    },

    /// The file is not a valid cache file.
    #[snafu(display("corrupt cache file: {source}"))]
    Corrupt {
        /// Underlying format error.
        source: ColumnarError,
    },

    /// The file holds a different data kind than its name says.
    #[snafu(display("cache file holds {found} data, expected {expected}"))]
    KindMismatch {
        /// Kind implied by the key.
        expected: DataKind,
        /// Kind recorded in the file.
        found: DataKind,
    },
}

/// Errors returned by [`CacheStore`] operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CacheError {
    /// Fetching missing days failed or was cancelled. Chunks fetched before
    /// the failure are already stored.
    #[snafu(display("cannot fill cache for {key}: {source}"))]
    Fetch {
        /// Entry being filled.
        key: String,
        /// Fetch failure, carrying the unsatisfied span.
        source: FetchError,
    },

    /// Writing or deleting the cache file failed.
    #[snafu(display("cache storage error: {source}"))]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },
}

impl CacheError {
    /// Days of the request that could not be served.
    pub fn unsatisfied(&self) -> Option<DateRange> {
        match self {
            CacheError::Fetch { source, .. } => source.unsatisfied(),
            CacheError::Storage { .. } => None,
        }
    }
}

/// Result of [`CacheStore::get`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheRead {
    /// Every record of the requested span, sorted by timestamp.
    pub records: Vec<TrafficRecord>,
    /// Chunks fetched from the network to serve this read.
    pub fetched_chunks: usize,
    /// Entries dropped by validation during those fetches.
    pub dropped: usize,
}

/// Progress notification sent after each chunk is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheProgress {
    /// Chunk just stored; `index`/`total` count across the whole read.
    pub chunk: FetchChunk,
    /// Records the chunk contributed.
    pub records: usize,
}

/// In-memory form of one cache file.
#[derive(Debug, Clone, Default)]
struct CacheEntry {
    records: BTreeMap<i64, TrafficRecord>,
    coverage: Coverage,
}

impl CacheEntry {
    fn merge(&mut self, span: &DateRange, records: &[TrafficRecord]) {
        for r in records {
            self.records.insert(r.timestamp.timestamp_millis(), r.clone());
        }
        self.coverage.extend(&days::expected_days(span));
    }

    fn records_in(&self, span: &DateRange) -> Vec<TrafficRecord> {
        let lo = span.start().and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
        let hi = span
            .end_exclusive()
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default()
            .and_utc();
        self.records
            .range(lo.timestamp_millis()..hi.timestamp_millis())
            .map(|(_, r)| r.clone())
            .collect()
    }

    fn encode(&self, kind: DataKind) -> Result<Vec<u8>, ColumnarError> {
        let records: Vec<TrafficRecord> = self.records.values().cloned().collect();
        columnar::encode(kind, &records, &self.coverage)
    }
}

/// The entry files of a cache directory, without any way to fill them.
///
/// Enough for inspecting and clearing entries, which never touch the network.
#[derive(Debug, Clone)]
pub struct CacheDir {
    location: CacheLocation,
}

impl CacheDir {
    /// Entries under `location`.
    pub fn new(location: CacheLocation) -> Self {
        Self { location }
    }

    /// Covered days of an entry as inclusive runs.
    pub fn covered(&self, key: &CacheKey) -> Vec<DateRange> {
        coverage_to_ranges(&self.load(key).coverage)
    }

    /// Delete an entry. Returns whether a file was removed.
    pub fn clear(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let removed = storage::remove_file(&self.location, &key.rel_path()).context(StorageSnafu)?;
        if removed {
            info!("cleared cache entry {}", key.file_name());
        }
        Ok(removed)
    }

    fn read_entry(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheReadError> {
        let Some(bytes) =
            storage::read_all_bytes(&self.location, &key.rel_path()).context(UnreadableSnafu)?
        else {
            return Ok(None);
        };
        let payload = columnar::decode(bytes).context(CorruptSnafu)?;
        ensure!(
            payload.kind == key.kind,
            KindMismatchSnafu {
                expected: key.kind,
                found: payload.kind,
            }
        );

        let records = payload
            .records
            .into_iter()
            .map(|r| (r.timestamp.timestamp_millis(), r))
            .collect();
        Ok(Some(CacheEntry {
            records,
            coverage: payload.coverage,
        }))
    }

    fn load(&self, key: &CacheKey) -> CacheEntry {
        match self.read_entry(key) {
            Ok(Some(entry)) => entry,
            Ok(None) => CacheEntry::default(),
            Err(e) => {
                warn!(
                    "ignoring cache file {}: {e}",
                    self.location.join(&key.rel_path()).display()
                );
                CacheEntry::default()
            }
        }
    }

    fn persist(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), CacheError> {
        let rel = key.rel_path();
        let bytes = entry
            .encode(key.kind)
            .context(ColumnarSnafu {
                path: rel.display().to_string(),
            })
            .context(StorageSnafu)?;
        storage::write_atomic(&self.location, &rel, &bytes).context(StorageSnafu)
    }
}

/// Cache directory plus the fetcher used to fill it.
#[derive(Debug)]
pub struct CacheStore<T> {
    dir: CacheDir,
    fetcher: Fetcher<T>,
}

impl<T: Transport> CacheStore<T> {
    /// Cache in `location`, filled through `fetcher`.
    pub fn new(location: CacheLocation, fetcher: Fetcher<T>) -> Self {
        Self {
            dir: CacheDir::new(location),
            fetcher,
        }
    }

    /// Records of `range`, fetching whatever days are not cached yet.
    pub fn get(
        &mut self,
        segment: &SegmentId,
        granularity: Granularity,
        kind: DataKind,
        range: &DateRange,
    ) -> Result<CacheRead, CacheError> {
        self.get_with(segment, granularity, kind, range, |_| ControlFlow::Continue(()))
    }

    /// Like [`CacheStore::get`], reporting each stored chunk to `on_progress`.
    ///
    /// Returning `ControlFlow::Break` stops before the next chunk; what was
    /// stored so far stays stored.
    pub fn get_with<F>(
        &mut self,
        segment: &SegmentId,
        granularity: Granularity,
        kind: DataKind,
        range: &DateRange,
        mut on_progress: F,
    ) -> Result<CacheRead, CacheError>
    where
        F: FnMut(&CacheProgress) -> ControlFlow<()>,
    {
        let key = CacheKey::new(segment.clone(), granularity, kind);
        let mut entry = self.dir.load(&key);

        let expected = days::expected_days(range);
        let runs = entry.coverage.missing_runs(&expected, None);
        if runs.is_empty() {
            debug!("cache hit for {} {range}", key.file_name());
            return Ok(CacheRead {
                records: entry.records_in(range),
                ..CacheRead::default()
            });
        }

        let mut chunks = Vec::new();
        for run in runs {
            let gap = days::range_from_run(run);
            debug!("cache gap for {}: {gap}", key.file_name());
            let planned = self.fetcher.plan(&gap).context(FetchSnafu {
                key: key.file_name(),
            })?;
            chunks.extend(planned);
        }
        let total = chunks.len();
        for (index, chunk) in chunks.iter_mut().enumerate() {
            chunk.index = index;
            chunk.total = total;
        }

        let last_end = chunks.last().map_or(range.end(), |c| c.range.end());
        let mut report = FetchReport::default();
        for (pos, chunk) in chunks.iter().enumerate() {
            let chunk_report = match self.fetcher.fetch_chunk(segment, granularity, kind, chunk) {
                Ok(r) => r,
                Err(source) => {
                    return Err(CacheError::Fetch {
                        key: key.file_name(),
                        source: FetchError::ChunkFailed {
                            source,
                            remaining: DateRange::from_ordered(chunk.range.start(), last_end),
                            partial: Box::new(report),
                        },
                    });
                }
            };

            entry.merge(&chunk.range, &chunk_report.records);
            self.dir.persist(&key, &entry)?;

            let flow = on_progress(&CacheProgress {
                chunk: *chunk,
                records: chunk_report.records.len(),
            });
            report.absorb(chunk_report);

            if flow.is_break()
                && let Some(next) = chunks.get(pos + 1)
            {
                info!("filling {} cancelled before {}", key.file_name(), next.range);
                return Err(CacheError::Fetch {
                    key: key.file_name(),
                    source: FetchError::Cancelled {
                        remaining: DateRange::from_ordered(next.range.start(), last_end),
                        partial: Box::new(report),
                    },
                });
            }
        }

        info!(
            "cached {} records for {} ({} chunk(s), {} dropped)",
            report.records.len(),
            key.file_name(),
            report.fetched.len(),
            report.dropped
        );

        Ok(CacheRead {
            records: entry.records_in(range),
            fetched_chunks: report.fetched.len(),
            dropped: report.dropped,
        })
    }

    /// Covered days of an entry as inclusive runs.
    pub fn covered(&self, key: &CacheKey) -> Vec<DateRange> {
        self.dir.covered(key)
    }

    /// Delete an entry. Returns whether a file was removed.
    pub fn clear(&self, key: &CacheKey) -> Result<bool, CacheError> {
        self.dir.clear(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Modality, ModalityCounts};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).expect("valid date")
    }

    fn rec(d: u32, h: u32, car: f64) -> TrafficRecord {
        let ts = Utc
            .with_ymd_and_hms(2024, 5, d, h, 0, 0)
            .single()
            .expect("valid ts");
        TrafficRecord::new(ts, ModalityCounts::new().with(Modality::Car, car))
    }

    #[test]
    fn file_name_includes_the_whole_key() -> Result<(), Box<dyn std::error::Error>> {
        let key = CacheKey::new(
            SegmentId::new("9000001234")?,
            Granularity::Hourly,
            DataKind::SpeedHistogram,
        );
        assert_eq!(key.file_name(), "9000001234_hourly_speed.parquet");
        Ok(())
    }

    #[test]
    fn merge_dedups_by_timestamp_newest_wins() -> Result<(), Box<dyn std::error::Error>> {
        let mut entry = CacheEntry::default();
        let span = DateRange::new(day(1), day(2))?;
        entry.merge(&span, &[rec(1, 8, 1.0), rec(2, 9, 2.0)]);
        entry.merge(&DateRange::single(day(1))?, &[rec(1, 8, 10.0)]);

        let all = entry.records_in(&span);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].counts.get(Modality::Car), Some(10.0));
        assert_eq!(entry.coverage.cardinality(), 2);
        Ok(())
    }

    #[test]
    fn records_in_respects_day_bounds() -> Result<(), Box<dyn std::error::Error>> {
        let mut entry = CacheEntry::default();
        entry.merge(
            &DateRange::new(day(1), day(3))?,
            &[rec(1, 23, 1.0), rec(2, 0, 2.0), rec(2, 23, 3.0), rec(3, 0, 4.0)],
        );
        let mid = entry.records_in(&DateRange::single(day(2))?);
        let cars: Vec<_> = mid.iter().filter_map(|r| r.counts.get(Modality::Car)).collect();
        assert_eq!(cars, vec![2.0, 3.0]);
        Ok(())
    }
}
