//! Serialization of coverage into cache-file metadata.
//!
//! Coverage is stored in the Parquet key-value metadata of each cache file as
//! a small JSON document listing the covered days as inclusive date runs:
//!
//! ```json
//! {"version":1,"runs":[["2024-01-01","2024-03-31"],["2024-06-01","2024-06-30"]]}
//! ```
//!
//! Runs keep the metadata human-readable; the bitmap is rebuilt on load.

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu, ensure};

use crate::{
    coverage::{Coverage, days},
    model::DateRange,
};

/// Current coverage metadata format version.
pub const COVERAGE_FORMAT_VERSION: u32 = 1;

/// Errors that can occur during coverage serialization or deserialization.
#[derive(Debug, Snafu)]
pub enum CoverageSerdeError {
    /// JSON encoding failed.
    #[snafu(display("Failed to serialize coverage metadata: {source}"))]
    Serialize {
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// JSON decoding failed (including invalid date runs).
    #[snafu(display("Failed to deserialize coverage metadata: {source}"))]
    Deserialize {
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// The metadata was written by an incompatible format version.
    #[snafu(display("Unsupported coverage metadata version {version}"))]
    UnsupportedVersion {
        /// Version found in the file.
        version: u32,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct CoverageDoc {
    version: u32,
    runs: Vec<DateRange>,
}

/// Covered days as inclusive date ranges, in ascending order.
pub fn coverage_to_ranges(cov: &Coverage) -> Vec<DateRange> {
    cov.present_runs()
        .into_iter()
        .map(days::range_from_run)
        .collect()
}

/// Rebuild coverage from date ranges (overlaps are harmless).
pub fn coverage_from_ranges<'a>(ranges: impl IntoIterator<Item = &'a DateRange>) -> Coverage {
    let mut bitmap = RoaringBitmap::new();
    for range in ranges {
        bitmap |= days::expected_days(range);
    }
    Coverage::from_bitmap(bitmap)
}

/// Encode coverage as the JSON metadata document.
pub fn coverage_to_json(cov: &Coverage) -> Result<String, CoverageSerdeError> {
    let doc = CoverageDoc {
        version: COVERAGE_FORMAT_VERSION,
        runs: coverage_to_ranges(cov),
    };
    serde_json::to_string(&doc).context(SerializeSnafu)
}

/// Decode the JSON metadata document.
pub fn coverage_from_json(json: &str) -> Result<Coverage, CoverageSerdeError> {
    let doc: CoverageDoc = serde_json::from_str(json).context(DeserializeSnafu)?;
    ensure!(
        doc.version == COVERAGE_FORMAT_VERSION,
        UnsupportedVersionSnafu {
            version: doc.version
        }
    );
    Ok(coverage_from_ranges(&doc.runs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn range(a: (i32, u32, u32), b: (i32, u32, u32)) -> DateRange {
        let start = NaiveDate::from_ymd_opt(a.0, a.1, a.2).expect("valid date");
        let end = NaiveDate::from_ymd_opt(b.0, b.1, b.2).expect("valid date");
        DateRange::new(start, end).expect("valid range")
    }

    #[test]
    fn json_keeps_disjoint_runs() -> Result<(), Box<dyn std::error::Error>> {
        let runs = [
            range((2024, 1, 1), (2024, 1, 31)),
            range((2024, 3, 1), (2024, 3, 2)),
        ];
        let cov = coverage_from_ranges(&runs);

        let json = coverage_to_json(&cov)?;
        assert!(json.contains(r#"["2024-03-01","2024-03-02"]"#));

        let back = coverage_from_json(&json)?;
        assert_eq!(coverage_to_ranges(&back), runs.to_vec());
        Ok(())
    }

    #[test]
    fn adjacent_ranges_collapse_into_one_run() {
        let cov = coverage_from_ranges(&[
            range((2024, 1, 1), (2024, 1, 10)),
            range((2024, 1, 11), (2024, 1, 20)),
        ]);
        assert_eq!(
            coverage_to_ranges(&cov),
            vec![range((2024, 1, 1), (2024, 1, 20))]
        );
    }

    #[test]
    fn rejects_garbage_and_unknown_versions() {
        assert!(matches!(
            coverage_from_json("not json"),
            Err(CoverageSerdeError::Deserialize { .. })
        ));
        assert!(matches!(
            coverage_from_json(r#"{"version":99,"runs":[]}"#),
            Err(CoverageSerdeError::UnsupportedVersion { version: 99 })
        ));
    }
}
