//! Conversion of raw report entries into [`TrafficRecord`]s.
//!
//! Entries that fail these checks are dropped by the fetcher:
//!
//! - `date` parses as RFC 3339 or `YYYY-MM-DD HH:MM:SS` (UTC),
//! - the timestamp lies inside the requested chunk,
//! - it is strictly later than the previously accepted entry,
//! - the fields required by the data kind are numeric.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use snafu::prelude::*;

use crate::model::{
    DataKind, DateRange, Modality, ModalityCounts, SpeedBinLayout, SpeedHistogram, TrafficRecord,
};

const DATE_FIELD: &str = "date";

/// Why one report entry was rejected.
#[derive(Debug, Snafu, Clone, PartialEq)]
#[snafu(visibility(pub(crate)))]
pub enum MalformedRecordError {
    /// The entry is not a JSON object.
    #[snafu(display("entry is not an object"))]
    NotAnObject,

    /// The `date` field is missing or unparseable.
    #[snafu(display("unparseable timestamp {value:?}"))]
    BadTimestamp {
        /// Raw value.
        value: String,
    },

    /// The timestamp lies outside the chunk that was requested.
    #[snafu(display("timestamp {timestamp} outside requested span {span}"))]
    OutOfSpan {
        /// Parsed timestamp.
        timestamp: DateTime<Utc>,
        /// Requested chunk.
        span: DateRange,
    },

    /// The timestamp does not advance past the previous entry.
    #[snafu(display("timestamp {timestamp} not after previous {previous}"))]
    NotIncreasing {
        /// Parsed timestamp.
        timestamp: DateTime<Utc>,
        /// Previously accepted timestamp.
        previous: DateTime<Utc>,
    },

    /// A field required for the data kind is missing or not a number.
    #[snafu(display("missing or non-numeric field {field}"))]
    MissingField {
        /// Field name.
        field: String,
    },

    /// No speed histogram of a known layout was found.
    #[snafu(display("no speed histogram of a known layout"))]
    MissingHistogram,

    /// A histogram has the wrong number of bins or a non-numeric bin.
    #[snafu(display("histogram {layout} is malformed: {detail}"))]
    BadHistogram {
        /// Layout whose field was inspected.
        layout: SpeedBinLayout,
        /// What was wrong.
        detail: String,
    },
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = raw.strip_suffix('Z').unwrap_or(raw);
    NaiveDateTime::parse_from_str(naive, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|n| n.and_utc())
}

fn number(obj: &serde_json::Map<String, Value>, field: &str) -> Option<f64> {
    match obj.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn required_fields(kind: DataKind) -> &'static [Modality] {
    match kind {
        DataKind::Counts => &Modality::CLASSIC,
        DataKind::SpeedHistogram => &[Modality::Car],
    }
}

fn histogram_values(raw: &Value) -> Option<Vec<Value>> {
    match raw {
        Value::Array(items) => Some(items.clone()),
        // some sensors deliver the histogram as a JSON-encoded string
        Value::String(s) => match serde_json::from_str::<Value>(s).ok()? {
            Value::Array(items) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

fn parse_histogram(
    obj: &serde_json::Map<String, Value>,
) -> Result<SpeedHistogram, MalformedRecordError> {
    for layout in SpeedBinLayout::PREFERENCE {
        let Some(raw) = obj.get(layout.wire_name()) else {
            continue;
        };
        if raw.is_null() {
            continue;
        }
        let items = histogram_values(raw).context(BadHistogramSnafu {
            layout,
            detail: "not an array",
        })?;
        ensure!(
            items.len() == layout.bin_count(),
            BadHistogramSnafu {
                layout,
                detail: format!("{} bins, expected {}", items.len(), layout.bin_count()),
            }
        );
        let shares = items
            .iter()
            .map(Value::as_f64)
            .collect::<Option<Vec<f64>>>()
            .context(BadHistogramSnafu {
                layout,
                detail: "non-numeric bin",
            })?;
        return Ok(SpeedHistogram { layout, shares });
    }
    MissingHistogramSnafu.fail()
}

/// Validate one raw entry from chunk `span`.
///
/// `previous` is the timestamp of the last accepted entry of the same chunk.
pub fn parse_record(
    raw: &Value,
    kind: DataKind,
    span: &DateRange,
    previous: Option<DateTime<Utc>>,
) -> Result<TrafficRecord, MalformedRecordError> {
    let obj = raw.as_object().context(NotAnObjectSnafu)?;

    let raw_ts = obj.get(DATE_FIELD).and_then(Value::as_str).unwrap_or_default();
    let timestamp = parse_timestamp(raw_ts).context(BadTimestampSnafu { value: raw_ts })?;

    ensure!(
        span.contains(timestamp.date_naive()),
        OutOfSpanSnafu {
            timestamp,
            span: *span
        }
    );
    if let Some(previous) = previous {
        ensure!(
            timestamp > previous,
            NotIncreasingSnafu {
                timestamp,
                previous
            }
        );
    }

    for m in required_fields(kind) {
        ensure!(
            number(obj, m.wire_name()).is_some(),
            MissingFieldSnafu {
                field: m.wire_name()
            }
        );
    }

    let mut counts = ModalityCounts::new();
    for m in Modality::ALL {
        counts.set(m, number(obj, m.wire_name()));
    }

    let speed = match kind {
        DataKind::Counts => None,
        DataKind::SpeedHistogram => Some(parse_histogram(obj)?),
    };

    Ok(TrafficRecord {
        timestamp,
        counts,
        speed,
    })
}
