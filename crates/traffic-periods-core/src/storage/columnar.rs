//! Columnar (Parquet) encoding of cache entries.
//!
//! One cache file holds the records of a single (segment, granularity, kind)
//! key, sorted by timestamp, together with the key's day coverage:
//!
//! | column                | type                       | present for    |
//! |-----------------------|----------------------------|----------------|
//! | `ts`                  | `Timestamp(ms, "UTC")`     | all            |
//! | one per modality      | `Float64`, nullable        | all            |
//! | `speed_hist_layout`   | `Utf8`, nullable           | speed kind     |
//! | `speed_hist`          | `List<Float64>`, nullable  | speed kind     |
//!
//! Coverage and the data kind live in the file's key-value metadata under
//! [`COVERAGE_META_KEY`] and [`KIND_META_KEY`]. Coverage is part of the file so
//! data and coverage are always replaced together.

use std::sync::Arc;

use arrow::{
    datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit},
    error::ArrowError,
    record_batch::RecordBatch,
};
use arrow_array::{
    Array, ArrayRef, Float64Array, ListArray, StringArray, TimestampMillisecondArray,
    builder::{Float64Builder, ListBuilder, StringBuilder, TimestampMillisecondBuilder},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parquet::{
    arrow::{ArrowWriter, arrow_reader::ParquetRecordBatchReaderBuilder},
    errors::ParquetError,
    file::{metadata::KeyValue, properties::WriterProperties},
};
use snafu::prelude::*;

use crate::{
    coverage::{
        Coverage,
        serde::{CoverageSerdeError, coverage_from_json, coverage_to_json},
    },
    model::{DataKind, Modality, ModalityCounts, SpeedBinLayout, SpeedHistogram, TrafficRecord},
};

/// Metadata key holding the coverage document.
pub const COVERAGE_META_KEY: &str = "traffic_periods.coverage";
/// Metadata key holding the data kind name.
pub const KIND_META_KEY: &str = "traffic_periods.kind";

const TS_COLUMN: &str = "ts";
const SPEED_LAYOUT_COLUMN: &str = "speed_hist_layout";
const SPEED_HIST_COLUMN: &str = "speed_hist";

/// Errors from encoding or decoding a cache file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ColumnarError {
    /// Building or reading Arrow arrays failed.
    #[snafu(display("Arrow error: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// Writing or reading Parquet failed.
    #[snafu(display("Parquet error: {source}"))]
    Parquet {
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// The file carries no coverage metadata.
    #[snafu(display("Missing {COVERAGE_META_KEY} metadata"))]
    MissingCoverage,

    /// The coverage metadata could not be decoded.
    #[snafu(display("Invalid coverage metadata: {source}"))]
    CoverageMeta {
        /// Underlying decode error.
        source: CoverageSerdeError,
    },

    /// The data kind metadata is absent or unknown.
    #[snafu(display("Invalid data kind metadata: {value:?}"))]
    InvalidKind {
        /// Raw metadata value, if any.
        value: Option<String>,
    },

    /// A required column is absent.
    #[snafu(display("Missing column {column}"))]
    MissingColumn {
        /// Column name.
        column: String,
    },

    /// A column has an unexpected Arrow type.
    #[snafu(display("Column {column} has type {actual}, expected {expected}"))]
    ColumnType {
        /// Column name.
        column: String,
        /// Expected Arrow type.
        expected: String,
        /// Type found in the file.
        actual: String,
    },

    /// A row has a null or out-of-range timestamp.
    #[snafu(display("Row {row} has an invalid timestamp"))]
    InvalidTimestamp {
        /// Row index within its batch.
        row: usize,
    },

    /// A speed histogram row is inconsistent with its layout.
    #[snafu(display("Row {row} has an invalid speed histogram: {detail}"))]
    InvalidHistogram {
        /// Row index within its batch.
        row: usize,
        /// What was wrong.
        detail: String,
    },
}

/// Decoded contents of one cache file.
#[derive(Debug, Clone, PartialEq)]
pub struct CachePayload {
    /// Data kind recorded in the file.
    pub kind: DataKind,
    /// Records sorted by timestamp.
    pub records: Vec<TrafficRecord>,
    /// Days known to be fully fetched.
    pub coverage: Coverage,
}

fn ts_type() -> DataType {
    DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into()))
}

fn hist_type() -> DataType {
    DataType::List(Arc::new(Field::new("item", DataType::Float64, true)))
}

/// Arrow schema of a cache file for `kind`.
pub fn cache_schema(kind: DataKind) -> SchemaRef {
    let mut fields = vec![Field::new(TS_COLUMN, ts_type(), false)];
    fields.extend(
        Modality::ALL
            .iter()
            .map(|m| Field::new(m.wire_name(), DataType::Float64, true)),
    );
    if kind == DataKind::SpeedHistogram {
        fields.push(Field::new(SPEED_LAYOUT_COLUMN, DataType::Utf8, true));
        fields.push(Field::new(SPEED_HIST_COLUMN, hist_type(), true));
    }
    Arc::new(Schema::new(fields))
}

fn build_batch(kind: DataKind, records: &[TrafficRecord]) -> Result<RecordBatch, ColumnarError> {
    let schema = cache_schema(kind);
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());

    let mut ts = TimestampMillisecondBuilder::with_capacity(records.len()).with_timezone("UTC");
    for r in records {
        ts.append_value(r.timestamp.timestamp_millis());
    }
    columns.push(Arc::new(ts.finish()));

    for m in Modality::ALL {
        let mut b = Float64Builder::with_capacity(records.len());
        for r in records {
            b.append_option(r.counts.get(m));
        }
        columns.push(Arc::new(b.finish()));
    }

    if kind == DataKind::SpeedHistogram {
        let mut layouts = StringBuilder::new();
        let mut hists = ListBuilder::new(Float64Builder::new());
        for r in records {
            match &r.speed {
                Some(h) => {
                    layouts.append_value(h.layout.wire_name());
                    hists.values().append_slice(&h.shares);
                    hists.append(true);
                }
                None => {
                    layouts.append_null();
                    hists.append(false);
                }
            }
        }
        columns.push(Arc::new(layouts.finish()));
        columns.push(Arc::new(hists.finish()));
    }

    RecordBatch::try_new(schema, columns).context(ArrowSnafu)
}

/// Encode records and coverage into Parquet bytes.
///
/// `records` must already be sorted by timestamp.
pub fn encode(
    kind: DataKind,
    records: &[TrafficRecord],
    coverage: &Coverage,
) -> Result<Vec<u8>, ColumnarError> {
    let coverage_json = coverage_to_json(coverage).context(CoverageMetaSnafu)?;
    let props = WriterProperties::builder()
        .set_key_value_metadata(Some(vec![
            KeyValue::new(COVERAGE_META_KEY.to_string(), coverage_json),
            KeyValue::new(KIND_META_KEY.to_string(), kind.as_str().to_string()),
        ]))
        .build();

    let mut buf = Vec::new();
    let mut writer =
        ArrowWriter::try_new(&mut buf, cache_schema(kind), Some(props)).context(ParquetSnafu)?;
    if !records.is_empty() {
        let batch = build_batch(kind, records)?;
        writer.write(&batch).context(ParquetSnafu)?;
    }
    writer.close().context(ParquetSnafu)?;
    Ok(buf)
}

fn column<'a, A: Array + 'static>(
    batch: &'a RecordBatch,
    name: &str,
    expected: &DataType,
) -> Result<Option<&'a A>, ColumnarError> {
    let Some(col) = batch.column_by_name(name) else {
        return Ok(None);
    };
    let typed = col
        .as_any()
        .downcast_ref::<A>()
        .with_context(|| ColumnTypeSnafu {
            column: name,
            expected: expected.to_string(),
            actual: col.data_type().to_string(),
        })?;
    Ok(Some(typed))
}

fn decode_batch(
    kind: DataKind,
    batch: &RecordBatch,
    out: &mut Vec<TrafficRecord>,
) -> Result<(), ColumnarError> {
    let ts = column::<TimestampMillisecondArray>(batch, TS_COLUMN, &ts_type())?
        .context(MissingColumnSnafu { column: TS_COLUMN })?;

    // Absent modality columns read as "not reported".
    let mut counts_cols = Vec::with_capacity(Modality::COUNT);
    for m in Modality::ALL {
        let col = column::<Float64Array>(batch, m.wire_name(), &DataType::Float64)?;
        counts_cols.push((m, col));
    }

    let speed_cols = if kind == DataKind::SpeedHistogram {
        let layouts = column::<StringArray>(batch, SPEED_LAYOUT_COLUMN, &DataType::Utf8)?
            .context(MissingColumnSnafu {
                column: SPEED_LAYOUT_COLUMN,
            })?;
        let hists = column::<ListArray>(batch, SPEED_HIST_COLUMN, &hist_type())?.context(
            MissingColumnSnafu {
                column: SPEED_HIST_COLUMN,
            },
        )?;
        Some((layouts, hists))
    } else {
        None
    };

    for row in 0..batch.num_rows() {
        if ts.is_null(row) {
            return InvalidTimestampSnafu { row }.fail();
        }
        let timestamp: DateTime<Utc> = DateTime::from_timestamp_millis(ts.value(row))
            .context(InvalidTimestampSnafu { row })?;

        let mut counts = ModalityCounts::new();
        for (m, col) in &counts_cols {
            let value = col.filter(|c| !c.is_null(row)).map(|c| c.value(row));
            counts.set(*m, value);
        }

        let speed = match speed_cols {
            Some((layouts, hists)) if !hists.is_null(row) => {
                Some(decode_histogram(row, layouts, hists)?)
            }
            _ => None,
        };

        out.push(TrafficRecord {
            timestamp,
            counts,
            speed,
        });
    }
    Ok(())
}

fn decode_histogram(
    row: usize,
    layouts: &StringArray,
    hists: &ListArray,
) -> Result<SpeedHistogram, ColumnarError> {
    ensure!(
        !layouts.is_null(row),
        InvalidHistogramSnafu {
            row,
            detail: "missing layout",
        }
    );
    let layout: SpeedBinLayout = layouts
        .value(row)
        .parse()
        .map_err(|detail| ColumnarError::InvalidHistogram { row, detail })?;

    let values = hists.value(row);
    let values = values
        .as_any()
        .downcast_ref::<Float64Array>()
        .context(InvalidHistogramSnafu {
            row,
            detail: "bins are not Float64",
        })?;
    let shares: Vec<f64> = values
        .iter()
        .collect::<Option<Vec<f64>>>()
        .context(InvalidHistogramSnafu {
            row,
            detail: "null bin",
        })?;
    ensure!(
        shares.len() == layout.bin_count(),
        InvalidHistogramSnafu {
            row,
            detail: format!(
                "{} bins for layout {layout} (expected {})",
                shares.len(),
                layout.bin_count()
            ),
        }
    );

    Ok(SpeedHistogram { layout, shares })
}

/// Decode Parquet bytes produced by [`encode`].
pub fn decode(bytes: Bytes) -> Result<CachePayload, ColumnarError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes).context(ParquetSnafu)?;

    let kv = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .cloned()
        .unwrap_or_default();
    let lookup = |key: &str| {
        kv.iter()
            .find(|e| e.key == key)
            .and_then(|e| e.value.clone())
    };

    let coverage_json = lookup(COVERAGE_META_KEY).context(MissingCoverageSnafu)?;
    let coverage = coverage_from_json(&coverage_json).context(CoverageMetaSnafu)?;

    let kind_raw = lookup(KIND_META_KEY);
    let kind: DataKind = kind_raw
        .as_deref()
        .and_then(|k| k.parse().ok())
        .context(InvalidKindSnafu {
            value: kind_raw.clone(),
        })?;

    let reader = builder.build().context(ParquetSnafu)?;
    let mut records = Vec::new();
    for batch in reader {
        let batch = batch.context(ArrowSnafu)?;
        decode_batch(kind, &batch, &mut records)?;
    }
    records.sort_by_key(|r| r.timestamp);

    Ok(CachePayload {
        kind,
        records,
        coverage,
    })
}
