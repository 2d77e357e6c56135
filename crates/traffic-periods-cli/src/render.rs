use std::io::Write;

use snafu::ResultExt;
use tabled::{builder::Builder, settings::Style};
use traffic_periods_core::aggregate::{GroupReport, SpeedUnit, View};

use crate::error::{CliResult, CsvSnafu, JsonSnafu, OutputSnafu};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Csv,
    Jsonl,
}

/// One view of every group, flattened to rows with a leading group column.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

fn fmt_mean(v: f64) -> String {
    format!("{v:.1}")
}

fn fmt_total(v: f64) -> String {
    format!("{v:.0}")
}

fn fmt_percent(v: f64) -> String {
    format!("{v:.1}")
}

pub fn view_table(view: View, reports: &[GroupReport], unit: SpeedUnit) -> ViewTable {
    let mut columns = vec!["group".to_string()];
    let mut rows = Vec::new();

    match view {
        View::HourlyProfile => {
            columns.push("hour".to_string());
            if let Some(p) = reports.iter().find_map(|r| r.hourly.as_ref()) {
                columns.extend(p.modalities.iter().map(|m| m.to_string()));
            }
            for r in reports {
                let Some(p) = &r.hourly else { continue };
                for slot in &p.hours {
                    let mut row = vec![r.group.clone(), format!("{:02}:00", slot.hour)];
                    row.extend(slot.means.iter().copied().map(fmt_mean));
                    rows.push(row);
                }
            }
        }
        View::DailyVolume => {
            columns.push("date".to_string());
            if let Some(d) = reports.iter().find_map(|r| r.daily.as_ref()) {
                columns.extend(d.modalities.iter().map(|m| m.to_string()));
            }
            for r in reports {
                let Some(d) = &r.daily else { continue };
                for day in &d.days {
                    let mut row = vec![r.group.clone(), day.date.to_string()];
                    row.extend(day.totals.iter().copied().map(fmt_total));
                    rows.push(row);
                }
            }
        }
        View::ModalSplit => {
            columns.extend(["modality", "count", "percent"].map(String::from));
            for r in reports {
                let Some(split) = &r.modal_split else { continue };
                for share in &split.shares {
                    rows.push(vec![
                        r.group.clone(),
                        share.modality.to_string(),
                        fmt_total(share.count),
                        fmt_percent(share.percent),
                    ]);
                }
            }
        }
        View::SpeedDistribution => {
            columns.extend([
                format!("speed ({})", unit.suffix()),
                "cars".to_string(),
                "percent".to_string(),
            ]);
            for r in reports {
                let Some(speed) = &r.speed else { continue };
                for bin in &speed.bins {
                    rows.push(vec![
                        r.group.clone(),
                        bin.label(unit),
                        fmt_total(bin.cars),
                        fmt_percent(bin.percent),
                    ]);
                }
            }
        }
    }

    ViewTable { columns, rows }
}

/// One line per group whose speed distribution left out cars recorded on
/// another histogram layout.
pub fn speed_notes(reports: &[GroupReport]) -> Vec<String> {
    reports
        .iter()
        .filter_map(|r| {
            let speed = r.speed.as_ref()?;
            (speed.excluded_records > 0).then(|| {
                format!(
                    "{}: {:.0} cars in {} record(s) use another speed layout than {} and are not included",
                    r.group, speed.excluded_cars, speed.excluded_records, speed.layout
                )
            })
        })
        .collect()
}

fn render_table(table: &ViewTable) -> String {
    let mut builder = Builder::default();
    builder.push_record(&table.columns);
    for row in &table.rows {
        builder.push_record(row);
    }
    let mut rendered = builder.build();
    rendered.with(Style::rounded());
    rendered.to_string()
}

pub fn write_reports<W: Write>(
    out: &mut W,
    view: View,
    reports: &[GroupReport],
    unit: SpeedUnit,
    format: OutputFormat,
) -> CliResult<()> {
    match format {
        OutputFormat::Table => {
            let table = view_table(view, reports, unit);
            let matched: Vec<String> = reports
                .iter()
                .map(|r| format!("{}: {} records", r.group, r.matched))
                .collect();
            writeln!(out, "{} ({})", view, matched.join(", ")).context(OutputSnafu)?;
            writeln!(out, "{}", render_table(&table)).context(OutputSnafu)?;
            for note in speed_notes(reports) {
                writeln!(out, "note: {note}").context(OutputSnafu)?;
            }
        }
        OutputFormat::Csv => {
            let table = view_table(view, reports, unit);
            let mut writer = csv::Writer::from_writer(out);
            writer.write_record(&table.columns).context(CsvSnafu)?;
            for row in &table.rows {
                writer.write_record(row).context(CsvSnafu)?;
            }
            writer.flush().context(OutputSnafu)?;
        }
        OutputFormat::Jsonl => {
            for r in reports {
                serde_json::to_writer(&mut *out, r).context(JsonSnafu)?;
                writeln!(out).context(OutputSnafu)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use traffic_periods_core::{
        aggregate::{FilterSpec, aggregate},
        model::{
            DateRange, Modality, ModalityCounts, PeriodGroup, SpeedBinLayout, SpeedHistogram,
            TrafficRecord,
        },
    };

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn reports(views: &[View]) -> Result<Vec<GroupReport>, Box<dyn std::error::Error>> {
        let day = NaiveDate::from_ymd_opt(2024, 5, 6).ok_or("date")?;
        let group = PeriodGroup::new("week", vec![DateRange::single(day)?])?;
        let records = vec![
            TrafficRecord::new(
                Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).single().ok_or("ts")?,
                ModalityCounts::new()
                    .with(Modality::Car, 30.0)
                    .with(Modality::Bike, 10.0),
            ),
        ];
        let filter = FilterSpec::new().with_modalities([Modality::Bike, Modality::Car])?;
        Ok(aggregate(&[group], &records, &filter, views))
    }

    #[test]
    fn hourly_table_has_a_row_per_hour() -> TestResult {
        let reports = reports(&[View::HourlyProfile])?;
        let table = view_table(View::HourlyProfile, &reports, SpeedUnit::Kmh);
        assert_eq!(table.columns, vec!["group", "hour", "bike", "car"]);
        assert_eq!(table.rows.len(), 24);
        assert_eq!(table.rows[8], vec!["week", "08:00", "10.0", "30.0"]);
        Ok(())
    }

    #[test]
    fn csv_output_has_header_and_rows() -> TestResult {
        let reports = reports(&[View::ModalSplit])?;
        let mut buf = Vec::new();
        write_reports(
            &mut buf,
            View::ModalSplit,
            &reports,
            SpeedUnit::Kmh,
            OutputFormat::Csv,
        )?;
        let text = String::from_utf8(buf)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "group,modality,count,percent");
        assert_eq!(lines[1], "week,bike,10,25.0");
        assert_eq!(lines[2], "week,car,30,75.0");
        Ok(())
    }

    #[test]
    fn table_output_is_boxed() -> TestResult {
        let reports = reports(&[View::DailyVolume])?;
        let mut buf = Vec::new();
        write_reports(
            &mut buf,
            View::DailyVolume,
            &reports,
            SpeedUnit::Kmh,
            OutputFormat::Table,
        )?;
        let text = String::from_utf8(buf)?;
        assert!(text.starts_with("daily (week: 1 records)"));
        assert!(text.contains("2024-05-06"));
        assert!(text.contains('╭'));
        Ok(())
    }

    #[test]
    fn excluded_speed_layout_is_noted_under_the_table() -> TestResult {
        let day = NaiveDate::from_ymd_opt(2024, 5, 6).ok_or("date")?;
        let group = PeriodGroup::new("week", vec![DateRange::single(day)?])?;
        let record = |h: u32, cars: f64, layout: SpeedBinLayout| -> Result<TrafficRecord, Box<dyn std::error::Error>> {
            let mut r = TrafficRecord::new(
                Utc.with_ymd_and_hms(2024, 5, 6, h, 0, 0).single().ok_or("ts")?,
                ModalityCounts::new().with(Modality::Car, cars),
            );
            let mut shares = vec![0.0; layout.bin_count()];
            shares[2] = 100.0;
            r.speed = Some(SpeedHistogram { layout, shares });
            Ok(r)
        };
        let records = vec![
            record(7, 40.0, SpeedBinLayout::Kmh0To120Plus)?,
            record(8, 3.0, SpeedBinLayout::Kmh0To70Plus)?,
        ];
        let reports = aggregate(&[group], &records, &FilterSpec::new(), &[View::SpeedDistribution]);

        let mut buf = Vec::new();
        write_reports(
            &mut buf,
            View::SpeedDistribution,
            &reports,
            SpeedUnit::Kmh,
            OutputFormat::Table,
        )?;
        let text = String::from_utf8(buf)?;
        assert!(text.contains("note: week: 3 cars in 1 record(s) use another speed layout"));
        assert_eq!(speed_notes(&reports).len(), 1);
        Ok(())
    }

    #[test]
    fn jsonl_writes_one_object_per_group() -> TestResult {
        let reports = reports(&[View::ModalSplit])?;
        let mut buf = Vec::new();
        write_reports(
            &mut buf,
            View::ModalSplit,
            &reports,
            SpeedUnit::Kmh,
            OutputFormat::Jsonl,
        )?;
        let text = String::from_utf8(buf)?;
        let value: serde_json::Value = serde_json::from_str(text.trim())?;
        assert_eq!(value["group"], "week");
        assert_eq!(value["matched"], 1);
        assert!(value.get("hourly").is_none());
        Ok(())
    }
}
