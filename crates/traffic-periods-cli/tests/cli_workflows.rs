#![allow(missing_docs)]

use std::{
    io,
    path::Path,
    process::{Command, Output},
    time::Duration,
};

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use serde_json::{Value, json};
use tempfile::TempDir;
use traffic_periods_core::{
    cache::CacheStore,
    fetch::{FetchSettings, Fetcher, ReportRequest, Transport, TransportError},
    model::{DataKind, DateRange, Granularity, SegmentId},
    storage::CacheLocation,
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const SEGMENT: &str = "9000001";

fn cli_bin() -> &'static str {
    env!("CARGO_BIN_EXE_tperiods")
}

/// Run the CLI with a clean environment pointing at `dir`. The API base is
/// unroutable so any network attempt fails fast.
fn run_cli(dir: &Path, args: &[&str]) -> io::Result<Output> {
    Command::new(cli_bin())
        .args(args)
        .current_dir(dir)
        .env_remove("TELRAAM_SEGMENT_IDS")
        .env("TELRAAM_API_KEY", "test-key")
        .env("TELRAAM_API_BASE", "http://127.0.0.1:9/v1")
        .env("TELRAAM_CACHE_DIR", dir.join("data"))
        .env("TELRAAM_PRESETS_DIR", dir.join("saved_periods"))
        .output()
}

fn assert_cli_success(output: &Output) {
    assert!(
        output.status.success(),
        "stdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Every hour: 10 cars, plus 5 more at 08:00.
struct Steady;

impl Transport for Steady {
    fn send(&self, request: &ReportRequest) -> Result<Vec<Value>, TransportError> {
        let parse = |s: &str| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%SZ").map_err(|e| {
                TransportError::Decode {
                    message: e.to_string(),
                }
            })
        };
        let (mut ts, end) = (parse(&request.time_start)?, parse(&request.time_end)?);
        let mut out = Vec::new();
        while ts < end {
            let car = if chrono::Timelike::hour(&ts) == 8 { 15.0 } else { 10.0 };
            out.push(json!({
                "date": ts.and_utc().to_rfc3339(),
                "pedestrian": 2.0,
                "bike": 4.0,
                "car": car,
                "heavy": 1.0,
            }));
            ts += ChronoDuration::hours(1);
        }
        Ok(out)
    }
}

fn may(day: u32) -> Result<NaiveDate, Box<dyn std::error::Error>> {
    Ok(NaiveDate::from_ymd_opt(2024, 5, day).ok_or("date")?)
}

fn warm_cache(dir: &Path, start: u32, end: u32) -> TestResult {
    let settings = FetchSettings {
        min_interval: Duration::ZERO,
        retry_backoff: Duration::ZERO,
        ..FetchSettings::default()
    };
    let mut cache = CacheStore::new(
        CacheLocation::local(dir.join("data")),
        Fetcher::new(Steady, settings),
    );
    cache.get(
        &SegmentId::new(SEGMENT)?,
        Granularity::Hourly,
        DataKind::Counts,
        &DateRange::new(may(start)?, may(end)?)?,
    )?;
    Ok(())
}

fn write_groups(dir: &Path) -> Result<std::path::PathBuf, Box<dyn std::error::Error>> {
    let path = dir.join("groups.json");
    let preset = json!({
        "groups": [
            {"name": "first week", "ranges": [["2024-05-06", "2024-05-10"]]},
            {"name": "second week", "ranges": [["2024-05-13", "2024-05-17"]]},
            {"name": "broken", "ranges": [["2024-05-06", "2024-05-08"], ["2024-05-07", "2024-05-09"]]}
        ],
        "days": ["mon", "tue", "wed", "thu", "fri"]
    });
    std::fs::write(&path, serde_json::to_string_pretty(&preset)?)?;
    Ok(path)
}

#[test]
fn presets_list_shows_builtins() -> TestResult {
    let tmp = TempDir::new()?;
    let output = run_cli(tmp.path(), &["presets", "list"])?;
    assert_cli_success(&output);

    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("Cambridge: Term vs Holidays 2025-26"));
    assert!(stdout.contains("built-in"));
    Ok(())
}

#[test]
fn presets_save_then_show() -> TestResult {
    let tmp = TempDir::new()?;
    let groups = write_groups(tmp.path())?;
    let groups_arg = groups.to_string_lossy().to_string();

    let saved = run_cli(tmp.path(), &["presets", "save", "May weeks", "--from", &groups_arg])?;
    assert_cli_success(&saved);
    assert!(tmp.path().join("saved_periods").join("May weeks.json").exists());

    let listed = run_cli(tmp.path(), &["presets", "list"])?;
    assert!(String::from_utf8(listed.stdout)?.contains("May weeks"));

    let shown = run_cli(tmp.path(), &["presets", "show", "May weeks"])?;
    assert_cli_success(&shown);
    let value: Value = serde_json::from_slice(&shown.stdout)?;
    assert_eq!(value["groups"][0]["name"], "first week");
    Ok(())
}

#[test]
fn compare_reads_from_a_warm_cache() -> TestResult {
    let tmp = TempDir::new()?;
    warm_cache(tmp.path(), 6, 17)?;
    let groups = write_groups(tmp.path())?;
    let groups_arg = groups.to_string_lossy().to_string();

    let output = run_cli(
        tmp.path(),
        &[
            "compare",
            "--segment",
            SEGMENT,
            "--groups",
            &groups_arg,
            "--view",
            "hourly",
            "--modality",
            "car",
            "--format",
            "csv",
        ],
    )?;
    assert_cli_success(&output);

    let stdout = String::from_utf8(output.stdout)?;
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "group,hour,car");
    // 24 rows per valid group
    assert_eq!(lines.len(), 1 + 2 * 24);
    assert!(lines.contains(&"first week,08:00,15.0"));
    assert!(lines.contains(&"second week,07:00,10.0"));

    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("Skipping group \"broken\""));
    Ok(())
}

#[test]
fn compare_modal_split_with_hour_window() -> TestResult {
    let tmp = TempDir::new()?;
    warm_cache(tmp.path(), 6, 17)?;
    let groups = write_groups(tmp.path())?;
    let groups_arg = groups.to_string_lossy().to_string();

    let output = run_cli(
        tmp.path(),
        &[
            "compare",
            "--segment",
            SEGMENT,
            "--groups",
            &groups_arg,
            "--view",
            "modal",
            "--from-hour",
            "8",
            "--to-hour",
            "9",
            "--format",
            "csv",
        ],
    )?;
    assert_cli_success(&output);

    // hour 8 only: 2 + 4 + 15 + 1 = 22 per record, car share 15/22
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("first week,car,75,68.2"));
    assert!(stdout.contains("first week,pedestrian,10,9.1"));
    Ok(())
}

#[test]
fn cache_status_and_clear() -> TestResult {
    let tmp = TempDir::new()?;
    warm_cache(tmp.path(), 6, 10)?;

    let status = run_cli(tmp.path(), &["cache", "status", "--segment", SEGMENT])?;
    assert_cli_success(&status);
    assert!(String::from_utf8(status.stdout)?.contains("[2024-05-06 .. 2024-05-10] (5 day(s))"));

    let cleared = run_cli(tmp.path(), &["cache", "clear", "--segment", SEGMENT])?;
    assert_cli_success(&cleared);
    assert!(String::from_utf8(cleared.stdout)?.starts_with("Removed"));

    let again = run_cli(tmp.path(), &["cache", "clear", "--segment", SEGMENT])?;
    assert!(String::from_utf8(again.stdout)?.starts_with("Nothing cached"));
    Ok(())
}

#[test]
fn missing_api_key_is_reported() -> TestResult {
    let tmp = TempDir::new()?;
    let output = Command::new(cli_bin())
        .args([
            "fetch", "--segment", SEGMENT, "--start", "2024-05-06", "--end", "2024-05-07",
        ])
        .current_dir(tmp.path())
        .env_remove("TELRAAM_API_KEY")
        .output()?;

    assert!(!output.status.success());
    assert!(String::from_utf8(output.stderr)?.contains("TELRAAM_API_KEY is not set"));
    Ok(())
}

#[test]
fn cache_commands_work_without_an_api_key() -> TestResult {
    let tmp = TempDir::new()?;
    warm_cache(tmp.path(), 6, 7)?;

    let status = Command::new(cli_bin())
        .args(["cache", "status"])
        .current_dir(tmp.path())
        .env_remove("TELRAAM_API_KEY")
        .env("TELRAAM_SEGMENT_IDS", SEGMENT)
        .env("TELRAAM_CACHE_DIR", tmp.path().join("data"))
        .output()?;
    assert_cli_success(&status);
    assert!(String::from_utf8(status.stdout)?.contains("[2024-05-06 .. 2024-05-07] (2 day(s))"));

    let cleared = Command::new(cli_bin())
        .args(["cache", "clear", "--segment", SEGMENT])
        .current_dir(tmp.path())
        .env_remove("TELRAAM_API_KEY")
        .env("TELRAAM_CACHE_DIR", tmp.path().join("data"))
        .output()?;
    assert_cli_success(&cleared);
    assert!(String::from_utf8(cleared.stdout)?.starts_with("Removed"));
    Ok(())
}

#[test]
fn unloadable_span_fails_without_a_cache() -> TestResult {
    let tmp = TempDir::new()?;
    let output = run_cli(
        tmp.path(),
        &[
            "fetch", "--segment", SEGMENT, "--start", "2024-05-06", "--end", "2024-05-07",
        ],
    )?;

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("rerun to resume"));
    Ok(())
}
