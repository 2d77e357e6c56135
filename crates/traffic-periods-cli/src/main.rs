//! CLI tool for comparing traffic counts across period groups.

mod error;
mod render;

use std::{
    io::{self, Write},
    ops::ControlFlow,
    path::{Path, PathBuf},
};

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use snafu::{OptionExt, ResultExt, ensure};
use traffic_periods_core::{
    aggregate::{FilterSpec, HourWindow, SpeedUnit, View, WeekdaySet},
    cache::{CacheDir, CacheKey, CacheStore},
    config::{self, Config, LocalPaths},
    fetch::{Fetcher, HttpTransport},
    model::{DataKind, DateRange, Granularity, Modality, SegmentId},
    presets::{Preset, PresetStore, builtin_presets},
    session::{AnalysisRequest, AnalysisSession},
    storage::CacheLocation,
};

use crate::{
    error::{
        CacheSnafu, CliResult, ConfigSnafu, FilterSnafu, GroupsFileSnafu, GroupsJsonSnafu,
        HttpSetupSnafu, InvalidRangeSnafu, JsonSnafu, MissingSegmentSnafu, NoGroupSourceSnafu,
        NoValidGroupsSnafu, OutputSnafu, PresetSnafu,
    },
    render::{OutputFormat, speed_notes, write_reports},
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormatArg {
    Table,
    Csv,
    Jsonl,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(v: OutputFormatArg) -> Self {
        match v {
            OutputFormatArg::Table => OutputFormat::Table,
            OutputFormatArg::Csv => OutputFormat::Csv,
            OutputFormatArg::Jsonl => OutputFormat::Jsonl,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fill the local cache for a date span
    Fetch {
        /// Segment id (default: first of TELRAAM_SEGMENT_IDS)
        #[arg(long)]
        segment: Option<SegmentId>,

        /// First day, YYYY-MM-DD
        #[arg(long)]
        start: NaiveDate,

        /// Last day, inclusive
        #[arg(long)]
        end: NaiveDate,

        #[arg(long, default_value_t = Granularity::Hourly)]
        granularity: Granularity,

        /// counts or speed
        #[arg(long, default_value_t = DataKind::Counts)]
        kind: DataKind,
    },

    /// Compare period groups in one view
    Compare {
        #[arg(long)]
        segment: Option<SegmentId>,

        /// Built-in or saved preset name
        #[arg(long, conflicts_with = "groups")]
        preset: Option<String>,

        /// JSON file in preset format
        #[arg(long)]
        groups: Option<PathBuf>,

        /// hourly, daily, modal or speed
        #[arg(long, default_value_t = View::HourlyProfile)]
        view: View,

        #[arg(long, default_value_t = Granularity::Hourly)]
        granularity: Granularity,

        /// First hour kept, 0-23
        #[arg(long = "from-hour")]
        from_hour: Option<u32>,

        /// Hour the window ends before, 1-24
        #[arg(long = "to-hour")]
        to_hour: Option<u32>,

        /// e.g. mon,tue or workdays; overrides the preset's days
        #[arg(long)]
        days: Option<WeekdaySet>,

        /// Repeatable; default pedestrian, bike, car, heavy
        #[arg(long = "modality")]
        modality: Vec<Modality>,

        /// Speed label unit: kmh or mph
        #[arg(long, default_value = "kmh")]
        unit: SpeedUnit,

        #[arg(long, value_enum, default_value_t = OutputFormatArg::Table)]
        format: OutputFormatArg,
    },

    /// Built-in and saved presets
    Presets {
        #[command(subcommand)]
        cmd: PresetsCommand,
    },

    /// Inspect or clear cache entries
    Cache {
        #[command(subcommand)]
        cmd: CacheCommand,
    },
}

#[derive(Debug, Subcommand)]
enum PresetsCommand {
    /// List preset names
    List,

    /// Print a preset as JSON
    Show { name: String },

    /// Save a preset file under a name
    Save {
        name: String,

        /// JSON file in preset format
        #[arg(long)]
        from: PathBuf,
    },
}

#[derive(Debug, clap::Args)]
struct EntryArgs {
    #[arg(long)]
    segment: Option<SegmentId>,

    #[arg(long, default_value_t = Granularity::Hourly)]
    granularity: Granularity,

    #[arg(long, default_value_t = DataKind::Counts)]
    kind: DataKind,
}

#[derive(Debug, Subcommand)]
enum CacheCommand {
    /// Show which days an entry covers
    Status(EntryArgs),

    /// Delete an entry
    Clear(EntryArgs),
}

#[derive(Debug, Parser)]
#[command(name = "tperiods", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

struct CompareArgs {
    segment: Option<SegmentId>,
    preset: Option<String>,
    groups: Option<PathBuf>,
    view: View,
    granularity: Granularity,
    from_hour: Option<u32>,
    to_hour: Option<u32>,
    days: Option<WeekdaySet>,
    modality: Vec<Modality>,
    unit: SpeedUnit,
    format: OutputFormatArg,
}

fn pick_segment(given: Option<SegmentId>, configured: &[SegmentId]) -> CliResult<SegmentId> {
    given
        .or_else(|| configured.first().cloned())
        .context(MissingSegmentSnafu)
}

fn open_cache(config: &Config) -> CliResult<CacheStore<HttpTransport>> {
    let transport = HttpTransport::new(
        &config.api_base,
        &config.api_key,
        config.fetch.request_timeout,
    )
    .context(HttpSetupSnafu)?;
    let fetcher = Fetcher::new(transport, config.fetch.clone());
    Ok(CacheStore::new(
        CacheLocation::local(&config.cache_dir),
        fetcher,
    ))
}

fn read_preset_file(path: &Path) -> CliResult<Preset> {
    let text = std::fs::read_to_string(path).context(GroupsFileSnafu {
        path: path.display().to_string(),
    })?;
    serde_json::from_str(&text).context(GroupsJsonSnafu {
        path: path.display().to_string(),
    })
}

fn cmd_fetch(
    segment: Option<SegmentId>,
    start: NaiveDate,
    end: NaiveDate,
    granularity: Granularity,
    kind: DataKind,
) -> CliResult<()> {
    let config = Config::from_env().context(ConfigSnafu)?;
    let segment = pick_segment(segment, &config.segment_ids)?;
    let range = DateRange::new(start, end).context(InvalidRangeSnafu)?;
    let mut cache = open_cache(&config)?;

    let read = cache
        .get_with(&segment, granularity, kind, &range, |p| {
            eprintln!(
                "chunk {}/{} {}: {} records",
                p.chunk.index + 1,
                p.chunk.total,
                p.chunk.range,
                p.records
            );
            ControlFlow::Continue(())
        })
        .context(CacheSnafu {
            segment: segment.to_string(),
        })?;

    println!(
        "{segment} {granularity} {kind} {range}: {} records ({} fetched chunk(s), {} dropped)",
        read.records.len(),
        read.fetched_chunks,
        read.dropped
    );
    Ok(())
}

fn build_filter(args: &CompareArgs, preset_days: Option<WeekdaySet>) -> CliResult<FilterSpec> {
    let mut filter = FilterSpec::new();
    if args.from_hour.is_some() || args.to_hour.is_some() {
        let window = HourWindow::new(args.from_hour.unwrap_or(0), args.to_hour.unwrap_or(24))
            .context(FilterSnafu)?;
        filter = filter.with_hours(window);
    }
    if let Some(days) = args.days.or(preset_days) {
        filter = filter.with_days(days);
    }
    let modalities = if args.modality.is_empty() {
        Modality::CLASSIC.to_vec()
    } else {
        args.modality.clone()
    };
    filter.with_modalities(modalities).context(FilterSnafu)
}

fn cmd_compare(args: CompareArgs) -> CliResult<()> {
    let config = Config::from_env().context(ConfigSnafu)?;
    let segment = pick_segment(args.segment.clone(), &config.segment_ids)?;

    let preset = match (&args.preset, &args.groups) {
        (Some(name), _) => PresetStore::new(&config.presets_dir)
            .resolve(name)
            .context(PresetSnafu)?,
        (None, Some(path)) => read_preset_file(path)?,
        (None, None) => return NoGroupSourceSnafu.fail(),
    };

    let filter = build_filter(&args, preset.days)?;
    let kind = match args.view {
        View::SpeedDistribution => DataKind::SpeedHistogram,
        _ => DataKind::Counts,
    };
    let request = AnalysisRequest {
        segment: segment.clone(),
        granularity: args.granularity,
        kind,
        groups: preset.groups,
        filter,
        views: vec![args.view],
    };

    let mut session = AnalysisSession::new(open_cache(&config)?);
    let outcomes = session.run(&request).context(CacheSnafu {
        segment: segment.to_string(),
    })?;

    let mut reports = Vec::new();
    for (def, outcome) in request.groups.iter().zip(outcomes) {
        match outcome {
            Ok(report) => reports.push(report),
            Err(e) => eprintln!("Skipping group {:?}: {e}", def.name),
        }
    }
    ensure!(!reports.is_empty(), NoValidGroupsSnafu);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let format = OutputFormat::from(args.format);
    write_reports(&mut out, args.view, &reports, args.unit, format)?;
    if format != OutputFormat::Table {
        for note in speed_notes(&reports) {
            eprintln!("{note}");
        }
    }
    out.flush().context(OutputSnafu)
}

fn cmd_presets(cmd: PresetsCommand) -> CliResult<()> {
    let store = PresetStore::new(LocalPaths::from_env().presets_dir);
    match cmd {
        PresetsCommand::List => {
            for (name, preset) in builtin_presets() {
                println!("{name} (built-in, {} group(s))", preset.groups.len());
            }
            for name in store.list().context(PresetSnafu)? {
                println!("{name}");
            }
        }
        PresetsCommand::Show { name } => {
            let preset = store.resolve(&name).context(PresetSnafu)?;
            let json = serde_json::to_string_pretty(&preset).context(JsonSnafu)?;
            println!("{json}");
        }
        PresetsCommand::Save { name, from } => {
            let preset = read_preset_file(&from)?;
            let path = store.save(&name, &preset).context(PresetSnafu)?;
            println!("Saved preset {name:?} to {}", path.display());
        }
    }
    Ok(())
}

fn cmd_cache(cmd: CacheCommand) -> CliResult<()> {
    let dir = CacheDir::new(CacheLocation::local(LocalPaths::from_env().cache_dir));
    let configured = config::segment_ids_from_env().context(ConfigSnafu)?;
    match cmd {
        CacheCommand::Status(entry) => {
            let key = CacheKey::new(
                pick_segment(entry.segment, &configured)?,
                entry.granularity,
                entry.kind,
            );
            let covered = dir.covered(&key);
            if covered.is_empty() {
                println!("{}: empty", key.file_name());
            }
            for range in covered {
                println!("{}: {range} ({} day(s))", key.file_name(), range.days());
            }
        }
        CacheCommand::Clear(entry) => {
            let segment = pick_segment(entry.segment, &configured)?;
            let key = CacheKey::new(segment.clone(), entry.granularity, entry.kind);
            let removed = dir.clear(&key).context(CacheSnafu {
                segment: segment.to_string(),
            })?;
            if removed {
                println!("Removed {}", key.file_name());
            } else {
                println!("Nothing cached for {}", key.file_name());
            }
        }
    }
    Ok(())
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Command::Fetch {
            segment,
            start,
            end,
            granularity,
            kind,
        } => cmd_fetch(segment, start, end, granularity, kind),

        Command::Compare {
            segment,
            preset,
            groups,
            view,
            granularity,
            from_hour,
            to_hour,
            days,
            modality,
            unit,
            format,
        } => cmd_compare(CompareArgs {
            segment,
            preset,
            groups,
            view,
            granularity,
            from_hour,
            to_hour,
            days,
            modality,
            unit,
            format,
        }),

        Command::Presets { cmd } => cmd_presets(cmd),

        Command::Cache { cmd } => cmd_cache(cmd),
    }
}

fn main() {
    let env_file = dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    if let Some(path) = env_file {
        info!("loaded {}", path.display());
    }

    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
