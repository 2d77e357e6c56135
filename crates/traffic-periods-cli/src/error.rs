use traffic_periods_core::{
    aggregate::FilterError,
    cache::CacheError,
    config::ConfigError,
    fetch::TransportError,
    model::DateRangeError,
    presets::PresetError,
};

use snafu::Snafu;

pub type CliResult<T> = std::result::Result<T, CliError>;

fn resume_hint(source: &CacheError) -> String {
    match source.unsatisfied() {
        Some(span) => format!(" (days {span} were not loaded; rerun to resume)"),
        None => String::new(),
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("Configuration error: {source}. Set it in the environment or a .env file."))]
    Config { source: ConfigError },

    #[snafu(display("Failed to set up the HTTP client: {source}"))]
    HttpSetup { source: TransportError },

    #[snafu(display("No segment given. Pass --segment or set TELRAAM_SEGMENT_IDS."))]
    MissingSegment,

    #[snafu(display("Invalid date span: {source}"))]
    InvalidRange { source: DateRangeError },

    #[snafu(display("Loading {segment} failed: {source}{}", resume_hint(source)))]
    Cache {
        segment: String,
        #[snafu(source(from(CacheError, Box::new)))]
        source: Box<CacheError>,
    },

    #[snafu(display("{source}"))]
    Preset { source: PresetError },

    #[snafu(display("Group file not readable: {path}"))]
    GroupsFile {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Group file {path} is not a valid preset: {source}"))]
    GroupsJson {
        path: String,
        source: serde_json::Error,
    },

    #[snafu(display("Pass either --preset or --groups"))]
    NoGroupSource,

    #[snafu(display("Invalid filter: {source}"))]
    Filter { source: FilterError },

    #[snafu(display("None of the period groups is valid"))]
    NoValidGroups,

    #[snafu(display("Failed to write output: {source}"))]
    Output { source: std::io::Error },

    #[snafu(display("Failed to write CSV output: {source}"))]
    Csv { source: csv::Error },

    #[snafu(display("Failed to encode JSON output: {source}"))]
    Json { source: serde_json::Error },
}
