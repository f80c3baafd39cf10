use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use patchwire_frame::DEFAULT_BOUNDARY;

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod decode;
pub mod encode;
pub mod fetch;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute an operation against an HTTP endpoint and print the merged result.
    Fetch(FetchArgs),
    /// Decode a multipart body and print each part.
    Decode(DecodeArgs),
    /// Frame JSON lines as a multipart body.
    Encode(EncodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Fetch(args) => fetch::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Encode(args) => encode::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Endpoint URL.
    #[arg(env = "PATCHWIRE_URL")]
    pub url: String,
    /// Query text.
    #[arg(long, short = 'q', conflicts_with = "query_file")]
    pub query: Option<String>,
    /// Read the query text from a file.
    #[arg(long, value_name = "FILE", conflicts_with = "query")]
    pub query_file: Option<PathBuf>,
    /// Variables as a JSON object.
    #[arg(long)]
    pub variables: Option<String>,
    /// Operation name to select.
    #[arg(long)]
    pub operation_name: Option<String>,
    /// Extra request header, `name: value`. May be repeated.
    #[arg(long = "header", short = 'H', value_name = "HEADER")]
    pub headers: Vec<String>,
    /// Maximum time to wait for the initial result (e.g. 5s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
    /// Print a snapshot of the merged result after every payload.
    #[arg(long)]
    pub watch: bool,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// File holding the body. Reads stdin when omitted.
    pub file: Option<PathBuf>,
    /// Multipart boundary.
    #[arg(long, default_value = DEFAULT_BOUNDARY)]
    pub boundary: String,
    /// Largest accepted part, in bytes.
    #[arg(long)]
    pub max_part_size: Option<usize>,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// File holding one JSON payload per line. Reads stdin when omitted.
    pub file: Option<PathBuf>,
    /// Multipart boundary.
    #[arg(long, default_value = DEFAULT_BOUNDARY)]
    pub boundary: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
