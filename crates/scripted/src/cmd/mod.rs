use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod search;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the search channels and an echo channel on a socket.
    Serve(ServeArgs),
    /// Run an incremental file-name or content search.
    Search(SearchArgs),
    /// Send one message on a named channel.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Search(args) => search::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Base directory for relative search roots.
    #[arg(long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,
    /// Hits per result message.
    #[arg(long, default_value_t = 25)]
    pub batch_size: usize,
    /// Result cap for clients that send none. 0 disables the cap.
    #[arg(long, default_value_t = 100)]
    pub max_results: u64,
    /// Skip files larger than this many bytes in content search.
    #[arg(long, default_value_t = 1024 * 1024)]
    pub max_file_size: u64,
    /// Search dot-files and dot-directories.
    #[arg(long)]
    pub include_hidden: bool,
    /// Do not register the `echo` channel.
    #[arg(long)]
    pub no_echo: bool,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Directory to search, resolved by the server.
    pub root: String,
    /// File-name pattern, or text with --text.
    pub query: String,
    /// Search file contents instead of file names.
    #[arg(long)]
    pub text: bool,
    /// Pause after this many results.
    #[arg(long)]
    pub max_results: Option<u64>,
    /// Keep resuming a paused search until it completes.
    #[arg(long)]
    pub all: bool,
    /// Replace the query after each round of results (repeatable).
    #[arg(long, value_name = "QUERY")]
    pub requery: Vec<String>,
    /// Maximum time to wait for each round of results (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Channel name to send on.
    #[arg(long, short = 'c')]
    pub channel: String,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from a UTF-8 file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Wait for one response message and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the channel and its response (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
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
