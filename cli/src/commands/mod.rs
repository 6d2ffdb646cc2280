//! CLI command definitions and dispatch.

mod archive;
mod gather;
mod history;
mod version;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use mirrorpack_core::MirrorError;

/// Mirrorpack: incremental, chunked offline archives of mirrored images.
#[derive(Parser, Debug)]
#[command(name = "mirrorpack", version, about)]
pub struct Cli {
    /// Log filter (overrides RUST_LOG), e.g. `info` or `mirrorpack_archive=debug`
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build an incremental archive from staged images
    Archive(archive::ArchiveArgs),
    /// Print the digests recorded as already shipped
    History(history::HistoryArgs),
    /// Print the blobs of images in the local cache
    Gather(gather::GatherArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Archive(args) => archive::execute(args).await,
        Command::History(args) => history::execute(args).await,
        Command::Gather(args) => gather::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}

/// Process exit status for a failed command.
pub fn exit_code(error: &(dyn std::error::Error + 'static)) -> i32 {
    error
        .downcast_ref::<MirrorError>()
        .map_or(1, MirrorError::exit_code)
}

/// Parse an RFC3339 `--since` value.
pub(crate) fn parse_since(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC3339 timestamp '{}': {}", value, e))
}
