//! `mirrorpack history` command.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::Args;
use mirrorpack_archive::{FsSnapshotWriter, HistoryStore};

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Working directory holding the `.history` folder
    #[arg(long)]
    pub workspace: PathBuf,

    /// Ignore snapshots taken at or after this RFC3339 instant
    #[arg(long, value_parser = super::parse_since)]
    pub since: Option<DateTime<Utc>>,

    /// Print the path of the snapshot in effect instead of its digests
    #[arg(long)]
    pub snapshot: bool,
}

pub async fn execute(args: HistoryArgs) -> Result<(), Box<dyn std::error::Error>> {
    let span = tracing::info_span!("history", workspace = %args.workspace.display());
    let history = HistoryStore::new(&args.workspace, args.since, Box::new(FsSnapshotWriter), span)?;

    if args.snapshot {
        println!("{}", history.current_snapshot()?.display());
        return Ok(());
    }

    for digest in history.read()? {
        println!("{digest}");
    }
    Ok(())
}
