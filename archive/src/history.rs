//! Append-only log of the blobs already shipped in previous archives.
//!
//! Every write produces a new snapshot file in `<working-dir>/.history`,
//! named `.history-<RFC3339 timestamp>` and holding the full digest set as
//! of that write, one digest per line. Snapshots are never rewritten; the
//! current state is the snapshot with the greatest timestamp.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use mirrorpack_core::error::{MirrorError, Result};
use mirrorpack_core::Digest;
use tracing::Span;

/// History subdirectory of the working directory.
pub const HISTORY_DIR: &str = ".history";

/// File name prefix of every snapshot.
pub const HISTORY_NAME_PREFIX: &str = ".history-";

/// Sink for new snapshot files.
pub trait SnapshotWriter: Send + Sync {
    fn create(&self, path: &Path) -> Result<Box<dyn Write>>;
}

/// Writes snapshots to disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSnapshotWriter;

impl SnapshotWriter for FsSnapshotWriter {
    fn create(&self, path: &Path) -> Result<Box<dyn Write>> {
        let file = File::create(path).map_err(|e| {
            MirrorError::History(format!(
                "Failed to create history file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Snapshot file name for an instant.
pub fn snapshot_file_name(at: DateTime<Utc>) -> String {
    format!(
        "{}{}",
        HISTORY_NAME_PREFIX,
        at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// Timestamp of a snapshot file name. `None` when the name lacks the
/// prefix; an error when the prefix is followed by something else than a
/// timestamp.
fn snapshot_timestamp(file_name: &str) -> Result<Option<DateTime<Utc>>> {
    let Some(stamp) = file_name.strip_prefix(HISTORY_NAME_PREFIX) else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(stamp)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| {
            MirrorError::History(format!(
                "Failed to parse timestamp of history file {}: {}",
                file_name, e
            ))
        })
}

/// Persistent record of shipped digests.
pub struct HistoryStore {
    history_dir: PathBuf,
    since: Option<DateTime<Utc>>,
    writer: Box<dyn SnapshotWriter>,
    span: Span,
}

impl HistoryStore {
    /// Open the history of `working_dir`, creating its history directory if
    /// needed. With `since` set, snapshots taken at or after that instant
    /// are ignored.
    pub fn new(
        working_dir: &Path,
        since: Option<DateTime<Utc>>,
        writer: Box<dyn SnapshotWriter>,
        span: Span,
    ) -> Result<Self> {
        let history_dir = working_dir.join(HISTORY_DIR);
        std::fs::create_dir_all(&history_dir).map_err(|e| {
            MirrorError::History(format!(
                "Failed to create history directory {}: {}",
                history_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            history_dir,
            since,
            writer,
            span,
        })
    }

    pub fn history_dir(&self) -> &Path {
        &self.history_dir
    }

    /// The snapshot currently in effect, or an `EmptyHistory` error.
    pub fn current_snapshot(&self) -> Result<PathBuf> {
        let read_dir = std::fs::read_dir(&self.history_dir).map_err(|e| {
            MirrorError::History(format!(
                "Failed to read history directory {}: {}",
                self.history_dir.display(),
                e
            ))
        })?;

        let mut latest: Option<(DateTime<Utc>, PathBuf)> = None;
        for entry in read_dir {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let stamp = match snapshot_timestamp(name) {
                Ok(Some(stamp)) => stamp,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(parent: &self.span, error = %e, "Ignoring history file");
                    continue;
                }
            };
            if self.since.is_some_and(|since| stamp >= since) {
                continue;
            }
            if latest.as_ref().map_or(true, |(best, _)| stamp > *best) {
                latest = Some((stamp, entry.path()));
            }
        }

        latest.map(|(_, path)| path).ok_or_else(|| {
            MirrorError::EmptyHistory(format!(
                "no history metadata found under {}",
                self.history_dir.display()
            ))
        })
    }

    /// Digests recorded by the current snapshot. No snapshot means an empty
    /// set.
    pub fn read(&self) -> Result<BTreeSet<Digest>> {
        let snapshot = match self.current_snapshot() {
            Ok(path) => path,
            Err(e) if e.is_empty_history() => {
                tracing::debug!(parent: &self.span, "{}", e);
                return Ok(BTreeSet::new());
            }
            Err(e) => return Err(e),
        };

        let content = std::fs::read_to_string(&snapshot).map_err(|e| {
            MirrorError::History(format!(
                "Failed to read history file {}: {}",
                snapshot.display(),
                e
            ))
        })?;

        let mut digests = BTreeSet::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match Digest::parse(line) {
                Ok(digest) => {
                    digests.insert(digest);
                }
                Err(e) => {
                    tracing::warn!(
                        parent: &self.span,
                        snapshot = %snapshot.display(),
                        line = index + 1,
                        error = %e,
                        "Skipping unreadable history entry; its blob will be shipped again"
                    );
                }
            }
        }

        tracing::debug!(
            parent: &self.span,
            snapshot = %snapshot.display(),
            digests = digests.len(),
            "Read history"
        );
        Ok(digests)
    }

    /// Merge `new` into the current state and persist the result as a new
    /// snapshot. Returns the merged set.
    pub fn append(&self, new: &BTreeSet<Digest>) -> Result<BTreeSet<Digest>> {
        let mut merged = self.read()?;
        merged.extend(new.iter().cloned());

        let path = self.history_dir.join(snapshot_file_name(Utc::now()));
        let write_err = |e: std::io::Error| {
            MirrorError::History(format!(
                "Failed to write history file {}: {}",
                path.display(),
                e
            ))
        };

        let mut out = self.writer.create(&path)?;
        for digest in &merged {
            writeln!(out, "{}", digest).map_err(write_err)?;
        }
        out.flush().map_err(write_err)?;

        tracing::info!(
            parent: &self.span,
            snapshot = %path.display(),
            added = new.len(),
            total = merged.len(),
            "Appended history"
        );
        Ok(merged)
    }
}
