use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};

/// Bytes per unit of `archiveSize` (GiB).
pub const SEG_MULTIPLIER: u64 = 1024 * 1024 * 1024;

/// Default `archiveSize` in GiB when none is configured.
pub const DEFAULT_SEG_SIZE: u64 = 500;

/// Default maximum chunk size in bytes.
pub const DEFAULT_MAX_ARCHIVE_SIZE: u64 = DEFAULT_SEG_SIZE * SEG_MULTIPLIER;

/// How the chunk writer reacts to a file larger than a whole chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkingPolicy {
    /// Fail the build.
    Strict,
    /// Isolate the file in a dedicated oversized chunk and keep going.
    Permissive,
}

impl Default for ChunkingPolicy {
    fn default() -> Self {
        Self::Permissive
    }
}

impl std::fmt::Display for ChunkingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Permissive => write!(f, "permissive"),
        }
    }
}

impl std::str::FromStr for ChunkingPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "permissive" => Ok(Self::Permissive),
            _ => Err(format!(
                "unknown chunking policy: '{}' (supported: strict, permissive)",
                s
            )),
        }
    }
}

/// Archive engine options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveOptions {
    /// Maximum chunk size in GiB (0 = default)
    pub max_archive_size_gib: u64,

    /// Overflow policy for files larger than a chunk
    pub policy: ChunkingPolicy,

    /// Ignore history snapshots taken at or after this instant
    pub since: Option<DateTime<Utc>>,

    /// Skip sigstore signature blobs when gathering remotely
    pub remove_signatures: bool,

    /// Talk plain HTTP / skip TLS verification against the cache registry
    pub registry_insecure: bool,
}

impl ArchiveOptions {
    /// Maximum chunk size in bytes, applying the default for 0.
    pub fn max_archive_bytes(&self) -> u64 {
        let gib = if self.max_archive_size_gib == 0 {
            DEFAULT_SEG_SIZE
        } else {
            self.max_archive_size_gib
        };
        gib.saturating_mul(SEG_MULTIPLIER)
    }
}

/// The parts of an imageset configuration the archive engine consumes.
///
/// Everything else in the file belongs to upstream collaborators and is
/// ignored here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSetConfig {
    #[serde(default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub api_version: Option<String>,

    /// Maximum chunk size in GiB
    #[serde(default)]
    pub archive_size: u64,
}

impl ImageSetConfig {
    /// Load an imageset configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::Config(format!(
                "Failed to read image set configuration {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: ImageSetConfig = serde_yaml::from_str(&data)?;
        tracing::debug!(
            path = %path.display(),
            archive_size = config.archive_size,
            "Loaded image set configuration"
        );
        Ok(config)
    }
}
