//! `mirrorpack archive` command.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use clap::Args;
use mirrorpack_archive::{
    list_archive_chunks, remove_past_archives, ArchivePaths, GathererKind, MirrorArchive,
};
use mirrorpack_core::{ArchiveOptions, ChunkingPolicy, CopyImage, ImageSetConfig, MirrorError};

use crate::output;

#[derive(Args, Debug)]
pub struct ArchiveArgs {
    /// Imageset configuration; embedded in the archive, `archiveSize` is read
    #[arg(long)]
    pub config: PathBuf,

    /// Copy records of the staged images (JSON or YAML list)
    #[arg(long)]
    pub images: PathBuf,

    /// Working directory (history and bookkeeping)
    #[arg(long)]
    pub workspace: PathBuf,

    /// Root of the cache registry storage
    #[arg(long)]
    pub cache: PathBuf,

    /// Directory receiving the archive chunks
    #[arg(long)]
    pub dest: PathBuf,

    /// What to do with a file larger than a chunk: `strict` fails,
    /// `permissive` isolates it in a chunk of its own
    #[arg(long, default_value_t = ChunkingPolicy::Permissive, value_parser = ChunkingPolicy::from_str)]
    pub policy: ChunkingPolicy,

    /// Ignore history snapshots taken at or after this RFC3339 instant
    #[arg(long, value_parser = super::parse_since)]
    pub since: Option<DateTime<Utc>>,

    /// Query the cache registry instead of walking its storage
    #[arg(long)]
    pub remote: bool,

    /// Use plain HTTP and skip TLS verification against the cache registry
    #[arg(long)]
    pub insecure: bool,

    /// Do not include image signatures
    #[arg(long)]
    pub remove_signatures: bool,

    /// Only print chunk paths, one per line
    #[arg(short, long)]
    pub quiet: bool,
}

impl ArchiveArgs {
    fn options(&self, config: &ImageSetConfig) -> ArchiveOptions {
        ArchiveOptions {
            max_archive_size_gib: config.archive_size,
            policy: self.policy,
            since: self.since,
            remove_signatures: self.remove_signatures,
            registry_insecure: self.insecure,
        }
    }
}

/// Load copy records, as YAML when the extension says so, JSON otherwise.
pub(crate) fn load_copy_images(path: &Path) -> Result<Vec<CopyImage>, MirrorError> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        MirrorError::Config(format!(
            "Failed to read image list {}: {}",
            path.display(),
            e
        ))
    })?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == "yaml" || ext == "yml");
    let images = if is_yaml {
        serde_yaml::from_str(&data)?
    } else {
        serde_json::from_str(&data)?
    };
    Ok(images)
}

pub async fn execute(args: ArchiveArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ImageSetConfig::load(&args.config)?;
    let images = load_copy_images(&args.images)?;
    let options = args.options(&config);

    let span = tracing::info_span!(
        "archive",
        workspace = %args.workspace.display(),
        dest = %args.dest.display(),
        policy = %options.policy,
    );

    remove_past_archives(&args.dest)?;

    let paths = ArchivePaths {
        destination: args.dest.clone(),
        image_set_config: args.config.clone(),
        working_dir: args.workspace.clone(),
        cache_dir: args.cache.clone(),
    };
    let kind = if args.remote {
        GathererKind::Remote
    } else {
        GathererKind::Local
    };

    let mut archive = MirrorArchive::new(&options, paths, kind, span)?;
    archive.build_archive(&images).await?;

    let chunks = list_archive_chunks(&args.dest)?;
    if args.quiet {
        for chunk in &chunks {
            println!("{}", chunk.display());
        }
        return Ok(());
    }

    let mut table = output::new_table(&["CHUNK", "SIZE"]);
    for chunk in &chunks {
        let size = std::fs::metadata(chunk).map(|m| m.len()).unwrap_or(0);
        table.add_row([chunk.display().to_string(), output::format_bytes(size)]);
    }
    println!("{table}");
    Ok(())
}
