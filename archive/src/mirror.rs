//! Incremental archive builder.
//!
//! An archive always carries the cache registry's repository metadata, the
//! working directory and a copy of the imageset configuration. Blobs are
//! only added when the history of previous archives does not already list
//! them.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use mirrorpack_core::error::{MirrorError, Result};
use mirrorpack_core::{ArchiveOptions, CopyImage, Digest, ImageType};
use tracing::Span;

use crate::adder::{new_adder, ArchiveAdder};
use crate::gather::{
    BlobGatherer, RegistryAuth, RegistryBlobGatherer, StoreBlobGatherer, REPOSITORIES_SUB_FOLDER,
};
use crate::history::{FsSnapshotWriter, HistoryStore};

/// Repository metadata of the cache registry, relative to the cache root.
pub const CACHE_REPOSITORIES_DIR: &str = REPOSITORIES_SUB_FOLDER;

/// Blob store of the cache registry, relative to the cache root.
pub const CACHE_BLOBS_DIR: &str = "docker/registry/v2/blobs";

/// Name prefix of the imageset configuration copy inside the archive.
pub const IMAGE_SET_CONFIG_PREFIX: &str = "isc_";

/// Locations an archive build reads from and writes to.
#[derive(Debug, Clone)]
pub struct ArchivePaths {
    /// Directory receiving the chunks
    pub destination: PathBuf,
    /// Imageset configuration embedded in every archive
    pub image_set_config: PathBuf,
    /// Working directory; its `.history` holds the shipped digests
    pub working_dir: PathBuf,
    /// Root of the cache registry storage
    pub cache_dir: PathBuf,
}

/// Where blob sets come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GathererKind {
    /// Walk the cache registry storage on disk
    #[default]
    Local,
    /// Ask the cache registry over its API
    Remote,
}

/// Builds one incremental archive.
pub struct MirrorArchive {
    paths: ArchivePaths,
    history: HistoryStore,
    gatherer: Box<dyn BlobGatherer>,
    adder: Box<dyn ArchiveAdder>,
    span: Span,
}

impl MirrorArchive {
    /// Wire the history store, gatherer and chunk writer from `options`.
    pub fn new(
        options: &ArchiveOptions,
        paths: ArchivePaths,
        gatherer: GathererKind,
        span: Span,
    ) -> Result<Self> {
        let history = HistoryStore::new(
            &paths.working_dir,
            options.since,
            Box::new(FsSnapshotWriter),
            span.clone(),
        )?;

        let gatherer: Box<dyn BlobGatherer> = match gatherer {
            GathererKind::Local => Box::new(StoreBlobGatherer::new(&paths.cache_dir, span.clone())),
            GathererKind::Remote => Box::new(RegistryBlobGatherer::new(
                RegistryAuth::from_env(),
                options.registry_insecure,
                !options.remove_signatures,
                span.clone(),
            )),
        };

        let adder = new_adder(
            options.policy,
            options.max_archive_bytes(),
            &paths.destination,
            span.clone(),
        )?;

        Ok(Self::with_parts(paths, history, gatherer, adder, span))
    }

    /// Assemble from ready-made collaborators.
    pub fn with_parts(
        paths: ArchivePaths,
        history: HistoryStore,
        gatherer: Box<dyn BlobGatherer>,
        adder: Box<dyn ArchiveAdder>,
        span: Span,
    ) -> Self {
        Self {
            paths,
            history,
            gatherer,
            adder,
            span,
        }
    }

    pub fn paths(&self) -> &ArchivePaths {
        &self.paths
    }

    /// Build the archive for `images` and return the path of its first
    /// chunk. The chunk writer is closed on every path out, after history
    /// has been updated.
    pub async fn build_archive(&mut self, images: &[CopyImage]) -> Result<PathBuf> {
        let result = self.build(images).await;
        let closed = self.adder.close();

        match (result, closed) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(MirrorError::Archive(format!(
                "unable to close the archive: {}",
                e
            ))),
            (Ok(primary), Ok(())) => {
                tracing::info!(parent: &self.span, archive = %primary.display(), "Archive built");
                Ok(primary)
            }
        }
    }

    async fn build(&mut self, images: &[CopyImage]) -> Result<PathBuf> {
        let cache_dir = self.paths.cache_dir.clone();

        let repositories = cache_dir.join(CACHE_REPOSITORIES_DIR);
        self.adder
            .add_all_folder(&repositories, &cache_dir)
            .map_err(|e| {
                MirrorError::Archive(format!(
                    "unable to add cache repositories to the archive: {}",
                    e
                ))
            })?;

        let working_dir = self.paths.working_dir.clone();
        let relative_to = working_dir.parent().unwrap_or(working_dir.as_path());
        self.adder
            .add_all_folder(&working_dir, relative_to)
            .map_err(|e| {
                MirrorError::Archive(format!("unable to add working-dir to the archive: {}", e))
            })?;

        let config_name = format!(
            "{}{}",
            IMAGE_SET_CONFIG_PREFIX,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        self.adder
            .add_file(&self.paths.image_set_config, Path::new(&config_name))
            .map_err(|e| {
                MirrorError::Archive(format!(
                    "unable to add image set configuration to the archive: {}",
                    e
                ))
            })?;

        let required = self.gather_all(images).await?;

        let shipped = self.history.read().map_err(|e| {
            MirrorError::History(format!(
                "unable to read history metadata from working-dir: {}",
                e
            ))
        })?;
        let new: BTreeSet<Digest> = required.difference(&shipped).cloned().collect();

        tracing::info!(
            parent: &self.span,
            images = images.len(),
            required = required.len(),
            already_shipped = required.len() - new.len(),
            new = new.len(),
            "Computed blob diff"
        );

        let blobs_root = cache_dir.join(CACHE_BLOBS_DIR);
        for digest in &new {
            let blob_dir = digest.blob_path(&blobs_root);
            self.adder
                .add_all_folder(&blob_dir, &cache_dir)
                .map_err(|e| {
                    MirrorError::Archive(format!(
                        "unable to add blob {} to the archive: {}",
                        digest, e
                    ))
                })?;
        }

        self.history.append(&new).map_err(|e| {
            MirrorError::History(format!("unable to update history metadata: {}", e))
        })?;

        Ok(self.adder.primary_chunk_path())
    }

    /// Union of the blob sets of every image, one image at a time.
    async fn gather_all(&self, images: &[CopyImage]) -> Result<BTreeSet<Digest>> {
        let mut required = BTreeSet::new();

        for image in images {
            let blobs = self
                .gatherer
                .gather_blobs(&image.destination)
                .await
                .map_err(|e| match e {
                    MirrorError::BlobLookup { .. } => e,
                    other => MirrorError::BlobLookup {
                        image: image.destination.clone(),
                        message: other.to_string(),
                    },
                })?;

            if !blobs.signature_errors.is_empty() {
                let message = blobs.signature_errors.join("; ");
                if image.image_type == ImageType::Release {
                    return Err(MirrorError::Signature {
                        image: image.destination.clone(),
                        message,
                    });
                }
                tracing::warn!(
                    parent: &self.span,
                    image = %image.destination,
                    kind = ?image.image_type,
                    errors = %message,
                    "Signature blobs could not be gathered; continuing without them"
                );
            }

            tracing::debug!(
                parent: &self.span,
                image = %image.destination,
                blobs = blobs.digests.len(),
                "Gathered image blobs"
            );
            required.extend(blobs.digests);
        }

        Ok(required)
    }
}
