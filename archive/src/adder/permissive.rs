//! Permissive chunking: a file larger than a chunk gets a chunk of its own.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use mirrorpack_core::config::SEG_MULTIPLIER;
use mirrorpack_core::error::Result;
use tracing::Span;

use super::{source_size, ArchiveAdder, ChunkWriter};

/// Chunk writer that never blocks a run over one oversized file.
///
/// Regular chunks stay within the maximum size. A file that alone exceeds
/// it is written into a dedicated single-entry chunk, recorded in
/// [`oversized_files`](Self::oversized_files), and reported once on
/// [`close`](ArchiveAdder::close).
pub struct PermissiveAdder {
    writer: ChunkWriter,
    oversized_files: BTreeMap<PathBuf, u64>,
    reported: bool,
}

impl PermissiveAdder {
    /// Open chunk 1 in `destination`. A `max_size` of 0 selects the default.
    pub fn new(max_size: u64, destination: &Path, span: Span) -> Result<Self> {
        Ok(Self {
            writer: ChunkWriter::new(max_size, destination, span)?,
            oversized_files: BTreeMap::new(),
            reported: false,
        })
    }

    /// Files that did not fit a chunk, with their sizes in bytes.
    pub fn oversized_files(&self) -> &BTreeMap<PathBuf, u64> {
        &self.oversized_files
    }

    pub fn current_chunk_id(&self) -> usize {
        self.writer.current_chunk_id()
    }

    pub fn current_chunk_size(&self) -> u64 {
        self.writer.current_chunk_size()
    }

    pub fn current_chunk_path(&self) -> Option<&Path> {
        self.writer.current_chunk_path()
    }

    /// Write `source` alone into a fresh chunk, leaving the open chunk as is.
    fn exception_chunk(&mut self, source: &Path, path_in_archive: &Path, size: u64) -> Result<()> {
        self.oversized_files.insert(source.to_path_buf(), size);
        let chunk = self.writer.write_dedicated(source, path_in_archive)?;
        tracing::warn!(
            parent: self.writer.span(),
            file = %source.display(),
            size,
            max = self.writer.max_size(),
            chunk = %chunk.display(),
            "File exceeds the maximum archive size; written to a dedicated chunk"
        );
        Ok(())
    }

    /// Emit one warning listing every oversized file and the archive size
    /// that would have avoided dedicated chunks. Returns whether it warned;
    /// only the first call does.
    fn report_oversized(&mut self) -> bool {
        if self.reported {
            return false;
        }
        let Some(largest) = self.oversized_files.values().max().copied() else {
            return false;
        };
        self.reported = true;
        let files = self
            .oversized_files
            .iter()
            .map(|(path, size)| format!("{}: {}", path.display(), size))
            .collect::<Vec<_>>()
            .join(", ");
        let recommended_gib = largest.div_ceil(SEG_MULTIPLIER);

        tracing::warn!(
            parent: self.writer.span(),
            count = self.oversized_files.len(),
            files = %files,
            recommended_archive_size_gib = recommended_gib,
            "The following files exceed the archiveSize configured; please consider updating archiveSize to at least {}",
            recommended_gib
        );
        true
    }
}

impl ArchiveAdder for PermissiveAdder {
    fn add_file(&mut self, source: &Path, path_in_archive: &Path) -> Result<()> {
        let size = source_size(source)?;

        if size > self.writer.max_size() {
            return self.exception_chunk(source, path_in_archive, size);
        }

        if self.writer.would_overflow(size) {
            self.writer.next_chunk()?;
        }
        self.writer.append(source, path_in_archive, size)
    }

    fn close(&mut self) -> Result<()> {
        let result = self.writer.close();
        self.report_oversized();
        result
    }

    fn primary_chunk_path(&self) -> PathBuf {
        self.writer.primary_chunk_path()
    }
}
