//! Strict chunking: a file larger than a chunk fails the build.

use std::path::{Path, PathBuf};

use mirrorpack_core::error::{MirrorError, Result};
use tracing::Span;

use super::{source_size, ArchiveAdder, ChunkWriter};

/// Chunk writer that guarantees every chunk stays within the maximum size.
pub struct StrictAdder {
    writer: ChunkWriter,
}

impl StrictAdder {
    /// Open chunk 1 in `destination`. A `max_size` of 0 selects the default.
    pub fn new(max_size: u64, destination: &Path, span: Span) -> Result<Self> {
        Ok(Self {
            writer: ChunkWriter::new(max_size, destination, span)?,
        })
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
}

impl ArchiveAdder for StrictAdder {
    fn add_file(&mut self, source: &Path, path_in_archive: &Path) -> Result<()> {
        let size = source_size(source)?;
        let max = self.writer.max_size();

        if size > max {
            tracing::warn!(
                parent: self.writer.span(),
                file = %source.display(),
                size,
                max,
                "maxArchiveSize is too small compared to sizes of files that need to be included in the archive; aborting archive generation"
            );
            return Err(MirrorError::ArchiveSizeExceeded {
                path: source.to_path_buf(),
                size,
                max,
            });
        }

        if self.writer.would_overflow(size) {
            self.writer.next_chunk()?;
        }
        self.writer.append(source, path_in_archive, size)
    }

    fn close(&mut self) -> Result<()> {
        self.writer.close()
    }

    fn primary_chunk_path(&self) -> PathBuf {
        self.writer.primary_chunk_path()
    }
}
