//! Chunked tar writer.
//!
//! Files are appended to a sequence of tar chunks named
//! `mirror_000001.tar`, `mirror_000002.tar`, ... in the destination
//! directory. A chunk is rotated before it would grow past the configured
//! maximum; a single file is never split across chunks. What happens to a
//! file larger than a whole chunk depends on the policy:
//!
//! - [`StrictAdder`]: the add fails and nothing is written.
//! - [`PermissiveAdder`]: the file is written alone into a dedicated chunk.

mod permissive;
mod strict;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use mirrorpack_core::config::DEFAULT_MAX_ARCHIVE_SIZE;
use mirrorpack_core::error::{MirrorError, Result};
use mirrorpack_core::ChunkingPolicy;
use tracing::Span;

use crate::fs::walk_files;

pub use permissive::PermissiveAdder;
pub use strict::StrictAdder;

/// File name prefix of every archive chunk.
pub const ARCHIVE_FILE_PREFIX: &str = "mirror";

/// Chunk file name for a 1-based chunk id.
pub fn chunk_file_name(chunk_id: usize) -> String {
    format!("{}_{:06}.tar", ARCHIVE_FILE_PREFIX, chunk_id)
}

/// Chunk id encoded in a chunk file name, if the name is one.
fn chunk_id_of(file_name: &str) -> Option<usize> {
    let number = file_name
        .strip_prefix(ARCHIVE_FILE_PREFIX)?
        .strip_prefix('_')?
        .strip_suffix(".tar")?;
    if number.len() != 6 || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    number.parse().ok()
}

/// Capability set shared by both chunking policies.
pub trait ArchiveAdder: Send {
    /// Add a single file under `path_in_archive`.
    fn add_file(&mut self, source: &Path, path_in_archive: &Path) -> Result<()>;

    /// Flush and close the chunk currently open.
    fn close(&mut self) -> Result<()>;

    /// Path of the first chunk of the archive.
    fn primary_chunk_path(&self) -> PathBuf;

    /// Add every regular file below `folder`, each sized on its own, named
    /// relative to `relative_to`.
    fn add_all_folder(&mut self, folder: &Path, relative_to: &Path) -> Result<()> {
        let files = walk_files(folder).map_err(|e| {
            MirrorError::Archive(format!("Failed to walk {}: {}", folder.display(), e))
        })?;
        for path in files {
            let name = path.strip_prefix(relative_to).map_err(|_| {
                MirrorError::Archive(format!(
                    "{} is not below {}",
                    path.display(),
                    relative_to.display()
                ))
            })?;
            self.add_file(&path, name)?;
        }
        Ok(())
    }
}

/// Build the adder for a chunking policy.
pub fn new_adder(
    policy: ChunkingPolicy,
    max_size: u64,
    destination: &Path,
    span: Span,
) -> Result<Box<dyn ArchiveAdder>> {
    Ok(match policy {
        ChunkingPolicy::Strict => Box::new(StrictAdder::new(max_size, destination, span)?),
        ChunkingPolicy::Permissive => {
            Box::new(PermissiveAdder::new(max_size, destination, span)?)
        }
    })
}

/// Delete the chunks of a previous run from `destination`.
///
/// A missing destination is not an error.
pub fn remove_past_archives(destination: &Path) -> Result<()> {
    if !destination.exists() {
        return Ok(());
    }
    for chunk in list_archive_chunks(destination)? {
        std::fs::remove_file(&chunk).map_err(|e| {
            MirrorError::Archive(format!(
                "Failed to remove past archive {}: {}",
                chunk.display(),
                e
            ))
        })?;
    }
    Ok(())
}

/// Chunk files present in `dir`, ordered by chunk id.
pub fn list_archive_chunks(dir: &Path) -> Result<Vec<PathBuf>> {
    let read_dir = std::fs::read_dir(dir).map_err(|e| {
        MirrorError::Archive(format!("Failed to read directory {}: {}", dir.display(), e))
    })?;

    let mut chunks = Vec::new();
    for entry in read_dir {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(id) = name.to_str().and_then(chunk_id_of) {
            if entry.file_type()?.is_file() {
                chunks.push((id, entry.path()));
            }
        }
    }
    chunks.sort();
    Ok(chunks.into_iter().map(|(_, path)| path).collect())
}

type TarBuilder = tar::Builder<BufWriter<File>>;

/// A chunk file with an open tar builder.
struct OpenChunk {
    id: usize,
    path: PathBuf,
    builder: TarBuilder,
    size: u64,
}

/// State shared by both policies: chunk ids, the open chunk and its
/// running payload size.
pub(crate) struct ChunkWriter {
    destination: PathBuf,
    max_size: u64,
    /// Highest chunk id handed out so far.
    last_chunk_id: usize,
    current: Option<OpenChunk>,
    span: Span,
}

impl ChunkWriter {
    /// Create the destination directory and open chunk 1.
    pub(crate) fn new(max_size: u64, destination: &Path, span: Span) -> Result<Self> {
        std::fs::create_dir_all(destination).map_err(|e| {
            MirrorError::Archive(format!(
                "Failed to create archive destination {}: {}",
                destination.display(),
                e
            ))
        })?;

        let max_size = if max_size == 0 {
            DEFAULT_MAX_ARCHIVE_SIZE
        } else {
            max_size
        };

        let mut writer = Self {
            destination: destination.to_path_buf(),
            max_size,
            last_chunk_id: 0,
            current: None,
            span,
        };
        let first = writer.open_chunk()?;
        writer.current = Some(first);
        Ok(writer)
    }

    pub(crate) fn max_size(&self) -> u64 {
        self.max_size
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    pub(crate) fn current_chunk_id(&self) -> usize {
        self.current.as_ref().map_or(self.last_chunk_id, |c| c.id)
    }

    pub(crate) fn current_chunk_size(&self) -> u64 {
        self.current.as_ref().map_or(0, |c| c.size)
    }

    pub(crate) fn current_chunk_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|c| c.path.as_path())
    }

    pub(crate) fn primary_chunk_path(&self) -> PathBuf {
        self.destination.join(chunk_file_name(1))
    }

    /// Whether `size` more bytes would overflow the open chunk.
    pub(crate) fn would_overflow(&self, size: u64) -> bool {
        self.current_chunk_size().saturating_add(size) > self.max_size
    }

    /// Allocate the next chunk id and create its file.
    fn open_chunk(&mut self) -> Result<OpenChunk> {
        let id = self.last_chunk_id + 1;
        let path = self.destination.join(chunk_file_name(id));
        let file = File::create(&path).map_err(|e| {
            MirrorError::Archive(format!(
                "Failed to create archive chunk {}: {}",
                path.display(),
                e
            ))
        })?;
        self.last_chunk_id = id;

        tracing::debug!(parent: &self.span, chunk = id, path = %path.display(), "Opened archive chunk");

        Ok(OpenChunk {
            id,
            path,
            builder: tar::Builder::new(BufWriter::new(file)),
            size: 0,
        })
    }

    /// Write the tar trailer, flush and close a chunk.
    fn finalize(&self, chunk: OpenChunk) -> Result<()> {
        let OpenChunk {
            id,
            path,
            builder,
            size,
        } = chunk;
        let close_err = |e: std::io::Error| {
            MirrorError::Archive(format!(
                "Failed to close archive chunk {}: {}",
                path.display(),
                e
            ))
        };
        let mut buffered = builder.into_inner().map_err(close_err)?;
        buffered.flush().map_err(close_err)?;
        drop(buffered);

        tracing::debug!(parent: &self.span, chunk = id, size, "Closed archive chunk");
        Ok(())
    }

    /// Close the open chunk and open the next one.
    pub(crate) fn next_chunk(&mut self) -> Result<()> {
        if let Some(chunk) = self.current.take() {
            self.finalize(chunk)?;
        }
        let next = self.open_chunk()?;
        self.current = Some(next);
        Ok(())
    }

    /// Append a file to the open chunk, opening one if the writer was
    /// closed.
    pub(crate) fn append(&mut self, source: &Path, path_in_archive: &Path, size: u64) -> Result<()> {
        if self.current.is_none() {
            let chunk = self.open_chunk()?;
            self.current = Some(chunk);
        }
        let Some(chunk) = self.current.as_mut() else {
            return Err(MirrorError::Archive("no archive chunk open".to_string()));
        };
        append_entry(&mut chunk.builder, source, path_in_archive)?;
        chunk.size += size;
        Ok(())
    }

    /// Write one file alone into a freshly allocated chunk and close it
    /// right away. The open chunk and its size are left untouched.
    pub(crate) fn write_dedicated(&mut self, source: &Path, path_in_archive: &Path) -> Result<PathBuf> {
        let mut chunk = self.open_chunk()?;
        append_entry(&mut chunk.builder, source, path_in_archive)?;
        let path = chunk.path.clone();
        self.finalize(chunk)?;
        Ok(path)
    }

    /// Close the open chunk, if any. Closing twice is a no-op.
    pub(crate) fn close(&mut self) -> Result<()> {
        match self.current.take() {
            Some(chunk) => self.finalize(chunk),
            None => Ok(()),
        }
    }
}

/// Stat a source file for sizing.
pub(crate) fn source_size(source: &Path) -> Result<u64> {
    let metadata = std::fs::metadata(source).map_err(|e| {
        MirrorError::Archive(format!("Failed to stat {}: {}", source.display(), e))
    })?;
    Ok(metadata.len())
}

fn append_entry(builder: &mut TarBuilder, source: &Path, path_in_archive: &Path) -> Result<()> {
    let mut file = File::open(source).map_err(|e| {
        MirrorError::Archive(format!("Failed to open {}: {}", source.display(), e))
    })?;
    builder.append_file(path_in_archive, &mut file).map_err(|e| {
        MirrorError::Archive(format!(
            "Failed to add {} to the archive as {}: {}",
            source.display(),
            path_in_archive.display(),
            e
        ))
    })
}


#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_chunk_file_name() {
        assert_eq!(chunk_file_name(1), "mirror_000001.tar");
        assert_eq!(chunk_file_name(42), "mirror_000042.tar");
    }

    #[test]
    fn test_chunk_id_of() {
        assert_eq!(chunk_id_of("mirror_000003.tar"), Some(3));
        assert_eq!(chunk_id_of("mirror_3.tar"), None);
        assert_eq!(chunk_id_of("other_000003.tar"), None);
        assert_eq!(chunk_id_of("mirror_000003.tar.gz"), None);
    }

    #[test]
    fn test_writer_zero_max_uses_default() {
        let tmp = TempDir::new().unwrap();
        let writer = ChunkWriter::new(0, tmp.path(), Span::none()).unwrap();
        assert_eq!(writer.max_size(), DEFAULT_MAX_ARCHIVE_SIZE);
        assert_eq!(writer.current_chunk_id(), 1);
        assert!(tmp.path().join("mirror_000001.tar").exists());
    }

    #[test]
    fn test_next_chunk() {
        let tmp = TempDir::new().unwrap();
        let mut writer = ChunkWriter::new(1024, tmp.path(), Span::none()).unwrap();
        writer.next_chunk().unwrap();
        assert_eq!(writer.current_chunk_id(), 2);
        assert_eq!(writer.current_chunk_size(), 0);
        assert_eq!(
            writer.current_chunk_path().unwrap(),
            tmp.path().join("mirror_000002.tar")
        );
        writer.close().unwrap();
        // chunk 1 was finalized with a valid (empty) tar trailer
        assert!(entries(&tmp.path().join("mirror_000001.tar")).is_empty());
    }

    #[test]
    fn test_close_twice_is_noop() {
        let tmp = TempDir::new().unwrap();
        let mut writer = ChunkWriter::new(1024, tmp.path(), Span::none()).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_list_and_remove_past_archives() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "mirror_000002.tar", 1);
        write_file(tmp.path(), "mirror_000001.tar", 1);
        write_file(tmp.path(), "notes.txt", 1);

        let chunks = list_archive_chunks(tmp.path()).unwrap();
        assert_eq!(
            chunks,
            vec![
                tmp.path().join("mirror_000001.tar"),
                tmp.path().join("mirror_000002.tar"),
            ]
        );

        remove_past_archives(tmp.path()).unwrap();
        assert!(list_archive_chunks(tmp.path()).unwrap().is_empty());
        assert!(tmp.path().join("notes.txt").exists());
    }

    #[test]
    fn test_remove_past_archives_missing_destination() {
        let tmp = TempDir::new().unwrap();
        remove_past_archives(&tmp.path().join("nope")).unwrap();
    }

    #[test]
    fn test_new_adder_by_policy() {
        let tmp = TempDir::new().unwrap();
        let big = write_file(tmp.path(), "src/big", 2048);
        let dest = tmp.path().join("out");

        let mut strict = new_adder(ChunkingPolicy::Strict, 1024, &dest, Span::none()).unwrap();
        assert!(strict.add_file(&big, Path::new("big")).is_err());
        strict.close().unwrap();

        let mut permissive =
            new_adder(ChunkingPolicy::Permissive, 1024, &dest, Span::none()).unwrap();
        permissive.add_file(&big, Path::new("big")).unwrap();
        permissive.close().unwrap();
        assert_eq!(permissive.primary_chunk_path(), dest.join("mirror_000001.tar"));
    }
}
