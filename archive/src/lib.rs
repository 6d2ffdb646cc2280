//! Mirrorpack Archive - Incremental Archive Engine
//!
//! Packages mirrored container content into size-bounded tar chunks,
//! shipping each blob only once across a chain of archives.
//!
//! ## Components
//!
//! - [`gather`]: which blobs make up an image (local storage walk or
//!   registry manifest lookup)
//! - [`history`]: timestamped snapshots of the blobs already shipped
//! - [`adder`]: chunked tar writer, strict or permissive on oversized files
//! - [`mirror`]: the build orchestrating the three above

pub mod adder;
pub mod fs;
pub mod gather;
pub mod history;
pub mod mirror;

pub use adder::{
    chunk_file_name, list_archive_chunks, new_adder, remove_past_archives, ArchiveAdder,
    PermissiveAdder, StrictAdder, ARCHIVE_FILE_PREFIX,
};
pub use gather::{
    BlobGatherer, GatheredBlobs, ManifestSource, RegistryAuth, RegistryBlobGatherer, StoreBlobGatherer,
};
pub use history::{FsSnapshotWriter, HistoryStore, SnapshotWriter, HISTORY_DIR, HISTORY_NAME_PREFIX};
pub use mirror::{
    ArchivePaths, GathererKind, MirrorArchive, CACHE_BLOBS_DIR, CACHE_REPOSITORIES_DIR,
    IMAGE_SET_CONFIG_PREFIX,
};
