//! Mirrorpack Core - Foundational Types
//!
//! Digests, image references, copy records, configuration and the shared
//! error type used across the mirrorpack crates.

pub mod config;
pub mod digest;
pub mod error;
pub mod image;

// Re-export commonly used types
pub use config::{ArchiveOptions, ChunkingPolicy, ImageSetConfig};
pub use digest::Digest;
pub use error::{MirrorError, Result};
pub use image::{CopyImage, ImageReference, ImageType};

/// Mirrorpack version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
