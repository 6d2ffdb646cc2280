use std::path::PathBuf;

use thiserror::Error;

/// Exit code bit for failures tied to release images.
pub const RELEASE_EXIT_CODE: i32 = 1 << 1;

/// Mirrorpack error types
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Blob gathering failed for an image
    #[error("unable to find blobs corresponding to {image}: {message}")]
    BlobLookup { image: String, message: String },

    /// Signature blobs could not be gathered for an image
    #[error("signature error for {image}: {message}")]
    Signature { image: String, message: String },

    /// A single file does not fit in any chunk (strict chunking)
    #[error(
        "maxArchiveSize {max} is too small compared to sizes of files that need to be included in the archive: {} is {size} bytes",
        .path.display()
    )]
    ArchiveSizeExceeded { path: PathBuf, size: u64, max: u64 },

    /// No history snapshot is available
    #[error("{0}")]
    EmptyHistory(String),

    /// History metadata could not be read or written
    #[error("History error: {0}")]
    History(String),

    /// Archive chunk could not be written
    #[error("Archive error: {0}")]
    Archive(String),

    /// Malformed digest string
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    /// Malformed image reference
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    Registry { registry: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl MirrorError {
    /// Whether this error only signals that no history exists yet.
    pub fn is_empty_history(&self) -> bool {
        matches!(self, MirrorError::EmptyHistory(_))
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            MirrorError::Signature { .. } => 1 | RELEASE_EXIT_CODE,
            _ => 1,
        }
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        MirrorError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for MirrorError {
    fn from(err: serde_yaml::Error) -> Self {
        MirrorError::Serialization(err.to_string())
    }
}

/// Result type alias for mirrorpack operations
pub type Result<T> = std::result::Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_lookup_error_display() {
        let error = MirrorError::BlobLookup {
            image: "docker://localhost:55000/ubi8/ubi:latest".to_string(),
            message: "manifest unknown".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "unable to find blobs corresponding to docker://localhost:55000/ubi8/ubi:latest: manifest unknown"
        );
    }

    #[test]
    fn test_archive_size_exceeded_display() {
        let error = MirrorError::ArchiveSizeExceeded {
            path: PathBuf::from("/cache/blobs/big"),
            size: 121_856,
            max: 10_240,
        };
        let msg = error.to_string();
        assert!(msg.contains("/cache/blobs/big"));
        assert!(msg.contains("121856"));
        assert!(msg.contains("10240"));
    }

    #[test]
    fn test_empty_history_is_recognized() {
        let error = MirrorError::EmptyHistory("no history metadata found under wd".to_string());
        assert!(error.is_empty_history());
        assert_eq!(error.to_string(), "no history metadata found under wd");
        assert!(!MirrorError::History("x".to_string()).is_empty_history());
    }

    #[test]
    fn test_exit_codes() {
        let sig = MirrorError::Signature {
            image: "release".to_string(),
            message: "missing".to_string(),
        };
        assert_eq!(sig.exit_code(), 3);
        assert_eq!(MirrorError::Other("x".to_string()).exit_code(), 1);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: MirrorError = io_error.into();
        assert!(matches!(error, MirrorError::Io(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let error: MirrorError = result.unwrap_err().into();
        assert!(matches!(error, MirrorError::Serialization(_)));
    }

    #[test]
    fn test_registry_error_display() {
        let error = MirrorError::Registry {
            registry: "localhost:55000".to_string(),
            message: "name unknown".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Registry error: localhost:55000 - name unknown"
        );
    }
}
