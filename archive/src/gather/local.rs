//! Blob gathering from an on-disk registry storage layout.
//!
//! The distribution registry keeps one directory per repository:
//!
//! ```text
//! docker/registry/v2/repositories/<path>/
//! ├── _layers/sha256/<hex>/link
//! └── _manifests/
//!     ├── revisions/sha256/<hex>/link
//!     └── tags/<tag>/current/link
//! ```
//!
//! Every `link` below a `sha256/<hex>` directory names a blob of the
//! repository; tag links are skipped.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mirrorpack_core::error::{MirrorError, Result};
use mirrorpack_core::image::repository_path;
use mirrorpack_core::Digest;
use tracing::Span;

use super::{BlobGatherer, GatheredBlobs};
use crate::fs::walk_files;

/// Repositories root inside the local storage.
pub const REPOSITORIES_SUB_FOLDER: &str = "docker/registry/v2/repositories";

/// Name of the files that mark a blob as part of a repository.
const LINK_FILE: &str = "link";

/// Gathers blobs by walking a registry's local storage.
#[derive(Debug, Clone)]
pub struct StoreBlobGatherer {
    local_storage: PathBuf,
    span: Span,
}

impl StoreBlobGatherer {
    /// `local_storage` is the registry root that contains `docker/registry/v2`.
    pub fn new(local_storage: &Path, span: Span) -> Self {
        Self {
            local_storage: local_storage.to_path_buf(),
            span,
        }
    }

    /// Directory of the repository an image reference points at.
    pub fn repository_dir(&self, image_ref: &str) -> Result<PathBuf> {
        let sub_path = repository_path(image_ref)?;
        Ok(self
            .local_storage
            .join(REPOSITORIES_SUB_FOLDER)
            .join(sub_path))
    }

    /// Synchronous core of [`BlobGatherer::gather_blobs`].
    pub fn gather(&self, image_ref: &str) -> Result<GatheredBlobs> {
        let image_path = self.repository_dir(image_ref)?;
        let files = walk_files(&image_path).map_err(|e| MirrorError::BlobLookup {
            image: image_ref.to_string(),
            message: format!("Failed to walk {}: {}", image_path.display(), e),
        })?;

        let digests = files
            .iter()
            .filter(|path| path.file_name().is_some_and(|name| name == LINK_FILE))
            .filter_map(|path| link_digest(path))
            .collect::<Vec<_>>();

        tracing::debug!(
            parent: &self.span,
            image = %image_ref,
            path = %image_path.display(),
            blobs = digests.len(),
            "Gathered blobs from local storage"
        );

        Ok(GatheredBlobs::from_digests(digests))
    }
}

/// Digest named by the parent directory of a `link` file, if it is one.
fn link_digest(link: &Path) -> Option<Digest> {
    let parent = link.parent()?.file_name()?.to_str()?;
    Digest::from_sha256_hex(parent).ok()
}

#[async_trait]
impl BlobGatherer for StoreBlobGatherer {
    async fn gather_blobs(&self, image_ref: &str) -> Result<GatheredBlobs> {
        self.gather(image_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    const MANIFEST: &str = "db870970ba330193164dacc88657df261d75bce1552ea474dbc7cf08b2fae2ed";
    const LAYER: &str = "e6c589cf5f402a60a83a01653304d7a8dcdd47b93a395a797b5622a18904bd66";
    const CONFIG: &str = "9b6fa335dba394d437930ad79e308e01da4f624328e49d00c0ff44775d2e4769";

    fn write_link(root: &Path, relative: &str, target: &str) {
        let path = root.join(REPOSITORIES_SUB_FOLDER).join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, format!("sha256:{target}")).unwrap();
    }

    fn fake_cache() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write_link(root, &format!("ubi8/ubi/_manifests/revisions/sha256/{MANIFEST}/link"), MANIFEST);
        write_link(root, &format!("ubi8/ubi/_layers/sha256/{LAYER}/link"), LAYER);
        write_link(root, &format!("ubi8/ubi/_layers/sha256/{CONFIG}/link"), CONFIG);
        write_link(root, "ubi8/ubi/_manifests/tags/latest/current/link", MANIFEST);
        write_link(root, &format!("ubi8/ubi/_manifests/tags/latest/index/sha256/{MANIFEST}/link"), MANIFEST);
        write_link(root, "ubi8/other/_layers/sha256/ab/link", "ab");
        tmp
    }

    fn digest(hex: &str) -> Digest {
        Digest::from_sha256_hex(hex).unwrap()
    }

    #[test]
    fn test_gather_skips_tag_links() {
        let cache = fake_cache();
        let gatherer = StoreBlobGatherer::new(cache.path(), Span::none());
        let blobs = gatherer
            .gather("docker://localhost:55000/ubi8/ubi:latest")
            .unwrap();

        let expected: BTreeSet<Digest> = [MANIFEST, LAYER, CONFIG].iter().map(|h| digest(h)).collect();
        assert_eq!(blobs.digests, expected);
        assert!(blobs.signature_errors.is_empty());
    }

    #[test]
    fn test_gather_by_digest_reference() {
        let cache = fake_cache();
        let gatherer = StoreBlobGatherer::new(cache.path(), Span::none());
        let blobs = gatherer
            .gather(&format!("docker://localhost:55000/ubi8/ubi@sha256:{MANIFEST}"))
            .unwrap();
        assert!(blobs.digests.contains(&digest(MANIFEST)));
        assert_eq!(blobs.digests.len(), 3);
    }

    #[test]
    fn test_gather_ignores_invalid_digest_dirs() {
        let cache = fake_cache();
        let gatherer = StoreBlobGatherer::new(cache.path(), Span::none());
        let blobs = gatherer.gather("localhost:55000/ubi8/other:latest").unwrap();
        assert!(blobs.digests.is_empty());
    }

    #[test]
    fn test_gather_missing_repository_fails() {
        let cache = fake_cache();
        let gatherer = StoreBlobGatherer::new(cache.path(), Span::none());
        let err = gatherer
            .gather("docker://localhost:55000/missing/image:latest")
            .unwrap_err();
        assert!(matches!(err, MirrorError::BlobLookup { .. }));
        assert!(err.to_string().contains("missing/image"));
    }

    #[test]
    fn test_repository_dir() {
        let gatherer = StoreBlobGatherer::new(Path::new("/cache"), Span::none());
        assert_eq!(
            gatherer
                .repository_dir("docker://registry.redhat.io/ubi8/ubi:latest")
                .unwrap(),
            PathBuf::from("/cache/docker/registry/v2/repositories/ubi8/ubi")
        );
    }

    #[tokio::test]
    async fn test_gather_blobs_trait() {
        let cache = fake_cache();
        let gatherer: Box<dyn BlobGatherer> = Box::new(StoreBlobGatherer::new(cache.path(), Span::none()));
        let blobs = gatherer
            .gather_blobs("docker://localhost:55000/ubi8/ubi:latest")
            .await
            .unwrap();
        assert_eq!(blobs.digests.len(), 3);
    }
}
