//! Blob gathering: which content-addressed blobs make up an image.
//!
//! Two sources are supported:
//!
//! - [`StoreBlobGatherer`] walks a registry storage layout on disk.
//! - [`RegistryBlobGatherer`] asks a registry for the image manifests.

mod local;
mod remote;

use std::collections::BTreeSet;

use async_trait::async_trait;
use mirrorpack_core::error::Result;
use mirrorpack_core::Digest;

pub use local::{StoreBlobGatherer, REPOSITORIES_SUB_FOLDER};
pub use remote::{
    sigstore_attachment_tag, ManifestSource, RegistryAuth, RegistryBlobGatherer, RegistryClient,
};

/// Blobs found for one image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatheredBlobs {
    /// Manifest, config and layer digests
    pub digests: BTreeSet<Digest>,
    /// Signature lookups that failed; the digests above are still complete
    /// for the image itself
    pub signature_errors: Vec<String>,
}

impl GatheredBlobs {
    pub fn from_digests(digests: impl IntoIterator<Item = Digest>) -> Self {
        Self {
            digests: digests.into_iter().collect(),
            signature_errors: Vec::new(),
        }
    }
}

/// Source of the blob set of an image.
#[async_trait]
pub trait BlobGatherer: Send + Sync {
    /// Every blob digest that constitutes `image_ref`. Lookup failures are
    /// returned as errors, never as a partial set.
    async fn gather_blobs(&self, image_ref: &str) -> Result<GatheredBlobs>;
}
