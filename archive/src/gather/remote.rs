//! Blob gathering through a registry's manifest API.
//!
//! Uses the `oci-distribution` crate to fetch manifests. Multi-platform
//! indexes are expanded into every per-platform manifest; for each image
//! manifest the manifest digest, config digest and layer digests are
//! collected. Registry errors are returned to the caller as is; retrying
//! is the caller's business.

use async_trait::async_trait;
use mirrorpack_core::error::{MirrorError, Result};
use mirrorpack_core::{Digest, ImageReference};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{OciImageManifest, OciManifest};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference};
use tracing::Span;

use super::{BlobGatherer, GatheredBlobs};

/// Authentication credentials for a container registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if not set.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();

        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Sigstore attachment tag holding the signature of `digest`:
/// `sha256:abc…` → `sha256-abc….sig`.
pub fn sigstore_attachment_tag(digest: &Digest) -> String {
    format!("{}-{}.sig", digest.algorithm(), digest.encoded())
}

/// Config and layer digests of a single-platform manifest.
fn image_blobs(manifest: &OciImageManifest) -> Result<Vec<Digest>> {
    manifest
        .layers
        .iter()
        .chain(std::iter::once(&manifest.config))
        .map(|descriptor| Digest::parse(&descriptor.digest))
        .collect()
}

/// Fetches raw manifests by reference.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// The manifest `reference` points at, with its digest.
    async fn pull_manifest(&self, reference: &Reference) -> Result<(OciManifest, String)>;
}

/// [`ManifestSource`] backed by an `oci-distribution` client.
pub struct RegistryClient {
    client: Client,
    auth: RegistryAuth,
}

impl RegistryClient {
    /// `insecure` talks plain HTTP and accepts any certificate, which is
    /// what the local cache registry needs.
    pub fn new(auth: RegistryAuth, insecure: bool) -> Self {
        let config = ClientConfig {
            protocol: if insecure {
                ClientProtocol::Http
            } else {
                ClientProtocol::Https
            },
            accept_invalid_certificates: insecure,
            ..Default::default()
        };

        Self {
            client: Client::new(config),
            auth,
        }
    }
}

#[async_trait]
impl ManifestSource for RegistryClient {
    async fn pull_manifest(&self, reference: &Reference) -> Result<(OciManifest, String)> {
        self.client
            .pull_manifest(reference, &self.auth.to_oci_auth())
            .await
            .map_err(|e| MirrorError::Registry {
                registry: reference.registry().to_string(),
                message: format!("Failed to pull manifest for {}: {}", reference, e),
            })
    }
}

/// Gathers blobs by querying a registry.
pub struct RegistryBlobGatherer {
    source: Box<dyn ManifestSource>,
    copy_signatures: bool,
    span: Span,
}

impl RegistryBlobGatherer {
    pub fn new(auth: RegistryAuth, insecure: bool, copy_signatures: bool, span: Span) -> Self {
        Self::with_source(
            Box::new(RegistryClient::new(auth, insecure)),
            copy_signatures,
            span,
        )
    }

    pub fn with_source(source: Box<dyn ManifestSource>, copy_signatures: bool, span: Span) -> Self {
        Self {
            source,
            copy_signatures,
            span,
        }
    }

    /// Convert an ImageReference to an oci-distribution Reference.
    fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
        let ref_str = reference.full_reference();
        ref_str.parse::<Reference>().map_err(|e| {
            MirrorError::InvalidReference(format!("Invalid OCI reference '{}': {}", ref_str, e))
        })
    }

    async fn pull_manifest(&self, reference: &Reference) -> Result<(OciManifest, String)> {
        self.source.pull_manifest(reference).await
    }

    /// Manifest digest, config and layers of one platform image.
    async fn single_arch_blobs(
        &self,
        reference: &Reference,
        manifest: &OciImageManifest,
        manifest_digest: &Digest,
        blobs: &mut GatheredBlobs,
    ) -> Result<()> {
        blobs.digests.insert(manifest_digest.clone());
        blobs.digests.extend(image_blobs(manifest)?);
        if self.copy_signatures {
            self.signature_blobs(reference, manifest_digest, blobs).await;
        }
        Ok(())
    }

    /// Add the blobs of the sigstore signature attached to `digest`. A
    /// failure is recorded in `blobs.signature_errors` instead of failing
    /// the lookup.
    async fn signature_blobs(&self, reference: &Reference, digest: &Digest, blobs: &mut GatheredBlobs) {
        let sig_ref = Reference::with_tag(
            reference.registry().to_string(),
            reference.repository().to_string(),
            sigstore_attachment_tag(digest),
        );

        let result = match self.pull_manifest(&sig_ref).await {
            Ok((OciManifest::Image(manifest), sig_digest)) => Digest::parse(&sig_digest)
                .and_then(|d| image_blobs(&manifest).map(|layers| (d, layers))),
            Ok((OciManifest::ImageIndex(_), _)) => Err(MirrorError::Other(format!(
                "signature {} is an image index",
                sig_ref
            ))),
            Err(e) => Err(e),
        };

        match result {
            Ok((sig_digest, sig_blobs)) => {
                blobs.digests.insert(sig_digest);
                blobs.digests.extend(sig_blobs);
            }
            Err(e) => {
                tracing::debug!(parent: &self.span, reference = %sig_ref, error = %e, "No signature found");
                blobs.signature_errors.push(e.to_string());
            }
        }
    }
}

#[async_trait]
impl BlobGatherer for RegistryBlobGatherer {
    async fn gather_blobs(&self, image_ref: &str) -> Result<GatheredBlobs> {
        let image = ImageReference::parse(image_ref)?;
        let oci_ref = Self::to_oci_reference(&image)?;

        let (manifest, digest) = self.pull_manifest(&oci_ref).await?;
        let digest = Digest::parse(&digest)?;
        let mut blobs = GatheredBlobs::default();

        match manifest {
            OciManifest::Image(manifest) => {
                self.single_arch_blobs(&oci_ref, &manifest, &digest, &mut blobs)
                    .await?;
            }
            OciManifest::ImageIndex(index) => {
                blobs.digests.insert(digest.clone());
                if self.copy_signatures {
                    self.signature_blobs(&oci_ref, &digest, &mut blobs).await;
                }

                for entry in &index.manifests {
                    let instance_digest = Digest::parse(&entry.digest)?;
                    let instance_ref = Reference::with_digest(
                        oci_ref.registry().to_string(),
                        oci_ref.repository().to_string(),
                        entry.digest.clone(),
                    );
                    match self.pull_manifest(&instance_ref).await? {
                        (OciManifest::Image(manifest), _) => {
                            self.single_arch_blobs(
                                &instance_ref,
                                &manifest,
                                &instance_digest,
                                &mut blobs,
                            )
                            .await?;
                        }
                        (OciManifest::ImageIndex(_), _) => {
                            return Err(MirrorError::Registry {
                                registry: oci_ref.registry().to_string(),
                                message: format!("nested image index {}", instance_ref),
                            });
                        }
                    }
                }
            }
        }

        tracing::debug!(
            parent: &self.span,
            image = %image_ref,
            blobs = blobs.digests.len(),
            signature_errors = blobs.signature_errors.len(),
            "Gathered blobs from registry"
        );

        Ok(blobs)
    }
}
