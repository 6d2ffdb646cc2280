//! Image references and copy records.
//!
//! Parses image references like `docker://localhost:55000/ubi8/ubi:latest`
//! into structured components, and derives the repository path used by the
//! on-disk registry layout.

use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Transport separator used by `docker://`, `oci://`, `file://`, ...
const TRANSPORT_SEPARATOR: &str = "://";

/// Remove the transport prefix (`docker://`, `oci://`, ...) from a reference.
pub fn ref_without_transport(reference: &str) -> &str {
    match reference.find(TRANSPORT_SEPARATOR) {
        Some(pos) => &reference[pos + TRANSPORT_SEPARATOR.len()..],
        None => reference,
    }
}

/// Transport prefix of a reference, if any (`docker`, `oci`, ...).
pub fn transport(reference: &str) -> Option<&str> {
    reference
        .find(TRANSPORT_SEPARATOR)
        .map(|pos| &reference[..pos])
}

/// Whether the first path component of a reference names a registry host.
fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

/// Remove the registry domain from a reference that has no transport.
///
/// `registry.redhat.io/ubi8/ubi:latest` becomes `ubi8/ubi:latest`; a
/// single-component reference such as `abcde:latest` is returned as is.
pub fn path_without_domain(reference: &str) -> Result<&str> {
    if reference.contains(TRANSPORT_SEPARATOR) {
        return Err(MirrorError::InvalidReference(
            "image reference should not contain transport prefix".to_string(),
        ));
    }
    let trimmed = reference.trim_start_matches('/');
    match trimmed.find('/') {
        Some(pos) if is_registry_host(&trimmed[..pos]) => Ok(&trimmed[pos + 1..]),
        _ => Ok(trimmed),
    }
}

/// Remove a trailing `@digest` or `:tag` from a repository path.
pub fn path_without_digest_nor_tag(path: &str) -> &str {
    if let Some(at_pos) = path.rfind('@') {
        return &path[..at_pos];
    }
    let last_slash = path.rfind('/').map(|p| p + 1).unwrap_or(0);
    match path[last_slash..].rfind(':') {
        Some(colon) => &path[..last_slash + colon],
        None => path,
    }
}

/// Repository path of an image inside a registry storage layout, e.g.
/// `docker://localhost:55000/ubi8/ubi:latest` → `ubi8/ubi`.
pub fn repository_path(reference: &str) -> Result<String> {
    let without_transport = ref_without_transport(reference);
    let without_domain = path_without_domain(without_transport)?;
    let path = path_without_digest_nor_tag(without_domain);
    if path.is_empty() {
        return Err(MirrorError::InvalidReference(format!(
            "no repository path in '{reference}'"
        )));
    }
    Ok(path.to_string())
}

/// Parsed OCI image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Transport (e.g., "docker"), if the reference carried one
    pub transport: Option<String>,
    /// Registry hostname (e.g., "localhost:55000", "quay.io")
    pub registry: String,
    /// Repository path (e.g., "ubi8/ubi")
    pub repository: String,
    /// Tag (e.g., "latest")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `docker://localhost:55000/ubi8/ubi:latest`
    /// - `quay.io/org/image@sha256:abc...`
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(MirrorError::InvalidReference(
                "Empty image reference".to_string(),
            ));
        }

        let transport = transport(reference).map(str::to_string);
        let reference = ref_without_transport(reference);

        // Split off digest first (@ separator)
        let (name_tag, digest) = match reference.rfind('@') {
            Some(at_pos) => {
                let digest_part = &reference[at_pos + 1..];
                if !digest_part.contains(':') {
                    return Err(MirrorError::InvalidReference(format!(
                        "Invalid digest format in reference '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (&reference[..at_pos], Some(digest_part.to_string()))
            }
            None => (reference, None),
        };

        // Split tag (: separator, but only after the last /)
        let last_slash = name_tag.rfind('/').map(|p| p + 1);
        let (name, tag) = match last_slash {
            Some(start) => match name_tag[start..].rfind(':') {
                Some(colon) => (
                    &name_tag[..start + colon],
                    Some(name_tag[start + colon + 1..].to_string()),
                ),
                None => (name_tag, None),
            },
            None => match name_tag.rfind(':') {
                // registry:port without repository is not a tag
                Some(colon)
                    if !name_tag[colon + 1..].chars().all(|c| c.is_ascii_digit()) =>
                {
                    (
                        &name_tag[..colon],
                        Some(name_tag[colon + 1..].to_string()),
                    )
                }
                _ => (name_tag, None),
            },
        };

        let (registry, repository) = Self::split_registry_repository(name)?;

        let tag = if tag.is_none() && digest.is_none() {
            Some(DEFAULT_TAG.to_string())
        } else {
            tag
        };

        Ok(ImageReference {
            transport,
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Split a name into registry and repository components.
    fn split_registry_repository(name: &str) -> Result<(String, String)> {
        if let Some(slash_pos) = name.find('/') {
            let first = &name[..slash_pos];
            if is_registry_host(first) {
                let repo = name[slash_pos + 1..].to_string();
                if repo.is_empty() {
                    return Err(MirrorError::InvalidReference(format!(
                        "Empty repository in reference '{}'",
                        name
                    )));
                }
                return Ok((first.to_string(), repo));
            }
        }

        let repository = if name.contains('/') {
            name.to_string()
        } else {
            format!("library/{}", name)
        };

        Ok((DEFAULT_REGISTRY.to_string(), repository))
    }

    /// Reference without transport, as understood by registry clients.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }

    /// Same repository, pointing at another tag (digest dropped).
    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            tag: Some(tag.to_string()),
            digest: None,
            ..self.clone()
        }
    }

    pub fn is_by_digest(&self) -> bool {
        self.digest.is_some()
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref transport) = self.transport {
            write!(f, "{}{}", transport, TRANSPORT_SEPARATOR)?;
        }
        write!(f, "{}", self.full_reference())
    }
}

/// Kind of content a copy record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageType {
    Release,
    CincinnatiGraph,
    Operator,
    OperatorCatalog,
    OperatorRelatedImage,
    OperatorBundle,
    Generic,
    Helm,
}

impl ImageType {
    pub fn is_release(self) -> bool {
        matches!(self, ImageType::Release | ImageType::CincinnatiGraph)
    }

    pub fn is_operator(self) -> bool {
        matches!(
            self,
            ImageType::Operator
                | ImageType::OperatorCatalog
                | ImageType::OperatorRelatedImage
                | ImageType::OperatorBundle
        )
    }

    pub fn is_additional(self) -> bool {
        self == ImageType::Generic
    }

    pub fn is_helm(self) -> bool {
        self == ImageType::Helm
    }
}

impl Default for ImageType {
    fn default() -> Self {
        Self::Generic
    }
}

/// An image already staged for mirroring, as produced upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyImage {
    /// Where the image was copied from
    pub source: String,
    /// Where the image lives now (the local cache registry)
    pub destination: String,
    /// Reference as written in the imageset configuration
    #[serde(default)]
    pub origin: String,
    #[serde(rename = "type", default)]
    pub image_type: ImageType,
}

impl CopyImage {
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        image_type: ImageType,
    ) -> Self {
        let source = source.into();
        Self {
            origin: source.clone(),
            source,
            destination: destination.into(),
            image_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:db870970ba330193164dacc88657df261d75bce1552ea474dbc7cf08b2fae2ed";

    #[test]
    fn test_ref_without_transport() {
        assert_eq!(
            ref_without_transport("docker://localhost:5000/ubi8/ubi:latest"),
            "localhost:5000/ubi8/ubi:latest"
        );
        assert_eq!(ref_without_transport("file:///tmp/ubi8/ubi"), "/tmp/ubi8/ubi");
        assert_eq!(
            ref_without_transport("localhost:5000/ubi8/ubi:latest"),
            "localhost:5000/ubi8/ubi:latest"
        );
    }

    #[test]
    fn test_path_without_domain() {
        assert_eq!(
            path_without_domain("registry.redhat.io/ubi8/ubi:latest").unwrap(),
            "ubi8/ubi:latest"
        );
        assert_eq!(path_without_domain("abcde:latest").unwrap(), "abcde:latest");
        assert_eq!(path_without_domain("folderName").unwrap(), "folderName");
        assert_eq!(
            path_without_domain(&format!("localhost:5000/ubi8/ubi@{DIGEST}")).unwrap(),
            format!("ubi8/ubi@{DIGEST}")
        );
        let err = path_without_domain("docker://localhost:5000/ubi8/ubi:latest").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid image reference: image reference should not contain transport prefix"
        );
    }

    #[test]
    fn test_repository_path() {
        let cases = [
            ("docker://localhost:5000/ubi8/ubi:latest", "ubi8/ubi"),
            (
                "docker://localhost:5000/ubi8/ubi@sha256:db870970ba330193164dacc88657df261d75bce1552ea474dbc7cf08b2fae2ed",
                "ubi8/ubi",
            ),
            ("docker://registry.redhat.io/ubi8/ubi:latest", "ubi8/ubi"),
            ("localhost:5000/ubi8/ubi:latest", "ubi8/ubi"),
            ("file:///tmp/ubi8/ubi", "tmp/ubi8/ubi"),
            ("oci:///tmp/ubi8/ubi", "tmp/ubi8/ubi"),
        ];
        for (reference, expected) in cases {
            assert_eq!(repository_path(reference).unwrap(), expected, "{reference}");
        }
    }

    #[test]
    fn test_repository_path_empty() {
        assert!(repository_path("docker://").is_err());
    }

    #[test]
    fn test_parse_with_transport() {
        let r = ImageReference::parse("docker://localhost:55000/ubi8/ubi:latest").unwrap();
        assert_eq!(r.transport.as_deref(), Some("docker"));
        assert_eq!(r.registry, "localhost:55000");
        assert_eq!(r.repository, "ubi8/ubi");
        assert_eq!(r.tag.as_deref(), Some("latest"));
        assert_eq!(r.to_string(), "docker://localhost:55000/ubi8/ubi:latest");
        assert_eq!(r.full_reference(), "localhost:55000/ubi8/ubi:latest");
    }

    #[test]
    fn test_parse_digest_only() {
        let r = ImageReference::parse(&format!("quay.io/openshift/release@{DIGEST}")).unwrap();
        assert_eq!(r.registry, "quay.io");
        assert_eq!(r.repository, "openshift/release");
        assert_eq!(r.tag, None);
        assert_eq!(r.digest.as_deref(), Some(DIGEST));
        assert!(r.is_by_digest());
    }

    #[test]
    fn test_parse_simple_name() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag.as_deref(), Some("latest"));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("nginx@invaliddigest").is_err());
    }

    #[test]
    fn test_with_tag_drops_digest() {
        let r = ImageReference::parse(&format!("localhost:55000/ubi8/ubi@{DIGEST}")).unwrap();
        let sig = r.with_tag("sha256-abc.sig");
        assert_eq!(sig.full_reference(), "localhost:55000/ubi8/ubi:sha256-abc.sig");
    }

    #[test]
    fn test_image_type_helpers() {
        assert!(ImageType::Release.is_release());
        assert!(ImageType::CincinnatiGraph.is_release());
        assert!(ImageType::OperatorBundle.is_operator());
        assert!(ImageType::Generic.is_additional());
        assert!(ImageType::Helm.is_helm());
        assert!(!ImageType::Helm.is_release());
    }

    #[test]
    fn test_copy_image_deserialize() {
        let yaml = r#"
- source: docker://quay.io/openshift/release:4.14.1-x86_64
  destination: docker://localhost:55000/openshift/release:4.14.1-x86_64
  origin: quay.io/openshift/release:4.14.1-x86_64
  type: release
- source: docker://registry.redhat.io/ubi8/ubi:latest
  destination: docker://localhost:55000/ubi8/ubi:latest
"#;
        let images: Vec<CopyImage> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].image_type, ImageType::Release);
        assert_eq!(images[1].image_type, ImageType::Generic);
        assert_eq!(images[1].origin, "");
    }
}
