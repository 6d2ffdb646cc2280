//! Content digests (`<algorithm>:<hex>`).
//!
//! A [`Digest`] is the unit of deduplication for the archive engine: two
//! blobs are the same blob iff their digests compare equal.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

use crate::error::{MirrorError, Result};

/// Supported digest algorithms and the length of their hex encoding.
const ALGORITHMS: &[(&str, usize)] = &[("sha256", 64), ("sha384", 96), ("sha512", 128)];

/// Validated content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    value: String,
    split: usize,
}

impl Digest {
    /// Parse and validate a digest string such as `sha256:abcd…`.
    pub fn parse(s: &str) -> Result<Self> {
        let split = s
            .find(':')
            .ok_or_else(|| MirrorError::InvalidDigest(format!("{s}: missing algorithm")))?;
        let (algorithm, encoded) = (&s[..split], &s[split + 1..]);

        let expected_len = ALGORITHMS
            .iter()
            .find(|(name, _)| *name == algorithm)
            .map(|(_, len)| *len)
            .ok_or_else(|| {
                MirrorError::InvalidDigest(format!("{s}: unsupported algorithm '{algorithm}'"))
            })?;

        if encoded.len() != expected_len {
            return Err(MirrorError::InvalidDigest(format!(
                "{s}: expected {expected_len} hex characters, got {}",
                encoded.len()
            )));
        }
        if encoded.bytes().any(|b| b.is_ascii_uppercase()) || hex::decode(encoded).is_err() {
            return Err(MirrorError::InvalidDigest(format!(
                "{s}: encoded part is not lowercase hex"
            )));
        }

        Ok(Self {
            value: s.to_string(),
            split,
        })
    }

    /// Build a `sha256` digest from its bare hex encoding.
    pub fn from_sha256_hex(encoded: &str) -> Result<Self> {
        Self::parse(&format!("sha256:{encoded}"))
    }

    /// Compute the `sha256` digest of a byte slice.
    pub fn sha256_of(data: &[u8]) -> Self {
        let encoded = hex::encode(Sha256::digest(data));
        Self {
            split: "sha256".len(),
            value: format!("sha256:{encoded}"),
        }
    }

    /// Algorithm part, e.g. `sha256`.
    pub fn algorithm(&self) -> &str {
        &self.value[..self.split]
    }

    /// Hex-encoded part.
    pub fn encoded(&self) -> &str {
        &self.value[self.split + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Location of this blob inside a registry blob store:
    /// `<root>/<algorithm>/<hex[..2]>/<hex>`.
    pub fn blob_path(&self, blobs_root: &Path) -> PathBuf {
        let encoded = self.encoded();
        blobs_root
            .join(self.algorithm())
            .join(&encoded[..2])
            .join(encoded)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl FromStr for Digest {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "db870970ba330193164dacc88657df261d75bce1552ea474dbc7cf08b2fae2ed";

    #[test]
    fn test_parse_valid_sha256() {
        let d = Digest::parse(&format!("sha256:{HEX}")).unwrap();
        assert_eq!(d.algorithm(), "sha256");
        assert_eq!(d.encoded(), HEX);
        assert_eq!(d.to_string(), format!("sha256:{HEX}"));
    }

    #[test]
    fn test_parse_rejects_missing_algorithm() {
        assert!(Digest::parse(HEX).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_algorithm() {
        assert!(Digest::parse(&format!("md5:{HEX}")).is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!(Digest::parse("sha256:1dddb0988d16").is_err());
    }

    #[test]
    fn test_parse_rejects_uppercase_and_non_hex() {
        assert!(Digest::parse(&format!("sha256:{}", HEX.to_uppercase())).is_err());
        let bad = format!("sha256:{}zz", &HEX[..62]);
        assert!(Digest::parse(&bad).is_err());
    }

    #[test]
    fn test_from_sha256_hex() {
        let d = Digest::from_sha256_hex(HEX).unwrap();
        assert_eq!(d.as_str(), format!("sha256:{HEX}"));
        assert!(Digest::from_sha256_hex("latest").is_err());
    }

    #[test]
    fn test_sha256_of_matches_known_value() {
        let d = Digest::sha256_of(b"");
        assert_eq!(
            d.as_str(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(Digest::parse(d.as_str()).unwrap(), d);
    }

    #[test]
    fn test_blob_path() {
        let d = Digest::from_sha256_hex(HEX).unwrap();
        let path = d.blob_path(Path::new("/cache/docker/registry/v2/blobs"));
        assert_eq!(
            path,
            PathBuf::from(format!("/cache/docker/registry/v2/blobs/sha256/db/{HEX}"))
        );
    }

    #[test]
    fn test_serde_round_trip_validates() {
        let json = format!("\"sha256:{HEX}\"");
        let d: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_string(&d).unwrap(), json);
        assert!(serde_json::from_str::<Digest>("\"sha256:nothex\"").is_err());
    }
}
