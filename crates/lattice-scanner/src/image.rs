//! Container image reference attribution
//!
//! Reports name the registry, repository, tag and digest of the scanned
//! image. Parsing and Docker Hub normalization are done by `oci_client`'s
//! [`Reference`]; this module only flattens it into owned report fields.

use std::str::FromStr;

use oci_client::Reference;

use crate::error::ScanError;

/// Tag used when a reference names neither tag nor digest
pub const DEFAULT_TAG: &str = "latest";

/// Parsed container image reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    /// Registry host, with optional port
    pub registry: String,
    /// Repository path within the registry
    pub repository: String,
    /// Tag, if any
    pub tag: Option<String>,
    /// Digest (`algorithm:hex`), if any
    pub digest: Option<String>,
}

impl ImageRef {
    /// Parse an image reference
    pub fn parse(reference: &str) -> Result<Self, ScanError> {
        let parsed = reference
            .parse::<Reference>()
            .map_err(|e| ScanError::image_reference(reference, e.to_string()))?;
        Ok(Self::from(&parsed))
    }
}

impl From<&Reference> for ImageRef {
    fn from(reference: &Reference) -> Self {
        let digest = reference.digest().map(str::to_string);
        let tag = reference
            .tag()
            .map(str::to_string)
            .or_else(|| digest.is_none().then(|| DEFAULT_TAG.to_string()));

        Self {
            registry: reference.resolve_registry().to_string(),
            repository: reference.repository().to_string(),
            tag,
            digest,
        }
    }
}

impl FromStr for ImageRef {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:f5600c6330da7bb112776ba067a32a9c20842d6ecc8ee3289f1a713b644092f8";

    #[test]
    fn docker_hub_short_name() {
        let image = ImageRef::parse("nginx:1.19").unwrap();
        assert_eq!(image.registry, "index.docker.io");
        assert_eq!(image.repository, "library/nginx");
        assert_eq!(image.tag.as_deref(), Some("1.19"));
        assert_eq!(image.digest, None);
    }

    #[test]
    fn default_tag_is_latest() {
        let image = ImageRef::parse("aquasec/trivy").unwrap();
        assert_eq!(image.repository, "aquasec/trivy");
        assert_eq!(image.tag.as_deref(), Some("latest"));
    }

    #[test]
    fn explicit_docker_io_is_normalized() {
        let image = ImageRef::parse("docker.io/redis").unwrap();
        assert_eq!(image.registry, "index.docker.io");
        assert_eq!(image.repository, "library/redis");
    }

    #[test]
    fn private_registry_with_port() {
        let image = ImageRef::parse("registry.example:5000/team/app:2.0").unwrap();
        assert_eq!(image.registry, "registry.example:5000");
        assert_eq!(image.repository, "team/app");
        assert_eq!(image.tag.as_deref(), Some("2.0"));
    }

    #[test]
    fn localhost_registry() {
        let image = ImageRef::parse("localhost/app").unwrap();
        assert_eq!(image.registry, "localhost");
        assert_eq!(image.repository, "app");
    }

    #[test]
    fn digest_without_tag() {
        let image = ImageRef::parse(&format!("ghcr.io/org/app@{}", DIGEST)).unwrap();
        assert_eq!(image.registry, "ghcr.io");
        assert_eq!(image.repository, "org/app");
        assert_eq!(image.tag, None);
        assert_eq!(image.digest.as_deref(), Some(DIGEST));
    }

    #[test]
    fn tag_and_digest() {
        let image: ImageRef = format!("quay.io/org/app:v1@{}", DIGEST).parse().unwrap();
        assert_eq!(image.tag.as_deref(), Some("v1"));
        assert_eq!(image.digest.as_deref(), Some(DIGEST));
    }

    #[test]
    fn rejects_malformed_references() {
        for reference in ["", "nginx:", "Nginx:1.0", "app@sha256", "two words", "org//app"] {
            assert!(
                matches!(
                    ImageRef::parse(reference),
                    Err(ScanError::ImageReference { .. })
                ),
                "expected {:?} to be rejected",
                reference
            );
        }
    }
}
