//! Manifests and the content they reference.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// Docker image manifest, schema 2.
pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker manifest list.
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
/// OCI image manifest.
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index.
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Compute the `sha256:<hex>` content address of `data`.
pub fn digest_of(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Describes a piece of content by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the content. May be empty.
    #[serde(default)]
    pub media_type: String,
    /// Content address, `sha256:<hex>`.
    pub digest: String,
    /// Size in bytes. Zero when unknown.
    #[serde(default)]
    pub size: u64,
}

/// Something a manifest points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// A config or layer blob.
    Blob(Descriptor),
    /// A child manifest of an index.
    Manifest(Descriptor),
}

/// A manifest payload could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("manifest is not valid JSON: {0}")]
pub struct ManifestError(#[from] serde_json::Error);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    media_type: Option<String>,
    schema_version: Option<u64>,
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
    manifests: Option<Vec<Descriptor>>,
}

/// A manifest payload with its media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Media type the payload was stored with.
    pub media_type: String,
    /// Raw manifest bytes.
    pub payload: Bytes,
}

impl Manifest {
    /// Wrap a payload, detecting the media type when none is given.
    pub fn new(media_type: Option<&str>, payload: Bytes) -> Self {
        let media_type = match media_type {
            Some(media_type) if !media_type.is_empty() => media_type.to_owned(),
            _ => detect_media_type(&payload),
        };
        Self {
            media_type,
            payload,
        }
    }

    /// The content address of the payload.
    pub fn digest(&self) -> String {
        digest_of(&self.payload)
    }

    /// The descriptor of this manifest.
    pub fn descriptor(&self) -> Descriptor {
        Descriptor {
            media_type: self.media_type.clone(),
            digest: self.digest(),
            size: self.payload.len() as u64,
        }
    }

    /// True for manifest lists / image indexes.
    pub fn is_index(&self) -> bool {
        self.media_type == DOCKER_MANIFEST_LIST || self.media_type == OCI_INDEX
    }

    /// Blobs and child manifests this manifest refers to, in document order.
    ///
    /// Child manifests come before blobs so a copy can push them first.
    pub fn references(&self) -> Result<Vec<Reference>, ManifestError> {
        let document: Document = serde_json::from_slice(&self.payload)?;
        let mut references = Vec::new();

        for child in document.manifests.into_iter().flatten() {
            references.push(Reference::Manifest(child));
        }
        if let Some(config) = document.config {
            references.push(Reference::Blob(config));
        }
        references.extend(document.layers.into_iter().map(Reference::Blob));

        Ok(references)
    }
}

/// Detect the media type of a manifest from its content.
pub fn detect_media_type(data: &[u8]) -> String {
    let Ok(document) = serde_json::from_slice::<Document>(data) else {
        return OCI_MANIFEST.to_owned();
    };

    if let Some(media_type) = document.media_type {
        return media_type;
    }

    match (document.schema_version, document.manifests.is_some()) {
        (Some(1), _) => "application/vnd.docker.distribution.manifest.v1+json".to_owned(),
        (Some(2), true) => DOCKER_MANIFEST_LIST.to_owned(),
        (Some(2), false) => DOCKER_MANIFEST_V2.to_owned(),
        (_, true) => OCI_INDEX.to_owned(),
        _ => OCI_MANIFEST.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_manifest_references_config_and_layers() {
        let payload = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_MANIFEST,
            "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "digest": "sha256:c", "size": 2},
            "layers": [
                {"mediaType": "application/vnd.oci.image.layer.v1.tar+gzip", "digest": "sha256:l1", "size": 10},
                {"mediaType": "application/vnd.oci.image.layer.v1.tar+gzip", "digest": "sha256:l2", "size": 20}
            ]
        });
        let manifest = Manifest::new(None, Bytes::from(payload.to_string()));

        assert_eq!(manifest.media_type, OCI_MANIFEST);
        let digests: Vec<_> = manifest
            .references()
            .unwrap()
            .into_iter()
            .map(|reference| match reference {
                Reference::Blob(d) => d.digest,
                Reference::Manifest(d) => panic!("unexpected child manifest {}", d.digest),
            })
            .collect();
        assert_eq!(digests, vec!["sha256:c", "sha256:l1", "sha256:l2"]);
    }

    #[test]
    fn index_references_children() {
        let payload = serde_json::json!({
            "schemaVersion": 2,
            "manifests": [{"mediaType": OCI_MANIFEST, "digest": "sha256:child", "size": 100}]
        });
        let manifest = Manifest::new(None, Bytes::from(payload.to_string()));

        assert_eq!(manifest.media_type, DOCKER_MANIFEST_LIST);
        assert!(manifest.is_index());
        assert!(matches!(
            manifest.references().unwrap().as_slice(),
            [Reference::Manifest(d)] if d.digest == "sha256:child"
        ));
    }

    #[test]
    fn invalid_payload_has_no_references() {
        let manifest = Manifest::new(Some(OCI_MANIFEST), Bytes::from_static(b"not json"));
        assert!(manifest.references().is_err());
    }

    #[test]
    fn digest_is_sha256_of_payload() {
        assert_eq!(
            digest_of(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
