//! Registry adapter traits.

use std::fmt;

use bytes::Bytes;

use crate::error::AdapterError;
use crate::manifest::{Descriptor, Manifest};
use crate::model::{Filter, HealthStatus, Namespace, NamespaceQuery, RegistryInfo, Resource};

/// Result alias for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Resumption state returned by a chunked blob push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkUpload {
    /// Where the next chunk should be sent. `None` once the blob is committed.
    pub location: Option<String>,

    /// The last byte offset accepted so far.
    pub end_range: u64,
}

/// The base capability every registry adapter provides.
#[async_trait::async_trait]
pub trait Adapter: fmt::Debug + Send + Sync {
    /// Static description of the adapter. Must not perform network I/O.
    fn info(&self) -> AdapterResult<RegistryInfo>;

    /// Namespaces matching `query`. An empty result is not an error.
    async fn list_namespaces(&self, query: &NamespaceQuery) -> AdapterResult<Vec<Namespace>>;

    /// Create a namespace. Succeeds if a namespace with the same name already exists.
    async fn create_namespace(&self, namespace: &Namespace) -> AdapterResult<()>;

    /// Get a namespace by name, failing with a not-found error when absent.
    async fn get_namespace(&self, name: &str) -> AdapterResult<Namespace>;

    /// The extended artifact capability, when the adapter offers it.
    fn artifact_registry(&self) -> Option<&dyn ArtifactRegistry> {
        None
    }
}

/// Extended capability for adapters which move artifact content.
///
/// Operations a backend genuinely cannot support return
/// [crate::AdapterErrorKind::NotImplemented] rather than an empty success.
#[async_trait::async_trait]
pub trait ArtifactRegistry: Adapter {
    /// Check that the registry is reachable.
    async fn health_check(&self) -> AdapterResult<HealthStatus>;

    /// Enumerate resources matching `filters`.
    async fn fetch_artifacts(&self, filters: &[Filter]) -> AdapterResult<Vec<Resource>>;

    /// Pre-flight step, called once per replication batch.
    async fn prepare_for_push(&self, resources: &[Resource]) -> AdapterResult<()>;

    /// Whether a manifest exists, with its descriptor when the adapter knows it.
    async fn manifest_exist(
        &self,
        repository: &str,
        reference: &str,
    ) -> AdapterResult<(bool, Option<Descriptor>)>;

    /// Fetch a manifest and its digest.
    async fn pull_manifest(
        &self,
        repository: &str,
        reference: &str,
        accepted_media_types: &[&str],
    ) -> AdapterResult<(Manifest, String)>;

    /// Store a manifest under `reference`, returning its digest.
    async fn push_manifest(
        &self,
        repository: &str,
        reference: &str,
        media_type: &str,
        payload: Bytes,
    ) -> AdapterResult<String>;

    /// Delete a manifest by tag or digest.
    async fn delete_manifest(&self, repository: &str, reference: &str) -> AdapterResult<()>;

    /// Whether the blob `digest` exists in `repository`.
    async fn blob_exist(&self, repository: &str, digest: &str) -> AdapterResult<bool>;

    /// Fetch a whole blob, returning its size and content.
    async fn pull_blob(&self, repository: &str, digest: &str) -> AdapterResult<(u64, Bytes)>;

    /// Fetch the inclusive byte range `start..=end` of a blob of `blob_size` bytes.
    async fn pull_blob_chunk(
        &self,
        repository: &str,
        digest: &str,
        blob_size: u64,
        start: u64,
        end: u64,
    ) -> AdapterResult<(u64, Bytes)>;

    /// Push the inclusive byte range `start..=end` of a blob of `size` bytes.
    ///
    /// `location` is `None` for the first chunk and the value returned by the
    /// previous call afterwards.
    #[allow(clippy::too_many_arguments)]
    async fn push_blob_chunk(
        &self,
        repository: &str,
        digest: &str,
        size: u64,
        chunk: Bytes,
        start: u64,
        end: u64,
        location: Option<&str>,
    ) -> AdapterResult<ChunkUpload>;

    /// Push a whole blob in one request.
    async fn push_blob(
        &self,
        repository: &str,
        digest: &str,
        size: u64,
        blob: Bytes,
    ) -> AdapterResult<()>;

    /// Link an existing blob from `src_repository` into `dst_repository` without transferring it.
    async fn mount_blob(
        &self,
        src_repository: &str,
        digest: &str,
        dst_repository: &str,
    ) -> AdapterResult<()>;

    /// A repository the blob can be mounted from, or `None` if mounting is not possible.
    async fn can_be_mount(&self, digest: &str) -> AdapterResult<Option<String>>;

    /// Every tag in `repository`.
    async fn list_tags(&self, repository: &str) -> AdapterResult<Vec<String>>;

    /// Remove `tag` without deleting the manifest it points at.
    async fn delete_tag(&self, repository: &str, tag: &str) -> AdapterResult<()>;
}

/// Obtain the artifact capability of `adapter`, or fail with
/// [crate::AdapterErrorKind::Unsupported].
pub fn require_artifact_registry(adapter: &dyn Adapter) -> AdapterResult<&dyn ArtifactRegistry> {
    adapter.artifact_registry().ok_or_else(|| {
        let name = adapter
            .info()
            .ok()
            .and_then(|info| info.registry_type)
            .map(|ty| ty.to_string())
            .unwrap_or_else(|| format!("{adapter:?}"));

        AdapterError::new(
            "adapter",
            crate::AdapterErrorKind::Unsupported,
            format!("{name} does not support artifact operations"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AdapterErrorKind;

    static_assertions::assert_obj_safe!(Adapter);
    static_assertions::assert_obj_safe!(ArtifactRegistry);

    #[derive(Debug)]
    struct NamespacesOnly;

    #[async_trait::async_trait]
    impl Adapter for NamespacesOnly {
        fn info(&self) -> AdapterResult<RegistryInfo> {
            Ok(RegistryInfo {
                registry_type: Some("namespaces-only".into()),
                ..Default::default()
            })
        }

        async fn list_namespaces(&self, _query: &NamespaceQuery) -> AdapterResult<Vec<Namespace>> {
            Ok(Vec::new())
        }

        async fn create_namespace(&self, _namespace: &Namespace) -> AdapterResult<()> {
            Ok(())
        }

        async fn get_namespace(&self, name: &str) -> AdapterResult<Namespace> {
            Err(AdapterError::not_found("namespaces-only", name))
        }
    }

    #[test]
    fn missing_capability_is_reported() {
        let err = require_artifact_registry(&NamespacesOnly).unwrap_err();
        assert_eq!(err.kind(), AdapterErrorKind::Unsupported);
        assert!(err.to_string().contains("namespaces-only"));
    }
}
