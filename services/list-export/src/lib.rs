//! An adapter which exports replicated artifact lists to a webhook.
//!
//! The export adapter never moves content. During
//! [ArtifactRegistry::prepare_for_push] it gathers every artifact in the batch
//! and POSTs a single [ExportResult] to the destination named in the
//! resources' extended info. Every other operation is either a fixed stand-in
//! or [AdapterErrorKind::NotImplemented].

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use api_client::error::HttpResponseError;
use api_client::{ApiClient, InternalEndpoint};
use bytes::Bytes;
use http::{Method, StatusCode, Uri};
use hyperdriver::client::SharedClientService;
use hyperdriver::service::SharedService;
use hyperdriver::Body;
use replication::manifest::digest_of;
use replication::model::{DESTINATION_URL, GROUP_NAME};
use replication::{
    Adapter, AdapterError, AdapterErrorKind, AdapterFactory, AdapterPattern, AdapterRegistryBuilder,
    AdapterResult, ArtifactRegistry, ChunkUpload, Descriptor, FactoryError, Filter, HealthStatus,
    Manifest, Namespace, NamespaceQuery, Registry, RegistryInfo, RegistryType, Resource,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower::Service as _;

const NAME: &str = "list-export";

const EXPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// The body POSTed to the export destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportResult {
    /// Group the destination files artifacts under.
    pub group: String,
    /// URL of the registry the artifacts were replicated from.
    pub registry: String,
    /// Artifacts in the batch.
    pub artifacts: Vec<ExportedArtifact>,
}

/// One artifact in an [ExportResult].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedArtifact {
    /// Repository name, without the registry host.
    pub repository: String,
    /// Tags pointing at the digest.
    #[serde(rename = "tag")]
    pub tags: Vec<String>,
    /// Labels attached to the artifact.
    pub labels: Vec<String>,
    /// Artifact type, such as `IMAGE`.
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// Manifest digest.
    pub digest: String,
    /// Set when the artifact was removed from the source.
    pub deleted: bool,
}

/// Errors raised while exporting a batch.
#[derive(Debug, Error)]
pub enum ExportError {
    /// A resource carried no extended info before the destination was known.
    #[error("resource has no extended info and no destination has been resolved")]
    MissingExtendedInfo,

    /// A routing field was absent or not a string.
    #[error("extended info field {field} is missing or not a string")]
    InvalidExtendedInfo {
        /// Name of the offending field.
        field: &'static str,
    },

    /// No resource in the batch named its source registry.
    #[error("no registry information found in the batch")]
    NoRegistry,

    /// The destination URL could not be parsed.
    #[error("invalid destination url {url:?}")]
    Destination {
        /// The URL as given.
        url: String,
        /// Why it was rejected.
        #[source]
        source: http::uri::InvalidUri,
    },

    /// The payload could not be serialized.
    #[error("failed to encode export payload")]
    Encode(#[from] serde_json::Error),

    /// The request could not be sent.
    #[error("export request failed")]
    Request(#[from] api_client::error::Error),

    /// The destination answered with a non-success status.
    #[error("destination rejected export with {status}: {message}")]
    Rejected {
        /// Status the destination answered with.
        status: StatusCode,
        /// Response body, as text.
        message: String,
    },
}

impl ExportError {
    /// The adapter error kind this maps to.
    pub fn kind(&self) -> AdapterErrorKind {
        match self {
            ExportError::MissingExtendedInfo
            | ExportError::InvalidExtendedInfo { .. }
            | ExportError::NoRegistry
            | ExportError::Destination { .. } => AdapterErrorKind::InvalidRequest,
            ExportError::Encode(_) => AdapterErrorKind::Serialization,
            ExportError::Request(_) | ExportError::Rejected { .. } => AdapterErrorKind::Transport,
        }
    }
}

impl From<ExportError> for AdapterError {
    fn from(error: ExportError) -> Self {
        AdapterError::new(NAME, error.kind(), error)
    }
}

/// Fold a batch of resources into an export payload and its destination.
///
/// All resources in a batch share one destination and group. Resources
/// without metadata, repository or registry are skipped.
pub fn build_export(resources: &[Resource]) -> Result<(String, ExportResult), ExportError> {
    let mut registry: Option<&Registry> = None;
    let mut destination: Option<String> = None;
    let mut group: Option<String> = None;
    let mut artifacts = Vec::new();

    for resource in resources {
        let Some(metadata) = &resource.metadata else {
            continue;
        };
        let Some(repository) = &metadata.repository else {
            continue;
        };
        let Some(source) = &resource.registry else {
            continue;
        };

        match &resource.extended_info {
            Some(info) => {
                if destination.is_none() {
                    destination = Some(string_field(info, DESTINATION_URL)?);
                }
                if group.is_none() {
                    group = Some(string_field(info, GROUP_NAME)?);
                }
            }
            None if destination.is_some() && group.is_some() => {}
            None => return Err(ExportError::MissingExtendedInfo),
        }

        registry.get_or_insert(source);
        artifacts.extend(metadata.artifacts.iter().map(|artifact| ExportedArtifact {
            repository: repository.name.clone(),
            tags: artifact.tags.clone(),
            labels: artifact.labels.clone(),
            artifact_type: artifact.artifact_type.clone(),
            digest: artifact.digest.clone(),
            deleted: resource.deleted,
        }));
    }

    let registry = registry.ok_or(ExportError::NoRegistry)?;
    let result = ExportResult {
        group: group.unwrap_or_default(),
        registry: registry.url.clone(),
        artifacts,
    };
    Ok((destination.unwrap_or_default(), result))
}

fn string_field(
    info: &replication::ExtendedInfo,
    field: &'static str,
) -> Result<String, ExportError> {
    info.get(field)
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned)
        .ok_or(ExportError::InvalidExtendedInfo { field })
}

/// Adapter for the `list-export` registry type.
///
/// Also a [tower::Service]: requests sent through it are routed to the
/// internal endpoint and carry the service secret.
#[derive(Debug, Clone)]
pub struct ExportAdapter {
    registry: Registry,
    client: ApiClient<()>,
    internal: ApiClient<()>,
    transport: SharedClientService<Body, Body>,
}

impl ExportAdapter {
    /// Create an adapter which sends requests over `transport`.
    pub fn new(
        registry: &Registry,
        endpoint: &InternalEndpoint,
        transport: SharedClientService<Body, Body>,
    ) -> Self {
        let client = ApiClient::new_with_inner_service(endpoint.url().clone(), (), transport.clone());
        let internal = endpoint.client(transport.clone());

        Self {
            registry: registry.clone(),
            client,
            transport: internal.inner().clone(),
            internal,
        }
    }

    /// The registry this adapter was created for.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// A client for the core service's internal API.
    pub fn internal(&self) -> &ApiClient<()> {
        &self.internal
    }

    /// POST `result` to `destination`.
    #[tracing::instrument(skip(self, result), fields(artifacts = result.artifacts.len()))]
    pub async fn export(&self, destination: &str, result: &ExportResult) -> Result<(), ExportError> {
        let uri: Uri = destination.parse().map_err(|source| ExportError::Destination {
            url: destination.to_owned(),
            source,
        })?;

        let response = self
            .client
            .request(Method::POST, uri)
            .timeout(EXPORT_TIMEOUT)
            .json(result)?
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error = HttpResponseError::from_response(response).await;
            tracing::warn!(%status, message = %error.message, "export rejected");
            return Err(ExportError::Rejected {
                status,
                message: error.message,
            });
        }

        tracing::info!(%status, "exported artifact list");
        Ok(())
    }
}

impl tower::Service<http::Request<hyperdriver::Body>> for ExportAdapter {
    type Response = http::Response<hyperdriver::Body>;
    type Error = hyperdriver::client::Error;
    type Future =
        <SharedClientService<Body, Body> as tower::Service<http::Request<hyperdriver::Body>>>::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.transport.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<hyperdriver::Body>) -> Self::Future {
        self.transport.call(req)
    }
}

#[async_trait::async_trait]
impl Adapter for ExportAdapter {
    fn info(&self) -> AdapterResult<RegistryInfo> {
        Ok(RegistryInfo {
            registry_type: Some(RegistryType::new(RegistryType::LIST_EXPORT)),
            description: "Exports the list of replicated artifacts to a webhook".into(),
            supported_resource_types: vec![replication::model::ResourceType::Artifact],
            supported_filters: Vec::new(),
            supported_triggers: vec!["manual".into(), "event_based".into()],
        })
    }

    async fn list_namespaces(&self, _query: &NamespaceQuery) -> AdapterResult<Vec<Namespace>> {
        Err(AdapterError::not_implemented(NAME, "list_namespaces"))
    }

    async fn create_namespace(&self, _namespace: &Namespace) -> AdapterResult<()> {
        Err(AdapterError::not_implemented(NAME, "create_namespace"))
    }

    async fn get_namespace(&self, _name: &str) -> AdapterResult<Namespace> {
        Err(AdapterError::not_implemented(NAME, "get_namespace"))
    }

    fn artifact_registry(&self) -> Option<&dyn ArtifactRegistry> {
        Some(self)
    }
}

#[async_trait::async_trait]
impl ArtifactRegistry for ExportAdapter {
    async fn health_check(&self) -> AdapterResult<HealthStatus> {
        Ok(HealthStatus::Healthy)
    }

    async fn fetch_artifacts(&self, _filters: &[Filter]) -> AdapterResult<Vec<Resource>> {
        Ok(Vec::new())
    }

    async fn prepare_for_push(&self, resources: &[Resource]) -> AdapterResult<()> {
        let (destination, result) = build_export(resources)?;
        tracing::debug!(
            %destination,
            group = %result.group,
            registry = %result.registry,
            "exporting artifact list"
        );
        self.export(&destination, &result).await?;
        Ok(())
    }

    async fn manifest_exist(
        &self,
        _repository: &str,
        _reference: &str,
    ) -> AdapterResult<(bool, Option<Descriptor>)> {
        Ok((true, None))
    }

    async fn pull_manifest(
        &self,
        _repository: &str,
        _reference: &str,
        _accepted_media_types: &[&str],
    ) -> AdapterResult<(Manifest, String)> {
        Err(AdapterError::not_implemented(NAME, "pull_manifest"))
    }

    /// Accepts and discards the manifest.
    async fn push_manifest(
        &self,
        _repository: &str,
        _reference: &str,
        _media_type: &str,
        payload: Bytes,
    ) -> AdapterResult<String> {
        Ok(digest_of(&payload))
    }

    async fn delete_manifest(&self, _repository: &str, _reference: &str) -> AdapterResult<()> {
        Err(AdapterError::not_implemented(NAME, "delete_manifest"))
    }

    async fn blob_exist(&self, _repository: &str, _digest: &str) -> AdapterResult<bool> {
        Ok(true)
    }

    async fn pull_blob(&self, _repository: &str, _digest: &str) -> AdapterResult<(u64, Bytes)> {
        Err(AdapterError::not_implemented(NAME, "pull_blob"))
    }

    async fn pull_blob_chunk(
        &self,
        _repository: &str,
        _digest: &str,
        _blob_size: u64,
        _start: u64,
        _end: u64,
    ) -> AdapterResult<(u64, Bytes)> {
        Err(AdapterError::not_implemented(NAME, "pull_blob_chunk"))
    }

    async fn push_blob_chunk(
        &self,
        _repository: &str,
        _digest: &str,
        _size: u64,
        _chunk: Bytes,
        _start: u64,
        _end: u64,
        _location: Option<&str>,
    ) -> AdapterResult<ChunkUpload> {
        Err(AdapterError::not_implemented(NAME, "push_blob_chunk"))
    }

    /// Accepts and discards the blob.
    async fn push_blob(
        &self,
        _repository: &str,
        _digest: &str,
        _size: u64,
        _blob: Bytes,
    ) -> AdapterResult<()> {
        Ok(())
    }

    /// Accepts and discards the mount.
    async fn mount_blob(
        &self,
        _src_repository: &str,
        _digest: &str,
        _dst_repository: &str,
    ) -> AdapterResult<()> {
        Ok(())
    }

    async fn can_be_mount(&self, _digest: &str) -> AdapterResult<Option<String>> {
        Ok(None)
    }

    async fn list_tags(&self, _repository: &str) -> AdapterResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn delete_tag(&self, _repository: &str, _tag: &str) -> AdapterResult<()> {
        Err(AdapterError::not_implemented(NAME, "delete_tag"))
    }
}

/// Builds [ExportAdapter]s sharing one transport.
#[derive(Debug, Clone)]
pub struct ExportAdapterFactory {
    endpoint: InternalEndpoint,
    transport: SharedClientService<Body, Body>,
}

impl ExportAdapterFactory {
    /// A factory whose adapters connect over TCP, with TLS where required.
    pub fn new(endpoint: InternalEndpoint) -> Self {
        let transport = hyperdriver::Client::build_tcp_http()
            .with_default_tls()
            .build_service();
        Self {
            endpoint,
            transport,
        }
    }

    /// A factory whose adapters send every request through `transport`.
    pub fn with_transport<S>(endpoint: InternalEndpoint, transport: S) -> Self
    where
        S: tower::Service<
                http::Request<hyperdriver::Body>,
                Response = http::Response<hyperdriver::Body>,
                Error = hyperdriver::client::Error,
            > + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        Self {
            endpoint,
            transport: SharedService::new(transport),
        }
    }
}

impl AdapterFactory for ExportAdapterFactory {
    fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>, AdapterError> {
        Ok(Arc::new(ExportAdapter::new(
            registry,
            &self.endpoint,
            self.transport.clone(),
        )))
    }

    fn pattern(&self) -> Option<AdapterPattern> {
        None
    }
}

/// Register the export adapter factory under [RegistryType::LIST_EXPORT].
pub fn register(
    builder: &mut AdapterRegistryBuilder,
    endpoint: InternalEndpoint,
) -> Result<(), FactoryError> {
    builder.register(RegistryType::LIST_EXPORT, ExportAdapterFactory::new(endpoint))?;
    Ok(())
}
