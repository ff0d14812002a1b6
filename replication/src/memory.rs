//! A registry held entirely in memory.
//!
//! Used as the destination and source in tests and dry runs, and as the
//! reference behaviour for chunked uploads and cross-repository mounts.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::RwLock;

use crate::adapter::{Adapter, AdapterResult, ArtifactRegistry, ChunkUpload};
use crate::error::AdapterError;
use crate::factory::AdapterFactory;
use crate::manifest::{digest_of, Descriptor, Manifest, Reference};
use crate::model::{
    Artifact, Filter, FilterType, HealthStatus, Namespace, NamespaceQuery, Registry, RegistryInfo,
    RegistryType, Repository, Resource, ResourceMetadata, ResourceType,
};

const NAME: &str = "memory";

/// Counters for the content-moving operations a registry has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Blobs pushed in a single request.
    pub blob_pushes: u64,
    /// Individual chunks accepted by chunked uploads.
    pub chunk_pushes: u64,
    /// Blobs linked by cross-repository mount.
    pub mounts: u64,
}

#[derive(Debug, Default)]
struct Repo {
    blobs: BTreeSet<String>,
    manifests: HashMap<String, Manifest>,
    tags: BTreeMap<String, String>,
}

impl Repo {
    fn resolve(&self, reference: &str) -> Option<&str> {
        if let Some((digest, _)) = self.manifests.get_key_value(reference) {
            return Some(digest.as_str());
        }
        self.tags.get(reference).map(String::as_str)
    }
}

#[derive(Debug)]
struct Session {
    repository: String,
    digest: String,
    data: BytesMut,
}

#[derive(Debug, Default)]
struct State {
    namespaces: BTreeMap<String, Namespace>,
    blobs: HashMap<String, Bytes>,
    repositories: BTreeMap<String, Repo>,
    sessions: HashMap<String, Session>,
    stats: MemoryStats,
}

impl State {
    fn repo(&self, repository: &str) -> AdapterResult<&Repo> {
        self.repositories
            .get(repository)
            .ok_or_else(|| AdapterError::not_found(NAME, format_args!("repository {repository}")))
    }

    fn commit_blob(&mut self, repository: &str, digest: &str, data: Bytes) {
        self.blobs.entry(digest.to_owned()).or_insert(data);
        self.repositories
            .entry(repository.to_owned())
            .or_default()
            .blobs
            .insert(digest.to_owned());
    }
}

fn verify(digest: &str, size: u64, data: &[u8]) -> AdapterResult<()> {
    if data.len() as u64 != size {
        return Err(AdapterError::invalid(
            NAME,
            format_args!("blob {digest} is {} bytes, expected {size}", data.len()),
        ));
    }

    let computed = digest_of(data);
    if computed != digest {
        return Err(AdapterError::invalid(
            NAME,
            format_args!("digest mismatch: expected {digest}, computed {computed}"),
        ));
    }
    Ok(())
}

/// Match `name` against a pattern where `*` stands for any run of characters.
fn glob_match(pattern: &str, name: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return true;
    };
    let Some(mut rest) = name.strip_prefix(first) else {
        return false;
    };

    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(index) => rest = &rest[index + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

/// An [ArtifactRegistry] backed by in-process maps.
#[derive(Debug)]
pub struct MemoryRegistry {
    url: String,
    state: RwLock<State>,
}

impl MemoryRegistry {
    /// An empty registry reachable at `url`.
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            state: RwLock::new(State::default()),
        }
    }

    /// The URL the registry was created with.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// A snapshot of the operation counters.
    pub async fn stats(&self) -> MemoryStats {
        self.state.read().await.stats
    }

    fn artifacts_of(repo: &Repo, filters: &[Filter]) -> Vec<Artifact> {
        let mut artifacts: BTreeMap<&str, Artifact> = BTreeMap::new();
        for digest in repo.manifests.keys() {
            artifacts.insert(
                digest.as_str(),
                Artifact {
                    digest: digest.clone(),
                    artifact_type: "IMAGE".into(),
                    ..Default::default()
                },
            );
        }
        for (tag, digest) in &repo.tags {
            if let Some(artifact) = artifacts.get_mut(digest.as_str()) {
                artifact.tags.push(tag.clone());
            }
        }

        let tag_patterns: Vec<&str> = filters
            .iter()
            .filter(|filter| filter.filter_type == FilterType::Tag)
            .filter_map(Filter::pattern)
            .collect();

        artifacts
            .into_values()
            .filter_map(|mut artifact| {
                if tag_patterns.is_empty() {
                    return Some(artifact);
                }
                artifact
                    .tags
                    .retain(|tag| tag_patterns.iter().all(|pattern| glob_match(pattern, tag)));
                (!artifact.tags.is_empty()).then_some(artifact)
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Adapter for MemoryRegistry {
    fn info(&self) -> AdapterResult<RegistryInfo> {
        Ok(RegistryInfo {
            registry_type: Some(RegistryType::new(RegistryType::MEMORY)),
            description: "In-memory registry".into(),
            supported_resource_types: vec![ResourceType::Image, ResourceType::Artifact],
            supported_filters: vec![FilterType::Name, FilterType::Tag],
            supported_triggers: vec!["manual".into()],
        })
    }

    async fn list_namespaces(&self, query: &NamespaceQuery) -> AdapterResult<Vec<Namespace>> {
        let state = self.state.read().await;
        Ok(state
            .namespaces
            .values()
            .filter(|namespace| query.matches(&namespace.name))
            .cloned()
            .collect())
    }

    async fn create_namespace(&self, namespace: &Namespace) -> AdapterResult<()> {
        if namespace.name.is_empty() {
            return Err(AdapterError::invalid(NAME, "namespace name is empty"));
        }

        let mut state = self.state.write().await;
        state
            .namespaces
            .entry(namespace.name.clone())
            .or_insert_with(|| namespace.clone());
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> AdapterResult<Namespace> {
        let state = self.state.read().await;
        state
            .namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| AdapterError::not_found(NAME, format_args!("namespace {name}")))
    }

    fn artifact_registry(&self) -> Option<&dyn ArtifactRegistry> {
        Some(self)
    }
}

#[async_trait::async_trait]
impl ArtifactRegistry for MemoryRegistry {
    async fn health_check(&self) -> AdapterResult<HealthStatus> {
        Ok(HealthStatus::Healthy)
    }

    async fn fetch_artifacts(&self, filters: &[Filter]) -> AdapterResult<Vec<Resource>> {
        let name_patterns: Vec<&str> = filters
            .iter()
            .filter(|filter| filter.filter_type == FilterType::Name)
            .filter_map(Filter::pattern)
            .collect();

        let state = self.state.read().await;
        let mut resources = Vec::new();
        for (name, repo) in &state.repositories {
            if !name_patterns.iter().all(|pattern| glob_match(pattern, name)) {
                continue;
            }

            let artifacts = Self::artifacts_of(repo, filters);
            if artifacts.is_empty() {
                continue;
            }

            resources.push(Resource {
                resource_type: ResourceType::Image,
                metadata: Some(ResourceMetadata {
                    repository: Some(Repository {
                        name: name.clone(),
                        ..Default::default()
                    }),
                    artifacts,
                }),
                registry: Some(Registry::new(RegistryType::MEMORY, self.url.clone())),
                ..Default::default()
            });
        }
        Ok(resources)
    }

    /// Creates the namespace of every repository that will be pushed to.
    async fn prepare_for_push(&self, resources: &[Resource]) -> AdapterResult<()> {
        for repository in resources.iter().filter_map(Resource::repository_name) {
            let namespace = repository.split('/').next().unwrap_or(repository);
            self.create_namespace(&Namespace::new(namespace)).await?;
        }
        Ok(())
    }

    async fn manifest_exist(
        &self,
        repository: &str,
        reference: &str,
    ) -> AdapterResult<(bool, Option<Descriptor>)> {
        let state = self.state.read().await;
        let descriptor = state.repositories.get(repository).and_then(|repo| {
            repo.resolve(reference)
                .and_then(|digest| repo.manifests.get(digest))
                .map(Manifest::descriptor)
        });
        Ok((descriptor.is_some(), descriptor))
    }

    async fn pull_manifest(
        &self,
        repository: &str,
        reference: &str,
        _accepted_media_types: &[&str],
    ) -> AdapterResult<(Manifest, String)> {
        let state = self.state.read().await;
        let repo = state.repo(repository)?;
        let digest = repo.resolve(reference).ok_or_else(|| {
            AdapterError::not_found(NAME, format_args!("manifest {repository}:{reference}"))
        })?;
        let manifest = repo.manifests.get(digest).cloned().ok_or_else(|| {
            AdapterError::not_found(NAME, format_args!("manifest {repository}@{digest}"))
        })?;
        Ok((manifest, digest.to_owned()))
    }

    #[tracing::instrument(skip(self, payload), fields(registry = %self.url))]
    async fn push_manifest(
        &self,
        repository: &str,
        reference: &str,
        media_type: &str,
        payload: Bytes,
    ) -> AdapterResult<String> {
        let manifest = Manifest::new(Some(media_type), payload);
        let digest = manifest.digest();
        if reference.starts_with("sha256:") && reference != digest {
            return Err(AdapterError::invalid(
                NAME,
                format_args!("manifest digest {digest} does not match reference {reference}"),
            ));
        }

        let references = manifest.references().map_err(|error| {
            AdapterError::builder(NAME, crate::AdapterErrorKind::InvalidRequest, error)
                .context(format!("{repository}:{reference}"))
                .build()
        })?;

        let mut state = self.state.write().await;
        let repo = state.repositories.entry(repository.to_owned()).or_default();
        for child in &references {
            let known = match child {
                Reference::Blob(descriptor) => repo.blobs.contains(&descriptor.digest),
                Reference::Manifest(descriptor) => repo.manifests.contains_key(&descriptor.digest),
            };
            if !known {
                let (Reference::Blob(descriptor) | Reference::Manifest(descriptor)) = child;
                return Err(AdapterError::invalid(
                    NAME,
                    format_args!("manifest references unknown {}", descriptor.digest),
                ));
            }
        }

        repo.manifests.insert(digest.clone(), manifest);
        if !reference.starts_with("sha256:") {
            repo.tags.insert(reference.to_owned(), digest.clone());
        }
        tracing::debug!(%digest, "stored manifest");
        Ok(digest)
    }

    async fn delete_manifest(&self, repository: &str, reference: &str) -> AdapterResult<()> {
        let mut state = self.state.write().await;
        let repo = state
            .repositories
            .get_mut(repository)
            .ok_or_else(|| AdapterError::not_found(NAME, format_args!("repository {repository}")))?;
        let digest = repo
            .resolve(reference)
            .map(str::to_owned)
            .ok_or_else(|| {
                AdapterError::not_found(NAME, format_args!("manifest {repository}:{reference}"))
            })?;

        repo.manifests.remove(&digest);
        repo.tags.retain(|_, tagged| *tagged != digest);
        Ok(())
    }

    async fn blob_exist(&self, repository: &str, digest: &str) -> AdapterResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .repositories
            .get(repository)
            .is_some_and(|repo| repo.blobs.contains(digest)))
    }

    async fn pull_blob(&self, repository: &str, digest: &str) -> AdapterResult<(u64, Bytes)> {
        let state = self.state.read().await;
        if !state.repo(repository)?.blobs.contains(digest) {
            return Err(AdapterError::not_found(
                NAME,
                format_args!("blob {repository}@{digest}"),
            ));
        }
        let data = state
            .blobs
            .get(digest)
            .cloned()
            .ok_or_else(|| AdapterError::not_found(NAME, format_args!("blob {digest}")))?;
        Ok((data.len() as u64, data))
    }

    async fn pull_blob_chunk(
        &self,
        repository: &str,
        digest: &str,
        blob_size: u64,
        start: u64,
        end: u64,
    ) -> AdapterResult<(u64, Bytes)> {
        let (size, data) = self.pull_blob(repository, digest).await?;
        if size != blob_size {
            return Err(AdapterError::invalid(
                NAME,
                format_args!("blob {digest} is {size} bytes, expected {blob_size}"),
            ));
        }
        if start > end || end >= size {
            return Err(AdapterError::invalid(
                NAME,
                format_args!("range {start}-{end} outside blob of {size} bytes"),
            ));
        }
        Ok((size, data.slice(start as usize..=end as usize)))
    }

    #[tracing::instrument(skip(self, chunk), fields(registry = %self.url))]
    async fn push_blob_chunk(
        &self,
        repository: &str,
        digest: &str,
        size: u64,
        chunk: Bytes,
        start: u64,
        end: u64,
        location: Option<&str>,
    ) -> AdapterResult<ChunkUpload> {
        if start > end || end >= size || chunk.len() as u64 != end - start + 1 {
            return Err(AdapterError::invalid(
                NAME,
                format_args!(
                    "chunk of {} bytes does not fit range {start}-{end} of {size}",
                    chunk.len()
                ),
            ));
        }

        let mut state = self.state.write().await;
        let location = match location {
            Some(location) => {
                let session = state.sessions.get(location).ok_or_else(|| {
                    AdapterError::not_found(NAME, format_args!("upload session {location}"))
                })?;
                if session.repository != repository || session.digest != digest {
                    return Err(AdapterError::invalid(
                        NAME,
                        format_args!("upload session {location} belongs to another blob"),
                    ));
                }
                location.to_owned()
            }
            None => {
                let location = format!("/v2/{repository}/blobs/uploads/{}", uuid::Uuid::new_v4());
                state.sessions.insert(
                    location.clone(),
                    Session {
                        repository: repository.to_owned(),
                        digest: digest.to_owned(),
                        data: BytesMut::with_capacity(chunk.len()),
                    },
                );
                location
            }
        };

        let Some(session) = state.sessions.get_mut(&location) else {
            return Err(AdapterError::not_found(
                NAME,
                format_args!("upload session {location}"),
            ));
        };
        let received = session.data.len() as u64;
        if received != start {
            if received == 0 {
                state.sessions.remove(&location);
            }
            return Err(AdapterError::invalid(
                NAME,
                format_args!("chunk starts at {start}, upload is at {received}"),
            ));
        }
        session.data.extend_from_slice(&chunk);
        state.stats.chunk_pushes += 1;

        if end + 1 < size {
            return Ok(ChunkUpload {
                location: Some(location),
                end_range: end,
            });
        }

        let Some(session) = state.sessions.remove(&location) else {
            return Err(AdapterError::not_found(
                NAME,
                format_args!("upload session {location}"),
            ));
        };
        let data = session.data.freeze();
        verify(digest, size, &data)?;
        state.commit_blob(repository, digest, data);
        tracing::debug!(%digest, "committed chunked upload");

        Ok(ChunkUpload {
            location: None,
            end_range: end,
        })
    }

    async fn push_blob(
        &self,
        repository: &str,
        digest: &str,
        size: u64,
        blob: Bytes,
    ) -> AdapterResult<()> {
        verify(digest, size, &blob)?;

        let mut state = self.state.write().await;
        state.commit_blob(repository, digest, blob);
        state.stats.blob_pushes += 1;
        Ok(())
    }

    async fn mount_blob(
        &self,
        src_repository: &str,
        digest: &str,
        dst_repository: &str,
    ) -> AdapterResult<()> {
        let mut state = self.state.write().await;
        if !state.repo(src_repository)?.blobs.contains(digest) {
            return Err(AdapterError::not_found(
                NAME,
                format_args!("blob {src_repository}@{digest}"),
            ));
        }

        state
            .repositories
            .entry(dst_repository.to_owned())
            .or_default()
            .blobs
            .insert(digest.to_owned());
        state.stats.mounts += 1;
        Ok(())
    }

    async fn can_be_mount(&self, digest: &str) -> AdapterResult<Option<String>> {
        let state = self.state.read().await;
        Ok(state
            .repositories
            .iter()
            .find(|(_, repo)| repo.blobs.contains(digest))
            .map(|(name, _)| name.clone()))
    }

    async fn list_tags(&self, repository: &str) -> AdapterResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state.repo(repository)?.tags.keys().cloned().collect())
    }

    async fn delete_tag(&self, repository: &str, tag: &str) -> AdapterResult<()> {
        let mut state = self.state.write().await;
        let removed = state
            .repositories
            .get_mut(repository)
            .and_then(|repo| repo.tags.remove(tag));
        match removed {
            Some(_) => Ok(()),
            None => Err(AdapterError::not_found(
                NAME,
                format_args!("tag {repository}:{tag}"),
            )),
        }
    }
}

/// Hands out one shared [MemoryRegistry] per registry URL.
#[derive(Debug, Default)]
pub struct MemoryRegistryFactory {
    instances: parking_lot::Mutex<HashMap<String, Arc<MemoryRegistry>>>,
}

impl MemoryRegistryFactory {
    /// The registry for `url`, created on first use.
    pub fn instance(&self, url: &str) -> Arc<MemoryRegistry> {
        self.instances
            .lock()
            .entry(url.to_owned())
            .or_insert_with(|| Arc::new(MemoryRegistry::new(url)))
            .clone()
    }
}

impl AdapterFactory for MemoryRegistryFactory {
    fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>, AdapterError> {
        if registry.url.is_empty() {
            return Err(AdapterError::invalid(NAME, "registry url is empty"));
        }
        Ok(self.instance(&registry.url))
    }
}
