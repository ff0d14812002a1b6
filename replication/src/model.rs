//! Vocabulary exchanged between adapters and jobs.
//!
//! Everything here is plain data: it is deserialized from job parameters,
//! handed to adapters by reference, and never mutated by them.

use std::collections::HashMap;
use std::fmt;

use secret::Secret;
use serde::{Deserialize, Serialize};

/// Key under which a resource's extended info carries the export destination.
pub const DESTINATION_URL: &str = "destinationURL";

/// Key under which a resource's extended info carries the export group.
pub const GROUP_NAME: &str = "groupName";

/// Adapter-specific routing data attached to a resource.
pub type ExtendedInfo = HashMap<String, serde_json::Value>;

/// Identifies which adapter implementation talks to a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistryType(String);

impl RegistryType {
    /// The batch export adapter.
    pub const LIST_EXPORT: &'static str = "list-export";

    /// The in-memory registry.
    pub const MEMORY: &'static str = "memory";

    /// Create a registry type from its name.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    /// The type name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty name, which no factory may register under.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RegistryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegistryType {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for RegistryType {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl PartialEq<str> for RegistryType {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// How a credential should be presented to the remote registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    /// Username and password.
    Basic,
    /// An OAuth client id and secret.
    OAuth,
    /// A shared secret presented as-is.
    Secret,
}

/// Credential material for a registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// How the credential is presented.
    #[serde(rename = "type")]
    pub kind: CredentialKind,
    /// Username or client id.
    pub access_key: String,
    /// Password, client secret or token.
    pub access_secret: Secret,
}

/// Reachability of a registry as last reported by its adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// The registry answered its health check.
    #[default]
    Healthy,
    /// The registry could not be reached or reported a failure.
    Unhealthy,
}

/// A remote registry endpoint, as configured on the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    /// Platform identifier, zero when not persisted.
    #[serde(default)]
    pub id: i64,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Selects the adapter factory.
    #[serde(rename = "type")]
    pub registry_type: RegistryType,
    /// Base URL of the registry.
    pub url: String,
    /// Credential used to authenticate, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,
    /// Skip TLS certificate verification.
    #[serde(default)]
    pub insecure: bool,
    /// Health as last observed.
    #[serde(default)]
    pub status: HealthStatus,
}

impl Registry {
    /// A registry of `registry_type` at `url`, with no credential.
    pub fn new<T: Into<RegistryType>, U: Into<String>>(registry_type: T, url: U) -> Self {
        Self {
            id: 0,
            name: String::new(),
            registry_type: registry_type.into(),
            url: url.into(),
            credential: None,
            insecure: false,
            status: HealthStatus::Healthy,
        }
    }
}

/// Kinds of resources a registry can replicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    /// Any OCI artifact.
    #[default]
    Artifact,
    /// A container image.
    Image,
    /// A Helm chart.
    Chart,
}

/// Filters understood by [crate::ArtifactRegistry::fetch_artifacts].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    /// Glob on the repository name.
    Name,
    /// Glob on artifact tags.
    Tag,
    /// Artifact label.
    Label,
    /// Resource type.
    Resource,
}

/// A single filter criterion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    /// What to filter on.
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    /// Pattern or value to match, usually a string.
    pub value: serde_json::Value,
}

impl Filter {
    /// The filter value, when it is a string.
    pub fn pattern(&self) -> Option<&str> {
        self.value.as_str()
    }
}

/// Static description of what an adapter supports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryInfo {
    /// The registry type, when the adapter names one.
    #[serde(rename = "type")]
    pub registry_type: Option<RegistryType>,
    /// Human readable summary.
    pub description: String,
    /// Resource types the adapter can replicate.
    pub supported_resource_types: Vec<ResourceType>,
    /// Filters [crate::ArtifactRegistry::fetch_artifacts] honours.
    pub supported_filters: Vec<FilterType>,
    /// Trigger names, such as `manual` or `event_based`.
    pub supported_triggers: Vec<String>,
}

/// How an endpoint for this adapter type should be offered to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterPattern {
    /// Fixed endpoints, or `None` when users may enter any URL.
    pub endpoints: Option<Vec<String>>,
}

/// A namespace (project, organisation) on a remote registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    /// Namespace name.
    pub name: String,
    /// Adapter specific attributes, such as visibility.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Namespace {
    /// A namespace with no metadata.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            metadata: HashMap::new(),
        }
    }
}

/// Criteria for listing namespaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamespaceQuery {
    /// Substring the namespace name must contain. Empty matches every namespace.
    #[serde(default)]
    pub name: String,
}

impl NamespaceQuery {
    /// Whether `namespace` satisfies the query.
    pub fn matches(&self, namespace: &str) -> bool {
        namespace.contains(&self.name)
    }
}

/// A repository within a registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    /// Full name, including the namespace.
    pub name: String,
    /// Adapter specific attributes.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// One artifact in a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Manifest digest, `sha256:<hex>`.
    pub digest: String,
    /// Artifact type, such as `IMAGE`.
    #[serde(rename = "type", default)]
    pub artifact_type: String,
    /// Tags pointing at the digest. Empty for untagged artifacts.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Labels attached to the artifact.
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Artifact {
    /// The references this artifact is addressed by: its tags, or its digest when untagged.
    pub fn references(&self) -> Vec<&str> {
        if self.tags.is_empty() {
            vec![self.digest.as_str()]
        } else {
            self.tags.iter().map(String::as_str).collect()
        }
    }
}

/// What a resource refers to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    /// Repository holding the artifacts.
    pub repository: Option<Repository>,
    /// Artifacts in the repository covered by the resource.
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

/// The unit of replication work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resource {
    /// Kind of resource.
    #[serde(rename = "type", default)]
    pub resource_type: ResourceType,
    /// What the resource refers to.
    #[serde(default)]
    pub metadata: Option<ResourceMetadata>,
    /// The registry the resource lives in.
    #[serde(default)]
    pub registry: Option<Registry>,
    /// Routing data for adapters such as the list export.
    #[serde(default)]
    pub extended_info: Option<ExtendedInfo>,
    /// Tombstone: the artifacts were deleted at the source.
    #[serde(default)]
    pub deleted: bool,
    /// Replace existing artifacts at the destination.
    #[serde(rename = "override", default)]
    pub overridden: bool,
}

impl Resource {
    /// The repository name, when the resource carries one.
    pub fn repository_name(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.repository.as_ref())
            .map(|repository| repository.name.as_str())
    }

    /// Artifacts carried by the resource.
    pub fn artifacts(&self) -> &[Artifact] {
        self.metadata
            .as_ref()
            .map(|metadata| metadata.artifacts.as_slice())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_deserializes_from_scheduler_json() {
        let resource: Resource = serde_json::from_value(serde_json::json!({
            "type": "image",
            "metadata": {
                "repository": {"name": "library/hello"},
                "artifacts": [{"digest": "sha256:abc", "type": "IMAGE", "tags": ["v1"]}]
            },
            "registry": {"type": "memory", "url": "memory://source"},
            "extended_info": {"destinationURL": "http://sink/hook", "groupName": "team"},
            "deleted": true,
            "override": true
        }))
        .unwrap();

        assert_eq!(resource.resource_type, ResourceType::Image);
        assert_eq!(resource.repository_name(), Some("library/hello"));
        assert_eq!(resource.artifacts()[0].tags, vec!["v1"]);
        assert_eq!(
            resource.registry.as_ref().unwrap().registry_type.as_str(),
            RegistryType::MEMORY
        );
        assert!(resource.deleted);
        assert!(resource.overridden);
        assert_eq!(
            resource.extended_info.unwrap()[DESTINATION_URL],
            "http://sink/hook"
        );
    }

    #[test]
    fn untagged_artifacts_are_referenced_by_digest() {
        let artifact = Artifact {
            digest: "sha256:abc".into(),
            ..Default::default()
        };
        assert_eq!(artifact.references(), vec!["sha256:abc"]);
    }

    #[test]
    fn credential_secret_is_redacted() {
        let credential = Credential {
            kind: CredentialKind::Basic,
            access_key: "robot".into(),
            access_secret: Secret::from("hunter2"),
        };
        assert!(!format!("{credential:?}").contains("hunter2"));
    }

    #[test]
    fn empty_namespace_query_matches_everything() {
        assert!(NamespaceQuery::default().matches("library"));
        let query = NamespaceQuery {
            name: "lib".into(),
        };
        assert!(query.matches("library"));
        assert!(!query.matches("team"));
    }
}
