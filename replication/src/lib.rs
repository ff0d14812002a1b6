//! Registry replication building blocks.
//!
//! Adapters expose a remote registry through the [Adapter] trait and,
//! when they can move content, the [ArtifactRegistry] capability. They are
//! constructed through an [AdapterRegistry], which maps a [RegistryType] to
//! the [AdapterFactory] that knows how to talk to it.

mod adapter;
mod error;
pub mod factory;
pub mod manifest;
pub mod memory;
pub mod model;
pub mod transfer;

pub use adapter::{require_artifact_registry, Adapter, AdapterResult, ArtifactRegistry, ChunkUpload};
pub use error::{AdapterError, AdapterErrorBuilder, AdapterErrorKind};
pub use factory::{AdapterFactory, AdapterRegistry, AdapterRegistryBuilder, FactoryError};
pub use manifest::{Descriptor, Manifest};
pub use model::{
    AdapterPattern, Artifact, ExtendedInfo, Filter, FilterType, HealthStatus, Namespace,
    NamespaceQuery, Registry, RegistryInfo, RegistryType, Resource,
};
pub use transfer::Transfer;
