//! Background jobs for registry replication and audit log maintenance.
//!
//! A [Job] declares its scheduling hints and is driven by an engine. This
//! crate carries the job contract, the concrete jobs, and [policy], a
//! reference driver which validates, admits and retries jobs the way a
//! conforming engine would.

pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod job;
pub mod jobs;
pub mod params;
pub mod policy;

use std::sync::Arc;

use api_client::InternalEndpoint;
use replication::memory::MemoryRegistryFactory;
use replication::{AdapterRegistry, FactoryError, RegistryType};

pub use self::context::JobContext;
pub use self::error::JobError;
pub use self::job::{Job, JobState, Parameters};
pub use self::params::{JobParams, ValidationError};

/// The adapter registry used by the service: the in-memory registry and the
/// list export adapter, which reaches the core service through `endpoint`.
pub fn adapter_registry(endpoint: InternalEndpoint) -> Result<AdapterRegistry, FactoryError> {
    let mut builder = AdapterRegistry::builder();
    builder.register(RegistryType::MEMORY, MemoryRegistryFactory::default())?;
    list_export::register(&mut builder, endpoint)?;
    Ok(builder.build())
}

/// Every job the service can run.
pub fn catalog(
    adapters: AdapterRegistry,
    audit: Arc<dyn audit::AuditLogManager>,
    chunk_size: u64,
) -> jobs::JobCatalog {
    let mut catalog = jobs::JobCatalog::new();
    catalog
        .insert(Arc::new(jobs::AuditLogsCleanup::new(audit)))
        .insert(Arc::new(
            jobs::ReplicationJob::new(adapters).with_chunk_size(chunk_size),
        ));
    catalog
}
