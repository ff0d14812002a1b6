//! Copy the artifacts named by one resource from its source registry to a
//! destination registry.

use std::slice;

use replication::transfer::{Outcome, DEFAULT_CHUNK_SIZE};
use replication::{require_artifact_registry, AdapterRegistry, Resource, Transfer};

use crate::context::JobContext;
use crate::error::JobError;
use crate::job::{Job, Parameters};
use crate::params::{JobParams, ParamReader, ValidationError};

/// Job type name.
pub const NAME: &str = "REPLICATION";

/// Parameter holding the source [Resource].
pub const SRC_RESOURCE: &str = "src_resource";

/// Parameter holding the destination [Resource].
pub const DST_RESOURCE: &str = "dst_resource";

/// Parameters of [ReplicationJob].
#[derive(Debug, Clone)]
pub struct ReplicationParams {
    /// Where artifacts are copied from.
    pub src: Resource,
    /// Where artifacts are copied to.
    pub dst: Resource,
}

/// The resource handed to the destination's `prepare_for_push`.
///
/// The source decides whether this is a tombstone, and supplies the
/// artifacts when the destination names only a repository.
fn push_target(src: &Resource, dst: &Resource) -> Resource {
    let mut target = dst.clone();
    target.deleted = src.deleted;
    if let Some(metadata) = target.metadata.as_mut() {
        if metadata.artifacts.is_empty() {
            metadata.artifacts = src.artifacts().to_vec();
        }
    }
    target
}

fn check_resource(reader: &mut ParamReader<'_>, name: &str, resource: Option<&Resource>) {
    let Some(resource) = resource else {
        return;
    };

    match &resource.registry {
        Some(registry) if !registry.registry_type.is_empty() => {}
        Some(_) => reader.invalid(name, "registry has no type"),
        None => reader.invalid(name, "no registry"),
    }
    if resource.repository_name().is_none() {
        reader.invalid(name, "no repository");
    }
}

impl JobParams for ReplicationParams {
    fn from_params(params: Option<&Parameters>) -> Result<Self, ValidationError> {
        let mut reader = ParamReader::new(params)?;
        let src: Option<Resource> = reader.json(SRC_RESOURCE);
        let dst: Option<Resource> = reader.json(DST_RESOURCE);
        check_resource(&mut reader, SRC_RESOURCE, src.as_ref());
        check_resource(&mut reader, DST_RESOURCE, dst.as_ref());
        reader.finish(|| Some(ReplicationParams { src: src?, dst: dst? }))
    }
}

/// Replicates artifacts between registries using adapters from an [AdapterRegistry].
#[derive(Debug, Clone)]
pub struct ReplicationJob {
    adapters: AdapterRegistry,
    chunk_size: u64,
}

impl ReplicationJob {
    /// A job using `adapters` and the default chunk size.
    pub fn new(adapters: AdapterRegistry) -> Self {
        Self {
            adapters,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Push blobs larger than `chunk_size` in chunks.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

#[async_trait::async_trait]
impl Job for ReplicationJob {
    fn name(&self) -> &'static str {
        NAME
    }

    fn max_fails(&self) -> u32 {
        3
    }

    fn max_concurrency(&self) -> u32 {
        0
    }

    fn should_retry(&self) -> bool {
        true
    }

    fn validate(&self, params: Option<&Parameters>) -> Result<(), ValidationError> {
        ReplicationParams::from_params(params).map(|_| ())
    }

    async fn run(&self, ctx: &JobContext, params: Option<&Parameters>) -> Result<(), JobError> {
        let ReplicationParams { src, dst } = ReplicationParams::from_params(params)?;
        let (Some(src_registry), Some(dst_registry)) = (&src.registry, &dst.registry) else {
            return Err(ValidationError::MissingParameters.into());
        };
        let (Some(src_repository), Some(dst_repository)) =
            (src.repository_name(), dst.repository_name())
        else {
            return Err(ValidationError::MissingParameters.into());
        };

        let src_adapter = self.adapters.create(src_registry)?;
        let dst_adapter = self.adapters.create(dst_registry)?;
        let src_artifacts = require_artifact_registry(src_adapter.as_ref())?;
        let dst_artifacts = require_artifact_registry(dst_adapter.as_ref())?;

        let tombstone = src.deleted;
        let target = push_target(&src, &dst);
        let cancel = ctx.system_context();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
            prepared = dst_artifacts.prepare_for_push(slice::from_ref(&target)) => prepared?,
        }

        let transfer = Transfer::new(src_artifacts, dst_artifacts)
            .chunk_size(self.chunk_size)
            .cancellation(cancel.clone());

        let (mut copied, mut skipped, mut deleted) = (0, 0, 0);
        for artifact in src.artifacts() {
            for reference in artifact.references() {
                let outcome = if tombstone {
                    match transfer.delete_artifact(dst_repository, reference).await {
                        Ok(outcome) => outcome,
                        Err(error) if error.is_not_implemented() => {
                            tracing::warn!(
                                parent: ctx.logger(),
                                %reference,
                                "destination cannot delete, tombstone delivered by prepare"
                            );
                            Outcome::Skipped
                        }
                        Err(error) => return Err(error.into()),
                    }
                } else {
                    transfer
                        .copy_artifact(src_repository, dst_repository, reference, dst.overridden)
                        .await?
                };
                match outcome {
                    Outcome::Copied => copied += 1,
                    Outcome::Skipped => skipped += 1,
                    Outcome::Deleted => deleted += 1,
                }
            }
        }

        tracing::info!(
            parent: ctx.logger(),
            src = %src_repository,
            dst = %dst_repository,
            copied,
            skipped,
            deleted,
            "replication finished"
        );
        Ok(())
    }
}
