//! Copying artifacts between two registries.

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::adapter::{AdapterResult, ArtifactRegistry};
use crate::error::{AdapterError, AdapterErrorKind};
use crate::manifest::{
    Descriptor, Manifest, Reference, DOCKER_MANIFEST_LIST, DOCKER_MANIFEST_V2, OCI_INDEX,
    OCI_MANIFEST,
};

const NAME: &str = "transfer";

/// Blobs larger than this are pushed in chunks.
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

const ACCEPTED_MEDIA_TYPES: &[&str] = &[
    OCI_INDEX,
    OCI_MANIFEST,
    DOCKER_MANIFEST_LIST,
    DOCKER_MANIFEST_V2,
];

/// What happened to a single artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The destination already held the artifact.
    Skipped,
    /// The artifact was copied.
    Copied,
    /// The artifact was removed from the destination.
    Deleted,
}

/// Copies manifests and blobs from a source registry to a destination registry.
#[derive(Debug, Clone)]
pub struct Transfer<'a> {
    src: &'a dyn ArtifactRegistry,
    dst: &'a dyn ArtifactRegistry,
    chunk_size: u64,
    cancel: CancellationToken,
}

impl<'a> Transfer<'a> {
    /// Copy from `src` to `dst` with the default chunk size.
    pub fn new(src: &'a dyn ArtifactRegistry, dst: &'a dyn ArtifactRegistry) -> Self {
        Self {
            src,
            dst,
            chunk_size: DEFAULT_CHUNK_SIZE,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the size above which blobs are pushed in chunks. Zero restores the default.
    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        self
    }

    /// Abort in-flight work when `cancel` fires.
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn guard<T, F>(&self, operation: F) -> AdapterResult<T>
    where
        F: Future<Output = AdapterResult<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(AdapterError::cancelled(NAME));
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AdapterError::cancelled(NAME)),
            result = operation => result,
        }
    }

    /// Copy `reference` from `src_repository` to `dst_repository`.
    ///
    /// When `overridden` is false an existing manifest under `reference` at the
    /// destination is left alone, even if it differs.
    #[tracing::instrument(skip(self))]
    pub async fn copy_artifact(
        &self,
        src_repository: &str,
        dst_repository: &str,
        reference: &str,
        overridden: bool,
    ) -> AdapterResult<Outcome> {
        let (manifest, digest) = self
            .guard(
                self.src
                    .pull_manifest(src_repository, reference, ACCEPTED_MEDIA_TYPES),
            )
            .await?;

        let (exists, existing) = self
            .guard(self.dst.manifest_exist(dst_repository, reference))
            .await?;
        if exists {
            let same = existing.is_some_and(|descriptor| descriptor.digest == digest);
            if same || !overridden {
                tracing::info!(%digest, same, "artifact already present at destination");
                return Ok(Outcome::Skipped);
            }
        }

        self.copy_manifest(src_repository, dst_repository, reference, manifest)
            .await?;
        tracing::info!(%digest, "copied artifact");
        Ok(Outcome::Copied)
    }

    /// Remove `reference` from `dst_repository`. Missing artifacts are not an error.
    #[tracing::instrument(skip(self))]
    pub async fn delete_artifact(
        &self,
        dst_repository: &str,
        reference: &str,
    ) -> AdapterResult<Outcome> {
        match self
            .guard(self.dst.delete_manifest(dst_repository, reference))
            .await
        {
            Ok(()) => Ok(Outcome::Deleted),
            Err(error) if error.is_not_found() => {
                tracing::debug!("artifact already absent at destination");
                Ok(Outcome::Skipped)
            }
            Err(error) => Err(error),
        }
    }

    fn copy_manifest<'b>(
        &'b self,
        src_repository: &'b str,
        dst_repository: &'b str,
        reference: &'b str,
        manifest: Manifest,
    ) -> Pin<Box<dyn Future<Output = AdapterResult<()>> + Send + 'b>> {
        Box::pin(async move {
            let references = manifest.references().map_err(|error| {
                AdapterError::builder(NAME, AdapterErrorKind::Serialization, error)
                    .context(format!("{src_repository}:{reference}"))
                    .build()
            })?;

            for child in references {
                match child {
                    Reference::Manifest(descriptor) => {
                        let (exists, _) = self
                            .guard(self.dst.manifest_exist(dst_repository, &descriptor.digest))
                            .await?;
                        if exists {
                            continue;
                        }
                        let (child, _) = self
                            .guard(self.src.pull_manifest(
                                src_repository,
                                &descriptor.digest,
                                ACCEPTED_MEDIA_TYPES,
                            ))
                            .await?;
                        self.copy_manifest(src_repository, dst_repository, &descriptor.digest, child)
                            .await?;
                    }
                    Reference::Blob(descriptor) => {
                        self.copy_blob(src_repository, dst_repository, &descriptor)
                            .await?;
                    }
                }
            }

            self.guard(self.dst.push_manifest(
                dst_repository,
                reference,
                &manifest.media_type,
                manifest.payload.clone(),
            ))
            .await?;
            Ok(())
        })
    }

    #[tracing::instrument(skip(self, descriptor), fields(digest = %descriptor.digest))]
    async fn copy_blob(
        &self,
        src_repository: &str,
        dst_repository: &str,
        descriptor: &Descriptor,
    ) -> AdapterResult<()> {
        let digest = descriptor.digest.as_str();

        if self
            .guard(self.dst.blob_exist(dst_repository, digest))
            .await?
        {
            tracing::debug!("blob already present");
            return Ok(());
        }

        if let Some(mount_from) = self.guard(self.dst.can_be_mount(digest)).await? {
            tracing::debug!(%mount_from, "mounting blob");
            return self
                .guard(self.dst.mount_blob(&mount_from, digest, dst_repository))
                .await;
        }

        let size = descriptor.size;
        if size <= self.chunk_size {
            let (size, blob) = self
                .guard(self.src.pull_blob(src_repository, digest))
                .await?;
            return self
                .guard(self.dst.push_blob(dst_repository, digest, size, blob))
                .await;
        }

        self.copy_blob_chunked(src_repository, dst_repository, digest, size)
            .await
    }

    async fn copy_blob_chunked(
        &self,
        src_repository: &str,
        dst_repository: &str,
        digest: &str,
        size: u64,
    ) -> AdapterResult<()> {
        let mut location: Option<String> = None;
        let mut start = 0;

        while start < size {
            let end = (start + self.chunk_size).min(size) - 1;
            let (_, chunk) = self
                .guard(
                    self.src
                        .pull_blob_chunk(src_repository, digest, size, start, end),
                )
                .await?;

            let upload = self
                .guard(self.dst.push_blob_chunk(
                    dst_repository,
                    digest,
                    size,
                    chunk,
                    start,
                    end,
                    location.as_deref(),
                ))
                .await?;
            tracing::trace!(start, end = upload.end_range, "pushed chunk");

            location = upload.location;
            start = upload.end_range + 1;
            if location.is_none() && start < size {
                return Err(AdapterError::invalid(
                    NAME,
                    format_args!("upload of {digest} closed at {start} of {size} bytes"),
                ));
            }
        }
        Ok(())
    }
}
