use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use jobservice::audit::{AuditLogManager, MemoryAuditLog};
use jobservice::config::Config;
use jobservice::jobs::{gdpr, replication as replication_job, AuditLogsCleanup, ReplicationJob};
use jobservice::policy::{execute, Admission};
use jobservice::{Job, JobContext, JobError, JobState, Parameters, ValidationError};
use replication::manifest::{digest_of, OCI_MANIFEST};
use replication::memory::MemoryRegistryFactory;
use replication::{AdapterErrorKind, AdapterFactory, AdapterRegistry, ArtifactRegistry, RegistryType};
use serde_json::json;

fn params(value: serde_json::Value) -> Parameters {
    serde_json::from_value(value).unwrap()
}

#[derive(Debug)]
struct Flaky {
    calls: AtomicU32,
    succeed_on: u32,
    max_fails: u32,
    should_retry: bool,
    error: fn() -> JobError,
}

impl Flaky {
    fn new(succeed_on: u32, max_fails: u32, should_retry: bool) -> Self {
        Self {
            calls: AtomicU32::new(0),
            succeed_on,
            max_fails,
            should_retry,
            error: || JobError::Other("flaky".into()),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Job for Flaky {
    fn name(&self) -> &'static str {
        "FLAKY"
    }

    fn max_fails(&self) -> u32 {
        self.max_fails
    }

    fn max_concurrency(&self) -> u32 {
        1
    }

    fn should_retry(&self) -> bool {
        self.should_retry
    }

    fn validate(&self, params: Option<&Parameters>) -> Result<(), ValidationError> {
        match params {
            Some(params) if params.contains_key("bad") => Err(ValidationError::MissingParameters),
            _ => Ok(()),
        }
    }

    async fn run(&self, _ctx: &JobContext, _params: Option<&Parameters>) -> Result<(), JobError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call >= self.succeed_on {
            Ok(())
        } else {
            Err((self.error)())
        }
    }
}

#[tokio::test]
async fn retries_until_success() {
    let job = Flaky::new(3, 3, true);
    let execution = execute(&job, &JobContext::new("FLAKY"), None).await;
    assert_eq!(execution.state, JobState::Succeeded);
    assert_eq!(execution.attempts, 3);
    assert_eq!(job.calls(), 3);
}

#[tokio::test]
async fn retries_stop_after_max_fails() {
    let job = Flaky::new(u32::MAX, 2, true);
    let execution = execute(&job, &JobContext::new("FLAKY"), None).await;
    assert_eq!(execution.state, JobState::Failed);
    assert_eq!(execution.attempts, 3);
    assert_eq!(job.calls(), 3);
}

#[tokio::test]
async fn jobs_without_retry_run_once() {
    let job = Flaky::new(u32::MAX, 3, false);
    let execution = execute(&job, &JobContext::new("FLAKY"), None).await;
    assert_eq!(execution.state, JobState::Failed);
    assert_eq!(job.calls(), 1);
}

#[tokio::test]
async fn non_retryable_errors_run_once() {
    let mut job = Flaky::new(u32::MAX, 3, true);
    job.error = || JobError::Cancelled;
    let execution = execute(&job, &JobContext::new("FLAKY"), None).await;
    assert_eq!(execution.attempts, 1);
    assert!(matches!(execution.error, Some(JobError::Cancelled)));
}

#[tokio::test]
async fn validation_failures_never_run() {
    let job = Flaky::new(1, 3, true);
    let execution = execute(&job, &JobContext::new("FLAKY"), Some(&params(json!({"bad": 1})))).await;
    assert_eq!(execution.state, JobState::Failed);
    assert_eq!(execution.attempts, 0);
    assert!(matches!(execution.error, Some(JobError::Validation(_))));
    assert_eq!(job.calls(), 0);
}

#[tokio::test]
async fn admission_limits_concurrency() {
    let admission = Admission::new();
    let job = Flaky::new(1, 0, false);
    let ctx = JobContext::new("FLAKY");

    let held = admission.acquire(&job, &ctx).await.unwrap();
    let waiting = tokio::time::timeout(Duration::from_millis(50), admission.acquire(&job, &ctx)).await;
    assert!(waiting.is_err(), "second instance admitted while first running");

    drop(held);
    admission.acquire(&job, &ctx).await.unwrap();

    let _held = admission.acquire(&job, &ctx).await.unwrap();
    let cancelled = JobContext::new("FLAKY");
    cancelled.system_context().cancel();
    assert!(matches!(
        admission.acquire(&job, &cancelled).await,
        Err(JobError::Cancelled)
    ));
}

#[tokio::test]
async fn gdpr_job_validates_username() {
    let job = AuditLogsCleanup::new(Arc::new(MemoryAuditLog::default()));
    assert_eq!(job.name(), gdpr::NAME);
    assert_eq!(
        (job.max_fails(), job.max_concurrency(), job.should_retry()),
        (3, 1, true)
    );

    assert_eq!(job.validate(None), Err(ValidationError::MissingParameters));
    let err = job
        .validate(Some(&params(json!({(gdpr::USERNAME): 7}))))
        .unwrap_err();
    assert_eq!(err.fields()[0].name, gdpr::USERNAME);
    assert!(job
        .validate(Some(&params(json!({(gdpr::USERNAME): ""}))))
        .is_err());
    assert!(job
        .validate(Some(&params(json!({(gdpr::USERNAME): "alice"}))))
        .is_ok());
}

#[tokio::test]
async fn gdpr_job_anonymises_entries() {
    let log = Arc::new(MemoryAuditLog::new("salt"));
    log.record("alice", "create", "library/hello", "repository").await;
    log.record("bob", "create", "library/other", "repository").await;

    let job = AuditLogsCleanup::new(log.clone() as Arc<dyn AuditLogManager>);
    let execution = execute(
        &job,
        &JobContext::new(gdpr::NAME),
        Some(&params(json!({(gdpr::USERNAME): "alice"}))),
    )
    .await;
    assert!(execution.succeeded());

    let entries = log.entries().await;
    assert_eq!(entries[0].operator, log.anonymize("alice"));
    assert_eq!(entries[1].operator, "bob");
}

#[tokio::test]
async fn cancelled_gdpr_job_is_not_retried() {
    let log = Arc::new(MemoryAuditLog::new("salt"));
    log.record("alice", "create", "library/hello", "repository").await;
    let job = AuditLogsCleanup::new(log.clone());

    let ctx = JobContext::new(gdpr::NAME);
    ctx.system_context().cancel();
    let execution = execute(&job, &ctx, Some(&params(json!({(gdpr::USERNAME): "alice"})))).await;
    assert_eq!(execution.attempts, 1);
    assert!(matches!(execution.error, Some(JobError::Cancelled)));
    assert_eq!(log.entries().await[0].operator, "alice");
}

async fn seed(factory: &MemoryRegistryFactory) -> String {
    let src = factory.instance("memory://src");
    let config = Bytes::from_static(b"{}");
    let config_digest = digest_of(&config);
    src.push_blob("library/hello", &config_digest, 2, config)
        .await
        .unwrap();
    let layer = Bytes::from(vec![1u8; 64]);
    let layer_digest = digest_of(&layer);
    src.push_blob("library/hello", &layer_digest, 64, layer)
        .await
        .unwrap();

    let manifest = json!({
        "schemaVersion": 2,
        "mediaType": OCI_MANIFEST,
        "config": {"digest": config_digest, "size": 2},
        "layers": [{"digest": layer_digest, "size": 64}]
    })
    .to_string();
    src.push_manifest("library/hello", "v1", OCI_MANIFEST, manifest.into())
        .await
        .unwrap()
}

fn replication_params(deleted: bool, digest: &str) -> Parameters {
    params(json!({
        (replication_job::SRC_RESOURCE): {
            "registry": {"type": "memory", "url": "memory://src"},
            "metadata": {
                "repository": {"name": "library/hello"},
                "artifacts": [{"digest": digest, "tags": ["v1"]}]
            },
            "deleted": deleted,
        },
        (replication_job::DST_RESOURCE): json!({
            "registry": {"type": "memory", "url": "memory://dst"},
            "metadata": {"repository": {"name": "mirror/hello"}},
        })
        .to_string(),
    }))
}

#[tokio::test]
async fn replication_job_copies_then_deletes() {
    let factory = Arc::new(MemoryRegistryFactory::default());
    let digest = seed(&factory).await;

    let mut builder = AdapterRegistry::builder();
    builder
        .register_factory(RegistryType::MEMORY, Some(factory.clone() as Arc<dyn AdapterFactory>))
        .unwrap();
    let job = ReplicationJob::new(builder.build()).with_chunk_size(16);

    let execution = execute(
        &job,
        &JobContext::new(replication_job::NAME),
        Some(&replication_params(false, &digest)),
    )
    .await;
    assert!(execution.succeeded(), "{:?}", execution.error);

    let dst = factory.instance("memory://dst");
    let (exists, descriptor) = dst.manifest_exist("mirror/hello", "v1").await.unwrap();
    assert!(exists);
    assert_eq!(descriptor.unwrap().digest, digest);
    assert_eq!(dst.stats().await.chunk_pushes, 4);

    let execution = execute(
        &job,
        &JobContext::new(replication_job::NAME),
        Some(&replication_params(true, &digest)),
    )
    .await;
    assert!(execution.succeeded(), "{:?}", execution.error);
    assert!(!dst.manifest_exist("mirror/hello", "v1").await.unwrap().0);
}

#[tokio::test]
async fn replication_job_needs_registered_adapters() {
    let job = ReplicationJob::new(AdapterRegistry::default());
    let ctx = JobContext::new(replication_job::NAME);
    let err = job
        .run(&ctx, Some(&replication_params(false, "sha256:00")))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Factory(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn missing_source_manifest_fails_the_job() {
    let factory = Arc::new(MemoryRegistryFactory::default());
    let mut builder = AdapterRegistry::builder();
    builder
        .register_factory(RegistryType::MEMORY, Some(factory.clone() as Arc<dyn AdapterFactory>))
        .unwrap();
    let job = ReplicationJob::new(builder.build());

    let err = job
        .run(
            &JobContext::new(replication_job::NAME),
            Some(&replication_params(false, "sha256:00")),
        )
        .await
        .unwrap_err();
    let JobError::Adapter(error) = &err else {
        panic!("unexpected error {err:?}");
    };
    assert_eq!(error.kind(), AdapterErrorKind::NotFound);
}

#[tokio::test]
async fn deletions_are_exported_once() {
    let mock = api_client::mock::MockService::new();
    mock.add("/hooks/artifacts", http::StatusCode::OK, Vec::new());
    let endpoint =
        api_client::InternalEndpoint::new("http://core.internal:8080", "jobservice secret").unwrap();

    let mut builder = AdapterRegistry::builder();
    builder
        .register(RegistryType::MEMORY, MemoryRegistryFactory::default())
        .unwrap()
        .register(
            RegistryType::LIST_EXPORT,
            list_export::ExportAdapterFactory::with_transport(endpoint, mock.clone()),
        )
        .unwrap();
    let job = ReplicationJob::new(builder.build());

    let params = params(json!({
        (replication_job::SRC_RESOURCE): {
            "registry": {"type": "memory", "url": "memory://src"},
            "metadata": {
                "repository": {"name": "library/hello"},
                "artifacts": [{"digest": "sha256:abc", "tags": ["v1"]}]
            },
            "deleted": true,
        },
        (replication_job::DST_RESOURCE): {
            "registry": {"type": "list-export", "url": "http://export.example"},
            "metadata": {"repository": {"name": "library/hello"}},
            "extended_info": {
                "destinationURL": "http://sink.example/hooks/artifacts",
                "groupName": "platform",
            },
        },
    }));

    let execution = execute(&job, &JobContext::new(replication_job::NAME), Some(&params)).await;
    assert!(execution.succeeded(), "{:?}", execution.error);
    assert_eq!(execution.attempts, 1);

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    let body: list_export::ExportResult = requests[0].json().unwrap();
    assert_eq!(body.artifacts.len(), 1);
    assert_eq!(body.artifacts[0].digest, "sha256:abc");
    assert!(body.artifacts[0].deleted);
}

#[test]
fn config_is_read_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobservice.toml");
    std::fs::write(
        &path,
        "[core]\nurl = \"http://core.internal:8080\"\nsecret = \"s\"\n\n[replication]\nchunk-size = 4096\n",
    )
    .unwrap();

    let path = camino::Utf8PathBuf::from_path_buf(path).unwrap();
    let config = Config::from_path(&path).unwrap();
    assert_eq!(config.replication.chunk_size, 4096);

    let adapters = jobservice::adapter_registry(config.endpoint().unwrap()).unwrap();
    let types = adapters.registered_types();
    assert!(types.contains(&RegistryType::new(RegistryType::MEMORY)));
    assert!(types.contains(&RegistryType::new(RegistryType::LIST_EXPORT)));
}
