use api_client::mock::MockService;
use api_client::InternalEndpoint;
use http::StatusCode;
use list_export::{ExportAdapterFactory, ExportResult};
use replication::model::{Artifact, Repository, ResourceMetadata, DESTINATION_URL, GROUP_NAME};
use replication::{
    require_artifact_registry, Adapter, AdapterErrorKind, AdapterRegistry, NamespaceQuery,
    Registry, RegistryType, Resource,
};
use tower::ServiceExt as _;

fn endpoint() -> InternalEndpoint {
    InternalEndpoint::new("http://core.internal:8080", "jobservice secret").unwrap()
}

fn adapter(mock: &MockService) -> std::sync::Arc<dyn Adapter> {
    let mut builder = AdapterRegistry::builder();
    builder
        .register(
            RegistryType::LIST_EXPORT,
            ExportAdapterFactory::with_transport(endpoint(), mock.clone()),
        )
        .unwrap();
    builder
        .build()
        .create(&Registry::new(RegistryType::LIST_EXPORT, "http://export.example"))
        .unwrap()
}

fn resource(repository: &str, digests: &[&str], deleted: bool, routed: bool) -> Resource {
    let extended_info = routed.then(|| {
        serde_json::from_value(serde_json::json!({
            DESTINATION_URL: "http://sink.example/hooks/artifacts",
            GROUP_NAME: "platform",
        }))
        .unwrap()
    });

    Resource {
        metadata: Some(ResourceMetadata {
            repository: Some(Repository {
                name: repository.into(),
                ..Default::default()
            }),
            artifacts: digests
                .iter()
                .map(|digest| Artifact {
                    digest: (*digest).into(),
                    artifact_type: "IMAGE".into(),
                    tags: vec!["latest".into()],
                    labels: vec!["prod".into()],
                })
                .collect(),
        }),
        registry: Some(Registry::new(RegistryType::MEMORY, "https://source.example")),
        extended_info,
        deleted,
        ..Default::default()
    }
}

#[tokio::test]
async fn batch_is_posted_once() {
    let mock = MockService::new();
    mock.add("/hooks/artifacts", StatusCode::OK, Vec::new());
    let adapter = adapter(&mock);
    let registry = require_artifact_registry(adapter.as_ref()).unwrap();

    let resources = vec![
        resource("library/a", &["sha256:1", "sha256:2"], false, true),
        resource("library/b", &["sha256:3"], true, false),
    ];
    registry.prepare_for_push(&resources).await.unwrap();

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, http::Method::POST);
    assert_eq!(request.uri.host(), Some("sink.example"));
    assert_eq!(
        request.headers.get(http::header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert!(request.headers.get(http::header::AUTHORIZATION).is_none());

    let body: ExportResult = request.json().unwrap();
    assert_eq!(body.group, "platform");
    assert_eq!(body.registry, "https://source.example");
    assert_eq!(body.artifacts.len(), 3);
    let deleted: Vec<_> = body
        .artifacts
        .iter()
        .map(|artifact| (artifact.repository.as_str(), artifact.deleted))
        .collect();
    assert_eq!(
        deleted,
        vec![
            ("library/a", false),
            ("library/a", false),
            ("library/b", true)
        ]
    );
}

#[tokio::test]
async fn missing_routing_fails_before_any_request() {
    let mock = MockService::new();
    let adapter = adapter(&mock);
    let registry = adapter.artifact_registry().unwrap();

    let err = registry
        .prepare_for_push(&[resource("library/a", &["sha256:1"], false, false)])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), AdapterErrorKind::InvalidRequest);
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn connection_failures_propagate() {
    let mock = MockService::new();
    mock.fail_connections();
    let adapter = adapter(&mock);

    let err = adapter
        .artifact_registry()
        .unwrap()
        .prepare_for_push(&[resource("library/a", &["sha256:1"], false, true)])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), AdapterErrorKind::Transport);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn error_status_is_reported() {
    let mock = MockService::new();
    mock.add(
        "/hooks/artifacts",
        StatusCode::SERVICE_UNAVAILABLE,
        b"try later".to_vec(),
    );
    let adapter = adapter(&mock);

    let err = adapter
        .artifact_registry()
        .unwrap()
        .prepare_for_push(&[resource("library/a", &["sha256:1"], false, true)])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), AdapterErrorKind::Transport);
    let source = err
        .downcast_source::<list_export::ExportError>()
        .expect("export error source");
    assert!(matches!(
        source,
        list_export::ExportError::Rejected { status, .. } if *status == StatusCode::SERVICE_UNAVAILABLE
    ));
}

#[tokio::test]
async fn stand_ins_and_unimplemented_operations() {
    let mock = MockService::new();
    let adapter = adapter(&mock);
    let registry = adapter.artifact_registry().unwrap();

    assert_eq!(
        registry.health_check().await.unwrap(),
        replication::HealthStatus::Healthy
    );
    assert!(registry.manifest_exist("r", "v1").await.unwrap().0);
    assert!(registry.blob_exist("r", "sha256:1").await.unwrap());
    assert_eq!(registry.can_be_mount("sha256:1").await.unwrap(), None);
    assert!(registry.fetch_artifacts(&[]).await.unwrap().is_empty());

    let err = registry.pull_manifest("r", "v1", &[]).await.unwrap_err();
    assert!(err.is_not_implemented());
    let err = registry.delete_tag("r", "v1").await.unwrap_err();
    assert!(err.is_not_implemented());
    let err = adapter
        .list_namespaces(&NamespaceQuery::default())
        .await
        .unwrap_err();
    assert!(err.is_not_implemented());

    assert_eq!(
        adapter.info().unwrap().registry_type,
        Some(RegistryType::new(RegistryType::LIST_EXPORT))
    );
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn transport_routes_to_internal_endpoint() {
    let mock = MockService::new();
    mock.add("/api/v2.0/ping", StatusCode::OK, b"Pong".to_vec());
    let adapter = list_export::ExportAdapter::new(
        &Registry::new(RegistryType::LIST_EXPORT, "http://export.example"),
        &endpoint(),
        hyperdriver::service::SharedService::new(mock.clone()),
    );

    let request = http::Request::get("https://elsewhere.example/api/v2.0/ping")
        .body(hyperdriver::Body::empty())
        .unwrap();
    let response = adapter.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let recorded = &mock.requests()[0];
    assert_eq!(recorded.uri.scheme_str(), Some("http"));
    assert_eq!(
        recorded.uri.authority().unwrap().as_str(),
        "core.internal:8080"
    );
    assert_eq!(recorded.headers.get(http::header::HOST).unwrap(), "core.internal:8080");
    assert_eq!(
        recorded.headers.get(http::header::AUTHORIZATION).unwrap(),
        "Harbor-Secret jobservice secret"
    );
}
