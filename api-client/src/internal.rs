//! Transport for calls into the core service.
//!
//! Adapters reuse generic HTTP clients but must reach the core service at its
//! internal address and authenticate as the job service. The
//! [InternalTransportLayer] rewrites each outgoing request's scheme and
//! authority to the configured [InternalEndpoint] and injects the shared
//! secret before delegating to the wrapped transport.

use std::sync::Arc;

use http::header::{InvalidHeaderValue, HOST};
use http::uri::{Authority, PathAndQuery, Scheme};
use http::{HeaderValue, Uri};
use secret::Secret;
use serde::Deserialize;
use thiserror::Error;
use tower::layer::Layer;

use crate::authentication::{Authentication, SecretAuth};
use crate::uri::{IntoUri, ParseUriError};
use crate::ApiClient;

/// Errors raised while configuring the internal endpoint.
#[derive(Debug, Error)]
pub enum InternalEndpointError {
    /// The endpoint URL could not be parsed.
    #[error("internal endpoint url: {0}")]
    Uri(#[from] ParseUriError),

    /// The endpoint URL must be absolute.
    #[error("internal endpoint url {0} must include a scheme and host")]
    NotAbsolute(Uri),

    /// The secret cannot be sent as a header.
    #[error("service secret is not a valid header value")]
    InvalidSecret(#[from] InvalidHeaderValue),

    /// No secret was configured.
    #[error("service secret is empty")]
    EmptySecret,
}

#[derive(Deserialize)]
struct RawEndpoint {
    #[serde(with = "crate::uri::serde")]
    url: Uri,
    secret: Secret,
}

/// Address and credential of the core service's internal API.
///
/// This is read-only configuration: it is built once at start-up and shared
/// with every adapter factory that needs to call back into the core.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawEndpoint")]
pub struct InternalEndpoint {
    url: Uri,
    scheme: Scheme,
    authority: Authority,
    secret: Secret,
}

impl TryFrom<RawEndpoint> for InternalEndpoint {
    type Error = InternalEndpointError;

    fn try_from(raw: RawEndpoint) -> Result<Self, Self::Error> {
        InternalEndpoint::new(raw.url, raw.secret)
    }
}

impl InternalEndpoint {
    /// Create a new endpoint, validating the URL and the secret.
    pub fn new<U, S>(url: U, secret: S) -> Result<Self, InternalEndpointError>
    where
        U: IntoUri,
        S: Into<Secret>,
    {
        let url = url.into_uri()?;
        let secret = secret.into();

        let (Some(scheme), Some(authority)) = (url.scheme().cloned(), url.authority().cloned())
        else {
            return Err(InternalEndpointError::NotAbsolute(url));
        };

        if secret.is_empty() {
            return Err(InternalEndpointError::EmptySecret);
        }
        secret.service_header()?;

        Ok(Self {
            url,
            scheme,
            authority,
            secret,
        })
    }

    /// The core service URL.
    pub fn url(&self) -> &Uri {
        &self.url
    }

    /// The shared service secret.
    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    /// A layer which routes requests to this endpoint.
    pub fn layer(&self) -> InternalTransportLayer {
        InternalTransportLayer::new(self)
    }

    /// An API client whose requests all go to this endpoint through `inner`.
    ///
    /// The transport authenticates each request, so the client itself
    /// carries no authentication.
    pub fn client<S>(&self, inner: S) -> ApiClient<()>
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
        ApiClient::new_with_inner_service(self.url.clone(), (), self.layer().layer(inner))
    }
}

/// Layer that rewrites requests to the internal endpoint and authenticates them.
#[derive(Debug, Clone)]
pub struct InternalTransportLayer {
    scheme: Scheme,
    authority: Authority,
    host: HeaderValue,
    auth: Arc<SecretAuth>,
}

impl InternalTransportLayer {
    /// Create a layer for the given endpoint.
    pub fn new(endpoint: &InternalEndpoint) -> Self {
        let host = HeaderValue::from_str(endpoint.authority.as_str())
            .expect("uri authority is a valid header value");

        Self {
            scheme: endpoint.scheme.clone(),
            authority: endpoint.authority.clone(),
            host,
            auth: Arc::new(SecretAuth::new(endpoint.secret.clone())),
        }
    }
}

impl<S> Layer<S> for InternalTransportLayer {
    type Service = InternalTransportService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InternalTransportService {
            inner,
            layer: self.clone(),
        }
    }
}

/// Service produced by [InternalTransportLayer].
#[derive(Debug, Clone)]
pub struct InternalTransportService<S> {
    inner: S,
    layer: InternalTransportLayer,
}

impl<S> InternalTransportService<S> {
    fn rewrite<B>(&self, mut req: http::Request<B>) -> http::Request<B> {
        let original = std::mem::take(req.uri_mut());
        let mut parts = original.into_parts();
        parts.scheme = Some(self.layer.scheme.clone());
        parts.authority = Some(self.layer.authority.clone());
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some(PathAndQuery::from_static("/"));
        }

        *req.uri_mut() =
            Uri::from_parts(parts).expect("scheme, authority and path are always present");
        req.headers_mut().insert(HOST, self.layer.host.clone());

        tracing::trace!(uri = %req.uri(), "routing request to internal endpoint");
        self.layer.auth.authenticate(req)
    }
}

impl<S, BIn, BOut> tower::Service<http::Request<BIn>> for InternalTransportService<S>
where
    S: tower::Service<http::Request<BIn>, Response = http::Response<BOut>>,
{
    type Response = http::Response<BOut>;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<BIn>) -> Self::Future {
        let req = self.rewrite(req);
        self.inner.call(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockService;
    use tower::ServiceExt as _;

    fn endpoint() -> InternalEndpoint {
        InternalEndpoint::new("http://core:8080", "jobservice-secret").unwrap()
    }

    #[tokio::test]
    async fn rewrites_host_and_injects_secret() {
        let mock = MockService::new();
        mock.add("/api/v2.0/ping", http::StatusCode::OK, b"Pong".to_vec());

        let service = endpoint().layer().layer(mock.clone());
        let req = http::Request::builder()
            .uri("https://registry.example.com/api/v2.0/ping")
            .body(hyperdriver::Body::empty())
            .unwrap();

        let response = service.oneshot(req).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);

        let recorded = mock.requests();
        assert_eq!(recorded.len(), 1);
        let req = &recorded[0];
        assert_eq!(req.uri.to_string(), "http://core:8080/api/v2.0/ping");
        assert_eq!(req.headers.get(HOST).unwrap(), "core:8080");
        assert_eq!(
            req.headers.get(http::header::AUTHORIZATION).unwrap(),
            "Harbor-Secret jobservice-secret"
        );
    }

    #[tokio::test]
    async fn client_sends_one_authorization_header() {
        let mock = MockService::new();
        mock.add("/api/v2.0/ping", http::StatusCode::OK, b"Pong".to_vec());

        let client = endpoint().client(mock.clone());
        let response = client.get("api/v2.0/ping").send().await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);

        let recorded = mock.requests();
        let values: Vec<_> = recorded[0]
            .headers
            .get_all(http::header::AUTHORIZATION)
            .iter()
            .collect();
        assert_eq!(values, vec!["Harbor-Secret jobservice-secret"]);
    }

    #[tokio::test]
    async fn relative_requests_get_absolute_uri() {
        let mock = MockService::new();
        mock.add("/", http::StatusCode::NO_CONTENT, Vec::new());

        let service = endpoint().layer().layer(mock.clone());
        let req = http::Request::builder()
            .uri("/")
            .body(hyperdriver::Body::empty())
            .unwrap();
        service.oneshot(req).await.unwrap();

        assert_eq!(mock.requests()[0].uri.to_string(), "http://core:8080/");
    }

    #[test]
    fn endpoint_requires_absolute_url() {
        let err = InternalEndpoint::new("/relative".parse::<Uri>().unwrap(), "secret").unwrap_err();
        assert!(matches!(err, InternalEndpointError::NotAbsolute(_)));
    }

    #[test]
    fn endpoint_requires_secret() {
        let err = InternalEndpoint::new("http://core:8080", "").unwrap_err();
        assert!(matches!(err, InternalEndpointError::EmptySecret));
    }

    #[test]
    fn endpoint_deserializes_and_validates() {
        let endpoint: InternalEndpoint =
            serde_json::from_str(r#"{"url": "http://core:8080", "secret": "abc"}"#).unwrap();
        assert_eq!(endpoint.url().to_string(), "http://core:8080/");
        assert_eq!(endpoint.secret().revealed(), "abc");

        let err = serde_json::from_str::<InternalEndpoint>(r#"{"url": "/core", "secret": "abc"}"#);
        assert!(err.is_err());
    }
}
