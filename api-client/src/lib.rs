//! HTTP plumbing shared by registry adapters.
//!
//! [ApiClient] wraps a `hyperdriver` client service with a pluggable
//! [Authentication] layer. The [internal] module provides the transport
//! used to reach the core service with the shared job service secret.

use std::future::Future;
use std::sync::Arc;

use http::Method;
use http::Uri;
use hyperdriver::service::SharedService;
pub use secret::Secret;
use tower::ServiceExt;

mod authentication;
pub mod error;
pub mod internal;
pub mod mock;
pub mod request;
pub mod response;
pub mod uri;

pub use self::authentication::{
    Authentication, AuthenticationLayer, AuthenticationService, SecretAuth,
};
pub use self::internal::{InternalEndpoint, InternalTransportLayer, InternalTransportService};
pub use self::request::RequestBuilder;
pub use self::request::RequestExt;
use self::response::ApiResponse;
use self::uri::UriExtension as _;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A client for accessing APIs over HTTP / HTTPS
///
/// Useful inner object to wrap for individual API clients.
#[derive(Debug, Clone)]
pub struct ApiClient<A> {
    base: Arc<Uri>,
    inner: hyperdriver::client::SharedClientService<hyperdriver::Body, hyperdriver::Body>,
    authentication: Arc<A>,
}

impl<A> ApiClient<A>
where
    A: Authentication + Send + Sync + 'static,
{
    /// Create a new API Client from a base URL and an authentication method
    pub fn new(base: Uri, authentication: A) -> Self {
        let authentication = Arc::new(authentication);
        let inner = hyperdriver::Client::build_tcp_http()
            .with_default_tls()
            .layer(AuthenticationLayer::new(authentication.clone()))
            .build_service();

        ApiClient {
            base: Arc::new(base),
            inner,
            authentication,
        }
    }

    /// Create a new API Client which sends requests through `inner` instead of the network.
    pub fn new_with_inner_service<S>(base: Uri, authentication: A, inner: S) -> Self
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
        let authentication = Arc::new(authentication);

        let service = tower::ServiceBuilder::new()
            .layer(SharedService::layer())
            .layer(AuthenticationLayer::new(authentication.clone()))
            .service(inner);

        ApiClient {
            base: Arc::new(base),
            inner: service,
            authentication,
        }
    }

    /// The authentication method attached to every request.
    pub fn auth(&self) -> &A {
        &self.authentication
    }

    /// The underlying service, with authentication applied.
    pub fn inner(&self) -> &hyperdriver::client::SharedClientService<hyperdriver::Body, hyperdriver::Body> {
        &self.inner
    }
}

impl<A> ApiClient<A>
where
    A: Authentication,
{
    /// The base URI that relative endpoints are joined to.
    pub fn base(&self) -> &Uri {
        &self.base
    }

    /// Build a `GET` request to `endpoint`, relative to the base URI.
    pub fn get(&self, endpoint: &str) -> RequestBuilder<A> {
        let url = (*self.base).clone().join(endpoint);
        RequestBuilder::new(self.clone(), url, Method::GET)
    }

    /// Build a `POST` request to `endpoint`, relative to the base URI.
    pub fn post(&self, endpoint: &str) -> RequestBuilder<A> {
        let url = (*self.base).clone().join(endpoint);
        RequestBuilder::new(self.clone(), url, Method::POST)
    }

    /// Build a `DELETE` request to `endpoint`, relative to the base URI.
    pub fn delete(&self, endpoint: &str) -> RequestBuilder<A> {
        let url = (*self.base).clone().join(endpoint);
        RequestBuilder::new(self.clone(), url, Method::DELETE)
    }

    /// Build a request to an absolute URI, ignoring the client's base.
    pub fn request(&self, method: Method, uri: Uri) -> RequestBuilder<A> {
        RequestBuilder::new(self.clone(), uri, method)
    }

    /// Send a fully built request.
    pub async fn execute(
        &self,
        req: http::Request<hyperdriver::Body>,
    ) -> Result<ApiResponse, hyperdriver::client::Error> {
        let parts = req.parts();

        let response = self.inner.clone().oneshot(req).await?;
        Ok(ApiResponse::new(parts, response))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::MockService;

    #[test]
    fn extensions_produce_send_futures() {
        let client = ApiClient::new(
            "http://core.internal/api/".parse().unwrap(),
            SecretAuth::new("secret garden"),
        );
        let builder = client.get("ping");

        fn assert_send<T: Send>(_t: T) {}

        let fut = builder.send();
        assert_send(fut);
    }

    #[tokio::test]
    async fn mock_client_records_requests() {
        let mock = MockService::new();
        mock.add("/api/ping", http::StatusCode::OK, b"Pong".to_vec());

        let client = ApiClient::new_with_inner_service(
            "http://core.internal/api/".parse().unwrap(),
            SecretAuth::new("secret garden"),
            mock.clone(),
        );

        let response = client.get("ping").send().await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "Pong");

        let recorded = mock.requests();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].method, Method::GET);
        assert_eq!(
            recorded[0].headers.get(http::header::AUTHORIZATION).unwrap(),
            "Harbor-Secret secret garden"
        );
    }

    #[tokio::test]
    async fn absolute_requests_ignore_base() {
        let mock = MockService::new();
        mock.add("/hooks/artifacts", http::StatusCode::ACCEPTED, Vec::new());

        let client =
            ApiClient::new_with_inner_service("http://core.internal/".parse().unwrap(), (), mock.clone());

        let response = client
            .request(Method::POST, "http://receiver.example/hooks/artifacts".parse().unwrap())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::ACCEPTED);
        assert_eq!(
            mock.requests()[0].uri.authority().unwrap().as_str(),
            "receiver.example"
        );
    }
}
