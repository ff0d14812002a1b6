//! Authentication for API clients.
//!
//! The `Authentication` trait is used to authenticate with an API queried via the `ApiClient`.
//!
//! Two implementations are provided:
//! - `SecretAuth` for the shared service secret used between platform components
//! - `()` for no authentication

use std::sync::Arc;

use http::HeaderValue;
use secret::Secret;
use tower::layer::Layer;

/// Trait to represent authenticating a request before it is sent.
pub trait Authentication: Clone {
    /// Called by the `ApiClient` to implement authorization.
    fn authenticate<B>(&self, req: http::Request<B>) -> http::Request<B>;
}

/// Authentication with the shared service secret.
///
/// Every request receives `Authorization: Harbor-Secret <secret>`, replacing
/// any authorization header already present: internal calls always act as the
/// job service identity.
#[derive(Debug, Clone)]
pub struct SecretAuth(Secret);

impl SecretAuth {
    /// Create a new secret authentication.
    pub fn new<K: Into<Secret>>(secret: K) -> Self {
        SecretAuth(secret.into())
    }

    /// Get the header value for the secret.
    pub fn header_value(&self) -> Option<HeaderValue> {
        match self.0.service_header() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::error!("service secret is not a valid header value");
                None
            }
        }
    }
}

impl Authentication for SecretAuth {
    fn authenticate<B>(&self, mut req: http::Request<B>) -> http::Request<B> {
        if let Some(value) = self.header_value() {
            if req.headers().contains_key(http::header::AUTHORIZATION) {
                tracing::debug!("replacing {} header", http::header::AUTHORIZATION);
            }
            req.headers_mut().insert(http::header::AUTHORIZATION, value);
        }
        req
    }
}

impl Authentication for () {
    fn authenticate<B>(&self, req: http::Request<B>) -> http::Request<B> {
        req
    }
}

/// A layer which authenticates every request passing through it.
#[derive(Debug)]
pub struct AuthenticationLayer<A> {
    auth: Arc<A>,
}

impl<A> Clone for AuthenticationLayer<A> {
    fn clone(&self) -> Self {
        Self {
            auth: self.auth.clone(),
        }
    }
}

impl<A> AuthenticationLayer<A> {
    /// Create a layer around a shared authentication method.
    pub fn new(auth: Arc<A>) -> Self {
        Self { auth }
    }
}

impl<A, S> Layer<S> for AuthenticationLayer<A> {
    type Service = AuthenticationService<A, S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthenticationService::new(inner, self.auth.clone())
    }
}

/// A service which authenticates every request before delegating to `S`.
#[derive(Debug)]
pub struct AuthenticationService<A, S> {
    inner: S,
    auth: Arc<A>,
}

impl<A, S: Clone> Clone for AuthenticationService<A, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            auth: self.auth.clone(),
        }
    }
}

impl<A, S> AuthenticationService<A, S> {
    pub(crate) fn new(inner: S, auth: Arc<A>) -> Self {
        Self { inner, auth }
    }
}

impl<A, S, BIn, BOut> tower::Service<http::Request<BIn>> for AuthenticationService<A, S>
where
    A: Authentication,
    S: tower::Service<http::Request<BIn>, Response = http::Response<BOut>>,
    S::Future: Send + 'static,
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
        let req = self.auth.authenticate(req);
        self.inner.call(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_auth_replaces_existing_header() {
        let auth = SecretAuth::new("s3cr3t");
        let req = http::Request::builder()
            .header(http::header::AUTHORIZATION, "Basic Zm9vOmJhcg==")
            .body(())
            .unwrap();

        let req = auth.authenticate(req);
        let values: Vec<_> = req
            .headers()
            .get_all(http::header::AUTHORIZATION)
            .iter()
            .collect();
        assert_eq!(values, vec!["Harbor-Secret s3cr3t"]);
    }

    #[test]
    fn unit_auth_is_a_no_op() {
        let req = http::Request::builder().body(()).unwrap();
        let req = ().authenticate(req);
        assert!(req.headers().is_empty());
    }
}
