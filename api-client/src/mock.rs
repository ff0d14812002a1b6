//! A recording stand-in for the network.
//!
//! [MockService] answers requests from a table of canned responses keyed by
//! path, and records every request it receives (including the collected body)
//! so tests can assert on exactly what an adapter sent.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::response;
use http_body_util::BodyExt as _;
use parking_lot::Mutex;

use crate::BoxFuture;

/// A canned response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: http::StatusCode,
    headers: http::HeaderMap,
    body: Vec<u8>,
}

impl MockResponse {
    /// A response with `status`, `headers` and `body`.
    pub fn new(status: http::StatusCode, headers: http::HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }
}

/// A request observed by the mock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request method.
    pub method: http::Method,
    /// Full request URI.
    pub uri: http::Uri,
    /// Headers as sent, including authentication.
    pub headers: http::HeaderMap,
    /// Collected request body.
    pub body: Bytes,
}

impl RecordedRequest {
    /// Deserialize the recorded body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, Default)]
struct MockState {
    responses: HashMap<String, MockResponse>,
    requests: Vec<RecordedRequest>,
    fail: bool,
}

/// Tower service which replays canned responses and records requests.
///
/// Clones share state, so a test can keep one handle while an adapter owns another.
#[derive(Debug, Default, Clone)]
pub struct MockService {
    state: Arc<Mutex<MockState>>,
}

impl MockService {
    /// A mock with no responses configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to `path` with `status` and `body`.
    pub fn add(&self, path: &str, status: http::StatusCode, body: Vec<u8>) {
        self.add_response(path, MockResponse::new(status, http::HeaderMap::new(), body));
    }

    /// Respond to `path` with a fully specified response.
    pub fn add_response(&self, path: &str, response: MockResponse) {
        self.state.lock().responses.insert(path.to_owned(), response);
    }

    /// Make every subsequent request fail at the connection level.
    pub fn fail_connections(&self) {
        self.state.lock().fail = true;
    }

    /// All requests received so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }
}

impl tower::Service<http::Request<hyperdriver::Body>> for MockService {
    type Response = http::Response<hyperdriver::Body>;
    type Error = hyperdriver::client::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<hyperdriver::Body>) -> Self::Future {
        let state = self.state.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = body
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();

            let path = parts.uri.path().to_owned();
            let mut state = state.lock();
            state.requests.push(RecordedRequest {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                body,
            });

            if state.fail {
                return Err(hyperdriver::client::Error::RequestTimeout);
            }

            let response = state.responses.get(&path).cloned().unwrap_or_else(|| {
                MockResponse::new(
                    http::StatusCode::NOT_FOUND,
                    http::HeaderMap::new(),
                    format!("no response configured for {path}").into_bytes(),
                )
            });

            let mut builder = response::Builder::new()
                .status(response.status)
                .version(http::Version::HTTP_11);

            for (key, value) in response.headers.iter() {
                builder = builder.header(key, value);
            }

            Ok(builder
                .body(hyperdriver::Body::from(Bytes::from(response.body)))
                .expect("mock response parts are valid"))
        })
    }
}
