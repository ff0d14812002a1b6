//! Request building on top of [ApiClient](crate::ApiClient).

use std::time::Duration;

use http::{header::HeaderValue, HeaderName, Uri};

use crate::error::Error;
use crate::{response::ApiResponse, ApiClient, Authentication};

/// Extension methods for [http::Request].
pub trait RequestExt {
    /// Copy the method, URI and headers of a request without its body.
    fn parts(&self) -> http::request::Parts;
}

impl<B> RequestExt for http::Request<B> {
    fn parts(&self) -> http::request::Parts {
        let mut builder = http::request::Request::builder()
            .uri(self.uri().clone())
            .method(self.method().clone());

        if let Some(headers) = builder.headers_mut() {
            *headers = self.headers().clone();
        }

        let (parts, _) = builder
            .body(())
            .expect("parts copied from a valid request")
            .into_parts();
        parts
    }
}

/// Builder for a single request sent through an [ApiClient].
#[derive(Debug)]
pub struct RequestBuilder<A> {
    req: http::request::Builder,
    client: ApiClient<A>,
    body: Option<hyperdriver::Body>,
    timeout: Option<Duration>,
}

impl<A> RequestBuilder<A> {
    /// Start a request with `method` to `uri`.
    pub fn new(client: ApiClient<A>, uri: Uri, method: http::Method) -> Self {
        Self {
            req: http::Request::builder().method(method).uri(uri),
            client,
            body: None,
            timeout: None,
        }
    }

    /// Add a header to the request.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        self.req = self.req.header(key, value);
        self
    }

    /// Fail the request if no response arrives within `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the request body.
    pub fn body<B: Into<hyperdriver::Body>>(self, body: B) -> Self {
        Self {
            body: Some(body.into()),
            ..self
        }
    }

    /// Serialize `value` as the JSON body and set the content type.
    pub fn json<T: serde::Serialize + ?Sized>(self, value: &T) -> Result<Self, serde_json::Error> {
        let body = bytes::Bytes::from(serde_json::to_vec(value)?);
        Ok(self
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body))
    }

    /// Send the request and wait for the response.
    pub async fn send(self) -> Result<ApiResponse, Error>
    where
        A: Authentication,
    {
        let req = self
            .req
            .body(self.body.unwrap_or_else(hyperdriver::Body::empty))
            .map_err(Error::Build)?;

        if let Some(timeout) = self.timeout {
            match tokio::time::timeout(timeout, self.client.execute(req)).await {
                Ok(res) => res.map_err(Error::Request),
                Err(_) => Err(Error::Request(hyperdriver::client::Error::RequestTimeout)),
            }
        } else {
            self.client.execute(req).await.map_err(Error::Request)
        }
    }
}
