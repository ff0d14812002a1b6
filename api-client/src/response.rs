//! Responses paired with the request that produced them.

use http_body_util::BodyExt as _;
use hyperdriver::Body;

use crate::error::{Error, HttpResponseError};

/// An HTTP response together with the parts of the request that generated it.
#[derive(Debug)]
pub struct ApiResponse {
    request: http::request::Parts,
    response: http::response::Parts,
    body: Body,
}

impl ApiResponse {
    /// Create a new `ApiResponse` instance.
    pub fn new(request: http::request::Parts, response: http::Response<Body>) -> Self {
        let (response, body) = response.into_parts();

        Self {
            request,
            response,
            body,
        }
    }

    /// Get the status code of the response.
    pub fn status(&self) -> http::StatusCode {
        self.response.status
    }

    /// Get the headers of the response.
    pub fn headers(&self) -> &http::HeaderMap {
        &self.response.headers
    }

    /// Get the URI of the request that generated the response.
    pub fn uri(&self) -> &http::Uri {
        &self.request.uri
    }

    /// Get the method of the request that generated the response.
    pub fn method(&self) -> &http::Method {
        &self.request.method
    }

    /// Collect the body into bytes.
    pub async fn bytes(self) -> Result<bytes::Bytes, Error> {
        self.body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|err| Error::ResponseBody(err.into()))
    }

    /// Collect the body as UTF-8 text.
    pub async fn text(self) -> Result<String, Error> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|err| Error::ResponseBody(err.into()))
    }

    /// Collect the body and deserialize it as JSON.
    pub async fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, Error> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| Error::ResponseBody(err.into()))
    }

    /// Convert the response into an error if the status is not a success status.
    pub async fn error_for_status(self) -> Result<Self, Error> {
        if self.status().is_success() {
            Ok(self)
        } else {
            Err(Error::Response(HttpResponseError::from_response(self).await))
        }
    }
}
