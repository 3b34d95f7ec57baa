use crate::error::HttpError;
use crate::headers::HeaderStore;
use crate::request::Request;
use bytes::Bytes;
use http::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// HTTP response.
///
/// The body is fully consumed by the transport before the response is
/// produced; there is no streaming body. HTTP status codes are never
/// surfaced as errors — a 404 or 500 arrives here with its status and
/// body intact. The `error` slot is only populated by middleware that
/// synthesizes a response (the 408 mode of the timeout middleware).
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderStore,
    body: Bytes,
    elapsed: Duration,
    request: Arc<Request>,
    error: Option<HttpError>,
}

impl Response {
    pub(crate) fn new(
        status: StatusCode,
        headers: HeaderStore,
        body: Bytes,
        elapsed: Duration,
        request: Arc<Request>,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            elapsed,
            request,
            error: None,
        }
    }

    pub(crate) fn with_error(mut self, error: HttpError) -> Self {
        self.error = Some(error);
        self
    }

    /// Response status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderStore {
        &self.headers
    }

    /// Response body bytes.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response and return the body.
    #[must_use]
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Wall-clock time from pipeline entry to response completion.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// The request that produced this response, as it reached the
    /// transport (after any middleware rewrites).
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Error attached by a synthesizing middleware, if any.
    #[must_use]
    pub fn error(&self) -> Option<&HttpError> {
        self.error.as_ref()
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Unknown`] if the body is not valid JSON for
    /// `T`. The status is not checked; callers deciding on status should
    /// inspect [`status()`](Self::status) first.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| HttpError::unknown_caused("failed to decode JSON response body", e))
    }
}
