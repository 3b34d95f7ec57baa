use crate::client::HttpClient;
use crate::error::HttpError;
use crate::headers::HeaderStore;
use crate::response::Response;
use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Immutable HTTP request.
///
/// Mutation produces a new request (`with_*` style); middleware records the
/// updated request in the [`crate::RequestContext`] before forwarding it.
#[derive(Debug, Clone)]
pub struct Request {
    method: http::Method,
    uri: http::Uri,
    headers: HeaderStore,
    body: Option<Bytes>,
    timeout: Option<Duration>,
}

impl Request {
    /// Create a request with no headers, body, or explicit timeout.
    #[must_use]
    pub fn new(method: http::Method, uri: http::Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderStore::new(),
            body: None,
            timeout: None,
        }
    }

    /// Request method.
    #[must_use]
    pub fn method(&self) -> &http::Method {
        &self.method
    }

    /// Request URI.
    #[must_use]
    pub fn uri(&self) -> &http::Uri {
        &self.uri
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderStore {
        &self.headers
    }

    /// Request body, if any.
    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Explicit per-request timeout set by the caller, if any.
    ///
    /// `None` means the adaptive middleware (when enabled) or the client
    /// default applies.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Return a new request with one more header appended.
    #[must_use]
    pub fn with_header(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.headers.append(name, value);
        next
    }

    /// Return a new request with the given header store.
    #[must_use]
    pub fn with_headers(&self, headers: HeaderStore) -> Self {
        let mut next = self.clone();
        next.headers = headers;
        next
    }

    /// Return a new request with the given body.
    #[must_use]
    pub fn with_body(&self, body: Bytes) -> Self {
        let mut next = self.clone();
        next.body = Some(body);
        next
    }

    /// Return a new request with an explicit timeout.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut next = self.clone();
        next.timeout = Some(timeout);
        next
    }
}

/// Body kinds accepted by the request builder.
#[derive(Debug, Clone)]
enum BodyKind {
    Empty,
    Bytes(Bytes),
    Json(Bytes),
    Form(Bytes),
}

/// Fluent request builder bound to a client.
///
/// Created by [`HttpClient::get`], [`HttpClient::post`], etc. Builder
/// errors (bad URL, serialization failure) are deferred and surface from
/// [`build()`](RequestBuilder::build) or [`send()`](RequestBuilder::send).
///
/// # Example
///
/// ```ignore
/// let resp = client
///     .post("https://api.example.com/users")
///     .with_header("x-request-id", "abc123")
///     .with_json_body(&NewUser { name: "Alice" })
///     .send()
///     .await?;
/// ```
#[must_use = "RequestBuilder does nothing until .send() is called"]
pub struct RequestBuilder {
    client: HttpClient,
    method: http::Method,
    url: String,
    headers: HeaderStore,
    body: BodyKind,
    timeout: Option<Duration>,
    cancellation: Option<CancellationToken>,
    /// Error captured during building (deferred to `build()`/`send()`)
    error: Option<HttpError>,
}

impl RequestBuilder {
    pub(crate) fn new(client: HttpClient, method: http::Method, url: String) -> Self {
        Self {
            client,
            method,
            url,
            headers: HeaderStore::new(),
            body: BodyKind::Empty,
            timeout: None,
            cancellation: None,
            error: None,
        }
    }

    /// Append a single header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Append multiple headers.
    pub fn with_headers<N, V>(mut self, headers: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.headers.append(name, value);
        }
        self
    }

    /// Set a raw byte body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = BodyKind::Bytes(body.into());
        self
    }

    /// Serialize `value` as the JSON body and set
    /// `Content-Type: application/json` unless the caller provided one.
    ///
    /// Serialization failures surface as
    /// [`HttpError::InvalidRequest`] from `build()`/`send()`.
    pub fn with_json_body<T: Serialize>(mut self, value: &T) -> Self {
        if self.error.is_some() {
            return self;
        }
        match serde_json::to_vec(value) {
            Ok(bytes) => self.body = BodyKind::Json(Bytes::from(bytes)),
            Err(e) => {
                self.error = Some(HttpError::InvalidRequest {
                    message: "failed to serialize JSON body".to_owned(),
                    source: Some(Box::new(e)),
                });
            }
        }
        self
    }

    /// URL-encode `fields` as the body and set
    /// `Content-Type: application/x-www-form-urlencoded` unless the caller
    /// provided one.
    pub fn with_form_body<T: Serialize>(mut self, fields: &T) -> Self {
        if self.error.is_some() {
            return self;
        }
        match serde_urlencoded::to_string(fields) {
            Ok(encoded) => self.body = BodyKind::Form(Bytes::from(encoded)),
            Err(e) => {
                self.error = Some(HttpError::InvalidRequest {
                    message: "failed to encode form body".to_owned(),
                    source: Some(Box::new(e)),
                });
            }
        }
        self
    }

    /// Set an explicit per-request timeout. Explicit timeouts are never
    /// adapted by the adaptive middleware.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a caller cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Build the immutable [`Request`] without sending it.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::InvalidRequest`] for a deferred builder error
    /// or an unparseable URL.
    pub fn build(self) -> Result<Request, HttpError> {
        let (request, _, _) = self.into_parts()?;
        Ok(request)
    }

    /// Build and send the request through the client's middleware chain.
    ///
    /// # Errors
    ///
    /// Transport, timeout, cancellation, and TLS failures; HTTP status
    /// codes are never errors — the response is returned with its status
    /// and body intact.
    pub async fn send(self) -> Result<Response, HttpError> {
        let (request, client, cancellation) = self.into_parts()?;
        client.send(request, cancellation).await
    }

    fn into_parts(
        mut self,
    ) -> Result<(Request, HttpClient, Option<CancellationToken>), HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let uri = self.client.resolve_url(&self.url)?;

        let (body, content_type) = match self.body {
            BodyKind::Empty => (None, None),
            BodyKind::Bytes(b) => (Some(b), None),
            BodyKind::Json(b) => (Some(b), Some("application/json")),
            BodyKind::Form(b) => (Some(b), Some("application/x-www-form-urlencoded")),
        };
        if let Some(content_type) = content_type
            && !self.headers.contains("content-type")
        {
            self.headers.set("Content-Type", content_type);
        }

        let request = Request {
            method: self.method,
            uri,
            headers: self.headers,
            body,
            timeout: self.timeout,
        };
        Ok((request, self.client, self.cancellation))
    }
}
