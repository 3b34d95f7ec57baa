use crate::config::HttpClientConfig;
use crate::context::RequestContext;
use crate::detector::NetworkQualityDetector;
use crate::error::HttpError;
use crate::middleware::{HttpMetrics, Middleware, Next};
use crate::net::ConnectionPool;
use crate::request::{Request, RequestBuilder};
use crate::response::Response;
use crate::transport::Transport;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub(crate) struct ClientInner {
    pub(crate) config: HttpClientConfig,
    pub(crate) middleware: Vec<Arc<dyn Middleware>>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) detector: Arc<NetworkQualityDetector>,
    pub(crate) metrics: Arc<HttpMetrics>,
    /// Present when the default pooled transport is in use; `dispose`
    /// drains it.
    pub(crate) pool: Option<ConnectionPool>,
}

/// HTTP client with a middleware pipeline over a pooled HTTP/1.1
/// transport.
///
/// The middleware chain is assembled once by
/// [`HttpClientBuilder`](crate::HttpClientBuilder) and is immutable for
/// the client's lifetime. Cloning is cheap (shared `Arc` internals) and
/// clones share the pool, detector, and metrics.
///
/// # Example
///
/// ```ignore
/// use velo_http::HttpClient;
///
/// let client = HttpClient::builder()
///     .retry(Some(Default::default()))
///     .build()?;
///
/// let user: User = client
///     .get("https://api.example.com/users/1")
///     .send()
///     .await?
///     .json()?;
/// ```
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl HttpClient {
    /// Client with default configuration.
    ///
    /// # Errors
    ///
    /// Fails when TLS trust roots cannot be initialized.
    pub fn new() -> Result<Self, HttpError> {
        crate::builder::HttpClientBuilder::new().build()
    }

    /// Builder for a configured client.
    #[must_use]
    pub fn builder() -> crate::builder::HttpClientBuilder {
        crate::builder::HttpClientBuilder::new()
    }

    /// GET request builder.
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::GET, url)
    }

    /// POST request builder.
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::POST, url)
    }

    /// PUT request builder.
    pub fn put(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::PUT, url)
    }

    /// DELETE request builder.
    pub fn delete(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::DELETE, url)
    }

    /// PATCH request builder.
    pub fn patch(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::PATCH, url)
    }

    /// HEAD request builder.
    pub fn head(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::HEAD, url)
    }

    /// OPTIONS request builder.
    pub fn options(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::OPTIONS, url)
    }

    /// Builder for an arbitrary method.
    pub fn request(&self, method: http::Method, url: &str) -> RequestBuilder {
        RequestBuilder::new(self.clone(), method, url.to_owned())
    }

    /// Send a prebuilt request through the middleware chain.
    ///
    /// A fresh [`RequestContext`] is created per invocation and disposed
    /// on every path once the response is returned or the error raised.
    ///
    /// # Errors
    ///
    /// Transport, timeout, cancellation, TLS, and validation failures.
    /// HTTP status codes are never errors.
    pub async fn send(
        &self,
        request: Request,
        cancellation: Option<CancellationToken>,
    ) -> Result<Response, HttpError> {
        let mut ctx = RequestContext::new(request.clone(), cancellation);
        let result = Next::new(&self.inner.middleware, self.inner.transport.as_ref())
            .run(request, &mut ctx)
            .await;
        ctx.dispose();
        result
    }

    /// Resolve a possibly relative URL against the configured base URL.
    pub(crate) fn resolve_url(&self, url: &str) -> Result<http::Uri, HttpError> {
        let full = if url.contains("://") {
            url.to_owned()
        } else if let Some(base) = &self.inner.config.base_url {
            format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            )
        } else {
            url.to_owned()
        };

        full.parse::<http::Uri>().map_err(|e| HttpError::InvalidRequest {
            message: format!("invalid URL {full:?}"),
            source: Some(Box::new(e)),
        })
    }

    /// The network-quality detector feeding the adaptive middleware.
    #[must_use]
    pub fn detector(&self) -> &Arc<NetworkQualityDetector> {
        &self.inner.detector
    }

    /// Request counters.
    #[must_use]
    pub fn metrics(&self) -> &Arc<HttpMetrics> {
        &self.inner.metrics
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &HttpClientConfig {
        &self.inner.config
    }

    /// Dispose the underlying connection pool: idle connections are
    /// drained and closed, and subsequent requests fail. Only applies to
    /// the default pooled transport.
    pub fn dispose(&self) {
        if let Some(pool) = &self.inner.pool {
            pool.dispose();
        }
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("middleware", &self.inner.middleware.len())
            .field("base_url", &self.inner.config.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogLevel, RetryPolicy, TlsConfig, TlsProvider};
    use httpmock::prelude::*;
    use serde_json::json;

    fn test_client() -> HttpClient {
        HttpClient::builder()
            .tls(TlsConfig {
                provider: TlsProvider::BundledOnly,
                ..TlsConfig::default()
            })
            .log_level(LogLevel::Off)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_client_get() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/test");
            then.status(200).json_body(json!({"success": true}));
        });

        let client = test_client();
        let url = format!("{}/test", server.base_url());
        let resp = client.get(&url).send().await.unwrap();

        assert_eq!(resp.status(), http::StatusCode::OK);
        let body: serde_json::Value = resp.json().unwrap();
        assert_eq!(body["success"], json!(true));
    }

    #[tokio::test]
    async fn test_client_post_json() {
        #[derive(serde::Serialize)]
        struct NewUser {
            name: String,
        }

        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::POST)
                .path("/users")
                .header("content-type", "application/json")
                .json_body(json!({"name": "Alice"}));
            then.status(201).json_body(json!({"id": 1}));
        });

        let client = test_client();
        let url = format!("{}/users", server.base_url());
        let resp = client
            .post(&url)
            .with_json_body(&NewUser {
                name: "Alice".into(),
            })
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), http::StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_client_form_body() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::POST)
                .path("/submit")
                .header("content-type", "application/x-www-form-urlencoded")
                .body("key1=value1&key2=value2");
            then.status(200);
        });

        let client = test_client();
        let url = format!("{}/submit", server.base_url());
        let resp = client
            .post(&url)
            .with_form_body(&[("key1", "value1"), ("key2", "value2")])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), http::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_client_head_and_options() {
        let server = MockServer::start();
        let _head = server.mock(|when, then| {
            when.method(Method::HEAD).path("/res");
            then.status(200).header("content-length", "100");
        });
        let _options = server.mock(|when, then| {
            when.method(Method::OPTIONS).path("/res");
            then.status(204).header("allow", "GET, HEAD");
        });

        let client = test_client();
        let url = format!("{}/res", server.base_url());

        let resp = client.head(&url).send().await.unwrap();
        assert_eq!(resp.status(), http::StatusCode::OK);
        assert!(resp.body().is_empty());

        let resp = client.options(&url).send().await.unwrap();
        assert_eq!(resp.status(), http::StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_error_statuses_returned_with_body() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/missing");
            then.status(404).body(r#"{"error": "not found"}"#);
        });

        let client = test_client();
        let url = format!("{}/missing", server.base_url());
        let resp = client.get(&url).send().await.unwrap();

        assert_eq!(resp.status(), http::StatusCode::NOT_FOUND);
        assert!(resp.text().contains("not found"), "error bodies are preserved");
    }

    #[tokio::test]
    async fn test_base_url_joining() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/api/v1/users");
            then.status(200);
        });

        let client = HttpClient::builder()
            .base_url(format!("{}/api/v1", server.base_url()))
            .log_level(LogLevel::Off)
            .build()
            .unwrap();

        let resp = client.get("users").send().await.unwrap();
        assert_eq!(resp.status(), http::StatusCode::OK);

        let resp = client.get("/users").send().await.unwrap();
        assert_eq!(resp.status(), http::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_default_headers_applied_end_to_end() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/h").header("x-app", "velo");
            then.status(200);
        });

        let client = HttpClient::builder()
            .default_headers([("x-app", "velo")].into_iter().collect())
            .log_level(LogLevel::Off)
            .build()
            .unwrap();

        let url = format!("{}/h", server.base_url());
        let resp = client.get(&url).send().await.unwrap();
        assert_eq!(resp.status(), http::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_recorded_through_client() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/m");
            then.status(200).body("ok");
        });

        let client = test_client();
        let url = format!("{}/m", server.base_url());
        client.get(&url).send().await.unwrap();
        client.get(&url).send().await.unwrap();

        let snap = client.metrics().snapshot();
        assert_eq!(snap.requests_total, 2);
        assert_eq!(snap.requests_success, 2);
    }

    #[tokio::test]
    async fn test_retry_against_flaky_server() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::GET).path("/flaky");
            then.status(500).body("boom");
        });

        let client = HttpClient::builder()
            .retry(Some(RetryPolicy::fast()))
            .log_level(LogLevel::Off)
            .build()
            .unwrap();

        let url = format!("{}/flaky", server.base_url());
        let resp = client.get(&url).send().await.unwrap();
        assert_eq!(resp.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(mock.calls(), 3, "1 initial + 2 retries");
    }

    #[tokio::test]
    async fn test_invalid_url_is_invalid_request() {
        let client = test_client();
        let err = client.get("http://").send().await.unwrap_err();
        assert!(matches!(err, HttpError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_disposed_client_rejects_requests() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/x");
            then.status(200);
        });

        let client = test_client();
        let url = format!("{}/x", server.base_url());
        client.get(&url).send().await.unwrap();

        client.dispose();
        let err = client.get(&url).send().await.unwrap_err();
        assert!(matches!(err, HttpError::Network { .. }));
    }

    #[tokio::test]
    async fn test_client_is_clone_and_shares_metrics() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/c");
            then.status(200);
        });

        let client = test_client();
        let clone = client.clone();
        let url = format!("{}/c", server.base_url());
        client.get(&url).send().await.unwrap();
        clone.get(&url).send().await.unwrap();

        assert_eq!(client.metrics().snapshot().requests_total, 2);
    }

    /// `HttpClient` must be shareable across tasks without locking.
    #[test]
    fn test_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HttpClient>();
    }

    #[test]
    fn test_resolve_url_without_base() {
        let client = test_client();
        let uri = client.resolve_url("http://example.com/a").unwrap();
        assert_eq!(uri.host(), Some("example.com"));
        assert!(client.resolve_url("not a url").is_err());
    }
}
