use crate::client::{ClientInner, HttpClient};
use crate::config::{
    AdaptivePolicy, CodecLimits, HappyEyeballsConfig, HttpClientConfig, LogLevel, PoolConfig,
    RetryPolicy, TlsConfig,
};
use crate::detector::NetworkQualityDetector;
use crate::error::HttpError;
use crate::headers::HeaderStore;
use crate::middleware::{
    AdaptiveMiddleware, AuthMiddleware, DefaultHeadersMiddleware, HttpMetrics, LoggingMiddleware,
    MetricsMiddleware, Middleware, RetryMiddleware, TokenProvider,
};
use crate::net::{ConnectionPool, Dialer};
use crate::transport::{Http1Transport, Transport};
use std::sync::Arc;
use std::time::Duration;

/// Builder for an [`HttpClient`] with an assembled middleware chain.
pub struct HttpClientBuilder {
    config: HttpClientConfig,
    user_middleware: Vec<Arc<dyn Middleware>>,
    transport: Option<Arc<dyn Transport>>,
    detector: Option<Arc<NetworkQualityDetector>>,
    metrics: Option<Arc<HttpMetrics>>,
    auth: Option<Arc<dyn TokenProvider>>,
    dialer: Option<Arc<dyn Dialer>>,
}

impl HttpClientBuilder {
    /// Builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HttpClientConfig::default())
    }

    /// Builder seeded from a configuration.
    #[must_use]
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self {
            config,
            user_middleware: Vec::new(),
            transport: None,
            detector: None,
            metrics: None,
            auth: None,
            dialer: None,
        }
    }

    /// Base URL joined with relative request paths.
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = Some(base_url.into());
        self
    }

    /// Timeout for requests without an explicit or adapted timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    /// User-Agent injected by the serializer when the caller set none.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Headers merged into every request.
    #[must_use]
    pub fn default_headers(mut self, headers: HeaderStore) -> Self {
        self.config.default_headers = headers;
        self
    }

    /// Logging middleware verbosity.
    #[must_use]
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log_level = level;
        self
    }

    /// Retry policy; `None` removes the retry middleware.
    #[must_use]
    pub fn retry(mut self, policy: Option<RetryPolicy>) -> Self {
        self.config.retry = policy;
        self
    }

    /// Adaptive policy; `None` removes the adaptive middleware.
    #[must_use]
    pub fn adaptive(mut self, policy: Option<AdaptivePolicy>) -> Self {
        self.config.adaptive = policy;
        self
    }

    /// Connection pool configuration.
    #[must_use]
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.config.pool = pool;
        self
    }

    /// TLS configuration.
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.tls = tls;
        self
    }

    /// Dual-stack connection racing options.
    #[must_use]
    pub fn happy_eyeballs(mut self, config: HappyEyeballsConfig) -> Self {
        self.config.happy_eyeballs = config;
        self
    }

    /// Wire codec limits.
    #[must_use]
    pub fn codec_limits(mut self, limits: CodecLimits) -> Self {
        self.config.codec = limits;
        self
    }

    /// Append a user middleware. User middleware run after the built-in
    /// chain, immediately before the transport.
    #[must_use]
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.user_middleware.push(middleware);
        self
    }

    /// Replace the default pooled transport.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Inject a network-quality detector (shared across clients, or
    /// pre-seeded in tests).
    #[must_use]
    pub fn detector(mut self, detector: Arc<NetworkQualityDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Inject a metrics handle (shared across clients).
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<HttpMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Token provider for the auth middleware.
    #[must_use]
    pub fn auth_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.auth = Some(provider);
        self
    }

    /// Inject a low-level dialer (tests, exotic platforms).
    #[must_use]
    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Build the client.
    ///
    /// # Middleware order
    ///
    /// Request flow (outer → inner):
    ///
    /// ```text
    /// DefaultHeaders → Logging → Metrics → Auth → Adaptive → Retry →
    /// [user middleware…] → Transport
    /// ```
    ///
    /// Response flow unwinds in reverse. Adaptive sits outside Retry so
    /// the backoff factor it publishes is visible to the retry loop;
    /// Auth sits outside Adaptive so credential failures are not fed to
    /// the quality detector as network samples.
    ///
    /// # Errors
    ///
    /// Fails when TLS trust roots cannot be initialized for the selected
    /// provider.
    pub fn build(self) -> Result<HttpClient, HttpError> {
        let config = self.config;

        let detector = self
            .detector
            .unwrap_or_else(|| Arc::new(NetworkQualityDetector::new(config.detector.clone())));
        let metrics = self.metrics.unwrap_or_else(HttpMetrics::new);

        let (transport, pool) = match self.transport {
            Some(transport) => (transport, None),
            None => {
                let pool = match &self.dialer {
                    Some(dialer) => ConnectionPool::with_dialer(
                        config.pool.clone(),
                        config.happy_eyeballs.clone(),
                        config.tls.clone(),
                        dialer.clone(),
                    )?,
                    None => ConnectionPool::new(
                        config.pool.clone(),
                        config.happy_eyeballs.clone(),
                        config.tls.clone(),
                    )?,
                };
                let transport: Arc<dyn Transport> = Arc::new(Http1Transport::new(
                    pool.clone(),
                    config.codec,
                    config.user_agent.clone(),
                    config.default_timeout,
                ));
                (transport, Some(pool))
            }
        };

        let mut chain: Vec<Arc<dyn Middleware>> = Vec::new();
        if !config.default_headers.is_empty() {
            chain.push(Arc::new(DefaultHeadersMiddleware::new(
                config.default_headers.clone(),
            )));
        }
        if config.log_level != LogLevel::Off {
            chain.push(Arc::new(LoggingMiddleware::new(config.log_level)));
        }
        chain.push(Arc::new(MetricsMiddleware::new(metrics.clone())));
        if let Some(provider) = self.auth {
            chain.push(Arc::new(AuthMiddleware::bearer(provider)));
        }
        if let Some(policy) = &config.adaptive {
            chain.push(Arc::new(AdaptiveMiddleware::new(
                policy.clone(),
                detector.clone(),
            )));
        }
        if let Some(policy) = &config.retry {
            chain.push(Arc::new(RetryMiddleware::new(policy.clone())));
        }
        chain.extend(self.user_middleware);

        Ok(HttpClient {
            inner: Arc::new(ClientInner {
                config,
                middleware: chain,
                transport,
                detector,
                metrics,
                pool,
            }),
        })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_USER_AGENT, TlsProvider};
    use crate::detector::{QualityLevel, QualitySample};

    fn bundled_tls() -> TlsConfig {
        TlsConfig {
            provider: TlsProvider::BundledOnly,
            ..TlsConfig::default()
        }
    }

    #[test]
    fn test_builder_defaults() {
        let builder = HttpClientBuilder::new();
        assert_eq!(builder.config.default_timeout, Duration::from_secs(30));
        assert_eq!(builder.config.user_agent, DEFAULT_USER_AGENT);
        assert!(builder.config.retry.is_none());
    }

    #[test]
    fn test_builder_build_with_bundled_roots() {
        let client = HttpClientBuilder::new().tls(bundled_tls()).build();
        assert!(client.is_ok());
    }

    #[test]
    fn test_builder_build_auto_roots() {
        // Auto falls back to the bundled store when the system store is
        // unavailable, so build never fails on root selection.
        let client = HttpClientBuilder::new().build();
        assert!(client.is_ok());
    }

    #[test]
    fn test_builder_fluent_configuration() {
        let client = HttpClientBuilder::new()
            .tls(bundled_tls())
            .base_url("https://api.example.com")
            .timeout(Duration::from_secs(5))
            .user_agent("custom/2.0")
            .retry(Some(RetryPolicy::fast()))
            .adaptive(Some(AdaptivePolicy::default()))
            .log_level(LogLevel::Detailed)
            .build()
            .unwrap();

        let config = client.config();
        assert_eq!(config.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.default_timeout, Duration::from_secs(5));
        assert_eq!(config.user_agent, "custom/2.0");
        assert!(config.retry.is_some());
        assert!(config.adaptive.is_some());
    }

    #[test]
    fn test_injected_detector_is_shared() {
        let detector = Arc::new(NetworkQualityDetector::default());
        detector.record(QualitySample {
            latency: Duration::from_secs(5),
            total_duration: Duration::from_secs(5),
            timed_out: false,
            transport_failure: true,
            bytes_transferred: 0,
            success: false,
        });

        let client = HttpClientBuilder::new()
            .tls(bundled_tls())
            .detector(detector.clone())
            .build()
            .unwrap();

        assert_eq!(client.detector().snapshot().sample_count, 1);
        assert_eq!(
            client.detector().snapshot().level,
            QualityLevel::Poor,
            "injected detector state must be visible through the client"
        );
    }

    #[test]
    fn test_injected_metrics_are_shared() {
        let metrics = HttpMetrics::new();
        let client = HttpClientBuilder::new()
            .tls(bundled_tls())
            .metrics(metrics.clone())
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(client.metrics(), &metrics));
    }

    #[test]
    fn test_custom_transport_disables_pool() {
        use crate::middleware::test_support::MockTransport;

        let client = HttpClientBuilder::new()
            .transport(Arc::new(MockTransport::ok()))
            .build()
            .unwrap();
        // dispose() is a no-op without a pool; must not panic.
        client.dispose();
    }
}
