use crate::headers::HeaderStore;
use std::time::Duration;

/// Default User-Agent string for HTTP requests
pub const DEFAULT_USER_AGENT: &str = concat!("velo-http/", env!("CARGO_PKG_VERSION"));

/// Check if an HTTP method is idempotent (safe to retry) per RFC 9110.
///
/// Idempotent methods: GET, HEAD, PUT, DELETE, OPTIONS.
/// Non-idempotent methods: POST, PATCH.
#[must_use]
pub fn is_idempotent_method(method: &http::Method) -> bool {
    matches!(
        *method,
        http::Method::GET
            | http::Method::HEAD
            | http::Method::PUT
            | http::Method::DELETE
            | http::Method::OPTIONS
    )
}

/// Retry policy for the retry middleware.
///
/// A request is retried when the response status is 5xx or the error is
/// retryable ([`crate::HttpError::is_retryable`]). The delay grows
/// multiplicatively per attempt, with 0-25% jitter to avoid thundering
/// herds.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum retries after the initial attempt (0 = no retries, default: 2).
    pub max_retries: usize,

    /// Delay before the first retry (default: 200ms).
    pub initial_delay: Duration,

    /// Multiplier applied to the delay for each subsequent retry (default: 2.0).
    pub backoff_multiplier: f64,

    /// Only retry idempotent methods (default: true).
    ///
    /// When false, non-idempotent methods are retried as well; only enable
    /// this for endpoints that are effectively idempotent.
    pub only_retry_idempotent: bool,

    /// Add 0-25% random jitter to each delay (default: true).
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            only_retry_idempotent: true,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy with no retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Fast policy for tests (1ms initial delay, no jitter).
    #[must_use]
    pub fn fast() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            only_retry_idempotent: true,
            jitter: false,
        }
    }
}

/// Dual-stack ("Happy Eyeballs") connection racing options.
///
/// Resolved addresses are partitioned by family and interleaved starting
/// with the preferred family. Attempts start `family_stagger` apart across
/// families and `attempt_spacing` apart within a family; at most
/// `max_concurrent_attempts` are in flight. This is the lite scheme
/// (stagger + spacing), not full RFC 8305.
#[derive(Debug, Clone)]
pub struct HappyEyeballsConfig {
    /// Race families concurrently (default: true). When false, addresses
    /// are attempted sequentially in resolved order.
    pub enabled: bool,

    /// Head start granted to the preferred family (default: 250ms).
    pub family_stagger: Duration,

    /// Spacing between successive attempts within a family (default: 250ms).
    pub attempt_spacing: Duration,

    /// Maximum in-flight connection attempts (default: 4).
    pub max_concurrent_attempts: usize,

    /// Prefer IPv6 as the leading family (default: true).
    pub prefer_ipv6: bool,

    /// Per-attempt connect budget (default: 10s).
    pub attempt_timeout: Duration,
}

impl Default for HappyEyeballsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            family_stagger: Duration::from_millis(250),
            attempt_spacing: Duration::from_millis(250),
            max_concurrent_attempts: 4,
            prefer_ipv6: true,
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Concurrency permits per authority (default: 6, matching browser
    /// conventions).
    pub max_per_authority: usize,

    /// Cap on distinct authority keys before best-effort eviction of
    /// quiescent entries (default: 1000).
    pub max_authorities: usize,

    /// Idle connections older than this are discarded at acquire time
    /// (default: 2 minutes).
    pub idle_timeout: Duration,

    /// Bound on DNS resolution, which the platform may not allow us to
    /// cancel (default: 5s).
    pub dns_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_per_authority: 6,
            max_authorities: 1000,
            idle_timeout: Duration::from_secs(120),
            dns_timeout: Duration::from_secs(5),
        }
    }
}

/// Wire codec limits.
#[derive(Debug, Clone, Copy)]
pub struct CodecLimits {
    /// Maximum size of the response status line + header block (default: 64 KiB).
    pub max_header_bytes: usize,

    /// Maximum response body size (default: 10 MiB). Applies to both
    /// length-delimited and chunked bodies.
    pub max_body_bytes: usize,

    /// Maximum size of a single chunk in a chunked body (default: 8 MiB).
    pub max_chunk_bytes: usize,
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: 64 * 1024,
            max_body_bytes: 10 * 1024 * 1024,
            max_chunk_bytes: 8 * 1024 * 1024,
        }
    }
}

/// TLS trust-root provider selection.
///
/// The source of trust anchors is a capability decision made at client
/// construction, not probed at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsProvider {
    /// System trust store first; fall back to the bundled webpki roots
    /// only when the system store is unavailable or empty. Never falls
    /// back after an authentication or certificate validation failure.
    #[default]
    Auto,
    /// System trust store only; client construction fails if unavailable.
    SystemOnly,
    /// Bundled webpki roots only (fully portable, no OS dependency).
    BundledOnly,
}

/// TLS configuration.
///
/// Minimum negotiated version is TLS 1.2. Certificate revocation checking
/// is disabled; this is a documented limitation.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Trust-root provider selection (default: [`TlsProvider::Auto`]).
    pub provider: TlsProvider,

    /// ALPN protocols offered at handshake, in preference order
    /// (default: `["http/1.1"]`). An empty list offers no ALPN.
    pub alpn_protocols: Vec<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            provider: TlsProvider::Auto,
            alpn_protocols: vec!["http/1.1".to_owned()],
        }
    }
}

/// Verbosity of the logging middleware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// No request/response events.
    Off,
    /// One event per completed request.
    Minimal,
    /// Events before and after the remainder of the chain.
    #[default]
    Standard,
    /// Standard plus header names (sensitive values redacted) and a
    /// bounded body preview.
    Detailed,
}

/// Adaptive policy bounds for the adaptive middleware.
///
/// Only requests without an explicit caller timeout are adapted; the
/// adapted value is clamped to `[min_timeout, max_timeout]`.
#[derive(Debug, Clone)]
pub struct AdaptivePolicy {
    /// Lower clamp for adapted timeouts (default: 1s).
    pub min_timeout: Duration,

    /// Upper clamp for adapted timeouts (default: 60s).
    pub max_timeout: Duration,

    /// Baseline timeout scaled by the quality factor (default: 10s).
    pub baseline_timeout: Duration,

    /// Baseline concurrency hint (default: 6, the pool's per-authority cap).
    pub baseline_concurrency: usize,
}

impl Default for AdaptivePolicy {
    fn default() -> Self {
        Self {
            min_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(60),
            baseline_timeout: Duration::from_secs(10),
            baseline_concurrency: 6,
        }
    }
}

/// Network-quality detector tuning.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Ring buffer capacity (default: 64 samples).
    pub window: usize,

    /// EWMA smoothing factor for latency (default: 0.2).
    pub ewma_alpha: f64,

    /// Consecutive better-band windows required before promotion
    /// (default: 3).
    pub promote_streak: usize,

    /// Consecutive timeouts that force an immediate demotion to Poor
    /// (default: 3).
    pub timeout_burst: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window: 64,
            ewma_alpha: 0.2,
            promote_streak: 3,
            timeout_burst: 3,
        }
    }
}

/// Overall HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL joined with relative request paths (default: none).
    pub base_url: Option<String>,

    /// Timeout applied when a request carries no explicit timeout and no
    /// adaptive middleware adapted one (default: 30s).
    pub default_timeout: Duration,

    /// User-Agent injected by the serializer when the caller set none.
    pub user_agent: String,

    /// Headers merged into every request by the default-headers middleware.
    pub default_headers: HeaderStore,

    /// Logging middleware verbosity.
    pub log_level: LogLevel,

    /// Retry policy; `None` disables the retry middleware.
    pub retry: Option<RetryPolicy>,

    /// Adaptive policy; `None` disables the adaptive middleware.
    pub adaptive: Option<AdaptivePolicy>,

    /// Network-quality detector tuning.
    pub detector: DetectorConfig,

    /// Connection pool configuration.
    pub pool: PoolConfig,

    /// TLS configuration.
    pub tls: TlsConfig,

    /// Dual-stack connection racing options.
    pub happy_eyeballs: HappyEyeballsConfig,

    /// Wire codec limits.
    pub codec: CodecLimits,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            default_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            default_headers: HeaderStore::new(),
            log_level: LogLevel::Standard,
            retry: None,
            adaptive: None,
            detector: DetectorConfig::default(),
            pool: PoolConfig::default(),
            tls: TlsConfig::default(),
            happy_eyeballs: HappyEyeballsConfig::default(),
            codec: CodecLimits::default(),
        }
    }
}

impl HttpClientConfig {
    /// Minimal configuration for latency-sensitive callers: short timeout,
    /// small body cap, no retries.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            default_timeout: Duration::from_secs(10),
            codec: CodecLimits {
                max_body_bytes: 1024 * 1024,
                ..CodecLimits::default()
            },
            ..Default::default()
        }
    }

    /// Configuration for resilient background traffic: retries enabled and
    /// adaptive policy on.
    #[must_use]
    pub fn resilient() -> Self {
        Self {
            retry: Some(RetryPolicy::default()),
            adaptive: Some(AdaptivePolicy::default()),
            ..Default::default()
        }
    }
}
