#![warn(warnings)]

//! Embedded-friendly HTTP client for latency-sensitive applications.
//!
//! This crate provides an HTTP/1.1 client with:
//! - A per-authority connection pool with strict concurrency-permit
//!   accounting and idle recycling
//! - Dual-stack ("Happy Eyeballs") connection racing
//! - TLS via rustls with ALPN and selectable trust-root providers
//! - A first-class wire codec (chunked and length-delimited bodies)
//! - A middleware pipeline (default headers, logging, metrics, auth,
//!   retry, adaptive policies) terminated by the transport
//! - An online network-quality detector with hysteresis, driving
//!   per-request timeout/backoff adaptation
//! - First-class cancellation and a typed, closed error taxonomy
//!
//! HTTP status codes are never errors: a 404 or 500 comes back as a
//! [`Response`] with its status and body intact.
//!
//! # Example
//!
//! ```ignore
//! use velo_http::{HttpClient, RetryPolicy};
//! use std::time::Duration;
//!
//! let client = HttpClient::builder()
//!     .timeout(Duration::from_secs(10))
//!     .retry(Some(RetryPolicy::default()))
//!     .build()?;
//!
//! let data: MyData = client
//!     .get("https://api.example.com/data")
//!     .with_header("x-request-id", "abc123")
//!     .send()
//!     .await?
//!     .json()?;
//! ```

mod builder;
mod client;
mod codec;
mod config;
mod context;
mod detector;
mod error;
mod headers;
pub mod middleware;
pub mod net;
mod request;
mod response;
mod transport;

pub use builder::HttpClientBuilder;
pub use client::HttpClient;
pub use config::{
    AdaptivePolicy, CodecLimits, DEFAULT_USER_AGENT, DetectorConfig, HappyEyeballsConfig,
    HttpClientConfig, LogLevel, PoolConfig, RetryPolicy, TlsConfig, TlsProvider,
    is_idempotent_method,
};
pub use context::{RequestContext, TimelineEvent};
pub use detector::{NetworkQualityDetector, QualityLevel, QualitySample, QualitySnapshot};
pub use error::{BoxError, HttpError};
pub use headers::HeaderStore;
pub use middleware::{
    AdaptiveMiddleware, AuthMiddleware, DefaultHeadersMiddleware, HttpMetrics, LoggingMiddleware,
    MetricsMiddleware, Middleware, MetricsSnapshot, Next, RetryMiddleware, TimeoutBehavior,
    TimeoutMiddleware, TokenProvider,
};
pub use net::{AuthorityKey, ConnectionPool, Dialer, Lease, PooledConnection, TcpDialer};
pub use request::{Request, RequestBuilder};
pub use response::Response;
pub use transport::{Http1Transport, Transport};
