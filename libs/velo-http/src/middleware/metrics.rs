use super::{Middleware, Next};
use crate::context::RequestContext;
use crate::error::HttpError;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Atomic request counters shared between the middleware and its owner.
#[derive(Debug, Default)]
pub struct HttpMetrics {
    requests_total: AtomicU64,
    requests_success: AtomicU64,
    requests_failed: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    response_time_micros: AtomicU64,
    response_count: AtomicU64,
    per_host: DashMap<String, u64>,
    per_status: DashMap<u16, u64>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_failed: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub average_response_time: Duration,
}

impl HttpMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record_success(&self, host: &str, status: u16, sent: u64, received: u64, elapsed: Duration) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_success.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(sent, Ordering::Relaxed);
        self.bytes_received.fetch_add(received, Ordering::Relaxed);
        self.response_time_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.response_count.fetch_add(1, Ordering::Relaxed);
        *self.per_host.entry(host.to_owned()).or_insert(0) += 1;
        *self.per_status.entry(status).or_insert(0) += 1;
    }

    fn record_failure(&self, host: &str, sent: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(sent, Ordering::Relaxed);
        *self.per_host.entry(host.to_owned()).or_insert(0) += 1;
    }

    /// Requests observed for `host`.
    #[must_use]
    pub fn requests_for_host(&self, host: &str) -> u64 {
        self.per_host.get(host).map_or(0, |c| *c)
    }

    /// Responses observed with `status`.
    #[must_use]
    pub fn responses_with_status(&self, status: u16) -> u64 {
        self.per_status.get(&status).map_or(0, |c| *c)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let count = self.response_count.load(Ordering::Relaxed);
        let total_micros = self.response_time_micros.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success: self.requests_success.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            average_response_time: if count == 0 {
                Duration::ZERO
            } else {
                Duration::from_micros(total_micros / count)
            },
        }
    }
}

/// Counts requests, bytes, per-host and per-status totals, and a running
/// average response time. Failures are counted before the error
/// propagates.
pub struct MetricsMiddleware {
    metrics: Arc<HttpMetrics>,
}

impl MetricsMiddleware {
    #[must_use]
    pub fn new(metrics: Arc<HttpMetrics>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    async fn handle(
        &self,
        request: Request,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<Response, HttpError> {
        let host = request.uri().host().unwrap_or("unknown").to_owned();
        let sent = request.body().map_or(0, |b| b.len() as u64);

        match next.run(request, ctx).await {
            Ok(response) => {
                self.metrics.record_success(
                    &host,
                    response.status().as_u16(),
                    sent,
                    response.body().len() as u64,
                    response.elapsed(),
                );
                Ok(response)
            }
            Err(err) => {
                self.metrics.record_failure(&host, sent);
                Err(err)
            }
        }
    }
}
