use super::{Middleware, Next};
use crate::config::AdaptivePolicy;
use crate::context::RequestContext;
use crate::detector::{NetworkQualityDetector, QualityLevel, QualitySample};
use crate::error::HttpError;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Context state key: adapted concurrency hint (`usize`).
pub const CONCURRENCY_HINT_KEY: &str = "adaptive.concurrency_hint";
/// Context state key: retry backoff scale factor (`f64`).
pub const BACKOFF_FACTOR_KEY: &str = "adaptive.backoff_factor";
/// Context state key: cache preference (`&'static str`).
pub const CACHE_PREFERENCE_KEY: &str = "adaptive.cache_preference";

/// Per-quality-level adjustments.
struct Adjustment {
    timeout_factor: f64,
    concurrency_delta: i64,
    backoff_factor: f64,
    cache_preference: &'static str,
}

fn adjustment(level: QualityLevel) -> Adjustment {
    match level {
        QualityLevel::Excellent => Adjustment {
            timeout_factor: 0.8,
            concurrency_delta: 1,
            backoff_factor: 0.8,
            cache_preference: "normal",
        },
        QualityLevel::Good => Adjustment {
            timeout_factor: 1.0,
            concurrency_delta: 0,
            backoff_factor: 1.0,
            cache_preference: "normal",
        },
        QualityLevel::Fair => Adjustment {
            timeout_factor: 1.5,
            concurrency_delta: -1,
            backoff_factor: 1.5,
            cache_preference: "prefer-cached",
        },
        QualityLevel::Poor => Adjustment {
            timeout_factor: 2.0,
            concurrency_delta: -2,
            backoff_factor: 2.5,
            cache_preference: "strongly-prefer-cached",
        },
    }
}

/// Adjusts per-request timeout, concurrency hint, and retry backoff from
/// the quality detector's snapshot, and feeds a sample back on completion.
///
/// Explicitly set request fields are never adapted. A cold detector
/// (no samples) behaves like `Good`: baseline values throughout.
pub struct AdaptiveMiddleware {
    policy: AdaptivePolicy,
    detector: Arc<NetworkQualityDetector>,
}

impl AdaptiveMiddleware {
    #[must_use]
    pub fn new(policy: AdaptivePolicy, detector: Arc<NetworkQualityDetector>) -> Self {
        Self { policy, detector }
    }

    /// The detector this middleware reads and feeds.
    #[must_use]
    pub fn detector(&self) -> &Arc<NetworkQualityDetector> {
        &self.detector
    }
}

#[async_trait]
impl Middleware for AdaptiveMiddleware {
    async fn handle(
        &self,
        request: Request,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<Response, HttpError> {
        let snapshot = self.detector.snapshot();
        let adjust = adjustment(snapshot.level);

        let mut request = request;
        if request.timeout().is_none() {
            let adapted = self
                .policy
                .baseline_timeout
                .mul_f64(adjust.timeout_factor)
                .clamp(self.policy.min_timeout, self.policy.max_timeout);
            request = request.with_timeout(adapted);
            tracing::trace!(
                level = ?snapshot.level,
                timeout_ms = adapted.as_millis() as u64,
                "adapted request timeout"
            );
        }

        let hint = (self.policy.baseline_concurrency as i64 + adjust.concurrency_delta).max(1);
        ctx.set_state(CONCURRENCY_HINT_KEY, hint as usize);
        ctx.set_state(BACKOFF_FACTOR_KEY, adjust.backoff_factor);
        ctx.set_state(CACHE_PREFERENCE_KEY, adjust.cache_preference);
        ctx.update_request(request.clone());

        let started = Instant::now();
        let result = next.run(request, ctx).await;
        let total = started.elapsed();

        let sample = match &result {
            // An empty body is still a success.
            Ok(response) => QualitySample {
                latency: total,
                total_duration: total,
                timed_out: false,
                transport_failure: false,
                bytes_transferred: response.body().len() as u64,
                success: true,
            },
            Err(err) => QualitySample {
                latency: total,
                total_duration: total,
                timed_out: matches!(err, HttpError::Timeout { .. }),
                transport_failure: matches!(err, HttpError::Network { .. }),
                bytes_transferred: 0,
                success: false,
            },
        };
        self.detector.record(sample);

        result
    }
}
