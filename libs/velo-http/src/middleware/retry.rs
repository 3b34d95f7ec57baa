use super::adaptive::BACKOFF_FACTOR_KEY;
use super::{Middleware, Next};
use crate::config::{RetryPolicy, is_idempotent_method};
use crate::context::RequestContext;
use crate::error::HttpError;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

/// Application-level retries with multiplicative backoff.
///
/// Retries when the response status is 5xx or the error is retryable.
/// With `only_retry_idempotent` (the default) non-idempotent methods are
/// returned as-is on the first outcome. The backoff factor published by
/// the adaptive middleware scales each delay when present.
pub struct RetryMiddleware {
    policy: RetryPolicy,
}

impl RetryMiddleware {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    fn delay_for(&self, attempt: usize, adaptive_factor: f64) -> Duration {
        let multiplier = if self.policy.backoff_multiplier.is_finite()
            && self.policy.backoff_multiplier >= 0.0
        {
            self.policy.backoff_multiplier
        } else {
            1.0
        };
        let factor = if adaptive_factor.is_finite() && adaptive_factor > 0.0 {
            adaptive_factor
        } else {
            1.0
        };
        let mut delay = self
            .policy
            .initial_delay
            .mul_f64(multiplier.powi(attempt as i32))
            .mul_f64(factor);
        if self.policy.jitter {
            delay = delay.mul_f64(1.0 + rand::rng().random_range(0.0..0.25));
        }
        delay
    }
}

fn should_retry(outcome: &Result<Response, HttpError>) -> bool {
    match outcome {
        Ok(response) => response.status().is_server_error(),
        Err(err) => err.is_retryable(),
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    async fn handle(
        &self,
        request: Request,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<Response, HttpError> {
        let retry_allowed =
            !self.policy.only_retry_idempotent || is_idempotent_method(request.method());

        let mut attempt = 0usize;
        loop {
            let outcome = next.run(request.clone(), ctx).await;

            if attempt >= self.policy.max_retries || !retry_allowed || !should_retry(&outcome) {
                return outcome;
            }

            let factor = ctx
                .get_state::<f64>(BACKOFF_FACTOR_KEY)
                .copied()
                .unwrap_or(1.0);
            let delay = self.delay_for(attempt, factor);
            attempt += 1;

            let outcome_label = match &outcome {
                Ok(response) => response.status().to_string(),
                Err(err) => err.to_string(),
            };
            tracing::debug!(
                attempt,
                max_retries = self.policy.max_retries,
                method = %request.method(),
                host = request.uri().host().unwrap_or("unknown"),
                delay_ms = delay.as_millis() as u64,
                outcome = %outcome_label,
                "retrying request"
            );

            let cancelled = ctx.cancellation().clone();
            tokio::select! {
                biased;
                () = cancelled.cancelled() => return Err(HttpError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
