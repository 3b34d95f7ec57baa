use super::{Middleware, Next};
use crate::context::RequestContext;
use crate::error::HttpError;
use crate::headers::HeaderStore;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// What the timeout middleware does when the deadline expires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeoutBehavior {
    /// Raise [`HttpError::Timeout`] (canonical).
    #[default]
    Raise,
    /// Synthesize a 408 response carrying the `Timeout` error in the
    /// response error slot, for chains that prefer a response-shaped
    /// outcome.
    Synthesize408,
}

/// Bounds the remainder of the chain with an additional deadline.
///
/// The transport is the canonical deadline authority; this middleware is
/// for chains where the transport is not (custom transports, tests). The
/// effective deadline is the request's explicit timeout when set,
/// otherwise this middleware's default. The transport's own deadline is
/// never double-counted: whichever fires first wins.
pub struct TimeoutMiddleware {
    default_timeout: Duration,
    behavior: TimeoutBehavior,
}

impl TimeoutMiddleware {
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            behavior: TimeoutBehavior::Raise,
        }
    }

    #[must_use]
    pub fn with_behavior(default_timeout: Duration, behavior: TimeoutBehavior) -> Self {
        Self {
            default_timeout,
            behavior,
        }
    }
}

#[async_trait]
impl Middleware for TimeoutMiddleware {
    async fn handle(
        &self,
        request: Request,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<Response, HttpError> {
        let timeout = request.timeout().unwrap_or(self.default_timeout);

        match tokio::time::timeout(timeout, next.run(request, ctx)).await {
            Ok(result) => result,
            Err(_) => {
                ctx.record_event_with("TimeoutMiddlewareExpired", format!("{timeout:?}"));
                match self.behavior {
                    TimeoutBehavior::Raise => Err(HttpError::Timeout { after: timeout }),
                    TimeoutBehavior::Synthesize408 => Ok(Response::new(
                        http::StatusCode::REQUEST_TIMEOUT,
                        HeaderStore::new(),
                        Bytes::new(),
                        ctx.elapsed(),
                        ctx.request().clone(),
                    )
                    .with_error(HttpError::Timeout { after: timeout })),
                }
            }
        }
    }
}
