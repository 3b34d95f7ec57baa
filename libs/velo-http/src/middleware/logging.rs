use super::{Middleware, Next};
use crate::config::LogLevel;
use crate::context::RequestContext;
use crate::error::HttpError;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;

/// Bound on the response body preview at `LogLevel::Detailed`.
const BODY_PREVIEW_LIMIT: usize = 256;

/// Level-gated request/response logging over `tracing`.
///
/// Header values never appear in events (values may carry credentials);
/// `Detailed` logs header names and a bounded body preview only.
pub struct LoggingMiddleware {
    level: LogLevel,
}

impl LoggingMiddleware {
    #[must_use]
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }
}

fn header_names(request: &Request) -> String {
    request
        .headers()
        .iter()
        .map(|(name, _)| name)
        .collect::<Vec<_>>()
        .join(",")
}

fn body_preview(response: &Response) -> String {
    let body = response.body();
    let preview = &body[..body.len().min(BODY_PREVIEW_LIMIT)];
    String::from_utf8_lossy(preview).into_owned()
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(
        &self,
        request: Request,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<Response, HttpError> {
        if self.level == LogLevel::Off {
            return next.run(request, ctx).await;
        }

        let method = request.method().clone();
        let uri = request.uri().clone();

        if self.level >= LogLevel::Standard {
            if self.level == LogLevel::Detailed {
                tracing::debug!(
                    %method,
                    %uri,
                    headers = %header_names(&request),
                    body_bytes = request.body().map_or(0, bytes::Bytes::len),
                    "request starting"
                );
            } else {
                tracing::debug!(%method, %uri, "request starting");
            }
        }

        let result = next.run(request, ctx).await;
        let elapsed_ms = ctx.elapsed().as_millis() as u64;

        match &result {
            Ok(response) => {
                if self.level == LogLevel::Detailed {
                    tracing::debug!(
                        %method,
                        %uri,
                        status = response.status().as_u16(),
                        elapsed_ms,
                        body_preview = %body_preview(response),
                        "request complete"
                    );
                } else {
                    tracing::info!(
                        %method,
                        %uri,
                        status = response.status().as_u16(),
                        elapsed_ms,
                        "request complete"
                    );
                }
            }
            Err(error) => {
                tracing::warn!(%method, %uri, %error, elapsed_ms, "request failed");
            }
        }
        result
    }
}
