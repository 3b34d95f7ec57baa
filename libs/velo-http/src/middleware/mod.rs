//! Middleware runtime and built-in middleware.
//!
//! A chain is an ordered list of middleware terminated by a transport,
//! assembled once at client construction. Request traversal runs the list
//! front to back; response traversal unwinds back to front. Middleware may
//! rewrite the request before forwarding (recording the update in the
//! context), observe or replace the response, or short-circuit.

mod adaptive;
mod auth;
mod default_headers;
mod logging;
mod metrics;
mod retry;
mod timeout;

pub use adaptive::AdaptiveMiddleware;
pub use auth::{AuthMiddleware, TokenProvider};
pub use default_headers::DefaultHeadersMiddleware;
pub use logging::LoggingMiddleware;
pub use metrics::{HttpMetrics, MetricsMiddleware, MetricsSnapshot};
pub use retry::RetryMiddleware;
pub use timeout::{TimeoutBehavior, TimeoutMiddleware};

use crate::context::RequestContext;
use crate::error::HttpError;
use crate::request::Request;
use crate::response::Response;
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::Arc;

/// One stage of the request pipeline.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Process `request`, calling `next.run(..)` to invoke the remainder
    /// of the chain (middleware that follow, then the transport).
    async fn handle(
        &self,
        request: Request,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<Response, HttpError>;
}

/// The remainder of a middleware chain plus its terminal transport.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Middleware>], transport: &'a dyn Transport) -> Self {
        Self { chain, transport }
    }

    /// Run the remainder of the chain.
    pub async fn run(
        self,
        request: Request,
        ctx: &mut RequestContext,
    ) -> Result<Response, HttpError> {
        match self.chain.split_first() {
            Some((head, rest)) => {
                head.handle(
                    request,
                    ctx,
                    Next {
                        chain: rest,
                        transport: self.transport,
                    },
                )
                .await
            }
            None => self.transport.send(&request, ctx).await,
        }
    }
}
