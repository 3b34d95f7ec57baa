use super::{Middleware, Next};
use crate::context::RequestContext;
use crate::error::HttpError;
use crate::headers::HeaderStore;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;

/// Merges client-wide default headers into each request.
///
/// By default a header the caller already set is left alone; with
/// `override_existing` the default wins.
pub struct DefaultHeadersMiddleware {
    defaults: HeaderStore,
    override_existing: bool,
}

impl DefaultHeadersMiddleware {
    #[must_use]
    pub fn new(defaults: HeaderStore) -> Self {
        Self {
            defaults,
            override_existing: false,
        }
    }

    /// Make the defaults win over caller-supplied values.
    #[must_use]
    pub fn overriding(defaults: HeaderStore) -> Self {
        Self {
            defaults,
            override_existing: true,
        }
    }
}

#[async_trait]
impl Middleware for DefaultHeadersMiddleware {
    async fn handle(
        &self,
        request: Request,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<Response, HttpError> {
        let mut merged = request.headers().clone();
        for (name, value) in self.defaults.iter() {
            if self.override_existing {
                merged.set(name, value);
            } else if !merged.contains(name) {
                merged.append(name, value);
            }
        }

        let request = request.with_headers(merged);
        ctx.update_request(request.clone());
        next.run(request, ctx).await
    }
}
