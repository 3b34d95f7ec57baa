use super::{Middleware, Next};
use crate::context::RequestContext;
use crate::error::HttpError;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use std::sync::Arc;

/// Source of bearer-style credentials. Implementations may refresh tokens
/// asynchronously; the middleware awaits them per request.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current token. An empty token means "no credentials right now" and
    /// the request proceeds without an `Authorization` header.
    async fn token(&self) -> Result<String, HttpError>;
}

/// Fixed-token provider.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, HttpError> {
        Ok(self.0.clone())
    }
}

/// Sets `Authorization: <scheme> <token>` from an injected provider.
/// A caller-supplied `Authorization` header always wins.
pub struct AuthMiddleware {
    provider: Arc<dyn TokenProvider>,
    scheme: String,
}

impl AuthMiddleware {
    /// Bearer-scheme middleware.
    #[must_use]
    pub fn bearer(provider: Arc<dyn TokenProvider>) -> Self {
        Self::with_scheme(provider, "Bearer")
    }

    #[must_use]
    pub fn with_scheme(provider: Arc<dyn TokenProvider>, scheme: impl Into<String>) -> Self {
        Self {
            provider,
            scheme: scheme.into(),
        }
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(
        &self,
        request: Request,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<Response, HttpError> {
        if request.headers().contains("authorization") {
            return next.run(request, ctx).await;
        }

        let token = self.provider.token().await?;
        if token.is_empty() {
            return next.run(request, ctx).await;
        }

        let request = request.with_header("Authorization", format!("{} {token}", self.scheme));
        ctx.update_request(request.clone());
        next.run(request, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_sets_authorization_header() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(AuthMiddleware::bearer(Arc::new(
            StaticToken("abc123".to_owned()),
        )))];
        let transport = MockTransport::ok();
        let mut ctx = context();

        run_chain(&chain, &transport, request(), &mut ctx)
            .await
            .unwrap();

        let sent = &transport.calls.lock()[0];
        assert_eq!(
            sent.headers().get_first("authorization"),
            Some("Bearer abc123")
        );
    }

    #[tokio::test]
    async fn test_empty_token_passes_through() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(AuthMiddleware::bearer(Arc::new(
            StaticToken(String::new()),
        )))];
        let transport = MockTransport::ok();
        let mut ctx = context();

        run_chain(&chain, &transport, request(), &mut ctx)
            .await
            .unwrap();

        let sent = &transport.calls.lock()[0];
        assert!(!sent.headers().contains("authorization"));
    }

    #[tokio::test]
    async fn test_caller_authorization_wins() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(AuthMiddleware::bearer(Arc::new(
            StaticToken("provider-token".to_owned()),
        )))];
        let transport = MockTransport::ok();
        let mut ctx = context();

        let req = request().with_header("Authorization", "Basic dXNlcg==");
        run_chain(&chain, &transport, req, &mut ctx).await.unwrap();

        let sent = &transport.calls.lock()[0];
        assert_eq!(
            sent.headers().get_all("authorization"),
            vec!["Basic dXNlcg=="]
        );
    }

    #[tokio::test]
    async fn test_custom_scheme() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(AuthMiddleware::with_scheme(
            Arc::new(StaticToken("key".to_owned())),
            "ApiKey",
        ))];
        let transport = MockTransport::ok();
        let mut ctx = context();

        run_chain(&chain, &transport, request(), &mut ctx)
            .await
            .unwrap();
        let sent = &transport.calls.lock()[0];
        assert_eq!(sent.headers().get_first("authorization"), Some("ApiKey key"));
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        struct FailingProvider;

        #[async_trait]
        impl TokenProvider for FailingProvider {
            async fn token(&self) -> Result<String, HttpError> {
                Err(HttpError::unknown_caused("token refresh failed", "expired"))
            }
        }

        let chain: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(AuthMiddleware::bearer(Arc::new(FailingProvider)))];
        let transport = MockTransport::ok();
        let mut ctx = context();

        let err = run_chain(&chain, &transport, request(), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Unknown { .. }));
        assert_eq!(transport.call_count(), 0);
    }
}
