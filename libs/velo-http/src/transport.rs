//! HTTP/1.1 transport: the terminal stage of the middleware chain.
//!
//! `send` acquires a lease from the pool, serializes the request, parses
//! the response, and returns the connection to the pool when the response
//! permits keep-alive. A reused connection that fails with a low-level I/O
//! error is retried exactly once on a fresh connection, for idempotent
//! methods only.

use crate::codec;
use crate::config::{CodecLimits, is_idempotent_method};
use crate::context::RequestContext;
use crate::error::HttpError;
use crate::net::{AuthorityKey, ConnectionPool, Lease};
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Terminal request handler at the end of the middleware chain.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute the request and produce a response.
    ///
    /// HTTP status codes are not errors; only transport, timeout,
    /// cancellation, TLS, and request-validation failures are.
    async fn send(
        &self,
        request: &Request,
        ctx: &mut RequestContext,
    ) -> Result<Response, HttpError>;
}

/// Pooled HTTP/1.1 transport.
pub struct Http1Transport {
    pool: ConnectionPool,
    limits: CodecLimits,
    user_agent: String,
    default_timeout: Duration,
}

impl Http1Transport {
    #[must_use]
    pub fn new(
        pool: ConnectionPool,
        limits: CodecLimits,
        user_agent: String,
        default_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            limits,
            user_agent,
            default_timeout,
        }
    }

    /// The pool backing this transport.
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// One lease acquisition plus at most one stale retry.
    async fn exchange_with_retry(
        &self,
        request: &Request,
        ctx: &mut RequestContext,
        ct: &CancellationToken,
    ) -> Result<Response, HttpError> {
        // Serialize before any socket I/O: a malformed request must fail
        // without dialing, and the retry path reuses the same bytes.
        let wire = codec::serialize_request(request, &self.user_agent)?;
        let key = AuthorityKey::from_uri(request.uri())?;
        ctx.record_event_with("TransportConnecting", key.to_string());

        let mut lease = self.pool.acquire(&key, ct).await?;
        let reused = lease.is_reused();

        match self.exchange(&wire, request, ctx, &mut lease).await {
            Ok(response) => Ok(response),
            Err(err) => {
                lease.dispose();
                drop(lease);

                // Retry-on-stale: exactly once, only for a low-level I/O
                // failure on a recycled connection, and only for
                // idempotent methods. Everything else propagates as-is.
                if reused && err.is_io() && is_idempotent_method(request.method()) {
                    tracing::debug!(
                        authority = %key,
                        method = %request.method(),
                        error = %err,
                        "stale pooled connection; retrying once on a fresh connection"
                    );
                    ctx.record_event("TransportRetryStale");
                    let mut fresh = self.pool.acquire(&key, ct).await?;
                    return self.exchange(&wire, request, ctx, &mut fresh).await;
                }
                Err(err)
            }
        }
    }

    /// Serialize, send, and parse over one leased connection. On success
    /// the connection is returned to the pool iff the response allows
    /// keep-alive; on failure the caller disposes the lease.
    async fn exchange(
        &self,
        wire: &[u8],
        request: &Request,
        ctx: &mut RequestContext,
        lease: &mut Lease,
    ) -> Result<Response, HttpError> {
        ctx.record_event("TransportSending");
        {
            let stream = lease.connection()?.stream_mut()?;
            stream
                .write_all(wire)
                .await
                .map_err(|e| HttpError::io("write request", e))?;
            stream
                .flush()
                .await
                .map_err(|e| HttpError::io("flush request", e))?;
        }

        ctx.record_event("TransportReceiving");
        let head_request = *request.method() == http::Method::HEAD;
        let parsed = {
            let (stream, read_buf) = lease.connection()?.io_parts()?;
            codec::parse_response(stream, read_buf, &self.limits, head_request).await?
        };

        if parsed.keep_alive {
            lease.return_to_pool();
        }
        ctx.record_event("TransportComplete");

        tracing::debug!(
            method = %request.method(),
            uri = %request.uri(),
            status = parsed.status.as_u16(),
            elapsed_ms = ctx.elapsed().as_millis() as u64,
            keep_alive = parsed.keep_alive,
            "request complete"
        );

        Ok(Response::new(
            parsed.status,
            parsed.headers,
            parsed.body,
            ctx.elapsed(),
            ctx.request().clone(),
        ))
    }
}

#[async_trait]
impl Transport for Http1Transport {
    /// Error classification is load-bearing here: failures that are
    /// already typed [`HttpError`]s (pool, TLS, codec) pass through
    /// unchanged; the deadline arm raises `Timeout` only when the caller's
    /// token did not fire; raw I/O is wrapped as `Network` at the point it
    /// occurs, never re-wrapped.
    async fn send(
        &self,
        request: &Request,
        ctx: &mut RequestContext,
    ) -> Result<Response, HttpError> {
        match request.uri().scheme_str() {
            Some("http") | Some("https") => {}
            other => {
                return Err(HttpError::invalid_request(format!(
                    "unsupported URI scheme {other:?}; only http and https are supported"
                )));
            }
        }
        if request.uri().host().is_none() {
            return Err(HttpError::invalid_request(
                "request URI must be absolute (missing host)",
            ));
        }

        ctx.update_request(request.clone());
        ctx.record_event("TransportStart");

        let timeout = request.timeout().unwrap_or(self.default_timeout);
        let caller_ct = ctx.cancellation().clone();

        // Dropping the exchange future on the deadline or cancellation arm
        // aborts every in-flight await (connect, handshake, pool wait,
        // read/write); the dropped lease disposes its socket and releases
        // its permit.
        tokio::select! {
            biased;
            () = caller_ct.cancelled() => Err(HttpError::Cancelled),
            () = tokio::time::sleep(timeout) => Err(HttpError::Timeout { after: timeout }),
            result = self.exchange_with_retry(request, ctx, &caller_ct) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HappyEyeballsConfig, PoolConfig, TlsConfig, TlsProvider};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// What a scripted server connection does after reading each request.
    #[derive(Clone)]
    enum Step {
        Respond(&'static [u8]),
        CloseWithoutResponse,
    }

    /// Serve scripted connections: each inner vec drives one accepted
    /// connection, one step per received request.
    async fn scripted_server(connections: Vec<Vec<Step>>) -> (u16, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepts = Arc::new(AtomicUsize::new(0));
        let accepts2 = accepts.clone();

        tokio::spawn(async move {
            for script in connections {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                accepts2.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    for step in script {
                        if read_request(&mut socket).await.is_none() {
                            return;
                        }
                        match step {
                            Step::Respond(bytes) => {
                                if socket.write_all(bytes).await.is_err() {
                                    return;
                                }
                            }
                            Step::CloseWithoutResponse => return,
                        }
                    }
                    // Script exhausted: hold the connection open (reading
                    // and discarding) until the peer closes. An empty
                    // script is a server that accepts but never responds.
                    let mut sink = [0u8; 256];
                    loop {
                        match socket.read(&mut sink).await {
                            Ok(0) | Err(_) => return,
                            Ok(_) => {}
                        }
                    }
                });
            }
        });

        (port, accepts)
    }

    /// Read one full request (headers plus any Content-Length body).
    async fn read_request(socket: &mut TcpStream) -> Option<Vec<u8>> {
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        let header_end = loop {
            if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return None,
                Ok(n) => data.extend_from_slice(&buf[..n]),
            }
        };

        let head = String::from_utf8_lossy(&data[..header_end]).to_ascii_lowercase();
        let body_len = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while data.len() < header_end + body_len {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return None,
                Ok(n) => data.extend_from_slice(&buf[..n]),
            }
        }
        Some(data)
    }

    fn transport() -> Http1Transport {
        let pool = ConnectionPool::new(
            PoolConfig::default(),
            HappyEyeballsConfig::default(),
            TlsConfig {
                provider: TlsProvider::BundledOnly,
                ..TlsConfig::default()
            },
        )
        .unwrap();
        Http1Transport::new(
            pool,
            CodecLimits::default(),
            "velo-test/1.0".to_owned(),
            Duration::from_secs(5),
        )
    }

    fn get(port: u16, path: &str) -> Request {
        Request::new(
            http::Method::GET,
            format!("http://127.0.0.1:{port}{path}").parse().unwrap(),
        )
    }

    fn ctx_for(request: &Request) -> RequestContext {
        RequestContext::new(request.clone(), None)
    }

    const OK_BODY: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";

    #[tokio::test]
    async fn test_simple_get() {
        let (port, _) = scripted_server(vec![vec![Step::Respond(OK_BODY)]]).await;
        let transport = transport();
        let request = get(port, "/");
        let mut ctx = ctx_for(&request);

        let response = transport.send(&request, &mut ctx).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(&response.body()[..], b"hello");

        let names: Vec<_> = ctx.timeline().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "TransportStart",
                "TransportConnecting",
                "TransportSending",
                "TransportReceiving",
                "TransportComplete"
            ]
        );
    }

    #[tokio::test]
    async fn test_chunked_response_via_transport() {
        let (port, _) = scripted_server(vec![vec![Step::Respond(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
        )]])
        .await;
        let transport = transport();
        let request = get(port, "/");
        let mut ctx = ctx_for(&request);

        let response = transport.send(&request, &mut ctx).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(&response.body()[..], b"hello");
    }

    #[tokio::test]
    async fn test_keep_alive_reuses_connection() {
        let (port, accepts) =
            scripted_server(vec![vec![Step::Respond(OK_BODY), Step::Respond(OK_BODY)]]).await;
        let transport = transport();

        for _ in 0..2 {
            let request = get(port, "/");
            let mut ctx = ctx_for(&request);
            let response = transport.send(&request, &mut ctx).await.unwrap();
            assert_eq!(response.status(), http::StatusCode::OK);
        }
        assert_eq!(accepts.load(Ordering::SeqCst), 1, "one connection for both");
    }

    #[tokio::test]
    async fn test_connection_close_is_not_pooled() {
        let (port, accepts) = scripted_server(vec![
            vec![Step::Respond(
                b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 2\r\n\r\nok",
            )],
            vec![Step::Respond(OK_BODY)],
        ])
        .await;
        let transport = transport();

        for _ in 0..2 {
            let request = get(port, "/");
            let mut ctx = ctx_for(&request);
            transport.send(&request, &mut ctx).await.unwrap();
        }
        assert_eq!(accepts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stale_get_retries_once() {
        // Connection 1 serves the priming request, then closes without
        // responding to the next one. Connection 2 serves the retry.
        let (port, accepts) = scripted_server(vec![
            vec![Step::Respond(OK_BODY), Step::CloseWithoutResponse],
            vec![Step::Respond(OK_BODY)],
        ])
        .await;
        let transport = transport();

        // Prime the pool with a keep-alive connection.
        let request = get(port, "/");
        let mut ctx = ctx_for(&request);
        transport.send(&request, &mut ctx).await.unwrap();

        // The reused connection dies mid-exchange; the GET retries once.
        let request = get(port, "/again");
        let mut ctx = ctx_for(&request);
        let response = transport.send(&request, &mut ctx).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(accepts.load(Ordering::SeqCst), 2, "priming + one retry dial");
        assert!(
            ctx.timeline().iter().any(|e| e.name == "TransportRetryStale"),
            "retry must be recorded on the timeline"
        );
    }

    #[tokio::test]
    async fn test_stale_post_does_not_retry() {
        let (port, accepts) = scripted_server(vec![
            vec![Step::Respond(OK_BODY), Step::CloseWithoutResponse],
            vec![Step::Respond(OK_BODY)],
        ])
        .await;
        let transport = transport();

        let request = get(port, "/");
        let mut ctx = ctx_for(&request);
        transport.send(&request, &mut ctx).await.unwrap();

        let request = Request::new(
            http::Method::POST,
            format!("http://127.0.0.1:{port}/submit").parse().unwrap(),
        )
        .with_body(Bytes::from_static(b"payload"));
        let mut ctx = ctx_for(&request);
        let err = transport.send(&request, &mut ctx).await.unwrap_err();

        assert!(matches!(err, HttpError::Network { .. }));
        assert_eq!(
            accepts.load(Ordering::SeqCst),
            1,
            "non-idempotent requests never retry on stale connections"
        );
    }

    #[tokio::test]
    async fn test_error_statuses_are_responses_not_errors() {
        let (port, _) = scripted_server(vec![vec![Step::Respond(
            b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\n\r\noops",
        )]])
        .await;
        let transport = transport();
        let request = get(port, "/");
        let mut ctx = ctx_for(&request);

        let response = transport.send(&request, &mut ctx).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(&response.body()[..], b"oops", "bodies survive error statuses");
    }

    #[tokio::test]
    async fn test_timeout_raises_timeout_kind() {
        // Server accepts but never responds.
        let (port, _) = scripted_server(vec![vec![]]).await;
        let transport = transport();
        let request = get(port, "/").with_timeout(Duration::from_millis(80));
        let mut ctx = ctx_for(&request);

        let err = transport.send(&request, &mut ctx).await.unwrap_err();
        assert!(matches!(err, HttpError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_caller_cancellation_wins_over_timeout() {
        let (port, _) = scripted_server(vec![vec![]]).await;
        let transport = transport();
        let request = get(port, "/").with_timeout(Duration::from_secs(10));

        let ct = CancellationToken::new();
        let cancel = ct.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        });
        let mut ctx = RequestContext::new(request.clone(), Some(ct));

        let err = transport.send(&request, &mut ctx).await.unwrap_err();
        assert!(matches!(err, HttpError::Cancelled));
    }

    #[tokio::test]
    async fn test_permits_restored_after_timeout() {
        let (port, _) = scripted_server(vec![vec![], vec![], vec![]]).await;
        let transport = transport();
        let key = AuthorityKey::new("127.0.0.1", port, false);

        for _ in 0..3 {
            let request = get(port, "/").with_timeout(Duration::from_millis(40));
            let mut ctx = ctx_for(&request);
            let _ = transport.send(&request, &mut ctx).await;
        }
        // Give dropped leases a beat to run their drops.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            transport.pool().available_permits(&key),
            Some(6),
            "every timed-out attempt must release its permit"
        );
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let transport = transport();
        let request = Request::new(http::Method::GET, "ftp://example.com/".parse().unwrap());
        let mut ctx = ctx_for(&request);
        let err = transport.send(&request, &mut ctx).await.unwrap_err();
        assert!(matches!(err, HttpError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_rejects_relative_uri() {
        let transport = transport();
        let request = Request::new(http::Method::GET, http::Uri::from_static("/relative/path"));
        let mut ctx = ctx_for(&request);
        let err = transport.send(&request, &mut ctx).await.unwrap_err();
        assert!(matches!(err, HttpError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_header_crlf_fails_before_any_io() {
        let transport = transport();
        // Unconnectable port: serialization happens before dialing, so the
        // failure must be InvalidRequest, not a connect error.
        let request = get(1, "/").with_header("x-bad", "bad\r\nvalue");
        let mut ctx = ctx_for(&request);
        let err = transport.send(&request, &mut ctx).await.unwrap_err();
        assert!(matches!(err, HttpError::InvalidRequest { .. }));

        let request = get(1, "/").with_header("Bad:Name", "v");
        let mut ctx = ctx_for(&request);
        let err = transport.send(&request, &mut ctx).await.unwrap_err();
        assert!(matches!(err, HttpError::InvalidRequest { .. }));
    }
}
