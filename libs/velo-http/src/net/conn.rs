use crate::codec::default_port;
use crate::error::HttpError;
use bytes::BytesMut;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// Pooling scope: `(host, port, tls)` with ASCII-case-insensitive host
/// equality (the host is lowercased on construction) and default-port
/// normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthorityKey {
    host: String,
    port: u16,
    tls: bool,
}

impl AuthorityKey {
    #[must_use]
    pub fn new(host: &str, port: u16, tls: bool) -> Self {
        Self {
            host: host.to_ascii_lowercase(),
            port,
            tls,
        }
    }

    /// Derive the key from an absolute request URI.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::InvalidRequest`] when the URI has no host.
    pub fn from_uri(uri: &http::Uri) -> Result<Self, HttpError> {
        let host = uri
            .host()
            .ok_or_else(|| HttpError::invalid_request("request URI has no host"))?;
        let tls = uri.scheme_str() == Some("https");
        let port = uri.port_u16().unwrap_or_else(|| default_port(uri));
        Ok(Self::new(host, port, tls))
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn tls(&self) -> bool {
        self.tls
    }
}

impl std::fmt::Display for AuthorityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Plain or TLS-wrapped connection stream.
pub(crate) enum ConnStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl ConnStream {
    fn tcp_ref(&self) -> &TcpStream {
        match self {
            Self::Plain(s) => s,
            Self::Tls(s) => s.get_ref().0,
        }
    }
}

impl AsyncRead for ConnStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// One pooled connection: exclusively owned by a lease while in use,
/// shared only with the pool's idle queue between uses.
pub struct PooledConnection {
    key: AuthorityKey,
    stream: Option<ConnStream>,
    /// Parser read buffer. Leftover bytes from a previous exchange stay
    /// here; a non-empty buffer at liveness-check time means the peer sent
    /// unsolicited data and the connection is no longer clean.
    pub(crate) read_buf: BytesMut,
    last_used: Instant,
    reused: bool,
    tls_version: Option<String>,
    alpn: Option<String>,
}

impl PooledConnection {
    pub(crate) fn new(key: AuthorityKey, stream: ConnStream) -> Self {
        Self {
            key,
            stream: Some(stream),
            read_buf: BytesMut::new(),
            last_used: Instant::now(),
            reused: false,
            tls_version: None,
            alpn: None,
        }
    }

    #[must_use]
    pub fn key(&self) -> &AuthorityKey {
        &self.key
    }

    /// True iff this connection came out of the idle queue rather than a
    /// fresh dial. Drives the transport's retry-on-stale decision.
    #[must_use]
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub(crate) fn mark_reused(&mut self) {
        self.reused = true;
    }

    pub(crate) fn set_tls_session(&mut self, version: String, alpn: Option<String>) {
        self.tls_version = Some(version);
        self.alpn = alpn;
    }

    /// Negotiated TLS protocol version, when the stream is TLS-wrapped.
    #[must_use]
    pub fn negotiated_tls_version(&self) -> Option<&str> {
        self.tls_version.as_deref()
    }

    /// Negotiated ALPN protocol, when one was agreed at handshake.
    #[must_use]
    pub fn negotiated_alpn(&self) -> Option<&str> {
        self.alpn.as_deref()
    }

    pub(crate) fn stream_mut(&mut self) -> Result<&mut ConnStream, HttpError> {
        self.stream
            .as_mut()
            .ok_or_else(|| HttpError::network("connection already disposed"))
    }

    /// Borrow the stream and the parser read buffer together.
    pub(crate) fn io_parts(&mut self) -> Result<(&mut ConnStream, &mut BytesMut), HttpError> {
        match &mut self.stream {
            Some(stream) => Ok((stream, &mut self.read_buf)),
            None => Err(HttpError::network("connection already disposed")),
        }
    }

    /// Stamp the last-used instant (called when re-entering the idle queue).
    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Time spent idle since the last use.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Drop the underlying stream, closing the socket. Idempotent.
    pub fn dispose(&mut self) {
        self.stream = None;
    }

    /// Best-effort liveness check.
    ///
    /// Never touches the kernel after disposal. A probe that observes EOF
    /// or stray bytes reports dead (the connection is then discarded, so a
    /// consumed stray byte is harmless); only a clean would-block reports
    /// alive. TLS streams may hold buffered plaintext this probe cannot
    /// see, so the transport's retry-on-stale remains the authoritative
    /// safety net.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        let Some(stream) = &self.stream else {
            return false;
        };
        if !self.read_buf.is_empty() {
            return false;
        }
        let mut probe = [0u8; 1];
        match stream.tcp_ref().try_read(&mut probe) {
            Ok(_) => false,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => true,
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("key", &self.key)
            .field("reused", &self.reused)
            .field("disposed", &self.stream.is_none())
            .field("tls_version", &self.tls_version)
            .field("alpn", &self.alpn)
            .finish()
    }
}
