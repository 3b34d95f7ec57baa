use std::time::Duration;
use thiserror::Error;

/// Boxed error type used for underlying causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// HTTP client error taxonomy.
///
/// This is a closed set: every failure the client can surface maps onto
/// exactly one of these kinds. Collaborator errors are wrapped once at the
/// boundary where they enter the library; an error that is already an
/// `HttpError` must pass through unchanged (the transport's catch order
/// guarantees this).
#[derive(Error, Debug)]
pub enum HttpError {
    /// The request is malformed and was rejected before any socket I/O
    /// (bad URI, invalid header bytes, body/Content-Length mismatch).
    #[error("invalid request: {message}")]
    InvalidRequest {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Transport-level failure: connect, read/write, or malformed framing
    /// from the peer.
    #[error("network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The per-request deadline elapsed before the caller cancelled.
    #[error("request timed out after {after:?}")]
    Timeout { after: Duration },

    /// The caller's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,

    /// TLS handshake or certificate validation failure, including a
    /// negotiated protocol version below the supported minimum.
    #[error("certificate error: {message}")]
    Certificate {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Anything that escaped the other classifications.
    #[error("unexpected error: {message}")]
    Unknown {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl HttpError {
    /// Build an [`HttpError::InvalidRequest`] from a message.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            source: None,
        }
    }

    /// Build an [`HttpError::Network`] from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Build an [`HttpError::Network`] carrying an underlying cause.
    pub fn network_caused(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Wrap a raw I/O error. The original error is preserved as the source
    /// so the transport can recognize stale-connection failures.
    pub fn io(context: impl Into<String>, err: std::io::Error) -> Self {
        Self::Network {
            message: context.into(),
            source: Some(Box::new(err)),
        }
    }

    /// Build an [`HttpError::Certificate`] from a message.
    pub fn certificate(message: impl Into<String>) -> Self {
        Self::Certificate {
            message: message.into(),
            source: None,
        }
    }

    /// Build an [`HttpError::Certificate`] carrying an underlying cause.
    pub fn certificate_caused(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Certificate {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Build an [`HttpError::Unknown`] carrying an underlying cause.
    pub fn unknown_caused(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Unknown {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Whether the application layer may retry the request.
    ///
    /// Only transport failures and deadline expiries are retryable.
    /// `Cancelled`, `Certificate`, and `InvalidRequest` are final.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }

    /// Whether this is a low-level I/O failure (as opposed to a protocol
    /// violation). The transport's retry-on-stale path only triggers for
    /// I/O failures on reused connections.
    pub(crate) fn is_io(&self) -> bool {
        match self {
            Self::Network {
                source: Some(source),
                ..
            } => source.is::<std::io::Error>(),
            _ => false,
        }
    }
}
