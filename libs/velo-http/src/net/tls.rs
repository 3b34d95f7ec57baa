//! TLS wrapping for pooled connections.
//!
//! Trust roots come from the system store, the bundled webpki set, or an
//! automatic selection that prefers the system store and falls back to the
//! bundle only when the system store is unavailable or empty (a capability
//! gap). The selector never falls back after an authentication or
//! certificate validation failure — those abort the request.
//!
//! Certificate revocation checking is disabled; this is a documented
//! limitation of the client.

use crate::config::{TlsConfig, TlsProvider};
use crate::error::HttpError;
use rustls_pki_types::{CertificateDer, ServerName};
use std::sync::{Arc, OnceLock};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::sync::CancellationToken;

/// Cached system root certificates. Loading the OS store can be slow on
/// some platforms, so it happens at most once per process.
static SYSTEM_ROOTS: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

fn system_root_certs() -> &'static [CertificateDer<'static>] {
    SYSTEM_ROOTS
        .get_or_init(|| {
            let result = rustls_native_certs::load_native_certs();
            for err in &result.errors {
                tracing::warn!(error = %err, "error loading system root certificate");
            }
            if result.certs.is_empty() {
                tracing::warn!("no system root CA certificates found");
            } else {
                tracing::debug!(count = result.certs.len(), "loaded system root certificates");
            }
            result.certs
        })
        .as_slice()
}

/// Crypto provider selection, following the reqwest pattern: respect a
/// globally installed default, otherwise use aws-lc-rs without installing
/// it globally.
fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn system_root_store() -> Result<rustls::RootCertStore, HttpError> {
    let certs = system_root_certs();
    if certs.is_empty() {
        return Err(HttpError::certificate(
            "no root CA certificates available from the system trust store",
        ));
    }

    let mut store = rustls::RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some system root certificates could not be parsed");
    }
    if added == 0 {
        return Err(HttpError::certificate(
            "no system root CA certificates could be parsed",
        ));
    }
    Ok(store)
}

fn bundled_root_store() -> rustls::RootCertStore {
    rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    }
}

/// Metadata reported by a completed handshake.
#[derive(Debug, Clone)]
pub(crate) struct TlsSession {
    pub version: String,
    pub alpn: Option<String>,
    pub cipher: Option<String>,
    pub provider: &'static str,
}

/// TLS client built once per pool from the client configuration.
pub(crate) struct TlsClient {
    connector: TlsConnector,
    provider_name: &'static str,
}

impl TlsClient {
    /// Build the connector for the selected trust-root provider.
    ///
    /// # Errors
    ///
    /// [`TlsProvider::SystemOnly`] fails when the system store is
    /// unavailable; `Auto` falls back to the bundled roots instead.
    pub fn new(config: &TlsConfig) -> Result<Self, HttpError> {
        let (store, provider_name) = match config.provider {
            TlsProvider::SystemOnly => (system_root_store()?, "native-roots"),
            TlsProvider::BundledOnly => (bundled_root_store(), "webpki-roots"),
            TlsProvider::Auto => match system_root_store() {
                Ok(store) => (store, "native-roots"),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "system trust store unavailable; falling back to bundled webpki roots"
                    );
                    (bundled_root_store(), "webpki-roots")
                }
            },
        };

        let mut client_config = rustls::ClientConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| HttpError::certificate_caused("failed to configure TLS versions", e))?
            .with_root_certificates(store)
            .with_no_client_auth();
        client_config.alpn_protocols = config
            .alpn_protocols
            .iter()
            .map(|p| p.as_bytes().to_vec())
            .collect();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(client_config)),
            provider_name,
        })
    }

    /// Provider name for diagnostics.
    pub fn provider_name(&self) -> &'static str {
        self.provider_name
    }

    /// Perform the handshake over an established TCP stream.
    ///
    /// A pre-cancelled token fails fast before the stream is touched.
    /// A negotiated version below TLS 1.2 aborts with a certificate-class
    /// error.
    pub async fn wrap(
        &self,
        host: &str,
        stream: TcpStream,
        ct: &CancellationToken,
    ) -> Result<(TlsStream<TcpStream>, TlsSession), HttpError> {
        if ct.is_cancelled() {
            return Err(HttpError::Cancelled);
        }

        let server_name = ServerName::try_from(host.to_owned()).map_err(|e| {
            HttpError::InvalidRequest {
                message: format!("host {host:?} is not a valid TLS server name"),
                source: Some(Box::new(e)),
            }
        })?;

        let stream = tokio::select! {
            biased;
            () = ct.cancelled() => return Err(HttpError::Cancelled),
            result = self.connector.connect(server_name, stream) => {
                result.map_err(|e| classify_handshake_error(host, e))?
            }
        };

        let (_, session) = stream.get_ref();
        let version = match session.protocol_version() {
            Some(v @ (rustls::ProtocolVersion::TLSv1_2 | rustls::ProtocolVersion::TLSv1_3)) => {
                format!("{v:?}")
            }
            other => {
                return Err(HttpError::certificate(format!(
                    "negotiated TLS version {other:?} is below the TLS 1.2 minimum for {host}"
                )));
            }
        };
        let alpn = session
            .alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).into_owned());
        let cipher = session
            .negotiated_cipher_suite()
            .map(|s| format!("{:?}", s.suite()));

        tracing::debug!(
            host,
            version = %version,
            alpn = alpn.as_deref().unwrap_or("none"),
            provider = self.provider_name,
            "TLS handshake complete"
        );

        Ok((
            stream,
            TlsSession {
                version,
                alpn,
                cipher,
                provider: self.provider_name,
            },
        ))
    }
}

/// Handshake failures carrying a rustls error are certificate-class; plain
/// socket failures during the handshake stay network-class.
fn classify_handshake_error(host: &str, err: std::io::Error) -> HttpError {
    let is_tls = err
        .get_ref()
        .is_some_and(|inner| inner.is::<rustls::Error>());
    if is_tls {
        HttpError::certificate_caused(format!("TLS handshake with {host} failed"), err)
    } else {
        HttpError::io(format!("TLS handshake with {host} interrupted"), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_bundled_provider_always_builds() {
        let client = TlsClient::new(&TlsConfig {
            provider: TlsProvider::BundledOnly,
            ..TlsConfig::default()
        })
        .unwrap();
        assert_eq!(client.provider_name(), "webpki-roots");
    }

    #[test]
    fn test_auto_provider_never_fails_to_build() {
        // Auto either picks the system store or falls back to the bundle.
        let client = TlsClient::new(&TlsConfig::default()).unwrap();
        assert!(matches!(
            client.provider_name(),
            "native-roots" | "webpki-roots"
        ));
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_fails_fast() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();

        let ct = CancellationToken::new();
        ct.cancel();

        let client = TlsClient::new(&TlsConfig {
            provider: TlsProvider::BundledOnly,
            ..TlsConfig::default()
        })
        .unwrap();

        let err = client.wrap("example.com", stream, &ct).await.unwrap_err();
        assert!(matches!(err, HttpError::Cancelled));
    }

    #[tokio::test]
    async fn test_invalid_server_name_is_invalid_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();

        let client = TlsClient::new(&TlsConfig {
            provider: TlsProvider::BundledOnly,
            ..TlsConfig::default()
        })
        .unwrap();

        let err = client
            .wrap("bad name with spaces", stream, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidRequest { .. }));
    }
}
