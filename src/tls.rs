//! In-place STARTTLS transport upgrade.
//!
//! The handshake runs over the same buffered transport the connection was
//! already using. Per the engine's redesign decision, a handshake failure
//! closes the connection outright rather than attempting to fall back to
//! plaintext — a half-upgraded transport can't be trusted either way.

use std::io;
use std::path::Path;
use std::sync::Arc;

use rustls_pemfile::{certs, private_key};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig as RustlsServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::transport::BoxedStream;

/// Wraps a `rustls` server configuration for use by the engine's STARTTLS
/// handler.
#[derive(Clone)]
pub struct TlsConfig {
    acceptor: TlsAcceptor,
}

impl TlsConfig {
    /// Builds a `TlsConfig` from an already-assembled `rustls` server
    /// configuration. Certificate loading and selection are the host
    /// application's concern; the engine only drives the handshake.
    pub fn new(server_config: Arc<RustlsServerConfig>) -> Self {
        Self {
            acceptor: TlsAcceptor::from(server_config),
        }
    }

    /// Builds a `TlsConfig` from a PEM-encoded certificate chain and private
    /// key on disk. A convenience for the common case; a host that needs
    /// client auth, OCSP stapling, or any other `rustls` knob should build
    /// a `ServerConfig` itself and use [`TlsConfig::new`].
    pub fn from_pem_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> io::Result<Self> {
        let cert_bytes = std::fs::read(cert_path)?;
        let key_bytes = std::fs::read(key_path)?;

        let chain: Vec<CertificateDer<'static>> = certs(&mut &cert_bytes[..]).collect::<Result<_, _>>()?;
        let key: PrivateKeyDer<'static> = private_key(&mut &key_bytes[..])?
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key found in PEM file"))?;

        let server_config = RustlsServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        Ok(Self::new(Arc::new(server_config)))
    }

    /// Performs the TLS server handshake over `transport`, returning the
    /// encrypted stream boxed as the engine's common transport type.
    pub(crate) async fn upgrade(&self, transport: BoxedStream) -> Result<BoxedStream, crate::error::Error> {
        let tls_stream = self
            .acceptor
            .accept(transport)
            .await
            .map_err(|e| crate::error::Error::Tls(e.to_string()))?;
        Ok(Box::new(tls_stream) as BoxedStream)
    }
}
