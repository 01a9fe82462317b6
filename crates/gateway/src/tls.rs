//! TLS termination for the polyglot listener.
//!
//! Certificate and key are PEM files. Without the `tls` feature the
//! terminator cannot be built and loading reports a certificate error.

#[cfg(feature = "tls")]
use std::sync::Arc;
use std::io;

#[cfg(feature = "tls")]
use tracing::debug;

use crate::{error::BindError, listener::TlsPaths, polyglot::BoxedStream};

/// Server-side TLS acceptor shared by every connection of a listener.
#[derive(Clone)]
pub struct TlsTerminator {
    #[cfg(feature = "tls")]
    acceptor: tokio_rustls::TlsAcceptor,
}

impl std::fmt::Debug for TlsTerminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTerminator").finish_non_exhaustive()
    }
}

#[cfg(feature = "tls")]
impl TlsTerminator {
    /// Read and parse both PEM files. Any failure is a [`BindError::CertLoadFailed`].
    pub async fn load(paths: &TlsPaths) -> Result<Self, BindError> {
        let cert_pem = tokio::fs::read(&paths.cert)
            .await
            .map_err(|e| BindError::cert(&paths.cert, e))?;
        let key_pem = tokio::fs::read(&paths.key)
            .await
            .map_err(|e| BindError::cert(&paths.key, e))?;

        let mut reader = cert_pem.as_slice();
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BindError::cert(&paths.cert, e))?;
        if certs.is_empty() {
            return Err(BindError::cert(&paths.cert, "no certificates found"));
        }

        let mut reader = key_pem.as_slice();
        let key = rustls_pemfile::private_key(&mut reader)
            .map_err(|e| BindError::cert(&paths.key, e))?
            .ok_or_else(|| BindError::cert(&paths.key, "no private key found"))?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| BindError::cert(&paths.cert, e))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| BindError::cert(&paths.cert, e))?;
        // The request head is parsed as HTTP/1.1 before routing.
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        debug!(cert = %paths.cert.display(), "loaded tls certificate");
        Ok(Self {
            acceptor: tokio_rustls::TlsAcceptor::from(Arc::new(config)),
        })
    }

    pub async fn accept<S>(&self, stream: S) -> io::Result<BoxedStream>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let tls = self.acceptor.accept(stream).await?;
        Ok(Box::new(tls))
    }
}

#[cfg(not(feature = "tls"))]
impl TlsTerminator {
    pub async fn load(paths: &TlsPaths) -> Result<Self, BindError> {
        Err(BindError::cert(
            &paths.cert,
            "built without the `tls` feature",
        ))
    }

    pub async fn accept<S>(&self, _stream: S) -> io::Result<BoxedStream>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "built without the `tls` feature",
        ))
    }
}
