//! Listener bootstrap: TLS material, socket cleanup and bind.

use std::{
    fmt, io,
    net::SocketAddr,
    path::{Path, PathBuf},
};

#[cfg(unix)]
use tokio::net::UnixListener;
use {
    tokio::net::{TcpListener, lookup_host},
    tracing::{debug, info, trace, warn},
};

use crate::{
    error::{BindError, GatewayError},
    polyglot::BoxedStream,
    tls::TlsTerminator,
};

/// Certificate and private key, always configured together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindTarget {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl fmt::Display for BindTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
            Self::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Read-only after construction; owned by the bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: BindTarget,
    pub tls: Option<TlsPaths>,
}

impl ServerConfig {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            bind: BindTarget::Tcp {
                host: host.into(),
                port,
            },
            tls: None,
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self {
            bind: BindTarget::Unix(path.into()),
            tls: None,
        }
    }

    #[must_use]
    pub fn with_tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsPaths {
            cert: cert.into(),
            key: key.into(),
        });
        self
    }
}

/// Address the OS reports for a bound listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundAddress {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

enum Socket {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// A bound, listening socket plus the optional TLS terminator for it.
pub struct GatewayListener {
    socket: Socket,
    tls: Option<TlsTerminator>,
}

impl fmt::Debug for GatewayListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayListener")
            .field("address", &self.local_address())
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// Load TLS material (if any) and bind `config.bind`.
///
/// Resolves only once the socket is listening.
pub async fn create_listener(config: &ServerConfig) -> Result<GatewayListener, BindError> {
    let tls = match &config.tls {
        Some(paths) => Some(TlsTerminator::load(paths).await?),
        None => None,
    };

    let socket = match &config.bind {
        BindTarget::Tcp { host, port } => bind_tcp(host, *port).await?,
        BindTarget::Unix(path) => bind_unix(path).await?,
    };

    let listener = GatewayListener { socket, tls };
    info!(
        address = ?listener.local_address(),
        tls = listener.is_tls(),
        "listener bound"
    );
    Ok(listener)
}

/// Strip IPv6 brackets: `[::]` → `::`. Bind rejects the bracketed literal.
pub fn normalize_host(host: &str) -> &str {
    let host = host.strip_prefix('[').unwrap_or(host);
    host.strip_suffix(']').unwrap_or(host)
}

async fn bind_tcp(host: &str, port: u16) -> Result<Socket, BindError> {
    let host = normalize_host(host);
    let display = format!("{host}:{port}");
    let addr = lookup_host((host, port))
        .await
        .map_err(|e| BindError::InvalidAddress {
            address: display.clone(),
            reason: e.to_string(),
        })?
        .next()
        .ok_or_else(|| BindError::InvalidAddress {
            address: display.clone(),
            reason: "host resolved to no addresses".into(),
        })?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| BindError::from_io(display, e))?;
    Ok(Socket::Tcp(listener))
}

#[cfg(unix)]
async fn bind_unix(path: &Path) -> Result<Socket, BindError> {
    remove_stale_socket(path).await;
    let listener =
        UnixListener::bind(path).map_err(|e| BindError::from_io(path.display().to_string(), e))?;
    Ok(Socket::Unix(listener))
}

#[cfg(not(unix))]
async fn bind_unix(path: &Path) -> Result<Socket, BindError> {
    Err(BindError::InvalidAddress {
        address: path.display().to_string(),
        reason: "unix sockets are not supported on this platform".into(),
    })
}

/// Best effort; a real problem resurfaces as the bind error.
#[cfg(unix)]
async fn remove_stale_socket(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed stale socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {},
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale socket"),
    }
}

impl GatewayListener {
    pub async fn accept(&self) -> io::Result<(BoxedStream, String)> {
        match &self.socket {
            Socket::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                if let Err(e) = stream.set_nodelay(true) {
                    trace!(%peer, error = %e, "failed to set TCP_NODELAY");
                }
                Ok((Box::new(stream), peer.to_string()))
            },
            #[cfg(unix)]
            Socket::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), "unix".to_string()))
            },
        }
    }

    pub fn tls(&self) -> Option<&TlsTerminator> {
        self.tls.as_ref()
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn local_address(&self) -> Option<BoundAddress> {
        match &self.socket {
            Socket::Tcp(listener) => listener.local_addr().ok().map(BoundAddress::Tcp),
            #[cfg(unix)]
            Socket::Unix(listener) => listener
                .local_addr()
                .ok()
                .and_then(|addr| addr.as_pathname().map(|p| BoundAddress::Unix(p.to_path_buf()))),
        }
    }

    /// Socket path verbatim, or `http://host:port` for TCP.
    ///
    /// An error here means the listener was never bound; callers treat it as
    /// fatal.
    pub fn address_uri(&self) -> Result<String, GatewayError> {
        match self.local_address() {
            Some(BoundAddress::Unix(path)) => Ok(path.display().to_string()),
            Some(BoundAddress::Tcp(addr)) => Ok(format!("http://{addr}")),
            None => Err(GatewayError::NoAddress),
        }
    }
}
