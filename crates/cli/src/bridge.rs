//! Connects upgraded browser sockets to the editor process.

use std::{collections::HashMap, fmt, path::PathBuf};

use {
    async_trait::async_trait,
    serde_json::{Value, json},
    tessera_gateway::{
        BoxedStream,
        workbench::{Workbench, WorkbenchContext},
    },
    tokio::io::{AsyncWriteExt, copy_bidirectional},
    tracing::{debug, warn},
};

/// Where the editor process listens for upgraded connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorSocket {
    Unix(PathBuf),
    Tcp(String),
}

impl EditorSocket {
    /// `host:port` with a numeric port is TCP; anything else is a socket path.
    pub fn parse(raw: &str) -> Self {
        let looks_like_path = raw.contains('/') || raw.contains('\\');
        match raw.rsplit_once(':') {
            Some((host, port))
                if !looks_like_path && !host.is_empty() && port.parse::<u16>().is_ok() =>
            {
                Self::Tcp(raw.to_string())
            },
            _ => Self::Unix(PathBuf::from(raw)),
        }
    }

    async fn connect(&self) -> anyhow::Result<BoxedStream> {
        match self {
            Self::Tcp(addr) => Ok(Box::new(tokio::net::TcpStream::connect(addr).await?)),
            #[cfg(unix)]
            Self::Unix(path) => Ok(Box::new(tokio::net::UnixStream::connect(path).await?)),
            #[cfg(not(unix))]
            Self::Unix(path) => {
                anyhow::bail!("unix sockets are not supported here: {}", path.display())
            },
        }
    }
}

impl fmt::Display for EditorSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "{}", path.display()),
            Self::Tcp(addr) => write!(f, "{addr}"),
        }
    }
}

/// [`Workbench`] backed by an editor asset tree on disk and an editor process
/// reachable over a socket.
pub struct SocketBridge {
    root: PathBuf,
    socket: Option<EditorSocket>,
}

impl SocketBridge {
    pub fn new(root: impl Into<PathBuf>, socket: Option<EditorSocket>) -> Self {
        Self {
            root: root.into(),
            socket,
        }
    }
}

#[async_trait]
impl Workbench for SocketBridge {
    async fn initialize(&self, ctx: WorkbenchContext) -> anyhow::Result<Value> {
        if !tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            anyhow::bail!("editor assets not found at {}", self.root.display());
        }
        Ok(json!({
            "remoteAuthority": ctx.remote_authority,
            "folderUri": ctx.query.get("folder"),
            "workspaceUri": ctx.query.get("workspace"),
            "webviewEndpoint": "/webview",
        }))
    }

    async fn send_websocket(
        &self,
        mut conn: BoxedStream,
        query: HashMap<String, String>,
    ) -> anyhow::Result<()> {
        let Some(socket) = &self.socket else {
            warn!("no editor socket configured, closing upgraded connection");
            conn.shutdown().await?;
            return Ok(());
        };

        let mut upstream = socket.connect().await?;
        let mut preamble = serde_json::to_vec(&json!({ "query": query }))?;
        preamble.push(b'\n');
        upstream.write_all(&preamble).await?;
        upstream.flush().await?;

        let (up, down) = copy_bidirectional(&mut conn, &mut upstream).await?;
        debug!(editor = %socket, to_editor = up, from_editor = down, "editor connection closed");
        Ok(())
    }

    fn asset_root(&self) -> PathBuf {
        self.root.clone()
    }
}
