//! The embedded editor as seen from the gateway.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use {async_trait::async_trait, tracing::warn};

use crate::{polyglot::BoxedStream, upgrade::UpgradeHandler};

/// Webview assets inside the editor's asset tree.
pub const WEBVIEW_ASSET_DIR: &str = "out/vs/workbench/contrib/webview/browser/pre";

/// Per-request data handed to [`Workbench::initialize`].
#[derive(Debug, Clone, Default)]
pub struct WorkbenchContext {
    /// `Host` header of the request, empty when absent.
    pub remote_authority: String,
    pub query: HashMap<String, String>,
}

#[async_trait]
pub trait Workbench: Send + Sync {
    /// Options the browser-side workbench boots with.
    async fn initialize(&self, ctx: WorkbenchContext) -> anyhow::Result<serde_json::Value>;

    /// Take ownership of an upgraded connection. The 101 has already been sent.
    async fn send_websocket(
        &self,
        conn: BoxedStream,
        query: HashMap<String, String>,
    ) -> anyhow::Result<()>;

    /// Root of the editor's own asset tree.
    fn asset_root(&self) -> PathBuf;

    fn webview_root(&self) -> PathBuf {
        self.asset_root().join(WEBVIEW_ASSET_DIR)
    }
}

/// Routes upgraded connections into [`Workbench::send_websocket`].
pub struct WorkbenchSocket {
    workbench: Arc<dyn Workbench>,
}

impl WorkbenchSocket {
    pub fn new(workbench: Arc<dyn Workbench>) -> Self {
        Self { workbench }
    }
}

#[async_trait]
impl UpgradeHandler for WorkbenchSocket {
    async fn on_upgrade(&self, conn: BoxedStream, query: HashMap<String, String>) {
        if let Err(e) = self.workbench.send_websocket(conn, query).await {
            warn!(error = %e, "workbench socket ended with error");
        }
    }
}
