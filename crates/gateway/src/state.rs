use std::{path::PathBuf, sync::Arc};

use crate::{auth::Authenticator, resource::ResourceResolver, workbench::Workbench};

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
pub struct GatewayState {
    /// Server version string.
    pub version: String,
    /// Session check for protected routes and upgrades.
    pub authenticator: Arc<dyn Authenticator>,
    /// The editor the gateway fronts.
    pub workbench: Arc<dyn Workbench>,
    /// Configured roots plus the editor's asset tree.
    pub resources: ResourceResolver,
    /// Webview assets only.
    pub webview: ResourceResolver,
}

impl GatewayState {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        workbench: Arc<dyn Workbench>,
        roots: Vec<PathBuf>,
    ) -> Arc<Self> {
        let mut resource_roots = roots;
        resource_roots.push(workbench.asset_root());
        let resources = ResourceResolver::new(resource_roots);
        let webview = ResourceResolver::new([workbench.webview_root()]);

        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            authenticator,
            workbench,
            resources,
            webview,
        })
    }
}
