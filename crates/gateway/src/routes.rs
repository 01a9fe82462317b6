//! HTTP route table for the plain request path.

use std::{collections::HashMap, sync::Arc};

use {
    axum::{
        Json, Router,
        extract::{Path, Query, Request, State},
        http::{HeaderMap, StatusCode, Uri, header::HOST},
        middleware::{self, Next},
        response::{IntoResponse, Response},
        routing::get,
    },
    serde_json::{Value, json},
    tracing::debug,
};

use crate::{
    auth::login_redirect,
    error::{GatewayError, Result},
    resource::{content_type_for, file_response},
    state::GatewayState,
    workbench::WorkbenchContext,
};

/// Reserved webview prefix marking an already-absolute path.
const WEBVIEW_RESOURCE_PREFIX: &str = "vscode-resource";

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let protected = Router::new()
        .route("/", get(workbench_handler))
        .route("/resource", get(resource_handler))
        .route("/resource/{*rest}", get(resource_handler))
        .route("/vscode-remote-resource", get(resource_handler))
        .route("/vscode-remote-resource/{*rest}", get(resource_handler))
        .route("/webview/{*rest}", get(webview_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_session,
        ));

    Router::new()
        .route("/healthz", get(health_handler))
        .merge(protected)
        .with_state(state)
}

async fn require_session(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    if state.authenticator.is_authenticated(request.headers()).await {
        return next.run(request).await;
    }
    debug!(path = %request.uri().path(), "unauthenticated request, redirecting to login");
    login_redirect(request.uri().path())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "alive",
        "version": state.version,
    }))
}

async fn workbench_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>> {
    let ctx = WorkbenchContext {
        remote_authority: headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        query,
    };
    let mut options = state
        .workbench
        .initialize(ctx)
        .await
        .map_err(|e| GatewayError::Workbench(e.to_string()))?;

    if let Some(root) = options.as_object_mut() {
        let product = root
            .entry("productConfiguration")
            .or_insert_with(|| json!({}));
        if let Some(product) = product.as_object_mut() {
            product.insert("codeServerVersion".into(), json!(state.version));
        }
    }
    Ok(Json(options))
}

async fn resource_handler(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response> {
    // Preview links may omit the path.
    let Some(logical) = single_path(&params) else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    let resolved = state.resources.resolve(logical).await?;
    file_response(&resolved, content_type_for(logical)).await
}

/// The `path` parameter when it is given exactly once and non-empty.
fn single_path(params: &[(String, String)]) -> Option<&str> {
    let mut paths = params.iter().filter(|(key, _)| key == "path");
    match (paths.next(), paths.next()) {
        (Some((_, path)), None) if !path.is_empty() => Some(path),
        _ => None,
    }
}

async fn webview_handler(
    State(state): State<Arc<GatewayState>>,
    Path(rest): Path<String>,
    uri: Uri,
) -> Result<Response> {
    let content_type = content_type_for(uri.path());
    let resolved = match strip_webview_resource(&rest) {
        Some(absolute) => state.resources.resolve(absolute).await?,
        None => state.webview.resolve(&rest).await?,
    };
    file_response(&resolved, content_type).await
}

/// `vscode-resource/file/abs/path` → `/abs/path`.
fn strip_webview_resource(rest: &str) -> Option<&str> {
    let stripped = rest.strip_prefix(WEBVIEW_RESOURCE_PREFIX)?;
    Some(stripped.strip_prefix("/file").unwrap_or(stripped))
}
