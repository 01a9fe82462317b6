use std::{sync::Arc, time::Duration};

use {
    axum::Router,
    bytes::BytesMut,
    hyper_util::{
        rt::{TokioExecutor, TokioIo},
        server::conn::auto,
        service::TowerToHyperService,
    },
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, trace, warn},
};

use crate::{
    error::GatewayError,
    listener::{GatewayListener, ServerConfig, create_listener},
    polyglot::{self, BoxedStream, Rewind},
    request::{HEAD_READ_TIMEOUT, read_head},
    routes::build_gateway_app,
    state::GatewayState,
    tls::TlsTerminator,
    upgrade::{UpgradeDispatcher, UpgradeOutcome, UpgradeRoute},
    workbench::WorkbenchSocket,
};

/// Back-off after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Budget for the first bytes of a connection plus the TLS handshake.
const NEGOTIATE_TIMEOUT: Duration = Duration::from_secs(10);

// ── Server startup ───────────────────────────────────────────────────────────

/// Upgrade routes of the gateway: the editor socket at `/`, session required.
pub fn build_upgrade_dispatcher(state: &Arc<GatewayState>) -> UpgradeDispatcher {
    UpgradeDispatcher::new(Arc::clone(&state.authenticator)).route(UpgradeRoute::protected(
        "/",
        Arc::new(WorkbenchSocket::new(Arc::clone(&state.workbench))),
    ))
}

/// A running accept loop.
pub struct GatewayHandle {
    address: String,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl GatewayHandle {
    /// What [`GatewayListener::address_uri`] reported at startup.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting and wait for the loop to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}

/// Serve `state` on an already bound `listener` in a background task.
pub fn spawn_gateway(
    listener: GatewayListener,
    state: Arc<GatewayState>,
) -> Result<GatewayHandle, GatewayError> {
    let app = build_gateway_app(Arc::clone(&state));
    let dispatcher = Arc::new(build_upgrade_dispatcher(&state));
    spawn_with(listener, app, dispatcher)
}

/// Like [`spawn_gateway`] with a caller-built router and dispatcher.
pub fn spawn_with(
    listener: GatewayListener,
    app: Router,
    dispatcher: Arc<UpgradeDispatcher>,
) -> Result<GatewayHandle, GatewayError> {
    let address = listener.address_uri()?;
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(serve(listener, app, dispatcher, shutdown.clone()));
    Ok(GatewayHandle {
        address,
        shutdown,
        task,
    })
}

/// Bind, serve, and block until Ctrl-C.
pub async fn start_gateway(config: &ServerConfig, state: Arc<GatewayState>) -> anyhow::Result<()> {
    let listener = create_listener(config).await?;
    let tls = listener.is_tls();
    let handle = spawn_gateway(listener, Arc::clone(&state))?;

    // Startup banner.
    let lines = [
        format!("tessera gateway v{}", state.version),
        format!("listening on {}", handle.address()),
        format!("tls: {}", if tls { "enabled" } else { "disabled" }),
        format!(
            "roots: {}",
            state
                .resources
                .roots()
                .map(|r| r.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

// ── Accept loop ──────────────────────────────────────────────────────────────

/// One accept loop for every protocol. Each connection runs in its own task.
pub async fn serve(
    listener: GatewayListener,
    app: Router,
    dispatcher: Arc<UpgradeDispatcher>,
    shutdown: CancellationToken,
) {
    let tls = listener.tls().cloned();
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            },
        };
        trace!(%peer, "accepted connection");

        let tls = tls.clone();
        let app = app.clone();
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            handle_connection(stream, &peer, tls.as_ref(), app, &dispatcher).await;
        });
    }
    debug!("accept loop stopped");
}

async fn handle_connection(
    stream: BoxedStream,
    peer: &str,
    tls: Option<&TlsTerminator>,
    app: Router,
    dispatcher: &UpgradeDispatcher,
) {
    let negotiated = tokio::time::timeout(NEGOTIATE_TIMEOUT, polyglot::negotiate(stream, tls));
    let mut stream = match negotiated.await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(%peer, error = %e, "connection dropped during negotiation");
            return;
        },
        Err(_) => {
            debug!(%peer, "timed out waiting for the first bytes or tls handshake");
            return;
        },
    };

    let mut buf = BytesMut::with_capacity(1024);
    let head = match tokio::time::timeout(HEAD_READ_TIMEOUT, read_head(&mut stream, &mut buf)).await
    {
        Ok(Ok(head)) => head,
        Ok(Err(e)) => {
            debug!(%peer, error = %e, "failed reading request head");
            return;
        },
        Err(_) => {
            debug!(%peer, "timed out waiting for request head");
            return;
        },
    };

    if let Some(head) = head.filter(|h| h.is_websocket_upgrade()) {
        let leftover = buf.split_off(head.head_len()).freeze();
        let conn: BoxedStream = Box::new(Rewind::new(leftover, stream));
        let outcome = dispatcher.dispatch(conn, &head).await;
        match outcome {
            UpgradeOutcome::Delegated => trace!(%peer, path = head.path(), "upgrade delegated"),
            UpgradeOutcome::Rejected(reason) => {
                debug!(%peer, path = head.path(), ?reason, "upgrade rejected")
            },
        }
        return;
    }

    let io = TokioIo::new(Rewind::new(buf.freeze(), stream));
    let service = TowerToHyperService::new(app);
    let builder = auto::Builder::new(TokioExecutor::new());
    if let Err(e) = builder.serve_connection(io, service).await {
        debug!(%peer, error = %e, "http connection closed with error");
    }
}
