//! Manual WebSocket upgrade dispatch.
//!
//! Per connection: `Accepted → KeyValidated → Authenticated → HandshakeSent →
//! Delegated`. Any failed checkpoint closes the raw connection without a
//! response; once the 101 is written the handler owns the connection.

use std::{collections::HashMap, sync::Arc};

use {
    async_trait::async_trait,
    tokio::io::AsyncWriteExt,
    tracing::{debug, trace, warn},
};

use crate::{
    auth::Authenticator,
    handshake::{SEC_WEBSOCKET_KEY, compute_accept_token, switching_protocols_response},
    polyglot::BoxedStream,
    request::RequestHead,
};

/// Path matcher for upgrade routes. `"/x/*"` matches `/x` and anything below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    Exact(String),
    Prefix(String),
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix("/*") {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(exact) => path == exact,
            Self::Prefix(prefix) => {
                path == prefix
                    || path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            },
        }
    }
}

/// Receives a connection after the handshake has been written.
#[async_trait]
pub trait UpgradeHandler: Send + Sync {
    async fn on_upgrade(&self, conn: BoxedStream, query: HashMap<String, String>);
}

pub struct UpgradeRoute {
    pattern: PathPattern,
    requires_auth: bool,
    handler: Arc<dyn UpgradeHandler>,
}

impl UpgradeRoute {
    pub fn protected(pattern: &str, handler: Arc<dyn UpgradeHandler>) -> Self {
        Self {
            pattern: PathPattern::parse(pattern),
            requires_auth: true,
            handler,
        }
    }

    pub fn public(pattern: &str, handler: Arc<dyn UpgradeHandler>) -> Self {
        Self {
            pattern: PathPattern::parse(pattern),
            requires_auth: false,
            handler,
        }
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NoRoute,
    MissingKey,
    Unauthenticated,
    WriteFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOutcome {
    Delegated,
    Rejected(Rejection),
}

/// Ordered upgrade route table; first match wins.
pub struct UpgradeDispatcher {
    routes: Vec<UpgradeRoute>,
    authenticator: Arc<dyn Authenticator>,
}

impl UpgradeDispatcher {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            routes: Vec::new(),
            authenticator,
        }
    }

    #[must_use]
    pub fn route(mut self, route: UpgradeRoute) -> Self {
        self.routes.push(route);
        self
    }

    pub fn routes(&self) -> &[UpgradeRoute] {
        &self.routes
    }

    /// Run the handshake for `request` on `conn`.
    ///
    /// `conn` must be positioned right after the request head.
    pub async fn dispatch(&self, mut conn: BoxedStream, request: &RequestHead) -> UpgradeOutcome {
        let path = request.path();
        let Some(route) = self.routes.iter().find(|r| r.pattern.matches(path)) else {
            debug!(path, "no upgrade route");
            return reject(conn, Rejection::NoRoute).await;
        };

        let Some(key) = request.header(SEC_WEBSOCKET_KEY).filter(|k| !k.is_empty()) else {
            debug!(path, "upgrade without Sec-WebSocket-Key");
            return reject(conn, Rejection::MissingKey).await;
        };
        trace!(path, "websocket key validated");

        if route.requires_auth && !self.authenticator.is_authenticated(request.headers()).await {
            debug!(path, "unauthenticated upgrade");
            return reject(conn, Rejection::Unauthenticated).await;
        }

        let response = switching_protocols_response(&compute_accept_token(key));
        let written = async {
            conn.write_all(response.as_bytes()).await?;
            conn.flush().await
        };
        if let Err(e) = written.await {
            warn!(path, error = %e, "failed to write upgrade response");
            return UpgradeOutcome::Rejected(Rejection::WriteFailed);
        }
        trace!(path, "handshake sent, delegating connection");

        route.handler.on_upgrade(conn, request.query().clone()).await;
        UpgradeOutcome::Delegated
    }
}

async fn reject(mut conn: BoxedStream, reason: Rejection) -> UpgradeOutcome {
    let _ = conn.shutdown().await;
    UpgradeOutcome::Rejected(reason)
}
