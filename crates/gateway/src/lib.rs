//! Gateway: polyglot HTTP/TLS listener, WebSocket upgrade dispatch and the
//! authenticated resource routes that front the embedded editor.
//!
//! Lifecycle:
//! 1. Load TLS material (optional) and bind a TCP address or Unix socket
//! 2. Build the HTTP route table and the upgrade dispatcher
//! 3. Run one accept loop: sniff TLS vs plaintext, read the request head,
//!    hand upgrades to the dispatcher and everything else to the router
//!
//! The editor itself lives behind the [`workbench::Workbench`] trait.

pub mod auth;
pub mod error;
pub mod handshake;
pub mod listener;
pub mod polyglot;
pub mod request;
pub mod resource;
pub mod routes;
pub mod server;
pub mod state;
pub mod tls;
pub mod upgrade;
pub mod workbench;

pub use {
    error::{BindError, GatewayError},
    listener::{BindTarget, BoundAddress, GatewayListener, ServerConfig, TlsPaths, create_listener},
    polyglot::{BoxedStream, RawStream},
    server::{GatewayHandle, spawn_gateway, start_gateway},
    state::GatewayState,
};
