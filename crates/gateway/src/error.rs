use std::{io, path::PathBuf};

use {
    axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    thiserror::Error,
    tracing::error,
};

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Startup failures. All of them are fatal: the listener never reports
/// a successful listen when one of these is returned.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("failed to load TLS material from {}: {reason}", path.display())]
    CertLoadFailed { path: PathBuf, reason: String },
    #[error("address already in use: {address}")]
    AddressInUse { address: String },
    #[error("permission denied while binding {address}")]
    PermissionDenied { address: String },
    #[error("invalid bind address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("failed to bind {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: io::Error,
    },
}

impl BindError {
    pub(crate) fn cert(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::CertLoadFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn from_io(address: impl Into<String>, err: io::Error) -> Self {
        let address = address.into();
        match err.kind() {
            io::ErrorKind::AddrInUse => Self::AddressInUse { address },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { address },
            io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::NotFound => Self::InvalidAddress {
                address,
                reason: err.to_string(),
            },
            _ => Self::Io {
                address,
                source: err,
            },
        }
    }
}

/// Request-time failures, rendered through [`IntoResponse`].
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("path escapes the permitted roots: {0}")]
    PathSecurity(String),
    #[error("resource not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("Editor failed to load. {0}")]
    Workbench(String),
    #[error("server has no address")]
    NoAddress,
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::PathSecurity(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Io(_) | Self::Workbench(_) | Self::NoAddress => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            // The rejected path stays in the logs, not in the response.
            Self::PathSecurity(_) => "Forbidden".to_string(),
            Self::NotFound(_) => "Not found".to_string(),
            other => {
                error!(error = %other, "request failed");
                other.to_string()
            },
        };
        (status, body).into_response()
    }
}
