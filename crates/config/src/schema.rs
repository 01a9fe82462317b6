//! Config schema types (bind target, TLS, auth, roots, editor).

use std::path::PathBuf;

use {
    secrecy::SecretString,
    serde::{Deserialize, Serialize},
};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    /// `host:port`; IPv6 hosts may be bracketed (`[::]:8080`).
    pub bind_addr: String,
    /// Listen on a Unix socket instead of `bind_addr`.
    pub socket: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub cert_key: Option<PathBuf>,
    pub auth: AuthConfig,
    /// Directories resource routes may read from. The first one anchors
    /// relative paths.
    pub roots: Vec<PathBuf>,
    pub editor: EditorConfig,
}

impl Default for TesseraConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            socket: None,
            cert: None,
            cert_key: None,
            auth: AuthConfig::default(),
            roots: Vec::new(),
            editor: EditorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    None,
    #[default]
    Password,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: AuthMode,
    /// Never written back out.
    #[serde(skip_serializing)]
    pub password: Option<SecretString>,
    /// Hex SHA-256 of the password; preferred over `password` when both are set.
    pub hashed_password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// The editor's asset tree.
    pub root: PathBuf,
    /// Where the editor process accepts upgraded connections: a socket path
    /// or `host:port`.
    pub socket: Option<String>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("lib/editor"),
            socket: None,
        }
    }
}

impl TesseraConfig {
    /// Reject combinations the gateway cannot start with.
    pub fn validate(&self) -> anyhow::Result<()> {
        match (&self.cert, &self.cert_key) {
            (Some(_), None) => anyhow::bail!("`cert` is set but `cert_key` is missing"),
            (None, Some(_)) => anyhow::bail!("`cert_key` is set but `cert` is missing"),
            _ => {},
        }
        if self.socket.is_none() {
            split_host_port(&self.bind_addr)?;
        }
        Ok(())
    }
}

/// Split `host:port`, keeping IPv6 brackets on the host.
pub fn split_host_port(addr: &str) -> anyhow::Result<(String, u16)> {
    let Some((host, port)) = addr.rsplit_once(':') else {
        anyhow::bail!("bind address `{addr}` must be host:port");
    };
    if host.is_empty() {
        anyhow::bail!("bind address `{addr}` has no host");
    }
    let port = port
        .parse::<u16>()
        .map_err(|e| anyhow::anyhow!("bind address `{addr}` has an invalid port: {e}"))?;
    Ok((host.to_string(), port))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret};

    #[test]
    fn defaults_are_loopback_with_password_auth() {
        let config = TesseraConfig::default();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.auth.mode, AuthMode::Password);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn lone_cert_or_key_is_rejected() {
        let mut config = TesseraConfig {
            cert: Some("cert.pem".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.cert = None;
        config.cert_key = Some("key.pem".into());
        assert!(config.validate().is_err());
        config.cert = Some("cert.pem".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn splits_host_and_port() {
        assert_eq!(
            split_host_port("0.0.0.0:8080").unwrap(),
            ("0.0.0.0".to_string(), 8080)
        );
        assert_eq!(split_host_port("[::]:443").unwrap(), ("[::]".to_string(), 443));
        assert!(split_host_port("localhost").is_err());
        assert!(split_host_port(":80").is_err());
        assert!(split_host_port("localhost:http").is_err());
    }

    #[test]
    fn password_is_read_but_never_serialized() {
        let config: TesseraConfig =
            toml::from_str("[auth]\nmode = \"password\"\npassword = \"hunter2\"\n").unwrap();
        assert_eq!(
            config.auth.password.as_ref().map(|p| p.expose_secret().as_str()),
            Some("hunter2")
        );
        let written = toml::to_string_pretty(&config).unwrap();
        assert!(!written.contains("hunter2"));
    }
}
