use std::sync::Arc;

use {
    async_trait::async_trait,
    axum::{
        http::{HeaderMap, HeaderValue, StatusCode, header::LOCATION},
        response::{IntoResponse, Response},
    },
    axum_extra::extract::cookie::CookieJar,
    secrecy::{ExposeSecret, SecretString},
    sha2::{Digest, Sha256},
};

pub use tessera_config::AuthMode;

/// Cookie holding the session proof.
pub const SESSION_COOKIE: &str = "key";

/// Entry point unauthenticated browsers are sent to.
pub const LOGIN_PATH: &str = "/login";

// ── Types ────────────────────────────────────────────────────────────────────

/// Session check injected into routes and the upgrade dispatcher.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn is_authenticated(&self, headers: &HeaderMap) -> bool;
}

/// Every request is authenticated.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
    async fn is_authenticated(&self, _headers: &HeaderMap) -> bool {
        true
    }
}

/// Session = `key` cookie carrying the hex SHA-256 of the password.
#[derive(Clone)]
pub struct PasswordAuth {
    hashed: String,
}

impl std::fmt::Debug for PasswordAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordAuth").finish_non_exhaustive()
    }
}

impl PasswordAuth {
    pub fn new(password: &SecretString) -> Self {
        Self {
            hashed: hash_password(password.expose_secret()),
        }
    }

    pub fn from_hash(hashed: impl Into<String>) -> Self {
        Self {
            hashed: hashed.into().to_ascii_lowercase(),
        }
    }

    /// Cookie value a successful login hands out.
    pub fn session_value(&self) -> &str {
        &self.hashed
    }
}

#[async_trait]
impl Authenticator for PasswordAuth {
    async fn is_authenticated(&self, headers: &HeaderMap) -> bool {
        CookieJar::from_headers(headers)
            .get(SESSION_COOKIE)
            .is_some_and(|cookie| safe_equal(cookie.value(), &self.hashed))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Constant-time string comparison (prevents timing attacks).
fn safe_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

/// Hex-encoded SHA-256 of `password`.
pub fn hash_password(password: &str) -> String {
    Sha256::digest(password.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// `302` to the login page with `to` set to the path that was refused.
///
/// Slashes stay readable in the return target; everything else reserved is
/// percent-encoded.
pub fn login_redirect(to: &str) -> Response {
    let target = urlencoding::encode(to).replace("%2F", "/");
    let location = format!("{LOGIN_PATH}?to={target}");
    match HeaderValue::from_str(&location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(_) => (StatusCode::FOUND, [(LOCATION, HeaderValue::from_static(LOGIN_PATH))])
            .into_response(),
    }
}

// ── Auth resolution ──────────────────────────────────────────────────────────

/// Build the authenticator for `mode` from a plaintext password or a
/// precomputed hash. The hash wins when both are set.
pub fn resolve_auth(
    mode: AuthMode,
    password: Option<&SecretString>,
    hashed_password: Option<&str>,
) -> anyhow::Result<Arc<dyn Authenticator>> {
    match mode {
        AuthMode::None => Ok(Arc::new(NoAuth)),
        AuthMode::Password => {
            if let Some(hash) = hashed_password.filter(|h| !h.is_empty()) {
                return Ok(Arc::new(PasswordAuth::from_hash(hash)));
            }
            let Some(password) = password.filter(|p| !p.expose_secret().is_empty()) else {
                anyhow::bail!("password auth selected but no password or hashed password is set");
            };
            Ok(Arc::new(PasswordAuth::new(password)))
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, axum::http::header::COOKIE};

    fn cookie_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            hash_password("hunter2"),
            "f52fbd32b2b3b86ff88ef6c490628285f482af15ddcb29541f94bcf526a3f6c7"
        );
    }

    #[test]
    fn safe_equal_compares_contents() {
        assert!(safe_equal("abc", "abc"));
        assert!(!safe_equal("abc", "abd"));
        assert!(!safe_equal("abc", "abcd"));
    }

    #[tokio::test]
    async fn password_auth_accepts_matching_cookie() {
        let auth = PasswordAuth::new(&SecretString::new("hunter2".into()));
        let headers = cookie_headers(&format!("theme=dark; key={}", hash_password("hunter2")));
        assert!(auth.is_authenticated(&headers).await);
    }

    #[tokio::test]
    async fn password_auth_rejects_wrong_or_missing_cookie() {
        let auth = PasswordAuth::new(&SecretString::new("hunter2".into()));
        assert!(!auth.is_authenticated(&HeaderMap::new()).await);
        let headers = cookie_headers(&format!("key={}", hash_password("letmein")));
        assert!(!auth.is_authenticated(&headers).await);
    }

    #[tokio::test]
    async fn from_hash_accepts_uppercase_hex() {
        let auth = PasswordAuth::from_hash(hash_password("hunter2").to_uppercase());
        let headers = cookie_headers(&format!("key={}", hash_password("hunter2")));
        assert!(auth.is_authenticated(&headers).await);
    }

    #[tokio::test]
    async fn no_auth_allows_everything() {
        assert!(NoAuth.is_authenticated(&HeaderMap::new()).await);
    }

    #[test]
    fn resolve_auth_requires_a_secret_in_password_mode() {
        assert!(resolve_auth(AuthMode::Password, None, None).is_err());
        let empty = SecretString::new(String::new());
        assert!(resolve_auth(AuthMode::Password, Some(&empty), None).is_err());
        assert!(resolve_auth(AuthMode::Password, None, Some("abc")).is_ok());
        assert!(resolve_auth(AuthMode::None, None, None).is_ok());
    }

    #[test]
    fn configured_mode_drives_resolution() {
        let mut auth = tessera_config::AuthConfig::default();
        assert!(resolve_auth(auth.mode, auth.password.as_ref(), None).is_err());

        auth.password = Some(SecretString::new("hunter2".into()));
        assert!(resolve_auth(auth.mode, auth.password.as_ref(), None).is_ok());

        let parsed: tessera_config::TesseraConfig =
            serde_json::from_str(r#"{"auth": {"mode": "none"}}"#).unwrap();
        assert_eq!(parsed.auth.mode, AuthMode::None);
        assert!(resolve_auth(parsed.auth.mode, None, None).is_ok());
    }

    #[test]
    fn login_redirect_carries_return_path() {
        let response = login_redirect("/resource");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[LOCATION], "/login?to=/resource");

        let response = login_redirect("/webview/a b&c");
        assert_eq!(
            response.headers()[LOCATION],
            "/login?to=/webview/a%20b%26c"
        );
    }
}
