//! WebSocket opening handshake (RFC 6455 §4.2.2).
//!
//! Only the server half is implemented, and only the bytes of it: the
//! dispatcher writes them straight onto the raw connection.

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    sha1::{Digest, Sha1},
};

/// Fixed GUID appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Request header carrying the client nonce.
pub const SEC_WEBSOCKET_KEY: &str = "sec-websocket-key";

/// `base64(sha1(client_key + GUID))`.
///
/// Callers must reject the upgrade before calling this when the key is absent.
pub fn compute_accept_token(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// The complete `101 Switching Protocols` response, terminated by the blank line.
pub fn switching_protocols_response(accept_token: &str) -> String {
    let lines = [
        "HTTP/1.1 101 Switching Protocols".to_string(),
        "Upgrade: websocket".to_string(),
        "Connection: Upgrade".to_string(),
        format!("Sec-WebSocket-Accept: {accept_token}"),
    ];
    lines.join("\r\n") + "\r\n\r\n"
}
