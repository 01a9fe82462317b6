//! Typed view of a raw HTTP/1.1 request head.
//!
//! The accept loop reads the head itself so that upgrade requests can be
//! answered on the raw connection. Everything else is replayed to hyper.

use std::{collections::HashMap, io, time::Duration};

use {
    bytes::BytesMut,
    http::{HeaderMap, HeaderName, HeaderValue, Method},
    httparse::Status,
    tokio::io::{AsyncRead, AsyncReadExt},
    url::form_urlencoded,
};

/// Upper bound on the size of a request head.
pub const MAX_HEAD_LEN: usize = 16 * 1024;

/// How long a client may take to send its request head.
pub const HEAD_READ_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_HEADERS: usize = 64;

#[derive(Debug, Clone)]
pub struct RequestHead {
    method: Method,
    path: String,
    query: HashMap<String, String>,
    headers: HeaderMap,
    head_len: usize,
}

impl RequestHead {
    /// Parse a head from `buf`. `Ok(None)` means more bytes are needed.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>, String> {
        let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut storage);
        let head_len = match parsed.parse(buf).map_err(|e| e.to_string())? {
            Status::Complete(len) => len,
            Status::Partial => return Ok(None),
        };

        let method = parsed
            .method
            .ok_or_else(|| "missing method".to_string())
            .and_then(|m| Method::from_bytes(m.as_bytes()).map_err(|e| e.to_string()))?;
        let target = parsed.path.ok_or_else(|| "missing target".to_string())?;
        let (path, raw_query) = target.split_once('?').unwrap_or((target, ""));
        let query = form_urlencoded::parse(raw_query.as_bytes())
            .into_owned()
            .collect();

        let mut headers = HeaderMap::with_capacity(parsed.headers.len());
        for header in parsed.headers.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|_| format!("invalid header name: {}", header.name))?;
            let value = HeaderValue::from_bytes(header.value)
                .map_err(|_| format!("invalid value for header {}", header.name))?;
            headers.append(name, value);
        }

        Ok(Some(Self {
            method,
            path: path.to_string(),
            query,
            headers,
            head_len,
        }))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of `name`, if it is valid visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Length in bytes of the head, including the terminating blank line.
    pub fn head_len(&self) -> usize {
        self.head_len
    }

    /// `Upgrade: websocket` on a GET request.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.method == Method::GET
            && self
                .headers
                .get_all(http::header::UPGRADE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(','))
                .any(|token| token.trim().eq_ignore_ascii_case("websocket"))
    }
}

/// Read from `stream` into `buf` until a full head is parsed.
///
/// Returns `None` when the bytes cannot be parsed as a head: malformed,
/// longer than [`MAX_HEAD_LEN`], or cut short by EOF. The caller replays `buf`
/// to the HTTP stack, which answers with its own error response. No timeout is
/// applied here; a head that never completes is closed by the caller after
/// [`HEAD_READ_TIMEOUT`] without any response.
pub async fn read_head<S: AsyncRead + Unpin + ?Sized>(
    stream: &mut S,
    buf: &mut BytesMut,
) -> io::Result<Option<RequestHead>> {
    loop {
        if !buf.is_empty() {
            match RequestHead::parse(&buf[..]) {
                Ok(Some(head)) => return Ok(Some(head)),
                Ok(None) if buf.len() < MAX_HEAD_LEN => {},
                Ok(None) | Err(_) => return Ok(None),
            }
        }
        if stream.read_buf(buf).await? == 0 {
            return Ok(None);
        }
    }
}
