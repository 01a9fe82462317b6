//! Protocol sniffing for the shared accept loop.
//!
//! Every accepted connection has its first bytes read and inspected. A TLS
//! handshake record goes through the [`TlsTerminator`]; anything else is
//! treated as plaintext HTTP. The inspected bytes are replayed with
//! [`Rewind`] so neither side ever sees a truncated stream.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use {
    bytes::{Buf, Bytes, BytesMut},
    tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf},
    tracing::{debug, trace},
};

use crate::tls::TlsTerminator;

/// Content type byte of a TLS handshake record (ClientHello).
pub const TLS_HANDSHAKE_RECORD: u8 = 0x16;

const SNIFF_CAPACITY: usize = 512;

/// A bidirectional byte stream: TCP, Unix, TLS or an in-memory pipe.
pub trait RawStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + ?Sized> RawStream for T {}

pub type BoxedStream = Box<dyn RawStream>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tls,
    Plain,
}

/// Stream wrapper that yields `prefix` before reading from `inner`.
pub struct Rewind<T> {
    prefix: Bytes,
    inner: T,
}

impl<T> Rewind<T> {
    pub fn new(prefix: Bytes, inner: T) -> Self {
        Self { prefix, inner }
    }

    /// Bytes not yet replayed, plus the wrapped stream.
    pub fn into_parts(self) -> (Bytes, T) {
        (self.prefix, self.inner)
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for Rewind<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() && buf.remaining() > 0 {
            let n = this.prefix.len().min(buf.remaining());
            buf.put_slice(&this.prefix[..n]);
            this.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Rewind<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Read the first chunk of `stream` and classify it.
///
/// Returns the bytes consumed so the caller can replay them.
pub async fn sniff<S: AsyncRead + Unpin + ?Sized>(stream: &mut S) -> io::Result<(Protocol, Bytes)> {
    let mut buf = BytesMut::with_capacity(SNIFF_CAPACITY);
    let n = stream.read_buf(&mut buf).await?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before the first byte",
        ));
    }
    let protocol = if buf[0] == TLS_HANDSHAKE_RECORD {
        Protocol::Tls
    } else {
        Protocol::Plain
    };
    Ok((protocol, buf.freeze()))
}

/// Sniff `stream` and terminate TLS when the client opened with a handshake.
pub async fn negotiate(
    mut stream: BoxedStream,
    tls: Option<&TlsTerminator>,
) -> io::Result<BoxedStream> {
    let (protocol, prefix) = sniff(&mut stream).await?;
    let rewound = Rewind::new(prefix, stream);
    match (protocol, tls) {
        (Protocol::Tls, Some(terminator)) => {
            trace!("tls client hello, terminating");
            terminator.accept(rewound).await
        },
        (Protocol::Tls, None) => {
            // Let the HTTP layer answer with a 400.
            debug!("tls client hello on a plaintext-only listener");
            Ok(Box::new(rewound))
        },
        (Protocol::Plain, _) => Ok(Box::new(rewound)),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        tokio::io::{AsyncWriteExt, duplex},
    };

    #[tokio::test]
    async fn sniff_classifies_tls_and_plaintext() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[0x16, 0x03, 0x01]).await.unwrap();
        let (protocol, prefix) = sniff(&mut server).await.unwrap();
        assert_eq!(protocol, Protocol::Tls);
        assert_eq!(&prefix[..], &[0x16, 0x03, 0x01]);

        let (mut client, mut server) = duplex(64);
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        let (protocol, _) = sniff(&mut server).await.unwrap();
        assert_eq!(protocol, Protocol::Plain);
    }

    #[tokio::test]
    async fn sniff_reports_early_eof() {
        let (client, mut server) = duplex(64);
        drop(client);
        let err = sniff(&mut server).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn rewind_replays_prefix_before_inner() {
        let (mut client, server) = duplex(64);
        client.write_all(b" world").await.unwrap();
        drop(client);

        let mut rewound = Rewind::new(Bytes::from_static(b"hello"), server);
        let mut out = String::new();
        rewound.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn negotiate_passes_plaintext_through_intact() {
        let (mut client, server) = duplex(256);
        client
            .write_all(b"GET /healthz HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        drop(client);

        let mut stream = negotiate(Box::new(server), None).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"GET /healthz HTTP/1.1\r\n\r\n");
    }
}
