//! # Transport Layer
//!
//! Byte-stream transports a [`Connection`](crate::protocol::connection::Connection)
//! can run over.
//!
//! A transport is anything implementing [`Transport`]: an `AsyncRead +
//! AsyncWrite` stream that can optionally report its peer address and apply
//! socket options. TCP streams, Unix sockets and in-memory duplex streams are
//! supported out of the box. [`Stream`] wraps a transport in TLS when the
//! configuration asks for it.
//!
//! ## Submodules
//! - **tcp**: socket options, outbound connects and the accept loop
//! - **tls**: rustls configuration and the handshake for both roles

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::config::ConnectionConfig;

pub mod tcp;
pub mod tls;

/// Which end of the connection this side plays; selects the TLS handshake direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// A duplex byte stream a connection can own
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Remote address, when the transport has one
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Apply buffer sizes, linger, no-delay and keep-alive options
    fn configure(&self, _config: &ConnectionConfig) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for tokio::net::TcpStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        tokio::net::TcpStream::peer_addr(self).ok()
    }

    fn configure(&self, config: &ConnectionConfig) -> io::Result<()> {
        tcp::configure_socket(self, config)
    }
}

#[cfg(unix)]
impl Transport for tokio::net::UnixStream {}

impl Transport for tokio::io::DuplexStream {}

/// Plain or TLS-wrapped transport
pub enum Stream<T> {
    Plain(T),
    Tls(Box<tokio_rustls::TlsStream<T>>),
}

impl<T> Stream<T> {
    pub fn is_secure(&self) -> bool {
        matches!(self, Stream::Tls(_))
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> AsyncRead for Stream<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> AsyncWrite for Stream<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_flush(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
