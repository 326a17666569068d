//! Connection callbacks.
//!
//! Applications plug into a connection by implementing [`ConnectionHandler`].
//! Every method has a no-op default, so a handler only overrides what it needs.
//!
//! Callbacks run on the connection's own tasks: `on_message` runs inline on the
//! receive task, so the next read is not issued until it returns. Long-running
//! work should be moved off with `tokio::spawn`, and replies sent with
//! [`Connection::post`](crate::protocol::connection::Connection::post).

use std::fmt;

use bytes::Bytes;

use crate::protocol::connection::Connection;

/// Why a connection was disposed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// `disconnect()` was called on this side
    LocalRequest,
    /// The peer closed the stream (a read returned zero bytes)
    RemoteClosed,
    /// An I/O error ended the connection
    Interrupted,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectReason::LocalRequest => "local request",
            DisconnectReason::RemoteClosed => "remote closed",
            DisconnectReason::Interrupted => "connection interrupted",
        };
        f.write_str(s)
    }
}

/// Application hooks for one connection
pub trait ConnectionHandler: Send + Sync + 'static {
    /// The connection finished starting and is about to read
    fn on_connected(&self, _conn: &Connection) {}

    /// A non-empty unit arrived
    fn on_message(&self, _conn: &Connection, _opcode: u8, _body: Bytes) {}

    /// The connection was disposed; called exactly once per started connection
    fn on_disconnected(&self, _conn: &Connection, _reason: DisconnectReason) {}
}

/// Handler that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl ConnectionHandler for NoopHandler {}

impl<H: ConnectionHandler + ?Sized> ConnectionHandler for std::sync::Arc<H> {
    fn on_connected(&self, conn: &Connection) {
        (**self).on_connected(conn)
    }

    fn on_message(&self, conn: &Connection, opcode: u8, body: Bytes) {
        (**self).on_message(conn, opcode, body)
    }

    fn on_disconnected(&self, conn: &Connection, reason: DisconnectReason) {
        (**self).on_disconnected(conn, reason)
    }
}
