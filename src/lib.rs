//! # opwire
//!
//! Opcode-tagged, length-prefixed message framing over TCP, TLS, in-memory
//! streams and files.
//!
//! Every message travels as one framing unit:
//!
//! ```text
//! [Length(2, LE)] [Opcode(1)] [Body(Length - 1)]
//! ```
//!
//! A unit with length zero is a keep-alive and is never delivered to the
//! application.
//!
//! ## Layout
//! - [`core`]: payloads, the frame codec and file framing
//! - [`protocol`]: the connection state machine and its callbacks
//! - [`transport`]: TCP, TLS and the [`Transport`](transport::Transport) seam
//! - [`config`]: TOML/env configuration with validation
//! - [`utils`]: logging, metrics and timeouts
//!
//! ## Example
//! ```no_run
//! use opwire::{tcp, ConnectionConfig, ConnectionHandler, Connection, Payload};
//! use bytes::Bytes;
//!
//! struct Printer;
//!
//! impl ConnectionHandler for Printer {
//!     fn on_message(&self, _conn: &Connection, opcode: u8, body: Bytes) {
//!         println!("opcode {opcode}: {} bytes", body.len());
//!     }
//! }
//!
//! # async fn run() -> opwire::Result<()> {
//! let conn = tcp::connect("127.0.0.1:7000", ConnectionConfig::default(), Printer).await?;
//! conn.send(&[Payload::new(1, &b"hello"[..])]).await?;
//! conn.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::config::{ConnectionConfig, KeepAliveConfig, LoggingConfig, NetworkConfig, TlsConfig};
pub use crate::core::codec::{Frame, FrameCodec};
pub use crate::core::file::{FrameFileReader, FrameFileWriter};
pub use crate::core::payload::{Payload, PayloadReader, PayloadWriter};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::connection::{Connection, ConnectionStats};
pub use crate::protocol::handler::{ConnectionHandler, DisconnectReason, NoopHandler};
pub use crate::transport::{tcp, Role, Transport};
