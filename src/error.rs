//! # Error Types
//!
//! Error handling for the framing protocol.
//!
//! This module defines every error variant that can surface from the public API,
//! from caller mistakes (bad arguments, double start) to corrupt framing data.
//!
//! ## Error Categories
//! - **Caller Errors**: `InvalidArgument`, `InvalidState`, `OversizedPayload`
//! - **Data Errors**: `CorruptData` for truncated or malformed units
//! - **I/O Errors**: Network and file system failures
//! - **TLS Errors**: Certificate and handshake issues
//!
//! I/O failures on a running connection never reach the caller as errors: they
//! are absorbed into the disconnect lifecycle and reported through
//! [`ConnectionHandler::on_disconnected`](crate::protocol::handler::ConnectionHandler::on_disconnected).
//!
//! ## Example Usage
//! ```rust
//! use opwire::core::payload::Payload;
//! use opwire::error::{ProtocolError, Result};
//!
//! fn checked(opcode: u8, body: Vec<u8>) -> Result<Payload> {
//!     let payload = Payload::new(opcode, body);
//!     payload.validate()?;
//!     Ok(payload)
//! }
//!
//! assert!(matches!(
//!     checked(1, vec![0; 70_000]),
//!     Err(ProtocolError::OversizedPayload(_))
//! ));
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Lifecycle errors
    pub const ERR_ALREADY_STARTED: &str = "Connection already started";
    pub const ERR_DISPOSED: &str = "Connection has been disposed";
    pub const ERR_NOT_STARTED: &str = "Connection has not been started";

    /// Argument errors
    pub const ERR_EMPTY_BATCH: &str = "Payload collection must not be empty";

    /// Framing errors
    pub const ERR_TRUNCATED_LENGTH: &str = "Truncated length prefix at end of data";
    pub const ERR_TRUNCATED_BODY: &str = "Truncated payload at end of data";
    pub const ERR_READ_PAST_END: &str = "Read past end of payload body";
    pub const ERR_INVALID_UTF8: &str = "Payload string is not valid UTF-8";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Payload too large: {0} bytes (max 65535)")]
    OversizedPayload(usize),

    #[error("Corrupt framing data: {0}")]
    CorruptData(&'static str),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("TLS error: {0}")]
    TlsError(String),
}

impl ProtocolError {
    /// Returns true for caller mistakes that are surfaced synchronously
    /// (as opposed to I/O conditions absorbed by the connection lifecycle).
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidArgument(_)
                | ProtocolError::InvalidState(_)
                | ProtocolError::OversizedPayload(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
