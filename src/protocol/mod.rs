//! # Protocol Layer
//!
//! The connection state machine and the callbacks it drives.
//!
//! ## Components
//! - **Connection**: start, send, receive loop and single-shot disposal
//! - **Handler**: application hooks and disconnect reasons
//! - **Keep-alive**: resettable send-side idle timer

pub mod connection;
pub mod handler;
mod keepalive;
