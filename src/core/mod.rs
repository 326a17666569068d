//! # Core Protocol Components
//!
//! Payloads, the frame codec and file-backed framing.
//!
//! ## Components
//! - **Payload**: opcode + body, with a typed field writer/reader
//! - **Codec**: Tokio codec for framing over byte streams
//! - **File**: synchronous reader/writer over the same format
//!
//! ## Wire Format
//! ```text
//! [Length(2, LE)] [Opcode(1)] [Body(Length - 1)]
//! ```
//!
//! ## Security
//! - Maximum unit size: 65535 bytes, fixed by the length field
//! - Allocation per unit never exceeds the declared length

pub mod codec;
pub mod file;
pub mod payload;
