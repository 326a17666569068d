//! # Payloads
//!
//! A [`Payload`] is one opcode byte plus a variable-length body. The opcode is
//! meaningful only to the application; the framing layer never inspects it.
//!
//! [`PayloadWriter`] and [`PayloadReader`] encode typed fields into a body in
//! little-endian order. Byte strings and UTF-8 strings carry a `u16` length
//! prefix.
//!
//! ```rust
//! use opwire::core::payload::{PayloadReader, PayloadWriter};
//!
//! # fn main() -> opwire::error::Result<()> {
//! let payload = PayloadWriter::new(0x10).put_u32(7).put_str("hello").finish()?;
//!
//! let mut reader = PayloadReader::new(&payload);
//! assert_eq!(reader.get_u32()?, 7);
//! assert_eq!(reader.get_str()?, "hello");
//! # Ok(())
//! # }
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::config::{MAX_BODY_LEN, MAX_FRAME_LEN};
use crate::error::constants::{ERR_INVALID_UTF8, ERR_READ_PAST_END};
use crate::error::{ProtocolError, Result};

/// One application message: opcode plus body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub opcode: u8,
    pub body: Bytes,
}

impl Payload {
    pub fn new(opcode: u8, body: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            body: body.into(),
        }
    }

    /// Payload with an empty body
    pub fn empty(opcode: u8) -> Self {
        Self {
            opcode,
            body: Bytes::new(),
        }
    }

    /// Value of the length field for this payload (opcode byte + body)
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.body.len() + 1
    }

    /// Check the payload fits in one framing unit
    pub fn validate(&self) -> Result<()> {
        if self.body.len() > MAX_BODY_LEN {
            return Err(ProtocolError::OversizedPayload(self.frame_len()));
        }
        Ok(())
    }
}

/// Builds a payload body field by field
#[derive(Debug)]
pub struct PayloadWriter {
    opcode: u8,
    body: BytesMut,
    overflow: Option<usize>,
}

impl PayloadWriter {
    pub fn new(opcode: u8) -> Self {
        Self {
            opcode,
            body: BytesMut::new(),
            overflow: None,
        }
    }

    pub fn put_u8(mut self, v: u8) -> Self {
        self.body.put_u8(v);
        self
    }

    pub fn put_bool(self, v: bool) -> Self {
        self.put_u8(v as u8)
    }

    pub fn put_u16(mut self, v: u16) -> Self {
        self.body.put_u16_le(v);
        self
    }

    pub fn put_i16(mut self, v: i16) -> Self {
        self.body.put_i16_le(v);
        self
    }

    pub fn put_u32(mut self, v: u32) -> Self {
        self.body.put_u32_le(v);
        self
    }

    pub fn put_i32(mut self, v: i32) -> Self {
        self.body.put_i32_le(v);
        self
    }

    pub fn put_u64(mut self, v: u64) -> Self {
        self.body.put_u64_le(v);
        self
    }

    pub fn put_i64(mut self, v: i64) -> Self {
        self.body.put_i64_le(v);
        self
    }

    pub fn put_f32(mut self, v: f32) -> Self {
        self.body.put_f32_le(v);
        self
    }

    pub fn put_f64(mut self, v: f64) -> Self {
        self.body.put_f64_le(v);
        self
    }

    /// Raw bytes with no length prefix
    pub fn put_raw(mut self, v: &[u8]) -> Self {
        self.body.put_slice(v);
        self
    }

    /// Length-prefixed byte string
    pub fn put_bytes(mut self, v: &[u8]) -> Self {
        match u16::try_from(v.len()) {
            Ok(len) => {
                self.body.put_u16_le(len);
                self.body.put_slice(v);
            }
            Err(_) => self.overflow = Some(v.len()),
        }
        self
    }

    /// Length-prefixed UTF-8 string
    pub fn put_str(self, v: &str) -> Self {
        self.put_bytes(v.as_bytes())
    }

    /// Finish the payload, failing if any field or the body overflowed
    pub fn finish(self) -> Result<Payload> {
        if let Some(len) = self.overflow {
            return Err(ProtocolError::OversizedPayload(len));
        }
        if self.body.len() > MAX_BODY_LEN {
            return Err(ProtocolError::OversizedPayload(self.body.len() + 1));
        }
        debug_assert!(self.body.len() < MAX_FRAME_LEN);
        Ok(Payload {
            opcode: self.opcode,
            body: self.body.freeze(),
        })
    }
}

/// Reads typed fields back out of a payload body
#[derive(Debug)]
pub struct PayloadReader {
    body: Bytes,
}

macro_rules! getter {
    ($name:ident, $ty:ty, $get:ident) => {
        pub fn $name(&mut self) -> Result<$ty> {
            self.need(std::mem::size_of::<$ty>())?;
            Ok(self.body.$get())
        }
    };
}

impl PayloadReader {
    pub fn new(payload: &Payload) -> Self {
        Self {
            body: payload.body.clone(),
        }
    }

    /// Bytes left unread
    pub fn remaining(&self) -> usize {
        self.body.remaining()
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.body.remaining() < n {
            return Err(ProtocolError::CorruptData(ERR_READ_PAST_END));
        }
        Ok(())
    }

    getter!(get_u8, u8, get_u8);
    getter!(get_u16, u16, get_u16_le);
    getter!(get_i16, i16, get_i16_le);
    getter!(get_u32, u32, get_u32_le);
    getter!(get_i32, i32, get_i32_le);
    getter!(get_u64, u64, get_u64_le);
    getter!(get_i64, i64, get_i64_le);
    getter!(get_f32, f32, get_f32_le);
    getter!(get_f64, f64, get_f64_le);

    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    /// Length-prefixed byte string
    pub fn get_bytes(&mut self) -> Result<Bytes> {
        let len = self.get_u16()? as usize;
        self.need(len)?;
        Ok(self.body.split_to(len))
    }

    /// Length-prefixed UTF-8 string
    pub fn get_str(&mut self) -> Result<String> {
        let raw = self.get_bytes()?;
        String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::CorruptData(ERR_INVALID_UTF8))
    }
}
