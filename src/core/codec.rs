//! # Frame Codec
//!
//! Turns a raw byte stream into discrete framing units and back.
//!
//! ## Wire Format
//! ```text
//! [Length(2, LE)] [Opcode(1)] [Body(Length - 1)]
//! ```
//! A unit with `Length == 0` carries no opcode: it is the keep-alive sentinel.
//!
//! ## Decoding
//! The decoder is a two-phase accumulator. In the length phase it waits for
//! exactly two bytes; in the payload phase it waits for exactly `Length`
//! bytes, then yields the unit and returns to the length phase. Partial reads
//! are kept in the source buffer between calls. A single unit never reserves
//! more than 65535 bytes, whatever the peer sends.
//!
//! ## Encoding
//! [`FrameCodec::serialize`] coalesces a batch of payloads into a single buffer
//! so the connection can issue one write per batch.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::config::MAX_FRAME_LEN;
use crate::core::payload::Payload;
use crate::error::{ProtocolError, Result};

/// Size of the length prefix
pub const LENGTH_PREFIX: usize = 2;

/// Encoded keep-alive sentinel
pub const KEEPALIVE_FRAME: [u8; LENGTH_PREFIX] = [0, 0];

/// One decoded framing unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Zero-length unit; never delivered to the application
    KeepAlive,
    /// Opcode + body
    Message(Payload),
}

impl Frame {
    /// Bytes this unit occupies on the wire
    pub fn wire_len(&self) -> usize {
        match self {
            Frame::KeepAlive => LENGTH_PREFIX,
            Frame::Message(p) => LENGTH_PREFIX + p.frame_len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Length,
    Payload(usize),
}

/// Length-prefixed framing codec
#[derive(Debug)]
pub struct FrameCodec {
    phase: Phase,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            phase: Phase::Length,
        }
    }

    /// True when no unit is partially decoded
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Length
    }

    /// Serialize a batch of payloads into one contiguous buffer.
    ///
    /// Fails with `OversizedPayload` before writing anything if any payload
    /// does not fit the length field.
    pub fn serialize(payloads: &[Payload]) -> Result<Bytes> {
        let mut total = 0usize;
        for p in payloads {
            p.validate()?;
            total += LENGTH_PREFIX + p.frame_len();
        }

        let mut buf = BytesMut::with_capacity(total);
        for p in payloads {
            put_payload(p, &mut buf);
        }
        Ok(buf.freeze())
    }

    /// The encoded keep-alive sentinel
    pub fn keepalive() -> Bytes {
        Bytes::from_static(&KEEPALIVE_FRAME)
    }
}

fn put_payload(p: &Payload, dst: &mut BytesMut) {
    // validated by the caller
    dst.put_u16_le(p.frame_len() as u16);
    dst.put_u8(p.opcode);
    dst.put_slice(&p.body);
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            match self.phase {
                Phase::Length => {
                    if src.len() < LENGTH_PREFIX {
                        src.reserve(LENGTH_PREFIX - src.len());
                        return Ok(None);
                    }
                    let len = src.get_u16_le() as usize;
                    if len == 0 {
                        trace!("keep-alive unit decoded");
                        return Ok(Some(Frame::KeepAlive));
                    }
                    debug_assert!(len <= MAX_FRAME_LEN);
                    self.phase = Phase::Payload(len);
                }
                Phase::Payload(len) => {
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }
                    let mut unit = src.split_to(len);
                    let opcode = unit.get_u8();
                    self.phase = Phase::Length;
                    trace!(opcode, len, "unit decoded");
                    return Ok(Some(Frame::Message(Payload {
                        opcode,
                        body: unit.freeze(),
                    })));
                }
            }
        }
    }
}

impl Encoder<Payload> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Payload, dst: &mut BytesMut) -> Result<()> {
        item.validate()?;
        dst.reserve(LENGTH_PREFIX + item.frame_len());
        put_payload(&item, dst);
        Ok(())
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        match item {
            Frame::KeepAlive => {
                dst.extend_from_slice(&KEEPALIVE_FRAME);
                Ok(())
            }
            Frame::Message(p) => self.encode(p, dst),
        }
    }
}
