//! Property-based tests using proptest
//!
//! These tests check framing invariants across randomly generated payload
//! batches and arbitrary read boundaries.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use opwire::config::MAX_BODY_LEN;
use opwire::{Frame, FrameCodec, Payload, PayloadReader, PayloadWriter, ProtocolError};
use proptest::prelude::*;
use tokio_util::codec::Decoder;

fn payload_strategy() -> impl Strategy<Value = Payload> {
    (any::<u8>(), prop::collection::vec(any::<u8>(), 0..2048))
        .prop_map(|(opcode, body)| Payload::new(opcode, body))
}

fn decode_messages(codec: &mut FrameCodec, buf: &mut BytesMut, out: &mut Vec<Payload>) {
    while let Some(frame) = codec.decode(buf).expect("decode never fails") {
        if let Frame::Message(p) = frame {
            out.push(p);
        }
    }
}

// Property: a serialized batch decodes to the same payloads, however the
// bytes are split into reads
proptest! {
    #[test]
    fn prop_batch_survives_any_chunking(
        payloads in prop::collection::vec(payload_strategy(), 1..20),
        chunk in 1usize..97,
    ) {
        let wire = FrameCodec::serialize(&payloads).unwrap();

        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(chunk) {
            buf.extend_from_slice(piece);
            decode_messages(&mut codec, &mut buf, &mut decoded);
        }

        prop_assert_eq!(decoded, payloads);
        prop_assert!(codec.is_idle());
        prop_assert!(buf.is_empty());
    }
}

// Property: serialized size is the sum of prefix + opcode + body
proptest! {
    #[test]
    fn prop_serialized_length(payloads in prop::collection::vec(payload_strategy(), 1..20)) {
        let wire = FrameCodec::serialize(&payloads).unwrap();
        let expected: usize = payloads.iter().map(|p| 3 + p.body.len()).sum();
        prop_assert_eq!(wire.len(), expected);
    }
}

// Property: keep-alive units interleaved anywhere are never delivered
proptest! {
    #[test]
    fn prop_keepalives_never_delivered(
        payloads in prop::collection::vec(payload_strategy(), 0..10),
        keepalive_mask in prop::collection::vec(any::<bool>(), 10),
    ) {
        let mut wire = BytesMut::new();
        let mut keepalives = 0;
        for (i, p) in payloads.iter().enumerate() {
            if keepalive_mask[i] {
                wire.extend_from_slice(&FrameCodec::keepalive());
                keepalives += 1;
            }
            wire.extend_from_slice(&FrameCodec::serialize(std::slice::from_ref(p)).unwrap());
        }

        let mut codec = FrameCodec::new();
        let mut seen_keepalives = 0;
        let mut decoded = Vec::new();
        while let Some(frame) = codec.decode(&mut wire).unwrap() {
            match frame {
                Frame::KeepAlive => seen_keepalives += 1,
                Frame::Message(p) => decoded.push(p),
            }
        }

        prop_assert_eq!(decoded, payloads);
        prop_assert_eq!(seen_keepalives, keepalives);
    }
}

// Property: a batch containing any oversized payload produces no bytes
proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]
    #[test]
    fn prop_oversized_batch_rejected(
        before in prop::collection::vec(payload_strategy(), 0..4),
        extra in 1usize..64,
    ) {
        let mut batch = before;
        batch.push(Payload::new(1, vec![0u8; MAX_BODY_LEN + extra]));

        let result = FrameCodec::serialize(&batch);
        let is_oversized = matches!(result, Err(ProtocolError::OversizedPayload(_)));
        prop_assert!(is_oversized);
    }
}

// Property: typed fields read back in the order they were written
proptest! {
    #[test]
    fn prop_payload_fields_roundtrip(
        opcode in any::<u8>(),
        a in any::<u32>(),
        b in any::<i64>(),
        c in any::<bool>(),
        s in "[a-zA-Z0-9 ]{0,64}",
        raw in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let payload = PayloadWriter::new(opcode)
            .put_u32(a)
            .put_i64(b)
            .put_bool(c)
            .put_str(&s)
            .put_bytes(&raw)
            .finish()
            .unwrap();
        prop_assert_eq!(payload.opcode, opcode);

        let mut reader = PayloadReader::new(&payload);
        prop_assert_eq!(reader.get_u32().unwrap(), a);
        prop_assert_eq!(reader.get_i64().unwrap(), b);
        prop_assert_eq!(reader.get_bool().unwrap(), c);
        prop_assert_eq!(reader.get_str().unwrap(), s);
        prop_assert_eq!(&reader.get_bytes().unwrap()[..], &raw[..]);
        prop_assert_eq!(reader.remaining(), 0);
    }
}
