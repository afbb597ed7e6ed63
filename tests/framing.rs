//! Frame protocol integration tests.
//!
//! Exercises the encoder, the incremental parser, and the call envelope
//! together, across every length-class boundary.

use bytes::Bytes;

use taskwire::codec::MsgPackCodec;
use taskwire::protocol::wire_format::{encode_call_payload, encode_reply_payload};
use taskwire::protocol::{CallCode, CallEnvelope, CallRequest, Frame, FrameParser, Opcode};

/// Round-trip across the interesting payload sizes, for every opcode and
/// fin flag, including single-byte feeding for the smaller sizes.
#[test]
fn test_roundtrip_across_length_class_boundaries() {
    let sizes: &[usize] = &[0, 1, 253, 254, 255, 65535, 65536, 10 * 1024 * 1024];

    for &size in sizes {
        let payload = Bytes::from(vec![0x5A; size]);

        for opcode in [Opcode::Data, Opcode::Close, Opcode::Error] {
            for fin in [true, false] {
                let original = Frame::new(fin, 0b010, opcode, payload.clone());
                let encoded = original.encode();

                let mut parser = FrameParser::new();
                let frames = parser.push(&encoded).unwrap();

                assert_eq!(frames.len(), 1, "size {size}, opcode {opcode:?}");
                assert_eq!(frames[0], original, "size {size}, opcode {opcode:?}");
                assert!(parser.is_empty());
            }
        }
    }
}

/// Byte-at-a-time feeding reassembles identically. Kept to the smaller
/// boundary sizes; the large payloads above cover bulk reassembly.
#[test]
fn test_roundtrip_single_byte_increments() {
    let sizes: &[usize] = &[0, 1, 253, 254, 255, 1024];

    for &size in sizes {
        let original = Frame::data(Bytes::from(vec![0xA5; size]));
        let encoded = original.encode();

        let mut parser = FrameParser::new();
        let mut frames = Vec::new();
        for byte in &encoded {
            frames.extend(parser.push(std::slice::from_ref(byte)).unwrap());
        }

        assert_eq!(frames.len(), 1, "size {size}");
        assert_eq!(frames[0], original, "size {size}");
    }
}

/// A 10 MB frame split into uneven chunks reassembles byte-identically.
#[test]
fn test_large_frame_chunked_reassembly() {
    let payload: Vec<u8> = (0..10 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let original = Frame::data(Bytes::from(payload));
    let encoded = original.encode();

    let mut parser = FrameParser::new();
    let mut frames = Vec::new();
    for chunk in encoded.chunks(7919) {
        frames.extend(parser.push(chunk).unwrap());
    }

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0], original);
}

/// Full frame + MsgPack payload cycle.
#[test]
fn test_frame_with_msgpack_payload() {
    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Workload {
        id: i32,
        message: String,
    }

    let workload = Workload {
        id: 42,
        message: "Hello, world!".to_string(),
    };

    let args = MsgPackCodec::encode(&workload).unwrap();
    let frame = Frame::data(encode_call_payload(7, "process", &args));

    let mut parser = FrameParser::new();
    let frames = parser.push(&frame.encode()).unwrap();
    assert_eq!(frames.len(), 1);

    let envelope = CallEnvelope::decode(&frames[0].payload).unwrap();
    assert_eq!(envelope.call_id, 7);
    assert_eq!(envelope.code, CallCode::Call);

    let request = CallRequest::decode(&envelope.body).unwrap();
    assert_eq!(request.procedure, "process");

    let decoded: Workload = MsgPackCodec::decode(&request.args).unwrap();
    assert_eq!(decoded, workload);
}

/// Several frames written back-to-back parse in order.
#[test]
fn test_multiple_frames_sequence() {
    let mut all_bytes = Vec::new();
    for i in 1u32..=5 {
        let payload = encode_reply_payload(i, CallCode::CallResult, format!("r{i}").as_bytes());
        all_bytes.extend_from_slice(&Frame::data(payload).encode());
    }

    let mut parser = FrameParser::new();
    let frames = parser.push(&all_bytes).unwrap();
    assert_eq!(frames.len(), 5);

    for (i, frame) in frames.iter().enumerate() {
        let envelope = CallEnvelope::decode(&frame.payload).unwrap();
        assert_eq!(envelope.call_id, (i + 1) as u32);
        assert_eq!(&envelope.body[..], format!("r{}", i + 1).as_bytes());
    }
}

/// Streamed result pattern: non-final fragments followed by a fin frame,
/// all sharing one call id.
#[test]
fn test_streamed_result_fragments() {
    let call_id = 99u32;
    let mut all_bytes = Vec::new();

    for part in [&b"alpha-"[..], &b"beta-"[..]] {
        let payload = encode_reply_payload(call_id, CallCode::CallResult, part);
        all_bytes.extend_from_slice(&Frame::data_fragment(payload).encode());
    }
    let final_payload = encode_reply_payload(call_id, CallCode::CallResult, b"gamma");
    all_bytes.extend_from_slice(&Frame::data(final_payload).encode());

    let mut parser = FrameParser::new();
    let frames = parser.push(&all_bytes).unwrap();
    assert_eq!(frames.len(), 3);

    let mut assembled = Vec::new();
    for frame in &frames {
        let envelope = CallEnvelope::decode(&frame.payload).unwrap();
        assert_eq!(envelope.call_id, call_id);
        assembled.extend_from_slice(&envelope.body);
    }

    assert!(!frames[0].is_fin());
    assert!(!frames[1].is_fin());
    assert!(frames[2].is_fin());
    assert_eq!(assembled, b"alpha-beta-gamma");
}

/// An error reply round-trips as UTF-8 text.
#[test]
fn test_error_reply_roundtrip() {
    let payload = encode_reply_payload(3, CallCode::CallError, "stack trace here".as_bytes());
    let frame = Frame::data(payload);

    let mut parser = FrameParser::new();
    let frames = parser.push(&frame.encode()).unwrap();

    let envelope = CallEnvelope::decode(&frames[0].payload).unwrap();
    assert_eq!(envelope.code, CallCode::CallError);
    assert_eq!(String::from_utf8_lossy(&envelope.body), "stack trace here");
}
