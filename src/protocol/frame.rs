//! Frame value type.
//!
//! A [`Frame`] is one immutable length-prefixed message unit on a worker
//! channel. Uses `bytes::Bytes` for zero-copy payload sharing. Decoding is
//! the job of [`FrameParser`](super::FrameParser) because it must be
//! incremental; this module only encodes.
//!
//! # Example
//!
//! ```
//! use taskwire::protocol::{Frame, Opcode};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(true, 0, Opcode::Data, Bytes::from_static(b"hello"));
//! let encoded = frame.encode();
//! assert_eq!(encoded.len(), 2 + 5); // 2-byte header + payload
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{put_header, Opcode};

/// One protocol frame: fin flag, reserved bits, opcode, payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a logical message.
    pub fin: bool,
    /// Reserved bits (3 bits, application-defined).
    pub rsv: u8,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(fin: bool, rsv: u8, opcode: Opcode, payload: Bytes) -> Self {
        debug_assert!(rsv <= 0b111);
        Self {
            fin,
            rsv,
            opcode,
            payload,
        }
    }

    /// Create a final DATA frame, the common case.
    pub fn data(payload: Bytes) -> Self {
        Self::new(true, 0, Opcode::Data, payload)
    }

    /// Create a non-final DATA fragment.
    pub fn data_fragment(payload: Bytes) -> Self {
        Self::new(false, 0, Opcode::Data, payload)
    }

    /// Create an empty CLOSE frame.
    pub fn close() -> Self {
        Self::new(true, 0, Opcode::Close, Bytes::new())
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Check if this is the final fragment of its message.
    #[inline]
    pub fn is_fin(&self) -> bool {
        self.fin
    }

    /// Encode header and payload into a contiguous buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(6 + self.payload.len());
        put_header(&mut buf, self.fin, self.rsv, self.opcode, self.payload.len());
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Encode only the header.
    ///
    /// Used by the writer to avoid copying large payloads into the header
    /// buffer.
    pub fn encode_header(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(6);
        put_header(&mut buf, self.fin, self.rsv, self.opcode, self.payload.len());
        buf.freeze()
    }
}
