//! Incremental frame decoder.
//!
//! Converts an unbounded, chunked byte stream into [`Frame`] values,
//! preserving partial state across invocations because the underlying
//! channel may deliver data in arbitrary-sized, possibly single-byte,
//! increments.
//!
//! State machine:
//!
//! ```text
//! Start ──► ExtendedLen16 ──┐
//!   │  └──► ExtendedLen32 ──┼──► Payload ──► (frame complete) ──► Start
//!   └───────────────────────┘
//! ```
//!
//! Each transition fires only once enough bytes are buffered for that
//! step; otherwise [`FrameParser::parse`] returns `Ok(None)` and retains
//! everything buffered so far. The parser never blocks and never discards
//! bytes it cannot yet interpret.

use bytes::{Bytes, BytesMut};

use super::frame::Frame;
use super::wire_format::{
    Opcode, DEFAULT_MAX_PAYLOAD_SIZE, FIN_BIT, LENGTH_CLASS_U16, LENGTH_CLASS_U32, OPCODE_MASK,
    RSV_MASK, RSV_SHIFT,
};
use crate::error::{DispatchError, Result};

/// Parsing state.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for the 2-byte fixed header.
    Start,
    /// Header announced a 16-bit extended length; waiting for it.
    ExtendedLen16 { fin: bool, rsv: u8, opcode: Opcode },
    /// Header announced a 32-bit extended length; waiting for it.
    ExtendedLen32 { fin: bool, rsv: u8, opcode: Opcode },
    /// Header complete; waiting for `length` payload bytes.
    Payload {
        fin: bool,
        rsv: u8,
        opcode: Opcode,
        length: usize,
    },
}

/// Incremental decoder turning byte chunks into complete frames.
///
/// All buffered data lives in a single `BytesMut`; completed payloads are
/// split off and frozen without copying.
pub struct FrameParser {
    buffer: BytesMut,
    state: State,
    max_payload_size: usize,
}

impl FrameParser {
    /// Create a parser with the default 1 GiB payload ceiling.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a parser with a custom payload ceiling.
    pub fn with_max_payload(max_payload_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::Start,
            max_payload_size,
        }
    }

    /// Append raw bytes without extracting frames.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Append raw bytes and extract every complete frame.
    ///
    /// Returns an empty vector while the parser is still waiting for data.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.extend(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.parse()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Try to extract a single frame from the buffered bytes.
    ///
    /// Returns `Ok(None)` when more data is needed. Fails if the announced
    /// payload length exceeds the configured ceiling.
    pub fn parse(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.state {
                State::Start => {
                    if self.buffer.len() < 2 {
                        return Ok(None);
                    }

                    let first = self.buffer[0];
                    let fin = first & FIN_BIT != 0;
                    let rsv = (first & RSV_MASK) >> RSV_SHIFT;
                    let opcode = Opcode::from_u8(first & OPCODE_MASK)?;
                    let length_class = self.buffer[1];
                    let _ = self.buffer.split_to(2);

                    self.state = match length_class {
                        LENGTH_CLASS_U16 => State::ExtendedLen16 { fin, rsv, opcode },
                        LENGTH_CLASS_U32 => State::ExtendedLen32 { fin, rsv, opcode },
                        len => State::Payload {
                            fin,
                            rsv,
                            opcode,
                            length: len as usize,
                        },
                    };
                }

                State::ExtendedLen16 { fin, rsv, opcode } => {
                    if self.buffer.len() < 2 {
                        return Ok(None);
                    }

                    let length = u16::from_be_bytes([self.buffer[0], self.buffer[1]]) as usize;
                    let _ = self.buffer.split_to(2);
                    self.state = State::Payload {
                        fin,
                        rsv,
                        opcode,
                        length,
                    };
                }

                State::ExtendedLen32 { fin, rsv, opcode } => {
                    if self.buffer.len() < 4 {
                        return Ok(None);
                    }

                    let length = u32::from_be_bytes([
                        self.buffer[0],
                        self.buffer[1],
                        self.buffer[2],
                        self.buffer[3],
                    ]) as usize;
                    let _ = self.buffer.split_to(4);
                    self.state = State::Payload {
                        fin,
                        rsv,
                        opcode,
                        length,
                    };
                }

                State::Payload {
                    fin,
                    rsv,
                    opcode,
                    length,
                } => {
                    if length > self.max_payload_size {
                        return Err(DispatchError::Protocol(format!(
                            "payload size {length} exceeds maximum {}",
                            self.max_payload_size
                        )));
                    }

                    let payload = if length == 0 {
                        Bytes::new()
                    } else if self.buffer.len() >= length {
                        self.buffer.split_to(length).freeze()
                    } else {
                        return Ok(None);
                    };

                    self.state = State::Start;
                    return Ok(Some(Frame::new(fin, rsv, opcode, payload)));
                }
            }
        }
    }

    /// Number of buffered, not-yet-consumed bytes.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// True when no partial frame is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && matches!(self.state, State::Start)
    }

    /// Discard buffered bytes and reset to the initial state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::Start;
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}
