//! Wire format encoding and decoding.
//!
//! Frame header layout (all multi-byte integers Big Endian):
//!
//! ```text
//! ┌──────────────────────────────┬──────────────┬─────────────────┐
//! │ FIN(1) | RSV(3) | OPCODE(4)  │ length class │ extended length │
//! │ 1 byte                       │ 1 byte       │ 0, 2 or 4 bytes │
//! └──────────────────────────────┴──────────────┴─────────────────┘
//! ```
//!
//! Length classes: values 0–253 carry the payload length directly in the
//! second byte; 254 flags a following u16 length; 255 flags a following
//! u32 length. Common control and small result frames therefore cost a
//! 2-byte header while multi-gigabyte payloads remain expressible.
//!
//! DATA payloads carry a call envelope: a 4-byte call id, a 1-byte call
//! code, and the code-specific body (see [`CallEnvelope`]).

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{DispatchError, Result};

/// FIN bit in the first header byte.
pub const FIN_BIT: u8 = 0b1000_0000;

/// Mask covering the three RSV bits.
pub const RSV_MASK: u8 = 0b0111_0000;

/// Right-shift that aligns the RSV bits to the low end.
pub const RSV_SHIFT: u8 = 4;

/// Mask covering the opcode nibble.
pub const OPCODE_MASK: u8 = 0b0000_1111;

/// Largest payload length encodable directly in the length-class byte.
pub const MAX_INLINE_LENGTH: usize = 253;

/// Length class announcing a following 16-bit extended length.
pub const LENGTH_CLASS_U16: u8 = 254;

/// Length class announcing a following 32-bit extended length.
pub const LENGTH_CLASS_U32: u8 = 255;

/// Default maximum payload size accepted by the parser (1 GiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1_073_741_824;

/// Maximum procedure-name length in a CALL envelope.
pub const MAX_PROCEDURE_LENGTH: usize = 255;

/// Call ids wrap back to [`MIN_CALL_ID`] upon reaching this value.
pub const MAX_CALL_ID: u32 = 2_147_483_647;

/// Smallest call id issued after a wrap.
pub const MIN_CALL_ID: u32 = 1;

/// Size of the `[call id][call code]` prefix inside a DATA payload.
pub const ENVELOPE_PREFIX_SIZE: usize = 5;

/// Frame opcode.
///
/// Anything outside this set indicates protocol desynchronization, which
/// is unrecoverable for the worker session that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Application data (call requests and results).
    Data = 0x00,
    /// Graceful worker shutdown notice.
    Close = 0x0A,
    /// Worker-reported non-fatal failure.
    Error = 0x0B,
}

impl Opcode {
    /// Decode an opcode nibble.
    pub fn from_u8(raw: u8) -> Result<Self> {
        match raw {
            0x00 => Ok(Opcode::Data),
            0x0A => Ok(Opcode::Close),
            0x0B => Ok(Opcode::Error),
            other => Err(DispatchError::Protocol(format!(
                "unexpected frame opcode: 0x{other:02X}"
            ))),
        }
    }
}

/// Call code inside a DATA payload envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CallCode {
    /// Dispatcher → worker procedure invocation.
    Call = 1,
    /// Worker → dispatcher successful result (or result fragment).
    CallResult = 2,
    /// Worker → dispatcher application-level failure report.
    CallError = 3,
}

impl CallCode {
    /// Decode a call-code byte.
    pub fn from_u8(raw: u8) -> Result<Self> {
        match raw {
            1 => Ok(CallCode::Call),
            2 => Ok(CallCode::CallResult),
            3 => Ok(CallCode::CallError),
            other => Err(DispatchError::Protocol(format!(
                "unexpected call code: {other}"
            ))),
        }
    }
}

/// Pack the first header byte from its parts.
#[inline]
pub fn pack_first_byte(fin: bool, rsv: u8, opcode: Opcode) -> u8 {
    ((fin as u8) << 7) | ((rsv << RSV_SHIFT) & RSV_MASK) | (opcode as u8)
}

/// Append the variable-length header for `payload_len` to `buf`.
pub fn put_header(buf: &mut BytesMut, fin: bool, rsv: u8, opcode: Opcode, payload_len: usize) {
    buf.put_u8(pack_first_byte(fin, rsv, opcode));

    if payload_len > u16::MAX as usize {
        buf.put_u8(LENGTH_CLASS_U32);
        buf.put_u32(payload_len as u32);
    } else if payload_len > MAX_INLINE_LENGTH {
        buf.put_u8(LENGTH_CLASS_U16);
        buf.put_u16(payload_len as u16);
    } else {
        buf.put_u8(payload_len as u8);
    }
}

/// Decoded `[call id][call code][body]` envelope from a DATA payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEnvelope {
    /// The call this payload belongs to.
    pub call_id: u32,
    /// Semantic role of the body.
    pub code: CallCode,
    /// Code-specific body (zero-copy slice of the frame payload).
    pub body: Bytes,
}

impl CallEnvelope {
    /// Split a DATA payload into its envelope parts.
    pub fn decode(payload: &Bytes) -> Result<Self> {
        if payload.len() < ENVELOPE_PREFIX_SIZE {
            return Err(DispatchError::Protocol(format!(
                "DATA payload too short for call envelope: {} bytes",
                payload.len()
            )));
        }

        let call_id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let code = CallCode::from_u8(payload[4])?;
        let body = payload.slice(ENVELOPE_PREFIX_SIZE..);

        Ok(Self {
            call_id,
            code,
            body,
        })
    }
}

/// Build the payload of an outbound CALL frame:
/// `[call id][CALL][proc len][procedure][encoded args]`.
///
/// The caller is responsible for having validated the procedure length
/// against [`MAX_PROCEDURE_LENGTH`].
pub fn encode_call_payload(call_id: u32, procedure: &str, args: &[u8]) -> Bytes {
    debug_assert!(procedure.len() <= MAX_PROCEDURE_LENGTH);

    let mut buf =
        BytesMut::with_capacity(ENVELOPE_PREFIX_SIZE + 1 + procedure.len() + args.len());
    buf.put_u32(call_id);
    buf.put_u8(CallCode::Call as u8);
    buf.put_u8(procedure.len() as u8);
    buf.put_slice(procedure.as_bytes());
    buf.put_slice(args);
    buf.freeze()
}

/// Build the payload of a worker reply frame:
/// `[call id][CALL_RESULT or CALL_ERROR][body]`.
pub fn encode_reply_payload(call_id: u32, code: CallCode, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(ENVELOPE_PREFIX_SIZE + body.len());
    buf.put_u32(call_id);
    buf.put_u8(code as u8);
    buf.put_slice(body);
    buf.freeze()
}

/// Decoded CALL request body, as seen by the worker side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    /// Target procedure name.
    pub procedure: String,
    /// Encoded argument payload (opaque to the protocol layer).
    pub args: Bytes,
}

impl CallRequest {
    /// Split a CALL body into procedure name and argument bytes.
    pub fn decode(body: &Bytes) -> Result<Self> {
        if body.is_empty() {
            return Err(DispatchError::Protocol(
                "CALL body missing procedure length".to_string(),
            ));
        }

        let proc_len = body[0] as usize;
        if body.len() < 1 + proc_len {
            return Err(DispatchError::Protocol(format!(
                "CALL body truncated: procedure length {proc_len}, {} bytes available",
                body.len() - 1
            )));
        }

        let procedure = std::str::from_utf8(&body[1..1 + proc_len])
            .map_err(|_| DispatchError::Protocol("procedure name is not UTF-8".to_string()))?
            .to_string();
        let args = body.slice(1 + proc_len..);

        Ok(Self { procedure, args })
    }
}
