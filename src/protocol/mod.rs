//! Binary frame protocol: wire format, frame value, incremental parser,
//! and resumable writer.

mod frame;
mod frame_parser;
mod frame_writer;
pub mod wire_format;

pub use frame::Frame;
pub use frame_parser::FrameParser;
pub use frame_writer::{FrameWriter, DEFAULT_GRANULARITY};
pub use wire_format::{
    CallCode, CallEnvelope, CallRequest, Opcode, MAX_CALL_ID, MAX_PROCEDURE_LENGTH, MIN_CALL_ID,
};
