//! Error types for taskwire.

use thiserror::Error;

/// Main error type for dispatcher and protocol operations.
///
/// Per-call failures (timeout, worker death, application errors) are not
/// represented here; those travel to the caller inside a
/// [`CallResult`](crate::call::CallResult). This enum covers failures the
/// crate raises synchronously or inside its I/O paths.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// I/O error on a worker pipe or during process spawn.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unexpected frame (bad opcode, oversized payload,
    /// desynchronized stream). Fatal to the worker session it came from.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Caller passed an invalid procedure name. Rejected at `call()` time,
    /// never reaches a worker.
    #[error("invalid call: {0}")]
    Validation(String),

    /// The outstanding-call cap is reached; the call was rejected without
    /// being queued.
    #[error("dispatcher is at capacity ({0} outstanding calls)")]
    TooBusy(usize),

    /// A worker pipe is gone (broken pipe, unexpected EOF).
    #[error("resource error: {0}")]
    Resource(String),

    /// MsgPack serialization error.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The dispatcher core has shut down and no longer accepts commands.
    #[error("dispatcher stopped")]
    Stopped,
}

/// Result type alias using DispatchError.
pub type Result<T> = std::result::Result<T, DispatchError>;
