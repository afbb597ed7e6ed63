//! Codec module - serialization/deserialization for call payloads.
//!
//! The dispatcher moves opaque bytes; encoding arguments and decoding
//! results happens at the edges (the caller and the worker-side service).
//! Two codecs ship with the crate:
//!
//! - [`RawCodec`] - pass-through for raw bytes (zero-copy)
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde`
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait
//! objects, allowing compile-time codec selection. A decode failure
//! surfaces as [`DispatchError::Decode`](crate::error::DispatchError).

mod msgpack;
mod raw;

pub use msgpack::MsgPackCodec;
pub use raw::RawCodec;
