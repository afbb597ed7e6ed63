//! Raw codec - pass-through for binary data.
//!
//! Used when the workload is already serialized or is genuinely raw
//! bytes (Scenario: a `strlen`-style procedure whose argument is the
//! string itself).

use bytes::Bytes;

/// Codec that passes bytes through without transformation.
pub struct RawCodec;

impl RawCodec {
    /// Serialize raw bytes (copies data into `Bytes`).
    ///
    /// For true zero-copy, use `serialize_bytes` with an existing `Bytes`.
    #[inline]
    pub fn serialize(data: &[u8]) -> Bytes {
        Bytes::copy_from_slice(data)
    }

    /// Serialize `Bytes` (zero-copy, returns the input).
    #[inline]
    pub fn serialize_bytes(data: Bytes) -> Bytes {
        data
    }

    /// Deserialize - returns a reference to the input (zero-copy).
    #[inline]
    pub fn deserialize(data: &[u8]) -> &[u8] {
        data
    }
}
