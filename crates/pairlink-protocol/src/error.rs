//! Error types for the protocol layer.
//!
//! Each crate in Pairlink defines its own error enum. A `ProtocolError`
//! always means the bytes on the wire were wrong, never that the network
//! or the backend misbehaved.

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into frame text).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning frame text into a Rust value).
    ///
    /// Common causes: malformed JSON, truncated frames, or a direct frame
    /// whose body after the `-` prefix is not JSON.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame parsed but violates the frame grammar, e.g. a sequenced
    /// frame whose `seq` is not a non-negative integer.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}
