//! Error types for the session link.

use pairlink_protocol::ProtocolError;

/// Errors the link reports for inbound frames or misuse.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// A sequenced frame skipped ahead. `last accepted` stays where it was.
    #[error("sequence gap: expected {expected}, received {received}")]
    SequenceGap { expected: u64, received: u64 },

    /// The frame could not be parsed.
    #[error("malformed frame: {0}")]
    Malformed(#[from] ProtocolError),

    /// The link was torn down for good.
    #[error("session link is closed")]
    Closed,
}
