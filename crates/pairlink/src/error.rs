//! Unified error type for Pairlink.

use pairlink_http::HttpError;
use pairlink_protocol::ProtocolError;
use pairlink_session::LinkError;
use pairlink_transport::TransportError;
use serde_json::Value;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `pairlink` meta-crate, you deal with this single error
/// type instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each wrapping variant generates a `From` impl, so `?`
/// converts sub-crate errors automatically.
///
/// The remaining variants are session-level: misuse of a [`PairSession`]
/// (returned synchronously by the call that misused it) and failures the
/// session reports through [`SessionEvent::Error`].
///
/// [`PairSession`]: crate::PairSession
/// [`SessionEvent::Error`]: crate::SessionEvent::Error
#[derive(Debug, thiserror::Error)]
pub enum PairlinkError {
    /// A socket-level error (connect, send, receive).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A control call failed (timeout, server error, unauthorized...).
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The realtime link rejected a frame (sequence gap, malformed).
    #[error(transparent)]
    Link(#[from] LinkError),

    /// The pair is paused; nothing can be sent until it resumes.
    #[error("session is paused")]
    SessionPaused,

    /// The session has finished or was destroyed.
    #[error("session is closed")]
    SessionClosed,

    /// The backend sent an error frame for this session.
    #[error("backend reported an error: {0}")]
    Remote(Value),

    /// Every reconnection attempt failed.
    #[error("connection lost after {0} attempts")]
    ConnectionLost(u32),
}
