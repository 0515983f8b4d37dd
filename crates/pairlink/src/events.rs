//! Events a session reports to the application.
//!
//! Every notification flows through one channel as a [`SessionEvent`], so
//! the application handles them in a single `match` and sees them in the
//! order they happened.

use pairlink_transport::CloseKind;
use serde_json::Value;

use crate::PairlinkError;

/// Something the application should know about.
#[derive(Debug)]
pub enum SessionEvent {
    /// Human-readable progress from the backend ("waiting for opponent").
    Progress(String),

    /// The pair is live. Emitted exactly once per session. A resumed
    /// session carries the backend's message; a fresh one does not.
    Begin { message: Option<String> },

    /// A full state model the application should adopt. After a resync the
    /// replayed messages are already on their way.
    Model(Value),

    /// The replay buffer could not cover the gap; the application has to
    /// resynchronize from this model (or from scratch if `None`).
    Sync(Option<Value>),

    /// An opaque gameplay payload from the peer.
    TurnMessage(Value),

    /// A direct (unsequenced) payload from the peer.
    DirectMessage(Value),

    /// The backend paused the pair. `close_message` is shown if the pause
    /// ends the session.
    Paused {
        message: Option<String>,
        close_message: Option<String>,
    },

    /// The pair resumed.
    Unpaused { message: Option<String> },

    /// The session is over. Nothing follows this event.
    Finish(Finish),

    /// A recoverable problem, or the fatal one preceding a `Finish`.
    Error(PairlinkError),
}

/// Why a session finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The backend sent a terminal frame.
    Remote,
    /// The application called `force_destroy_client`.
    Destroyed,
    /// The socket closed with the pair-not-found code.
    PairNotFound,
    /// The socket closed with the pair-expired code.
    PairExpired,
    /// Reconnection attempts ran out.
    ConnectionLost,
}

impl From<CloseKind> for FinishReason {
    fn from(kind: CloseKind) -> Self {
        match kind {
            CloseKind::PairNotFound => FinishReason::PairNotFound,
            CloseKind::PairExpired => FinishReason::PairExpired,
            // Temporary closes reconnect instead of finishing; if one ever
            // ends a session it is because the link gave up.
            CloseKind::Temporary => FinishReason::ConnectionLost,
        }
    }
}

/// Details of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct Finish {
    pub reason: FinishReason,
    pub message: Option<String>,
    /// The terminal frame, when the backend sent one.
    pub payload: Option<Value>,
}

impl Finish {
    pub fn new(reason: FinishReason) -> Self {
        Self {
            reason,
            message: None,
            payload: None,
        }
    }
}
