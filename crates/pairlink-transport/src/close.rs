//! Close-code classification.
//!
//! When the backend closes the socket, the close code decides whether the
//! session can continue on a new socket or is over for good.

/// The pair this booking key points at does not exist.
pub const CLOSE_PAIR_NOT_FOUND: u16 = 4404;

/// The pair existed but has expired.
pub const CLOSE_PAIR_EXPIRED: u16 = 4410;

/// What a close code means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Temporary: network drop, server restart, idle timeout... Reconnect.
    Temporary,
    /// Terminal: the pair was never there.
    PairNotFound,
    /// Terminal: the pair is gone.
    PairExpired,
}

impl CloseKind {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CloseKind::Temporary)
    }
}

/// Classifies a close code. A close without a code is temporary.
pub fn classify_close(code: Option<u16>) -> CloseKind {
    match code {
        Some(CLOSE_PAIR_NOT_FOUND) => CloseKind::PairNotFound,
        Some(CLOSE_PAIR_EXPIRED) => CloseKind::PairExpired,
        _ => CloseKind::Temporary,
    }
}
