//! Link configuration and connection state.

use std::fmt;
use std::time::Duration;

use pairlink_heartbeat::HeartbeatConfig;

// ---------------------------------------------------------------------------
// LinkConfig
// ---------------------------------------------------------------------------

/// Configuration for a session link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Consecutive failed connects (socket never opened) before giving up.
    ///
    /// Default: 20. The counter resets every time a socket opens.
    pub max_connect_attempts: u32,

    /// How long a sent sequenced message stays available for replay.
    ///
    /// Default: 30 seconds.
    pub replay_retention: Duration,

    /// Most messages kept for replay. The oldest is evicted first.
    ///
    /// Default: 256.
    pub replay_capacity: usize,

    /// Ping interval and stale-link detection.
    pub heartbeat: HeartbeatConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_connect_attempts: 20,
            replay_retention: Duration::from_secs(30),
            replay_capacity: 256,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Fix out-of-range values: every limit is at least 1.
    pub fn validated(mut self) -> Self {
        self.max_connect_attempts = self.max_connect_attempts.max(1);
        self.replay_capacity = self.replay_capacity.max(1);
        self.heartbeat = self.heartbeat.validated();
        self
    }
}

// ---------------------------------------------------------------------------
// LinkState
// ---------------------------------------------------------------------------

/// Where the realtime socket is in its lifecycle.
///
/// ```text
///   Absent ──→ Connecting ──→ OpenNotReady ⇄ Ready
///     ↑            │                 │         │
///     └────────────┴─── (close) ─────┴─────────┘
///                  │
///                  └──→ Closed (terminal close code, give-up, teardown)
/// ```
///
/// - **OpenNotReady**: the socket is up but the backend answered `wait`.
///   Outbound messages queue until any other frame arrives.
/// - **Closed**: terminal. No operation brings the link back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Absent,
    Connecting,
    OpenNotReady,
    Ready,
    Closed,
}

impl LinkState {
    /// Whether a socket is currently open.
    pub fn is_open(self) -> bool {
        matches!(self, LinkState::OpenNotReady | LinkState::Ready)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Absent => "absent",
            LinkState::Connecting => "connecting",
            LinkState::OpenNotReady => "open-not-ready",
            LinkState::Ready => "ready",
            LinkState::Closed => "closed",
        };
        f.write_str(s)
    }
}
