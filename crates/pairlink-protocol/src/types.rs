//! Frame and identity types for Pairlink's wire format.
//!
//! Everything here is serialized to JSON text and sent over the realtime
//! socket, or handed to the session layer by whoever found the match.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Characters escaped in socket URL query values. Unreserved characters and
/// `/` (which separates platform and version) pass through.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// An opaque credential identifying one paired gameplay room.
///
/// The booking key authenticates every handshake call (`X-Book-Key`) and is
/// the token half of every sequenced frame signature. It is a newtype so it
/// cannot be confused with the HTTP session token, which is also a string.
///
/// `Display` only prints a short prefix so keys don't end up whole in logs;
/// use [`BookKey::as_str`] when the full value is needed.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookKey(String);

impl BookKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short: String = self.0.chars().take(6).collect();
        if short.len() < self.0.len() {
            write!(f, "bk-{short}…")
        } else {
            write!(f, "bk-{short}")
        }
    }
}

impl fmt::Debug for BookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BookKey({self})")
    }
}

/// What matchmaking hands the session layer: where the room lives and the
/// key that admits us to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomTicket {
    /// Base WebSocket address of the room, e.g. `wss://rt.example.net/pair`.
    pub address: String,
    pub book_key: BookKey,
}

impl RoomTicket {
    pub fn new(address: impl Into<String>, book_key: BookKey) -> Self {
        Self {
            address: address.into(),
            book_key,
        }
    }

    /// Builds the socket URL for this room.
    ///
    /// `platform_version` is the same `platform/version` pair sent in the
    /// `X-Platform-Version` header. `reconnect` adds the `re=1` flag that
    /// tells the backend this connection follows a forced close.
    pub fn socket_url(&self, platform_version: &str, reconnect: bool) -> String {
        let separator = if self.address.contains('?') { '&' } else { '?' };
        let mut url = format!(
            "{}{separator}v={}&key={}",
            self.address,
            utf8_percent_encode(platform_version, QUERY_VALUE),
            utf8_percent_encode(self.book_key.as_str(), QUERY_VALUE),
        );
        if reconnect {
            url.push_str("&re=1");
        }
        url
    }
}

// ---------------------------------------------------------------------------
// Socket frames
// ---------------------------------------------------------------------------

/// A sequenced frame.
///
/// Outbound frames carry `seq`, `sign` and `data`. Inbound frames carry
/// `seq`, `data` and optionally `ack`: the highest of *our* sequence numbers
/// the peer has confirmed, which lets us drop those from the replay buffer.
///
/// `skip_serializing_if` keeps absent optionals off the wire instead of
/// writing `"ack": null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedFrame {
    pub seq: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,

    #[serde(default)]
    pub data: Value,
}

/// Heartbeat ping. `rtt` is the last measured round trip in milliseconds,
/// so the backend can track our latency without a separate report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingFrame {
    pub ping: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtt: Option<u64>,
}

/// Backend answer to a [`PingFrame`], echoing its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongFrame {
    pub pong: u64,
}
