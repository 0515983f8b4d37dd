//! JSON text codec for socket frames.
//!
//! Every frame on the realtime socket is a UTF-8 text message. Three shapes
//! share the channel:
//!
//! - the literal [`NOT_READY_SENTINEL`] (`wait`), sent by the backend while
//!   the pair is not initialized yet,
//! - direct frames, which are JSON prefixed with [`DIRECT_PREFIX`] and carry
//!   no sequence number,
//! - plain JSON objects (sequenced frames, pongs and meta frames).
//!
//! [`decode_inbound`] sorts text into one of these shapes so the link layer
//! can match on an enum instead of poking at strings.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::ProtocolError;
use crate::types::{PongFrame, SequencedFrame};

/// Prefix byte marking an unsequenced, unsigned direct frame.
pub const DIRECT_PREFIX: char = '-';

/// Literal text the backend sends while the pair is not ready yet.
pub const NOT_READY_SENTINEL: &str = "wait";

/// Serializes a value into frame text.
///
/// # Errors
/// Returns [`ProtocolError::Encode`] if the value cannot be represented as
/// JSON (e.g. a map with non-string keys).
pub fn encode<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(value).map_err(ProtocolError::Encode)
}

/// Deserializes frame text back into a value.
///
/// # Errors
/// Returns [`ProtocolError::Decode`] if the text is malformed or does not
/// match `T`.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

/// Encodes a direct frame: `-` followed by the JSON payload.
pub fn encode_direct(payload: &Value) -> Result<String, ProtocolError> {
    let body = encode(payload)?;
    let mut text = String::with_capacity(body.len() + 1);
    text.push(DIRECT_PREFIX);
    text.push_str(&body);
    Ok(text)
}

/// One inbound socket frame, sorted by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// The `wait` sentinel.
    NotReady,
    /// A `-`-prefixed frame. Never sequenced, never part of replay.
    Direct(Value),
    /// Answer to one of our pings.
    Pong(PongFrame),
    /// A frame carrying a `seq` number.
    Sequenced(SequencedFrame),
    /// Any other JSON value (progress, pause, reconnect-state frames...).
    Meta(Value),
}

/// Parses inbound frame text.
///
/// # Errors
/// - [`ProtocolError::Decode`] if the text (after the direct prefix, if
///   any) is not JSON.
/// - [`ProtocolError::InvalidFrame`] if a `seq` or `pong` field is present
///   but is not a non-negative integer.
pub fn decode_inbound(text: &str) -> Result<InboundFrame, ProtocolError> {
    if text == NOT_READY_SENTINEL {
        return Ok(InboundFrame::NotReady);
    }
    if let Some(rest) = text.strip_prefix(DIRECT_PREFIX) {
        return decode(rest).map(InboundFrame::Direct);
    }

    let value: Value = decode(text)?;
    let Value::Object(map) = &value else {
        return Ok(InboundFrame::Meta(value));
    };

    if let Some(pong) = map.get("pong") {
        let pong = pong
            .as_u64()
            .ok_or_else(|| ProtocolError::InvalidFrame(format!("pong id {pong}")))?;
        return Ok(InboundFrame::Pong(PongFrame { pong }));
    }

    match map.get("seq") {
        None | Some(Value::Null) => Ok(InboundFrame::Meta(value)),
        Some(seq) if seq.as_u64().is_some() => {
            let frame: SequencedFrame =
                serde_json::from_value(value).map_err(ProtocolError::Decode)?;
            Ok(InboundFrame::Sequenced(frame))
        }
        Some(other) => Err(ProtocolError::InvalidFrame(format!(
            "sequence number {other}"
        ))),
    }
}
