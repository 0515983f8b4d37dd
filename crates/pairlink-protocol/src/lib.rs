//! Wire protocol for Pairlink.
//!
//! This crate defines the "language" a Pairlink client speaks with the
//! gameplay backend:
//!
//! - **Types** ([`SequencedFrame`], [`PingFrame`], [`BookKey`],
//!   [`RoomTicket`]): the structures that travel over the realtime socket.
//! - **Codec** ([`encode`], [`decode`], [`decode_inbound`]): how those
//!   structures become JSON text frames, including the `-` prefix for
//!   direct frames and the `wait` sentinel.
//! - **Signing** ([`Signer`]): the SHA-256 template shared by HTTP requests
//!   and sequenced socket frames.
//! - **Session frames** ([`SessionFrame`]): the small discriminated grammar
//!   the session state machine interprets.
//!
//! # Architecture
//!
//! The protocol layer knows nothing about sockets, queues or timers. It only
//! turns values into text and text into values.
//!
//! ```text
//! Transport (text) → Protocol (frames) → Session link (ordering) → Machine (events)
//! ```

mod codec;
mod error;
mod frame;
pub mod sign;
mod types;

pub use codec::{
    DIRECT_PREFIX, InboundFrame, NOT_READY_SENTINEL, decode, decode_inbound,
    encode, encode_direct,
};
pub use error::ProtocolError;
pub use frame::{FINAL_PHASE, FactsUpdate, SessionFrame};
pub use sign::Signer;
pub use types::{BookKey, PingFrame, PongFrame, RoomTicket, SequencedFrame};
