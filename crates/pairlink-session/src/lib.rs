//! Realtime session link for Pairlink.
//!
//! Provides [`SessionLink`], the I/O-free state behind one realtime
//! socket: connection status, outbound sequencing and signing, inbound
//! gap detection, the transmit backlog, the [`ReplayBuffer`] and the
//! reconnection policy.

mod config;
mod error;
mod link;
mod replay;
mod sequencer;

pub use config::{LinkConfig, LinkState};
pub use error::LinkError;
pub use link::{
    CloseDecision, Inbound, Outbound, ReconnectDecision, ReplayOutcome, SendDisposition,
    SessionLink,
};
pub use replay::{Remembered, ReplayBuffer};
pub use sequencer::{InboundSequencer, SeqCheck};
