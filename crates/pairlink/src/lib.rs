//! # Pairlink
//!
//! Client side of a realtime two-party session.
//!
//! A session starts with a booking key handed out by matchmaking. Pairlink
//! prepares the booking over a signed, strictly sequential HTTP queue, then
//! holds a WebSocket to the pair's room: outbound gameplay messages are
//! sequenced, signed and kept for replay, inbound ones are checked for
//! gaps, and a dropped socket is reconnected and resynchronized without the
//! application noticing more than a [`SessionEvent`].
//!
//! ## Layers
//!
//! | crate                | concern                                        |
//! |----------------------|------------------------------------------------|
//! | `pairlink-protocol`  | frame grammar, signatures, booking types       |
//! | `pairlink-http`      | the request dispatcher                         |
//! | `pairlink-transport` | socket traits, WebSocket client, close codes   |
//! | `pairlink-heartbeat` | ping interval and stale-link detection         |
//! | `pairlink-session`   | sequencing, replay buffer, reconnection policy |
//! | `pairlink`           | handshake, session state machine, client API   |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pairlink::prelude::*;
//!
//! # async fn run() -> Result<(), PairlinkError> {
//! let client = PairlinkClient::builder("https://api.example.net", "web", "1.4.0", "secret")
//!     .session_token("unicorn")
//!     .build();
//!
//! let ticket = RoomTicket::new("wss://rt.example.net/pair", BookKey::new("bk-123"));
//! let mut session = client.session(ticket);
//! session.connect(serde_json::json!({ "deck": [1, 2, 3] }))?;
//!
//! while let Some(event) = session.next_event().await {
//!     match event {
//!         SessionEvent::Begin { .. } => session.send_turn(serde_json::json!({ "move": "e4" }))?,
//!         SessionEvent::TurnMessage(turn) => println!("peer played {turn}"),
//!         SessionEvent::Finish(_) => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod driver;
mod error;
mod events;
pub mod handshake;
mod machine;
pub mod telemetry;

pub use client::{PairSession, PairlinkClient, PairlinkClientBuilder};
pub use error::PairlinkError;
pub use events::{Finish, FinishReason, SessionEvent};
pub use machine::{SessionFacts, SessionMachine, SessionPhase};

pub use pairlink_heartbeat as heartbeat;
pub use pairlink_http as http;
pub use pairlink_protocol as protocol;
pub use pairlink_session as session;
pub use pairlink_transport as transport;

pub mod prelude {
    pub use crate::{
        Finish, FinishReason, PairSession, PairlinkClient, PairlinkClientBuilder, PairlinkError,
        SessionEvent,
    };
    pub use pairlink_heartbeat::HeartbeatConfig;
    pub use pairlink_http::{HttpConfig, QueueOrder};
    pub use pairlink_protocol::{BookKey, RoomTicket};
    pub use pairlink_session::LinkConfig;
}
