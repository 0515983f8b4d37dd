//! Socket abstraction layer for Pairlink.
//!
//! Provides the [`Connector`] and [`Socket`] traits that the session driver
//! talks to, so the realtime link can run over a real WebSocket in
//! production and over in-memory channels in tests.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket client via `tokio-tungstenite`

mod close;
mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use close::{CLOSE_PAIR_EXPIRED, CLOSE_PAIR_NOT_FOUND, CloseKind, classify_close};
pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketConnector};

use std::future::Future;

/// Something read from a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// One text frame.
    Text(String),
    /// The peer closed the socket, with its close code if it sent one.
    /// Abrupt drops (no close frame at all) surface as `Closed(None)`.
    Closed(Option<u16>),
}

/// Opens sockets.
///
/// The methods return `impl Future + Send` rather than being `async fn` so
/// that the driver can `tokio::spawn` a connect for any `Connector` without
/// knowing the concrete type. Implementations can still write `async fn`.
pub trait Connector: Send + Sync + 'static {
    /// The socket type produced by this connector.
    type Socket: Socket;

    /// Opens a socket to `url`.
    fn connect(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<Self::Socket, TransportError>> + Send;
}

/// One open socket, owned by exactly one session driver.
pub trait Socket: Send + 'static {
    /// Sends one text frame.
    fn send(
        &mut self,
        text: String,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Waits for the next frame.
    ///
    /// Must be cancel-safe: the driver polls it inside `tokio::select!`
    /// and drops the future whenever another branch wins.
    fn recv(&mut self) -> impl Future<Output = Result<SocketEvent, TransportError>> + Send;

    /// Closes the socket, optionally with a close code.
    fn close(
        &mut self,
        code: Option<u16>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
