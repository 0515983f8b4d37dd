//! `PairlinkClient` builder and session handles.
//!
//! This is the entry point for applications. It ties together all the
//! layers: HTTP dispatcher → booking handshake → socket link → session
//! machine.

use std::sync::Arc;

use pairlink_heartbeat::HeartbeatConfig;
use pairlink_http::{DispatcherHandle, HttpClient, HttpConfig, QueueOrder, spawn_dispatcher};
use pairlink_protocol::{BookKey, RoomTicket, Signer};
use pairlink_session::LinkConfig;
use pairlink_transport::Connector;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::driver::{DriverSetup, SessionCommand, spawn_driver};
use crate::machine::SessionFlags;
use crate::{PairlinkError, SessionEvent};

/// Builder for configuring a [`PairlinkClient`].
///
/// # Example
///
/// ```rust,ignore
/// use pairlink::prelude::*;
///
/// let client = PairlinkClient::builder("https://api.example.net", "web", "1.4.0", secret)
///     .session_token(token)
///     .build();
/// let mut session = client.session(ticket);
/// session.connect(serde_json::json!({ "deck": [1, 2, 3] }))?;
/// while let Some(event) = session.next_event().await { /* ... */ }
/// ```
pub struct PairlinkClientBuilder {
    http: HttpConfig,
    link: LinkConfig,
}

impl PairlinkClientBuilder {
    /// Creates a builder for one backend with default settings.
    pub fn new(
        base_url: impl Into<String>,
        platform: impl Into<String>,
        version: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            http: HttpConfig::new(base_url, platform, version, secret),
            link: LinkConfig::default(),
        }
    }

    /// Sets the session token ("unicorn") the account layer obtained.
    pub fn session_token(mut self, token: impl Into<String>) -> Self {
        self.http.session_token = Some(token.into());
        self
    }

    /// Sets the order in which queued control calls are sent.
    pub fn queue_order(mut self, order: QueueOrder) -> Self {
        self.http.order = order;
        self
    }

    /// Replaces the whole HTTP configuration.
    pub fn http_config(mut self, config: HttpConfig) -> Self {
        self.http = config;
        self
    }

    /// Sets the socket link configuration.
    pub fn link_config(mut self, config: LinkConfig) -> Self {
        self.link = config;
        self
    }

    /// Sets the ping interval and stale-link detection.
    pub fn heartbeat(mut self, config: HeartbeatConfig) -> Self {
        self.link.heartbeat = config;
        self
    }

    /// Builds the client with the `reqwest` HTTP client and the
    /// `tokio-tungstenite` connector.
    ///
    /// Must be called inside a Tokio runtime: it spawns the dispatcher.
    pub fn build(self) -> PairlinkClient<pairlink_transport::WebSocketConnector> {
        let http_client = pairlink_http::ReqwestHttpClient::from_config(&self.http);
        self.build_with(http_client, pairlink_transport::WebSocketConnector)
    }

    /// Builds the client with caller-supplied HTTP and socket
    /// implementations.
    pub fn build_with<H: HttpClient, C: Connector>(
        self,
        http_client: H,
        connector: C,
    ) -> PairlinkClient<C> {
        let http = self.http.validated();
        let platform_version = http.platform_version();
        let secret = http.secret.clone();
        let dispatcher = spawn_dispatcher(http_client, http);

        tracing::info!(%platform_version, "pairlink client ready");

        PairlinkClient {
            http: dispatcher,
            connector: Arc::new(connector),
            platform_version,
            secret,
            link: self.link.validated(),
        }
    }
}

/// A configured client. Sessions created from it share one HTTP
/// dispatcher, so their control calls never overlap.
pub struct PairlinkClient<C: Connector> {
    http: DispatcherHandle,
    connector: Arc<C>,
    platform_version: String,
    secret: String,
    link: LinkConfig,
}

impl PairlinkClient<pairlink_transport::WebSocketConnector> {
    /// Creates a builder.
    pub fn builder(
        base_url: impl Into<String>,
        platform: impl Into<String>,
        version: impl Into<String>,
        secret: impl Into<String>,
    ) -> PairlinkClientBuilder {
        PairlinkClientBuilder::new(base_url, platform, version, secret)
    }
}

impl<C: Connector> PairlinkClient<C> {
    /// The shared HTTP dispatcher, for control calls outside a session.
    pub fn http(&self) -> &DispatcherHandle {
        &self.http
    }

    /// Creates a fresh session. Nothing happens until
    /// [`connect`](PairSession::connect) is called.
    pub fn session(&self, ticket: RoomTicket) -> PairSession {
        self.spawn_session(ticket, false)
    }

    /// Resumes a session whose booking handshake already happened (for
    /// example before an application restart). Connects at once.
    pub fn resume(&self, ticket: RoomTicket) -> PairSession {
        self.spawn_session(ticket, true)
    }

    fn spawn_session(&self, ticket: RoomTicket, resumed: bool) -> PairSession {
        let book_key = ticket.book_key.clone();
        let driver = spawn_driver(DriverSetup {
            connector: Arc::clone(&self.connector),
            http: self.http.clone(),
            ticket,
            platform_version: self.platform_version.clone(),
            signer: Signer::new(self.secret.clone()),
            link: self.link.clone(),
            resumed,
        });

        PairSession {
            book_key,
            commands: driver.commands,
            events: driver.events,
            flags: driver.flags,
            task: driver.task,
        }
    }
}

/// Handle to one running session.
///
/// Commands are queued to the session's driver task and return at once.
/// Calls that cannot succeed (sending while paused or after the session
/// finished) fail right here instead of as a later event. Everything the
/// session has to say arrives through [`next_event`](Self::next_event).
///
/// Dropping the handle stops the driver.
pub struct PairSession {
    book_key: BookKey,
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    flags: Arc<SessionFlags>,
    task: JoinHandle<()>,
}

impl PairSession {
    /// Runs the booking handshake with `payload`, then opens the socket.
    /// Calling it again while connecting, connected or after the session
    /// finished does nothing.
    pub fn connect(&self, payload: Value) -> Result<(), PairlinkError> {
        if self.flags.is_finished() {
            tracing::debug!(book_key = %self.book_key, "session finished, ignoring connect");
            return Ok(());
        }
        if self.commands.send(SessionCommand::Connect(payload)).is_err() {
            tracing::debug!(book_key = %self.book_key, "driver stopped, ignoring connect");
        }
        Ok(())
    }

    /// Sends a sequenced, signed gameplay payload.
    pub fn send_turn(&self, payload: Value) -> Result<(), PairlinkError> {
        self.ensure_sendable()?;
        self.command(SessionCommand::SendTurn(payload))
    }

    /// Sends a direct payload: no sequence, no signature, no replay. Dropped
    /// if no socket is open.
    pub fn send_direct(&self, payload: Value) -> Result<(), PairlinkError> {
        self.ensure_sendable()?;
        self.command(SessionCommand::SendDirect(payload))
    }

    /// Closes the socket and reconnects with the reconnect flag set.
    pub fn force_disconnect(&self) -> Result<(), PairlinkError> {
        self.ensure_open()?;
        self.command(SessionCommand::ForceDisconnect)
    }

    /// Drops the current socket (or connect attempt) and connects again.
    pub fn reconnect(&self) -> Result<(), PairlinkError> {
        self.ensure_open()?;
        self.command(SessionCommand::Reconnect)
    }

    /// Ends the session for good. A `Finish` event follows.
    pub fn force_destroy_client(&self) {
        if self.flags.is_finished() {
            return;
        }
        self.flags.mark_finished();
        if self.commands.send(SessionCommand::Destroy).is_err() {
            tracing::debug!(book_key = %self.book_key, "driver already stopped");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.flags.is_paused()
    }

    pub fn is_finished(&self) -> bool {
        self.flags.is_finished()
    }

    pub fn book_key(&self) -> &BookKey {
        &self.book_key
    }

    /// Waits for the next event. Returns `None` once the session finished
    /// and every event was delivered.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Returns an event if one is waiting.
    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    fn ensure_open(&self) -> Result<(), PairlinkError> {
        if self.flags.is_finished() {
            return Err(PairlinkError::SessionClosed);
        }
        Ok(())
    }

    fn ensure_sendable(&self) -> Result<(), PairlinkError> {
        self.ensure_open()?;
        if self.flags.is_paused() {
            return Err(PairlinkError::SessionPaused);
        }
        Ok(())
    }

    fn command(&self, command: SessionCommand) -> Result<(), PairlinkError> {
        self.commands
            .send(command)
            .map_err(|_| PairlinkError::SessionClosed)
    }
}

impl Drop for PairSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}
