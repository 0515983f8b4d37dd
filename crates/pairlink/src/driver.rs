//! Per-session driver: the task that owns the socket.
//!
//! Each [`PairSession`](crate::PairSession) gets its own Tokio task running
//! this driver. It owns the [`SessionMachine`], the [`SessionLink`], the
//! heartbeat and the current socket, and multiplexes four sources in one
//! `select!` loop:
//!
//!   1. commands from the session handle (connect, send, reconnect...)
//!   2. results of work it spawned (handshake, socket connect, bootstrap)
//!   3. frames from the socket
//!   4. heartbeat beats
//!
//! After every step it writes whatever the link put in its outbox. Slow
//! work (HTTP calls, dialing) runs in spawned tasks so the loop never
//! stops reading the socket. Connect results carry a generation number;
//! a result from an attempt that has since been superseded is discarded.

use std::sync::Arc;

use pairlink_heartbeat::{BeatInfo, Heartbeat};
use pairlink_http::{DispatcherHandle, HttpError};
use pairlink_protocol::{RoomTicket, Signer};
use pairlink_session::{
    CloseDecision, LinkConfig, ReconnectDecision, SendDisposition, SessionLink,
};
use pairlink_transport::{Connector, Socket, SocketEvent, TransportError};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::handshake::{bootstrap_sequence, run_handshake};
use crate::machine::{SessionFlags, SessionMachine};
use crate::{Finish, FinishReason, PairlinkError, SessionEvent};

/// Commands from the session handle.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    Connect(Value),
    SendTurn(Value),
    SendDirect(Value),
    ForceDisconnect,
    Reconnect,
    Destroy,
}

/// Results of work the driver spawned.
enum Internal<S> {
    Connected {
        generation: u64,
        result: Result<S, TransportError>,
    },
    Handshake(Result<(), HttpError>),
    Bootstrap(Result<Option<u64>, HttpError>),
}

/// Everything a driver needs to start.
pub(crate) struct DriverSetup<C> {
    pub(crate) connector: Arc<C>,
    pub(crate) http: DispatcherHandle,
    pub(crate) ticket: RoomTicket,
    pub(crate) platform_version: String,
    pub(crate) signer: Signer,
    pub(crate) link: LinkConfig,
    pub(crate) resumed: bool,
}

/// The handle side of a spawned driver.
pub(crate) struct DriverHandle {
    pub(crate) commands: mpsc::UnboundedSender<SessionCommand>,
    pub(crate) events: mpsc::UnboundedReceiver<SessionEvent>,
    pub(crate) flags: Arc<SessionFlags>,
    pub(crate) task: JoinHandle<()>,
}

struct SessionDriver<C: Connector> {
    connector: Arc<C>,
    http: DispatcherHandle,
    ticket: RoomTicket,
    platform_version: String,
    machine: SessionMachine,
    link: SessionLink,
    heartbeat: Heartbeat,
    socket: Option<C::Socket>,
    generation: u64,
    /// Ask the backend for `re=1` handling on the next socket.
    reconnect_flag: bool,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    internal_tx: mpsc::UnboundedSender<Internal<C::Socket>>,
    internal_rx: mpsc::UnboundedReceiver<Internal<C::Socket>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

/// Spawns a driver task for one session.
pub(crate) fn spawn_driver<C: Connector>(setup: DriverSetup<C>) -> DriverHandle {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let flags = Arc::new(SessionFlags::default());

    let heartbeat = Heartbeat::new(setup.link.heartbeat.clone());
    let link = SessionLink::new(setup.link, setup.ticket.book_key.clone(), setup.signer);

    let driver = SessionDriver {
        connector: setup.connector,
        http: setup.http,
        ticket: setup.ticket,
        platform_version: setup.platform_version,
        machine: SessionMachine::with_flags(setup.resumed, Arc::clone(&flags)),
        link,
        heartbeat,
        socket: None,
        generation: 0,
        reconnect_flag: setup.resumed,
        commands: command_rx,
        internal_tx,
        internal_rx,
        events: event_tx,
    };

    let task = tokio::spawn(driver.run());

    DriverHandle {
        commands: command_tx,
        events: event_rx,
        flags,
        task,
    }
}

/// Receives from the socket if there is one; pends forever otherwise.
async fn recv_socket<S: Socket>(socket: &mut Option<S>) -> Result<SocketEvent, TransportError> {
    match socket {
        Some(socket) => socket.recv().await,
        None => std::future::pending().await,
    }
}

impl<C: Connector> SessionDriver<C> {
    async fn run(mut self) {
        tracing::debug!(book_key = %self.ticket.book_key, resumed = self.machine.is_resumed(), "session driver started");

        if self.machine.is_resumed() {
            self.start_connect();
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        tracing::debug!(book_key = %self.ticket.book_key, "session handle dropped");
                        break;
                    }
                },
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal).await,
                event = recv_socket(&mut self.socket) => self.handle_socket_event(event).await,
                beat = self.heartbeat.wait_for_beat() => self.handle_beat(beat).await,
            }

            self.write_outbox().await;
            if self.machine.is_finished() {
                break;
            }
        }

        self.heartbeat.stop();
        self.close_socket().await;
        tracing::debug!(book_key = %self.ticket.book_key, "session driver stopped");
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn handle_command(&mut self, command: SessionCommand) {
        if self.machine.is_finished() {
            tracing::debug!(?command, "session finished, ignoring command");
            return;
        }

        match command {
            SessionCommand::Connect(payload) => {
                if !self.machine.start_handshake() {
                    tracing::debug!(phase = ?self.machine.phase(), "connect already in progress");
                    return;
                }
                let http = self.http.clone();
                let book_key = self.ticket.book_key.clone();
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let result = run_handshake(&http, &book_key, payload).await;
                    if tx.send(Internal::Handshake(result)).is_err() {
                        tracing::trace!("driver gone, dropping handshake result");
                    }
                });
            }
            SessionCommand::SendTurn(payload) => self.send(payload, false),
            SessionCommand::SendDirect(payload) => self.send(payload, true),
            SessionCommand::ForceDisconnect => {
                if self.socket.is_none() {
                    tracing::debug!("no socket to disconnect");
                    return;
                }
                tracing::info!(book_key = %self.ticket.book_key, "forcing disconnect");
                self.drop_socket().await;
                self.reconnect_flag = true;
                self.start_connect();
            }
            SessionCommand::Reconnect => {
                if !self.machine.has_transport() {
                    tracing::debug!(phase = ?self.machine.phase(), "nothing to reconnect yet");
                    return;
                }
                tracing::info!(book_key = %self.ticket.book_key, "reconnecting");
                self.drop_socket().await;
                self.start_connect();
            }
            SessionCommand::Destroy => {
                self.finish(Finish::new(FinishReason::Destroyed));
            }
        }
    }

    fn send(&mut self, payload: Value, direct: bool) {
        match self.link.send(payload, direct, Instant::now()) {
            Ok(SendDisposition::Dropped) => {
                tracing::warn!(book_key = %self.ticket.book_key, "direct message dropped, no socket");
            }
            Ok(disposition) => tracing::trace!(?disposition, direct, "send"),
            Err(e) => self.emit(SessionEvent::Error(e.into())),
        }
    }

    // -----------------------------------------------------------------------
    // Spawned work
    // -----------------------------------------------------------------------

    fn start_connect(&mut self) {
        if let Err(e) = self.link.begin_connect() {
            tracing::debug!(error = %e, "link closed, not connecting");
            return;
        }
        self.machine.transport_connecting();
        self.generation += 1;

        let generation = self.generation;
        let url = self.ticket.socket_url(&self.platform_version, self.reconnect_flag);
        let connector = Arc::clone(&self.connector);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = connector.connect(&url).await;
            if tx.send(Internal::Connected { generation, result }).is_err() {
                tracing::trace!(generation, "driver gone, dropping connect result");
            }
        });
    }

    async fn handle_internal(&mut self, internal: Internal<C::Socket>) {
        match internal {
            Internal::Handshake(Ok(())) => {
                if self.machine.is_finished() {
                    return;
                }
                self.start_connect();
            }
            Internal::Handshake(Err(e)) => {
                tracing::warn!(book_key = %self.ticket.book_key, error = %e, "booking handshake failed");
                self.machine.handshake_failed();
                self.emit(SessionEvent::Error(e.into()));
            }
            Internal::Connected { generation, result } => {
                if generation != self.generation || self.machine.is_finished() {
                    tracing::debug!(generation, current = self.generation, "discarding stale connect result");
                    if let Ok(mut socket) = result {
                        if let Err(e) = socket.close(None).await {
                            tracing::trace!(error = %e, "closing stale socket failed");
                        }
                    }
                    return;
                }
                match result {
                    Ok(socket) => self.on_socket_open(socket),
                    Err(e) => self.on_connect_failed(e),
                }
            }
            Internal::Bootstrap(Ok(seq)) => {
                tracing::debug!(?seq, "bootstrap complete");
            }
            Internal::Bootstrap(Err(e)) => {
                tracing::warn!(book_key = %self.ticket.book_key, error = %e, "sequence bootstrap failed");
                self.emit(SessionEvent::Error(e.into()));
            }
        }
    }

    fn on_socket_open(&mut self, socket: C::Socket) {
        self.socket = Some(socket);
        self.reconnect_flag = false;
        self.link.on_open(Instant::now());
        self.machine.transport_open();
        self.heartbeat.start();

        let http = self.http.clone();
        let book_key = self.ticket.book_key.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = bootstrap_sequence(&http, &book_key).await;
            if tx.send(Internal::Bootstrap(result)).is_err() {
                tracing::trace!("driver gone, dropping bootstrap result");
            }
        });
    }

    fn on_connect_failed(&mut self, error: TransportError) {
        match self.link.on_connect_failed() {
            ReconnectDecision::Retry(attempt) => {
                tracing::warn!(book_key = %self.ticket.book_key, attempt, error = %error, "connect failed, retrying");
                self.start_connect();
            }
            ReconnectDecision::GiveUp(attempts) => {
                tracing::error!(book_key = %self.ticket.book_key, attempts, error = %error, "connection lost");
                self.emit(SessionEvent::Error(PairlinkError::ConnectionLost(attempts)));
                self.finish(Finish::new(FinishReason::ConnectionLost));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Socket
    // -----------------------------------------------------------------------

    async fn handle_socket_event(&mut self, event: Result<SocketEvent, TransportError>) {
        let code = match event {
            Ok(SocketEvent::Text(text)) => {
                self.on_text(&text);
                return;
            }
            Ok(SocketEvent::Closed(code)) => code,
            Err(e) => {
                tracing::warn!(book_key = %self.ticket.book_key, error = %e, "socket failed");
                None
            }
        };

        self.socket = None;
        self.heartbeat.stop();
        match self.link.on_close(code) {
            CloseDecision::Reconnect => self.start_connect(),
            CloseDecision::Terminal(kind) => self.finish(Finish::new(kind.into())),
        }
    }

    fn on_text(&mut self, text: &str) {
        self.heartbeat.record_activity();
        let now = Instant::now();
        match self.link.on_text(text, now) {
            Ok(Some(inbound)) => {
                for event in self.machine.on_inbound(&mut self.link, inbound, now) {
                    self.emit(event);
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(book_key = %self.ticket.book_key, error = %e, "rejected inbound frame");
                self.emit(SessionEvent::Error(e.into()));
            }
        }
    }

    async fn handle_beat(&mut self, beat: BeatInfo) {
        let now = Instant::now();
        self.link.expire(now);

        if beat.stale {
            tracing::warn!(book_key = %self.ticket.book_key, idle_beats = beat.idle_beats, "link stale, reconnecting");
            self.drop_socket().await;
            self.start_connect();
            return;
        }

        if let (Some(ping), Some(socket)) = (self.link.ping(now), self.socket.as_mut()) {
            if let Err(e) = socket.send(ping).await {
                tracing::debug!(error = %e, "ping failed");
            }
        }
    }

    async fn write_outbox(&mut self) {
        let frames = self.link.drain_outbox();
        if frames.is_empty() {
            return;
        }
        let Some(socket) = self.socket.as_mut() else {
            tracing::debug!(count = frames.len(), "no socket, frames left to replay");
            return;
        };
        for frame in frames {
            if let Err(e) = socket.send(frame).await {
                // The read side will report the close; sequenced frames are
                // still in the replay buffer.
                tracing::warn!(book_key = %self.ticket.book_key, error = %e, "socket write failed");
                break;
            }
        }
    }

    /// Closes the current socket and tells the link it is gone.
    async fn drop_socket(&mut self) {
        self.heartbeat.stop();
        self.close_socket().await;
        self.link.on_close(None);
    }

    async fn close_socket(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close(None).await {
                tracing::debug!(error = %e, "socket close failed");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    fn finish(&mut self, finish: Finish) {
        self.link.close();
        self.heartbeat.stop();
        if let Some(event) = self.machine.finish(finish) {
            self.emit(event);
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }
}
