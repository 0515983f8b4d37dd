//! The session link: everything the realtime socket needs to remember.
//!
//! `SessionLink` owns the outbound and inbound sequence counters, the
//! transmit backlog, the replay buffer, reconnection bookkeeping and the
//! round-trip estimate. It performs no I/O: the driver feeds it socket
//! events and writes whatever [`SessionLink::drain_outbox`] returns. That
//! keeps every ordering rule testable without a socket or a runtime.
//!
//! # Outbound path
//!
//! ```text
//! send() → backlog ──(flush when Ready, not held, not awaiting resync)──→ outbox
//!                        │
//!                        └─ sequenced: seq_out += 1, sign, remember for replay
//! ```
//!
//! # Reconnects
//!
//! Sequence numbers are per socket: [`begin_connect`](SessionLink::begin_connect)
//! zeroes both counters. After a reconnect the backlog stays gated until the
//! session layer calls [`resync`](SessionLink::resync) with the baseline the
//! backend reported, which either replays the missing messages from the
//! buffer or reports that a full resync is needed.

use std::collections::VecDeque;
use std::time::Duration;

use pairlink_protocol::{
    BookKey, InboundFrame, PingFrame, SequencedFrame, Signer, decode_inbound, encode,
    encode_direct,
};
use pairlink_transport::{CloseKind, classify_close};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::replay::ReplayBuffer;
use crate::sequencer::{InboundSequencer, SeqCheck};
use crate::{LinkConfig, LinkError, LinkState};

/// One message waiting to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub payload: Value,
    /// Direct messages skip sequencing, signing and the replay buffer.
    pub direct: bool,
}

/// An inbound payload for the session layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A sequenced frame's `data`, or a meta frame without a sequence.
    Message(Value),
    /// A direct frame.
    Direct(Value),
}

/// What happened to a [`send`](SessionLink::send).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDisposition {
    /// Encoded into the outbox.
    Sent,
    /// Waiting in the backlog for the link to become ready.
    Queued,
    /// A direct message with no socket to carry it.
    Dropped,
}

/// What to do after a connect attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Try again at once. Carries the number of failures so far.
    Retry(u32),
    /// Attempts exhausted. The link is now closed.
    GiveUp(u32),
}

/// What to do after an open socket closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    Reconnect,
    /// The close code ended the session. The link is now closed.
    Terminal(CloseKind),
}

/// Result of [`SessionLink::resync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The peer is (or will be) caught up; carries how many messages were
    /// resent from the replay buffer.
    Replayed(usize),
    /// The buffer could not cover the gap. The caller needs a full resync.
    Failed,
}

/// Transport-side state of one realtime session.
#[derive(Debug)]
pub struct SessionLink {
    config: LinkConfig,
    signer: Signer,
    book_key: BookKey,
    state: LinkState,
    ever_opened: bool,
    awaiting_resync: bool,
    held: bool,
    /// Last sequence number assigned on this socket.
    seq_out: u64,
    /// Highest sequence number sent that the peer may not have seen.
    last_sent: u64,
    inbound: InboundSequencer,
    replay: ReplayBuffer,
    backlog: VecDeque<Outbound>,
    outbox: Vec<String>,
    connect_attempts: u32,
    next_ping_id: u64,
    ping_in_flight: Option<(u64, Instant)>,
    rtt: Option<Duration>,
    last_activity: Option<Instant>,
}

impl SessionLink {
    pub fn new(config: LinkConfig, book_key: BookKey, signer: Signer) -> Self {
        let config = config.validated();
        let replay = ReplayBuffer::new(config.replay_capacity, config.replay_retention);
        Self {
            config,
            signer,
            book_key,
            state: LinkState::Absent,
            ever_opened: false,
            awaiting_resync: false,
            held: false,
            seq_out: 0,
            last_sent: 0,
            inbound: InboundSequencer::default(),
            replay,
            backlog: VecDeque::new(),
            outbox: Vec::new(),
            connect_attempts: 0,
            next_ping_id: 0,
            ping_in_flight: None,
            rtt: None,
            last_activity: None,
        }
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// A connect attempt is starting. Zeroes both sequence counters.
    pub fn begin_connect(&mut self) -> Result<(), LinkError> {
        if self.state == LinkState::Closed {
            return Err(LinkError::Closed);
        }
        self.state = LinkState::Connecting;
        self.seq_out = 0;
        self.inbound.reset_to(0);
        self.ping_in_flight = None;
        // Frames drained for the old socket but never written are lost;
        // sequenced ones are still in the replay buffer.
        self.outbox.clear();
        if self.ever_opened {
            self.awaiting_resync = true;
        }
        debug!(book_key = %self.book_key, attempt = self.connect_attempts + 1, "connecting");
        Ok(())
    }

    /// The socket opened.
    pub fn on_open(&mut self, now: Instant) {
        if self.state == LinkState::Closed {
            return;
        }
        let reconnect = self.ever_opened;
        self.state = LinkState::Ready;
        self.ever_opened = true;
        self.connect_attempts = 0;
        self.last_activity = Some(now);
        info!(book_key = %self.book_key, reconnect, "socket open");
        self.flush(now);
    }

    /// A connect attempt failed before the socket opened.
    pub fn on_connect_failed(&mut self) -> ReconnectDecision {
        self.connect_attempts += 1;
        let attempts = self.connect_attempts;
        if attempts >= self.config.max_connect_attempts {
            warn!(book_key = %self.book_key, attempts, "giving up on connecting");
            self.close();
            ReconnectDecision::GiveUp(attempts)
        } else {
            debug!(book_key = %self.book_key, attempts, "connect failed, retrying");
            self.state = LinkState::Absent;
            ReconnectDecision::Retry(attempts)
        }
    }

    /// An open socket closed, with the peer's close code if any.
    pub fn on_close(&mut self, code: Option<u16>) -> CloseDecision {
        let kind = classify_close(code);
        if kind.is_terminal() {
            info!(book_key = %self.book_key, ?code, ?kind, "socket closed for good");
            self.close();
            CloseDecision::Terminal(kind)
        } else {
            if self.state != LinkState::Closed {
                self.state = LinkState::Absent;
            }
            info!(book_key = %self.book_key, ?code, "socket closed, will reconnect");
            CloseDecision::Reconnect
        }
    }

    /// Tears the link down permanently.
    pub fn close(&mut self) {
        self.state = LinkState::Closed;
        self.backlog.clear();
        self.outbox.clear();
        self.replay.clear();
        self.ping_in_flight = None;
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Queues a payload for sending and flushes if possible.
    ///
    /// Direct payloads are dropped when no socket is open at all; otherwise
    /// both kinds queue behind anything already waiting.
    pub fn send(
        &mut self,
        payload: Value,
        direct: bool,
        now: Instant,
    ) -> Result<SendDisposition, LinkError> {
        if self.state == LinkState::Closed {
            return Err(LinkError::Closed);
        }
        if direct && !self.state.is_open() {
            debug!(book_key = %self.book_key, "no socket, dropping direct message");
            return Ok(SendDisposition::Dropped);
        }

        self.backlog.push_back(Outbound { payload, direct });
        self.flush(now);
        if self.backlog.is_empty() {
            Ok(SendDisposition::Sent)
        } else {
            Ok(SendDisposition::Queued)
        }
    }

    fn can_flush(&self) -> bool {
        self.state == LinkState::Ready && !self.held && !self.awaiting_resync
    }

    /// Moves the backlog into the outbox, sequencing and signing as it goes.
    fn flush(&mut self, now: Instant) {
        if !self.can_flush() {
            return;
        }
        while let Some(out) = self.backlog.pop_front() {
            let text = if out.direct {
                encode_direct(&out.payload)
            } else {
                self.seq_out += 1;
                let seq = self.seq_out;
                self.last_sent = self.last_sent.max(seq);
                let frame = SequencedFrame {
                    seq,
                    sign: Some(self.signer.sign_frame(&out.payload, seq, self.book_key.as_str())),
                    ack: None,
                    data: out.payload.clone(),
                };
                self.replay.remember(seq, out.payload, now);
                trace!(seq, "sequenced frame queued");
                encode(&frame)
            };
            match text {
                Ok(text) => self.outbox.push(text),
                Err(e) => warn!(error = %e, "dropping unencodable message"),
            }
        }
    }

    /// Frames ready to write to the socket, in order.
    pub fn drain_outbox(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outbox)
    }

    /// Gates the outbound queue (the session is paused).
    pub fn hold(&mut self) {
        self.held = true;
    }

    /// Lifts the pause gate and flushes.
    pub fn release(&mut self, now: Instant) {
        self.held = false;
        self.flush(now);
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Handles one inbound text frame.
    ///
    /// Returns the payload to surface, `None` for frames consumed here
    /// (sentinel, pongs, stale duplicates), or an error for gaps and
    /// malformed frames. Errors never change the connection state.
    pub fn on_text(&mut self, text: &str, now: Instant) -> Result<Option<Inbound>, LinkError> {
        self.last_activity = Some(now);
        let frame = decode_inbound(text)?;

        if frame == InboundFrame::NotReady {
            if self.state == LinkState::Ready {
                debug!(book_key = %self.book_key, "backend not ready, holding output");
                self.state = LinkState::OpenNotReady;
            }
            return Ok(None);
        }
        if self.state == LinkState::OpenNotReady {
            self.state = LinkState::Ready;
            self.flush(now);
        }

        match frame {
            InboundFrame::NotReady => Ok(None),
            InboundFrame::Direct(payload) => Ok(Some(Inbound::Direct(payload))),
            InboundFrame::Pong(pong) => {
                match self.ping_in_flight {
                    Some((id, sent)) if id == pong.pong => {
                        let rtt = now.saturating_duration_since(sent);
                        trace!(rtt_ms = rtt.as_millis() as u64, "pong");
                        self.rtt = Some(rtt);
                        self.ping_in_flight = None;
                    }
                    _ => trace!(id = pong.pong, "unexpected pong"),
                }
                Ok(None)
            }
            InboundFrame::Sequenced(frame) => {
                if let Some(ack) = frame.ack {
                    let purged = self.replay.acknowledge(ack);
                    if purged > 0 {
                        trace!(ack, purged, "peer acknowledged");
                    }
                }
                match self.inbound.check(frame.seq) {
                    SeqCheck::Accepted => Ok(Some(Inbound::Message(frame.data))),
                    SeqCheck::Stale => {
                        debug!(seq = frame.seq, last = self.inbound.last(), "ignoring stale frame");
                        Ok(None)
                    }
                    SeqCheck::Gap { expected } => Err(LinkError::SequenceGap {
                        expected,
                        received: frame.seq,
                    }),
                }
            }
            InboundFrame::Meta(payload) => Ok(Some(Inbound::Message(payload))),
        }
    }

    // -----------------------------------------------------------------------
    // Replay / resync
    // -----------------------------------------------------------------------

    /// Resynchronizes after a reconnect or an unpause.
    ///
    /// `ours` is the last of our sequence numbers the peer has; `theirs` is
    /// the last of theirs we should consider seen. With `only_forward`, a
    /// local sequence ahead of `ours` is kept as-is (nothing was lost, the
    /// frames are still in transit) instead of replayed.
    pub fn resync(
        &mut self,
        ours: u64,
        theirs: u64,
        only_forward: bool,
        now: Instant,
    ) -> ReplayOutcome {
        self.inbound.reset_to(theirs);
        self.awaiting_resync = false;
        self.replay.expire(now);

        let outcome = if self.last_sent == ours || (only_forward && self.last_sent > ours) {
            self.seq_out = self.last_sent;
            ReplayOutcome::Replayed(0)
        } else if self.last_sent < ours {
            // The peer knows more than we do (we lost our state); start
            // numbering after its baseline and let the caller resync fully.
            self.restart_sequence_at(ours);
            ReplayOutcome::Failed
        } else {
            match self.replay.since(ours, self.last_sent) {
                Some(payloads) => {
                    let count = payloads.len();
                    for payload in payloads.into_iter().rev() {
                        self.backlog.push_front(Outbound {
                            payload,
                            direct: false,
                        });
                    }
                    self.restart_sequence_at(ours);
                    ReplayOutcome::Replayed(count)
                }
                None => {
                    self.restart_sequence_at(ours);
                    ReplayOutcome::Failed
                }
            }
        };

        info!(book_key = %self.book_key, ours, theirs, only_forward, ?outcome, "resync");
        self.flush(now);
        outcome
    }

    fn restart_sequence_at(&mut self, seq: u64) {
        self.seq_out = seq;
        self.last_sent = seq;
        self.replay.clear();
    }

    // -----------------------------------------------------------------------
    // Heartbeat support
    // -----------------------------------------------------------------------

    /// Builds a ping frame if a socket is open.
    pub fn ping(&mut self, now: Instant) -> Option<String> {
        if !self.state.is_open() {
            return None;
        }
        self.next_ping_id += 1;
        let frame = PingFrame {
            ping: self.next_ping_id,
            rtt: self.rtt.map(|d| d.as_millis() as u64),
        };
        match encode(&frame) {
            Ok(text) => {
                self.ping_in_flight = Some((self.next_ping_id, now));
                Some(text)
            }
            Err(e) => {
                warn!(error = %e, "could not encode ping");
                None
            }
        }
    }

    /// Evicts replay entries past the retention window.
    pub fn expire(&mut self, now: Instant) {
        let evicted = self.replay.expire(now);
        if evicted > 0 {
            trace!(evicted, "replay entries expired");
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == LinkState::Closed
    }

    pub fn seq_out(&self) -> u64 {
        self.seq_out
    }

    pub fn last_sent(&self) -> u64 {
        self.last_sent
    }

    pub fn inbound_last(&self) -> u64 {
        self.inbound.last()
    }

    pub fn awaiting_resync(&self) -> bool {
        self.awaiting_resync
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn replay_len(&self) -> usize {
        self.replay.len()
    }

    pub fn book_key(&self) -> &BookKey {
        &self.book_key
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }
}
