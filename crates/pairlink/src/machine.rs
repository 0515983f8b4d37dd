//! The session protocol state machine.
//!
//! `SessionMachine` interprets decoded session frames and decides what the
//! application hears about. Like [`SessionLink`] it performs no I/O: the
//! driver hands it inbound payloads together with the link, and it answers
//! with the [`SessionEvent`]s to emit. It touches the link only through its
//! public pause gate and [`resync`](SessionLink::resync).
//!
//! # Lifecycle
//!
//! ```text
//! Idle → Handshaking → ConnectingTransport → Progressing → Active ⇄ Paused
//!   ↑         │                                                   │
//!   └─ failed ┘                             any state ──→ Finished┘
//! ```
//!
//! A resumed session skips `Handshaking`. Reconnects after the session
//! began stay in `Active`/`Paused`; only the link notices them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pairlink_protocol::{FINAL_PHASE, FactsUpdate, SessionFrame};
use pairlink_session::{Inbound, ReplayOutcome, SessionLink};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{Finish, FinishReason, PairlinkError, SessionEvent};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created, `connect` not called yet (or the handshake failed).
    Idle,
    /// Running the booking handshake over HTTP.
    Handshaking,
    /// Handshake done, waiting for the first socket to open.
    ConnectingTransport,
    /// Socket open, backend reporting phases 1..=3.
    Progressing,
    /// Final phase reached; gameplay traffic flows.
    Active,
    /// The backend paused the pair.
    Paused,
    /// Over for good.
    Finished,
}

/// Facts about the pair, accumulated from phase and reconnect frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionFacts {
    pub first: Option<bool>,
    pub opponent: Option<Value>,
    pub start: Option<i64>,
    pub seed: Option<u64>,
}

impl SessionFacts {
    /// Overwrites every fact the update carries; leaves the rest alone.
    pub fn apply(&mut self, update: FactsUpdate) {
        if let Some(first) = update.first {
            self.first = Some(first);
        }
        if let Some(opponent) = update.opponent {
            self.opponent = Some(opponent);
        }
        if let Some(start) = update.start {
            self.start = Some(start);
        }
        if let Some(seed) = update.seed {
            self.seed = Some(seed);
        }
    }
}

/// Flags the session handle reads without a round trip to the driver.
#[derive(Debug, Default)]
pub(crate) struct SessionFlags {
    paused: AtomicBool,
    finished: AtomicBool,
}

impl SessionFlags {
    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Marks the session finished ahead of the driver, so calls made right
    /// after a destroy already fail.
    pub(crate) fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

/// Protocol state of one session.
#[derive(Debug)]
pub struct SessionMachine {
    phase: SessionPhase,
    /// Phase to return to when a pause ends.
    resume_phase: SessionPhase,
    facts: SessionFacts,
    resumed: bool,
    begun: bool,
    flags: Arc<SessionFlags>,
}

impl SessionMachine {
    /// Creates a machine for a fresh session, or for a resumed one whose
    /// booking handshake already happened elsewhere.
    pub fn new(resumed: bool) -> Self {
        Self::with_flags(resumed, Arc::new(SessionFlags::default()))
    }

    pub(crate) fn with_flags(resumed: bool, flags: Arc<SessionFlags>) -> Self {
        Self {
            phase: SessionPhase::Idle,
            resume_phase: SessionPhase::Idle,
            facts: SessionFacts::default(),
            resumed,
            begun: false,
            flags,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle transitions driven by the driver
    // -----------------------------------------------------------------------

    /// `connect` was called. Returns `false` if the session is already past
    /// `Idle`, which makes `connect` idempotent.
    pub fn start_handshake(&mut self) -> bool {
        if self.phase != SessionPhase::Idle {
            return false;
        }
        self.phase = SessionPhase::Handshaking;
        true
    }

    /// The handshake failed; `connect` may be called again.
    pub fn handshake_failed(&mut self) {
        if self.phase == SessionPhase::Handshaking {
            self.phase = SessionPhase::Idle;
        }
    }

    /// The first socket connect is under way.
    pub fn transport_connecting(&mut self) {
        if matches!(self.phase, SessionPhase::Idle | SessionPhase::Handshaking) {
            self.phase = SessionPhase::ConnectingTransport;
        }
    }

    /// A socket opened.
    pub fn transport_open(&mut self) {
        if self.phase == SessionPhase::ConnectingTransport {
            self.phase = SessionPhase::Progressing;
        }
    }

    /// Ends the session. Returns the `Finish` event the first time only.
    pub fn finish(&mut self, finish: Finish) -> Option<SessionEvent> {
        if self.phase == SessionPhase::Finished {
            return None;
        }
        info!(reason = ?finish.reason, "session finished");
        self.phase = SessionPhase::Finished;
        self.flags.finished.store(true, Ordering::Release);
        Some(SessionEvent::Finish(finish))
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Interprets one inbound payload the link accepted.
    pub fn on_inbound(
        &mut self,
        link: &mut SessionLink,
        inbound: Inbound,
        now: Instant,
    ) -> Vec<SessionEvent> {
        if self.phase == SessionPhase::Finished {
            debug!("session finished, ignoring inbound payload");
            return Vec::new();
        }
        match inbound {
            Inbound::Direct(payload) => vec![SessionEvent::DirectMessage(payload)],
            Inbound::Message(payload) => self.on_frame(link, SessionFrame::decode(payload), now),
        }
    }

    fn on_frame(
        &mut self,
        link: &mut SessionLink,
        frame: SessionFrame,
        now: Instant,
    ) -> Vec<SessionEvent> {
        match frame {
            SessionFrame::Pause {
                paused,
                message,
                close,
                mine,
                theirs,
                model,
            } => {
                if paused {
                    self.pause(link, message, close)
                } else {
                    self.unpause(link, message, mine, theirs, model, now)
                }
            }
            SessionFrame::Phase {
                phase,
                step,
                facts,
                message,
            } => self.on_phase(phase, step, facts, message),
            SessionFrame::Terminal { message, payload } => {
                let finish = Finish {
                    reason: FinishReason::Remote,
                    message,
                    payload: Some(payload),
                };
                link.close();
                self.finish(finish).into_iter().collect()
            }
            SessionFrame::Reconnect {
                code,
                facts,
                model,
                mine,
                theirs,
                message,
            } => {
                debug!(code, "reconnect state");
                self.facts.apply(facts);
                let mut events = Vec::new();
                if let Some(model) = model {
                    let outcome = link.resync(mine.unwrap_or(0), theirs.unwrap_or(0), false, now);
                    events.push(model_or_sync(outcome, Some(model)));
                } else if link.awaiting_resync() {
                    // Nothing to hand the application; just reopen the
                    // outbound gate without rewinding.
                    let ours = mine.unwrap_or(link.last_sent());
                    link.resync(ours, theirs.unwrap_or(0), true, now);
                }
                if let Some(message) = message {
                    events.push(SessionEvent::Progress(message));
                }
                events
            }
            SessionFrame::Error(error) => {
                warn!(%error, "backend error frame");
                vec![SessionEvent::Error(PairlinkError::Remote(error))]
            }
            SessionFrame::Turn(payload) => vec![SessionEvent::TurnMessage(payload)],
        }
    }

    fn on_phase(
        &mut self,
        phase: u8,
        step: Option<i64>,
        facts: FactsUpdate,
        message: Option<String>,
    ) -> Vec<SessionEvent> {
        debug!(phase, ?step, "phase");
        self.facts.apply(facts);

        if phase < FINAL_PHASE || self.begun {
            if matches!(self.phase, SessionPhase::ConnectingTransport) {
                self.phase = SessionPhase::Progressing;
            }
            return message.map(SessionEvent::Progress).into_iter().collect();
        }

        self.begun = true;
        if self.phase == SessionPhase::Paused {
            self.resume_phase = SessionPhase::Active;
        } else {
            self.phase = SessionPhase::Active;
        }
        info!(resumed = self.resumed, "session began");
        let message = if self.resumed { message } else { None };
        vec![SessionEvent::Begin { message }]
    }

    fn pause(
        &mut self,
        link: &mut SessionLink,
        message: Option<String>,
        close_message: Option<String>,
    ) -> Vec<SessionEvent> {
        if self.phase == SessionPhase::Paused {
            return Vec::new();
        }
        info!("session paused");
        self.resume_phase = self.phase;
        self.phase = SessionPhase::Paused;
        self.flags.paused.store(true, Ordering::Release);
        link.hold();
        vec![SessionEvent::Paused {
            message,
            close_message,
        }]
    }

    fn unpause(
        &mut self,
        link: &mut SessionLink,
        message: Option<String>,
        mine: Option<u64>,
        theirs: Option<u64>,
        model: Option<Value>,
        now: Instant,
    ) -> Vec<SessionEvent> {
        if self.phase != SessionPhase::Paused {
            return Vec::new();
        }
        info!("session unpaused");
        self.phase = self.resume_phase;
        self.flags.paused.store(false, Ordering::Release);

        // Resync while still held so replayed frames go out ahead of
        // anything queued during the pause.
        let ours = mine.unwrap_or(link.last_sent());
        let theirs = theirs.unwrap_or(link.inbound_last());
        let outcome = link.resync(ours, theirs, true, now);
        link.release(now);

        vec![
            SessionEvent::Unpaused { message },
            model_or_sync(outcome, model),
        ]
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn facts(&self) -> &SessionFacts {
        &self.facts
    }

    pub fn has_begun(&self) -> bool {
        self.begun
    }

    /// Whether the session got far enough to own a socket.
    pub fn has_transport(&self) -> bool {
        !matches!(
            self.phase,
            SessionPhase::Idle | SessionPhase::Handshaking | SessionPhase::Finished
        )
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    pub fn is_paused(&self) -> bool {
        self.phase == SessionPhase::Paused
    }

    pub fn is_finished(&self) -> bool {
        self.phase == SessionPhase::Finished
    }
}

fn model_or_sync(outcome: ReplayOutcome, model: Option<Value>) -> SessionEvent {
    match outcome {
        ReplayOutcome::Replayed(_) => SessionEvent::Model(model.unwrap_or(Value::Null)),
        ReplayOutcome::Failed => SessionEvent::Sync(model),
    }
}
