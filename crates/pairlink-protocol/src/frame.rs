//! Session frames: the grammar of meta and turn frames.
//!
//! Once the link layer has checked ordering, every non-direct payload is a
//! JSON object that means one of a handful of things. The backend does not
//! tag them; the meaning follows from which fields are present, checked in
//! a fixed precedence:
//!
//! 1. `pause` (bool)          → [`SessionFrame::Pause`]
//! 2. `phase` in 1..=4        → [`SessionFrame::Phase`]
//! 3. `code` == -1            → [`SessionFrame::Terminal`]
//! 4. `code` in 0..=4         → [`SessionFrame::Reconnect`]
//! 5. `error`                 → [`SessionFrame::Error`]
//! 6. anything else           → [`SessionFrame::Turn`]
//!
//! Fields are read one at a time. A field with an unexpected type counts as
//! absent: a game turn that happens to contain `"phase": "attack"` falls
//! through to `Turn`, and a terminal frame with an object `message` is
//! still terminal.

use serde_json::Value;

/// Final phase number. Reaching it begins the session.
pub const FINAL_PHASE: u8 = 4;

/// Borrowed view of a frame object. Each field is read on its own, so a
/// field with an unexpected type reads as absent without hiding the rest.
struct Fields<'a>(&'a serde_json::Map<String, Value>);

impl Fields<'_> {
    fn bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    fn int(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    fn uint(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    fn string(&self, key: &str) -> Option<String> {
        self.0.get(key).and_then(Value::as_str).map(str::to_owned)
    }

    fn value(&self, key: &str) -> Option<Value> {
        self.0.get(key).filter(|v| !v.is_null()).cloned()
    }

    fn facts(&self) -> FactsUpdate {
        FactsUpdate {
            first: self.bool("first"),
            opponent: self.value("opponent"),
            start: self.int("start"),
            seed: self.uint("seed"),
        }
    }
}

/// Cached session facts a frame may update. `None` means "unchanged".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactsUpdate {
    /// Whether we move first.
    pub first: Option<bool>,
    /// The opponent's public payload.
    pub opponent: Option<Value>,
    /// Session start timestamp (server clock, milliseconds).
    pub start: Option<i64>,
    /// Shared random seed both sides derive gameplay randomness from.
    pub seed: Option<u64>,
}

impl FactsUpdate {
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
            && self.opponent.is_none()
            && self.start.is_none()
            && self.seed.is_none()
    }
}

/// A decoded session frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionFrame {
    /// The backend paused or unpaused the pair (usually because the other
    /// side dropped). When unpausing it may report the turn counters
    /// needed to resync (`mine`, `theirs`) and a full `model`.
    Pause {
        paused: bool,
        message: Option<String>,
        close: Option<String>,
        mine: Option<u64>,
        theirs: Option<u64>,
        model: Option<Value>,
    },

    /// Handshake progress. `phase` 4 is final.
    Phase {
        phase: u8,
        step: Option<i64>,
        facts: FactsUpdate,
        message: Option<String>,
    },

    /// The session is over (`code: -1`). `payload` is the whole frame.
    Terminal {
        message: Option<String>,
        payload: Value,
    },

    /// State after a reconnect (`code` 0..=4).
    Reconnect {
        code: u8,
        facts: FactsUpdate,
        model: Option<Value>,
        mine: Option<u64>,
        theirs: Option<u64>,
        message: Option<String>,
    },

    /// The backend reported an error for this session.
    Error(Value),

    /// An opaque gameplay payload.
    Turn(Value),
}

impl SessionFrame {
    /// Decodes a payload following the precedence in the module docs.
    pub fn decode(value: Value) -> Self {
        let Some(object) = value.as_object() else {
            return SessionFrame::Turn(value);
        };
        let fields = Fields(object);

        if let Some(paused) = fields.bool("pause") {
            return SessionFrame::Pause {
                paused,
                message: fields.string("message"),
                close: fields.string("close"),
                mine: fields.uint("mine"),
                theirs: fields.uint("theirs"),
                model: fields.value("model"),
            };
        }

        if let Some(phase) = fields
            .int("phase")
            .filter(|p| (1..=i64::from(FINAL_PHASE)).contains(p))
        {
            return SessionFrame::Phase {
                phase: phase as u8,
                step: fields.int("step"),
                facts: fields.facts(),
                message: fields.string("message"),
            };
        }

        match fields.int("code") {
            Some(-1) => {
                return SessionFrame::Terminal {
                    message: fields.string("message"),
                    payload: value,
                };
            }
            Some(code @ 0..=4) => {
                return SessionFrame::Reconnect {
                    code: code as u8,
                    facts: fields.facts(),
                    model: fields.value("model"),
                    mine: fields.uint("mine"),
                    theirs: fields.uint("theirs"),
                    message: fields.string("message"),
                };
            }
            _ => {}
        }

        match fields.value("error") {
            Some(error) => SessionFrame::Error(error),
            None => SessionFrame::Turn(value),
        }
    }
}
