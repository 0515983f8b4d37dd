//! Inbound sequence validation.

/// Result of checking one inbound sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqCheck {
    /// Exactly `last + 1`. `last` advanced.
    Accepted,
    /// At or below `last`: already seen, ignore.
    Stale,
    /// Skipped ahead. `last` did not move.
    Gap { expected: u64 },
}

/// Tracks the last accepted inbound sequence number.
///
/// Sequences start at 1 after every (re)connect; `last == 0` means nothing
/// has been accepted yet.
#[derive(Debug, Clone, Default)]
pub struct InboundSequencer {
    last: u64,
}

impl InboundSequencer {
    pub fn check(&mut self, seq: u64) -> SeqCheck {
        let expected = self.last + 1;
        if seq == expected {
            self.last = seq;
            SeqCheck::Accepted
        } else if seq <= self.last {
            SeqCheck::Stale
        } else {
            SeqCheck::Gap { expected }
        }
    }

    pub fn reset_to(&mut self, last: u64) {
        self.last = last;
    }

    pub fn last(&self) -> u64 {
        self.last
    }
}
