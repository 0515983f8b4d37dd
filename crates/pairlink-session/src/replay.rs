//! The replay buffer.
//!
//! Every sequenced message we send is remembered here for a short while.
//! If the socket drops and the peer reports it only saw up to sequence `B`,
//! the link resends `B+1..` from here instead of forcing a full resync.
//!
//! Entries leave the buffer when they are older than the retention window,
//! when the peer acknowledges them, or when the buffer is full.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

/// One sent sequenced message.
#[derive(Debug, Clone, PartialEq)]
pub struct Remembered {
    pub seq: u64,
    pub payload: Value,
    pub sent_at: Instant,
}

/// Bounded, time-limited store of sent messages, ordered by sequence.
#[derive(Debug)]
pub struct ReplayBuffer {
    entries: VecDeque<Remembered>,
    capacity: usize,
    retention: Duration,
}

impl ReplayBuffer {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            retention,
        }
    }

    /// Remembers a sent message, evicting the oldest if full.
    pub fn remember(&mut self, seq: u64, payload: Value, now: Instant) {
        if self.entries.len() >= self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                tracing::debug!(seq = evicted.seq, "replay buffer full, evicting");
            }
        }
        self.entries.push_back(Remembered {
            seq,
            payload,
            sent_at: now,
        });
    }

    /// Drops entries older than the retention window.
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        while self
            .entries
            .front()
            .is_some_and(|e| now.saturating_duration_since(e.sent_at) >= self.retention)
        {
            self.entries.pop_front();
        }
        before - self.entries.len()
    }

    /// Drops entries the peer confirmed (sequence `<= seq`).
    pub fn acknowledge(&mut self, seq: u64) -> usize {
        let before = self.entries.len();
        while self.entries.front().is_some_and(|e| e.seq <= seq) {
            self.entries.pop_front();
        }
        before - self.entries.len()
    }

    /// Payloads for `baseline+1..=last`, in order, if the buffer still holds
    /// every one of them. Returns `None` if any is missing.
    pub fn since(&self, baseline: u64, last: u64) -> Option<Vec<Value>> {
        if last <= baseline {
            return Some(Vec::new());
        }
        let mut expected = baseline + 1;
        let mut payloads = Vec::new();
        for entry in self.entries.iter().filter(|e| e.seq > baseline && e.seq <= last) {
            if entry.seq != expected {
                return None;
            }
            payloads.push(entry.payload.clone());
            expected += 1;
        }
        (expected == last + 1).then_some(payloads)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn oldest_seq(&self) -> Option<u64> {
        self.entries.front().map(|e| e.seq)
    }
}
