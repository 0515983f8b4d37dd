//! Fixed-interval heartbeat for Pairlink's realtime link.
//!
//! Every beat the session driver sends a ping (carrying the last measured
//! round trip) and evicts expired replay entries. The heartbeat also counts
//! beats without inbound traffic: after [`HeartbeatConfig::stale_after`] of
//! them the beat is flagged stale and the driver forces a reconnect instead
//! of waiting on a dead socket forever.
//!
//! # Stopped mode
//!
//! While stopped (no socket open), [`Heartbeat::wait_for_beat`] pends
//! forever, so it can sit in a `select!` loop unconditionally:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* handle commands */ }
//!         beat = heartbeat.wait_for_beat() => {
//!             if beat.stale { /* force reconnect */ } else { /* ping */ }
//!         }
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Heartbeat configuration.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Time between beats.
    pub interval: Duration,
    /// Consecutive beats without inbound traffic before the link is stale.
    pub stale_after: u32,
    /// Random delay (0..max) added to the first beat after [`Heartbeat::start`]
    /// so sessions opened together don't ping in lockstep.
    pub initial_jitter: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(4),
            stale_after: 5,
            initial_jitter: Duration::from_millis(250),
        }
    }
}

impl HeartbeatConfig {
    /// Shortest interval accepted by [`validated`](Self::validated).
    pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

    /// Config with the given interval and default everything else.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`Heartbeat::new`]. Rules:
    /// - `interval` raised to at least [`Self::MIN_INTERVAL`].
    /// - `stale_after` raised to at least 1.
    pub fn validated(mut self) -> Self {
        if self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_ms = self.interval.as_millis() as u64,
                min_ms = Self::MIN_INTERVAL.as_millis() as u64,
                "heartbeat interval below minimum, clamping"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        if self.stale_after == 0 {
            self.stale_after = 1;
        }
        self
    }

    /// How long a link may stay silent before it is considered stale.
    pub fn stale_window(&self) -> Duration {
        self.interval * self.stale_after
    }
}

// ---------------------------------------------------------------------------
// Beat info
// ---------------------------------------------------------------------------

/// Returned by [`Heartbeat::wait_for_beat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeatInfo {
    /// Monotonically increasing beat number (starts at 1, never reset).
    pub beat: u64,
    /// Beats since the last recorded inbound activity, including this one.
    pub idle_beats: u32,
    /// `true` when `idle_beats` reached `stale_after`.
    pub stale: bool,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct HeartbeatMetrics {
    /// Total beats fired.
    pub total_beats: u64,
    /// Times the link was found stale.
    pub stale_detections: u64,
    /// Beats that woke up more than 10% of an interval late.
    pub late_beats: u64,
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

/// Fixed-interval heartbeat for one session link.
pub struct Heartbeat {
    config: HeartbeatConfig,
    running: bool,
    next_beat: Option<Instant>,
    beat_count: u64,
    idle_beats: u32,
    metrics: HeartbeatMetrics,
}

impl Heartbeat {
    /// Creates a stopped heartbeat.
    pub fn new(config: HeartbeatConfig) -> Self {
        let config = config.validated();
        debug!(
            interval_ms = config.interval.as_millis() as u64,
            stale_after = config.stale_after,
            "heartbeat created"
        );
        Self {
            config,
            running: false,
            next_beat: None,
            beat_count: 0,
            idle_beats: 0,
            metrics: HeartbeatMetrics::default(),
        }
    }

    /// Starts (or restarts) beating. Resets the idle count.
    ///
    /// The first beat is due one interval plus jitter from now.
    pub fn start(&mut self) {
        let max_us = self.config.initial_jitter.as_micros() as u64;
        let jitter = if max_us == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(rand::rng().random_range(0..max_us))
        };
        self.next_beat = Some(Instant::now() + self.config.interval + jitter);
        self.idle_beats = 0;
        if !self.running {
            self.running = true;
            debug!(beat = self.beat_count, "heartbeat started");
        }
    }

    /// Stops beating. `wait_for_beat` pends until [`start`](Self::start).
    ///
    /// Safe to call multiple times.
    pub fn stop(&mut self) {
        if self.running {
            self.running = false;
            self.next_beat = None;
            debug!(beat = self.beat_count, "heartbeat stopped");
        }
    }

    /// Waits until the next beat is due.
    ///
    /// Pends forever while stopped. Cancel-safe: no state changes until
    /// the sleep completes, so dropping the future inside `select!` loses
    /// nothing.
    pub async fn wait_for_beat(&mut self) -> BeatInfo {
        let next = match self.next_beat {
            Some(next) if self.running => next,
            _ => std::future::pending().await,
        };

        time::sleep_until(next).await;

        let now = Instant::now();
        let late_by = now.saturating_duration_since(next);
        if late_by > self.config.interval / 10 {
            self.metrics.late_beats += 1;
            trace!(late_ms = late_by.as_millis() as u64, "late heartbeat");
        }

        // Always schedule from now, so a late beat never causes a burst.
        self.next_beat = Some(now + self.config.interval);
        self.beat_count += 1;
        self.idle_beats = self.idle_beats.saturating_add(1);
        self.metrics.total_beats += 1;

        let idle_beats = self.idle_beats;
        let stale = idle_beats >= self.config.stale_after;
        if stale {
            self.metrics.stale_detections += 1;
            self.idle_beats = 0;
            warn!(
                beat = self.beat_count,
                idle_beats,
                "no inbound traffic, link is stale"
            );
        } else {
            trace!(beat = self.beat_count, idle_beats, "heartbeat");
        }

        BeatInfo {
            beat: self.beat_count,
            idle_beats,
            stale,
        }
    }

    /// Records inbound traffic. Resets the idle count.
    pub fn record_activity(&mut self) {
        self.idle_beats = 0;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn beat_count(&self) -> u64 {
        self.beat_count
    }

    pub fn metrics(&self) -> &HeartbeatMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }
}
