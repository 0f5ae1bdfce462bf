//! Periodic liveness records proving the pipeline and clock are alive
//! even when no traffic is on the air.
//!
//! The worker polls [`Heartbeat::due`] every loop iteration; when it
//! fires, a synthetic probe request ([`crate::frame::heartbeat_frame`])
//! goes to the pcap and a marked line goes to the reduced log. Heartbeats
//! never transit the frame queue, so they cannot reach the leaderboard
//! or histogram.

use std::time::{Duration, Instant};

use crate::frame::Mac;

/// Source address stamped on heartbeat records.
pub const SENTINEL_SOURCE: Mac = Mac::ZERO;

/// RSSI stamped on heartbeat records: +1 dBm is impossible over the air
/// and sits outside the [−99, 0] ranking domain.
pub const SENTINEL_RSSI: i8 = 1;

/// Elapsed-interval state for heartbeat emission.
#[derive(Debug)]
pub struct Heartbeat {
    /// `None` disables heartbeats entirely (valid configuration).
    interval: Option<Duration>,
    last_emitted: Instant,
}

impl Heartbeat {
    pub fn new(interval: Option<Duration>, now: Instant) -> Self {
        Self {
            interval,
            last_emitted: now,
        }
    }

    /// True when the interval has elapsed since the last emission, in
    /// which case the emission time is recorded. Always false when
    /// disabled.
    pub fn due(&mut self, now: Instant) -> bool {
        let Some(interval) = self.interval else {
            return false;
        };
        if now.saturating_duration_since(self.last_emitted) >= interval {
            self.last_emitted = now;
            true
        } else {
            false
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }
}
