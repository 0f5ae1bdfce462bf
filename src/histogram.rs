//! Session-cumulative RSSI distribution over ten 10 dBm bands.

use core::fmt;

/// Number of 10 dBm-wide buckets, spanning 0 down to −99 dBm.
pub const BUCKETS: usize = 10;

/// Received-power distribution of every processed in-range frame.
///
/// Bucket 0 holds the strongest band (0..−9 dBm), bucket 9 the weakest
/// (−90..−99 dBm). Counters accumulate for the whole session; the
/// leaderboard sweep never touches them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RssiHistogram {
    buckets: [u32; BUCKETS],
}

impl RssiHistogram {
    pub const fn new() -> Self {
        Self {
            buckets: [0; BUCKETS],
        }
    }

    /// Count one reading. Values outside [−99, 0] are logged and not
    /// counted; returns whether the reading landed in a bucket.
    pub fn record(&mut self, rssi: i8) -> bool {
        if !(-99..=0).contains(&rssi) {
            log::warn!("RSSI {rssi} dBm outside histogram range, not counted");
            return false;
        }
        let bucket = (-(rssi as i32) / 10) as usize;
        self.buckets[bucket] += 1;
        true
    }

    pub fn counts(&self) -> &[u32; BUCKETS] {
        &self.buckets
    }

    /// Total in-range readings counted so far.
    pub fn total(&self) -> u64 {
        self.buckets.iter().map(|&c| c as u64).sum()
    }
}

/// Space-separated band counts, strongest band first.
impl fmt::Display for RssiHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, count) in self.buckets.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{count}")?;
        }
        Ok(())
    }
}
