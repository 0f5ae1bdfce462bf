//! Bounded top-K ranking of the strongest probe-request transmitters.
//!
//! One slot per distinct transmitter, always sorted strongest-first.
//! Empty slots carry a sentinel RSSI below any real reading so they sort
//! to the bottom and get overwritten first. The table is owned by the
//! capture worker; the shared [`ViewCursor`] is the only piece external
//! contexts touch.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::frame::Mac;

/// Sentinel RSSI marking an unused slot; below any real dBm reading.
pub const EMPTY_RSSI: i8 = -101;

/// Product table size.
pub const TOP_SLOTS: usize = 10;

/// Default visible window on the display, half the table.
pub const DEFAULT_WINDOW: usize = TOP_SLOTS / 2;

/// One ranked transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// Strongest RSSI seen from this transmitter, dBm.
    pub rssi: i8,
    pub mac: Mac,
    /// Unix seconds of the observation that set `rssi`.
    pub last_seen: u64,
}

impl Entry {
    pub const EMPTY: Entry = Entry {
        rssi: EMPTY_RSSI,
        mac: Mac::ZERO,
        last_seen: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.rssi == EMPTY_RSSI
    }
}

/// Fixed-size ranking, sorted descending by RSSI after every mutation.
///
/// Sort order is a documented total order: RSSI descending, then
/// last-seen descending (newer ranks higher on ties), then address
/// ascending. Deterministic regardless of observation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaderboard<const K: usize> {
    slots: [Entry; K],
}

/// The product-sized table.
pub type TopRequests = Leaderboard<TOP_SLOTS>;

impl<const K: usize> Leaderboard<K> {
    pub const fn new() -> Self {
        Self {
            slots: [Entry::EMPTY; K],
        }
    }

    /// Fold one observation into the table.
    ///
    /// A single scan finds both the slot already holding `mac` (if any)
    /// and the weakest slot. A known transmitter is updated only when
    /// the new reading is strictly stronger; an unknown one replaces the
    /// weakest slot only when strictly stronger than it. Returns whether
    /// the table changed.
    pub fn observe(&mut self, rssi: i8, mac: Mac, timestamp: u64) -> bool {
        let mut matched = None;
        let mut weakest = 0;
        for (i, entry) in self.slots.iter().enumerate() {
            if !entry.is_empty() && entry.mac == mac {
                matched = Some(i);
            }
            if entry.rssi < self.slots[weakest].rssi {
                weakest = i;
            }
        }

        let changed = match matched {
            Some(i) => {
                if rssi > self.slots[i].rssi {
                    self.slots[i].rssi = rssi;
                    self.slots[i].last_seen = timestamp;
                    true
                } else {
                    false
                }
            }
            None => {
                if rssi > self.slots[weakest].rssi {
                    self.slots[weakest] = Entry {
                        rssi,
                        mac,
                        last_seen: timestamp,
                    };
                    true
                } else {
                    false
                }
            }
        };

        if changed {
            self.resort();
        }
        changed
    }

    /// Reset every entry older than `max_age` seconds to the empty
    /// sentinel. Returns how many were cleared.
    pub fn sweep(&mut self, now: u64, max_age: u64) -> usize {
        let mut cleared = 0;
        for entry in self.slots.iter_mut() {
            if entry.last_seen != 0 && now.saturating_sub(entry.last_seen) > max_age {
                *entry = Entry::EMPTY;
                cleared += 1;
            }
        }
        if cleared > 0 {
            log::debug!("leaderboard sweep cleared {cleared} stale entries");
            self.resort();
        }
        cleared
    }

    /// Entry at a 1-based rank within the visible window, or `None` for
    /// an unused slot. Out-of-range window clamps to `1..=K`; an
    /// out-of-range rank falls back to 1 rather than indexing out of
    /// bounds.
    pub fn entry_at_rank(&self, rank: usize, window: usize) -> Option<&Entry> {
        let window = window.clamp(1, K);
        let rank = if (1..=window).contains(&rank) { rank } else { 1 };
        let entry = &self.slots[rank - 1];
        if entry.is_empty() {
            None
        } else {
            Some(entry)
        }
    }

    /// All slots in rank order, empties included.
    pub fn entries(&self) -> &[Entry] {
        &self.slots
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|e| !e.is_empty()).count()
    }

    fn resort(&mut self) {
        self.slots.sort_unstable_by(|a, b| {
            b.rssi
                .cmp(&a.rssi)
                .then(b.last_seen.cmp(&a.last_seen))
                .then(a.mac.cmp(&b.mac))
        });
    }
}

impl<const K: usize> Default for Leaderboard<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Which leaderboard slot the display currently shows: 1-based `rank`
/// within a `window` of the strongest entries.
///
/// Shared atomics so buttons or an admin surface can move the cursor
/// while the worker reads it each refresh. Stored values are already
/// clamped; `Leaderboard::entry_at_rank` clamps again on read.
#[derive(Debug)]
pub struct ViewCursor {
    rank: AtomicUsize,
    window: AtomicUsize,
}

impl ViewCursor {
    pub fn new(window: usize) -> Self {
        Self {
            rank: AtomicUsize::new(1),
            window: AtomicUsize::new(window.clamp(1, TOP_SLOTS)),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank.load(Ordering::Relaxed)
    }

    pub fn window(&self) -> usize {
        self.window.load(Ordering::Relaxed)
    }

    pub fn set_rank(&self, rank: usize) {
        let clamped = rank.clamp(1, self.window());
        self.rank.store(clamped, Ordering::Relaxed);
    }

    /// Advance to the next rank, wrapping back to 1 past the window.
    pub fn cycle_rank(&self) {
        let next = self.rank() + 1;
        let wrapped = if next > self.window() { 1 } else { next };
        self.rank.store(wrapped, Ordering::Relaxed);
    }

    pub fn set_window(&self, window: usize) {
        self.window
            .store(window.clamp(1, TOP_SLOTS), Ordering::Relaxed);
        // Shrinking the window can strand the rank past it
        self.set_rank(self.rank());
    }
}

impl Default for ViewCursor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> Mac {
        Mac([0x02, 0, 0, 0, 0, last])
    }

    fn assert_sorted<const K: usize>(board: &Leaderboard<K>) {
        let slots = board.entries();
        for pair in slots.windows(2) {
            assert!(
                pair[0].rssi >= pair[1].rssi,
                "table must stay sorted descending: {slots:?}"
            );
        }
    }

    // ── observe ────────────────────────────────────────────────────

    #[test]
    fn stronger_reading_for_known_mac_updates_in_place() {
        let mut board: Leaderboard<2> = Leaderboard::new();
        board.observe(-40, mac(0xAA), 100);
        board.observe(-30, mac(0xBB), 101);
        // Weaker repeat for AA is ignored
        assert!(!board.observe(-90, mac(0xAA), 102));

        let slots = board.entries();
        assert_eq!((slots[0].mac, slots[0].rssi), (mac(0xBB), -30));
        assert_eq!((slots[1].mac, slots[1].rssi), (mac(0xAA), -40));
        assert_eq!(slots[1].last_seen, 100, "ignored reading must not touch the timestamp");
    }

    #[test]
    fn newcomer_replaces_weakest_when_stronger() {
        let mut board: Leaderboard<3> = Leaderboard::new();
        board.observe(-50, mac(0xCC), 1);
        board.observe(-60, mac(0xDD), 2);
        board.observe(-70, mac(0xEE), 3);
        assert!(board.observe(-55, mac(0xFF), 4));

        let slots = board.entries();
        assert_eq!((slots[0].mac, slots[0].rssi), (mac(0xCC), -50));
        assert_eq!((slots[1].mac, slots[1].rssi), (mac(0xFF), -55));
        assert_eq!((slots[2].mac, slots[2].rssi), (mac(0xDD), -60));
        assert_eq!(board.occupied(), 3, "EE must be gone");
    }

    #[test]
    fn weak_newcomer_into_full_table_is_a_noop() {
        let mut board: Leaderboard<2> = Leaderboard::new();
        board.observe(-50, mac(1), 1);
        board.observe(-60, mac(2), 2);
        let before = board.clone();

        assert!(!board.observe(-60, mac(3), 3));
        assert_eq!(board, before);
    }

    #[test]
    fn non_improving_duplicate_leaves_table_untouched() {
        let mut board: Leaderboard<4> = Leaderboard::new();
        board.observe(-45, mac(7), 10);
        let before = board.clone();

        assert!(!board.observe(-45, mac(7), 11));
        assert_eq!(board, before, "equal RSSI is not an improvement");
    }

    #[test]
    fn sorted_after_every_observation() {
        let mut board: Leaderboard<5> = Leaderboard::new();
        let readings = [
            (-70i8, 1u8),
            (-30, 2),
            (-55, 3),
            (-90, 4),
            (-20, 5),
            (-65, 6),
            (-40, 2),
            (-10, 4),
        ];
        for (i, (rssi, m)) in readings.iter().enumerate() {
            board.observe(*rssi, mac(*m), i as u64);
            assert_sorted(&board);
        }
    }

    #[test]
    fn never_holds_duplicate_addresses() {
        let mut board: Leaderboard<4> = Leaderboard::new();
        for t in 0..20u64 {
            board.observe(-80 + (t as i8 * 3), mac((t % 3) as u8), t);
            let occupied: Vec<Mac> = board
                .entries()
                .iter()
                .filter(|e| !e.is_empty())
                .map(|e| e.mac)
                .collect();
            let mut deduped = occupied.clone();
            deduped.sort();
            deduped.dedup();
            assert_eq!(occupied.len(), deduped.len());
        }
    }

    #[test]
    fn equal_rssi_ties_rank_newer_first() {
        let mut board: Leaderboard<3> = Leaderboard::new();
        board.observe(-50, mac(1), 100);
        board.observe(-50, mac(2), 200);

        let slots = board.entries();
        assert_eq!(slots[0].mac, mac(2), "newer observation ranks higher");
        assert_eq!(slots[1].mac, mac(1));
    }

    // ── sweep ──────────────────────────────────────────────────────

    #[test]
    fn sweep_clears_only_stale_entries() {
        let mut board: Leaderboard<3> = Leaderboard::new();
        board.observe(-40, mac(1), 100);
        board.observe(-50, mac(2), 150);
        board.observe(-60, mac(3), 190);

        let cleared = board.sweep(200, 30);
        assert_eq!(cleared, 2);

        let slots = board.entries();
        assert_eq!(slots[0].mac, mac(3));
        assert_eq!(slots[0].last_seen, 190);
        assert!(slots[1].is_empty());
        assert!(slots[2].is_empty());
        assert_sorted(&board);
    }

    #[test]
    fn sweep_at_exact_threshold_keeps_the_entry() {
        let mut board: Leaderboard<2> = Leaderboard::new();
        board.observe(-40, mac(1), 100);
        // age == max_age is not "older than"
        assert_eq!(board.sweep(130, 30), 0);
        assert_eq!(board.occupied(), 1);
    }

    #[test]
    fn sweep_ignores_empty_slots() {
        let mut board: Leaderboard<4> = Leaderboard::new();
        assert_eq!(board.sweep(1_000_000, 1), 0);
    }

    // ── entry_at_rank ──────────────────────────────────────────────

    #[test]
    fn rank_lookup_within_window() {
        let mut board: Leaderboard<4> = Leaderboard::new();
        board.observe(-30, mac(1), 1);
        board.observe(-40, mac(2), 2);

        let first = board.entry_at_rank(1, 2);
        assert_eq!(first.map(|e| e.mac), Some(mac(1)));
        let second = board.entry_at_rank(2, 2);
        assert_eq!(second.map(|e| e.mac), Some(mac(2)));
    }

    #[test]
    fn empty_slot_renders_as_none() {
        let mut board: Leaderboard<4> = Leaderboard::new();
        board.observe(-30, mac(1), 1);
        assert!(board.entry_at_rank(2, 4).is_none());
    }

    #[test]
    fn out_of_range_rank_clamps_to_first() {
        let mut board: Leaderboard<4> = Leaderboard::new();
        board.observe(-30, mac(1), 1);
        board.observe(-40, mac(2), 2);

        // Rank beyond the window falls back to rank 1
        assert_eq!(board.entry_at_rank(9, 2).map(|e| e.mac), Some(mac(1)));
        assert_eq!(board.entry_at_rank(0, 2).map(|e| e.mac), Some(mac(1)));
        // Window beyond K clamps to K
        assert_eq!(board.entry_at_rank(2, 99).map(|e| e.mac), Some(mac(2)));
    }

    // ── ViewCursor ─────────────────────────────────────────────────

    #[test]
    fn cursor_cycles_through_window_and_wraps() {
        let cursor = ViewCursor::new(3);
        assert_eq!(cursor.rank(), 1);
        cursor.cycle_rank();
        cursor.cycle_rank();
        assert_eq!(cursor.rank(), 3);
        cursor.cycle_rank();
        assert_eq!(cursor.rank(), 1);
    }

    #[test]
    fn cursor_clamps_rank_and_window() {
        let cursor = ViewCursor::new(99);
        assert_eq!(cursor.window(), TOP_SLOTS);
        cursor.set_rank(50);
        assert_eq!(cursor.rank(), TOP_SLOTS);
        cursor.set_window(2);
        assert_eq!(cursor.window(), 2);
        assert_eq!(cursor.rank(), 2, "rank follows a shrinking window");
        cursor.set_window(0);
        assert_eq!(cursor.window(), 1);
    }
}
