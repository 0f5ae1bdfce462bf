//! Capture session lifecycle and the worker that owns all session state.
//!
//! A [`Sniffer`] goes `Stopped → Running → Stopped`. `start()` opens the
//! capture sink, creates the bounded queue, spawns the worker thread and
//! enables the radio, rolling back everything already created if any
//! step fails. `stop()` disables the radio first, then signals the
//! worker, joins it, drains whatever is left in the queue and closes the
//! sink; production is always off before the queue dies.
//!
//! The worker is the only writer of the leaderboard, histogram and log
//! files; the radio context touches nothing but the queue. The shared
//! [`SessionStats`] counters and the [`ViewCursor`] are lock-free
//! atomics.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::TimeZone;
use crossbeam_channel::RecvTimeoutError;

use crate::error::{Error, Result};
use crate::filter::{CaptureFilter, FrameRx};
use crate::frame::{self, FrameDescriptor, Mac};
use crate::heartbeat::{Heartbeat, SENTINEL_RSSI, SENTINEL_SOURCE};
use crate::histogram::RssiHistogram;
use crate::leaderboard::{Entry, TopRequests, ViewCursor, DEFAULT_WINDOW};
use crate::logfile::{BatteryLog, ReducedLog};
use crate::pcap::CaptureSink;
use crate::queue::{self, FrameReceiver};

// ── Collaborator seams ───────────────────────────────────────────────

/// Radio driver control: install the session's receive tap and tune.
///
/// `disable` must guarantee no further tap calls once it returns; the
/// controller relies on that ordering during `stop()`. A sloppy driver
/// that keeps a tap clone anyway only hits a disconnected queue.
pub trait PromiscuousRadio {
    fn enable(&mut self, channel: u8, tap: FrameRx) -> Result<()>;
    fn disable(&mut self);
}

/// Best-effort status sink. Implementations drop text when busy; the
/// worker never learns nor cares.
pub trait StatusDisplay {
    fn push_text(&self, text: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatterySample {
    pub millivolts: u16,
    pub milliamps: i16,
}

/// Optional fuel gauge; `None` readings are skipped quietly.
pub trait BatteryGauge {
    fn sample(&mut self) -> Option<BatterySample>;
}

/// Per-session collaborators, consumed by `start()` and owned by the
/// worker until `stop()`.
pub struct SessionIo {
    pub capture: Box<dyn CaptureSink + Send>,
    pub display: Box<dyn StatusDisplay + Send>,
    pub battery: Option<Box<dyn BatteryGauge + Send>>,
}

// ── Shared counters ──────────────────────────────────────────────────

/// Lock-free session counters, readable from any context.
#[derive(Debug, Default)]
pub struct SessionStats {
    captured: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    heartbeats: AtomicU64,
    persist_failures: AtomicU64,
    drained: AtomicU64,
}

impl SessionStats {
    pub fn captured(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn heartbeats(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }

    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }

    pub fn drained(&self) -> u64 {
        self.drained.load(Ordering::Relaxed)
    }

    pub(crate) fn note_captured(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_dropped(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn note_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_drained(&self, n: u64) {
        self.drained.fetch_add(n, Ordering::Relaxed);
    }
}

impl std::fmt::Display for SessionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} captured, {} dropped, {} processed, {} heartbeats, {} persist failures",
            self.captured(),
            self.dropped(),
            self.processed(),
            self.heartbeats(),
            self.persist_failures()
        )
    }
}

// ── Configuration ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SnifferConfig {
    /// Bounded queue depth between radio context and worker.
    pub queue_capacity: usize,
    /// Producer-side push wait before dropping a frame.
    pub push_timeout: Duration,
    /// Consumer-side pop wait; also bounds how long `stop()` blocks.
    pub pop_timeout: Duration,
    /// `None` disables heartbeat records.
    pub heartbeat_interval: Option<Duration>,
    /// Display refresh and leaderboard sweep cadence.
    pub refresh_interval: Duration,
    /// Battery sampling cadence, when a gauge is fitted.
    pub battery_interval: Duration,
    /// Leaderboard entries older than this are swept.
    pub stale_after: Duration,
    /// Optional source allow-list for admission.
    pub allowed_sources: Option<Vec<Mac>>,
    /// Include battery volts/current on the status page.
    pub show_battery: bool,
    /// Per-frame text log path.
    pub reduced_log: PathBuf,
    /// Battery CSV path; `None` skips the file.
    pub battery_log: Option<PathBuf>,
}

impl Default for SnifferConfig {
    fn default() -> Self {
        Self {
            queue_capacity: queue::DEFAULT_CAPACITY,
            push_timeout: Duration::from_millis(100),
            pop_timeout: Duration::from_millis(100),
            heartbeat_interval: Some(Duration::from_secs(10)),
            refresh_interval: Duration::from_secs(1),
            battery_interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(30),
            allowed_sources: None,
            show_battery: false,
            reduced_log: PathBuf::from("reduced.log"),
            battery_log: None,
        }
    }
}

// ── Lifecycle controller ─────────────────────────────────────────────

struct ActiveSession {
    running: Arc<AtomicBool>,
    tap: FrameRx,
    worker: JoinHandle<WorkerRemains>,
}

/// What the worker hands back through its join: the queue receiver for
/// the drain and the capture sink for the close, in `stop()`'s order.
struct WorkerRemains {
    rx: FrameReceiver,
    capture: Box<dyn CaptureSink + Send>,
}

/// The one-at-a-time capture session controller.
pub struct Sniffer<R: PromiscuousRadio> {
    radio: R,
    config: SnifferConfig,
    stats: Arc<SessionStats>,
    view: Arc<ViewCursor>,
    active: Option<ActiveSession>,
}

impl<R: PromiscuousRadio> Sniffer<R> {
    pub fn new(radio: R, config: SnifferConfig) -> Self {
        Self {
            radio,
            config,
            stats: Arc::new(SessionStats::default()),
            view: Arc::new(ViewCursor::new(DEFAULT_WINDOW)),
            active: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Counters of the current (or most recent) session.
    pub fn stats(&self) -> Arc<SessionStats> {
        self.stats.clone()
    }

    /// Display cursor, shared with buttons or an admin surface. The
    /// cursor survives across sessions.
    pub fn view(&self) -> Arc<ViewCursor> {
        self.view.clone()
    }

    pub fn config(&self) -> &SnifferConfig {
        &self.config
    }

    /// Begin capturing on `channel`. Fails with [`Error::AlreadyRunning`]
    /// if a session exists; any mid-sequence failure rolls back the
    /// resources created so far and surfaces the error.
    pub fn start(&mut self, channel: u8, io: SessionIo) -> Result<()> {
        if self.active.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let SessionIo {
            mut capture,
            display,
            battery,
        } = io;

        capture.begin()?;

        self.stats = Arc::new(SessionStats::default());
        let (tx, rx) = queue::frame_queue(self.config.queue_capacity);
        let running = Arc::new(AtomicBool::new(true));
        let tap = FrameRx::new(
            CaptureFilter::new(self.config.allowed_sources.clone()),
            tx,
            self.config.push_timeout,
            self.stats.clone(),
        );

        let worker = Worker {
            rx,
            capture,
            display,
            battery,
            running: running.clone(),
            stats: self.stats.clone(),
            view: self.view.clone(),
            reduced: ReducedLog::new(self.config.reduced_log.clone()),
            battery_log: self.config.battery_log.clone().map(BatteryLog::new),
            pop_timeout: self.config.pop_timeout,
            heartbeat_interval: self.config.heartbeat_interval,
            refresh_interval: self.config.refresh_interval,
            battery_interval: self.config.battery_interval,
            stale_after: self.config.stale_after,
            show_battery: self.config.show_battery,
        };

        let handle = match thread::Builder::new()
            .name("sniffer".into())
            .stack_size(16 * 1024)
            .spawn(move || worker.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                // The closure (and the sink inside it) is gone; its drop
                // released the file handle
                return Err(Error::Io(e));
            }
        };

        if let Err(e) = self.radio.enable(channel, tap.clone()) {
            running.store(false, Ordering::Relaxed);
            drop(tap);
            match handle.join() {
                Ok(remains) => {
                    drop(remains.rx);
                    let mut capture = remains.capture;
                    if let Err(close_err) = capture.finish() {
                        log::warn!("capture close during rollback failed: {close_err}");
                    }
                }
                Err(_) => log::error!("capture worker panicked during rollback"),
            }
            return Err(e);
        }

        self.active = Some(ActiveSession {
            running,
            tap,
            worker: handle,
        });
        log::info!("capture session started on channel {channel}");
        Ok(())
    }

    /// Tear the session down. Radio off first, then the worker, then
    /// the queue, then the capture file.
    pub fn stop(&mut self) -> Result<()> {
        let Some(active) = self.active.take() else {
            return Err(Error::NotRunning);
        };

        self.radio.disable();
        active.running.store(false, Ordering::Relaxed);
        drop(active.tap);

        let remains = match active.worker.join() {
            Ok(remains) => remains,
            Err(_) => {
                log::error!("capture worker panicked; session state discarded");
                return Err(Error::WorkerPanic);
            }
        };

        let mut drained = 0u64;
        while remains.rx.try_recv().is_ok() {
            drained += 1;
        }
        if drained > 0 {
            self.stats.note_drained(drained);
            log::debug!("drained {drained} undelivered frames");
        }
        drop(remains.rx);

        let mut capture = remains.capture;
        if let Err(e) = capture.finish() {
            log::warn!("closing capture file failed: {e}");
        }

        log::info!("capture session stopped: {}", self.stats);
        Ok(())
    }
}

impl<R: PromiscuousRadio> Drop for Sniffer<R> {
    fn drop(&mut self) {
        if self.active.is_some() {
            let _ = self.stop();
        }
    }
}

// ── Capture worker ───────────────────────────────────────────────────

struct Worker {
    rx: FrameReceiver,
    capture: Box<dyn CaptureSink + Send>,
    display: Box<dyn StatusDisplay + Send>,
    battery: Option<Box<dyn BatteryGauge + Send>>,
    running: Arc<AtomicBool>,
    stats: Arc<SessionStats>,
    view: Arc<ViewCursor>,
    reduced: ReducedLog,
    battery_log: Option<BatteryLog>,
    pop_timeout: Duration,
    heartbeat_interval: Option<Duration>,
    refresh_interval: Duration,
    battery_interval: Duration,
    stale_after: Duration,
    show_battery: bool,
}

impl Worker {
    fn run(mut self) -> WorkerRemains {
        log::info!("capture worker running");
        let started = Instant::now();
        let mut heartbeat = Heartbeat::new(self.heartbeat_interval, started);
        let mut board = TopRequests::new();
        let mut histogram = RssiHistogram::new();
        let mut next_refresh = started + self.refresh_interval;
        let mut next_battery = started + self.battery_interval;
        let mut last_battery = None;

        // First liveness record marks the session start
        if heartbeat.is_enabled() {
            self.emit_heartbeat();
        }

        loop {
            if !self.running.load(Ordering::Relaxed) {
                break;
            }

            match self.rx.recv_timeout(self.pop_timeout) {
                Ok(descriptor) => self.process(descriptor, &mut board, &mut histogram),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let now = Instant::now();
            if heartbeat.due(now) {
                self.emit_heartbeat();
            }
            if self.battery.is_some() && now >= next_battery {
                last_battery = self.sample_battery();
                next_battery = now + self.battery_interval;
            }
            if now >= next_refresh {
                self.maintenance(&mut board, last_battery);
                next_refresh = now + self.refresh_interval;
            }
        }

        log::info!(
            "capture worker exiting after {:?}: {} (rssi band counts {})",
            started.elapsed(),
            self.stats,
            histogram
        );
        WorkerRemains {
            rx: self.rx,
            capture: self.capture,
        }
    }

    /// Persist one frame and fold it into the session state. Persist
    /// failures are counted but never stop the ranking updates.
    fn process(
        &mut self,
        descriptor: FrameDescriptor,
        board: &mut TopRequests,
        histogram: &mut RssiHistogram,
    ) {
        if let Err(e) = self
            .reduced
            .append(descriptor.seconds, &descriptor.source, descriptor.rssi)
        {
            self.stats.note_persist_failure();
            log::warn!("reduced log append failed: {e}");
        }

        if let Err(e) = self.capture.append(
            &descriptor.payload,
            descriptor.seconds,
            descriptor.microseconds,
        ) {
            self.stats.note_persist_failure();
            log::warn!("capture append failed: {e}");
        }

        // Positive readings are sentinels, never rankable
        if descriptor.rssi <= 0 {
            board.observe(descriptor.rssi, descriptor.source, descriptor.seconds);
        }
        histogram.record(descriptor.rssi);
        self.stats.note_processed();
    }

    fn emit_heartbeat(&mut self) {
        let (seconds, microseconds) = unix_now();

        if let Err(e) = self
            .reduced
            .append_heartbeat(seconds, &SENTINEL_SOURCE, SENTINEL_RSSI)
        {
            self.stats.note_persist_failure();
            log::warn!("heartbeat log append failed: {e}");
        }

        let frame = frame::heartbeat_frame();
        if let Err(e) = self.capture.append(&frame, seconds, microseconds) {
            self.stats.note_persist_failure();
            log::warn!("heartbeat capture append failed: {e}");
        }

        self.stats.note_heartbeat();
        log::debug!("heartbeat written");
    }

    fn sample_battery(&mut self) -> Option<BatterySample> {
        let sample = self.battery.as_mut()?.sample()?;
        if let Some(log_file) = &self.battery_log {
            let (seconds, _) = unix_now();
            if let Err(e) = log_file.append(seconds, sample.millivolts, sample.milliamps) {
                log::warn!("battery log append failed: {e}");
            }
        }
        Some(sample)
    }

    fn maintenance(&mut self, board: &mut TopRequests, battery: Option<BatterySample>) {
        let (now, _) = unix_now();
        board.sweep(now, self.stale_after.as_secs());

        let rank = self.view.rank();
        let window = self.view.window();
        let battery = if self.show_battery { battery } else { None };
        let text = format_status(board.entry_at_rank(rank, window), rank, window, battery);
        self.display.push_text(&text);
    }
}

/// Status page for the display: rank header, then either the entry's
/// details or an empty marker, then an optional battery line.
fn format_status(
    entry: Option<&Entry>,
    rank: usize,
    window: usize,
    battery: Option<BatterySample>,
) -> String {
    use std::fmt::Write;

    let mut text = format!("({rank}/{window}) Top RSSI\n");
    match entry {
        Some(entry) => {
            let time = chrono::Local
                .timestamp_opt(entry.last_seen as i64, 0)
                .single()
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| String::from("--:--:--"));
            let _ = write!(text, "RSSI: {}\nTime: {}\n{}", entry.rssi, time, entry.mac);
        }
        None => text.push_str("Entry empty"),
    }
    if let Some(sample) = battery {
        let _ = write!(
            text,
            "\nV: {}mV I: {}mA",
            sample.millivolts, sample.milliamps
        );
    }
    text
}

pub(crate) fn unix_now() -> (u64, u32) {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => (elapsed.as_secs(), elapsed.subsec_micros()),
        Err(_) => (0, 0),
    }
}
