//! Probelog library — probe-request capture pipeline for ESP32 field loggers.
//!
//! This crate contains the whole capture core: frame classification, the
//! bounded radio-to-worker queue, the capture worker with its top-K RSSI
//! leaderboard and histogram, heartbeat records, pcap and reduced-log
//! persistence, and the start/stop session lifecycle. Everything here is
//! plain `std` with no platform dependencies, testable on any host with
//! `cargo test`. The ESP-IDF binary in `firmware-std/` is a thin consumer
//! that provides the radio, display, and battery-gauge implementations.
//!
//! Hardware touchpoints are traits on [`session`]: [`session::PromiscuousRadio`]
//! delivers raw frames, [`session::StatusDisplay`] receives status text, and
//! [`session::BatteryGauge`] supplies optional telemetry.

pub mod error;
pub mod filter;
pub mod frame;
pub mod heartbeat;
pub mod histogram;
pub mod leaderboard;
pub mod logfile;
pub mod pcap;
pub mod queue;
pub mod session;
pub mod settings;
pub mod storage;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
