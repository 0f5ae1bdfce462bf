//! Human-readable append-only logs: the reduced per-frame log and the
//! optional battery telemetry CSV.
//!
//! Each append opens, writes, and closes the file so a power cut costs
//! at most one line. Line formats are pure functions so the exact shape
//! stays testable without a filesystem.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};

use crate::frame::Mac;

/// Marker appended to heartbeat lines in the reduced log.
pub const HEARTBEAT_MARKER: &str = " [HEARTBEAT]";

fn local_datetime(seconds: u64) -> DateTime<Local> {
    Local
        .timestamp_opt(seconds as i64, 0)
        .single()
        .unwrap_or_else(Local::now)
}

/// One reduced-log line: `<locale time>, <MAC>, <RSSI>\n`, with the
/// heartbeat marker before the newline for synthetic records.
pub fn reduced_line(seconds: u64, mac: &Mac, rssi: i8, heartbeat: bool) -> String {
    let stamp = local_datetime(seconds).format("%c");
    let marker = if heartbeat { HEARTBEAT_MARKER } else { "" };
    format!("{stamp}, {mac}, {rssi}{marker}\n")
}

/// One battery CSV line: `<Y-m-d H:M:S>, <millivolts>, <milliamps>\n`.
pub fn battery_line(seconds: u64, millivolts: u16, milliamps: i16) -> String {
    let stamp = local_datetime(seconds).format("%Y-%m-%d %H:%M:%S");
    format!("{stamp}, {millivolts}, {milliamps}\n")
}

fn append_to(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().append(true).create(true).open(path)?;
    file.write_all(line.as_bytes())
}

/// The per-frame text log next to the pcap.
#[derive(Debug, Clone)]
pub struct ReducedLog {
    path: PathBuf,
}

impl ReducedLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, seconds: u64, mac: &Mac, rssi: i8) -> io::Result<()> {
        append_to(&self.path, &reduced_line(seconds, mac, rssi, false))
    }

    pub fn append_heartbeat(&self, seconds: u64, mac: &Mac, rssi: i8) -> io::Result<()> {
        append_to(&self.path, &reduced_line(seconds, mac, rssi, true))
    }
}

/// Optional battery telemetry CSV.
#[derive(Debug, Clone)]
pub struct BatteryLog {
    path: PathBuf,
}

impl BatteryLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn append(&self, seconds: u64, millivolts: u16, milliamps: i16) -> io::Result<()> {
        append_to(&self.path, &battery_line(seconds, millivolts, milliamps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: u64 = 1_735_693_200; // 2025-01-01 UTC

    #[test]
    fn reduced_line_fields() {
        let mac = Mac([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let line = reduced_line(T, &mac, -57, false);

        assert!(line.ends_with('\n'));
        let parts: Vec<&str> = line.trim_end().split(", ").collect();
        assert_eq!(parts.len(), 3, "time, mac, rssi: {line:?}");
        assert!(!parts[0].is_empty());
        assert_eq!(parts[1], "AA:BB:CC:DD:EE:FF");
        assert_eq!(parts[2], "-57");
    }

    #[test]
    fn heartbeat_line_is_marked() {
        let line = reduced_line(T, &Mac::ZERO, 1, true);
        assert!(line.ends_with(" [HEARTBEAT]\n"));
        assert!(line.contains("00:00:00:00:00:00"));
        assert!(line.contains(", 1 [HEARTBEAT]"));
    }

    #[test]
    fn battery_line_fields() {
        let line = battery_line(T, 3812, -142);
        let parts: Vec<&str> = line.trim_end().split(", ").collect();
        assert_eq!(parts.len(), 3);
        // 2025-01-01 style stamp regardless of zone offset around new year
        assert_eq!(parts[0].len(), "2024-12-31 17:00:00".len());
        assert_eq!(parts[1], "3812");
        assert_eq!(parts[2], "-142");
    }

    #[test]
    fn append_accumulates_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReducedLog::new(dir.path().join("reduced.log"));

        log.append(T, &Mac([1, 2, 3, 4, 5, 6]), -70).unwrap();
        log.append_heartbeat(T + 10, &Mac::ZERO, 1).unwrap();

        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("01:02:03:04:05:06"));
        assert!(lines[1].ends_with("[HEARTBEAT]"));
    }

    #[test]
    fn battery_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = BatteryLog::new(dir.path().join("battery.csv"));
        log.append(T, 4100, 35).unwrap();
        log.append(T + 10, 4098, -4).unwrap();

        let text = std::fs::read_to_string(dir.path().join("battery.csv")).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains(", 4100, 35"));
    }
}
