//! Capture-file numbering on the SD card.
//!
//! Sessions never overwrite earlier captures: the next file index is
//! found by probing candidate names ascending and taking the first that
//! does not exist yet.

use std::io;
use std::path::{Path, PathBuf};

/// Upper bound on probed indices; past this the card is considered full.
pub const MAX_CAPTURE_FILES: u32 = 65536;

pub fn capture_file_name(index: u32) -> String {
    format!("trace_{index}.pcap")
}

pub fn capture_path(dir: &Path, index: u32) -> PathBuf {
    dir.join(capture_file_name(index))
}

/// First index in `0..max_files` with no file on disk.
pub fn next_capture_index(dir: &Path, max_files: u32) -> io::Result<u32> {
    for index in 0..max_files {
        if !capture_path(dir, index).exists() {
            if index > 0 {
                log::debug!("capture files 0..{index} already present");
            }
            return Ok(index);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::StorageFull,
        "all capture file indices in use",
    ))
}
