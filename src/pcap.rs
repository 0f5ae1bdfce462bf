//! Classic pcap output and the capture-sink seam the worker writes to.
//!
//! The file format is the original libpcap container: one global header,
//! then a 16-byte record header plus raw bytes per frame. Linktype 105
//! (IEEE 802.11 without radio metadata) so the files open directly in
//! standard analyzers.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::storage;

/// LINKTYPE_IEEE802_11: 802.11 frames with no prefixed pseudo-header.
pub const LINKTYPE_IEEE802_11: u32 = 105;

/// Per-record capture limit advertised in the global header.
pub const SNAPLEN: u32 = 65535;

const MAGIC_MICROS: u32 = 0xA1B2_C3D4;
const VERSION_MAJOR: u16 = 2;
const VERSION_MINOR: u16 = 4;

/// Destination for captured frames during one session.
///
/// `begin` is called exactly once by `start()` before any frame,
/// `finish` once by `stop()` after the last. Append failures are
/// recoverable: the worker logs them and keeps processing.
pub trait CaptureSink {
    fn begin(&mut self) -> io::Result<()>;
    fn append(&mut self, payload: &[u8], seconds: u64, microseconds: u32) -> io::Result<()>;
    fn finish(&mut self) -> io::Result<()>;
}

/// Low-level pcap stream writer. Writes the global header on
/// construction, records on demand.
pub struct PcapWriter<W: Write> {
    out: W,
}

impl<W: Write> PcapWriter<W> {
    pub fn new(mut out: W) -> io::Result<Self> {
        out.write_all(&MAGIC_MICROS.to_le_bytes())?;
        out.write_all(&VERSION_MAJOR.to_le_bytes())?;
        out.write_all(&VERSION_MINOR.to_le_bytes())?;
        out.write_all(&0i32.to_le_bytes())?; // thiszone
        out.write_all(&0u32.to_le_bytes())?; // sigfigs
        out.write_all(&SNAPLEN.to_le_bytes())?;
        out.write_all(&LINKTYPE_IEEE802_11.to_le_bytes())?;
        Ok(Self { out })
    }

    /// Append one record. Classic pcap carries 32-bit seconds.
    pub fn write_record(
        &mut self,
        payload: &[u8],
        seconds: u64,
        microseconds: u32,
    ) -> io::Result<()> {
        let len = payload.len() as u32;
        self.out.write_all(&(seconds as u32).to_le_bytes())?;
        self.out.write_all(&microseconds.to_le_bytes())?;
        self.out.write_all(&len.to_le_bytes())?; // incl_len
        self.out.write_all(&len.to_le_bytes())?; // orig_len
        self.out.write_all(payload)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Production capture sink: one numbered pcap file on the SD card.
///
/// Construction only picks the path; the file is created by `begin` so
/// a failed `start()` leaves nothing on disk.
pub struct PcapFile {
    path: PathBuf,
    writer: Option<PcapWriter<BufWriter<File>>>,
}

impl PcapFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path, writer: None }
    }

    /// Pick the next unused capture index under `dir`.
    pub fn next_in_dir(dir: &Path) -> io::Result<Self> {
        let index = storage::next_capture_index(dir, storage::MAX_CAPTURE_FILES)?;
        Ok(Self::new(storage::capture_path(dir, index)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CaptureSink for PcapFile {
    fn begin(&mut self) -> io::Result<()> {
        let file = File::create(&self.path)?;
        self.writer = Some(PcapWriter::new(BufWriter::new(file))?);
        log::info!("capture file opened: {}", self.path.display());
        Ok(())
    }

    fn append(&mut self, payload: &[u8], seconds: u64, microseconds: u32) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.write_record(payload, seconds, microseconds),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "capture file not open",
            )),
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            log::info!("capture file closed: {}", self.path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GLOBAL_HEADER_LEN: usize = 24;
    const RECORD_HEADER_LEN: usize = 16;

    #[test]
    fn global_header_layout() {
        let writer = PcapWriter::new(Vec::new()).unwrap();
        let bytes = writer.into_inner();

        assert_eq!(bytes.len(), GLOBAL_HEADER_LEN);
        assert_eq!(&bytes[0..4], &[0xD4, 0xC3, 0xB2, 0xA1], "LE magic");
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 2);
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 4);
        assert_eq!(
            u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
            SNAPLEN
        );
        assert_eq!(
            u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]),
            LINKTYPE_IEEE802_11
        );
    }

    #[test]
    fn record_carries_timestamp_and_lengths() {
        let mut writer = PcapWriter::new(Vec::new()).unwrap();
        let payload = [0x40u8, 0x00, 0xAB, 0xCD];
        writer.write_record(&payload, 1_700_000_123, 456_789).unwrap();
        let bytes = writer.into_inner();

        let rec = &bytes[GLOBAL_HEADER_LEN..];
        assert_eq!(rec.len(), RECORD_HEADER_LEN + payload.len());
        assert_eq!(
            u32::from_le_bytes(rec[0..4].try_into().unwrap()),
            1_700_000_123u32
        );
        assert_eq!(u32::from_le_bytes(rec[4..8].try_into().unwrap()), 456_789);
        assert_eq!(u32::from_le_bytes(rec[8..12].try_into().unwrap()), 4);
        assert_eq!(u32::from_le_bytes(rec[12..16].try_into().unwrap()), 4);
        assert_eq!(&rec[16..], &payload);
    }

    #[test]
    fn records_concatenate_in_order() {
        let mut writer = PcapWriter::new(Vec::new()).unwrap();
        writer.write_record(&[1, 2, 3], 10, 0).unwrap();
        writer.write_record(&[4, 5], 11, 1).unwrap();
        let bytes = writer.into_inner();

        let first = &bytes[GLOBAL_HEADER_LEN..];
        assert_eq!(&first[16..19], &[1, 2, 3]);
        let second = &first[RECORD_HEADER_LEN + 3..];
        assert_eq!(u32::from_le_bytes(second[0..4].try_into().unwrap()), 11);
        assert_eq!(&second[16..18], &[4, 5]);
    }

    #[test]
    fn file_sink_writes_header_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = PcapFile::new(dir.path().join("trace_0.pcap"));

        sink.begin().unwrap();
        sink.append(&[0x40, 0x00], 99, 7).unwrap();
        sink.finish().unwrap();

        let bytes = std::fs::read(dir.path().join("trace_0.pcap")).unwrap();
        assert_eq!(bytes.len(), GLOBAL_HEADER_LEN + RECORD_HEADER_LEN + 2);
        assert_eq!(&bytes[0..4], &[0xD4, 0xC3, 0xB2, 0xA1]);
    }

    #[test]
    fn append_before_begin_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = PcapFile::new(dir.path().join("trace_0.pcap"));
        assert!(sink.append(&[1], 0, 0).is_err());
        assert!(!dir.path().join("trace_0.pcap").exists());
    }

    #[test]
    fn finish_without_begin_is_harmless() {
        let mut sink = PcapFile::new(PathBuf::from("/nonexistent/trace_0.pcap"));
        assert!(sink.finish().is_ok());
    }
}
