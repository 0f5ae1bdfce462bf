//! 802.11 frame classification and the owned frame descriptor.
//!
//! Classification runs on the borrowed driver buffer with zero copies:
//! the ieee80211 crate handles well-formed management frames, and a raw
//! fixed-offset check admits probe requests whose bodies the crate
//! refuses to parse (truncated or junk tagged parameters are common over
//! the air and the capture should keep them).

use core::fmt;

use ieee80211::match_frames;
use ieee80211::mgmt_frame::ProbeRequestFrame;

/// Formatted MAC address, "AA:BB:CC:DD:EE:FF".
pub type MacString = heapless::String<17>;

/// 6-byte hardware address value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Mac(pub [u8; 6]);

impl Mac {
    /// All-zero address, used as the heartbeat sentinel source.
    pub const ZERO: Mac = Mac([0; 6]);

    /// Broadcast address.
    pub const BROADCAST: Mac = Mac([0xFF; 6]);

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Render into a fixed-capacity uppercase hex string.
    pub fn formatted(&self) -> MacString {
        use core::fmt::Write;
        let mut buf = MacString::new();
        let _ = write!(buf, "{self}");
        buf
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// An admitted frame with its capture metadata, owned by whoever holds it.
///
/// Built by the producer, handed through the bounded queue, consumed by
/// the capture worker (or by the drain in `stop()`). Dropping it frees
/// the payload.
#[derive(Debug, Clone)]
pub struct FrameDescriptor {
    /// Full raw frame, headers plus body, as the radio delivered it.
    pub payload: Vec<u8>,
    /// Transmitter address (Address 2 of the management header).
    pub source: Mac,
    /// Received signal strength, dBm.
    pub rssi: i8,
    /// Capture wall-clock time, unix seconds.
    pub seconds: u64,
    /// Sub-second remainder, microseconds.
    pub microseconds: u32,
}

/// Minimum bytes for a raw header check:
/// 2 (frame ctrl) + 2 (duration) + 6 (addr1) + 6 (addr2).
const MIN_HEADER_LEN: usize = 16;

/// Full management header length used for synthetic frames.
const MGMT_HEADER_LEN: usize = 24;

/// Probe request: type 00 (management), subtype 0100, version bits masked.
const FC_PROBE_REQ: u8 = 0x40;

/// Classify a raw frame, returning the transmitter address if it is a
/// probe request.
///
/// Tries the ieee80211 crate first; frames it rejects fall through to a
/// frame-control check at fixed offsets so that malformed-but-admissible
/// probe requests still get captured. Called from the radio driver
/// context; no allocation, no blocking.
pub fn probe_request_source(frame: &[u8]) -> Option<Mac> {
    let parsed = match_frames! {
        frame,
        probe_req = ProbeRequestFrame<'_> => {
            Mac(probe_req.header.transmitter_address.0)
        }
    };

    match parsed {
        Ok(mac) => Some(mac),
        Err(_) => {
            if frame.len() < MIN_HEADER_LEN {
                return None;
            }
            if frame[0] & 0xFC != FC_PROBE_REQ {
                return None;
            }
            let mac: [u8; 6] = frame[10..16].try_into().ok()?;
            Some(Mac(mac))
        }
    }
}

/// Build the minimal synthetic probe request used for heartbeat records:
/// a bare management header, broadcast destination, all-zero source, no
/// body.
pub fn heartbeat_frame() -> [u8; MGMT_HEADER_LEN] {
    let mut hdr = [0u8; MGMT_HEADER_LEN];
    hdr[0] = FC_PROBE_REQ;
    hdr[4..10].copy_from_slice(&Mac::BROADCAST.0); // addr1: destination
    hdr[10..16].copy_from_slice(&Mac::ZERO.0); // addr2: source
    hdr[16..22].copy_from_slice(&Mac::BROADCAST.0); // addr3: BSSID
    hdr
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal valid probe request: management header + empty body.
    fn probe_request_bytes(source: [u8; 6]) -> Vec<u8> {
        let mut frame = vec![0u8; MGMT_HEADER_LEN];
        frame[0] = 0x40;
        frame[4..10].copy_from_slice(&[0xFF; 6]);
        frame[10..16].copy_from_slice(&source);
        frame[16..22].copy_from_slice(&[0xFF; 6]);
        frame
    }

    #[test]
    fn mac_formats_uppercase_colon_separated() {
        let mac = Mac([0xAA, 0xBB, 0xCC, 0x01, 0x02, 0x03]);
        assert_eq!(mac.formatted().as_str(), "AA:BB:CC:01:02:03");
        assert_eq!(mac.to_string(), "AA:BB:CC:01:02:03");
    }

    #[test]
    fn mac_zero_sentinel() {
        assert!(Mac::ZERO.is_zero());
        assert!(!Mac([0, 0, 0, 0, 0, 1]).is_zero());
        assert_eq!(Mac::ZERO.formatted().as_str(), "00:00:00:00:00:00");
    }

    #[test]
    fn classify_admits_probe_request() {
        let frame = probe_request_bytes([0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]);
        let src = probe_request_source(&frame);
        assert_eq!(src, Some(Mac([0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01])));
    }

    #[test]
    fn classify_admits_probe_request_with_ssid_body() {
        // Tagged params: SSID element (id 0) "ab", supported rates (id 1)
        let mut frame = probe_request_bytes([0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);
        frame.extend_from_slice(&[0x00, 0x02, b'a', b'b']);
        frame.extend_from_slice(&[0x01, 0x01, 0x82]);
        let src = probe_request_source(&frame);
        assert_eq!(src, Some(Mac([0x10, 0x20, 0x30, 0x40, 0x50, 0x60])));
    }

    #[test]
    fn classify_rejects_beacon() {
        // Beacon: type 00, subtype 1000 → first byte 0x80
        let mut frame = probe_request_bytes([1, 2, 3, 4, 5, 6]);
        frame[0] = 0x80;
        assert_eq!(probe_request_source(&frame), None);
    }

    #[test]
    fn classify_rejects_data_frame() {
        let mut frame = probe_request_bytes([1, 2, 3, 4, 5, 6]);
        frame[0] = 0x08; // type 10 (data), subtype 0000
        assert_eq!(probe_request_source(&frame), None);
    }

    #[test]
    fn classify_rejects_runt_frame() {
        assert_eq!(probe_request_source(&[0x40, 0x00, 0x00]), None);
    }

    #[test]
    fn truncated_probe_request_admitted_via_raw_fallback() {
        // 16 bytes: enough for addr2, too short for the full header parse
        let frame = probe_request_bytes([9, 8, 7, 6, 5, 4]);
        let src = probe_request_source(&frame[..16]);
        assert_eq!(src, Some(Mac([9, 8, 7, 6, 5, 4])));
    }

    #[test]
    fn heartbeat_frame_is_admissible_probe_request() {
        let frame = heartbeat_frame();
        assert_eq!(frame.len(), 24);
        assert_eq!(probe_request_source(&frame), Some(Mac::ZERO));
    }
}
