//! Frame admission and the radio-side enqueuer.
//!
//! Runs in the radio driver's context: classify on the borrowed buffer,
//! copy only admitted frames, push with a short bounded wait, and drop
//! rather than block when the worker is behind. No file or display I/O
//! happens on this path.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::SendTimeoutError;

use crate::frame::{probe_request_source, FrameDescriptor, Mac};
use crate::queue::FrameSender;
use crate::session::{unix_now, SessionStats};

/// Admission rules for received frames.
#[derive(Debug, Clone, Default)]
pub struct CaptureFilter {
    /// `None` admits every probe request; `Some` admits only listed
    /// transmitters (an empty list admits none).
    pub allowed_sources: Option<Vec<Mac>>,
}

impl CaptureFilter {
    pub fn new(allowed_sources: Option<Vec<Mac>>) -> Self {
        Self { allowed_sources }
    }

    /// Transmitter address if the frame passes: probe request subtype
    /// plus the optional source allow-list.
    pub fn admit(&self, frame: &[u8]) -> Option<Mac> {
        let source = probe_request_source(frame)?;
        match &self.allowed_sources {
            Some(list) if !list.contains(&source) => None,
            _ => Some(source),
        }
    }
}

/// Receive tap handed to the radio for the lifetime of a session.
///
/// Cheap to clone; the radio driver calls [`FrameRx::frame_received`]
/// for every frame it sees. Once the session's receiver is gone the
/// channel disconnects and late calls become no-ops, so even a radio
/// that keeps the tap past `disable()` cannot grow memory.
#[derive(Clone)]
pub struct FrameRx {
    inner: Arc<Enqueuer>,
}

struct Enqueuer {
    filter: CaptureFilter,
    tx: FrameSender,
    push_timeout: Duration,
    stats: Arc<SessionStats>,
}

impl FrameRx {
    pub(crate) fn new(
        filter: CaptureFilter,
        tx: FrameSender,
        push_timeout: Duration,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            inner: Arc::new(Enqueuer {
                filter,
                tx,
                push_timeout,
                stats,
            }),
        }
    }

    /// Driver entry point. Must return quickly regardless of
    /// backpressure; the only wait is the queue's short push timeout.
    pub fn frame_received(&self, frame: &[u8], rssi: i8) {
        let inner = &self.inner;
        let Some(source) = inner.filter.admit(frame) else {
            return;
        };

        let (seconds, microseconds) = unix_now();
        let descriptor = FrameDescriptor {
            payload: frame.to_vec(),
            source,
            rssi,
            seconds,
            microseconds,
        };

        match inner.tx.send_timeout(descriptor, inner.push_timeout) {
            Ok(()) => {
                inner.stats.note_captured();
            }
            Err(SendTimeoutError::Timeout(_)) => {
                let dropped = inner.stats.note_dropped();
                log::debug!("frame queue full, dropping ({dropped} dropped so far)");
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                // Session is tearing down; nothing to do
            }
        }
    }
}
