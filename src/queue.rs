//! Bounded handoff between the radio context and the capture worker.
//!
//! A fixed-capacity crossbeam channel, single producer and single
//! consumer in practice. The producer pushes with a short bounded wait
//! and drops the frame on overflow (drop-newest; frames already
//! accepted are never evicted); the consumer pops with a timeout so
//! heartbeat and maintenance duties run even when the air is quiet.
//! Dropping the receiver disconnects the channel, which is how `stop()`
//! invalidates late pushes from a misbehaving radio.

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::frame::FrameDescriptor;

pub type FrameSender = Sender<FrameDescriptor>;
pub type FrameReceiver = Receiver<FrameDescriptor>;

/// Capacity absorbing a burst of a few dozen probe requests while the
/// worker is mid-write; beyond that the producer drops.
pub const DEFAULT_CAPACITY: usize = 32;

pub fn frame_queue(capacity: usize) -> (FrameSender, FrameReceiver) {
    bounded(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{RecvTimeoutError, SendTimeoutError};
    use std::time::Duration;

    fn descriptor(tag: u8) -> FrameDescriptor {
        FrameDescriptor {
            payload: vec![tag],
            source: crate::frame::Mac([tag; 6]),
            rssi: -50,
            seconds: 0,
            microseconds: 0,
        }
    }

    #[test]
    fn full_queue_rejects_the_newest_push() {
        let (tx, rx) = frame_queue(2);
        tx.send_timeout(descriptor(1), Duration::from_millis(1))
            .unwrap();
        tx.send_timeout(descriptor(2), Duration::from_millis(1))
            .unwrap();

        let err = tx
            .send_timeout(descriptor(3), Duration::from_millis(1))
            .unwrap_err();
        let SendTimeoutError::Timeout(rejected) = err else {
            panic!("expected timeout, not disconnect");
        };
        assert_eq!(rejected.payload, vec![3], "the incoming frame is the one dropped");

        // Accepted frames still come out in order
        assert_eq!(rx.recv().unwrap().payload, vec![1]);
        assert_eq!(rx.recv().unwrap().payload, vec![2]);
    }

    #[test]
    fn pop_times_out_quietly_when_empty() {
        let (_tx, rx) = frame_queue(4);
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(5)),
            Err(RecvTimeoutError::Timeout)
        ));
    }

    #[test]
    fn dropped_receiver_invalidates_pushes() {
        let (tx, rx) = frame_queue(4);
        drop(rx);
        let err = tx
            .send_timeout(descriptor(9), Duration::from_millis(1))
            .unwrap_err();
        assert!(matches!(err, SendTimeoutError::Disconnected(_)));
    }
}
