//! Receive-side protocol engine with out-of-order buffering.
//!
//! [`Receiver`] accepts data frames in any order, acknowledges
//! cumulatively, and reassembles the original messages before delivery.
//!
//! # Protocol contract
//!
//! - Frames with the expected sequence number are consumed immediately;
//!   frames up to `WINDOW_SIZE - 1` ahead are parked in reorder slots and
//!   consumed once the gap closes.
//! - Every acknowledgement is cumulative: `ack = K` means everything with
//!   sequence ≤ `K` was received.  Duplicates and frames outside the reorder
//!   range re-announce the latest ACK so a sender whose ACKs were lost can
//!   advance.
//! - No ACK is ever sent before the first in-order frame has been consumed;
//!   there is nothing to acknowledge yet.
//! - Corrupt frames are dropped without any response.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility, reached through [`ReceiverChannel`].

use std::collections::TryReserveError;
use std::collections::VecDeque;

use thiserror::Error;

use crate::channel::ReceiverChannel;
use crate::frame::{self, DataFrame, FrameBytes};
use crate::WINDOW_SIZE;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Hard failures while processing an inbound frame.
///
/// Recoverable conditions (corruption, duplicates, out-of-range sequence
/// numbers) are handled internally and never surface here.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// The reassembly buffer for an announced message length could not be
    /// allocated.  The stream is not safely resumable after this.
    #[error("cannot allocate {target} byte reassembly buffer")]
    ReassemblyAlloc {
        target: usize,
        source: TryReserveError,
    },
}

// ---------------------------------------------------------------------------
// Reassembly
// ---------------------------------------------------------------------------

/// Message reassembly progress.
///
/// `AwaitingFirst` means the next consumed frame starts a new message and
/// must carry the total-length field.  Short messages (including empty
/// ones) complete within that first frame and never enter `Building`.
#[derive(Debug)]
enum Reassembly {
    AwaitingFirst,
    Building { buffer: Vec<u8>, target: usize },
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// Go-back-N receive-side state for one stream.
///
/// # Reorder slots
///
/// `slots[i]` parks the frame with sequence `seq_expected + 1 + i`; slot 0
/// is the frame just after the one being waited for.  The highest usable
/// offset is `WINDOW_SIZE - 2`, matching the sender's window: the expected
/// frame itself is never parked, so at most `WINDOW_SIZE - 1` successors
/// can be outstanding.
#[derive(Debug)]
pub struct Receiver {
    /// Sequence number of the next frame to consume.
    seq_expected: u32,

    /// Parked out-of-order frames, indexed by distance from `seq_expected`.
    slots: VecDeque<Option<DataFrame>>,

    reassembly: Reassembly,

    /// Highest cumulative ACK announced so far; `None` until the first
    /// in-order frame is consumed.
    last_ack: Option<u32>,
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Receiver {
    pub fn new() -> Self {
        Self::with_initial_seq(0)
    }

    /// Create a [`Receiver`] expecting an arbitrary first sequence number.
    pub fn with_initial_seq(seq_start: u32) -> Self {
        Self {
            seq_expected: seq_start,
            slots: vec![None; WINDOW_SIZE].into(),
            reassembly: Reassembly::AwaitingFirst,
            last_ack: None,
        }
    }

    /// Sequence number of the next frame to consume.
    pub fn seq_expected(&self) -> u32 {
        self.seq_expected
    }

    /// Latest cumulative ACK sent, if any.
    pub fn last_ack(&self) -> Option<u32> {
        self.last_ack
    }

    // -----------------------------------------------------------------------
    // Inbound events
    // -----------------------------------------------------------------------

    /// Process a frame arriving from the channel.
    ///
    /// In-order frames are consumed along with any parked successors, then
    /// acknowledged cumulatively.  Out-of-order frames within the reorder
    /// range are parked; everything else (duplicates, far-future sequence
    /// numbers) re-announces the latest ACK.  Corrupt frames are dropped
    /// silently.  Completed messages are handed to
    /// [`ReceiverChannel::deliver_message`].
    pub fn on_frame(
        &mut self,
        bytes: &FrameBytes,
        ch: &mut impl ReceiverChannel,
    ) -> Result<(), ReceiveError> {
        let data = match DataFrame::parse(bytes) {
            Ok(data) => data,
            Err(err) => {
                log::debug!("[receiver] dropped frame: {err}");
                return Ok(());
            }
        };

        let seq = data.seq();
        let distance = seq.wrapping_sub(self.seq_expected);

        if distance == 0 {
            self.consume(&data, ch)?;
            self.seq_expected = self.seq_expected.wrapping_add(1);
            self.drain_buffered(ch)?;

            let ack = self.seq_expected.wrapping_sub(1);
            self.last_ack = Some(ack);
            ch.send_frame(&frame::encode_ack(ack));
            log::debug!(
                "[receiver] ← DATA seq={}; → ACK ack={} (expecting seq={})",
                seq,
                ack,
                self.seq_expected
            );
        } else if (distance as usize) < WINDOW_SIZE {
            // Within the sender's window but ahead of the gap: park it.
            self.slots[distance as usize - 1] = Some(data);
            log::debug!(
                "[receiver] ← DATA seq={} parked at offset {} (expecting seq={})",
                seq,
                distance - 1,
                self.seq_expected
            );
            self.send_last_ack(ch);
        } else {
            // Duplicate of something already consumed, or too far ahead to
            // park.  Either way the latest ACK tells the sender where we are.
            log::debug!(
                "[receiver] ← DATA seq={} out of range (expecting seq={})",
                seq,
                self.seq_expected
            );
            self.send_last_ack(ch);
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn send_last_ack(&self, ch: &mut impl ReceiverChannel) {
        if let Some(ack) = self.last_ack {
            ch.send_frame(&frame::encode_ack(ack));
        }
    }

    /// Consume parked frames made contiguous by an in-order arrival.
    ///
    /// Slot 0 always holds the candidate for the current `seq_expected`;
    /// popping the front and pushing a fresh `None` keeps every remaining
    /// slot aligned with its sequence number as the window slides.
    fn drain_buffered(&mut self, ch: &mut impl ReceiverChannel) -> Result<(), ReceiveError> {
        loop {
            let slot = self.slots.pop_front().flatten();
            self.slots.push_back(None);
            match slot {
                Some(data) => {
                    self.consume(&data, ch)?;
                    self.seq_expected = self.seq_expected.wrapping_add(1);
                }
                None => return Ok(()),
            }
        }
    }

    /// Feed one in-order frame into reassembly, delivering on completion.
    fn consume(
        &mut self,
        data: &DataFrame,
        ch: &mut impl ReceiverChannel,
    ) -> Result<(), ReceiveError> {
        match &mut self.reassembly {
            Reassembly::AwaitingFirst => {
                let target = data.total_len() as usize;
                let mut buffer = Vec::new();
                buffer
                    .try_reserve_exact(target)
                    .map_err(|source| ReceiveError::ReassemblyAlloc { target, source })?;

                let payload = data.first_payload();
                let take = payload.len().min(target);
                buffer.extend_from_slice(&payload[..take]);

                if buffer.len() == target {
                    log::debug!("[receiver] delivering {} byte message", target);
                    ch.deliver_message(buffer);
                } else {
                    self.reassembly = Reassembly::Building { buffer, target };
                }
            }
            Reassembly::Building { buffer, target } => {
                let payload = data.payload();
                // A continuation never carries more than the message still
                // needs; clamp in case a corrupted length survived checksum.
                let take = payload.len().min(*target - buffer.len());
                buffer.extend_from_slice(&payload[..take]);

                if buffer.len() == *target {
                    let message = std::mem::take(buffer);
                    log::debug!("[receiver] delivering {} byte message", message.len());
                    self.reassembly = Reassembly::AwaitingFirst;
                    ch.deliver_message(message);
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FIRST_MAX_PAYLOAD, MAX_PAYLOAD};

    /// Records outbound ACKs and delivered messages.
    #[derive(Default)]
    struct Recorder {
        acks: Vec<u32>,
        delivered: Vec<Vec<u8>>,
    }

    impl ReceiverChannel for Recorder {
        fn send_frame(&mut self, frame: &FrameBytes) {
            self.acks.push(frame::parse_ack(frame).unwrap());
        }
        fn deliver_message(&mut self, message: Vec<u8>) {
            self.delivered.push(message);
        }
    }

    /// Segment a message exactly the way the sender does.
    fn segment(seq_start: u32, message: &[u8]) -> Vec<FrameBytes> {
        let first_len = message.len().min(FIRST_MAX_PAYLOAD);
        let (first, rest) = message.split_at(first_len);
        let mut frames = vec![frame::encode_first(seq_start, message.len() as u32, first)];
        for (i, chunk) in rest.chunks(MAX_PAYLOAD).enumerate() {
            frames.push(frame::encode_data(seq_start.wrapping_add(1 + i as u32), chunk));
        }
        frames
    }

    #[test]
    fn in_order_single_frame_message() {
        let mut r = Receiver::new();
        let mut ch = Recorder::default();

        r.on_frame(&frame::encode_first(0, 5, b"hello"), &mut ch).unwrap();

        assert_eq!(ch.delivered, vec![b"hello".to_vec()]);
        assert_eq!(ch.acks, vec![0]);
        assert_eq!(r.seq_expected(), 1);
        assert_eq!(r.last_ack(), Some(0));
    }

    #[test]
    fn multi_frame_message_reassembles() {
        let len = FIRST_MAX_PAYLOAD + 2 * MAX_PAYLOAD + 1;
        let message: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut r = Receiver::new();
        let mut ch = Recorder::default();

        for f in segment(0, &message) {
            r.on_frame(&f, &mut ch).unwrap();
        }

        assert_eq!(ch.acks, vec![0, 1, 2, 3]);
        assert_eq!(ch.delivered, vec![message]);
        assert_eq!(r.seq_expected(), 4);
    }

    #[test]
    fn out_of_order_frames_park_then_drain() {
        let len = FIRST_MAX_PAYLOAD + 2 * MAX_PAYLOAD;
        let message: Vec<u8> = (0..len).map(|i| (i % 13) as u8).collect();
        let frames = segment(0, &message);
        let mut r = Receiver::new();
        let mut ch = Recorder::default();

        // Arrival order 0, 2, 1: frame 2 parks, frame 1 closes the gap and
        // the drain consumes both.
        r.on_frame(&frames[0], &mut ch).unwrap();
        r.on_frame(&frames[2], &mut ch).unwrap();
        assert!(ch.delivered.is_empty());
        r.on_frame(&frames[1], &mut ch).unwrap();

        assert_eq!(ch.acks, vec![0, 0, 2]);
        assert_eq!(ch.delivered, vec![message]);
        assert_eq!(r.seq_expected(), 3);
    }

    #[test]
    fn deep_reorder_drains_in_one_pass() {
        let len = FIRST_MAX_PAYLOAD + 3 * MAX_PAYLOAD;
        let message: Vec<u8> = (0..len).map(|i| (i % 17) as u8).collect();
        let frames = segment(0, &message);
        let mut r = Receiver::new();
        let mut ch = Recorder::default();

        for i in [0usize, 3, 2, 1] {
            r.on_frame(&frames[i], &mut ch).unwrap();
        }

        assert_eq!(ch.acks, vec![0, 0, 0, 3]);
        assert_eq!(ch.delivered, vec![message]);
        assert_eq!(r.seq_expected(), 4);
    }

    #[test]
    fn duplicate_frame_reannounces_ack_without_redelivery() {
        let mut r = Receiver::new();
        let mut ch = Recorder::default();
        let f = frame::encode_first(0, 2, b"ok");

        r.on_frame(&f, &mut ch).unwrap();
        r.on_frame(&f, &mut ch).unwrap();

        assert_eq!(ch.delivered.len(), 1);
        assert_eq!(ch.acks, vec![0, 0]);
        assert_eq!(r.seq_expected(), 1);
    }

    #[test]
    fn corrupt_frame_dropped_silently() {
        let mut r = Receiver::new();
        let mut ch = Recorder::default();

        let mut f = frame::encode_first(0, 2, b"ok");
        f[20] ^= 0x01;
        r.on_frame(&f, &mut ch).unwrap();

        assert!(ch.acks.is_empty());
        assert!(ch.delivered.is_empty());
        assert_eq!(r.seq_expected(), 0);
    }

    #[test]
    fn far_future_frame_not_parked() {
        let mut r = Receiver::new();
        let mut ch = Recorder::default();
        r.on_frame(&frame::encode_first(0, 1, b"a"), &mut ch).unwrap();

        // WINDOW_SIZE ahead of seq_expected: outside the reorder range.
        let far = frame::encode_data(1 + WINDOW_SIZE as u32, b"x");
        r.on_frame(&far, &mut ch).unwrap();

        assert_eq!(ch.acks, vec![0, 0]);
        assert_eq!(r.seq_expected(), 1);
    }

    #[test]
    fn no_ack_before_first_consume() {
        let mut r = Receiver::new();
        let mut ch = Recorder::default();

        // An out-of-order park and a far-future frame, both before anything
        // was consumed: nothing to acknowledge yet.
        r.on_frame(&frame::encode_data(2, b"x"), &mut ch).unwrap();
        r.on_frame(&frame::encode_data(500, b"y"), &mut ch).unwrap();

        assert!(ch.acks.is_empty());
        assert!(ch.delivered.is_empty());
        assert_eq!(r.last_ack(), None);
    }

    #[test]
    fn empty_message_delivers_immediately() {
        let mut r = Receiver::new();
        let mut ch = Recorder::default();

        r.on_frame(&frame::encode_first(0, 0, b""), &mut ch).unwrap();

        assert_eq!(ch.delivered, vec![Vec::<u8>::new()]);
        assert_eq!(ch.acks, vec![0]);
    }

    #[test]
    fn back_to_back_messages() {
        let mut r = Receiver::new();
        let mut ch = Recorder::default();

        r.on_frame(&frame::encode_first(0, 3, b"one"), &mut ch).unwrap();
        r.on_frame(&frame::encode_first(1, 3, b"two"), &mut ch).unwrap();

        assert_eq!(ch.delivered, vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(ch.acks, vec![0, 1]);
    }

    #[test]
    fn message_boundary_survives_reorder() {
        // Second message's first frame arrives before the tail of the
        // first message.
        let first_msg: Vec<u8> = vec![7u8; FIRST_MAX_PAYLOAD + 4];
        let mut frames = segment(0, &first_msg);
        frames.extend(segment(2, b"next"));
        let mut r = Receiver::new();
        let mut ch = Recorder::default();

        for i in [0usize, 2, 1] {
            r.on_frame(&frames[i], &mut ch).unwrap();
        }

        assert_eq!(ch.delivered, vec![first_msg, b"next".to_vec()]);
        assert_eq!(r.seq_expected(), 3);
    }

    #[test]
    fn overlong_continuation_clamped_to_message_end() {
        // total says 116 bytes: 114 in the first frame, 2 remaining.  A
        // continuation carrying 10 bytes must contribute only those 2.
        let mut r = Receiver::new();
        let mut ch = Recorder::default();

        r.on_frame(
            &frame::encode_first(0, 116, &[1u8; FIRST_MAX_PAYLOAD]),
            &mut ch,
        )
        .unwrap();
        r.on_frame(&frame::encode_data(1, &[2u8; 10]), &mut ch).unwrap();

        assert_eq!(ch.delivered.len(), 1);
        assert_eq!(ch.delivered[0].len(), 116);
        assert_eq!(&ch.delivered[0][114..], &[2u8, 2u8]);
    }

    #[test]
    fn sequence_wraparound() {
        let mut r = Receiver::with_initial_seq(u32::MAX);
        let mut ch = Recorder::default();

        r.on_frame(&frame::encode_first(u32::MAX, 1, b"a"), &mut ch).unwrap();
        r.on_frame(&frame::encode_first(0, 1, b"b"), &mut ch).unwrap();

        assert_eq!(ch.acks, vec![u32::MAX, 0]);
        assert_eq!(ch.delivered, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(r.seq_expected(), 1);
    }

    #[test]
    fn park_across_wraparound() {
        let mut r = Receiver::with_initial_seq(u32::MAX);
        let mut ch = Recorder::default();

        // seq 0 is one ahead of expected u32::MAX: parks at offset 0.
        r.on_frame(&frame::encode_first(0, 1, b"b"), &mut ch).unwrap();
        assert!(ch.delivered.is_empty());
        r.on_frame(&frame::encode_first(u32::MAX, 1, b"a"), &mut ch).unwrap();

        assert_eq!(ch.delivered, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(ch.acks, vec![0]);
    }
}
