//! Go-back-N send-side protocol engine.
//!
//! [`Sender`] segments application messages into fixed-size frames and keeps
//! a sliding window of up to [`WINDOW_SIZE`] frames in flight.
//!
//! # Protocol contract
//!
//! - At most [`WINDOW_SIZE`] frames may be unacknowledged at once; frames
//!   beyond that wait in an unbounded staging queue.
//! - ACKs are **cumulative**: `ack = K` retires every in-flight frame with
//!   sequence number ≤ `K`.
//! - On timeout the entire window is retransmitted, byte-for-byte, in the
//!   original order (go back to N).
//! - Sequence numbers are `u32` and wrap using modular arithmetic; ordering
//!   comparisons treat two values as "close" when their difference is less
//!   than `u32::MAX / 2`, which always holds within a window.
//!
//! This module only manages state; all socket I/O and timekeeping belong to
//! the caller, reached through [`SenderChannel`].

use std::collections::VecDeque;

use crate::channel::SenderChannel;
use crate::frame::{self, FrameBytes, FIRST_MAX_PAYLOAD, MAX_PAYLOAD};
use crate::{RETRANSMIT_TIMEOUT, WINDOW_SIZE};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Returns `true` when sequence number `a` is ≤ `b` in wrap-around space.
#[inline]
fn seq_le(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) <= (u32::MAX / 2)
}

// ---------------------------------------------------------------------------
// FrameEntry
// ---------------------------------------------------------------------------

/// One encoded frame, either staged or occupying a window slot.
#[derive(Debug, Clone)]
struct FrameEntry {
    seq: u32,
    bytes: FrameBytes,
}

/// Whether the retransmission timer is currently armed.
///
/// Tracked explicitly so the start/stop calls are issued exactly where the
/// state changes instead of being inferred from window size at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Idle,
    Active,
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Go-back-N send-side state for one stream.
///
/// # Queue layout
///
/// ```text
///   window (≤ W, in flight)      staging (unbounded, unsent)
///  ┌────┬────┬────┬─────────┐   ┌────┬────┬──────────────────▶
///  │ s  │s+1 │s+2 │   ...   │   │    │    │   ...
///  └────┴────┴────┴─────────┘   └────┴────┴──────────────────▶
///    ▲ oldest unacked             ▲ admitted by drain()
/// ```
#[derive(Debug)]
pub struct Sender {
    /// Sequence number to assign to the next segmented frame.
    next_seq: u32,

    /// Encoded frames not yet admitted to the window.
    staging: VecDeque<FrameEntry>,

    /// In-flight frames ordered by sequence number (front = oldest unacked).
    window: VecDeque<FrameEntry>,

    timer: TimerState,
}

impl Default for Sender {
    fn default() -> Self {
        Self::new()
    }
}

impl Sender {
    /// Create a [`Sender`] whose first frame will carry sequence number 0.
    pub fn new() -> Self {
        Self::with_initial_seq(0)
    }

    /// Create a [`Sender`] starting from an arbitrary sequence number.
    pub fn with_initial_seq(seq_start: u32) -> Self {
        Self {
            next_seq: seq_start,
            staging: VecDeque::new(),
            window: VecDeque::with_capacity(WINDOW_SIZE),
            timer: TimerState::Idle,
        }
    }

    /// Number of frames currently awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.window.len()
    }

    /// Number of frames segmented but not yet admitted to the window.
    pub fn staged(&self) -> usize {
        self.staging.len()
    }

    /// `true` when nothing is in flight and nothing is staged.
    pub fn is_idle(&self) -> bool {
        self.window.is_empty() && self.staging.is_empty()
    }

    /// Sequence number the next submitted frame will receive.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    // -----------------------------------------------------------------------
    // Inbound events
    // -----------------------------------------------------------------------

    /// Accept a message from the application.
    ///
    /// The message is split into frames of at most the payload capacity: the
    /// first frame additionally carries the total message length (and so
    /// holds up to [`FIRST_MAX_PAYLOAD`] bytes), each continuation up to
    /// [`MAX_PAYLOAD`].  An empty message still produces one first frame.
    /// There is no size limit; oversized messages fragment as many times as
    /// needed.  Staged frames are then drained into the window.
    pub fn submit(&mut self, message: &[u8], ch: &mut impl SenderChannel) {
        debug_assert!(message.len() <= u32::MAX as usize);
        let total = message.len() as u32;

        let first_len = message.len().min(FIRST_MAX_PAYLOAD);
        let (first, rest) = message.split_at(first_len);

        let seq = self.assign_seq();
        self.staging.push_back(FrameEntry {
            seq,
            bytes: frame::encode_first(seq, total, first),
        });
        let mut nframes = 1usize;

        for chunk in rest.chunks(MAX_PAYLOAD) {
            let seq = self.assign_seq();
            self.staging.push_back(FrameEntry {
                seq,
                bytes: frame::encode_data(seq, chunk),
            });
            nframes += 1;
        }

        log::debug!(
            "[sender] submit: {} byte message as {} frame(s), first seq={}",
            message.len(),
            nframes,
            self.next_seq.wrapping_sub(nframes as u32)
        );
        self.drain(ch);
    }

    /// Process a frame arriving from the channel (a cumulative ACK).
    ///
    /// Corrupt frames and ACKs outside the in-flight range
    /// `[oldest seq, newest seq]` are discarded.  A valid ACK retires every
    /// window frame with sequence ≤ `ack`, restarts the timer, and drains
    /// staged frames into the freed slots; if the window empties, the timer
    /// stops.  Returns the number of newly retired frames (0 for discarded
    /// or stale ACKs).
    pub fn on_frame(&mut self, bytes: &FrameBytes, ch: &mut impl SenderChannel) -> usize {
        let ack = match frame::parse_ack(bytes) {
            Ok(ack) => ack,
            Err(err) => {
                log::debug!("[sender] dropped control frame: {err}");
                return 0;
            }
        };

        let in_range = match (self.window.front(), self.window.back()) {
            (Some(oldest), Some(newest)) => {
                seq_le(oldest.seq, ack) && seq_le(ack, newest.seq)
            }
            _ => false,
        };
        if !in_range {
            log::debug!("[sender] ignoring stale ack={ack}");
            return 0;
        }

        let mut retired = 0usize;
        while let Some(front) = self.window.front() {
            if seq_le(front.seq, ack) {
                self.window.pop_front();
                retired += 1;
            } else {
                break;
            }
        }
        log::debug!(
            "[sender] ← ACK ack={} (retired {}, {} in flight)",
            ack,
            retired,
            self.window.len()
        );

        self.arm_timer(ch);
        self.drain(ch);
        retired
    }

    /// Process a retransmission timeout.
    ///
    /// Restarts the timer and resends every window frame in original order,
    /// unchanged.  A timeout with an empty window is a no-op.
    pub fn on_timeout(&mut self, ch: &mut impl SenderChannel) {
        if self.window.is_empty() {
            return;
        }

        self.arm_timer(ch);
        log::debug!(
            "[sender] timeout — retransmitting {} frame(s) from seq={}",
            self.window.len(),
            self.window.front().map(|e| e.seq).unwrap_or(0)
        );
        for entry in &self.window {
            ch.send_frame(&entry.bytes);
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn assign_seq(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    /// Admit staged frames while the window has capacity, transmitting each.
    ///
    /// Keeps the timer consistent with the window: armed whenever frames are
    /// in flight, stopped when the window is empty.
    fn drain(&mut self, ch: &mut impl SenderChannel) {
        while self.window.len() < WINDOW_SIZE {
            match self.staging.pop_front() {
                Some(entry) => {
                    ch.send_frame(&entry.bytes);
                    log::debug!(
                        "[sender] → DATA seq={} in_flight={}",
                        entry.seq,
                        self.window.len() + 1
                    );
                    self.window.push_back(entry);
                }
                None => break,
            }
        }

        if self.window.is_empty() {
            self.disarm_timer(ch);
        } else if self.timer == TimerState::Idle {
            self.arm_timer(ch);
        }
    }

    fn arm_timer(&mut self, ch: &mut impl SenderChannel) {
        self.timer = TimerState::Active;
        ch.start_timer(RETRANSMIT_TIMEOUT);
    }

    fn disarm_timer(&mut self, ch: &mut impl SenderChannel) {
        if self.timer == TimerState::Active {
            self.timer = TimerState::Idle;
            ch.stop_timer();
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
