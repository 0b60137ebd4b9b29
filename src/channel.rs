//! The boundary between the protocol engines and their host environment.
//!
//! The engines in [`crate::sender`] and [`crate::receiver`] are pure state
//! machines: they never touch a socket or a clock.  Everything they need
//! from the outside world goes through these two traits, passed into each
//! operation by the caller (the channel simulator, the async endpoints, or
//! a test harness).
//!
//! # Contract
//!
//! - `send_frame` is best-effort and fire-and-forget.  The channel may lose,
//!   duplicate, reorder, or corrupt the frame; the engines never consume a
//!   return status.
//! - The timer is single-shot per arm and level-triggered: at most one is
//!   armed at a time.  Arming while already armed restarts it; disarming
//!   while disarmed is a no-op.  The host guarantees exactly one timeout
//!   event per `start_timer` unless `stop_timer` cancels it first.
//! - `deliver_message` hands a completed message to the application.  It is
//!   non-blocking and always succeeds.

use std::time::Duration;

use crate::frame::FrameBytes;

/// Outbound calls available to the send-side engine.
pub trait SenderChannel {
    /// Hand a frame to the unreliable channel.
    fn send_frame(&mut self, frame: &FrameBytes);

    /// Arm (or restart) the single retransmission timer.
    fn start_timer(&mut self, timeout: Duration);

    /// Cancel the retransmission timer if armed.
    fn stop_timer(&mut self);
}

/// Outbound calls available to the receive-side engine.
pub trait ReceiverChannel {
    /// Hand a frame (a cumulative ACK) to the unreliable channel.
    fn send_frame(&mut self, frame: &FrameBytes);

    /// Deliver a fully reassembled message to the application.
    fn deliver_message(&mut self, message: Vec<u8>);
}
