//! Async UDP endpoints driving the protocol engines.
//!
//! [`SenderEndpoint`] and [`ReceiverEndpoint`] own a [`FrameSocket`] each
//! and pump it into a [`Sender`] or [`Receiver`].  The engines never touch
//! the network themselves: each event is run against a [`FrameSink`] that
//! records the outbound frames and timer changes, which the endpoint then
//! applies to the socket and its deadline.
//!
//! There is no connection setup: the sender starts transmitting at sequence
//! number 0 and the receiver expects exactly that, so both sides agree from
//! the first frame.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::channel::{ReceiverChannel, SenderChannel};
use crate::frame::FrameBytes;
use crate::receiver::{ReceiveError, Receiver};
use crate::sender::Sender;
use crate::socket::FrameSocket;

/// Consecutive timeouts without progress before the peer is declared gone.
const MAX_RETRIES: u32 = 6;

/// A deadline far enough away that a disarmed timer never fires.
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(365 * 24 * 3600)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures surfaced by the endpoints.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),

    /// The full window was retransmitted [`MAX_RETRIES`] times in a row
    /// without a single frame being acknowledged.
    #[error("peer unresponsive after {} retransmissions", MAX_RETRIES)]
    TooManyRetries,

    #[error("receive failed: {0}")]
    Receive(#[from] ReceiveError),
}

// ---------------------------------------------------------------------------
// FrameSink
// ---------------------------------------------------------------------------

/// Pending timer change recorded by an engine event.
#[derive(Debug, Clone, Copy)]
enum TimerOp {
    Start(Duration),
    Stop,
}

/// Channel implementation that records engine output for later application.
///
/// Engines may start and stop the timer several times within one event;
/// only the final operation matters, so the sink keeps just the last one.
#[derive(Default)]
struct FrameSink {
    outgoing: Vec<FrameBytes>,
    timer_op: Option<TimerOp>,
    delivered: Vec<Vec<u8>>,
}

impl SenderChannel for FrameSink {
    fn send_frame(&mut self, frame: &FrameBytes) {
        self.outgoing.push(*frame);
    }
    fn start_timer(&mut self, timeout: Duration) {
        self.timer_op = Some(TimerOp::Start(timeout));
    }
    fn stop_timer(&mut self) {
        self.timer_op = Some(TimerOp::Stop);
    }
}

impl ReceiverChannel for FrameSink {
    fn send_frame(&mut self, frame: &FrameBytes) {
        self.outgoing.push(*frame);
    }
    fn deliver_message(&mut self, message: Vec<u8>) {
        self.delivered.push(message);
    }
}

// ---------------------------------------------------------------------------
// SenderEndpoint
// ---------------------------------------------------------------------------

/// What the event loop observed in one pass.
enum Step {
    Frame(FrameBytes),
    Timeout,
}

/// Sending half of a stream, bound to one peer address.
pub struct SenderEndpoint {
    socket: FrameSocket,
    peer: SocketAddr,
    engine: Sender,
    /// Armed retransmission deadline, `None` while the window is empty.
    deadline: Option<Instant>,
    /// Timeouts fired since the last acknowledged frame.
    retries: u32,
}

impl SenderEndpoint {
    /// Bind a local socket and aim the stream at `peer`.
    ///
    /// No handshake takes place: the first data frame (sequence 0) is the
    /// first thing on the wire.
    pub async fn connect(local: SocketAddr, peer: SocketAddr) -> Result<Self, TransportError> {
        let socket = FrameSocket::bind(local).await?;
        log::info!("[endpoint] sending {} → {}", socket.local_addr(), peer);
        Ok(Self {
            socket,
            peer,
            engine: Sender::new(),
            deadline: None,
            retries: 0,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    /// Number of frames awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.engine.in_flight()
    }

    /// Submit a message and pump the event loop until every frame of it has
    /// at least entered the send window.
    pub async fn send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        let mut sink = FrameSink::default();
        self.engine.submit(message, &mut sink);
        self.apply(sink).await?;

        while self.engine.staged() > 0 {
            self.step().await?;
        }
        Ok(())
    }

    /// Pump the event loop until every submitted frame is acknowledged.
    pub async fn flush(&mut self) -> Result<(), TransportError> {
        while !self.engine.is_idle() {
            self.step().await?;
        }
        Ok(())
    }

    /// Wait for the next event (inbound frame or timeout) and feed it to
    /// the engine.
    async fn step(&mut self) -> Result<(), TransportError> {
        let armed = self.deadline.is_some();
        let deadline = self.deadline.unwrap_or_else(far_future);

        let step = tokio::select! {
            recv = self.socket.recv_frame() => {
                let (bytes, addr) = recv?;
                if addr != self.peer {
                    log::debug!("[endpoint] ignoring frame from {addr}");
                    return Ok(());
                }
                Step::Frame(bytes)
            }
            _ = tokio::time::sleep_until(deadline), if armed => Step::Timeout,
        };

        match step {
            Step::Frame(bytes) => {
                let mut sink = FrameSink::default();
                let retired = self.engine.on_frame(&bytes, &mut sink);
                if retired > 0 {
                    self.retries = 0;
                }
                self.apply(sink).await?;
            }
            Step::Timeout => {
                self.retries += 1;
                if self.retries > MAX_RETRIES {
                    log::warn!("[endpoint] no ACKs after {MAX_RETRIES} retransmissions; giving up");
                    return Err(TransportError::TooManyRetries);
                }
                let mut sink = FrameSink::default();
                self.engine.on_timeout(&mut sink);
                self.apply(sink).await?;
            }
        }
        Ok(())
    }

    /// Put recorded engine output on the wire and update the deadline.
    async fn apply(&mut self, sink: FrameSink) -> io::Result<()> {
        for frame in &sink.outgoing {
            self.socket.send_frame(frame, self.peer).await?;
        }
        match sink.timer_op {
            Some(TimerOp::Start(timeout)) => {
                self.deadline = Some(Instant::now() + timeout);
            }
            Some(TimerOp::Stop) => {
                self.deadline = None;
            }
            None => {}
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ReceiverEndpoint
// ---------------------------------------------------------------------------

/// Receiving half of a stream.
///
/// Locks onto the first peer that sends a valid-size frame and ignores the
/// rest; each socket serves a single stream.
pub struct ReceiverEndpoint {
    socket: FrameSocket,
    engine: Receiver,
    peer: Option<SocketAddr>,
    /// Messages completed while waiting for an earlier `recv` call.
    inbox: VecDeque<Vec<u8>>,
}

impl ReceiverEndpoint {
    pub async fn bind(local: SocketAddr) -> Result<Self, TransportError> {
        let socket = FrameSocket::bind(local).await?;
        log::info!("[endpoint] receiving on {}", socket.local_addr());
        Ok(Self {
            socket,
            engine: Receiver::new(),
            peer: None,
            inbox: VecDeque::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    /// Wait for the next complete message.
    pub async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            if let Some(message) = self.inbox.pop_front() {
                return Ok(message);
            }

            let (bytes, addr) = self.socket.recv_frame().await?;
            match self.peer {
                None => {
                    log::info!("[endpoint] stream from {addr}");
                    self.peer = Some(addr);
                }
                Some(peer) if peer != addr => {
                    log::debug!("[endpoint] ignoring frame from {addr}");
                    continue;
                }
                Some(_) => {}
            }

            let mut sink = FrameSink::default();
            self.engine.on_frame(&bytes, &mut sink)?;
            for frame in &sink.outgoing {
                self.socket.send_frame(frame, addr).await?;
            }
            self.inbox.extend(sink.delivered);
        }
    }
}
