//! `arq-stream` — a reliable byte stream over an unreliable fixed-size-frame
//! channel, using Go-Back-N ARQ.
//!
//! # Architecture
//!
//! ```text
//!  application messages                  reassembled messages
//!          │                                      ▲
//!  ┌───────▼────────┐    data frames     ┌────────┴───────┐
//!  │     Sender     │───────────────────▶│    Receiver    │
//!  │ window + timer │                    │ reorder + ACK  │
//!  └───────┬────────┘                    └────────┬───────┘
//!          │           cumulative ACKs            │
//!          │◀─────────────────────────────────────┘
//!          │
//!  ┌───────▼────────────────────────────┐
//!  │  SenderChannel / ReceiverChannel   │  (traits; engines do no I/O)
//!  └───────┬────────────────────────────┘
//!          │ 128-byte frames
//!  ┌───────▼──────┐        ┌─────────────────┐
//!  │ FrameSocket  │   or   │   Simulation    │
//!  │    (UDP)     │        │ (virtual time)  │
//!  └──────────────┘        └─────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`frame`]    — wire format (encode / verify / parse)
//! - [`channel`]  — the traits through which engines reach the outside
//! - [`sender`]   — outbound window state machine
//! - [`receiver`] — inbound reorder-and-reassemble state machine
//! - [`sim`]      — impaired virtual-time channel joining both engines
//! - [`socket`]   — async UDP frame socket
//! - [`endpoint`] — async endpoints pumping sockets into engines

use std::time::Duration;

pub mod channel;
pub mod endpoint;
pub mod frame;
pub mod receiver;
pub mod sender;
pub mod sim;
pub mod socket;

/// Maximum number of unacknowledged frames in flight.
pub const WINDOW_SIZE: usize = 10;

/// Interval after which an unacknowledged window is retransmitted.
pub const RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(300);
