//! Fixed-size frame transport over UDP.
//!
//! [`FrameSocket`] pins the channel abstraction to real datagrams: every
//! send is exactly [`FRAME_SIZE`] bytes and anything else on the wire is
//! discarded before it reaches a protocol engine.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::frame::{FrameBytes, FRAME_SIZE};

/// A UDP socket that speaks whole frames only.
#[derive(Debug)]
pub struct FrameSocket {
    local_addr: SocketAddr,
    inner: UdpSocket,
}

impl FrameSocket {
    /// Bind to a local address.  Port 0 picks an ephemeral port; the chosen
    /// address is available through [`local_addr`](Self::local_addr).
    pub async fn bind(local: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send one frame to `dest`.
    pub async fn send_frame(&self, frame: &FrameBytes, dest: SocketAddr) -> io::Result<()> {
        self.inner.send_to(frame, dest).await?;
        Ok(())
    }

    /// Receive the next well-sized frame, discarding datagrams that are not
    /// exactly [`FRAME_SIZE`] bytes.
    pub async fn recv_frame(&self) -> io::Result<(FrameBytes, SocketAddr)> {
        // One spare byte so an oversized datagram is distinguishable from an
        // exact-size one.
        let mut buf = [0u8; FRAME_SIZE + 1];
        loop {
            let (n, addr) = self.inner.recv_from(&mut buf).await?;
            if n != FRAME_SIZE {
                log::debug!("[socket] discarded {n} byte datagram from {addr}");
                continue;
            }
            let mut frame = [0u8; FRAME_SIZE];
            frame.copy_from_slice(&buf[..FRAME_SIZE]);
            return Ok((frame, addr));
        }
    }
}
