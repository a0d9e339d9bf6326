//! Blocking UDP driver for a [`QuicEndpoint`].
//!
//! Owns a `std::net::UdpSocket` and shuttles datagrams in both directions.
//! [`UdpDriver::poll`] blocks for at most the caller's budget or until the
//! endpoint's next timer, whichever comes first, which lets an event loop
//! interleave QUIC progress with its own task queue on one thread.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::endpoint::QuicEndpoint;

/// `set_read_timeout` rejects a zero duration.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Datagrams drained per `poll` after the first one arrives.
const MAX_BURST: usize = 64;

pub struct UdpDriver {
    socket: UdpSocket,
    local_addr: SocketAddr,
    recv_buf: Vec<u8>,
}

impl UdpDriver {
    /// Bind an ephemeral socket of the same address family as `peer`.
    pub fn bind_for(peer: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        Self::bind(local)
    }

    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        let local_addr = socket.local_addr()?;
        Ok(Self {
            socket,
            local_addr,
            recv_buf: vec![0u8; 65536],
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Flush scheduled frames and send every queued packet.
    ///
    /// Returns the number of datagrams handed to the kernel. A full socket
    /// buffer drops the remainder; QUIC loss recovery resends it.
    pub fn flush(&self, quic: &mut QuicEndpoint) -> io::Result<usize> {
        quic.flush(Instant::now());
        let mut sent = 0;
        while let Some((destination, data)) = quic.poll_send() {
            match self.socket.send_to(&data, destination) {
                Ok(_) => sent += 1,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    trace!(%destination, "socket buffer full, dropping datagram");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sent)
    }

    /// Wait for incoming datagrams and feed them to the endpoint, then fire
    /// expired timers.
    ///
    /// Blocks for at most `max_wait`, less if a QUIC timer is due sooner.
    /// Returns the number of datagrams received.
    pub fn poll(&mut self, quic: &mut QuicEndpoint, max_wait: Duration) -> io::Result<usize> {
        let now = Instant::now();
        let wait = quic
            .next_timeout()
            .map(|deadline| deadline.saturating_duration_since(now).min(max_wait))
            .unwrap_or(max_wait)
            .max(MIN_WAIT);
        self.socket.set_read_timeout(Some(wait))?;

        let mut received = 0;
        if self.recv_one(quic)? {
            received += 1;
            self.socket.set_nonblocking(true)?;
            let burst = self.drain_burst(quic);
            self.socket.set_nonblocking(false)?;
            received += burst?;
        }

        quic.drive_timers(Instant::now());
        Ok(received)
    }

    fn drain_burst(&mut self, quic: &mut QuicEndpoint) -> io::Result<usize> {
        let mut received = 0;
        while received < MAX_BURST && self.recv_one(quic)? {
            received += 1;
        }
        Ok(received)
    }

    /// Receive a single datagram. `Ok(false)` when nothing arrived in time.
    fn recv_one(&mut self, quic: &mut QuicEndpoint) -> io::Result<bool> {
        match self.socket.recv_from(&mut self.recv_buf) {
            Ok((n, peer)) => {
                quic.handle_datagram(Instant::now(), &self.recv_buf[..n], peer);
                Ok(true)
            }
            Err(e) => match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Ok(false),
                // ICMP unreachable from an earlier send; QUIC's own timers
                // decide when the path is dead.
                io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => Ok(false),
                _ => Err(e),
            },
        }
    }
}
