//! Non-blocking UDP socket
//!
//! The socket is created and configured through `socket2`, then driven as a
//! plain `std` UDP socket in non-blocking mode.

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};
use thiserror::Error;
use tracing::trace;

/// Socket errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// UDP socket used by a peer
///
/// Never blocks: sends that would block fail with `WouldBlock` and receives
/// report "nothing pending" as `Ok(None)`.
pub struct NotifySocket {
    inner: UdpSocket,
    ignore_connection_reset: bool,
}

impl NotifySocket {
    /// Create a non-blocking socket bound to the given address
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;

        Ok(NotifySocket {
            inner: socket.into(),
            ignore_connection_reset: false,
        })
    }

    /// Skip `ConnectionReset` errors on receive
    ///
    /// Some platforms surface an ICMP port-unreachable for an earlier send as
    /// a reset error on the next receive. With this set such errors only
    /// discard the offending datagram instead of failing the receive.
    pub fn set_ignore_connection_reset(&mut self, ignore: bool) {
        self.ignore_connection_reset = ignore;
    }

    pub fn ignores_connection_reset(&self) -> bool {
        self.ignore_connection_reset
    }

    /// Set the send buffer size
    pub fn set_send_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        SockRef::from(&self.inner).set_send_buffer_size(size)?;
        Ok(())
    }

    /// Set the receive buffer size
    pub fn set_recv_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        SockRef::from(&self.inner).set_recv_buffer_size(size)?;
        Ok(())
    }

    /// Get the receive buffer size
    pub fn recv_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(SockRef::from(&self.inner).recv_buffer_size()?)
    }

    /// Get the local address this socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.inner.local_addr()?)
    }

    /// Send one datagram to `target`
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        Ok(self.inner.send_to(buf, target)?)
    }

    /// Receive one pending datagram, if any
    ///
    /// Returns `Ok(None)` once the socket has nothing left to read.
    pub fn try_recv_from(
        &self,
        buf: &mut [u8],
    ) -> Result<Option<(usize, SocketAddr)>, SocketError> {
        loop {
            match self.inner.recv_from(buf) {
                Ok((n, addr)) => return Ok(Some((n, addr))),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e)
                    if e.kind() == ErrorKind::ConnectionReset && self.ignore_connection_reset =>
                {
                    trace!("ignoring connection reset on receive");
                    continue;
                }
                Err(e) => return Err(SocketError::Io(e)),
            }
        }
    }
}
