//! UDP socket wrapper for UDT
//!
//! Provides the datagram capability the send queue transmits through, and a
//! `socket2`-backed implementation of it.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Socket configuration errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid socket address")]
    InvalidAddress,
}

impl SocketError {
    /// Whether the error only means the operation could not complete now
    pub fn is_would_block(&self) -> bool {
        matches!(
            self,
            SocketError::Io(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
        )
    }
}

/// Unconnected datagram send capability
///
/// Shared (not owned) by a send queue; implementations must tolerate
/// concurrent use from several threads.
pub trait DatagramSocket: Send + Sync {
    /// Send one datagram to `target`, returning the number of bytes written
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError>;
}

/// UDT socket wrapper
///
/// Wraps a UDP socket. Sockets are created in blocking mode.
pub struct UdtSocket {
    inner: Socket,
}

impl UdtSocket {
    /// Create a new UDT socket bound to the given address
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;

        Ok(UdtSocket { inner: socket })
    }

    /// Bound how long a blocking `recv_from` waits
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), SocketError> {
        self.inner.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Set the send buffer size
    pub fn set_send_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        self.inner.set_send_buffer_size(size)?;
        Ok(())
    }

    /// Get the send buffer size
    pub fn send_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(self.inner.send_buffer_size()?)
    }

    /// Get the local address this socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.inner
            .local_addr()?
            .as_socket()
            .ok_or(SocketError::InvalidAddress)
    }

    /// Receive one datagram
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        // SAFETY: `u8` and `MaybeUninit<u8>` share a layout, and `recv_from`
        // only ever writes initialized bytes into the buffer.
        let uninit_buf = unsafe {
            std::slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut MaybeUninit<u8>, buf.len())
        };

        let (n, addr) = self.inner.recv_from(uninit_buf)?;
        Ok((n, addr.as_socket().ok_or(SocketError::InvalidAddress)?))
    }
}

impl DatagramSocket for UdtSocket {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        Ok(self.inner.send_to(buf, &target.into())?)
    }
}
