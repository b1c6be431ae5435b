//! Async UDP socket channel.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` connected to
//! a single peer.  All protocol logic lives elsewhere; this module owns
//! only byte I/O.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::channel::Channel;

/// A UDP socket bound locally and connected to one peer.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    /// The only address datagrams are exchanged with.
    pub peer_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind to `local_addr` and connect to `peer`.
    ///
    /// Passing `127.0.0.1:0` lets the OS choose an ephemeral port.
    pub async fn connect(local_addr: SocketAddr, peer: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        inner.connect(peer).await?;
        Self::from_connected(inner)
    }

    /// Wrap a socket that is already connected.
    pub fn from_connected(inner: UdpSocket) -> io::Result<Self> {
        Ok(Self {
            local_addr: inner.local_addr()?,
            peer_addr: inner.peer_addr()?,
            inner,
        })
    }
}

impl Channel for Socket {
    async fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.inner.send(datagram).await?;
        Ok(())
    }

    async fn recv(&mut self, max_len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; max_len];
        let n = self.inner.recv(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    fn try_recv(&mut self, max_len: usize) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; max_len];
        match self.inner.try_recv(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Returns true if the error is likely transient (the next attempt may succeed).
///
/// A connected UDP socket reports an ICMP port-unreachable from the peer as
/// `ConnectionRefused` on a later call; for a datagram protocol that is just
/// another lost packet.
pub fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionRefused
    )
}
