//! The datagram channel the protocol runs over.
//!
//! [`Channel`] is the only I/O seam of the crate: the role loops never see
//! sockets, only whole datagrams.  A channel is owned exclusively by one
//! role for the duration of a transfer, hence `&mut self` everywhere.
//!
//! - [`crate::socket::Socket`]: a connected tokio `UdpSocket`.
//! - [`MemoryChannel`]: an in-process pair, used by tests and demos.
//! - [`crate::simulator::Simulator`]: wraps either to inject loss.

use std::future::Future;
use std::io;

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

/// A bidirectional, unreliable, message-oriented link to exactly one peer.
pub trait Channel {
    /// Send one datagram.  Delivery is not guaranteed.
    fn send(&mut self, datagram: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Wait for the next datagram, truncated to `max_len` bytes.
    ///
    /// Callers bound the wait with `tokio::time::timeout`.
    fn recv(&mut self, max_len: usize) -> impl Future<Output = io::Result<Vec<u8>>> + Send;

    /// Non-blocking receive: `Ok(None)` when nothing is queued, `Err` when
    /// the peer is gone or the link failed.
    fn try_recv(&mut self, max_len: usize) -> io::Result<Option<Vec<u8>>>;
}

/// One end of an in-process datagram link.
///
/// Datagrams are never lost or reordered; wrap an end in a
/// [`crate::simulator::Simulator`] to get a lossy link.
#[derive(Debug)]
pub struct MemoryChannel {
    tx: UnboundedSender<Vec<u8>>,
    rx: UnboundedReceiver<Vec<u8>>,
}

impl MemoryChannel {
    /// Create two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }
}

fn truncate(mut datagram: Vec<u8>, max_len: usize) -> Vec<u8> {
    datagram.truncate(max_len);
    datagram
}

impl Channel for MemoryChannel {
    async fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.tx
            .send(datagram.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer end dropped"))
    }

    async fn recv(&mut self, max_len: usize) -> io::Result<Vec<u8>> {
        match self.rx.recv().await {
            Some(datagram) => Ok(truncate(datagram, max_len)),
            None => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "peer end dropped",
            )),
        }
    }

    fn try_recv(&mut self, max_len: usize) -> io::Result<Option<Vec<u8>>> {
        match self.rx.try_recv() {
            Ok(datagram) => Ok(Some(truncate(datagram, max_len))),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "peer end dropped",
            )),
        }
    }
}
