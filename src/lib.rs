//! `rudp`, a reliable, ordered byte stream over an unreliable datagram channel.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐  data segments  ┌──────────┐
//!  │  Sender  │────────────────▶│ Receiver │
//!  └────┬─────┘                 └─────┬────┘
//!       │     cumulative ACKs         │
//!       │◀────────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │           Connection              │
//!  │  (handshake, loops, RTO, drain)   │
//!  └────┬──────────────────────────────┘
//!       │ whole datagrams
//!  ┌────▼──────┐      ┌───────────┐
//!  │  Channel  │◀─────│ Simulator │  (optional loss / dup / reorder)
//!  └───────────┘      └───────────┘
//!    Socket | MemoryChannel
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     : wire format (serialise / deserialise)
//! - [`timer`]      : RTT sampling and RTO estimation
//! - [`congestion`] : Reno-style window and threshold
//! - [`sender`]     : send pointer, send-time ledger, loss detection
//! - [`receiver`]   : in-order, exactly-once delivery
//! - [`state`]      : finite-state-machine types
//! - [`connection`] : handshake and the two role loops
//! - [`channel`]    : the datagram seam, plus an in-memory pair
//! - [`socket`]     : connected tokio `UdpSocket` channel
//! - [`simulator`]  : fault-injecting channel wrapper for testing
//! - [`config`]     : every tunable constant
//! - [`error`]      : crate error type
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> rudp::Result<()> {
//! use rudp::{Config, MemoryChannel};
//!
//! let (mut a, mut b) = MemoryChannel::pair();
//! let config = Config::default();
//! let mut out = Vec::new();
//! let (sent, received) = tokio::join!(
//!     rudp::transmit(&mut a, b"hello", &config),
//!     rudp::receive_into(&mut b, &mut out, &config),
//! );
//! sent?;
//! assert_eq!(received?, 5);
//! # Ok(())
//! # }
//! ```

use tokio::io::AsyncWrite;

pub mod channel;
pub mod config;
pub mod congestion;
pub mod connection;
pub mod error;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use channel::{Channel, MemoryChannel};
pub use config::Config;
pub use connection::Connection;
pub use error::{Error, Result};
pub use receiver::ReceiveStats;
pub use sender::SendStats;
pub use simulator::{Simulator, SimulatorConfig};
pub use socket::Socket;

/// Reliably deliver `payload` over `channel`.
///
/// Returns once the peer has acknowledged every byte.
pub async fn transmit<C: Channel>(channel: &mut C, payload: &[u8], config: &Config) -> Result<()> {
    Connection::new(channel, config)?.transmit(payload).await?;
    Ok(())
}

/// Accept one transfer from `channel`, writing it in order to `sink`.
///
/// Returns the number of bytes delivered.
pub async fn receive_into<C, W>(channel: &mut C, sink: &mut W, config: &Config) -> Result<usize>
where
    C: Channel,
    W: AsyncWrite + Unpin,
{
    let stats = Connection::new(channel, config)?.receive_into(sink).await?;
    Ok(stats.delivered as usize)
}
