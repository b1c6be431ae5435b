//! Crate-wide error type.
//!
//! Only faults that end a transfer live here.  Loss, reordering,
//! duplication and timeouts are protocol signals handled inside the role
//! loops and never surface as an [`Error`].

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::packet::PacketError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An inbound datagram could not be parsed.
    #[error("malformed packet: {0}")]
    Packet(#[from] PacketError),

    /// The underlying datagram channel failed irrecoverably.
    #[error("channel fault: {0}")]
    Channel(#[from] io::Error),

    /// Writing or flushing the output sink failed.
    #[error("sink write failed: {0}")]
    Sink(#[source] io::Error),

    /// No syn arrived within the connection-establishment timeout.
    #[error("no connection request within {0:?}")]
    ConnectTimeout(Duration),

    /// The configured handshake retry ceiling was reached.
    #[error("handshake unanswered after {attempts} attempts")]
    HandshakeExhausted { attempts: u32 },

    /// The configured retransmission retry ceiling was reached.
    #[error("gave up after {timeouts} consecutive retransmission timeouts")]
    RetransmitExhausted { timeouts: u32 },

    /// The payload does not fit the 32-bit byte-offset space.
    #[error("payload of {0} bytes exceeds the 32-bit sequence space")]
    PayloadTooLarge(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
