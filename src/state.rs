//! Role finite-state-machine types.
//!
//! The two ends of a transfer run independent state machines; each gets
//! its own enum so neither has to carry the other's states.  Each role
//! object holds its own state; [`crate::connection::Connection`] drives it.
//!
//! ```text
//!  sender:    Handshaking ──response──▶ Transmitting ──all acked──▶ Closed
//!
//!  receiver:  AwaitingSyn ──syn──▶ Receiving ──fin──▶ Draining ──quiet──▶ Closed
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderState {
    /// Syn sent; waiting for the peer's first acknowledgement.
    #[default]
    Handshaking,
    /// Filling the congestion window and processing acknowledgements.
    Transmitting,
    /// Every byte acknowledged.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiverState {
    /// Waiting for the peer's syn.
    #[default]
    AwaitingSyn,
    /// Delivering in-order payload and acknowledging every packet.
    Receiving,
    /// Fin seen; re-acknowledging retransmissions until the link goes quiet.
    Draining,
    /// Transfer finished.
    Closed,
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
