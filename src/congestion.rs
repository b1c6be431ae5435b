//! Reno-style congestion control, measured in whole segments.
//!
//! | Event                         | Reaction                                        |
//! |-------------------------------|-------------------------------------------------|
//! | ack advances                  | dup count := 0; window doubles below `ssthresh`, |
//! |                               | otherwise grows by one                          |
//! | ack repeats the last offset   | dup count += 1; at the threshold: fast          |
//! |                               | retransmit, `ssthresh := cwnd / 2`, `cwnd := ssthresh` |
//! | retransmission timeout        | dup count := 0, `ssthresh /= 2`, `cwnd := 1`     |
//!
//! Growth happens per acknowledgement, not per round trip.  Neither value
//! ever drops below one segment, so a sender can always make progress.
//!
//! The controller owns the last acknowledged offset because duplicate
//! detection is defined against it; rewinding the send pointer is left to
//! [`crate::sender::Sender`].

use crate::config::Config;

/// What a single acknowledgement meant to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckEvent {
    /// The acknowledged offset moved forward by `newly_acked` bytes.
    Advanced { newly_acked: u32 },
    /// Same offset as before; `count` duplicates in a row so far.
    Duplicate { count: u32 },
    /// The duplicate threshold was reached; resend from the acked offset.
    FastRetransmit,
    /// Offset below the last acknowledgement (reordered ack); ignored.
    Stale,
}

#[derive(Debug, Clone)]
pub struct CongestionController {
    cwnd: u32,
    ssthresh: u32,
    dup_acks: u32,
    dup_threshold: u32,
    acked: u32,
}

impl CongestionController {
    pub fn new(config: &Config) -> Self {
        Self {
            cwnd: config.initial_window.max(1),
            ssthresh: config.initial_ssthresh.max(1),
            dup_acks: 0,
            dup_threshold: config.duplicate_ack_threshold,
            acked: 0,
        }
    }

    /// Classify a cumulative acknowledgement and update the window.
    pub fn on_ack(&mut self, ack: u32) -> AckEvent {
        if ack > self.acked {
            let newly_acked = ack - self.acked;
            self.acked = ack;
            self.dup_acks = 0;
            self.grow();
            AckEvent::Advanced { newly_acked }
        } else if ack == self.acked {
            self.dup_acks += 1;
            if self.dup_acks == self.dup_threshold {
                self.ssthresh = (self.cwnd / 2).max(1);
                self.cwnd = self.ssthresh;
                self.dup_acks = 0;
                AckEvent::FastRetransmit
            } else {
                AckEvent::Duplicate {
                    count: self.dup_acks,
                }
            }
        } else {
            AckEvent::Stale
        }
    }

    /// Collapse the window after a retransmission timeout.
    pub fn on_timeout(&mut self) {
        self.dup_acks = 0;
        self.ssthresh = (self.ssthresh / 2).max(1);
        self.cwnd = 1;
    }

    fn grow(&mut self) {
        if self.cwnd < self.ssthresh {
            self.cwnd = self.cwnd.saturating_mul(2);
        } else {
            self.cwnd = self.cwnd.saturating_add(1);
        }
    }

    /// Congestion window in segments.
    pub fn window(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn duplicate_acks(&self) -> u32 {
        self.dup_acks
    }

    /// Highest offset the peer has confirmed.
    pub fn acked(&self) -> u32 {
        self.acked
    }
}
