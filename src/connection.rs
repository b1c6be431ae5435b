//! Connection state machine: handshake, transfer loops, drain.
//!
//! # Architecture
//!
//! ```text
//!  transmit(payload)                       receive_into(sink)
//!      │                                       │
//!      ▼                                       ▼
//!  Connection ── RtoEstimator ──┐          Connection ── RtoEstimator
//!    └── Sender (window, ledger)│            └── Receiver (delivered offset)
//!           │                   │                   │
//!           ▼                   ▼                   ▼
//!        &mut C: Channel  ◀── datagrams ──▶  &mut C: Channel
//! ```
//!
//! A [`Connection`] borrows the channel for exactly one transfer and is
//! consumed by it.  The loops are single threaded and cooperative; waits
//! are bounded by `tokio::time::timeout`, so nothing blocks past an RTO
//! multiple.
//!
//! # Sender loop
//!
//! Each iteration transmits at most one segment, drains every queued
//! acknowledgement without blocking, then checks the oldest in-flight
//! segment for expiry.  When none of those made progress the loop waits on
//! the channel until the next deadline, capped at `poll_multiplier × RTO`.
//!
//! # Receiver loop
//!
//! Every arrival (or wait expiry) is answered with a fresh cumulative ack.
//! After the fin the receiver lingers, re-acking retransmissions, until the
//! link is quiet for `max(linger_multiplier × RTO, min_linger)`.

use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, timeout_at, Instant};

use crate::channel::Channel;
use crate::config::Config;
use crate::congestion::AckEvent;
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::receiver::{Delivery, ReceiveStats, Receiver};
use crate::sender::{SendStats, Sender};
use crate::socket::is_transient;
use crate::state::ReceiverState;
use crate::timer::RtoEstimator;

/// One transfer over a borrowed channel.
pub struct Connection<'c, C> {
    channel: &'c mut C,
    config: &'c Config,
    rto: RtoEstimator,
}

impl<'c, C: Channel> Connection<'c, C> {
    pub fn new(channel: &'c mut C, config: &'c Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            channel,
            config,
            rto: RtoEstimator::new(config),
        })
    }

    // -----------------------------------------------------------------------
    // Sender role
    // -----------------------------------------------------------------------

    /// Deliver `payload` reliably to the peer.
    ///
    /// Returns once every byte has been acknowledged.
    pub async fn transmit(mut self, payload: &[u8]) -> Result<SendStats> {
        let mut sender = Sender::new(payload, self.config)?;
        self.handshake(&mut sender).await?;

        if payload.is_empty() {
            self.send_empty_fin(&mut sender).await?;
        } else {
            self.transmit_window(&mut sender).await?;
        }
        sender.finish();

        let stats = sender.stats();
        log::info!(
            "[sender] {} bytes acknowledged: {} segments ({} resent), {} timeouts, {} fast retransmits",
            stats.bytes,
            stats.segments_sent,
            stats.retransmitted_segments,
            stats.timeouts,
            stats.fast_retransmits
        );
        Ok(stats)
    }

    async fn handshake(&mut self, sender: &mut Sender<'_>) -> Result<()> {
        let mut attempts = 0u32;
        loop {
            if let Some(max) = self.config.max_syn_attempts {
                if attempts >= max {
                    return Err(Error::HandshakeExhausted { attempts });
                }
            }
            attempts += 1;

            self.send_packet(&Packet::syn()).await?;
            sender.record_syn(Instant::now());
            let wait = self.rto.rto();
            log::debug!("[sender] → SYN #{attempts}, waiting {wait:?}");

            if let Some(response) = self.recv_packet(wait).await? {
                self.rto.reset();
                if let Some(rtt) = sender.on_handshake(&response.header, Instant::now()) {
                    self.rto.on_sample(rtt);
                }
                log::info!(
                    "[sender] handshake answered (ack={}) after {attempts} syn(s); rto={:?}",
                    response.header.ack,
                    self.rto.rto()
                );
                return Ok(());
            }
            self.rto.back_off(self.config.syn_backoff);
        }
    }

    async fn transmit_window(&mut self, sender: &mut Sender<'_>) -> Result<()> {
        while !sender.is_complete() {
            let mut progressed = false;

            if let Some(segment) = sender.next_segment(Instant::now()) {
                self.send_packet(&segment).await?;
                log::debug!(
                    "[sender] → DATA seq={} len={} in_flight={} cwnd={}",
                    segment.header.seq,
                    segment.payload.len(),
                    sender.in_flight(),
                    sender.congestion().window()
                );
                progressed = true;
            }

            while let Some(packet) = self.poll_packet()? {
                self.on_ack(sender, &packet);
                progressed = true;
            }

            let rto = self.rto.rto();
            if sender.check_timeout(Instant::now(), rto) {
                if let Some(max) = self.config.max_consecutive_timeouts {
                    if sender.consecutive_timeouts() >= max {
                        return Err(Error::RetransmitExhausted {
                            timeouts: sender.consecutive_timeouts(),
                        });
                    }
                }
                progressed = true;
            }

            if sender.is_complete() {
                break;
            }
            if progressed {
                tokio::task::yield_now().await;
                continue;
            }

            let bound = self.rto.scaled(self.config.poll_multiplier);
            let wait = sender
                .next_deadline(rto)
                .map_or(bound, |at| at.saturating_duration_since(Instant::now()).min(bound));
            if wait.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }
            if let Some(packet) = self.recv_packet(wait).await? {
                self.on_ack(sender, &packet);
            }
        }
        Ok(())
    }

    /// Zero-length transfer: resend an empty fin until the receiver
    /// confirms it with a fin-flagged ack.
    async fn send_empty_fin(&mut self, sender: &mut Sender<'_>) -> Result<()> {
        let fin = Packet::data(0, Vec::new(), true);
        let mut timeouts = 0u32;
        loop {
            self.send_packet(&fin).await?;
            sender.note_empty_fin(Instant::now());
            log::debug!("[sender] → FIN (empty payload)");

            match self.recv_packet(self.rto.rto()).await? {
                Some(reply) if reply.header.is_ack() && reply.header.is_fin() => return Ok(()),
                Some(_) => {}
                None => {
                    timeouts += 1;
                    if let Some(max) = self.config.max_consecutive_timeouts {
                        if timeouts >= max {
                            return Err(Error::RetransmitExhausted { timeouts });
                        }
                    }
                }
            }
        }
    }

    fn on_ack(&mut self, sender: &mut Sender<'_>, packet: &Packet) {
        let acked = sender.on_ack(&packet.header, Instant::now());
        if let Some(rtt) = acked.rtt {
            self.rto.on_sample(rtt);
        }
        match acked.event {
            AckEvent::Advanced { newly_acked } => log::debug!(
                "[sender] ← ACK ack={} (+{newly_acked}) cwnd={} rto={:?}",
                packet.header.ack,
                sender.congestion().window(),
                self.rto.rto()
            ),
            AckEvent::Duplicate { count } => {
                log::debug!("[sender] ← ACK ack={} duplicate #{count}", packet.header.ack)
            }
            AckEvent::FastRetransmit | AckEvent::Stale => {}
        }
    }

    // -----------------------------------------------------------------------
    // Receiver role
    // -----------------------------------------------------------------------

    /// Accept one transfer and write it in order to `sink`.
    pub async fn receive_into<W>(mut self, sink: &mut W) -> Result<ReceiveStats>
    where
        W: AsyncWrite + Unpin,
    {
        let mut receiver = Receiver::new(self.config);
        self.await_syn(&mut receiver).await?;

        while receiver.state() == ReceiverState::Receiving {
            let wait = self.rto.scaled(self.config.receive_wait_multiplier);
            if let Some(packet) = self.recv_packet(wait).await? {
                if let Some(rtt) = receiver.rtt_sample(Instant::now()) {
                    self.rto.on_sample(rtt);
                }
                match receiver.on_packet(&packet) {
                    Delivery::Deliver(bytes) => {
                        sink.write_all(bytes).await.map_err(Error::Sink)?;
                        sink.flush().await.map_err(Error::Sink)?;
                        log::debug!(
                            "[receiver] ← DATA seq={} delivered {} bytes",
                            packet.header.seq,
                            bytes.len()
                        );
                    }
                    Delivery::OutOfWindow => log::debug!(
                        "[receiver] ← DATA seq={} out of window (delivered={})",
                        packet.header.seq,
                        receiver.delivered()
                    ),
                    Delivery::Duplicate | Delivery::Control => {}
                }
            }
            let ack = receiver.ack_packet(Instant::now());
            self.send_packet(&ack).await?;
        }

        self.drain(&mut receiver).await;
        receiver.close();

        let stats = receiver.stats();
        log::info!(
            "[receiver] {} bytes delivered: {} packets, {} duplicates, {} out of window, {} acks",
            stats.delivered,
            stats.packets_received,
            stats.duplicates,
            stats.dropped_out_of_window,
            stats.acks_sent
        );
        Ok(stats)
    }

    async fn await_syn(&mut self, receiver: &mut Receiver) -> Result<()> {
        let deadline = Instant::now() + self.config.connect_timeout;
        loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            match self.recv_packet(wait).await? {
                None => return Err(Error::ConnectTimeout(self.config.connect_timeout)),
                Some(packet) if packet.header.is_syn() => {
                    receiver.on_syn();
                    break;
                }
                Some(packet) => log::warn!(
                    "[receiver] ignoring packet seq={} before the handshake",
                    packet.header.seq
                ),
            }
        }
        let ack = receiver.ack_packet(Instant::now());
        self.send_packet(&ack).await
    }

    /// Re-acknowledge whatever still arrives until the link goes quiet.
    ///
    /// The peer going away ends the drain like the keepalive expiring.
    async fn drain(&mut self, receiver: &mut Receiver) {
        loop {
            let wait = self
                .rto
                .scaled(self.config.linger_multiplier)
                .max(self.config.min_linger);
            let datagram = match timeout(wait, self.channel.recv(self.config.max_packet)).await {
                Err(_elapsed) => return,
                Ok(Err(e)) if is_transient(&e) => continue,
                Ok(Err(e)) => {
                    log::debug!("[receiver] peer gone while draining: {e}");
                    return;
                }
                Ok(Ok(datagram)) => datagram,
            };
            if let Ok(packet) = Packet::decode(&datagram) {
                receiver.on_packet(&packet);
            }
            let ack = receiver.ack_packet(Instant::now());
            if self.send_packet(&ack).await.is_err() {
                return;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Channel plumbing
    // -----------------------------------------------------------------------

    async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        self.channel.send(&packet.encode()).await?;
        Ok(())
    }

    /// Wait up to `wait` for one packet.  Transient socket errors do not
    /// cut the wait short.
    async fn recv_packet(&mut self, wait: Duration) -> Result<Option<Packet>> {
        let deadline = Instant::now() + wait;
        loop {
            match timeout_at(deadline, self.channel.recv(self.config.max_packet)).await {
                Err(_elapsed) => return Ok(None),
                Ok(Ok(datagram)) => return Ok(Some(Packet::decode(&datagram)?)),
                Ok(Err(e)) if is_transient(&e) => {
                    log::debug!("transient channel error: {e}");
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    fn poll_packet(&mut self) -> Result<Option<Packet>> {
        match self.channel.try_recv(self.config.max_packet) {
            Ok(Some(datagram)) => Ok(Some(Packet::decode(&datagram)?)),
            Ok(None) => Ok(None),
            Err(e) if is_transient(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;

    #[tokio::test(start_paused = true)]
    async fn receiver_times_out_without_syn() {
        let (_peer, mut end) = MemoryChannel::pair();
        let config = Config {
            connect_timeout: Duration::from_secs(5),
            ..Config::default()
        };
        let mut sink = Vec::new();
        let result = Connection::new(&mut end, &config)
            .unwrap()
            .receive_into(&mut sink)
            .await;
        assert!(matches!(result, Err(Error::ConnectTimeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn receiver_ignores_data_before_syn() {
        let (mut peer, mut end) = MemoryChannel::pair();
        let config = Config {
            connect_timeout: Duration::from_secs(5),
            ..Config::default()
        };
        peer.send(&Packet::data(3, b"abc".to_vec(), true).encode())
            .await
            .unwrap();
        let mut sink = Vec::new();
        let result = Connection::new(&mut end, &config)
            .unwrap()
            .receive_into(&mut sink)
            .await;
        assert!(matches!(result, Err(Error::ConnectTimeout(_))));
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_packet_is_fatal() {
        let (mut peer, mut end) = MemoryChannel::pair();
        peer.send(&[1, 2, 3]).await.unwrap();
        let config = Config::default();
        let mut sink = Vec::new();
        let result = Connection::new(&mut end, &config)
            .unwrap()
            .receive_into(&mut sink)
            .await;
        assert!(matches!(result, Err(Error::Packet(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_ceiling_is_honoured() {
        let (_peer, mut end) = MemoryChannel::pair();
        let config = Config {
            max_syn_attempts: Some(3),
            ..Config::default()
        };
        let result = Connection::new(&mut end, &config)
            .unwrap()
            .transmit(b"hello")
            .await;
        assert!(matches!(result, Err(Error::HandshakeExhausted { attempts: 3 })));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_syns_back_off() {
        let (mut peer, mut end) = MemoryChannel::pair();
        let config = Config {
            max_syn_attempts: Some(3),
            ..Config::default()
        };
        let start = Instant::now();
        let _ = Connection::new(&mut end, &config)
            .unwrap()
            .transmit(b"hello")
            .await;
        // 1.0 + 1.2 + 1.44 seconds of waiting.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3600), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(3700), "{elapsed:?}");

        let mut syns = 0;
        while let Some(datagram) = peer.try_recv(64).unwrap() {
            assert!(Packet::decode(&datagram).unwrap().header.is_syn());
            syns += 1;
        }
        assert_eq!(syns, 3);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let (_peer, mut end) = MemoryChannel::pair();
        let config = Config {
            max_packet: 8,
            ..Config::default()
        };
        assert!(matches!(
            Connection::new(&mut end, &config),
            Err(Error::InvalidConfig(_))
        ));
    }
}
