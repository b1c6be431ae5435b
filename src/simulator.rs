//! Fault injection for any [`Channel`].
//!
//! [`Simulator`] impairs **outbound** datagrams only; wrap both ends of a
//! link to impair both directions.  Per datagram, in this order:
//!
//! 1. drop it with probability `loss_rate`;
//! 2. otherwise, if nothing is held back yet, hold it behind the next
//!    datagram with probability `reorder_rate`;
//! 3. otherwise send it, twice with probability `duplicate_rate`, then
//!    release any held datagram.
//!
//! The RNG is a [`SmallRng`] seeded from [`SimulatorConfig::seed`], so a
//! run is reproducible.

use std::io;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::channel::Channel;
use crate::error::{Error, Result};

/// Fault probabilities, each in `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    pub loss_rate: f64,
    pub duplicate_rate: f64,
    pub reorder_rate: f64,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            seed: 0xBAD5EED,
        }
    }
}

impl SimulatorConfig {
    /// Pure packet loss at `loss_rate`.
    pub fn lossy(loss_rate: f64, seed: u64) -> Self {
        Self {
            loss_rate,
            seed,
            ..Self::default()
        }
    }

    /// `true` when any fault is enabled.
    pub fn is_impaired(&self) -> bool {
        self.loss_rate > 0.0 || self.duplicate_rate > 0.0 || self.reorder_rate > 0.0
    }
}

/// Counters of the faults applied so far.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FaultStats {
    pub forwarded: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
}

/// A fault-injecting wrapper around another channel.
#[derive(Debug)]
pub struct Simulator<C> {
    inner: C,
    config: SimulatorConfig,
    rng: SmallRng,
    /// Datagram waiting to be sent behind the next one.
    held: Option<Vec<u8>>,
    stats: FaultStats,
}

impl<C: Channel> Simulator<C> {
    pub fn new(inner: C, config: SimulatorConfig) -> Result<Self> {
        let rates = [config.loss_rate, config.duplicate_rate, config.reorder_rate];
        if rates.iter().any(|r| !(0.0..=1.0).contains(r)) {
            return Err(Error::InvalidConfig("simulator rates must lie in [0, 1]"));
        }
        Ok(Self {
            inner,
            rng: SmallRng::seed_from_u64(config.seed),
            config,
            held: None,
            stats: FaultStats::default(),
        })
    }

    pub fn stats(&self) -> FaultStats {
        self.stats
    }
}

impl<C: Channel + Send> Channel for Simulator<C> {
    async fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        if self.rng.gen_bool(self.config.loss_rate) {
            self.stats.dropped += 1;
            log::trace!("[sim] dropped {} byte datagram", datagram.len());
            return Ok(());
        }

        if self.held.is_none() && self.rng.gen_bool(self.config.reorder_rate) {
            self.stats.reordered += 1;
            log::trace!("[sim] holding {} byte datagram back", datagram.len());
            self.held = Some(datagram.to_vec());
            return Ok(());
        }

        let copies = if self.rng.gen_bool(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            2
        } else {
            1
        };
        for _ in 0..copies {
            self.inner.send(datagram).await?;
            self.stats.forwarded += 1;
        }

        if let Some(held) = self.held.take() {
            self.inner.send(&held).await?;
            self.stats.forwarded += 1;
        }
        Ok(())
    }

    async fn recv(&mut self, max_len: usize) -> io::Result<Vec<u8>> {
        self.inner.recv(max_len).await
    }

    fn try_recv(&mut self, max_len: usize) -> io::Result<Option<Vec<u8>>> {
        self.inner.try_recv(max_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;

    async fn drain(end: &mut MemoryChannel) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(d) = end.try_recv(64).unwrap() {
            out.push(d);
        }
        out
    }

    #[tokio::test]
    async fn default_config_is_pass_through() {
        let (a, mut b) = MemoryChannel::pair();
        let mut sim = Simulator::new(a, SimulatorConfig::default()).unwrap();
        for i in 0..50u8 {
            sim.send(&[i]).await.unwrap();
        }
        let got = drain(&mut b).await;
        assert_eq!(got.len(), 50);
        assert!(got.iter().enumerate().all(|(i, d)| d[0] == i as u8));
        assert_eq!(sim.stats().dropped, 0);
    }

    #[tokio::test]
    async fn full_loss_drops_everything() {
        let (a, mut b) = MemoryChannel::pair();
        let mut sim = Simulator::new(a, SimulatorConfig::lossy(1.0, 1)).unwrap();
        for _ in 0..10 {
            sim.send(b"gone").await.unwrap();
        }
        assert!(drain(&mut b).await.is_empty());
        assert_eq!(sim.stats().dropped, 10);
    }

    #[tokio::test]
    async fn loss_rate_is_roughly_honoured() {
        let (a, mut b) = MemoryChannel::pair();
        let mut sim = Simulator::new(a, SimulatorConfig::lossy(0.2, 42)).unwrap();
        for _ in 0..1000 {
            sim.send(b"x").await.unwrap();
        }
        let delivered = drain(&mut b).await.len();
        assert!((700..=900).contains(&delivered), "delivered {delivered}");
    }

    #[tokio::test]
    async fn same_seed_same_faults() {
        let run = |seed| async move {
            let (a, mut b) = MemoryChannel::pair();
            let mut sim = Simulator::new(a, SimulatorConfig::lossy(0.5, seed)).unwrap();
            for i in 0..64u8 {
                sim.send(&[i]).await.unwrap();
            }
            drain(&mut b).await
        };
        assert_eq!(run(7).await, run(7).await);
    }

    #[tokio::test]
    async fn duplication_sends_twice() {
        let (a, mut b) = MemoryChannel::pair();
        let config = SimulatorConfig {
            duplicate_rate: 1.0,
            ..SimulatorConfig::default()
        };
        let mut sim = Simulator::new(a, config).unwrap();
        sim.send(b"dup").await.unwrap();
        assert_eq!(drain(&mut b).await, vec![b"dup".to_vec(), b"dup".to_vec()]);
    }

    #[tokio::test]
    async fn reordering_swaps_neighbours() {
        let (a, mut b) = MemoryChannel::pair();
        let config = SimulatorConfig {
            reorder_rate: 1.0,
            ..SimulatorConfig::default()
        };
        let mut sim = Simulator::new(a, config).unwrap();
        sim.send(b"first").await.unwrap();
        sim.send(b"second").await.unwrap();
        assert_eq!(
            drain(&mut b).await,
            vec![b"second".to_vec(), b"first".to_vec()]
        );
    }

    #[test]
    fn out_of_range_rate_rejected() {
        let (a, _b) = MemoryChannel::pair();
        assert!(Simulator::new(a, SimulatorConfig::lossy(1.5, 0)).is_err());
    }
}
