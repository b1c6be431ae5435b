//! Entry point for `rudp`.
//!
//! Parses CLI arguments and dispatches into either **send** or **recv** mode.
//! All protocol work is delegated to the library; `main.rs` owns only
//! process setup (logging, argument parsing, file I/O).

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use rudp::{Channel, Config, Simulator, SimulatorConfig, Socket};

/// Reliable byte stream over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send a file to a waiting receiver.
    Send {
        /// Local address to bind (e.g. 0.0.0.0:9001).
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        /// Receiver address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        peer: SocketAddr,
        /// File to transmit.
        #[arg(short, long)]
        input: PathBuf,
        #[command(flatten)]
        common: Common,
    },
    /// Receive one transfer into a file.
    Recv {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        /// Sender address.
        #[arg(short, long)]
        peer: SocketAddr,
        /// Destination file.
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        common: Common,
    },
}

#[derive(Args)]
struct Common {
    /// Largest datagram, header included.
    #[arg(long, default_value_t = 1400)]
    max_packet: usize,
    /// Simulated outbound loss probability.
    #[arg(long, default_value_t = 0.0)]
    loss: f64,
    /// Simulated outbound duplication probability.
    #[arg(long, default_value_t = 0.0)]
    duplicate: f64,
    /// Simulated outbound reordering probability.
    #[arg(long, default_value_t = 0.0)]
    reorder: f64,
    /// Seed for the simulator.
    #[arg(long, default_value_t = 0xBAD5EED)]
    seed: u64,
    /// Give up after this many consecutive retransmission timeouts.
    #[arg(long)]
    max_timeouts: Option<u32>,
}

impl Common {
    fn config(&self) -> Config {
        Config {
            max_packet: self.max_packet,
            max_consecutive_timeouts: self.max_timeouts,
            ..Config::default()
        }
    }

    fn simulator(&self) -> SimulatorConfig {
        SimulatorConfig {
            loss_rate: self.loss,
            duplicate_rate: self.duplicate,
            reorder_rate: self.reorder,
            seed: self.seed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Send {
            bind,
            peer,
            input,
            common,
        } => {
            let payload = tokio::fs::read(&input)
                .await
                .with_context(|| format!("reading {}", input.display()))?;
            let socket = Socket::connect(bind, peer)
                .await
                .with_context(|| format!("binding {bind}"))?;
            log::info!("Sending {} bytes from {} to {peer}", payload.len(), socket.local_addr);

            let config = common.config();
            let sim = common.simulator();
            if sim.is_impaired() {
                let mut channel = Simulator::new(socket, sim)?;
                send(&mut channel, &payload, &config).await?;
                log::info!("[sim] {:?}", channel.stats());
            } else {
                let mut channel = socket;
                send(&mut channel, &payload, &config).await?;
            }
        }
        Mode::Recv {
            bind,
            peer,
            output,
            common,
        } => {
            let mut file = tokio::fs::File::create(&output)
                .await
                .with_context(|| format!("creating {}", output.display()))?;
            let socket = Socket::connect(bind, peer)
                .await
                .with_context(|| format!("binding {bind}"))?;
            log::info!("Receiving on {} from {peer}", socket.local_addr);

            let config = common.config();
            let sim = common.simulator();
            let delivered = if sim.is_impaired() {
                let mut channel = Simulator::new(socket, sim)?;
                rudp::receive_into(&mut channel, &mut file, &config).await?
            } else {
                let mut channel = socket;
                rudp::receive_into(&mut channel, &mut file, &config).await?
            };
            println!("{delivered}");
        }
    }
    Ok(())
}

async fn send<C: Channel>(channel: &mut C, payload: &[u8], config: &Config) -> Result<()> {
    let stats = rudp::Connection::new(channel, config)?
        .transmit(payload)
        .await
        .context("transfer failed")?;
    log::info!("{stats:?}");
    Ok(())
}
