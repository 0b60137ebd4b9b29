//! Entry point for `arq-stream`.
//!
//! Parses CLI arguments and dispatches into **send**, **recv**, or
//! **simulate** mode.  All actual protocol work is delegated to library
//! modules; `main.rs` owns only process setup (logging, argument parsing)
//! and user-facing output.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use arq_stream::endpoint::{ReceiverEndpoint, SenderEndpoint};
use arq_stream::sim::{SimConfig, Simulation};

/// Reliable byte stream over an unreliable fixed-size-frame channel.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send messages to a receiver over UDP.
    Send {
        /// Local address to bind (e.g. 0.0.0.0:0).
        #[arg(short, long, default_value = "0.0.0.0:0")]
        local: SocketAddr,
        /// Remote receiver address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        remote: SocketAddr,
        /// Messages to send, one stream message per argument.
        #[arg(required = true)]
        messages: Vec<String>,
    },
    /// Receive messages over UDP and print them.
    Recv {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        local: SocketAddr,
        /// Number of messages to wait for before exiting.
        #[arg(short, long, default_value_t = 1)]
        count: usize,
    },
    /// Run both engines in-process over an impaired simulated channel.
    Simulate {
        /// Per-frame loss probability.
        #[arg(long, default_value_t = 0.1)]
        loss: f64,
        /// Per-frame corruption probability.
        #[arg(long, default_value_t = 0.05)]
        corrupt: f64,
        /// Per-frame duplication probability.
        #[arg(long, default_value_t = 0.05)]
        duplicate: f64,
        /// Maximum extra per-frame delay in microseconds.
        #[arg(long, default_value_t = 500)]
        jitter_us: u64,
        /// RNG seed; the same seed reproduces the same run.
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Number of generated messages to push through the channel.
        #[arg(long, default_value_t = 50)]
        messages: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Send {
            local,
            remote,
            messages,
        } => send(local, remote, messages).await,
        Mode::Recv { local, count } => recv(local, count).await,
        Mode::Simulate {
            loss,
            corrupt,
            duplicate,
            jitter_us,
            seed,
            messages,
        } => simulate(loss, corrupt, duplicate, jitter_us, seed, messages),
    }
}

async fn send(local: SocketAddr, remote: SocketAddr, messages: Vec<String>) -> Result<()> {
    let mut endpoint = SenderEndpoint::connect(local, remote).await?;
    for message in &messages {
        endpoint.send(message.as_bytes()).await?;
    }
    endpoint.flush().await?;
    println!("sent {} message(s) to {remote}", messages.len());
    Ok(())
}

async fn recv(local: SocketAddr, count: usize) -> Result<()> {
    let mut endpoint = ReceiverEndpoint::bind(local).await?;
    for _ in 0..count {
        let message = endpoint.recv().await?;
        println!("{}", String::from_utf8_lossy(&message));
    }
    Ok(())
}

fn simulate(
    loss: f64,
    corrupt: f64,
    duplicate: f64,
    jitter_us: u64,
    seed: u64,
    messages: usize,
) -> Result<()> {
    let config = SimConfig {
        loss_rate: loss,
        corrupt_rate: corrupt,
        duplicate_rate: duplicate,
        jitter_us,
        seed,
        ..SimConfig::default()
    };
    let mut sim = Simulation::new(config);

    // Deterministic payloads with sizes spread across frame boundaries.
    let sent: Vec<Vec<u8>> = (0..messages)
        .map(|i| {
            let len = (i * 157) % 1_200;
            (0..len).map(|b| ((b + i) % 251) as u8).collect()
        })
        .collect();
    for message in &sent {
        sim.submit(message);
    }
    sim.run_until_idle(Duration::from_secs(3_600))?;

    anyhow::ensure!(
        sim.delivered() == &sent[..],
        "delivered messages diverge from submitted ones"
    );

    let stats = sim.stats();
    println!("delivered {} message(s) intact in {:?} of virtual time", messages, sim.clock());
    println!("  frames sent        {}", stats.frames_sent);
    println!("  frames lost        {}", stats.frames_lost);
    println!("  frames corrupted   {}", stats.frames_corrupted);
    println!("  frames duplicated  {}", stats.frames_duplicated);
    println!("  timeouts           {}", stats.timeouts);
    Ok(())
}
