//! notify-peer - udpnotify demo host
//!
//! Runs the numbered-message demo as a server, a client, or both sides in
//! one process.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use udpnotify_cli::{display_connection_stats, DemoPeer, HostConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Accept connections and acknowledge incoming messages
    Server,
    /// Connect to a server and send numbered messages
    Client,
    /// Run a server and a client in this process
    Loopback,
}

#[derive(Parser, Debug)]
#[command(name = "notify-peer")]
#[command(about = "udpnotify demo peer", long_about = None)]
struct Args {
    /// Which side to run
    #[arg(value_enum, default_value = "loopback")]
    mode: Mode,

    /// TOML configuration file with [peer] and [demo] tables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address (overrides the config file)
    #[arg(short, long)]
    server: Option<SocketAddr>,

    /// Simulated receive loss, 0.0 to 1.0 (overrides the config file)
    #[arg(short, long)]
    loss: Option<f64>,

    /// Numbered messages the client sends (overrides the config file)
    #[arg(short = 'n', long)]
    messages: Option<u32>,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,

    /// Write the example configuration to this path and exit
    #[arg(long)]
    write_example: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Args) -> anyhow::Result<HostConfig> {
    let mut config = match &args.config {
        Some(path) => HostConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HostConfig::example(),
    };

    if let Some(server) = args.server {
        config.demo.server_addr = server;
    }
    if let Some(loss) = args.loss {
        config.peer.simulated_loss = loss;
    }
    if let Some(messages) = args.messages {
        config.demo.message_count = messages;
    }

    config.peer.validate()?;
    Ok(config)
}

fn print_stats(demo: &DemoPeer) {
    for connection in demo.peer().connections() {
        display_connection_stats(
            connection.remote_addr(),
            connection.stats(),
            connection.rtt_estimator(),
        );
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "trace" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(path) = &args.write_example {
        HostConfig::example().to_file(path)?;
        tracing::info!("Wrote example configuration to {}", path.display());
        return Ok(());
    }

    let config = load_config(&args)?;
    let tick = config.demo.tick_interval();
    let deadline = args.duration.map(Duration::from_secs);

    tracing::info!("notify-peer starting in {:?} mode", args.mode);
    tracing::info!("Server address: {}", config.demo.server_addr);
    tracing::info!("Simulated loss: {}", config.peer.simulated_loss);

    let mut peers = Vec::new();
    if matches!(args.mode, Mode::Server | Mode::Loopback) {
        peers.push(DemoPeer::server(
            config.server_peer(),
            config.demo.message_count,
        )?);
    }
    if matches!(args.mode, Mode::Client | Mode::Loopback) {
        peers.push(DemoPeer::client(
            config.client_peer(),
            config.demo.server_addr,
            config.demo.message_count,
        )?);
    }

    let start = Instant::now();
    loop {
        for demo in peers.iter_mut() {
            demo.tick()?;
        }

        if peers.iter().any(DemoPeer::failed) {
            anyhow::bail!("Could not connect to {}", config.demo.server_addr);
        }

        let done = match args.mode {
            Mode::Server => false,
            _ => peers.iter().all(DemoPeer::is_complete),
        };
        if done {
            tracing::info!(
                "All {} messages delivered in {:.2}s",
                config.demo.message_count,
                start.elapsed().as_secs_f64()
            );
            break;
        }

        if deadline.map_or(false, |d| start.elapsed() >= d) {
            tracing::warn!("Stopping after {:?}", start.elapsed());
            break;
        }

        thread::sleep(tick);
    }

    for demo in &peers {
        tracing::info!(
            "{:?}: {} delivered, {} received, {} resent",
            demo.role(),
            demo.delivered().len(),
            demo.received().len(),
            demo.resent()
        );
        print_stats(demo);
    }

    Ok(())
}
