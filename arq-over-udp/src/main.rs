//! Entry point for `arq-over-udp`.
//!
//! A small file-transfer application on top of the library.  The server
//! listens, receives one file and writes it to disk; the client connects
//! and sends one file.  All protocol work is delegated to library modules;
//! `main.rs` owns only process setup (logging, argument parsing, file I/O
//! and the final statistics).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};

use arq_over_udp::{Config, Connection, Protocol};

/// Reliable file transfer over UDP with Stop-and-Wait, Go-Back-N or
/// Selective-Repeat.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Receive one file and write it to `--file`.
    Server(Opts),
    /// Send the contents of `--file` to a server.
    Client(Opts),
}

/// Fault injection scenario.
#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TestMode {
    /// Client side: drop data packets.
    Loss,
    /// Server side: drop acknowledgements.
    Skipack,
}

#[derive(Args)]
struct Opts {
    /// Server IP address (bind address in server mode).
    #[arg(short = 'i', long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Server port.
    #[arg(short, long, default_value_t = 8088,
          value_parser = clap::value_parser!(u16).range(1024..))]
    port: u16,

    /// File to send (client) or write (server).
    #[arg(short, long)]
    file: PathBuf,

    /// ARQ strategy: saw, gbn or sr.
    #[arg(short = 'r', long, default_value = "gbn")]
    protocol: Protocol,

    /// Packets in flight for Go-Back-N and Selective-Repeat.
    #[arg(short, long, default_value_t = 64)]
    window: usize,

    /// Payload bytes per data packet.
    #[arg(long, default_value_t = 1000)]
    payload_size: usize,

    /// Retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 500)]
    timeout_ms: u64,

    /// Drop probability used by `--test`.
    #[arg(long, default_value_t = 0.001)]
    loss_probability: f64,

    /// Most packets `--test` may drop.
    #[arg(long, default_value_t = 10)]
    max_losses: u32,

    /// Enable fault injection.
    #[arg(short, long, value_enum)]
    test: Option<TestMode>,

    /// Log every packet.
    #[arg(short, long)]
    output: bool,
}

impl Opts {
    fn config(&self) -> Config {
        Config {
            max_payload_size: self.payload_size,
            window_size: self.window,
            timeout: Duration::from_millis(self.timeout_ms),
            loss_probability: self.loss_probability,
            max_simulated_losses: if self.test.is_some() { self.max_losses } else { 0 },
            verbose: self.output,
            max_retries: None,
        }
    }

    fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().mode {
        Mode::Server(opts) => run_server(opts).await,
        Mode::Client(opts) => run_client(opts).await,
    }
}

async fn run_server(opts: Opts) -> anyhow::Result<()> {
    if opts.test == Some(TestMode::Loss) {
        bail!("--test loss is a client-side scenario");
    }
    let addr = opts.server_addr();
    let mut conn = Connection::bind(addr, opts.config())
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let peer = conn.listen().await.context("handshake failed")?;
    log::info!("receiving from {peer} with {}", opts.protocol);

    let start = Instant::now();
    let data = conn
        .receive_reliable(opts.protocol)
        .await
        .context("transfer failed")?;
    let elapsed = start.elapsed();

    tokio::fs::write(&opts.file, &data)
        .await
        .with_context(|| format!("failed to write {}", opts.file.display()))?;

    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    println!("Received:     {:.2} MB", data.len() as f64 / 1e6);
    println!("Time elapsed: {secs:.2} s");
    println!("Throughput:   {:.2} Mbps", data.len() as f64 * 8.0 / secs / 1e6);
    Ok(())
}

async fn run_client(opts: Opts) -> anyhow::Result<()> {
    if opts.test == Some(TestMode::Skipack) {
        bail!("--test skipack is a server-side scenario");
    }
    let data = tokio::fs::read(&opts.file)
        .await
        .with_context(|| format!("failed to read {}", opts.file.display()))?;

    let server = opts.server_addr();
    let local_ip: IpAddr = if server.is_ipv4() {
        Ipv4Addr::UNSPECIFIED.into()
    } else {
        Ipv6Addr::UNSPECIFIED.into()
    };
    let mut conn = Connection::bind(SocketAddr::new(local_ip, 0), opts.config())
        .await
        .context("failed to bind client socket")?;

    conn.connect(server)
        .await
        .with_context(|| format!("could not connect to {server}"))?;

    let stats = conn
        .send_reliable(&data, opts.protocol)
        .await
        .context("transfer failed")?;

    println!("Sent:            {:.2} MB", data.len() as f64 / 1e6);
    println!("Packets:         {}", stats.packets_sent);
    println!("Retransmissions: {}", stats.retransmissions);
    println!("Simulated loss:  {}", stats.simulated_losses);
    Ok(())
}
