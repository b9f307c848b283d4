//! # nodepool CLI Entry Point
//!
//! Operator tooling for the nodepool connection pool: exercise a pool against
//! live nodes and run a throwaway TCP sink to point it at.
//!
//! ## Usage
//!
//! ```bash
//! # Start two sinks
//! nodepool listen -b 127.0.0.1:9001
//! nodepool listen -b 127.0.0.1:9002
//!
//! # Lease connections across both for five rounds, then print the pool state
//! nodepool probe -n 127.0.0.1:9001 -n 127.0.0.1:9002 --concurrency 8 --rounds 5
//! ```
//!
//! Logs go to stderr and honour `RUST_LOG`; the probe's JSON snapshot goes
//! to stdout.

use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use nodepool_client::{ConnectionPool, PoolConfig};
use nodepool_common::backoff::RetryConfig;
use nodepool_common::transport::TcpConnector;
use nodepool_common::Node;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

#[derive(FromArgs)]
/// nodepool - bounded multi-node connection pool
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Probe(ProbeArgs),
    Listen(ListenArgs),
}

/// Arguments for the pool probe.
///
/// Each round leases up to `concurrency` connections in one batch, holds
/// them for `hold_ms`, then releases them. When the pool is saturated the
/// probe backs off according to the retry settings.
#[derive(FromArgs)]
#[argh(subcommand, name = "probe")]
/// lease connections from a pool of nodes and report its state
struct ProbeArgs {
    /// node address as host:port, repeat for several nodes
    #[argh(option, short = 'n', long = "node")]
    nodes: Vec<String>,

    /// maximum number of connections leased at once
    #[argh(option, default = "10")]
    concurrency: usize,

    /// consecutive dial failures before a node is excluded (0 disables exclusion)
    #[argh(option, long = "retries-per-node", default = "0")]
    retries_per_node: u32,

    /// connections to dial up front and park as idle
    #[argh(option)]
    prepare: Option<usize>,

    /// number of lease/release rounds
    #[argh(option, default = "3")]
    rounds: usize,

    /// how long each round holds its connections, in milliseconds
    #[argh(option, long = "hold-ms", default = "100")]
    hold_ms: u64,

    /// dial timeout in milliseconds
    #[argh(option, long = "connect-timeout-ms", default = "2000")]
    connect_timeout_ms: u64,

    /// backoff retries while the pool is saturated
    #[argh(option, long = "max-retries", default = "3")]
    max_retries: usize,
}

/// Arguments for the TCP sink.
#[derive(FromArgs)]
#[argh(subcommand, name = "listen")]
/// accept and hold TCP connections until the peer or ctrl-c closes them
struct ListenArgs {
    /// address to bind to
    ///
    /// Defaults to "127.0.0.1:0", which assigns a random available port.
    /// The bound address is logged at startup.
    #[argh(option, short = 'b', default = "\"127.0.0.1:0\".into()")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Default to INFO, RUST_LOG overrides. Stderr keeps stdout clean for JSON.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Probe(args) => run_probe(args).await,
        Commands::Listen(args) => run_listen(args).await,
    }
}

fn parse_nodes(raw: &[String]) -> Result<Vec<Node>> {
    if raw.is_empty() {
        anyhow::bail!("at least one node is required (-n host:port)");
    }
    raw.iter()
        .map(|addr| Node::resolve(addr).with_context(|| format!("invalid node address '{}'", addr)))
        .collect()
}

async fn run_probe(args: ProbeArgs) -> Result<()> {
    let nodes = parse_nodes(&args.nodes)?;
    let config = PoolConfig {
        concurrency: args.concurrency,
        retries_per_node: args.retries_per_node,
    };
    let retry = RetryConfig {
        max_retries: args.max_retries,
        ..Default::default()
    };
    let connector =
        TcpConnector::new().with_connect_timeout(Duration::from_millis(args.connect_timeout_ms));
    let pool = ConnectionPool::new(connector, nodes, config)?;

    if let Some(count) = args.prepare {
        pool.prepare(count).await.context("failed to warm up pool")?;
    }

    let mut leases = Vec::with_capacity(args.concurrency);
    for round in 1..=args.rounds {
        let mut backoff = retry.backoff();
        let leased = loop {
            match pool.acquire_batch(&mut leases, args.concurrency).await {
                Ok(0) => match backoff.next() {
                    Some(delay) => {
                        tracing::debug!(
                            round,
                            delay_ms = delay.as_millis() as u64,
                            "Pool saturated, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => break 0,
                },
                Ok(count) => break count,
                Err(e) => {
                    // Whatever was leased before the failure is still usable
                    tracing::warn!(round, error = %e, "Dial failed");
                    break leases.len();
                }
            }
        };

        tracing::info!(round, leased, available = pool.available_permits(), "Round leased");
        tokio::time::sleep(Duration::from_millis(args.hold_ms)).await;
        pool.release_batch(&mut leases);
    }

    println!("{}", serde_json::to_string_pretty(&pool.snapshot())?);
    pool.close();
    Ok(())
}

async fn run_listen(args: ListenArgs) -> Result<()> {
    let listener = TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (mut stream, peer) = accepted?;
                tracing::info!(%peer, "Accepted connection");
                tokio::spawn(async move {
                    // Discard input until the peer goes away
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) => break,
                            Ok(_) => {}
                            Err(e) => {
                                tracing::debug!(%peer, error = %e, "Read failed");
                                break;
                            }
                        }
                    }
                    tracing::info!(%peer, "Connection closed");
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                return Ok(());
            }
        }
    }
}
