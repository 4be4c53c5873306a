// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Murmur Node
//!
//! Entry point for the `murmur-node` binary. Parses CLI arguments,
//! initializes logging, and runs one of three subcommands:
//!
//! - `run`     — start a gossip node and report membership events
//! - `cluster` — spin up a local loopback cluster and measure convergence
//! - `version` — print build version information

mod cli;
mod logging;

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;

use murmur_protocol::{config, Murmur, Options};

use cli::{ClusterArgs, Commands, MurmurNodeCli, RunArgs};
use logging::LogFormat;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = MurmurNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Cluster(args) => run_cluster(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts a single node and gossips until SIGINT/SIGTERM.
async fn run_node(args: RunArgs) -> Result<()> {
    logging::init_logging(&args.log_level, LogFormat::from_str_lossy(&args.log_format));

    let mut options = Options::new()
        .with_gossip_interval(Duration::from_millis(args.gossip_interval_ms))
        .with_max_message_size(args.max_message_size)
        .with_conviction_threshold(args.conviction_threshold)
        .with_on_join(|addr| tracing::info!(addr, "peer joined"))
        .with_on_leave(|addr| tracing::warn!(addr, "peer left"))
        .with_on_update(|addr, key, value| {
            tracing::info!(
                addr,
                key,
                value = %String::from_utf8_lossy(value),
                "peer state updated"
            );
        });

    if !args.seeds.is_empty() {
        let seeds = args.seeds.clone();
        options = options.with_seed(move || seeds.clone());
    }

    let node = Murmur::create(&args.bind, options)
        .with_context(|| format!("failed to start node on {}", args.bind))?;

    for (key, value) in &args.entries {
        node.update_local(key, value.clone().into_bytes());
    }

    tracing::info!(
        addr = %node.bind_addr(),
        seeds = args.seeds.len(),
        entries = args.entries.len(),
        "murmur node running; Ctrl+C to stop"
    );

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    node.shutdown().context("shutdown failed")?;
    Ok(())
}

/// Runs a throwaway loopback cluster: starts `n` nodes, waits for full
/// mutual discovery, publishes one entry per node, waits for propagation,
/// and prints how long each phase took.
fn run_cluster(args: ClusterArgs) -> Result<()> {
    logging::init_logging(&args.log_level, LogFormat::Pretty);

    if args.nodes < 2 {
        bail!("a cluster needs at least 2 nodes");
    }

    let interval = Duration::from_millis(args.gossip_interval_ms);
    let timeout = Duration::from_secs(args.timeout_secs);

    // Start nodes sequentially, each seeded with up to three of the nodes
    // already running. The first node has no seeds and waits to be found.
    let mut nodes: Vec<Murmur> = Vec::with_capacity(args.nodes);
    let mut addrs: Vec<String> = Vec::with_capacity(args.nodes);
    let started = Instant::now();

    for i in 0..args.nodes {
        let seeds: Vec<String> = addrs.iter().rev().take(3).cloned().collect();
        let mut options = Options::new().with_gossip_interval(interval);
        if !seeds.is_empty() {
            let seeds_cb = seeds.clone();
            options = options.with_seed(move || seeds_cb.clone());
        }

        let node = Murmur::create("127.0.0.1:0", options)
            .with_context(|| format!("failed to start cluster node {i}"))?;
        addrs.push(node.bind_addr());
        nodes.push(node);
    }

    // Phase 1: every node discovers every other node.
    let discovered = wait_until(timeout, || {
        nodes.iter().all(|n| n.peers(false).len() == args.nodes - 1)
    });
    if !discovered {
        bail!(
            "cluster did not reach full discovery within {}s",
            args.timeout_secs
        );
    }
    let discovery = started.elapsed();

    // Phase 2: one entry per node, propagated everywhere.
    let publish_started = Instant::now();
    for (i, node) in nodes.iter().enumerate() {
        node.update_local("name", format!("node-{i}").into_bytes());
    }
    let propagated = wait_until(timeout, || {
        nodes.iter().all(|node| {
            addrs
                .iter()
                .enumerate()
                .all(|(i, addr)| node.lookup(addr, "name") == Some(format!("node-{i}").into_bytes()))
        })
    });
    if !propagated {
        bail!(
            "updates did not propagate within {}s",
            args.timeout_secs
        );
    }
    let propagation = publish_started.elapsed();

    let summary = ClusterSummary {
        nodes: args.nodes,
        gossip_interval_ms: args.gossip_interval_ms,
        discovery_ms: discovery.as_millis() as u64,
        propagation_ms: propagation.as_millis() as u64,
        addrs,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("cluster of {} nodes (interval {}ms)", summary.nodes, summary.gossip_interval_ms);
        println!("  full discovery   : {}ms", summary.discovery_ms);
        println!("  state propagation: {}ms", summary.propagation_ms);
    }

    for node in &nodes {
        node.shutdown().context("node shutdown failed")?;
    }
    Ok(())
}

#[derive(serde::Serialize)]
struct ClusterSummary {
    nodes: usize,
    gossip_interval_ms: u64,
    discovery_ms: u64,
    propagation_ms: u64,
    addrs: Vec<String>,
}

/// Polls `cond` every 10ms until it holds or `timeout` elapses.
fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Prints version information to stdout.
fn print_version() {
    println!("murmur-node {}", env!("CARGO_PKG_VERSION"));
    println!(
        "defaults   gossip-interval={}ms max-message-size={}B phi-threshold={}",
        config::DEFAULT_GOSSIP_INTERVAL.as_millis(),
        config::DEFAULT_MAX_MESSAGE_SIZE,
        config::DEFAULT_CONVICTION_THRESHOLD,
    );
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
