//! # CLI Interface
//!
//! Defines the command-line argument structure for `murmur-node` using
//! `clap` derive. Supports three subcommands: `run`, `cluster`, and
//! `version`.
//!
//! Every configurable value has a corresponding environment variable for
//! container-friendly deployment, because nobody wants to pass 8 flags
//! to a Docker entrypoint.

use clap::{Parser, Subcommand};

/// Murmur gossip membership node.
///
/// Joins (or forms) a cluster, disseminates key/value state to every
/// member, and reports join/leave/update events as they are observed.
#[derive(Parser, Debug)]
#[command(
    name = "murmur-node",
    about = "Murmur gossip membership node",
    version,
    propagate_version = true
)]
pub struct MurmurNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the murmur-node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a node and gossip until interrupted.
    Run(RunArgs),
    /// Spin up a local cluster on loopback UDP and measure how long full
    /// discovery and state propagation take. A smoke test for the whole
    /// stack.
    Cluster(ClusterArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Address to bind the gossip listener on. Port 0 lets the OS pick;
    /// the resolved address is this node's cluster identity.
    #[arg(long, env = "MURMUR_BIND_ADDR", default_value = "0.0.0.0:7946")]
    pub bind: String,

    /// Seed address to contact when no live peers are known. Repeatable.
    /// Without any seeds the node waits passively to be contacted.
    #[arg(long = "seed")]
    pub seeds: Vec<String>,

    /// Key/value entry to publish into the local state at startup, as
    /// `key=value`. Repeatable.
    #[arg(long = "set", value_parser = parse_key_value)]
    pub entries: Vec<(String, String)>,

    /// Milliseconds between gossip rounds.
    #[arg(long, env = "MURMUR_GOSSIP_INTERVAL_MS", default_value_t = 500)]
    pub gossip_interval_ms: u64,

    /// Cap on the encoded size of one datagram. Keep at or below the path
    /// MTU minus IP/UDP overhead.
    #[arg(long, env = "MURMUR_MAX_MESSAGE_SIZE", default_value_t = 512)]
    pub max_message_size: usize,

    /// Phi threshold above which a silent peer is declared down.
    #[arg(long, env = "MURMUR_CONVICTION_THRESHOLD", default_value_t = 8.0)]
    pub conviction_threshold: f64,

    /// Log verbosity level: trace, debug, info, warn, error.
    #[arg(long, env = "MURMUR_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format: pretty or json.
    #[arg(long, env = "MURMUR_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `cluster` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ClusterArgs {
    /// Number of nodes to start.
    #[arg(long, short = 'n', default_value_t = 5)]
    pub nodes: usize,

    /// Milliseconds between gossip rounds. The local harness defaults
    /// faster than production so runs finish quickly.
    #[arg(long, default_value_t = 100)]
    pub gossip_interval_ms: u64,

    /// Seconds to wait for discovery and propagation before giving up.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Emit the summary as JSON instead of human-readable text.
    #[arg(long)]
    pub json: bool,

    /// Log verbosity level. The harness defaults to warn so the summary
    /// isn't buried under per-node chatter.
    #[arg(long, env = "MURMUR_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,
}

/// Parses a `key=value` argument. The value may itself contain `=`; only
/// the first one splits.
fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {s:?}")),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
