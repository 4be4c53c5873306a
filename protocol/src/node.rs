//! # Murmur Node
//!
//! The public façade. A [`Murmur`] owns the peer map, the failure
//! detector, the gossiper, and the transport, plus the scheduler thread
//! that drives a gossip round every interval.
//!
//! Lifecycle:
//!
//! ```text
//! create() -> [gossiping] -> shutdown()
//! ```
//!
//! `create` binds the transport and starts gossiping immediately; it does
//! not block on joining a cluster. `shutdown` stops the transport first
//! (so no new inbound work arrives), then signals the scheduler and joins
//! it. After shutdown every public operation returns without touching
//! state.
//!
//! Thread safety: all operations take `&self` and may be called from any
//! thread. Membership callbacks fire on murmur's internal threads with no
//! internal locks held.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config;
use crate::failure::FailureDetector;
use crate::gossiper::Gossiper;
use crate::options::Options;
use crate::peermap::PeerMap;
use crate::transport::{Transport, TransportError, UdpTransport};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the public API. Only `create` can fail for
/// configuration reasons; everything after that is best-effort.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The options or address are unusable. The node was not started.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The transport failed to bind or shut down.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

// ---------------------------------------------------------------------------
// Murmur
// ---------------------------------------------------------------------------

/// A cluster member. Create one per process, share it freely.
pub struct Murmur {
    peer_map: Arc<PeerMap>,
    gossiper: Arc<Gossiper>,
    transport: Arc<dyn Transport>,
    closed: AtomicBool,
    stop_scheduler: Mutex<Option<mpsc::Sender<()>>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl Murmur {
    /// Starts a node: binds the transport on `addr` (UDP unless overridden
    /// in the options; port 0 lets the OS pick), begins listening, and
    /// schedules gossip rounds. Returns without waiting for any peer
    /// contact; discovery happens in the background via the seed
    /// callback.
    pub fn create(addr: &str, options: Options) -> Result<Murmur, NodeError> {
        let gossip_interval = options.gossip_interval();
        if gossip_interval.is_zero() {
            return Err(NodeError::Config("gossip interval must be non-zero".into()));
        }

        // The budget must at least fit the type byte plus one digest
        // record for our own (maximal) address, or the node could never
        // announce itself.
        let max_message_size = options.max_message_size();
        if max_message_size < 1 + 1 + config::MAX_ADDR_LEN + 8 {
            return Err(NodeError::Config(format!(
                "max message size {max_message_size} cannot hold a digest record"
            )));
        }

        let transport: Arc<dyn Transport> = match options.transport.clone() {
            Some(transport) => transport,
            None => Arc::new(UdpTransport::bind(addr)?),
        };

        // The bind address is the node's cluster-wide identity; it must be
        // encodable behind a 1-byte length prefix.
        let bind_addr = transport.bind_addr();
        if bind_addr.len() > config::MAX_ADDR_LEN {
            return Err(NodeError::Config(format!(
                "bind address {bind_addr:?} exceeds {} bytes",
                config::MAX_ADDR_LEN
            )));
        }

        let peer_map = Arc::new(PeerMap::new(
            bind_addr.clone(),
            options.on_join.clone(),
            options.on_leave.clone(),
            options.on_update.clone(),
        ));
        let detector = Arc::new(FailureDetector::new(
            gossip_interval,
            options.failure_sample_size(),
            options.conviction_threshold(),
        ));
        let gossiper = Arc::new(Gossiper::new(
            Arc::clone(&peer_map),
            Arc::clone(&transport),
            detector,
            options.seed.clone(),
            max_message_size,
            options.down_grace_period(),
        ));

        let handler_gossiper = Arc::clone(&gossiper);
        transport.start(Arc::new(move |packet| {
            handler_gossiper.on_packet(&packet.buf, &packet.from);
        }))?;

        let (stop_tx, stop_rx) = mpsc::channel();
        let scheduler_gossiper = Arc::clone(&gossiper);
        let scheduler = std::thread::Builder::new()
            .name("murmur-scheduler".to_string())
            .spawn(move || {
                run_scheduler(&scheduler_gossiper, &stop_rx, gossip_interval)
            })
            .map_err(TransportError::from)?;

        info!(addr = %bind_addr, "murmur node started");

        Ok(Murmur {
            peer_map,
            gossiper,
            transport,
            closed: AtomicBool::new(false),
            stop_scheduler: Mutex::new(Some(stop_tx)),
            scheduler: Mutex::new(Some(scheduler)),
        })
    }

    /// Addresses of the peers currently believed Up. Peers the failure
    /// detector has convicted are excluded until they recover.
    pub fn peers(&self, include_local: bool) -> Vec<String> {
        self.peer_map.addrs(include_local)
    }

    /// Looks up `key` in the known state of the peer at `addr`. The
    /// cluster state is eventually consistent, so this reflects the last
    /// gossip heard, not necessarily the peer's current state.
    pub fn lookup(&self, addr: &str, key: &str) -> Option<Vec<u8>> {
        self.peer_map.lookup(addr, key).map(|entry| entry.value)
    }

    /// Writes an entry into this node's own state, to be disseminated to
    /// the whole cluster. Rewriting the current value is a no-op.
    ///
    /// Keys and values are bounded by the wire format's 1-byte length
    /// prefixes; oversized writes are rejected with a warning.
    pub fn update_local(&self, key: &str, value: impl Into<Vec<u8>>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if key.len() > config::MAX_KEY_LEN {
            warn!(key, "dropping local update: key exceeds {} bytes", config::MAX_KEY_LEN);
            return;
        }
        let value = value.into();
        if value.len() > config::MAX_VALUE_LEN {
            warn!(key, len = value.len(), "dropping local update: value exceeds {} bytes", config::MAX_VALUE_LEN);
            return;
        }

        self.peer_map.update_local(key, value);
    }

    /// The address the transport actually bound, which is also this node's
    /// cluster identity. Differs from the `create` address when the OS
    /// assigned the port.
    pub fn bind_addr(&self) -> String {
        self.transport.bind_addr()
    }

    /// Runs one gossip round immediately, in addition to the scheduled
    /// cadence. Exposed for harnesses that want to drive convergence
    /// faster than the interval.
    pub fn gossip_now(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.gossiper.round();
    }

    /// Stops gossiping and tears the node down: transport first, so the
    /// reader goes quiet, then the scheduler. Idempotent; concurrent and
    /// repeated calls return `Ok` without effect.
    pub fn shutdown(&self) -> Result<(), NodeError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(addr = %self.transport.bind_addr(), "murmur node shutting down");

        self.transport.shutdown()?;

        // Dropping the sender is enough to wake the scheduler, but an
        // explicit send makes the exit immediate rather than waiting for
        // the current tick to elapse.
        if let Some(stop) = self.stop_scheduler.lock().take() {
            let _ = stop.send(());
        }
        if let Some(scheduler) = self.scheduler.lock().take() {
            let _ = scheduler.join();
        }

        info!(addr = %self.transport.bind_addr(), "murmur node stopped");
        Ok(())
    }
}

impl Drop for Murmur {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Ticks the gossip round until the stop channel fires (or every sender is
/// dropped, which only happens through `shutdown`).
fn run_scheduler(gossiper: &Gossiper, stop: &mpsc::Receiver<()>, interval: Duration) {
    loop {
        match stop.recv_timeout(interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => gossiper.round(),
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
