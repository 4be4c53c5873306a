//! # Peer Map
//!
//! This node's view of every peer in the cluster, including itself. The
//! map is the single shared resource of the whole protocol: the scheduler
//! reads it to build digests, the packet handler writes remote updates into
//! it, and the public API reads and writes the local peer through it.
//!
//! A readers-writer lock guards the map because the workload is heavily
//! read-biased: every gossip round snapshots digests and deltas, while
//! writes only happen on local updates and inbound messages.
//!
//! Membership callbacks are never invoked while the lock is held. Events
//! are collected under the lock and fired after it is released, so a
//! callback may freely re-enter the map (look state up, even write to it).

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::message::{Delta, Digest};
use crate::options::{EventHandler, UpdateHandler};
use crate::peer::{Peer, PeerEntry, PeerStatus};

pub struct PeerMap {
    /// Address of the local node. The local peer is created at startup,
    /// lives for the node's lifetime, and is the only peer whose clock this
    /// node advances.
    local_addr: String,
    peers: RwLock<HashMap<String, Peer>>,
    on_join: Option<EventHandler>,
    on_leave: Option<EventHandler>,
    on_update: Option<UpdateHandler>,
}

impl PeerMap {
    pub fn new(
        local_addr: impl Into<String>,
        on_join: Option<EventHandler>,
        on_leave: Option<EventHandler>,
        on_update: Option<UpdateHandler>,
    ) -> Self {
        let local_addr = local_addr.into();
        let mut peers = HashMap::new();
        peers.insert(local_addr.clone(), Peer::new(local_addr.clone()));
        PeerMap {
            local_addr,
            peers: RwLock::new(peers),
            on_join,
            on_leave,
            on_update,
        }
    }

    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// Writes an entry into the local peer, bumping its clock. A write of
    /// the current value is a no-op and does not bump the clock.
    pub fn update_local(&self, key: &str, value: Vec<u8>) {
        debug!(key, len = value.len(), "update local state");

        let mut peers = self.peers.write();
        if let Some(local) = peers.get_mut(&self.local_addr) {
            local.update_local(key, value);
        }
    }

    /// Looks up one key in one peer's known state.
    pub fn lookup(&self, addr: &str, key: &str) -> Option<PeerEntry> {
        self.peers.read().get(addr)?.lookup(key).cloned()
    }

    /// The highest version we hold for a peer; 0 for peers we have never
    /// seen, so a first exchange pulls their entire state.
    pub fn version(&self, addr: &str) -> u64 {
        self.peers.read().get(addr).map_or(0, Peer::version)
    }

    /// Snapshot of the Up peers' addresses.
    pub fn addrs(&self, include_local: bool) -> Vec<String> {
        self.peers
            .read()
            .values()
            .filter(|p| p.status() == PeerStatus::Up)
            .filter(|p| include_local || p.addr() != self.local_addr)
            .map(|p| p.addr().to_string())
            .collect()
    }

    /// Snapshot of the Down peers' addresses.
    pub fn down_addrs(&self) -> Vec<String> {
        self.peers
            .read()
            .values()
            .filter(|p| p.status() == PeerStatus::Down)
            .map(|p| p.addr().to_string())
            .collect()
    }

    /// Snapshot of every known peer's address, Up or Down. Digest syncs use
    /// this view so even a suspected peer's state version keeps
    /// circulating.
    pub fn known_addrs(&self, include_local: bool) -> Vec<String> {
        self.peers
            .read()
            .values()
            .filter(|p| include_local || p.addr() != self.local_addr)
            .map(|p| p.addr().to_string())
            .collect()
    }

    /// The digest record for one peer, if known.
    pub fn digest(&self, addr: &str) -> Option<Digest> {
        self.peers.read().get(addr).map(Peer::digest)
    }

    /// Entries of `addr` newer than `since`, ascending by version.
    pub fn deltas(&self, addr: &str, since: u64) -> Vec<Delta> {
        self.peers
            .read()
            .get(addr)
            .map_or_else(Vec::new, |p| p.deltas(since))
    }

    /// Absorbs a digest record: an unknown peer is created with version 0
    /// so the next exchange pulls all of its entries. Known state is never
    /// overwritten from a digest; versions only move on deltas.
    pub fn apply_digest(&self, digest: &Digest) {
        let mut joined = false;
        {
            let mut peers = self.peers.write();
            peers.entry(digest.addr.clone()).or_insert_with(|| {
                joined = true;
                Peer::new(digest.addr.clone())
            });
        }

        if joined {
            info!(addr = %digest.addr, "peer joined");
            if let Some(cb) = &self.on_join {
                cb(&digest.addr);
            }
        }
    }

    /// Absorbs a delta record. Deltas about the local peer are dropped;
    /// this node is authoritative for its own state. An unknown owner is
    /// created first (a truncated digest sync can race a delta from a
    /// third node).
    pub fn apply_delta(&self, delta: &Delta) {
        if delta.addr == self.local_addr {
            warn!(addr = %delta.addr, key = %delta.key, "dropping delta about the local peer");
            return;
        }

        let mut joined = false;
        let accepted;
        {
            let mut peers = self.peers.write();
            let peer = peers.entry(delta.addr.clone()).or_insert_with(|| {
                joined = true;
                Peer::new(delta.addr.clone())
            });
            accepted = peer.update_remote(&delta.key, delta.value.clone(), delta.version);
        }

        if joined {
            info!(addr = %delta.addr, "peer joined");
            if let Some(cb) = &self.on_join {
                cb(&delta.addr);
            }
        }
        if accepted {
            debug!(addr = %delta.addr, key = %delta.key, version = delta.version, "applied delta");
            if let Some(cb) = &self.on_update {
                cb(&delta.addr, &delta.key, &delta.value);
            }
        }
    }

    /// Marks a peer Up. Fires `on_join` only on a Down-to-Up transition;
    /// repeated reports are no-ops. The local peer is always Up.
    pub fn set_status_up(&self, addr: &str) {
        let mut transitioned = false;
        {
            let mut peers = self.peers.write();
            if let Some(peer) = peers.get_mut(addr) {
                if peer.status() != PeerStatus::Up {
                    peer.set_status_up();
                    transitioned = true;
                }
            }
        }

        if transitioned {
            info!(addr, "peer recovered");
            if let Some(cb) = &self.on_join {
                cb(addr);
            }
        }
    }

    /// Marks a peer Down with an eviction deadline. Fires `on_leave` only
    /// on an Up-to-Down transition; repeated convictions keep the original
    /// deadline. A no-op for the local peer.
    pub fn set_status_down(&self, addr: &str, expiry: Instant) {
        if addr == self.local_addr {
            return;
        }

        let mut transitioned = false;
        {
            let mut peers = self.peers.write();
            if let Some(peer) = peers.get_mut(addr) {
                if peer.status() != PeerStatus::Down {
                    peer.set_status_down(expiry);
                    transitioned = true;
                }
            }
        }

        if transitioned {
            info!(addr, "peer down");
            if let Some(cb) = &self.on_leave {
                cb(addr);
            }
        }
    }

    /// Evicts every Down peer whose expiry has passed. Returns the evicted
    /// addresses so the caller can purge their failure-detector windows.
    pub fn remove_expired_peers(&self, now: Instant) -> Vec<String> {
        let mut removed = Vec::new();
        {
            let mut peers = self.peers.write();
            peers.retain(|addr, peer| {
                let expired = peer.status() == PeerStatus::Down
                    && peer.expiry().is_some_and(|expiry| expiry <= now);
                if expired {
                    removed.push(addr.clone());
                }
                !expired
            });
        }

        for addr in &removed {
            info!(addr, "removed expired peer");
        }
        removed
    }

    /// Whether two maps hold element-wise identical peer state. Test and
    /// harness helper.
    pub fn same_state(&self, other: &PeerMap) -> bool {
        let ours = self.peers.read();
        let theirs = other.peers.read();
        ours.len() == theirs.len()
            && ours
                .iter()
                .all(|(addr, peer)| theirs.get(addr).is_some_and(|o| peer.same_state(o)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
