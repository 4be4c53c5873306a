//! # Per-Peer Versioned State
//!
//! A [`Peer`] is one node's state as seen from here: a key/value store where
//! every entry carries the version at which the owning node wrote it, plus
//! an Up/Down status maintained by the failure detector.
//!
//! Versions are a Lamport-style logical clock local to the owning node. The
//! peer's headline `version` is always the highest entry version, which is
//! what digests advertise and what reconciliation compares.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::message::{Delta, Digest};

// ---------------------------------------------------------------------------
// PeerStatus
// ---------------------------------------------------------------------------

/// Liveness verdict for a peer, as decided by the failure detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    /// The peer is believed alive and participates in gossip.
    Up,
    /// The peer is suspected dead. It is excluded from partner selection
    /// and will be evicted once its expiry passes without recovery.
    Down,
}

// ---------------------------------------------------------------------------
// PeerEntry
// ---------------------------------------------------------------------------

/// One key's value and the version at which the owner wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    /// Opaque value bytes.
    pub value: Vec<u8>,
    /// Owner's logical clock at the time of the write. Strictly increasing
    /// per key; an observer never sees an entry roll back.
    pub version: u64,
}

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

/// The state of a single peer. Not synchronized; the owning
/// [`crate::PeerMap`] serializes all access.
#[derive(Debug)]
pub struct Peer {
    addr: String,
    /// Highest version across all entries. Starts at 0, meaning "no known
    /// state", which makes a fresh peer pull everything on its first sync.
    version: u64,
    entries: HashMap<String, PeerEntry>,
    status: PeerStatus,
    /// When a Down peer should be evicted if it hasn't recovered. Only
    /// meaningful while `status == Down`.
    expiry: Option<Instant>,
}

impl Peer {
    /// Creates a peer with no known state (version 0) and Up status.
    pub fn new(addr: impl Into<String>) -> Self {
        Peer {
            addr: addr.into(),
            version: 0,
            entries: HashMap::new(),
            status: PeerStatus::Up,
            expiry: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn status(&self) -> PeerStatus {
        self.status
    }

    pub fn expiry(&self) -> Option<Instant> {
        self.expiry
    }

    /// Marks the peer Up and clears any pending eviction.
    pub fn set_status_up(&mut self) {
        self.status = PeerStatus::Up;
        self.expiry = None;
    }

    /// Marks the peer Down with an eviction deadline. A no-op if the peer
    /// is already Down: repeated conviction must not push the original
    /// expiry further out.
    pub fn set_status_down(&mut self, expiry: Instant) {
        if self.status == PeerStatus::Down {
            return;
        }
        self.status = PeerStatus::Down;
        self.expiry = Some(expiry);
    }

    pub fn lookup(&self, key: &str) -> Option<&PeerEntry> {
        self.entries.get(key)
    }

    /// Applies a write from the local node, which owns this peer's clock.
    /// Writing the current value again is a no-op so unchanged state is
    /// never re-propagated around the cluster.
    pub fn update_local(&mut self, key: &str, value: Vec<u8>) {
        if let Some(entry) = self.entries.get(key) {
            if entry.value == value {
                return;
            }
        }

        self.version += 1;
        self.entries.insert(
            key.to_string(),
            PeerEntry {
                value,
                version: self.version,
            },
        );
    }

    /// Applies an entry learned from a remote node. Discards the update if
    /// we already hold that key at the same or a newer version. Returns
    /// whether the entry was accepted.
    ///
    /// Never invoked on the locally owned peer; the local node is
    /// authoritative for its own state.
    pub fn update_remote(&mut self, key: &str, value: Vec<u8>, version: u64) -> bool {
        if let Some(entry) = self.entries.get(key) {
            if version <= entry.version {
                return false;
            }
        }

        self.entries.insert(key.to_string(), PeerEntry { value, version });
        if version > self.version {
            self.version = version;
        }
        true
    }

    /// The digest record advertising this peer's state.
    pub fn digest(&self) -> Digest {
        Digest {
            addr: self.addr.clone(),
            version: self.version,
        }
    }

    /// Every entry newer than `since`, ordered by ascending version.
    ///
    /// The ordering matters: a delta message may be truncated at the MTU,
    /// and an ascending prefix leaves the receiver gap-free. Its next
    /// digest simply re-requests from the last version it installed.
    pub fn deltas(&self, since: u64) -> Vec<Delta> {
        let mut deltas: Vec<Delta> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.version > since)
            .map(|(key, entry)| Delta {
                addr: self.addr.clone(),
                key: key.clone(),
                value: entry.value.clone(),
                version: entry.version,
            })
            .collect();
        deltas.sort_by_key(|d| d.version);
        deltas
    }

    /// Whether two peers hold identical state. Used by convergence tests
    /// and the cluster harness; status is deliberately ignored because two
    /// healthy nodes can disagree about a third's liveness while agreeing
    /// on its state.
    pub fn same_state(&self, other: &Peer) -> bool {
        self.addr == other.addr && self.version == other.version && self.entries == other.entries
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn local_updates_increment_version_by_one() {
        let mut peer = Peer::new("10.0.0.1:8000");
        assert_eq!(peer.version(), 0);

        peer.update_local("a", b"1".to_vec());
        peer.update_local("b", b"2".to_vec());
        peer.update_local("a", b"3".to_vec());

        assert_eq!(peer.version(), 3);
        assert_eq!(peer.lookup("a").unwrap().version, 3);
        assert_eq!(peer.lookup("a").unwrap().value, b"3");
        assert_eq!(peer.lookup("b").unwrap().version, 2);
    }

    #[test]
    fn rewriting_same_value_is_a_no_op() {
        let mut peer = Peer::new("10.0.0.1:8000");
        peer.update_local("a", b"1".to_vec());
        peer.update_local("a", b"1".to_vec());

        assert_eq!(peer.version(), 1);
        assert_eq!(peer.lookup("a").unwrap().version, 1);
    }

    #[test]
    fn remote_update_discards_stale_versions() {
        let mut peer = Peer::new("10.0.0.2:8000");
        assert!(peer.update_remote("k", b"new".to_vec(), 20));
        assert!(!peer.update_remote("k", b"stale".to_vec(), 5));
        assert!(!peer.update_remote("k", b"same".to_vec(), 20));

        assert_eq!(peer.lookup("k").unwrap().value, b"new");
        assert_eq!(peer.lookup("k").unwrap().version, 20);
        assert_eq!(peer.version(), 20);
    }

    #[test]
    fn remote_update_raises_peer_version_monotonically() {
        let mut peer = Peer::new("10.0.0.2:8000");
        peer.update_remote("a", b"1".to_vec(), 7);
        assert_eq!(peer.version(), 7);
        // A lower-versioned entry for a different key must not pull the
        // headline version back down.
        peer.update_remote("b", b"2".to_vec(), 3);
        assert_eq!(peer.version(), 7);
    }

    #[test]
    fn deltas_are_ascending_and_filtered() {
        let mut peer = Peer::new("10.0.0.3:8000");
        for (key, version) in [("c", 9u64), ("a", 3), ("d", 12), ("b", 6)] {
            peer.update_remote(key, key.as_bytes().to_vec(), version);
        }

        let deltas = peer.deltas(3);
        let versions: Vec<u64> = deltas.iter().map(|d| d.version).collect();
        assert_eq!(versions, vec![6, 9, 12]);
        assert!(deltas.iter().all(|d| d.version > 3));
        assert!(deltas.iter().all(|d| d.addr == "10.0.0.3:8000"));
    }

    #[test]
    fn deltas_since_current_version_are_empty() {
        let mut peer = Peer::new("10.0.0.3:8000");
        peer.update_local("a", b"1".to_vec());
        assert!(peer.deltas(peer.version()).is_empty());
    }

    #[test]
    fn down_status_preserves_original_expiry() {
        let mut peer = Peer::new("10.0.0.4:8000");
        let first = Instant::now() + Duration::from_secs(30);
        let later = first + Duration::from_secs(30);

        peer.set_status_down(first);
        peer.set_status_down(later);
        assert_eq!(peer.status(), PeerStatus::Down);
        assert_eq!(peer.expiry(), Some(first));

        peer.set_status_up();
        assert_eq!(peer.status(), PeerStatus::Up);
        assert_eq!(peer.expiry(), None);
    }

    #[test]
    fn digest_reflects_headline_version() {
        let mut peer = Peer::new("10.0.0.5:8000");
        peer.update_local("a", b"1".to_vec());
        peer.update_local("b", b"2".to_vec());

        let digest = peer.digest();
        assert_eq!(digest.addr, "10.0.0.5:8000");
        assert_eq!(digest.version, 2);
    }

    #[test]
    fn same_state_ignores_status() {
        let mut a = Peer::new("10.0.0.6:8000");
        let mut b = Peer::new("10.0.0.6:8000");
        a.update_remote("k", b"v".to_vec(), 4);
        b.update_remote("k", b"v".to_vec(), 4);
        b.set_status_down(Instant::now());

        assert!(a.same_state(&b));

        b.update_remote("k2", b"v2".to_vec(), 5);
        assert!(!a.same_state(&b));
    }
}
