//! # Gossiper
//!
//! The protocol state machine. Owns the wire-level behavior: building
//! MTU-bounded digest syncs, answering them with deltas, and running the
//! periodic gossip round that drives anti-entropy, failure detection, and
//! peer eviction.
//!
//! ## Packing and fairness
//!
//! A digest sync covers every known peer, but the packet budget may not
//! hold them all. The peer list is shuffled before packing so that, over
//! repeated rounds, every peer lands in some packet; a stable order would
//! starve the tail forever.
//!
//! Deltas are packed most-behind-peer first (largest version gap), and
//! within one peer in strictly ascending version order. Ascending order is
//! what makes truncation safe: any prefix the wire delivers is gap-free,
//! and the receiver's next digest re-requests from wherever it stopped.
//!
//! ## Ping-pong suppression
//!
//! A DigestRequest is answered with deltas plus our own DigestResponse; a
//! DigestResponse is answered with deltas only. Responses never trigger
//! responses: that one rule is all that stands between this protocol and
//! an infinite digest exchange. The response is sent even when both sides
//! are identical, because it doubles as a liveness signal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::codec;
use crate::config;
use crate::failure::FailureDetector;
use crate::message::{Digest, MessageKind};
use crate::options::SeedProvider;
use crate::peer::PeerStatus;
use crate::peermap::PeerMap;
use crate::transport::Transport;

/// How far behind a digest's sender is on one peer's state.
struct VersionGap {
    addr: String,
    /// `our_version - their_version`; larger means more missing data.
    gap: u64,
    their_version: u64,
}

pub struct Gossiper {
    peer_map: Arc<PeerMap>,
    transport: Arc<dyn Transport>,
    detector: Arc<FailureDetector>,
    seed: Option<SeedProvider>,
    max_message_size: usize,
    down_grace_period: Duration,
    rounds: AtomicU64,
}

impl Gossiper {
    pub fn new(
        peer_map: Arc<PeerMap>,
        transport: Arc<dyn Transport>,
        detector: Arc<FailureDetector>,
        seed: Option<SeedProvider>,
        max_message_size: usize,
        down_grace_period: Duration,
    ) -> Self {
        Gossiper {
            peer_map,
            transport,
            detector,
            seed,
            max_message_size,
            down_grace_period,
            rounds: AtomicU64::new(0),
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Entry point for every inbound datagram. Any packet from an address
    /// counts as a heartbeat for it, valid or not.
    pub fn on_packet(&self, buf: &[u8], from: &str) {
        self.detector.report(from);

        let (kind, payload) = match codec::decode_kind(buf) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(from, error = %e, "dropping undecodable packet");
                return;
            }
        };

        match kind {
            MessageKind::DigestRequest => match codec::decode_digest_sync(payload) {
                Ok(sync) => {
                    debug!(from, digests = sync.len(), "received digest request");
                    self.handle_digest_sync(&sync, from, true);
                }
                Err(e) => warn!(from, error = %e, "dropping invalid digest request"),
            },
            MessageKind::DigestResponse => match codec::decode_digest_sync(payload) {
                Ok(sync) => {
                    debug!(from, digests = sync.len(), "received digest response");
                    self.handle_digest_sync(&sync, from, false);
                }
                Err(e) => warn!(from, error = %e, "dropping invalid digest response"),
            },
            MessageKind::Delta => match codec::decode_delta_sync(payload) {
                Ok(sync) => {
                    debug!(from, deltas = sync.len(), "received delta");
                    for delta in &sync {
                        self.peer_map.apply_delta(delta);
                    }
                }
                Err(e) => warn!(from, error = %e, "dropping invalid delta"),
            },
        }
    }

    fn handle_digest_sync(&self, sync: &[Digest], from: &str, respond: bool) {
        // First observation of any peer in the sync joins it with version 0
        // so the next exchange pulls its whole state. Known peers are
        // untouched; a digest never overwrites state.
        for digest in sync {
            self.peer_map.apply_digest(digest);
        }

        self.send_deltas(sync, from);

        if respond {
            self.send_digest_response(from);
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Opens a digest exchange with `addr`.
    pub fn send_digest_request(&self, addr: &str) {
        debug!(addr, "sending digest request");
        self.send_digest_sync(addr, MessageKind::DigestRequest);
    }

    fn send_digest_response(&self, addr: &str) {
        debug!(addr, "sending digest response");
        self.send_digest_sync(addr, MessageKind::DigestResponse);
    }

    fn send_digest_sync(&self, addr: &str, kind: MessageKind) {
        let mut peer_addrs = self.peer_map.known_addrs(true);
        peer_addrs.shuffle(&mut rand::thread_rng());

        let mut buf = vec![kind.as_byte()];
        for peer_addr in &peer_addrs {
            // The peer can be evicted between the snapshot and here.
            let Some(digest) = self.peer_map.digest(peer_addr) else {
                continue;
            };
            if buf.len() + codec::digest_len(&digest) > self.max_message_size {
                break;
            }
            codec::encode_digest(&mut buf, &digest);
        }

        self.send(&buf, addr);
    }

    /// Answers a digest sync with the entries its sender is missing, packed
    /// most-behind peer first, capped at the message budget.
    fn send_deltas(&self, sync: &[Digest], addr: &str) {
        let mut buf = vec![MessageKind::Delta.as_byte()];
        'packing: for gap in self.version_gaps(sync) {
            for delta in self.peer_map.deltas(&gap.addr, gap.their_version) {
                if buf.len() + codec::delta_len(&delta) > self.max_message_size {
                    // Stop entirely: skipping within a peer's ascending run
                    // would hand the receiver a version gap.
                    break 'packing;
                }
                codec::encode_delta(&mut buf, &delta);
            }
        }

        // An empty delta message carries no information; the digest
        // response already proves liveness.
        if buf.len() > 1 {
            debug!(addr, bytes = buf.len(), "sending deltas");
            self.send(&buf, addr);
        }
    }

    /// The peers the digest's sender is behind on, sorted so the largest
    /// version gap is served first. Starvation of the tail is prevented by
    /// the sender re-shuffling its digest every round, not here.
    fn version_gaps(&self, sync: &[Digest]) -> Vec<VersionGap> {
        let mut gaps: Vec<VersionGap> = sync
            .iter()
            .filter_map(|digest| {
                let our_version = self.peer_map.version(&digest.addr);
                (digest.version < our_version).then(|| VersionGap {
                    addr: digest.addr.clone(),
                    gap: our_version - digest.version,
                    their_version: digest.version,
                })
            })
            .collect();
        gaps.sort_by(|a, b| b.gap.cmp(&a.gap));
        gaps
    }

    fn send(&self, buf: &[u8], addr: &str) {
        // Best effort over a lossy channel: a failed send is
        // indistinguishable from a dropped datagram, and the next round
        // retries naturally.
        if let Err(e) = self.transport.send(buf, addr) {
            warn!(addr, error = %e, "transport send failed");
        }
    }

    // -----------------------------------------------------------------------
    // Gossip round
    // -----------------------------------------------------------------------

    /// Executes one gossip round. Called by the scheduler every interval.
    pub fn round(&self) {
        let round = self.rounds.fetch_add(1, Ordering::Relaxed);

        let up_peers = self.peer_map.addrs(false);
        if up_peers.is_empty() {
            self.seed_cluster();
        } else if let Some(addr) = up_peers.choose(&mut rand::thread_rng()) {
            self.send_digest_request(addr);
        }

        // Liveness housekeeping runs even while re-seeding, or a view in
        // which every peer went Down could never recover or expire.
        self.sweep_statuses();

        if round % config::DOWN_PROBE_ROUND_INTERVAL == 0 {
            if let Some(addr) = self.peer_map.down_addrs().choose(&mut rand::thread_rng()) {
                debug!(addr = %addr, "probing down peer");
                self.send_digest_request(addr);
            }
        }

        for addr in self.peer_map.remove_expired_peers(Instant::now()) {
            self.detector.remove(&addr);
        }
    }

    /// Reclassifies every known remote peer from its current phi.
    fn sweep_statuses(&self) {
        let now = Instant::now();
        for addr in self.peer_map.known_addrs(false) {
            match self.detector.status(&addr) {
                PeerStatus::Up => self.peer_map.set_status_up(&addr),
                PeerStatus::Down => self
                    .peer_map
                    .set_status_down(&addr, now + self.down_grace_period),
            }
        }
    }

    /// Asks the seed callback for bootstrap addresses and opens an exchange
    /// with each. Without a callback the node waits to be contacted.
    fn seed_cluster(&self) {
        let Some(seed) = &self.seed else {
            debug!("no live peers and no seed callback; waiting to be contacted");
            return;
        };

        let bind_addr = self.transport.bind_addr();
        for addr in seed() {
            if addr == bind_addr {
                continue;
            }
            debug!(addr = %addr, "contacting seed");
            self.send_digest_request(&addr);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Delta;
    use crate::transport::{PacketHandler, TransportError};
    use parking_lot::Mutex;

    /// Routes every send to a fixed partner gossiper, labelled with this
    /// side's address. The handler indirection of a real transport is
    /// unnecessary when the test can call `on_packet` directly.
    struct PairTransport {
        addr: String,
        partner: Mutex<Option<Arc<Gossiper>>>,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl PairTransport {
        fn new(addr: &str) -> Arc<Self> {
            Arc::new(PairTransport {
                addr: addr.to_string(),
                partner: Mutex::new(None),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn connect(&self, partner: &Arc<Gossiper>) {
            *self.partner.lock() = Some(Arc::clone(partner));
        }

        fn sent_kinds(&self) -> Vec<u8> {
            self.sent.lock().iter().map(|buf| buf[0]).collect()
        }
    }

    impl Transport for PairTransport {
        fn start(&self, _handler: PacketHandler) -> Result<(), TransportError> {
            Ok(())
        }

        fn send(&self, buf: &[u8], _addr: &str) -> Result<(), TransportError> {
            self.sent.lock().push(buf.to_vec());
            // Deliver without holding the partner lock: the receive chain
            // can re-enter this transport to send a reply.
            let partner = self.partner.lock().clone();
            if let Some(partner) = partner {
                partner.on_packet(buf, &self.addr);
            }
            Ok(())
        }

        fn bind_addr(&self) -> String {
            self.addr.clone()
        }

        fn shutdown(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn gossiper(
        local_addr: &str,
        transport: Arc<dyn Transport>,
        max_message_size: usize,
    ) -> Arc<Gossiper> {
        let peer_map = Arc::new(PeerMap::new(local_addr, None, None, None));
        let detector = Arc::new(FailureDetector::new(
            Duration::from_millis(500),
            config::DEFAULT_FAILURE_SAMPLE_SIZE,
            config::DEFAULT_CONVICTION_THRESHOLD,
        ));
        Arc::new(Gossiper::new(
            peer_map,
            transport,
            detector,
            None,
            max_message_size,
            config::DEFAULT_DOWN_GRACE_PERIOD,
        ))
    }

    fn load_local_entries(g: &Gossiper, prefix: &str, count: usize) {
        for i in 0..count {
            g.peer_map
                .update_local(&format!("{prefix}-{i:04}"), format!("v-{i}").into_bytes());
        }
    }

    fn wired_pair(
        max_message_size: usize,
    ) -> (Arc<Gossiper>, Arc<Gossiper>, Arc<PairTransport>, Arc<PairTransport>) {
        let ta = PairTransport::new("10.0.0.1:7946");
        let tb = PairTransport::new("10.0.0.2:7946");
        let a = gossiper("10.0.0.1:7946", ta.clone(), max_message_size);
        let b = gossiper("10.0.0.2:7946", tb.clone(), max_message_size);
        ta.connect(&b);
        tb.connect(&a);
        (a, b, ta, tb)
    }

    #[test]
    fn two_gossipers_converge_across_message_sizes() {
        for max_message_size in (200..1_000).step_by(100) {
            let (a, b, _ta, _tb) = wired_pair(max_message_size);
            load_local_entries(&a, "alpha", 12);
            load_local_entries(&b, "beta", 12);

            let mut converged = false;
            for _ in 0..50 {
                a.send_digest_request("10.0.0.2:7946");
                b.send_digest_request("10.0.0.1:7946");
                if a.peer_map.same_state(&b.peer_map) {
                    converged = true;
                    break;
                }
            }
            assert!(
                converged,
                "no convergence at max_message_size={max_message_size}"
            );
        }
    }

    #[test]
    fn large_state_converges_through_truncated_packets() {
        // Each side holds far more state than one 512-byte datagram can
        // carry, so convergence must happen through gap-free prefixes over
        // many exchanges.
        let (a, b, _ta, _tb) = wired_pair(512);
        load_local_entries(&a, "alpha", 1_000);
        load_local_entries(&b, "beta", 1_000);

        let mut rounds = 0;
        while !a.peer_map.same_state(&b.peer_map) {
            rounds += 1;
            assert!(rounds <= 200, "not converged after 200 rounds");
            a.send_digest_request("10.0.0.2:7946");
            b.send_digest_request("10.0.0.1:7946");
        }

        assert_eq!(a.peer_map.version("10.0.0.2:7946"), 1_000);
        assert_eq!(b.peer_map.version("10.0.0.1:7946"), 1_000);
    }

    #[test]
    fn versions_never_regress_during_convergence() {
        let (a, b, _ta, _tb) = wired_pair(512);
        load_local_entries(&b, "beta", 300);

        let mut last_version = 0;
        for _ in 0..100 {
            a.send_digest_request("10.0.0.2:7946");
            let version = a.peer_map.version("10.0.0.2:7946");
            assert!(version >= last_version, "version rolled back");
            last_version = version;
        }
        assert_eq!(last_version, 300);
    }

    #[test]
    fn responses_do_not_trigger_responses() {
        let (a, _b, ta, tb) = wired_pair(512);

        a.send_digest_request("10.0.0.2:7946");

        let a_kinds = ta.sent_kinds();
        let b_kinds = tb.sent_kinds();

        // A sent exactly one digest message: the original request.
        assert_eq!(
            a_kinds
                .iter()
                .filter(|&&k| k != MessageKind::Delta.as_byte())
                .count(),
            1
        );
        assert_eq!(a_kinds[0], MessageKind::DigestRequest.as_byte());

        // B answered with exactly one digest response (sent even though
        // neither side had data for the other, since it proves liveness)
        // and nothing further.
        assert_eq!(b_kinds, vec![MessageKind::DigestResponse.as_byte()]);
    }

    #[test]
    fn truncated_digests_eventually_cover_every_peer() {
        // A budget of 160 bytes fits ~6 digest records, with 30 known
        // peers. Shuffling must give every peer wire time across rounds.
        let ta = PairTransport::new("10.0.0.1:7946");
        let a = gossiper("10.0.0.1:7946", ta.clone(), 160);
        for i in 0..30 {
            a.peer_map.apply_digest(&Digest {
                addr: format!("10.0.1.{i}:7946"),
                version: 0,
            });
        }

        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            a.send_digest_request("10.0.99.99:7946");
        }
        for buf in ta.sent.lock().iter() {
            assert!(buf.len() <= 160);
            for digest in codec::decode_digest_sync(&buf[1..]).unwrap() {
                seen.insert(digest.addr);
            }
        }

        // 31 known peers including the local node.
        assert_eq!(seen.len(), 31);
    }

    #[test]
    fn stale_deltas_lose_to_newer_versions() {
        let ta = PairTransport::new("10.0.0.1:7946");
        let a = gossiper("10.0.0.1:7946", ta.clone(), 512);

        let send = |key: &str, value: &[u8], version: u64| {
            let mut buf = vec![MessageKind::Delta.as_byte()];
            codec::encode_delta(
                &mut buf,
                &Delta {
                    addr: "10.0.5.5:7946".to_string(),
                    key: key.to_string(),
                    value: value.to_vec(),
                    version,
                },
            );
            a.on_packet(&buf, "10.0.5.5:7946");
        };

        send("k", b"old", 10);
        send("k", b"new", 20);
        send("k", b"stale", 5);

        let entry = a.peer_map.lookup("10.0.5.5:7946", "k").unwrap();
        assert_eq!(entry.value, b"new");
        assert_eq!(entry.version, 20);
    }

    #[test]
    fn own_state_is_never_overwritten_by_inbound_deltas() {
        let ta = PairTransport::new("10.0.0.1:7946");
        let a = gossiper("10.0.0.1:7946", ta.clone(), 512);
        a.peer_map.update_local("k", b"mine".to_vec());

        let mut buf = vec![MessageKind::Delta.as_byte()];
        codec::encode_delta(
            &mut buf,
            &Delta {
                addr: "10.0.0.1:7946".to_string(),
                key: "k".to_string(),
                value: b"forged".to_vec(),
                version: 99,
            },
        );
        a.on_packet(&buf, "10.0.6.6:7946");

        let entry = a.peer_map.lookup("10.0.0.1:7946", "k").unwrap();
        assert_eq!(entry.value, b"mine");
        assert_eq!(entry.version, 1);
    }

    #[test]
    fn undecodable_packets_are_dropped_without_reply() {
        let (a, _b, ta, _tb) = wired_pair(512);

        a.on_packet(&[], "10.0.7.7:7946");
        a.on_packet(&[0xAB, 1, 2, 3], "10.0.7.7:7946");
        // A truncated digest request payload.
        a.on_packet(&[MessageKind::DigestRequest.as_byte(), 9, b'x'], "10.0.7.7:7946");

        assert!(ta.sent.lock().is_empty());
    }

    #[test]
    fn delta_packets_respect_the_message_budget() {
        let (a, _b, ta, _tb) = wired_pair(256);
        load_local_entries(&a, "alpha", 200);

        // B asks for everything A has.
        let mut buf = vec![MessageKind::DigestRequest.as_byte()];
        codec::encode_digest(
            &mut buf,
            &Digest {
                addr: "10.0.0.1:7946".to_string(),
                version: 0,
            },
        );
        a.on_packet(&buf, "10.0.0.2:7946");

        let sent = ta.sent.lock();
        let delta_packets: Vec<_> = sent
            .iter()
            .filter(|p| p[0] == MessageKind::Delta.as_byte())
            .collect();
        assert!(!delta_packets.is_empty());
        for packet in &delta_packets {
            assert!(packet.len() <= 256);
            // The packed prefix is strictly ascending, hence gap-free.
            let deltas = codec::decode_delta_sync(&packet[1..]).unwrap();
            let versions: Vec<u64> = deltas.iter().map(|d| d.version).collect();
            let mut sorted = versions.clone();
            sorted.sort_unstable();
            assert_eq!(versions, sorted);
            assert_eq!(versions[0], 1);
        }
    }

    #[test]
    fn seed_callback_is_used_when_no_peers_are_up() {
        let ta = PairTransport::new("10.0.0.1:7946");
        let peer_map = Arc::new(PeerMap::new("10.0.0.1:7946", None, None, None));
        let detector = Arc::new(FailureDetector::new(
            Duration::from_millis(500),
            16,
            config::DEFAULT_CONVICTION_THRESHOLD,
        ));
        let g = Gossiper::new(
            peer_map,
            ta.clone(),
            detector,
            Some(Arc::new(|| {
                vec![
                    "10.0.0.1:7946".to_string(), // ourselves; must be skipped
                    "10.0.0.9:7946".to_string(),
                ]
            })),
            512,
            config::DEFAULT_DOWN_GRACE_PERIOD,
        );

        g.round();

        let sent = ta.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][0], MessageKind::DigestRequest.as_byte());
    }
}
