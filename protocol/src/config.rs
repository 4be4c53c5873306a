//! # Protocol Configuration & Constants
//!
//! Every magic number in murmur lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! Most of these have runtime overrides in [`crate::Options`]; the constants
//! are the defaults and the hard wire-format bounds. The wire bounds
//! (`MAX_ADDR_LEN` and friends) are not tunable; they are baked into the
//! 1-byte length prefixes of the datagram encoding, and changing them is a
//! cluster-wide flag day.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Gossip Timing
// ---------------------------------------------------------------------------

/// Time between gossip rounds. Every tick the node picks one random live
/// peer and initiates a digest exchange. 500ms converges a small cluster in
/// a couple of seconds while keeping background traffic negligible.
pub const DEFAULT_GOSSIP_INTERVAL: Duration = Duration::from_millis(500);

/// How long an unrecovered Down peer is kept around before being evicted
/// from the peer map. Long enough to ride out a restart or a transient
/// partition; short enough that a decommissioned node doesn't haunt digests
/// forever.
pub const DEFAULT_DOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// A random Down peer is probed with a digest request every this many
/// rounds. Probing lets us notice a peer coming back even when it lost its
/// own state and doesn't know to contact us.
pub const DOWN_PROBE_ROUND_INTERVAL: u64 = 3;

// ---------------------------------------------------------------------------
// Failure Detection (Phi Accrual)
// ---------------------------------------------------------------------------

/// Phi value above which a peer is convicted as Down. With regular
/// heartbeats this corresponds to roughly 8 missed gossip intervals:
/// aggressive enough to notice real failures in a few seconds, lax enough
/// to shrug off scheduler hiccups and dropped datagrams.
pub const DEFAULT_CONVICTION_THRESHOLD: f64 = 8.0;

/// Number of inter-arrival samples kept per peer endpoint. 1,000 samples at
/// one arrival per round is several minutes of history, which smooths out
/// bursty arrival patterns without letting ancient history dominate.
pub const DEFAULT_FAILURE_SAMPLE_SIZE: usize = 1_000;

/// The first observation of an endpoint seeds its arrival window with
/// `BOOTSTRAP_INTERVAL_FACTOR x gossip_interval` so a freshly discovered
/// peer is not immediately suspected before it has any history.
pub const BOOTSTRAP_INTERVAL_FACTOR: u32 = 2;

// ---------------------------------------------------------------------------
// Wire Format Bounds
// ---------------------------------------------------------------------------

/// Maximum encoded message size per datagram. Keep this under the path MTU
/// minus IP/UDP overhead. The transport never fragments, so anything
/// larger is silently at the mercy of the network. 512 bytes is safe
/// everywhere; raise it toward 1,400 on networks you control.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 512;

/// Addresses are length-prefixed with a single byte on the wire.
pub const MAX_ADDR_LEN: usize = 0xff;

/// State keys are length-prefixed with a single byte on the wire.
pub const MAX_KEY_LEN: usize = 0xff;

/// State values are length-prefixed with a single byte on the wire.
pub const MAX_VALUE_LEN: usize = 0xff;

// ---------------------------------------------------------------------------
// UDP Transport
// ---------------------------------------------------------------------------

/// Receive buffer size for a single datagram read. 64 KiB covers the
/// largest possible UDP payload, so a misconfigured (oversized)
/// `max_message_size` on a remote node degrades to a decode error rather
/// than a truncated read.
pub const UDP_PACKET_BUF_SIZE: usize = 65_536;

/// How long a blocking read waits before re-checking the shutdown flag.
/// This bounds how long `shutdown()` can take to join the reader thread.
pub const UDP_READ_TIMEOUT: Duration = Duration::from_millis(250);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_bounds_fit_one_byte_prefixes() {
        assert!(MAX_ADDR_LEN <= 0xff);
        assert!(MAX_KEY_LEN <= 0xff);
        assert!(MAX_VALUE_LEN <= 0xff);
    }

    #[test]
    fn default_message_size_holds_a_full_record() {
        // A digest record for a maximal address must fit in the default
        // message budget, or a node with a long hostname could never
        // announce itself.
        assert!(DEFAULT_MAX_MESSAGE_SIZE > 1 + 1 + MAX_ADDR_LEN + 8);
    }

    #[test]
    fn timing_constants_sanity() {
        assert!(DEFAULT_GOSSIP_INTERVAL < DEFAULT_DOWN_GRACE_PERIOD);
        assert!(UDP_READ_TIMEOUT < DEFAULT_DOWN_GRACE_PERIOD);
        assert!(DOWN_PROBE_ROUND_INTERVAL > 0);
    }
}
