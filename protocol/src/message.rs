//! # Wire Message Types
//!
//! The three datagram kinds exchanged by the gossip protocol and the two
//! record types they carry. A digest sync (request or response) is a list
//! of [`Digest`] records; a delta message is a list of [`Delta`] records.
//!
//! Peers are identified by their transport bind address, so both record
//! types carry the owning peer's address rather than a separate node id.
//! The binary layout lives in [`crate::codec`].

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// Datagram type, carried as the first byte of every message.
///
/// The request/response split is load-bearing: a digest *request* is
/// answered with our own digest sync, a digest *response* is not. Collapse
/// the two and every exchange becomes an infinite ping-pong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// Opens an exchange; the receiver replies with deltas and its own
    /// digest sync.
    DigestRequest = 1,
    /// Answers a request; the receiver replies with deltas only.
    DigestResponse = 2,
    /// Carries state entries the receiver is missing. Never answered.
    Delta = 3,
}

impl MessageKind {
    /// The wire representation of this kind.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parses a wire type byte. Returns `None` for anything unrecognised;
    /// the caller decides whether that's worth logging.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(MessageKind::DigestRequest),
            2 => Some(MessageKind::DigestResponse),
            3 => Some(MessageKind::Delta),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// A summary of how much of one peer's state we hold: "I have everything up
/// to and including `version` for the peer at `addr`".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    /// Address (and identity) of the peer this digest describes.
    pub addr: String,
    /// Highest entry version we hold for that peer.
    pub version: u64,
}

// ---------------------------------------------------------------------------
// Delta
// ---------------------------------------------------------------------------

/// One state entry that supersedes the receiver's knowledge of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    /// Address (and identity) of the peer that owns the entry.
    pub addr: String,
    /// Entry key.
    pub key: String,
    /// Entry value. Opaque bytes; murmur imposes no schema.
    pub value: Vec<u8>,
    /// The owner's logical clock at the time of the write.
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_wire_byte() {
        for kind in [
            MessageKind::DigestRequest,
            MessageKind::DigestResponse,
            MessageKind::Delta,
        ] {
            assert_eq!(MessageKind::from_byte(kind.as_byte()), Some(kind));
        }
    }

    #[test]
    fn unknown_type_bytes_rejected() {
        assert_eq!(MessageKind::from_byte(0), None);
        assert_eq!(MessageKind::from_byte(4), None);
        assert_eq!(MessageKind::from_byte(0xff), None);
    }
}
