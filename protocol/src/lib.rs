// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Murmur — Cluster Membership by Rumor
//!
//! Murmur is an eventually-consistent cluster membership and state
//! dissemination library. Every node keeps a tiny versioned key/value
//! store per peer; nodes periodically swap compact digests with one random
//! peer and reply with only the entries the other side is missing. That's
//! the Scuttlebutt anti-entropy protocol, and it is boring in the best
//! possible way: no coordinator, no quorum, no connection state. Just
//! UDP datagrams and arithmetic on version numbers.
//!
//! Liveness comes from a Phi Accrual failure detector: every inbound
//! packet is a heartbeat, suspicion accrues continuously while a peer is
//! silent, and conviction is a threshold on that value rather than a
//! brittle fixed timeout.
//!
//! ## Architecture
//!
//! The modules mirror the actual concerns of the protocol:
//!
//! - **config** — Protocol constants and defaults. One home for magic numbers.
//! - **message** / **codec** — Wire types and the hand-rolled binary framing.
//! - **peer** — One peer's versioned entries and Up/Down status.
//! - **peermap** — The shared view of the cluster. One RwLock, many readers.
//! - **failure** — Phi Accrual arrival windows, one per peer endpoint.
//! - **gossiper** — The protocol state machine: digests out, deltas back.
//! - **transport** — Best-effort datagram I/O. UDP by default; in-memory
//!   for tests.
//! - **node** — The [`Murmur`] façade: lifecycle, scheduling, public API.
//! - **options** — Runtime knobs and membership callbacks.
//!
//! ## Guarantees (and non-guarantees)
//!
//! Per peer and key, observed versions only ever increase; your own writes
//! are immediately visible locally; any two nodes that can exchange
//! packets converge to the same view. There is no total order across
//! peers, no authentication, and no delivery guarantee for any individual
//! datagram; anti-entropy retries forever, so none is needed.
//!
//! ## Example
//!
//! ```no_run
//! use murmur_protocol::{Murmur, Options};
//!
//! let node = Murmur::create(
//!     "0.0.0.0:7946",
//!     Options::new()
//!         .with_seed(|| vec!["10.0.0.1:7946".to_string()])
//!         .with_on_join(|addr| println!("{addr} joined"))
//!         .with_on_leave(|addr| println!("{addr} left")),
//! )
//! .expect("bind failed");
//!
//! node.update_local("role", "frontend");
//! # node.shutdown().unwrap();
//! ```

pub mod codec;
pub mod config;
pub mod failure;
pub mod gossiper;
pub mod message;
pub mod node;
pub mod options;
pub mod peer;
pub mod peermap;
pub mod transport;

pub use codec::CodecError;
pub use message::{Delta, Digest, MessageKind};
pub use node::{Murmur, NodeError};
pub use options::Options;
pub use peer::{PeerEntry, PeerStatus};
pub use peermap::PeerMap;
pub use transport::{MemoryNetwork, MemoryTransport, Packet, Transport, TransportError, UdpTransport};
