//! # Packet Transport
//!
//! The seam between the gossip protocol and the network. The core only
//! assumes best-effort, unordered, unreliable datagram delivery (exactly
//! what UDP gives you) and treats every send failure as a dropped packet
//! that the next gossip round retries naturally.
//!
//! One logical message per datagram; the core never fragments. Keep the
//! configured `max_message_size` at or below the path MTU minus IP/UDP
//! overhead or the network will fragment for you, badly.
//!
//! [`UdpTransport`] is the default implementation. [`MemoryTransport`]
//! routes packets inside one process for tests and local simulation.

mod memory;
mod udp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use udp::UdpTransport;

use std::io;
use std::sync::Arc;

/// An inbound datagram plus the address it arrived from. The source
/// address doubles as a liveness signal for the failure detector.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Raw datagram contents.
    pub buf: Vec<u8>,
    /// Sender's transport address.
    pub from: String,
}

/// Receives inbound packets. Installed once via [`Transport::start`];
/// called from the transport's reader threads, so it must be cheap and
/// must do its own synchronization.
pub type PacketHandler = Arc<dyn Fn(Packet) + Send + Sync>;

/// Errors surfaced by a transport. Send-side failures are logged and
/// swallowed by the gossiper; only bind-time failures abort node creation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listener could not be established.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    /// A datagram could not be sent.
    #[error("failed to send to {addr}: {source}")]
    Send {
        addr: String,
        #[source]
        source: io::Error,
    },
    /// The transport could not be initialised or torn down.
    #[error("transport io error: {0}")]
    Io(#[from] io::Error),
}

/// A best-effort packet transport.
pub trait Transport: Send + Sync {
    /// Installs the inbound packet handler and begins delivering packets.
    /// Called exactly once, before any [`Transport::send`].
    fn start(&self, handler: PacketHandler) -> Result<(), TransportError>;

    /// Fires a datagram at `addr`. Fire-and-forget: no delivery guarantee,
    /// no ordering. After [`Transport::shutdown`] this is a silent no-op.
    fn send(&self, buf: &[u8], addr: &str) -> Result<(), TransportError>;

    /// The address the listener actually bound to. May differ from the
    /// requested address, e.g. when port 0 asked the OS to pick one.
    fn bind_addr(&self) -> String;

    /// Stops the listener. Inbound delivery ceases, subsequent sends are
    /// no-ops, and any reader threads are joined before returning.
    fn shutdown(&self) -> Result<(), TransportError>;
}
