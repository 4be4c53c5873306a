//! In-process transport for tests and local simulation.
//!
//! A [`MemoryNetwork`] is a registry of endpoints; each
//! [`MemoryTransport`] delivers packets synchronously to the receiver's
//! handler on the sender's thread. Sends to unregistered or disconnected
//! addresses vanish silently, just like datagrams on a real network, which
//! makes [`MemoryNetwork::disconnect`] a faithful way to kill a node
//! abruptly mid-test.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::transport::{Packet, PacketHandler, Transport, TransportError};

/// Shared routing table for a set of in-process endpoints.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    handlers: Arc<RwLock<HashMap<String, PacketHandler>>>,
    next_endpoint: Arc<AtomicU64>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport with a fresh unique address on this network.
    pub fn transport(&self) -> MemoryTransport {
        let n = self.next_endpoint.fetch_add(1, Ordering::Relaxed);
        self.transport_at(&format!("10.0.0.{}:7946", n + 1))
    }

    /// Creates a transport bound to a specific address: the in-process
    /// equivalent of restarting a process on the same host:port. Starting
    /// it displaces any previous registration for the address.
    pub fn transport_at(&self, addr: &str) -> MemoryTransport {
        MemoryTransport {
            addr: addr.to_string(),
            network: self.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Unregisters an endpoint without telling it. Packets sent to the
    /// address are dropped from now on: the in-process equivalent of
    /// pulling a machine's network cable.
    pub fn disconnect(&self, addr: &str) {
        self.handlers.write().remove(addr);
    }

    fn register(&self, addr: &str, handler: PacketHandler) {
        self.handlers.write().insert(addr.to_string(), handler);
    }

    fn route(&self, addr: &str) -> Option<PacketHandler> {
        // Clone the handler out so delivery runs without the registry
        // lock; a handler is free to send more packets.
        self.handlers.read().get(addr).cloned()
    }
}

/// One endpoint on a [`MemoryNetwork`].
pub struct MemoryTransport {
    addr: String,
    network: MemoryNetwork,
    closed: Arc<AtomicBool>,
}

impl Transport for MemoryTransport {
    fn start(&self, handler: PacketHandler) -> Result<(), TransportError> {
        self.network.register(&self.addr, handler);
        Ok(())
    }

    fn send(&self, buf: &[u8], addr: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }

        if let Some(handler) = self.network.route(addr) {
            handler(Packet {
                buf: buf.to_vec(),
                from: self.addr.clone(),
            });
        }
        Ok(())
    }

    fn bind_addr(&self) -> String {
        self.addr.clone()
    }

    fn shutdown(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.network.disconnect(&self.addr);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recording_handler() -> (PacketHandler, Arc<Mutex<Vec<Packet>>>) {
        let received: Arc<Mutex<Vec<Packet>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        (Arc::new(move |p| sink.lock().push(p)), received)
    }

    #[test]
    fn delivers_between_registered_endpoints() {
        let network = MemoryNetwork::new();
        let a = network.transport();
        let b = network.transport();
        assert_ne!(a.bind_addr(), b.bind_addr());

        let (handler, received) = recording_handler();
        b.start(handler).unwrap();

        a.send(b"ping", &b.bind_addr()).unwrap();
        let packets = received.lock();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].buf, b"ping");
        assert_eq!(packets[0].from, a.bind_addr());
    }

    #[test]
    fn sends_to_unknown_addresses_are_dropped() {
        let network = MemoryNetwork::new();
        let a = network.transport();
        assert!(a.send(b"ping", "10.9.9.9:7946").is_ok());
    }

    #[test]
    fn disconnect_severs_delivery() {
        let network = MemoryNetwork::new();
        let a = network.transport();
        let b = network.transport();

        let (handler, received) = recording_handler();
        b.start(handler).unwrap();

        network.disconnect(&b.bind_addr());
        a.send(b"ping", &b.bind_addr()).unwrap();
        assert!(received.lock().is_empty());
    }

    #[test]
    fn shutdown_silences_the_endpoint() {
        let network = MemoryNetwork::new();
        let a = network.transport();
        let b = network.transport();

        let (handler, received) = recording_handler();
        b.start(handler).unwrap();
        b.shutdown().unwrap();

        a.send(b"ping", &b.bind_addr()).unwrap();
        assert!(received.lock().is_empty());
        // And the closed endpoint's own sends are no-ops.
        assert!(b.send(b"pong", &a.bind_addr()).is_ok());
    }
}
