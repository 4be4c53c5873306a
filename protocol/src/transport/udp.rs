//! UDP transport, the default.
//!
//! One socket, one reader thread. The reader does bounded blocking reads
//! so that `shutdown()` can set the stop flag and join the thread within
//! one read-timeout window; there is no way to interrupt a blocking
//! `recv_from` on a std socket portably.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::config;
use crate::transport::{Packet, PacketHandler, Transport, TransportError};

pub struct UdpTransport {
    socket: UdpSocket,
    bind_addr: String,
    shutdown: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl UdpTransport {
    /// Binds a UDP listener on `addr`. Pass port 0 to let the OS choose;
    /// the chosen port is visible through [`Transport::bind_addr`].
    pub fn bind(addr: &str) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        socket.set_read_timeout(Some(config::UDP_READ_TIMEOUT))?;
        let bind_addr = socket.local_addr()?.to_string();

        debug!(addr = %bind_addr, "udp transport bound");

        Ok(UdpTransport {
            socket,
            bind_addr,
            shutdown: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
        })
    }
}

impl Transport for UdpTransport {
    fn start(&self, handler: PacketHandler) -> Result<(), TransportError> {
        let socket = self.socket.try_clone()?;
        let shutdown = Arc::clone(&self.shutdown);

        let reader = std::thread::Builder::new()
            .name("murmur-udp-reader".to_string())
            .spawn(move || {
                while !shutdown.load(Ordering::Acquire) {
                    let mut buf = vec![0u8; config::UDP_PACKET_BUF_SIZE];
                    match socket.recv_from(&mut buf) {
                        Ok((n, from)) => {
                            if n == 0 {
                                continue;
                            }
                            buf.truncate(n);
                            handler(Packet {
                                buf,
                                from: from.to_string(),
                            });
                        }
                        Err(e)
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut =>
                        {
                            // Read timeout expired; loop to re-check the
                            // shutdown flag.
                        }
                        Err(e) => {
                            if shutdown.load(Ordering::Acquire) {
                                break;
                            }
                            error!(error = %e, "udp read failed");
                        }
                    }
                }
            })?;

        *self.reader.lock() = Some(reader);
        Ok(())
    }

    fn send(&self, buf: &[u8], addr: &str) -> Result<(), TransportError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Ok(());
        }

        match self.socket.send_to(buf, addr) {
            Ok(_) => Ok(()),
            // A send racing shutdown is not worth reporting.
            Err(_) if self.shutdown.load(Ordering::Acquire) => Ok(()),
            Err(source) => Err(TransportError::Send {
                addr: addr.to_string(),
                source,
            }),
        }
    }

    fn bind_addr(&self) -> String {
        self.bind_addr.clone()
    }

    fn shutdown(&self) -> Result<(), TransportError> {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        debug!(addr = %self.bind_addr, "udp transport shutting down");
        if let Some(reader) = self.reader.lock().take() {
            // The reader exits within one read-timeout window.
            let _ = reader.join();
        }
        Ok(())
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn bind_with_port_zero_reports_real_addr() {
        let transport = UdpTransport::bind("127.0.0.1:0").unwrap();
        let addr = transport.bind_addr();
        assert!(addr.starts_with("127.0.0.1:"));
        assert!(!addr.ends_with(":0"));
    }

    #[test]
    fn bind_failure_is_surfaced() {
        assert!(matches!(
            UdpTransport::bind("definitely-not-an-addr"),
            Err(TransportError::Bind { .. })
        ));
    }

    #[test]
    fn packets_round_trip_between_two_transports() {
        let a = UdpTransport::bind("127.0.0.1:0").unwrap();
        let b = UdpTransport::bind("127.0.0.1:0").unwrap();

        let received: Arc<Mutex<Vec<Packet>>> = Arc::new(Mutex::new(Vec::new()));
        let received_cb = Arc::clone(&received);
        a.start(Arc::new(|_| {})).unwrap();
        b.start(Arc::new(move |p| received_cb.lock().push(p))).unwrap();

        a.send(b"hello", &b.bind_addr()).unwrap();

        assert!(wait_for(
            || !received.lock().is_empty(),
            Duration::from_secs(5)
        ));
        let packets = received.lock();
        assert_eq!(packets[0].buf, b"hello");
        assert_eq!(packets[0].from, a.bind_addr());
    }

    #[test]
    fn send_after_shutdown_is_a_no_op() {
        let a = UdpTransport::bind("127.0.0.1:0").unwrap();
        let b = UdpTransport::bind("127.0.0.1:0").unwrap();
        a.start(Arc::new(|_| {})).unwrap();

        a.shutdown().unwrap();
        assert!(a.send(b"into the void", &b.bind_addr()).is_ok());
        // Shutdown is idempotent.
        assert!(a.shutdown().is_ok());
    }
}
