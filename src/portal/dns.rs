//! Captive DNS responder.
//!
//! Answers every A query with the access point's own address so that
//! phones and laptops joining the provisioning network open the
//! configuration page. Message encoding is done by `edge_captive`; this
//! module owns the socket and the thread.

use log::{debug, error, info, warn};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Standard DNS port.
pub const DNS_PORT: u16 = 53;

/// TTL of synthesized answers.
pub const ANSWER_TTL: Duration = Duration::from_secs(60);

const MAX_PACKET: usize = 512;

/// Background DNS responder.
///
/// Runs until stopped or dropped. Stopping may take up to 100ms.
pub struct CaptiveDns {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    local_addr: SocketAddr,
}

impl CaptiveDns {
    /// Bind `0.0.0.0:port` and start answering with `ip`.
    pub fn start(port: u16, ip: Ipv4Addr) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        socket.set_read_timeout(Some(Duration::from_millis(100)))?;
        let local_addr = socket.local_addr()?;
        info!("Captive DNS listening on {}, answering {}", local_addr, ip);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let handle = thread::Builder::new()
            .name("captive-dns".to_string())
            .spawn(move || Self::run(socket, ip, shutdown_clone))?;

        Ok(Self {
            handle: Some(handle),
            shutdown,
            local_addr,
        })
    }

    /// Address the responder is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn run(socket: UdpSocket, ip: Ipv4Addr, shutdown: Arc<AtomicBool>) {
        let octets = ip.octets();
        let mut request = [0u8; MAX_PACKET];
        let mut reply = [0u8; MAX_PACKET];

        while !shutdown.load(Ordering::Acquire) {
            let (len, peer) = match socket.recv_from(&mut request) {
                Ok(received) => received,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    continue
                }
                Err(e) => {
                    error!("DNS socket error: {}", e);
                    break;
                }
            };

            match edge_captive::reply(&request[..len], &octets, ANSWER_TTL, &mut reply) {
                Ok(reply_len) => {
                    if let Err(e) = socket.send_to(&reply[..reply_len], peer) {
                        warn!("DNS reply to {} failed: {}", peer, e);
                    }
                }
                Err(e) => debug!("Ignoring DNS packet from {}: {:?}", peer, e),
            }
        }
        info!("Captive DNS shutting down");
    }

    /// Stop the responder.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CaptiveDns {
    fn drop(&mut self) {
        self.stop();
    }
}
