//! HTTP host for the provisioning routes.
//!
//! Uses `tiny_http`, which works on both host and ESP32 (via std::net).
//! Requests are served one at a time on a dedicated thread.

use super::routes::{self, RouteContext};
use log::{error, info, warn};
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Response, Server};

/// Largest request body read; the form has two short fields.
const MAX_BODY: u64 = 1024;

/// Running HTTP server. Drop it to stop the server.
pub struct HttpHost {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
}

impl HttpHost {
    /// Bind `addr` (e.g. `0.0.0.0:80`) and serve the portal routes.
    pub fn start(addr: &str, ctx: RouteContext) -> io::Result<Self> {
        let server = Server::http(addr)
            .map_err(|e| io::Error::new(io::ErrorKind::AddrInUse, format!("{}", e)))?;
        let local_addr = server.server_addr().to_ip();

        info!(
            "Portal HTTP listening on http://{}/",
            local_addr.map_or_else(|| addr.to_string(), |a| a.to_string())
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::Builder::new()
            .name("portal-http".to_string())
            .spawn(move || Self::run_server(server, ctx, shutdown_clone))?;

        Ok(Self {
            handle: Some(handle),
            shutdown,
            local_addr,
        })
    }

    /// Address actually bound (useful when started on port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn run_server(server: Server, ctx: RouteContext, shutdown: Arc<AtomicBool>) {
        loop {
            // Use Acquire ordering to ensure we see the shutdown flag from stop()
            if shutdown.load(Ordering::Acquire) {
                info!("Portal HTTP shutting down");
                break;
            }

            match server.recv_timeout(Duration::from_millis(100)) {
                Ok(Some(mut request)) => {
                    let mut body = String::new();
                    if let Err(e) = request
                        .as_reader()
                        .take(MAX_BODY)
                        .read_to_string(&mut body)
                    {
                        warn!("Unreadable request body: {}", e);
                        let reply = Response::from_string("Bad Request").with_status_code(400);
                        let _ = request.respond(reply);
                        continue;
                    }

                    let reply = routes::handle(&ctx, request.method(), request.url(), &body);

                    let mut response =
                        Response::from_string(reply.body).with_status_code(reply.status);
                    if let Ok(header) =
                        Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes())
                    {
                        response = response.with_header(header);
                    }

                    if let Err(e) = request.respond(response) {
                        warn!("Failed to send response: {}", e);
                    }
                }
                Ok(None) => {
                    // Timeout, check shutdown flag and continue
                }
                Err(e) => {
                    error!("Server error: {}", e);
                    break;
                }
            }
        }
    }

    /// Stop the server.
    ///
    /// May take up to 100ms due to polling interval. A request already
    /// being handled is answered first.
    pub fn stop(&mut self) {
        // Use Release ordering to ensure the server thread sees this write
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HttpHost {
    fn drop(&mut self) {
        self.stop();
    }
}
