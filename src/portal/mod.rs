//! Captive provisioning portal.
//!
//! While active the portal owns three things: an open access point, a
//! captive DNS responder pointing every name at the device, and the HTTP
//! routes in [`routes`]. It is activated and deactivated only by the
//! connectivity supervisor.
//!
//! HTTP handlers talk to the supervisor through a bounded queue of
//! [`PortalRequest`]s drained by [`ProvisioningPortal::try_next_request`].
//! Requests still queued when the portal is deactivated are discarded.

use crate::radio::{AccessPointIdentity, Radio, RadioError, ScanResult};
use crate::config::NetworkCredentials;
use crate::status::SharedStatus;
use log::{info, warn};
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::time::Duration;

mod dns;
mod page;
pub mod routes;
mod server;

pub use dns::{CaptiveDns, DNS_PORT};
pub use page::CONFIG_PAGE;
pub use routes::{HttpReply, RouteContext, StatusReport};
pub use server::HttpHost;

/// Capacity of the handler-to-supervisor request queue.
pub const REQUEST_QUEUE_CAPACITY: usize = 10;

/// How long `/scan` waits for results before answering with an empty list.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(8);

/// Where the portal listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalConfig {
    /// HTTP bind address.
    pub http_addr: String,
    /// DNS port, `None` to run without the captive DNS responder.
    pub dns_port: Option<u16>,
    pub scan_timeout: Duration,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:80".to_string(),
            dns_port: Some(DNS_PORT),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }
}

/// Work the HTTP handlers hand to the supervisor.
#[derive(Debug)]
pub enum PortalRequest {
    /// Validated credentials from `POST /config`.
    SubmitCredentials(NetworkCredentials),
    /// `POST /reset`.
    FactoryReset,
    /// `GET /scan`; results go back on the enclosed channel.
    Scan(SyncSender<Vec<ScanResult>>),
}

/// State of one provisioning episode. Exists only while the portal is up.
#[derive(Debug, Clone)]
pub struct ProvisioningSession {
    pub identity: AccessPointIdentity,
    /// Device address on the access point network.
    pub address: Ipv4Addr,
    /// Results of the most recent scan.
    pub last_scan: Vec<ScanResult>,
}

struct ActivePortal {
    session: ProvisioningSession,
    requests: Receiver<PortalRequest>,
    // Dropped before the access point goes down
    dns: Option<CaptiveDns>,
    http: HttpHost,
}

/// The provisioning portal.
pub struct ProvisioningPortal {
    config: PortalConfig,
    status: SharedStatus,
    active: Option<ActivePortal>,
}

impl ProvisioningPortal {
    pub fn new(config: PortalConfig, status: SharedStatus) -> Self {
        Self {
            config,
            status,
            active: None,
        }
    }

    /// Bring up access point, DNS and HTTP.
    ///
    /// On failure everything started so far is torn down again and the
    /// portal stays inactive.
    pub fn activate<R: Radio + ?Sized>(
        &mut self,
        radio: &mut R,
        identity: &AccessPointIdentity,
    ) -> Result<(), PortalError> {
        if self.active.is_some() {
            return Err(PortalError::AlreadyActive);
        }

        let address = radio.start_access_point(identity)?;

        let (tx, rx) = mpsc::sync_channel(REQUEST_QUEUE_CAPACITY);
        let ctx = RouteContext {
            status: self.status.clone(),
            requests: tx,
            scan_timeout: self.config.scan_timeout,
        };

        let http = match HttpHost::start(&self.config.http_addr, ctx) {
            Ok(http) => http,
            Err(e) => {
                let _ = radio.stop_access_point();
                return Err(PortalError::Http(e));
            }
        };

        let dns = match self.config.dns_port {
            Some(port) => match CaptiveDns::start(port, address) {
                Ok(dns) => Some(dns),
                Err(e) => {
                    drop(http);
                    let _ = radio.stop_access_point();
                    return Err(PortalError::Dns(e));
                }
            },
            None => None,
        };

        info!("Provisioning portal up on '{}' ({})", identity.ssid, address);
        self.active = Some(ActivePortal {
            session: ProvisioningSession {
                identity: identity.clone(),
                address,
                last_scan: Vec::new(),
            },
            requests: rx,
            dns,
            http,
        });
        Ok(())
    }

    /// Stop HTTP, DNS and the access point. No-op when inactive.
    pub fn deactivate<R: Radio + ?Sized>(&mut self, radio: &mut R) {
        let Some(active) = self.active.take() else {
            return;
        };
        let ActivePortal {
            session,
            requests,
            dns,
            http,
        } = active;

        drop(http);
        drop(dns);

        let leftover = requests.try_iter().count();
        if leftover > 0 {
            warn!("Discarding {} unprocessed portal requests", leftover);
        }

        if let Err(e) = radio.stop_access_point() {
            warn!("Failed to stop access point: {}", e);
        }
        info!("Provisioning portal on '{}' down", session.identity.ssid);
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Next queued handler request, if any.
    pub fn try_next_request(&self) -> Option<PortalRequest> {
        self.active.as_ref()?.requests.try_recv().ok()
    }

    /// Current provisioning episode.
    pub fn session(&self) -> Option<&ProvisioningSession> {
        self.active.as_ref().map(|a| &a.session)
    }

    /// Remember the latest scan for this episode.
    pub fn record_scan(&mut self, results: &[ScanResult]) {
        if let Some(active) = self.active.as_mut() {
            active.session.last_scan = results.to_vec();
        }
    }

    /// HTTP address actually bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.active.as_ref()?.http.local_addr()
    }

    /// DNS address actually bound.
    pub fn dns_addr(&self) -> Option<SocketAddr> {
        self.active.as_ref()?.dns.as_ref().map(CaptiveDns::local_addr)
    }
}

/// Portal errors.
#[derive(Debug)]
pub enum PortalError {
    /// `activate` called while already active.
    AlreadyActive,
    /// Access point could not be started.
    Radio(RadioError),
    /// HTTP server could not bind.
    Http(io::Error),
    /// DNS responder could not bind.
    Dns(io::Error),
}

impl From<RadioError> for PortalError {
    fn from(e: RadioError) -> Self {
        Self::Radio(e)
    }
}

impl fmt::Display for PortalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyActive => write!(f, "portal already active"),
            Self::Radio(e) => write!(f, "access point failed: {}", e),
            Self::Http(e) => write!(f, "HTTP server failed: {}", e),
            Self::Dns(e) => write!(f, "DNS responder failed: {}", e),
        }
    }
}

impl std::error::Error for PortalError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::HostRadio;

    fn local_config() -> PortalConfig {
        PortalConfig {
            http_addr: "127.0.0.1:0".to_string(),
            dns_port: Some(0),
            scan_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_activate_and_deactivate() {
        let mut radio = HostRadio::with_networks([("Net1", "pw")]);
        let mut portal = ProvisioningPortal::new(local_config(), SharedStatus::new());
        let identity = AccessPointIdentity::generate("ESP32_Config_");

        portal.activate(&mut radio, &identity).unwrap();
        assert!(portal.is_active());
        assert!(portal.local_addr().is_some());
        assert!(portal.dns_addr().is_some());
        assert_eq!(radio.access_point(), Some(identity.clone()));
        assert_eq!(portal.session().unwrap().identity, identity);

        portal.deactivate(&mut radio);
        assert!(!portal.is_active());
        assert_eq!(radio.access_point(), None);
        assert!(portal.session().is_none());
    }

    #[test]
    fn test_activate_twice_is_recoverable_error() {
        let mut radio = HostRadio::with_networks([("Net1", "pw")]);
        let mut portal = ProvisioningPortal::new(local_config(), SharedStatus::new());
        let identity = AccessPointIdentity::generate("ESP32_Config_");

        portal.activate(&mut radio, &identity).unwrap();
        assert!(matches!(
            portal.activate(&mut radio, &identity),
            Err(PortalError::AlreadyActive)
        ));
        assert!(portal.is_active());
        portal.deactivate(&mut radio);
    }

    #[test]
    fn test_deactivate_is_idempotent() {
        let mut radio = HostRadio::with_networks([("Net1", "pw")]);
        let mut portal = ProvisioningPortal::new(local_config(), SharedStatus::new());
        portal.deactivate(&mut radio);
        portal.deactivate(&mut radio);
        assert!(!portal.is_active());
    }

    #[test]
    fn test_bind_failure_leaves_access_point_down() {
        let mut radio = HostRadio::with_networks([("Net1", "pw")]);
        let config = PortalConfig {
            http_addr: "not-an-address".to_string(),
            ..local_config()
        };
        let mut portal = ProvisioningPortal::new(config, SharedStatus::new());

        let result = portal.activate(&mut radio, &AccessPointIdentity::generate("X_"));
        assert!(matches!(result, Err(PortalError::Http(_))));
        assert!(!portal.is_active());
        assert_eq!(radio.access_point(), None);
    }

    #[test]
    fn test_record_scan_only_while_active() {
        let mut radio = HostRadio::with_networks([("Net1", "pw")]);
        let mut portal = ProvisioningPortal::new(local_config(), SharedStatus::new());
        let results = radio.scan().unwrap();

        portal.record_scan(&results);
        portal
            .activate(&mut radio, &AccessPointIdentity::generate("X_"))
            .unwrap();
        portal.record_scan(&results);
        assert_eq!(portal.session().unwrap().last_scan, results);
        portal.deactivate(&mut radio);
    }
}
