//! Host radio.
//!
//! On host systems the OS owns the network interface, so this radio only
//! models the association state machine. It runs in two modes:
//!
//! - [`HostRadio::new`] joins any SSID and reports the machine's primary
//!   address, which is what the `host-node` binary uses.
//! - [`HostRadio::with_networks`] only joins listed networks with the right
//!   passphrase, which is what the tests use.
//!
//! Clones share state, so a test can keep a handle for fault injection
//! (`set_link_up`, `set_scan_failure`) while the supervisor owns another.

use super::{AccessPointIdentity, Radio, RadioError, ScanResult, AP_ADDRESS};
use crate::config::NetworkCredentials;
use log::{debug, info};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard};

/// Address reported when no better one is known.
const FALLBACK_STATION_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);

#[derive(Debug, Clone)]
struct KnownNetwork {
    ssid: String,
    passphrase: String,
    signal_strength: i8,
}

#[derive(Debug)]
struct State {
    /// `None` accepts every SSID.
    networks: Option<Vec<KnownNetwork>>,
    link_up: bool,
    associated: Option<String>,
    station_ip: Ipv4Addr,
    access_point: Option<AccessPointIdentity>,
    association_attempts: u32,
    scan_fails: bool,
}

/// Software radio for host builds.
#[derive(Debug, Clone)]
pub struct HostRadio {
    state: Arc<Mutex<State>>,
}

impl HostRadio {
    /// Radio that joins any network and reports the host's own address.
    pub fn new() -> Self {
        let station_ip = match Self::detect_local_ip() {
            Some(IpAddr::V4(ip)) => ip,
            _ => FALLBACK_STATION_IP,
        };
        info!("Host radio ready, station address {}", station_ip);
        Self::build(None, station_ip)
    }

    /// Radio that only joins the given `(ssid, passphrase)` networks.
    pub fn with_networks<'a>(networks: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let networks = networks
            .into_iter()
            .enumerate()
            .map(|(i, (ssid, passphrase))| KnownNetwork {
                ssid: ssid.to_string(),
                passphrase: passphrase.to_string(),
                signal_strength: (-40 - 7 * i as i32).max(-100) as i8,
            })
            .collect();
        Self::build(Some(networks), FALLBACK_STATION_IP)
    }

    fn build(networks: Option<Vec<KnownNetwork>>, station_ip: Ipv4Addr) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                networks,
                link_up: true,
                associated: None,
                station_ip,
                access_point: None,
                association_attempts: 0,
                scan_fails: false,
            })),
        }
    }

    /// Get the primary local IP address.
    ///
    /// "Connects" a UDP socket to a public address (nothing is sent) and
    /// reads back the local address the OS picked for the default route.
    fn detect_local_ip() -> Option<IpAddr> {
        use std::net::UdpSocket;

        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:80").ok()?;
        let local_addr = socket.local_addr().ok()?;
        Some(local_addr.ip())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulate the upstream network going away or coming back.
    ///
    /// Taking the link down drops any association.
    pub fn set_link_up(&self, up: bool) {
        let mut state = self.lock();
        state.link_up = up;
        if !up {
            state.associated = None;
        }
    }

    /// Make subsequent scans fail.
    pub fn set_scan_failure(&self, fail: bool) {
        self.lock().scan_fails = fail;
    }

    /// Add a network that can be joined.
    pub fn add_network(&self, ssid: &str, passphrase: &str) {
        let mut state = self.lock();
        if let Some(networks) = state.networks.as_mut() {
            networks.retain(|n| n.ssid != ssid);
            networks.push(KnownNetwork {
                ssid: ssid.to_string(),
                passphrase: passphrase.to_string(),
                signal_strength: -55,
            });
        }
    }

    /// Number of `begin_association` calls so far.
    pub fn association_attempts(&self) -> u32 {
        self.lock().association_attempts
    }

    /// Access point currently up, if any.
    pub fn access_point(&self) -> Option<AccessPointIdentity> {
        self.lock().access_point.clone()
    }
}

impl Default for HostRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl Radio for HostRadio {
    fn begin_association(&mut self, credentials: &NetworkCredentials) -> Result<(), RadioError> {
        let mut state = self.lock();
        if state.access_point.is_some() {
            return Err(RadioError::AccessPointActive);
        }
        state.association_attempts += 1;

        let reachable = state.link_up
            && match &state.networks {
                None => true,
                Some(networks) => networks
                    .iter()
                    .any(|n| n.ssid == credentials.ssid && n.passphrase == credentials.passphrase),
            };

        debug!(
            "Association #{} to '{}': {}",
            state.association_attempts,
            credentials.ssid,
            if reachable { "joined" } else { "no answer" }
        );
        state.associated = reachable.then(|| credentials.ssid.clone());
        Ok(())
    }

    fn is_associated(&self) -> bool {
        let state = self.lock();
        state.link_up && state.associated.is_some()
    }

    fn disconnect(&mut self) -> Result<(), RadioError> {
        self.lock().associated = None;
        Ok(())
    }

    fn ip_addr(&self) -> Option<Ipv4Addr> {
        let state = self.lock();
        (state.link_up && state.associated.is_some()).then_some(state.station_ip)
    }

    fn connected_ssid(&self) -> Option<String> {
        let state = self.lock();
        if state.link_up {
            state.associated.clone()
        } else {
            None
        }
    }

    fn start_access_point(
        &mut self,
        identity: &AccessPointIdentity,
    ) -> Result<Ipv4Addr, RadioError> {
        let mut state = self.lock();
        state.associated = None;
        state.access_point = Some(identity.clone());
        info!("Host access point '{}' up at {}", identity.ssid, AP_ADDRESS);
        Ok(AP_ADDRESS)
    }

    fn stop_access_point(&mut self) -> Result<(), RadioError> {
        if let Some(ap) = self.lock().access_point.take() {
            info!("Host access point '{}' down", ap.ssid);
        }
        Ok(())
    }

    fn scan(&mut self) -> Result<Vec<ScanResult>, RadioError> {
        let state = self.lock();
        if state.scan_fails {
            return Err(RadioError::ScanFailed("radio busy".to_string()));
        }
        Ok(state
            .networks
            .iter()
            .flatten()
            .map(|n| ScanResult {
                ssid: n.ssid.clone(),
                signal_strength: n.signal_strength,
                is_open: n.passphrase.is_empty(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(ssid: &str, pass: &str) -> NetworkCredentials {
        NetworkCredentials::new(ssid, pass).unwrap()
    }

    #[test]
    fn test_joins_known_network() {
        let mut radio = HostRadio::with_networks([("Net1", "pw")]);
        radio.begin_association(&creds("Net1", "pw")).unwrap();
        assert!(radio.is_associated());
        assert_eq!(radio.connected_ssid().as_deref(), Some("Net1"));
        assert!(radio.ip_addr().is_some());
    }

    #[test]
    fn test_wrong_passphrase_never_associates() {
        let mut radio = HostRadio::with_networks([("Net1", "pw")]);
        radio.begin_association(&creds("Net1", "nope")).unwrap();
        assert!(!radio.is_associated());
        assert_eq!(radio.ip_addr(), None);
    }

    #[test]
    fn test_any_network_mode() {
        let mut radio = HostRadio::build(None, FALLBACK_STATION_IP);
        radio.begin_association(&creds("Whatever", "")).unwrap();
        assert!(radio.is_associated());
    }

    #[test]
    fn test_access_point_blocks_association() {
        let mut radio = HostRadio::with_networks([("Net1", "pw")]);
        let ap = AccessPointIdentity::generate("ESP32_Config_");
        assert_eq!(radio.start_access_point(&ap).unwrap(), AP_ADDRESS);

        assert!(matches!(
            radio.begin_association(&creds("Net1", "pw")),
            Err(RadioError::AccessPointActive)
        ));
        assert_eq!(radio.association_attempts(), 0);

        radio.stop_access_point().unwrap();
        radio.stop_access_point().unwrap();
        assert!(radio.begin_association(&creds("Net1", "pw")).is_ok());
    }

    #[test]
    fn test_access_point_drops_association() {
        let mut radio = HostRadio::with_networks([("Net1", "pw")]);
        radio.begin_association(&creds("Net1", "pw")).unwrap();
        radio
            .start_access_point(&AccessPointIdentity::generate("X_"))
            .unwrap();
        assert!(!radio.is_associated());
    }

    #[test]
    fn test_link_loss_seen_through_clone() {
        let mut radio = HostRadio::with_networks([("Net1", "pw")]);
        let handle = radio.clone();
        radio.begin_association(&creds("Net1", "pw")).unwrap();

        handle.set_link_up(false);
        assert!(!radio.is_associated());

        handle.set_link_up(true);
        assert!(!radio.is_associated(), "association must be re-established");
    }

    #[test]
    fn test_scan() {
        let mut radio = HostRadio::with_networks([("Net1", "pw"), ("Cafe", "")]);
        let results = radio.scan().unwrap();
        assert_eq!(results.len(), 2);
        assert!(!results[0].is_open);
        assert!(results[1].is_open);

        radio.set_scan_failure(true);
        assert!(radio.scan().is_err());
    }
}
