//! Wireless radio abstraction.
//!
//! The supervisor drives the radio through [`Radio`], which works on:
//! - **ESP32** (`esp32` feature): [`EspRadio`] over the ESP-IDF Wi-Fi driver
//! - **Host**: [`HostRadio`], a software radio for development and tests
//!
//! All operations are non-blocking except `scan`. Association is started
//! with `begin_association` and observed with `is_associated`; the caller
//! owns the timeout.
//!
//! Station association and the access point never run together: starting
//! the access point drops the association, and implementations refuse to
//! associate while the access point is up.

use crate::config::NetworkCredentials;
use rand_core::{OsRng, RngCore};
use std::fmt;
use std::net::Ipv4Addr;

mod host;
pub use host::HostRadio;

#[cfg(feature = "esp32")]
mod esp;
#[cfg(feature = "esp32")]
pub use esp::EspRadio;

/// Address of the device on its own access point network.
pub const AP_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

/// One network seen by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub ssid: String,
    /// RSSI in dBm.
    pub signal_strength: i8,
    pub is_open: bool,
}

/// Identity of the provisioning access point.
///
/// Generated fresh at boot and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointIdentity {
    pub ssid: String,
}

impl AccessPointIdentity {
    /// `prefix` followed by a random number in 1000..=9999.
    pub fn generate(prefix: &str) -> Self {
        let suffix = 1000 + OsRng.next_u32() % 9000;
        Self {
            ssid: format!("{}{}", prefix, suffix),
        }
    }
}

/// Radio operations needed by the supervisor and portal.
pub trait Radio: Send {
    /// Start joining the network. Returns once the request is issued.
    fn begin_association(&mut self, credentials: &NetworkCredentials) -> Result<(), RadioError>;

    /// Associated and holding an address.
    fn is_associated(&self) -> bool;

    /// Drop the station association. Idempotent.
    fn disconnect(&mut self) -> Result<(), RadioError>;

    /// Station address while associated.
    fn ip_addr(&self) -> Option<Ipv4Addr>;

    /// SSID of the network currently joined.
    fn connected_ssid(&self) -> Option<String>;

    /// Bring up an open access point. Returns the device's address on it.
    fn start_access_point(&mut self, identity: &AccessPointIdentity)
        -> Result<Ipv4Addr, RadioError>;

    /// Take the access point down. Idempotent.
    fn stop_access_point(&mut self) -> Result<(), RadioError>;

    /// Scan for nearby networks. May block for a few seconds.
    fn scan(&mut self) -> Result<Vec<ScanResult>, RadioError>;
}

/// Radio errors.
#[derive(Debug)]
pub enum RadioError {
    /// Station operation requested while the access point is up.
    AccessPointActive,
    /// SSID or passphrase rejected by the driver.
    InvalidCredentials,
    /// Scan could not be performed.
    ScanFailed(String),
    /// ESP-IDF error.
    #[cfg(feature = "esp32")]
    Esp(esp_idf_sys::EspError),
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for RadioError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Esp(e)
    }
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessPointActive => write!(f, "access point is active"),
            Self::InvalidCredentials => write!(f, "credentials rejected by driver"),
            Self::ScanFailed(reason) => write!(f, "scan failed: {}", reason),
            #[cfg(feature = "esp32")]
            Self::Esp(e) => write!(f, "ESP error: {:?}", e),
        }
    }
}

impl std::error::Error for RadioError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_point_identity_format() {
        for _ in 0..50 {
            let identity = AccessPointIdentity::generate("ESP32_Config_");
            let suffix: u32 = identity
                .ssid
                .strip_prefix("ESP32_Config_")
                .expect("prefix")
                .parse()
                .expect("numeric suffix");
            assert!((1000..=9999).contains(&suffix));
        }
    }
}
