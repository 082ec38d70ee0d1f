//! ESP32 radio over the ESP-IDF Wi-Fi driver.
//!
//! Uses the non-blocking `EspWifi` driver directly so association can be
//! polled from the supervisor's tick instead of blocking in `connect()`.

use super::{AccessPointIdentity, Radio, RadioError, ScanResult, AP_ADDRESS};
use crate::config::NetworkCredentials;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi,
};
use log::{info, warn};
use std::net::Ipv4Addr;

/// Wi-Fi radio for ESP32.
pub struct EspRadio {
    wifi: EspWifi<'static>,
    ap_active: bool,
}

impl EspRadio {
    /// Create the Wi-Fi driver.
    ///
    /// # Arguments
    ///
    /// * `modem` - The WiFi/BT modem peripheral
    /// * `sysloop` - The ESP-IDF system event loop
    /// * `nvs` - Partition for the driver's own calibration data
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
    ) -> Result<Self, RadioError> {
        let wifi = EspWifi::new(modem, sysloop, nvs)?;
        Ok(Self {
            wifi,
            ap_active: false,
        })
    }

    fn ensure_started(&mut self) -> Result<(), RadioError> {
        if !self.wifi.is_started()? {
            self.wifi.start()?;
        }
        Ok(())
    }
}

impl Radio for EspRadio {
    fn begin_association(&mut self, credentials: &NetworkCredentials) -> Result<(), RadioError> {
        if self.ap_active {
            return Err(RadioError::AccessPointActive);
        }

        let auth_method = if credentials.is_open() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        let config = Configuration::Client(ClientConfiguration {
            ssid: credentials
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| RadioError::InvalidCredentials)?,
            password: credentials
                .passphrase
                .as_str()
                .try_into()
                .map_err(|_| RadioError::InvalidCredentials)?,
            auth_method,
            ..Default::default()
        });

        self.wifi.set_configuration(&config)?;
        self.ensure_started()?;
        self.wifi.connect()?;
        Ok(())
    }

    fn is_associated(&self) -> bool {
        // `is_up` requires both association and a DHCP lease
        self.wifi.is_up().unwrap_or(false)
    }

    fn disconnect(&mut self) -> Result<(), RadioError> {
        if self.wifi.is_connected().unwrap_or(false) {
            self.wifi.disconnect()?;
        }
        Ok(())
    }

    fn ip_addr(&self) -> Option<Ipv4Addr> {
        if !self.is_associated() {
            return None;
        }
        let info = self.wifi.sta_netif().get_ip_info().ok()?;
        format!("{}", info.ip).parse().ok()
    }

    fn connected_ssid(&self) -> Option<String> {
        if !self.is_associated() {
            return None;
        }
        match self.wifi.get_configuration().ok()? {
            Configuration::Client(client) | Configuration::Mixed(client, _) => {
                Some(client.ssid.to_string())
            }
            _ => None,
        }
    }

    fn start_access_point(
        &mut self,
        identity: &AccessPointIdentity,
    ) -> Result<Ipv4Addr, RadioError> {
        self.disconnect()?;

        let ap = AccessPointConfiguration {
            ssid: identity
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| RadioError::InvalidCredentials)?,
            auth_method: AuthMethod::None,
            channel: 1,
            ..Default::default()
        };

        // Mixed mode keeps the station interface available for scans
        self.wifi.stop()?;
        self.wifi
            .set_configuration(&Configuration::Mixed(ClientConfiguration::default(), ap))?;
        self.wifi.start()?;
        self.ap_active = true;

        let ip = self
            .wifi
            .ap_netif()
            .get_ip_info()
            .ok()
            .and_then(|info| format!("{}", info.ip).parse().ok())
            .unwrap_or(AP_ADDRESS);

        info!("Access point '{}' up at {}", identity.ssid, ip);
        Ok(ip)
    }

    fn stop_access_point(&mut self) -> Result<(), RadioError> {
        if !self.ap_active {
            return Ok(());
        }
        self.wifi.stop()?;
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
        self.ap_active = false;
        info!("Access point down");
        Ok(())
    }

    fn scan(&mut self) -> Result<Vec<ScanResult>, RadioError> {
        self.ensure_started()?;
        let found = self.wifi.scan().map_err(|e| {
            warn!("Wi-Fi scan failed: {:?}", e);
            RadioError::ScanFailed(format!("{:?}", e))
        })?;

        Ok(found
            .into_iter()
            .map(|ap| ScanResult {
                ssid: ap.ssid.to_string(),
                signal_strength: ap.signal_strength,
                is_open: matches!(ap.auth_method, None | Some(AuthMethod::None)),
            })
            .collect())
    }
}
