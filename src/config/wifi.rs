//! Station credentials.
//!
//! Credentials are persisted in the `wifi` namespace under `ssid` and
//! `password`. An empty SSID means the device is unconfigured.
//!
//! # Example
//!
//! ```
//! use mqtt_station_esp32::config::NetworkCredentials;
//!
//! let creds = NetworkCredentials::new("HomeNet", "hunter22").unwrap();
//! assert!(!creds.is_open());
//! assert!(NetworkCredentials::new("", "pw").is_err());
//! ```

use crate::store::{ConfigStore, Settings, StoreError};
use log::info;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum passphrase length.
pub const MAX_PASSWORD_LEN: usize = 64;

/// Store namespace for station credentials.
pub const WIFI_NAMESPACE: &str = "wifi";

const KEY_SSID: &str = "ssid";
const KEY_PASSWORD: &str = "password";

/// Credentials for joining a wireless network.
///
/// The passphrase is wiped from memory on drop and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct NetworkCredentials {
    /// Network SSID (1-32 bytes).
    pub ssid: String,
    /// Passphrase (0-64 bytes, empty for open networks).
    pub passphrase: String,
}

impl NetworkCredentials {
    /// Create validated credentials.
    pub fn new(
        ssid: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let creds = Self {
            ssid: ssid.into(),
            passphrase: passphrase.into(),
        };
        creds.validate()?;
        Ok(creds)
    }

    /// Credentials for an open network.
    pub fn open(ssid: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(ssid, String::new())
    }

    /// Validate lengths.
    ///
    /// Short passphrases are accepted; the access point decides whether
    /// they are acceptable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssid.is_empty() {
            return Err(ConfigError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(ConfigError::SsidTooLong {
                len: self.ssid.len(),
                max: MAX_SSID_LEN,
            });
        }
        if self.passphrase.len() > MAX_PASSWORD_LEN {
            return Err(ConfigError::PasswordTooLong {
                len: self.passphrase.len(),
                max: MAX_PASSWORD_LEN,
            });
        }
        Ok(())
    }

    /// Check if this is an open network (no passphrase).
    pub fn is_open(&self) -> bool {
        self.passphrase.is_empty()
    }

    /// Load stored credentials.
    ///
    /// Returns `None` when no SSID is stored (the unconfigured state).
    pub fn load<S: ConfigStore + ?Sized>(store: &mut S) -> Option<Self> {
        let settings = Settings::open(store, WIFI_NAMESPACE);
        let ssid = settings.get_string(KEY_SSID, "");
        if ssid.is_empty() {
            return None;
        }
        Some(Self {
            ssid,
            passphrase: settings.get_string(KEY_PASSWORD, ""),
        })
    }

    /// Persist and commit.
    pub fn save<S: ConfigStore + ?Sized>(&self, store: &mut S) -> Result<(), StoreError> {
        let mut settings = Settings::open(store, WIFI_NAMESPACE);
        settings.set_string(KEY_SSID, &self.ssid);
        settings.set_string(KEY_PASSWORD, &self.passphrase);
        settings.close()?;
        info!(
            "Saved credentials for '{}' (passphrase {} chars)",
            self.ssid,
            self.passphrase.len()
        );
        Ok(())
    }

    /// Erase the whole `wifi` namespace and commit.
    pub fn erase<S: ConfigStore + ?Sized>(store: &mut S) -> Result<(), StoreError> {
        let mut settings = Settings::open(store, WIFI_NAMESPACE);
        settings.erase_all();
        settings.close()
    }
}

impl fmt::Debug for NetworkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCredentials")
            .field("ssid", &self.ssid)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// SSID is empty.
    SsidEmpty,
    /// SSID exceeds maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Passphrase exceeds maximum length.
    PasswordTooLong { len: usize, max: usize },
    /// Broker port outside 1-65535.
    InvalidPort(i32),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long ({} bytes, max {})", len, max)
            }
            Self::PasswordTooLong { len, max } => {
                write!(f, "password too long ({} bytes, max {})", len, max)
            }
            Self::InvalidPort(port) => write!(f, "invalid broker port {}", port),
        }
    }
}

impl std::error::Error for ConfigError {}
