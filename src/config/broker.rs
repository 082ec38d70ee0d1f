//! Broker connection settings, persisted in the `mqtt` namespace.

use super::ConfigError;
use crate::store::{ConfigStore, Settings, StoreError};
use rand_core::{OsRng, RngCore};
use std::fmt;
use zeroize::Zeroize;

/// Default MQTT port.
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Store namespace for broker settings.
pub const MQTT_NAMESPACE: &str = "mqtt";

/// Prefix of generated client identifiers.
pub const CLIENT_ID_PREFIX: &str = "ESP32Client-";

const KEY_BROKER: &str = "broker";
const KEY_PORT: &str = "port";
const KEY_CLIENT_ID: &str = "clientId";
const KEY_USER: &str = "user";
const KEY_PASSWORD: &str = "password";

/// Where and how to reach the message broker.
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Broker host name or address. Empty disables the session.
    pub host: String,
    pub port: u16,
    /// Client identifier. Empty means "generate one per connection".
    pub client_id: String,
    /// Username; authentication is used only when this is non-empty.
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_BROKER_PORT,
            client_id: String::new(),
            user: None,
            password: None,
        }
    }
}

impl BrokerConfig {
    /// Plain configuration for `host:port` without authentication.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: String::new(),
            user: None,
            password: None,
        }
    }

    /// Set username and password.
    pub fn with_credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Set a fixed client identifier.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// A broker host is set.
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty()
    }

    /// Username to authenticate with, if any.
    pub fn auth_user(&self) -> Option<&str> {
        self.user.as_deref().filter(|u| !u.is_empty())
    }

    /// Client id for the next connection: the configured one, or a fresh
    /// `ESP32Client-xxxx`.
    pub fn effective_client_id(&self) -> String {
        if self.client_id.is_empty() {
            generate_client_id()
        } else {
            self.client_id.clone()
        }
    }

    /// Load from the store, applying defaults for missing keys.
    pub fn load<S: ConfigStore + ?Sized>(store: &mut S) -> Result<Self, ConfigError> {
        let settings = Settings::open(store, MQTT_NAMESPACE);
        let port = settings.get_int(KEY_PORT, DEFAULT_BROKER_PORT as i32);
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or(ConfigError::InvalidPort(port))?;

        let optional = |key: &str| Some(settings.get_string(key, "")).filter(|v| !v.is_empty());

        Ok(Self {
            host: settings.get_string(KEY_BROKER, ""),
            port,
            client_id: settings.get_string(KEY_CLIENT_ID, ""),
            user: optional(KEY_USER),
            password: optional(KEY_PASSWORD),
        })
    }

    /// Persist and commit.
    pub fn save<S: ConfigStore + ?Sized>(&self, store: &mut S) -> Result<(), StoreError> {
        let mut settings = Settings::open(store, MQTT_NAMESPACE);
        settings.set_string(KEY_BROKER, &self.host);
        settings.set_int(KEY_PORT, i32::from(self.port));
        settings.set_string(KEY_CLIENT_ID, &self.client_id);
        match &self.user {
            Some(user) => settings.set_string(KEY_USER, user),
            None => settings.erase_key(KEY_USER),
        }
        match &self.password {
            Some(password) => settings.set_string(KEY_PASSWORD, password),
            None => settings.erase_key(KEY_PASSWORD),
        }
        settings.close()
    }
}

impl Drop for BrokerConfig {
    fn drop(&mut self) {
        if let Some(password) = self.password.as_mut() {
            password.zeroize();
        }
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Generate `ESP32Client-` followed by up to four random hex digits.
pub fn generate_client_id() -> String {
    format!("{}{:x}", CLIENT_ID_PREFIX, OsRng.next_u32() & 0xffff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_defaults_when_store_empty() {
        let mut store = MemoryStore::new();
        let config = BrokerConfig::load(&mut store).unwrap();
        assert!(!config.is_configured());
        assert_eq!(config.port, DEFAULT_BROKER_PORT);
        assert_eq!(config.user, None);
    }

    #[test]
    fn test_save_then_load() {
        let mut store = MemoryStore::new();
        let config = BrokerConfig::new("broker.local", 8883)
            .with_credentials("device", "secret")
            .with_client_id("station-1");
        config.save(&mut store).unwrap();

        store.discard_uncommitted();
        assert_eq!(BrokerConfig::load(&mut store).unwrap(), config);
    }

    #[test]
    fn test_invalid_port_rejected() {
        let mut store = MemoryStore::new();
        store.set_int(MQTT_NAMESPACE, "port", 70000).unwrap();
        assert_eq!(
            BrokerConfig::load(&mut store).unwrap_err(),
            ConfigError::InvalidPort(70000)
        );
    }

    #[test]
    fn test_empty_user_means_no_auth() {
        let config = BrokerConfig::new("broker.local", 1883).with_credentials("", "ignored");
        assert_eq!(config.auth_user(), None);
    }

    #[test]
    fn test_generated_client_id_format() {
        let id = generate_client_id();
        let suffix = id.strip_prefix(CLIENT_ID_PREFIX).expect("prefix");
        assert!(!suffix.is_empty() && suffix.len() <= 4);
        assert!(u16::from_str_radix(suffix, 16).is_ok());
    }

    #[test]
    fn test_configured_client_id_is_kept() {
        let config = BrokerConfig::new("h", 1883).with_client_id("fixed");
        assert_eq!(config.effective_client_id(), "fixed");
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = BrokerConfig::new("h", 1883).with_credentials("u", "hunter2");
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
