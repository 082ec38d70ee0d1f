//! Namespaced key-value configuration storage.
//!
//! Configuration lives in small namespaces (`wifi`, `mqtt`) holding strings,
//! integers and booleans. Writes are staged until [`ConfigStore::commit`];
//! anything not committed may be lost on power failure.
//!
//! Three backends implement [`ConfigStore`]:
//!
//! - [`MemoryStore`] - in-memory, used by tests and as the host file cache
//! - [`FileStore`] - JSON file under the user's home directory (host only)
//! - `NvsStore` - ESP-IDF non-volatile storage (`esp32` feature)
//!
//! Callers normally go through [`Settings`], which supplies defaults on read
//! and commits the namespace when dropped if anything was written.
//!
//! # Example
//!
//! ```
//! use mqtt_station_esp32::store::{MemoryStore, Settings};
//!
//! let mut store = MemoryStore::new();
//! {
//!     let mut wifi = Settings::open(&mut store, "wifi");
//!     wifi.set_string("ssid", "HomeNet");
//! } // committed here
//!
//! let wifi = Settings::open(&mut store, "wifi");
//! assert_eq!(wifi.get_string("ssid", ""), "HomeNet");
//! ```

use log::error;
use serde::{Deserialize, Serialize};
use std::fmt;

mod memory;
pub use memory::MemoryStore;

#[cfg(not(target_os = "espidf"))]
mod file;
#[cfg(not(target_os = "espidf"))]
pub use file::FileStore;

#[cfg(feature = "esp32")]
mod nvs;
#[cfg(feature = "esp32")]
pub use nvs::NvsStore;

/// Maximum namespace and key length accepted by every backend.
///
/// NVS limits both to 15 characters; the other backends enforce the same
/// limit so behaviour does not change between host and device.
pub const MAX_NAME_LEN: usize = 15;

/// A single stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
    Bool(bool),
    Int(i32),
    Str(String),
}

/// Durable namespaced key-value storage.
///
/// Reads return `Ok(None)` for missing keys and for keys holding a value of a
/// different type. Writes are staged per namespace until `commit`.
pub trait ConfigStore: Send {
    fn get_string(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError>;
    fn get_int(&self, namespace: &str, key: &str) -> Result<Option<i32>, StoreError>;
    fn get_bool(&self, namespace: &str, key: &str) -> Result<Option<bool>, StoreError>;

    fn set_string(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError>;
    fn set_int(&mut self, namespace: &str, key: &str, value: i32) -> Result<(), StoreError>;
    fn set_bool(&mut self, namespace: &str, key: &str, value: bool) -> Result<(), StoreError>;

    /// Remove one key. Removing a missing key is not an error.
    fn erase_key(&mut self, namespace: &str, key: &str) -> Result<(), StoreError>;

    /// Remove every key in the namespace.
    fn erase_all(&mut self, namespace: &str) -> Result<(), StoreError>;

    /// Make staged writes to the namespace durable.
    fn commit(&mut self, namespace: &str) -> Result<(), StoreError>;
}

/// Check namespace/key names against [`MAX_NAME_LEN`].
pub(crate) fn check_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Scoped access to one namespace.
///
/// Getters take a default returned when the key is missing or unreadable.
/// Setters mark the namespace dirty; a dirty namespace is committed when the
/// guard is dropped, or explicitly with [`Settings::close`].
pub struct Settings<'a, S: ConfigStore + ?Sized> {
    store: &'a mut S,
    namespace: &'a str,
    dirty: bool,
    failed: Option<StoreError>,
}

impl<'a, S: ConfigStore + ?Sized> Settings<'a, S> {
    /// Open a namespace.
    pub fn open(store: &'a mut S, namespace: &'a str) -> Self {
        Self {
            store,
            namespace,
            dirty: false,
            failed: None,
        }
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.store.get_string(self.namespace, key) {
            Ok(Some(v)) => v,
            Ok(None) => default.to_string(),
            Err(e) => {
                error!("Failed to read {}/{}: {}", self.namespace, key, e);
                default.to_string()
            }
        }
    }

    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        match self.store.get_int(self.namespace, key) {
            Ok(Some(v)) => v,
            Ok(None) => default,
            Err(e) => {
                error!("Failed to read {}/{}: {}", self.namespace, key, e);
                default
            }
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.store.get_bool(self.namespace, key) {
            Ok(Some(v)) => v,
            Ok(None) => default,
            Err(e) => {
                error!("Failed to read {}/{}: {}", self.namespace, key, e);
                default
            }
        }
    }

    pub fn set_string(&mut self, key: &str, value: &str) {
        let result = self.store.set_string(self.namespace, key, value);
        self.record(result);
    }

    pub fn set_int(&mut self, key: &str, value: i32) {
        let result = self.store.set_int(self.namespace, key, value);
        self.record(result);
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        let result = self.store.set_bool(self.namespace, key, value);
        self.record(result);
    }

    pub fn erase_key(&mut self, key: &str) {
        let result = self.store.erase_key(self.namespace, key);
        self.record(result);
    }

    pub fn erase_all(&mut self) {
        let result = self.store.erase_all(self.namespace);
        self.record(result);
    }

    /// Commit pending writes and report the first error seen in this scope.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.flush()
    }

    fn record(&mut self, result: Result<(), StoreError>) {
        match result {
            Ok(()) => self.dirty = true,
            Err(e) => {
                error!("Write to namespace '{}' failed: {}", self.namespace, e);
                if self.failed.is_none() {
                    self.failed = Some(e);
                }
            }
        }
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if self.dirty {
            self.dirty = false;
            self.store.commit(self.namespace)?;
        }
        match self.failed.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<S: ConfigStore + ?Sized> Drop for Settings<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            error!("Commit of namespace '{}' failed: {}", self.namespace, e);
        }
    }
}

/// Storage errors.
#[derive(Debug)]
pub enum StoreError {
    /// Namespace or key is empty or longer than [`MAX_NAME_LEN`].
    InvalidName(String),
    /// Backend I/O failure.
    Io(std::io::Error),
    /// Stored data could not be decoded.
    Corrupted(String),
    /// Read-back after commit did not match what was written.
    VerifyFailed,
    /// ESP-IDF NVS error.
    #[cfg(feature = "esp32")]
    Nvs(esp_idf_sys::EspError),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Corrupted(e.to_string())
    }
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for StoreError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Nvs(e)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "invalid namespace or key: '{}'", name),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Corrupted(msg) => write!(f, "corrupted store: {}", msg),
            Self::VerifyFailed => write!(f, "read-back verification failed"),
            #[cfg(feature = "esp32")]
            Self::Nvs(e) => write!(f, "NVS error: {:?}", e),
        }
    }
}

impl std::error::Error for StoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_for_missing_keys() {
        let mut store = MemoryStore::new();
        let settings = Settings::open(&mut store, "mqtt");

        assert_eq!(settings.get_string("broker", ""), "");
        assert_eq!(settings.get_int("port", 1883), 1883);
        assert!(settings.get_bool("enabled", true));
    }

    #[test]
    fn test_settings_commit_on_drop() {
        let mut store = MemoryStore::new();
        {
            let mut settings = Settings::open(&mut store, "mqtt");
            settings.set_string("broker", "10.0.0.5");
            settings.set_int("port", 8883);
        }

        store.discard_uncommitted();
        let settings = Settings::open(&mut store, "mqtt");
        assert_eq!(settings.get_string("broker", ""), "10.0.0.5");
        assert_eq!(settings.get_int("port", 0), 8883);
    }

    #[test]
    fn test_settings_read_only_does_not_commit() {
        let mut store = MemoryStore::new();
        store.set_string("wifi", "ssid", "staged").unwrap();
        {
            let settings = Settings::open(&mut store, "wifi");
            assert_eq!(settings.get_string("ssid", ""), "staged");
        }
        assert_eq!(store.commit_count(), 0);
    }

    #[test]
    fn test_settings_close_reports_write_error() {
        let mut store = MemoryStore::new();
        let mut settings = Settings::open(&mut store, "wifi");
        settings.set_string("a_key_that_is_far_too_long", "x");
        assert!(matches!(settings.close(), Err(StoreError::InvalidName(_))));
    }

    #[test]
    fn test_type_mismatch_reads_as_missing() {
        let mut store = MemoryStore::new();
        store.set_int("mqtt", "port", 1883).unwrap();
        assert_eq!(store.get_string("mqtt", "port").unwrap(), None);
        assert_eq!(store.get_bool("mqtt", "port").unwrap(), None);
    }

    #[test]
    fn test_check_name() {
        assert!(check_name("wifi").is_ok());
        assert!(check_name("").is_err());
        assert!(check_name("sixteen_chars_xx").is_err());
    }
}
