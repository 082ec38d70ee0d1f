//! File-backed configuration store for host builds.
//!
//! All namespaces live in one JSON document, `~/.mqtt-station-esp32/config.json`
//! by default:
//!
//! ```json
//! { "wifi": { "ssid": "HomeNet", "password": "secret" }, "mqtt": { "port": 1883 } }
//! ```

use super::memory::{MemoryStore, Namespaces};
use super::{ConfigStore, StoreError};
use log::{debug, info};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Get the default config file path.
///
/// Returns `~/.mqtt-station-esp32/config.json`
pub fn default_config_path() -> io::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home)
        .join(".mqtt-station-esp32")
        .join("config.json"))
}

/// Configuration store persisted as a JSON file.
///
/// Reads and staged writes go to an in-memory copy; `commit` rewrites the
/// file atomically and verifies it by reading it back.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    cache: MemoryStore,
}

impl FileStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str::<Namespaces>(&text)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No config file at {:?}, starting empty", path);
                Namespaces::new()
            }
            Err(e) => return Err(e.into()),
        };

        info!("Config store opened at {:?}", path);
        Ok(Self {
            path,
            cache: MemoryStore::from_committed(data),
        })
    }

    /// Open the store at the default path.
    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(default_config_path()?)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self.cache.committed())?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;

        // Verify write by reading back
        let read_back: Namespaces = serde_json::from_str(&fs::read_to_string(&self.path)?)?;
        if &read_back != self.cache.committed() {
            return Err(StoreError::VerifyFailed);
        }
        Ok(())
    }
}

impl ConfigStore for FileStore {
    fn get_string(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        self.cache.get_string(namespace, key)
    }

    fn get_int(&self, namespace: &str, key: &str) -> Result<Option<i32>, StoreError> {
        self.cache.get_int(namespace, key)
    }

    fn get_bool(&self, namespace: &str, key: &str) -> Result<Option<bool>, StoreError> {
        self.cache.get_bool(namespace, key)
    }

    fn set_string(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        self.cache.set_string(namespace, key, value)
    }

    fn set_int(&mut self, namespace: &str, key: &str, value: i32) -> Result<(), StoreError> {
        self.cache.set_int(namespace, key, value)
    }

    fn set_bool(&mut self, namespace: &str, key: &str, value: bool) -> Result<(), StoreError> {
        self.cache.set_bool(namespace, key, value)
    }

    fn erase_key(&mut self, namespace: &str, key: &str) -> Result<(), StoreError> {
        self.cache.erase_key(namespace, key)
    }

    fn erase_all(&mut self, namespace: &str) -> Result<(), StoreError> {
        self.cache.erase_all(namespace)
    }

    fn commit(&mut self, namespace: &str) -> Result<(), StoreError> {
        self.cache.commit(namespace)?;
        self.write_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Settings;
    use std::env;
    use std::sync::atomic::{AtomicU32, Ordering};

    // Counter to ensure unique test files even in parallel execution
    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn unique_config_path() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let pid = std::process::id();
        env::temp_dir()
            .join(format!("mqtt-station-test-{}-{}", pid, id))
            .join("config.json")
    }

    #[test]
    fn test_missing_file_is_empty() {
        let path = unique_config_path();
        let store = FileStore::open(&path).expect("open");
        assert_eq!(store.get_string("wifi", "ssid").unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_commit_survives_reopen() {
        let path = unique_config_path();
        {
            let mut store = FileStore::open(&path).expect("open");
            let mut wifi = Settings::open(&mut store, "wifi");
            wifi.set_string("ssid", "HomeNet");
            wifi.set_string("password", "");
            wifi.close().expect("commit");
            store.set_int("mqtt", "port", 8883).unwrap();
            store.commit("mqtt").unwrap();
        }

        let store = FileStore::open(&path).expect("reopen");
        assert_eq!(
            store.get_string("wifi", "ssid").unwrap().as_deref(),
            Some("HomeNet")
        );
        assert_eq!(
            store.get_string("wifi", "password").unwrap().as_deref(),
            Some("")
        );
        assert_eq!(store.get_int("mqtt", "port").unwrap(), Some(8883));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_uncommitted_write_not_persisted() {
        let path = unique_config_path();
        {
            let mut store = FileStore::open(&path).expect("open");
            store.set_string("mqtt", "broker", "10.0.0.5").unwrap();
            store.commit("mqtt").unwrap();
            store.set_string("mqtt", "user", "device").unwrap();
        }

        let store = FileStore::open(&path).expect("reopen");
        assert!(store.get_string("mqtt", "broker").unwrap().is_some());
        assert_eq!(store.get_string("mqtt", "user").unwrap(), None);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_corrupted_file_is_error() {
        let path = unique_config_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();

        assert!(matches!(
            FileStore::open(&path),
            Err(StoreError::Corrupted(_))
        ));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
