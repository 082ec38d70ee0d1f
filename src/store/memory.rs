//! In-memory configuration store.

use super::{check_name, ConfigStore, StoreError, StoredValue};
use std::collections::BTreeMap;

pub(crate) type Namespaces = BTreeMap<String, BTreeMap<String, StoredValue>>;

/// Configuration store held entirely in memory.
///
/// Keeps a working view and a committed view so tests can simulate power
/// loss with [`MemoryStore::discard_uncommitted`].
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    live: Namespaces,
    committed: Namespaces,
    commits: usize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose committed contents are `data`.
    pub(crate) fn from_committed(data: Namespaces) -> Self {
        Self {
            live: data.clone(),
            committed: data,
            commits: 0,
        }
    }

    /// Drop every write that was not committed.
    pub fn discard_uncommitted(&mut self) {
        self.live = self.committed.clone();
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> usize {
        self.commits
    }

    /// Committed contents of every namespace.
    pub(crate) fn committed(&self) -> &Namespaces {
        &self.committed
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<&StoredValue>, StoreError> {
        check_name(namespace)?;
        check_name(key)?;
        Ok(self.live.get(namespace).and_then(|ns| ns.get(key)))
    }

    fn set(&mut self, namespace: &str, key: &str, value: StoredValue) -> Result<(), StoreError> {
        check_name(namespace)?;
        check_name(key)?;
        self.live
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }
}

impl ConfigStore for MemoryStore {
    fn get_string(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        Ok(match self.get(namespace, key)? {
            Some(StoredValue::Str(s)) => Some(s.clone()),
            _ => None,
        })
    }

    fn get_int(&self, namespace: &str, key: &str) -> Result<Option<i32>, StoreError> {
        Ok(match self.get(namespace, key)? {
            Some(StoredValue::Int(v)) => Some(*v),
            _ => None,
        })
    }

    fn get_bool(&self, namespace: &str, key: &str) -> Result<Option<bool>, StoreError> {
        Ok(match self.get(namespace, key)? {
            Some(StoredValue::Bool(v)) => Some(*v),
            _ => None,
        })
    }

    fn set_string(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        self.set(namespace, key, StoredValue::Str(value.to_string()))
    }

    fn set_int(&mut self, namespace: &str, key: &str, value: i32) -> Result<(), StoreError> {
        self.set(namespace, key, StoredValue::Int(value))
    }

    fn set_bool(&mut self, namespace: &str, key: &str, value: bool) -> Result<(), StoreError> {
        self.set(namespace, key, StoredValue::Bool(value))
    }

    fn erase_key(&mut self, namespace: &str, key: &str) -> Result<(), StoreError> {
        check_name(namespace)?;
        check_name(key)?;
        if let Some(ns) = self.live.get_mut(namespace) {
            ns.remove(key);
        }
        Ok(())
    }

    fn erase_all(&mut self, namespace: &str) -> Result<(), StoreError> {
        check_name(namespace)?;
        self.live.remove(namespace);
        Ok(())
    }

    fn commit(&mut self, namespace: &str) -> Result<(), StoreError> {
        check_name(namespace)?;
        match self.live.get(namespace) {
            Some(ns) => {
                self.committed.insert(namespace.to_string(), ns.clone());
            }
            None => {
                self.committed.remove(namespace);
            }
        }
        self.commits += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncommitted_writes_are_lost() {
        let mut store = MemoryStore::new();
        store.set_string("wifi", "ssid", "HomeNet").unwrap();
        store.discard_uncommitted();
        assert_eq!(store.get_string("wifi", "ssid").unwrap(), None);
    }

    #[test]
    fn test_commit_is_per_namespace() {
        let mut store = MemoryStore::new();
        store.set_string("wifi", "ssid", "HomeNet").unwrap();
        store.set_string("mqtt", "broker", "10.0.0.5").unwrap();
        store.commit("wifi").unwrap();
        store.discard_uncommitted();

        assert_eq!(
            store.get_string("wifi", "ssid").unwrap().as_deref(),
            Some("HomeNet")
        );
        assert_eq!(store.get_string("mqtt", "broker").unwrap(), None);
    }

    #[test]
    fn test_erase_all_then_commit() {
        let mut store = MemoryStore::new();
        store.set_string("wifi", "ssid", "HomeNet").unwrap();
        store.set_string("wifi", "password", "secret").unwrap();
        store.set_int("mqtt", "port", 1883).unwrap();
        store.commit("wifi").unwrap();
        store.commit("mqtt").unwrap();

        store.erase_all("wifi").unwrap();
        store.commit("wifi").unwrap();
        store.discard_uncommitted();

        assert_eq!(store.get_string("wifi", "ssid").unwrap(), None);
        assert_eq!(store.get_string("wifi", "password").unwrap(), None);
        assert_eq!(store.get_int("mqtt", "port").unwrap(), Some(1883));
    }

    #[test]
    fn test_erase_missing_key_is_ok() {
        let mut store = MemoryStore::new();
        assert!(store.erase_key("wifi", "ssid").is_ok());
    }

    #[test]
    fn test_overwrite_changes_type() {
        let mut store = MemoryStore::new();
        store.set_string("gpio", "pin_2", "out").unwrap();
        store.set_bool("gpio", "pin_2", true).unwrap();
        assert_eq!(store.get_bool("gpio", "pin_2").unwrap(), Some(true));
        assert_eq!(store.get_string("gpio", "pin_2").unwrap(), None);
    }
}
