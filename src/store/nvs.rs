//! ESP-IDF NVS configuration store.
//!
//! Each namespace maps to an NVS namespace on the default partition.
//! Strings use `nvs_set_str`, integers `i32`, booleans `u8`.
//!
//! NVS commits every individual write, so [`ConfigStore::commit`] has
//! nothing left to flush.

use super::{check_name, ConfigStore, StoreError};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use esp_idf_sys::{esp, EspError};
use log::{debug, info};
use std::ffi::CString;

/// Largest string value read back from NVS, including the terminator.
const MAX_STRING_LEN: usize = 256;

/// NVS-backed configuration store.
pub struct NvsStore {
    partition: EspDefaultNvsPartition,
}

impl NvsStore {
    /// Take the default NVS partition.
    pub fn take() -> Result<Self, StoreError> {
        let partition = EspDefaultNvsPartition::take()?;
        info!("NVS store ready");
        Ok(Self { partition })
    }

    /// Wrap an already-taken partition (shared with the Wi-Fi driver).
    pub fn new(partition: EspDefaultNvsPartition) -> Self {
        Self { partition }
    }

    fn namespace(&self, namespace: &str) -> Result<EspNvs<NvsDefault>, StoreError> {
        check_name(namespace)?;
        Ok(EspNvs::new(self.partition.clone(), namespace, true)?)
    }
}

/// Treat "wrong type" the same as "missing".
fn mismatch_as_none<T>(result: Result<Option<T>, EspError>) -> Result<Option<T>, StoreError> {
    match result {
        Ok(v) => Ok(v),
        Err(e) if e.code() == esp_idf_sys::ESP_ERR_NVS_TYPE_MISMATCH as esp_idf_sys::esp_err_t => {
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

impl ConfigStore for NvsStore {
    fn get_string(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        check_name(key)?;
        let nvs = self.namespace(namespace)?;
        let mut buf = [0u8; MAX_STRING_LEN];
        let value = mismatch_as_none(nvs.get_str(key, &mut buf))?;
        Ok(value.map(str::to_string))
    }

    fn get_int(&self, namespace: &str, key: &str) -> Result<Option<i32>, StoreError> {
        check_name(key)?;
        let nvs = self.namespace(namespace)?;
        mismatch_as_none(nvs.get_i32(key))
    }

    fn get_bool(&self, namespace: &str, key: &str) -> Result<Option<bool>, StoreError> {
        check_name(key)?;
        let nvs = self.namespace(namespace)?;
        Ok(mismatch_as_none(nvs.get_u8(key))?.map(|v| v != 0))
    }

    fn set_string(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        check_name(key)?;
        let mut nvs = self.namespace(namespace)?;
        // Type of an existing key cannot change in place
        nvs.remove(key)?;
        nvs.set_str(key, value)?;
        Ok(())
    }

    fn set_int(&mut self, namespace: &str, key: &str, value: i32) -> Result<(), StoreError> {
        check_name(key)?;
        let mut nvs = self.namespace(namespace)?;
        nvs.remove(key)?;
        nvs.set_i32(key, value)?;
        Ok(())
    }

    fn set_bool(&mut self, namespace: &str, key: &str, value: bool) -> Result<(), StoreError> {
        check_name(key)?;
        let mut nvs = self.namespace(namespace)?;
        nvs.remove(key)?;
        nvs.set_u8(key, value as u8)?;
        Ok(())
    }

    fn erase_key(&mut self, namespace: &str, key: &str) -> Result<(), StoreError> {
        check_name(key)?;
        let mut nvs = self.namespace(namespace)?;
        if !nvs.remove(key)? {
            debug!("{}/{} was not set", namespace, key);
        }
        Ok(())
    }

    fn erase_all(&mut self, namespace: &str) -> Result<(), StoreError> {
        check_name(namespace)?;
        let name =
            CString::new(namespace).map_err(|_| StoreError::InvalidName(namespace.to_string()))?;

        let mut handle: esp_idf_sys::nvs_handle_t = 0;
        // SAFETY: `name` outlives the calls and `handle` is closed on every path
        // after a successful open.
        unsafe {
            esp!(esp_idf_sys::nvs_open(
                name.as_ptr(),
                esp_idf_sys::nvs_open_mode_t_NVS_READWRITE,
                &mut handle,
            ))?;
            let result = esp!(esp_idf_sys::nvs_erase_all(handle))
                .and_then(|_| esp!(esp_idf_sys::nvs_commit(handle)));
            esp_idf_sys::nvs_close(handle);
            result?;
        }

        info!("Erased NVS namespace '{}'", namespace);
        Ok(())
    }

    fn commit(&mut self, namespace: &str) -> Result<(), StoreError> {
        check_name(namespace)?;
        debug!("NVS namespace '{}' already committed", namespace);
        Ok(())
    }
}
