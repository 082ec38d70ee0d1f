//! Persistent and compile-time configuration.
//!
//! - [`wifi`] - station credentials (`wifi` namespace)
//! - [`broker`] - message broker settings (`mqtt` namespace)
//! - [`policy`] - retry timing and supervisor defaults

mod broker;
mod policy;
mod wifi;

pub use broker::{
    generate_client_id, BrokerConfig, CLIENT_ID_PREFIX, DEFAULT_BROKER_PORT, MQTT_NAMESPACE,
};
pub use policy::{
    RetryPolicy, SupervisorConfig, AP_SSID_PREFIX, HEALTH_CHECK_INTERVAL, WIFI_CONNECT_TIMEOUT,
    WIFI_POLL_INTERVAL, WIFI_RETRY_COUNT, WIFI_RETRY_DELAY,
};
pub use wifi::{ConfigError, NetworkCredentials, MAX_PASSWORD_LEN, MAX_SSID_LEN, WIFI_NAMESPACE};
