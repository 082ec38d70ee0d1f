//! MQTT station firmware library for ESP32.
//!
//! Keeps a device online: joins the stored Wi-Fi network, falls back to a
//! captive provisioning portal when it cannot, and holds an MQTT session
//! while connected. Everything except the `esp32`-gated device drivers is
//! platform-independent and tested on the host.
//!
//! - [`supervisor`] - Wi-Fi association state machine
//! - [`portal`] - captive portal (access point, DNS, HTTP routes)
//! - [`session`] - broker session and transports
//! - [`store`] - namespaced key-value configuration storage

pub mod clock;
pub mod command;
pub mod config;
#[cfg(feature = "esp32")]
pub mod gpio;
pub mod portal;
pub mod radio;
pub mod session;
pub mod status;
pub mod store;
pub mod supervisor;
pub mod telemetry;

// Re-export commonly used items
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{CommandError, DeviceCommand};
pub use config::{BrokerConfig, ConfigError, NetworkCredentials, RetryPolicy, SupervisorConfig};
pub use portal::{PortalConfig, PortalError, PortalRequest, ProvisioningPortal};
pub use radio::{AccessPointIdentity, HostRadio, Radio, RadioError, ScanResult};
pub use session::{
    BrokerTransport, MessageEnvelope, MessagingSession, SessionError, TransportError,
};
pub use status::{ConnectivityState, SharedStatus, StatusSnapshot};
pub use store::{ConfigStore, MemoryStore, Settings, StoreError};
pub use supervisor::{ConnectivitySupervisor, SupervisorError};

#[cfg(not(target_os = "espidf"))]
pub use session::RumqttTransport;
#[cfg(not(target_os = "espidf"))]
pub use store::FileStore;
