//! Connectivity state shared between the supervisor and its readers.
//!
//! The supervisor is the only writer. The portal's HTTP thread and the
//! messaging session read snapshots; a reader never blocks the supervisor
//! for longer than a clone.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, RwLock};

/// Association state of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectivityState {
    /// No credentials stored.
    #[default]
    Unconfigured,
    /// Bounded association attempts in progress.
    Connecting,
    /// Associated with an address.
    Connected,
    /// Provisioning portal is serving.
    Provisioning,
    /// Association lost; retrying in the background.
    Reconnecting,
}

impl ConnectivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Provisioning => "provisioning",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of connectivity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusSnapshot {
    pub state: ConnectivityState,
    /// Configured network, empty when unconfigured.
    pub ssid: String,
    /// Station address while connected.
    pub ip: Option<Ipv4Addr>,
}

impl StatusSnapshot {
    pub fn connected(&self) -> bool {
        self.state == ConnectivityState::Connected
    }

    /// Portal is (or should be) serving.
    pub fn config_mode(&self) -> bool {
        self.state == ConnectivityState::Provisioning
    }
}

/// Cloneable handle to the current [`StatusSnapshot`].
#[derive(Debug, Clone, Default)]
pub struct SharedStatus(Arc<RwLock<StatusSnapshot>>);

impl SharedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn state(&self) -> ConnectivityState {
        self.0.read().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectivityState::Connected
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        let mut guard = self.0.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unconfigured() {
        let status = SharedStatus::new();
        let snap = status.snapshot();
        assert_eq!(snap.state, ConnectivityState::Unconfigured);
        assert!(!snap.connected());
        assert!(!snap.config_mode());
    }

    #[test]
    fn test_update_visible_through_clone() {
        let status = SharedStatus::new();
        let reader = status.clone();
        status.update(|s| {
            s.state = ConnectivityState::Connected;
            s.ssid = "HomeNet".into();
            s.ip = Some(Ipv4Addr::new(10, 0, 0, 7));
        });
        assert!(reader.is_connected());
        assert_eq!(reader.snapshot().ssid, "HomeNet");
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ConnectivityState::Provisioning.to_string(), "provisioning");
        assert_eq!(ConnectivityState::Reconnecting.as_str(), "reconnecting");
    }
}
