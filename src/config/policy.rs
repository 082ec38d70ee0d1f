//! Timing and retry settings for the connectivity supervisor.

use crate::portal::PortalConfig;
use std::time::Duration;

/// Association attempts during bootstrap and after a portal submission.
pub const WIFI_RETRY_COUNT: u32 = 6;

/// Time allowed for a single association attempt.
pub const WIFI_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between failed association attempts.
pub const WIFI_RETRY_DELAY: Duration = Duration::from_secs(2);

/// How often an in-progress association is polled.
pub const WIFI_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often a live association is probed.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Prefix of the provisioning access point SSID.
pub const AP_SSID_PREFIX: &str = "ESP32_Config_";

/// Bounded retry schedule for [`attempt_connect`].
///
/// [`attempt_connect`]: crate::supervisor::ConnectivitySupervisor::attempt_connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub per_attempt_timeout: Duration,
    pub inter_attempt_delay: Duration,
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: WIFI_RETRY_COUNT,
            per_attempt_timeout: WIFI_CONNECT_TIMEOUT,
            inter_attempt_delay: WIFI_RETRY_DELAY,
            poll_interval: WIFI_POLL_INTERVAL,
        }
    }
}

impl RetryPolicy {
    /// Upper bound on time spent in one bounded retry run.
    pub fn max_blocking_time(&self) -> Duration {
        (self.per_attempt_timeout + self.inter_attempt_delay) * self.max_attempts
    }
}

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Schedule for bootstrap and post-submission attempts.
    pub bootstrap: RetryPolicy,
    pub health_check_interval: Duration,
    /// Pause between steady-state reconnect attempts.
    pub reconnect_delay: Duration,
    /// Time allowed for one steady-state reconnect attempt.
    pub reconnect_timeout: Duration,
    /// Re-enter provisioning after this many consecutive steady-state
    /// failures. `None` retries forever.
    pub reprovision_after: Option<u32>,
    pub ap_ssid_prefix: String,
    pub portal: PortalConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            bootstrap: RetryPolicy::default(),
            health_check_interval: HEALTH_CHECK_INTERVAL,
            reconnect_delay: WIFI_RETRY_DELAY,
            reconnect_timeout: WIFI_CONNECT_TIMEOUT,
            reprovision_after: None,
            ap_ssid_prefix: AP_SSID_PREFIX.to_string(),
            portal: PortalConfig::default(),
        }
    }
}
