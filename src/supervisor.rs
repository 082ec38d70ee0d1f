//! Connectivity supervisor.
//!
//! Owns the radio, the credential store and the provisioning portal, and
//! moves the device between the [`ConnectivityState`]s:
//!
//! ```text
//!  start ──► UNCONFIGURED ──────────────────────────► PROVISIONING ◄──┐
//!    │                                                   │  ▲         │
//!    └──────► CONNECTING ──(6 failed attempts)───────────┘  │         │
//!                 │  ▲                                      │         │
//!                 │  └──────(credentials submitted)─────────┘         │
//!                 ▼                                                   │
//!             CONNECTED ◄──► RECONNECTING ──(optional escalation)─────┘
//! ```
//!
//! Only [`ConnectivitySupervisor::attempt_connect`] blocks, for at most
//! `max_attempts × (timeout + delay)`. Everything else is driven by
//! [`ConnectivitySupervisor::tick`], which never blocks on the network.

use crate::clock::Clock;
use crate::config::{ConfigError, NetworkCredentials, RetryPolicy, SupervisorConfig};
use crate::portal::{PortalRequest, ProvisioningPortal};
use crate::radio::{AccessPointIdentity, Radio};
use crate::status::{ConnectivityState, SharedStatus};
use crate::store::{ConfigStore, StoreError};
use log::{debug, error, info, warn};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wait before retrying a portal activation that failed.
const PORTAL_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Steady-state reconnect progress.
#[derive(Debug, Clone, Copy)]
enum ReconnectPhase {
    /// Next association starts at `until`.
    Waiting { until: Instant },
    /// Association requested at `since`.
    Associating { since: Instant },
}

/// The association state machine.
pub struct ConnectivitySupervisor<R: Radio, S: ConfigStore> {
    radio: R,
    store: S,
    clock: Arc<dyn Clock>,
    config: SupervisorConfig,
    portal: ProvisioningPortal,
    identity: AccessPointIdentity,
    status: SharedStatus,
    state: ConnectivityState,
    credentials: Option<NetworkCredentials>,
    next_health_check: Instant,
    reconnect: ReconnectPhase,
    consecutive_failures: u32,
    next_portal_retry: Instant,
    restart_requested: bool,
}

impl<R: Radio, S: ConfigStore> ConnectivitySupervisor<R, S> {
    /// Create a supervisor. Nothing happens until [`start`](Self::start).
    ///
    /// The access point identity is generated here, once per boot.
    pub fn new(radio: R, store: S, config: SupervisorConfig, clock: Arc<dyn Clock>) -> Self {
        let status = SharedStatus::new();
        let portal = ProvisioningPortal::new(config.portal.clone(), status.clone());
        let identity = AccessPointIdentity::generate(&config.ap_ssid_prefix);
        let now = clock.now();

        Self {
            radio,
            store,
            clock,
            config,
            portal,
            identity,
            status,
            state: ConnectivityState::Unconfigured,
            credentials: None,
            next_health_check: now,
            reconnect: ReconnectPhase::Waiting { until: now },
            consecutive_failures: 0,
            next_portal_retry: now,
            restart_requested: false,
        }
    }

    /// Boot sequence: load credentials, then connect or provision.
    ///
    /// Returns the state reached.
    pub fn start(&mut self) -> ConnectivityState {
        self.restart_requested = false;
        self.credentials = NetworkCredentials::load(&mut self.store);

        match &self.credentials {
            None => {
                info!("No stored credentials");
                self.set_state(ConnectivityState::Unconfigured);
                self.enter_provisioning();
            }
            Some(creds) => {
                info!("Stored credentials found for '{}'", creds.ssid);
                let policy = self.config.bootstrap;
                if let Err(e) = self.attempt_connect(&policy) {
                    warn!("Bootstrap connection failed: {}", e);
                }
            }
        }
        self.state
    }

    /// Bounded association attempts with the current credentials.
    ///
    /// Each attempt is polled every `poll_interval` until associated or
    /// `per_attempt_timeout` passes; failed attempts are followed by
    /// `inter_attempt_delay` except the last. On success the state is
    /// `Connected`; after the last failure the portal is brought up and the
    /// state is `Provisioning`. Credentials stay stored either way.
    pub fn attempt_connect(&mut self, policy: &RetryPolicy) -> Result<(), SupervisorError> {
        let creds = self
            .credentials
            .clone()
            .ok_or(SupervisorError::ConfigurationMissing)?;

        // Station and access point are mutually exclusive
        self.portal.deactivate(&mut self.radio);
        self.set_state(ConnectivityState::Connecting);

        for attempt in 1..=policy.max_attempts {
            info!(
                "Connecting to '{}' (attempt {}/{})",
                creds.ssid, attempt, policy.max_attempts
            );

            match self.radio.begin_association(&creds) {
                Ok(()) => {
                    if self.wait_for_association(policy) {
                        self.on_connected();
                        return Ok(());
                    }
                }
                Err(e) => warn!("Association request failed: {}", e),
            }

            if let Err(e) = self.radio.disconnect() {
                warn!("Disconnect after failed attempt: {}", e);
            }
            if attempt < policy.max_attempts {
                self.clock.sleep(policy.inter_attempt_delay);
            }
        }

        error!(
            "Could not join '{}' after {} attempts",
            creds.ssid, policy.max_attempts
        );
        self.enter_provisioning();
        Err(SupervisorError::AssociationFailed {
            attempts: policy.max_attempts,
        })
    }

    fn wait_for_association(&mut self, policy: &RetryPolicy) -> bool {
        let started = self.clock.now();
        let poll = policy.poll_interval.max(Duration::from_millis(1));
        loop {
            if self.radio.is_associated() {
                return true;
            }
            let waited = self.clock.now().duration_since(started);
            if waited >= policy.per_attempt_timeout {
                return false;
            }
            self.clock.sleep(poll.min(policy.per_attempt_timeout - waited));
        }
    }

    /// Credentials arrived from the portal.
    ///
    /// Persists them, takes the portal down and runs the bootstrap retry
    /// schedule. On failure the portal comes back up. Credentials that
    /// cannot be persisted are rejected before any attempt, with the portal
    /// left as it was.
    pub fn on_credentials_submitted(
        &mut self,
        credentials: NetworkCredentials,
    ) -> Result<(), SupervisorError> {
        credentials.validate()?;
        credentials.save(&mut self.store)?;
        self.credentials = Some(credentials);

        let policy = self.config.bootstrap;
        self.attempt_connect(&policy)
    }

    /// Replace stored credentials without connecting.
    ///
    /// The new credentials are used by the next association attempt.
    pub fn configure_credentials(
        &mut self,
        credentials: NetworkCredentials,
    ) -> Result<(), SupervisorError> {
        credentials.validate()?;
        credentials.save(&mut self.store)?;
        self.credentials = Some(credentials);
        self.publish_status();
        Ok(())
    }

    /// Advance the state machine. Never blocks on the network.
    pub fn tick(&mut self) {
        match self.state {
            ConnectivityState::Connected => self.tick_connected(),
            ConnectivityState::Reconnecting => self.tick_reconnecting(),
            ConnectivityState::Provisioning => self.tick_provisioning(),
            ConnectivityState::Unconfigured | ConnectivityState::Connecting => {}
        }
    }

    fn tick_connected(&mut self) {
        let now = self.clock.now();
        if now < self.next_health_check {
            return;
        }
        self.next_health_check = now + self.config.health_check_interval;

        if self.radio.is_associated() {
            debug!("Health check ok");
            self.publish_status();
            return;
        }

        warn!("Association lost, reconnecting");
        self.consecutive_failures = 0;
        self.reconnect = ReconnectPhase::Waiting { until: now };
        self.set_state(ConnectivityState::Reconnecting);
        self.tick_reconnecting();
    }

    fn tick_reconnecting(&mut self) {
        let now = self.clock.now();
        match self.reconnect {
            ReconnectPhase::Waiting { until } if now >= until => {
                let Some(creds) = &self.credentials else {
                    self.enter_provisioning();
                    return;
                };
                debug!("Reconnect attempt {}", self.consecutive_failures + 1);
                match self.radio.begin_association(creds) {
                    Ok(()) => self.reconnect = ReconnectPhase::Associating { since: now },
                    Err(e) => {
                        warn!("Reconnect request failed: {}", e);
                        self.reconnect_failed(now);
                    }
                }
            }
            ReconnectPhase::Waiting { .. } => {}
            ReconnectPhase::Associating { since } => {
                if self.radio.is_associated() {
                    info!(
                        "Reconnected after {} failed attempts",
                        self.consecutive_failures
                    );
                    self.on_connected();
                } else if now.duration_since(since) >= self.config.reconnect_timeout {
                    if let Err(e) = self.radio.disconnect() {
                        warn!("Disconnect after failed reconnect: {}", e);
                    }
                    self.reconnect_failed(now);
                }
            }
        }
    }

    fn reconnect_failed(&mut self, now: Instant) {
        self.consecutive_failures += 1;
        if let Some(limit) = self.config.reprovision_after {
            if self.consecutive_failures >= limit {
                warn!(
                    "{} consecutive reconnect failures, re-entering provisioning",
                    self.consecutive_failures
                );
                self.enter_provisioning();
                return;
            }
        }
        self.reconnect = ReconnectPhase::Waiting {
            until: now + self.config.reconnect_delay,
        };
    }

    fn tick_provisioning(&mut self) {
        if !self.portal.is_active() {
            if self.clock.now() >= self.next_portal_retry {
                self.activate_portal();
            }
            return;
        }

        // Drain first; connecting or resetting tears the portal down
        let mut reset = false;
        let mut submission: Option<NetworkCredentials> = None;
        while let Some(request) = self.portal.try_next_request() {
            match request {
                PortalRequest::SubmitCredentials(creds) => {
                    if let Some(earlier) = submission.replace(creds) {
                        info!("Superseding queued credentials for '{}'", earlier.ssid);
                    }
                }
                PortalRequest::FactoryReset => reset = true,
                PortalRequest::Scan(reply) => {
                    let results = self.radio.scan().unwrap_or_else(|e| {
                        warn!("Scan failed: {}", e);
                        Vec::new()
                    });
                    info!("Scan found {} networks", results.len());
                    self.portal.record_scan(&results);
                    // The handler may have given up waiting
                    let _ = reply.send(results);
                }
            }
        }

        if reset {
            if let Some(dropped) = submission {
                info!("Reset requested, dropping credentials for '{}'", dropped.ssid);
            }
            if let Err(e) = self.factory_reset() {
                error!("Factory reset incomplete: {}", e);
            }
        } else if let Some(creds) = submission {
            if let Err(e) = self.on_credentials_submitted(creds) {
                warn!("Submitted credentials did not connect: {}", e);
            }
        }
    }

    /// Enter provisioning: drop any association and bring the portal up.
    ///
    /// A portal left over from an earlier episode is torn down first. If
    /// activation fails it is retried from `tick`.
    pub fn enter_provisioning(&mut self) {
        self.portal.deactivate(&mut self.radio);
        if let Err(e) = self.radio.disconnect() {
            warn!("Disconnect before provisioning: {}", e);
        }
        self.set_state(ConnectivityState::Provisioning);
        self.activate_portal();
    }

    fn activate_portal(&mut self) {
        if let Err(e) = self.portal.activate(&mut self.radio, &self.identity) {
            error!(
                "Portal activation failed: {}, retrying in {:?}",
                e, PORTAL_RETRY_INTERVAL
            );
            self.next_portal_retry = self.clock.now() + PORTAL_RETRY_INTERVAL;
        }
    }

    /// Erase stored credentials and request a restart.
    ///
    /// The portal is taken down and the state becomes `Unconfigured`; the
    /// owner of the supervisor honours [`take_restart_request`].
    ///
    /// [`take_restart_request`]: Self::take_restart_request
    pub fn factory_reset(&mut self) -> Result<(), SupervisorError> {
        warn!("Factory reset: erasing Wi-Fi configuration");
        let erased = NetworkCredentials::erase(&mut self.store);
        self.credentials = None;
        self.portal.deactivate(&mut self.radio);
        if let Err(e) = self.radio.disconnect() {
            warn!("Disconnect during reset: {}", e);
        }
        self.set_state(ConnectivityState::Unconfigured);
        self.restart_requested = true;
        erased.map_err(SupervisorError::from)
    }

    /// Returns `true` once after a restart was requested.
    pub fn take_restart_request(&mut self) -> bool {
        std::mem::take(&mut self.restart_requested)
    }

    fn on_connected(&mut self) {
        self.consecutive_failures = 0;
        self.next_health_check = self.clock.now() + self.config.health_check_interval;
        self.set_state(ConnectivityState::Connected);
        info!(
            "Connected to '{}', address {}",
            self.ssid().unwrap_or_default(),
            self.ip().map_or_else(|| "unknown".to_string(), |ip| ip.to_string())
        );
    }

    fn set_state(&mut self, state: ConnectivityState) {
        if self.state != state {
            info!("Connectivity: {} -> {}", self.state, state);
        }
        self.state = state;
        self.publish_status();
    }

    fn publish_status(&self) {
        let ssid = self
            .credentials
            .as_ref()
            .map(|c| c.ssid.clone())
            .unwrap_or_default();
        let ip = self.ip();
        let state = self.state;
        self.status.update(|s| {
            s.state = state;
            s.ssid = ssid;
            s.ip = ip;
        });
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    /// SSID of the joined network while connected.
    pub fn ssid(&self) -> Option<String> {
        if self.state == ConnectivityState::Connected {
            self.radio.connected_ssid()
        } else {
            None
        }
    }

    /// Station address while connected.
    pub fn ip(&self) -> Option<Ipv4Addr> {
        if self.state == ConnectivityState::Connected {
            self.radio.ip_addr()
        } else {
            None
        }
    }

    /// Handle for readers of the connectivity status.
    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    pub fn credentials(&self) -> Option<&NetworkCredentials> {
        self.credentials.as_ref()
    }

    pub fn access_point(&self) -> &AccessPointIdentity {
        &self.identity
    }

    pub fn portal(&self) -> &ProvisioningPortal {
        &self.portal
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}

/// Supervisor errors. None of them are fatal to the device.
#[derive(Debug)]
pub enum SupervisorError {
    /// No credentials to connect with.
    ConfigurationMissing,
    /// Every attempt of a bounded run failed.
    AssociationFailed { attempts: u32 },
    /// Credentials failed validation.
    InvalidCredentials(ConfigError),
    /// Credential store failed.
    Store(StoreError),
}

impl From<ConfigError> for SupervisorError {
    fn from(e: ConfigError) -> Self {
        Self::InvalidCredentials(e)
    }
}

impl From<StoreError> for SupervisorError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigurationMissing => write!(f, "no network credentials configured"),
            Self::AssociationFailed { attempts } => {
                write!(f, "association failed after {} attempts", attempts)
            }
            Self::InvalidCredentials(e) => write!(f, "invalid credentials: {}", e),
            Self::Store(e) => write!(f, "credential store: {}", e),
        }
    }
}

impl std::error::Error for SupervisorError {}
