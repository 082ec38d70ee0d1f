//! Host-based MQTT station for development and testing.
//!
//! Runs the full stack against a software radio: the connectivity
//! supervisor, the provisioning portal on a local port, and a broker
//! session over rumqttc. Each component gets its own thread; they share
//! only the status handle and bounded queues.
//!
//! # Usage
//!
//! ```bash
//! MQTT_HOST=localhost cargo run --bin host-node
//! ```
//!
//! | Variable           | Default                             |
//! |--------------------|-------------------------------------|
//! | `NODE_CONFIG_PATH` | `~/.mqtt-station-esp32/config.json` |
//! | `PORTAL_HTTP_ADDR` | `0.0.0.0:8080`                      |
//! | `PORTAL_DNS_PORT`  | `5353` (`off` disables DNS)         |
//! | `MQTT_HOST`        | stored broker settings              |
//! | `MQTT_PORT`        | `1883`                              |
//! | `MQTT_CLIENT_ID`   | generated `ESP32Client-xxxx`        |
//! | `MQTT_USER`        | none                                |
//! | `MQTT_PASSWORD`    | none                                |

use log::{debug, error, info, warn};
use mqtt_station_esp32::command::TOPIC_COMMANDS;
use mqtt_station_esp32::config::DEFAULT_BROKER_PORT;
use mqtt_station_esp32::telemetry::{self, Heartbeat};
use mqtt_station_esp32::{
    BrokerConfig, Clock, ConfigStore, ConnectivitySupervisor, DeviceCommand, FileStore, HostRadio,
    MessagingSession, PortalConfig, RumqttTransport, SharedStatus, SupervisorConfig, SystemClock,
};
use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TICK_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_DNS_PORT: u16 = 5353;

fn portal_config() -> PortalConfig {
    let dns_port = match env::var("PORTAL_DNS_PORT") {
        Ok(v) if v.eq_ignore_ascii_case("off") => None,
        Ok(v) => match v.parse() {
            Ok(port) => Some(port),
            Err(_) => {
                warn!("Invalid PORTAL_DNS_PORT '{}', using {}", v, DEFAULT_DNS_PORT);
                Some(DEFAULT_DNS_PORT)
            }
        },
        Err(_) => Some(DEFAULT_DNS_PORT),
    };

    PortalConfig {
        http_addr: env::var("PORTAL_HTTP_ADDR").unwrap_or_else(|_| DEFAULT_HTTP_ADDR.to_string()),
        dns_port,
        ..PortalConfig::default()
    }
}

/// Broker settings from the environment, persisted, or else from the store.
fn broker_config<S: ConfigStore>(store: &mut S) -> BrokerConfig {
    let Ok(host) = env::var("MQTT_HOST") else {
        return BrokerConfig::load(store).unwrap_or_else(|e| {
            warn!("Stored broker settings unusable: {}", e);
            BrokerConfig::default()
        });
    };

    let port = env::var("MQTT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_BROKER_PORT);
    let mut config = BrokerConfig::new(host, port);
    if let Ok(id) = env::var("MQTT_CLIENT_ID") {
        config = config.with_client_id(id);
    }
    if let Ok(user) = env::var("MQTT_USER") {
        config = config.with_credentials(user, env::var("MQTT_PASSWORD").unwrap_or_default());
    }

    if let Err(e) = config.save(store) {
        warn!("Could not persist broker settings: {}", e);
    }
    config
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== MQTT station host node starting ===");

    let store = match env::var("NODE_CONFIG_PATH") {
        Ok(path) => FileStore::open(path),
        Err(_) => FileStore::open_default(),
    };
    let mut store = match store {
        Ok(store) => store,
        Err(e) => {
            error!("Cannot open configuration store: {}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration at {}", store.path().display());

    let broker = broker_config(&mut store);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let config = SupervisorConfig {
        portal: portal_config(),
        ..SupervisorConfig::default()
    };

    let mut supervisor =
        ConnectivitySupervisor::new(HostRadio::new(), store, config, clock.clone());
    let status = supervisor.status();
    info!("Provisioning network would be '{}'", supervisor.access_point().ssid);

    let (telemetry_tx, telemetry_rx) = telemetry::channel();

    let supervisor_thread = spawn("supervisor", move || {
        supervisor.start();
        loop {
            supervisor.tick();
            if supervisor.take_restart_request() {
                warn!("Restart requested, running boot sequence again");
                supervisor.start();
            }
            thread::sleep(TICK_INTERVAL);
        }
    });

    let session_status = status.clone();
    let session_clock = clock.clone();
    let session_thread = spawn("session", move || {
        let mut session =
            MessagingSession::new(RumqttTransport::new(), session_status, session_clock);
        session.configure(broker);
        session.on_message(|message| match DeviceCommand::from_payload(&message.payload) {
            Ok(command) => info!("Command (no GPIO on host): {}", command),
            Err(e) => warn!("Ignoring message on '{}': {}", message.topic, e),
        });

        loop {
            session.tick();
            if session.connected() && session.subscriptions().is_empty() {
                if let Err(e) = session.subscribe(TOPIC_COMMANDS) {
                    warn!("Subscribe to '{}' failed: {}", TOPIC_COMMANDS, e);
                }
            }
            let sent = telemetry_rx.drain_into(&mut session);
            if sent > 0 {
                debug!("Published {} telemetry messages", sent);
            }
            thread::sleep(TICK_INTERVAL);
        }
    });

    let telemetry_thread = spawn("telemetry", move || {
        run_heartbeat(Heartbeat::new(clock), status, telemetry_tx)
    });

    for handle in [supervisor_thread, session_thread, telemetry_thread] {
        if handle.join().is_err() {
            error!("Component thread panicked");
        }
    }
}

fn spawn(name: &str, f: impl FnOnce() + Send + 'static) -> thread::JoinHandle<()> {
    match thread::Builder::new().name(name.to_string()).spawn(f) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to spawn {} thread: {}", name, e);
            std::process::exit(1);
        }
    }
}

fn run_heartbeat(
    mut heartbeat: Heartbeat,
    status: SharedStatus,
    telemetry: telemetry::TelemetrySender,
) {
    loop {
        if let Some(report) = heartbeat.poll(&status.snapshot()) {
            telemetry.offer(report);
        }
        thread::sleep(heartbeat.remaining().max(TICK_INTERVAL));
    }
}
