//! MQTT station firmware binary.
//!
//! Single cooperative loop: the connectivity supervisor and the broker
//! session are ticked every 100ms on the main task. Commands received on
//! `device/commands` drive GPIOs; a status report is published every 10s.

#[cfg(feature = "esp32")]
const MAIN_LOOP_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

#[cfg(feature = "esp32")]
fn main() {
    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();

    // Initialize ESP-IDF logger for log crate integration
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("=== MQTT station starting ===");

    match run() {
        Ok(()) => log::warn!("Restart requested"),
        Err(e) => log::error!("Fatal: {}", e),
    }

    // Brief pause so the log reaches the serial console
    std::thread::sleep(std::time::Duration::from_secs(1));
    unsafe { esp_idf_sys::esp_restart() }
}

#[cfg(feature = "esp32")]
fn run() -> Result<(), Box<dyn std::error::Error>> {
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use log::{debug, info, warn};
    use mqtt_station_esp32::command::TOPIC_COMMANDS;
    use mqtt_station_esp32::gpio::EspGpio;
    use mqtt_station_esp32::radio::EspRadio;
    use mqtt_station_esp32::session::EspMqttTransport;
    use mqtt_station_esp32::store::NvsStore;
    use mqtt_station_esp32::telemetry::Heartbeat;
    use mqtt_station_esp32::{
        BrokerConfig, Clock, ConnectivitySupervisor, DeviceCommand, MessagingSession,
        SupervisorConfig, SystemClock,
    };
    use std::sync::Arc;

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let partition = EspDefaultNvsPartition::take()?;

    let radio = EspRadio::new(peripherals.modem, sysloop, Some(partition.clone()))?;
    let mut store = NvsStore::new(partition);

    let broker = BrokerConfig::load(&mut store).unwrap_or_else(|e| {
        warn!("Broker settings unusable ({}), session disabled", e);
        BrokerConfig::default()
    });

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut supervisor =
        ConnectivitySupervisor::new(radio, store, SupervisorConfig::default(), clock.clone());
    let state = supervisor.start();
    info!("Bootstrap finished in state {}", state);

    let status = supervisor.status();
    let mut session = MessagingSession::new(EspMqttTransport::new(), status.clone(), clock.clone());
    session.configure(broker);

    let mut gpio = EspGpio::new();
    session.on_message(move |message| match DeviceCommand::from_payload(&message.payload) {
        Ok(command) => {
            info!("Command: {}", command);
            if let Err(e) = gpio.apply(&command) {
                warn!("Command '{}' failed: {}", command, e);
            }
        }
        Err(e) => warn!("Ignoring message on '{}': {}", message.topic, e),
    });

    let mut heartbeat = Heartbeat::new(clock);

    loop {
        supervisor.tick();
        session.tick();

        if session.connected() && session.subscriptions().is_empty() {
            if let Err(e) = session.subscribe(TOPIC_COMMANDS) {
                warn!("Subscribe to '{}' failed: {}", TOPIC_COMMANDS, e);
            }
        }

        if let Some(report) = heartbeat.poll(&status.snapshot()) {
            if let Err(e) = session.publish(&report.topic, &report.payload, report.retain) {
                debug!("Status report dropped: {}", e);
            }
        }

        if supervisor.take_restart_request() {
            return Ok(());
        }

        std::thread::sleep(MAIN_LOOP_INTERVAL);
    }
}

#[cfg(not(feature = "esp32"))]
fn main() {
    println!("This binary requires the 'esp32' feature.");
    println!("Use 'cargo run --bin host-node' to run on the host.");
}
