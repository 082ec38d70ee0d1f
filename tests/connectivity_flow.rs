//! End-to-end flows: boot, provisioning over HTTP, steady state, broker.
//!
//! Runs against the host radio and a manual clock, so blocking retry time
//! is measured rather than slept.

use mqtt_station_esp32::{
    BrokerConfig, BrokerTransport, ConnectivityState, ConnectivitySupervisor, HostRadio,
    ManualClock, MemoryStore, MessageEnvelope, MessagingSession, NetworkCredentials, PortalConfig,
    RetryPolicy, SessionError, SupervisorConfig, TransportError,
};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn config() -> SupervisorConfig {
    SupervisorConfig {
        portal: PortalConfig {
            http_addr: "127.0.0.1:0".to_string(),
            dns_port: Some(0),
            scan_timeout: Duration::from_millis(500),
        },
        ..SupervisorConfig::default()
    }
}

fn store_with(ssid: &str, pass: &str) -> MemoryStore {
    let mut store = MemoryStore::new();
    NetworkCredentials::new(ssid, pass)
        .unwrap()
        .save(&mut store)
        .unwrap();
    store
}

fn boot(
    radio: &HostRadio,
    store: MemoryStore,
    config: SupervisorConfig,
) -> (ConnectivitySupervisor<HostRadio, MemoryStore>, ManualClock) {
    let clock = ManualClock::new();
    let supervisor =
        ConnectivitySupervisor::new(radio.clone(), store, config, Arc::new(clock.clone()));
    (supervisor, clock)
}

fn http(addr: SocketAddr, method: &str, path: &str, body: &str) -> String {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    write!(
        stream,
        "{} {} HTTP/1.1\r\nHost: 192.168.4.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        method,
        path,
        body.len(),
        body
    )
    .unwrap();
    let mut reply = String::new();
    let _ = stream.read_to_string(&mut reply);
    reply
}

fn json_body(reply: &str) -> serde_json::Value {
    let body = reply.split("\r\n\r\n").nth(1).unwrap_or_default();
    serde_json::from_str(body).unwrap_or_else(|e| panic!("{}: {}", e, reply))
}

// ==================== Boot Tests ====================

#[test]
fn test_empty_store_provisions_without_attempts() {
    let radio = HostRadio::with_networks([("Net1", "pw")]);
    let (mut sup, clock) = boot(&radio, MemoryStore::new(), config());

    assert_eq!(sup.start(), ConnectivityState::Provisioning);
    assert_eq!(radio.association_attempts(), 0);
    assert_eq!(clock.elapsed(), Duration::ZERO);

    let addr = sup.portal().local_addr().unwrap();
    let status = json_body(&http(addr, "GET", "/status", ""));
    assert_eq!(status["connected"], false);
    assert_eq!(status["configMode"], true);
    assert_eq!(status["ip"], "0.0.0.0");
}

#[test]
fn test_unreachable_network_bounded_retry() {
    let radio = HostRadio::with_networks([("Net1", "pw")]);
    let (mut sup, clock) = boot(&radio, store_with("Ghost", "pw"), config());

    assert_eq!(sup.start(), ConnectivityState::Provisioning);
    assert_eq!(radio.association_attempts(), 6);
    assert!(clock.elapsed() <= RetryPolicy::default().max_blocking_time());
    assert!(sup.portal().is_active());
    assert!(NetworkCredentials::load(sup.store_mut()).is_some());
}

#[test]
fn test_known_network_connects() {
    let radio = HostRadio::with_networks([("Net1", "pw")]);
    let (mut sup, _clock) = boot(&radio, store_with("Net1", "pw"), config());

    assert_eq!(sup.start(), ConnectivityState::Connected);
    assert_eq!(sup.ssid().as_deref(), Some("Net1"));
    assert!(!sup.portal().is_active());
    assert_eq!(radio.access_point(), None);
}

// ==================== Provisioning Tests ====================

#[test]
fn test_provision_over_http_then_connect() {
    let radio = HostRadio::with_networks([("Net1", "pw")]);
    let (mut sup, _clock) = boot(&radio, MemoryStore::new(), config());
    sup.start();
    let addr = sup.portal().local_addr().unwrap();

    let reply = http(addr, "POST", "/config", "ssid=Net1&password=pw");
    let body = json_body(&reply);
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Config saved! Attempting to connect...");

    sup.tick();
    assert_eq!(sup.state(), ConnectivityState::Connected);
    assert_eq!(sup.ssid().as_deref(), Some("Net1"));
    assert!(!sup.portal().is_active());
    assert_eq!(
        sup.credentials().map(|c| c.ssid.as_str()),
        Some("Net1")
    );
}

#[test]
fn test_missing_field_rejected() {
    let radio = HostRadio::with_networks([("Net1", "pw")]);
    let (mut sup, _clock) = boot(&radio, MemoryStore::new(), config());
    sup.start();
    let addr = sup.portal().local_addr().unwrap();

    let reply = http(addr, "POST", "/config", "ssid=Net1");
    assert!(reply.starts_with("HTTP/1.1 400"), "{}", reply);
    assert_eq!(json_body(&reply)["message"], "Missing SSID or password");

    sup.tick();
    assert_eq!(sup.state(), ConnectivityState::Provisioning);
    assert_eq!(radio.association_attempts(), 0);
}

#[test]
fn test_wrong_password_returns_to_portal() {
    let radio = HostRadio::with_networks([("Net1", "pw")]);
    let (mut sup, clock) = boot(&radio, MemoryStore::new(), config());
    sup.start();
    let first = sup.portal().local_addr().unwrap();

    http(first, "POST", "/config", "ssid=Net1&password=nope");
    sup.tick();

    assert_eq!(sup.state(), ConnectivityState::Provisioning);
    assert!(sup.portal().is_active());
    assert_eq!(radio.association_attempts(), 6);
    assert!(clock.elapsed() <= RetryPolicy::default().max_blocking_time());

    // The new portal episode serves again
    let addr = sup.portal().local_addr().unwrap();
    let status = json_body(&http(addr, "GET", "/status", ""));
    assert_eq!(status["configMode"], true);
}

#[test]
fn test_scan_through_portal() {
    let radio = HostRadio::with_networks([("Net1", "pw"), ("Cafe", "")]);
    let (mut sup, _clock) = boot(&radio, MemoryStore::new(), config());
    sup.start();
    let addr = sup.portal().local_addr().unwrap();

    let request = std::thread::spawn(move || http(addr, "GET", "/scan", ""));
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !request.is_finished() && std::time::Instant::now() < deadline {
        sup.tick();
        std::thread::sleep(Duration::from_millis(5));
    }

    let body = json_body(&request.join().unwrap());
    let networks = body["networks"].as_array().unwrap();
    assert_eq!(networks.len(), 2);
    assert_eq!(networks[1]["ssid"], "Cafe");
    assert_eq!(networks[1]["encryption"], "Open");
    assert_eq!(networks[0]["encryption"], "Secured");
}

#[test]
fn test_reset_erases_and_requests_restart() {
    let radio = HostRadio::with_networks([("Net1", "pw")]);
    let (mut sup, _clock) = boot(&radio, store_with("Ghost", "pw"), config());
    sup.start();
    let addr = sup.portal().local_addr().unwrap();

    let reply = http(addr, "POST", "/reset", "");
    assert!(reply.starts_with("HTTP/1.1 200"), "{}", reply);
    assert_eq!(
        json_body(&reply)["message"],
        "WiFi config reset! Device will restart..."
    );

    sup.tick();
    assert_eq!(sup.state(), ConnectivityState::Unconfigured);
    assert!(sup.take_restart_request());

    // "Reboot"
    assert_eq!(sup.start(), ConnectivityState::Provisioning);
    assert!(sup.credentials().is_none());
}

#[test]
fn test_reset_queued_behind_submission_still_resets() {
    let radio = HostRadio::with_networks([("Net1", "pw")]);
    let (mut sup, _clock) = boot(&radio, store_with("Ghost", "pw"), config());
    sup.start();
    let attempts = radio.association_attempts();
    let addr = sup.portal().local_addr().unwrap();

    let saved = http(addr, "POST", "/config", "ssid=Net1&password=nope");
    assert_eq!(json_body(&saved)["status"], "success");
    let reset = http(addr, "POST", "/reset", "");
    assert_eq!(json_body(&reset)["status"], "success");

    sup.tick();
    assert_eq!(sup.state(), ConnectivityState::Unconfigured);
    assert!(sup.take_restart_request());
    assert!(NetworkCredentials::load(sup.store_mut()).is_none());
    assert_eq!(radio.association_attempts(), attempts, "no attempt with reset pending");
}

#[test]
fn test_latest_submission_is_applied() {
    let radio = HostRadio::with_networks([("Net1", "pw")]);
    let (mut sup, clock) = boot(&radio, MemoryStore::new(), config());
    sup.start();
    let addr = sup.portal().local_addr().unwrap();

    http(addr, "POST", "/config", "ssid=Net1&password=nope");
    let corrected = http(addr, "POST", "/config", "ssid=Net1&password=pw");
    assert_eq!(json_body(&corrected)["status"], "success");

    sup.tick();
    assert_eq!(sup.state(), ConnectivityState::Connected);
    assert_eq!(radio.association_attempts(), 1);
    assert_eq!(clock.elapsed(), Duration::ZERO);
    let stored = NetworkCredentials::load(sup.store_mut()).unwrap();
    assert_eq!(stored.passphrase.as_str(), "pw");
}

#[test]
fn test_scan_failure_reports_empty_list() {
    let radio = HostRadio::with_networks([("Net1", "pw")]);
    radio.set_scan_failure(true);
    let mut config = config();
    config.portal.scan_timeout = Duration::from_secs(30);
    let (mut sup, _clock) = boot(&radio, MemoryStore::new(), config);
    sup.start();
    let addr = sup.portal().local_addr().unwrap();

    let started = std::time::Instant::now();
    let request = std::thread::spawn(move || http(addr, "GET", "/scan", ""));
    let deadline = started + Duration::from_secs(10);
    while !request.is_finished() && std::time::Instant::now() < deadline {
        sup.tick();
        std::thread::sleep(Duration::from_millis(5));
    }

    let reply = request.join().unwrap();
    assert!(reply.starts_with("HTTP/1.1 200"), "{}", reply);
    assert_eq!(json_body(&reply)["networks"].as_array().map(Vec::len), Some(0));
    // Answered by the supervisor, not by the handler's timeout
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(sup.portal().session().unwrap().last_scan.is_empty());
}

// ==================== Steady State Tests ====================

#[test]
fn test_link_loss_recovers_without_blocking() {
    let radio = HostRadio::with_networks([("Net1", "pw")]);
    let (mut sup, clock) = boot(&radio, store_with("Net1", "pw"), config());
    sup.start();

    radio.set_link_up(false);
    clock.advance(Duration::from_secs(30));
    sup.tick();
    assert_eq!(sup.state(), ConnectivityState::Reconnecting);
    assert!(!sup.status().is_connected());

    // Long outage: no escalation to provisioning, no blocking
    let before = clock.elapsed();
    for _ in 0..300 {
        clock.advance(Duration::from_secs(1));
        sup.tick();
    }
    assert_eq!(clock.elapsed() - before, Duration::from_secs(300));
    assert_eq!(sup.state(), ConnectivityState::Reconnecting);
    assert!(!sup.portal().is_active());

    radio.set_link_up(true);
    for _ in 0..20 {
        clock.advance(Duration::from_secs(1));
        sup.tick();
    }
    assert_eq!(sup.state(), ConnectivityState::Connected);
}

#[test]
fn test_repeated_provisioning_entry_is_clean() {
    let radio = HostRadio::with_networks([("Net1", "pw")]);
    let (mut sup, _clock) = boot(&radio, MemoryStore::new(), config());
    sup.start();
    sup.enter_provisioning();
    sup.enter_provisioning();
    assert!(sup.portal().is_active());
    assert_eq!(radio.access_point().as_ref(), Some(sup.access_point()));
}

// ==================== Broker Session Tests ====================

#[derive(Default)]
struct Wire {
    up: bool,
    sent: Vec<MessageEnvelope>,
    subscribed: Vec<String>,
}

#[derive(Clone, Default)]
struct FakeBroker(Arc<Mutex<Wire>>);

impl BrokerTransport for FakeBroker {
    fn connect(&mut self, _config: &BrokerConfig, _client_id: &str) -> Result<(), TransportError> {
        self.0.lock().unwrap().up = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.0.lock().unwrap().up = false;
    }

    fn is_connected(&self) -> bool {
        self.0.lock().unwrap().up
    }

    fn publish(&mut self, message: &MessageEnvelope) -> Result<(), TransportError> {
        self.0.lock().unwrap().sent.push(message.clone());
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.0.lock().unwrap().subscribed.push(topic.to_string());
        Ok(())
    }

    fn poll(&mut self, _inbox: &mut Vec<MessageEnvelope>) -> Result<(), TransportError> {
        Ok(())
    }
}

#[test]
fn test_session_follows_supervisor() {
    let radio = HostRadio::with_networks([("Net1", "pw")]);
    let (mut sup, clock) = boot(&radio, MemoryStore::new(), config());
    sup.start();

    let broker = FakeBroker::default();
    let mut session = MessagingSession::new(broker.clone(), sup.status(), Arc::new(clock.clone()));
    session.configure(BrokerConfig::new("broker.local", 1883));

    // Provisioning: nothing on the wire
    session.tick();
    assert!(!session.connected());
    assert_eq!(
        session.publish("sensors/temp", b"21", false),
        Err(SessionError::NotConnected)
    );
    assert_eq!(session.subscribe("device/commands"), Err(SessionError::NotConnected));
    assert!(broker.0.lock().unwrap().sent.is_empty());

    sup.on_credentials_submitted(NetworkCredentials::new("Net1", "pw").unwrap())
        .unwrap();
    session.tick();
    assert!(session.connected());
    session.subscribe("device/commands").unwrap();
    session.publish("sensors/temp", b"21", false).unwrap();
    assert_eq!(broker.0.lock().unwrap().sent.len(), 1);

    // Link loss closes the session and stops publishing
    radio.set_link_up(false);
    clock.advance(Duration::from_secs(30));
    sup.tick();
    session.tick();
    assert!(!session.connected());
    assert_eq!(
        session.publish("sensors/temp", b"22", false),
        Err(SessionError::NotConnected)
    );
    assert_eq!(broker.0.lock().unwrap().sent.len(), 1);
}
