//! Device transport over the ESP-IDF MQTT client.
//!
//! The IDF client runs its own task; events are pumped by a small thread
//! into shared state that `poll` drains.

use super::{BrokerTransport, MessageEnvelope, TransportError, BROKER_CONNECT_TIMEOUT};
use crate::config::BrokerConfig;
use esp_idf_svc::mqtt::client::{
    EspMqttClient, EspMqttConnection, EventPayload, MqttClientConfiguration, QoS,
};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

const EVENT_THREAD_STACK: usize = 6144;

/// Inbound messages kept between polls; older ones are dropped.
const MAX_PENDING: usize = 10;

#[derive(Default)]
struct Shared {
    connected: bool,
    closed: bool,
    inbox: Vec<MessageEnvelope>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// MQTT 3.1.1 via `esp_idf_svc::mqtt::client`.
pub struct EspMqttTransport {
    client: Option<EspMqttClient<'static>>,
    shared: Arc<Mutex<Shared>>,
}

impl EspMqttTransport {
    pub fn new() -> Self {
        Self {
            client: None,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    fn pump_events(mut connection: EspMqttConnection, shared: Arc<Mutex<Shared>>) {
        while let Ok(event) = connection.next() {
            let mut state = lock(&shared);
            match event.payload() {
                EventPayload::Connected(_) => state.connected = true,
                EventPayload::Disconnected => {
                    state.connected = false;
                    state.closed = true;
                }
                EventPayload::Received { topic, data, .. } => {
                    if state.inbox.len() >= MAX_PENDING {
                        state.inbox.remove(0);
                    }
                    state.inbox.push(MessageEnvelope {
                        topic: topic.unwrap_or_default().to_string(),
                        payload: data.to_vec(),
                        retain: false,
                    });
                }
                EventPayload::Error(e) => warn!("MQTT event error: {:?}", e),
                other => debug!("MQTT event: {:?}", other),
            }
        }
        lock(&shared).connected = false;
        debug!("MQTT event pump finished");
    }
}

impl Default for EspMqttTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerTransport for EspMqttTransport {
    fn connect(&mut self, config: &BrokerConfig, client_id: &str) -> Result<(), TransportError> {
        self.disconnect();

        let url = format!("mqtt://{}:{}", config.host, config.port);
        let conf = MqttClientConfiguration {
            client_id: Some(client_id),
            username: config.auth_user(),
            password: config
                .auth_user()
                .and(config.password.as_deref())
                .filter(|p| !p.is_empty()),
            keep_alive_interval: Some(super::BROKER_KEEP_ALIVE),
            disable_clean_session: false,
            ..Default::default()
        };

        let (client, connection) =
            EspMqttClient::new(&url, &conf).map_err(|e| TransportError::Io(e.to_string()))?;

        let shared = Arc::new(Mutex::new(Shared::default()));
        let pump_shared = shared.clone();
        thread::Builder::new()
            .name("mqtt-events".to_string())
            .stack_size(EVENT_THREAD_STACK)
            .spawn(move || Self::pump_events(connection, pump_shared))
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let deadline = Instant::now() + BROKER_CONNECT_TIMEOUT;
        while Instant::now() < deadline {
            if lock(&shared).connected {
                info!("MQTT connected to {}", url);
                self.client = Some(client);
                self.shared = shared;
                return Ok(());
            }
            thread::sleep(Duration::from_millis(50));
        }
        Err(TransportError::Timeout)
    }

    fn disconnect(&mut self) {
        // Dropping the client stops the IDF task and ends the pump
        if self.client.take().is_some() {
            lock(&self.shared).connected = false;
        }
    }

    fn is_connected(&self) -> bool {
        self.client.is_some() && lock(&self.shared).connected
    }

    fn publish(&mut self, message: &MessageEnvelope) -> Result<(), TransportError> {
        let client = self.client.as_mut().ok_or(TransportError::Closed)?;
        client
            .enqueue(&message.topic, QoS::AtMostOnce, message.retain, &message.payload)
            .map(|_| ())
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let client = self.client.as_mut().ok_or(TransportError::Closed)?;
        client
            .subscribe(topic, QoS::AtMostOnce)
            .map(|_| ())
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    fn poll(&mut self, inbox: &mut Vec<MessageEnvelope>) -> Result<(), TransportError> {
        if self.client.is_none() {
            return Err(TransportError::Closed);
        }
        let mut state = lock(&self.shared);
        inbox.append(&mut state.inbox);
        if state.closed {
            drop(state);
            self.client = None;
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}
