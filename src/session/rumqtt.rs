//! Host transport over rumqttc's synchronous client.

use super::{
    BrokerTransport, MessageEnvelope, TransportError, BROKER_CONNECT_TIMEOUT, BROKER_KEEP_ALIVE,
};
use crate::config::BrokerConfig;
use log::{debug, warn};
use rumqttc::{
    Client, ConnectReturnCode, Connection, Event, MqttOptions, Packet, QoS, RecvTimeoutError,
};
use std::time::{Duration, Instant};

/// Requests buffered between the client handle and the event loop.
const CLIENT_CAPACITY: usize = 10;

/// How long one `poll` waits for network events.
const POLL_SLICE: Duration = Duration::from_millis(10);

/// Most events handled per `poll`.
const MAX_EVENTS_PER_POLL: usize = 16;

/// MQTT 3.1.1 over TCP via rumqttc.
pub struct RumqttTransport {
    session: Option<(Client, Connection)>,
    connect_timeout: Duration,
}

impl RumqttTransport {
    pub fn new() -> Self {
        Self {
            session: None,
            connect_timeout: BROKER_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn client(&mut self) -> Result<&mut Client, TransportError> {
        self.session
            .as_mut()
            .map(|(client, _)| client)
            .ok_or(TransportError::Closed)
    }
}

impl Default for RumqttTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn options(config: &BrokerConfig, client_id: &str) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, config.host.as_str(), config.port);
    options.set_keep_alive(BROKER_KEEP_ALIVE);
    options.set_clean_session(true);
    if let Some(user) = config.auth_user() {
        options.set_credentials(user, config.password.as_deref().unwrap_or(""));
    }
    options
}

fn envelope(event: Event) -> Option<MessageEnvelope> {
    match event {
        Event::Incoming(Packet::Publish(publish)) => Some(MessageEnvelope {
            topic: publish.topic,
            payload: publish.payload.to_vec(),
            retain: publish.retain,
        }),
        _ => None,
    }
}

impl BrokerTransport for RumqttTransport {
    fn connect(&mut self, config: &BrokerConfig, client_id: &str) -> Result<(), TransportError> {
        self.disconnect();

        let (client, mut connection) = Client::new(options(config, client_id), CLIENT_CAPACITY);
        let deadline = Instant::now() + self.connect_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            match connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(TransportError::Refused(format!("{:?}", ack.code)));
                    }
                    debug!("CONNACK, session present: {}", ack.session_present);
                    self.session = Some((client, connection));
                    return Ok(());
                }
                Ok(Ok(event)) => debug!("Before CONNACK: {:?}", event),
                Ok(Err(e)) => return Err(TransportError::Io(e.to_string())),
                Err(RecvTimeoutError::Timeout) => return Err(TransportError::Timeout),
                Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Closed),
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some((client, _connection)) = self.session.take() {
            if let Err(e) = client.try_disconnect() {
                debug!("DISCONNECT not queued: {}", e);
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn publish(&mut self, message: &MessageEnvelope) -> Result<(), TransportError> {
        self.client()?
            .try_publish(
                message.topic.as_str(),
                QoS::AtMostOnce,
                message.retain,
                message.payload.clone(),
            )
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.client()?
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    fn poll(&mut self, inbox: &mut Vec<MessageEnvelope>) -> Result<(), TransportError> {
        let Some((_, connection)) = self.session.as_mut() else {
            return Err(TransportError::Closed);
        };

        for _ in 0..MAX_EVENTS_PER_POLL {
            match connection.recv_timeout(POLL_SLICE) {
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                    self.session = None;
                    return Err(TransportError::Closed);
                }
                Ok(Ok(event)) => inbox.extend(envelope(event)),
                Ok(Err(e)) => {
                    warn!("MQTT connection error: {}", e);
                    self.session = None;
                    return Err(TransportError::Io(e.to_string()));
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    self.session = None;
                    return Err(TransportError::Closed);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_options_authenticate_only_with_user() {
        let anonymous = options(&BrokerConfig::new("broker.local", 1883), "id-1");
        assert_eq!(anonymous.credentials(), None);
        assert_eq!(anonymous.client_id(), "id-1");
        assert_eq!(anonymous.broker_address(), ("broker.local".to_string(), 1883));

        let empty_user = BrokerConfig::new("b", 1883).with_credentials("", "secret");
        assert_eq!(options(&empty_user, "id").credentials(), None);

        let auth = BrokerConfig::new("b", 1883).with_credentials("dev", "secret");
        assert_eq!(
            options(&auth, "id").credentials(),
            Some(("dev".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_connect_refused_port_fails() {
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let mut transport = RumqttTransport::new().with_connect_timeout(Duration::from_secs(2));
        let result = transport.connect(&BrokerConfig::new("127.0.0.1", port), "test");
        assert!(result.is_err());
        assert!(!transport.is_connected());
        assert_eq!(
            transport.publish(&MessageEnvelope::new("t", "x")),
            Err(TransportError::Closed)
        );
    }

    #[test]
    fn test_silent_broker_times_out() {
        // Accepts TCP but never answers CONNECT
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut transport =
            RumqttTransport::new().with_connect_timeout(Duration::from_millis(300));
        let result = transport.connect(&BrokerConfig::new("127.0.0.1", port), "test");
        assert_eq!(result, Err(TransportError::Timeout));
        drop(listener);
    }
}
