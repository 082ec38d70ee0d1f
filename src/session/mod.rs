//! Broker session.
//!
//! [`MessagingSession`] keeps one publish/subscribe session to the MQTT
//! broker while the connectivity supervisor reports `Connected`. The wire
//! side sits behind [`BrokerTransport`]:
//!
//! - [`RumqttTransport`] on host (rumqttc, sync client)
//! - [`EspMqttTransport`] on device (ESP-IDF MQTT client)
//!
//! Delivery is best effort: QoS 0, no retry and no buffering while the
//! session is down.

use crate::clock::Clock;
use crate::config::BrokerConfig;
use crate::status::SharedStatus;
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "esp32")]
mod esp;
#[cfg(not(target_os = "espidf"))]
mod rumqtt;

#[cfg(feature = "esp32")]
pub use esp::EspMqttTransport;
#[cfg(not(target_os = "espidf"))]
pub use rumqtt::RumqttTransport;

/// Wait after a failed broker connection before the next attempt.
pub const BROKER_RETRY_DELAY: Duration = Duration::from_secs(5);

/// How long a transport waits for the broker to acknowledge a connection.
pub const BROKER_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// MQTT keep-alive interval.
pub const BROKER_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// One message, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl MessageEnvelope {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }

    /// Payload as text, lossy.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Callback for inbound messages.
pub type MessageHandler = Box<dyn FnMut(&MessageEnvelope) + Send>;

/// MQTT client as seen by the session.
///
/// All operations are QoS 0. `poll` services keep-alive and collects
/// inbound messages; it must not block for long.
pub trait BrokerTransport: Send {
    /// Open a session. Blocks at most [`BROKER_CONNECT_TIMEOUT`].
    fn connect(&mut self, config: &BrokerConfig, client_id: &str) -> Result<(), TransportError>;

    /// Close the session. No-op when closed.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn publish(&mut self, message: &MessageEnvelope) -> Result<(), TransportError>;

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Service the connection, appending received messages to `inbox`.
    ///
    /// An error means the session is gone.
    fn poll(&mut self, inbox: &mut Vec<MessageEnvelope>) -> Result<(), TransportError>;
}

/// Transport failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Broker answered but refused the session.
    Refused(String),
    /// No acknowledgement in time.
    Timeout,
    /// Socket or client failure.
    Io(String),
    /// Operation on a closed session.
    Closed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refused(reason) => write!(f, "connection refused: {}", reason),
            Self::Timeout => write!(f, "broker did not answer in time"),
            Self::Io(msg) => write!(f, "transport error: {}", msg),
            Self::Closed => write!(f, "session closed"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No broker host configured.
    NotConfigured,
    /// Session or network not up; nothing was sent.
    NotConnected,
    /// Network not connected, connection not attempted.
    LinkDown,
    /// A failed attempt is still cooling down.
    Backoff { retry_in: Duration },
    Transport(TransportError),
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "no broker configured"),
            Self::NotConnected => write!(f, "not connected to broker"),
            Self::LinkDown => write!(f, "network not connected"),
            Self::Backoff { retry_in } => write!(f, "retrying in {:?}", retry_in),
            Self::Transport(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SessionError {}

/// Broker connection manager.
pub struct MessagingSession<T: BrokerTransport> {
    transport: T,
    status: SharedStatus,
    clock: Arc<dyn Clock>,
    config: Option<BrokerConfig>,
    retry_delay: Duration,
    retry_at: Option<Instant>,
    /// Topics acknowledged at least once, re-issued after reconnect.
    subscriptions: Vec<String>,
    handler: Option<MessageHandler>,
    inbox: Vec<MessageEnvelope>,
}

impl<T: BrokerTransport> MessagingSession<T> {
    /// Session following `status`. Unconfigured until [`configure`](Self::configure).
    pub fn new(transport: T, status: SharedStatus, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            status,
            clock,
            config: None,
            retry_delay: BROKER_RETRY_DELAY,
            retry_at: None,
            subscriptions: Vec::new(),
            handler: None,
            inbox: Vec::new(),
        }
    }

    /// Override the reconnect back-off.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Use `config` from now on. A live session is closed and the back-off
    /// cleared; the next `tick` connects with the new settings.
    pub fn configure(&mut self, config: BrokerConfig) {
        if self.transport.is_connected() {
            info!("Broker settings changed, closing session");
            self.transport.disconnect();
        }
        info!("Broker set to {}:{}", config.host, config.port);
        self.config = Some(config);
        self.retry_at = None;
    }

    pub fn config(&self) -> Option<&BrokerConfig> {
        self.config.as_ref()
    }

    /// Register the inbound message handler, replacing any previous one.
    pub fn on_message(&mut self, handler: impl FnMut(&MessageEnvelope) + Send + 'static) {
        self.handler = Some(Box::new(handler));
    }

    /// Service the session. Never sleeps.
    pub fn tick(&mut self) {
        if !self.status.is_connected() {
            if self.transport.is_connected() {
                info!("Network down, closing broker session");
                self.transport.disconnect();
            }
            return;
        }

        if !self.transport.is_connected() {
            match self.reconnect() {
                Ok(()) | Err(SessionError::Backoff { .. }) | Err(SessionError::NotConfigured) => {}
                Err(e) => debug!("Broker reconnect: {}", e),
            }
            return;
        }

        let mut inbox = std::mem::take(&mut self.inbox);
        if let Err(e) = self.transport.poll(&mut inbox) {
            warn!("Broker session lost: {}", e);
            self.transport.disconnect();
        }
        for message in inbox.drain(..) {
            debug!("Received {} bytes on '{}'", message.payload.len(), message.topic);
            if let Some(handler) = self.handler.as_mut() {
                handler(&message);
            }
        }
        self.inbox = inbox;
    }

    /// One connection attempt, unless connected or cooling down.
    ///
    /// A failure arms a [`BROKER_RETRY_DELAY`] back-off. On success every
    /// previously acknowledged subscription is issued again.
    pub fn reconnect(&mut self) -> Result<(), SessionError> {
        if self.transport.is_connected() {
            return Ok(());
        }
        let config = self
            .config
            .as_ref()
            .filter(|c| c.is_configured())
            .ok_or(SessionError::NotConfigured)?;
        if !self.status.is_connected() {
            return Err(SessionError::LinkDown);
        }

        let now = self.clock.now();
        if let Some(at) = self.retry_at {
            if now < at {
                return Err(SessionError::Backoff { retry_in: at - now });
            }
        }

        let client_id = config.effective_client_id();
        let auth = if config.auth_user().is_some() {
            " with credentials"
        } else {
            ""
        };
        info!(
            "Connecting to broker {}:{} as '{}'{}",
            config.host, config.port, client_id, auth
        );

        if let Err(e) = self.transport.connect(config, &client_id) {
            warn!(
                "Broker connection failed: {}, retrying in {:?}",
                e, self.retry_delay
            );
            self.retry_at = Some(now + self.retry_delay);
            return Err(e.into());
        }

        self.retry_at = None;
        info!("Broker session established");
        for topic in &self.subscriptions {
            if let Err(e) = self.transport.subscribe(topic) {
                warn!("Re-subscribe to '{}' failed: {}", topic, e);
            }
        }
        Ok(())
    }

    /// Publish at QoS 0.
    ///
    /// Fails with [`SessionError::NotConnected`] without touching the wire
    /// unless both the session and the network are up.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), SessionError> {
        if !self.ready() {
            return Err(SessionError::NotConnected);
        }
        let message = MessageEnvelope {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retain,
        };
        self.transport.publish(&message)?;
        debug!("Published {} bytes to '{}'", payload.len(), topic);
        Ok(())
    }

    /// Subscribe at QoS 0. Same preconditions as [`publish`](Self::publish).
    pub fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        if !self.ready() {
            return Err(SessionError::NotConnected);
        }
        self.transport.subscribe(topic)?;
        if !self.subscriptions.iter().any(|t| t == topic) {
            self.subscriptions.push(topic.to_string());
        }
        info!("Subscribed to '{}'", topic);
        Ok(())
    }

    /// Broker session is up.
    pub fn connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn ready(&self) -> bool {
        self.transport.is_connected() && self.status.is_connected()
    }
}
