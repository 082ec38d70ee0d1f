//! Outbound telemetry.
//!
//! Producers hand messages to a bounded queue; whoever owns the
//! [`MessagingSession`] drains it. Messages offered while the queue is full
//! or drained while the session is down are dropped, never buffered.

use crate::clock::Clock;
use crate::command::TOPIC_STATUS;
use crate::session::{BrokerTransport, MessageEnvelope, MessagingSession};
use crate::status::StatusSnapshot;
use log::{debug, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Capacity of the producer-to-session queue.
pub const TELEMETRY_QUEUE_CAPACITY: usize = 10;

/// Period of the `device/status` report.
pub const STATUS_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Producer side. Cheap to clone.
#[derive(Clone)]
pub struct TelemetrySender {
    tx: SyncSender<MessageEnvelope>,
    dropped: Arc<AtomicU32>,
}

/// Consumer side.
pub struct TelemetryQueue {
    rx: Receiver<MessageEnvelope>,
    dropped: Arc<AtomicU32>,
}

/// Create a connected sender/queue pair.
pub fn channel() -> (TelemetrySender, TelemetryQueue) {
    let (tx, rx) = mpsc::sync_channel(TELEMETRY_QUEUE_CAPACITY);
    let dropped = Arc::new(AtomicU32::new(0));
    (
        TelemetrySender {
            tx,
            dropped: dropped.clone(),
        },
        TelemetryQueue { rx, dropped },
    )
}

impl TelemetrySender {
    /// Queue `message`. Returns `false` if it was dropped.
    pub fn offer(&self, message: MessageEnvelope) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(m)) => {
                debug!("Telemetry queue full, dropping '{}'", m.topic);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl TelemetryQueue {
    /// Publish everything queued, or drop it if the session is down.
    ///
    /// Returns the number of messages published.
    pub fn drain_into<T: BrokerTransport>(&self, session: &mut MessagingSession<T>) -> usize {
        let mut published = 0;
        for message in self.rx.try_iter() {
            match session.publish(&message.topic, &message.payload, message.retain) {
                Ok(()) => published += 1,
                Err(e) => {
                    debug!("Dropping telemetry for '{}': {}", message.topic, e);
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        published
    }

    /// Messages dropped so far, on either side.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Body of the periodic `device/status` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceReport {
    pub state: String,
    pub ssid: String,
    pub ip: String,
    pub uptime_secs: u64,
}

impl DeviceReport {
    pub fn new(status: &StatusSnapshot, uptime: Duration) -> Self {
        Self {
            state: status.state.as_str().to_string(),
            ssid: status.ssid.clone(),
            ip: status
                .ip
                .map_or_else(|| "0.0.0.0".to_string(), |ip| ip.to_string()),
            uptime_secs: uptime.as_secs(),
        }
    }

    pub fn to_envelope(&self) -> Option<MessageEnvelope> {
        match serde_json::to_vec(self) {
            Ok(payload) => Some(MessageEnvelope::new(TOPIC_STATUS, payload)),
            Err(e) => {
                warn!("Could not encode status report: {}", e);
                None
            }
        }
    }
}

/// Emits a [`DeviceReport`] every interval while connected.
pub struct Heartbeat {
    clock: Arc<dyn Clock>,
    interval: Duration,
    started: Instant,
    next_at: Instant,
}

impl Heartbeat {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_interval(clock, STATUS_REPORT_INTERVAL)
    }

    pub fn with_interval(clock: Arc<dyn Clock>, interval: Duration) -> Self {
        let now = clock.now();
        Self {
            clock,
            interval,
            started: now,
            next_at: now + interval,
        }
    }

    /// Report due now, if any.
    pub fn poll(&mut self, status: &StatusSnapshot) -> Option<MessageEnvelope> {
        let now = self.clock.now();
        if now < self.next_at {
            return None;
        }
        self.next_at = now + self.interval;
        if !status.connected() {
            return None;
        }
        DeviceReport::new(status, now.duration_since(self.started)).to_envelope()
    }

    /// Time until the next report is due.
    pub fn remaining(&self) -> Duration {
        self.next_at.saturating_duration_since(self.clock.now())
    }
}
