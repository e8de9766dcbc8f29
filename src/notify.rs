//! Notification sinks
//!
//! Status lines and user annotations leave the control loop through
//! [`NotificationSink`]. The broadcast sink fans them out to HTTP event
//! stream subscribers and the log.

use crate::logging::{StructuredLogger, get_logger};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Receives human-readable status lines and log annotations
pub trait NotificationSink: Send {
    /// A new status line (sent only when something changed)
    fn notify(&mut self, line: &str);

    /// A user or system annotation to keep alongside the data
    fn add_metadata(&mut self, line: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Status,
    Metadata,
}

/// One published line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub kind: EventKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast channel sink; dropping every receiver just discards events
#[derive(Debug, Clone)]
pub struct StatusBroadcast {
    tx: broadcast::Sender<StatusEvent>,
    logger: StructuredLogger,
}

impl StatusBroadcast {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            logger: get_logger("status"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, kind: EventKind, message: &str) {
        let _ = self.tx.send(StatusEvent {
            kind,
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }
}

impl Default for StatusBroadcast {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotificationSink for StatusBroadcast {
    fn notify(&mut self, line: &str) {
        self.logger.info(line);
        self.publish(EventKind::Status, line);
    }

    fn add_metadata(&mut self, line: &str) {
        self.logger.info(&format!("Metadata: {}", line));
        self.publish(EventKind::Metadata, line);
    }
}
