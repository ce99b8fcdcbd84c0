//! Raw transport notifications
//!
//! Every request body sent and response body received is published on a
//! broadcast channel. Slow or absent subscribers never block a request; a
//! lagging receiver simply skips ahead.

use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Raw traffic notification
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Envelope about to be sent
    Request { url: String, body: String },
    /// Body received from the device
    Response { url: String, status: u16, body: String },
    /// Recoverable anomaly, e.g. a capability fallback during connect
    Warning { message: String },
}

/// Fan-out for transport notifications
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TransportEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: TransportEvent) {
        // Err only means nobody is listening
        let _ = self.tx.send(event);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.publish(TransportEvent::Warning {
            message: message.into(),
        });
    }
}
