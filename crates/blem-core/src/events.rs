//! Broadcast event stream for observing a [`Central`](crate::Central).
//!
//! Callbacks on scanners and observers are the primary interface; this
//! stream exists for logging, UIs and tests that want to watch everything.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use blem_types::{ConnectionState, RadioState};

/// Events emitted by the central and its devices.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DeviceEvent {
    /// A device was discovered (or rediscovered) while a scanner was active.
    Discovered {
        id: Uuid,
        name: String,
        rssi: Option<i16>,
    },
    /// A device's connection state changed.
    StateChanged { id: Uuid, state: ConnectionState },
    /// The transport was asked to start scanning.
    ScanStarted { services: Vec<Uuid> },
    /// A scanner reached `Stopped`.
    ScanFinished,
    /// A scanner never started and reached `Failed`.
    ScanFailed { error: String },
    /// The radio reported a new power state.
    RadioStateChanged { state: RadioState },
}

/// Sender for device events.
pub type EventSender = broadcast::Sender<DeviceEvent>;

/// Receiver for device events.
pub type EventReceiver = broadcast::Receiver<DeviceEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: DeviceEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
