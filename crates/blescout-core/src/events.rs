//! Manager event system for presentation-layer notifications.
//!
//! The engine owns all state and exposes it as snapshots; this module provides
//! the event stream a presentation layer subscribes to in order to know *when*
//! to take a fresh snapshot. There are no implicit re-render triggers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use blescout_types::{CharacteristicKey, Peripheral, ReadState};

/// Events emitted by the central manager.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ManagerEvent {
    /// A scan window was started; the registry was cleared.
    ScanStarted,
    /// The scan window ended.
    ScanStopped,
    /// A peripheral was discovered or refreshed.
    Discovered {
        /// The fresh snapshot now held in the registry.
        peripheral: Peripheral,
    },
    /// A connection attempt started.
    Connecting {
        /// Target device.
        device_id: String,
    },
    /// A connection was established.
    Connected {
        /// The connected device.
        device_id: String,
    },
    /// A connection attempt failed; the device is untracked again.
    ConnectFailed {
        /// Target device.
        device_id: String,
        /// Failure description.
        error: String,
    },
    /// A device disconnected, user-requested or not.
    Disconnected {
        /// The removed device.
        device_id: String,
    },
    /// A service catalog was attached to a connected device.
    CatalogAttached {
        /// The promoted device.
        device_id: String,
        /// Number of read-eligible characteristics.
        readable: usize,
    },
    /// A read session was created, replacing any prior session.
    SessionStarted {
        /// Session owner.
        device_id: String,
        /// Session generation.
        generation: u64,
        /// Number of entries issued.
        characteristics: usize,
    },
    /// One session entry settled.
    ReadSettled {
        /// Session owner.
        device_id: String,
        /// The settled entry.
        key: CharacteristicKey,
        /// Terminal state of the entry.
        state: ReadState,
    },
    /// The current session was dropped.
    SessionCleared,
}

/// Sender for manager events.
pub type EventSender = broadcast::Sender<ManagerEvent>;

/// Receiver for manager events.
pub type EventReceiver = broadcast::Receiver<ManagerEvent>;

/// Event dispatcher fanning out manager events to any number of receivers.
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
    pub fn send(&self, event: ManagerEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Get the sender for direct use.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
