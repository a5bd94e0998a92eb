//! Configuration for the central manager.

use std::time::Duration;

use uuid::Uuid;

/// Configuration for [`CentralManager`](crate::manager::CentralManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long each scan window runs.
    pub scan_duration: Duration,
    /// Whether repeated advertisements are redelivered during a scan, keeping
    /// RSSI and names fresh in the registry.
    pub allow_duplicates: bool,
    /// Service UUIDs to scan for. Empty scans for everything.
    pub service_filters: Vec<Uuid>,
    /// Capacity of the manager event channel.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(4),
            allow_duplicates: true,
            service_filters: Vec::new(),
            event_capacity: 100,
        }
    }
}

impl ManagerConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan duration.
    pub fn scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }

    /// Set the scan duration in seconds.
    pub fn scan_duration_secs(mut self, secs: u64) -> Self {
        self.scan_duration = Duration::from_secs(secs);
        self
    }

    /// Set whether duplicate advertisements are redelivered.
    pub fn allow_duplicates(mut self, allow: bool) -> Self {
        self.allow_duplicates = allow;
        self
    }

    /// Restrict scanning to the given service UUIDs.
    pub fn service_filters(mut self, filters: Vec<Uuid>) -> Self {
        self.service_filters = filters;
        self
    }

    /// Set the event channel capacity.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}
