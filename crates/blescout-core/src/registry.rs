//! Registry of discovered-peripheral snapshots.

use std::collections::HashMap;

use blescout_types::Peripheral;

/// Holds the latest snapshot of every peripheral seen since the last scan
/// started.
///
/// Repeated discovery of the same identifier replaces the prior snapshot
/// wholesale (last-write-wins). The registry is cleared only when a new scan
/// starts; it is never pruned otherwise.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    peripherals: HashMap<String, Peripheral>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the snapshot for a peripheral.
    pub fn upsert(&mut self, peripheral: Peripheral) {
        self.peripherals.insert(peripheral.id.clone(), peripheral);
    }

    /// Drop every snapshot.
    pub fn clear(&mut self) {
        self.peripherals.clear();
    }

    /// Look up the current snapshot for an identifier.
    pub fn get(&self, id: &str) -> Option<&Peripheral> {
        self.peripherals.get(id)
    }

    /// Whether an identifier is present.
    pub fn contains(&self, id: &str) -> bool {
        self.peripherals.contains_key(id)
    }

    /// Number of tracked peripherals.
    pub fn len(&self) -> usize {
        self.peripherals.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.peripherals.is_empty()
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Peripheral)> {
        self.peripherals.iter()
    }

    /// Clone out every snapshot.
    pub fn snapshot(&self) -> Vec<Peripheral> {
        self.peripherals.values().cloned().collect()
    }
}
