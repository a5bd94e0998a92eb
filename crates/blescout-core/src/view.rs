//! Projection of discovered-but-not-connected devices.
//!
//! Pure function over the manager's registries; owns no state of its own.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use blescout_types::{ConnectedDevice, Peripheral};

use crate::registry::DeviceRegistry;

/// One row of the not-connected projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotConnectedDevice {
    /// The peripheral snapshot.
    pub peripheral: Peripheral,
    /// Whether a connection attempt is currently in flight.
    pub is_connecting: bool,
}

/// Build the not-connected view.
///
/// Every registry entry not currently connected is copied in with
/// `is_connecting = false`, then every connecting entry not currently
/// connected is overlaid with `is_connecting = true`. The overlay wins on a
/// key collision: a device that is both (re-)discovered and mid-handshake is
/// reported as connecting. Result ordering is not significant.
pub fn project_not_connected(
    registry: &DeviceRegistry,
    connecting: &HashMap<String, Peripheral>,
    connected: &HashMap<String, ConnectedDevice>,
) -> Vec<NotConnectedDevice> {
    let mut rows: HashMap<&str, NotConnectedDevice> = HashMap::new();

    for (id, peripheral) in registry.iter() {
        if !connected.contains_key(id) {
            rows.insert(
                id,
                NotConnectedDevice {
                    peripheral: peripheral.clone(),
                    is_connecting: false,
                },
            );
        }
    }

    for (id, peripheral) in connecting {
        if !connected.contains_key(id) {
            rows.insert(
                id,
                NotConnectedDevice {
                    peripheral: peripheral.clone(),
                    is_connecting: true,
                },
            );
        }
    }

    rows.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(id: &str) -> (String, ConnectedDevice) {
        (
            id.to_string(),
            ConnectedDevice::Bare {
                peripheral: Peripheral::new(id),
            },
        )
    }

    #[test]
    fn test_connected_devices_are_excluded() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(Peripheral::new("11:11:11:11:11:11"));
        registry.upsert(Peripheral::new("22:22:22:22:22:22"));

        let connecting = HashMap::new();
        let connected: HashMap<_, _> = [connected("11:11:11:11:11:11")].into_iter().collect();

        let rows = project_not_connected(&registry, &connecting, &connected);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].peripheral.id, "22:22:22:22:22:22");
        assert!(!rows[0].is_connecting);
    }

    #[test]
    fn test_connecting_overlay_wins_on_collision() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(Peripheral::with_name("11:11:11:11:11:11", "Band"));

        let connecting: HashMap<_, _> = [(
            "11:11:11:11:11:11".to_string(),
            Peripheral::with_name("11:11:11:11:11:11", "Band"),
        )]
        .into_iter()
        .collect();
        let connected = HashMap::new();

        let rows = project_not_connected(&registry, &connecting, &connected);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_connecting);
    }

    #[test]
    fn test_connecting_device_survives_registry_clear() {
        // A connecting device whose registry entry was cleared by a newer scan
        // must still appear, courtesy of the snapshot held in the connecting map.
        let registry = DeviceRegistry::new();
        let connecting: HashMap<_, _> = [(
            "11:11:11:11:11:11".to_string(),
            Peripheral::new("11:11:11:11:11:11"),
        )]
        .into_iter()
        .collect();
        let connected = HashMap::new();

        let rows = project_not_connected(&registry, &connecting, &connected);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_connecting);
    }

    #[test]
    fn test_connecting_and_connected_never_coexist_in_view() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(Peripheral::new("11:11:11:11:11:11"));

        let connecting: HashMap<_, _> = [(
            "11:11:11:11:11:11".to_string(),
            Peripheral::new("11:11:11:11:11:11"),
        )]
        .into_iter()
        .collect();
        let connected: HashMap<_, _> = [connected("11:11:11:11:11:11")].into_iter().collect();

        let rows = project_not_connected(&registry, &connecting, &connected);
        assert!(rows.is_empty());
    }
}
