//! Shared identifier helpers.
//!
//! Peripheral identity differs by platform: Linux and Windows expose the
//! Bluetooth MAC address, while macOS exposes only a CoreBluetooth UUID and
//! reports the address as all zeros. These helpers pick the useful identifier
//! either way.

use btleplug::platform::PeripheralId;

/// Format a peripheral ID as a plain string.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Create a stable identifier from an address and peripheral ID.
///
/// Falls back to the peripheral ID when the address is zeroed out (macOS).
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if address == "00:00:00:00:00:00" {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}
