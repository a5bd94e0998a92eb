//! Core types for peripheral discovery, connection tracking, and GATT
//! capability catalogs.

use core::fmt;
use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use time::OffsetDateTime;
use uuid::Uuid;

/// Raw advertisement content captured when a peripheral is discovered.
///
/// Carried as data only; interpreting manufacturer or service payloads is the
/// caller's business.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AdvertisingData {
    /// Name carried in the advertisement, if any.
    pub local_name: Option<String>,
    /// Manufacturer-specific data keyed by company identifier.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// Service data keyed by service UUID.
    pub service_data: HashMap<Uuid, Vec<u8>>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
    /// Transmit power level in dBm, if advertised.
    pub tx_power: Option<i16>,
}

/// A discovered peripheral snapshot.
///
/// Snapshots are immutable: a repeated discovery of the same `id` replaces the
/// prior snapshot wholesale rather than patching it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Peripheral {
    /// Stable hardware identity (MAC address, or a platform UUID on macOS).
    pub id: String,
    /// Device name if known.
    pub name: Option<String>,
    /// Signal strength in dBm at the time of discovery.
    pub rssi: Option<i16>,
    /// Advertisement content delivered with this discovery.
    pub advertising: AdvertisingData,
    /// When this snapshot was taken.
    pub discovered_at: OffsetDateTime,
}

impl Peripheral {
    /// Create a minimal snapshot with just an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            rssi: None,
            advertising: AdvertisingData::default(),
            discovered_at: OffsetDateTime::now_utc(),
        }
    }

    /// Create a snapshot with an identifier and a name.
    pub fn with_name(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(id)
        }
    }

    /// Human-facing label: the name when known, the identifier otherwise.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Capability flags advertised for a characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CharacteristicCapabilities {
    /// The characteristic supports reads.
    pub read: bool,
    /// The characteristic supports writes.
    pub write: bool,
    /// The characteristic supports notifications.
    pub notify: bool,
}

impl CharacteristicCapabilities {
    /// Capabilities with only `read` set.
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }
}

/// Composite key identifying a characteristic within its service.
///
/// A proper two-field key with derived equality and hashing; concatenating the
/// identifiers into one string would collide on unescaped separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CharacteristicKey {
    /// Service identifier.
    pub service_id: String,
    /// Characteristic identifier.
    pub characteristic_id: String,
}

impl CharacteristicKey {
    /// Create a key from its two components.
    pub fn new(service_id: impl Into<String>, characteristic_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            characteristic_id: characteristic_id.into(),
        }
    }
}

impl fmt::Display for CharacteristicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service_id, self.characteristic_id)
    }
}

/// One characteristic entry in a service catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CharacteristicDescriptor {
    /// Identifier of the service this characteristic belongs to.
    pub service_id: String,
    /// Identifier of the characteristic.
    pub characteristic_id: String,
    /// Capability flags.
    pub capabilities: CharacteristicCapabilities,
}

impl CharacteristicDescriptor {
    /// The composite key for this descriptor.
    #[must_use]
    pub fn key(&self) -> CharacteristicKey {
        CharacteristicKey::new(&self.service_id, &self.characteristic_id)
    }

    /// Whether this characteristic is eligible for a read: it must carry the
    /// read capability and both identifiers must be non-empty.
    #[must_use]
    pub fn is_readable(&self) -> bool {
        self.capabilities.read && !self.service_id.is_empty() && !self.characteristic_id.is_empty()
    }
}

/// Ordered capability metadata retrieved from a connected peripheral.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ServiceCatalog {
    characteristics: Vec<CharacteristicDescriptor>,
}

impl ServiceCatalog {
    /// Build a catalog from descriptors in adapter delivery order.
    #[must_use]
    pub fn new(characteristics: Vec<CharacteristicDescriptor>) -> Self {
        Self { characteristics }
    }

    /// All descriptors, in delivery order.
    pub fn characteristics(&self) -> &[CharacteristicDescriptor] {
        &self.characteristics
    }

    /// Descriptors eligible for a read, in delivery order.
    pub fn readable(&self) -> impl Iterator<Item = &CharacteristicDescriptor> {
        self.characteristics.iter().filter(|c| c.is_readable())
    }

    /// Number of read-eligible descriptors.
    #[must_use]
    pub fn readable_count(&self) -> usize {
        self.readable().count()
    }

    /// Total number of descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.characteristics.len()
    }

    /// Whether the catalog has no descriptors at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.characteristics.is_empty()
    }
}

/// A connected peripheral, before and after capability metadata is attached.
///
/// Connection success creates a `Bare` device; a successful catalog retrieval
/// promotes it to `Cataloged`. Read access is only expressible against the
/// `Cataloged` variant.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "phase", rename_all = "snake_case"))]
pub enum ConnectedDevice {
    /// Connected, no catalog retrieved; ineligible for reads.
    Bare {
        /// The peripheral snapshot the connection was made from.
        peripheral: Peripheral,
    },
    /// Connected with capability metadata attached.
    Cataloged {
        /// The peripheral snapshot the connection was made from.
        peripheral: Peripheral,
        /// Capability metadata retrieved after connecting.
        catalog: ServiceCatalog,
    },
}

impl ConnectedDevice {
    /// The peripheral snapshot this connection was made from.
    pub fn peripheral(&self) -> &Peripheral {
        match self {
            Self::Bare { peripheral } | Self::Cataloged { peripheral, .. } => peripheral,
        }
    }

    /// The device identifier.
    pub fn id(&self) -> &str {
        &self.peripheral().id
    }

    /// The attached catalog, if retrieval has succeeded.
    pub fn catalog(&self) -> Option<&ServiceCatalog> {
        match self {
            Self::Bare { .. } => None,
            Self::Cataloged { catalog, .. } => Some(catalog),
        }
    }

    /// Whether capability metadata has been attached.
    #[must_use]
    pub fn is_cataloged(&self) -> bool {
        matches!(self, Self::Cataloged { .. })
    }

    /// Attach a catalog, promoting `Bare` to `Cataloged` in place.
    ///
    /// Promoting an already-cataloged device replaces its catalog.
    pub fn promote(&mut self, catalog: ServiceCatalog) {
        let peripheral = self.peripheral().clone();
        *self = Self::Cataloged {
            peripheral,
            catalog,
        };
    }
}

/// State of one characteristic read within a session.
///
/// The only legal transition is `Reading` to one of the settled variants;
/// a settled entry never reverts.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "status", rename_all = "snake_case"))]
pub enum ReadState {
    /// Read issued, completion not yet arrived.
    Reading,
    /// Payload received, base64-encoded for text-safe transport.
    Success {
        /// The encoded payload.
        data: String,
    },
    /// The adapter reported a failure for this characteristic.
    Error {
        /// Failure description.
        message: String,
    },
}

impl ReadState {
    /// Whether this entry has reached a terminal state.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Reading)
    }
}
