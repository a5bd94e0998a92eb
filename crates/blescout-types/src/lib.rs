//! Platform-agnostic types for BLE peripheral discovery and GATT catalogs.
//!
//! This crate provides the shared data model consumed by the blescout engine
//! and its front ends:
//!
//! - Discovered-peripheral snapshots and their advertisement content
//! - The two-phase connected-device record (`Bare`/`Cataloged`)
//! - Service catalogs with per-characteristic capability flags
//! - Read-session entry states
//!
//! # Example
//!
//! ```
//! use blescout_types::{CharacteristicCapabilities, CharacteristicDescriptor, ServiceCatalog};
//!
//! let catalog = ServiceCatalog::new(vec![CharacteristicDescriptor {
//!     service_id: "180a".into(),
//!     characteristic_id: "2a29".into(),
//!     capabilities: CharacteristicCapabilities::read_only(),
//! }]);
//! assert_eq!(catalog.readable_count(), 1);
//! ```

pub mod types;

pub use types::{
    AdvertisingData, CharacteristicCapabilities, CharacteristicDescriptor, CharacteristicKey,
    ConnectedDevice, Peripheral, ReadState, ServiceCatalog,
};
