//! BLE device lifecycle and concurrent characteristic-read engine.
//!
//! This crate tracks nearby Bluetooth Low Energy peripherals through their
//! whole lifecycle (discovered, connecting, connected, cataloged) and
//! orchestrates concurrent reads of every readable characteristic on a
//! connected device.
//!
//! # Features
//!
//! - **Discovery registry**: last-write-wins snapshots of everything seen
//!   since the current scan started
//! - **Connection state machine**: connecting and connected sets that never
//!   overlap, with one removal path for every kind of disconnect
//! - **Catalog attachment**: capability metadata attached asynchronously
//!   after connect, tolerant of a disconnect racing the retrieval
//! - **Read orchestration**: one concurrent read per readable characteristic,
//!   reconciled under arbitrary completion order by a session generation
//!   guard
//! - **Adapter injection**: the radio is a constructor-supplied
//!   [`BleAdapter`]; [`MockAdapter`] drives the engine in tests without
//!   hardware
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use blescout_core::{BtleplugAdapter, CentralManager};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = Arc::new(BtleplugAdapter::new().await?);
//!     let manager = Arc::new(CentralManager::new(adapter));
//!     manager.start().await?;
//!
//!     let cancel = CancellationToken::new();
//!     let pump = manager.spawn_event_pump(cancel.clone());
//!
//!     manager.start_scan().await?;
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!
//!     for row in manager.not_connected_view().await {
//!         println!("{} ({:?} dBm)", row.peripheral.display_name(), row.peripheral.rssi);
//!     }
//!
//!     cancel.cancel();
//!     pump.await?;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod mock;
pub mod registry;
pub mod session;
pub mod traits;
pub mod util;
pub mod view;

// Re-export the shared data model for convenience.
pub use blescout_types as types;
pub use blescout_types::{
    AdvertisingData, CharacteristicCapabilities, CharacteristicDescriptor, CharacteristicKey,
    ConnectedDevice, Peripheral, ReadState, ServiceCatalog,
};

// Core exports
pub use adapter::BtleplugAdapter;
pub use config::ManagerConfig;
pub use error::{ConnectFailureReason, Error, Result};
pub use events::{EventDispatcher, EventReceiver, EventSender, ManagerEvent};
pub use manager::CentralManager;
pub use mock::{MockAdapter, ReadOutcome};
pub use registry::DeviceRegistry;
pub use session::ReadSession;
pub use traits::{AdapterEvent, AdapterEventReceiver, AdapterEventSender, BleAdapter};
pub use view::NotConnectedDevice;
