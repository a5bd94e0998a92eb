//! Adapter abstraction for BLE radio operations.
//!
//! The [`BleAdapter`] trait is the boundary between the lifecycle engine and
//! whatever performs the actual radio work. The production implementation is
//! [`BtleplugAdapter`](crate::adapter::BtleplugAdapter); tests drive the
//! engine through [`MockAdapter`](crate::mock::MockAdapter) without hardware.
//!
//! The adapter is injected into [`CentralManager`](crate::manager::CentralManager)
//! at construction, so engine behavior is testable against any interleaving of
//! adapter completions.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use uuid::Uuid;

use blescout_types::{Peripheral, ServiceCatalog};

use crate::error::Result;

/// Unsolicited events emitted by a [`BleAdapter`].
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// The current scan window has ended.
    ScanStopped,
    /// A peripheral was discovered or re-advertised.
    PeripheralDiscovered(Peripheral),
    /// A peripheral disconnected, whether requested or not.
    PeripheralDisconnected(String),
}

/// Sender half of an adapter's event channel.
pub type AdapterEventSender = broadcast::Sender<AdapterEvent>;

/// Receiver half of an adapter's event channel.
pub type AdapterEventReceiver = broadcast::Receiver<AdapterEvent>;

/// Operations the engine needs from a BLE radio.
///
/// All calls are asynchronous; completions may resolve in any order relative
/// to each other. Methods resolve when the adapter has accepted the request
/// (`scan`) or when the operation itself finishes (everything else).
/// Disconnections are reported only through the event stream, including those
/// requested via [`disconnect`](Self::disconnect).
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Initialize the adapter and begin emitting events.
    async fn start(&self) -> Result<()>;

    /// Start scanning for the given duration.
    ///
    /// An empty `filters` slice scans for everything. With `allow_duplicates`
    /// set, repeated advertisements from a known peripheral are redelivered so
    /// RSSI and name stay fresh. Resolves once the scan is running; the end of
    /// the window arrives later as [`AdapterEvent::ScanStopped`].
    async fn scan(&self, filters: &[Uuid], duration: Duration, allow_duplicates: bool)
    -> Result<()>;

    /// Establish a connection to a peripheral.
    async fn connect(&self, id: &str) -> Result<()>;

    /// Tear down the connection to a peripheral.
    async fn disconnect(&self, id: &str) -> Result<()>;

    /// Discover services and characteristics on a connected peripheral.
    async fn retrieve_catalog(&self, id: &str) -> Result<ServiceCatalog>;

    /// Read one characteristic's value.
    async fn read(&self, id: &str, service_id: &str, characteristic_id: &str) -> Result<Bytes>;

    /// Subscribe to the adapter's event stream.
    fn subscribe(&self) -> AdapterEventReceiver;
}
