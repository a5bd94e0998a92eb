//! Mock adapter for driving the engine without radio hardware.
//!
//! [`MockAdapter`] implements [`BleAdapter`] with scripted outcomes and
//! manually injected events, so tests can exercise every interleaving of
//! concurrent completions:
//!
//! - **Failure injection**: reject the next scan, reject connects per device,
//!   script per-characteristic read failures
//! - **Deferred completion**: hold connects, catalog retrievals, and reads
//!   open until the test resolves them, in any order
//! - **Event injection**: emit discovery/disconnect/scan-stopped events at
//!   will

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, broadcast, oneshot};
use uuid::Uuid;

use blescout_types::{CharacteristicKey, Peripheral, ServiceCatalog};

use crate::error::{ConnectFailureReason, Error, Result};
use crate::traits::{AdapterEvent, AdapterEventReceiver, AdapterEventSender, BleAdapter};

/// Scripted outcome for one characteristic read.
#[derive(Debug, Clone)]
pub enum ReadOutcome {
    /// The read yields this payload.
    Success(Vec<u8>),
    /// The read fails with this reason.
    Failure(String),
}

type ReadKey = (String, CharacteristicKey);

/// A [`BleAdapter`] whose every completion is under test control.
pub struct MockAdapter {
    events: AdapterEventSender,
    started: AtomicBool,
    connect_count: AtomicU32,
    read_count: AtomicU32,

    scan_rejection: Mutex<Option<String>>,
    connect_rejections: Mutex<HashMap<String, String>>,
    catalogs: Mutex<HashMap<String, ServiceCatalog>>,
    read_scripts: Mutex<HashMap<ReadKey, ReadOutcome>>,

    defer_connects: AtomicBool,
    pending_connects: Mutex<HashMap<String, VecDeque<oneshot::Sender<std::result::Result<(), String>>>>>,
    defer_catalogs: AtomicBool,
    pending_catalogs:
        Mutex<HashMap<String, VecDeque<oneshot::Sender<std::result::Result<ServiceCatalog, String>>>>>,
    defer_reads: AtomicBool,
    pending_reads: Mutex<HashMap<ReadKey, VecDeque<oneshot::Sender<ReadOutcome>>>>,
}

impl std::fmt::Debug for MockAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAdapter")
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("connect_count", &self.connect_count.load(Ordering::Relaxed))
            .field("read_count", &self.read_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    /// Create a mock with every operation succeeding by default.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            events,
            started: AtomicBool::new(false),
            connect_count: AtomicU32::new(0),
            read_count: AtomicU32::new(0),
            scan_rejection: Mutex::new(None),
            connect_rejections: Mutex::new(HashMap::new()),
            catalogs: Mutex::new(HashMap::new()),
            read_scripts: Mutex::new(HashMap::new()),
            defer_connects: AtomicBool::new(false),
            pending_connects: Mutex::new(HashMap::new()),
            defer_catalogs: AtomicBool::new(false),
            pending_catalogs: Mutex::new(HashMap::new()),
            defer_reads: AtomicBool::new(false),
            pending_reads: Mutex::new(HashMap::new()),
        }
    }

    /// Build a peripheral snapshot with a random mock address.
    pub fn mock_peripheral(name: Option<&str>) -> Peripheral {
        let id = format!("MOCK-{:06X}", rand::random::<u32>() % 0xFF_FFFF);
        match name {
            Some(name) => Peripheral::with_name(id, name),
            None => Peripheral::new(id),
        }
    }

    // --- Scripting ---

    /// Make the next scan request fail.
    pub async fn reject_next_scan(&self, reason: &str) {
        *self.scan_rejection.lock().await = Some(reason.to_string());
    }

    /// Make every connect to `id` fail.
    pub async fn reject_connect(&self, id: &str, reason: &str) {
        self.connect_rejections
            .lock()
            .await
            .insert(id.to_string(), reason.to_string());
    }

    /// Script the catalog returned for `id`. Without a scripted catalog,
    /// retrieval fails.
    pub async fn set_catalog(&self, id: &str, catalog: ServiceCatalog) {
        self.catalogs.lock().await.insert(id.to_string(), catalog);
    }

    /// Script the outcome of reads against one characteristic of `id`.
    pub async fn script_read(&self, id: &str, key: CharacteristicKey, outcome: ReadOutcome) {
        self.read_scripts
            .lock()
            .await
            .insert((id.to_string(), key), outcome);
    }

    // --- Deferred completion ---

    /// Hold connect calls open until [`resolve_connect`](Self::resolve_connect).
    pub fn defer_connects(&self, defer: bool) {
        self.defer_connects.store(defer, Ordering::SeqCst);
    }

    /// Hold catalog retrievals open until
    /// [`resolve_catalog`](Self::resolve_catalog).
    pub fn defer_catalogs(&self, defer: bool) {
        self.defer_catalogs.store(defer, Ordering::SeqCst);
    }

    /// Hold reads open until [`resolve_read`](Self::resolve_read).
    pub fn defer_reads(&self, defer: bool) {
        self.defer_reads.store(defer, Ordering::SeqCst);
    }

    /// Resolve the oldest held connect for `id`. Returns `false` when none is
    /// pending.
    pub async fn resolve_connect(&self, id: &str, outcome: std::result::Result<(), String>) -> bool {
        let mut pending = self.pending_connects.lock().await;
        match pending.get_mut(id).and_then(VecDeque::pop_front) {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Resolve the oldest held catalog retrieval for `id`.
    pub async fn resolve_catalog(
        &self,
        id: &str,
        outcome: std::result::Result<ServiceCatalog, String>,
    ) -> bool {
        let mut pending = self.pending_catalogs.lock().await;
        match pending.get_mut(id).and_then(VecDeque::pop_front) {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Resolve the oldest held read for one characteristic of `id`. With two
    /// sessions in flight over the same characteristic, the oldest read is
    /// the superseded one.
    pub async fn resolve_read(
        &self,
        id: &str,
        key: &CharacteristicKey,
        outcome: ReadOutcome,
    ) -> bool {
        let mut pending = self.pending_reads.lock().await;
        match pending
            .get_mut(&(id.to_string(), key.clone()))
            .and_then(VecDeque::pop_front)
        {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Wait until `count` reads are held open.
    pub async fn wait_for_pending_reads(&self, count: usize) {
        loop {
            let pending: usize = self
                .pending_reads
                .lock()
                .await
                .values()
                .map(VecDeque::len)
                .sum();
            if pending >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    /// Wait until a connect for `id` is held open.
    pub async fn wait_for_pending_connect(&self, id: &str) {
        loop {
            if self
                .pending_connects
                .lock()
                .await
                .get(id)
                .is_some_and(|q| !q.is_empty())
            {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    /// Wait until a catalog retrieval for `id` is held open.
    pub async fn wait_for_pending_catalog(&self, id: &str) {
        loop {
            if self
                .pending_catalogs
                .lock()
                .await
                .get(id)
                .is_some_and(|q| !q.is_empty())
            {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    // --- Event injection ---

    /// Emit a discovery event.
    pub fn emit_discovered(&self, peripheral: Peripheral) {
        let _ = self
            .events
            .send(AdapterEvent::PeripheralDiscovered(peripheral));
    }

    /// Emit a scan-stopped event.
    pub fn emit_scan_stopped(&self) {
        let _ = self.events.send(AdapterEvent::ScanStopped);
    }

    /// Emit a disconnect notification.
    pub fn emit_disconnected(&self, id: &str) {
        let _ = self
            .events
            .send(AdapterEvent::PeripheralDisconnected(id.to_string()));
    }

    // --- Introspection ---

    /// Number of connect calls made.
    pub fn connect_count(&self) -> u32 {
        self.connect_count.load(Ordering::Relaxed)
    }

    /// Number of read calls made.
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BleAdapter for MockAdapter {
    async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn scan(
        &self,
        _filters: &[Uuid],
        _duration: Duration,
        _allow_duplicates: bool,
    ) -> Result<()> {
        match self.scan_rejection.lock().await.take() {
            Some(reason) => Err(Error::ScanFailed { reason }),
            None => Ok(()),
        }
    }

    async fn connect(&self, id: &str) -> Result<()> {
        self.connect_count.fetch_add(1, Ordering::Relaxed);

        if let Some(reason) = self.connect_rejections.lock().await.get(id).cloned() {
            return Err(Error::connect_failed(
                Some(id.to_string()),
                ConnectFailureReason::Other(reason),
            ));
        }

        if self.defer_connects.load(Ordering::SeqCst) {
            let (tx, rx) = oneshot::channel();
            self.pending_connects
                .lock()
                .await
                .entry(id.to_string())
                .or_default()
                .push_back(tx);
            return match rx.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(reason)) => Err(Error::connect_failed(
                    Some(id.to_string()),
                    ConnectFailureReason::Other(reason),
                )),
                Err(_) => Err(Error::connect_failed(
                    Some(id.to_string()),
                    ConnectFailureReason::Other("connect dropped".into()),
                )),
            };
        }

        Ok(())
    }

    async fn disconnect(&self, id: &str) -> Result<()> {
        // Real adapters report the disconnection through the event stream.
        self.emit_disconnected(id);
        Ok(())
    }

    async fn retrieve_catalog(&self, id: &str) -> Result<ServiceCatalog> {
        if self.defer_catalogs.load(Ordering::SeqCst) {
            let (tx, rx) = oneshot::channel();
            self.pending_catalogs
                .lock()
                .await
                .entry(id.to_string())
                .or_default()
                .push_back(tx);
            return match rx.await {
                Ok(Ok(catalog)) => Ok(catalog),
                Ok(Err(reason)) => Err(Error::CatalogRetrievalFailed {
                    device_id: id.to_string(),
                    reason,
                }),
                Err(_) => Err(Error::CatalogRetrievalFailed {
                    device_id: id.to_string(),
                    reason: "retrieval dropped".into(),
                }),
            };
        }

        self.catalogs
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::CatalogRetrievalFailed {
                device_id: id.to_string(),
                reason: "no catalog scripted".into(),
            })
    }

    async fn read(&self, id: &str, service_id: &str, characteristic_id: &str) -> Result<Bytes> {
        self.read_count.fetch_add(1, Ordering::Relaxed);
        let key = (
            id.to_string(),
            CharacteristicKey::new(service_id, characteristic_id),
        );

        let outcome = if self.defer_reads.load(Ordering::SeqCst) {
            let (tx, rx) = oneshot::channel();
            self.pending_reads
                .lock()
                .await
                .entry(key)
                .or_default()
                .push_back(tx);
            match rx.await {
                Ok(outcome) => outcome,
                Err(_) => ReadOutcome::Failure("read dropped".into()),
            }
        } else {
            self.read_scripts
                .lock()
                .await
                .get(&key)
                .cloned()
                .unwrap_or(ReadOutcome::Success(Vec::new()))
        };

        match outcome {
            ReadOutcome::Success(data) => Ok(Bytes::from(data)),
            ReadOutcome::Failure(reason) => {
                Err(Error::read_failed(service_id, characteristic_id, reason))
            }
        }
    }

    fn subscribe(&self) -> AdapterEventReceiver {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_read_outcomes() {
        let adapter = MockAdapter::new();
        let key = CharacteristicKey::new("180a", "2a29");
        adapter
            .script_read("AA:BB", key.clone(), ReadOutcome::Success(b"hi".to_vec()))
            .await;

        let data = adapter.read("AA:BB", "180a", "2a29").await.unwrap();
        assert_eq!(&data[..], b"hi");

        adapter
            .script_read("AA:BB", key, ReadOutcome::Failure("status=137".into()))
            .await;
        let err = adapter.read("AA:BB", "180a", "2a29").await.unwrap_err();
        assert!(err.to_string().contains("status=137"));
        assert_eq!(adapter.read_count(), 2);
    }

    #[tokio::test]
    async fn test_deferred_reads_resolve_fifo() {
        let adapter = std::sync::Arc::new(MockAdapter::new());
        adapter.defer_reads(true);
        let key = CharacteristicKey::new("180a", "2a29");

        let first = {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.read("AA:BB", "180a", "2a29").await })
        };
        let second = {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.read("AA:BB", "180a", "2a29").await })
        };
        adapter.wait_for_pending_reads(2).await;

        assert!(
            adapter
                .resolve_read("AA:BB", &key, ReadOutcome::Success(b"first".to_vec()))
                .await
        );
        assert!(
            adapter
                .resolve_read("AA:BB", &key, ReadOutcome::Failure("late".into()))
                .await
        );

        assert_eq!(&first.await.unwrap().unwrap()[..], b"first");
        assert!(second.await.unwrap().is_err());
    }

    #[test]
    fn test_mock_peripheral_has_mock_address() {
        let peripheral = MockAdapter::mock_peripheral(Some("Band"));
        assert!(peripheral.id.starts_with("MOCK-"));
        assert_eq!(peripheral.display_name(), "Band");
    }

    #[tokio::test]
    async fn test_unscripted_catalog_fails() {
        let adapter = MockAdapter::new();
        let err = adapter.retrieve_catalog("AA:BB").await.unwrap_err();
        assert!(matches!(err, Error::CatalogRetrievalFailed { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_emits_notification() {
        let adapter = MockAdapter::new();
        let mut events = adapter.subscribe();

        adapter.disconnect("AA:BB").await.unwrap();

        match events.recv().await.unwrap() {
            AdapterEvent::PeripheralDisconnected(id) => assert_eq!(id, "AA:BB"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
