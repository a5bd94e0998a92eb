//! Central device lifecycle and read orchestration.
//!
//! [`CentralManager`] owns the four registries (discovered, connecting,
//! connected, current read session) behind a single lock, so every state
//! transition is totally ordered. The lock is never held across an adapter
//! call; completions re-acquire it in whatever order they arrive and are
//! reconciled by the session generation guard.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use blescout_types::{
    CharacteristicDescriptor, CharacteristicKey, ConnectedDevice, Peripheral, ReadState,
};

use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, ManagerEvent};
use crate::registry::DeviceRegistry;
use crate::session::{ReadSession, encode_payload};
use crate::traits::{AdapterEvent, BleAdapter};
use crate::view::{NotConnectedDevice, project_not_connected};

/// Mutable manager state. One lock over all of it keeps the registries
/// mutually consistent under partial failure.
#[derive(Default)]
struct ManagerState {
    /// Whether a scan window is believed active.
    scanning: bool,
    /// Snapshots of everything discovered since the last scan started.
    registry: DeviceRegistry,
    /// Devices mid-handshake, keyed by id. The snapshot is kept so the
    /// not-connected view can render a connecting device even after a newer
    /// scan cleared its registry entry.
    connecting: HashMap<String, Peripheral>,
    /// Connected devices, keyed by id. Never overlaps `connecting`.
    connected: HashMap<String, ConnectedDevice>,
    /// The current read session, if any.
    session: Option<ReadSession>,
}

/// Engine driving discovery, connection lifecycle, and concurrent
/// characteristic reads against a [`BleAdapter`].
///
/// All state is exposed to callers as cloned snapshots; mutation happens only
/// through the command methods and the adapter event handler.
pub struct CentralManager {
    adapter: Arc<dyn BleAdapter>,
    config: ManagerConfig,
    state: RwLock<ManagerState>,
    /// Monotonic session generation. Never reset, even when a session is
    /// cleared, so completions from dropped sessions still compare unequal
    /// against any future session.
    generation: AtomicU64,
    events: EventDispatcher,
}

impl CentralManager {
    /// Create a manager over the given adapter with default configuration.
    pub fn new(adapter: Arc<dyn BleAdapter>) -> Self {
        Self::with_config(adapter, ManagerConfig::default())
    }

    /// Create a manager with full configuration.
    pub fn with_config(adapter: Arc<dyn BleAdapter>, config: ManagerConfig) -> Self {
        let events = EventDispatcher::new(config.event_capacity);
        Self {
            adapter,
            config,
            state: RwLock::new(ManagerState::default()),
            generation: AtomicU64::new(0),
            events,
        }
    }

    /// Get the event dispatcher for subscribing to manager events.
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Get the manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Initialize the underlying adapter.
    pub async fn start(&self) -> Result<()> {
        self.adapter.start().await
    }

    /// Spawn the pump that feeds adapter events into this manager.
    ///
    /// The task runs until the cancellation token fires or the adapter's
    /// event channel closes.
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut events = manager.adapter.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("event pump cancelled, shutting down");
                        break;
                    }
                    event = events.recv() => match event {
                        Ok(event) => manager.handle_adapter_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "adapter event stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// Apply one adapter event to the manager state.
    pub async fn handle_adapter_event(&self, event: AdapterEvent) {
        match event {
            AdapterEvent::ScanStopped => {
                self.state.write().await.scanning = false;
                debug!("scan window ended");
                self.events.send(ManagerEvent::ScanStopped);
            }
            AdapterEvent::PeripheralDiscovered(peripheral) => {
                // Upsert regardless of the scanning flag: late events from the
                // adapter must not be dropped.
                debug!(device = %peripheral.id, rssi = ?peripheral.rssi, "peripheral discovered");
                self.state
                    .write()
                    .await
                    .registry
                    .upsert(peripheral.clone());
                self.events.send(ManagerEvent::Discovered { peripheral });
            }
            AdapterEvent::PeripheralDisconnected(id) => {
                self.on_peripheral_disconnected(&id).await;
            }
        }
    }

    /// Handle a disconnect notification. User-initiated and adapter-initiated
    /// disconnects both land here; removal is idempotent.
    async fn on_peripheral_disconnected(&self, id: &str) {
        let removed = {
            let mut state = self.state.write().await;
            let removed = state.connected.remove(id).is_some();

            // In-flight reads for this device can never settle usefully now;
            // fail them so the session reaches a terminal state. Terminality
            // then shields the entries from any late completions.
            if let Some(session) = state.session.as_mut()
                && session.device_id() == id
            {
                let settled = session.settle_pending("device disconnected");
                if settled > 0 {
                    debug!(device = %id, settled, "failed pending reads on disconnect");
                }
            }
            removed
        };

        if removed {
            info!(device = %id, "disconnected");
            self.events.send(ManagerEvent::Disconnected {
                device_id: id.to_string(),
            });
        }
    }

    /// Start a scan window.
    ///
    /// Clears the registry, marks scanning active, and issues the adapter
    /// scan with the configured duration and filters. Fails with
    /// [`Error::AlreadyScanning`] (without side effects) while a window is
    /// active, and with [`Error::ScanFailed`] when the adapter rejects the
    /// request, in which case the scanning flag is reset.
    pub async fn start_scan(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if state.scanning {
                return Err(Error::AlreadyScanning);
            }
            state.registry.clear();
            state.scanning = true;
        }

        info!(duration = ?self.config.scan_duration, "starting scan");
        match self
            .adapter
            .scan(
                &self.config.service_filters,
                self.config.scan_duration,
                self.config.allow_duplicates,
            )
            .await
        {
            Ok(()) => {
                self.events.send(ManagerEvent::ScanStarted);
                Ok(())
            }
            Err(e) => {
                // A rejected scan never produces a ScanStopped event, so the
                // flag must be reset here or the UI shows "scanning" forever.
                self.state.write().await.scanning = false;
                warn!("scan could not be started: {e}");
                Err(match e {
                    Error::ScanFailed { .. } => e,
                    other => Error::ScanFailed {
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    /// Whether a scan window is currently active.
    pub async fn is_scanning(&self) -> bool {
        self.state.read().await.scanning
    }

    /// Connect to a discovered peripheral.
    ///
    /// Re-invoking while the device is already connecting or connected is a
    /// no-op returning `Ok`. On success the device is tracked as
    /// [`ConnectedDevice::Bare`] and catalog retrieval is spawned
    /// independently; on failure the device is untracked again and
    /// [`Error::ConnectFailed`] is returned.
    pub async fn connect(self: &Arc<Self>, peripheral: Peripheral) -> Result<()> {
        let id = peripheral.id.clone();

        {
            let mut state = self.state.write().await;
            if state.connected.contains_key(&id) || state.connecting.contains_key(&id) {
                debug!(device = %id, "connect ignored: already connecting or connected");
                return Ok(());
            }
            state.connecting.insert(id.clone(), peripheral.clone());
        }
        self.events.send(ManagerEvent::Connecting {
            device_id: id.clone(),
        });

        match self.adapter.connect(&id).await {
            Ok(()) => {
                {
                    let mut state = self.state.write().await;
                    state.connecting.remove(&id);
                    state
                        .connected
                        .insert(id.clone(), ConnectedDevice::Bare { peripheral });
                }
                info!(device = %id, "connected");
                self.events.send(ManagerEvent::Connected {
                    device_id: id.clone(),
                });

                // Catalog retrieval runs independently of the connect call;
                // the device is usable (Bare) while it is in flight.
                let manager = Arc::clone(self);
                tokio::spawn(async move {
                    manager.attach_catalog(&id).await;
                });
                Ok(())
            }
            Err(e) => {
                self.state.write().await.connecting.remove(&id);
                let err = e.into_connect_failure(&id);
                warn!(device = %id, "connect failed: {err}");
                self.events.send(ManagerEvent::ConnectFailed {
                    device_id: id,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Retrieve and attach the service catalog for a freshly connected device.
    async fn attach_catalog(&self, id: &str) {
        match self.adapter.retrieve_catalog(id).await {
            Ok(catalog) => {
                let readable = {
                    let mut state = self.state.write().await;
                    match state.connected.get_mut(id) {
                        Some(device) => {
                            let readable = catalog.readable_count();
                            device.promote(catalog);
                            Some(readable)
                        }
                        // The device disconnected while retrieval was in
                        // flight; drop the result.
                        None => None,
                    }
                };

                match readable {
                    Some(readable) => {
                        debug!(device = %id, readable, "service catalog attached");
                        self.events.send(ManagerEvent::CatalogAttached {
                            device_id: id.to_string(),
                            readable,
                        });
                    }
                    None => {
                        debug!(device = %id, "catalog retrieved for a device no longer connected")
                    }
                }
            }
            // Non-fatal and never retried: the device stays connected without
            // a catalog and is simply ineligible for reads.
            Err(e) => warn!(device = %id, "service catalog retrieval failed: {e}"),
        }
    }

    /// Request a disconnect.
    ///
    /// State is not mutated here; removal happens in the disconnect
    /// notification handler, so user-requested and adapter-initiated
    /// disconnects converge on one path.
    pub async fn disconnect(&self, id: &str) -> Result<()> {
        self.adapter.disconnect(id).await
    }

    /// Start a read session covering every read-eligible characteristic of a
    /// connected, cataloged device.
    ///
    /// Any prior session is replaced wholesale at a new generation; its
    /// in-flight reads keep running but their completions are discarded on
    /// arrival. Returns the new session's generation.
    pub async fn read_characteristics(self: &Arc<Self>, id: &str) -> Result<u64> {
        let (generation, eligible) = {
            let mut state = self.state.write().await;
            let device = state.connected.get(id).ok_or_else(|| Error::NotConnected {
                device_id: id.to_string(),
            })?;
            let catalog = device.catalog().ok_or_else(|| Error::NoCatalog {
                device_id: id.to_string(),
            })?;

            let eligible: Vec<CharacteristicDescriptor> = catalog.readable().cloned().collect();
            if eligible.is_empty() {
                return Err(Error::NoReadableCharacteristics {
                    device_id: id.to_string(),
                });
            }

            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let session = ReadSession::new(
                id,
                device.peripheral().name.clone(),
                generation,
                &eligible,
            );
            state.session = Some(session);
            (generation, eligible)
        };

        info!(device = %id, generation, characteristics = eligible.len(), "read session started");
        self.events.send(ManagerEvent::SessionStarted {
            device_id: id.to_string(),
            generation,
            characteristics: eligible.len(),
        });

        // One concurrent read per entry; no cap, no orchestrator timeout.
        // Each completion carries the generation it was issued under.
        for descriptor in eligible {
            let manager = Arc::clone(self);
            let device_id = id.to_string();
            tokio::spawn(async move {
                let result = manager
                    .adapter
                    .read(
                        &device_id,
                        &descriptor.service_id,
                        &descriptor.characteristic_id,
                    )
                    .await;
                manager
                    .apply_read_result(generation, &device_id, descriptor.key(), result)
                    .await;
            });
        }

        Ok(generation)
    }

    /// Reconcile one read completion against the current session.
    async fn apply_read_result(
        &self,
        generation: u64,
        device_id: &str,
        key: CharacteristicKey,
        result: Result<Bytes>,
    ) {
        let settled = {
            let mut state = self.state.write().await;
            let Some(session) = state.session.as_mut() else {
                // Session was cleared; nothing left to mutate.
                return;
            };
            if session.generation() != generation {
                debug!(
                    generation,
                    current = session.generation(),
                    characteristic = %key,
                    "discarding completion from superseded session"
                );
                return;
            }

            let new_state = match result {
                Ok(data) => ReadState::Success {
                    data: encode_payload(&data),
                },
                Err(e) => ReadState::Error {
                    message: e.to_string(),
                },
            };
            session.settle(&key, new_state.clone()).then_some(new_state)
        };

        if let Some(state) = settled {
            debug!(device = %device_id, characteristic = %key, "read settled");
            self.events.send(ManagerEvent::ReadSettled {
                device_id: device_id.to_string(),
                key,
                state,
            });
        }
    }

    /// Drop the current session, if any.
    ///
    /// The generation counter is left untouched: completions still in flight
    /// keep comparing against it and are guarded correctly if a new session
    /// is created later.
    pub async fn clear_session(&self) {
        let had_session = self.state.write().await.session.take().is_some();
        if had_session {
            self.events.send(ManagerEvent::SessionCleared);
        }
    }

    // --- Snapshots ---

    /// Clone out every discovered-peripheral snapshot.
    pub async fn peripherals(&self) -> Vec<Peripheral> {
        self.state.read().await.registry.snapshot()
    }

    /// Ids of devices currently mid-handshake.
    pub async fn connecting_ids(&self) -> Vec<String> {
        self.state.read().await.connecting.keys().cloned().collect()
    }

    /// Clone out every connected device.
    pub async fn connected_devices(&self) -> Vec<ConnectedDevice> {
        self.state.read().await.connected.values().cloned().collect()
    }

    /// Look up one connected device.
    pub async fn connected_device(&self, id: &str) -> Option<ConnectedDevice> {
        self.state.read().await.connected.get(id).cloned()
    }

    /// Clone out the current read session, if any.
    pub async fn current_session(&self) -> Option<ReadSession> {
        self.state.read().await.session.clone()
    }

    /// Build the not-connected projection.
    pub async fn not_connected_view(&self) -> Vec<NotConnectedDevice> {
        let state = self.state.read().await;
        project_not_connected(&state.registry, &state.connecting, &state.connected)
    }
}
