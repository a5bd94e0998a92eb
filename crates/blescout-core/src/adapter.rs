//! btleplug-backed adapter.
//!
//! [`BtleplugAdapter`] implements [`BleAdapter`] over the first system
//! Bluetooth adapter, translating btleplug central events into the engine's
//! [`AdapterEvent`] stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, CharPropFlags, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral as PlatformPeripheral, PeripheralId};
use bytes::Bytes;
use futures::stream::StreamExt;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

use blescout_types::{
    AdvertisingData, CharacteristicCapabilities, CharacteristicDescriptor, Peripheral,
    ServiceCatalog,
};

use crate::error::{ConnectFailureReason, Error, Result};
use crate::traits::{AdapterEvent, AdapterEventReceiver, AdapterEventSender, BleAdapter};
use crate::util::{create_identifier, format_peripheral_id};

/// Production [`BleAdapter`] over btleplug.
pub struct BtleplugAdapter {
    adapter: Adapter,
    events: AdapterEventSender,
    /// Whether repeated advertisements are forwarded during the current scan.
    allow_duplicates: Arc<AtomicBool>,
    started: AtomicBool,
}

impl BtleplugAdapter {
    /// Bind to the first available system Bluetooth adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters.into_iter().next().ok_or(Error::NoAdapter)?;
        let (events, _) = broadcast::channel(256);

        Ok(Self {
            adapter,
            events,
            allow_duplicates: Arc::new(AtomicBool::new(true)),
            started: AtomicBool::new(false),
        })
    }

    /// Locate a known peripheral by identifier (address or peripheral ID).
    async fn find_peripheral(&self, id: &str) -> Result<PlatformPeripheral> {
        let id_lower = id.to_lowercase();

        for peripheral in self.adapter.peripherals().await? {
            if format_peripheral_id(&peripheral.id()).to_lowercase() == id_lower {
                return Ok(peripheral);
            }
            if let Ok(Some(props)) = peripheral.properties().await
                && props.address.to_string().to_lowercase() == id_lower
            {
                return Ok(peripheral);
            }
        }

        Err(Error::device_not_found(id))
    }
}

/// Take a discovery snapshot of a peripheral's current properties.
async fn snapshot(peripheral: &PlatformPeripheral) -> Result<Option<Peripheral>> {
    let Some(props) = peripheral.properties().await? else {
        return Ok(None);
    };

    let id = create_identifier(&props.address.to_string(), &peripheral.id());
    Ok(Some(Peripheral {
        id,
        name: props.local_name.clone(),
        rssi: props.rssi,
        advertising: AdvertisingData {
            local_name: props.local_name,
            manufacturer_data: props.manufacturer_data,
            service_data: props.service_data,
            services: props.services,
            tx_power: props.tx_power_level,
        },
        discovered_at: OffsetDateTime::now_utc(),
    }))
}

/// Forward a discovery or advertisement refresh as a fresh snapshot.
async fn forward_discovery(adapter: &Adapter, events: &AdapterEventSender, id: &PeripheralId) {
    match adapter.peripheral(id).await {
        Ok(peripheral) => match snapshot(&peripheral).await {
            Ok(Some(peripheral)) => {
                let _ = events.send(AdapterEvent::PeripheralDiscovered(peripheral));
            }
            Ok(None) => {}
            Err(e) => debug!(
                "failed to snapshot peripheral {}: {e}",
                format_peripheral_id(id)
            ),
        },
        Err(e) => debug!("unknown peripheral {}: {e}", format_peripheral_id(id)),
    }
}

/// Resolve the engine-facing identifier for a disconnect notification.
async fn disconnect_identifier(adapter: &Adapter, id: &PeripheralId) -> String {
    if let Ok(peripheral) = adapter.peripheral(id).await
        && let Ok(Some(props)) = peripheral.properties().await
    {
        return create_identifier(&props.address.to_string(), id);
    }
    format_peripheral_id(id)
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::InvalidIdentifier {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl BleAdapter for BtleplugAdapter {
    async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut stream = self.adapter.events().await?;
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let allow_duplicates = Arc::clone(&self.allow_duplicates);

        tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                match event {
                    CentralEvent::DeviceDiscovered(id) => {
                        forward_discovery(&adapter, &events, &id).await;
                    }
                    CentralEvent::DeviceUpdated(id) => {
                        // Repeated adverts refresh RSSI and name only while
                        // duplicate reporting is on.
                        if allow_duplicates.load(Ordering::Relaxed) {
                            forward_discovery(&adapter, &events, &id).await;
                        }
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        let identifier = disconnect_identifier(&adapter, &id).await;
                        let _ = events.send(AdapterEvent::PeripheralDisconnected(identifier));
                    }
                    _ => {}
                }
            }
            debug!("btleplug event stream ended");
        });

        Ok(())
    }

    async fn scan(
        &self,
        filters: &[Uuid],
        duration: Duration,
        allow_duplicates: bool,
    ) -> Result<()> {
        self.allow_duplicates
            .store(allow_duplicates, Ordering::Relaxed);

        self.adapter
            .start_scan(ScanFilter {
                services: filters.to_vec(),
            })
            .await?;

        // btleplug has no scan window of its own; stop after the requested
        // duration and report the end of the window.
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            sleep(duration).await;
            if let Err(e) = adapter.stop_scan().await {
                warn!("failed to stop scan: {e}");
            }
            let _ = events.send(AdapterEvent::ScanStopped);
        });

        Ok(())
    }

    async fn connect(&self, id: &str) -> Result<()> {
        let peripheral = self.find_peripheral(id).await?;
        peripheral.connect().await.map_err(|e| {
            Error::connect_failed(
                Some(id.to_string()),
                ConnectFailureReason::BleError(e.to_string()),
            )
        })
    }

    async fn disconnect(&self, id: &str) -> Result<()> {
        let peripheral = self.find_peripheral(id).await?;
        // The DeviceDisconnected notification follows from the platform.
        peripheral.disconnect().await?;
        Ok(())
    }

    async fn retrieve_catalog(&self, id: &str) -> Result<ServiceCatalog> {
        let peripheral = self.find_peripheral(id).await?;
        peripheral.discover_services().await?;

        let mut characteristics = Vec::new();
        for service in peripheral.services() {
            for characteristic in &service.characteristics {
                characteristics.push(CharacteristicDescriptor {
                    service_id: service.uuid.to_string(),
                    characteristic_id: characteristic.uuid.to_string(),
                    capabilities: CharacteristicCapabilities {
                        read: characteristic.properties.contains(CharPropFlags::READ),
                        write: characteristic.properties.contains(CharPropFlags::WRITE)
                            || characteristic
                                .properties
                                .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
                        notify: characteristic.properties.contains(CharPropFlags::NOTIFY),
                    },
                });
            }
        }

        debug!(device = %id, characteristics = characteristics.len(), "catalog retrieved");
        Ok(ServiceCatalog::new(characteristics))
    }

    async fn read(&self, id: &str, service_id: &str, characteristic_id: &str) -> Result<Bytes> {
        let service_uuid = parse_uuid(service_id)?;
        let characteristic_uuid = parse_uuid(characteristic_id)?;

        let peripheral = self.find_peripheral(id).await?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic_uuid && c.service_uuid == service_uuid)
            .ok_or_else(|| Error::characteristic_not_found(service_id, characteristic_id))?;

        let data = peripheral
            .read(&characteristic)
            .await
            .map_err(|e| Error::read_failed(service_id, characteristic_id, e.to_string()))?;
        Ok(Bytes::from(data))
    }

    fn subscribe(&self) -> AdapterEventReceiver {
        self.events.subscribe()
    }
}
