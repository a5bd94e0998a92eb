//! Integration tests for blescout-core.
//!
//! These drive the full engine through the mock adapter: every adapter
//! completion is held open and resolved by the test, so arbitrary completion
//! interleavings are exercised deterministically.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use blescout_core::{
    BleAdapter, CentralManager, CharacteristicCapabilities, CharacteristicDescriptor,
    CharacteristicKey, Error, EventReceiver, ManagerEvent, MockAdapter, Peripheral, ReadOutcome,
    ReadSession, ReadState, ServiceCatalog,
};

const DEVICE_A: &str = "11:11:11:11:11:11";
const DEVICE_B: &str = "22:22:22:22:22:22";

fn readable(service_id: &str, characteristic_id: &str) -> CharacteristicDescriptor {
    CharacteristicDescriptor {
        service_id: service_id.to_string(),
        characteristic_id: characteristic_id.to_string(),
        capabilities: CharacteristicCapabilities::read_only(),
    }
}

fn write_only(service_id: &str, characteristic_id: &str) -> CharacteristicDescriptor {
    CharacteristicDescriptor {
        service_id: service_id.to_string(),
        characteristic_id: characteristic_id.to_string(),
        capabilities: CharacteristicCapabilities {
            write: true,
            ..Default::default()
        },
    }
}

/// Manager wired to a mock adapter with a running event pump.
fn setup() -> (Arc<CentralManager>, Arc<MockAdapter>, CancellationToken) {
    let adapter = Arc::new(MockAdapter::new());
    let manager = Arc::new(CentralManager::new(adapter.clone() as Arc<dyn BleAdapter>));
    let cancel = CancellationToken::new();
    manager.spawn_event_pump(cancel.clone());
    (manager, adapter, cancel)
}

/// Wait for the first event matching the predicate.
async fn await_event<F>(events: &mut EventReceiver, mut matches: F) -> ManagerEvent
where
    F: FnMut(&ManagerEvent) -> bool,
{
    timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Wait until the current session has no pending entries.
async fn await_settled_session(manager: &CentralManager) -> ReadSession {
    timeout(Duration::from_secs(2), async {
        loop {
            if let Some(session) = manager.current_session().await
                && session.is_settled()
            {
                return session;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("session never settled")
}

/// Connect a device and wait for its catalog to attach.
async fn connect_cataloged(
    manager: &Arc<CentralManager>,
    adapter: &MockAdapter,
    events: &mut EventReceiver,
    id: &str,
    catalog: ServiceCatalog,
) {
    adapter.set_catalog(id, catalog).await;
    manager.connect(Peripheral::new(id)).await.unwrap();
    await_event(events, |e| {
        matches!(e, ManagerEvent::CatalogAttached { device_id, .. } if device_id == id)
    })
    .await;
}

#[tokio::test]
async fn test_scan_connect_read_end_to_end() {
    let (manager, adapter, _cancel) = setup();
    let mut events = manager.events().subscribe();

    // Discover A and B.
    manager.start_scan().await.unwrap();
    adapter.emit_discovered(Peripheral::with_name(DEVICE_A, "iPhone"));
    adapter.emit_discovered(Peripheral::new(DEVICE_B));
    await_event(&mut events, |e| {
        matches!(e, ManagerEvent::Discovered { peripheral } if peripheral.id == DEVICE_B)
    })
    .await;
    assert_eq!(manager.peripherals().await.len(), 2);

    // Connect A; its catalog has three characteristics, two read-capable.
    adapter.defer_reads(true);
    connect_cataloged(
        &manager,
        &adapter,
        &mut events,
        DEVICE_A,
        ServiceCatalog::new(vec![
            readable("180a", "2a29"),
            readable("180a", "2a24"),
            write_only("180a", "2a00"),
        ]),
    )
    .await;

    // The session covers exactly the two readable characteristics.
    let generation = manager.read_characteristics(DEVICE_A).await.unwrap();
    assert_eq!(generation, 1);
    let session = manager.current_session().await.unwrap();
    assert_eq!(session.device_id(), DEVICE_A);
    assert_eq!(session.len(), 2);
    assert_eq!(session.pending(), 2);

    // One read succeeds, the other fails; neither touches the other.
    let c1 = CharacteristicKey::new("180a", "2a29");
    let c2 = CharacteristicKey::new("180a", "2a24");
    adapter.wait_for_pending_reads(2).await;
    assert!(
        adapter
            .resolve_read(DEVICE_A, &c1, ReadOutcome::Success(b"iPhone".to_vec()))
            .await
    );
    assert!(
        adapter
            .resolve_read(DEVICE_A, &c2, ReadOutcome::Failure("status=137".into()))
            .await
    );

    let session = await_settled_session(&manager).await;
    assert_eq!(
        session.get(&c1),
        Some(&ReadState::Success {
            data: "aVBob25l".into()
        })
    );
    match session.get(&c2) {
        Some(ReadState::Error { message }) => assert!(message.contains("status=137")),
        other => panic!("unexpected state: {other:?}"),
    }

    // B was discovered but never connected.
    let connected = manager.connected_devices().await;
    assert_eq!(connected.len(), 1);
    assert_eq!(connected[0].id(), DEVICE_A);
}

#[tokio::test]
async fn test_all_entries_settle_in_reverse_completion_order() {
    let (manager, adapter, _cancel) = setup();
    let mut events = manager.events().subscribe();

    adapter.defer_reads(true);
    connect_cataloged(
        &manager,
        &adapter,
        &mut events,
        DEVICE_A,
        ServiceCatalog::new(vec![
            readable("180a", "2a29"),
            readable("180a", "2a24"),
            readable("180f", "2a19"),
        ]),
    )
    .await;

    manager.read_characteristics(DEVICE_A).await.unwrap();
    adapter.wait_for_pending_reads(3).await;

    // Resolve in the reverse of issue order.
    for key in [
        CharacteristicKey::new("180f", "2a19"),
        CharacteristicKey::new("180a", "2a24"),
        CharacteristicKey::new("180a", "2a29"),
    ] {
        assert!(
            adapter
                .resolve_read(DEVICE_A, &key, ReadOutcome::Success(vec![0x01]))
                .await
        );
    }

    let session = await_settled_session(&manager).await;
    assert_eq!(session.len(), 3);
    assert!(session.entries().values().all(ReadState::is_settled));
}

#[tokio::test]
async fn test_stale_completion_does_not_mutate_new_session() {
    let (manager, adapter, _cancel) = setup();
    let mut events = manager.events().subscribe();

    adapter.defer_reads(true);
    connect_cataloged(
        &manager,
        &adapter,
        &mut events,
        DEVICE_A,
        ServiceCatalog::new(vec![readable("180a", "2a29")]),
    )
    .await;
    let key = CharacteristicKey::new("180a", "2a29");

    let first = manager.read_characteristics(DEVICE_A).await.unwrap();
    adapter.wait_for_pending_reads(1).await;

    // A second session supersedes the first wholesale.
    let second = manager.read_characteristics(DEVICE_A).await.unwrap();
    assert!(second > first);
    adapter.wait_for_pending_reads(2).await;

    // The oldest pending read belongs to the superseded session; its
    // completion must produce no observable mutation.
    assert!(
        adapter
            .resolve_read(DEVICE_A, &key, ReadOutcome::Success(b"stale".to_vec()))
            .await
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    let session = manager.current_session().await.unwrap();
    assert_eq!(session.generation(), second);
    assert_eq!(session.get(&key), Some(&ReadState::Reading));

    // The current-generation completion lands normally.
    assert!(
        adapter
            .resolve_read(DEVICE_A, &key, ReadOutcome::Success(b"fresh".to_vec()))
            .await
    );
    let session = await_settled_session(&manager).await;
    assert_eq!(
        session.get(&key),
        Some(&ReadState::Success {
            data: "ZnJlc2g=".into()
        })
    );
}

#[tokio::test]
async fn test_stale_completion_for_other_devices_session() {
    let (manager, adapter, _cancel) = setup();
    let mut events = manager.events().subscribe();

    adapter.defer_reads(true);
    let key = CharacteristicKey::new("180a", "2a29");
    connect_cataloged(
        &manager,
        &adapter,
        &mut events,
        DEVICE_A,
        ServiceCatalog::new(vec![readable("180a", "2a29")]),
    )
    .await;
    connect_cataloged(
        &manager,
        &adapter,
        &mut events,
        DEVICE_B,
        ServiceCatalog::new(vec![readable("180a", "2a29")]),
    )
    .await;

    manager.read_characteristics(DEVICE_A).await.unwrap();
    adapter.wait_for_pending_reads(1).await;

    // B's session replaces A's while A's read is still in flight.
    manager.read_characteristics(DEVICE_B).await.unwrap();
    adapter.wait_for_pending_reads(2).await;

    // A's completion arrives late and must not touch B's session.
    assert!(
        adapter
            .resolve_read(DEVICE_A, &key, ReadOutcome::Success(b"wrong".to_vec()))
            .await
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    let session = manager.current_session().await.unwrap();
    assert_eq!(session.device_id(), DEVICE_B);
    assert_eq!(session.get(&key), Some(&ReadState::Reading));
}

#[tokio::test]
async fn test_cleared_session_ignores_inflight_completions() {
    let (manager, adapter, _cancel) = setup();
    let mut events = manager.events().subscribe();

    adapter.defer_reads(true);
    connect_cataloged(
        &manager,
        &adapter,
        &mut events,
        DEVICE_A,
        ServiceCatalog::new(vec![readable("180a", "2a29")]),
    )
    .await;
    let key = CharacteristicKey::new("180a", "2a29");

    manager.read_characteristics(DEVICE_A).await.unwrap();
    adapter.wait_for_pending_reads(1).await;
    manager.clear_session().await;
    assert!(manager.current_session().await.is_none());

    // The in-flight completion finds no session and is simply ignored.
    assert!(
        adapter
            .resolve_read(DEVICE_A, &key, ReadOutcome::Success(b"late".to_vec()))
            .await
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(manager.current_session().await.is_none());

    // The generation counter was left alone, so a fresh session still
    // supersedes anything older.
    let next = manager.read_characteristics(DEVICE_A).await.unwrap();
    assert_eq!(next, 2);
}

#[tokio::test]
async fn test_disconnect_fails_pending_reads_and_keeps_settled_ones() {
    let (manager, adapter, _cancel) = setup();
    let mut events = manager.events().subscribe();

    adapter.defer_reads(true);
    connect_cataloged(
        &manager,
        &adapter,
        &mut events,
        DEVICE_A,
        ServiceCatalog::new(vec![readable("180a", "2a29"), readable("180a", "2a24")]),
    )
    .await;
    let done = CharacteristicKey::new("180a", "2a29");
    let still_pending = CharacteristicKey::new("180a", "2a24");

    manager.read_characteristics(DEVICE_A).await.unwrap();
    adapter.wait_for_pending_reads(2).await;
    assert!(
        adapter
            .resolve_read(DEVICE_A, &done, ReadOutcome::Success(b"ok".to_vec()))
            .await
    );
    await_event(&mut events, |e| matches!(e, ManagerEvent::ReadSettled { .. })).await;

    // Disconnect while the second read is still in flight. Removal and the
    // session update go through the same notification path as an
    // adapter-initiated disconnect.
    manager.disconnect(DEVICE_A).await.unwrap();
    await_event(&mut events, |e| {
        matches!(e, ManagerEvent::Disconnected { device_id } if device_id == DEVICE_A)
    })
    .await;
    assert!(manager.connected_devices().await.is_empty());

    let session = manager.current_session().await.unwrap();
    assert!(session.is_settled());
    assert!(matches!(
        session.get(&done),
        Some(ReadState::Success { .. })
    ));
    assert_eq!(
        session.get(&still_pending),
        Some(&ReadState::Error {
            message: "device disconnected".into()
        })
    );

    // The read's eventual completion must not overwrite the terminal state.
    assert!(
        adapter
            .resolve_read(DEVICE_A, &still_pending, ReadOutcome::Success(b"zombie".to_vec()))
            .await
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    let session = manager.current_session().await.unwrap();
    assert_eq!(
        session.get(&still_pending),
        Some(&ReadState::Error {
            message: "device disconnected".into()
        })
    );
}

#[tokio::test]
async fn test_catalog_arriving_after_disconnect_is_a_silent_noop() {
    let (manager, adapter, _cancel) = setup();
    let mut events = manager.events().subscribe();

    adapter.defer_catalogs(true);
    manager.connect(Peripheral::new(DEVICE_A)).await.unwrap();
    adapter.wait_for_pending_catalog(DEVICE_A).await;

    adapter.emit_disconnected(DEVICE_A);
    await_event(&mut events, |e| {
        matches!(e, ManagerEvent::Disconnected { device_id } if device_id == DEVICE_A)
    })
    .await;

    // The retrieval resolves after the device is gone; the update is dropped.
    assert!(
        adapter
            .resolve_catalog(
                DEVICE_A,
                Ok(ServiceCatalog::new(vec![readable("180a", "2a29")]))
            )
            .await
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(manager.connected_devices().await.is_empty());
}

#[tokio::test]
async fn test_catalog_failure_leaves_device_bare_and_session_untouched() {
    let (manager, adapter, _cancel) = setup();
    let mut events = manager.events().subscribe();

    // B is cataloged and owns the current session.
    adapter.defer_reads(true);
    connect_cataloged(
        &manager,
        &adapter,
        &mut events,
        DEVICE_B,
        ServiceCatalog::new(vec![readable("180a", "2a29")]),
    )
    .await;
    let generation = manager.read_characteristics(DEVICE_B).await.unwrap();

    // A connects but its catalog retrieval fails (nothing scripted); it stays
    // connected and Bare.
    manager.connect(Peripheral::new(DEVICE_A)).await.unwrap();
    let device = timeout(Duration::from_secs(2), async {
        loop {
            if let Some(device) = manager.connected_device(DEVICE_A).await {
                return device;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert!(!device.is_cataloged());

    // Reading a Bare device fails and leaves the current session as-is.
    let err = manager.read_characteristics(DEVICE_A).await.unwrap_err();
    assert!(matches!(err, Error::NoCatalog { .. }));
    let session = manager.current_session().await.unwrap();
    assert_eq!(session.device_id(), DEVICE_B);
    assert_eq!(session.generation(), generation);
}

#[tokio::test]
async fn test_catalog_without_readable_entries_rejects_reads() {
    let (manager, adapter, _cancel) = setup();
    let mut events = manager.events().subscribe();

    connect_cataloged(
        &manager,
        &adapter,
        &mut events,
        DEVICE_A,
        ServiceCatalog::new(vec![
            write_only("180a", "2a00"),
            // Read-capable but unusable: empty service identifier.
            CharacteristicDescriptor {
                service_id: String::new(),
                characteristic_id: "2a29".into(),
                capabilities: CharacteristicCapabilities::read_only(),
            },
        ]),
    )
    .await;

    let err = manager.read_characteristics(DEVICE_A).await.unwrap_err();
    assert!(matches!(err, Error::NoReadableCharacteristics { .. }));
    assert!(manager.current_session().await.is_none());
}

#[tokio::test]
async fn test_connecting_device_appears_in_view_and_sets_never_overlap() {
    let (manager, adapter, _cancel) = setup();
    let mut events = manager.events().subscribe();

    manager.start_scan().await.unwrap();
    adapter.emit_discovered(Peripheral::new(DEVICE_A));
    await_event(&mut events, |e| matches!(e, ManagerEvent::Discovered { .. })).await;

    adapter.defer_connects(true);
    let connect_task = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.connect(Peripheral::new(DEVICE_A)).await })
    };
    adapter.wait_for_pending_connect(DEVICE_A).await;

    // Mid-handshake: reported as connecting, absent from connected.
    let view = manager.not_connected_view().await;
    assert_eq!(view.len(), 1);
    assert!(view[0].is_connecting);
    assert_eq!(manager.connecting_ids().await, vec![DEVICE_A.to_string()]);
    assert!(manager.connected_devices().await.is_empty());

    assert!(adapter.resolve_connect(DEVICE_A, Ok(())).await);
    connect_task.await.unwrap().unwrap();

    // Connected: gone from the view and from the connecting set.
    assert!(manager.not_connected_view().await.is_empty());
    assert!(manager.connecting_ids().await.is_empty());
    assert_eq!(manager.connected_devices().await.len(), 1);
}

#[tokio::test]
async fn test_rediscovery_refreshes_rssi_during_scan() {
    let (manager, adapter, _cancel) = setup();
    let mut events = manager.events().subscribe();

    manager.start_scan().await.unwrap();

    let mut weak = Peripheral::new(DEVICE_A);
    weak.rssi = Some(-80);
    adapter.emit_discovered(weak);
    let mut strong = Peripheral::with_name(DEVICE_A, "Band");
    strong.rssi = Some(-50);
    adapter.emit_discovered(strong);
    await_event(&mut events, |e| {
        matches!(e, ManagerEvent::Discovered { peripheral } if peripheral.rssi == Some(-50))
    })
    .await;

    let peripherals = manager.peripherals().await;
    assert_eq!(peripherals.len(), 1);
    assert_eq!(peripherals[0].rssi, Some(-50));
    assert_eq!(peripherals[0].name.as_deref(), Some("Band"));

    adapter.emit_scan_stopped();
    await_event(&mut events, |e| matches!(e, ManagerEvent::ScanStopped)).await;
    assert!(!manager.is_scanning().await);
}
