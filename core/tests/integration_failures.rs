//! Failure-path Integration Tests for NearPay
//!
//! Unreachable peers, dead radios and malformed payloads on the loopback
//! medium. A failure for one peer must never stop delivery to the others.
//!
//! Run with: cargo test --test integration_failures

use nearpay_core::transport::adapter::{
    AdvertiseData, AdvertiseSettings, ClientEvent, LinkState,
};
use nearpay_core::transport::ble::{MESSAGE_CHARACTERISTIC_UUID, SERVICE_UUID};
use nearpay_core::{
    BleError, BroadcastRequest, ConnectionState, EngineConfig, LoopbackMedium, Message,
    PeerId, PeerMessagingEngine, RadioAdapter,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn config(name: &str) -> EngineConfig {
    EngineConfig::default()
        .with_device_name(name)
        .with_discovery_window(Duration::from_millis(100))
        .with_attempt_timeout(Duration::from_secs(2))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}

async fn engine(medium: &Arc<LoopbackMedium>, address: &str, name: &str) -> PeerMessagingEngine {
    init_tracing();
    let engine = PeerMessagingEngine::new(config(name), medium.radio(address, name))
        .expect("Failed to create engine");
    engine.init().await.expect("Failed to start engine");
    engine
}

#[tokio::test]
async fn test_unreachable_peer_does_not_block_others() {
    let medium = LoopbackMedium::new();
    let cashier = engine(&medium, "AA:00:00:00:00:01", "cashier").await;
    let _alice = engine(&medium, "AA:00:00:00:00:03", "alice").await;

    // advertises the service but hosts nothing
    let ghost = medium.radio("AA:00:00:00:00:02", "ghost");
    ghost
        .start_advertising(
            AdvertiseData {
                service_uuid: SERVICE_UUID,
                include_device_name: true,
                device_name: "ghost".to_string(),
            },
            AdvertiseSettings::default(),
        )
        .await
        .expect("advertise");

    let report = cashier
        .broadcast(&BroadcastRequest::new("4", "Snacks"))
        .await
        .expect("broadcast");

    assert_eq!(report.outcomes.len(), 2);
    let ghost_outcome = report
        .outcome(&PeerId::from("AA:00:00:00:00:02"))
        .expect("ghost outcome");
    assert!(matches!(
        ghost_outcome.terminal_state(),
        ConnectionState::Failed(BleError::ConnectionFailed { .. })
    ));
    assert!(report
        .outcome(&PeerId::from("AA:00:00:00:00:03"))
        .expect("alice outcome")
        .is_delivered());
    assert_eq!(medium.open_links(), 0);
}

#[tokio::test]
async fn test_init_fails_when_radio_is_off() {
    init_tracing();
    let medium = LoopbackMedium::new();
    let radio = medium.radio("AA:00:00:00:00:01", "cashier");
    medium.set_powered(&radio.local_address(), false);

    let engine = PeerMessagingEngine::new(config("cashier"), radio).expect("engine");
    let result = engine.init().await;

    assert!(matches!(result, Err(BleError::ServerFailed(_))));
    assert!(!engine.is_running().await);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_radio_loss_yields_empty_broadcast() {
    let medium = LoopbackMedium::new();
    let cashier = engine(&medium, "AA:00:00:00:00:01", "cashier").await;
    let _alice = engine(&medium, "AA:00:00:00:00:02", "alice").await;

    medium.set_powered(&cashier.local_address(), false);

    let report = cashier
        .broadcast(&BroadcastRequest::new("1", "x"))
        .await
        .expect("scan failure is not an error");
    assert!(report.discovered.is_empty());
    assert!(report.outcomes.is_empty());
}

#[tokio::test]
async fn test_peer_lost_after_discovery() {
    let medium = LoopbackMedium::new();
    let cashier = engine(&medium, "AA:00:00:00:00:01", "cashier").await;
    let alice = engine(&medium, "AA:00:00:00:00:02", "alice").await;
    let mut deliveries = cashier.subscribe_deliveries();

    let medium_for_task = medium.clone();
    let alice_id = alice.local_address();
    let cut = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        medium_for_task.set_powered(&alice_id, false);
    });

    let report = cashier
        .broadcast(&BroadcastRequest::new("9", "Late"))
        .await
        .expect("broadcast");
    cut.await.expect("power cut");

    assert_eq!(report.discovered.len(), 1);
    assert_eq!(report.failed(), 1);
    assert!(matches!(
        deliveries.recv().await.expect("started"),
        nearpay_core::DeliveryEvent::Started { peers: 1 }
    ));
    assert!(matches!(
        deliveries.recv().await.expect("failed"),
        nearpay_core::DeliveryEvent::Failed { .. }
    ));
}

#[tokio::test]
async fn test_malformed_write_is_dropped_and_stream_continues() {
    let medium = LoopbackMedium::new();
    let alice = engine(&medium, "AA:00:00:00:00:02", "alice").await;
    let mut messages = alice.subscribe_messages();
    let writer = medium.radio("AA:00:00:00:00:09", "writer");

    let (tx, mut events) = mpsc::unbounded_channel();
    let link = writer
        .connect(&alice.local_address(), tx)
        .await
        .expect("connect");
    assert!(matches!(
        events.recv().await,
        Some(ClientEvent::ConnectionStateChanged {
            state: LinkState::Connected,
            ..
        })
    ));

    for payload in [vec![0xc3, 0x28, 0xff], b"plain text".to_vec()] {
        writer
            .write_characteristic(link, SERVICE_UUID, MESSAGE_CHARACTERISTIC_UUID, payload)
            .await
            .expect("write");
        // acknowledged regardless of content
        assert!(matches!(
            events.recv().await,
            Some(ClientEvent::CharacteristicWritten { status, .. }) if status.is_success()
        ));
    }

    let received = tokio::time::timeout(Duration::from_secs(2), messages.recv())
        .await
        .expect("timed out")
        .expect("message");
    assert_eq!(received, Message::Remote("plain text".to_string()));
    assert!(messages.try_recv().is_err());

    writer.close(link);
}
