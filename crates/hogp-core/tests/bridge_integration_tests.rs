//! End-to-end bridge scenarios against a recording transport


use std::sync::atomic::Ordering;
use std::time::Duration;

use hogp_core::event::axis;
use hogp_core::{
    AdvertisingPolicy, BackoffConfig, Bridge, BridgeConfig, ChannelEventSource, CharacteristicId,
    ConnectionEvent, DescriptorKind, GattRequest, HogpError, InputEvent, ProtocolError,
    ReportDescriptor, Shutdown, TransportError, Usage,
};
use test_utils::{Harness, MockTransport};
use tokio::sync::oneshot;

const KEYBOARD: CharacteristicId = CharacteristicId::Report(1);
const CONSUMER: CharacteristicId = CharacteristicId::Report(2);
const POINTER: CharacteristicId = CharacteristicId::Report(3);

fn fast_backoff() -> BackoffConfig {
    BackoffConfig {
        initial_delay_ms: 10,
        max_delay_ms: 50,
        multiplier: 2,
        max_attempts: None,
    }
}

// ----------------------------------------------------------------------------
// Startup
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_startup_powers_registers_and_advertises() {
    let harness = Harness::start(BridgeConfig::default().with_local_name("Desk Keyboard")).await;
    let transport = harness.transport.clone();

    assert!(transport.powered.load(Ordering::SeqCst));
    assert_eq!(transport.alias.lock().unwrap().as_deref(), Some("Desk Keyboard"));
    assert!(transport.is_advertising());
    let layout = transport.layout.lock().unwrap().clone().unwrap();
    assert_eq!(layout.report_ids(), vec![1, 2, 3]);

    harness.stop().await.unwrap();
    assert!(!transport.is_advertising());
    assert!(transport.application_released.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_initial_advertise_failure_is_fatal() {
    let (transport, _notifications) = MockTransport::new();
    transport.fail_initial_advertise.store(true, Ordering::SeqCst);

    let (_events, source) = ChannelEventSource::channel(4);
    let bridge = Bridge::new(BridgeConfig::default(), transport.clone()).unwrap();
    let err = bridge.run(source, Shutdown::new()).await.unwrap_err();

    assert!(matches!(
        err,
        HogpError::Transport(TransportError::AdvertiseFailed(_))
    ));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_malformed_descriptor_rejected_at_construction() {
    let (transport, _notifications) = MockTransport::new();
    let descriptor = ReportDescriptor::new(vec![0x05, 0x01, 0xA1, 0x01]);
    let err = Bridge::with_descriptor(BridgeConfig::default(), descriptor, transport)
        .err()
        .unwrap();
    assert!(matches!(err, HogpError::Descriptor(_)));
}

// ----------------------------------------------------------------------------
// Delivery
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_key_press_delivered_only_while_subscribed() {
    let mut harness = Harness::start(BridgeConfig::default()).await;

    harness.subscribe(KEYBOARD, true).await;
    harness.input(InputEvent::key_press(0x04)).await;
    assert_eq!(
        harness.next_notification().await,
        (KEYBOARD, vec![0, 0, 0x04, 0, 0, 0, 0, 0])
    );

    harness.subscribe(KEYBOARD, false).await;
    harness.input(InputEvent::key_release(0x04)).await;

    // The next delivered report proves the release was dropped
    harness.subscribe(CONSUMER, true).await;
    harness
        .input(InputEvent::button_press(Usage::consumer(0xE9)))
        .await;
    assert_eq!(harness.next_notification().await, (CONSUMER, vec![0xE9, 0x00]));

    let stats = harness.stop().await.unwrap();
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.dropped, 1);
}

#[tokio::test]
async fn test_reports_keep_input_order() {
    let mut harness = Harness::start(BridgeConfig::default()).await;
    harness.subscribe(KEYBOARD, true).await;

    for usage in [0x04, 0x05, 0x06] {
        harness.input(InputEvent::key_press(usage)).await;
    }

    assert_eq!(harness.next_notification().await.1, vec![0, 0, 0x04, 0, 0, 0, 0, 0]);
    assert_eq!(harness.next_notification().await.1, vec![0, 0, 0x04, 0x05, 0, 0, 0, 0]);
    assert_eq!(harness.next_notification().await.1, vec![0, 0, 0x04, 0x05, 0x06, 0, 0, 0]);

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_unsupported_event_is_dropped_and_flow_continues() {
    let mut harness = Harness::start(BridgeConfig::default()).await;
    harness.subscribe(POINTER, true).await;

    harness.input(InputEvent::pointer_move(0x42, 5)).await;
    harness.input(InputEvent::pointer_move(axis::X, 200)).await;

    assert_eq!(harness.next_notification().await, (POINTER, vec![0, 127, 0, 0, 0]));
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_boot_mode_sends_no_phantom_keys() {
    let mut harness = Harness::start(BridgeConfig::default()).await;
    harness.subscribe(CONSUMER, true).await;
    harness.subscribe(POINTER, true).await;
    harness.write(CharacteristicId::ProtocolMode, &[0x00]).await.unwrap();

    harness
        .input(InputEvent::button_press(Usage::consumer(0xCD)))
        .await;
    harness.input(InputEvent::pointer_move(axis::Y, 4)).await;

    // Neither usage 0xCD nor the Y delta may surface as modifiers or keycodes
    assert_eq!(harness.next_notification().await, (CONSUMER, vec![0; 8]));
    assert_eq!(harness.next_notification().await, (POINTER, vec![0; 8]));
    assert_eq!(harness.read(POINTER).await.unwrap(), vec![0; 8]);

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_boot_mode_keyboard_frame_carries_held_keys() {
    let mut harness = Harness::start(BridgeConfig::default()).await;
    harness.subscribe(KEYBOARD, true).await;
    harness.subscribe(POINTER, true).await;
    harness.write(CharacteristicId::ProtocolMode, &[0x00]).await.unwrap();

    harness.input(InputEvent::key_press(0xE0)).await;
    harness.input(InputEvent::key_press(0x04)).await;
    harness.input(InputEvent::pointer_move(axis::X, 9)).await;

    assert_eq!(
        harness.next_notification().await,
        (KEYBOARD, vec![0x01, 0, 0, 0, 0, 0, 0, 0])
    );
    assert_eq!(
        harness.next_notification().await,
        (KEYBOARD, vec![0x01, 0, 0x04, 0, 0, 0, 0, 0])
    );
    assert_eq!(
        harness.next_notification().await,
        (POINTER, vec![0x01, 0, 0x04, 0, 0, 0, 0, 0])
    );

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_report_read_returns_report_mode_value() {
    let mut harness = Harness::start(BridgeConfig::default()).await;
    harness.subscribe(POINTER, true).await;

    assert_eq!(harness.read(POINTER).await.unwrap(), vec![0; 5]);
    harness.input(InputEvent::pointer_move(axis::X, -1)).await;
    harness.next_notification().await;
    assert_eq!(harness.read(POINTER).await.unwrap(), vec![0, 0xFF, 0, 0, 0]);

    harness.stop().await.unwrap();
}

// ----------------------------------------------------------------------------
// Characteristic Access
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_invalid_protocol_mode_write_rejected() {
    let harness = Harness::start(BridgeConfig::default()).await;

    assert_eq!(
        harness.write(CharacteristicId::ProtocolMode, &[0x02]).await,
        Err(ProtocolError::InvalidProtocolMode(0x02))
    );
    assert_eq!(
        harness.read(CharacteristicId::ProtocolMode).await.unwrap(),
        vec![0x01]
    );

    assert!(matches!(
        harness.write(CharacteristicId::ProtocolMode, &[0x00, 0x01]).await,
        Err(ProtocolError::InvalidLength { expected: 1, actual: 2, .. })
    ));
    assert_eq!(
        harness.write(CharacteristicId::ReportMap, &[0x00]).await,
        Err(ProtocolError::NotWritable(CharacteristicId::ReportMap))
    );

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_static_reads() {
    let harness = Harness::start(BridgeConfig::default()).await;

    assert_eq!(
        harness.read(CharacteristicId::HidInformation).await.unwrap(),
        vec![0x11, 0x01, 0x00, 0x02]
    );
    assert_eq!(
        harness.read(CharacteristicId::ReportMap).await.unwrap(),
        ReportDescriptor::combined().as_bytes().to_vec()
    );
    assert_eq!(harness.read(KEYBOARD).await.unwrap(), vec![0; 8]);
    assert_eq!(harness.read(POINTER).await.unwrap(), vec![0; 5]);
    assert_eq!(
        harness.read(CharacteristicId::ControlPoint).await,
        Err(ProtocolError::NotReadable(CharacteristicId::ControlPoint))
    );

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_descriptor_reads() {
    let harness = Harness::start(BridgeConfig::default()).await;

    let (reply, rx) = oneshot::channel();
    harness
        .requests
        .send(GattRequest::DescriptorRead {
            characteristic: POINTER,
            descriptor: DescriptorKind::ReportReference,
            reply,
        })
        .await
        .unwrap();
    assert_eq!(rx.await.unwrap().unwrap(), vec![0x03, 0x01]);

    harness.subscribe(POINTER, true).await;
    let (reply, rx) = oneshot::channel();
    harness
        .requests
        .send(GattRequest::DescriptorRead {
            characteristic: POINTER,
            descriptor: DescriptorKind::ClientCharacteristicConfiguration,
            reply,
        })
        .await
        .unwrap();
    assert_eq!(rx.await.unwrap().unwrap(), vec![0x01, 0x00]);

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_cccd_writes_drive_delivery() {
    let mut harness = Harness::start(BridgeConfig::default()).await;

    harness.write_cccd(KEYBOARD, &[0x01, 0x00]).await.unwrap();
    harness.input(InputEvent::key_press(0x04)).await;
    assert_eq!(
        harness.next_notification().await,
        (KEYBOARD, vec![0, 0, 0x04, 0, 0, 0, 0, 0])
    );

    harness.write_cccd(KEYBOARD, &[0x00, 0x00]).await.unwrap();
    harness.input(InputEvent::key_release(0x04)).await;

    harness.write_cccd(POINTER, &[0x01, 0x00]).await.unwrap();
    harness.input(InputEvent::pointer_move(axis::X, 1)).await;
    assert_eq!(harness.next_notification().await, (POINTER, vec![0, 1, 0, 0, 0]));

    let stats = harness.stop().await.unwrap();
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.dropped, 1);
}

#[tokio::test]
async fn test_invalid_descriptor_writes_rejected() {
    let mut harness = Harness::start(BridgeConfig::default()).await;

    assert!(matches!(
        harness.write_cccd(KEYBOARD, &[0x01]).await,
        Err(ProtocolError::InvalidCccd(_))
    ));
    assert!(matches!(
        harness.write_cccd(KEYBOARD, &[0x04, 0x00]).await,
        Err(ProtocolError::InvalidCccd(_))
    ));
    assert_eq!(
        harness.write_cccd(CharacteristicId::ProtocolMode, &[0x01, 0x00]).await,
        Err(ProtocolError::NotNotifiable(CharacteristicId::ProtocolMode))
    );

    // Indicate-only leaves notifications off
    harness.write_cccd(KEYBOARD, &[0x02, 0x00]).await.unwrap();
    harness.input(InputEvent::key_press(0x04)).await;

    harness.write_cccd(CONSUMER, &[0x01, 0x00]).await.unwrap();
    harness
        .input(InputEvent::button_press(Usage::consumer(0xE9)))
        .await;
    assert_eq!(harness.next_notification().await, (CONSUMER, vec![0xE9, 0x00]));

    let stats = harness.stop().await.unwrap();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.dropped, 1);
}

#[tokio::test]
async fn test_control_point_suspend_does_not_gate_delivery() {
    let mut harness = Harness::start(BridgeConfig::default()).await;
    harness.subscribe(KEYBOARD, true).await;

    harness.write(CharacteristicId::ControlPoint, &[0x00]).await.unwrap();
    harness.input(InputEvent::key_press(0x04)).await;
    assert_eq!(harness.next_notification().await.0, KEYBOARD);

    assert_eq!(
        harness.write(CharacteristicId::ControlPoint, &[0x02]).await,
        Err(ProtocolError::InvalidControlPoint(0x02))
    );
    harness.stop().await.unwrap();
}

// ----------------------------------------------------------------------------
// Connection Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_disconnect_resets_state_and_resumes_advertising() {
    let harness = Harness::start(BridgeConfig::default()).await;
    let transport = harness.transport.clone();
    let address = "AA:BB:CC:DD:EE:FF".to_string();

    harness.subscribe(KEYBOARD, true).await;
    harness.write(CharacteristicId::ProtocolMode, &[0x00]).await.unwrap();
    harness
        .connection(ConnectionEvent::Connected {
            address: address.clone(),
            bonded: true,
        })
        .await;
    assert!(!transport.is_advertising());

    harness
        .connection(ConnectionEvent::Disconnected { address })
        .await;
    assert!(transport.is_advertising());
    assert_eq!(
        harness.read(CharacteristicId::ProtocolMode).await.unwrap(),
        vec![0x01]
    );

    let (reply, rx) = oneshot::channel();
    harness
        .requests
        .send(GattRequest::DescriptorRead {
            characteristic: KEYBOARD,
            descriptor: DescriptorKind::ClientCharacteristicConfiguration,
            reply,
        })
        .await
        .unwrap();
    assert_eq!(rx.await.unwrap().unwrap(), vec![0x00, 0x00]);

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_unbonded_disconnect_restarts_advertising() {
    let harness = Harness::start(BridgeConfig::default()).await;
    let transport = harness.transport.clone();
    let address = "AA:BB:CC:DD:EE:01".to_string();

    harness
        .connection(ConnectionEvent::Connected {
            address: address.clone(),
            bonded: false,
        })
        .await;
    assert!(transport.is_advertising());
    assert_eq!(transport.advertise_calls.load(Ordering::SeqCst), 1);

    harness
        .connection(ConnectionEvent::Disconnected { address })
        .await;
    assert!(transport.is_advertising());
    assert_eq!(transport.advertise_calls.load(Ordering::SeqCst), 2);

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_after_bonding_keeps_advertising_off() {
    let config = BridgeConfig::default().with_advertising_policy(AdvertisingPolicy::StopAfterBonding);
    let harness = Harness::start(config).await;
    let transport = harness.transport.clone();
    let address = "11:22:33:44:55:66".to_string();

    harness
        .connection(ConnectionEvent::Connected {
            address: address.clone(),
            bonded: false,
        })
        .await;
    assert!(transport.is_advertising());

    harness
        .connection(ConnectionEvent::Bonded {
            address: address.clone(),
        })
        .await;
    assert!(!transport.is_advertising());

    harness
        .connection(ConnectionEvent::Disconnected { address })
        .await;
    assert!(!transport.is_advertising());

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_readvertise_failure_retries_with_backoff() {
    let (transport, notifications) = MockTransport::new();
    transport.advertise_failures.store(2, Ordering::SeqCst);
    let config = BridgeConfig::default().with_backoff(fast_backoff());
    let harness = Harness::start_with(config, transport.clone(), notifications).await;
    let address = "AA:AA:AA:AA:AA:AA".to_string();

    harness
        .connection(ConnectionEvent::Connected {
            address: address.clone(),
            bonded: true,
        })
        .await;
    harness
        .connection(ConnectionEvent::Disconnected { address })
        .await;
    assert!(!transport.is_advertising());

    tokio::time::timeout(Duration::from_secs(2), async {
        while !transport.is_advertising() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("advertising resumed after retries");
    assert_eq!(transport.advertise_calls.load(Ordering::SeqCst), 4);

    harness.stop().await.unwrap();
}

// ----------------------------------------------------------------------------
// Shutdown
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_input_close_stops_bridge() {
    let harness = Harness::start(BridgeConfig::default()).await;
    let Harness {
        transport,
        events,
        task,
        ..
    } = harness;

    drop(events);
    let stats = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(stats.delivered, 0);
    assert!(!transport.is_advertising());
}

#[tokio::test]
async fn test_repeated_shutdown_is_safe() {
    let harness = Harness::start(BridgeConfig::default()).await;
    harness.shutdown.trigger();
    harness.shutdown.trigger();
    assert!(harness.stop().await.is_ok());
}
