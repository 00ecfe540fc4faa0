//! Bridge end to end over the logging transport

use std::sync::Arc;
use std::time::Duration;

use hogp_ble::PlatformTransport;
use hogp_core::{Bridge, BridgeConfig, ChannelEventSource, InputEvent, Shutdown};

#[tokio::test]
async fn test_dry_run_bridge_drains_input() {
    let transport = Arc::new(PlatformTransport::dry_run());
    assert_eq!(transport.name(), "fallback");

    let bridge = Bridge::new(BridgeConfig::default(), transport).unwrap();
    let (events, source) = ChannelEventSource::channel(8);
    let task = tokio::spawn(bridge.run(source, Shutdown::new()));

    events.send(InputEvent::key_press(0x04)).await.unwrap();
    events.send(InputEvent::key_release(0x04)).await.unwrap();
    drop(events);

    let stats = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("bridge stops when input closes")
        .unwrap()
        .unwrap();
    // Nothing subscribes on the fallback transport
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.dropped, 2);
}

#[tokio::test]
async fn test_dry_run_bridge_honours_shutdown() {
    let transport = Arc::new(PlatformTransport::dry_run());
    let bridge = Bridge::new(BridgeConfig::default(), transport).unwrap();
    let (_events, source) = ChannelEventSource::channel(8);
    let shutdown = Shutdown::new();
    let task = tokio::spawn(bridge.run(source, shutdown.clone()));

    shutdown.trigger();
    shutdown.trigger();

    let result = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("bridge stops on shutdown")
        .unwrap();
    assert!(result.is_ok());
}
