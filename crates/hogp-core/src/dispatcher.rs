//! Subscription and protocol-mode gated report delivery

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::gatt::CharacteristicId;
use crate::report::HidReport;
use crate::state::{CharacteristicStateStore, ProtocolMode};
use crate::transport::GattTransport;

/// Result of delivering one report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// No central subscribed to the report characteristic
    DroppedUnsubscribed,
    /// The subscription was revoked while the notification was in flight
    Halted,
    /// The transport rejected the notification
    Failed(TransportError),
}

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub dropped: u64,
    pub halted: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    halted: AtomicU64,
    failed: AtomicU64,
}

/// Delivers encoded reports to subscribed centrals
pub struct NotificationDispatcher<T: ?Sized> {
    transport: Arc<T>,
    store: Arc<CharacteristicStateStore>,
    counters: Counters,
}

impl<T: GattTransport + ?Sized> NotificationDispatcher<T> {
    pub fn new(transport: Arc<T>, store: Arc<CharacteristicStateStore>) -> Self {
        Self {
            transport,
            store,
            counters: Counters::default(),
        }
    }

    /// Deliver one report
    ///
    /// The store is consulted once, then released; delivery itself races the
    /// subscription watch so an unsubscribe halts it.
    pub async fn dispatch(&self, report: &HidReport) -> DispatchOutcome {
        let id = CharacteristicId::Report(report.id());
        let snapshot = self.store.snapshot(id);

        if !snapshot.subscribed {
            debug!("Dropping {:?}: {} not subscribed", report, id);
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return DispatchOutcome::DroppedUnsubscribed;
        }

        let payload = match snapshot.mode {
            ProtocolMode::Report => report.to_vec(),
            ProtocolMode::Boot => report.to_boot_frame().to_vec(),
        };
        if snapshot.suspended {
            trace!("Delivering {} while the host is suspended", id);
        }

        let mut watch = self.store.watch();
        let revoked = async move {
            let closed = watch
                .wait_for(|view| {
                    view.get(&id)
                        .map_or(true, |(enabled, epoch)| !enabled || *epoch != snapshot.epoch)
                })
                .await
                .is_err();
            if closed {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            biased;
            _ = revoked => {
                debug!("Delivery on {} halted by unsubscribe", id);
                self.counters.halted.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Halted
            }
            result = self.transport.notify(id, payload.clone()) => match result {
                Ok(()) => {
                    debug!("Delivered {:?} in {:?} mode", report, snapshot.mode);
                    self.store.record_report(report.id(), &payload);
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    DispatchOutcome::Delivered
                }
                Err(e) => {
                    warn!("Notification on {} failed: {}", id, e);
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    DispatchOutcome::Failed(e)
                }
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            halted: self.counters.halted.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::sync::{mpsc, Notify};

    use crate::gatt::GattLayout;
    use crate::report::{Buttons, ConsumerReport, KeyboardReport, PointerReport};
    use crate::transport::{AdvertisingHandle, AdvertisingParams, ApplicationHandle, GattRequest};

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(CharacteristicId, Vec<u8>)>>,
        fail: bool,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait::async_trait]
    impl GattTransport for RecordingTransport {
        async fn set_powered(&self, _powered: bool) -> Result<(), TransportError> {
            Ok(())
        }

        async fn set_alias(&self, _alias: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn register_application(
            &self,
            _layout: &GattLayout,
            _requests: mpsc::Sender<GattRequest>,
        ) -> Result<ApplicationHandle, TransportError> {
            Ok(ApplicationHandle::detached())
        }

        async fn advertise(
            &self,
            _params: &AdvertisingParams,
        ) -> Result<AdvertisingHandle, TransportError> {
            Ok(AdvertisingHandle::detached())
        }

        async fn notify(
            &self,
            characteristic: CharacteristicId,
            value: Vec<u8>,
        ) -> Result<(), TransportError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(TransportError::WriteFailed {
                    characteristic,
                    reason: "link lost".into(),
                });
            }
            self.sent.lock().unwrap().push((characteristic, value));
            Ok(())
        }
    }

    type Fixture = (
        Arc<RecordingTransport>,
        Arc<CharacteristicStateStore>,
        NotificationDispatcher<RecordingTransport>,
    );

    fn setup(transport: RecordingTransport) -> Fixture {
        let transport = Arc::new(transport);
        let store = Arc::new(CharacteristicStateStore::for_reports([1, 2, 3]));
        let dispatcher = NotificationDispatcher::new(transport.clone(), store.clone());
        (transport, store, dispatcher)
    }

    fn key_a() -> HidReport {
        KeyboardReport {
            keys: [0x04, 0, 0, 0, 0, 0],
            ..Default::default()
        }
        .to_report()
    }

    #[tokio::test]
    async fn test_unsubscribed_report_dropped() {
        let (transport, _store, dispatcher) = setup(RecordingTransport::default());
        assert_eq!(dispatcher.dispatch(&key_a()).await, DispatchOutcome::DroppedUnsubscribed);
        assert!(transport.sent.lock().unwrap().is_empty());
        assert_eq!(dispatcher.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_subscribed_report_delivered_as_is() {
        let (transport, store, dispatcher) = setup(RecordingTransport::default());
        store.set_subscription(CharacteristicId::Report(1), true).unwrap();

        assert_eq!(dispatcher.dispatch(&key_a()).await, DispatchOutcome::Delivered);
        assert_eq!(
            transport.sent.lock().unwrap().as_slice(),
            &[(CharacteristicId::Report(1), vec![0, 0, 0x04, 0, 0, 0, 0, 0])]
        );
        assert_eq!(store.last_report(1), Some(vec![0, 0, 0x04, 0, 0, 0, 0, 0]));
    }

    #[tokio::test]
    async fn test_boot_mode_sends_keyboard_frame_for_every_report() {
        let (transport, store, dispatcher) = setup(RecordingTransport::default());
        store.set_subscription(CharacteristicId::Report(2), true).unwrap();
        store.set_subscription(CharacteristicId::Report(3), true).unwrap();
        store.write_protocol_mode(0x00).unwrap();

        let pointer = PointerReport {
            buttons: Buttons::PRIMARY,
            x: 5,
            y: 4,
            ..Default::default()
        }
        .to_report();
        let consumer = ConsumerReport { usage: 0x00CD }.to_report();
        assert_eq!(dispatcher.dispatch(&pointer).await, DispatchOutcome::Delivered);
        assert_eq!(dispatcher.dispatch(&consumer).await, DispatchOutcome::Delivered);

        let sent = transport.sent.lock().unwrap();
        for (_, frame) in sent.iter() {
            assert_eq!(frame, &vec![0u8; 8]);
        }
        assert_eq!(store.last_report(3), Some(vec![0u8; 8]));
    }

    #[tokio::test]
    async fn test_boot_mode_frame_reflects_held_keys() {
        let (transport, store, dispatcher) = setup(RecordingTransport::default());
        store.set_subscription(CharacteristicId::Report(3), true).unwrap();
        store.write_protocol_mode(0x00).unwrap();

        let held = key_a();
        let pointer = PointerReport {
            y: 4,
            ..Default::default()
        }
        .to_report()
        .with_boot_frame(held.to_boot_frame());
        dispatcher.dispatch(&pointer).await;

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].1, vec![0, 0, 0x04, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_last_report_is_what_was_sent() {
        let (_transport, store, dispatcher) = setup(RecordingTransport::default());
        let id = CharacteristicId::Report(3);
        store.set_subscription(id, true).unwrap();

        let pointer = PointerReport {
            x: -1,
            ..Default::default()
        }
        .to_report();
        dispatcher.dispatch(&pointer).await;
        assert_eq!(store.last_report(3), Some(vec![0, 0xFF, 0, 0, 0]));

        store.write_protocol_mode(0x00).unwrap();
        dispatcher.dispatch(&pointer).await;
        assert_eq!(store.last_report(3), Some(vec![0u8; 8]));
    }

    #[tokio::test]
    async fn test_transport_failure_is_contained() {
        let (_transport, store, dispatcher) = setup(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        store.set_subscription(CharacteristicId::Report(1), true).unwrap();

        assert!(matches!(
            dispatcher.dispatch(&key_a()).await,
            DispatchOutcome::Failed(TransportError::WriteFailed { .. })
        ));
        assert!(matches!(
            dispatcher.dispatch(&key_a()).await,
            DispatchOutcome::Failed(_)
        ));
        assert_eq!(dispatcher.stats().failed, 2);
        assert_eq!(store.last_report(1), None);
    }

    #[tokio::test]
    async fn test_unsubscribe_halts_in_flight_delivery() {
        let gate = Arc::new(Notify::new());
        let (transport, store, dispatcher) = setup(RecordingTransport {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let id = CharacteristicId::Report(1);
        store.set_subscription(id, true).unwrap();

        let unsubscribe = {
            let store = store.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                store.set_subscription(id, false).unwrap();
            }
        };
        let event = key_a();
        let (outcome, ()) = tokio::join!(dispatcher.dispatch(&event), unsubscribe);

        assert_eq!(outcome, DispatchOutcome::Halted);
        assert!(transport.sent.lock().unwrap().is_empty());
        assert_eq!(dispatcher.stats().halted, 1);
    }

    #[tokio::test]
    async fn test_resubscribe_does_not_resume_halted_delivery() {
        let gate = Arc::new(Notify::new());
        let (_transport, store, dispatcher) = setup(RecordingTransport {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let id = CharacteristicId::Report(1);
        store.set_subscription(id, true).unwrap();

        let flap = {
            let store = store.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                store.set_subscription(id, false).unwrap();
                store.set_subscription(id, true).unwrap();
            }
        };
        let event = key_a();
        let (outcome, ()) = tokio::join!(dispatcher.dispatch(&event), flap);
        assert_eq!(outcome, DispatchOutcome::Halted);
    }
}
