//! BlueZ peripheral transport using bluer

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bluer::adv::{Advertisement, Type as AdvertisementType};
use bluer::agent::AgentHandle;
use bluer::gatt::local::{
    Application, Characteristic, CharacteristicNotifier, CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicRead, CharacteristicReadRequest,
    CharacteristicWrite, CharacteristicWriteMethod, CharacteristicWriteRequest, Descriptor,
    DescriptorRead, DescriptorReadRequest, ReqError, Service,
};
use bluer::gatt::WriteOp;
use bluer::{Adapter, Session};
use futures::FutureExt;
use hogp_core::gatt::{CharacteristicDef, DescriptorDef};
use hogp_core::{
    AdvertisingHandle, AdvertisingParams, ApplicationHandle, CharacteristicFlags,
    CharacteristicId, DescriptorKind, GattLayout, GattRequest, GattTransport, ProtocolError,
    TransportError,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agent;
use crate::config::BlueZConfig;
use crate::error::BleTransportError;
use crate::monitor::{ConnectionTracker, DeviceStatus};

/// How often an idle notification session checks for unsubscribe
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

// ----------------------------------------------------------------------------
// Notification Sessions
// ----------------------------------------------------------------------------

type Delivery = (Vec<u8>, oneshot::Sender<Result<(), String>>);

/// Live notification sessions, one per subscribed characteristic
#[derive(Default)]
struct Notifiers {
    sessions: Mutex<HashMap<CharacteristicId, mpsc::Sender<Delivery>>>,
}

impl Notifiers {
    fn insert(&self, id: CharacteristicId, tx: mpsc::Sender<Delivery>) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
    }

    /// Remove the session only if it is still the one owned by `tx`
    fn remove(&self, id: CharacteristicId, tx: &mpsc::Sender<Delivery>) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if sessions.get(&id).is_some_and(|current| current.same_channel(tx)) {
            sessions.remove(&id);
        }
    }

    fn get(&self, id: CharacteristicId) -> Option<mpsc::Sender<Delivery>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }
}

/// Drive one subscription until the central stops it
async fn serve_notifications(
    id: CharacteristicId,
    mut notifier: CharacteristicNotifier,
    requests: mpsc::Sender<GattRequest>,
    notifiers: Arc<Notifiers>,
    queue: usize,
) {
    let (tx, mut rx) = mpsc::channel::<Delivery>(queue);
    notifiers.insert(id, tx.clone());
    info!("Central subscribed to {}", id);
    let _ = requests
        .send(GattRequest::Subscribe {
            characteristic: id,
            enabled: true,
        })
        .await;

    loop {
        match tokio::time::timeout(STOP_POLL_INTERVAL, rx.recv()).await {
            Ok(Some((value, reply))) => {
                let result = notifier.notify(value).await.map_err(|e| e.to_string());
                let _ = reply.send(result);
            }
            Ok(None) => break,
            Err(_) => {}
        }
        if notifier.is_stopped() {
            break;
        }
    }

    notifiers.remove(id, &tx);
    info!("Central unsubscribed from {}", id);
    let _ = requests
        .send(GattRequest::Subscribe {
            characteristic: id,
            enabled: false,
        })
        .await;
}

// ----------------------------------------------------------------------------
// Request Forwarding
// ----------------------------------------------------------------------------

fn att_error(err: &ProtocolError) -> ReqError {
    match err {
        ProtocolError::InvalidLength { .. } => ReqError::InvalidValueLength,
        ProtocolError::NotReadable(_) | ProtocolError::NotWritable(_) => ReqError::NotPermitted,
        ProtocolError::NotNotifiable(_) => ReqError::NotSupported,
        ProtocolError::InvalidProtocolMode(_)
        | ProtocolError::InvalidCccd(_)
        | ProtocolError::InvalidControlPoint(_) => ReqError::NotSupported,
    }
}

/// Serve a long read from `offset`
fn slice_from(value: Vec<u8>, offset: u16) -> Result<Vec<u8>, ReqError> {
    let offset = usize::from(offset);
    if offset > value.len() {
        return Err(ReqError::InvalidOffset);
    }
    Ok(value[offset..].to_vec())
}

async fn forward_read(
    requests: mpsc::Sender<GattRequest>,
    build: impl FnOnce(oneshot::Sender<Result<Vec<u8>, ProtocolError>>) -> GattRequest,
    offset: u16,
) -> Result<Vec<u8>, ReqError> {
    let (reply, rx) = oneshot::channel();
    requests.send(build(reply)).await.map_err(|_| ReqError::Failed)?;
    match rx.await {
        Ok(Ok(value)) => slice_from(value, offset),
        Ok(Err(e)) => Err(att_error(&e)),
        Err(_) => Err(ReqError::Failed),
    }
}

async fn forward_write(
    requests: mpsc::Sender<GattRequest>,
    characteristic: CharacteristicId,
    value: Vec<u8>,
    with_response: bool,
) -> Result<(), ReqError> {
    if !with_response {
        return requests
            .send(GattRequest::Write {
                characteristic,
                value,
                reply: None,
            })
            .await
            .map_err(|_| ReqError::Failed);
    }

    let (reply, rx) = oneshot::channel();
    requests
        .send(GattRequest::Write {
            characteristic,
            value,
            reply: Some(reply),
        })
        .await
        .map_err(|_| ReqError::Failed)?;
    match rx.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(att_error(&e)),
        Err(_) => Err(ReqError::Failed),
    }
}

// ----------------------------------------------------------------------------
// Application Construction
// ----------------------------------------------------------------------------

struct ApplicationBuilder {
    requests: mpsc::Sender<GattRequest>,
    notifiers: Arc<Notifiers>,
    queue: usize,
}

impl ApplicationBuilder {
    fn build(&self, layout: &GattLayout) -> Application {
        Application {
            services: layout
                .services()
                .iter()
                .map(|service| Service {
                    uuid: service.uuid(),
                    primary: service.primary,
                    characteristics: service
                        .characteristics
                        .iter()
                        .map(|c| self.characteristic(c))
                        .collect(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn characteristic(&self, def: &CharacteristicDef) -> Characteristic {
        let id = def.id;
        let flags = def.flags;

        let read = flags.is_readable().then(|| {
            let requests = self.requests.clone();
            CharacteristicRead {
                read: flags.contains(CharacteristicFlags::READ),
                encrypt_read: flags.contains(CharacteristicFlags::ENCRYPT_READ),
                secure_read: flags.contains(CharacteristicFlags::SECURE_READ),
                fun: Box::new(move |req: CharacteristicReadRequest| {
                    let requests = requests.clone();
                    async move {
                        debug!(
                            "Read {} at offset {} from {}",
                            id, req.offset, req.device_address
                        );
                        forward_read(
                            requests,
                            |reply| GattRequest::Read {
                                characteristic: id,
                                reply,
                            },
                            req.offset,
                        )
                        .await
                    }
                    .boxed()
                }),
                ..Default::default()
            }
        });

        let write = flags.is_writable().then(|| {
            let requests = self.requests.clone();
            let method = move |value: Vec<u8>, req: CharacteristicWriteRequest| {
                let requests = requests.clone();
                async move {
                    debug!(
                        "Write {} <- {} from {}",
                        id,
                        hex::encode(&value),
                        req.device_address
                    );
                    let with_response = !matches!(req.op_type, WriteOp::Command);
                    forward_write(requests, id, value, with_response).await
                }
                .boxed()
            };
            CharacteristicWrite {
                write: flags.contains(CharacteristicFlags::WRITE),
                write_without_response: flags
                    .contains(CharacteristicFlags::WRITE_WITHOUT_RESPONSE),
                method: CharacteristicWriteMethod::Fun(Box::new(method)),
                ..Default::default()
            }
        });

        let notify = flags.is_notifiable().then(|| {
            let requests = self.requests.clone();
            let notifiers = self.notifiers.clone();
            let queue = self.queue;
            let method = move |notifier: CharacteristicNotifier| {
                serve_notifications(id, notifier, requests.clone(), notifiers.clone(), queue)
                    .boxed()
            };
            CharacteristicNotify {
                notify: flags.contains(CharacteristicFlags::NOTIFY),
                indicate: flags.contains(CharacteristicFlags::INDICATE),
                method: CharacteristicNotifyMethod::Fun(Box::new(method)),
                ..Default::default()
            }
        });

        Characteristic {
            uuid: def.uuid(),
            read,
            write,
            notify,
            descriptors: def
                .descriptors
                .iter()
                .filter_map(|d| self.descriptor(id, d))
                .collect(),
            ..Default::default()
        }
    }

    /// BlueZ owns the CCCD; only app-defined descriptors are registered
    fn descriptor(
        &self,
        characteristic: CharacteristicId,
        def: &DescriptorDef,
    ) -> Option<Descriptor> {
        if def.kind == DescriptorKind::ClientCharacteristicConfiguration {
            return None;
        }
        let requests = self.requests.clone();
        let kind = def.kind;
        Some(Descriptor {
            uuid: kind.uuid(),
            read: Some(DescriptorRead {
                read: true,
                fun: Box::new(move |req: DescriptorReadRequest| {
                    let requests = requests.clone();
                    async move {
                        forward_read(
                            requests,
                            |reply| GattRequest::DescriptorRead {
                                characteristic,
                                descriptor: kind,
                                reply,
                            },
                            req.offset,
                        )
                        .await
                    }
                    .boxed()
                }),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

// ----------------------------------------------------------------------------
// Connection Monitor
// ----------------------------------------------------------------------------

async fn poll_devices(adapter: &Adapter) -> bluer::Result<Vec<DeviceStatus>> {
    let mut devices = Vec::new();
    for address in adapter.device_addresses().await? {
        let device = adapter.device(address)?;
        devices.push(DeviceStatus {
            address: address.to_string(),
            connected: device.is_connected().await.unwrap_or(false),
            paired: device.is_paired().await.unwrap_or(false),
        });
    }
    Ok(devices)
}

fn spawn_connection_monitor(
    adapter: Adapter,
    requests: mpsc::Sender<GattRequest>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Connection monitor started ({:?} interval)", interval);
        let mut tracker = ConnectionTracker::new();
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;
            let devices = match poll_devices(&adapter).await {
                Ok(devices) => devices,
                Err(e) => {
                    warn!("Failed to poll devices: {}", e);
                    continue;
                }
            };

            for event in tracker.observe(&devices) {
                info!("Connection event: {:?}", event);
                if requests.send(GattRequest::Connection(event)).await.is_err() {
                    debug!("Bridge stopped; connection monitor exiting");
                    return;
                }
            }
        }
    })
}

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

/// GATT peripheral served by BlueZ
pub struct BlueZTransport {
    config: BlueZConfig,
    _session: Session,
    adapter: Adapter,
    _agent: AgentHandle,
    notifiers: Arc<Notifiers>,
}

impl BlueZTransport {
    /// Connect to bluetoothd and claim the configured adapter
    pub async fn new(config: BlueZConfig) -> Result<Self, BleTransportError> {
        config.validate()?;

        let session = Session::new()
            .await
            .map_err(|e| BleTransportError::Session(e.to_string()))?;
        let adapter =
            session
                .adapter(&config.adapter_id)
                .map_err(|e| BleTransportError::AdapterNotAvailable {
                    adapter: config.adapter_id.clone(),
                    reason: e.to_string(),
                })?;
        let agent = agent::register(&session, config.pairing_mode).await?;

        info!("Using Bluetooth adapter {}", adapter.name());
        Ok(Self {
            config,
            _session: session,
            adapter,
            _agent: agent,
            notifiers: Arc::new(Notifiers::default()),
        })
    }

    async fn notify_session(
        &self,
        characteristic: CharacteristicId,
        value: Vec<u8>,
    ) -> Result<(), BleTransportError> {
        let session = self
            .notifiers
            .get(characteristic)
            .ok_or(BleTransportError::NotSubscribed(characteristic))?;

        let (reply, rx) = oneshot::channel();
        session
            .send((value, reply))
            .await
            .map_err(|_| BleTransportError::NotSubscribed(characteristic))?;
        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(BleTransportError::NotifyFailed {
                characteristic,
                reason,
            }),
            Err(_) => Err(BleTransportError::NotSubscribed(characteristic)),
        }
    }
}

#[async_trait]
impl GattTransport for BlueZTransport {
    async fn set_powered(&self, powered: bool) -> Result<(), TransportError> {
        self.adapter
            .set_powered(powered)
            .await
            .map_err(|e| BleTransportError::Adapter(format!("set powered: {}", e)))?;
        if powered {
            self.adapter
                .set_pairable(true)
                .await
                .map_err(|e| BleTransportError::Adapter(format!("set pairable: {}", e)))?;
        }
        info!("Adapter {} powered {}", self.adapter.name(), if powered { "on" } else { "off" });
        Ok(())
    }

    async fn set_alias(&self, alias: &str) -> Result<(), TransportError> {
        self.adapter
            .set_alias(alias.to_string())
            .await
            .map_err(|e| BleTransportError::Adapter(format!("set alias: {}", e)))?;
        info!("Bluetooth name set to '{}'", alias);
        Ok(())
    }

    async fn register_application(
        &self,
        layout: &GattLayout,
        requests: mpsc::Sender<GattRequest>,
    ) -> Result<ApplicationHandle, TransportError> {
        let application = ApplicationBuilder {
            requests: requests.clone(),
            notifiers: self.notifiers.clone(),
            queue: self.config.notification_queue,
        }
        .build(layout);

        let handle = self
            .adapter
            .serve_gatt_application(application)
            .await
            .map_err(|e| {
                error!("GATT registration failed: {}", e);
                BleTransportError::Registration(e.to_string())
            })?;
        info!(
            "Registered GATT application with report characteristics {:?}",
            layout.report_ids()
        );

        let monitor = spawn_connection_monitor(
            self.adapter.clone(),
            requests,
            self.config.monitor_interval(),
        );
        Ok(ApplicationHandle::new(move || {
            monitor.abort();
            drop(handle);
        }))
    }

    async fn advertise(
        &self,
        params: &AdvertisingParams,
    ) -> Result<AdvertisingHandle, TransportError> {
        let advertisement = Advertisement {
            advertisement_type: AdvertisementType::Peripheral,
            service_uuids: params.service_uuids.iter().copied().collect(),
            local_name: Some(params.local_name.clone()),
            appearance: Some(self.config.appearance),
            discoverable: Some(params.discoverable),
            timeout: Some(params.timeout),
            ..Default::default()
        };

        let handle = self
            .adapter
            .advertise(advertisement)
            .await
            .map_err(|e| BleTransportError::Advertising(e.to_string()))?;
        info!(
            "Advertising as '{}' for {:?}",
            params.local_name, params.timeout
        );
        Ok(AdvertisingHandle::new(move || drop(handle)))
    }

    async fn notify(
        &self,
        characteristic: CharacteristicId,
        value: Vec<u8>,
    ) -> Result<(), TransportError> {
        Ok(self.notify_session(characteristic, value).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_read_offsets() {
        assert_eq!(slice_from(vec![1, 2, 3], 0).unwrap(), vec![1, 2, 3]);
        assert_eq!(slice_from(vec![1, 2, 3], 2).unwrap(), vec![3]);
        assert_eq!(slice_from(vec![1, 2, 3], 3).unwrap(), Vec::<u8>::new());
        assert!(matches!(slice_from(vec![1, 2, 3], 4), Err(ReqError::InvalidOffset)));
    }

    #[test]
    fn test_att_error_mapping() {
        assert!(matches!(
            att_error(&ProtocolError::InvalidLength {
                characteristic: CharacteristicId::ProtocolMode,
                expected: 1,
                actual: 2,
            }),
            ReqError::InvalidValueLength
        ));
        assert!(matches!(
            att_error(&ProtocolError::NotWritable(CharacteristicId::ReportMap)),
            ReqError::NotPermitted
        ));
        assert!(matches!(
            att_error(&ProtocolError::InvalidProtocolMode(2)),
            ReqError::NotSupported
        ));
    }

    #[tokio::test]
    async fn test_forwarded_read_round_trip() {
        let (tx, mut rx) = mpsc::channel(1);
        let bridge = tokio::spawn(async move {
            if let Some(GattRequest::Read { characteristic, reply }) = rx.recv().await {
                assert_eq!(characteristic, CharacteristicId::ReportMap);
                let _ = reply.send(Ok(vec![0x05, 0x01, 0x09, 0x06]));
            }
        });

        let value = forward_read(
            tx,
            |reply| GattRequest::Read {
                characteristic: CharacteristicId::ReportMap,
                reply,
            },
            2,
        )
        .await
        .unwrap();
        assert_eq!(value, vec![0x09, 0x06]);
        bridge.await.unwrap();
    }

    #[tokio::test]
    async fn test_forwarded_write_rejection() {
        let (tx, mut rx) = mpsc::channel(1);
        tokio::spawn(async move {
            if let Some(GattRequest::Write {
                reply: Some(reply), ..
            }) = rx.recv().await
            {
                let _ = reply.send(Err(ProtocolError::InvalidProtocolMode(2)));
            }
        });

        let result = forward_write(tx, CharacteristicId::ProtocolMode, vec![2], true).await;
        assert!(matches!(result, Err(ReqError::NotSupported)));
    }

    #[tokio::test]
    async fn test_forward_to_stopped_bridge_fails() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let result = forward_write(tx, CharacteristicId::ControlPoint, vec![0], false).await;
        assert!(matches!(result, Err(ReqError::Failed)));
    }
}
