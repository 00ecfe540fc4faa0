//! Bridge orchestration
//!
//! Owns the startup sequence and runs two flows until shutdown:
//! - the input flow drains an [`InputEventSource`], encodes each event and
//!   dispatches the resulting reports, strictly in order;
//! - the control flow serves [`GattRequest`]s from the transport (reads,
//!   writes, subscriptions, connection events) and drives advertising.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{AdvertisingPolicy, BackoffConfig, BridgeConfig};
use crate::descriptor::ReportDescriptor;
use crate::dispatcher::{DispatchStats, NotificationDispatcher};
use crate::encoder::ReportEncoder;
use crate::error::{HogpError, ProtocolError, Result, TransportError};
use crate::gatt::{CharacteristicId, DescriptorKind, GattLayout};
use crate::report::ReportId;
use crate::source::InputEventSource;
use crate::state::CharacteristicStateStore;
use crate::transport::{
    AdvertisingHandle, AdvertisingParams, ConnectionEvent, GattRequest, GattTransport,
};

// ----------------------------------------------------------------------------
// Shutdown Signal
// ----------------------------------------------------------------------------

/// Cloneable, idempotent shutdown signal
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown. Safe to call any number of times from any task.
    pub fn trigger(&self) {
        self.tx.send_if_modified(|triggered| !std::mem::replace(triggered, true));
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once shutdown has been requested
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Advertising Lifecycle
// ----------------------------------------------------------------------------

struct Advertiser<T: ?Sized> {
    transport: Arc<T>,
    params: AdvertisingParams,
    backoff: BackoffConfig,
    handle: Option<AdvertisingHandle>,
    failures: u32,
    retry_at: Option<Instant>,
}

impl<T: GattTransport + ?Sized> Advertiser<T> {
    fn new(transport: Arc<T>, params: AdvertisingParams, backoff: BackoffConfig) -> Self {
        Self {
            transport,
            params,
            backoff,
            handle: None,
            failures: 0,
            retry_at: None,
        }
    }

    fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// First start; failures are returned to the caller
    async fn start(&mut self) -> std::result::Result<(), TransportError> {
        let handle = self.transport.advertise(&self.params).await?;
        info!("Advertising as {:?}", self.params.local_name);
        self.handle = Some(handle);
        Ok(())
    }

    /// Restart after a disconnection; failures schedule a retry
    async fn resume(&mut self) {
        if self.is_active() {
            return;
        }
        match self.start().await {
            Ok(()) => {
                self.failures = 0;
                self.retry_at = None;
            }
            Err(e) => {
                self.failures += 1;
                if self.backoff.exhausted(self.failures) {
                    error!("Giving up on advertising after {} attempts: {}", self.failures, e);
                    self.retry_at = None;
                } else {
                    let delay = self.backoff.delay(self.failures - 1);
                    warn!("Advertising failed ({}), retrying in {:?}", e, delay);
                    self.retry_at = Some(Instant::now() + delay);
                }
            }
        }
    }

    /// Replace any running advertisement with a fresh one
    async fn restart(&mut self) {
        self.retry_at = None;
        self.handle = None;
        self.resume().await;
    }

    fn stop(&mut self) {
        self.retry_at = None;
        if let Some(handle) = self.handle.take() {
            handle.stop();
            info!("Advertising stopped");
        }
    }
}

// ----------------------------------------------------------------------------
// Bridge
// ----------------------------------------------------------------------------

/// HID-over-GATT bridge context, constructed once per process
pub struct Bridge<T: ?Sized> {
    config: BridgeConfig,
    descriptor: ReportDescriptor,
    layout: GattLayout,
    report_lengths: BTreeMap<ReportId, usize>,
    transport: Arc<T>,
    store: Arc<CharacteristicStateStore>,
    dispatcher: Arc<NotificationDispatcher<T>>,
}

impl<T: GattTransport + ?Sized + 'static> Bridge<T> {
    /// Bridge serving the built-in combined report map
    pub fn new(config: BridgeConfig, transport: Arc<T>) -> Result<Self> {
        Self::with_descriptor(config, ReportDescriptor::combined(), transport)
    }

    /// Bridge serving a custom report map
    ///
    /// Fails if the configuration or the descriptor is invalid.
    pub fn with_descriptor(
        config: BridgeConfig,
        descriptor: ReportDescriptor,
        transport: Arc<T>,
    ) -> Result<Self> {
        config.validate()?;
        descriptor.validate()?;
        ReportEncoder::new(&descriptor)?;

        let layout = GattLayout::new(&descriptor, &config)?;
        let report_ids = layout.report_ids();
        let report_lengths = report_ids
            .iter()
            .filter_map(|id| descriptor.report_length(*id).map(|len| (*id, len)))
            .collect();

        let store = Arc::new(CharacteristicStateStore::for_reports(report_ids));
        let dispatcher = Arc::new(NotificationDispatcher::new(transport.clone(), store.clone()));

        Ok(Self {
            config,
            descriptor,
            layout,
            report_lengths,
            transport,
            store,
            dispatcher,
        })
    }

    pub fn layout(&self) -> &GattLayout {
        &self.layout
    }

    pub fn store(&self) -> Arc<CharacteristicStateStore> {
        self.store.clone()
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Bring the peripheral up and serve until `shutdown` fires or the input
    /// source closes. Returns the final delivery counters.
    pub async fn run<S>(self, source: S, shutdown: Shutdown) -> Result<DispatchStats>
    where
        S: InputEventSource + 'static,
    {
        // Startup: any failure here is fatal
        self.transport.set_powered(true).await?;
        self.transport.set_alias(&self.config.local_name).await?;

        let (requests_tx, requests_rx) = mpsc::channel(self.config.request_buffer);
        let application = self
            .transport
            .register_application(&self.layout, requests_tx)
            .await?;
        info!(
            "Registered HID application with reports {:?}",
            self.layout.report_ids()
        );

        let params = AdvertisingParams {
            local_name: self.config.local_name.clone(),
            service_uuids: self.layout.advertised_services(),
            discoverable: true,
            timeout: self.config.advertising_timeout(),
        };
        let mut advertiser = Advertiser::new(self.transport.clone(), params, self.config.backoff);
        advertiser.start().await?;

        let encoder = ReportEncoder::new(&self.descriptor)?;
        let input = spawn_input_flow(source, encoder, self.dispatcher.clone(), shutdown.clone());

        let control = self
            .control_flow(requests_rx, &mut advertiser, &shutdown)
            .await;

        shutdown.trigger();
        let joined = input.await;

        advertiser.stop();
        drop(application);

        let stats = self.dispatcher.stats();
        info!(
            "Bridge stopped: {} delivered, {} dropped, {} halted, {} failed",
            stats.delivered, stats.dropped, stats.halted, stats.failed
        );

        joined.map_err(|e| HogpError::Task(format!("input flow: {}", e)))?;
        control?;
        Ok(stats)
    }

    async fn control_flow(
        &self,
        mut requests: mpsc::Receiver<GattRequest>,
        advertiser: &mut Advertiser<T>,
        shutdown: &Shutdown,
    ) -> Result<()> {
        let mut bonded = false;

        loop {
            let retry_at = advertiser.retry_at;
            tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    debug!("Control flow shutting down");
                    return Ok(());
                }
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    advertiser.retry_at = None;
                    advertiser.resume().await;
                }
                request = requests.recv() => {
                    let Some(request) = request else {
                        error!("Transport closed its request channel");
                        return Err(TransportError::Closed.into());
                    };
                    if let GattRequest::Connection(event) = request {
                        self.handle_connection(event, advertiser, &mut bonded).await;
                    } else {
                        self.handle_request(request);
                    }
                }
            }
        }
    }

    async fn handle_connection(
        &self,
        event: ConnectionEvent,
        advertiser: &mut Advertiser<T>,
        bonded: &mut bool,
    ) {
        match event {
            ConnectionEvent::Connected {
                address,
                bonded: is_bonded,
            } => {
                info!("Central {} connected (bonded: {})", address, is_bonded);
                if is_bonded {
                    *bonded = true;
                    advertiser.stop();
                }
            }
            ConnectionEvent::Bonded { address } => {
                info!("Bonded with {}", address);
                *bonded = true;
                advertiser.stop();
            }
            ConnectionEvent::Disconnected { address } => {
                info!("Central {} disconnected", address);
                self.store.reset_connection();
                match self.config.advertising_policy {
                    AdvertisingPolicy::ResumeOnDisconnect => advertiser.restart().await,
                    AdvertisingPolicy::StopAfterBonding if !*bonded => advertiser.restart().await,
                    AdvertisingPolicy::StopAfterBonding => {
                        debug!("Bonded; leaving advertising off")
                    }
                }
            }
        }
    }

    fn handle_request(&self, request: GattRequest) {
        match request {
            GattRequest::Read {
                characteristic,
                reply,
            } => {
                let result = self.read(characteristic);
                if let Err(e) = &result {
                    warn!("Rejected read: {}", e);
                }
                let _ = reply.send(result);
            }
            GattRequest::Write {
                characteristic,
                value,
                reply,
            } => {
                let result = self.write(characteristic, &value);
                if let Err(e) = &result {
                    warn!("Rejected write: {}", e);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            GattRequest::DescriptorRead {
                characteristic,
                descriptor,
                reply,
            } => {
                let _ = reply.send(self.read_descriptor(characteristic, descriptor));
            }
            GattRequest::DescriptorWrite {
                characteristic,
                descriptor,
                value,
                reply,
            } => {
                let result = self.write_descriptor(characteristic, descriptor, &value);
                if let Err(e) = &result {
                    warn!("Rejected descriptor write: {}", e);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            GattRequest::Subscribe {
                characteristic,
                enabled,
            } => {
                if let Err(e) = self.store.set_subscription(characteristic, enabled) {
                    warn!("Rejected subscription: {}", e);
                }
            }
            GattRequest::Connection(_) => {}
        }
    }

    /// Value of a readable characteristic
    pub fn read(
        &self,
        characteristic: CharacteristicId,
    ) -> std::result::Result<Vec<u8>, ProtocolError> {
        let flags = self
            .layout
            .characteristic(characteristic)
            .map(|c| c.flags)
            .ok_or(ProtocolError::NotReadable(characteristic))?;
        if !flags.is_readable() {
            return Err(ProtocolError::NotReadable(characteristic));
        }

        if let Some(value) = self.layout.static_value(characteristic) {
            return Ok(value.to_vec());
        }

        match characteristic {
            CharacteristicId::ProtocolMode => Ok(vec![self.store.read_protocol_mode() as u8]),
            CharacteristicId::Report(id) => Ok(self.store.last_report(id).unwrap_or_else(|| {
                vec![0; self.report_lengths.get(&id).copied().unwrap_or_default()]
            })),
            other => Err(ProtocolError::NotReadable(other)),
        }
    }

    /// Apply a write from the central
    pub fn write(
        &self,
        characteristic: CharacteristicId,
        value: &[u8],
    ) -> std::result::Result<(), ProtocolError> {
        let writable = self
            .layout
            .characteristic(characteristic)
            .map_or(false, |c| c.flags.is_writable());
        if !writable {
            return Err(ProtocolError::NotWritable(characteristic));
        }

        let byte = match value {
            [byte] => *byte,
            _ => {
                return Err(ProtocolError::InvalidLength {
                    characteristic,
                    expected: 1,
                    actual: value.len(),
                })
            }
        };

        match characteristic {
            CharacteristicId::ProtocolMode => self.store.write_protocol_mode(byte),
            CharacteristicId::ControlPoint => self.store.write_control_point(byte).map(|_| ()),
            other => Err(ProtocolError::NotWritable(other)),
        }
    }

    /// Apply a descriptor write; only the CCCD is writable
    pub fn write_descriptor(
        &self,
        characteristic: CharacteristicId,
        descriptor: DescriptorKind,
        value: &[u8],
    ) -> std::result::Result<(), ProtocolError> {
        match descriptor {
            DescriptorKind::ClientCharacteristicConfiguration => {
                self.store.write_cccd(characteristic, value).map(|_| ())
            }
            DescriptorKind::ReportReference => Err(ProtocolError::NotWritable(characteristic)),
        }
    }

    /// Value of a characteristic descriptor
    pub fn read_descriptor(
        &self,
        characteristic: CharacteristicId,
        descriptor: DescriptorKind,
    ) -> std::result::Result<Vec<u8>, ProtocolError> {
        match descriptor {
            DescriptorKind::ClientCharacteristicConfiguration => self
                .store
                .subscription(characteristic)
                .map(|sub| sub.to_cccd().to_vec())
                .ok_or(ProtocolError::NotNotifiable(characteristic)),
            DescriptorKind::ReportReference => self
                .layout
                .characteristic(characteristic)
                .and_then(|c| c.descriptor(descriptor))
                .and_then(|d| d.value.clone())
                .ok_or(ProtocolError::NotReadable(characteristic)),
        }
    }
}

fn spawn_input_flow<S, T>(
    mut source: S,
    mut encoder: ReportEncoder,
    dispatcher: Arc<NotificationDispatcher<T>>,
    shutdown: Shutdown,
) -> JoinHandle<()>
where
    S: InputEventSource + 'static,
    T: GattTransport + ?Sized + 'static,
{
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                event = source.next_event() => event,
            };

            let Some(event) = event else {
                info!("Input source closed");
                shutdown.trigger();
                break;
            };

            let reports = match encoder.encode(&event) {
                Ok(reports) => reports,
                Err(e) => {
                    warn!("Dropping input event: {}", e);
                    continue;
                }
            };

            for report in reports {
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => return,
                    _ = dispatcher.dispatch(&report) => {}
                }
            }
        }
    })
}
