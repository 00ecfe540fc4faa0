//! Seam between the bridge and a BLE stack
//!
//! The bridge drives a [`GattTransport`] for adapter setup, registration,
//! advertising and notifications. The transport talks back by sending
//! [`GattRequest`] messages; it never touches bridge state directly.

use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::{ProtocolError, TransportError};
use crate::gatt::{CharacteristicId, DescriptorKind, GattLayout};

// ----------------------------------------------------------------------------
// Messages from the Transport
// ----------------------------------------------------------------------------

/// Link-level events observed by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected { address: String, bonded: bool },
    Bonded { address: String },
    Disconnected { address: String },
}

pub type ReadReply = oneshot::Sender<Result<Vec<u8>, ProtocolError>>;
pub type WriteReply = oneshot::Sender<Result<(), ProtocolError>>;

/// Requests a transport forwards from the remote central
#[derive(Debug)]
pub enum GattRequest {
    Read {
        characteristic: CharacteristicId,
        reply: ReadReply,
    },
    /// `reply` is `None` for writes without response
    Write {
        characteristic: CharacteristicId,
        value: Vec<u8>,
        reply: Option<WriteReply>,
    },
    DescriptorRead {
        characteristic: CharacteristicId,
        descriptor: DescriptorKind,
        reply: ReadReply,
    },
    /// Raw descriptor write, for stacks that expose the CCCD to the application
    DescriptorWrite {
        characteristic: CharacteristicId,
        descriptor: DescriptorKind,
        value: Vec<u8>,
        reply: Option<WriteReply>,
    },
    /// Stack-managed CCCD changed
    Subscribe {
        characteristic: CharacteristicId,
        enabled: bool,
    },
    Connection(ConnectionEvent),
}

// ----------------------------------------------------------------------------
// Handles
// ----------------------------------------------------------------------------

type Release = Box<dyn FnOnce() + Send + 'static>;

/// Registered GATT application; unregistered on drop
pub struct ApplicationHandle {
    release: Option<Release>,
}

impl ApplicationHandle {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Handle with nothing to release
    pub fn detached() -> Self {
        Self { release: None }
    }
}

impl Drop for ApplicationHandle {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for ApplicationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationHandle")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// Running advertisement; cancelled on drop
pub struct AdvertisingHandle {
    release: Option<Release>,
}

impl AdvertisingHandle {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn detached() -> Self {
        Self { release: None }
    }

    /// Stop advertising now
    pub fn stop(self) {
        drop(self)
    }
}

impl Drop for AdvertisingHandle {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for AdvertisingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvertisingHandle")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// What to advertise
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingParams {
    pub local_name: String,
    pub service_uuids: Vec<Uuid>,
    pub discoverable: bool,
    pub timeout: Duration,
}

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// BLE peripheral stack as seen by the bridge
#[async_trait::async_trait]
pub trait GattTransport: Send + Sync {
    /// Power the adapter on or off
    async fn set_powered(&self, powered: bool) -> Result<(), TransportError>;

    /// Set the adapter's user-visible name
    async fn set_alias(&self, alias: &str) -> Result<(), TransportError>;

    /// Register the GATT application. Remote requests are forwarded on
    /// `requests` until the returned handle is dropped.
    async fn register_application(
        &self,
        layout: &GattLayout,
        requests: mpsc::Sender<GattRequest>,
    ) -> Result<ApplicationHandle, TransportError>;

    /// Start advertising until the returned handle is dropped
    async fn advertise(&self, params: &AdvertisingParams)
        -> Result<AdvertisingHandle, TransportError>;

    /// Send a notification on a characteristic
    async fn notify(
        &self,
        characteristic: CharacteristicId,
        value: Vec<u8>,
    ) -> Result<(), TransportError>;
}
