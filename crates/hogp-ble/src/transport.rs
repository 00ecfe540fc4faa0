//! Platform selection for the GATT transport

use async_trait::async_trait;
use hogp_core::{
    AdvertisingHandle, AdvertisingParams, ApplicationHandle, CharacteristicId, GattLayout,
    GattRequest, GattTransport, TransportError,
};
use tokio::sync::mpsc;

use crate::config::BlueZConfig;
use crate::error::BleTransportError;

mod fallback;
#[cfg(target_os = "linux")]
mod linux;

pub use fallback::FallbackTransport;
#[cfg(target_os = "linux")]
pub use linux::BlueZTransport;

// ----------------------------------------------------------------------------
// Platform Detection and Factory
// ----------------------------------------------------------------------------

/// Platform-specific transport enum
pub enum PlatformTransport {
    #[cfg(target_os = "linux")]
    BlueZ(BlueZTransport),
    Fallback(FallbackTransport),
}

impl PlatformTransport {
    /// Create the appropriate transport for the current platform
    pub async fn new(config: BlueZConfig) -> Result<Self, BleTransportError> {
        #[cfg(target_os = "linux")]
        {
            Ok(Self::BlueZ(BlueZTransport::new(config).await?))
        }
        #[cfg(not(target_os = "linux"))]
        {
            config.validate()?;
            tracing::warn!("No BLE peripheral stack on this platform; using fallback transport");
            Ok(Self::Fallback(FallbackTransport::new()))
        }
    }

    /// Transport that logs instead of touching an adapter
    pub fn dry_run() -> Self {
        Self::Fallback(FallbackTransport::new())
    }

    pub fn name(&self) -> &'static str {
        match self {
            #[cfg(target_os = "linux")]
            Self::BlueZ(_) => "bluez",
            Self::Fallback(_) => "fallback",
        }
    }
}

#[async_trait]
impl GattTransport for PlatformTransport {
    async fn set_powered(&self, powered: bool) -> Result<(), TransportError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::BlueZ(transport) => transport.set_powered(powered).await,
            Self::Fallback(transport) => transport.set_powered(powered).await,
        }
    }

    async fn set_alias(&self, alias: &str) -> Result<(), TransportError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::BlueZ(transport) => transport.set_alias(alias).await,
            Self::Fallback(transport) => transport.set_alias(alias).await,
        }
    }

    async fn register_application(
        &self,
        layout: &GattLayout,
        requests: mpsc::Sender<GattRequest>,
    ) -> Result<ApplicationHandle, TransportError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::BlueZ(transport) => transport.register_application(layout, requests).await,
            Self::Fallback(transport) => transport.register_application(layout, requests).await,
        }
    }

    async fn advertise(
        &self,
        params: &AdvertisingParams,
    ) -> Result<AdvertisingHandle, TransportError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::BlueZ(transport) => transport.advertise(params).await,
            Self::Fallback(transport) => transport.advertise(params).await,
        }
    }

    async fn notify(
        &self,
        characteristic: CharacteristicId,
        value: Vec<u8>,
    ) -> Result<(), TransportError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::BlueZ(transport) => transport.notify(characteristic, value).await,
            Self::Fallback(transport) => transport.notify(characteristic, value).await,
        }
    }
}
