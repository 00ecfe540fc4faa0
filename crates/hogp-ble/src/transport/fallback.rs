//! Transport for hosts without a supported peripheral stack
//!
//! Every operation succeeds and is logged, so the bridge pipeline can run
//! end to end (useful with `--dry-run`) without a Bluetooth adapter.

use async_trait::async_trait;
use hogp_core::{
    AdvertisingHandle, AdvertisingParams, ApplicationHandle, CharacteristicId, GattLayout,
    GattRequest, GattTransport, TransportError,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

// ----------------------------------------------------------------------------
// Fallback Implementation
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FallbackTransport;

impl FallbackTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GattTransport for FallbackTransport {
    async fn set_powered(&self, powered: bool) -> Result<(), TransportError> {
        warn!(
            "No BLE peripheral support on this host; adapter power ({}) is simulated",
            powered
        );
        Ok(())
    }

    async fn set_alias(&self, alias: &str) -> Result<(), TransportError> {
        debug!("Simulated adapter alias '{}'", alias);
        Ok(())
    }

    async fn register_application(
        &self,
        layout: &GattLayout,
        requests: mpsc::Sender<GattRequest>,
    ) -> Result<ApplicationHandle, TransportError> {
        info!(
            "Simulated GATT application with {} characteristics",
            layout.characteristics().count()
        );
        // Holding the sender keeps the bridge's control flow open
        Ok(ApplicationHandle::new(move || drop(requests)))
    }

    async fn advertise(
        &self,
        params: &AdvertisingParams,
    ) -> Result<AdvertisingHandle, TransportError> {
        warn!(
            "BLE advertising not supported on this host. '{}' will not be discoverable.",
            params.local_name
        );
        Ok(AdvertisingHandle::detached())
    }

    async fn notify(
        &self,
        characteristic: CharacteristicId,
        value: Vec<u8>,
    ) -> Result<(), TransportError> {
        debug!("Simulated notification on {}: {}", characteristic, hex::encode(&value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hogp_core::{BridgeConfig, ReportDescriptor};

    #[tokio::test]
    async fn test_application_keeps_request_channel_open() {
        let transport = FallbackTransport::new();
        let layout =
            GattLayout::new(&ReportDescriptor::combined(), &BridgeConfig::default()).unwrap();
        let (tx, mut rx) = mpsc::channel(1);

        let handle = transport.register_application(&layout, tx).await.unwrap();
        assert!(rx.try_recv().is_err());

        drop(handle);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_operations_succeed() {
        let transport = FallbackTransport::new();
        assert!(transport.set_powered(true).await.is_ok());
        assert!(transport.set_alias("HOGP Bridge").await.is_ok());
        assert!(transport
            .notify(CharacteristicId::Report(1), vec![0; 8])
            .await
            .is_ok());
    }
}
