//! BlueZ transport configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BleTransportError;

// ----------------------------------------------------------------------------
// Pairing
// ----------------------------------------------------------------------------

/// IO capability announced by the pairing agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingMode {
    /// Display the passkey and confirm numeric comparison
    #[default]
    Interactive,
    /// Just Works pairing; no MITM protection
    NoInputNoOutput,
}

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Generic HID appearance (0x03C0)
pub const APPEARANCE_GENERIC_HID: u16 = 0x03C0;

/// Configuration for the BlueZ transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlueZConfig {
    /// Adapter to serve on, e.g. `hci0`
    pub adapter_id: String,
    pub pairing_mode: PairingMode,
    /// GAP appearance included in advertisements
    pub appearance: u16,
    /// How often connected devices are polled
    pub monitor_interval_ms: u64,
    /// Pending notifications per subscribed characteristic
    pub notification_queue: usize,
}

impl Default for BlueZConfig {
    fn default() -> Self {
        Self {
            adapter_id: "hci0".to_string(),
            pairing_mode: PairingMode::default(),
            appearance: APPEARANCE_GENERIC_HID,
            monitor_interval_ms: 1000,
            notification_queue: 16,
        }
    }
}

impl BlueZConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the adapter name
    pub fn with_adapter_id(mut self, adapter_id: impl Into<String>) -> Self {
        self.adapter_id = adapter_id.into();
        self
    }

    /// Set the pairing IO capability
    pub fn with_pairing_mode(mut self, mode: PairingMode) -> Self {
        self.pairing_mode = mode;
        self
    }

    pub fn with_appearance(mut self, appearance: u16) -> Self {
        self.appearance = appearance;
        self
    }

    /// Set the connection polling interval
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn validate(&self) -> Result<(), BleTransportError> {
        if self.adapter_id.trim().is_empty() {
            return Err(BleTransportError::InvalidConfiguration(
                "adapter_id must not be empty".into(),
            ));
        }
        if self.monitor_interval_ms == 0 {
            return Err(BleTransportError::InvalidConfiguration(
                "monitor_interval_ms must be greater than zero".into(),
            ));
        }
        if self.notification_queue == 0 {
            return Err(BleTransportError::InvalidConfiguration(
                "notification_queue must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
