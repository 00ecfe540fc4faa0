//! Bridge configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HogpError;

// ----------------------------------------------------------------------------
// Policies
// ----------------------------------------------------------------------------

/// What to do with advertising once a central disconnects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvertisingPolicy {
    /// Advertise again after every disconnection
    #[default]
    ResumeOnDisconnect,
    /// Stay silent once a bond exists; the bonded host reconnects directly
    StopAfterBonding,
}

/// Security level required to read Report characteristics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSecurity {
    Open,
    /// Encrypted link, any pairing method
    Encrypted,
    /// Encrypted and authenticated (LE Secure Connections)
    #[default]
    Secure,
}

// ----------------------------------------------------------------------------
// Device Information
// ----------------------------------------------------------------------------

/// PnP ID characteristic value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnpId {
    /// 0x01 Bluetooth SIG, 0x02 USB Implementer's Forum
    pub vendor_id_source: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product_version: u16,
}

impl Default for PnpId {
    fn default() -> Self {
        Self {
            vendor_id_source: 0x02,
            vendor_id: 0x0000,
            product_id: 0x0000,
            product_version: 0x0100,
        }
    }
}

impl PnpId {
    /// 7-byte wire format, multi-byte fields little-endian
    pub fn to_bytes(&self) -> [u8; 7] {
        let mut bytes = [0u8; 7];
        bytes[0] = self.vendor_id_source;
        bytes[1..3].copy_from_slice(&self.vendor_id.to_le_bytes());
        bytes[3..5].copy_from_slice(&self.product_id.to_le_bytes());
        bytes[5..7].copy_from_slice(&self.product_version.to_le_bytes());
        bytes
    }
}

/// Device Information service contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub model: String,
    pub firmware_revision: String,
    pub pnp_id: PnpId,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            manufacturer: "HOGP Bridge".to_string(),
            model: "hogp-bridge".to_string(),
            firmware_revision: env!("CARGO_PKG_VERSION").to_string(),
            pnp_id: PnpId::default(),
        }
    }
}

/// Fields of the HID Information characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HidInformation {
    pub country_code: u8,
    pub remote_wake: bool,
    pub normally_connectable: bool,
}

impl Default for HidInformation {
    fn default() -> Self {
        Self {
            country_code: 0x00,
            remote_wake: false,
            normally_connectable: true,
        }
    }
}

impl HidInformation {
    /// HID specification release implemented (1.11)
    pub const BCD_HID: u16 = 0x0111;

    /// 4-byte wire format: bcdHID (LE), bCountryCode, Flags
    pub fn to_bytes(&self) -> [u8; 4] {
        let [lo, hi] = Self::BCD_HID.to_le_bytes();
        let flags = (self.normally_connectable as u8) << 1 | self.remote_wake as u8;
        [lo, hi, self.country_code, flags]
    }
}

// ----------------------------------------------------------------------------
// Backoff
// ----------------------------------------------------------------------------

/// Exponential backoff for re-advertising after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: u32,
    /// Give up after this many consecutive failures, retry forever if unset
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2,
            max_attempts: None,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (zero based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = (self.multiplier.max(1) as u64).saturating_pow(attempt);
        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(false, |max| attempts >= max)
    }
}

// ----------------------------------------------------------------------------
// Bridge Configuration
// ----------------------------------------------------------------------------

/// Configuration for the HOGP bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Name advertised and used as adapter alias
    pub local_name: String,
    /// Advertising timeout in seconds
    pub advertising_timeout_secs: u64,
    pub advertising_policy: AdvertisingPolicy,
    pub report_security: ReportSecurity,
    pub device_info: DeviceInfo,
    pub hid_information: HidInformation,
    pub backoff: BackoffConfig,
    /// Capacity of the transport request channel
    pub request_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            local_name: "HOGP Bridge".to_string(),
            advertising_timeout_secs: 600,
            advertising_policy: AdvertisingPolicy::default(),
            report_security: ReportSecurity::default(),
            device_info: DeviceInfo::default(),
            hid_information: HidInformation::default(),
            backoff: BackoffConfig::default(),
            request_buffer: 64,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = name.into();
        self
    }

    pub fn with_advertising_timeout(mut self, timeout: Duration) -> Self {
        self.advertising_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_advertising_policy(mut self, policy: AdvertisingPolicy) -> Self {
        self.advertising_policy = policy;
        self
    }

    pub fn with_report_security(mut self, security: ReportSecurity) -> Self {
        self.report_security = security;
        self
    }

    pub fn with_device_info(mut self, device_info: DeviceInfo) -> Self {
        self.device_info = device_info;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn advertising_timeout(&self) -> Duration {
        Duration::from_secs(self.advertising_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), HogpError> {
        if self.local_name.trim().is_empty() {
            return Err(HogpError::InvalidConfiguration(
                "Local name must not be empty".to_string(),
            ));
        }
        if self.advertising_timeout_secs == 0 {
            return Err(HogpError::InvalidConfiguration(
                "Advertising timeout must be greater than 0".to_string(),
            ));
        }
        if self.request_buffer == 0 {
            return Err(HogpError::InvalidConfiguration(
                "Request buffer must be greater than 0".to_string(),
            ));
        }
        if self.backoff.initial_delay_ms == 0 || self.backoff.max_delay_ms < self.backoff.initial_delay_ms {
            return Err(HogpError::InvalidConfiguration(
                "Backoff delays must be non-zero and max >= initial".to_string(),
            ));
        }
        Ok(())
    }
}
