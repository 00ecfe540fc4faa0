//! BlueZ transport for the HID-over-GATT bridge
//!
//! This crate provides the [`GattTransport`] implementation that serves the
//! bridge's GATT layout from a Linux BlueZ adapter.
//!
//! ## Architecture
//!
//! - [`config`] - Adapter, pairing and polling settings
//! - [`error`] - Error types specific to the BlueZ transport
//! - [`monitor`] - Connection and bonding tracking from polled device state
//! - [`transport`] - BlueZ and fallback transports behind [`PlatformTransport`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hogp_ble::{BlueZConfig, PlatformTransport};
//! use hogp_core::{Bridge, BridgeConfig, ChannelEventSource, Shutdown};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = PlatformTransport::new(BlueZConfig::new().with_adapter_id("hci0")).await?;
//! let bridge = Bridge::new(BridgeConfig::default(), Arc::new(transport))?;
//!
//! let (_events, source) = ChannelEventSource::channel(64);
//! bridge.run(source, Shutdown::new()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! - **Linux**: GATT server, advertising and pairing agent via `bluer`
//! - **Other platforms**: logging fallback only

#[cfg(target_os = "linux")]
mod agent;
pub mod config;
pub mod error;
pub mod monitor;
pub mod transport;

// Public API exports
pub use config::{BlueZConfig, PairingMode, APPEARANCE_GENERIC_HID};
pub use error::BleTransportError;
pub use monitor::{ConnectionTracker, DeviceStatus};
#[cfg(target_os = "linux")]
pub use transport::BlueZTransport;
pub use transport::{FallbackTransport, PlatformTransport};

// Re-export the transport trait for convenience
pub use hogp_core::GattTransport;
