//! HID-over-GATT Core
//!
//! This crate contains the platform-independent half of the HOGP bridge: it turns
//! a stream of physical input events into HID input reports and delivers them to a
//! BLE GATT transport, honouring the central's subscriptions and protocol mode.
//!
//! ## Architecture
//!
//! - [`descriptor`] - Report map modelling and validation
//! - [`state`] - Characteristic state store (protocol mode, CCCD subscriptions)
//! - [`encoder`] - Input event to HID report translation
//! - [`dispatcher`] - Subscription and protocol-mode gated delivery
//! - [`bridge`] - Orchestration of the input and control flows
//! - [`gatt`] - Bit-exact GATT service layout
//! - [`transport`] / [`source`] - Seams to the BLE stack and the input layer
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hogp_core::{Bridge, BridgeConfig, ChannelEventSource, GattTransport, Shutdown};
//!
//! # async fn example<T: GattTransport + 'static>(transport: Arc<T>) -> hogp_core::Result<()> {
//! let (_events_tx, source) = ChannelEventSource::channel(64);
//! let shutdown = Shutdown::new();
//!
//! let bridge = Bridge::new(BridgeConfig::default(), transport)?;
//! bridge.run(source, shutdown).await?;
//! # Ok(())
//! # }
//! ```

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod bridge;
pub mod config;
pub mod descriptor;
pub mod dispatcher;
pub mod encoder;
pub mod error;
pub mod event;
pub mod gatt;
pub mod keys;
pub mod report;
pub mod source;
pub mod state;
pub mod transport;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use bridge::{Bridge, Shutdown};
pub use config::{
    AdvertisingPolicy, BackoffConfig, BridgeConfig, DeviceInfo, HidInformation, PnpId,
    ReportSecurity,
};
pub use descriptor::{ReportDescriptor, ReportType};
pub use dispatcher::{DispatchOutcome, DispatchStats, NotificationDispatcher};
pub use encoder::ReportEncoder;
pub use error::{
    DescriptorError, EncodeError, HogpError, ProtocolError, Result, TransportError,
};
pub use event::{EventKind, InputEvent, Usage};
pub use gatt::{CharacteristicFlags, CharacteristicId, DescriptorKind, GattLayout};
pub use keys::KeyState;
pub use report::{Buttons, HidReport, Modifiers, ReportId, BOOT_REPORT_LEN};
pub use source::{ChannelEventSource, InputEventSource, JsonLinesSource};
pub use state::{
    CharacteristicStateStore, ControlPointCommand, ProtocolMode, Subscription,
    SubscriptionTransition,
};
pub use transport::{
    AdvertisingHandle, AdvertisingParams, ApplicationHandle, ConnectionEvent, GattRequest,
    GattTransport,
};
