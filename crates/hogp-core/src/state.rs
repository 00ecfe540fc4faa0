//! Characteristic state shared between the control and input flows
//!
//! Holds the negotiated protocol mode, per-characteristic CCCD subscriptions,
//! the control point suspend flag and the last report value per Report
//! characteristic. All access goes through a single mutex whose critical
//! sections are field copies; it is never held across an `.await`.
//!
//! Subscription changes are also published on a `watch` channel so in-flight
//! deliveries can observe an unsubscribe and halt.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::ProtocolError;
use crate::gatt::CharacteristicId;
use crate::report::ReportId;

// ----------------------------------------------------------------------------
// Values
// ----------------------------------------------------------------------------

/// HID protocol mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ProtocolMode {
    Boot = 0x00,
    #[default]
    Report = 0x01,
}

impl TryFrom<u8> for ProtocolMode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ProtocolMode::Boot),
            0x01 => Ok(ProtocolMode::Report),
            other => Err(ProtocolError::InvalidProtocolMode(other)),
        }
    }
}

/// HID Control Point commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlPointCommand {
    Suspend = 0x00,
    ExitSuspend = 0x01,
}

impl TryFrom<u8> for ControlPointCommand {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ControlPointCommand::Suspend),
            0x01 => Ok(ControlPointCommand::ExitSuspend),
            other => Err(ProtocolError::InvalidControlPoint(other)),
        }
    }
}

/// Client Characteristic Configuration of one characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Subscription {
    pub notify: bool,
    pub indicate: bool,
}

impl Subscription {
    pub const NOTIFY: Self = Self {
        notify: true,
        indicate: false,
    };

    /// Reports are only ever notified, so only the notify bit subscribes
    pub fn is_enabled(&self) -> bool {
        self.notify
    }

    /// Parse a 2-byte little-endian CCCD value
    pub fn from_cccd(value: &[u8]) -> Result<Self, ProtocolError> {
        let raw = match value {
            [lo, hi] => u16::from_le_bytes([*lo, *hi]),
            _ => {
                return Err(ProtocolError::InvalidCccd(format!(
                    "expected 2 bytes, got {}",
                    value.len()
                )))
            }
        };
        if raw & !0x0003 != 0 {
            return Err(ProtocolError::InvalidCccd(format!(
                "reserved bits set in {:#06x}",
                raw
            )));
        }
        Ok(Self {
            notify: raw & 0x0001 != 0,
            indicate: raw & 0x0002 != 0,
        })
    }

    pub fn to_cccd(&self) -> [u8; 2] {
        ((self.notify as u16) | (self.indicate as u16) << 1).to_le_bytes()
    }
}

/// Effect of a subscription write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionTransition {
    Enabled,
    Disabled,
    Unchanged,
}

/// Delivery-relevant state of one characteristic, copied out atomically
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub subscribed: bool,
    pub mode: ProtocolMode,
    pub suspended: bool,
    /// Increments on every subscription transition of the characteristic
    pub epoch: u64,
}

/// Published subscription view: enabled flag and epoch per characteristic
pub type SubscriptionView = BTreeMap<CharacteristicId, (bool, u64)>;

// ----------------------------------------------------------------------------
// Store
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Inner {
    mode: ProtocolMode,
    suspended: bool,
    subscriptions: BTreeMap<CharacteristicId, Subscription>,
    epochs: BTreeMap<CharacteristicId, u64>,
    last_reports: HashMap<ReportId, Vec<u8>>,
}

impl Inner {
    fn view(&self) -> SubscriptionView {
        self.subscriptions
            .iter()
            .map(|(id, sub)| (*id, (sub.is_enabled(), self.epochs.get(id).copied().unwrap_or(0))))
            .collect()
    }
}

/// Shared characteristic state
#[derive(Debug)]
pub struct CharacteristicStateStore {
    inner: Mutex<Inner>,
    view_tx: watch::Sender<SubscriptionView>,
}

impl CharacteristicStateStore {
    /// Create a store for the given notifiable characteristics
    pub fn new(notifiable: impl IntoIterator<Item = CharacteristicId>) -> Self {
        let inner = Inner {
            subscriptions: notifiable
                .into_iter()
                .map(|id| (id, Subscription::default()))
                .collect(),
            ..Default::default()
        };
        let (view_tx, _) = watch::channel(inner.view());
        Self {
            inner: Mutex::new(inner),
            view_tx,
        }
    }

    /// Store with one notifiable Report characteristic per report ID
    pub fn for_reports(report_ids: impl IntoIterator<Item = ReportId>) -> Self {
        Self::new(report_ids.into_iter().map(CharacteristicId::Report))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Watch subscription transitions
    pub fn watch(&self) -> watch::Receiver<SubscriptionView> {
        self.view_tx.subscribe()
    }

    pub fn read_protocol_mode(&self) -> ProtocolMode {
        self.lock().mode
    }

    /// Apply a Protocol Mode write. Invalid values leave the mode unchanged.
    pub fn write_protocol_mode(&self, value: u8) -> Result<(), ProtocolError> {
        let mode = ProtocolMode::try_from(value)?;
        let mut inner = self.lock();
        if inner.mode != mode {
            info!("Protocol mode changed to {:?}", mode);
            inner.mode = mode;
        }
        Ok(())
    }

    /// Apply a HID Control Point write
    pub fn write_control_point(&self, value: u8) -> Result<ControlPointCommand, ProtocolError> {
        let command = ControlPointCommand::try_from(value)?;
        let mut inner = self.lock();
        inner.suspended = command == ControlPointCommand::Suspend;
        debug!("Control point {:?}", command);
        Ok(command)
    }

    pub fn is_suspended(&self) -> bool {
        self.lock().suspended
    }

    /// Enable or disable notifications on a characteristic
    ///
    /// Idempotent: setting the current value again reports `Unchanged` and
    /// publishes nothing. Enabling arms future delivery only.
    pub fn set_subscription(
        &self,
        id: CharacteristicId,
        enabled: bool,
    ) -> Result<SubscriptionTransition, ProtocolError> {
        let subscription = if enabled {
            Subscription::NOTIFY
        } else {
            Subscription::default()
        };
        self.apply_subscription(id, subscription)
    }

    /// Apply a raw CCCD write
    pub fn write_cccd(
        &self,
        id: CharacteristicId,
        value: &[u8],
    ) -> Result<SubscriptionTransition, ProtocolError> {
        let subscription = Subscription::from_cccd(value)?;
        self.apply_subscription(id, subscription)
    }

    fn apply_subscription(
        &self,
        id: CharacteristicId,
        subscription: Subscription,
    ) -> Result<SubscriptionTransition, ProtocolError> {
        let mut inner = self.lock();
        let current = inner
            .subscriptions
            .get_mut(&id)
            .ok_or(ProtocolError::NotNotifiable(id))?;

        let was_enabled = current.is_enabled();
        *current = subscription;
        let transition = match (was_enabled, subscription.is_enabled()) {
            (false, true) => SubscriptionTransition::Enabled,
            (true, false) => SubscriptionTransition::Disabled,
            _ => SubscriptionTransition::Unchanged,
        };

        if transition != SubscriptionTransition::Unchanged {
            *inner.epochs.entry(id).or_default() += 1;
            self.view_tx.send_replace(inner.view());
            info!("Subscription on {} {:?}", id, transition);
        }
        Ok(transition)
    }

    pub fn is_subscribed(&self, id: CharacteristicId) -> bool {
        self.lock()
            .subscriptions
            .get(&id)
            .map_or(false, Subscription::is_enabled)
    }

    pub fn subscription(&self, id: CharacteristicId) -> Option<Subscription> {
        self.lock().subscriptions.get(&id).copied()
    }

    /// Copy out everything a delivery decision needs in one critical section
    pub fn snapshot(&self, id: CharacteristicId) -> Snapshot {
        let inner = self.lock();
        Snapshot {
            subscribed: inner
                .subscriptions
                .get(&id)
                .map_or(false, Subscription::is_enabled),
            mode: inner.mode,
            suspended: inner.suspended,
            epoch: inner.epochs.get(&id).copied().unwrap_or(0),
        }
    }

    /// Restore connection-scoped defaults after a disconnection
    pub fn reset_connection(&self) {
        let mut inner = self.lock();
        inner.mode = ProtocolMode::Report;
        inner.suspended = false;

        let mut changed = false;
        let ids: Vec<CharacteristicId> = inner.subscriptions.keys().copied().collect();
        for id in ids {
            let was_enabled = inner
                .subscriptions
                .insert(id, Subscription::default())
                .map_or(false, |sub| sub.is_enabled());
            if was_enabled {
                *inner.epochs.entry(id).or_default() += 1;
                changed = true;
            }
        }
        if changed {
            self.view_tx.send_replace(inner.view());
        }
        debug!("Connection state reset");
    }

    /// Remember the latest payload of a Report characteristic
    pub fn record_report(&self, report_id: ReportId, payload: &[u8]) {
        self.lock().last_reports.insert(report_id, payload.to_vec());
    }

    pub fn last_report(&self, report_id: ReportId) -> Option<Vec<u8>> {
        self.lock().last_reports.get(&report_id).cloned()
    }
}
