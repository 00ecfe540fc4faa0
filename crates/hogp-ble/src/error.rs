//! Error types for the BlueZ transport

use hogp_core::{CharacteristicId, HogpError, TransportError};
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors specific to the BlueZ transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BleTransportError {
    #[error("Failed to open BlueZ session: {0}")]
    Session(String),

    #[error("Bluetooth adapter {adapter} not available: {reason}")]
    AdapterNotAvailable { adapter: String, reason: String },

    #[error("Adapter operation failed: {0}")]
    Adapter(String),

    #[error("Failed to register pairing agent: {0}")]
    Agent(String),

    #[error("Failed to register GATT application: {0}")]
    Registration(String),

    #[error("Failed to start advertising: {0}")]
    Advertising(String),

    #[error("No central subscribed to {0}")]
    NotSubscribed(CharacteristicId),

    #[error("Notification on {characteristic} failed: {reason}")]
    NotifyFailed {
        characteristic: CharacteristicId,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<BleTransportError> for TransportError {
    fn from(err: BleTransportError) -> Self {
        match err {
            BleTransportError::Session(reason) | BleTransportError::Adapter(reason) => {
                TransportError::AdapterUnavailable(reason)
            }
            BleTransportError::AdapterNotAvailable { adapter, reason } => {
                TransportError::AdapterUnavailable(format!("{}: {}", adapter, reason))
            }
            BleTransportError::Agent(reason) | BleTransportError::Registration(reason) => {
                TransportError::RegistrationFailed(reason)
            }
            BleTransportError::Advertising(reason) => TransportError::AdvertiseFailed(reason),
            BleTransportError::NotSubscribed(characteristic) => TransportError::WriteFailed {
                characteristic,
                reason: "not subscribed".into(),
            },
            BleTransportError::NotifyFailed {
                characteristic,
                reason,
            } => TransportError::WriteFailed {
                characteristic,
                reason,
            },
            BleTransportError::InvalidConfiguration(reason) => {
                TransportError::AdapterUnavailable(reason)
            }
        }
    }
}

impl From<BleTransportError> for HogpError {
    fn from(err: BleTransportError) -> Self {
        match err {
            BleTransportError::InvalidConfiguration(reason) => {
                HogpError::InvalidConfiguration(reason)
            }
            other => HogpError::Transport(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_failures_are_fatal() {
        let err: HogpError = BleTransportError::AdapterNotAvailable {
            adapter: "hci0".into(),
            reason: "No such adapter".into(),
        }
        .into();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("hci0"));

        let err: HogpError = BleTransportError::Advertising("busy".into()).into();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_notify_failures_are_not_fatal() {
        let err: HogpError = BleTransportError::NotSubscribed(CharacteristicId::Report(1)).into();
        assert!(!err.is_fatal());
        assert!(matches!(
            err,
            HogpError::Transport(TransportError::WriteFailed { .. })
        ));
    }
}
