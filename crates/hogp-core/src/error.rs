//! Error types for the HOGP pipeline
//!
//! Each concern has its own error enum so callers can apply the right policy:
//! descriptor errors are fatal at startup, protocol and encode errors are
//! rejected and logged, transport write failures are dropped, and adapter
//! failures abort initialisation.

use thiserror::Error;

use crate::event::EventKind;
use crate::gatt::CharacteristicId;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Structural problems in a HID report descriptor
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("Malformed descriptor at byte {offset}: {reason}")]
    Malformed { offset: usize, reason: String },
}

impl DescriptorError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        DescriptorError::Malformed {
            offset,
            reason: reason.into(),
        }
    }
}

/// Rejected writes and reads on GATT-exposed state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid protocol mode value: {0:#04x}")]
    InvalidProtocolMode(u8),

    #[error("Invalid client characteristic configuration: {0}")]
    InvalidCccd(String),

    #[error("Invalid control point command: {0:#04x}")]
    InvalidControlPoint(u8),

    #[error("Invalid value length for {characteristic}: expected {expected}, got {actual}")]
    InvalidLength {
        characteristic: CharacteristicId,
        expected: usize,
        actual: usize,
    },

    #[error("Characteristic {0} is not writable")]
    NotWritable(CharacteristicId),

    #[error("Characteristic {0} is not readable")]
    NotReadable(CharacteristicId),

    #[error("Characteristic {0} does not support notifications")]
    NotNotifiable(CharacteristicId),
}

/// Input events the report map cannot express
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("Unsupported {kind:?} event with code {code:#06x}")]
    UnsupportedEvent { kind: EventKind, code: u32 },
}

/// Failures reported by the BLE stack
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Notification on {characteristic} failed: {reason}")]
    WriteFailed {
        characteristic: CharacteristicId,
        reason: String,
    },

    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("Failed to start advertising: {0}")]
    AdvertiseFailed(String),

    #[error("Failed to register GATT application: {0}")]
    RegistrationFailed(String),

    #[error("Transport closed")]
    Closed,
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Core error type for the HOGP bridge
#[derive(Debug, Error)]
pub enum HogpError {
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

pub type Result<T> = core::result::Result<T, HogpError>;

impl HogpError {
    /// Whether this error must abort the process rather than be logged and dropped
    pub fn is_fatal(&self) -> bool {
        match self {
            HogpError::Descriptor(_) | HogpError::InvalidConfiguration(_) | HogpError::Task(_) => {
                true
            }
            HogpError::Transport(err) => matches!(
                err,
                TransportError::AdapterUnavailable(_)
                    | TransportError::AdvertiseFailed(_)
                    | TransportError::RegistrationFailed(_)
            ),
            HogpError::Protocol(_) | HogpError::Encode(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality_classification() {
        assert!(HogpError::from(DescriptorError::malformed(3, "unbalanced")).is_fatal());
        assert!(HogpError::from(TransportError::AdapterUnavailable("hci0".into())).is_fatal());
        assert!(!HogpError::from(ProtocolError::InvalidProtocolMode(2)).is_fatal());
        assert!(!HogpError::from(TransportError::WriteFailed {
            characteristic: CharacteristicId::Report(1),
            reason: "out of range".into(),
        })
        .is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = ProtocolError::InvalidProtocolMode(0x02);
        assert_eq!(err.to_string(), "Invalid protocol mode value: 0x02");

        let err = DescriptorError::malformed(7, "collection not closed");
        assert_eq!(
            err.to_string(),
            "Malformed descriptor at byte 7: collection not closed"
        );
    }
}
