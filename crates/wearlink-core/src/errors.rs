//! Error types for the wearlink protocol
//!
//! This module contains all error types used by the device protocol engine and
//! the RTM message router, plus the `WearlinkError` type that unifies them.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors raised by the device session, the command correlator and connectors
///
/// Each variant maps onto a stable numeric code (see [`DeviceError::code`]) so
/// hosts that previously keyed off the payment-device error table keep working.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("Device data not collected")]
    DeviceDataNotCollected,
    #[error("Waiting for APDU response (sequence {pending_sequence_id})")]
    WaitingForApduResponse { pending_sequence_id: u16 },
    #[error("APDU data not fully filled in")]
    ApduDataNotFull,
    #[error("Received APDU with wrong sequence id: expected {expected:?}, got {actual}")]
    ApduWrongSequenceId { expected: Option<u16>, actual: u16 },
    #[error("Operation timeout after {duration_ms}ms")]
    OperationTimeout { duration_ms: u64 },
    #[error("Payment device should be disconnected")]
    DeviceShouldBeDisconnected,
    #[error("Malformed APDU command: {reason}")]
    MalformedCommand { reason: String },
    #[error("Transport failure: {reason}")]
    TransportFailure { reason: String },
    #[error("Payment device is not connected")]
    DeviceNotConnected,
    #[error("Invalid APDU response: {reason}")]
    InvalidApduResponse { reason: String },
}

impl DeviceError {
    /// Stable numeric code for this error kind
    pub fn code(&self) -> u32 {
        match self {
            DeviceError::DeviceDataNotCollected => 10002,
            DeviceError::WaitingForApduResponse { .. } => 10003,
            DeviceError::ApduDataNotFull => 10005,
            DeviceError::ApduWrongSequenceId { .. } => 10006,
            DeviceError::OperationTimeout { .. } => 10007,
            DeviceError::DeviceShouldBeDisconnected => 10008,
            DeviceError::MalformedCommand { .. } => 10009,
            DeviceError::TransportFailure { .. } => 10010,
            DeviceError::DeviceNotConnected => 10011,
            DeviceError::InvalidApduResponse { .. } => 10012,
        }
    }

    /// Create a transport failure with a reason
    pub fn transport_failure<R: Into<String>>(reason: R) -> Self {
        DeviceError::TransportFailure {
            reason: reason.into(),
        }
    }

    /// Create a malformed command error with a reason
    pub fn malformed_command<R: Into<String>>(reason: R) -> Self {
        DeviceError::MalformedCommand {
            reason: reason.into(),
        }
    }

    /// Create a timeout error from an elapsed duration
    pub fn timeout(duration: core::time::Duration) -> Self {
        DeviceError::OperationTimeout {
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Whether this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, DeviceError::OperationTimeout { .. })
    }
}

/// Errors raised while parsing, routing or delivering RTM messages
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RtmError {
    #[error("Invalid RTM envelope: {reason}")]
    InvalidEnvelope { reason: String },
    #[error("Unknown RTM message type: {message_type}")]
    UnknownMessageType { message_type: String },
    #[error("Invalid payload for {message_type}: {reason}")]
    InvalidPayload { message_type: String, reason: String },
    #[error("Delivery of {message_type} failed after {attempts} attempts")]
    DeliveryFailed { message_type: String, attempts: u32 },
    #[error("Unsupported RTM protocol version: {version}")]
    UnsupportedVersion { version: u8 },
    #[error("Output channel closed")]
    OutputClosed,
}

impl RtmError {
    /// Create an invalid payload error for a message type
    pub fn invalid_payload<T: Into<String>, R: Into<String>>(message_type: T, reason: R) -> Self {
        RtmError::InvalidPayload {
            message_type: message_type.into(),
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Core error type for the wearlink crates
#[derive(Debug, thiserror::Error)]
pub enum WearlinkError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("RTM error: {0}")]
    Rtm(#[from] RtmError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Hex decoding error: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Channel communication error between session tasks
    #[error("Channel error: {message}")]
    Channel { message: String },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl WearlinkError {
    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        WearlinkError::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        WearlinkError::Configuration {
            reason: reason.into(),
        }
    }

    /// The device error behind this error, if any
    pub fn as_device_error(&self) -> Option<&DeviceError> {
        match self {
            WearlinkError::Device(err) => Some(err),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, WearlinkError>;
pub type WearlinkResult<T> = Result<T>;
pub type DeviceResult<T> = core::result::Result<T, DeviceError>;
