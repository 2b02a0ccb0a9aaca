//! Payment Device Connector Trait Definition
//!
//! Defines the capability interface every transport to the peripheral must
//! satisfy. Concrete implementations live elsewhere (the simulated and scripted
//! connectors in `wearlink-harness`, hardware connectors in host crates).

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::DeviceResult;
use crate::types::{
    ApplicationControlMessage, DeviceControlState, DeviceInfo, SecurityState,
};

// ----------------------------------------------------------------------------
// Connector Events
// ----------------------------------------------------------------------------

/// Asynchronous completions and notifications reported by a connector
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorEvent {
    /// Connect finished; the identity snapshot travels with the signal
    Connected { device_info: DeviceInfo },
    /// Connect attempt failed at the transport level
    ConnectionFailed { reason: String },
    /// Link to the peripheral is gone
    Disconnected,
    /// Raw secure-element response for a previously sent command
    ApduResponse { sequence_id: u16, data: Vec<u8> },
    /// Transaction made on the peripheral
    TransactionNotification { data: Vec<u8> },
    /// Peripheral-originated NFC state change (e.g. wearable removed)
    SecurityStateChanged { state: SecurityState },
    /// Application control message from the peripheral
    ApplicationControl { message: ApplicationControlMessage },
}

impl ConnectorEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectorEvent::Connected { .. } => "connected",
            ConnectorEvent::ConnectionFailed { .. } => "connection_failed",
            ConnectorEvent::Disconnected => "disconnected",
            ConnectorEvent::ApduResponse { .. } => "apdu_response",
            ConnectorEvent::TransactionNotification { .. } => "transaction_notification",
            ConnectorEvent::SecurityStateChanged { .. } => "security_state_changed",
            ConnectorEvent::ApplicationControl { .. } => "application_control",
        }
    }
}

pub type ConnectorEventSender = mpsc::Sender<ConnectorEvent>;
pub type ConnectorEventReceiver = mpsc::Receiver<ConnectorEvent>;

/// Create the bounded channel a session hands to its connector
pub fn create_connector_event_channel(
    buffer_size: usize,
) -> (ConnectorEventSender, ConnectorEventReceiver) {
    mpsc::channel(buffer_size)
}

// ----------------------------------------------------------------------------
// Connector Type
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorType {
    /// Real hardware link (e.g. Bluetooth LE)
    Hardware,
    /// Fully simulated peripheral
    Simulated,
    /// Scripted double driven by tests
    TestDouble,
}

impl core::fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConnectorType::Hardware => write!(f, "hardware"),
            ConnectorType::Simulated => write!(f, "simulated"),
            ConnectorType::TestDouble => write!(f, "test-double"),
        }
    }
}

// ----------------------------------------------------------------------------
// Connector Trait
// ----------------------------------------------------------------------------

/// Common interface for payment device connectors
///
/// `connect`, `disconnect` and `send_apdu` only *start* the operation; their
/// outcome is reported later through the [`ConnectorEvent`] channel attached
/// with [`attach_events`](PaymentDeviceConnector::attach_events). A returned
/// `Err` means the request could not be issued at all.
///
/// On a successful connect, the connector must make `device_info()` available
/// no later than the moment it emits [`ConnectorEvent::Connected`].
///
/// `write_security_state` and `send_device_control` complete synchronously
/// from the caller's view: `Ok(())` is the peripheral's acknowledgement, and
/// the connector must not additionally emit `SecurityStateChanged` for it.
#[async_trait]
pub trait PaymentDeviceConnector: Send + Sync {
    /// Attach the event channel created by the session
    fn attach_events(&mut self, events: ConnectorEventSender);

    /// Begin connecting to the peripheral
    async fn connect(&mut self) -> DeviceResult<()>;

    /// Begin disconnecting from the peripheral
    async fn disconnect(&mut self) -> DeviceResult<()>;

    fn is_connected(&self) -> bool;

    /// Probe the link; may talk to the peripheral
    async fn validate_connection(&self) -> DeviceResult<bool>;

    /// Send raw APDU bytes tagged with a sequence id
    async fn send_apdu(&mut self, data: Vec<u8>, sequence_id: u16) -> DeviceResult<()>;

    fn device_info(&self) -> Option<DeviceInfo>;

    async fn write_security_state(&mut self, state: SecurityState) -> DeviceResult<()>;

    async fn send_device_control(&mut self, state: DeviceControlState) -> DeviceResult<()>;

    /// Drop any transport-level state so a fresh connect can start
    async fn reset_to_default_state(&mut self);

    fn connector_type(&self) -> ConnectorType;
}
