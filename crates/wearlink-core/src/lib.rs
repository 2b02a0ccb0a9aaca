//! Wearlink Core
//!
//! Foundational types for talking to a payment wearable: the connector contract
//! every transport implements, connection/security states, APDU commands and
//! results, the RTM message envelope, configuration and error types.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod connector;
pub mod errors;
pub mod rtm;
pub mod scanner;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{DeviceConfig, RtmConfig, WearlinkConfig};
pub use connector::{
    create_connector_event_channel, ConnectorEvent, ConnectorEventReceiver,
    ConnectorEventSender, ConnectorType, PaymentDeviceConnector,
};
pub use errors::{DeviceError, DeviceResult, Result, RtmError, WearlinkError, WearlinkResult};
pub use rtm::{message_types, RtmMessage, RtmOutputChannel, RtmProtocolVersion};
pub use scanner::{CardScanner, CardScannerDataSource, CardScannerPresenter, ScanOutcome, ScannedCardInfo};
pub use types::{
    ApduCommand, ApduResult, ApduStatus, ApplicationControlMessage, ConnectionState,
    DeviceControlState, DeviceInfo, SecurityState,
};
