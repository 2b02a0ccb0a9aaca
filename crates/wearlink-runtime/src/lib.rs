//! Wearlink Runtime
//!
//! The moving parts of the payment-device protocol engine:
//!
//! - **DeviceSession**: owns the connector, tracks connection and NFC state and
//!   publishes [`DeviceEvent`]s
//! - **CommandCorrelator**: pairs APDU commands with their responses under a
//!   per-command timeout
//! - **RtmRouter**: versioned dispatch of web-surface messages to handlers that
//!   drive the session
//!
//! ```rust,ignore
//! use wearlink_runtime::{create_outbound_channel, DeviceSession, RtmRouter};
//!
//! let session = DeviceSession::new(connector, config.device.clone());
//! let (output, mut outbound) = create_outbound_channel(32);
//! let router = RtmRouter::new(session.clone(), output, config.rtm.clone())?;
//! router.spawn_device_event_bridge();
//! router.handle_raw(r#"{"type":"version","data":{"version":4}}"#).await?;
//! ```

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod correlator;
pub mod rtm;
pub mod session;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use correlator::{CommandCorrelator, CorrelatorStats, SharedConnector};
pub use rtm::{
    create_outbound_channel, device_event_message, spawn_device_event_bridge, ChannelOutput,
    HandlerContext, MessageTypeRegistry, OutboundSender, ResolvedHandler, RouteOutcome,
    RtmMessageHandler, RtmRouter, SessionData,
};
pub use session::{DeviceEvent, DeviceEventReceiver, DeviceSession};
