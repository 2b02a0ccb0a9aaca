//! RTM Message Routing
//!
//! Versioned dispatch of messages exchanged with the embedded web surface:
//! - `registry`: per-version handler tables with fallback to older versions
//! - `router`: inbound entry point and run loop
//! - `outbound`: bounded-retry delivery
//! - `handlers`: the built-in handler set
//! - `bridge`: device events turned into outbound messages

pub mod bridge;
pub mod context;
pub mod handlers;
pub mod outbound;
pub mod registry;
pub mod router;

pub use bridge::{device_event_message, spawn_device_event_bridge};
pub use context::{HandlerContext, SessionData};
pub use outbound::{create_outbound_channel, ChannelOutput, OutboundSender};
pub use registry::{MessageTypeRegistry, ResolvedHandler, RtmMessageHandler};
pub use router::{RouteOutcome, RtmRouter};
