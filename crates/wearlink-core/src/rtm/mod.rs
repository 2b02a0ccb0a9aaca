//! RTM Module
//!
//! The typed envelope exchanged with the embedded web surface:
//! - `message`: the `RtmMessage` envelope and its parsing rules
//! - `output`: the outbound delivery contract
//! - `version`: protocol versions and wire message-type names

pub mod message;
pub mod output;
pub mod version;

pub use message::RtmMessage;
pub use output::RtmOutputChannel;
pub use version::{message_types, RtmProtocolVersion};
