//! Outbound channel to the web surface

use async_trait::async_trait;

use super::RtmMessage;
use crate::errors::RtmError;

/// Delivery endpoint for outbound RTM messages
///
/// A single `deliver` call is one attempt; retry policy belongs to the caller.
#[async_trait]
pub trait RtmOutputChannel: Send + Sync {
    async fn deliver(&self, message: &RtmMessage) -> Result<(), RtmError>;
}
