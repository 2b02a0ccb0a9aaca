//! Outbound delivery to the web surface
//!
//! [`OutboundSender`] wraps an [`RtmOutputChannel`] with the bounded retry
//! policy: `retries` extra attempts with no backoff, after which the message is
//! dropped and the failure logged.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use wearlink_core::{RtmError, RtmMessage, RtmOutputChannel};

// ----------------------------------------------------------------------------
// Outbound Sender
// ----------------------------------------------------------------------------

#[derive(Clone)]
pub struct OutboundSender {
    output: Arc<dyn RtmOutputChannel>,
}

impl OutboundSender {
    pub fn new(output: Arc<dyn RtmOutputChannel>) -> Self {
        Self { output }
    }

    /// Deliver `message`, retrying up to `retries` times on failure
    pub async fn send(&self, message: RtmMessage, retries: u32) -> Result<(), RtmError> {
        let attempts = retries.saturating_add(1);
        for attempt in 1..=attempts {
            match self.output.deliver(&message).await {
                Ok(()) => {
                    trace!(message_type = %message.message_type, attempt, "delivered");
                    return Ok(());
                }
                Err(err) => {
                    debug!(
                        message_type = %message.message_type,
                        attempt,
                        "delivery attempt failed: {}",
                        err
                    );
                }
            }
        }
        error!(
            message_type = %message.message_type,
            attempts,
            "dropping outbound message after failed deliveries"
        );
        Err(RtmError::DeliveryFailed {
            message_type: message.message_type,
            attempts,
        })
    }
}

impl std::fmt::Debug for OutboundSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundSender").finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Channel Output
// ----------------------------------------------------------------------------

/// Output channel backed by a bounded mpsc queue
#[derive(Debug, Clone)]
pub struct ChannelOutput {
    sender: mpsc::Sender<RtmMessage>,
}

impl ChannelOutput {
    pub fn new(sender: mpsc::Sender<RtmMessage>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl RtmOutputChannel for ChannelOutput {
    async fn deliver(&self, message: &RtmMessage) -> Result<(), RtmError> {
        self.sender
            .send(message.clone())
            .await
            .map_err(|_| RtmError::OutputClosed)
    }
}

/// Create an outbound channel and the receiver the host drains
pub fn create_outbound_channel(buffer_size: usize) -> (Arc<ChannelOutput>, mpsc::Receiver<RtmMessage>) {
    let (sender, receiver) = mpsc::channel(buffer_size);
    (Arc::new(ChannelOutput::new(sender)), receiver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wearlink_harness::RecordingOutput;

    #[tokio::test]
    async fn test_send_succeeds_within_retries() {
        let output = RecordingOutput::new();
        output.fail_next(2);
        let sender = OutboundSender::new(output.clone());

        tokio_test::assert_ok!(sender.send(RtmMessage::new("sdkVersion", None), 3).await);
        assert_eq!(output.attempts(), 3);
        assert_eq!(output.delivered_types(), vec!["sdkVersion".to_string()]);
    }

    #[tokio::test]
    async fn test_send_drops_after_exhausting_retries() {
        let output = RecordingOutput::new();
        output.fail_next(10);
        let sender = OutboundSender::new(output.clone());

        let result = sender.send(RtmMessage::new("sync", None), 2).await;
        assert_eq!(
            result,
            Err(RtmError::DeliveryFailed {
                message_type: "sync".into(),
                attempts: 3
            })
        );
        assert_eq!(output.attempts(), 3);
        assert!(output.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_zero_retries_is_single_attempt() {
        let output = RecordingOutput::new();
        output.fail_next(1);
        let sender = OutboundSender::new(output.clone());

        tokio_test::assert_err!(sender.send(RtmMessage::new("sync", None), 0).await);
        assert_eq!(output.attempts(), 1);
    }

    #[tokio::test]
    async fn test_channel_output_closed() {
        let (output, receiver) = create_outbound_channel(4);
        drop(receiver);
        assert_eq!(
            output.deliver(&RtmMessage::new("sync", None)).await,
            Err(RtmError::OutputClosed)
        );
    }
}
