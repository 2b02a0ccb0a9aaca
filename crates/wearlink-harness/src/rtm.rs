//! RTM test doubles: a recording output channel and scripted card scanning

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex, PoisonError,
};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use wearlink_core::{
    CardScanner, CardScannerDataSource, CardScannerPresenter, RtmError, RtmMessage,
    RtmOutputChannel, ScanOutcome,
};

// ----------------------------------------------------------------------------
// Recording Output
// ----------------------------------------------------------------------------

/// Output channel that stores delivered messages and can fail on demand
#[derive(Debug, Default)]
pub struct RecordingOutput {
    delivered: Mutex<Vec<RtmMessage>>,
    attempts: AtomicU32,
    failures_remaining: AtomicU32,
    notify: Notify,
}

impl RecordingOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `count` delivery attempts
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<RtmMessage> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn delivered_types(&self) -> Vec<String> {
        self.delivered()
            .into_iter()
            .map(|m| m.message_type)
            .collect()
    }

    /// Wait until at least `count` messages were delivered
    pub async fn wait_for(&self, count: usize, limit: Duration) -> Vec<RtmMessage> {
        let _ = tokio::time::timeout(limit, async {
            loop {
                let notified = self.notify.notified();
                if self.delivered().len() >= count {
                    break;
                }
                notified.await;
            }
        })
        .await;
        self.delivered()
    }
}

#[async_trait]
impl RtmOutputChannel for RecordingOutput {
    async fn deliver(&self, message: &RtmMessage) -> Result<(), RtmError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RtmError::OutputClosed);
        }
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        self.notify.notify_waiters();
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Card Scanning Doubles
// ----------------------------------------------------------------------------

/// Scanner that returns a fixed outcome
#[derive(Debug, Clone)]
pub struct StaticCardScanner {
    outcome: ScanOutcome,
}

impl StaticCardScanner {
    pub fn new(outcome: ScanOutcome) -> Self {
        Self { outcome }
    }
}

#[async_trait]
impl CardScanner for StaticCardScanner {
    async fn scan(&self) -> ScanOutcome {
        self.outcome.clone()
    }
}

/// Data source handing out a [`StaticCardScanner`]
#[derive(Debug, Clone)]
pub struct StaticScannerSource {
    outcome: ScanOutcome,
}

impl StaticScannerSource {
    pub fn new(outcome: ScanOutcome) -> Arc<Self> {
        Arc::new(Self { outcome })
    }
}

impl CardScannerDataSource for StaticScannerSource {
    fn card_scanner(&self) -> Arc<dyn CardScanner> {
        Arc::new(StaticCardScanner::new(self.outcome.clone()))
    }
}

/// Presenter that counts present/dismiss signals
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    presented: AtomicU32,
    dismissed: AtomicU32,
}

impl RecordingPresenter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn presented(&self) -> u32 {
        self.presented.load(Ordering::SeqCst)
    }

    pub fn dismissed(&self) -> u32 {
        self.dismissed.load(Ordering::SeqCst)
    }
}

impl CardScannerPresenter for RecordingPresenter {
    fn present(&self, _scanner: &Arc<dyn CardScanner>) {
        self.presented.fetch_add(1, Ordering::SeqCst);
    }

    fn dismiss(&self, _scanner: &Arc<dyn CardScanner>) {
        self.dismissed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_output_failures() {
        let output = RecordingOutput::new();
        output.fail_next(2);
        let message = RtmMessage::new("sync", None);

        assert!(output.deliver(&message).await.is_err());
        assert!(output.deliver(&message).await.is_err());
        assert!(output.deliver(&message).await.is_ok());
        assert_eq!(output.attempts(), 3);
        assert_eq!(output.delivered_types(), vec!["sync".to_string()]);
    }

    #[tokio::test]
    async fn test_wait_for_returns_on_delivery() {
        let output = RecordingOutput::new();
        let producer = Arc::clone(&output);
        tokio::spawn(async move {
            producer
                .deliver(&RtmMessage::new("deviceStatus", None))
                .await
                .unwrap();
        });
        let delivered = output.wait_for(1, Duration::from_secs(1)).await;
        assert_eq!(delivered.len(), 1);
    }
}
