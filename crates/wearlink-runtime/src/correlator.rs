//! APDU command/response correlation
//!
//! The correlator pairs each outbound APDU with the response carrying the same
//! sequence id. Only one command may be awaiting a response at a time; the wait
//! is bounded by a per-command timeout after which late responses are dropped.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use std::time::Duration;

use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, trace, warn};

use wearlink_core::{ApduCommand, ApduResult, DeviceError, DeviceResult, PaymentDeviceConnector};

/// The connector slot shared by the session and the correlator
pub type SharedConnector = Arc<AsyncMutex<Box<dyn PaymentDeviceConnector>>>;

// ----------------------------------------------------------------------------
// Correlator State
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct PendingCommand {
    sequence_id: u16,
    token: u64,
    responder: oneshot::Sender<DeviceResult<Vec<u8>>>,
}

#[derive(Debug, Default)]
struct CorrelatorState {
    pending: Option<PendingCommand>,
    stats: CorrelatorStats,
}

/// Counters for correlator activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelatorStats {
    pub commands_sent: u64,
    pub responses_matched: u64,
    pub timeouts: u64,
    pub rejected_busy: u64,
    pub dropped_responses: u64,
}

// ----------------------------------------------------------------------------
// Command Correlator
// ----------------------------------------------------------------------------

/// Matches APDU responses to the single outstanding command
pub struct CommandCorrelator {
    connector: SharedConnector,
    state: Mutex<CorrelatorState>,
    next_token: AtomicU64,
}

impl CommandCorrelator {
    pub fn new(connector: SharedConnector) -> Self {
        Self {
            connector,
            state: Mutex::new(CorrelatorState::default()),
            next_token: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CorrelatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send `command` and wait up to `timeout` for its response
    ///
    /// On success the response is also written onto `command`.
    pub async fn execute(
        &self,
        command: &mut ApduCommand,
        timeout: Duration,
    ) -> DeviceResult<ApduResult> {
        let payload = command.payload()?;
        let sequence_id = command.sequence;
        let (token, mut response) = self.register(sequence_id)?;

        trace!(sequence_id, bytes = payload.len(), "sending APDU");
        let sent = {
            let mut connector = self.connector.lock().await;
            connector.send_apdu(payload, sequence_id).await
        };
        if let Err(err) = sent {
            self.release(token);
            warn!(sequence_id, "connector rejected APDU: {}", err);
            return Err(err);
        }

        match tokio::time::timeout(timeout, &mut response).await {
            Ok(Ok(Ok(raw))) => Self::finish(command, &raw),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(DeviceError::transport_failure(
                "APDU response channel closed",
            )),
            Err(_) => match self.settle_expired(token, &mut response) {
                Some(Ok(raw)) => {
                    debug!(sequence_id, "APDU answered at the deadline");
                    Self::finish(command, &raw)
                }
                Some(Err(err)) => Err(err),
                None => {
                    warn!(sequence_id, ?timeout, "APDU response timed out");
                    Err(DeviceError::timeout(timeout))
                }
            },
        }
    }

    fn finish(command: &mut ApduCommand, raw: &[u8]) -> DeviceResult<ApduResult> {
        let result = ApduResult::from_bytes(raw)?;
        command.apply_result(&result);
        debug!(
            sequence_id = command.sequence,
            status = format_args!("{:04X}", result.status_word),
            "APDU answered"
        );
        Ok(result)
    }

    /// Close out a command whose deadline passed
    ///
    /// When the registration is already gone, a resolver won the race and its
    /// outcome is waiting in `response`.
    fn settle_expired(
        &self,
        token: u64,
        response: &mut oneshot::Receiver<DeviceResult<Vec<u8>>>,
    ) -> Option<DeviceResult<Vec<u8>>> {
        if self.release(token) {
            self.lock().stats.timeouts += 1;
            return None;
        }
        response.try_recv().ok()
    }

    /// Deliver a raw response from the connector
    ///
    /// Responses that match nothing are rejected with `ApduWrongSequenceId`
    /// and leave any pending command untouched.
    pub fn resolve(&self, sequence_id: u16, data: Vec<u8>) -> DeviceResult<()> {
        let mut state = self.lock();
        match state.pending.take() {
            Some(pending) if pending.sequence_id == sequence_id => {
                state.stats.responses_matched += 1;
                if pending.responder.send(Ok(data)).is_err() {
                    debug!(sequence_id, "APDU waiter already gone");
                }
                Ok(())
            }
            other => {
                let expected = other.as_ref().map(|p| p.sequence_id);
                state.pending = other;
                state.stats.dropped_responses += 1;
                Err(DeviceError::ApduWrongSequenceId {
                    expected,
                    actual: sequence_id,
                })
            }
        }
    }

    /// Fail the pending command, if any
    pub fn cancel_pending(&self, error: DeviceError) -> bool {
        let pending = self.lock().pending.take();
        match pending {
            Some(pending) => {
                debug!(sequence_id = pending.sequence_id, "cancelling pending APDU");
                let _ = pending.responder.send(Err(error));
                true
            }
            None => false,
        }
    }

    pub fn pending_sequence_id(&self) -> Option<u16> {
        self.lock().pending.as_ref().map(|p| p.sequence_id)
    }

    pub fn stats(&self) -> CorrelatorStats {
        self.lock().stats.clone()
    }

    fn register(
        &self,
        sequence_id: u16,
    ) -> DeviceResult<(u64, oneshot::Receiver<DeviceResult<Vec<u8>>>)> {
        let mut state = self.lock();
        if let Some(pending) = &state.pending {
            let pending_sequence_id = pending.sequence_id;
            state.stats.rejected_busy += 1;
            return Err(DeviceError::WaitingForApduResponse {
                pending_sequence_id,
            });
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (responder, response) = oneshot::channel();
        state.pending = Some(PendingCommand {
            sequence_id,
            token,
            responder,
        });
        state.stats.commands_sent += 1;
        Ok((token, response))
    }

    /// Drop the registration identified by `token`; false if it was already gone
    fn release(&self, token: u64) -> bool {
        let mut state = self.lock();
        if state.pending.as_ref().map(|p| p.token) == Some(token) {
            state.pending = None;
            true
        } else {
            false
        }
    }
}
