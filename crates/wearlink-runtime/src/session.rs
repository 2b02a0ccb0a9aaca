//! Device Session
//!
//! Owns the active connector and drives the connection state machine:
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──Connected event──► Connected
//!      ▲                          │                              │
//!      └──── timeout / failure ───┘◄──── Disconnected event ─────┘
//! ```
//!
//! Connector completions arrive on an mpsc channel consumed by a single event
//! loop task, which updates session state, resolves APDU responses through the
//! [`CommandCorrelator`] and republishes everything as [`DeviceEvent`]s on a
//! broadcast channel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use wearlink_core::{
    create_connector_event_channel, ApduCommand, ApduResult, ApplicationControlMessage,
    ConnectionState, ConnectorEvent, ConnectorEventReceiver, ConnectorType, DeviceConfig,
    DeviceControlState, DeviceError, DeviceInfo, DeviceResult, PaymentDeviceConnector,
    SecurityState,
};

use crate::correlator::{CommandCorrelator, CorrelatorStats, SharedConnector};

// ----------------------------------------------------------------------------
// Device Events
// ----------------------------------------------------------------------------

/// Events published to session subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    DeviceConnected(DeviceInfo),
    ConnectFailed(DeviceError),
    DeviceDisconnected,
    TransactionNotificationReceived(Vec<u8>),
    SecurityStateChanged(SecurityState),
    ApplicationControlReceived(ApplicationControlMessage),
}

pub type DeviceEventReceiver = broadcast::Receiver<DeviceEvent>;

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SessionState {
    connection_state: ConnectionState,
    security_state: SecurityState,
    device_info: Option<DeviceInfo>,
    /// Bumped on every connect attempt so stale timers can be recognized
    connect_generation: u64,
    /// Bumped on every transport change; events from older connectors are dropped
    connector_epoch: u64,
}

/// Connector events tagged with the epoch of the connector that sent them
type TaggedEvent = (u64, ConnectorEvent);

struct SessionInner {
    session_id: Uuid,
    config: DeviceConfig,
    connector: SharedConnector,
    correlator: CommandCorrelator,
    state: Mutex<SessionState>,
    events: broadcast::Sender<DeviceEvent>,
    tagged_events: mpsc::Sender<TaggedEvent>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl SessionInner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: DeviceEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    /// Give `connector` a fresh event channel whose events carry `epoch`
    fn attach_connector(&self, connector: &mut dyn PaymentDeviceConnector, epoch: u64) {
        let handle = spawn_event_forwarder(
            connector,
            epoch,
            self.config.event_buffer_size.max(1),
            self.tagged_events.clone(),
        );
        let previous = self
            .forwarder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn handle_connector_event(&self, epoch: u64, event: ConnectorEvent) {
        let current = self.lock_state().connector_epoch;
        if epoch != current {
            debug!(
                session_id = %self.session_id,
                kind = event.kind(),
                epoch,
                current,
                "dropping event from retired connector"
            );
            return;
        }
        debug!(session_id = %self.session_id, kind = event.kind(), "connector event");
        match event {
            ConnectorEvent::Connected { device_info } => {
                {
                    let mut state = self.lock_state();
                    state.connection_state = ConnectionState::Connected;
                    state.device_info = Some(device_info.clone());
                }
                info!(
                    session_id = %self.session_id,
                    device = device_info.device_name.as_deref().unwrap_or("unknown"),
                    "device connected"
                );
                self.publish(DeviceEvent::DeviceConnected(device_info));
            }
            ConnectorEvent::ConnectionFailed { reason } => {
                let was_connecting = {
                    let mut state = self.lock_state();
                    let connecting = state.connection_state == ConnectionState::Connecting;
                    if connecting {
                        state.connection_state = ConnectionState::Disconnected;
                    }
                    connecting
                };
                if !was_connecting {
                    debug!(
                        session_id = %self.session_id,
                        "ignoring connect failure outside a connect attempt: {}",
                        reason
                    );
                    return;
                }
                warn!(session_id = %self.session_id, "connect failed: {}", reason);
                self.publish(DeviceEvent::ConnectFailed(DeviceError::transport_failure(
                    reason,
                )));
            }
            ConnectorEvent::Disconnected => {
                {
                    let mut state = self.lock_state();
                    state.connection_state = ConnectionState::Disconnected;
                    state.device_info = None;
                }
                self.correlator
                    .cancel_pending(DeviceError::transport_failure("device disconnected"));
                info!(session_id = %self.session_id, "device disconnected");
                self.publish(DeviceEvent::DeviceDisconnected);
            }
            ConnectorEvent::ApduResponse { sequence_id, data } => {
                if let Err(err) = self.correlator.resolve(sequence_id, data) {
                    warn!(
                        session_id = %self.session_id,
                        sequence_id,
                        "dropping APDU response: {}",
                        err
                    );
                }
            }
            ConnectorEvent::TransactionNotification { data } => {
                self.publish(DeviceEvent::TransactionNotificationReceived(data));
            }
            ConnectorEvent::SecurityStateChanged { state } => {
                if state != SecurityState::DoNotChange {
                    self.lock_state().security_state = state;
                }
                self.publish(DeviceEvent::SecurityStateChanged(state));
            }
            ConnectorEvent::ApplicationControl { message } => {
                self.publish(DeviceEvent::ApplicationControlReceived(message));
            }
        }
    }

    fn expire_connect(&self, generation: u64, limit: Duration) {
        {
            let mut state = self.lock_state();
            if state.connect_generation != generation
                || state.connection_state != ConnectionState::Connecting
            {
                return;
            }
            state.connection_state = ConnectionState::Disconnected;
        }
        warn!(session_id = %self.session_id, ?limit, "connect timed out");
        self.publish(DeviceEvent::ConnectFailed(DeviceError::timeout(limit)));
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        for slot in [&mut self.event_loop, &mut self.forwarder] {
            let handle = slot.get_mut().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(handle) = handle {
                handle.abort();
            }
        }
    }
}

/// Attach a fresh channel to `connector` and relay its events tagged with `epoch`
fn spawn_event_forwarder(
    connector: &mut dyn PaymentDeviceConnector,
    epoch: u64,
    buffer_size: usize,
    tagged: mpsc::Sender<TaggedEvent>,
) -> JoinHandle<()> {
    let (sender, mut receiver): (_, ConnectorEventReceiver) =
        create_connector_event_channel(buffer_size);
    connector.attach_events(sender);
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            if tagged.send((epoch, event)).await.is_err() {
                break;
            }
        }
    })
}

async fn run_event_loop(session: Weak<SessionInner>, mut receiver: mpsc::Receiver<TaggedEvent>) {
    while let Some((epoch, event)) = receiver.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };
        inner.handle_connector_event(epoch, event);
    }
    debug!("connector event loop finished");
}

// ----------------------------------------------------------------------------
// Device Session
// ----------------------------------------------------------------------------

/// Cloneable handle to a payment device session
///
/// Must be created inside a tokio runtime; the connector event loop is spawned
/// on construction and stops when the last handle is dropped.
#[derive(Clone)]
pub struct DeviceSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("session_id", &self.inner.session_id)
            .field("connection_state", &self.connection_state())
            .finish()
    }
}

impl DeviceSession {
    pub fn new(mut connector: Box<dyn PaymentDeviceConnector>, config: DeviceConfig) -> Self {
        let (tagged_events, receiver) = mpsc::channel(config.event_buffer_size.max(1));
        let (events, _) = broadcast::channel(config.broadcast_buffer_size.max(1));
        let forwarder = spawn_event_forwarder(
            connector.as_mut(),
            0,
            config.event_buffer_size.max(1),
            tagged_events.clone(),
        );

        let connector: SharedConnector = Arc::new(AsyncMutex::new(connector));
        let inner = Arc::new(SessionInner {
            session_id: Uuid::new_v4(),
            config,
            correlator: CommandCorrelator::new(Arc::clone(&connector)),
            connector,
            state: Mutex::new(SessionState::default()),
            events,
            tagged_events,
            event_loop: Mutex::new(None),
            forwarder: Mutex::new(Some(forwarder)),
        });

        let handle = tokio::spawn(run_event_loop(Arc::downgrade(&inner), receiver));
        *inner
            .event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        debug!(session_id = %inner.session_id, "device session created");
        Self { inner }
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> DeviceEventReceiver {
        self.inner.events.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock_state().connection_state
    }

    pub fn security_state(&self) -> SecurityState {
        self.inner.lock_state().security_state
    }

    // ------------------------------------------------------------------------
    // Connection Lifecycle
    // ------------------------------------------------------------------------

    /// Start connecting to the peripheral
    ///
    /// Completion is reported as [`DeviceEvent::DeviceConnected`] or
    /// [`DeviceEvent::ConnectFailed`]. Without an explicit `timeout` the
    /// configured connect timeout applies, if any. When the timeout fires the
    /// session returns to `Disconnected` but a later connect completion from
    /// the connector is still adopted.
    pub async fn connect(&self, timeout: Option<Duration>) -> DeviceResult<()> {
        let timeout = timeout.or_else(|| self.inner.config.connect_timeout());
        let mut connector = self.inner.connector.lock().await;

        if self.connection_state() == ConnectionState::Connected {
            debug!(session_id = %self.inner.session_id, "already connected, resetting first");
            connector.reset_to_default_state().await;
            self.inner
                .correlator
                .cancel_pending(DeviceError::transport_failure("connector reset"));
            let mut state = self.inner.lock_state();
            state.connection_state = ConnectionState::Disconnected;
            state.device_info = None;
        }

        let generation = {
            let mut state = self.inner.lock_state();
            state.connection_state = ConnectionState::Connecting;
            state.connect_generation += 1;
            state.connect_generation
        };
        info!(
            session_id = %self.inner.session_id,
            connector = %connector.connector_type(),
            "connecting"
        );

        if let Err(err) = connector.connect().await {
            {
                let mut state = self.inner.lock_state();
                if state.connect_generation == generation
                    && state.connection_state == ConnectionState::Connecting
                {
                    state.connection_state = ConnectionState::Disconnected;
                }
            }
            warn!(session_id = %self.inner.session_id, "connector refused connect: {}", err);
            self.inner.publish(DeviceEvent::ConnectFailed(err.clone()));
            return Err(err);
        }
        drop(connector);

        if let Some(limit) = timeout {
            let session = Arc::downgrade(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                if let Some(inner) = session.upgrade() {
                    inner.expire_connect(generation, limit);
                }
            });
        }
        Ok(())
    }

    /// Connect and wait for the outcome of this attempt
    pub async fn connect_and_wait(&self, timeout: Option<Duration>) -> DeviceResult<DeviceInfo> {
        let mut events = self.subscribe();
        self.connect(timeout).await?;
        loop {
            match events.recv().await {
                Ok(DeviceEvent::DeviceConnected(info)) => return Ok(info),
                Ok(DeviceEvent::ConnectFailed(err)) => return Err(err),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "connect waiter lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(DeviceError::transport_failure("session closed"));
                }
            }
        }
    }

    /// Ask the connector to drop the link; the state follows its confirmation
    pub async fn disconnect(&self) -> DeviceResult<()> {
        info!(session_id = %self.inner.session_id, "disconnecting");
        self.inner.connector.lock().await.disconnect().await
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.connector.lock().await.is_connected()
    }

    pub async fn device_info(&self) -> Option<DeviceInfo> {
        self.inner.connector.lock().await.device_info()
    }

    pub async fn validate_connection(&self) -> DeviceResult<bool> {
        self.inner.connector.lock().await.validate_connection().await
    }

    pub async fn connector_type(&self) -> ConnectorType {
        self.inner.connector.lock().await.connector_type()
    }

    /// Replace the connector; only allowed while disconnected
    pub async fn change_transport(
        &self,
        mut connector: Box<dyn PaymentDeviceConnector>,
    ) -> DeviceResult<()> {
        let mut slot = self.inner.connector.lock().await;
        let state = self.connection_state();
        if state != ConnectionState::Disconnected || slot.is_connected() {
            warn!(
                session_id = %self.inner.session_id,
                %state,
                link_up = slot.is_connected(),
                "refusing transport change"
            );
            return Err(DeviceError::DeviceShouldBeDisconnected);
        }
        slot.reset_to_default_state().await;
        let epoch = {
            let mut state = self.inner.lock_state();
            state.connector_epoch += 1;
            state.connector_epoch
        };
        self.inner.attach_connector(connector.as_mut(), epoch);
        info!(
            session_id = %self.inner.session_id,
            from = %slot.connector_type(),
            to = %connector.connector_type(),
            "transport changed"
        );
        *slot = connector;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Device Operations
    // ------------------------------------------------------------------------

    pub async fn send_device_control(&self, state: DeviceControlState) -> DeviceResult<()> {
        debug!(session_id = %self.inner.session_id, ?state, "device control");
        self.inner
            .connector
            .lock()
            .await
            .send_device_control(state)
            .await
    }

    /// Request an NFC state change
    ///
    /// `DoNotChange` is forwarded to the connector but leaves the session state
    /// alone and publishes nothing.
    pub async fn write_security_state(&self, state: SecurityState) -> DeviceResult<()> {
        self.inner
            .connector
            .lock()
            .await
            .write_security_state(state)
            .await?;
        if state != SecurityState::DoNotChange {
            self.inner.lock_state().security_state = state;
            info!(session_id = %self.inner.session_id, ?state, "security state written");
            self.inner.publish(DeviceEvent::SecurityStateChanged(state));
        }
        Ok(())
    }

    /// Execute one APDU, annotating `command` with the response
    pub async fn execute_apdu_command(&self, command: &mut ApduCommand) -> DeviceResult<ApduResult> {
        if command.command.as_deref().map_or(true, str::is_empty) {
            return Err(DeviceError::ApduDataNotFull);
        }
        if self.connection_state() != ConnectionState::Connected {
            return Err(DeviceError::DeviceNotConnected);
        }
        self.inner
            .correlator
            .execute(command, self.inner.config.apdu_timeout())
            .await
    }

    pub fn pending_sequence_id(&self) -> Option<u16> {
        self.inner.correlator.pending_sequence_id()
    }

    pub fn correlator_stats(&self) -> CorrelatorStats {
        self.inner.correlator.stats()
    }
}
