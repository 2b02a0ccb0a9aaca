//! Scripted Connector for Testing
//!
//! A test double whose behavior is driven from the test body through a
//! [`ScriptHandle`]: it records every call, can complete connects and answer
//! APDUs on demand, and can inject arbitrary connector events such as late or
//! mismatched responses.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use wearlink_core::{
    ConnectorEvent, ConnectorEventSender, ConnectorType, DeviceControlState, DeviceError,
    DeviceInfo, DeviceResult, PaymentDeviceConnector, SecurityState,
};

/// A call observed by the scripted connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorCall {
    Connect,
    Disconnect,
    ResetToDefaultState,
    ValidateConnection,
    SendApdu { sequence_id: u16, data: Vec<u8> },
    WriteSecurityState(SecurityState),
    DeviceControl(DeviceControlState),
}

#[derive(Debug, Default)]
struct Script {
    events: Option<ConnectorEventSender>,
    connected: bool,
    device_info: Option<DeviceInfo>,
    calls: Vec<ConnectorCall>,
    /// Complete connects immediately with this identity
    auto_connect: Option<DeviceInfo>,
    /// Answer every APDU immediately with these bytes
    auto_respond: Option<Vec<u8>>,
    fail_sends: bool,
    fail_security_writes: bool,
}

/// Test-side control over a [`ScriptedConnector`]
#[derive(Debug, Clone, Default)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
}

impl ScriptHandle {
    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<ConnectorCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, call: &ConnectorCall) -> usize {
        self.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Sequence ids of every APDU handed to the connector
    pub fn sent_sequence_ids(&self) -> Vec<u16> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                ConnectorCall::SendApdu { sequence_id, .. } => Some(*sequence_id),
                _ => None,
            })
            .collect()
    }

    pub fn set_auto_connect(&self, device_info: Option<DeviceInfo>) {
        self.lock().auto_connect = device_info;
    }

    pub fn set_auto_respond(&self, response: Option<Vec<u8>>) {
        self.lock().auto_respond = response;
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    pub fn set_fail_security_writes(&self, fail: bool) {
        self.lock().fail_security_writes = fail;
    }

    /// Mark the link up without emitting anything
    pub fn set_connected(&self, device_info: Option<DeviceInfo>) {
        let mut script = self.lock();
        script.connected = device_info.is_some();
        script.device_info = device_info;
    }

    /// Push an event to the attached session
    pub async fn emit(&self, event: ConnectorEvent) -> DeviceResult<()> {
        let events = self
            .lock()
            .events
            .clone()
            .ok_or_else(|| DeviceError::transport_failure("event channel not attached"))?;
        events
            .send(event)
            .await
            .map_err(|_| DeviceError::transport_failure("session event channel closed"))
    }

    /// Finish a pending connect with the given identity
    pub async fn complete_connect(&self, device_info: DeviceInfo) -> DeviceResult<()> {
        self.set_connected(Some(device_info.clone()));
        self.emit(ConnectorEvent::Connected { device_info }).await
    }

    /// Drop the link and tell the session
    pub async fn complete_disconnect(&self) -> DeviceResult<()> {
        self.set_connected(None);
        self.emit(ConnectorEvent::Disconnected).await
    }

    /// Answer an APDU with a raw response
    pub async fn respond(&self, sequence_id: u16, data: Vec<u8>) -> DeviceResult<()> {
        self.emit(ConnectorEvent::ApduResponse { sequence_id, data })
            .await
    }
}

/// Connector whose behavior is scripted by a [`ScriptHandle`]
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    handle: ScriptHandle,
}

impl ScriptedConnector {
    pub fn new() -> (Self, ScriptHandle) {
        let handle = ScriptHandle::default();
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }

    fn record(&self, call: ConnectorCall) -> MutexGuard<'_, Script> {
        let mut script = self.handle.lock();
        script.calls.push(call);
        script
    }
}

#[async_trait]
impl PaymentDeviceConnector for ScriptedConnector {
    fn attach_events(&mut self, events: ConnectorEventSender) {
        self.handle.lock().events = Some(events);
    }

    async fn connect(&mut self) -> DeviceResult<()> {
        let auto = self.record(ConnectorCall::Connect).auto_connect.clone();
        if let Some(device_info) = auto {
            debug!("scripted connector auto-completing connect");
            self.handle.complete_connect(device_info).await?;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> DeviceResult<()> {
        drop(self.record(ConnectorCall::Disconnect));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.handle.lock().connected
    }

    async fn validate_connection(&self) -> DeviceResult<bool> {
        Ok(self.record(ConnectorCall::ValidateConnection).connected)
    }

    async fn send_apdu(&mut self, data: Vec<u8>, sequence_id: u16) -> DeviceResult<()> {
        let (fail, auto) = {
            let script = self.record(ConnectorCall::SendApdu {
                sequence_id,
                data: data.clone(),
            });
            (script.fail_sends, script.auto_respond.clone())
        };
        if fail {
            return Err(DeviceError::transport_failure("scripted send failure"));
        }
        if let Some(response) = auto {
            self.handle.respond(sequence_id, response).await?;
        }
        Ok(())
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        self.handle.lock().device_info.clone()
    }

    async fn write_security_state(&mut self, state: SecurityState) -> DeviceResult<()> {
        if self
            .record(ConnectorCall::WriteSecurityState(state))
            .fail_security_writes
        {
            return Err(DeviceError::transport_failure("scripted security write failure"));
        }
        Ok(())
    }

    async fn send_device_control(&mut self, state: DeviceControlState) -> DeviceResult<()> {
        drop(self.record(ConnectorCall::DeviceControl(state)));
        Ok(())
    }

    async fn reset_to_default_state(&mut self) {
        let mut script = self.record(ConnectorCall::ResetToDefaultState);
        script.connected = false;
        script.device_info = None;
    }

    fn connector_type(&self) -> ConnectorType {
        ConnectorType::TestDouble
    }
}
