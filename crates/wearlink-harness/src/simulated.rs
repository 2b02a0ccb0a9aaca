//! Simulated Payment Device
//!
//! A connector that fabricates a wearable without any hardware. Connect and
//! disconnect complete after configurable delays, and every APDU is answered
//! with a fixed response after `apdu_execute_delay_ms`.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use wearlink_core::{
    ApplicationControlMessage, ConnectorEvent, ConnectorEventSender, ConnectorType,
    DeviceControlState, DeviceError, DeviceInfo, DeviceResult, PaymentDeviceConnector,
    SecurityState,
};

// ----------------------------------------------------------------------------
// Simulator Configuration
// ----------------------------------------------------------------------------

/// Marker embedded in the generated secure element id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestingType {
    PartialSimulation,
    FullSimulation,
}

impl TestingType {
    pub fn raw_value(self) -> u64 {
        match self {
            TestingType::PartialSimulation => 0xBADC_0FFE_E000,
            TestingType::FullSimulation => 0xDEAD_BEEF_0000,
        }
    }
}

/// Configuration for simulated device behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub connect_delay_ms: u64,
    pub disconnect_delay_ms: u64,
    pub apdu_execute_delay_ms: u64,
    /// Raw response returned for every APDU
    pub apdu_response_hex: String,
    pub testing_type: TestingType,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            connect_delay_ms: 4_000,
            disconnect_delay_ms: 4_000,
            apdu_execute_delay_ms: 500,
            apdu_response_hex: "9000".to_string(),
            testing_type: TestingType::FullSimulation,
        }
    }
}

impl SimulatorConfig {
    /// Zero delays everywhere
    pub fn instant() -> Self {
        Self {
            connect_delay_ms: 0,
            disconnect_delay_ms: 0,
            apdu_execute_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }

    pub fn disconnect_delay(&self) -> Duration {
        Duration::from_millis(self.disconnect_delay_ms)
    }

    pub fn apdu_execute_delay(&self) -> Duration {
        Duration::from_millis(self.apdu_execute_delay_ms)
    }
}

// ----------------------------------------------------------------------------
// Simulated Connector
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SimulatedState {
    device_info: Option<DeviceInfo>,
    nfc_state: SecurityState,
    tasks: Vec<JoinHandle<()>>,
}

/// Connector that emulates a payment wearable
pub struct SimulatedConnector {
    config: SimulatorConfig,
    response: Vec<u8>,
    secure_element_id: String,
    events: Option<ConnectorEventSender>,
    connected: Arc<AtomicBool>,
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedConnector {
    pub fn new(config: SimulatorConfig) -> DeviceResult<Self> {
        let response = hex::decode(&config.apdu_response_hex).map_err(|e| {
            DeviceError::InvalidApduResponse {
                reason: format!("simulated response is not hex: {}", e),
            }
        })?;
        let secure_element_id = generate_secure_element_id(config.testing_type);
        Ok(Self {
            config,
            response,
            secure_element_id,
            events: None,
            connected: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(SimulatedState::default())),
        })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Current NFC state of the simulated wearable
    pub fn nfc_state(&self) -> SecurityState {
        self.lock_state().nfc_state
    }

    /// The identity reported by the simulated wearable
    pub fn fabricated_device_info(&self) -> DeviceInfo {
        DeviceInfo {
            device_type: Some("WATCH".into()),
            manufacturer_name: Some("Fitpay".into()),
            device_name: Some("PSPS".into()),
            serial_number: Some("074DCC022E14".into()),
            model_number: Some("FB404".into()),
            hardware_revision: Some("1.0.0.0".into()),
            firmware_revision: Some("1030.6408.1309.0001".into()),
            software_revision: Some("2.0.242009.6".into()),
            system_id: Some("0x123456FFFE9ABCDE".into()),
            os_name: Some("IOS".into()),
            license_key: Some("6b413f37-90a9-47ed-962d-80e6a3528036".into()),
            bd_address: Some("977214bf-d038-4077-bdf8-226b17d5958d".into()),
            secure_element_id: Some(self.secure_element_id.clone()),
            casd: Some(SIMULATED_CASD.into()),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn events(&self) -> DeviceResult<ConnectorEventSender> {
        self.events
            .clone()
            .ok_or_else(|| DeviceError::transport_failure("event channel not attached"))
    }

    fn schedule<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut state = self.lock_state();
        state.tasks.retain(|t| !t.is_finished());
        state.tasks.push(handle);
    }
}

#[async_trait]
impl PaymentDeviceConnector for SimulatedConnector {
    fn attach_events(&mut self, events: ConnectorEventSender) {
        self.events = Some(events);
    }

    async fn connect(&mut self) -> DeviceResult<()> {
        debug!("simulated connect in {:?}", self.config.connect_delay());
        let events = self.events()?;
        let delay = self.config.connect_delay();
        let device_info = self.fabricated_device_info();
        let connected = Arc::clone(&self.connected);
        let state = Arc::clone(&self.state);

        self.schedule(async move {
            sleep(delay).await;
            {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                state.device_info = Some(device_info.clone());
                state.nfc_state = SecurityState::Enabled;
            }
            connected.store(true, Ordering::SeqCst);
            trace!("simulated device connected");
            if events
                .send(ConnectorEvent::Connected { device_info })
                .await
                .is_err()
            {
                warn!("session dropped before simulated connect completed");
            }
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> DeviceResult<()> {
        let events = self.events()?;
        let delay = self.config.disconnect_delay();
        let connected = Arc::clone(&self.connected);
        let state = Arc::clone(&self.state);

        self.schedule(async move {
            sleep(delay).await;
            connected.store(false, Ordering::SeqCst);
            state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .device_info = None;
            let _ = events.send(ConnectorEvent::Disconnected).await;
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn validate_connection(&self) -> DeviceResult<bool> {
        Ok(self.is_connected())
    }

    async fn send_apdu(&mut self, data: Vec<u8>, sequence_id: u16) -> DeviceResult<()> {
        if !self.is_connected() {
            return Err(DeviceError::DeviceNotConnected);
        }
        trace!(sequence_id, bytes = data.len(), "simulated APDU");
        let events = self.events()?;
        let delay = self.config.apdu_execute_delay();
        let response = self.response.clone();

        self.schedule(async move {
            sleep(delay).await;
            let _ = events
                .send(ConnectorEvent::ApduResponse {
                    sequence_id,
                    data: response,
                })
                .await;
        });
        Ok(())
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        self.lock_state().device_info.clone()
    }

    async fn write_security_state(&mut self, state: SecurityState) -> DeviceResult<()> {
        if !self.is_connected() {
            return Err(DeviceError::DeviceNotConnected);
        }
        if state != SecurityState::DoNotChange {
            self.lock_state().nfc_state = state;
        }
        Ok(())
    }

    async fn send_device_control(&mut self, state: DeviceControlState) -> DeviceResult<()> {
        if !self.is_connected() {
            return Err(DeviceError::DeviceNotConnected);
        }
        if state == DeviceControlState::EsePowerReset {
            let events = self.events()?;
            self.schedule(async move {
                let _ = events
                    .send(ConnectorEvent::ApplicationControl {
                        message: ApplicationControlMessage {
                            data: vec![state.as_byte()],
                        },
                    })
                    .await;
            });
        }
        Ok(())
    }

    async fn reset_to_default_state(&mut self) {
        let mut state = self.lock_state();
        for task in state.tasks.drain(..) {
            task.abort();
        }
        state.device_info = None;
        state.nfc_state = SecurityState::Disabled;
        self.connected.store(false, Ordering::SeqCst);
    }

    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Simulated
    }
}

fn generate_secure_element_id(testing_type: TestingType) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!(
        "{:012X}528704504258{:012X}FFFF427208236250082462502041FFFF082562502041FFFF",
        testing_type.raw_value(),
        now
    )
}

const SIMULATED_CASD: &str = "7F218201097F218201049310201608231634158F370493B60000000342038949325F200C434552542E434153442E43549501825F2504201607015F240420210701450CA000000151535043415344005314C0AC3B49223485BE2FCFECBC19CFE14CE01CD9795F378180C0F41E9813FDC0C4522AA72CA6DDFFCFEE5432A01D7FDCF37246C23B138C2C7E5F91431E7E445932A812E0473A713919E594002E257311E67A324F130CA56EDF13FE36616C6EDE85437F30450ADA2549122C0C879B1BF55D1C83FEC7F8AB5CC45DE3A36110226F1A7DC35D86B39445EBBC9325C2F7FDF79FA0410DF55074ABE25F3822905ACD4030B40F9B8BAF35678C439EB7F6862D198BE58CFB053F6BE4A3ECAE148D05";
