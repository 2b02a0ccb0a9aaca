//! Core data types for the payment device protocol
//!
//! Connection and NFC security states, the device identity snapshot, and the
//! APDU command/result pair exchanged with the secure element.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::errors::{DeviceError, DeviceResult};

// ----------------------------------------------------------------------------
// Session States
// ----------------------------------------------------------------------------

/// Connection lifecycle of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// NFC security state of the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SecurityState {
    #[default]
    Disabled,
    Enabled,
    DoNotChange,
}

impl SecurityState {
    /// Wire value understood by the peripheral
    pub fn as_byte(self) -> u8 {
        match self {
            SecurityState::Disabled => 0x00,
            SecurityState::Enabled => 0x01,
            SecurityState::DoNotChange => 0xFF,
        }
    }
}

impl TryFrom<u8> for SecurityState {
    type Error = DeviceError;

    fn try_from(value: u8) -> DeviceResult<Self> {
        match value {
            0x00 => Ok(SecurityState::Disabled),
            0x01 => Ok(SecurityState::Enabled),
            0xFF => Ok(SecurityState::DoNotChange),
            other => Err(DeviceError::transport_failure(format!(
                "unknown security state byte 0x{:02X}",
                other
            ))),
        }
    }
}

/// Secure element power control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceControlState {
    EsePowerOff,
    EsePowerReset,
    EsePowerOn,
}

impl DeviceControlState {
    pub fn as_byte(self) -> u8 {
        match self {
            DeviceControlState::EsePowerOff => 0x00,
            DeviceControlState::EsePowerReset => 0x01,
            DeviceControlState::EsePowerOn => 0x02,
        }
    }
}

// ----------------------------------------------------------------------------
// Device Identity
// ----------------------------------------------------------------------------

/// Identity snapshot collected from the peripheral on connect
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_type: Option<String>,
    pub manufacturer_name: Option<String>,
    pub device_name: Option<String>,
    pub serial_number: Option<String>,
    pub model_number: Option<String>,
    pub hardware_revision: Option<String>,
    pub firmware_revision: Option<String>,
    pub software_revision: Option<String>,
    pub system_id: Option<String>,
    pub os_name: Option<String>,
    pub license_key: Option<String>,
    pub bd_address: Option<String>,
    pub secure_element_id: Option<String>,
    pub casd: Option<String>,
}

/// Application control payload pushed by the peripheral
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationControlMessage {
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

// ----------------------------------------------------------------------------
// APDU Command
// ----------------------------------------------------------------------------

/// A single secure-element command as delivered by the platform
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApduCommand {
    pub command_id: Option<String>,
    #[serde(default)]
    pub group_id: i32,
    pub sequence: u16,
    /// Hex encoded command bytes
    pub command: Option<String>,
    #[serde(rename = "type")]
    pub command_type: Option<String>,
    #[serde(default)]
    pub continue_on_failure: bool,
    #[serde(default, with = "hex_bytes_opt", skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Vec<u8>>,
    #[serde(default, with = "hex_bytes_opt", skip_serializing_if = "Option::is_none")]
    pub response_code: Option<Vec<u8>>,
}

impl ApduCommand {
    /// Create a command from a sequence id and hex payload
    pub fn new<S: Into<String>>(sequence: u16, command_hex: S) -> Self {
        Self {
            sequence,
            command: Some(command_hex.into()),
            ..Default::default()
        }
    }

    /// Decode the command payload, rejecting missing, empty or non-hex input
    pub fn payload(&self) -> DeviceResult<Vec<u8>> {
        let hex_payload = self
            .command
            .as_deref()
            .ok_or_else(|| DeviceError::malformed_command("command payload missing"))?;
        let bytes = hex::decode(hex_payload.trim())
            .map_err(|e| DeviceError::malformed_command(format!("invalid hex: {}", e)))?;
        if bytes.is_empty() {
            return Err(DeviceError::malformed_command("command payload empty"));
        }
        Ok(bytes)
    }

    /// Record the response onto the command
    pub fn apply_result(&mut self, result: &ApduResult) {
        self.response_data = Some(result.payload.clone());
        self.response_code = Some(result.status_bytes().to_vec());
    }

    /// Whether a response has been recorded
    pub fn is_answered(&self) -> bool {
        self.response_code.is_some()
    }
}

// ----------------------------------------------------------------------------
// APDU Result
// ----------------------------------------------------------------------------

/// Status word classes reported by the secure element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApduStatus {
    /// 0x9000
    Success,
    /// 0x61xx, xx bytes still available
    MoreData(u8),
    /// 0x6Cxx, retry with Le = xx
    WrongLength(u8),
    Error(u16),
}

/// Parsed secure-element response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResult {
    pub status_word: u16,
    pub payload: Vec<u8>,
}

impl ApduResult {
    pub const SUCCESS: u16 = 0x9000;

    /// Parse a raw response: payload followed by a two byte status word
    pub fn from_bytes(raw: &[u8]) -> DeviceResult<Self> {
        if raw.len() < 2 {
            return Err(DeviceError::InvalidApduResponse {
                reason: format!("response too short ({} bytes)", raw.len()),
            });
        }
        let split = raw.len() - 2;
        let status_word = u16::from_be_bytes([raw[split], raw[split + 1]]);
        Ok(Self {
            status_word,
            payload: raw[..split].to_vec(),
        })
    }

    /// Parse a hex encoded raw response
    pub fn from_hex(raw: &str) -> DeviceResult<Self> {
        let bytes = hex::decode(raw).map_err(|e| DeviceError::InvalidApduResponse {
            reason: format!("invalid hex: {}", e),
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn status_bytes(&self) -> [u8; 2] {
        self.status_word.to_be_bytes()
    }

    pub fn status(&self) -> ApduStatus {
        let [sw1, sw2] = self.status_bytes();
        match (sw1, sw2) {
            (0x90, 0x00) => ApduStatus::Success,
            (0x61, remaining) => ApduStatus::MoreData(remaining),
            (0x6C, le) => ApduStatus::WrongLength(le),
            _ => ApduStatus::Error(self.status_word),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_word == Self::SUCCESS
    }
}

// ----------------------------------------------------------------------------
// Serde helpers
// ----------------------------------------------------------------------------

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

mod hex_bytes_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&hex::encode_upper(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_apdu_result_parsing() {
        let result = ApduResult::from_hex("6F109000").unwrap();
        assert_eq!(result.status_word, 0x9000);
        assert_eq!(result.payload, vec![0x6F, 0x10]);
        assert!(result.is_success());
        assert_eq!(result.status(), ApduStatus::Success);
    }

    #[test]
    fn test_apdu_result_too_short() {
        assert!(matches!(
            ApduResult::from_bytes(&[0x90]),
            Err(DeviceError::InvalidApduResponse { .. })
        ));
    }

    #[test]
    fn test_apdu_status_classes() {
        assert_eq!(
            ApduResult::from_hex("6110").unwrap().status(),
            ApduStatus::MoreData(0x10)
        );
        assert_eq!(
            ApduResult::from_hex("6C20").unwrap().status(),
            ApduStatus::WrongLength(0x20)
        );
        assert_eq!(
            ApduResult::from_hex("6A82").unwrap().status(),
            ApduStatus::Error(0x6A82)
        );
    }

    #[test]
    fn test_command_payload_validation() {
        assert_eq!(
            ApduCommand::new(1, "00A4040000").payload().unwrap(),
            vec![0x00, 0xA4, 0x04, 0x00, 0x00]
        );
        assert!(matches!(
            ApduCommand::new(1, "zz").payload(),
            Err(DeviceError::MalformedCommand { .. })
        ));
        assert!(matches!(
            ApduCommand::new(1, "").payload(),
            Err(DeviceError::MalformedCommand { .. })
        ));
        assert!(matches!(
            ApduCommand::default().payload(),
            Err(DeviceError::MalformedCommand { .. })
        ));
    }

    #[test]
    fn test_apply_result_annotates_command() {
        let mut command = ApduCommand::new(7, "00A4040000");
        assert!(!command.is_answered());
        command.apply_result(&ApduResult::from_hex("01029000").unwrap());
        assert_eq!(command.response_data, Some(vec![0x01, 0x02]));
        assert_eq!(command.response_code, Some(vec![0x90, 0x00]));
    }

    #[test]
    fn test_command_json_shape() {
        let json = r#"{"commandId":"c-1","groupId":2,"sequence":3,"command":"00A4040000","type":"SELECT","continueOnFailure":true}"#;
        let command: ApduCommand = serde_json::from_str(json).unwrap();
        assert_eq!(command.sequence, 3);
        assert_eq!(command.command_type.as_deref(), Some("SELECT"));
        assert!(command.continue_on_failure);

        let mut answered = command.clone();
        answered.apply_result(&ApduResult::from_hex("9000").unwrap());
        let value = serde_json::to_value(&answered).unwrap();
        assert_eq!(value["responseCode"], "9000");
        assert_eq!(value["responseData"], "");
    }

    #[test]
    fn test_security_state_bytes() {
        for state in [
            SecurityState::Disabled,
            SecurityState::Enabled,
            SecurityState::DoNotChange,
        ] {
            assert_eq!(SecurityState::try_from(state.as_byte()).unwrap(), state);
        }
        assert!(SecurityState::try_from(0x42).is_err());
    }

    proptest! {
        #[test]
        fn prop_status_word_is_trailing_two_bytes(body in proptest::collection::vec(any::<u8>(), 0..64), sw in any::<u16>()) {
            let mut raw = body.clone();
            raw.extend_from_slice(&sw.to_be_bytes());
            let result = ApduResult::from_bytes(&raw).unwrap();
            prop_assert_eq!(result.status_word, sw);
            prop_assert_eq!(result.payload, body);
        }
    }
}
