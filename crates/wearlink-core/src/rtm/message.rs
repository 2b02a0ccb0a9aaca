//! RTM message envelope

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RtmError;

fn default_success() -> bool {
    true
}

/// A typed envelope exchanged between the host and the web surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtmMessage {
    #[serde(rename = "callBackId", default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<u64>,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(rename = "reason", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RtmMessage {
    /// Create a successful message of the given type
    pub fn new<T: Into<String>>(message_type: T, data: Option<Value>) -> Self {
        Self {
            callback_id: None,
            message_type: message_type.into(),
            data,
            success: true,
            error: None,
        }
    }

    /// Create a failure message carrying an error description
    pub fn failure<T: Into<String>, E: Into<String>>(message_type: T, error: E) -> Self {
        Self {
            callback_id: None,
            message_type: message_type.into(),
            data: None,
            success: false,
            error: Some(error.into()),
        }
    }

    /// Build the response to this message, echoing its callback id
    pub fn respond_with(&self, message_type: &str, data: Option<Value>, success: bool) -> Self {
        Self {
            callback_id: self.callback_id,
            message_type: message_type.to_string(),
            data,
            success,
            error: None,
        }
    }

    pub fn with_callback_id(mut self, callback_id: Option<u64>) -> Self {
        self.callback_id = callback_id;
        self
    }

    pub fn with_error<E: Into<String>>(mut self, error: E) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    /// Parse an inbound raw envelope
    pub fn parse(raw: &str) -> Result<Self, RtmError> {
        let message: RtmMessage =
            serde_json::from_str(raw).map_err(|e| RtmError::InvalidEnvelope {
                reason: e.to_string(),
            })?;
        if message.message_type.trim().is_empty() {
            return Err(RtmError::InvalidEnvelope {
                reason: "message type is empty".into(),
            });
        }
        Ok(message)
    }

    /// Deserialize the payload into a typed structure
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, RtmError> {
        let data = self.data.clone().unwrap_or(Value::Null);
        serde_json::from_value(data)
            .map_err(|e| RtmError::invalid_payload(&self.message_type, e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
