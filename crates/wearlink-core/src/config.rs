//! Centralized Configuration Management
//!
//! Configuration structures for the device session and the RTM router.

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, WearlinkError};
use crate::rtm::RtmProtocolVersion;

// ----------------------------------------------------------------------------
// Device Session Configuration
// ----------------------------------------------------------------------------

/// Configuration for a device session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Per-command APDU response deadline in milliseconds
    pub apdu_timeout_ms: u64,
    /// Overall connect deadline in seconds; `None` waits indefinitely
    pub connect_timeout_secs: Option<u64>,
    /// Buffer size for the connector event channel
    pub event_buffer_size: usize,
    /// Buffer size for the device event broadcast channel
    pub broadcast_buffer_size: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            apdu_timeout_ms: 5_000,
            connect_timeout_secs: None,
            event_buffer_size: 64,
            broadcast_buffer_size: 64,
        }
    }
}

impl DeviceConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            apdu_timeout_ms: 1_000,
            connect_timeout_secs: Some(2),
            event_buffer_size: 100,
            broadcast_buffer_size: 100,
        }
    }

    pub fn apdu_timeout(&self) -> Duration {
        Duration::from_millis(self.apdu_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.apdu_timeout_ms == 0 {
            return Err(WearlinkError::config_error(
                "APDU timeout must be greater than 0",
            ));
        }
        if self.event_buffer_size == 0 || self.broadcast_buffer_size == 0 {
            return Err(WearlinkError::config_error(
                "Channel buffer sizes must be greater than 0",
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// RTM Configuration
// ----------------------------------------------------------------------------

/// Configuration for the RTM message router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtmConfig {
    /// Protocol version assumed until the web surface negotiates one
    pub protocol_version: u8,
    /// Retry count for outbound messages sent by built-in handlers
    pub default_retries: u32,
    /// Buffer size for the inbound raw message channel
    pub inbound_buffer_size: usize,
    /// Version string reported in `sdkVersion` responses
    pub sdk_version: String,
}

impl Default for RtmConfig {
    fn default() -> Self {
        Self {
            protocol_version: RtmProtocolVersion::LATEST.as_u8(),
            default_retries: 3,
            inbound_buffer_size: 32,
            sdk_version: format!("rust-{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl RtmConfig {
    pub fn protocol_version(&self) -> Result<RtmProtocolVersion> {
        RtmProtocolVersion::try_from(self.protocol_version).map_err(WearlinkError::from)
    }

    pub fn validate(&self) -> Result<()> {
        self.protocol_version()?;
        if self.inbound_buffer_size == 0 {
            return Err(WearlinkError::config_error(
                "Inbound buffer size must be greater than 0",
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Aggregate Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for a wearlink host
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WearlinkConfig {
    pub device: DeviceConfig,
    pub rtm: RtmConfig,
}

impl WearlinkConfig {
    pub fn testing() -> Self {
        Self {
            device: DeviceConfig::testing(),
            rtm: RtmConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.device.validate()?;
        self.rtm.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WearlinkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.device.apdu_timeout(), Duration::from_secs(5));
        assert_eq!(config.device.connect_timeout(), None);
        assert_eq!(config.rtm.default_retries, 3);
        assert!(config.rtm.sdk_version.starts_with("rust-"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = WearlinkConfig::testing();
        assert!(config.validate().is_ok());

        config.device.apdu_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = WearlinkConfig::default();
        config.rtm.protocol_version = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: WearlinkConfig =
            serde_json::from_str(r#"{"device":{"apdu_timeout_ms":250}}"#).unwrap();
        assert_eq!(config.device.apdu_timeout_ms, 250);
        assert_eq!(config.device.event_buffer_size, 64);
        assert_eq!(config.rtm.protocol_version, 4);
    }
}
