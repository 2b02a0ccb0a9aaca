//! Wearlink CLI Configuration
//!
//! The CLI reads an optional TOML file holding the device session, RTM router
//! and simulator settings. Every section is optional; missing values fall back
//! to the library defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use wearlink_core::{DeviceConfig, RtmConfig};
use wearlink_harness::{SimulatorConfig, TestingType};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the wearlink CLI
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliAppConfig {
    /// Device session configuration
    pub device: DeviceConfig,

    /// RTM router configuration
    pub rtm: RtmConfig,

    /// Simulated wearable behavior
    pub simulator: SimulatorConfig,

    /// CLI-specific settings
    pub cli: CliConfig,
}

/// CLI-specific configuration options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Enable verbose logging output
    pub verbose: bool,

    /// Buffer size for outbound RTM messages awaiting print
    pub outbound_buffer_size: usize,

    /// Pretty-print JSON output
    pub pretty_output: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            outbound_buffer_size: 32,
            pretty_output: false,
        }
    }
}

impl CliAppConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::FileSystem(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: CliAppConfig = toml::from_str(&content).map_err(|e| {
            ConfigError::Loading(format!(
                "Failed to load from {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::FileSystem(format!("Failed to create config directory: {}", e))
            })?;
        }
        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialization(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), toml_string)
            .map_err(|e| ConfigError::FileSystem(format!("Failed to write config file: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.device
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        self.rtm
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.cli.outbound_buffer_size == 0 {
            return Err(ConfigError::Validation(
                "Outbound buffer size must be greater than 0".to_string(),
            ));
        }
        if hex::decode(&self.simulator.apdu_response_hex).map_or(true, |r| r.len() < 2) {
            return Err(ConfigError::Validation(format!(
                "Simulated APDU response must be hex with a status word: {}",
                self.simulator.apdu_response_hex
            )));
        }
        Ok(())
    }

    /// Create example configuration file content
    pub fn example_config() -> String {
        let example_config = CliAppConfig {
            device: DeviceConfig {
                apdu_timeout_ms: 5_000,
                connect_timeout_secs: Some(10),
                ..DeviceConfig::default()
            },
            simulator: SimulatorConfig {
                connect_delay_ms: 500,
                disconnect_delay_ms: 500,
                apdu_execute_delay_ms: 50,
                apdu_response_hex: "9000".to_string(),
                testing_type: TestingType::FullSimulation,
            },
            ..Default::default()
        };

        toml::to_string_pretty(&example_config)
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = CliAppConfig::default();
        assert!(!config.cli.verbose);
        assert_eq!(config.cli.outbound_buffer_size, 32);
        assert_eq!(config.rtm.protocol_version, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = CliAppConfig::default();

        let mut invalid_config = config.clone();
        invalid_config.simulator.apdu_response_hex = "90".to_string();
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config.clone();
        invalid_config.rtm.protocol_version = 7;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config;
        invalid_config.cli.outbound_buffer_size = 0;
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_example_config_round_trips() {
        let example = CliAppConfig::example_config();
        let parsed: CliAppConfig = toml::from_str(&example).unwrap();
        assert_eq!(parsed.device.connect_timeout_secs, Some(10));
        assert_eq!(parsed.simulator.apdu_execute_delay_ms, 50);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: CliAppConfig = toml::from_str(
            r#"
            [simulator]
            connect_delay_ms = 0

            [rtm]
            protocol_version = 3
            "#,
        )
        .unwrap();
        assert_eq!(parsed.simulator.connect_delay_ms, 0);
        assert_eq!(parsed.simulator.apdu_response_hex, "9000");
        assert_eq!(parsed.rtm.protocol_version, 3);
        assert_eq!(parsed.device, DeviceConfig::default());
    }

    #[test]
    fn test_save_and_load_file() {
        let path = std::env::temp_dir()
            .join(format!("wearlink-cli-test-{}", std::process::id()))
            .join("wearlink.toml");
        let mut config = CliAppConfig::default();
        config.cli.pretty_output = true;

        config.save_to_file(&path).unwrap();
        let loaded = CliAppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = std::fs::remove_file(&path);
    }
}
