//! Error handling for the wearlink CLI

use thiserror::Error;

use crate::config::ConfigError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Wearlink error: {0}")]
    Wearlink(#[from] wearlink_core::WearlinkError),

    #[error("Device error: {0}")]
    Device(#[from] wearlink_core::DeviceError),

    #[error("RTM error: {0}")]
    Rtm(#[from] wearlink_core::RtmError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Input error: {0}")]
    Input(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Hex decoding error: {0}")]
    HexDecoding(#[from] hex::FromHexError),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Input(format!("{:#}", err))
    }
}
