//! Wearlink CLI library
//!
//! Command-line driver that exercises a device session and the RTM router
//! against a simulated wearable.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use app::SimulatorApp;
pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::{CliAppConfig, CliConfig, ConfigError};
pub use error::{CliError, Result};
