//! Command handlers for the wearlink CLI

use tracing::info;

use crate::app::SimulatorApp;
use crate::cli::{Cli, Commands};
use crate::config::CliAppConfig;
use crate::error::Result;

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: CliAppConfig) -> Result<()> {
        match cli.command {
            Commands::Simulate {
                apdus,
                rtm,
                connect_delay_ms,
                apdu_delay_ms,
                connect_timeout,
            } => {
                let config =
                    Self::apply_overrides(config, connect_delay_ms, apdu_delay_ms, connect_timeout);
                Self::handle_simulate_command(config, apdus, rtm).await
            }
            Commands::ExampleConfig => {
                println!("{}", CliAppConfig::example_config());
                Ok(())
            }
        }
    }

    /// Fold command-line overrides into the loaded configuration
    fn apply_overrides(
        mut config: CliAppConfig,
        connect_delay_ms: Option<u64>,
        apdu_delay_ms: Option<u64>,
        connect_timeout: Option<u64>,
    ) -> CliAppConfig {
        if let Some(delay) = connect_delay_ms {
            config.simulator.connect_delay_ms = delay;
        }
        if let Some(delay) = apdu_delay_ms {
            config.simulator.apdu_execute_delay_ms = delay;
        }
        if connect_timeout.is_some() {
            config.device.connect_timeout_secs = connect_timeout;
        }
        config
    }

    /// Handle the simulate command
    async fn handle_simulate_command(
        config: CliAppConfig,
        apdus: Vec<String>,
        rtm: bool,
    ) -> Result<()> {
        let pretty = config.cli.pretty_output;
        let timeout = config.device.connect_timeout();
        let app = SimulatorApp::new(config)?;

        info!("Connecting to simulated wearable...");
        let device_info = app.connect(timeout).await?;
        Self::print_json(&device_info, pretty)?;

        if !apdus.is_empty() {
            let executed = app.execute_apdus(&apdus).await?;
            for command in &executed {
                Self::print_json(command, pretty)?;
            }
            info!("Executed {} APDU command(s)", executed.len());
        }

        if rtm {
            info!("Routing RTM messages from stdin (close input to stop)");
            app.route_stdin().await?;
        }

        app.shutdown().await?;
        info!("Simulated session closed");
        Ok(())
    }

    fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
        let text = if pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        println!("{}", text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_overrides_replace_configured_values() {
        let config = CliAppConfig::default();
        let config = CommandDispatcher::apply_overrides(config, Some(0), Some(5), Some(3));
        assert_eq!(config.simulator.connect_delay_ms, 0);
        assert_eq!(config.simulator.apdu_execute_delay_ms, 5);
        assert_eq!(config.device.connect_timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_missing_overrides_keep_configuration() {
        let mut config = CliAppConfig::default();
        config.device.connect_timeout_secs = Some(9);
        let updated = CommandDispatcher::apply_overrides(config.clone(), None, None, None);
        assert_eq!(updated, config);
    }

    #[tokio::test]
    async fn test_simulate_with_apdus() {
        let mut config = CliAppConfig::default();
        config.simulator = wearlink_harness::SimulatorConfig::instant();
        let apdus = vec!["00A4040000".to_string(), "80CA9F7F00".to_string()];
        CommandDispatcher::handle_simulate_command(config, apdus, false)
            .await
            .unwrap();
    }
}
