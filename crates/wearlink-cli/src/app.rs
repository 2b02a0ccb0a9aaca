//! Simulated wearable application
//!
//! Owns a device session over the simulated connector and offers the
//! operations the CLI commands drive: connecting, running APDUs and routing RTM
//! messages between stdin and stdout.

use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use wearlink_core::{ApduCommand, DeviceInfo, RtmMessage};
use wearlink_harness::SimulatedConnector;
use wearlink_runtime::{create_outbound_channel, DeviceSession, RtmRouter};

use crate::config::CliAppConfig;
use crate::error::{CliError, Result};

/// Wearlink session bound to a simulated wearable
pub struct SimulatorApp {
    config: CliAppConfig,
    session: DeviceSession,
}

impl SimulatorApp {
    /// Create the application; must run inside a tokio runtime
    pub fn new(config: CliAppConfig) -> Result<Self> {
        config.validate()?;
        let connector = SimulatedConnector::new(config.simulator.clone())?;
        let session = DeviceSession::new(Box::new(connector), config.device.clone());
        info!(session_id = %session.session_id(), "simulated session created");
        Ok(Self { config, session })
    }

    pub fn config(&self) -> &CliAppConfig {
        &self.config
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    /// Connect and return the reported identity
    pub async fn connect(&self, timeout: Option<Duration>) -> Result<DeviceInfo> {
        let info = self.session.connect_and_wait(timeout).await?;
        info!(
            device = info.device_name.as_deref().unwrap_or("unknown"),
            model = info.model_number.as_deref().unwrap_or("unknown"),
            "connected"
        );
        Ok(info)
    }

    /// Execute hex APDUs in order, numbering them from zero
    pub async fn execute_apdus(&self, apdus: &[String]) -> Result<Vec<ApduCommand>> {
        let mut executed = Vec::with_capacity(apdus.len());
        for (index, apdu) in apdus.iter().enumerate() {
            hex::decode(apdu.trim())?;
            let sequence = u16::try_from(index)
                .map_err(|_| CliError::Input("too many APDU commands".to_string()))?;
            let mut command = ApduCommand::new(sequence, apdu.trim());
            let result = self.session.execute_apdu_command(&mut command).await?;
            debug!(
                sequence_id = sequence,
                status = format_args!("{:04X}", result.status_word),
                "APDU executed"
            );
            executed.push(command);
        }
        Ok(executed)
    }

    /// Route RTM envelopes from stdin, printing outbound messages on stdout
    pub async fn route_stdin(&self) -> Result<()> {
        let (output, mut outbound) = create_outbound_channel(self.config.cli.outbound_buffer_size);
        let router = RtmRouter::new(self.session.clone(), output, self.config.rtm.clone())?;
        let bridge = router.spawn_device_event_bridge();

        let pretty = self.config.cli.pretty_output;
        let printer = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                match render(&message, pretty) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("failed to render outbound message: {}", e),
                }
            }
        });

        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.rtm.inbound_buffer_size);
        let reader = async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines
                .next_line()
                .await
                .context("failed to read RTM input from stdin")?
            {
                if line.trim().is_empty() {
                    continue;
                }
                if inbound_tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok::<(), anyhow::Error>(())
        };

        let (read_result, ()) = tokio::join!(reader, router.run(inbound_rx));

        bridge.abort();
        let _ = bridge.await;
        drop(router);
        if printer.await.is_err() {
            warn!("outbound printer task failed");
        }
        read_result?;
        Ok(())
    }

    /// Disconnect if still connected
    pub async fn shutdown(&self) -> Result<()> {
        if self.session.is_connected().await {
            self.session.disconnect().await?;
        }
        Ok(())
    }
}

/// Render a message as a single JSON line (or pretty JSON)
pub fn render(message: &RtmMessage, pretty: bool) -> Result<String> {
    let text = if pretty {
        serde_json::to_string_pretty(message)?
    } else {
        message.to_json()?
    };
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wearlink_harness::SimulatorConfig;

    fn instant_config() -> CliAppConfig {
        CliAppConfig {
            simulator: SimulatorConfig::instant(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_connect_and_execute() {
        let app = SimulatorApp::new(instant_config()).unwrap();
        let info = app.connect(None).await.unwrap();
        assert_eq!(info.device_type.as_deref(), Some("WATCH"));

        let executed = app
            .execute_apdus(&["00A4040000".to_string(), "80CA9F7F00".to_string()])
            .await
            .unwrap();
        assert_eq!(executed.len(), 2);
        assert_eq!(executed[1].sequence, 1);
        assert_eq!(executed[0].response_code, Some(vec![0x90, 0x00]));
    }

    #[tokio::test]
    async fn test_rejects_non_hex_apdu() {
        let app = SimulatorApp::new(instant_config()).unwrap();
        app.connect(None).await.unwrap();
        let result = app.execute_apdus(&["zz".to_string()]).await;
        assert!(matches!(result, Err(CliError::HexDecoding(_))));
    }

    #[test]
    fn test_render_single_line() {
        let message = RtmMessage::new("sync", None).with_callback_id(Some(3));
        let line = render(&message, false).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains("\"callBackId\":3"));
    }
}
