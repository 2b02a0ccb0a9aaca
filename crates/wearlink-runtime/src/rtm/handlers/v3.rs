//! Version 3 handlers: APDU packages and NFC security state
//!
//! An APDU package is executed strictly in sequence order on the device
//! session. A command answered with a failing status word stops the package
//! unless it is marked `continueOnFailure`; a device-level error (timeout,
//! disconnect) always stops it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use wearlink_core::{
    message_types, ApduCommand, ApduStatus, RtmMessage, SecurityState, WearlinkResult,
};

use crate::rtm::context::HandlerContext;
use crate::rtm::registry::RtmMessageHandler;
use crate::session::DeviceSession;

// ----------------------------------------------------------------------------
// APDU Package
// ----------------------------------------------------------------------------

/// Inbound `apduPackage` payload
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApduPackage {
    #[serde(default)]
    pub package_id: Option<String>,
    #[serde(default)]
    pub apdu_commands: Vec<ApduCommand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackageState {
    /// Every command ran and none stopped the package
    Processed,
    /// A command returned a failing status word
    Failed,
    /// The device could not complete a command
    Error,
}

/// Outbound `apduPackageResult` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApduPackageResult {
    pub package_id: Option<String>,
    pub state: PackageState,
    pub executed_duration_ms: u64,
    pub apdu_responses: Vec<ApduCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u32>,
}

fn status_allows_continue(status: ApduStatus) -> bool {
    matches!(status, ApduStatus::Success | ApduStatus::MoreData(_))
}

impl ApduPackage {
    /// Run every command on `session`, stopping at the first failure that is
    /// not marked `continueOnFailure`
    pub async fn execute(mut self, session: &DeviceSession) -> ApduPackageResult {
        let started = Instant::now();
        self.apdu_commands.sort_by_key(|command| command.sequence);

        let mut responses = Vec::with_capacity(self.apdu_commands.len());
        let mut state = PackageState::Processed;
        let mut error_reason = None;
        let mut error_code = None;

        for mut command in self.apdu_commands {
            match session.execute_apdu_command(&mut command).await {
                Ok(result) => {
                    let status = result.status();
                    let keep_going =
                        status_allows_continue(status) || command.continue_on_failure;
                    if !keep_going {
                        debug!(
                            sequence_id = command.sequence,
                            status = format_args!("{:04X}", result.status_word),
                            "APDU package stopped on status word"
                        );
                        state = PackageState::Failed;
                        error_reason = Some(format!(
                            "command {} returned {:04X}",
                            command.sequence, result.status_word
                        ));
                    }
                    responses.push(command);
                    if !keep_going {
                        break;
                    }
                }
                Err(err) => {
                    warn!(sequence_id = command.sequence, "APDU package aborted: {}", err);
                    state = PackageState::Error;
                    error_code = Some(err.code());
                    error_reason = Some(err.to_string());
                    break;
                }
            }
        }

        ApduPackageResult {
            package_id: self.package_id,
            state,
            executed_duration_ms: started.elapsed().as_millis() as u64,
            apdu_responses: responses,
            error_reason,
            error_code,
        }
    }
}

/// `apduPackage`: execute the package, answer with `apduPackageResult`
pub struct ApduPackageHandler;

#[async_trait]
impl RtmMessageHandler for ApduPackageHandler {
    async fn handle(&self, message: &RtmMessage, context: &HandlerContext) -> WearlinkResult<()> {
        let package: ApduPackage = message.payload()?;
        info!(
            package_id = package.package_id.as_deref().unwrap_or("-"),
            commands = package.apdu_commands.len(),
            "executing APDU package"
        );

        let result = package.execute(context.session()).await;
        let success = result.state == PackageState::Processed;
        let mut response = message.respond_with(
            message_types::APDU_PACKAGE_RESULT,
            Some(serde_json::to_value(&result)?),
            success,
        );
        if let Some(reason) = &result.error_reason {
            response = response.with_error(reason.clone());
        }
        context.send(response).await?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Security State
// ----------------------------------------------------------------------------

#[derive(Deserialize)]
struct SecurityStateRequest {
    state: SecurityState,
}

/// `securityState`: ask the device for an NFC state change
pub struct SecurityStateHandler;

#[async_trait]
impl RtmMessageHandler for SecurityStateHandler {
    async fn handle(&self, message: &RtmMessage, context: &HandlerContext) -> WearlinkResult<()> {
        let request: SecurityStateRequest = message.payload()?;
        let response = match context.session().write_security_state(request.state).await {
            Ok(()) => message.respond_with(
                message_types::SECURITY_STATE,
                Some(json!({ "state": request.state })),
                true,
            ),
            Err(err) => {
                warn!(state = ?request.state, "security state write failed: {}", err);
                message
                    .respond_with(message_types::SECURITY_STATE, None, false)
                    .with_error(err.to_string())
            }
        };
        context.send(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_payload_shape() {
        let package: ApduPackage = serde_json::from_value(json!({
            "packageId": "pkg-1",
            "apduCommands": [
                { "sequence": 2, "command": "00B0000000", "continueOnFailure": true },
                { "sequence": 1, "command": "00A4040000", "commandId": "c-1", "type": "SELECT" }
            ]
        }))
        .unwrap();
        assert_eq!(package.package_id.as_deref(), Some("pkg-1"));
        assert_eq!(package.apdu_commands.len(), 2);
        assert!(package.apdu_commands[0].continue_on_failure);
        assert_eq!(package.apdu_commands[1].command_type.as_deref(), Some("SELECT"));
    }

    #[test]
    fn test_result_state_wire_names() {
        assert_eq!(serde_json::to_value(PackageState::Processed).unwrap(), json!("PROCESSED"));
        assert_eq!(serde_json::to_value(PackageState::Error).unwrap(), json!("ERROR"));
    }

    #[test]
    fn test_more_data_counts_as_progress() {
        assert!(status_allows_continue(ApduStatus::Success));
        assert!(status_allows_continue(ApduStatus::MoreData(0x10)));
        assert!(!status_allows_continue(ApduStatus::Error(0x6A82)));
    }
}
