//! Version 2 handlers

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use wearlink_core::{message_types, RtmMessage, RtmProtocolVersion, WearlinkResult};

use crate::rtm::context::{HandlerContext, SessionData};
use crate::rtm::registry::RtmMessageHandler;

#[derive(Deserialize)]
#[serde(untagged)]
enum VersionPayload {
    Bare(u8),
    Object { version: u8 },
}

/// `version`: negotiate the protocol version spoken from now on
pub struct VersionHandler;

#[async_trait]
impl RtmMessageHandler for VersionHandler {
    async fn handle(&self, message: &RtmMessage, context: &HandlerContext) -> WearlinkResult<()> {
        let requested = match message.payload::<VersionPayload>()? {
            VersionPayload::Bare(version) | VersionPayload::Object { version } => version,
        };
        let negotiated = RtmProtocolVersion::negotiate(requested);
        context.set_active_version(negotiated);
        info!(requested, %negotiated, "RTM version negotiated");

        let response = message.respond_with(
            message_types::VERSION,
            Some(json!({ "version": negotiated.as_u8() })),
            true,
        );
        context.send(response).await?;
        Ok(())
    }
}

/// `userData`: keep the identifiers the web surface hands over
pub struct UserDataHandler;

#[async_trait]
impl RtmMessageHandler for UserDataHandler {
    async fn handle(&self, message: &RtmMessage, context: &HandlerContext) -> WearlinkResult<()> {
        let data: SessionData = message.payload()?;
        debug!(
            user = data.user_id.as_deref().unwrap_or("-"),
            has_token = data.has_access_token(),
            "session data received"
        );
        context.store_session_data(data);
        context
            .send(message.respond_with(message_types::USER_DATA, None, true))
            .await?;
        Ok(())
    }
}

/// `sync`: acknowledge with the current device status
pub struct SyncHandler;

#[async_trait]
impl RtmMessageHandler for SyncHandler {
    async fn handle(&self, message: &RtmMessage, context: &HandlerContext) -> WearlinkResult<()> {
        if context.session_data().is_none() {
            let response = message
                .respond_with(message_types::SYNC, None, false)
                .with_error("user data not received");
            context.send(response).await?;
            return Ok(());
        }

        let session = context.session();
        let status = json!({
            "connectionState": session.connection_state().to_string(),
            "deviceConnected": session.is_connected().await,
            "deviceInfo": session.device_info().await,
        });
        context
            .send(message.respond_with(message_types::SYNC, Some(status), true))
            .await?;
        Ok(())
    }
}

/// `logout`: forget the session data
pub struct LogoutHandler;

#[async_trait]
impl RtmMessageHandler for LogoutHandler {
    async fn handle(&self, message: &RtmMessage, context: &HandlerContext) -> WearlinkResult<()> {
        if context.clear_session_data().is_none() {
            debug!("logout without session data");
        }
        context
            .send(message.respond_with(message_types::LOGOUT, None, true))
            .await?;
        Ok(())
    }
}
