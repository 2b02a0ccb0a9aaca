//! RTM Message Router
//!
//! Entry point for messages coming from the web surface. Raw envelopes are
//! parsed, resolved against the registry at the active protocol version and
//! dispatched to their handler. Unknown types are logged and dropped; handler
//! failures are answered with a failure response for that message only.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use wearlink_core::{
    CardScannerDataSource, CardScannerPresenter, RtmConfig, RtmError, RtmMessage,
    RtmOutputChannel, RtmProtocolVersion, WearlinkError, WearlinkResult,
};

use super::bridge::spawn_device_event_bridge;
use super::context::HandlerContext;
use super::outbound::OutboundSender;
use super::registry::MessageTypeRegistry;
use crate::session::DeviceSession;

/// What happened to a routed message
#[derive(Debug)]
pub enum RouteOutcome {
    /// A handler ran to completion; `version` is the table it came from
    Handled { version: RtmProtocolVersion },
    /// No handler for the type at the active version
    Unhandled,
    /// The handler failed; the error stays local to this message
    Failed(WearlinkError),
}

impl RouteOutcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, RouteOutcome::Handled { .. })
    }
}

// ----------------------------------------------------------------------------
// Router
// ----------------------------------------------------------------------------

pub struct RtmRouter {
    registry: Arc<MessageTypeRegistry>,
    context: HandlerContext,
}

impl RtmRouter {
    /// Router with the default handler tables
    pub fn new(
        session: DeviceSession,
        output: Arc<dyn RtmOutputChannel>,
        config: RtmConfig,
    ) -> WearlinkResult<Self> {
        Self::with_registry(
            session,
            output,
            config,
            MessageTypeRegistry::with_default_handlers(),
        )
    }

    pub fn with_registry(
        session: DeviceSession,
        output: Arc<dyn RtmOutputChannel>,
        config: RtmConfig,
        registry: MessageTypeRegistry,
    ) -> WearlinkResult<Self> {
        config.validate()?;
        let version = config.protocol_version()?;
        let context = HandlerContext::new(session, OutboundSender::new(output), config, version);
        Ok(Self {
            registry: Arc::new(registry),
            context,
        })
    }

    pub fn with_card_scanner(mut self, source: Arc<dyn CardScannerDataSource>) -> Self {
        self.context.set_scanner_source(source);
        self
    }

    pub fn with_presenter(mut self, presenter: Arc<dyn CardScannerPresenter>) -> Self {
        self.context.set_presenter(presenter);
        self
    }

    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    pub fn registry(&self) -> &MessageTypeRegistry {
        &self.registry
    }

    pub fn active_version(&self) -> RtmProtocolVersion {
        self.context.active_version()
    }

    /// Parse and route one raw inbound envelope
    pub async fn handle_raw(&self, raw: &str) -> Result<RouteOutcome, RtmError> {
        let message = RtmMessage::parse(raw).map_err(|err| {
            warn!("rejecting inbound RTM message: {}", err);
            err
        })?;
        Ok(self.route(message).await)
    }

    /// Dispatch a parsed message
    pub async fn route(&self, message: RtmMessage) -> RouteOutcome {
        let version = self.context.active_version();
        trace!(message_type = %message.message_type, %version, "routing");

        let Some(resolved) = self.registry.resolve(version, &message.message_type) else {
            if MessageTypeRegistry::is_known_without_handler(&message.message_type) {
                debug!(message_type = %message.message_type, "no handler for message type");
            } else {
                let err = RtmError::UnknownMessageType {
                    message_type: message.message_type.clone(),
                };
                warn!(%version, "{}", err);
            }
            return RouteOutcome::Unhandled;
        };

        match resolved.handler.handle(&message, &self.context).await {
            Ok(()) => RouteOutcome::Handled {
                version: resolved.version,
            },
            Err(err) => {
                warn!(message_type = %message.message_type, "handler failed: {}", err);
                if !matches!(err, WearlinkError::Rtm(RtmError::DeliveryFailed { .. })) {
                    let response = message
                        .respond_with(&message.message_type, None, false)
                        .with_error(err.to_string());
                    // Failure already logged by the sender
                    let _ = self.context.send(response).await;
                }
                RouteOutcome::Failed(err)
            }
        }
    }

    /// Process raw envelopes in order until the inbound channel closes
    pub async fn run(&self, mut inbound: mpsc::Receiver<String>) {
        info!(version = %self.active_version(), "RTM router running");
        while let Some(raw) = inbound.recv().await {
            // Parse failures are logged by handle_raw
            let _ = self.handle_raw(&raw).await;
        }
        info!("inbound RTM channel closed, router stopping");
    }

    /// Forward the session's device events to the web surface
    pub fn spawn_device_event_bridge(&self) -> JoinHandle<()> {
        spawn_device_event_bridge(
            self.context.session().subscribe(),
            self.context.outbound().clone(),
            self.context.config().default_retries,
        )
    }
}

impl std::fmt::Debug for RtmRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtmRouter")
            .field("registry", &self.registry)
            .field("context", &self.context)
            .finish()
    }
}
