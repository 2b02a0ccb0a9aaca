//! Shared state handed to every RTM message handler

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use wearlink_core::{
    CardScannerDataSource, CardScannerPresenter, RtmConfig, RtmError, RtmMessage,
    RtmProtocolVersion,
};

use super::outbound::OutboundSender;
use crate::session::DeviceSession;

/// Opaque identifiers delivered by the web surface in `userData`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionData {
    pub user_id: Option<String>,
    pub device_id: Option<String>,
    #[serde(alias = "token")]
    pub access_token: Option<String>,
}

impl SessionData {
    pub fn has_access_token(&self) -> bool {
        self.access_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

#[derive(Debug)]
struct ContextState {
    active_version: RtmProtocolVersion,
    session_data: Option<SessionData>,
}

/// Collaborators and mutable router state available to handlers
#[derive(Clone)]
pub struct HandlerContext {
    session: DeviceSession,
    outbound: OutboundSender,
    scanner_source: Option<Arc<dyn CardScannerDataSource>>,
    presenter: Option<Arc<dyn CardScannerPresenter>>,
    config: RtmConfig,
    state: Arc<Mutex<ContextState>>,
}

impl HandlerContext {
    pub fn new(
        session: DeviceSession,
        outbound: OutboundSender,
        config: RtmConfig,
        active_version: RtmProtocolVersion,
    ) -> Self {
        Self {
            session,
            outbound,
            scanner_source: None,
            presenter: None,
            config,
            state: Arc::new(Mutex::new(ContextState {
                active_version,
                session_data: None,
            })),
        }
    }

    pub(crate) fn set_scanner_source(&mut self, source: Arc<dyn CardScannerDataSource>) {
        self.scanner_source = Some(source);
    }

    pub(crate) fn set_presenter(&mut self, presenter: Arc<dyn CardScannerPresenter>) {
        self.presenter = Some(presenter);
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    pub fn outbound(&self) -> &OutboundSender {
        &self.outbound
    }

    pub fn scanner_source(&self) -> Option<&Arc<dyn CardScannerDataSource>> {
        self.scanner_source.as_ref()
    }

    pub fn presenter(&self) -> Option<&Arc<dyn CardScannerPresenter>> {
        self.presenter.as_ref()
    }

    pub fn config(&self) -> &RtmConfig {
        &self.config
    }

    pub fn active_version(&self) -> RtmProtocolVersion {
        self.lock().active_version
    }

    pub fn set_active_version(&self, version: RtmProtocolVersion) {
        let previous = std::mem::replace(&mut self.lock().active_version, version);
        if previous != version {
            debug!(%previous, %version, "RTM protocol version changed");
        }
    }

    pub fn session_data(&self) -> Option<SessionData> {
        self.lock().session_data.clone()
    }

    pub fn store_session_data(&self, data: SessionData) {
        self.lock().session_data = Some(data);
    }

    pub fn clear_session_data(&self) -> Option<SessionData> {
        self.lock().session_data.take()
    }

    /// Send with the configured default retry count
    pub async fn send(&self, message: RtmMessage) -> Result<(), RtmError> {
        self.outbound.send(message, self.config.default_retries).await
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("session", &self.session)
            .field("active_version", &self.active_version())
            .field("has_scanner", &self.scanner_source.is_some())
            .field("has_presenter", &self.presenter.is_some())
            .finish()
    }
}
