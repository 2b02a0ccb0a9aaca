//! Version 4 handlers: card scanning and SDK version

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use wearlink_core::{message_types, CardScanner, RtmMessage, ScanOutcome, WearlinkResult};

use crate::rtm::context::HandlerContext;
use crate::rtm::registry::RtmMessageHandler;

pub const CARD_SCANNED_RETRIES: u32 = 3;
pub const SDK_VERSION_RETRIES: u32 = 3;

/// `scanRequest`: run the injected card scanner
///
/// Without a scanner data source the request is ignored. Otherwise the scan
/// runs on its own task so the router keeps serving messages; its outcome
/// produces one `cardScanned` message and one dismiss signal.
pub struct ScanRequestHandler;

#[async_trait]
impl RtmMessageHandler for ScanRequestHandler {
    async fn handle(&self, message: &RtmMessage, context: &HandlerContext) -> WearlinkResult<()> {
        let Some(source) = context.scanner_source() else {
            debug!("scan requested without a card scanner, ignoring");
            return Ok(());
        };
        let scanner = source.card_scanner();
        if let Some(presenter) = context.presenter() {
            presenter.present(&scanner);
        }

        let request = message.clone();
        let context = context.clone();
        tokio::spawn(async move {
            finish_scan(request, context, scanner).await;
        });
        Ok(())
    }
}

async fn finish_scan(request: RtmMessage, context: HandlerContext, scanner: Arc<dyn CardScanner>) {
    let response = match scanner.scan().await {
        ScanOutcome::Scanned(card) => match serde_json::to_value(&card) {
            Ok(data) => request.respond_with(message_types::CARD_SCANNED, Some(data), true),
            Err(err) => request
                .respond_with(message_types::CARD_SCANNED, None, false)
                .with_error(err.to_string()),
        },
        ScanOutcome::Cancelled => request
            .respond_with(message_types::CARD_SCANNED, None, false)
            .with_error("cancelled"),
    };

    if let Err(err) = context.outbound().send(response, CARD_SCANNED_RETRIES).await {
        warn!("card scan result not delivered: {}", err);
    }
    if let Some(presenter) = context.presenter() {
        presenter.dismiss(&scanner);
    }
}

/// `sdkVersionRequest`: report the host library version
pub struct SdkVersionHandler;

#[async_trait]
impl RtmMessageHandler for SdkVersionHandler {
    async fn handle(&self, message: &RtmMessage, context: &HandlerContext) -> WearlinkResult<()> {
        let data = json!({ "sdkVersion": context.config().sdk_version });
        let response = message.respond_with(message_types::SDK_VERSION, Some(data), true);
        context.outbound().send(response, SDK_VERSION_RETRIES).await?;
        Ok(())
    }
}
