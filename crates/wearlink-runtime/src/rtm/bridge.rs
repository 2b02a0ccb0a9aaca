//! Device event bridge
//!
//! Republishes [`DeviceEvent`]s from a session as unsolicited outbound RTM
//! messages.

use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use wearlink_core::{message_types, RtmMessage};

use super::outbound::OutboundSender;
use crate::session::{DeviceEvent, DeviceEventReceiver};

/// Translate a device event into the message the web surface expects
pub fn device_event_message(event: &DeviceEvent) -> RtmMessage {
    match event {
        DeviceEvent::DeviceConnected(info) => RtmMessage::new(
            message_types::DEVICE_STATUS,
            Some(json!({ "status": "connected", "deviceInfo": info })),
        ),
        DeviceEvent::ConnectFailed(err) => RtmMessage::new(
            message_types::DEVICE_STATUS,
            Some(json!({ "status": "connectFailed", "code": err.code() })),
        )
        .with_error(err.to_string()),
        DeviceEvent::DeviceDisconnected => RtmMessage::new(
            message_types::DEVICE_STATUS,
            Some(json!({ "status": "disconnected" })),
        ),
        DeviceEvent::TransactionNotificationReceived(data) => RtmMessage::new(
            message_types::TRANSACTION_NOTIFICATION,
            Some(json!({ "data": hex::encode_upper(data) })),
        ),
        DeviceEvent::SecurityStateChanged(state) => RtmMessage::new(
            message_types::SECURITY_STATE,
            Some(json!({ "state": state })),
        ),
        DeviceEvent::ApplicationControlReceived(message) => RtmMessage::new(
            message_types::APPLICATION_CONTROL,
            Some(serde_json::to_value(message).unwrap_or(Value::Null)),
        ),
    }
}

/// Forward every device event to `outbound` until the session goes away
pub fn spawn_device_event_bridge(
    mut events: DeviceEventReceiver,
    outbound: OutboundSender,
    retries: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let message = device_event_message(&event);
                    if let Err(err) = outbound.send(message, retries).await {
                        warn!("device event not delivered: {}", err);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "device event bridge lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("device event bridge stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wearlink_core::{ApplicationControlMessage, DeviceError, DeviceInfo, SecurityState};

    #[test]
    fn test_status_messages() {
        let info = DeviceInfo {
            device_type: Some("WATCH".into()),
            ..Default::default()
        };
        let connected = device_event_message(&DeviceEvent::DeviceConnected(info));
        assert_eq!(connected.message_type, "deviceStatus");
        let data = connected.data.unwrap();
        assert_eq!(data["status"], "connected");
        assert_eq!(data["deviceInfo"]["deviceType"], "WATCH");

        let failed = device_event_message(&DeviceEvent::ConnectFailed(DeviceError::OperationTimeout {
            duration_ms: 100,
        }));
        assert!(!failed.success);
        assert_eq!(failed.data.unwrap()["code"], 10007);
    }

    #[test]
    fn test_payload_encodings() {
        let notification =
            device_event_message(&DeviceEvent::TransactionNotificationReceived(vec![0xCA, 0xFE]));
        assert_eq!(notification.data.unwrap()["data"], "CAFE");

        let security = device_event_message(&DeviceEvent::SecurityStateChanged(SecurityState::Enabled));
        assert_eq!(security.message_type, "securityState");
        assert_eq!(security.data.unwrap()["state"], "enabled");

        let control = device_event_message(&DeviceEvent::ApplicationControlReceived(
            ApplicationControlMessage { data: vec![0x01] },
        ));
        assert_eq!(control.message_type, "applicationControl");
        assert!(control.data.is_some());
    }
}
