//! Integration tests for the device session and APDU correlation
//!
//! Sessions are driven either by the simulated wearable (end-to-end scenarios)
//! or by the scripted connector (precise control over completions, late and
//! mismatched responses).

use std::time::Duration;

use tokio::time::{timeout, Instant};
use wearlink_core::{
    ApduCommand, ConnectionState, ConnectorEvent, DeviceConfig, DeviceError, DeviceInfo,
    DeviceResult, SecurityState,
};
use wearlink_harness::{
    ConnectorCall, ScriptHandle, ScriptedConnector, SimulatedConnector, SimulatorConfig,
};
use wearlink_runtime::{DeviceEvent, DeviceEventReceiver, DeviceSession};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

fn watch() -> DeviceInfo {
    DeviceInfo {
        device_type: Some("WATCH".into()),
        device_name: Some("PSPS".into()),
        ..Default::default()
    }
}

fn simulated_session(apdu_delay_ms: u64) -> DeviceResult<DeviceSession> {
    let connector = SimulatedConnector::new(SimulatorConfig {
        connect_delay_ms: 0,
        disconnect_delay_ms: 0,
        apdu_execute_delay_ms: apdu_delay_ms,
        ..SimulatorConfig::default()
    })?;
    Ok(DeviceSession::new(Box::new(connector), DeviceConfig::testing()))
}

fn scripted_session() -> (DeviceSession, ScriptHandle) {
    let (connector, handle) = ScriptedConnector::new();
    let config = DeviceConfig {
        connect_timeout_secs: None,
        ..DeviceConfig::testing()
    };
    (DeviceSession::new(Box::new(connector), config), handle)
}

async fn connected_scripted_session() -> (DeviceSession, ScriptHandle) {
    let (session, handle) = scripted_session();
    handle.set_auto_connect(Some(watch()));
    session
        .connect_and_wait(None)
        .await
        .expect("scripted connect");
    (session, handle)
}

async fn next_event(events: &mut DeviceEventReceiver) -> DeviceEvent {
    timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("Event should arrive within timeout")
        .expect("Event channel should stay open")
}

async fn wait_for_pending(session: &DeviceSession, sequence_id: u16) {
    while session.pending_sequence_id() != Some(sequence_id) {
        tokio::task::yield_now().await;
    }
}

// ----------------------------------------------------------------------------
// Simulated Device Scenarios
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_simulated_connect_reports_watch() -> DeviceResult<()> {
    let session = simulated_session(0)?;
    let mut events = session.subscribe();

    session.connect(None).await?;
    match next_event(&mut events).await {
        DeviceEvent::DeviceConnected(info) => {
            assert_eq!(info.device_type.as_deref(), Some("WATCH"));
            assert_eq!(info.manufacturer_name.as_deref(), Some("Fitpay"));
            assert!(info.secure_element_id.is_some());
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(session.connection_state(), ConnectionState::Connected);
    assert!(session.validate_connection().await?);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_simulated_select_answers_9000_after_delay() -> DeviceResult<()> {
    let session = simulated_session(500)?;
    session.connect_and_wait(None).await?;

    let started = Instant::now();
    let mut command = ApduCommand::new(1, "00A4040000");
    let result = session.execute_apdu_command(&mut command).await?;

    assert_eq!(result.status_word, 0x9000);
    assert!(result.is_success());
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(started.elapsed() < session.config().apdu_timeout());
    assert_eq!(command.response_code, Some(vec![0x90, 0x00]));
    assert_eq!(command.response_data, Some(vec![]));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_execute_rejected_while_pending() -> DeviceResult<()> {
    let session = simulated_session(500)?;
    session.connect_and_wait(None).await?;

    let first = {
        let session = session.clone();
        tokio::spawn(async move {
            let mut command = ApduCommand::new(1, "00A4040000");
            session.execute_apdu_command(&mut command).await
        })
    };
    wait_for_pending(&session, 1).await;

    let mut second = ApduCommand::new(2, "00A4040000");
    assert_eq!(
        session.execute_apdu_command(&mut second).await,
        Err(DeviceError::WaitingForApduResponse {
            pending_sequence_id: 1
        })
    );
    assert!(!second.is_answered());

    let first = first.await.expect("first command task")?;
    assert_eq!(first.status_word, 0x9000);
    Ok(())
}

#[tokio::test]
async fn test_simulated_disconnect() -> DeviceResult<()> {
    let session = simulated_session(0)?;
    session.connect_and_wait(None).await?;
    let mut events = session.subscribe();

    session.disconnect().await?;
    assert_eq!(next_event(&mut events).await, DeviceEvent::DeviceDisconnected);
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert!(!session.is_connected().await);
    Ok(())
}

// ----------------------------------------------------------------------------
// Correlation
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_mismatched_response_leaves_command_pending() {
    let (session, handle) = connected_scripted_session().await;

    let task = {
        let session = session.clone();
        tokio::spawn(async move {
            let mut command = ApduCommand::new(7, "00B0000000");
            let result = session.execute_apdu_command(&mut command).await;
            (command, result)
        })
    };
    wait_for_pending(&session, 7).await;

    handle.respond(8, vec![0x90, 0x00]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.pending_sequence_id(), Some(7));
    assert!(!task.is_finished());

    handle.respond(7, vec![0x01, 0x02, 0x90, 0x00]).await.unwrap();
    let (command, result) = task.await.unwrap();
    assert!(result.unwrap().is_success());
    assert_eq!(command.response_data, Some(vec![0x01, 0x02]));

    let stats = session.correlator_stats();
    assert_eq!(stats.responses_matched, 1);
    assert_eq!(stats.dropped_responses, 1);
}

#[tokio::test(start_paused = true)]
async fn test_execute_times_out_and_frees_session() {
    let (session, handle) = connected_scripted_session().await;
    let limit = session.config().apdu_timeout();

    let started = Instant::now();
    let mut command = ApduCommand::new(3, "00A4040000");
    let result = session.execute_apdu_command(&mut command).await;
    assert_eq!(
        result,
        Err(DeviceError::OperationTimeout {
            duration_ms: limit.as_millis() as u64
        })
    );
    assert!(started.elapsed() >= limit);
    assert!(!command.is_answered());

    // The late response goes nowhere
    handle.respond(3, vec![0x90, 0x00]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(session.pending_sequence_id(), None);
    assert_eq!(session.correlator_stats().dropped_responses, 1);

    // And the session accepts the next command straight away
    handle.set_auto_respond(Some(vec![0x90, 0x00]));
    let mut next = ApduCommand::new(4, "00A4040000");
    assert!(session.execute_apdu_command(&mut next).await.is_ok());
}

#[tokio::test]
async fn test_each_command_resolves_exactly_once() {
    let (session, handle) = connected_scripted_session().await;
    handle.set_auto_respond(Some(vec![0x90, 0x00]));

    for sequence in 0..20u16 {
        let mut command = ApduCommand::new(sequence, "80CA9F7F00");
        let result = session.execute_apdu_command(&mut command).await;
        assert!(result.is_ok(), "command {} failed: {:?}", sequence, result);
    }
    // A duplicate response for an already resolved command is dropped
    handle.respond(19, vec![0x90, 0x00]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let stats = session.correlator_stats();
    assert_eq!(stats.commands_sent, 20);
    assert_eq!(stats.responses_matched, 20);
    assert_eq!(stats.dropped_responses, 1);
}

#[tokio::test(start_paused = true)]
async fn test_racing_commands_yield_one_winner() {
    let session = simulated_session(200).expect("simulated session");
    session.connect_and_wait(None).await.unwrap();

    let attempts = (0..5u16).map(|sequence| {
        let session = session.clone();
        async move {
            let mut command = ApduCommand::new(sequence, "00A4040000");
            session.execute_apdu_command(&mut command).await
        }
    });
    let results = futures::future::join_all(attempts).await;

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let busy = results
        .iter()
        .filter(|r| matches!(r, Err(DeviceError::WaitingForApduResponse { .. })))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(busy, 4);
    assert_eq!(session.pending_sequence_id(), None);
}

#[tokio::test]
async fn test_disconnect_fails_pending_command() {
    let (session, handle) = connected_scripted_session().await;

    let task = {
        let session = session.clone();
        tokio::spawn(async move {
            let mut command = ApduCommand::new(5, "00A4040000");
            session.execute_apdu_command(&mut command).await
        })
    };
    wait_for_pending(&session, 5).await;

    handle.complete_disconnect().await.unwrap();
    let result = timeout(Duration::from_secs(1), task)
        .await
        .expect("command should resolve")
        .unwrap();
    assert!(matches!(result, Err(DeviceError::TransportFailure { .. })));
}

#[tokio::test]
async fn test_malformed_command_rejected() {
    let (session, handle) = connected_scripted_session().await;

    let mut command = ApduCommand::new(1, "00A4X");
    assert!(matches!(
        session.execute_apdu_command(&mut command).await,
        Err(DeviceError::MalformedCommand { .. })
    ));
    assert!(handle.sent_sequence_ids().is_empty());
}

// ----------------------------------------------------------------------------
// Connection Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_reconnect_resets_transport_first() {
    let (session, handle) = connected_scripted_session().await;

    session.connect_and_wait(None).await.unwrap();

    let lifecycle: Vec<ConnectorCall> = handle
        .calls()
        .into_iter()
        .filter(|call| matches!(call, ConnectorCall::Connect | ConnectorCall::ResetToDefaultState))
        .collect();
    assert_eq!(
        lifecycle,
        vec![
            ConnectorCall::Connect,
            ConnectorCall::ResetToDefaultState,
            ConnectorCall::Connect
        ]
    );
    assert_eq!(session.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_then_late_success_is_adopted() {
    let (session, handle) = scripted_session();
    let mut events = session.subscribe();

    let result = session.connect_and_wait(Some(Duration::from_secs(2))).await;
    assert_eq!(
        result,
        Err(DeviceError::OperationTimeout { duration_ms: 2000 })
    );
    assert!(matches!(
        next_event(&mut events).await,
        DeviceEvent::ConnectFailed(DeviceError::OperationTimeout { .. })
    ));
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);

    handle.complete_connect(watch()).await.unwrap();
    assert_eq!(next_event(&mut events).await, DeviceEvent::DeviceConnected(watch()));
    assert_eq!(session.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_ignored_after_success() {
    let (session, handle) = scripted_session();
    let mut events = session.subscribe();

    session.connect(Some(Duration::from_secs(1))).await.unwrap();
    handle.complete_connect(watch()).await.unwrap();
    assert_eq!(next_event(&mut events).await, DeviceEvent::DeviceConnected(watch()));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(session.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_change_transport_requires_disconnected() {
    let (session, _old) = connected_scripted_session().await;

    let (replacement, _) = ScriptedConnector::new();
    assert_eq!(
        session.change_transport(Box::new(replacement)).await,
        Err(DeviceError::DeviceShouldBeDisconnected)
    );

    let (session, _old) = scripted_session();
    let (replacement, new_handle) = ScriptedConnector::new();
    new_handle.set_auto_connect(Some(watch()));
    session.change_transport(Box::new(replacement)).await.unwrap();

    let info = session.connect_and_wait(None).await.unwrap();
    assert_eq!(info, watch());
    assert_eq!(new_handle.count(&ConnectorCall::Connect), 1);
}

#[tokio::test]
async fn test_swap_to_simulated_transport() -> DeviceResult<()> {
    let (session, _scripted) = scripted_session();
    let simulated = SimulatedConnector::new(SimulatorConfig::instant())?;
    session.change_transport(Box::new(simulated)).await?;

    let info = session.connect_and_wait(None).await?;
    assert_eq!(info.device_type.as_deref(), Some("WATCH"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_swap_after_connect_timeout_ignores_retired_transport() -> DeviceResult<()> {
    let slow = SimulatedConnector::new(SimulatorConfig {
        connect_delay_ms: 5000,
        ..SimulatorConfig::default()
    })?;
    let session = DeviceSession::new(Box::new(slow), DeviceConfig::testing());

    let result = session.connect_and_wait(Some(Duration::from_secs(1))).await;
    assert_eq!(
        result,
        Err(DeviceError::OperationTimeout { duration_ms: 1000 })
    );

    let (replacement, _handle) = ScriptedConnector::new();
    session.change_transport(Box::new(replacement)).await?;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert!(!session.is_connected().await);
    let mut command = ApduCommand::new(1, "00A4040000");
    assert_eq!(
        session.execute_apdu_command(&mut command).await,
        Err(DeviceError::DeviceNotConnected)
    );

    let (another, _) = ScriptedConnector::new();
    session.change_transport(Box::new(another)).await?;
    Ok(())
}

#[tokio::test]
async fn test_retired_transport_events_are_dropped() {
    let (session, old) = scripted_session();
    let mut events = session.subscribe();
    let (replacement, new_handle) = ScriptedConnector::new();
    session.change_transport(Box::new(replacement)).await.unwrap();
    assert_eq!(old.count(&ConnectorCall::ResetToDefaultState), 1);

    let _ = old.complete_connect(watch()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert!(events.try_recv().is_err());

    session.connect(None).await.unwrap();
    new_handle.complete_connect(watch()).await.unwrap();
    assert_eq!(next_event(&mut events).await, DeviceEvent::DeviceConnected(watch()));
    assert_eq!(session.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_change_transport_refused_while_link_up() {
    let (session, old) = scripted_session();
    old.set_connected(Some(watch()));
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);

    let (replacement, _) = ScriptedConnector::new();
    assert_eq!(
        session.change_transport(Box::new(replacement)).await,
        Err(DeviceError::DeviceShouldBeDisconnected)
    );
    assert_eq!(old.count(&ConnectorCall::ResetToDefaultState), 0);
    assert!(session.is_connected().await);
}

#[tokio::test]
async fn test_stray_connect_failure_keeps_connected_session() {
    let (session, handle) = connected_scripted_session().await;
    let mut events = session.subscribe();

    handle
        .emit(ConnectorEvent::ConnectionFailed {
            reason: "late radio error".into(),
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(session.connection_state(), ConnectionState::Connected);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_peripheral_security_change_tracked() {
    let (session, handle) = connected_scripted_session().await;
    let mut events = session.subscribe();

    handle
        .emit(ConnectorEvent::SecurityStateChanged {
            state: SecurityState::Enabled,
        })
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut events).await,
        DeviceEvent::SecurityStateChanged(SecurityState::Enabled)
    );
    assert_eq!(session.security_state(), SecurityState::Enabled);
}
