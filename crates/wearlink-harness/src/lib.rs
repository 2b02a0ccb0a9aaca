//! Wearlink Harness
//!
//! Connectors and collaborators for exercising a device session without a
//! wearable:
//!
//! - **SimulatedConnector**: fabricates a watch, answers every APDU with `9000`
//!   after a configurable delay
//! - **ScriptedConnector**: a test double driven step by step from the test,
//!   recording every call it receives
//! - **RecordingOutput** and scanning doubles for the RTM router
//!
//! ```rust,ignore
//! use wearlink_harness::{SimulatedConnector, SimulatorConfig};
//! use wearlink_runtime::DeviceSession;
//!
//! let connector = SimulatedConnector::new(SimulatorConfig::instant())?;
//! let session = DeviceSession::new(Box::new(connector), Default::default());
//! let info = session.connect_and_wait(None).await?;
//! assert_eq!(info.device_type.as_deref(), Some("WATCH"));
//! ```

pub mod rtm;
pub mod scripted;
pub mod simulated;

pub use rtm::{RecordingOutput, RecordingPresenter, StaticCardScanner, StaticScannerSource};
pub use scripted::{ConnectorCall, ScriptHandle, ScriptedConnector};
pub use simulated::{SimulatedConnector, SimulatorConfig, TestingType};
