//! Built-in RTM message handlers
//!
//! - `v2`: version negotiation, session data, sync and logout
//! - `v3`: APDU package execution and NFC security state
//! - `v4`: card scanning and SDK version reporting

pub mod v2;
pub mod v3;
pub mod v4;

use wearlink_core::{message_types, RtmProtocolVersion};

use super::registry::MessageTypeRegistry;

pub use v2::{LogoutHandler, SyncHandler, UserDataHandler, VersionHandler};
pub use v3::{ApduPackage, ApduPackageHandler, ApduPackageResult, PackageState, SecurityStateHandler};
pub use v4::{ScanRequestHandler, SdkVersionHandler, CARD_SCANNED_RETRIES, SDK_VERSION_RETRIES};

/// Install the built-in handler tables
pub fn register_defaults(registry: &mut MessageTypeRegistry) {
    registry.register(RtmProtocolVersion::V2, message_types::VERSION, VersionHandler);
    registry.register(RtmProtocolVersion::V2, message_types::USER_DATA, UserDataHandler);
    registry.register(RtmProtocolVersion::V2, message_types::SYNC, SyncHandler);
    registry.register(RtmProtocolVersion::V2, message_types::LOGOUT, LogoutHandler);

    registry.register(RtmProtocolVersion::V3, message_types::APDU_PACKAGE, ApduPackageHandler);
    registry.register(RtmProtocolVersion::V3, message_types::SECURITY_STATE, SecurityStateHandler);

    registry.register(RtmProtocolVersion::V4, message_types::SCAN_REQUEST, ScanRequestHandler);
    registry.register(RtmProtocolVersion::V4, message_types::SDK_VERSION_REQUEST, SdkVersionHandler);
}
