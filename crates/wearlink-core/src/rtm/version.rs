//! RTM protocol versions and message-type names

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::errors::RtmError;

/// Protocol versions understood by the router, oldest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RtmProtocolVersion {
    V2,
    V3,
    V4,
}

impl RtmProtocolVersion {
    pub const OLDEST: RtmProtocolVersion = RtmProtocolVersion::V2;
    pub const LATEST: RtmProtocolVersion = RtmProtocolVersion::V4;
    pub const ALL: [RtmProtocolVersion; 3] = [
        RtmProtocolVersion::V2,
        RtmProtocolVersion::V3,
        RtmProtocolVersion::V4,
    ];

    pub fn as_u8(self) -> u8 {
        match self {
            RtmProtocolVersion::V2 => 2,
            RtmProtocolVersion::V3 => 3,
            RtmProtocolVersion::V4 => 4,
        }
    }

    /// The version this one falls back to for unknown types
    pub fn previous(self) -> Option<RtmProtocolVersion> {
        match self {
            RtmProtocolVersion::V2 => None,
            RtmProtocolVersion::V3 => Some(RtmProtocolVersion::V2),
            RtmProtocolVersion::V4 => Some(RtmProtocolVersion::V3),
        }
    }

    /// Pick the version to speak with a peer requesting `requested`
    pub fn negotiate(requested: u8) -> RtmProtocolVersion {
        if requested >= Self::LATEST.as_u8() {
            Self::LATEST
        } else {
            Self::try_from(requested).unwrap_or(Self::OLDEST)
        }
    }
}

impl TryFrom<u8> for RtmProtocolVersion {
    type Error = RtmError;

    fn try_from(value: u8) -> Result<Self, RtmError> {
        match value {
            2 => Ok(RtmProtocolVersion::V2),
            3 => Ok(RtmProtocolVersion::V3),
            4 => Ok(RtmProtocolVersion::V4),
            version => Err(RtmError::UnsupportedVersion { version }),
        }
    }
}

impl fmt::Display for RtmProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_u8())
    }
}

/// Wire names of RTM message types
pub mod message_types {
    // v2
    pub const VERSION: &str = "version";
    pub const USER_DATA: &str = "userData";
    pub const SYNC: &str = "sync";
    pub const LOGOUT: &str = "logout";
    pub const RESOLVE: &str = "resolve";
    pub const DEVICE_STATUS: &str = "deviceStatus";

    // v3
    pub const APDU_PACKAGE: &str = "apduPackage";
    pub const APDU_PACKAGE_RESULT: &str = "apduPackageResult";
    pub const SECURITY_STATE: &str = "securityState";

    // v4
    pub const SCAN_REQUEST: &str = "scanRequest";
    pub const CARD_SCANNED: &str = "cardScanned";
    pub const SDK_VERSION_REQUEST: &str = "sdkVersionRequest";
    pub const SDK_VERSION: &str = "sdkVersion";

    // device-originated
    pub const TRANSACTION_NOTIFICATION: &str = "transactionNotification";
    pub const APPLICATION_CONTROL: &str = "applicationControl";
}
