//! Card scanning collaborators
//!
//! The host may inject a scanning capability and a presenter for its UI. The
//! protocol engine never knows how a card is scanned.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Card data captured by a scanner
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedCardInfo {
    pub pan: Option<String>,
    pub expiration_month: Option<u8>,
    pub expiration_year: Option<u16>,
    pub cvv: Option<String>,
}

/// How a scan session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Scanned(ScannedCardInfo),
    Cancelled,
}

/// A single scanning session
#[async_trait]
pub trait CardScanner: Send + Sync {
    /// Run the scan until the user captures a card or cancels
    async fn scan(&self) -> ScanOutcome;
}

/// Supplies a scanner for each scan request
pub trait CardScannerDataSource: Send + Sync {
    fn card_scanner(&self) -> Arc<dyn CardScanner>;
}

/// Shows and hides the scanning UI; advisory only
pub trait CardScannerPresenter: Send + Sync {
    fn present(&self, scanner: &Arc<dyn CardScanner>);
    fn dismiss(&self, scanner: &Arc<dyn CardScanner>);
}
