//! Error types for the scan flow.
//!
//! Detection-level problems (`DetectionIssue`) are tolerated and counted.
//! Everything here is surfaced to the caller.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::time::Duration;

/// Failures of the history store.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("could not encode or decode record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("a record with id {0} already exists")]
    DuplicateId(String),

    #[error("history store lock was poisoned")]
    Poisoned,

    #[error("could not prepare history directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a scan or of reading scan results.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// Detection request exceeded the configured bound
    #[error("detection request timed out after {after:?}")]
    Timeout { after: Duration },

    /// Transport-level failure before a response arrived
    #[error("could not reach detection service: {0}")]
    Network(String),

    #[error("detection service returned status {status}: {message}")]
    ServiceStatus { status: u16, message: String },

    #[error("detection service returned a malformed body: {0}")]
    MalformedResponse(String),

    #[error("detection service reported failure: {0}")]
    Unsuccessful(String),

    /// The result could not be saved or history could not be read
    #[error("scan history unavailable: {0}")]
    Persistence(#[from] HistoryError),

    #[error("could not read image: {0}")]
    Image(String),

    #[error("a scan is already in progress")]
    ScanInProgress,

    #[error("settings error: {0}")]
    Settings(String),
}

impl ScanError {
    /// Stable code for the presentation layer.
    pub fn code(&self) -> &'static str {
        match self {
            ScanError::Timeout { .. } => "TIMEOUT",
            ScanError::Network(_) => "NETWORK_ERROR",
            ScanError::ServiceStatus { .. } => "SERVICE_STATUS",
            ScanError::MalformedResponse(_) => "MALFORMED_RESPONSE",
            ScanError::Unsuccessful(_) => "SERVICE_UNSUCCESSFUL",
            ScanError::Persistence(_) => "PERSISTENCE_ERROR",
            ScanError::Image(_) => "IMAGE_UNREADABLE",
            ScanError::ScanInProgress => "SCAN_IN_PROGRESS",
            ScanError::Settings(_) => "SETTINGS_ERROR",
        }
    }

    /// Errors from the detection boundary; the user may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScanError::Timeout { .. }
                | ScanError::Network(_)
                | ScanError::ServiceStatus { .. }
                | ScanError::MalformedResponse(_)
                | ScanError::Unsuccessful(_)
        )
    }

    pub fn is_persistence(&self) -> bool {
        matches!(self, ScanError::Persistence(_))
    }
}

impl Serialize for ScanError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ScanError", 2)?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}
