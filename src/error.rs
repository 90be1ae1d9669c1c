//! Error taxonomy shared by the stores, the orchestrator and the kitchen
//! controller.
//!
//! A merge silently resolving a stale write is *not* an error; it is counted
//! in [`crate::merge::MergeReport`] and logged at debug level.

use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Network or canonical store unavailable. Pushes stay queued.
    #[error("order store unavailable: {0}")]
    Transient(String),

    /// Malformed draft or illegal transition. Never queued for retry.
    #[error("invalid order: {0}")]
    Validation(String),

    /// The order (or item) no longer exists in the store.
    #[error("not found: {0}")]
    NotFound(String),

    /// Local SQLite failure on this device.
    #[error("local storage error: {0}")]
    Storage(String),
}

impl SyncError {
    /// Whether a push that failed with this error should stay in the queue.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transient(_) | SyncError::Storage(_))
    }

    /// Short message suitable for a toast on the POS or kitchen screen.
    pub fn operator_message(&self) -> String {
        match self {
            SyncError::Transient(_) => "Connection problem, change not saved".to_string(),
            SyncError::Validation(msg) => msg.clone(),
            SyncError::NotFound(_) => "Order no longer exists".to_string(),
            SyncError::Storage(_) => "Local storage error".to_string(),
        }
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}
