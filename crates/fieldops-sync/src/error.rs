//! # Sync Error Types
//!
//! Error types for remote writes and the sync API.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  RemoteError (one remote write)                                        │
//! │  ┌──────────────────────────────┐  ┌─────────────────────────────────┐ │
//! │  │  TRANSIENT (never counted)   │  │  PERMANENT (counted toward      │ │
//! │  │                              │  │  dead-lettering)                │ │
//! │  │  Unreachable                 │  │  Rejected {status, message}     │ │
//! │  │  TimedOut                    │  │  InvalidRequest                 │ │
//! │  │  Unavailable (5xx/408/429)   │  │                                 │ │
//! │  └──────────────────────────────┘  └─────────────────────────────────┘ │
//! │                                                                         │
//! │  SyncError (what callers see)                                          │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │  Input/Storage  │  │     Internal            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Validation     │  │  ChannelError           │ │
//! │  │  MissingDeviceId│  │  Storage        │  │  ShuttingDown           │ │
//! │  │  InvalidUrl     │  │  Remote         │  │  Internal               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use fieldops_core::{CoreError, ValidationError};
use fieldops_db::DbError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// Remote Error
// =============================================================================

/// Failure of a single remote write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The remote store could not be reached (DNS, TCP, TLS).
    #[error("Remote store unreachable: {0}")]
    Unreachable(String),

    /// The write did not complete within the per-item timeout.
    #[error("Remote write timed out after {0} ms")]
    TimedOut(u64),

    /// The remote store answered but is temporarily unable to serve.
    #[error("Remote store unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },

    /// The remote store refused the write (constraint, permission, schema).
    #[error("Remote store rejected write (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The request could not be built from the queued operation.
    #[error("Invalid remote request: {0}")]
    InvalidRequest(String),
}

impl RemoteError {
    /// Classifies an HTTP error status.
    ///
    /// ```text
    /// 5xx, 408, 429  → Unavailable (transient)
    /// other 4xx      → Rejected
    /// ```
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status >= 500 || status == 408 || status == 429 {
            RemoteError::Unavailable { status, message }
        } else {
            RemoteError::Rejected { status, message }
        }
    }

    /// Returns true if retrying the same write later may succeed without
    /// any change to it. Transient failures never count toward dead-lettering.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Unreachable(_) | RemoteError::TimedOut(_) | RemoteError::Unavailable { .. }
        )
    }
}

// =============================================================================
// Sync Error
// =============================================================================

/// Sync error type covering everything the sync API can report.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Missing device ID.
    #[error("Device ID not configured")]
    MissingDeviceId,

    /// Invalid remote or probe address.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Input Errors
    // =========================================================================
    /// The enqueue request was rejected before anything was stored.
    #[error("Invalid operation: {0}")]
    Validation(#[from] ValidationError),

    /// Unknown operation kind tag.
    #[error(transparent)]
    Core(#[from] CoreError),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// The local queue store failed.
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// A remote write failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal sync agent error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the failed call can be retried unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_transient(),
            SyncError::Storage(DbError::PoolExhausted) => true,
            SyncError::ChannelError(_) => true,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the caller's input was rejected.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            SyncError::Validation(_) | SyncError::Core(CoreError::UnknownKind(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(RemoteError::from_status(503, "down").is_transient());
        assert!(RemoteError::from_status(429, "slow down").is_transient());
        assert!(RemoteError::from_status(408, "timeout").is_transient());
        assert!(!RemoteError::from_status(409, "duplicate key").is_transient());
        assert!(!RemoteError::from_status(403, "rls").is_transient());

        assert!(RemoteError::Unreachable("dns".into()).is_transient());
        assert!(RemoteError::TimedOut(15_000).is_transient());
        assert!(!RemoteError::InvalidRequest("bad key".into()).is_transient());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Remote(RemoteError::Unreachable("x".into())).is_retryable());
        assert!(!SyncError::Remote(RemoteError::from_status(400, "bad")).is_retryable());
        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::MissingDeviceId.is_retryable());
    }

    #[test]
    fn test_validation_category() {
        let err: SyncError = ValidationError::Required {
            field: "target_collection".into(),
        }
        .into();
        assert!(err.is_validation_error());
        assert!(!err.is_config_error());
    }
}
