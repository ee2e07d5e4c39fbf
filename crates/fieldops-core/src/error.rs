//! # Error Types
//!
//! Domain-specific error types for fieldops-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  fieldops-core errors (this file)                                      │
//! │  ├── CoreError        - Malformed queue records                        │
//! │  └── ValidationError  - Rejected enqueue requests                      │
//! │                                                                         │
//! │  fieldops-db errors (separate crate)                                   │
//! │  └── DbError          - Local storage failures                         │
//! │                                                                         │
//! │  fieldops-sync errors (separate crate)                                 │
//! │  ├── RemoteError      - One remote write failed                        │
//! │  └── SyncError        - What callers of the sync API see               │
//! │                                                                         │
//! │  Flow: ValidationError → SyncError → caller                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::OperationKind;

// =============================================================================
// Core Error
// =============================================================================

/// Errors raised while decoding or manipulating queue records.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A stored record has a `kind` tag this build does not know.
    ///
    /// ## When This Occurs
    /// - The queue was written by a newer build with an extra operation kind
    /// - The stored JSON was edited by hand
    #[error("Unknown operation kind: '{0}'")]
    UnknownKind(String),

    /// A stored record could not be decoded.
    #[error("Malformed queued operation: {0}")]
    MalformedRecord(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before anything is written to the durable queue, so a rejected
/// request never leaves a record behind.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (e.g., bad collection name).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Update/Delete payload without a usable primary key.
    #[error("{kind} requires a string or integer '{field}' in the payload")]
    MissingPrimaryKey { kind: OperationKind, field: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
