//! # Validation Module
//!
//! Checks run on an enqueue request before anything touches the durable
//! queue.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Feature forms                                                │
//! │  └── Field-level checks, immediate user feedback                       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Enqueue (Rust)                                               │
//! │  ├── THIS MODULE: collection name rules                                │
//! │  └── Mutation::from_parts: primary key present for update/delete       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Remote store                                                 │
//! │  └── Schema, constraints, permissions (rejections are retried and      │
//! │      eventually dead-lettered)                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use fieldops_core::validation::validate_collection_name;
//!
//! assert!(validate_collection_name("shipments").is_ok());
//! assert!(validate_collection_name("").is_err());
//! ```

use crate::error::ValidationError;
use crate::MAX_COLLECTION_NAME_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates a remote collection name.
///
/// ## Rules
/// - Must not be empty
/// - At most 63 characters
/// - Letters, digits and underscores only (the name ends up in a URL path)
///
/// ## Example
/// ```rust
/// use fieldops_core::validation::validate_collection_name;
///
/// assert!(validate_collection_name("stock_movements").is_ok());
/// assert!(validate_collection_name("stock/movements").is_err());
/// ```
pub fn validate_collection_name(name: &str) -> ValidationResult<()> {
    if name.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "target_collection".to_string(),
        });
    }

    if name.len() > MAX_COLLECTION_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "target_collection".to_string(),
            max: MAX_COLLECTION_NAME_LEN,
        });
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::InvalidFormat {
            field: "target_collection".to_string(),
            reason: "must contain only letters, numbers, and underscores".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_collection_names() {
        assert!(validate_collection_name("farmers").is_ok());
        assert!(validate_collection_name("shipments_2024").is_ok());
    }

    #[test]
    fn test_invalid_collection_names() {
        assert!(matches!(
            validate_collection_name("   "),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_collection_name(&"a".repeat(64)),
            Err(ValidationError::TooLong { max: 63, .. })
        ));
        assert!(matches!(
            validate_collection_name("farmers?select=*"),
            Err(ValidationError::InvalidFormat { .. })
        ));
    }
}
