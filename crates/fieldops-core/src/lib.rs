//! # fieldops-core: Pure Domain Logic for the Offline Write Queue
//!
//! This crate holds everything about queued writes that can be expressed
//! without touching a disk or a socket.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      FieldOps Sync Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            Feature code (farmers, shipments, stock...)          │   │
//! │  │              queue_operation(table, kind, payload)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 fieldops-sync (enqueue / drain)                 │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ fieldops-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌────────────┐                  │   │
//! │  │   │   types   │  │   queue   │  │ validation │                  │   │
//! │  │   │ Mutation  │  │ ordering  │  │ collection │                  │   │
//! │  │   │ QueuedOp  │  │ settlement│  │ names/keys │                  │   │
//! │  │   └───────────┘  └───────────┘  └────────────┘                  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                fieldops-db (durable queue store)                │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - `QueuedOperation`, `Mutation`, `DeadLetter` and friends
//! - [`queue`] - Queue ordering and drain settlement
//! - [`validation`] - Collection name and primary key rules
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use fieldops_core::{Mutation, OperationKind, QueuedOperation, queue::sort_queue};
//! use serde_json::json;
//!
//! let payload = json!({ "id": "F1", "name": "A" }).as_object().cloned().unwrap();
//! let low = QueuedOperation::new("farmers", Mutation::from_parts(OperationKind::Insert, payload).unwrap(), 5);
//!
//! let payload = json!({ "id": "S1", "status": "delivered" }).as_object().cloned().unwrap();
//! let high = QueuedOperation::new("shipments", Mutation::from_parts(OperationKind::Update, payload).unwrap(), 9);
//!
//! let mut queue = vec![low, high];
//! sort_queue(&mut queue);
//! assert_eq!(queue[0].target_collection, "shipments");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod queue;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, ValidationError};
pub use queue::{RetainedFailure, Settlement};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Priority used when a caller does not pass one.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Field that carries the primary key inside a record payload.
///
/// The remote store addresses updates and deletes by this field.
pub const PRIMARY_KEY_FIELD: &str = "id";

/// Maximum length of a remote collection name.
pub const MAX_COLLECTION_NAME_LEN: usize = 63;
