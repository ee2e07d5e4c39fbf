//! # fieldops-db: Durable Queue Storage for FieldOps
//!
//! This crate keeps the offline write queue on the device. It uses SQLite
//! for local storage with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        FieldOps Data Flow                               │
//! │                                                                         │
//! │  fieldops-sync (enqueue / drain / settle)                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   fieldops-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐   ┌────────────┐ │   │
//! │  │   │   Database    │    │    Repositories    │   │ Migrations │ │   │
//! │  │   │   (pool.rs)   │    │    (queue.rs)      │   │ (embedded) │ │   │
//! │  │   │               │    │                    │   │            │ │   │
//! │  │   │ SqlitePool    │◄───│ OfflineQueueRepo   │   │ 001_offline│ │   │
//! │  │   │ WAL, NORMAL   │    │ kv helpers         │   │  _queue    │ │   │
//! │  │   └───────────────┘    └────────────────────┘   └────────────┘ │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/fieldops/fieldops.db  (kv_store table)            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - The offline queue repository
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fieldops_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/fieldops.db")).await?;
//!
//! let pending = db.queue().append(op).await?;
//! let queue = db.queue().load().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::queue::{LoadedQueue, OfflineQueueRepository};
