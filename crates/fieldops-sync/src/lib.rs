//! # fieldops-sync: Offline Queue Sync for FieldOps
//!
//! Lets field devices keep working without a network. Every write is stored
//! in a durable queue first and delivered to the remote store when the
//! device is (or becomes) online.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Agent Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      SyncAgent (session)                         │  │
//! │  │                                                                  │  │
//! │  │  Built once at start-up, used through cloneable handles          │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Enqueuer       │  │ SyncScheduler  │  │ Connectivity           │    │
//! │  │                │  │                │  │                        │    │
//! │  │ validate,      │  │ reconnect,     │  │ watch channel fed by   │    │
//! │  │ write-ahead,   │  │ back-off retry,│  │ TCP probe or the host  │    │
//! │  │ direct apply   │  │ optional poll  │  │ application            │    │
//! │  └───────┬────────┘  └───────┬────────┘  └────────────────────────┘    │
//! │          └─────────┬─────────┘                                          │
//! │                    ▼                                                    │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │ SyncEngine: single-flight drain, per-item timeout, dead letters  │  │
//! │  └──────────────┬───────────────────────────────┬───────────────────┘  │
//! │                 ▼                               ▼                       │
//! │   fieldops-db (SQLite queue)        RemoteStore (REST / custom)        │
//! │                                                                         │
//! │  EVENTS (SyncEventEmitter):                                            │
//! │  • status   • progress   • complete   • error   • dead letter          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - `SyncAgent`, its builder and handle
//! - [`config`] - TOML configuration with environment overrides
//! - [`connectivity`] - Online/offline signal and reachability probe
//! - [`engine`] - Drain passes and direct apply
//! - [`enqueuer`] - Write-ahead enqueue
//! - [`error`] - Remote and sync error types
//! - [`remote`] - `RemoteStore` trait
//! - [`rest`] - PostgREST-style HTTP remote store
//! - [`scheduler`] - When passes run
//! - [`status`] - Status snapshot and event emitter
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fieldops_sync::{SyncAgentBuilder, SyncConfig};
//! use fieldops_db::{Database, DbConfig};
//!
//! let config = SyncConfig::load_or_default(None);
//! let db = Database::new(DbConfig::new(config.database_path())).await?;
//!
//! let mut agent = SyncAgentBuilder::new(config).with_database(db).build()?;
//! let handle = agent.start().await?;
//! let result = handle
//!     .queue_operation("shipments", OperationKind::Update, payload, 0)
//!     .await?;
//! println!("synced: {}, queued: {}", result.synced, result.queued);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod enqueuer;
pub mod error;
pub mod remote;
pub mod rest;
pub mod scheduler;
pub mod status;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{SyncAgent, SyncAgentBuilder, SyncAgentHandle};
pub use config::SyncConfig;
pub use connectivity::{ConnectivityMonitor, ProbeConfig, ReachabilityProbe};
pub use engine::{ApplyOutcome, DrainReport, EngineConfig, SkipReason, SyncEngine};
pub use enqueuer::{EnqueueResult, OperationEnqueuer};
pub use error::{RemoteError, SyncError, SyncResult};
pub use remote::RemoteStore;
pub use rest::{RestConfig, RestRemoteStore};
pub use scheduler::{SchedulerConfig, SyncTrigger};
pub use status::{NoOpEmitter, SyncEventEmitter, SyncStatus};
