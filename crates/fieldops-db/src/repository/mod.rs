//! # Repository Module
//!
//! Database repository implementations for FieldOps.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  fieldops-sync                                                         │
//! │       │                                                                 │
//! │       │  db.queue().append(op)                                         │
//! │       ▼                                                                 │
//! │  OfflineQueueRepository (queue.rs)                                     │
//! │  ├── load / load_checked / count                                       │
//! │  ├── append / replace / settle / clear                                 │
//! │  ├── dead_letters / requeue_dead_letter / discard_dead_letter          │
//! │  └── quarantined / last_sync_time / set_last_sync_time                 │
//! │       │                                                                 │
//! │       │  whole JSON documents                                           │
//! │       ▼                                                                 │
//! │  kv.rs  (get / put / reserve on kv_store)                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`queue::OfflineQueueRepository`] - Pending queue, dead letters, quarantine

pub mod kv;
pub mod queue;
