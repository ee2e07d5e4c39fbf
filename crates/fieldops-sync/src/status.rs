//! # Sync Status & Events
//!
//! What the rest of the application can observe about syncing.
//!
//! ## Events
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SyncEventEmitter                                                       │
//! │                                                                         │
//! │  emit_status(status)          any status change                        │
//! │  emit_complete(synced)        a pass applied everything it attempted   │
//! │  emit_progress(synced, left)  "N synced, M pending"                    │
//! │  emit_error(msg, retryable)   nothing applied / storage quarantined    │
//! │  emit_dead_letter(letter)     one per poison operation                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use fieldops_core::DeadLetter;

use crate::connectivity::ConnectivityMonitor;

// =============================================================================
// Sync Status
// =============================================================================

/// Current sync status for external queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Connectivity signal at the time of the snapshot.
    pub is_online: bool,

    /// A drain pass is running.
    pub is_syncing: bool,

    /// Length of the persisted queue.
    pub pending_count: usize,

    /// Operations parked in the dead-letter list.
    pub dead_letter_count: usize,

    /// When the last drain pass completed.
    pub last_sync_time: Option<DateTime<Utc>>,

    /// Last failure message, cleared by a clean pass.
    pub last_error: Option<String>,
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives sync notifications (UI toasts, logs, metrics).
///
/// Called inline from the engine: implementations must not block.
pub trait SyncEventEmitter: Send + Sync {
    /// Emits a status change.
    fn emit_status(&self, status: &SyncStatus);

    /// Some operations were applied, some remain.
    fn emit_progress(&self, synced: usize, pending: usize);

    /// Every attempted operation was applied.
    fn emit_complete(&self, synced: usize);

    /// Nothing could be applied, or local storage needed attention.
    fn emit_error(&self, message: &str, retryable: bool);

    /// An operation was moved to the dead-letter list.
    fn emit_dead_letter(&self, dead_letter: &DeadLetter);
}

/// No-op event emitter.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_progress(&self, _synced: usize, _pending: usize) {}
    fn emit_complete(&self, _synced: usize) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
    fn emit_dead_letter(&self, _dead_letter: &DeadLetter) {}
}

// =============================================================================
// Shared Status
// =============================================================================

/// Status shared between the engine, the enqueuer and handles.
///
/// `is_online` is never stored: it is read from the monitor on every snapshot.
#[derive(Debug, Clone)]
pub struct SharedStatus {
    inner: Arc<RwLock<SyncStatus>>,
    connectivity: ConnectivityMonitor,
}

impl SharedStatus {
    pub fn new(connectivity: ConnectivityMonitor) -> Self {
        SharedStatus {
            inner: Arc::new(RwLock::new(SyncStatus::default())),
            connectivity,
        }
    }

    /// Returns a snapshot.
    pub async fn snapshot(&self) -> SyncStatus {
        let mut status = self.inner.read().await.clone();
        status.is_online = self.connectivity.is_online();
        status
    }

    /// Applies `f` and returns the resulting snapshot.
    pub async fn update<F>(&self, f: F) -> SyncStatus
    where
        F: FnOnce(&mut SyncStatus),
    {
        let mut guard = self.inner.write().await;
        f(&mut guard);
        guard.is_online = self.connectivity.is_online();
        guard.clone()
    }
}

// =============================================================================
// Test Emitter
// =============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// One recorded notification.
    #[derive(Debug, Clone, PartialEq)]
    pub enum SyncEvent {
        Status(SyncStatus),
        Progress { synced: usize, pending: usize },
        Complete(usize),
        Error { message: String, retryable: bool },
        DeadLetter(String),
    }

    /// Records every notification.
    #[derive(Default)]
    pub struct RecordingEmitter {
        events: Mutex<Vec<SyncEvent>>,
    }

    impl RecordingEmitter {
        pub fn events(&self) -> Vec<SyncEvent> {
            self.events.lock().unwrap().clone()
        }

        /// Events other than status updates.
        pub fn notices(&self) -> Vec<SyncEvent> {
            self.events()
                .into_iter()
                .filter(|event| !matches!(event, SyncEvent::Status(_)))
                .collect()
        }

        fn push(&self, event: SyncEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl SyncEventEmitter for RecordingEmitter {
        fn emit_status(&self, status: &SyncStatus) {
            self.push(SyncEvent::Status(status.clone()));
        }

        fn emit_progress(&self, synced: usize, pending: usize) {
            self.push(SyncEvent::Progress { synced, pending });
        }

        fn emit_complete(&self, synced: usize) {
            self.push(SyncEvent::Complete(synced));
        }

        fn emit_error(&self, message: &str, retryable: bool) {
            self.push(SyncEvent::Error {
                message: message.to_string(),
                retryable,
            });
        }

        fn emit_dead_letter(&self, dead_letter: &DeadLetter) {
            self.push(SyncEvent::DeadLetter(dead_letter.operation.id.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_camel_case() {
        let status = SyncStatus {
            pending_count: 3,
            ..SyncStatus::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["pendingCount"], 3);
        assert_eq!(value["isOnline"], false);
        assert!(value["lastSyncTime"].is_null());
    }

    #[tokio::test]
    async fn test_online_flag_is_read_live() {
        let monitor = ConnectivityMonitor::new(false);
        let shared = SharedStatus::new(monitor.clone());

        assert!(!shared.snapshot().await.is_online);
        monitor.set_online(true);
        assert!(shared.snapshot().await.is_online);

        let updated = shared.update(|s| s.pending_count = 2).await;
        assert!(updated.is_online);
        assert_eq!(updated.pending_count, 2);
    }
}
