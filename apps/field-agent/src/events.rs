//! Sync notifications rendered as log lines.

use fieldops_core::DeadLetter;
use fieldops_sync::{SyncEventEmitter, SyncStatus};
use tracing::{debug, error, info, warn};

/// Emits every sync event through `tracing`.
pub struct LogEmitter;

impl SyncEventEmitter for LogEmitter {
    fn emit_status(&self, status: &SyncStatus) {
        debug!(
            online = status.is_online,
            syncing = status.is_syncing,
            pending = status.pending_count,
            dead_letters = status.dead_letter_count,
            "sync://status"
        );
    }

    fn emit_progress(&self, synced: usize, pending: usize) {
        info!(synced, pending, "{} synced, {} pending", synced, pending);
    }

    fn emit_complete(&self, synced: usize) {
        info!(synced, "All {} queued changes synced", synced);
    }

    fn emit_error(&self, message: &str, retryable: bool) {
        if retryable {
            warn!(retryable, "{}", message);
        } else {
            error!(retryable, "{}", message);
        }
    }

    fn emit_dead_letter(&self, dead_letter: &DeadLetter) {
        error!(
            operation_id = %dead_letter.operation.id,
            collection = %dead_letter.operation.target_collection,
            reason = %dead_letter.reason,
            "Operation moved to dead-letter list"
        );
    }
}
