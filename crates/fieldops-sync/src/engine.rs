//! # Sync Engine
//!
//! Delivers the persisted queue to the remote store.
//!
//! ## Drain Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  drain()                                                                │
//! │    │                                                                    │
//! │    ├── offline?               → skipped (Offline)                      │
//! │    ├── guard.try_lock() fails → skipped (Busy)                         │
//! │    ├── load_checked()         → corrupt text quarantined + reported    │
//! │    ├── queue empty?           → skipped (Empty)                        │
//! │    │                                                                    │
//! │    ├── for op in queue  (priority desc, enqueued_at asc)               │
//! │    │     ├── offline now?     → stop; rest carried over unattempted    │
//! │    │     └── timeout(apply)   → Settlement.applied / retained / dead   │
//! │    │                                                                    │
//! │    ├── settle()               → merged into the CURRENT stored queue   │
//! │    └── status + notifications                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Accounting
//! ```text
//! transient (unreachable, timeout, 5xx/408/429)  → kept, attempts unchanged
//! rejected / invalid request                      → attempts + 1
//!     attempts >= max_attempts (when > 0)         → dead letter
//! ```
//!
//! Only one pass or direct apply runs at a time per engine. A caller that
//! finds the guard held gets a skip, never a wait.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use fieldops_core::{DeadLetter, QueuedOperation, RetainedFailure, Settlement};
use fieldops_db::OfflineQueueRepository;

use crate::config::SyncSettings;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{RemoteError, SyncResult};
use crate::remote::{self, RemoteStore};
use crate::status::{SharedStatus, SyncEventEmitter, SyncStatus};

// =============================================================================
// Configuration
// =============================================================================

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rejections before an operation is dead-lettered. 0 disables it.
    pub max_attempts: u32,

    /// Limit for a single remote write.
    pub item_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_attempts: 10,
            item_timeout: Duration::from_secs(15),
        }
    }
}

impl From<&SyncSettings> for EngineConfig {
    fn from(settings: &SyncSettings) -> Self {
        EngineConfig {
            max_attempts: settings.max_attempts,
            item_timeout: settings.item_timeout(),
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Why a pass did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    Offline,
    Busy,
    Empty,
}

/// Result of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    /// Operations confirmed by the remote store.
    pub synced: usize,

    /// Operations that failed (dead-lettered ones included).
    pub failed: usize,

    /// Subset of `failed` moved to the dead-letter list.
    pub dead_lettered: usize,

    /// Operations left unattempted because connectivity dropped.
    pub carried_over: usize,

    /// Queue length after the pass.
    pub remaining: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
}

impl DrainReport {
    fn skipped(reason: SkipReason, remaining: usize) -> Self {
        DrainReport {
            remaining,
            skipped: Some(reason),
            ..DrainReport::default()
        }
    }

    /// A pass ran and every operation it loaded was applied.
    pub fn is_clean(&self) -> bool {
        self.skipped.is_none() && self.failed == 0 && self.carried_over == 0
    }
}

/// Result of an immediate single-operation apply.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Confirmed and removed from the queue.
    Applied,

    /// Attempted and failed; the queue records the failure.
    Failed(RemoteError),

    /// Not attempted; the operation stays queued for the next pass.
    Deferred(SkipReason),

    /// Not attempted; a pass that ran first already took it off the queue.
    AlreadySettled,
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Moves queued operations to the remote store.
pub struct SyncEngine {
    store: OfflineQueueRepository,
    remote: Arc<dyn RemoteStore>,
    connectivity: ConnectivityMonitor,
    status: SharedStatus,
    emitter: Arc<dyn SyncEventEmitter>,
    config: EngineConfig,
    guard: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        store: OfflineQueueRepository,
        remote: Arc<dyn RemoteStore>,
        connectivity: ConnectivityMonitor,
        status: SharedStatus,
        emitter: Arc<dyn SyncEventEmitter>,
        config: EngineConfig,
    ) -> Self {
        SyncEngine {
            store,
            remote,
            connectivity,
            status,
            emitter,
            config,
            guard: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &OfflineQueueRepository {
        &self.store
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn status(&self) -> &SharedStatus {
        &self.status
    }

    pub fn emitter(&self) -> &Arc<dyn SyncEventEmitter> {
        &self.emitter
    }

    /// True while a pass or a direct apply holds the guard.
    pub fn is_busy(&self) -> bool {
        self.guard.try_lock().is_err()
    }

    // -------------------------------------------------------------------------
    // Drain
    // -------------------------------------------------------------------------

    /// Runs one drain pass over the persisted queue.
    ///
    /// Returns a skipped report instead of waiting when offline or when
    /// another pass is running.
    pub async fn drain(&self) -> SyncResult<DrainReport> {
        if !self.connectivity.is_online() {
            debug!("Drain skipped: offline");
            return Ok(DrainReport::skipped(SkipReason::Offline, self.store.count().await?));
        }

        let Ok(_guard) = self.guard.try_lock() else {
            debug!("Drain skipped: already in progress");
            return Ok(DrainReport::skipped(SkipReason::Busy, self.store.count().await?));
        };

        let loaded = self.store.load_checked().await?;
        let quarantine_notice = match loaded.quarantined {
            0 => None,
            count => Some(self.report_quarantine(count)),
        };

        if loaded.operations.is_empty() {
            if let Some(notice) = quarantine_notice {
                self.status.update(|s| s.last_error = Some(notice)).await;
            }
            self.refresh_status().await?;
            return Ok(DrainReport::skipped(SkipReason::Empty, 0));
        }

        let status = self.status.update(|s| s.is_syncing = true).await;
        self.emitter.emit_status(&status);

        let result = self.run_pass(loaded.operations, quarantine_notice).await;

        if let Err(e) = &result {
            error!(error = %e, "Drain pass failed");
            let message = e.to_string();
            // The queue is unchanged and the scheduler retries the pass
            self.emitter.emit_error(&message, true);
            let status = self
                .status
                .update(|s| {
                    s.is_syncing = false;
                    s.last_error = Some(message);
                })
                .await;
            self.emitter.emit_status(&status);
        }

        result
    }

    async fn run_pass(
        &self,
        queue: Vec<QueuedOperation>,
        quarantine_notice: Option<String>,
    ) -> SyncResult<DrainReport> {
        let total = queue.len();
        info!(pending = total, "Drain pass starting");

        let mut settlement = Settlement::new();
        let mut carried_over = 0;

        for (index, op) in queue.into_iter().enumerate() {
            if !self.connectivity.is_online() {
                carried_over = total - index;
                info!(carried_over, "Connectivity lost during drain; stopping");
                break;
            }

            match self.attempt(&op).await {
                Ok(()) => {
                    debug!(
                        operation_id = %op.id,
                        collection = %op.target_collection,
                        kind = op.kind().as_str(),
                        "Operation applied"
                    );
                    settlement.applied.push(op.id);
                }
                Err(err) => self.record_failure(op, err, &mut settlement),
            }
        }

        let remaining = self.store.settle(&settlement).await?;

        let finished_at = Utc::now();
        if let Err(e) = self.store.set_last_sync_time(finished_at).await {
            warn!(error = %e, "Failed to persist last sync time");
        }
        let dead_letter_count = self.dead_letter_count().await;

        let report = DrainReport {
            synced: settlement.applied.len(),
            failed: settlement.failed(),
            dead_lettered: settlement.dead_lettered.len(),
            carried_over,
            remaining,
            skipped: None,
        };

        let last_error = last_failure(&settlement).or(quarantine_notice);
        let status = self
            .status
            .update(|s| {
                s.is_syncing = false;
                s.pending_count = remaining;
                if let Some(count) = dead_letter_count {
                    s.dead_letter_count = count;
                }
                s.last_sync_time = Some(finished_at);
                s.last_error = last_error;
            })
            .await;

        self.notify(&settlement, &report);
        self.emitter.emit_status(&status);

        info!(
            synced = report.synced,
            failed = report.failed,
            dead_lettered = report.dead_lettered,
            carried_over = report.carried_over,
            remaining = report.remaining,
            "Drain pass complete"
        );

        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Direct apply
    // -------------------------------------------------------------------------

    /// Attempts one already-queued operation right away.
    ///
    /// Shares the single-flight guard with [`drain`](Self::drain): if a pass
    /// is running the operation is left for it (or the next one). The stored
    /// copy is what gets sent, so attempts recorded by earlier passes count.
    pub async fn apply_now(&self, op: &QueuedOperation) -> SyncResult<ApplyOutcome> {
        if !self.connectivity.is_online() {
            return Ok(ApplyOutcome::Deferred(SkipReason::Offline));
        }

        let Ok(_guard) = self.guard.try_lock() else {
            debug!(operation_id = %op.id, "Direct apply deferred: drain in progress");
            return Ok(ApplyOutcome::Deferred(SkipReason::Busy));
        };

        // A pass may have run between the append and taking the guard
        let Some(stored) = self.store.find(&op.id).await? else {
            debug!(operation_id = %op.id, "Direct apply skipped: already settled");
            return Ok(ApplyOutcome::AlreadySettled);
        };

        let mut settlement = Settlement::new();
        let outcome = match self.attempt(&stored).await {
            Ok(()) => {
                debug!(operation_id = %stored.id, "Operation applied directly");
                settlement.applied.push(stored.id);
                ApplyOutcome::Applied
            }
            Err(err) => {
                self.record_failure(stored, err.clone(), &mut settlement);
                ApplyOutcome::Failed(err)
            }
        };

        let remaining = self.store.settle(&settlement).await?;
        for dead in &settlement.dead_lettered {
            self.emitter.emit_dead_letter(dead);
        }
        let dead_letter_count = self.dead_letter_count().await;

        let last_error = last_failure(&settlement);
        let status = self
            .status
            .update(|s| {
                s.pending_count = remaining;
                if let Some(count) = dead_letter_count {
                    s.dead_letter_count = count;
                }
                if last_error.is_some() {
                    s.last_error = last_error;
                }
            })
            .await;
        self.emitter.emit_status(&status);

        Ok(outcome)
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    /// Re-reads counts from storage into the shared status and emits it.
    pub async fn refresh_status(&self) -> SyncResult<SyncStatus> {
        let pending = self.store.count().await?;
        let dead_letters = self.store.dead_letters().await?.len();
        let last_sync = self.store.last_sync_time().await?;

        let status = self
            .status
            .update(|s| {
                s.pending_count = pending;
                s.dead_letter_count = dead_letters;
                if last_sync.is_some() {
                    s.last_sync_time = last_sync;
                }
            })
            .await;

        self.emitter.emit_status(&status);
        Ok(status)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn attempt(&self, op: &QueuedOperation) -> Result<(), RemoteError> {
        let limit = self.config.item_timeout;
        match timeout(limit, remote::apply(self.remote.as_ref(), op)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::TimedOut(
                u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }

    fn record_failure(&self, mut op: QueuedOperation, err: RemoteError, settlement: &mut Settlement) {
        let message = err.to_string();

        if err.is_transient() {
            warn!(
                operation_id = %op.id,
                collection = %op.target_collection,
                error = %err,
                "Transient failure; operation stays queued"
            );
            settlement.retained.push(RetainedFailure {
                id: op.id,
                attempts: op.attempts,
                last_error: message,
            });
            return;
        }

        let attempts = op.attempts.saturating_add(1);
        let max = self.config.max_attempts;

        if max > 0 && attempts >= max {
            error!(
                operation_id = %op.id,
                collection = %op.target_collection,
                attempts,
                error = %err,
                "Operation dead-lettered"
            );
            let reason = format!("rejected {attempts} times: {message}");
            op.attempts = attempts;
            op.last_error = Some(message);
            settlement.dead_lettered.push(DeadLetter::new(op, reason));
        } else {
            warn!(
                operation_id = %op.id,
                collection = %op.target_collection,
                attempts,
                error = %err,
                "Operation rejected; will retry"
            );
            settlement.retained.push(RetainedFailure {
                id: op.id,
                attempts,
                last_error: message,
            });
        }
    }

    fn notify(&self, settlement: &Settlement, report: &DrainReport) {
        for dead in &settlement.dead_lettered {
            self.emitter.emit_dead_letter(dead);
        }

        if report.synced > 0 && report.is_clean() {
            self.emitter.emit_complete(report.synced);
        } else if report.synced > 0 {
            self.emitter.emit_progress(report.synced, report.remaining);
        } else if report.failed > 0 || report.carried_over > 0 {
            let message = format!("Sync failed: {} operation(s) still pending", report.remaining);
            self.emitter.emit_error(&message, report.remaining > 0);
        }
    }

    fn report_quarantine(&self, count: usize) -> String {
        error!(count, "Stored queue was unreadable; entries quarantined");
        let message = format!("{count} unreadable queue entries were quarantined");
        self.emitter.emit_error(&message, false);
        message
    }

    async fn dead_letter_count(&self) -> Option<usize> {
        match self.store.dead_letters().await {
            Ok(letters) => Some(letters.len()),
            Err(e) => {
                warn!(error = %e, "Failed to read dead-letter list");
                None
            }
        }
    }
}

fn last_failure(settlement: &Settlement) -> Option<String> {
    settlement
        .dead_lettered
        .last()
        .map(|dead| dead.reason.clone())
        .or_else(|| settlement.retained.last().map(|f| f.last_error.clone()))
}
