//! # Operation Enqueuer
//!
//! Entry point for writes made while the device may be offline.
//!
//! ```text
//! queue_operation(collection, kind, payload, priority)
//!   │
//!   ├── validate (collection name, primary key)    → Err, nothing stored
//!   ├── append to the durable queue                → write-ahead
//!   │
//!   ├── offline                                    → queued
//!   └── online → engine.apply_now()
//!         ├── Applied                              → synced
//!         ├── Failed                               → queued, retry armed
//!         ├── AlreadySettled (a pass ran first)    → synced, or dead-lettered
//!         └── Deferred (drain running)             → queued, drain requested
//! ```
//!
//! An operation is never sent before it is stored, so a crash between the
//! two leaves it queued rather than lost.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use fieldops_core::validation::validate_collection_name;
use fieldops_core::{Mutation, OperationKind, QueuedOperation, Record};

use crate::engine::{ApplyOutcome, SkipReason, SyncEngine};
use crate::error::SyncResult;
use crate::scheduler::SyncTrigger;

/// What happened to a newly queued operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResult {
    pub operation_id: String,

    /// Confirmed by the remote store before returning.
    pub synced: bool,

    /// Still in the queue.
    pub queued: bool,

    /// Why an immediate apply did not succeed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EnqueueResult {
    fn synced(operation_id: String) -> Self {
        EnqueueResult {
            operation_id,
            synced: true,
            queued: false,
            error: None,
        }
    }

    fn queued(operation_id: String, error: Option<String>) -> Self {
        EnqueueResult {
            operation_id,
            synced: false,
            queued: true,
            error,
        }
    }
}

/// Validates, persists, and opportunistically applies new writes.
#[derive(Clone)]
pub struct OperationEnqueuer {
    engine: Arc<SyncEngine>,
    triggers: mpsc::Sender<SyncTrigger>,
}

impl OperationEnqueuer {
    pub fn new(engine: Arc<SyncEngine>, triggers: mpsc::Sender<SyncTrigger>) -> Self {
        OperationEnqueuer { engine, triggers }
    }

    /// Queues a write given as a kind tag plus payload.
    ///
    /// Update and delete payloads must carry the primary key.
    pub async fn queue_operation(
        &self,
        target_collection: &str,
        kind: OperationKind,
        payload: Record,
        priority: i32,
    ) -> SyncResult<EnqueueResult> {
        let mutation = Mutation::from_parts(kind, payload)?;
        self.queue_mutation(target_collection, mutation, priority).await
    }

    /// Queues an already-built mutation.
    pub async fn queue_mutation(
        &self,
        target_collection: &str,
        mutation: Mutation,
        priority: i32,
    ) -> SyncResult<EnqueueResult> {
        validate_collection_name(target_collection)?;

        let op = QueuedOperation::new(target_collection, mutation, priority);
        let operation_id = op.id.clone();
        let pending = self.engine.store().append(op.clone()).await?;

        info!(
            operation_id = %operation_id,
            collection = %op.target_collection,
            kind = op.kind().as_str(),
            priority,
            pending,
            "Operation queued"
        );

        let result = match self.engine.apply_now(&op).await {
            Ok(ApplyOutcome::Applied) => EnqueueResult::synced(operation_id),
            Ok(ApplyOutcome::Failed(err)) => {
                self.notify(SyncTrigger::RetryLater);
                EnqueueResult::queued(operation_id, Some(err.to_string()))
            }
            Ok(ApplyOutcome::Deferred(SkipReason::Busy)) => {
                self.notify(SyncTrigger::Enqueued);
                EnqueueResult::queued(operation_id, None)
            }
            Ok(ApplyOutcome::Deferred(_)) => EnqueueResult::queued(operation_id, None),
            Ok(ApplyOutcome::AlreadySettled) => self.settled_elsewhere(operation_id).await?,
            Err(e) => {
                // Already stored; the next pass will pick it up
                warn!(operation_id = %operation_id, error = %e, "Direct apply failed");
                self.notify(SyncTrigger::RetryLater);
                EnqueueResult::queued(operation_id, Some(e.to_string()))
            }
        };

        if !result.synced {
            if let Err(e) = self.engine.refresh_status().await {
                warn!(error = %e, "Failed to refresh sync status");
            }
        }

        Ok(result)
    }

    /// A pass delivered or dead-lettered the operation before the direct
    /// apply got the guard.
    async fn settled_elsewhere(&self, operation_id: String) -> SyncResult<EnqueueResult> {
        let dead = self
            .engine
            .store()
            .dead_letters()
            .await?
            .into_iter()
            .find(|dead| dead.operation.id == operation_id);

        Ok(match dead {
            Some(dead) => EnqueueResult {
                operation_id,
                synced: false,
                queued: false,
                error: Some(dead.reason),
            },
            None => EnqueueResult::synced(operation_id),
        })
    }

    fn notify(&self, trigger: SyncTrigger) {
        match self.triggers.try_send(trigger) {
            Ok(()) => {}
            // A pending trigger already covers this one
            Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Closed(_)) => {
                debug!(?trigger, "No scheduler running; trigger dropped");
            }
        }
    }
}
