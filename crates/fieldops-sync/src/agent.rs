//! # Sync Agent
//!
//! Wires storage, connectivity, the engine and the scheduler into one
//! session that the application starts once and talks to through a handle.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         SyncAgent                                │  │
//! │  │                                                                  │  │
//! │  │  • Builds the engine from config, database and remote store      │  │
//! │  │  • start(): reachability probe + scheduler, returns a handle     │  │
//! │  │  • SyncAgentHandle: cloneable API for the rest of the app        │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Reachability   │  │ SyncScheduler  │  │ OperationEnqueuer      │    │
//! │  │ Probe          │  │                │  │                        │    │
//! │  │ TCP dial →     │  │ reconnect,     │  │ write-ahead, then      │    │
//! │  │ monitor        │  │ retry, poll    │  │ direct apply           │    │
//! │  └────────────────┘  └───────┬────────┘  └───────────┬────────────┘    │
//! │                              └──────────┬────────────┘                  │
//! │                                         ▼                               │
//! │                                   SyncEngine                            │
//! │                                                                         │
//! │  EVENTS (SyncEventEmitter):                                            │
//! │  status · progress "N synced, M pending" · complete · error ·          │
//! │  dead letter                                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let db = Database::new(DbConfig::new(config.database_path())).await?;
//! let mut agent = SyncAgentBuilder::new(config).with_database(db).build()?;
//! let handle = agent.start().await?;
//!
//! handle.queue_operation("shipments", OperationKind::Update, payload, 0).await?;
//! ```

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use fieldops_core::{DeadLetter, Mutation, OperationKind, QuarantinedEntry, QueuedOperation, Record};
use fieldops_db::Database;

use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, ProbeConfig, ProbeHandle, ReachabilityProbe};
use crate::engine::{DrainReport, EngineConfig, SyncEngine};
use crate::enqueuer::{EnqueueResult, OperationEnqueuer};
use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteStore, UnconfiguredRemote};
use crate::rest::{RestConfig, RestRemoteStore};
use crate::scheduler::{SchedulerConfig, SchedulerHandle, SyncScheduler, SyncTrigger};
use crate::status::{NoOpEmitter, SharedStatus, SyncEventEmitter, SyncStatus};

/// Capacity of the trigger channel. Extra triggers are coalesced.
const TRIGGER_CAPACITY: usize = 32;

// =============================================================================
// Sync Agent
// =============================================================================

/// One sync session over one queue database.
pub struct SyncAgent {
    /// Sync configuration.
    config: Arc<SyncConfig>,

    /// Queue database.
    db: Database,

    engine: Arc<SyncEngine>,
    enqueuer: OperationEnqueuer,

    trigger_tx: mpsc::Sender<SyncTrigger>,

    /// Taken by `start()`.
    trigger_rx: Option<mpsc::Receiver<SyncTrigger>>,

    /// Background tasks, set after start.
    tasks: Arc<Mutex<BackgroundTasks>>,
}

#[derive(Default)]
struct BackgroundTasks {
    scheduler: Option<SchedulerHandle>,
    probe: Option<ProbeHandle>,
}

impl SyncAgent {
    fn new(
        config: SyncConfig,
        db: Database,
        remote: Arc<dyn RemoteStore>,
        connectivity: ConnectivityMonitor,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        let engine = Arc::new(SyncEngine::new(
            db.queue(),
            remote,
            connectivity.clone(),
            SharedStatus::new(connectivity),
            emitter,
            EngineConfig::from(&config.sync),
        ));

        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_CAPACITY);
        let enqueuer = OperationEnqueuer::new(engine.clone(), trigger_tx.clone());

        SyncAgent {
            config: Arc::new(config),
            db,
            engine,
            enqueuer,
            trigger_tx,
            trigger_rx: Some(trigger_rx),
            tasks: Arc::new(Mutex::new(BackgroundTasks::default())),
        }
    }

    /// Returns the current sync status.
    pub async fn status(&self) -> SyncStatus {
        self.engine.status().snapshot().await
    }

    /// Returns the configuration the agent was built with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the queue database.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Returns a cloneable handle.
    ///
    /// Usable before `start()`; without a running scheduler, passes only
    /// run when asked for through [`SyncAgentHandle::sync_now`].
    pub fn handle(&self) -> SyncAgentHandle {
        SyncAgentHandle {
            engine: self.engine.clone(),
            enqueuer: self.enqueuer.clone(),
            triggers: self.trigger_tx.clone(),
            tasks: self.tasks.clone(),
        }
    }

    /// Starts the reachability probe (when enabled) and the scheduler.
    pub async fn start(&mut self) -> SyncResult<SyncAgentHandle> {
        let triggers = self
            .trigger_rx
            .take()
            .ok_or_else(|| SyncError::Internal("Sync agent already started".into()))?;

        info!(
            device_id = %self.config.device_id(),
            remote = self.config.remote_url().unwrap_or("<none>"),
            "Starting sync agent"
        );

        let status = self.engine.refresh_status().await?;
        debug!(
            pending = status.pending_count,
            dead_letters = status.dead_letter_count,
            "Loaded queue state"
        );

        let mut tasks = self.tasks.lock().await;

        if self.config.connectivity.probe_enabled {
            match self.config.probe_address() {
                Some(addr) => {
                    let probe = ProbeConfig {
                        interval: self.config.connectivity.probe_interval(),
                        timeout: self.config.connectivity.probe_timeout(),
                        ..ProbeConfig::new(addr)
                    };
                    tasks.probe = Some(ReachabilityProbe::spawn(
                        probe,
                        self.engine.connectivity().clone(),
                    ));
                }
                None => warn!("No probe address; connectivity must be reported externally"),
            }
        }

        tasks.scheduler = Some(SyncScheduler::spawn(
            self.engine.clone(),
            SchedulerConfig::from(&self.config.sync),
            triggers,
        ));
        drop(tasks);

        info!("Sync agent started");
        Ok(self.handle())
    }

    /// Stops the probe and the scheduler. An in-progress pass finishes first.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.handle().shutdown().await
    }
}

// =============================================================================
// Agent Handle
// =============================================================================

/// Handle for using a SyncAgent from anywhere in the application.
#[derive(Clone)]
pub struct SyncAgentHandle {
    engine: Arc<SyncEngine>,
    enqueuer: OperationEnqueuer,
    triggers: mpsc::Sender<SyncTrigger>,
    tasks: Arc<Mutex<BackgroundTasks>>,
}

impl SyncAgentHandle {
    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Queues a write and applies it right away when possible.
    pub async fn queue_operation(
        &self,
        target_collection: &str,
        kind: OperationKind,
        payload: Record,
        priority: i32,
    ) -> SyncResult<EnqueueResult> {
        self.enqueuer
            .queue_operation(target_collection, kind, payload, priority)
            .await
    }

    /// Queues an already-built mutation.
    pub async fn queue_mutation(
        &self,
        target_collection: &str,
        mutation: Mutation,
        priority: i32,
    ) -> SyncResult<EnqueueResult> {
        self.enqueuer
            .queue_mutation(target_collection, mutation, priority)
            .await
    }

    // -------------------------------------------------------------------------
    // Sync control
    // -------------------------------------------------------------------------

    /// Runs a drain pass now and returns its report.
    pub async fn sync_now(&self) -> SyncResult<DrainReport> {
        let report = self.engine.drain().await?;
        if report.skipped.is_none() && report.remaining > 0 {
            self.trigger(SyncTrigger::RetryLater);
        }
        Ok(report)
    }

    /// Asks the scheduler for a pass without waiting for it.
    pub fn request_sync(&self) -> SyncResult<()> {
        if self.trigger(SyncTrigger::Manual) {
            Ok(())
        } else {
            Err(SyncError::ShuttingDown)
        }
    }

    /// Returns the connectivity monitor, for reporting OS-level changes.
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        self.engine.connectivity()
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Gets the current sync status.
    pub async fn status(&self) -> SyncStatus {
        self.engine.status().snapshot().await
    }

    /// Re-reads counts from storage and returns the refreshed status.
    pub async fn refresh_status(&self) -> SyncResult<SyncStatus> {
        self.engine.refresh_status().await
    }

    pub async fn pending_count(&self) -> SyncResult<usize> {
        Ok(self.engine.store().count().await?)
    }

    /// Returns the pending queue in drain order.
    pub async fn pending_operations(&self) -> SyncResult<Vec<QueuedOperation>> {
        Ok(self.engine.store().load().await?)
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Drops every pending operation without sending it.
    pub async fn clear_queue(&self) -> SyncResult<usize> {
        let cleared = self.engine.store().clear().await?;
        warn!(cleared, "Pending queue cleared");
        self.engine.refresh_status().await?;
        Ok(cleared)
    }

    pub async fn dead_letters(&self) -> SyncResult<Vec<DeadLetter>> {
        Ok(self.engine.store().dead_letters().await?)
    }

    /// Moves a dead-lettered operation back into the queue with a fresh
    /// attempt count.
    pub async fn requeue_dead_letter(&self, operation_id: &str) -> SyncResult<QueuedOperation> {
        let op = self.engine.store().requeue_dead_letter(operation_id).await?;
        info!(operation_id, "Dead letter re-queued");
        self.engine.refresh_status().await?;
        self.trigger(SyncTrigger::Enqueued);
        Ok(op)
    }

    /// Permanently drops a dead-lettered operation.
    pub async fn discard_dead_letter(&self, operation_id: &str) -> SyncResult<DeadLetter> {
        let letter = self.engine.store().discard_dead_letter(operation_id).await?;
        warn!(operation_id, "Dead letter discarded");
        self.engine.refresh_status().await?;
        Ok(letter)
    }

    /// Raw stored text that could not be read as queue entries.
    pub async fn quarantined(&self) -> SyncResult<Vec<QuarantinedEntry>> {
        Ok(self.engine.store().quarantined().await?)
    }

    pub async fn purge_quarantine(&self) -> SyncResult<usize> {
        Ok(self.engine.store().purge_quarantine().await?)
    }

    /// Stops the probe and the scheduler. An in-progress pass finishes first.
    ///
    /// Handles stay usable afterwards; passes then run only through
    /// [`sync_now`](Self::sync_now).
    pub async fn shutdown(&self) -> SyncResult<()> {
        let mut tasks = self.tasks.lock().await;
        if tasks.scheduler.is_none() && tasks.probe.is_none() {
            return Ok(());
        }

        info!("Shutting down sync agent");

        if let Some(probe) = tasks.probe.take() {
            // Fails only if the probe already stopped
            let _ = probe.shutdown().await;
        }

        if let Some(scheduler) = tasks.scheduler.take() {
            scheduler.shutdown().await;
        }

        info!("Sync agent stopped");
        Ok(())
    }

    /// Returns false once the scheduler has shut down.
    fn trigger(&self, trigger: SyncTrigger) -> bool {
        match self.triggers.try_send(trigger) {
            // A full channel already holds a pending pass
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Closed(_)) => {
                debug!(?trigger, "Scheduler stopped; trigger dropped");
                false
            }
        }
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating SyncAgent with options.
pub struct SyncAgentBuilder {
    config: SyncConfig,
    db: Option<Database>,
    remote: Option<Arc<dyn RemoteStore>>,
    connectivity: Option<ConnectivityMonitor>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
}

impl SyncAgentBuilder {
    /// Creates a new builder with the given config.
    pub fn new(config: SyncConfig) -> Self {
        SyncAgentBuilder {
            config,
            db: None,
            remote: None,
            connectivity: None,
            emitter: None,
        }
    }

    /// Sets the queue database.
    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    /// Sets the remote store. Defaults to the REST store at `remote.url`.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Shares an existing connectivity monitor. Defaults to a new one that
    /// starts offline.
    pub fn with_connectivity(mut self, connectivity: ConnectivityMonitor) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Builds the SyncAgent.
    pub fn build(self) -> SyncResult<SyncAgent> {
        self.config.validate()?;

        let db = self
            .db
            .ok_or_else(|| SyncError::InvalidConfig("Database required".into()))?;

        let remote: Arc<dyn RemoteStore> = match self.remote {
            Some(remote) => remote,
            None => match RestConfig::from_sync_config(&self.config) {
                Some(rest) => Arc::new(RestRemoteStore::new(rest)?),
                None => {
                    warn!("No remote URL configured; operations will stay queued");
                    Arc::new(UnconfiguredRemote)
                }
            },
        };

        let connectivity = self.connectivity.unwrap_or_default();
        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));

        Ok(SyncAgent::new(self.config, db, remote, connectivity, emitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::remote::testing::MockRemote;
    use crate::status::testing::{RecordingEmitter, SyncEvent};
    use fieldops_db::DbConfig;
    use serde_json::json;
    use std::time::Duration;

    fn test_config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.connectivity.probe_enabled = false;
        config.sync.initial_backoff_ms = 20;
        config.sync.max_backoff_secs = 1;
        config.sync.poll_interval_secs = 0;
        config
    }

    async fn database() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn payload(id: &str) -> Record {
        json!({ "id": id, "visited": true }).as_object().cloned().unwrap()
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[test]
    fn test_build_requires_database() {
        let result = SyncAgentBuilder::new(test_config()).build();
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_build_without_remote_url_keeps_writes_queued() {
        let monitor = ConnectivityMonitor::new(true);
        let agent = SyncAgentBuilder::new(test_config())
            .with_database(database().await)
            .with_connectivity(monitor)
            .build()
            .unwrap();
        let handle = agent.handle();

        let result = handle
            .queue_operation("visits", OperationKind::Insert, payload("V1"), 0)
            .await
            .unwrap();

        assert!(result.queued);
        let queue = handle.pending_operations().await.unwrap();
        assert_eq!(queue[0].attempts, 0);
    }

    #[tokio::test]
    async fn test_offline_session_then_reconnect() {
        let remote = Arc::new(MockRemote::new());
        let monitor = ConnectivityMonitor::new(false);
        let events = Arc::new(RecordingEmitter::default());

        let mut agent = SyncAgentBuilder::new(test_config())
            .with_database(database().await)
            .with_remote(remote.clone())
            .with_connectivity(monitor.clone())
            .with_emitter(events.clone())
            .build()
            .unwrap();
        let handle = agent.start().await.unwrap();

        for id in ["V1", "V2", "V3"] {
            let result = handle
                .queue_operation("visits", OperationKind::Insert, payload(id), 0)
                .await
                .unwrap();
            assert!(result.queued);
        }
        assert_eq!(handle.status().await.pending_count, 3);
        assert!(remote.calls().is_empty());

        monitor.set_online(true);
        let h = &handle;
        eventually(move || async move { h.pending_count().await.unwrap() == 0 }).await;

        assert_eq!(remote.calls().len(), 3);
        eventually(move || async move { h.status().await.last_sync_time.is_some() }).await;
        assert!(events.notices().contains(&SyncEvent::Complete(3)));

        handle.shutdown().await.unwrap();
        assert!(matches!(handle.request_sync(), Err(SyncError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_sync_now_offline_is_skipped() {
        let agent = SyncAgentBuilder::new(test_config())
            .with_database(database().await)
            .with_remote(Arc::new(MockRemote::new()))
            .build()
            .unwrap();
        let handle = agent.handle();
        handle
            .queue_operation("visits", OperationKind::Insert, payload("V1"), 0)
            .await
            .unwrap();

        let report = handle.sync_now().await.unwrap();
        assert_eq!(report.skipped, Some(crate::engine::SkipReason::Offline));
        assert_eq!(report.remaining, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_requeue_and_discard() {
        let mut config = test_config();
        config.sync.max_attempts = 1;
        let remote = Arc::new(MockRemote::new());
        remote.fail_key("V1", RemoteError::from_status(400, "bad payload"));
        remote.fail_key("V2", RemoteError::from_status(400, "bad payload"));

        let agent = SyncAgentBuilder::new(config)
            .with_database(database().await)
            .with_remote(remote.clone())
            .with_connectivity(ConnectivityMonitor::new(true))
            .build()
            .unwrap();
        let handle = agent.handle();

        let first = handle
            .queue_operation("visits", OperationKind::Insert, payload("V1"), 0)
            .await
            .unwrap();
        let second = handle
            .queue_operation("visits", OperationKind::Insert, payload("V2"), 0)
            .await
            .unwrap();

        let letters = handle.dead_letters().await.unwrap();
        assert_eq!(letters.len(), 2);
        assert_eq!(handle.pending_count().await.unwrap(), 0);
        assert_eq!(handle.status().await.dead_letter_count, 2);

        remote.clear_failures();
        let requeued = handle.requeue_dead_letter(&first.operation_id).await.unwrap();
        assert_eq!(requeued.attempts, 0);
        let report = handle.sync_now().await.unwrap();
        assert_eq!(report.synced, 1);

        handle.discard_dead_letter(&second.operation_id).await.unwrap();
        assert!(handle.dead_letters().await.unwrap().is_empty());
        assert_eq!(handle.status().await.dead_letter_count, 0);

        let missing = handle.discard_dead_letter("no-such-id").await.unwrap_err();
        assert!(matches!(missing, SyncError::Storage(_)));
    }

    #[tokio::test]
    async fn test_clear_queue() {
        let agent = SyncAgentBuilder::new(test_config())
            .with_database(database().await)
            .with_remote(Arc::new(MockRemote::new()))
            .build()
            .unwrap();
        let handle = agent.handle();
        for id in ["V1", "V2"] {
            handle
                .queue_operation("visits", OperationKind::Insert, payload(id), 0)
                .await
                .unwrap();
        }

        assert_eq!(handle.clear_queue().await.unwrap(), 2);
        assert_eq!(handle.pending_count().await.unwrap(), 0);
        assert_eq!(handle.status().await.pending_count, 0);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut agent = SyncAgentBuilder::new(test_config())
            .with_database(database().await)
            .with_remote(Arc::new(MockRemote::new()))
            .build()
            .unwrap();

        agent.start().await.unwrap();
        assert!(agent.start().await.is_err());
        agent.shutdown().await.unwrap();
    }
}
