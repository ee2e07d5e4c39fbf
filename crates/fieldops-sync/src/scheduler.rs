//! # Sync Scheduler
//!
//! Decides when drain passes run.
//!
//! ## Triggers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncScheduler loop                               │
//! │                                                                         │
//! │   start-up (online)                    ──► drain                        │
//! │   connectivity offline → online        ──► reset back-off, drain        │
//! │   connectivity online → offline        ──► disarm retry                 │
//! │   SyncTrigger::Enqueued / Manual       ──► drain                        │
//! │   SyncTrigger::RetryLater              ──► arm retry                    │
//! │   retry timer fires                    ──► drain                        │
//! │   poll tick (optional)                 ──► drain                        │
//! │   shutdown                             ──► exit                         │
//! │                                                                         │
//! │   after a drain:                                                        │
//! │     clean / empty        → back-off reset, retry disarmed              │
//! │     failures / busy / err → retry armed at next back-off delay         │
//! │                             (500 ms ×2 … 60 s, jittered)               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Drains are run inline: the loop never starts a pass while one it
//! started is still running. Passes started elsewhere are excluded by the
//! engine's own guard.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::SyncSettings;
use crate::connectivity::ConnectivityMonitor;
use crate::engine::{SkipReason, SyncEngine};

// =============================================================================
// Triggers & Configuration
// =============================================================================

/// Requests sent to a running scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// An operation was queued but not applied directly.
    Enqueued,

    /// Someone asked for a pass.
    Manual,

    /// A failure was seen outside the scheduler; retry after back-off.
    RetryLater,
}

/// Scheduler timing.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,

    /// Periodic pass while online. `None` disables polling.
    pub poll_interval: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            poll_interval: Some(Duration::from_secs(30)),
        }
    }
}

impl From<&SyncSettings> for SchedulerConfig {
    fn from(settings: &SyncSettings) -> Self {
        SchedulerConfig {
            initial_backoff: settings.initial_backoff(),
            max_backoff: settings.max_backoff(),
            poll_interval: settings.poll_interval(),
        }
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Handle for a running scheduler.
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops the scheduler and waits for an in-progress pass to finish.
    pub async fn shutdown(self) {
        // A send error means the loop already exited
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            error!(error = %e, "Sync scheduler task failed");
        }
    }
}

/// Background loop that runs drain passes.
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    connectivity: ConnectivityMonitor,
    config: SchedulerConfig,
    triggers: mpsc::Receiver<SyncTrigger>,
    shutdown_rx: mpsc::Receiver<()>,
    backoff: ExponentialBackoff,
    retry_at: Option<Instant>,
}

impl SyncScheduler {
    /// Spawns the scheduler on the current runtime.
    pub fn spawn(
        engine: Arc<SyncEngine>,
        config: SchedulerConfig,
        triggers: mpsc::Receiver<SyncTrigger>,
    ) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let scheduler = SyncScheduler {
            connectivity: engine.connectivity().clone(),
            backoff: create_backoff(&config),
            engine,
            config,
            triggers,
            shutdown_rx,
            retry_at: None,
        };
        let task = tokio::spawn(scheduler.run());

        SchedulerHandle { shutdown_tx, task }
    }

    async fn run(mut self) {
        info!(
            poll_interval = ?self.config.poll_interval,
            "Sync scheduler starting"
        );

        let mut online_rx = self.connectivity.subscribe();

        let mut poll = self.config.poll_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        if self.connectivity.is_online() {
            self.run_pass("startup").await;
        }

        loop {
            tokio::select! {
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    if online {
                        self.backoff.reset();
                        self.retry_at = None;
                        self.run_pass("reconnected").await;
                    } else {
                        debug!("Offline; retry disarmed");
                        self.retry_at = None;
                    }
                }

                Some(trigger) = self.triggers.recv() => {
                    match trigger {
                        SyncTrigger::Enqueued => self.run_pass("enqueued").await,
                        SyncTrigger::Manual => self.run_pass("manual").await,
                        SyncTrigger::RetryLater => {
                            if self.retry_at.is_none() {
                                self.arm_retry();
                            }
                        }
                    }
                }

                _ = retry_due(self.retry_at) => {
                    self.retry_at = None;
                    self.run_pass("retry").await;
                }

                _ = next_poll(&mut poll) => {
                    if self.connectivity.is_online() && self.retry_at.is_none() {
                        self.run_pass("poll").await;
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Sync scheduler shutting down");
                    break;
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    async fn run_pass(&mut self, reason: &'static str) {
        debug!(reason, "Scheduled drain");

        match self.engine.drain().await {
            Ok(report) => match report.skipped {
                Some(SkipReason::Empty) => self.settled(),
                Some(SkipReason::Offline) => {}
                // The running pass may have loaded its queue before our
                // reason for draining existed.
                Some(SkipReason::Busy) => self.arm_retry(),
                None if report.failed == 0 && report.remaining == 0 => self.settled(),
                None => self.arm_retry(),
            },
            Err(e) => {
                error!(error = %e, reason, "Scheduled drain failed");
                self.arm_retry();
            }
        }
    }

    fn settled(&mut self) {
        self.backoff.reset();
        self.retry_at = None;
    }

    fn arm_retry(&mut self) {
        if let Some(delay) = self.backoff.next_backoff() {
            debug!(?delay, "Retry armed");
            self.retry_at = Some(Instant::now() + delay);
        }
    }
}

fn create_backoff(config: &SchedulerConfig) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: config.initial_backoff,
        max_interval: config.max_backoff,
        multiplier: 2.0,
        max_elapsed_time: None, // Retry for as long as there is work
        ..Default::default()
    }
}

async fn retry_due(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

async fn next_poll(poll: &mut Option<Interval>) {
    match poll {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::error::RemoteError;
    use crate::remote::testing::MockRemote;
    use crate::status::{NoOpEmitter, SharedStatus};
    use fieldops_core::{Mutation, QueuedOperation};
    use fieldops_db::{Database, DbConfig, OfflineQueueRepository};
    use serde_json::json;

    struct Harness {
        engine: Arc<SyncEngine>,
        store: OfflineQueueRepository,
        remote: Arc<MockRemote>,
        monitor: ConnectivityMonitor,
        _db: Database,
    }

    async fn harness(online: bool) -> Harness {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let store = db.queue();
        let remote = Arc::new(MockRemote::new());
        let monitor = ConnectivityMonitor::new(online);

        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            remote.clone(),
            monitor.clone(),
            SharedStatus::new(monitor.clone()),
            Arc::new(NoOpEmitter),
            EngineConfig::default(),
        ));

        Harness {
            engine,
            store,
            remote,
            monitor,
            _db: db,
        }
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(100),
            poll_interval: None,
        }
    }

    fn insert(id: &str) -> QueuedOperation {
        let record = json!({ "id": id }).as_object().cloned().unwrap();
        QueuedOperation::new("inspections", Mutation::Insert(record), 0)
    }

    async fn wait_until_empty(store: &OfflineQueueRepository) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.count().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queue was not drained");
    }

    #[tokio::test]
    async fn test_startup_drains_when_online() {
        let h = harness(true).await;
        h.store.append(insert("A")).await.unwrap();

        let (_tx, rx) = mpsc::channel(8);
        let handle = SyncScheduler::spawn(h.engine.clone(), fast_config(), rx);

        wait_until_empty(&h.store).await;
        assert_eq!(h.remote.call_keys(), vec!["A"]);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconnection_triggers_drain() {
        let h = harness(false).await;
        h.store.append(insert("A")).await.unwrap();
        h.store.append(insert("B")).await.unwrap();

        let (_tx, rx) = mpsc::channel(8);
        let handle = SyncScheduler::spawn(h.engine.clone(), fast_config(), rx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.remote.calls().is_empty());

        h.monitor.set_online(true);
        wait_until_empty(&h.store).await;
        assert_eq!(h.remote.calls().len(), 2);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_enqueue_trigger_drains() {
        let h = harness(true).await;
        let (tx, rx) = mpsc::channel(8);
        let handle = SyncScheduler::spawn(h.engine.clone(), fast_config(), rx);

        h.store.append(insert("A")).await.unwrap();
        tx.send(SyncTrigger::Enqueued).await.unwrap();

        wait_until_empty(&h.store).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_failures_are_retried_with_backoff() {
        let h = harness(true).await;
        h.remote.fail_key("A", RemoteError::Unreachable("connection reset".into()));
        h.store.append(insert("A")).await.unwrap();

        let (_tx, rx) = mpsc::channel(8);
        let handle = SyncScheduler::spawn(h.engine.clone(), fast_config(), rx);

        // Startup pass fails, then the armed retry keeps trying
        tokio::time::timeout(Duration::from_secs(5), async {
            while h.remote.calls().len() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        h.remote.clear_failures();
        wait_until_empty(&h.store).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_poll_drains_periodically() {
        let h = harness(true).await;
        let config = SchedulerConfig {
            poll_interval: Some(Duration::from_millis(30)),
            ..fast_config()
        };
        let (_tx, rx) = mpsc::channel(8);
        let handle = SyncScheduler::spawn(h.engine.clone(), config, rx);

        // Appended behind the scheduler's back: only the poll can pick it up
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.store.append(insert("A")).await.unwrap();

        wait_until_empty(&h.store).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_going_offline_disarms_retry() {
        let h = harness(true).await;
        h.remote.fail_key("A", RemoteError::Unreachable("no route".into()));
        h.store.append(insert("A")).await.unwrap();

        let (_tx, rx) = mpsc::channel(8);
        let handle = SyncScheduler::spawn(h.engine.clone(), fast_config(), rx);

        tokio::time::timeout(Duration::from_secs(5), async {
            while h.remote.calls().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        h.monitor.set_online(false);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let calls = h.remote.calls().len();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(h.remote.calls().len(), calls);

        handle.shutdown().await;
    }
}
