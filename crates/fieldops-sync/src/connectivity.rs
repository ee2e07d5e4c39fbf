//! # Connectivity
//!
//! The online/offline signal and the probe that feeds it.
//!
//! ## Signal Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ReachabilityProbe (TCP connect every N s)    OS / app hooks           │
//! │          │                                         │                    │
//! │          └──────────── set_online(bool) ◄──────────┘                    │
//! │                              │                                          │
//! │                              ▼                                          │
//! │                   ┌─────────────────────┐                               │
//! │                   │ ConnectivityMonitor │  watch::Sender<bool>          │
//! │                   └──────────┬──────────┘                               │
//! │                              │ only real transitions are published     │
//! │          ┌───────────────────┼───────────────────┐                      │
//! │          ▼                   ▼                   ▼                      │
//! │   Enqueuer             SyncEngine           SyncScheduler              │
//! │   is_online()          is_online()          subscribe() → changed()    │
//! │   before direct apply  before every item    offline→online ⇒ drain     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The signal is raised before subscribers are woken, so a drain started
//! by a reconnection always observes `is_online() == true`.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Connectivity Monitor
// =============================================================================

/// Shared online/offline signal.
///
/// Cheap to clone; every clone observes and drives the same signal.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with an initial state.
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        ConnectivityMonitor { tx: Arc::new(tx) }
    }

    /// Returns the current state.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribes to transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Reports the current state.
    ///
    /// ## Returns
    /// `true` if this report was a transition. Repeated identical reports
    /// are not published.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            info!(online, "Connectivity changed");
        }
        changed
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

// =============================================================================
// Reachability Probe
// =============================================================================

/// Probe configuration.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// `host:port` to dial.
    pub addr: String,

    /// Time between probes.
    pub interval: Duration,

    /// Time before a dial counts as failed.
    pub timeout: Duration,
}

impl ProbeConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        ProbeConfig {
            addr: addr.into(),
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(3),
        }
    }
}

/// Handle for the running probe.
#[derive(Clone)]
pub struct ProbeHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl ProbeHandle {
    /// Stops the probe. The monitor keeps its last state.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Probe already stopped".into()))
    }
}

/// Periodically dials the remote host and reports the result to a
/// [`ConnectivityMonitor`].
pub struct ReachabilityProbe {
    config: ProbeConfig,
    monitor: ConnectivityMonitor,
    shutdown_rx: mpsc::Receiver<()>,
}

impl ReachabilityProbe {
    /// Spawns the probe task. The first probe runs immediately.
    pub fn spawn(config: ProbeConfig, monitor: ConnectivityMonitor) -> ProbeHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let probe = ReachabilityProbe {
            config,
            monitor,
            shutdown_rx,
        };
        tokio::spawn(probe.run());

        ProbeHandle { shutdown_tx }
    }

    async fn run(mut self) {
        info!(addr = %self.config.addr, "Reachability probe starting");

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reachable = probe_once(&self.config.addr, self.config.timeout).await;
                    self.monitor.set_online(reachable);
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Reachability probe stopped");
                    break;
                }
            }
        }
    }
}

/// Dials `addr` once.
pub async fn probe_once(addr: &str, limit: Duration) -> bool {
    match timeout(limit, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(addr = %addr, error = %e, "Probe failed");
            false
        }
        Err(_) => {
            debug!(addr = %addr, "Probe timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_only_transitions_are_published() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();

        assert!(!monitor.set_online(false));
        assert!(!rx.has_changed().unwrap());

        assert!(monitor.set_online(true));
        assert!(monitor.is_online());
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());

        assert!(!monitor.set_online(true));
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let monitor = ConnectivityMonitor::default();
        let other = monitor.clone();
        other.set_online(true);
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_probe_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert!(probe_once(&addr, Duration::from_secs(1)).await);

        drop(listener);
        assert!(!probe_once(&addr, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_probe_raises_monitor() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ProbeConfig {
            addr: listener.local_addr().unwrap().to_string(),
            interval: Duration::from_millis(20),
            timeout: Duration::from_millis(500),
        };

        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();
        let handle = ReachabilityProbe::spawn(config, monitor.clone());

        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|online| *online))
            .await
            .unwrap()
            .unwrap();
        assert!(monitor.is_online());

        handle.shutdown().await.unwrap();
    }
}
