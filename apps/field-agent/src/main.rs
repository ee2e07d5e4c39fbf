//! # FieldOps Field Agent
//!
//! Headless sync session and operator tools for the offline write queue.
//!
//! ## Commands
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  field-agent [--config PATH] [--assume-online] <command>               │
//! │                                                                         │
//! │  run            probe + scheduler until Ctrl+C / SIGTERM (default)     │
//! │  status         queue counts and last sync time (JSON)                 │
//! │  enqueue        queue one write, apply it now if reachable             │
//! │  drain          one drain pass now                                     │
//! │  dead-letters   list, --retry ID, or --discard ID                      │
//! │  quarantine     list unreadable stored text, or --purge                │
//! │  clear          drop every pending write (--yes required)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Logs go to stderr (`RUST_LOG` overrides the default filter); command
//! output is JSON on stdout.

mod events;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fieldops_core::OperationKind;
use fieldops_db::{Database, DbConfig};
use fieldops_sync::connectivity::probe_once;
use fieldops_sync::{ConnectivityMonitor, SyncAgent, SyncAgentBuilder, SyncConfig};

use crate::events::LogEmitter;

const DEFAULT_LOG_FILTER: &str = "info,fieldops=debug,sqlx=warn";

#[derive(Debug, Parser)]
#[command(name = "field-agent", about = "FieldOps offline queue sync agent")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true, env = "FIELDOPS_CONFIG")]
    config: Option<PathBuf>,

    /// Treat the device as online without probing
    #[arg(long, global = true)]
    assume_online: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the sync session until interrupted (default)
    Run,
    /// Print the sync status
    Status,
    /// Queue one write
    Enqueue {
        /// Remote collection
        collection: String,
        /// insert, update or delete
        kind: String,
        /// JSON object; update and delete need the primary key
        payload: String,
        /// Higher drains first
        #[arg(long, default_value_t = fieldops_core::DEFAULT_PRIORITY)]
        priority: i32,
    },
    /// Run one drain pass now
    Drain,
    /// Inspect or repair dead-lettered writes
    DeadLetters {
        /// Move this operation back into the queue
        #[arg(long, conflicts_with = "discard")]
        retry: Option<String>,
        /// Drop this operation for good
        #[arg(long)]
        discard: Option<String>,
    },
    /// Inspect stored text that could not be read
    Quarantine {
        #[arg(long)]
        purge: bool,
    },
    /// Drop every pending write without sending it
    Clear {
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = SyncConfig::load(cli.config.clone()).context("loading sync config")?;

    let db = Database::new(DbConfig::new(config.database_path()))
        .await
        .context("opening queue database")?;

    let result = execute(cli, config, db.clone()).await;
    db.close().await;
    result
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

async fn execute(cli: Cli, config: SyncConfig, db: Database) -> anyhow::Result<()> {
    let command = cli.command.unwrap_or(Commands::Run);

    // The long-running session learns connectivity from its probe; one-shot
    // commands probe once up front.
    let initially_online = match command {
        Commands::Run => cli.assume_online,
        _ => cli.assume_online || reachable(&config).await,
    };

    let mut agent = SyncAgentBuilder::new(config)
        .with_database(db)
        .with_connectivity(ConnectivityMonitor::new(initially_online))
        .with_emitter(Arc::new(LogEmitter))
        .build()?;
    let handle = agent.handle();

    match command {
        Commands::Run => run(&mut agent).await?,
        Commands::Status => print_json(&handle.refresh_status().await?)?,
        Commands::Enqueue {
            collection,
            kind,
            payload,
            priority,
        } => {
            let kind: OperationKind = kind.parse()?;
            let payload = match serde_json::from_str::<Value>(&payload).context("parsing payload")? {
                Value::Object(map) => map,
                _ => bail!("payload must be a JSON object"),
            };
            let result = handle
                .queue_operation(&collection, kind, payload, priority)
                .await?;
            print_json(&result)?;
        }
        Commands::Drain => print_json(&handle.sync_now().await?)?,
        Commands::DeadLetters { retry, discard } => match (retry, discard) {
            (Some(id), _) => print_json(&handle.requeue_dead_letter(&id).await?)?,
            (None, Some(id)) => print_json(&handle.discard_dead_letter(&id).await?)?,
            (None, None) => print_json(&handle.dead_letters().await?)?,
        },
        Commands::Quarantine { purge } => {
            if purge {
                let purged = handle.purge_quarantine().await?;
                print_json(&serde_json::json!({ "purged": purged }))?;
            } else {
                print_json(&handle.quarantined().await?)?;
            }
        }
        Commands::Clear { yes } => {
            if !yes {
                bail!("refusing to drop pending writes without --yes");
            }
            let cleared = handle.clear_queue().await?;
            print_json(&serde_json::json!({ "cleared": cleared }))?;
        }
    }

    Ok(())
}

async fn run(agent: &mut SyncAgent) -> anyhow::Result<()> {
    if !agent.config().connectivity.probe_enabled && !agent.handle().connectivity().is_online() {
        warn!("Probe disabled and not assumed online; nothing will sync");
    }

    agent.start().await?;
    info!(
        pending = agent.status().await.pending_count,
        "Field agent running"
    );

    shutdown_signal().await;

    agent.shutdown().await?;
    info!("Field agent stopped");
    Ok(())
}

async fn reachable(config: &SyncConfig) -> bool {
    match config.probe_address() {
        Some(addr) => probe_once(&addr, config.connectivity.probe_timeout()).await,
        None => false,
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, finishing current sync pass...");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_command_means_run() {
        let cli = Cli::try_parse_from(["field-agent"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.assume_online);
    }

    #[test]
    fn test_enqueue_arguments() {
        let cli = Cli::try_parse_from([
            "field-agent",
            "--assume-online",
            "enqueue",
            "shipments",
            "update",
            r#"{"id": 4, "status": "delivered"}"#,
            "--priority",
            "5",
        ])
        .unwrap();

        assert!(cli.assume_online);
        match cli.command {
            Some(Commands::Enqueue {
                collection,
                kind,
                priority,
                ..
            }) => {
                assert_eq!(collection, "shipments");
                assert_eq!(kind, "update");
                assert_eq!(priority, 5);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_retry_and_discard_conflict() {
        let result = Cli::try_parse_from([
            "field-agent",
            "dead-letters",
            "--retry",
            "a",
            "--discard",
            "b",
        ]);
        assert!(result.is_err());
    }
}
