//! # Offline Queue Repository
//!
//! Durable storage for writes the remote store has not yet confirmed.
//!
//! ## Storage Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  kv_store                                                               │
//! │  ─────────────────────────────────────────────────────────────────────  │
//! │  offline_queue              [ {id, targetCollection, kind, payload,    │
//! │                                enqueuedAt, priority, attempts,          │
//! │                                lastError}, ... ]   (drain order)       │
//! │  offline_queue_dead_letter  [ {operation, reason, deadLetteredAt} ]    │
//! │  offline_queue_quarantine   [ {raw, reason, quarantinedAt} ]           │
//! │  offline_queue_last_sync    "2024-05-01T10:00:00+00:00"                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Read-Modify-Write
//! Every mutation runs in one transaction whose first statement is a write
//! (`kv::reserve`), so SQLite hands out the write lock before the queue is
//! read. Two processes sharing the file serialize on that lock instead of
//! overwriting each other's appends.
//! ```text
//!   BEGIN
//!     INSERT OR IGNORE offline_queue = '[]'   ◄── write lock taken here
//!     SELECT offline_queue
//!     ... modify in memory (fieldops_core::queue) ...
//!     UPSERT offline_queue
//!   COMMIT
//! ```
//!
//! ## Corrupt Data
//! Unreadable text is never dropped silently:
//! - value is not a JSON array → queue treated as empty, whole text quarantined
//! - individual entries unreadable → good entries kept, bad ones quarantined

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, error, info, warn};

use fieldops_core::queue::{insert_sorted, settle_queue, sort_queue};
use fieldops_core::{DeadLetter, QuarantinedEntry, QueuedOperation, Settlement};

use crate::error::{DbError, DbResult};
use crate::repository::kv::{self, DEAD_LETTER_KEY, LAST_SYNC_KEY, QUARANTINE_KEY, QUEUE_KEY};

const EMPTY_LIST: &str = "[]";

/// Result of [`OfflineQueueRepository::load_checked`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedQueue {
    /// Pending operations in drain order.
    pub operations: Vec<QueuedOperation>,

    /// Number of entries moved to quarantine by this load.
    pub quarantined: usize,
}

/// Repository for the offline write queue.
#[derive(Debug, Clone)]
pub struct OfflineQueueRepository {
    pool: SqlitePool,
}

impl OfflineQueueRepository {
    /// Creates a new OfflineQueueRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OfflineQueueRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Pending queue
    // -------------------------------------------------------------------------

    /// Returns the pending queue in drain order.
    ///
    /// An absent queue is empty. Unreadable data is quarantined (see
    /// [`load_checked`](Self::load_checked)).
    pub async fn load(&self) -> DbResult<Vec<QueuedOperation>> {
        Ok(self.load_checked().await?.operations)
    }

    /// Returns the pending queue and how many entries had to be quarantined.
    pub async fn load_checked(&self) -> DbResult<LoadedQueue> {
        let decoded = {
            let mut conn = self.pool.acquire().await?;
            let raw = kv::get(&mut conn, QUEUE_KEY).await?;
            decode_list::<QueuedOperation>(raw.as_deref(), "queue")
        };

        if decoded.rejected.is_empty() {
            let mut operations = decoded.items;
            sort_queue(&mut operations);
            return Ok(LoadedQueue {
                operations,
                quarantined: 0,
            });
        }

        // Redo under the write lock and move the bad text aside
        let mut tx = self.pool.begin().await?;
        let (operations, quarantined) = read_queue(&mut tx).await?;
        tx.commit().await?;

        Ok(LoadedQueue {
            operations,
            quarantined,
        })
    }

    /// Number of pending operations.
    pub async fn count(&self) -> DbResult<usize> {
        let mut conn = self.pool.acquire().await?;
        let raw = kv::get(&mut conn, QUEUE_KEY).await?;
        Ok(decode_list::<QueuedOperation>(raw.as_deref(), "queue").items.len())
    }

    /// Returns the stored copy of a pending operation, if it is still queued.
    pub async fn find(&self, operation_id: &str) -> DbResult<Option<QueuedOperation>> {
        let mut conn = self.pool.acquire().await?;
        let raw = kv::get(&mut conn, QUEUE_KEY).await?;
        Ok(decode_list::<QueuedOperation>(raw.as_deref(), "queue")
            .items
            .into_iter()
            .find(|op| op.id == operation_id))
    }

    /// Inserts an operation at its ordered position and persists the queue
    /// before returning.
    ///
    /// ## Returns
    /// The queue length after the append.
    pub async fn append(&self, op: QueuedOperation) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        let (mut queue, _) = read_queue(&mut tx).await?;

        debug!(
            operation_id = %op.id,
            collection = %op.target_collection,
            kind = %op.kind(),
            priority = op.priority,
            "Appending to offline queue"
        );

        insert_sorted(&mut queue, op);
        write_list(&mut tx, QUEUE_KEY, &queue).await?;
        tx.commit().await?;

        Ok(queue.len())
    }

    /// Overwrites the stored queue. The sequence is sorted before persisting.
    pub async fn replace(&self, mut operations: Vec<QueuedOperation>) -> DbResult<()> {
        sort_queue(&mut operations);

        let mut tx = self.pool.begin().await?;
        kv::reserve(&mut tx, QUEUE_KEY, EMPTY_LIST).await?;
        write_list(&mut tx, QUEUE_KEY, &operations).await?;
        tx.commit().await?;

        debug!(count = operations.len(), "Offline queue replaced");
        Ok(())
    }

    /// Folds the outcome of a drain pass into the CURRENT queue.
    ///
    /// Operations appended while the pass was running are kept. Dead letters
    /// whose operation is no longer queued (cleared meanwhile) are dropped.
    ///
    /// ## Returns
    /// The queue length after settlement.
    pub async fn settle(&self, settlement: &Settlement) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        let (queue, _) = read_queue(&mut tx).await?;

        let present: HashSet<String> = queue.iter().map(|op| op.id.clone()).collect();
        let next = settle_queue(queue, settlement);
        write_list(&mut tx, QUEUE_KEY, &next).await?;

        let new_dead: Vec<DeadLetter> = settlement
            .dead_lettered
            .iter()
            .filter(|dead| present.contains(&dead.operation.id))
            .cloned()
            .collect();

        if !new_dead.is_empty() {
            let mut dead_letters = read_dead_letters(&mut tx).await?;
            dead_letters.extend(new_dead);
            write_list(&mut tx, DEAD_LETTER_KEY, &dead_letters).await?;
        }

        tx.commit().await?;

        debug!(
            applied = settlement.applied.len(),
            retained = settlement.retained.len(),
            dead_lettered = settlement.dead_lettered.len(),
            remaining = next.len(),
            "Offline queue settled"
        );

        Ok(next.len())
    }

    /// Removes every pending operation.
    ///
    /// ## Returns
    /// How many operations were removed.
    pub async fn clear(&self) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        let (queue, _) = read_queue(&mut tx).await?;
        kv::put(&mut tx, QUEUE_KEY, EMPTY_LIST).await?;
        tx.commit().await?;

        info!(removed = queue.len(), "Offline queue cleared");
        Ok(queue.len())
    }

    // -------------------------------------------------------------------------
    // Dead letters
    // -------------------------------------------------------------------------

    /// Lists dead letters, oldest first.
    pub async fn dead_letters(&self) -> DbResult<Vec<DeadLetter>> {
        let mut conn = self.pool.acquire().await?;
        let raw = kv::get(&mut conn, DEAD_LETTER_KEY).await?;
        Ok(decode_list::<DeadLetter>(raw.as_deref(), "dead letter").items)
    }

    /// Moves a dead letter back into the pending queue with its attempt
    /// count reset.
    pub async fn requeue_dead_letter(&self, operation_id: &str) -> DbResult<QueuedOperation> {
        let mut tx = self.pool.begin().await?;
        let mut dead_letters = read_dead_letters(&mut tx).await?;

        let position = dead_letters
            .iter()
            .position(|dead| dead.operation.id == operation_id)
            .ok_or_else(|| DbError::not_found("Dead letter", operation_id))?;

        let mut op = dead_letters.remove(position).operation;
        op.attempts = 0;
        op.last_error = None;

        let (mut queue, _) = read_queue(&mut tx).await?;
        insert_sorted(&mut queue, op.clone());

        write_list(&mut tx, QUEUE_KEY, &queue).await?;
        write_list(&mut tx, DEAD_LETTER_KEY, &dead_letters).await?;
        tx.commit().await?;

        info!(operation_id = %op.id, "Dead letter re-queued");
        Ok(op)
    }

    /// Deletes a dead letter for good.
    pub async fn discard_dead_letter(&self, operation_id: &str) -> DbResult<DeadLetter> {
        let mut tx = self.pool.begin().await?;
        let mut dead_letters = read_dead_letters(&mut tx).await?;

        let position = dead_letters
            .iter()
            .position(|dead| dead.operation.id == operation_id)
            .ok_or_else(|| DbError::not_found("Dead letter", operation_id))?;

        let discarded = dead_letters.remove(position);
        write_list(&mut tx, DEAD_LETTER_KEY, &dead_letters).await?;
        tx.commit().await?;

        warn!(
            operation_id = %discarded.operation.id,
            collection = %discarded.operation.target_collection,
            "Dead letter discarded"
        );
        Ok(discarded)
    }

    // -------------------------------------------------------------------------
    // Quarantine
    // -------------------------------------------------------------------------

    /// Lists quarantined raw entries, oldest first.
    pub async fn quarantined(&self) -> DbResult<Vec<QuarantinedEntry>> {
        let mut conn = self.pool.acquire().await?;
        let raw = kv::get(&mut conn, QUARANTINE_KEY).await?;
        let decoded = decode_list::<QuarantinedEntry>(raw.as_deref(), "quarantine");

        let mut entries = decoded.items;
        entries.extend(decoded.rejected);
        Ok(entries)
    }

    /// Deletes all quarantined entries. Returns how many were removed.
    pub async fn purge_quarantine(&self) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        let decoded = read_list::<QuarantinedEntry>(&mut tx, QUARANTINE_KEY, "quarantine").await?;
        kv::delete(&mut tx, QUARANTINE_KEY).await?;
        tx.commit().await?;

        let removed = decoded.items.len() + decoded.rejected.len();
        info!(removed, "Quarantine purged");
        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Last sync time
    // -------------------------------------------------------------------------

    /// Time of the last completed drain pass, if any.
    pub async fn last_sync_time(&self) -> DbResult<Option<DateTime<Utc>>> {
        let mut conn = self.pool.acquire().await?;
        let Some(raw) = kv::get(&mut conn, LAST_SYNC_KEY).await? else {
            return Ok(None);
        };

        match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(ts) => Ok(Some(ts.with_timezone(&Utc))),
            Err(e) => {
                warn!(value = %raw, error = %e, "Ignoring unreadable last sync time");
                Ok(None)
            }
        }
    }

    /// Records the time of a completed drain pass.
    pub async fn set_last_sync_time(&self, at: DateTime<Utc>) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        kv::put(&mut conn, LAST_SYNC_KEY, &at.to_rfc3339()).await
    }
}

// =============================================================================
// Decoding
// =============================================================================

struct Decoded<T> {
    items: Vec<T>,
    rejected: Vec<QuarantinedEntry>,
}

fn decode_list<T: DeserializeOwned>(raw: Option<&str>, label: &str) -> Decoded<T> {
    let mut decoded = Decoded {
        items: Vec::new(),
        rejected: Vec::new(),
    };

    let Some(raw) = raw else {
        return decoded;
    };

    let values: Vec<Value> = match serde_json::from_str(raw) {
        Ok(values) => values,
        Err(e) => {
            decoded.rejected.push(quarantine_entry(
                raw.to_string(),
                format!("{} is not a JSON array: {}", label, e),
            ));
            return decoded;
        }
    };

    for value in values {
        match serde_json::from_value::<T>(value.clone()) {
            Ok(item) => decoded.items.push(item),
            Err(e) => decoded.rejected.push(quarantine_entry(
                value.to_string(),
                format!("unreadable {} entry: {}", label, e),
            )),
        }
    }

    decoded
}

fn quarantine_entry(raw: String, reason: String) -> QuarantinedEntry {
    QuarantinedEntry {
        raw,
        reason,
        quarantined_at: Utc::now(),
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================
//
// All of these expect to run inside a transaction.

async fn read_list<T: DeserializeOwned>(
    conn: &mut SqliteConnection,
    key: &str,
    label: &str,
) -> DbResult<Decoded<T>> {
    kv::reserve(conn, key, EMPTY_LIST).await?;
    let raw = kv::get(conn, key).await?;
    Ok(decode_list(raw.as_deref(), label))
}

async fn write_list<T: Serialize>(conn: &mut SqliteConnection, key: &str, items: &[T]) -> DbResult<()> {
    let value = serde_json::to_string(items)?;
    kv::put(conn, key, &value).await
}

async fn read_queue(conn: &mut SqliteConnection) -> DbResult<(Vec<QueuedOperation>, usize)> {
    let Decoded {
        items: mut operations,
        rejected,
    } = read_list::<QueuedOperation>(conn, QUEUE_KEY, "queue").await?;
    sort_queue(&mut operations);

    let quarantined = rejected.len();
    if quarantined > 0 {
        error!(
            quarantined,
            kept = operations.len(),
            "Stored offline queue is corrupt, quarantining unreadable entries"
        );
        write_list(conn, QUEUE_KEY, &operations).await?;
        quarantine(conn, rejected).await?;
    }

    Ok((operations, quarantined))
}

async fn read_dead_letters(conn: &mut SqliteConnection) -> DbResult<Vec<DeadLetter>> {
    let Decoded { items, rejected } =
        read_list::<DeadLetter>(conn, DEAD_LETTER_KEY, "dead letter").await?;

    if !rejected.is_empty() {
        error!(
            quarantined = rejected.len(),
            "Stored dead letters are corrupt, quarantining unreadable entries"
        );
        write_list(conn, DEAD_LETTER_KEY, &items).await?;
        quarantine(conn, rejected).await?;
    }

    Ok(items)
}

async fn quarantine(conn: &mut SqliteConnection, entries: Vec<QuarantinedEntry>) -> DbResult<()> {
    let Decoded {
        mut items,
        rejected,
    } = read_list::<QuarantinedEntry>(conn, QUARANTINE_KEY, "quarantine").await?;

    // An unreadable quarantine list is itself kept as an entry
    items.extend(rejected);
    items.extend(entries);
    write_list(conn, QUARANTINE_KEY, &items).await
}

// =============================================================================
// Unit Tests
// =============================================================================
