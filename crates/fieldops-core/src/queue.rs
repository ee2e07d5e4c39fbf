//! # Queue Ordering & Settlement
//!
//! Pure functions that decide the order of the pending queue and how a
//! finished drain pass is folded back into it.
//!
//! ## Ordering
//! ```text
//! priority DESC, then enqueued_at ASC, then submission order (stable sort)
//!
//!   [p9 S1-update @10:01]   ◄── drains first
//!   [p5 F1-insert @10:00]
//!   [p5 F2-insert @10:00]   ◄── same key as F1: stays behind it
//! ```
//!
//! ## Settlement
//! A drain pass works on a snapshot. New operations may be appended while
//! remote calls are in flight, so the outcome is applied to the CURRENT
//! queue by id instead of overwriting it with the pass's remainder.
//! ```text
//!   current queue ──► drop applied ids
//!                 ──► drop dead-lettered ids
//!                 ──► bump attempts / last_error on retained failures
//!                 ──► untouched ids (appended mid-drain) kept as-is
//!                 ──► re-sort
//! ```

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::types::{DeadLetter, QueuedOperation};

/// Total order of the pending queue.
pub fn queue_order(a: &QueuedOperation, b: &QueuedOperation) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.enqueued_at.cmp(&b.enqueued_at))
}

/// Sorts the queue in place. Stable, so equal keys keep their relative order.
pub fn sort_queue(queue: &mut [QueuedOperation]) {
    queue.sort_by(queue_order);
}

/// Appends `op` and restores ordering.
pub fn insert_sorted(queue: &mut Vec<QueuedOperation>, op: QueuedOperation) {
    queue.push(op);
    sort_queue(queue);
}

/// Returns true if the queue is in drain order.
pub fn is_sorted(queue: &[QueuedOperation]) -> bool {
    queue
        .windows(2)
        .all(|pair| queue_order(&pair[0], &pair[1]) != Ordering::Greater)
}

// =============================================================================
// Settlement
// =============================================================================

/// A failure that keeps its operation in the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct RetainedFailure {
    pub id: String,
    /// Attempt count to store (already incremented for rejections).
    pub attempts: u32,
    pub last_error: String,
}

/// Outcome of one drain pass (or one direct apply), keyed by operation id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settlement {
    /// Confirmed by the remote store.
    pub applied: Vec<String>,

    /// Failed; stay queued.
    pub retained: Vec<RetainedFailure>,

    /// Failed too often; leave the queue for the dead-letter list.
    pub dead_lettered: Vec<DeadLetter>,
}

impl Settlement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.retained.is_empty() && self.dead_lettered.is_empty()
    }

    /// Total number of failures (retained and dead-lettered).
    pub fn failed(&self) -> usize {
        self.retained.len() + self.dead_lettered.len()
    }
}

/// Applies a settlement to the current queue and returns the new queue.
///
/// Ids in the settlement that are no longer in the queue (for example after
/// a concurrent `clear`) are ignored.
pub fn settle_queue(queue: Vec<QueuedOperation>, settlement: &Settlement) -> Vec<QueuedOperation> {
    let removed: HashSet<&str> = settlement
        .applied
        .iter()
        .map(String::as_str)
        .chain(
            settlement
                .dead_lettered
                .iter()
                .map(|dead| dead.operation.id.as_str()),
        )
        .collect();

    let retained: HashMap<&str, &RetainedFailure> = settlement
        .retained
        .iter()
        .map(|failure| (failure.id.as_str(), failure))
        .collect();

    let mut next: Vec<QueuedOperation> = queue
        .into_iter()
        .filter(|op| !removed.contains(op.id.as_str()))
        .map(|mut op| {
            if let Some(failure) = retained.get(op.id.as_str()) {
                op.attempts = failure.attempts;
                op.last_error = Some(failure.last_error.clone());
            }
            op
        })
        .collect();

    sort_queue(&mut next);
    next
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Mutation, Record};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn op(collection: &str, id: &str, priority: i32, offset_secs: i64) -> QueuedOperation {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let payload: Record = json!({ "id": id }).as_object().cloned().unwrap();
        QueuedOperation::new_at(
            collection,
            Mutation::Insert(payload),
            priority,
            base + Duration::seconds(offset_secs),
        )
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut queue = Vec::new();
        insert_sorted(&mut queue, op("farmers", "F1", 5, 0));
        insert_sorted(&mut queue, op("shipments", "S1", 9, 1));
        insert_sorted(&mut queue, op("farmers", "F2", 5, 2));

        let order: Vec<_> = queue.iter().map(|o| o.key().unwrap().to_string()).collect();
        assert_eq!(order, vec!["S1", "F1", "F2"]);
        assert!(is_sorted(&queue));
    }

    #[test]
    fn test_equal_keys_keep_submission_order() {
        let mut queue = Vec::new();
        for name in ["A", "B", "C", "D"] {
            insert_sorted(&mut queue, op("farmers", name, 1, 0));
        }
        let order: Vec<_> = queue.iter().map(|o| o.key().unwrap().to_string()).collect();
        assert_eq!(order, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_settle_drops_applied_and_updates_retained() {
        let a = op("farmers", "A", 1, 0);
        let b = op("farmers", "B", 1, 1);
        let c = op("farmers", "C", 1, 2);

        let settlement = Settlement {
            applied: vec![a.id.clone(), c.id.clone()],
            retained: vec![RetainedFailure {
                id: b.id.clone(),
                attempts: 2,
                last_error: "rejected".into(),
            }],
            dead_lettered: vec![],
        };

        let next = settle_queue(vec![a, b.clone(), c], &settlement);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id, b.id);
        assert_eq!(next[0].attempts, 2);
        assert_eq!(next[0].last_error.as_deref(), Some("rejected"));
    }

    #[test]
    fn test_settle_keeps_operations_appended_mid_drain() {
        let drained = op("farmers", "A", 1, 0);
        let late = op("farmers", "LATE", 1, 5);

        let settlement = Settlement {
            applied: vec![drained.id.clone()],
            ..Settlement::new()
        };

        let next = settle_queue(vec![drained, late.clone()], &settlement);
        assert_eq!(next, vec![late]);
    }

    #[test]
    fn test_settle_removes_dead_letters() {
        let poison = op("farmers", "P", 1, 0);
        let settlement = Settlement {
            dead_lettered: vec![DeadLetter::new(poison.clone(), "rejected 10 times")],
            ..Settlement::new()
        };
        assert!(settle_queue(vec![poison], &settlement).is_empty());
        assert_eq!(settlement.failed(), 1);
    }
}
