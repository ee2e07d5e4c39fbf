//! # Remote Store
//!
//! The collaborator queued writes are delivered to.
//!
//! ```text
//!   QueuedOperation ──► apply() ──► match mutation
//!                                    ├── Insert(record)      → store.insert
//!                                    ├── Update{key,record}  → store.update
//!                                    └── Delete(key)         → store.delete
//! ```
//!
//! The match is exhaustive: a new [`Mutation`] variant does not compile
//! until every adapter handles it.

use async_trait::async_trait;

use fieldops_core::{Mutation, QueuedOperation, Record, RecordKey};

use crate::error::RemoteError;

/// A remote collection store addressed by collection name and primary key.
///
/// Writes are last-writer-wins; the store is expected to tolerate the
/// same write being delivered more than once.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Creates a record.
    async fn insert(&self, collection: &str, record: &Record) -> Result<(), RemoteError>;

    /// Overwrites the record with the given key.
    async fn update(&self, collection: &str, key: &RecordKey, record: &Record) -> Result<(), RemoteError>;

    /// Removes the record with the given key.
    async fn delete(&self, collection: &str, key: &RecordKey) -> Result<(), RemoteError>;
}

/// Delivers one queued operation.
pub async fn apply(store: &dyn RemoteStore, op: &QueuedOperation) -> Result<(), RemoteError> {
    let collection = op.target_collection.as_str();

    match &op.mutation {
        Mutation::Insert(record) => store.insert(collection, record).await,
        Mutation::Update { key, record } => store.update(collection, key, record).await,
        Mutation::Delete(key) => store.delete(collection, key).await,
    }
}

/// Stand-in used when no remote URL is configured.
///
/// Every write fails as unreachable, so operations stay queued without
/// counting attempts.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredRemote;

impl UnconfiguredRemote {
    fn unavailable() -> RemoteError {
        RemoteError::Unreachable("no remote store configured".to_string())
    }
}

#[async_trait]
impl RemoteStore for UnconfiguredRemote {
    async fn insert(&self, _collection: &str, _record: &Record) -> Result<(), RemoteError> {
        Err(Self::unavailable())
    }

    async fn update(&self, _collection: &str, _key: &RecordKey, _record: &Record) -> Result<(), RemoteError> {
        Err(Self::unavailable())
    }

    async fn delete(&self, _collection: &str, _key: &RecordKey) -> Result<(), RemoteError> {
        Err(Self::unavailable())
    }
}

// =============================================================================
// Test Double
// =============================================================================

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory remote store.

    use super::*;
    use fieldops_core::OperationKind;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::{Notify, Semaphore};

    /// One observed remote call.
    #[derive(Debug, Clone, PartialEq)]
    pub struct RemoteCall {
        pub kind: OperationKind,
        pub collection: String,
        pub key: Option<String>,
    }

    /// Records calls; fails the keys it is told to fail.
    #[derive(Default)]
    pub struct MockRemote {
        calls: Mutex<Vec<RemoteCall>>,
        failures: Mutex<HashMap<String, RemoteError>>,
        gate: Option<Arc<Semaphore>>,
        delay: Option<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        entered: Notify,
    }

    impl MockRemote {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every call waits for a permit from `gate` before answering.
        pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
            self.gate = Some(gate);
            self
        }

        /// Every call sleeps before answering.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Calls for `key` fail with `error` until cleared.
        pub fn fail_key(&self, key: &str, error: RemoteError) {
            self.failures.lock().unwrap().insert(key.to_string(), error);
        }

        pub fn clear_failures(&self) {
            self.failures.lock().unwrap().clear();
        }

        pub fn calls(&self) -> Vec<RemoteCall> {
            self.calls.lock().unwrap().clone()
        }

        /// Keys of all calls, in call order.
        pub fn call_keys(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .map(|call| call.key.unwrap_or_default())
                .collect()
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        /// Resolves once a call has started (one wake-up per call).
        pub async fn wait_for_call(&self) {
            self.entered.notified().await;
        }

        async fn record(
            &self,
            kind: OperationKind,
            collection: &str,
            key: Option<String>,
        ) -> Result<(), RemoteError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            self.calls.lock().unwrap().push(RemoteCall {
                kind,
                collection: collection.to_string(),
                key: key.clone(),
            });
            self.entered.notify_one();

            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let failure = key.and_then(|k| self.failures.lock().unwrap().get(&k).cloned());
            match failure {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl RemoteStore for MockRemote {
        async fn insert(&self, collection: &str, record: &Record) -> Result<(), RemoteError> {
            let key = record
                .get(fieldops_core::PRIMARY_KEY_FIELD)
                .and_then(RecordKey::from_value)
                .map(|k| k.to_string());
            self.record(OperationKind::Insert, collection, key).await
        }

        async fn update(&self, collection: &str, key: &RecordKey, _record: &Record) -> Result<(), RemoteError> {
            self.record(OperationKind::Update, collection, Some(key.to_string()))
                .await
        }

        async fn delete(&self, collection: &str, key: &RecordKey) -> Result<(), RemoteError> {
            self.record(OperationKind::Delete, collection, Some(key.to_string()))
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockRemote;
    use super::*;
    use fieldops_core::OperationKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_apply_dispatches_by_mutation() {
        let remote = MockRemote::new();

        let record = json!({ "id": "S1", "status": "delivered" }).as_object().cloned().unwrap();
        let update = QueuedOperation::new("shipments", Mutation::update(record).unwrap(), 0);
        let delete = QueuedOperation::new("farmers", Mutation::delete(7_i64), 0);

        apply(&remote, &update).await.unwrap();
        apply(&remote, &delete).await.unwrap();

        let calls = remote.calls();
        assert_eq!(calls[0].kind, OperationKind::Update);
        assert_eq!(calls[0].collection, "shipments");
        assert_eq!(calls[0].key.as_deref(), Some("S1"));
        assert_eq!(calls[1].kind, OperationKind::Delete);
        assert_eq!(calls[1].key.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_apply_surfaces_failure() {
        let remote = MockRemote::new();
        remote.fail_key("F1", RemoteError::from_status(409, "duplicate key"));

        let record = json!({ "id": "F1" }).as_object().cloned().unwrap();
        let op = QueuedOperation::new("farmers", Mutation::Insert(record), 0);

        let err = apply(&remote, &op).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_unconfigured_remote_is_transient() {
        let op = QueuedOperation::new("farmers", Mutation::delete("F1"), 0);
        let err = apply(&UnconfiguredRemote, &op).await.unwrap_err();
        assert!(err.is_transient());
    }
}
