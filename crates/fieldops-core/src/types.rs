//! # Domain Types
//!
//! Types that describe a pending write and its fate.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────────┐   ┌─────────────────┐   ┌─────────────────┐   │
//! │  │  QueuedOperation    │   │    Mutation     │   │   DeadLetter    │   │
//! │  │  ─────────────────  │   │  ─────────────  │   │  ─────────────  │   │
//! │  │  id (UUID v4)       │   │  Insert(record) │   │  operation      │   │
//! │  │  target_collection  │──►│  Update{key,..} │   │  reason         │   │
//! │  │  mutation           │   │  Delete(key)    │   │  dead_lettered  │   │
//! │  │  enqueued_at        │   └─────────────────┘   └─────────────────┘   │
//! │  │  priority           │                                                │
//! │  │  attempts           │   ┌─────────────────┐   ┌─────────────────┐   │
//! │  │  last_error         │   │   RecordKey     │   │ QuarantinedEntry│   │
//! │  └─────────────────────┘   │  Integer | Text │   │  raw JSON text  │   │
//! │                            └─────────────────┘   └─────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Persisted Shape
//! A `QueuedOperation` is stored as
//! `{id, targetCollection, kind, payload, enqueuedAt, priority, attempts, lastError}`.
//! The closed [`Mutation`] enum is flattened into `kind` + `payload` on the
//! way out and rebuilt (and re-validated) on the way in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{CoreError, ValidationError};
use crate::PRIMARY_KEY_FIELD;

/// A record as sent to the remote store: a JSON object.
pub type Record = Map<String, Value>;

// =============================================================================
// Record Key
// =============================================================================

/// Primary key of a remote record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    /// Integer key (serial ids).
    Integer(i64),
    /// Text key (UUIDs, business codes like "F1").
    Text(String),
}

impl RecordKey {
    /// Extracts a key from a JSON value, rejecting blanks and non-scalars.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(RecordKey::Text(s.clone())),
            Value::Number(n) => n.as_i64().map(RecordKey::Integer),
            _ => None,
        }
    }

    /// Converts the key back into a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            RecordKey::Integer(n) => Value::from(*n),
            RecordKey::Text(s) => Value::String(s.clone()),
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKey::Integer(n) => write!(f, "{}", n),
            RecordKey::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for RecordKey {
    fn from(s: &str) -> Self {
        RecordKey::Text(s.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(s: String) -> Self {
        RecordKey::Text(s)
    }
}

impl From<i64> for RecordKey {
    fn from(n: i64) -> Self {
        RecordKey::Integer(n)
    }
}

// =============================================================================
// Operation Kind
// =============================================================================

/// The three write kinds the remote store understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl OperationKind {
    /// Returns the lowercase wire tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "insert" => Ok(OperationKind::Insert),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(CoreError::UnknownKind(other.to_string())),
        }
    }
}

// =============================================================================
// Mutation
// =============================================================================

/// A write against one remote collection.
///
/// Closed set: adding a kind is a compile-time change that every `match`
/// in the engine and the remote adapters has to handle.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Create a record. The payload is sent as-is.
    Insert(Record),

    /// Overwrite a record addressed by its primary key.
    Update { key: RecordKey, record: Record },

    /// Remove a record by primary key.
    Delete(RecordKey),
}

impl Mutation {
    /// Builds a mutation from a kind tag and a payload.
    ///
    /// ## Rules
    /// - Insert: any object
    /// - Update: object carrying a string or integer `id`
    /// - Delete: object carrying a string or integer `id` (other fields ignored)
    pub fn from_parts(kind: OperationKind, payload: Record) -> Result<Self, ValidationError> {
        match kind {
            OperationKind::Insert => Ok(Mutation::Insert(payload)),
            OperationKind::Update => {
                let key = primary_key(kind, &payload)?;
                Ok(Mutation::Update {
                    key,
                    record: payload,
                })
            }
            OperationKind::Delete => Ok(Mutation::Delete(primary_key(kind, &payload)?)),
        }
    }

    /// Shorthand for an update whose key is read from the record.
    pub fn update(record: Record) -> Result<Self, ValidationError> {
        Self::from_parts(OperationKind::Update, record)
    }

    /// Shorthand for a delete by key.
    pub fn delete(key: impl Into<RecordKey>) -> Self {
        Mutation::Delete(key.into())
    }

    /// Returns the kind tag.
    pub fn kind(&self) -> OperationKind {
        match self {
            Mutation::Insert(_) => OperationKind::Insert,
            Mutation::Update { .. } => OperationKind::Update,
            Mutation::Delete(_) => OperationKind::Delete,
        }
    }

    /// Returns the primary key, when the mutation addresses an existing record.
    ///
    /// Inserts report the payload's `id` if one is present.
    pub fn key(&self) -> Option<RecordKey> {
        match self {
            Mutation::Insert(record) => record.get(PRIMARY_KEY_FIELD).and_then(RecordKey::from_value),
            Mutation::Update { key, .. } => Some(key.clone()),
            Mutation::Delete(key) => Some(key.clone()),
        }
    }

    /// Returns the payload in its persisted form.
    pub fn to_payload(&self) -> Record {
        match self {
            Mutation::Insert(record) => record.clone(),
            Mutation::Update { record, .. } => record.clone(),
            Mutation::Delete(key) => {
                let mut payload = Record::new();
                payload.insert(PRIMARY_KEY_FIELD.to_string(), key.to_value());
                payload
            }
        }
    }
}

fn primary_key(kind: OperationKind, payload: &Record) -> Result<RecordKey, ValidationError> {
    payload
        .get(PRIMARY_KEY_FIELD)
        .and_then(RecordKey::from_value)
        .ok_or_else(|| ValidationError::MissingPrimaryKey {
            kind,
            field: PRIMARY_KEY_FIELD.to_string(),
        })
}

// =============================================================================
// Queued Operation
// =============================================================================

/// A write that has not yet been confirmed by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredOperation", into = "StoredOperation")]
pub struct QueuedOperation {
    /// Unique identifier (UUID v4), generated at enqueue time.
    pub id: String,

    /// Remote collection the write applies to.
    pub target_collection: String,

    /// The write itself.
    pub mutation: Mutation,

    /// When the write was queued. FIFO tiebreaker within a priority.
    pub enqueued_at: DateTime<Utc>,

    /// Higher drains first.
    pub priority: i32,

    /// Number of times the remote store rejected this write.
    /// Transient failures (offline, timeouts) are not counted.
    pub attempts: u32,

    /// Last failure message, if any.
    pub last_error: Option<String>,
}

impl QueuedOperation {
    /// Creates a new operation stamped with a fresh id and the current time.
    pub fn new(target_collection: impl Into<String>, mutation: Mutation, priority: i32) -> Self {
        Self::new_at(target_collection, mutation, priority, Utc::now())
    }

    /// Creates a new operation with an explicit enqueue timestamp.
    pub fn new_at(
        target_collection: impl Into<String>,
        mutation: Mutation,
        priority: i32,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        QueuedOperation {
            id: Uuid::new_v4().to_string(),
            target_collection: target_collection.into(),
            mutation,
            enqueued_at,
            priority,
            attempts: 0,
            last_error: None,
        }
    }

    /// Returns the kind tag.
    #[inline]
    pub fn kind(&self) -> OperationKind {
        self.mutation.kind()
    }

    /// Returns the primary key addressed by this write, if known.
    #[inline]
    pub fn key(&self) -> Option<RecordKey> {
        self.mutation.key()
    }
}

/// Wire form of [`QueuedOperation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredOperation {
    pub id: String,
    pub target_collection: String,
    pub kind: String,
    pub payload: Record,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TryFrom<StoredOperation> for QueuedOperation {
    type Error = CoreError;

    fn try_from(stored: StoredOperation) -> Result<Self, Self::Error> {
        if stored.id.trim().is_empty() {
            return Err(CoreError::MalformedRecord("empty id".to_string()));
        }

        let kind: OperationKind = stored.kind.parse()?;
        let mutation = Mutation::from_parts(kind, stored.payload)?;

        Ok(QueuedOperation {
            id: stored.id,
            target_collection: stored.target_collection,
            mutation,
            enqueued_at: stored.enqueued_at,
            priority: stored.priority,
            attempts: stored.attempts,
            last_error: stored.last_error,
        })
    }
}

impl From<QueuedOperation> for StoredOperation {
    fn from(op: QueuedOperation) -> Self {
        StoredOperation {
            payload: op.mutation.to_payload(),
            kind: op.mutation.kind().as_str().to_string(),
            id: op.id,
            target_collection: op.target_collection,
            enqueued_at: op.enqueued_at,
            priority: op.priority,
            attempts: op.attempts,
            last_error: op.last_error,
        }
    }
}

// =============================================================================
// Dead Letter
// =============================================================================

/// An operation taken out of the pending queue after repeated rejections.
///
/// Kept for an operator to inspect, re-queue, or discard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub operation: QueuedOperation,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(operation: QueuedOperation, reason: impl Into<String>) -> Self {
        DeadLetter {
            operation,
            reason: reason.into(),
            dead_lettered_at: Utc::now(),
        }
    }
}

// =============================================================================
// Quarantined Entry
// =============================================================================

/// Raw stored text that could not be decoded into queue records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantinedEntry {
    pub raw: String,
    pub reason: String,
    pub quarantined_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_update_requires_primary_key() {
        let err = Mutation::from_parts(OperationKind::Update, record(json!({ "status": "x" })));
        assert!(matches!(
            err,
            Err(ValidationError::MissingPrimaryKey {
                kind: OperationKind::Update,
                ..
            })
        ));

        let blank = Mutation::from_parts(OperationKind::Delete, record(json!({ "id": "  " })));
        assert!(blank.is_err());

        let ok = Mutation::from_parts(OperationKind::Update, record(json!({ "id": 42, "qty": 3 })));
        assert_eq!(ok.unwrap().key(), Some(RecordKey::Integer(42)));
    }

    #[test]
    fn test_insert_accepts_any_object() {
        let m = Mutation::from_parts(OperationKind::Insert, record(json!({ "name": "A" }))).unwrap();
        assert_eq!(m.kind(), OperationKind::Insert);
        assert_eq!(m.key(), None);
    }

    #[test]
    fn test_delete_payload_carries_only_key() {
        let m = Mutation::from_parts(
            OperationKind::Delete,
            record(json!({ "id": "F1", "name": "ignored" })),
        )
        .unwrap();
        assert_eq!(m, Mutation::delete("F1"));
        assert_eq!(m.to_payload(), record(json!({ "id": "F1" })));
    }

    #[test]
    fn test_persisted_layout() {
        let op = QueuedOperation::new(
            "shipments",
            Mutation::update(record(json!({ "id": "S1", "status": "delivered" }))).unwrap(),
            9,
        );
        let value = serde_json::to_value(&op).unwrap();

        assert_eq!(value["targetCollection"], "shipments");
        assert_eq!(value["kind"], "update");
        assert_eq!(value["payload"]["status"], "delivered");
        assert_eq!(value["priority"], 9);
        assert!(value["enqueuedAt"].is_string());
        assert!(value.get("lastError").is_none());

        let back: QueuedOperation = serde_json::from_value(value).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_legacy_record_without_attempts() {
        let raw = json!({
            "id": "op-1",
            "targetCollection": "farmers",
            "kind": "insert",
            "payload": { "id": "F1", "name": "A" },
            "enqueuedAt": "2024-05-01T10:00:00Z",
            "priority": 5
        });
        let op: QueuedOperation = serde_json::from_value(raw).unwrap();
        assert_eq!(op.attempts, 0);
        assert_eq!(op.last_error, None);
        assert_eq!(op.kind(), OperationKind::Insert);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let raw = json!({
            "id": "op-1",
            "targetCollection": "farmers",
            "kind": "upsert",
            "payload": { "id": "F1" },
            "enqueuedAt": "2024-05-01T10:00:00Z",
            "priority": 0
        });
        let err = serde_json::from_value::<QueuedOperation>(raw).unwrap_err();
        assert!(err.to_string().contains("upsert"));
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("INSERT".parse::<OperationKind>().unwrap(), OperationKind::Insert);
        assert_eq!("delete".parse::<OperationKind>().unwrap(), OperationKind::Delete);
        assert!("merge".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_record_key_display() {
        assert_eq!(RecordKey::from("S1").to_string(), "S1");
        assert_eq!(RecordKey::from(7_i64).to_string(), "7");
    }
}
