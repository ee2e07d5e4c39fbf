//! # Key/Value Helpers
//!
//! Thin wrappers over the `kv_store` table. They take a connection rather
//! than the pool so callers can run them inside one transaction.

use chrono::Utc;
use sqlx::SqliteConnection;

use crate::error::DbResult;

/// Pending operations, as a JSON array.
pub const QUEUE_KEY: &str = "offline_queue";

/// Dead letters, as a JSON array.
pub const DEAD_LETTER_KEY: &str = "offline_queue_dead_letter";

/// Quarantined raw entries, as a JSON array.
pub const QUARANTINE_KEY: &str = "offline_queue_quarantine";

/// RFC 3339 timestamp of the last completed drain pass.
pub const LAST_SYNC_KEY: &str = "offline_queue_last_sync";

/// Reads a value.
pub async fn get(conn: &mut SqliteConnection, key: &str) -> DbResult<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM kv_store WHERE key = ?1")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(value)
}

/// Writes a value, replacing any previous one.
pub async fn put(conn: &mut SqliteConnection, key: &str, value: &str) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO kv_store (key, value, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Creates the key with `default` if it is absent.
///
/// Issued as the first statement of a read-modify-write transaction: it is a
/// write, so SQLite takes the database write lock here rather than at the
/// final `put`, and a second process cannot interleave between read and write.
pub async fn reserve(conn: &mut SqliteConnection, key: &str, default: &str) -> DbResult<()> {
    sqlx::query("INSERT OR IGNORE INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)")
        .bind(key)
        .bind(default)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Deletes a key. Returns true if it existed.
pub async fn delete(conn: &mut SqliteConnection, key: &str) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM kv_store WHERE key = ?1")
        .bind(key)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}
