//! Append-only audit log of finished sync runs.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `sync_history` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncHistoryRow {
    pub id: i64,
    pub store_id: i64,
    pub connection_id: i64,
    pub data_type: String,
    pub status: String,
    pub orders_processed: i32,
    pub skipped_orders: i32,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Input for one history entry, written when a run completes or fails.
#[derive(Debug, Clone)]
pub struct NewSyncHistory {
    pub store_id: i64,
    pub connection_id: i64,
    pub data_type: String,
    pub status: String,
    pub orders_processed: i32,
    pub skipped_orders: i32,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Appends a finished-run entry.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_sync_history(pool: &PgPool, entry: &NewSyncHistory) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO sync_history \
             (store_id, connection_id, data_type, status, orders_processed, \
              skipped_orders, error_message, started_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(entry.store_id)
    .bind(entry.connection_id)
    .bind(&entry.data_type)
    .bind(&entry.status)
    .bind(entry.orders_processed)
    .bind(entry.skipped_orders)
    .bind(&entry.error_message)
    .bind(entry.started_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Returns the most recent `limit` history entries for a store.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_sync_history(
    pool: &PgPool,
    store_id: i64,
    limit: i64,
) -> Result<Vec<SyncHistoryRow>, DbError> {
    let rows = sqlx::query_as::<_, SyncHistoryRow>(
        "SELECT id, store_id, connection_id, data_type, status, orders_processed, \
                skipped_orders, error_message, started_at, finished_at \
         FROM sync_history \
         WHERE store_id = $1 \
         ORDER BY finished_at DESC, id DESC \
         LIMIT $2",
    )
    .bind(store_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
