//! Per-data-type "last synced at" checkpoints used to build incremental
//! `updated_at > X` filters on the next run.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use storepulse_core::DataType;

use crate::DbError;

/// Returns the last successful sync instant for `(store, data_type)`, or
/// `None` before the first full sync of that type.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_last_sync_date(
    pool: &PgPool,
    store_id: i64,
    data_type: DataType,
) -> Result<Option<DateTime<Utc>>, DbError> {
    let ts = sqlx::query_scalar::<_, DateTime<Utc>>(
        "SELECT last_synced_at FROM sync_checkpoints \
         WHERE store_id = $1 AND data_type = $2",
    )
    .bind(store_id)
    .bind(data_type.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(ts)
}

/// Upserts the checkpoint for `(store, data_type)`.
///
/// Callers only invoke this after the data type's fetch + reconcile +
/// aggregate phase fully succeeds.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn update_last_sync_date(
    pool: &PgPool,
    store_id: i64,
    data_type: DataType,
    last_synced_at: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO sync_checkpoints (store_id, data_type, last_synced_at) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (store_id, data_type) DO UPDATE SET \
             last_synced_at = EXCLUDED.last_synced_at, \
             updated_at     = NOW()",
    )
    .bind(store_id)
    .bind(data_type.as_str())
    .bind(last_synced_at)
    .execute(pool)
    .await?;

    Ok(())
}
