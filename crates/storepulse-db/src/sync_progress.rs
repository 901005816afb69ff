//! Database operations for `sync_progress` — the mutable "current run"
//! record read by polling clients.
//!
//! Two behaviors live here rather than in the orchestrator:
//!
//! - **Run lease**: [`start_progress`] only creates a row when no non-stale
//!   `in_progress` row exists for the store. A second trigger while a run is
//!   live gets `None` back and must treat the start as a no-op. The
//!   staleness window doubles as the lease expiry.
//! - **Self-healing read**: [`get_current_progress`] reclassifies a run that
//!   has gone [`STALENESS_WINDOW_MINUTES`] without an update as `failed`, so
//!   pollers never wait forever on an abandoned run.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// Minutes without a progress update after which an `in_progress` run is
/// considered abandoned.
pub const STALENESS_WINDOW_MINUTES: i64 = 15;

/// A row from the `sync_progress` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncProgressRow {
    pub id: i64,
    pub store_id: i64,
    pub connection_id: i64,
    pub status: String,
    pub current_page: i32,
    pub total_pages: Option<i32>,
    pub orders_processed: i32,
    pub total_orders: Option<i32>,
    pub skipped_orders: i32,
    pub warning_message: Option<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied after each page. `None` fields keep their stored
/// value; `updated_at` always refreshes (it is the liveness signal).
#[derive(Debug, Clone, Default)]
pub struct ProgressPatch {
    pub current_page: Option<i32>,
    pub total_pages: Option<i32>,
    pub orders_processed: Option<i32>,
    pub total_orders: Option<i32>,
    pub skipped_orders: Option<i32>,
    pub warning_message: Option<String>,
}

const PROGRESS_COLUMNS: &str = "id, store_id, connection_id, status, current_page, total_pages, \
     orders_processed, total_orders, skipped_orders, warning_message, error_message, \
     started_at, updated_at";

/// Starts a run by inserting an `in_progress` row, guarded against a live
/// concurrent run for the same store.
///
/// Returns `None` when another non-stale `in_progress` row exists — the
/// caller must not start a second run.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn start_progress(
    pool: &PgPool,
    store_id: i64,
    connection_id: i64,
) -> Result<Option<SyncProgressRow>, DbError> {
    let row = sqlx::query_as::<_, SyncProgressRow>(&format!(
        "INSERT INTO sync_progress (store_id, connection_id, status) \
         SELECT $1, $2, 'in_progress' \
         WHERE NOT EXISTS ( \
             SELECT 1 FROM sync_progress \
             WHERE store_id = $1 \
               AND status = 'in_progress' \
               AND updated_at > NOW() - ($3 * INTERVAL '1 minute') \
         ) \
         RETURNING {PROGRESS_COLUMNS}"
    ))
    .bind(store_id)
    .bind(connection_id)
    .bind(STALENESS_WINDOW_MINUTES)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Returns the newest progress row for a store, reclassifying a stale
/// `in_progress` run as `failed` on the way out.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if a query fails.
pub async fn get_current_progress(
    pool: &PgPool,
    store_id: i64,
) -> Result<Option<SyncProgressRow>, DbError> {
    let Some(row) = sqlx::query_as::<_, SyncProgressRow>(&format!(
        "SELECT {PROGRESS_COLUMNS} FROM sync_progress \
         WHERE store_id = $1 \
         ORDER BY started_at DESC, id DESC LIMIT 1"
    ))
    .bind(store_id)
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };

    if row.status != "in_progress" {
        return Ok(Some(row));
    }

    // The status guard makes the flip race-safe: if the run finalizes
    // between our read and this update, zero rows match and we re-read.
    let healed = sqlx::query_as::<_, SyncProgressRow>(&format!(
        "UPDATE sync_progress \
         SET status = 'failed', \
             error_message = 'sync timed out: no progress update for {STALENESS_WINDOW_MINUTES} minutes', \
             updated_at = NOW() \
         WHERE id = $1 \
           AND status = 'in_progress' \
           AND updated_at < NOW() - ($2 * INTERVAL '1 minute') \
         RETURNING {PROGRESS_COLUMNS}"
    ))
    .bind(row.id)
    .bind(STALENESS_WINDOW_MINUTES)
    .fetch_optional(pool)
    .await?;

    match healed {
        Some(failed) => {
            tracing::warn!(
                progress_id = failed.id,
                store_id,
                "reclassified stale in-progress sync as failed"
            );
            Ok(Some(failed))
        }
        None => Ok(Some(row)),
    }
}

/// Merges counter/note updates into a run and refreshes `updated_at`.
///
/// # Errors
///
/// Returns [`DbError::InvalidProgressTransition`] if the run is no longer
/// `in_progress`, or [`DbError::Sqlx`] if the update fails.
pub async fn update_progress(
    pool: &PgPool,
    progress_id: i64,
    patch: &ProgressPatch,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE sync_progress \
         SET current_page     = COALESCE($1, current_page), \
             total_pages      = COALESCE($2, total_pages), \
             orders_processed = COALESCE($3, orders_processed), \
             total_orders     = COALESCE($4, total_orders), \
             skipped_orders   = COALESCE($5, skipped_orders), \
             warning_message  = COALESCE($6, warning_message), \
             updated_at       = NOW() \
         WHERE id = $7 AND status = 'in_progress'",
    )
    .bind(patch.current_page)
    .bind(patch.total_pages)
    .bind(patch.orders_processed)
    .bind(patch.total_orders)
    .bind(patch.skipped_orders)
    .bind(&patch.warning_message)
    .bind(progress_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidProgressTransition { id: progress_id });
    }
    Ok(())
}

/// Finalizes a run to `completed` or `failed`. Valid exactly once per run.
///
/// # Errors
///
/// Returns [`DbError::InvalidProgressTransition`] if the run was already
/// finalized, or [`DbError::Sqlx`] if the update fails.
pub async fn finalize_progress(
    pool: &PgPool,
    progress_id: i64,
    status: &str,
    error_message: Option<&str>,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE sync_progress \
         SET status = $1, error_message = $2, updated_at = NOW() \
         WHERE id = $3 AND status = 'in_progress'",
    )
    .bind(status)
    .bind(error_message)
    .bind(progress_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidProgressTransition { id: progress_id });
    }
    Ok(())
}
