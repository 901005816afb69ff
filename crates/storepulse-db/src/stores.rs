//! Database operations for the `stores` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `stores` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoreRow {
    pub id: i64,
    pub public_id: Uuid,
    pub name: String,
    pub url: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_sync_result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const STORE_COLUMNS: &str =
    "id, public_id, name, url, last_synced_at, last_sync_result, created_at, updated_at";

/// Creates a store row. Used by the lifecycle manager the first time a
/// connection is validated.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_store(
    pool: &PgPool,
    name: &str,
    url: Option<&str>,
) -> Result<StoreRow, DbError> {
    let row = sqlx::query_as::<_, StoreRow>(&format!(
        "INSERT INTO stores (public_id, name, url) VALUES ($1, $2, $3) \
         RETURNING {STORE_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(url)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Looks up a store by display name (lifecycle reuse path).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn find_store_by_name(pool: &PgPool, name: &str) -> Result<Option<StoreRow>, DbError> {
    let row = sqlx::query_as::<_, StoreRow>(&format!(
        "SELECT {STORE_COLUMNS} FROM stores WHERE name = $1 ORDER BY id LIMIT 1"
    ))
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Fetches a store by internal id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`] if
/// the query fails.
pub async fn get_store(pool: &PgPool, id: i64) -> Result<StoreRow, DbError> {
    sqlx::query_as::<_, StoreRow>(&format!("SELECT {STORE_COLUMNS} FROM stores WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Fetches a store by its public UUID.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`] if
/// the query fails.
pub async fn get_store_by_public_id(pool: &PgPool, public_id: Uuid) -> Result<StoreRow, DbError> {
    sqlx::query_as::<_, StoreRow>(&format!(
        "SELECT {STORE_COLUMNS} FROM stores WHERE public_id = $1"
    ))
    .bind(public_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Records the outcome of a sync run on the store (`success` or `failed`)
/// and refreshes `last_synced_at`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`] if
/// the update fails.
pub async fn set_store_sync_result(pool: &PgPool, id: i64, result: &str) -> Result<(), DbError> {
    let updated = sqlx::query(
        "UPDATE stores \
         SET last_synced_at = NOW(), last_sync_result = $1, updated_at = NOW() \
         WHERE id = $2",
    )
    .bind(result)
    .bind(id)
    .execute(pool)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}
