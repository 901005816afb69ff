//! Database operations for `magento_connections`, including the deletion
//! cascade over store-scoped data.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `magento_connections` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConnectionRow {
    pub id: i64,
    pub public_id: Uuid,
    pub user_id: Option<Uuid>,
    pub name: String,
    pub store_url: String,
    pub access_token: String,
    pub status: String,
    pub store_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a connection. Status always starts at `pending`.
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub user_id: Option<Uuid>,
    pub name: String,
    pub store_url: String,
    pub access_token: String,
}

const CONNECTION_COLUMNS: &str = "id, public_id, user_id, name, store_url, access_token, \
     status, store_id, created_at, updated_at";

/// Creates a new connection in `pending` status and returns the full row.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_connection(
    pool: &PgPool,
    input: &NewConnection,
) -> Result<ConnectionRow, DbError> {
    let row = sqlx::query_as::<_, ConnectionRow>(&format!(
        "INSERT INTO magento_connections (public_id, user_id, name, store_url, access_token, status) \
         VALUES ($1, $2, $3, $4, $5, 'pending') \
         RETURNING {CONNECTION_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(input.user_id)
    .bind(&input.name)
    .bind(&input.store_url)
    .bind(&input.access_token)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetches a connection by internal id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`] if
/// the query fails.
pub async fn get_connection(pool: &PgPool, id: i64) -> Result<ConnectionRow, DbError> {
    sqlx::query_as::<_, ConnectionRow>(&format!(
        "SELECT {CONNECTION_COLUMNS} FROM magento_connections WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Fetches a connection by its public UUID.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`] if
/// the query fails.
pub async fn get_connection_by_public_id(
    pool: &PgPool,
    public_id: Uuid,
) -> Result<ConnectionRow, DbError> {
    sqlx::query_as::<_, ConnectionRow>(&format!(
        "SELECT {CONNECTION_COLUMNS} FROM magento_connections WHERE public_id = $1"
    ))
    .bind(public_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Finds the connection linked to a store, if any. A store has at most one
/// connection; the newest wins if legacy data holds several.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn find_connection_by_store(
    pool: &PgPool,
    store_id: i64,
) -> Result<Option<ConnectionRow>, DbError> {
    let row = sqlx::query_as::<_, ConnectionRow>(&format!(
        "SELECT {CONNECTION_COLUMNS} FROM magento_connections \
         WHERE store_id = $1 ORDER BY id DESC LIMIT 1"
    ))
    .bind(store_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Returns every connection, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_connections(pool: &PgPool) -> Result<Vec<ConnectionRow>, DbError> {
    let rows = sqlx::query_as::<_, ConnectionRow>(&format!(
        "SELECT {CONNECTION_COLUMNS} FROM magento_connections ORDER BY id DESC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns all `active` connections, for scheduled syncs.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_active_connections(pool: &PgPool) -> Result<Vec<ConnectionRow>, DbError> {
    let rows = sqlx::query_as::<_, ConnectionRow>(&format!(
        "SELECT {CONNECTION_COLUMNS} FROM magento_connections \
         WHERE status = 'active' ORDER BY id"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Updates a connection's lifecycle status.
///
/// The schema's CHECK constraint rejects `active` for a connection without a
/// linked store, so callers must link first.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`] if
/// the update fails.
pub async fn set_connection_status(pool: &PgPool, id: i64, status: &str) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE magento_connections SET status = $1, updated_at = NOW() WHERE id = $2",
    )
    .bind(status)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Links a connection to its store row.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`] if
/// the update fails.
pub async fn link_store(pool: &PgPool, id: i64, store_id: i64) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE magento_connections SET store_id = $1, updated_at = NOW() WHERE id = $2",
    )
    .bind(store_id)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Deletes a connection and everything scoped to its linked store, in one
/// transaction.
///
/// With a linked store: transactions, daily sales, sync progress, sync
/// checkpoints, sync history, store views, the store row, then the
/// connection. Without one: only the connection's own sync progress rows and
/// the connection itself.
///
/// Idempotent: deleting a connection that no longer exists returns
/// [`DbError::NotFound`] without touching anything.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the connection does not exist, or
/// [`DbError::Sqlx`] if any statement fails (the transaction rolls back).
pub async fn delete_connection_cascade(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    let store_id: Option<Option<i64>> = sqlx::query_scalar(
        "SELECT store_id FROM magento_connections WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(store_id) = store_id else {
        return Err(DbError::NotFound);
    };

    if let Some(store_id) = store_id {
        sqlx::query("DELETE FROM products WHERE store_id = $1")
            .bind(store_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM transactions WHERE store_id = $1")
            .bind(store_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM daily_sales WHERE store_id = $1")
            .bind(store_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sync_progress WHERE store_id = $1")
            .bind(store_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sync_checkpoints WHERE store_id = $1")
            .bind(store_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sync_history WHERE store_id = $1")
            .bind(store_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM store_views WHERE store_id = $1")
            .bind(store_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM magento_connections WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM stores WHERE id = $1")
            .bind(store_id)
            .execute(&mut *tx)
            .await?;
    } else {
        sqlx::query("DELETE FROM sync_progress WHERE connection_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM magento_connections WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}
