//! Storage for the store views reported by a connection test.

use sqlx::PgPool;

use crate::DbError;

/// Replaces a store's recorded views with a fresh listing, transactionally.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails (the transaction rolls
/// back).
pub async fn replace_store_views(
    pool: &PgPool,
    store_id: i64,
    views: &[(String, String)],
) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM store_views WHERE store_id = $1")
        .bind(store_id)
        .execute(&mut *tx)
        .await?;

    for (code, name) in views {
        sqlx::query(
            "INSERT INTO store_views (store_id, view_code, view_name) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (store_id, view_code) DO UPDATE SET view_name = EXCLUDED.view_name",
        )
        .bind(store_id)
        .bind(code)
        .bind(name)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}
