//! Database operations for synced `products`.

use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::DbError;

/// Upserts a product keyed on `(store_id, external_id)`.
///
/// Returns `true` when a new row was inserted, `false` on an in-place update.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_product(
    pool: &PgPool,
    store_id: i64,
    external_id: &str,
    name: Option<&str>,
    price: Option<Decimal>,
    status: Option<&str>,
) -> Result<bool, DbError> {
    // xmax = 0 only for freshly-inserted row versions, which distinguishes
    // the insert arm of the upsert from the update arm.
    let inserted = sqlx::query_scalar::<_, bool>(
        "INSERT INTO products (store_id, external_id, name, price, status) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (store_id, external_id) DO UPDATE SET \
             name       = EXCLUDED.name, \
             price      = EXCLUDED.price, \
             status     = EXCLUDED.status, \
             updated_at = NOW() \
         RETURNING (xmax = 0)",
    )
    .bind(store_id)
    .bind(external_id)
    .bind(name)
    .bind(price)
    .bind(status)
    .fetch_one(pool)
    .await?;

    Ok(inserted)
}

/// Counts all products stored for a store.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn count_products(pool: &PgPool, store_id: i64) -> Result<i64, DbError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM products WHERE store_id = $1")
        .bind(store_id)
        .fetch_one(pool)
        .await?;

    Ok(count)
}
