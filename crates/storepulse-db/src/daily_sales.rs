//! Database operations for the `daily_sales` rollup table.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::DbError;

/// A row from the `daily_sales` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DailySalesRow {
    pub id: i64,
    pub store_id: i64,
    pub sale_date: NaiveDate,
    pub total_sales: Decimal,
    pub order_count: i32,
    pub average_order_value: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Returns the set of dates that already have a rollup row, so the
/// aggregator can report inserted vs updated.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn existing_sale_dates(pool: &PgPool, store_id: i64) -> Result<Vec<NaiveDate>, DbError> {
    let dates =
        sqlx::query_scalar::<_, NaiveDate>("SELECT sale_date FROM daily_sales WHERE store_id = $1")
            .bind(store_id)
            .fetch_all(pool)
            .await?;

    Ok(dates)
}

/// Upserts one day's rollup. Conflicts on `(store_id, sale_date)` update the
/// totals in place.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_daily_sales(
    pool: &PgPool,
    store_id: i64,
    sale_date: NaiveDate,
    total_sales: Decimal,
    order_count: i32,
    average_order_value: Decimal,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO daily_sales \
             (store_id, sale_date, total_sales, order_count, average_order_value) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (store_id, sale_date) DO UPDATE SET \
             total_sales         = EXCLUDED.total_sales, \
             order_count         = EXCLUDED.order_count, \
             average_order_value = EXCLUDED.average_order_value, \
             updated_at          = NOW()",
    )
    .bind(store_id)
    .bind(sale_date)
    .bind(total_sales)
    .bind(order_count)
    .bind(average_order_value)
    .execute(pool)
    .await?;

    Ok(())
}

/// Deletes rollup rows for dates not in `keep` — days whose transactions
/// have all been removed or re-dated since the last recompute.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn delete_other_daily_sales(
    pool: &PgPool,
    store_id: i64,
    keep: &[NaiveDate],
) -> Result<u64, DbError> {
    let deleted =
        sqlx::query("DELETE FROM daily_sales WHERE store_id = $1 AND sale_date <> ALL($2)")
            .bind(store_id)
            .bind(keep)
            .execute(pool)
            .await?;

    Ok(deleted.rows_affected())
}

/// Returns a store's rollups ordered by date.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_daily_sales(pool: &PgPool, store_id: i64) -> Result<Vec<DailySalesRow>, DbError> {
    let rows = sqlx::query_as::<_, DailySalesRow>(
        "SELECT id, store_id, sale_date, total_sales, order_count, average_order_value, \
                updated_at \
         FROM daily_sales WHERE store_id = $1 ORDER BY sale_date",
    )
    .bind(store_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
