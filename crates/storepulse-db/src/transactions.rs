//! Database operations for reconciled `transactions`.
//!
//! Reconciliation is an upsert keyed on `(store_id, external_id)`; the
//! lookup/insert/update split is kept explicit so the reconciler can count
//! new vs updated records separately.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::DbError;

/// A row from the `transactions` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransactionRow {
    pub id: i64,
    pub store_id: i64,
    pub external_id: String,
    pub transaction_date: DateTime<Utc>,
    pub amount: Decimal,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub product_id: Option<i64>,
    pub items_count: i32,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The normalized fields written for one reconciled order.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub external_id: String,
    pub transaction_date: DateTime<Utc>,
    pub amount: Decimal,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub items_count: i32,
    pub metadata: serde_json::Value,
}

/// One day's totals as grouped directly in SQL, consumed by the aggregator.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DailyTotalRow {
    pub day: NaiveDate,
    pub total: Decimal,
    pub orders: i64,
}

/// Finds an existing transaction id by the `(store_id, external_id)` key.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn find_transaction_id(
    pool: &PgPool,
    store_id: i64,
    external_id: &str,
) -> Result<Option<i64>, DbError> {
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM transactions WHERE store_id = $1 AND external_id = $2",
    )
    .bind(store_id)
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    Ok(id)
}

/// Inserts a new reconciled transaction.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails (including a unique-key
/// conflict from a concurrent writer; the reconciler counts that as a
/// per-record error).
pub async fn insert_transaction(
    pool: &PgPool,
    store_id: i64,
    record: &TransactionRecord,
) -> Result<i64, DbError> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO transactions \
             (store_id, external_id, transaction_date, amount, customer_id, \
              customer_name, items_count, metadata) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8::jsonb) \
         RETURNING id",
    )
    .bind(store_id)
    .bind(&record.external_id)
    .bind(record.transaction_date)
    .bind(record.amount)
    .bind(&record.customer_id)
    .bind(&record.customer_name)
    .bind(record.items_count)
    .bind(&record.metadata)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Updates an existing transaction in place with freshly-fetched fields.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn update_transaction(
    pool: &PgPool,
    id: i64,
    record: &TransactionRecord,
) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE transactions \
         SET transaction_date = $1, amount = $2, customer_id = $3, \
             customer_name = $4, items_count = $5, metadata = $6::jsonb, \
             updated_at = NOW() \
         WHERE id = $7",
    )
    .bind(record.transaction_date)
    .bind(record.amount)
    .bind(&record.customer_id)
    .bind(&record.customer_name)
    .bind(record.items_count)
    .bind(&record.metadata)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Counts all transactions stored for a store.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn count_transactions(pool: &PgPool, store_id: i64) -> Result<i64, DbError> {
    let count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM transactions WHERE store_id = $1")
            .bind(store_id)
            .fetch_one(pool)
            .await?;

    Ok(count)
}

/// Groups a store's transactions by UTC calendar date.
///
/// Days with no transactions simply do not appear, which is how the
/// aggregator avoids ever writing a zero-order rollup.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn daily_totals(pool: &PgPool, store_id: i64) -> Result<Vec<DailyTotalRow>, DbError> {
    let rows = sqlx::query_as::<_, DailyTotalRow>(
        "SELECT (transaction_date AT TIME ZONE 'UTC')::date AS day, \
                COALESCE(SUM(amount), 0) AS total, \
                COUNT(*) AS orders \
         FROM transactions \
         WHERE store_id = $1 \
         GROUP BY day \
         ORDER BY day",
    )
    .bind(store_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
