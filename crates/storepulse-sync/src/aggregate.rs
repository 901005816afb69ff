//! Full recompute of per-store, per-day sales rollups.
//!
//! Always a full recompute, never an incremental delta: reconciliation
//! updates can rewrite historical amounts and dates at any time, and an
//! incremental adjustment would drift away from the truth.

use std::collections::HashSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::PgPool;

use storepulse_db::{
    daily_totals, delete_other_daily_sales, existing_sale_dates, upsert_daily_sales,
};

use crate::error::SyncError;

/// Outcome of one rollup recompute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateStats {
    pub inserted: u32,
    pub updated: u32,
    pub deleted: u64,
}

/// Recomputes all `daily_sales` rows for a store from its current
/// transaction set.
///
/// Groups transactions by UTC calendar date, upserts one rollup per day
/// with `average_order_value = total / count`, and deletes rollups for days
/// that no longer have any transactions. Days with zero orders are never
/// written.
///
/// # Errors
///
/// Returns [`SyncError::Db`] if any query fails.
pub async fn recompute_daily_sales(
    pool: &PgPool,
    store_id: i64,
) -> Result<AggregateStats, SyncError> {
    let totals = daily_totals(pool, store_id).await?;
    let existing: HashSet<NaiveDate> = existing_sale_dates(pool, store_id)
        .await?
        .into_iter()
        .collect();

    let mut stats = AggregateStats::default();
    let mut keep: Vec<NaiveDate> = Vec::with_capacity(totals.len());

    for day in &totals {
        // GROUP BY guarantees orders >= 1 here.
        let order_count = i32::try_from(day.orders).unwrap_or(i32::MAX);
        let average = (day.total / Decimal::from(day.orders)).round_dp(2);

        upsert_daily_sales(pool, store_id, day.day, day.total, order_count, average).await?;

        if existing.contains(&day.day) {
            stats.updated += 1;
        } else {
            stats.inserted += 1;
        }
        keep.push(day.day);
    }

    stats.deleted = delete_other_daily_sales(pool, store_id, &keep).await?;

    tracing::debug!(
        store_id,
        inserted = stats.inserted,
        updated = stats.updated,
        deleted = stats.deleted,
        "recomputed daily sales rollups"
    );

    Ok(stats)
}
