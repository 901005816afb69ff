//! Per-record idempotent reconciliation of raw orders and products.
//!
//! The central policy: one bad record never aborts the batch. Sync runs
//! against noisy, loosely-typed upstream data and must make maximal forward
//! progress, so every per-record problem is counted and the loop moves on.

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;

use storepulse_core::{RawOrder, RawProduct};
use storepulse_db::{
    find_transaction_id, insert_transaction, update_transaction, upsert_product,
    TransactionRecord,
};

/// Counters accumulated over one reconciled batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub new: i32,
    pub updated: i32,
    pub skipped: i32,
    pub errors: i32,
    pub invalid_dates: i32,
    pub missing_ids: i32,
    pub outside_window: i32,
}

impl BatchStats {
    /// Records that made it into storage on this batch.
    #[must_use]
    pub fn processed(&self) -> i32 {
        self.new + self.updated
    }

    /// Records that did not: skipped plus single-record persistence failures.
    #[must_use]
    pub fn not_processed(&self) -> i32 {
        self.skipped + self.errors
    }

    pub fn absorb(&mut self, other: BatchStats) {
        self.new += other.new;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.invalid_dates += other.invalid_dates;
        self.missing_ids += other.missing_ids;
        self.outside_window += other.outside_window;
    }
}

/// Parses a Magento date string, accepting the API's native
/// `"YYYY-MM-DD HH:MM:SS"` (UTC) format and RFC 3339.
fn parse_transaction_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Reconciles one batch of raw orders into the `transactions` table.
///
/// Per record: a missing external id skips it (counted); an absent or
/// unparseable date is repaired to "now" and the record kept (counted); a
/// date before `window_start` skips it as outside the retention window
/// (counted, not an error); otherwise the record is upserted on
/// `(store_id, external_id)` and counted as new or updated. A single-record
/// persistence failure increments `errors` and the loop continues.
///
/// Infallible by design: all failure modes land in the returned counters.
pub async fn reconcile_batch(
    pool: &PgPool,
    store_id: i64,
    records: &[RawOrder],
    window_start: Option<DateTime<Utc>>,
) -> BatchStats {
    let mut stats = BatchStats::default();

    for raw in records {
        let Some(external_id) = raw.external_id.as_deref() else {
            stats.missing_ids += 1;
            stats.skipped += 1;
            continue;
        };

        let transaction_date = match raw.created_at.as_deref().and_then(parse_transaction_date) {
            Some(date) => date,
            None => {
                stats.invalid_dates += 1;
                Utc::now()
            }
        };

        if let Some(window_start) = window_start {
            if transaction_date < window_start {
                stats.outside_window += 1;
                stats.skipped += 1;
                continue;
            }
        }

        let record = TransactionRecord {
            external_id: external_id.to_string(),
            transaction_date,
            amount: raw.grand_total.unwrap_or(Decimal::ZERO),
            customer_id: raw.customer_id.clone(),
            customer_name: raw.customer_name.clone(),
            items_count: raw.items_count,
            metadata: json!({
                "status": raw.status,
                "store_view": raw.store_view,
                "payment_method": raw.payment_method,
            }),
        };

        let result = match find_transaction_id(pool, store_id, external_id).await {
            Ok(Some(id)) => update_transaction(pool, id, &record).await.map(|()| false),
            Ok(None) => insert_transaction(pool, store_id, &record).await.map(|_| true),
            Err(e) => Err(e),
        };

        match result {
            Ok(true) => stats.new += 1,
            Ok(false) => stats.updated += 1,
            Err(e) => {
                stats.errors += 1;
                tracing::warn!(
                    store_id,
                    external_id,
                    error = %e,
                    "failed to persist order, continuing with batch"
                );
            }
        }
    }

    stats
}

/// Reconciles one batch of raw products into the `products` table.
///
/// Same per-record policy as [`reconcile_batch`], minus date handling —
/// products carry no transaction date, so the retention window does not
/// apply.
pub async fn reconcile_product_batch(
    pool: &PgPool,
    store_id: i64,
    records: &[RawProduct],
) -> BatchStats {
    let mut stats = BatchStats::default();

    for raw in records {
        let Some(external_id) = raw.external_id.as_deref() else {
            stats.missing_ids += 1;
            stats.skipped += 1;
            continue;
        };

        match upsert_product(
            pool,
            store_id,
            external_id,
            raw.name.as_deref(),
            raw.price,
            raw.status.as_deref(),
        )
        .await
        {
            Ok(true) => stats.new += 1,
            Ok(false) => stats.updated += 1,
            Err(e) => {
                stats.errors += 1;
                tracing::warn!(
                    store_id,
                    external_id,
                    error = %e,
                    "failed to persist product, continuing with batch"
                );
            }
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_magento_native_date_format() {
        let parsed = parse_transaction_date("2025-04-03 10:15:00").expect("should parse");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 4, 3, 10, 15, 0).unwrap());
    }

    #[test]
    fn parses_rfc3339_date() {
        let parsed = parse_transaction_date("2025-04-03T10:15:00Z").expect("should parse");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 4, 3, 10, 15, 0).unwrap());
    }

    #[test]
    fn rejects_garbage_dates() {
        assert_eq!(parse_transaction_date("not-a-date"), None);
        assert_eq!(parse_transaction_date(""), None);
        assert_eq!(parse_transaction_date("03/04/2025"), None);
    }

    #[test]
    fn stats_absorb_accumulates_all_counters() {
        let mut total = BatchStats {
            new: 1,
            updated: 2,
            skipped: 1,
            errors: 0,
            invalid_dates: 1,
            missing_ids: 1,
            outside_window: 0,
        };
        total.absorb(BatchStats {
            new: 3,
            updated: 0,
            skipped: 2,
            errors: 1,
            invalid_dates: 0,
            missing_ids: 0,
            outside_window: 2,
        });

        assert_eq!(total.new, 4);
        assert_eq!(total.updated, 2);
        assert_eq!(total.skipped, 3);
        assert_eq!(total.errors, 1);
        assert_eq!(total.invalid_dates, 1);
        assert_eq!(total.missing_ids, 1);
        assert_eq!(total.outside_window, 2);
        assert_eq!(total.processed(), 6);
        assert_eq!(total.not_processed(), 4);
    }
}
