//! The sync run state machine.
//!
//! A run moves through Initializing → Paging → Aggregating → Completed, or
//! exits early as Failed, AlreadyRunning (lease not acquired), or
//! Continuation (per-invocation page budget exhausted with data remaining).
//!
//! Pagination is strictly sequential: each page's progress write depends on
//! the prior page's reconciliation, and the remote rate limits favor
//! serialization. The upstream `total_count` is used for progress display
//! only — termination relies on short pages and the empty-page streak.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use storepulse_core::{AppConfig, DataType, RawOrder, RawProduct};
use storepulse_db::{
    finalize_progress, get_connection, get_current_progress, get_last_sync_date,
    insert_sync_history, set_connection_status, set_store_sync_result, start_progress,
    update_last_sync_date, update_progress, with_backoff, ConnectionRow, DbError, NewSyncHistory,
    ProgressPatch, SyncProgressRow,
};
use storepulse_magento::{MagentoClient, StoreAuth};

use crate::aggregate::{recompute_daily_sales, AggregateStats};
use crate::error::SyncError;
use crate::reconcile::{reconcile_batch, reconcile_product_batch, BatchStats};

/// Consecutive empty pages treated as end-of-data even when the upstream
/// total claims more items remain.
const EMPTY_PAGE_STREAK_LIMIT: u32 = 3;

/// Fraction of a page's items that may be skipped before the run carries a
/// warning.
const SKIP_RATE_WARNING_THRESHOLD: f64 = 0.8;

/// Tuning for one sync invocation.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub data_type: DataType,
    pub page_size: i64,
    /// Per-invocation page budget; reaching it with data remaining produces
    /// a [`SyncOutcome::Continuation`].
    pub max_pages: i64,
    pub start_page: i64,
    /// Orders dated before `now - retention_days` are skipped, not errored.
    pub retention_days: Option<i64>,
    pub db_write_max_retries: u32,
    pub db_write_backoff_base_ms: u64,
}

impl SyncOptions {
    #[must_use]
    pub fn from_app_config(config: &AppConfig, data_type: DataType) -> Self {
        Self {
            data_type,
            page_size: config.sync_page_size,
            max_pages: config.sync_max_pages,
            start_page: 1,
            retention_days: config.sync_retention_days,
            db_write_max_retries: config.db_write_max_retries,
            db_write_backoff_base_ms: config.db_write_backoff_base_ms,
        }
    }
}

/// Descriptor handed back when an invocation's page budget runs out before
/// the data does. Feed it to [`continue_sync`] to resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationToken {
    pub connection_id: i64,
    pub store_id: i64,
    pub data_type: DataType,
    pub next_page: i64,
}

/// Totals for a run that reached completion.
#[derive(Debug)]
pub struct RunSummary {
    pub progress_id: i64,
    pub store_id: i64,
    pub connection_id: i64,
    pub data_type: DataType,
    pub pages_fetched: i64,
    pub stats: BatchStats,
    pub aggregate: Option<AggregateStats>,
}

/// How a sync invocation ended.
#[derive(Debug)]
pub enum SyncOutcome {
    Completed(RunSummary),
    Continuation(ContinuationToken),
    /// A non-stale run already holds the lease for this store; the trigger
    /// was a no-op.
    AlreadyRunning,
}

/// Starts a sync run for a connection.
///
/// Initializing validates the connection (exists, not in `error` status,
/// linked to a store, matching `requested_store_id` when given) and acquires
/// the per-store run lease. A live concurrent run yields
/// [`SyncOutcome::AlreadyRunning`] without touching anything.
///
/// # Errors
///
/// Initialization failures ([`SyncError::ConnectionNotFound`],
/// [`SyncError::ConnectionNotUsable`], [`SyncError::StoreNotLinked`],
/// [`SyncError::StoreMismatch`]) abort before any page is fetched; when the
/// connection already has a store, the rejection is still recorded as a
/// failed `sync_history` entry and on the store's last sync result. Errors
/// during paging or aggregation finalize the run as failed (observable in
/// `sync_progress` and `sync_history`) and are then returned.
pub async fn run_sync(
    pool: &PgPool,
    client: &MagentoClient,
    connection_id: i64,
    requested_store_id: Option<i64>,
    opts: &SyncOptions,
) -> Result<SyncOutcome, SyncError> {
    let connection = load_usable_connection(pool, connection_id, opts.data_type).await?;
    let Some(store_id) = connection.store_id else {
        let err = SyncError::StoreNotLinked { id: connection.id };
        record_init_failure(pool, connection.id, None, opts.data_type, &err).await;
        return Err(err);
    };
    if let Some(requested) = requested_store_id {
        if requested != store_id {
            let err = SyncError::StoreMismatch {
                connection_id: connection.id,
                requested_store_id: requested,
            };
            record_init_failure(pool, connection.id, Some(store_id), opts.data_type, &err).await;
            return Err(err);
        }
    }

    let Some(progress) = start_progress(pool, store_id, connection.id).await? else {
        tracing::info!(
            store_id,
            connection_id = connection.id,
            "sync already in progress for store, ignoring trigger"
        );
        return Ok(SyncOutcome::AlreadyRunning);
    };

    tracing::info!(
        store_id,
        connection_id = connection.id,
        data_type = %opts.data_type,
        progress_id = progress.id,
        "sync run started"
    );

    drive(pool, client, &connection, progress, opts).await
}

/// Resumes a paused run from its continuation descriptor.
///
/// If the original progress row is still `in_progress`, paging picks up at
/// `token.next_page` against that row; if it has since been finalized or
/// reclassified, a fresh run is started at the same page.
///
/// # Errors
///
/// Same taxonomy as [`run_sync`].
pub async fn continue_sync(
    pool: &PgPool,
    client: &MagentoClient,
    token: &ContinuationToken,
    opts: &SyncOptions,
) -> Result<SyncOutcome, SyncError> {
    let connection = load_usable_connection(pool, token.connection_id, token.data_type).await?;
    if connection.store_id != Some(token.store_id) {
        let err = SyncError::StoreMismatch {
            connection_id: connection.id,
            requested_store_id: token.store_id,
        };
        record_init_failure(pool, connection.id, connection.store_id, token.data_type, &err).await;
        return Err(err);
    }

    let mut opts = opts.clone();
    opts.data_type = token.data_type;
    opts.start_page = token.next_page;

    let resumable = get_current_progress(pool, token.store_id)
        .await?
        .filter(|p| p.status == "in_progress" && p.connection_id == token.connection_id);

    let progress = match resumable {
        Some(progress) => progress,
        None => match start_progress(pool, token.store_id, connection.id).await? {
            Some(progress) => progress,
            None => return Ok(SyncOutcome::AlreadyRunning),
        },
    };

    tracing::info!(
        store_id = token.store_id,
        connection_id = connection.id,
        next_page = token.next_page,
        progress_id = progress.id,
        "resuming sync run"
    );

    drive(pool, client, &connection, progress, &opts).await
}

async fn load_usable_connection(
    pool: &PgPool,
    connection_id: i64,
    data_type: DataType,
) -> Result<ConnectionRow, SyncError> {
    let connection = match get_connection(pool, connection_id).await {
        Ok(connection) => connection,
        Err(DbError::NotFound) => {
            tracing::error!(connection_id, "sync trigger for unknown connection");
            return Err(SyncError::ConnectionNotFound);
        }
        Err(e) => return Err(e.into()),
    };
    if connection.status == "error" {
        let err = SyncError::ConnectionNotUsable { id: connection.id };
        record_init_failure(pool, connection.id, connection.store_id, data_type, &err).await;
        return Err(err);
    }
    Ok(connection)
}

/// Initialization rejections happen before a progress row exists, so the
/// failure record goes straight to `sync_history` (and the store's last sync
/// result) when the connection is linked to a store. Best-effort: the
/// rejection is returned to the caller either way.
async fn record_init_failure(
    pool: &PgPool,
    connection_id: i64,
    store_id: Option<i64>,
    data_type: DataType,
    err: &SyncError,
) {
    let message = err.to_string();
    tracing::error!(
        connection_id,
        store_id = ?store_id,
        error = %message,
        "sync rejected during initialization"
    );
    let Some(store_id) = store_id else { return };

    if let Err(e) = insert_sync_history(
        pool,
        &NewSyncHistory {
            store_id,
            connection_id,
            data_type: data_type.to_string(),
            status: "failed".to_string(),
            orders_processed: 0,
            skipped_orders: 0,
            error_message: Some(message),
            started_at: Utc::now(),
        },
    )
    .await
    {
        tracing::error!(connection_id, error = %e, "failed to record sync history");
    }
    if let Err(e) = set_store_sync_result(pool, store_id, "failed").await {
        tracing::error!(store_id, error = %e, "failed to record store sync result");
    }
}

/// Runs the paging/aggregation phases and, on any error, marks the run
/// failed before propagating. Failure is never silent.
async fn drive(
    pool: &PgPool,
    client: &MagentoClient,
    connection: &ConnectionRow,
    progress: SyncProgressRow,
    opts: &SyncOptions,
) -> Result<SyncOutcome, SyncError> {
    match run_phases(pool, client, connection, &progress, opts).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            mark_run_failed(pool, connection, &progress, opts, &err).await;
            Err(err)
        }
    }
}

async fn run_phases(
    pool: &PgPool,
    client: &MagentoClient,
    connection: &ConnectionRow,
    progress: &SyncProgressRow,
    opts: &SyncOptions,
) -> Result<SyncOutcome, SyncError> {
    let store_id = progress.store_id;
    let auth = StoreAuth {
        base_url: connection.store_url.clone(),
        access_token: connection.access_token.clone(),
    };

    let since = get_last_sync_date(pool, store_id, opts.data_type).await?;
    let window_start = opts.retention_days.map(|days| Utc::now() - Duration::days(days));
    // Checkpoint at the run's start, not its end: records modified while we
    // were paging fall after this instant and are refetched next run.
    // Refetching is safe — reconciliation is idempotent.
    let checkpoint_at = progress.started_at;

    // Counters already on the row (continuation path) stay included.
    let base_processed = progress.orders_processed;
    let base_skipped = progress.skipped_orders;

    let mut totals = BatchStats::default();
    let mut warning = progress.warning_message.clone();
    let mut page = opts.start_page.max(1);
    let mut empty_streak = 0u32;
    let mut pages_fetched = 0i64;

    let continuation_page = loop {
        let fetched = client
            .fetch_page(&auth, opts.data_type, page, opts.page_size, since)
            .await?;
        pages_fetched += 1;
        if fetched.items.is_empty() {
            empty_streak += 1;
        } else {
            empty_streak = 0;
        }

        let stats = match opts.data_type {
            DataType::Orders => {
                let raws: Vec<RawOrder> =
                    fetched.items.iter().map(RawOrder::from_value).collect();
                reconcile_batch(pool, store_id, &raws, window_start).await
            }
            DataType::Products => {
                let raws: Vec<RawProduct> =
                    fetched.items.iter().map(RawProduct::from_value).collect();
                reconcile_product_batch(pool, store_id, &raws).await
            }
        };
        totals.absorb(stats);

        if warning.is_none() {
            if let Some(message) = skip_rate_warning(page, &stats, fetched.items.len()) {
                tracing::warn!(store_id, page, %message, "skip rate above threshold");
                warning = Some(message);
            }
        }

        let patch = ProgressPatch {
            current_page: clamp_i32(page),
            total_pages: claimed_pages(fetched.total_count, opts.page_size),
            orders_processed: Some(base_processed + totals.processed()),
            total_orders: clamp_i32(fetched.total_count),
            skipped_orders: Some(base_skipped + totals.not_processed()),
            warning_message: warning.clone(),
        };
        with_backoff(opts.db_write_max_retries, opts.db_write_backoff_base_ms, || {
            update_progress(pool, progress.id, &patch)
        })
        .await?;

        match page_decision(
            fetched.items.len(),
            opts.page_size,
            empty_streak,
            pages_fetched >= opts.max_pages,
        ) {
            PageDecision::Continue => page += 1,
            PageDecision::EndOfData => break None,
            PageDecision::BudgetExhausted => break Some(page + 1),
        }
    };

    if let Some(next_page) = continuation_page {
        tracing::info!(
            store_id,
            next_page,
            pages_fetched,
            "page budget exhausted, handing off continuation"
        );
        return Ok(SyncOutcome::Continuation(ContinuationToken {
            connection_id: connection.id,
            store_id,
            data_type: opts.data_type,
            next_page,
        }));
    }

    let aggregate = match opts.data_type {
        DataType::Orders => Some(recompute_daily_sales(pool, store_id).await?),
        DataType::Products => None,
    };

    with_backoff(opts.db_write_max_retries, opts.db_write_backoff_base_ms, || {
        update_last_sync_date(pool, store_id, opts.data_type, checkpoint_at)
    })
    .await?;

    finalize_progress(pool, progress.id, "completed", None).await?;
    insert_sync_history(
        pool,
        &NewSyncHistory {
            store_id,
            connection_id: connection.id,
            data_type: opts.data_type.to_string(),
            status: "completed".to_string(),
            orders_processed: base_processed + totals.processed(),
            skipped_orders: base_skipped + totals.not_processed(),
            error_message: None,
            started_at: progress.started_at,
        },
    )
    .await?;
    set_store_sync_result(pool, store_id, "success").await?;

    // First successful sync promotes a pending connection.
    if connection.status == "pending" {
        set_connection_status(pool, connection.id, "active").await?;
    }

    tracing::info!(
        store_id,
        pages_fetched,
        processed = totals.processed(),
        skipped = totals.not_processed(),
        invalid_dates = totals.invalid_dates,
        "sync run completed"
    );

    Ok(SyncOutcome::Completed(RunSummary {
        progress_id: progress.id,
        store_id,
        connection_id: connection.id,
        data_type: opts.data_type,
        pages_fetched,
        stats: totals,
        aggregate,
    }))
}

/// Best-effort failure marking: each write is attempted even if an earlier
/// one fails, so a partial outage still leaves as much of the failure
/// observable as possible.
async fn mark_run_failed(
    pool: &PgPool,
    connection: &ConnectionRow,
    progress: &SyncProgressRow,
    opts: &SyncOptions,
    err: &SyncError,
) {
    let message = err.to_string();
    tracing::error!(
        store_id = progress.store_id,
        connection_id = connection.id,
        progress_id = progress.id,
        error = %message,
        "sync run failed"
    );

    if let Err(e) = finalize_progress(pool, progress.id, "failed", Some(&message)).await {
        tracing::error!(progress_id = progress.id, error = %e, "failed to mark progress failed");
    }
    if let Err(e) = insert_sync_history(
        pool,
        &NewSyncHistory {
            store_id: progress.store_id,
            connection_id: connection.id,
            data_type: opts.data_type.to_string(),
            status: "failed".to_string(),
            orders_processed: progress.orders_processed,
            skipped_orders: progress.skipped_orders,
            error_message: Some(message),
            started_at: progress.started_at,
        },
    )
    .await
    {
        tracing::error!(progress_id = progress.id, error = %e, "failed to record sync history");
    }
    if let Err(e) = set_store_sync_result(pool, progress.store_id, "failed").await {
        tracing::error!(store_id = progress.store_id, error = %e, "failed to record store sync result");
    }
    // The connection stays out of scheduled syncs until it is re-validated.
    if let Err(e) = set_connection_status(pool, connection.id, "error").await {
        tracing::error!(connection_id = connection.id, error = %e, "failed to demote connection");
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PageDecision {
    Continue,
    EndOfData,
    BudgetExhausted,
}

/// Decides what happens after a page, given the page's size, the current
/// empty-page streak (already including this page), and whether the
/// invocation budget is spent.
fn page_decision(
    items_on_page: usize,
    page_size: i64,
    empty_streak: u32,
    budget_exhausted: bool,
) -> PageDecision {
    if items_on_page == 0 {
        if empty_streak >= EMPTY_PAGE_STREAK_LIMIT {
            return PageDecision::EndOfData;
        }
    } else if (items_on_page as i64) < page_size {
        // A short non-empty page is the API reporting no more items.
        return PageDecision::EndOfData;
    }
    if budget_exhausted {
        return PageDecision::BudgetExhausted;
    }
    PageDecision::Continue
}

fn skip_rate_warning(page: i64, stats: &BatchStats, items_on_page: usize) -> Option<String> {
    if items_on_page == 0 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let rate = f64::from(stats.not_processed()) / items_on_page as f64;
    if rate >= SKIP_RATE_WARNING_THRESHOLD {
        Some(format!(
            "high skip rate on page {page}: {} of {items_on_page} records skipped",
            stats.not_processed()
        ))
    } else {
        None
    }
}

fn claimed_pages(total_count: i64, page_size: i64) -> Option<i32> {
    if total_count <= 0 || page_size <= 0 {
        return None;
    }
    clamp_i32((total_count + page_size - 1) / page_size)
}

fn clamp_i32(value: i64) -> Option<i32> {
    if value <= 0 {
        return None;
    }
    Some(i32::try_from(value).unwrap_or(i32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_page_with_budget_left_continues() {
        assert_eq!(page_decision(100, 100, 0, false), PageDecision::Continue);
    }

    #[test]
    fn short_page_ends_the_run() {
        assert_eq!(page_decision(37, 100, 0, false), PageDecision::EndOfData);
        assert_eq!(page_decision(37, 100, 0, true), PageDecision::EndOfData);
    }

    #[test]
    fn single_empty_page_keeps_paging() {
        // Upstream totals are not trusted; one empty page may be a gap.
        assert_eq!(page_decision(0, 100, 1, false), PageDecision::Continue);
        assert_eq!(page_decision(0, 100, 2, false), PageDecision::Continue);
    }

    #[test]
    fn three_consecutive_empty_pages_end_the_run() {
        assert_eq!(page_decision(0, 100, 3, false), PageDecision::EndOfData);
    }

    #[test]
    fn exhausted_budget_with_full_page_hands_off() {
        assert_eq!(
            page_decision(100, 100, 0, true),
            PageDecision::BudgetExhausted
        );
    }

    #[test]
    fn skip_rate_below_threshold_is_quiet() {
        let stats = BatchStats {
            new: 50,
            skipped: 50,
            ..BatchStats::default()
        };
        assert_eq!(skip_rate_warning(1, &stats, 100), None);
    }

    #[test]
    fn skip_rate_at_threshold_warns() {
        let stats = BatchStats {
            new: 20,
            skipped: 75,
            errors: 5,
            ..BatchStats::default()
        };
        let warning = skip_rate_warning(4, &stats, 100).expect("should warn");
        assert!(warning.contains("page 4"), "{warning}");
        assert!(warning.contains("80 of 100"), "{warning}");
    }

    #[test]
    fn empty_page_never_warns() {
        assert_eq!(skip_rate_warning(1, &BatchStats::default(), 0), None);
    }

    #[test]
    fn claimed_pages_rounds_up() {
        assert_eq!(claimed_pages(250, 100), Some(3));
        assert_eq!(claimed_pages(300, 100), Some(3));
        assert_eq!(claimed_pages(0, 100), None);
        assert_eq!(claimed_pages(-1, 100), None);
    }

    #[test]
    fn continuation_token_serializes_round_trip() {
        let token = ContinuationToken {
            connection_id: 7,
            store_id: 3,
            data_type: storepulse_core::DataType::Orders,
            next_page: 21,
        };
        let json = serde_json::to_string(&token).expect("serialize");
        assert!(json.contains("\"next_page\":21"), "{json}");
        let back: ContinuationToken = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, token);
    }
}
