//! Live integration tests for storepulse-db using `sqlx::test`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness. The `migrations` path is relative to the crate root
//! (`crates/storepulse-db/`), so `"../../migrations"` resolves to the
//! workspace migration directory.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use storepulse_core::DataType;
use storepulse_db::{
    count_transactions, create_connection, create_store, delete_connection_cascade,
    finalize_progress, get_connection, get_current_progress, get_last_sync_date, insert_transaction,
    link_store, list_daily_sales, ping, start_progress, update_last_sync_date, update_progress,
    upsert_daily_sales, DbError, NewConnection, ProgressPatch, TransactionRecord,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn insert_test_store(pool: &sqlx::PgPool, name: &str) -> i64 {
    create_store(pool, name, Some("https://shop.example.com"))
        .await
        .unwrap_or_else(|e| panic!("insert_test_store failed for '{name}': {e}"))
        .id
}

async fn insert_test_connection(pool: &sqlx::PgPool, store_id: Option<i64>) -> i64 {
    let connection = create_connection(
        pool,
        &NewConnection {
            user_id: None,
            name: "Test Shop".to_string(),
            store_url: "https://shop.example.com".to_string(),
            access_token: "token".to_string(),
        },
    )
    .await
    .expect("create_connection");

    if let Some(store_id) = store_id {
        link_store(pool, connection.id, store_id)
            .await
            .expect("link_store");
    }
    connection.id
}

fn make_record(external_id: &str, amount: i64) -> TransactionRecord {
    TransactionRecord {
        external_id: external_id.to_string(),
        transaction_date: Utc::now(),
        amount: Decimal::new(amount, 2),
        customer_id: None,
        customer_name: None,
        items_count: 1,
        metadata: serde_json::json!({}),
    }
}

// ---------------------------------------------------------------------------
// sync_progress: lease + staleness
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn start_progress_acquires_and_blocks_second_run(pool: sqlx::PgPool) {
    let store_id = insert_test_store(&pool, "lease-store").await;
    let connection_id = insert_test_connection(&pool, Some(store_id)).await;

    let first = start_progress(&pool, store_id, connection_id)
        .await
        .expect("start_progress")
        .expect("first run should acquire the lease");
    assert_eq!(first.status, "in_progress");
    assert_eq!(first.current_page, 0);

    let second = start_progress(&pool, store_id, connection_id)
        .await
        .expect("start_progress");
    assert!(second.is_none(), "second concurrent run must be rejected");

    // Finalizing releases the lease for the next run.
    finalize_progress(&pool, first.id, "completed", None)
        .await
        .expect("finalize_progress");
    let third = start_progress(&pool, store_id, connection_id)
        .await
        .expect("start_progress");
    assert!(third.is_some(), "lease should be free after finalization");
}

#[sqlx::test(migrations = "../../migrations")]
async fn stale_in_progress_run_is_reclassified_on_read(pool: sqlx::PgPool) {
    let store_id = insert_test_store(&pool, "stale-store").await;
    let connection_id = insert_test_connection(&pool, Some(store_id)).await;

    let run = start_progress(&pool, store_id, connection_id)
        .await
        .expect("start_progress")
        .expect("lease");

    // Backdate the liveness signal past the staleness window.
    sqlx::query("UPDATE sync_progress SET updated_at = NOW() - INTERVAL '20 minutes' WHERE id = $1")
        .bind(run.id)
        .execute(&pool)
        .await
        .expect("backdate");

    let read = get_current_progress(&pool, store_id)
        .await
        .expect("get_current_progress")
        .expect("row");
    assert_eq!(read.status, "failed");
    assert!(
        read.error_message.as_deref().unwrap_or("").contains("timed out"),
        "stale run should carry a timeout message: {:?}",
        read.error_message
    );

    // A stale (now failed) run no longer blocks the lease.
    let next = start_progress(&pool, store_id, connection_id)
        .await
        .expect("start_progress");
    assert!(next.is_some());
}

#[sqlx::test(migrations = "../../migrations")]
async fn fresh_in_progress_run_is_returned_untouched(pool: sqlx::PgPool) {
    let store_id = insert_test_store(&pool, "fresh-store").await;
    let connection_id = insert_test_connection(&pool, Some(store_id)).await;

    let run = start_progress(&pool, store_id, connection_id)
        .await
        .expect("start_progress")
        .expect("lease");

    let read = get_current_progress(&pool, store_id)
        .await
        .expect("get_current_progress")
        .expect("row");
    assert_eq!(read.id, run.id);
    assert_eq!(read.status, "in_progress");
}

#[sqlx::test(migrations = "../../migrations")]
async fn update_progress_patches_counters_monotonically(pool: sqlx::PgPool) {
    let store_id = insert_test_store(&pool, "counter-store").await;
    let connection_id = insert_test_connection(&pool, Some(store_id)).await;
    let run = start_progress(&pool, store_id, connection_id)
        .await
        .expect("start_progress")
        .expect("lease");

    for page in 1..=3 {
        update_progress(
            &pool,
            run.id,
            &ProgressPatch {
                current_page: Some(page),
                orders_processed: Some(page * 100),
                ..ProgressPatch::default()
            },
        )
        .await
        .expect("update_progress");

        let read = get_current_progress(&pool, store_id)
            .await
            .expect("read")
            .expect("row");
        assert_eq!(read.current_page, page);
        assert_eq!(read.orders_processed, page * 100);
    }

    // Patch with only a warning; counters must keep their values.
    update_progress(
        &pool,
        run.id,
        &ProgressPatch {
            warning_message: Some("high skip rate on page 3".to_string()),
            ..ProgressPatch::default()
        },
    )
    .await
    .expect("update_progress");

    let read = get_current_progress(&pool, store_id)
        .await
        .expect("read")
        .expect("row");
    assert_eq!(read.current_page, 3);
    assert_eq!(read.warning_message.as_deref(), Some("high skip rate on page 3"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn finalize_progress_is_single_shot(pool: sqlx::PgPool) {
    let store_id = insert_test_store(&pool, "final-store").await;
    let connection_id = insert_test_connection(&pool, Some(store_id)).await;
    let run = start_progress(&pool, store_id, connection_id)
        .await
        .expect("start_progress")
        .expect("lease");

    finalize_progress(&pool, run.id, "failed", Some("remote API returned HTTP 500"))
        .await
        .expect("first finalize");

    let err = finalize_progress(&pool, run.id, "completed", None)
        .await
        .expect_err("second finalize must fail");
    assert!(matches!(err, DbError::InvalidProgressTransition { .. }));
}

// ---------------------------------------------------------------------------
// checkpoints
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn checkpoints_are_per_data_type(pool: sqlx::PgPool) {
    let store_id = insert_test_store(&pool, "checkpoint-store").await;

    assert_eq!(
        get_last_sync_date(&pool, store_id, DataType::Orders)
            .await
            .expect("get"),
        None
    );

    let orders_ts = Utc::now() - Duration::hours(2);
    let products_ts = Utc::now() - Duration::days(3);
    update_last_sync_date(&pool, store_id, DataType::Orders, orders_ts)
        .await
        .expect("set orders");
    update_last_sync_date(&pool, store_id, DataType::Products, products_ts)
        .await
        .expect("set products");

    let orders_read = get_last_sync_date(&pool, store_id, DataType::Orders)
        .await
        .expect("get")
        .expect("some");
    let products_read = get_last_sync_date(&pool, store_id, DataType::Products)
        .await
        .expect("get")
        .expect("some");
    assert!((orders_read - orders_ts).num_seconds().abs() < 1);
    assert!((products_read - products_ts).num_seconds().abs() < 1);

    // Upsert moves the checkpoint forward in place.
    let newer = Utc::now();
    update_last_sync_date(&pool, store_id, DataType::Orders, newer)
        .await
        .expect("advance orders");
    let advanced = get_last_sync_date(&pool, store_id, DataType::Orders)
        .await
        .expect("get")
        .expect("some");
    assert!(advanced > orders_read);
}

// ---------------------------------------------------------------------------
// cascade delete
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn delete_connection_cascades_store_scoped_data(pool: sqlx::PgPool) {
    let store_id = insert_test_store(&pool, "cascade-store").await;
    let connection_id = insert_test_connection(&pool, Some(store_id)).await;

    insert_transaction(&pool, store_id, &make_record("100000001", 4_999))
        .await
        .expect("insert transaction");
    insert_transaction(&pool, store_id, &make_record("100000002", 12_550))
        .await
        .expect("insert transaction");
    upsert_daily_sales(
        &pool,
        store_id,
        Utc::now().date_naive(),
        Decimal::new(17_549, 2),
        2,
        Decimal::new(8_774, 2),
    )
    .await
    .expect("upsert daily sales");
    update_last_sync_date(&pool, store_id, DataType::Orders, Utc::now())
        .await
        .expect("checkpoint");
    let run = start_progress(&pool, store_id, connection_id)
        .await
        .expect("start")
        .expect("lease");
    finalize_progress(&pool, run.id, "completed", None)
        .await
        .expect("finalize");

    delete_connection_cascade(&pool, connection_id)
        .await
        .expect("cascade delete");

    assert_eq!(count_transactions(&pool, store_id).await.expect("count"), 0);
    assert!(list_daily_sales(&pool, store_id)
        .await
        .expect("daily sales")
        .is_empty());
    assert_eq!(
        get_last_sync_date(&pool, store_id, DataType::Orders)
            .await
            .expect("checkpoint read"),
        None
    );
    assert!(matches!(
        get_connection(&pool, connection_id).await,
        Err(DbError::NotFound)
    ));

    // Repeating the deletion reports not-found rather than erroring destructively.
    assert!(matches!(
        delete_connection_cascade(&pool, connection_id).await,
        Err(DbError::NotFound)
    ));
}

#[sqlx::test(migrations = "../../migrations")]
async fn delete_connection_without_store_removes_only_connection_rows(pool: sqlx::PgPool) {
    let connection_id = insert_test_connection(&pool, None).await;

    delete_connection_cascade(&pool, connection_id)
        .await
        .expect("delete");

    assert!(matches!(
        get_connection(&pool, connection_id).await,
        Err(DbError::NotFound)
    ));
}

// ---------------------------------------------------------------------------
// transactions: unique key
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn duplicate_external_id_is_rejected_by_unique_key(pool: sqlx::PgPool) {
    let store_id = insert_test_store(&pool, "unique-store").await;

    insert_transaction(&pool, store_id, &make_record("100000007", 1_000))
        .await
        .expect("first insert");
    let err = insert_transaction(&pool, store_id, &make_record("100000007", 2_000))
        .await
        .expect_err("duplicate must violate (store_id, external_id)");
    assert!(matches!(err, DbError::Sqlx(_)));

    // The same external id under a different store is fine.
    let other_store = insert_test_store(&pool, "unique-store-2").await;
    insert_transaction(&pool, other_store, &make_record("100000007", 3_000))
        .await
        .expect("same external id, different store");
}

// ---------------------------------------------------------------------------
// pool health
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn ping_succeeds_against_live_pool(pool: sqlx::PgPool) {
    ping(&pool).await.expect("ping should succeed");
}
