//! In-process sync job queue.
//!
//! Sync work is never spawned fire-and-forget from a request handler: every
//! run goes through this bounded queue and a single worker task, so
//! submission is explicit, back-pressured, and observable in the logs. The
//! worker resubmits continuations itself, so a budget-limited run completes
//! across several queue turns without client involvement.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::mpsc;

use storepulse_db::{
    finalize_progress, get_current_progress, insert_sync_history, set_store_sync_result,
    NewSyncHistory,
};
use storepulse_magento::MagentoClient;
use storepulse_sync::{continue_sync, run_sync, ContinuationToken, SyncOptions, SyncOutcome};

/// One unit of queued sync work.
#[derive(Debug, Clone)]
pub enum SyncJob {
    Run {
        connection_id: i64,
        store_id: Option<i64>,
        options: SyncOptions,
    },
    Continue {
        token: ContinuationToken,
        options: SyncOptions,
    },
}

/// Cloneable submission handle for the worker's queue.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<SyncJob>,
}

impl JobQueue {
    /// Enqueues a job without blocking. Returns `false` (and logs) when the
    /// queue is full; callers surface that as a retry-later response.
    pub fn submit(&self, job: SyncJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "sync job queue rejected submission");
                false
            }
        }
    }
}

/// Spawns the worker task and returns the queue handle.
///
/// Jobs run strictly one at a time; per-store concurrency is additionally
/// guarded by the run lease, so a duplicate submission degrades to a no-op.
pub fn start_worker(pool: PgPool, client: Arc<MagentoClient>, queue_depth: usize) -> JobQueue {
    let (tx, mut rx) = mpsc::channel::<SyncJob>(queue_depth);
    let resubmit = tx.clone();

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let options = match &job {
                SyncJob::Run { options, .. } | SyncJob::Continue { options, .. } => {
                    options.clone()
                }
            };

            let outcome = match job {
                SyncJob::Run {
                    connection_id,
                    store_id,
                    options,
                } => run_sync(&pool, &client, connection_id, store_id, &options).await,
                SyncJob::Continue { token, options } => {
                    continue_sync(&pool, &client, &token, &options).await
                }
            };

            match outcome {
                Ok(SyncOutcome::Completed(summary)) => {
                    tracing::info!(
                        store_id = summary.store_id,
                        data_type = %summary.data_type,
                        pages = summary.pages_fetched,
                        processed = summary.stats.processed(),
                        "queued sync job completed"
                    );
                }
                Ok(SyncOutcome::Continuation(token)) => {
                    let job = SyncJob::Continue {
                        token: token.clone(),
                        options,
                    };
                    if resubmit.try_send(job).is_err() {
                        tracing::error!(
                            store_id = token.store_id,
                            "queue full, dropping sync continuation"
                        );
                        fail_dropped_continuation(&pool, &token).await;
                    }
                }
                Ok(SyncOutcome::AlreadyRunning) => {
                    // The orchestrator already logged the no-op.
                }
                Err(e) => {
                    // The run was marked failed in the state store; nothing
                    // further to do here.
                    tracing::error!(error = %e, "queued sync job failed");
                }
            }
        }
    });

    JobQueue { tx }
}

/// Marks the paused run behind a dropped continuation as failed, releasing
/// the store's run lease immediately instead of leaving the row `in_progress`
/// until the staleness window expires. Best-effort; each write failure is
/// logged.
async fn fail_dropped_continuation(pool: &PgPool, token: &ContinuationToken) {
    let message = "sync queue full, continuation dropped";

    let progress = match get_current_progress(pool, token.store_id).await {
        Ok(progress) => progress
            .filter(|p| p.status == "in_progress" && p.connection_id == token.connection_id),
        Err(e) => {
            tracing::error!(store_id = token.store_id, error = %e, "failed to load paused run");
            return;
        }
    };
    let Some(progress) = progress else { return };

    if let Err(e) = finalize_progress(pool, progress.id, "failed", Some(message)).await {
        tracing::error!(progress_id = progress.id, error = %e, "failed to mark paused run failed");
    }
    if let Err(e) = insert_sync_history(
        pool,
        &NewSyncHistory {
            store_id: token.store_id,
            connection_id: token.connection_id,
            data_type: token.data_type.to_string(),
            status: "failed".to_string(),
            orders_processed: progress.orders_processed,
            skipped_orders: progress.skipped_orders,
            error_message: Some(message.to_string()),
            started_at: progress.started_at,
        },
    )
    .await
    {
        tracing::error!(progress_id = progress.id, error = %e, "failed to record sync history");
    }
    if let Err(e) = set_store_sync_result(pool, token.store_id, "failed").await {
        tracing::error!(store_id = token.store_id, error = %e, "failed to record store sync result");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storepulse_core::DataType;

    fn job() -> SyncJob {
        SyncJob::Run {
            connection_id: 1,
            store_id: None,
            options: SyncOptions {
                data_type: DataType::Orders,
                page_size: 100,
                max_pages: 10,
                start_page: 1,
                retention_days: None,
                db_write_max_retries: 3,
                db_write_backoff_base_ms: 100,
            },
        }
    }

    #[tokio::test]
    async fn full_queue_rejects_without_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let queue = JobQueue { tx };

        assert!(queue.submit(job()));
        assert!(!queue.submit(job()), "second submit must hit the cap");
    }

    #[tokio::test]
    async fn closed_queue_rejects() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let queue = JobQueue { tx };
        assert!(!queue.submit(job()));
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn dropped_continuation_fails_the_paused_run(pool: sqlx::PgPool) {
        use storepulse_db::{
            create_connection, create_store, link_store, list_sync_history, start_progress,
            NewConnection,
        };

        let store = create_store(&pool, "Queued Shop", None).await.expect("store");
        let connection = create_connection(
            &pool,
            &NewConnection {
                user_id: None,
                name: "Queued Shop".to_string(),
                store_url: "https://shop.example.com".to_string(),
                access_token: "token".to_string(),
            },
        )
        .await
        .expect("connection");
        link_store(&pool, connection.id, store.id).await.expect("link");

        let progress = start_progress(&pool, store.id, connection.id)
            .await
            .expect("start_progress")
            .expect("lease");

        let token = ContinuationToken {
            connection_id: connection.id,
            store_id: store.id,
            data_type: DataType::Orders,
            next_page: 4,
        };
        fail_dropped_continuation(&pool, &token).await;

        let row = get_current_progress(&pool, store.id)
            .await
            .expect("progress")
            .expect("row");
        assert_eq!(row.id, progress.id);
        assert_eq!(row.status, "failed");
        assert!(row.error_message.as_deref().unwrap_or("").contains("queue full"));

        let history = list_sync_history(&pool, store.id, 10).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "failed");

        // A fresh trigger can take the lease again right away.
        let relock = start_progress(&pool, store.id, connection.id)
            .await
            .expect("start_progress");
        assert!(relock.is_some(), "lease must be free after the failure");
    }
}
