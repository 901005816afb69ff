//! Background job scheduler.
//!
//! When `STOREPULSE_SYNC_SCHEDULE_CRON` is configured, a cron job enqueues an
//! orders sync for every `active` connection on each tick. Stores already
//! mid-run are protected by the run lease, so an overlapping tick degrades to
//! a no-op for them.

use std::sync::Arc;

use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use storepulse_core::{AppConfig, DataType};
use storepulse_db::list_active_connections;
use storepulse_sync::SyncOptions;

use crate::jobs::{JobQueue, SyncJob};

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive for
/// the lifetime of the process. Dropping it shuts down all scheduled jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised, the
/// configured cron expression is invalid, or the scheduler fails to start.
pub async fn build_scheduler(
    pool: PgPool,
    config: Arc<AppConfig>,
    jobs: JobQueue,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    if let Some(cron) = config.sync_schedule_cron.clone() {
        let options = SyncOptions::from_app_config(&config, DataType::Orders);
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let pool = pool.clone();
            let jobs = jobs.clone();
            let options = options.clone();
            Box::pin(async move {
                enqueue_active_syncs(&pool, &jobs, &options).await;
            })
        })?;
        scheduler.add(job).await?;
        tracing::info!(schedule = %cron, "scheduled periodic sync enabled");
    } else {
        tracing::info!("no sync schedule configured, scheduler idle");
    }

    scheduler.start().await?;
    Ok(scheduler)
}

async fn enqueue_active_syncs(pool: &PgPool, jobs: &JobQueue, options: &SyncOptions) {
    let connections = match list_active_connections(pool).await {
        Ok(connections) => connections,
        Err(e) => {
            tracing::error!(error = %e, "scheduled sync: failed to list active connections");
            return;
        }
    };

    tracing::info!(count = connections.len(), "scheduled sync tick");
    for connection in connections {
        jobs.submit(SyncJob::Run {
            connection_id: connection.id,
            store_id: connection.store_id,
            options: options.clone(),
        });
    }
}
