mod api;
mod jobs;
mod scheduler;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::api::{build_app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(storepulse_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = storepulse_db::PoolConfig::from_app_config(&config);
    let pool = storepulse_db::connect_pool(&config.database_url, pool_config).await?;
    storepulse_db::run_migrations(&pool).await?;

    let client = Arc::new(storepulse_magento::MagentoClient::new(
        config.magento_request_timeout_secs,
        &config.magento_user_agent,
    )?);
    let jobs = jobs::start_worker(pool.clone(), Arc::clone(&client), config.sync_queue_depth);

    let _scheduler =
        scheduler::build_scheduler(pool.clone(), Arc::clone(&config), jobs.clone()).await?;

    let app = build_app(AppState {
        pool,
        client,
        jobs,
        config: Arc::clone(&config),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "storepulse server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
