use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use storepulse_core::DataType;
use storepulse_db::{
    delete_connection_cascade, find_connection_by_store, get_connection_by_public_id,
    get_store_by_public_id, list_connections, DbError,
};
use storepulse_magento::MagentoClient;
use storepulse_sync::{continue_sync, recompute_daily_sales, run_sync, SyncOptions, SyncOutcome};

#[derive(Debug, Parser)]
#[command(name = "storepulse-cli")]
#[command(about = "StorePulse sync pipeline command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a sync for a store's connection and wait for it to finish.
    Sync {
        /// Public id of the store to sync.
        #[arg(long)]
        store: Uuid,
        /// What to sync: orders or products.
        #[arg(long, default_value = "orders")]
        data_type: String,
        /// Per-invocation page budget override.
        #[arg(long)]
        max_pages: Option<i64>,
    },
    /// Inspect or remove store connections.
    Connections {
        #[command(subcommand)]
        command: ConnectionCommands,
    },
    /// Recompute the daily sales rollups for a store.
    Aggregate {
        /// Public id of the store to aggregate.
        #[arg(long)]
        store: Uuid,
    },
}

#[derive(Debug, Subcommand)]
enum ConnectionCommands {
    /// List every connection with its status and linked store.
    List,
    /// Delete a connection and all data scoped to its store.
    Delete {
        /// Public id of the connection.
        connection: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = storepulse_core::load_app_config()?;
    let pool_config = storepulse_db::PoolConfig::from_app_config(&config);
    let pool = storepulse_db::connect_pool(&config.database_url, pool_config)
        .await
        .context("failed to connect to the database")?;

    match cli.command {
        Commands::Sync {
            store,
            data_type,
            max_pages,
        } => {
            let Ok(data_type) = data_type.parse::<DataType>() else {
                bail!("unknown data type '{data_type}', expected 'orders' or 'products'");
            };

            let store_row = get_store_by_public_id(&pool, store)
                .await
                .context("store not found")?;
            let connection = find_connection_by_store(&pool, store_row.id)
                .await?
                .with_context(|| format!("store {store} has no connection"))?;

            tracing::info!(
                store_id = store_row.id,
                connection_id = connection.id,
                %data_type,
                "starting sync run"
            );

            let client = MagentoClient::new(
                config.magento_request_timeout_secs,
                &config.magento_user_agent,
            )?;
            let mut options = SyncOptions::from_app_config(&config, data_type);
            if let Some(max_pages) = max_pages {
                options.max_pages = max_pages;
            }

            let mut outcome =
                run_sync(&pool, &client, connection.id, Some(store_row.id), &options).await?;
            loop {
                match outcome {
                    SyncOutcome::Completed(summary) => {
                        println!(
                            "sync completed: {} pages, {} processed ({} new, {} updated), {} skipped",
                            summary.pages_fetched,
                            summary.stats.processed(),
                            summary.stats.new,
                            summary.stats.updated,
                            summary.stats.not_processed(),
                        );
                        break;
                    }
                    SyncOutcome::AlreadyRunning => {
                        println!("a sync is already in progress for this store");
                        break;
                    }
                    SyncOutcome::Continuation(token) => {
                        println!("page budget reached, continuing from page {}", token.next_page);
                        outcome = continue_sync(&pool, &client, &token, &options).await?;
                    }
                }
            }
        }
        Commands::Connections { command } => match command {
            ConnectionCommands::List => {
                let connections = list_connections(&pool).await?;
                if connections.is_empty() {
                    println!("no connections");
                }
                for connection in connections {
                    println!(
                        "{}  {:8}  store={}  {}",
                        connection.public_id,
                        connection.status,
                        connection
                            .store_id
                            .map_or_else(|| "-".to_string(), |id| id.to_string()),
                        connection.name,
                    );
                }
            }
            ConnectionCommands::Delete { connection } => {
                let row = match get_connection_by_public_id(&pool, connection).await {
                    Ok(row) => row,
                    Err(DbError::NotFound) => bail!("connection {connection} not found"),
                    Err(e) => return Err(e.into()),
                };
                tracing::info!(connection_id = row.id, "deleting connection and its store data");
                delete_connection_cascade(&pool, row.id).await?;
                println!("deleted connection {connection} and its store data");
            }
        },
        Commands::Aggregate { store } => {
            let store_row = get_store_by_public_id(&pool, store)
                .await
                .context("store not found")?;
            let stats = recompute_daily_sales(&pool, store_row.id).await?;
            println!(
                "daily sales recomputed: {} inserted, {} updated, {} deleted",
                stats.inserted, stats.updated, stats.deleted,
            );
        }
    }

    Ok(())
}
