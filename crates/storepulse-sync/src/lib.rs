//! Sync engine: reconciliation, aggregation, the run orchestrator, and the
//! connection lifecycle manager.

pub mod aggregate;
pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod reconcile;

pub use aggregate::{recompute_daily_sales, AggregateStats};
pub use error::SyncError;
pub use lifecycle::{register_connection, remove_connection, test_and_link};
pub use orchestrator::{
    continue_sync, run_sync, ContinuationToken, RunSummary, SyncOptions, SyncOutcome,
};
pub use reconcile::{reconcile_batch, reconcile_product_batch, BatchStats};
