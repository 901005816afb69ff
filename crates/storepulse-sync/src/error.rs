use thiserror::Error;

/// Errors that abort a sync run or a lifecycle operation.
///
/// Per-record data-quality and persistence problems never surface here —
/// they are absorbed into [`crate::BatchStats`] counters. Only failures that
/// prevent forward progress of the run as a whole (initialization problems,
/// a failed page fetch, aggregation failure) are errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("connection not found")]
    ConnectionNotFound,

    #[error("connection {id} is in error status and cannot sync")]
    ConnectionNotUsable { id: i64 },

    #[error("connection {id} has no linked store yet")]
    StoreNotLinked { id: i64 },

    #[error("connection {connection_id} is not linked to store {requested_store_id}")]
    StoreMismatch {
        connection_id: i64,
        requested_store_id: i64,
    },

    #[error(transparent)]
    Remote(#[from] storepulse_magento::MagentoError),

    #[error(transparent)]
    Db(#[from] storepulse_db::DbError),
}
