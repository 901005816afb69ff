//! Connection lifecycle: registration, credential validation, store
//! linking, deletion.
//!
//! A connection starts `pending` and stays there until its first sync run
//! completes; the orchestrator owns the promotion to `active`. This module
//! owns the validation step in between, which links the connection to its
//! store row and records the remote's store views.

use sqlx::PgPool;

use storepulse_db::{
    create_connection, create_store, delete_connection_cascade, find_store_by_name,
    get_connection, link_store, replace_store_views, set_connection_status, ConnectionRow,
    DbError, NewConnection,
};
use storepulse_magento::{MagentoClient, StoreAuth, StoreView};

use crate::error::SyncError;

/// Registers a new connection in `pending` status.
///
/// No remote call happens here; credentials are only exercised by
/// [`test_and_link`] or by the first sync run.
///
/// # Errors
///
/// Returns [`SyncError::Db`] if the insert fails.
pub async fn register_connection(
    pool: &PgPool,
    input: &NewConnection,
) -> Result<ConnectionRow, SyncError> {
    let connection = create_connection(pool, input).await?;
    tracing::info!(
        connection_id = connection.id,
        name = %connection.name,
        "connection registered"
    );
    Ok(connection)
}

/// Validates a connection's credentials against the remote store and links
/// it to a store row.
///
/// On success: the remote's store views are fetched, a store row is found by
/// the connection's name or created, the connection is linked to it, and the
/// views are recorded. The connection stays `pending` until its first sync
/// completes. On a remote failure the connection is demoted to `error` and
/// the failure propagated.
///
/// # Errors
///
/// Returns [`SyncError::ConnectionNotFound`] for an unknown connection,
/// [`SyncError::Remote`] if the credential check fails, or
/// [`SyncError::Db`] on persistence failures.
pub async fn test_and_link(
    pool: &PgPool,
    client: &MagentoClient,
    connection_id: i64,
) -> Result<Vec<StoreView>, SyncError> {
    let connection = match get_connection(pool, connection_id).await {
        Ok(connection) => connection,
        Err(DbError::NotFound) => return Err(SyncError::ConnectionNotFound),
        Err(e) => return Err(e.into()),
    };

    let auth = StoreAuth {
        base_url: connection.store_url.clone(),
        access_token: connection.access_token.clone(),
    };

    let views = match client.test_connection(&auth).await {
        Ok(views) => views,
        Err(e) => {
            tracing::warn!(
                connection_id = connection.id,
                error = %e,
                "connection test failed, demoting to error"
            );
            if let Err(db_err) = set_connection_status(pool, connection.id, "error").await {
                tracing::error!(
                    connection_id = connection.id,
                    error = %db_err,
                    "failed to demote connection after failed test"
                );
            }
            return Err(e.into());
        }
    };

    let store_id = match connection.store_id {
        Some(store_id) => store_id,
        None => {
            let store = match find_store_by_name(pool, &connection.name).await? {
                Some(store) => store,
                None => {
                    create_store(pool, &connection.name, Some(&connection.store_url)).await?
                }
            };
            link_store(pool, connection.id, store.id).await?;
            store.id
        }
    };

    let pairs: Vec<(String, String)> = views
        .iter()
        .map(|view| (view.code.clone(), view.name.clone()))
        .collect();
    replace_store_views(pool, store_id, &pairs).await?;

    // A previously errored connection that now validates gets another shot.
    if connection.status == "error" {
        set_connection_status(pool, connection.id, "pending").await?;
    }

    tracing::info!(
        connection_id = connection.id,
        store_id,
        views = views.len(),
        "connection validated and linked"
    );

    Ok(views)
}

/// Removes a connection and all data scoped to its linked store.
///
/// # Errors
///
/// Returns [`SyncError::ConnectionNotFound`] if the connection does not
/// exist (a repeat delete is a clean no-op failure), or [`SyncError::Db`]
/// on other persistence failures.
pub async fn remove_connection(pool: &PgPool, connection_id: i64) -> Result<(), SyncError> {
    match delete_connection_cascade(pool, connection_id).await {
        Ok(()) => {
            tracing::info!(connection_id, "connection and store data deleted");
            Ok(())
        }
        Err(DbError::NotFound) => Err(SyncError::ConnectionNotFound),
        Err(e) => Err(e.into()),
    }
}
