//! HTTP trigger interface.
//!
//! One action-discriminated endpoint, `POST /api/v1/sync`, drives the whole
//! pipeline: connection tests, deletions, progress polling, continuations,
//! and full sync triggers (the default when `action` is absent or unknown).
//! Every response uses the `{"success": bool, "data" | "error"}` envelope;
//! no internal error ever escapes unformatted.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use storepulse_core::{AppConfig, DataType};
use storepulse_db::{
    find_connection_by_store, get_connection_by_public_id, get_current_progress,
    get_store_by_public_id, DbError, NewConnection, SyncProgressRow,
};
use storepulse_magento::MagentoClient;
use storepulse_sync::{
    register_connection, remove_connection, test_and_link, ContinuationToken, SyncError,
    SyncOptions,
};

use crate::jobs::{JobQueue, SyncJob};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub client: Arc<MagentoClient>,
    pub jobs: JobQueue,
    pub config: Arc<AppConfig>,
}

/// A handler-level failure, already shaped for the error envelope.
struct ApiFailure {
    status: StatusCode,
    message: String,
}

impl ApiFailure {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<SyncError> for ApiFailure {
    fn from(err: SyncError) -> Self {
        let status = match &err {
            SyncError::ConnectionNotFound => StatusCode::NOT_FOUND,
            SyncError::ConnectionNotUsable { .. }
            | SyncError::StoreNotLinked { .. }
            | SyncError::StoreMismatch { .. } => StatusCode::CONFLICT,
            SyncError::Remote(_) => StatusCode::BAD_GATEWAY,
            SyncError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<DbError> for ApiFailure {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => Self::not_found("record not found"),
            other => {
                tracing::error!(error = %other, "database query failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "database query failed")
            }
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/sync", post(sync_action))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match storepulse_db::ping(&state.pool).await {
        Ok(()) => ok_response(json!({ "status": "ok", "database": "ok" })),
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "database unavailable",
                })),
            )
        }
    }
}

async fn sync_action(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let result = match body.get("action").and_then(Value::as_str) {
        Some("test_connection") => handle_test_connection(&state, &body).await,
        Some("delete_connection") => handle_delete_connection(&state, &body).await,
        Some("get_sync_progress") => handle_get_progress(&state, &body).await,
        Some("continue_sync") => handle_continue(&state, &body),
        // No or unknown action means a full sync trigger.
        _ => handle_full_sync(&state, &body).await,
    };

    match result {
        Ok(data) => ok_response(data),
        Err(failure) => (
            failure.status,
            Json(json!({
                "success": false,
                "error": failure.message,
            })),
        ),
    }
}

fn ok_response(data: Value) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": data,
        })),
    )
}

async fn handle_test_connection(state: &AppState, body: &Value) -> Result<Value, ApiFailure> {
    let connection = match optional_uuid(body, "connection_id")? {
        Some(public_id) => get_connection_by_public_id(&state.pool, public_id).await?,
        None => {
            let store_url = required_str(body, "store_url")?;
            let access_token = required_str(body, "access_token")?;
            let name = body
                .get("store_name")
                .and_then(Value::as_str)
                .unwrap_or(store_url)
                .to_string();
            register_connection(
                &state.pool,
                &NewConnection {
                    user_id: optional_uuid(body, "user_id")?,
                    name,
                    store_url: store_url.to_string(),
                    access_token: access_token.to_string(),
                },
            )
            .await?
        }
    };

    let views = test_and_link(&state.pool, &state.client, connection.id).await?;

    // A validated connection gets its first sync queued right away.
    let options = SyncOptions::from_app_config(&state.config, DataType::Orders);
    let enqueued = state.jobs.submit(SyncJob::Run {
        connection_id: connection.id,
        store_id: None,
        options,
    });

    Ok(json!({
        "connection_id": connection.public_id,
        "status": "pending",
        "sync_enqueued": enqueued,
        "store_views": views
            .iter()
            .map(|v| json!({ "code": v.code, "name": v.name }))
            .collect::<Vec<_>>(),
    }))
}

async fn handle_delete_connection(state: &AppState, body: &Value) -> Result<Value, ApiFailure> {
    let public_id = required_uuid(body, "connection_id")?;
    let connection = get_connection_by_public_id(&state.pool, public_id).await?;
    remove_connection(&state.pool, connection.id).await?;
    Ok(json!({ "deleted": true, "connection_id": public_id }))
}

async fn handle_get_progress(state: &AppState, body: &Value) -> Result<Value, ApiFailure> {
    let store_public_id = required_uuid(body, "store_id")?;
    let store = get_store_by_public_id(&state.pool, store_public_id).await?;
    let progress = get_current_progress(&state.pool, store.id).await?;
    Ok(json!({
        "store_id": store_public_id,
        "progress": progress.as_ref().map(progress_json),
    }))
}

async fn handle_full_sync(state: &AppState, body: &Value) -> Result<Value, ApiFailure> {
    let store_public_id = required_uuid(body, "store_id")?;
    let store = get_store_by_public_id(&state.pool, store_public_id).await?;
    let connection = find_connection_by_store(&state.pool, store.id)
        .await?
        .ok_or_else(|| ApiFailure::not_found("store has no connection"))?;

    let data_type = match body.get("data_type").and_then(Value::as_str) {
        Some(raw) => raw
            .parse::<DataType>()
            .map_err(|_| ApiFailure::bad_request(format!("unknown data_type '{raw}'")))?,
        None => DataType::Orders,
    };

    let mut options = SyncOptions::from_app_config(&state.config, data_type);
    if let Some(max_pages) = body.get("max_pages").and_then(Value::as_i64) {
        if max_pages < 1 {
            return Err(ApiFailure::bad_request("max_pages must be at least 1"));
        }
        options.max_pages = max_pages;
    }

    if !state.jobs.submit(SyncJob::Run {
        connection_id: connection.id,
        store_id: Some(store.id),
        options,
    }) {
        return Err(ApiFailure::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "sync queue is full, retry later",
        ));
    }

    Ok(json!({
        "enqueued": true,
        "store_id": store_public_id,
        "data_type": data_type.to_string(),
    }))
}

fn handle_continue(state: &AppState, body: &Value) -> Result<Value, ApiFailure> {
    let token: ContinuationToken = body
        .get("continuation")
        .cloned()
        .ok_or_else(|| ApiFailure::bad_request("missing field 'continuation'"))
        .and_then(|raw| {
            serde_json::from_value(raw)
                .map_err(|e| ApiFailure::bad_request(format!("invalid continuation: {e}")))
        })?;

    let options = SyncOptions::from_app_config(&state.config, token.data_type);
    if !state.jobs.submit(SyncJob::Continue {
        token: token.clone(),
        options,
    }) {
        return Err(ApiFailure::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "sync queue is full, retry later",
        ));
    }

    Ok(json!({
        "enqueued": true,
        "next_page": token.next_page,
    }))
}

fn progress_json(row: &SyncProgressRow) -> Value {
    json!({
        "status": row.status,
        "current_page": row.current_page,
        "total_pages": row.total_pages,
        "orders_processed": row.orders_processed,
        "total_orders": row.total_orders,
        "skipped_orders": row.skipped_orders,
        "warning_message": row.warning_message,
        "error_message": row.error_message,
        "started_at": row.started_at,
        "updated_at": row.updated_at,
    })
}

fn required_str<'a>(body: &'a Value, key: &str) -> Result<&'a str, ApiFailure> {
    body.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiFailure::bad_request(format!("missing field '{key}'")))
}

fn required_uuid(body: &Value, key: &str) -> Result<Uuid, ApiFailure> {
    optional_uuid(body, key)?
        .ok_or_else(|| ApiFailure::bad_request(format!("missing field '{key}'")))
}

fn optional_uuid(body: &Value, key: &str) -> Result<Option<Uuid>, ApiFailure> {
    match body.get(key).and_then(Value::as_str) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<Uuid>()
            .map(Some)
            .map_err(|_| ApiFailure::bad_request(format!("field '{key}' is not a valid uuid"))),
    }
}
