//! Records endpoint routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use marksync_engine::Record;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{handle_delete, handle_insert, handle_list, ListQuery};
use crate::AppState;

/// Create records routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/records", get(list_handler).post(insert_handler))
        .route("/records/{id}", delete(delete_handler))
}

/// GET /records?owner=<id> - List an owner's records, newest first.
async fn list_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Record>>> {
    let records = handle_list(&state.pool, &auth, query).await?;
    Ok(Json(records))
}

/// POST /records - Insert a record.
async fn insert_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(record): Json<Record>,
) -> Result<Json<Record>> {
    let stored = handle_insert(&state.pool, &state.conn_manager, &auth, record).await?;
    Ok(Json(stored))
}

/// DELETE /records/{id} - Delete a record.
async fn delete_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    handle_delete(&state.pool, &state.conn_manager, &auth, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
