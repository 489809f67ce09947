//! `/roles` and `/roles/:name`.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;

use super::error::{ApiError, ApiResult};
use super::routes::AppState;
use crate::backend::{RoleEntry, RoleUpdate, WriteOperation};

#[derive(Debug, Serialize)]
pub struct RoleListResponse {
    pub keys: Vec<String>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/roles", get(list_roles))
        .route(
            "/roles/:name",
            get(read_role).post(write_role).delete(delete_role),
        )
}

async fn list_roles(State(state): State<Arc<AppState>>) -> ApiResult<Json<RoleListResponse>> {
    let keys = state.backend.list_roles().await?;
    Ok(Json(RoleListResponse { keys }))
}

async fn read_role(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<RoleEntry>> {
    state
        .backend
        .get_role(&name)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("role {} not found", name)))
}

async fn write_role(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    payload: Result<Json<RoleUpdate>, JsonRejection>,
) -> ApiResult<Json<RoleEntry>> {
    let Json(update) = payload?;
    let operation = WriteOperation::from_existing(state.backend.role_exists(&name).await?);
    let entry = state.backend.write_role(&name, update, operation).await?;
    Ok(Json(entry))
}

async fn delete_role(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.backend.delete_role(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
