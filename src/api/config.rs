//! `/config`: the Grafana Cloud endpoint, admin key and organisation.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;

use super::error::{ApiError, ApiResult};
use super::routes::AppState;
use crate::backend::{ConfigUpdate, GrafanaCloudConfig, WriteOperation};

/// Storage change notification sent by the host, e.g. after a replicated write.
#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub key: String,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/config",
            get(read_config).post(write_config).delete(delete_config),
        )
        .route("/invalidate", post(invalidate))
}

async fn read_config(State(state): State<Arc<AppState>>) -> ApiResult<Json<GrafanaCloudConfig>> {
    state
        .backend
        .read_config()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("config not found"))
}

/// Creates the config when none is stored, otherwise merges into it.
async fn write_config(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ConfigUpdate>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(update) = payload?;
    let operation = WriteOperation::from_existing(state.backend.config_exists().await?);
    state.backend.write_config(update, operation).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_config(State(state): State<Arc<AppState>>) -> ApiResult<StatusCode> {
    state.backend.delete_config().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Drops the cached client when the config key changed behind our back.
async fn invalidate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<InvalidateRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(request) = payload?;
    state.backend.invalidate(&request.key).await;
    Ok(StatusCode::NO_CONTENT)
}
