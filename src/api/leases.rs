//! `/leases`: renew/revoke events relayed from the lease scheduler.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde_json::json;

use super::error::ApiResult;
use super::routes::AppState;
use crate::backend::{LeaseOutcome, SecretEvent};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/leases", post(handle_event))
}

async fn handle_event(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SecretEvent>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(event) = payload?;
    let cancel = state.shutdown.child_token();
    let response = match state.backend.handle_secret_event(&event, &cancel).await? {
        LeaseOutcome::Renewed(bounds) => Json(json!({ "lease": bounds })).into_response(),
        LeaseOutcome::Revoked => StatusCode::NO_CONTENT.into_response(),
    };
    Ok(response)
}
