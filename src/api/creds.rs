//! `/creds/:name`: issue a new Grafana Cloud key for a role.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;

use super::error::ApiResult;
use super::routes::AppState;
use crate::backend::{IssuedSecret, LeaseBounds, LeaseMetadata, SECRET_TYPE};

#[derive(Debug, Serialize)]
pub struct CredsResponse {
    pub data: serde_json::Map<String, serde_json::Value>,
    pub lease: LeaseResponse,
}

/// Lease parameters for the scheduler. TTLs are seconds; 0 means its default.
#[derive(Debug, Serialize)]
pub struct LeaseResponse {
    pub secret_type: &'static str,
    #[serde(flatten)]
    pub bounds: LeaseBounds,
    pub internal_data: LeaseMetadata,
}

impl From<IssuedSecret> for CredsResponse {
    fn from(secret: IssuedSecret) -> Self {
        Self {
            data: secret.response_data(),
            lease: LeaseResponse {
                secret_type: SECRET_TYPE,
                bounds: secret.lease,
                internal_data: secret.internal_data,
            },
        }
    }
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/creds/:name", get(issue_creds).post(issue_creds))
}

async fn issue_creds(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<CredsResponse>> {
    let cancel = state.shutdown.child_token();
    let secret = state.backend.issue_credential(&name, &cancel).await?;
    Ok(Json(secret.into()))
}
