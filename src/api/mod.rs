//! HTTP API for the Grafana Cloud secrets engine.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /config` - Read the Grafana Cloud configuration
//! - `POST /config` - Create or update the configuration
//! - `DELETE /config` - Delete the configuration
//! - `GET /roles` - List role names
//! - `GET /roles/{name}` - Read a role
//! - `POST /roles/{name}` - Create or update a role
//! - `DELETE /roles/{name}` - Delete a role
//! - `GET|POST /creds/{name}` - Issue a Grafana Cloud key for a role
//! - `POST /leases` - Renew or revoke a previously issued key
//! - `POST /invalidate` - Storage change notification; drops the cached client for `config`

mod config;
mod creds;
mod error;
mod leases;
mod roles;
mod routes;

pub use creds::{CredsResponse, LeaseResponse};
pub use error::{ApiError, ApiResult};
pub use routes::{app, serve, AppState};
