//! # Grafana Cloud secrets
//!
//! Dynamic credential engine for Grafana Cloud API keys.
//!
//! This library provides:
//! - Durable configuration (endpoint, admin key, organisation) and named roles
//! - On-demand issuance of uniquely named, role-scoped API keys
//! - Renew/revoke handling for issued keys as leased secrets
//! - A thin HTTP API exposing the above
//!
//! ## Architecture
//!
//! ```text
//!   HTTP API ──▶ Backend ──▶ ClientCache ──▶ GrafanaCloudClient ──▶ Grafana Cloud
//!                   │
//!                   ▼
//!                Storage (memory | file | sqlite)
//! ```
//!
//! ## Modules
//! - `backend`: config, roles, credential issuance, lease callbacks
//! - `client`: Grafana Cloud API client with retry policy
//! - `storage`: key/value persistence

pub mod api;
pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod storage;

pub use backend::{Backend, BackendOptions, SharedBackend};
pub use config::Config;
pub use error::{EngineError, EngineResult};
