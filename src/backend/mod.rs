//! Credential lifecycle engine.
//!
//! [`Backend`] owns the runtime state shared by every request: the storage
//! handle, the cached Grafana Cloud client, and the client options used to
//! rebuild it. The operations are split by concern:
//!
//! - `path_config`: durable endpoint/admin-key configuration
//! - `roles`: named policies mapping to a Grafana Cloud role and TTL bounds
//! - `credentials`: minting uniquely named API keys for a role
//! - `lease`: renew/revoke callbacks for previously issued keys

mod cache;
pub mod credentials;
pub mod lease;
pub mod path_config;
pub mod roles;

pub use cache::ClientCache;
pub use credentials::{IssuedCredential, IssuedSecret, LeaseBounds, SECRET_TYPE};
pub use lease::{LeaseMetadata, LeaseOutcome, RevokeNotFoundPolicy, SecretEvent};
pub use path_config::{ConfigUpdate, GrafanaCloudConfig, CONFIG_STORAGE_PATH};
pub use roles::{DurationInput, RoleEntry, RoleUpdate, ROLE_STORAGE_PREFIX};

use std::sync::Arc;

use crate::client::{ClientOptions, GrafanaCloudClient};
use crate::error::{EngineError, EngineResult};
use crate::storage::{SharedStorage, Storage};

/// Whether a write creates a new record or updates an existing one.
///
/// Creates enforce mandatory fields; updates merge into the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOperation {
    Create,
    Update,
}

impl WriteOperation {
    /// Pick the operation from an existence check, the way the HTTP layer does.
    pub fn from_existing(exists: bool) -> Self {
        if exists {
            WriteOperation::Update
        } else {
            WriteOperation::Create
        }
    }
}

/// Tunables for the engine.
#[derive(Debug, Clone, Default)]
pub struct BackendOptions {
    pub client: ClientOptions,
    pub revoke_not_found: RevokeNotFoundPolicy,
}

pub struct Backend {
    storage: SharedStorage,
    clients: ClientCache,
    options: BackendOptions,
}

/// Shared engine handle.
pub type SharedBackend = Arc<Backend>;

impl Backend {
    pub fn new(storage: SharedStorage, options: BackendOptions) -> Self {
        Self {
            storage,
            clients: ClientCache::new(),
            options,
        }
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn client_cache(&self) -> &ClientCache {
        &self.clients
    }

    /// Storage change notification from the host (e.g. replicated writes).
    pub async fn invalidate(&self, key: &str) {
        if key == CONFIG_STORAGE_PATH {
            self.reset().await;
        }
    }

    /// Drop the cached client so the next use rebuilds it from storage.
    pub async fn reset(&self) {
        self.clients.invalidate().await;
        tracing::debug!(
            generation = self.clients.generation(),
            "Invalidated cached Grafana Cloud client"
        );
    }

    /// Return the cached client, building it from the stored config on a miss.
    ///
    /// A missing config is tolerated: the client is built from an empty
    /// config and fails on first use instead.
    pub async fn get_client(&self) -> EngineResult<Arc<GrafanaCloudClient>> {
        let storage = self.storage();
        let options = &self.options.client;
        self.clients
            .get_or_build(move || async move {
                let config = match path_config::get_config(storage).await? {
                    Some(config) => config,
                    None => {
                        tracing::warn!(
                            "No configuration stored, building client from empty config"
                        );
                        GrafanaCloudConfig::default()
                    }
                };
                GrafanaCloudClient::new(&config.url, &config.key, options.clone())
                    .map_err(EngineError::Client)
            })
            .await
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn write_operation_from_existence() {
        assert_eq!(WriteOperation::from_existing(false), WriteOperation::Create);
        assert_eq!(WriteOperation::from_existing(true), WriteOperation::Update);
    }

    #[tokio::test]
    async fn client_is_derived_from_stored_config() {
        let backend = backend();
        configure(&backend, "http://grafana.example:19090").await;

        let client = backend.get_client().await.unwrap();
        assert_eq!(client.base_url(), "http://grafana.example:19090/");

        let same = backend.get_client().await.unwrap();
        assert!(Arc::ptr_eq(&client, &same));
    }

    #[tokio::test]
    async fn missing_config_builds_empty_client() {
        let backend = backend();
        let client = backend.get_client().await.unwrap();
        assert_eq!(client.base_url(), "/");
    }

    #[tokio::test]
    async fn invalidate_only_reacts_to_config_key() {
        let backend = backend();
        backend.invalidate("roles/viewer").await;
        assert_eq!(backend.client_cache().generation(), 0);
        backend.invalidate(CONFIG_STORAGE_PATH).await;
        assert_eq!(backend.client_cache().generation(), 1);
    }
}
