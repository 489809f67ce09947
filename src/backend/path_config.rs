//! Durable Grafana Cloud configuration.
//!
//! A single record at [`CONFIG_STORAGE_PATH`] holds the API endpoint, the
//! admin key used to mint user keys, the organisation slug and an optional
//! user returned alongside every issued credential. Every successful write
//! or delete invalidates the cached client.

use serde::{Deserialize, Serialize};
use url::Url;

use super::{Backend, WriteOperation};
use crate::error::{EngineError, EngineResult};
use crate::storage::{self, Storage};

pub const CONFIG_STORAGE_PATH: &str = "config";

/// Minimum configuration required to build a Grafana Cloud client.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrafanaCloudConfig {
    #[serde(default)]
    pub organisation: String,
    /// Admin API key used to create user keys
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub url: String,
    /// Returned with every issued credential when non-empty
    #[serde(default)]
    pub user: String,
}

impl std::fmt::Debug for GrafanaCloudConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrafanaCloudConfig")
            .field("organisation", &self.organisation)
            .field("key", &"[REDACTED]")
            .field("url", &self.url)
            .field("user", &self.user)
            .finish()
    }
}

/// Partial configuration write. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigUpdate {
    #[serde(default)]
    pub organisation: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

/// Read the stored configuration.
pub async fn get_config(storage: &dyn Storage) -> EngineResult<Option<GrafanaCloudConfig>> {
    Ok(storage::get_json(storage, CONFIG_STORAGE_PATH).await?)
}

/// Check that `value` is an absolute URL.
fn validate_url(value: &str) -> EngineResult<()> {
    match Url::parse(value) {
        Ok(url) if !url.cannot_be_a_base() => Ok(()),
        _ => Err(EngineError::validation("invalid url in configuration")),
    }
}

impl Backend {
    pub async fn read_config(&self) -> EngineResult<Option<GrafanaCloudConfig>> {
        get_config(self.storage()).await
    }

    pub async fn config_exists(&self) -> EngineResult<bool> {
        Ok(self.storage().get(CONFIG_STORAGE_PATH).await?.is_some())
    }

    /// Merge `update` into the stored configuration.
    ///
    /// Creates require `organisation`, `key` and `url`. A supplied `url` must
    /// be absolute on every write. Nothing is persisted when validation fails.
    pub async fn write_config(
        &self,
        update: ConfigUpdate,
        operation: WriteOperation,
    ) -> EngineResult<()> {
        let create = operation == WriteOperation::Create;

        let mut config = match self.read_config().await? {
            Some(config) => config,
            None if create => GrafanaCloudConfig::default(),
            None => {
                return Err(EngineError::not_found(
                    "config not found during update operation",
                ))
            }
        };

        if let Some(organisation) = update.organisation {
            config.organisation = organisation;
        }
        if create && config.organisation.is_empty() {
            return Err(EngineError::validation("missing organisation in configuration"));
        }

        if let Some(key) = update.key {
            config.key = key;
        }
        if create && config.key.is_empty() {
            return Err(EngineError::validation("missing key in configuration"));
        }

        match update.url {
            Some(url) => {
                validate_url(&url)?;
                config.url = url;
            }
            None if create => {
                return Err(EngineError::validation("missing url in configuration"));
            }
            None => {}
        }

        if let Some(user) = update.user {
            config.user = user;
        }

        storage::put_json(self.storage(), CONFIG_STORAGE_PATH, &config).await?;
        self.reset().await;

        tracing::info!(
            organisation = %config.organisation,
            url = %config.url,
            ?operation,
            "Stored Grafana Cloud configuration"
        );
        Ok(())
    }

    /// Remove the stored configuration. Deleting a missing config succeeds.
    pub async fn delete_config(&self) -> EngineResult<()> {
        self.storage().delete(CONFIG_STORAGE_PATH).await?;
        self.reset().await;
        tracing::info!("Deleted Grafana Cloud configuration");
        Ok(())
    }
}
