//! Renew and revoke callbacks for issued keys.
//!
//! The lease scheduler hands back the metadata recorded at issuance. Renewal
//! re-reads the role so TTL changes apply to live leases; revocation deletes
//! the remote key by its recorded name.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use tokio_util::sync::CancellationToken;

use super::credentials::LeaseBounds;
use super::Backend;
use crate::error::{EngineError, EngineResult};

const KEY_NAME_FIELD: &str = "name";
const ROLE_NAME_FIELD: &str = "role";

/// Opaque lease-internal data, passed back unchanged on renew/revoke.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LeaseMetadata(pub BTreeMap<String, String>);

/// Accepts `null` and drops non-string values, so a damaged record surfaces
/// as [`EngineError::MissingMetadata`] rather than a decode failure.
impl<'de> Deserialize<'de> for LeaseMetadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<BTreeMap<String, serde_json::Value>>::deserialize(deserializer)?;
        let fields = raw
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(field, value)| match value {
                serde_json::Value::String(value) => Some((field, value)),
                _ => None,
            })
            .collect();
        Ok(Self(fields))
    }
}

impl LeaseMetadata {
    pub fn for_key(key_name: &str, role_name: &str) -> Self {
        let mut data = BTreeMap::new();
        data.insert(KEY_NAME_FIELD.to_string(), key_name.to_string());
        data.insert(ROLE_NAME_FIELD.to_string(), role_name.to_string());
        Self(data)
    }

    pub fn key_name(&self) -> Option<&str> {
        self.get(KEY_NAME_FIELD)
    }

    pub fn role_name(&self) -> Option<&str> {
        self.get(ROLE_NAME_FIELD)
    }

    fn get(&self, field: &str) -> Option<&str> {
        self.0
            .get(field)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Look up a required field, failing with [`EngineError::MissingMetadata`].
    pub fn require(&self, field: &'static str) -> EngineResult<&str> {
        self.get(field).ok_or(EngineError::MissingMetadata(field))
    }
}

/// Lease event delivered by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum SecretEvent {
    Renew {
        #[serde(default)]
        internal_data: LeaseMetadata,
    },
    Revoke {
        #[serde(default)]
        internal_data: LeaseMetadata,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    Renewed(LeaseBounds),
    Revoked,
}

/// How a revoke treats a remote key that no longer exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevokeNotFoundPolicy {
    /// Propagate the remote 404
    #[default]
    Error,
    /// Treat the key as already revoked
    Ignore,
}

impl RevokeNotFoundPolicy {
    /// Parse from environment variable value.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" | "fail" => Some(Self::Error),
            "ignore" | "idempotent" => Some(Self::Ignore),
            _ => None,
        }
    }
}

impl Backend {
    /// Refresh lease bounds from the role's current configuration.
    pub async fn renew_lease(&self, metadata: &LeaseMetadata) -> EngineResult<LeaseBounds> {
        let role_name = metadata.require(ROLE_NAME_FIELD)?;

        let role = self.get_role(role_name).await?.ok_or_else(|| {
            EngineError::not_found(format!("error retrieving role {}: not found", role_name))
        })?;

        let bounds = LeaseBounds::from_role(&role);
        tracing::debug!(
            role = %role_name,
            key_name = metadata.key_name().unwrap_or_default(),
            ttl_secs = role.ttl.as_secs(),
            max_ttl_secs = role.max_ttl.as_secs(),
            "Renewed lease"
        );
        Ok(bounds)
    }

    /// Delete the remote key recorded in `metadata`.
    pub async fn revoke_lease(
        &self,
        metadata: &LeaseMetadata,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        let key_name = metadata.require(KEY_NAME_FIELD)?;

        let client = self.get_client().await?;
        let config = self.read_config().await?.ok_or_else(|| {
            EngineError::not_found("error retrieving Grafana Cloud configuration: not found")
        })?;

        match client
            .delete_api_key(&config.organisation, key_name, cancel)
            .await
        {
            Ok(()) => {}
            Err(source)
                if source.is_not_found()
                    && self.options.revoke_not_found == RevokeNotFoundPolicy::Ignore =>
            {
                tracing::warn!(
                    key_name = %key_name,
                    "Grafana Cloud key already absent, treating as revoked"
                );
            }
            Err(source) => {
                return Err(EngineError::RevokeKey {
                    name: key_name.to_string(),
                    source,
                })
            }
        }

        tracing::info!(
            key_name = %key_name,
            role = metadata.role_name().unwrap_or_default(),
            organisation = %config.organisation,
            "Revoked Grafana Cloud key"
        );
        Ok(())
    }

    /// Dispatch a scheduler event.
    pub async fn handle_secret_event(
        &self,
        event: &SecretEvent,
        cancel: &CancellationToken,
    ) -> EngineResult<LeaseOutcome> {
        match event {
            SecretEvent::Renew { internal_data } => {
                self.renew_lease(internal_data).await.map(LeaseOutcome::Renewed)
            }
            SecretEvent::Revoke { internal_data } => {
                self.revoke_lease(internal_data, cancel).await?;
                Ok(LeaseOutcome::Revoked)
            }
        }
    }
}
