//! Credential issuance.
//!
//! Each request mints a fresh, uniquely named Grafana Cloud API key for a role.
//! Nothing is persisted here: the key is handed to the caller together with
//! the lease metadata needed to renew or revoke it later.

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::roles::RoleEntry;
use super::{Backend, LeaseMetadata};
use crate::error::{EngineError, EngineResult};

/// Secret type reported for every issued key.
pub const SECRET_TYPE: &str = "grafana_cloud_key";

/// A freshly created remote key.
#[derive(Clone)]
pub struct IssuedCredential {
    pub key_name: String,
    pub token: String,
    /// Configured default user, empty when unset
    pub user: String,
    pub role_name: String,
}

impl std::fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("key_name", &self.key_name)
            .field("token", &"[REDACTED]")
            .field("user", &self.user)
            .field("role_name", &self.role_name)
            .finish()
    }
}

/// TTL bounds handed to the lease scheduler. `None` defers to its default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LeaseBounds {
    #[serde(serialize_with = "serialize_opt_secs")]
    pub ttl: Option<Duration>,
    #[serde(serialize_with = "serialize_opt_secs")]
    pub max_ttl: Option<Duration>,
}

impl LeaseBounds {
    pub fn from_role(role: &RoleEntry) -> Self {
        let non_zero = |d: Duration| (!d.is_zero()).then_some(d);
        Self {
            ttl: non_zero(role.ttl),
            max_ttl: non_zero(role.max_ttl),
        }
    }
}

fn serialize_opt_secs<S: serde::Serializer>(
    value: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.map(|d| d.as_secs()).unwrap_or(0))
}

/// Credential plus everything the lease subsystem needs to track it.
#[derive(Debug, Clone)]
pub struct IssuedSecret {
    pub credential: IssuedCredential,
    pub lease: LeaseBounds,
    pub internal_data: LeaseMetadata,
}

impl IssuedSecret {
    /// Caller-visible secret data: `token`, plus `user` when configured.
    pub fn response_data(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut data = serde_json::Map::new();
        data.insert(
            "token".to_string(),
            serde_json::Value::String(self.credential.token.clone()),
        );
        if !self.credential.user.is_empty() {
            data.insert(
                "user".to_string(),
                serde_json::Value::String(self.credential.user.clone()),
            );
        }
        data
    }
}

/// Unique remote key name for `role_name`.
pub fn generate_key_name(role_name: &str) -> String {
    format!("{}_{}", role_name, Uuid::new_v4())
}

impl Backend {
    /// Mint a new API key for `role_name`.
    pub async fn issue_credential(
        &self,
        role_name: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<IssuedSecret> {
        let role = self.get_role(role_name).await?.ok_or_else(|| {
            EngineError::not_found(format!("error retrieving role {}: not found", role_name))
        })?;

        let client = self.get_client().await?;

        let config = self.read_config().await?.ok_or_else(|| {
            EngineError::not_found("error retrieving Grafana Cloud configuration: not found")
        })?;

        let key_name = generate_key_name(role_name);
        tracing::debug!(
            role = %role_name,
            key_name = %key_name,
            gc_role = %role.gc_role,
            "Creating Grafana Cloud key"
        );

        let key = client
            .create_api_key(&config.organisation, &key_name, role.gc_role, cancel)
            .await
            .map_err(|source| EngineError::CreateKey {
                name: key_name.clone(),
                source,
            })?;

        tracing::info!(
            role = %role_name,
            key_name = %key_name,
            organisation = %config.organisation,
            "Issued Grafana Cloud key"
        );

        let internal_data = LeaseMetadata::for_key(&key_name, role_name);
        Ok(IssuedSecret {
            credential: IssuedCredential {
                key_name,
                token: key.token,
                user: config.user,
                role_name: role_name.to_string(),
            },
            lease: LeaseBounds::from_role(&role),
            internal_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn created_key() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 1,
            "name": "viewer-role_x",
            "role": "Viewer",
            "token": "glc_token",
            "expiration": "2030-01-01T00:00:00Z"
        }))
    }

    #[test]
    fn key_names_embed_role_and_uuid() {
        let name = generate_key_name("viewer-role");
        let suffix = name.strip_prefix("viewer-role_").unwrap();
        assert!(Uuid::parse_str(suffix).is_ok());
        assert_ne!(generate_key_name("viewer-role"), name);
    }

    #[test]
    fn zero_ttls_defer_to_host() {
        let bounds = LeaseBounds::from_role(&RoleEntry {
            gc_role: crate::client::GrafanaCloudRole::Viewer,
            ttl: Duration::ZERO,
            max_ttl: Duration::from_secs(60),
        });
        assert_eq!(bounds.ttl, None);
        assert_eq!(bounds.max_ttl, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn issue_for_viewer_role() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orgs/acme/api-keys"))
            .and(header("authorization", "Bearer K"))
            .respond_with(created_key())
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend();
        configure(&backend, &format!("{}/", server.uri())).await;
        add_role(&backend, "viewer-role", "Viewer", 120, 3600).await;

        let secret = backend
            .issue_credential("viewer-role", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(secret.credential.token, "glc_token");
        assert!(secret.credential.key_name.starts_with("viewer-role_"));
        assert_eq!(secret.credential.user, "1234");
        assert_eq!(secret.lease.ttl, Some(Duration::from_secs(120)));
        assert_eq!(secret.lease.max_ttl, Some(Duration::from_secs(3600)));
        assert_eq!(secret.internal_data.role_name(), Some("viewer-role"));
        assert_eq!(
            secret.internal_data.key_name(),
            Some(secret.credential.key_name.as_str())
        );

        let data = secret.response_data();
        assert_eq!(data["token"], "glc_token");
        assert_eq!(data["user"], "1234");

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["role"], "Viewer");
        assert_eq!(body["name"], secret.credential.key_name.as_str());
    }

    #[tokio::test]
    async fn user_is_omitted_when_not_configured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(created_key())
            .mount(&server)
            .await;

        let backend = backend();
        backend
            .write_config(
                super::super::ConfigUpdate {
                    organisation: Some("acme".to_string()),
                    key: Some("K".to_string()),
                    url: Some(server.uri()),
                    user: None,
                },
                super::super::WriteOperation::Create,
            )
            .await
            .unwrap();
        add_role(&backend, "viewer-role", "Viewer", 0, 0).await;

        let secret = backend
            .issue_credential("viewer-role", &CancellationToken::new())
            .await
            .unwrap();
        assert!(!secret.response_data().contains_key("user"));
        assert_eq!(secret.lease, LeaseBounds::default());
    }

    #[tokio::test]
    async fn missing_role_is_not_found() {
        let backend = backend();
        configure(&backend, "http://127.0.0.1:1/").await;

        let err = backend
            .issue_credential("missing-role", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn missing_config_is_not_found() {
        let backend = backend();
        add_role(&backend, "viewer-role", "Viewer", 120, 3600).await;

        let err = backend
            .issue_credential("viewer-role", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn remote_failure_carries_key_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend();
        configure(&backend, &server.uri()).await;
        add_role(&backend, "viewer-role", "Viewer", 120, 3600).await;

        let err = backend
            .issue_credential("viewer-role", &CancellationToken::new())
            .await
            .unwrap_err();
        match &err {
            EngineError::CreateKey { name, source } => {
                assert!(name.starts_with("viewer-role_"));
                assert_eq!(source.status_code, Some(403));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!err.is_user_error());
    }

    #[tokio::test]
    async fn concurrent_issuance_yields_distinct_names() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/orgs/acme/api-keys$"))
            .respond_with(created_key())
            .mount(&server)
            .await;

        let backend = Arc::new(backend());
        configure(&backend, &server.uri()).await;
        add_role(&backend, "viewer-role", "Viewer", 120, 3600).await;

        let cancel = CancellationToken::new();
        let issued = futures::future::join_all((0..20).map(|_| {
            let backend = Arc::clone(&backend);
            let cancel = cancel.clone();
            async move { backend.issue_credential("viewer-role", &cancel).await.unwrap() }
        }))
        .await;

        let names: HashSet<_> = issued.iter().map(|s| s.credential.key_name.clone()).collect();
        assert_eq!(names.len(), 20);
        assert_eq!(backend.client_cache().build_count(), 1);
    }
}
