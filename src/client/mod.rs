//! Grafana Cloud API client with a fixed retry policy.
//!
//! Only the API-key endpoints are implemented:
//! - `POST   orgs/{org}/api-keys`        create a key
//! - `DELETE orgs/{org}/api-keys/{name}` delete a key
//!
//! Each attempt is bounded by the per-request timeout; the retry loop sits on
//! top of it and is aborted promptly when the caller's cancellation token fires.

mod error;

pub use error::{
    classify_response, ClientError, ClientErrorKind, RetryPolicy, INSTANCE_STARTING_MARKER,
};

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Default User-Agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("grafanacloud-secrets/", env!("CARGO_PKG_VERSION"));

/// Maximum number of body characters included in retry warnings.
const LOG_SNIPPET_CHARS: usize = 200;

/// Authorization level a Grafana Cloud API key is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrafanaCloudRole {
    Viewer,
    Editor,
    Admin,
    MetricsPublisher,
    PluginPublisher,
}

impl GrafanaCloudRole {
    pub const ALL: [GrafanaCloudRole; 5] = [
        GrafanaCloudRole::Viewer,
        GrafanaCloudRole::Editor,
        GrafanaCloudRole::Admin,
        GrafanaCloudRole::MetricsPublisher,
        GrafanaCloudRole::PluginPublisher,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GrafanaCloudRole::Viewer => "Viewer",
            GrafanaCloudRole::Editor => "Editor",
            GrafanaCloudRole::Admin => "Admin",
            GrafanaCloudRole::MetricsPublisher => "MetricsPublisher",
            GrafanaCloudRole::PluginPublisher => "PluginPublisher",
        }
    }

    /// Parse the exact (case-sensitive) role name used by the API.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.as_str() == value)
    }
}

impl std::fmt::Display for GrafanaCloudRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a key creation request.
#[derive(Debug, Serialize)]
struct CreateApiKeyRequest<'a> {
    name: &'a str,
    role: GrafanaCloudRole,
}

/// A key returned by the create endpoint.
#[derive(Clone, Deserialize)]
pub struct ApiKey {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    pub token: String,
    #[serde(default)]
    pub expiration: Option<String>,
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("token", &"[REDACTED]")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Construction options for [`GrafanaCloudClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub user_agent: String,
    pub retry_policy: RetryPolicy,
    /// Log request outcomes and error bodies at debug level
    pub debug: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            retry_policy: RetryPolicy::default(),
            debug: false,
        }
    }
}

/// Authenticated Grafana Cloud API client.
pub struct GrafanaCloudClient {
    http: reqwest::Client,
    base_url: String,
    retry_policy: RetryPolicy,
    debug: bool,
}

impl GrafanaCloudClient {
    /// Create a client for `base_url` authenticating with `api_key`.
    ///
    /// The base URL is not validated here; an unusable URL surfaces as
    /// [`ClientErrorKind::InvalidRequest`] on the first call.
    pub fn new(base_url: &str, api_key: &str, options: ClientOptions) -> Result<Self, ClientError> {
        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        let mut headers = HeaderMap::new();
        if !api_key.is_empty() {
            let mut value =
                HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|_| {
                    ClientError::invalid_request("API key contains invalid characters".to_string())
                })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .user_agent(options.user_agent)
            .default_headers(headers)
            .timeout(options.retry_policy.request_timeout)
            .build()
            .map_err(|e| {
                ClientError::invalid_request(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url,
            retry_policy: options.retry_policy,
            debug: options.debug,
        })
    }

    /// Normalised base URL (always ends with `/`).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create an API key named `name` with authorization level `role`.
    pub async fn create_api_key(
        &self,
        organisation: &str,
        name: &str,
        role: GrafanaCloudRole,
        cancel: &CancellationToken,
    ) -> Result<ApiKey, ClientError> {
        let url = self.endpoint(&["orgs", organisation, "api-keys"])?;
        let body = serde_json::to_value(CreateApiKeyRequest { name, role })
            .map_err(|e| ClientError::invalid_request(format!("Failed to encode request: {}", e)))?;

        let (status, text) = self.execute_with_retry(Method::POST, url, Some(&body), cancel).await?;

        serde_json::from_str(&text).map_err(|e| {
            ClientError::decode(status.as_u16(), format!("Failed to parse created API key: {}", e))
        })
    }

    /// Delete the API key named `name`.
    ///
    /// A 404 is reported as an error like any other failure; callers decide
    /// whether an already-deleted key counts as success.
    pub async fn delete_api_key(
        &self,
        organisation: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        let url = self.endpoint(&["orgs", organisation, "api-keys", name])?;
        self.execute_with_retry(Method::DELETE, url, None, cancel)
            .await
            .map(|_| ())
    }

    /// Resolve path segments against the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            ClientError::invalid_request(format!("Invalid base URL '{}': {}", self.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                ClientError::invalid_request(format!(
                    "Base URL '{}' cannot be a base",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Execute a single attempt without retry.
    async fn execute_request(
        &self,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<(StatusCode, String), ClientError> {
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let send = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::cancelled()),
            result = send => result.map_err(|e| {
                if e.is_timeout() {
                    ClientError::transport(format!("Request timeout: {}", e))
                } else if e.is_connect() {
                    ClientError::transport(format!("Connection failed: {}", e))
                } else {
                    ClientError::transport(format!("Request failed: {}", e))
                }
            }),
        }
    }

    /// Execute a request, retrying on rate limiting and starting stacks.
    async fn execute_with_retry(
        &self,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<(StatusCode, String), ClientError> {
        let mut attempt = 1;

        loop {
            let error = match self
                .execute_request(method.clone(), url.clone(), body, cancel)
                .await
            {
                Ok((status, text)) => {
                    if self.debug {
                        tracing::debug!(
                            %method,
                            %url,
                            status = status.as_u16(),
                            attempt,
                            "Grafana Cloud response"
                        );
                    }
                    if status.is_success() && classify_response(status.as_u16(), &text).is_none() {
                        if attempt > 1 {
                            tracing::info!(
                                %method,
                                %url,
                                "Request succeeded after {} retries",
                                attempt - 1
                            );
                        }
                        return Ok((status, text));
                    }
                    if self.debug {
                        tracing::debug!(%method, %url, body = %text, "Grafana Cloud error body");
                    }
                    ClientError::from_response(status.as_u16(), text)
                }
                Err(error) => error,
            };

            if !self.retry_policy.should_retry(&error, attempt) {
                if attempt > 1 {
                    tracing::error!(
                        %method,
                        %url,
                        "Request failed after {} attempts: {}",
                        attempt,
                        error
                    );
                }
                return Err(error);
            }

            tracing::warn!(
                %method,
                %url,
                attempt,
                "Retrying request because of response: {}",
                snippet(&error.message)
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::cancelled()),
                _ = tokio::time::sleep(self.retry_policy.backoff) => {}
            }
            attempt += 1;
        }
    }
}

/// Truncate a response body for logging.
fn snippet(body: &str) -> &str {
    match body.char_indices().nth(LOG_SNIPPET_CHARS) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
