//! Remote API error types with retry classification.
//!
//! Only two conditions are transient for the Grafana Cloud API: rate limiting
//! (HTTP 429) and a stack that is still starting up. Everything else surfaces
//! on the first attempt.

use std::time::Duration;

/// Body marker returned while a freshly created stack is still provisioning.
pub const INSTANCE_STARTING_MARKER: &str = "Your instance is starting";

/// Error from Grafana Cloud API calls.
#[derive(Debug)]
pub struct ClientError {
    /// The kind of error
    pub kind: ClientErrorKind,
    /// HTTP status code, if a response was received
    pub status_code: Option<u16>,
    /// Error message or response body
    pub message: String,
}

impl ClientError {
    /// Create an error from a non-success HTTP response.
    pub fn from_response(status_code: u16, body: String) -> Self {
        Self {
            kind: classify_response(status_code, &body).unwrap_or(ClientErrorKind::Api),
            status_code: Some(status_code),
            message: body,
        }
    }

    /// Create a transport error (connection failure, timeout).
    pub fn transport(message: String) -> Self {
        Self {
            kind: ClientErrorKind::Transport,
            status_code: None,
            message,
        }
    }

    /// Create a decode error for an unparseable success response.
    pub fn decode(status_code: u16, message: String) -> Self {
        Self {
            kind: ClientErrorKind::Decode,
            status_code: Some(status_code),
            message,
        }
    }

    /// Create an error for a request that could not be built (bad base URL, etc.).
    pub fn invalid_request(message: String) -> Self {
        Self {
            kind: ClientErrorKind::InvalidRequest,
            status_code: None,
            message,
        }
    }

    /// Create a cancellation error.
    pub fn cancelled() -> Self {
        Self {
            kind: ClientErrorKind::Cancelled,
            status_code: None,
            message: "request cancelled".to_string(),
        }
    }

    /// Check if this error is transient and should be retried.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Whether the remote service reported that the target does not exist.
    pub fn is_not_found(&self) -> bool {
        self.status_code == Some(404)
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(
                f,
                "{}. Status code {}, response: {}",
                self.kind, code, self.message
            ),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ClientError {}

/// Classification of remote API errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// Rate limited (429) - transient
    RateLimited,
    /// Stack still provisioning - transient
    InstanceStarting,
    /// Any other non-success response - permanent
    Api,
    /// Network error (connection failed, timeout)
    Transport,
    /// Success response that could not be parsed
    Decode,
    /// Request could not be constructed
    InvalidRequest,
    /// Caller cancelled the operation
    Cancelled,
}

impl ClientErrorKind {
    /// Check if this error kind warrants another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientErrorKind::RateLimited | ClientErrorKind::InstanceStarting
        )
    }
}

impl std::fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientErrorKind::RateLimited => write!(f, "Rate limited"),
            ClientErrorKind::InstanceStarting => write!(f, "Grafana Cloud instance is starting"),
            ClientErrorKind::Api => write!(f, "Grafana Cloud API error"),
            ClientErrorKind::Transport => write!(f, "Transport error"),
            ClientErrorKind::Decode => write!(f, "Failed to decode Grafana Cloud response"),
            ClientErrorKind::InvalidRequest => write!(f, "Invalid request"),
            ClientErrorKind::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Classify a response that should be retried, regardless of status.
///
/// The starting marker is checked on every response body, successful or not.
pub fn classify_response(status: u16, body: &str) -> Option<ClientErrorKind> {
    if status == 429 {
        Some(ClientErrorKind::RateLimited)
    } else if body.contains(INSTANCE_STARTING_MARKER) {
        Some(ClientErrorKind::InstanceStarting)
    } else {
        None
    }
}

/// Fixed retry policy applied to every remote call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Fixed wait between attempts
    pub backoff: Duration,
    /// Timeout applied to each individual attempt
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            backoff: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Check if another attempt should follow a failed `attempt` (1-based).
    pub fn should_retry(&self, error: &ClientError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_attempts
    }
}
