//! Engine error taxonomy.
//!
//! Every engine operation returns [`EngineError`]. Variants carry the
//! operation context (role name, key name) so the host can act on them.

use thiserror::Error;

use crate::client::ClientError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad or missing input. User-correctable, never retried.
    #[error("{0}")]
    Validation(String),

    /// A referenced role or the configuration is absent.
    #[error("{0}")]
    NotFound(String),

    /// The durable layer failed. Surfaced as-is.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Creating a remote key failed (transport or non-success response).
    #[error("error creating Grafana Cloud key {name}: {source}")]
    CreateKey {
        name: String,
        #[source]
        source: ClientError,
    },

    /// Deleting a remote key failed (transport or non-success response).
    #[error("error revoking Grafana Cloud key {name}: {source}")]
    RevokeKey {
        name: String,
        #[source]
        source: ClientError,
    },

    /// The remote client could not be constructed from the stored configuration.
    #[error("error getting client: {0}")]
    Client(#[source] ClientError),

    /// Lease-internal metadata lacks a required key.
    #[error("secret is missing {0} internal data")]
    MissingMetadata(&'static str),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Whether the caller can fix this by changing its input.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_) | EngineError::MissingMetadata(_)
        )
    }

    /// The underlying remote client error, if any.
    pub fn client_error(&self) -> Option<&ClientError> {
        match self {
            EngineError::CreateKey { source, .. }
            | EngineError::RevokeKey { source, .. }
            | EngineError::Client(source) => Some(source),
            _ => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
