//! Error handling for the warden gateway
//!
//! Two layers of errors exist:
//! - [`ChannelError`]: the failure of one request/response cycle on a provider's
//!   transport channel. It is `Clone` so one failure can be fanned out to every
//!   pending request of a provider.
//! - [`WardenError`]: everything else (configuration, process launch, I/O), with
//!   [`ChannelError`] wrapped transparently.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure kinds of a single request sent over a provider transport channel
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Request '{method}' to provider '{provider_id}' timed out after {}ms", .timeout.as_millis())]
    Timeout {
        provider_id: String,
        method: String,
        timeout: Duration,
    },

    #[error("Provider '{provider_id}' process error: {reason}")]
    ProcessError { provider_id: String, reason: String },

    #[error("Provider '{provider_id}' produced more than {limit} undecoded bytes")]
    ResponseTooLarge { provider_id: String, limit: usize },

    #[error("Provider '{provider_id}' returned error {code}: {message}")]
    RemoteError {
        provider_id: String,
        code: i64,
        message: String,
    },
}

impl ChannelError {
    /// Create a new timeout error
    pub fn timeout(provider_id: impl Into<String>, method: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            provider_id: provider_id.into(),
            method: method.into(),
            timeout,
        }
    }

    /// Create a new process error
    pub fn process(provider_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProcessError {
            provider_id: provider_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a new response-too-large error
    pub fn too_large(provider_id: impl Into<String>, limit: usize) -> Self {
        Self::ResponseTooLarge {
            provider_id: provider_id.into(),
            limit,
        }
    }

    /// Create a new remote error from a JSON-RPC error object
    pub fn remote(provider_id: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self::RemoteError {
            provider_id: provider_id.into(),
            code,
            message: message.into(),
        }
    }

    /// The provider the failed request targeted
    pub fn provider_id(&self) -> &str {
        match self {
            Self::Timeout { provider_id, .. }
            | Self::ProcessError { provider_id, .. }
            | Self::ResponseTooLarge { provider_id, .. }
            | Self::RemoteError { provider_id, .. } => provider_id,
        }
    }
}

/// Core error type used throughout the gateway
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WardenError {
    #[error("Configuration document not found: {}", .path.display())]
    ConfigMissing { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    #[error("Failed to start provider '{provider_id}': {message}")]
    Spawn {
        provider_id: String,
        message: String,
    },

    #[error("Provider '{0}' is not running")]
    NotRunning(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WardenError {
    /// Create a new missing-document error
    pub fn config_missing(path: impl Into<PathBuf>) -> Self {
        Self::ConfigMissing { path: path.into() }
    }

    /// Create a new invalid-configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    /// Create a new spawn error
    pub fn spawn(provider_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Spawn {
            provider_id: provider_id.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for convenience
pub type WardenResult<T> = Result<T, WardenError>;
