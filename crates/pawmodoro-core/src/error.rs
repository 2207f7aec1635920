//! Core error types for pawmodoro-core.
//!
//! Two families live here. [`BackendError`] is what every collaborator call
//! can fail with; the timer coordinator catches all of them at the call
//! site and never lets one stop the local countdown. [`CoreError`] covers
//! the surfaces around the core (configuration, credential storage, IO)
//! where failures are reported to the caller as usual.

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a collaborator call (session backend, pet stats, identity).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// No credential is available; the caller runs in local-only mode.
    #[error("Authentication required")]
    AuthRequired,

    /// The credential was rejected and could not be refreshed.
    #[error("Invalid or expired token")]
    AuthExpired,

    /// Transport failure or timeout. Transient.
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The backend answered with a non-auth failure status.
    #[error("Backend rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The response body did not have the expected shape.
    #[error("Failed to decode backend response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Whether the user has to log in again before backend effects resume.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, BackendError::AuthExpired)
    }

    /// Whether the failure is the expected "logged out" case that should
    /// not be reported as a problem.
    pub fn is_auth_required(&self) -> bool {
        matches!(self, BackendError::AuthRequired)
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                401 | 403 => BackendError::AuthExpired,
                code => BackendError::Rejected {
                    status: code,
                    message: err.to_string(),
                },
            }
        } else {
            BackendError::NetworkUnavailable(err.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for BackendError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        BackendError::NetworkUnavailable("request timed out".into())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Decode(err.to_string())
    }
}

/// Core error type for pawmodoro-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Collaborator errors surfaced outside the coordinator
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// OS keyring errors
    #[error("Credential store error: {0}")]
    Keyring(#[from] keyring::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The timer runtime has already shut down
    #[error("Timer runtime is not running")]
    RuntimeClosed,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Home/config directory could not be determined or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_maps_to_network_unavailable() {
        let err = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap()
            .block_on(async {
                tokio::time::timeout(
                    std::time::Duration::from_millis(1),
                    std::future::pending::<()>(),
                )
                .await
                .unwrap_err()
            });
        assert!(matches!(
            BackendError::from(err),
            BackendError::NetworkUnavailable(_)
        ));
    }

    #[test]
    fn auth_predicates() {
        assert!(BackendError::AuthExpired.is_auth_expired());
        assert!(!BackendError::AuthRequired.is_auth_expired());
        assert!(BackendError::AuthRequired.is_auth_required());
    }
}
