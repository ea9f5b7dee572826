//! Error types for sherpack-sync

use sherpack_discovery::DiscoveryError;
use sherpack_kube::KubeError;
use sherpack_manifests::ManifestError;
use thiserror::Error;

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors raised by the reconciliation loops
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Kube(#[from] KubeError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// The control plane call failed
    #[error("Remote API error: {message}")]
    Remote { message: String },

    #[error("Service {id} not found")]
    ServiceNotFound { id: String },

    /// A known condition that is logged but never reported upstream
    #[error("{0}")]
    Expected(String),

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SyncError {
    pub fn remote(message: impl ToString) -> Self {
        Self::Remote {
            message: message.to_string(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Expected(_))
    }

    /// Whether the item should be offered again after a backoff
    ///
    /// Manifest failures are not retried locally: authentication errors
    /// need operator action and transient ones clear by the next poll.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Manifest(_) | Self::Expected(_) | Self::InvalidConfig { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(SyncError::ServiceNotFound { id: "a".into() }.is_retryable());
        assert!(SyncError::remote("timeout").is_retryable());
        assert!(!SyncError::Manifest(ManifestError::Unauthenticated).is_retryable());
        assert!(!SyncError::Expected("skip".into()).is_retryable());
        assert!(SyncError::Expected("skip".into()).is_expected());
    }
}
