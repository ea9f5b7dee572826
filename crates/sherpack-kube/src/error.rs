//! Error types for sherpack-kube

use thiserror::Error;

/// Result type for sherpack-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur during Kubernetes operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Discovery could not resolve a kind
    #[error("discovery error: {0}")]
    Discovery(#[from] sherpack_discovery::DiscoveryError),

    /// Live state could not be diffed; modification checks are skipped
    #[error("diff degraded: {message}")]
    DiffDegraded { message: String },

    /// One or more resources failed to apply or prune
    #[error("failed to sync {failed} resource(s): {message}")]
    Apply { failed: usize, message: String },

    /// Hook execution failed
    #[error("hook '{hook}' failed during {phase}: {message}")]
    HookFailed {
        hook: String,
        phase: String,
        message: String,
    },

    /// Resource kind is not served by the cluster
    #[error("unknown resource type: {gvk}")]
    UnknownResource { gvk: String },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<sherpack_core::CoreError> for KubeError {
    fn from(e: sherpack_core::CoreError) -> Self {
        KubeError::InvalidManifest(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Check if the object being created already exists
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            KubeError::Api(kube::Error::Api(resp)) if resp.code == 409 && resp.reason == "AlreadyExists"
        )
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }
}
