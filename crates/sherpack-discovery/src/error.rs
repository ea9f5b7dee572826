//! Error types for sherpack-discovery

use thiserror::Error;

/// Result type for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors that can occur while discovering the cluster API surface
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// The discovery query itself failed
    #[error("discovery query failed: {message}")]
    Query { message: String },

    /// Some group versions could not be listed
    #[error("unable to retrieve the complete list of server APIs: {failed}")]
    PartialDiscovery { failed: String },

    /// No REST mapping is registered for a kind
    #[error("no matches for kind {gvk}")]
    NoMapping { gvk: String },

    /// No kind is registered for a resource
    #[error("no kind is registered for {gvr}")]
    NoKind { gvr: String },

    /// The manager was started twice
    #[error("discovery cache already started")]
    AlreadyStarted,
}

impl DiscoveryError {
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// True when the error only covers part of the API surface
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::PartialDiscovery { .. })
    }
}
