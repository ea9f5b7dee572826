//! Error types for manifest fetching and rendering

use sherpack_core::{CoreError, RendererKind};
use std::path::PathBuf;
use thiserror::Error;

/// Manifest operation errors
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ManifestError {
    // ============ Fetch Errors ============
    #[error("Unauthenticated: the control plane rejected the deploy token")]
    Unauthenticated,

    #[error("Transient failure fetching manifests, will retry next cycle")]
    Transient,

    #[error("Could not fetch manifest, error code {status}")]
    Fetch { status: u16 },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Request timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Invalid tarball URL: {url} - {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Service {id} has no tarball URL")]
    NoTarball { id: String },

    #[error("Integrity check failed: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    // ============ Archive Errors ============
    #[error("Failed to extract manifests into {}: {message}", dir.display())]
    Archive { dir: PathBuf, message: String },

    // ============ Render Errors ============
    #[error("Failed to render {path}: {message}")]
    Render { path: String, message: String },

    #[error("No renderer registered for {kind}")]
    UnsupportedRenderer { kind: RendererKind },

    // ============ Other ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ManifestError {
    pub fn render(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Render {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// The control plane refused the credentials; retrying locally will not help
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Unauthenticated)
    }

    /// The failure is expected to clear on its own by the next cycle
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient | Self::Timeout { .. } | Self::Network { .. }
        )
    }

    /// Map a non-success HTTP status onto the fetch taxonomy
    pub fn from_status(status: u16) -> Self {
        match status {
            403 => Self::Unauthenticated,
            402 => Self::Transient,
            status => Self::Fetch { status },
        }
    }
}

/// Result type for manifest operations
pub type Result<T> = std::result::Result<T, ManifestError>;

impl From<reqwest::Error> for ManifestError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ManifestError::Timeout { seconds: 15 }
        } else if e.is_connect() {
            ManifestError::Network {
                message: format!("Connection failed: {}", e),
            }
        } else if let Some(status) = e.status() {
            ManifestError::from_status(status.as_u16())
        } else {
            ManifestError::Network {
                message: e.to_string(),
            }
        }
    }
}

impl From<url::ParseError> for ManifestError {
    fn from(e: url::ParseError) -> Self {
        ManifestError::InvalidUrl {
            url: String::new(),
            reason: e.to_string(),
        }
    }
}
