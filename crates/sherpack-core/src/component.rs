//! Status vocabulary shared with the control plane

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::manifest::ResourceKey;

/// Coarse health of a deployed component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentState {
    Running,
    Pending,
    Failed,
}

/// Per-resource outcome of a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentAttributes {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub state: Option<ComponentState>,
    pub synced: bool,
}

impl ComponentAttributes {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.group, &self.kind, &self.namespace, &self.name)
    }
}

/// Which phase of a pass produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSource {
    Manifests,
    Sync,
    Reconciliation,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Manifests => "manifests",
            Self::Sync => "sync",
            Self::Reconciliation => "reconciliation",
        };
        f.write_str(s)
    }
}

/// An error reported against a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceError {
    pub source: ErrorSource,
    pub message: String,
}

impl ServiceError {
    pub fn new(source: ErrorSource, error: &dyn fmt::Display) -> Self {
        Self {
            source,
            message: error.to_string(),
        }
    }
}
