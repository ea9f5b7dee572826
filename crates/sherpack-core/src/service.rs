//! Desired-state records mirrored from the control plane

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A deployable service as declared by the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub id: String,
    pub name: String,
    pub namespace: String,

    /// URL of the manifest tarball
    #[serde(default)]
    pub tarball: Option<String>,

    /// Content digest of the tarball (`sha256:<hex>` or an opaque revision sha)
    #[serde(default)]
    pub digest: Option<String>,

    #[serde(default)]
    pub revision: Option<Revision>,

    /// Additional render passes over sub-paths of the artifact
    #[serde(default)]
    pub renderers: Vec<RendererSpec>,

    #[serde(default)]
    pub helm: Option<HelmSettings>,

    /// Free-form configuration exposed to renderers
    #[serde(default)]
    pub configuration: BTreeMap<String, String>,

    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ServiceDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            namespace: namespace.into(),
            tarball: None,
            digest: None,
            revision: None,
            renderers: Vec::new(),
            helm: None,
            configuration: BTreeMap::new(),
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub id: String,
    #[serde(default)]
    pub sha: Option<String>,
}

/// Settings handed through to a Helm renderer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmSettings {
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub values: Option<String>,
    #[serde(default)]
    pub values_files: Vec<String>,
    #[serde(default)]
    pub ignore_hooks: bool,
}

/// Which rendering engine processes a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    /// Pick by marker files
    Auto,
    Raw,
    Helm,
    Kustomize,
}

impl fmt::Display for RendererKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Raw => "raw",
            Self::Helm => "helm",
            Self::Kustomize => "kustomize",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererSpec {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: RendererKind,
}

/// A pipeline gate mirrored from the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gate {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub gate_type: GateType,
    pub state: GateState,
    /// Opaque Job spec for job gates
    #[serde(default)]
    pub spec: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateType {
    Approval,
    Window,
    Job,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateState {
    Open,
    Closed,
    Pending,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
            Self::Pending => "PENDING",
        };
        f.write_str(s)
    }
}
