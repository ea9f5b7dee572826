//! Capabilities consumed by the discovery cache

use async_trait::async_trait;
use sherpack_core::{GroupVersion, GroupVersionKind, GroupVersionResource};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;

/// One resource served by a group version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResourceInfo {
    /// Plural resource name, e.g. `deployments`
    pub name: String,
    pub kind: String,
    pub namespaced: bool,
    pub verbs: Vec<String>,
}

impl ApiResourceInfo {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, namespaced: bool) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            namespaced,
            verbs: ["create", "delete", "get", "list", "patch", "update", "watch"]
                .iter()
                .map(|v| v.to_string())
                .collect(),
        }
    }

    pub fn with_verbs(mut self, verbs: &[&str]) -> Self {
        self.verbs = verbs.iter().map(|v| v.to_string()).collect();
        self
    }

    /// Subresources such as `deployments/scale` are not addressable kinds
    pub fn is_subresource(&self) -> bool {
        self.name.contains('/')
    }
}

/// All resources served by a single group version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResourceList {
    pub group_version: GroupVersion,
    pub resources: Vec<ApiResourceInfo>,
}

/// Result of a full server discovery
///
/// Group versions that failed to list are reported alongside whatever was
/// retrieved successfully.
#[derive(Debug, Clone, Default)]
pub struct ServerResources {
    pub lists: Vec<ApiResourceList>,
    pub failed: BTreeMap<GroupVersion, String>,
}

/// Kubernetes server version
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerVersion {
    pub major: String,
    pub minor: String,
    pub git_version: String,
    pub platform: String,
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.git_version.is_empty() {
            write!(f, "{}.{}", self.major, self.minor)
        } else {
            f.write_str(&self.git_version)
        }
    }
}

/// How a kind is addressed through the REST API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestMapping {
    pub gvk: GroupVersionKind,
    pub gvr: GroupVersionResource,
    pub namespaced: bool,
}

/// Lists the API surface of a cluster
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    async fn server_resources(&self) -> Result<ServerResources>;

    async fn server_version(&self) -> Result<ServerVersion>;
}

/// Resolves between kinds and REST resources
#[async_trait]
pub trait RestMapper: Send + Sync {
    async fn rest_mapping(&self, gvk: &GroupVersionKind) -> Result<RestMapping>;

    async fn kind_for(&self, gvr: &GroupVersionResource) -> Result<GroupVersionKind>;

    /// Drop any memoized mappings so the next lookup re-reads the server
    fn reset(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_version_display() {
        let v = ServerVersion {
            major: "1".into(),
            minor: "31".into(),
            ..Default::default()
        };
        assert_eq!(v.to_string(), "1.31");

        let v = ServerVersion {
            git_version: "v1.31.2".into(),
            ..v
        };
        assert_eq!(v.to_string(), "v1.31.2");
    }

    #[test]
    fn test_subresource_detection() {
        assert!(ApiResourceInfo::new("deployments/scale", "Scale", true).is_subresource());
        assert!(!ApiResourceInfo::new("deployments", "Deployment", true).is_subresource());
    }
}
