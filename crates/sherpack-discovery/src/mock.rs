//! In-memory discovery client for testing
//!
//! Serves a configurable API surface and doubles as a REST mapper, so a
//! cache can be exercised without a Kubernetes cluster.

use async_trait::async_trait;
use sherpack_core::{GroupVersion, GroupVersionKind, GroupVersionResource};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::client::{
    ApiResourceList, DiscoveryClient, RestMapper, RestMapping, ServerResources, ServerVersion,
};
use crate::error::{DiscoveryError, Result};

/// Configurable discovery client and REST mapper
#[derive(Clone, Default)]
pub struct MockDiscoveryClient {
    state: Arc<RwLock<MockState>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<DiscoveryCallCounts>>,
}

#[derive(Default)]
struct MockState {
    lists: Vec<ApiResourceList>,
    failed: BTreeMap<GroupVersion, String>,
    query_failure: bool,
    version: ServerVersion,
    /// Remaining mapping failures per kind
    mapping_failures: HashMap<GroupVersionKind, usize>,
}

/// Counts of calls made against the mock
#[derive(Debug, Default, Clone)]
pub struct DiscoveryCallCounts {
    pub server_resources: usize,
    pub server_versions: usize,
    pub rest_mappings: usize,
    pub kind_fors: usize,
    pub resets: usize,
}

impl MockDiscoveryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a pre-populated API surface
    pub fn with_resources(lists: Vec<ApiResourceList>) -> Self {
        let mock = Self::new();
        mock.set_resources(lists);
        mock
    }

    pub fn set_resources(&self, lists: Vec<ApiResourceList>) {
        self.state.write().unwrap().lists = lists;
    }

    /// Make one group version fail to list
    pub fn set_failed_group_version(&self, gv: GroupVersion, message: &str) {
        self.state
            .write()
            .unwrap()
            .failed
            .insert(gv, message.to_string());
    }

    /// Make the whole discovery query fail
    pub fn set_query_failure(&self, fail: bool) {
        self.state.write().unwrap().query_failure = fail;
    }

    /// Fail the next `times` mapping lookups for a kind
    pub fn fail_mapping(&self, gvk: GroupVersionKind, times: usize) {
        self.state
            .write()
            .unwrap()
            .mapping_failures
            .insert(gvk, times);
    }

    pub fn set_server_version(&self, version: ServerVersion) {
        self.state.write().unwrap().version = version;
    }

    /// Get operation counts for assertions
    pub fn call_counts(&self) -> DiscoveryCallCounts {
        self.operations.read().unwrap().clone()
    }

    fn record(&self, f: impl FnOnce(&mut DiscoveryCallCounts)) {
        f(&mut self.operations.write().unwrap());
    }
}

#[async_trait]
impl DiscoveryClient for MockDiscoveryClient {
    async fn server_resources(&self) -> Result<ServerResources> {
        self.record(|c| c.server_resources += 1);
        let state = self.state.read().unwrap();

        if state.query_failure {
            return Err(DiscoveryError::query("connection refused"));
        }

        let lists = state
            .lists
            .iter()
            .filter(|list| !state.failed.contains_key(&list.group_version))
            .cloned()
            .collect();

        Ok(ServerResources {
            lists,
            failed: state.failed.clone(),
        })
    }

    async fn server_version(&self) -> Result<ServerVersion> {
        self.record(|c| c.server_versions += 1);
        Ok(self.state.read().unwrap().version.clone())
    }
}

#[async_trait]
impl RestMapper for MockDiscoveryClient {
    async fn rest_mapping(&self, gvk: &GroupVersionKind) -> Result<RestMapping> {
        self.record(|c| c.rest_mappings += 1);
        let mut state = self.state.write().unwrap();

        if let Some(remaining) = state.mapping_failures.get_mut(gvk) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DiscoveryError::NoMapping {
                    gvk: gvk.to_string(),
                });
            }
        }

        state
            .lists
            .iter()
            .filter(|list| list.group_version == gvk.group_version())
            .flat_map(|list| list.resources.iter())
            .find(|r| r.kind == gvk.kind && !r.is_subresource())
            .map(|r| RestMapping {
                gvk: gvk.clone(),
                gvr: gvk.group_version().with_resource(&r.name),
                namespaced: r.namespaced,
            })
            .ok_or_else(|| DiscoveryError::NoMapping {
                gvk: gvk.to_string(),
            })
    }

    async fn kind_for(&self, gvr: &GroupVersionResource) -> Result<GroupVersionKind> {
        self.record(|c| c.kind_fors += 1);
        let state = self.state.read().unwrap();

        state
            .lists
            .iter()
            .filter(|list| list.group_version == gvr.group_version())
            .flat_map(|list| list.resources.iter())
            .find(|r| r.name == gvr.resource)
            .map(|r| gvr.group_version().with_kind(&r.kind))
            .ok_or_else(|| DiscoveryError::NoKind {
                gvr: gvr.to_string(),
            })
    }

    fn reset(&self) {
        self.record(|c| c.resets += 1);
    }
}
