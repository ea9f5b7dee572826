//! Discovery backed by a live API server

use async_trait::async_trait;
use kube::Client;
use kube::discovery::{Discovery, Scope};
use sherpack_core::{GroupVersion, GroupVersionKind, GroupVersionResource};
use std::sync::{Arc, RwLock};

use crate::client::{
    ApiResourceInfo, ApiResourceList, DiscoveryClient, RestMapper, RestMapping, ServerResources,
    ServerVersion,
};
use crate::error::{DiscoveryError, Result};

/// Implements both [`DiscoveryClient`] and [`RestMapper`] on top of
/// `kube::Discovery`
///
/// The last full discovery run is memoized and reused for REST mapping
/// until [`RestMapper::reset`] is called.
pub struct KubeDiscovery {
    client: Client,
    discovery: RwLock<Option<Arc<Discovery>>>,
}

impl KubeDiscovery {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            discovery: RwLock::new(None),
        }
    }

    async fn run(&self) -> Result<Arc<Discovery>> {
        let discovery = Arc::new(Discovery::new(self.client.clone()).run().await?);
        if let Ok(mut slot) = self.discovery.write() {
            *slot = Some(Arc::clone(&discovery));
        }
        Ok(discovery)
    }

    async fn current(&self) -> Result<Arc<Discovery>> {
        let cached = self.discovery.read().ok().and_then(|slot| slot.clone());
        match cached {
            Some(discovery) => Ok(discovery),
            None => self.run().await,
        }
    }
}

#[async_trait]
impl DiscoveryClient for KubeDiscovery {
    async fn server_resources(&self) -> Result<ServerResources> {
        let discovery = self.run().await?;

        let mut lists = Vec::new();
        for group in discovery.groups() {
            for version in group.versions() {
                let resources = group
                    .versioned_resources(version)
                    .into_iter()
                    .map(|(ar, caps)| ApiResourceInfo {
                        name: ar.plural,
                        kind: ar.kind,
                        namespaced: matches!(caps.scope, Scope::Namespaced),
                        verbs: caps.operations,
                    })
                    .collect();

                lists.push(ApiResourceList {
                    group_version: GroupVersion::new(group.name(), version),
                    resources,
                });
            }
        }

        Ok(ServerResources {
            lists,
            failed: Default::default(),
        })
    }

    async fn server_version(&self) -> Result<ServerVersion> {
        let info = self.client.apiserver_version().await?;
        Ok(ServerVersion {
            major: info.major,
            minor: info.minor,
            git_version: info.git_version,
            platform: info.platform,
        })
    }
}

#[async_trait]
impl RestMapper for KubeDiscovery {
    async fn rest_mapping(&self, gvk: &GroupVersionKind) -> Result<RestMapping> {
        let discovery = self.current().await?;
        let target = kube::core::GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind);

        let (ar, caps) = discovery
            .resolve_gvk(&target)
            .ok_or_else(|| DiscoveryError::NoMapping {
                gvk: gvk.to_string(),
            })?;

        Ok(RestMapping {
            gvk: gvk.clone(),
            gvr: GroupVersionResource::new(ar.group, ar.version, ar.plural),
            namespaced: matches!(caps.scope, Scope::Namespaced),
        })
    }

    async fn kind_for(&self, gvr: &GroupVersionResource) -> Result<GroupVersionKind> {
        let discovery = self.current().await?;

        discovery
            .groups()
            .filter(|group| group.name() == gvr.group)
            .flat_map(|group| group.versioned_resources(&gvr.version))
            .find(|(ar, _)| ar.plural == gvr.resource)
            .map(|(ar, _)| GroupVersionKind::new(ar.group, ar.version, ar.kind))
            .ok_or_else(|| DiscoveryError::NoKind {
                gvr: gvr.to_string(),
            })
    }

    fn reset(&self) {
        if let Ok(mut slot) = self.discovery.write() {
            *slot = None;
        }
    }
}
