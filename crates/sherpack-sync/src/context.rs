//! Shared collaborators of the agent loops
//!
//! Built once at startup and handed to every loop; nothing in the agent
//! reaches for process-wide state.

use async_trait::async_trait;
use sherpack_core::{Manifest, ServiceDescriptor};
use sherpack_discovery::DiscoveryCache;
use sherpack_kube::{ClusterApplier, KubeApplier, KubeLiveObjects, LiveObjects};
use sherpack_manifests::{ManifestCache, ManifestError};
use std::sync::Arc;

use crate::config::AgentConfig;
use crate::gate::{GateApplier, JobGateApplier};
use crate::remote::RemoteApi;
use crate::service_cache::ServiceCache;

/// Rendered desired state of a service
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn manifests(&self, service: &ServiceDescriptor) -> Result<Vec<Manifest>, ManifestError>;

    /// Drop whatever is cached for a service
    fn expire(&self, id: &str);
}

#[async_trait]
impl ManifestSource for ManifestCache {
    async fn manifests(&self, service: &ServiceDescriptor) -> Result<Vec<Manifest>, ManifestError> {
        self.fetch(service).await
    }

    fn expire(&self, id: &str) {
        ManifestCache::expire(self, id);
    }
}

/// Collaborators shared by the agent loops
#[derive(Clone)]
pub struct AgentContext {
    pub config: Arc<AgentConfig>,
    pub remote: Arc<dyn RemoteApi>,
    pub discovery: Arc<DiscoveryCache>,
    pub services: Arc<ServiceCache>,
    pub manifests: Arc<dyn ManifestSource>,
    pub live: Arc<dyn LiveObjects>,
    pub applier: Arc<dyn ClusterApplier>,
    pub gates: Arc<dyn GateApplier>,
}

impl AgentContext {
    pub fn new(
        config: AgentConfig,
        remote: Arc<dyn RemoteApi>,
        discovery: Arc<DiscoveryCache>,
        manifests: Arc<dyn ManifestSource>,
        live: Arc<dyn LiveObjects>,
        applier: Arc<dyn ClusterApplier>,
        gates: Arc<dyn GateApplier>,
    ) -> Self {
        let services = Arc::new(ServiceCache::new(
            Arc::clone(&remote),
            config.service_cache_expiry,
        ));
        Self {
            config: Arc::new(config),
            remote,
            discovery,
            services,
            manifests,
            live,
            applier,
            gates,
        }
    }

    /// Wire the cluster-backed live object source, applier and gate applier
    pub fn for_cluster(
        config: AgentConfig,
        client: kube::Client,
        remote: Arc<dyn RemoteApi>,
        discovery: Arc<DiscoveryCache>,
        manifests: Arc<dyn ManifestSource>,
    ) -> Self {
        let live = Arc::new(KubeLiveObjects::new(client.clone(), Arc::clone(&discovery)));
        let applier: Arc<dyn ClusterApplier> =
            Arc::new(KubeApplier::new(client, Arc::clone(&discovery)));
        let gates = Arc::new(JobGateApplier::new(
            Arc::clone(&applier),
            config.gate_namespace.clone(),
        ));
        Self::new(config, remote, discovery, manifests, live, applier, gates)
    }
}
