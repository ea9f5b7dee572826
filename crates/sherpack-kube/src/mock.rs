//! In-memory applier and live-object source for testing
//!
//! These stand in for the cluster so the sync engine can be exercised
//! without a Kubernetes API server.

use async_trait::async_trait;
use kube::core::ErrorResponse;
use sherpack_core::{Manifest, ResourceKey};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::applier::{
    ApplyOptions, ClusterApplier, ResourceSyncResult, ResultCode, SyncPhase, plan_sync,
};
use crate::diff::LiveObjectMap;
use crate::error::{KubeError, Result};
use crate::live::LiveObjects;

fn api_error(code: u16, reason: &str, message: String) -> KubeError {
    KubeError::Api(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

/// A recorded call to [`ClusterApplier::sync`]
#[derive(Debug, Clone)]
pub struct SyncCall {
    pub service_id: String,
    pub desired: Vec<Manifest>,
    pub live: usize,
}

/// Applier that plans like the real one and reports every step as done
///
/// Resources registered with [`MockApplier::fail_resource`] come back as
/// `SyncFailed`; with [`MockApplier::fail_next`] the whole call errors.
#[derive(Clone, Default)]
pub struct MockApplier {
    state: Arc<RwLock<ApplierState>>,
}

#[derive(Default)]
struct ApplierState {
    calls: Vec<SyncCall>,
    created: HashMap<ResourceKey, Manifest>,
    failing: HashSet<ResourceKey>,
    fail_next: Option<String>,
}

impl MockApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_resource(&self, key: ResourceKey) {
        self.state.write().unwrap().failing.insert(key);
    }

    /// Make the next sync call return an error
    pub fn fail_next(&self, message: &str) {
        self.state.write().unwrap().fail_next = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<SyncCall> {
        self.state.read().unwrap().calls.clone()
    }

    pub fn sync_count(&self) -> usize {
        self.state.read().unwrap().calls.len()
    }

    /// Objects created through [`ClusterApplier::create`]
    pub fn created(&self) -> Vec<Manifest> {
        self.state.read().unwrap().created.values().cloned().collect()
    }
}

#[async_trait]
impl ClusterApplier for MockApplier {
    async fn sync(
        &self,
        service_id: &str,
        desired: Vec<Manifest>,
        live: &LiveObjectMap,
        options: &ApplyOptions,
    ) -> Result<Vec<ResourceSyncResult>> {
        let mut state = self.state.write().unwrap();
        state.calls.push(SyncCall {
            service_id: service_id.to_string(),
            desired: desired.clone(),
            live: live.len(),
        });

        if let Some(message) = state.fail_next.take() {
            return Err(api_error(500, "InternalError", message));
        }

        let plan = plan_sync(service_id, desired, live, options);
        let mut results = Vec::new();

        let outcome = |manifest: &Manifest, phase: SyncPhase| {
            if state.failing.contains(&manifest.key()) {
                ResourceSyncResult::new(manifest, ResultCode::SyncFailed, phase, "rejected")
            } else {
                ResourceSyncResult::new(manifest, ResultCode::Synced, phase, "applied")
            }
        };

        for hook in &plan.pre_hooks {
            results.push(outcome(&hook.manifest, SyncPhase::PreSync));
        }
        for wave in &plan.waves {
            for manifest in &wave.resources {
                results.push(outcome(manifest, SyncPhase::Sync));
            }
        }
        for hook in &plan.post_hooks {
            results.push(outcome(&hook.manifest, SyncPhase::PostSync));
        }

        let code = if options.prune {
            ResultCode::Pruned
        } else {
            ResultCode::PruneSkipped
        };
        for manifest in &plan.prune {
            results.push(ResourceSyncResult::new(manifest, code, SyncPhase::Prune, "prune"));
        }

        Ok(results)
    }

    async fn create(&self, manifest: &Manifest) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let key = manifest.key();
        if state.created.contains_key(&key) {
            let message = format!("{} already exists", manifest.name());
            return Err(api_error(409, "AlreadyExists", message));
        }
        state.created.insert(key, manifest.clone());
        Ok(())
    }
}

/// Configurable live-object source
#[derive(Clone, Default)]
pub struct MockLiveObjects {
    state: Arc<RwLock<LiveState>>,
}

#[derive(Default)]
struct LiveState {
    objects: Vec<Manifest>,
    fail_next: Option<String>,
    failing: bool,
    lookups: usize,
}

impl MockLiveObjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_objects(&self, objects: Vec<Manifest>) {
        self.state.write().unwrap().objects = objects;
    }

    /// Make the next lookup fail
    pub fn fail_next(&self, message: &str) {
        self.state.write().unwrap().fail_next = Some(message.to_string());
    }

    /// Make every lookup fail until reset
    pub fn set_failing(&self, failing: bool) {
        self.state.write().unwrap().failing = failing;
    }

    pub fn lookup_count(&self) -> usize {
        self.state.read().unwrap().lookups
    }
}

#[async_trait]
impl LiveObjects for MockLiveObjects {
    async fn owned_by(&self, service_id: &str) -> Result<LiveObjectMap> {
        let mut state = self.state.write().unwrap();
        state.lookups += 1;

        if let Some(message) = state.fail_next.take() {
            return Err(api_error(500, "InternalError", message));
        }
        if state.failing {
            return Err(api_error(500, "InternalError", "lookup failed".to_string()));
        }

        Ok(crate::ownership::filter_owned(&state.objects, service_id)
            .into_iter()
            .map(|obj| (obj.key(), obj))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ownership::stamp;
    use serde_json::json;

    fn config_map(name: &str) -> Manifest {
        Manifest::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": "apps"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_mock_applier_reports_plan() {
        let applier = MockApplier::new();
        let mut desired = vec![config_map("a"), config_map("b")];
        stamp(&mut desired, "svc-1");
        applier.fail_resource(desired[1].key());

        let results = applier
            .sync("svc-1", desired, &LiveObjectMap::new(), &ApplyOptions::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].code, ResultCode::Synced);
        assert_eq!(results[1].code, ResultCode::SyncFailed);
        assert_eq!(applier.sync_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_create_rejects_duplicates() {
        let applier = MockApplier::new();
        applier.create(&config_map("job")).await.unwrap();
        let err = applier.create(&config_map("job")).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(applier.created().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_live_objects_filters_by_owner() {
        let live = MockLiveObjects::new();
        let mut mine = vec![config_map("mine")];
        stamp(&mut mine, "svc-1");
        mine.push(config_map("other"));
        live.set_objects(mine);

        assert_eq!(live.owned_by("svc-1").await.unwrap().len(), 1);
        live.fail_next("boom");
        assert!(live.owned_by("svc-1").await.is_err());
        assert_eq!(live.lookup_count(), 2);
    }
}
