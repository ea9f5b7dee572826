//! Service sync engine
//!
//! Each dequeued service id goes through one reconciliation pass:
//! 1. load the descriptor from the service cache
//! 2. render its manifests, or use none for a deleted service
//! 3. make sure the service namespace exists and place namespaced
//!    resources without a namespace in it
//! 4. stamp ownership and digests
//! 5. look up the live objects it owns
//! 6. apply through the cluster applier
//! 7. aggregate results with live health and report
//!
//! A failed live lookup does not abort the pass; the pass continues
//! without modification checks and without anything to prune.

use metrics::{counter, histogram};
use serde_json::json;
use sherpack_core::{ComponentAttributes, ErrorSource, Manifest};
use sherpack_discovery::DiscoverySnapshot;
use sherpack_kube::ownership::{owner_of, stamp};
use sherpack_kube::{ApplyOptions, KubeError, LiveObjectMap, ResourceSyncResult, sync_error};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::context::AgentContext;
use crate::error::{Result, SyncError};
use crate::queue::{SyncItem, WorkQueue};
use crate::status::{self, StatusReporter};

/// Outcome of one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Empty id
    Skipped,
    /// Applied, possibly with failed resources
    Synced { failed: usize },
}

/// Turns queued service ids into reconciliation passes
pub struct SyncEngine {
    ctx: AgentContext,
    queue: WorkQueue<SyncItem>,
    reporter: StatusReporter,
    /// Services with a pass in flight
    syncing: Mutex<HashSet<String>>,
}

impl SyncEngine {
    pub fn new(ctx: AgentContext, queue: WorkQueue<SyncItem>) -> Self {
        let reporter = StatusReporter::new(ctx.remote.clone());
        Self {
            ctx,
            queue,
            reporter,
            syncing: Mutex::new(HashSet::new()),
        }
    }

    pub fn queue(&self) -> &WorkQueue<SyncItem> {
        &self.queue
    }

    pub fn enqueue(&self, id: impl Into<String>) {
        self.queue.add(SyncItem::new(id));
    }

    /// Re-enqueue the owner of a changed live object
    ///
    /// Objects controlled by another object are ignored, as is the service
    /// services being synced right now since their own writes trigger
    /// these changes.
    pub fn on_live_change(&self, obj: &Manifest) {
        if obj.has_owner_references() {
            return;
        }
        let Some(owner) = owner_of(obj) else {
            return;
        };
        if lock(&self.syncing).contains(owner) {
            return;
        }
        debug!(service_id = %owner, resource = %obj, "live object changed, requeueing service");
        self.enqueue(owner);
    }

    /// Run one reconciliation pass
    pub async fn process_item(&self, item: &SyncItem) -> Result<PassOutcome> {
        let id = item.id();
        if id.is_empty() {
            return Ok(PassOutcome::Skipped);
        }

        info!(service_id = %id, "attempting to sync service");
        let service = self.ctx.services.get(id).await.inspect_err(|e| {
            warn!(service_id = %id, error = %e, "failed to fetch service, ignoring for now");
        })?;

        let _syncing = SyncingGuard::set(&self.syncing, id);

        let mut manifests = if service.is_deleted() {
            info!(service_id = %id, name = %service.name, "service deleted, pruning its resources");
            Vec::new()
        } else {
            match self.ctx.manifests.manifests(&service).await {
                Ok(manifests) => {
                    self.ensure_namespace(&service.namespace).await;
                    manifests
                }
                Err(e) => {
                    error!(service_id = %id, error = %e, "failed to load manifests");
                    let components = self.collect_components(id, &[]).await;
                    let errors =
                        status::error_attributes(ErrorSource::Manifests, Some(&e as &dyn fmt::Display));
                    self.reporter.update_status(id, components, errors).await;
                    // already reported, the worker must not report it again
                    return Err(SyncError::Expected(e.to_string()));
                }
            }
        };

        info!(service_id = %id, name = %service.name, namespace = %service.namespace, count = manifests.len(), "syncing manifests");
        default_namespaces(&mut manifests, &service.namespace, &self.ctx.discovery.snapshot());
        stamp(&mut manifests, id);

        let (live, check_modifications) = match self.ctx.live.owned_by(id).await {
            Ok(live) => (live, true),
            Err(e) => {
                let degraded = KubeError::DiffDegraded {
                    message: e.to_string(),
                };
                warn!(service_id = %id, error = %degraded, "disabling modification checks");
                (LiveObjectMap::new(), false)
            }
        };

        let options = ApplyOptions {
            field_manager: self.ctx.config.field_manager.clone(),
            wave_delay: self.ctx.config.wave_delay,
            check_modifications,
            ..Default::default()
        };

        let (results, sync_err) = match self.ctx.applier.sync(id, manifests, &live, &options).await {
            Ok(results) => {
                let err = sync_error(&results);
                (results, err)
            }
            Err(e) => (Vec::new(), Some(e)),
        };
        if let Some(e) = &sync_err {
            warn!(service_id = %id, error = %e, "sync finished with errors");
        }

        let failed = results.iter().filter(|r| r.is_failed()).count();
        let components = self.collect_components(id, &results).await;
        let errors = status::error_attributes(
            ErrorSource::Sync,
            sync_err.as_ref().map(|e| e as &dyn fmt::Display),
        );
        self.reporter.update_status(id, components, errors).await;

        Ok(PassOutcome::Synced { failed })
    }

    /// Create the service namespace unless it already exists
    async fn ensure_namespace(&self, namespace: &str) {
        if namespace.is_empty() {
            return;
        }
        let manifest = match Manifest::from_value(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": namespace}
        })) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "invalid namespace name");
                return;
            }
        };

        match self.ctx.applier.create(&manifest).await {
            Ok(()) => info!(namespace = %namespace, "created service namespace"),
            Err(e) if e.is_already_exists() => {}
            Err(e) => warn!(namespace = %namespace, error = %e, "failed to ensure service namespace"),
        }
    }

    async fn collect_components(
        &self,
        id: &str,
        results: &[ResourceSyncResult],
    ) -> Result<Vec<ComponentAttributes>> {
        let live = self.ctx.live.owned_by(id).await?;
        Ok(status::aggregate(results, &live))
    }

    /// Consume service ids until the queue shuts down
    pub async fn run(&self) -> Result<()> {
        info!("starting sync worker");
        while let Some(item) = self.queue.get().await {
            let in_flight = self.queue.in_flight(&item);
            let started = Instant::now();
            let outcome = self.process_item(&item).await;
            histogram!("sync_item_ms", started.elapsed().as_secs_f64() * 1000.0);

            match outcome {
                Ok(PassOutcome::Synced { failed }) if failed > 0 => {
                    counter!("sync_items_total", 1u64, "result" => "partial");
                    self.queue.forget(&item);
                }
                Ok(_) => {
                    counter!("sync_items_total", 1u64, "result" => "success");
                    self.queue.forget(&item);
                }
                Err(e) => {
                    counter!("sync_items_total", 1u64, "result" => "error");
                    self.handle_failure(&item, &e).await;
                }
            }

            drop(in_flight);
            if !self.ctx.config.sync_delay.is_zero() {
                tokio::time::sleep(self.ctx.config.sync_delay).await;
            }
        }
        info!("shutting down sync worker");
        Ok(())
    }

    async fn handle_failure(&self, item: &SyncItem, e: &SyncError) {
        error!(service_id = %item, error = %e, "failed to process item");

        if !item.id().is_empty() && !e.is_expected() {
            self.reporter
                .report_error(item.id(), ErrorSource::Sync, e)
                .await;
        }

        if e.is_retryable() {
            self.queue.add_rate_limited(item.clone());
        }
    }

}

/// Place namespaced resources without a namespace in `namespace`
///
/// Kinds unknown to discovery are treated as namespaced.
fn default_namespaces(manifests: &mut [Manifest], namespace: &str, snapshot: &DiscoverySnapshot) {
    if namespace.is_empty() {
        return;
    }
    for manifest in manifests.iter_mut() {
        if manifest.namespace().is_none() && snapshot.is_namespaced(&manifest.gvk()).unwrap_or(true) {
            manifest.set_namespace(namespace);
        }
    }
}

fn lock(syncing: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    syncing.lock().unwrap_or_else(|e| e.into_inner())
}

/// Marks a service as being synced for the lifetime of a pass
struct SyncingGuard<'a> {
    slot: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> SyncingGuard<'a> {
    fn set(slot: &'a Mutex<HashSet<String>>, id: &str) -> Self {
        lock(slot).insert(id.to_string());
        Self {
            slot,
            id: id.to_string(),
        }
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        lock(self.slot).remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{Harness, harness};
    use crate::queue::Backoff;
    use chrono::Utc;
    use serde_json::json;
    use sherpack_core::{ComponentState, GroupVersion, ResourceKey, ServiceDescriptor};
    use sherpack_discovery::{ApiResourceInfo, ApiResourceList};
    use std::sync::Arc;

    fn config_map(name: &str, namespace: &str) -> Manifest {
        Manifest::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": namespace},
            "data": {"key": "value"}
        }))
        .unwrap()
    }

    fn engine(h: &Harness) -> SyncEngine {
        let queue = WorkQueue::new(Backoff::from(&h.ctx.config.queue));
        SyncEngine::new(h.ctx.clone(), queue)
    }

    fn stamped(id: &str, manifests: Vec<Manifest>) -> Vec<Manifest> {
        let mut manifests = manifests;
        stamp(&mut manifests, id);
        manifests
    }

    #[tokio::test]
    async fn test_empty_item_is_a_no_op() {
        let h = harness();
        let outcome = engine(&h).process_item(&SyncItem::new("")).await.unwrap();
        assert_eq!(outcome, PassOutcome::Skipped);
        assert_eq!(h.remote.call_counts().get_service, 0);
    }

    #[tokio::test]
    async fn test_missing_service_is_retryable() {
        let h = harness();
        let err = engine(&h).process_item(&SyncItem::new("ghost")).await.unwrap_err();
        assert!(matches!(err, SyncError::ServiceNotFound { .. }));
        assert!(err.is_retryable());
        assert_eq!(h.applier.sync_count(), 0);
    }

    #[tokio::test]
    async fn test_unauthenticated_fetch_skips_apply_and_reports_manifests_error() {
        let h = harness();
        h.remote.set_service(ServiceDescriptor::new("svc-1", "web", "apps"));
        h.manifests.fail_with_status("svc-1", 403);

        let err = engine(&h).process_item(&SyncItem::new("svc-1")).await.unwrap_err();
        assert!(err.is_expected());
        assert!(!err.is_retryable());
        assert_eq!(h.applier.sync_count(), 0);
        assert!(h.applier.created().is_empty());

        let update = h.remote.last_update("svc-1").unwrap();
        assert_eq!(update.errors.len(), 1);
        assert_eq!(update.errors[0].source, ErrorSource::Manifests);
        assert!(update.errors[0].message.contains("Unauthenticated"));
    }

    #[tokio::test]
    async fn test_deleted_service_runs_prune_only_pass() {
        let h = harness();
        let mut service = ServiceDescriptor::new("svc-1", "web", "apps");
        service.deleted_at = Some(Utc::now());
        h.remote.set_service(service);
        h.manifests.set("svc-1", vec![config_map("cfg", "apps")]);
        h.live.set_objects(stamped("svc-1", vec![config_map("cfg", "apps")]));

        engine(&h).process_item(&SyncItem::new("svc-1")).await.unwrap();

        assert_eq!(h.manifests.calls(), 0);
        let calls = h.applier.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].desired.is_empty());
        assert_eq!(calls[0].live, 1);
    }

    #[tokio::test]
    async fn test_pass_stamps_applies_and_reports() {
        let h = harness();
        h.remote.set_service(ServiceDescriptor::new("svc-1", "web", "apps"));
        h.manifests.set("svc-1", vec![config_map("cfg", "apps")]);
        h.live.set_objects(stamped("svc-1", vec![config_map("cfg", "apps")]));

        let outcome = engine(&h).process_item(&SyncItem::new("svc-1")).await.unwrap();
        assert_eq!(outcome, PassOutcome::Synced { failed: 0 });

        let desired = &h.applier.calls()[0].desired;
        assert!(desired.iter().all(|m| owner_of(m) == Some("svc-1")));

        let update = h.remote.last_update("svc-1").unwrap();
        assert!(update.errors.is_empty());
        assert_eq!(update.components.len(), 1);
        assert_eq!(update.components[0].state, Some(ComponentState::Running));
        assert!(update.components[0].synced);
    }

    #[tokio::test]
    async fn test_disjoint_services_share_a_namespace() {
        let h = harness();
        h.remote.set_service(ServiceDescriptor::new("svc-a", "a", "shared"));
        h.remote.set_service(ServiceDescriptor::new("svc-b", "b", "shared"));
        h.manifests.set("svc-a", vec![config_map("a", "shared")]);
        h.manifests.set("svc-b", vec![config_map("b", "shared")]);

        let mut live = stamped("svc-a", vec![config_map("a", "shared")]);
        live.extend(stamped("svc-b", vec![config_map("b", "shared")]));
        h.live.set_objects(live);

        let engine = engine(&h);
        engine.process_item(&SyncItem::new("svc-a")).await.unwrap();
        engine.process_item(&SyncItem::new("svc-b")).await.unwrap();

        let calls = h.applier.calls();
        assert_eq!(calls[0].live, 1);
        assert_eq!(calls[1].live, 1);

        let a = h.remote.last_update("svc-a").unwrap();
        let names: Vec<_> = a.components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a"]);
    }

    #[tokio::test]
    async fn test_live_lookup_failure_degrades_to_full_apply() {
        let h = harness();
        h.remote.set_service(ServiceDescriptor::new("svc-1", "web", "apps"));
        h.manifests.set("svc-1", vec![config_map("cfg", "apps")]);
        h.live.fail_next("apiserver unavailable");

        let outcome = engine(&h).process_item(&SyncItem::new("svc-1")).await.unwrap();
        assert_eq!(outcome, PassOutcome::Synced { failed: 0 });
        assert_eq!(h.applier.calls()[0].live, 0);
        assert!(h.remote.last_update("svc-1").unwrap().errors.is_empty());
    }

    #[tokio::test]
    async fn test_failed_resources_are_reported_under_sync() {
        let h = harness();
        h.remote.set_service(ServiceDescriptor::new("svc-1", "web", "apps"));
        h.manifests.set("svc-1", vec![config_map("cfg", "apps")]);
        h.applier
            .fail_resource(ResourceKey::new("", "ConfigMap", "apps", "cfg"));

        let outcome = engine(&h).process_item(&SyncItem::new("svc-1")).await.unwrap();
        assert_eq!(outcome, PassOutcome::Synced { failed: 1 });

        let update = h.remote.last_update("svc-1").unwrap();
        assert_eq!(update.errors[0].source, ErrorSource::Sync);
        assert_eq!(update.components[0].state, Some(ComponentState::Failed));
    }

    #[tokio::test]
    async fn test_applier_error_is_reported_under_sync() {
        let h = harness();
        h.remote.set_service(ServiceDescriptor::new("svc-1", "web", "apps"));
        h.applier.fail_next("boom");

        engine(&h).process_item(&SyncItem::new("svc-1")).await.unwrap();

        let update = h.remote.last_update("svc-1").unwrap();
        assert_eq!(update.errors.len(), 1);
        assert_eq!(update.errors[0].source, ErrorSource::Sync);
    }

    #[tokio::test]
    async fn test_component_collection_failure_reports_reconciliation_error() {
        let h = harness();
        h.remote.set_service(ServiceDescriptor::new("svc-1", "web", "apps"));
        h.manifests.set("svc-1", vec![config_map("cfg", "apps")]);
        h.live.set_failing(true);

        engine(&h).process_item(&SyncItem::new("svc-1")).await.unwrap();

        let update = h.remote.last_update("svc-1").unwrap();
        let sources: Vec<_> = update.errors.iter().map(|e| e.source).collect();
        assert_eq!(sources, vec![ErrorSource::Reconciliation]);
        assert!(update.components.is_empty());
    }

    #[tokio::test]
    async fn test_live_change_requeues_owner_except_current() {
        let h = harness();
        let engine = engine(&h);

        let owned = stamped("svc-1", vec![config_map("cfg", "apps")]).remove(0);
        engine.on_live_change(&owned);
        assert_eq!(engine.queue().len(), 1);

        let item = engine.queue().get().await.unwrap();
        engine.queue().done(&item);

        let mut child = owned.clone().into_value();
        child["metadata"]["ownerReferences"] = json!([{"kind": "Deployment", "name": "web"}]);
        engine.on_live_change(&Manifest::from_value(child).unwrap());
        engine.on_live_change(&config_map("untagged", "apps"));
        assert!(engine.queue().is_empty());

        {
            let _guard = SyncingGuard::set(&engine.syncing, "svc-1");
            engine.on_live_change(&owned);
            assert!(engine.queue().is_empty());
        }
        engine.on_live_change(&owned);
        assert_eq!(engine.queue().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_requeues_retryable_failures() {
        let h = harness();
        let engine = engine(&h);
        engine.enqueue("ghost");

        let worker = {
            let queue = engine.queue().clone();
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                queue.shut_down();
            }
        };
        let (result, _) = tokio::join!(engine.run(), worker);
        result.unwrap();

        assert!(h.remote.call_counts().get_service > 1);
        let update = h.remote.last_update("ghost").unwrap();
        assert_eq!(update.errors[0].source, ErrorSource::Sync);
    }

    #[tokio::test]
    async fn test_namespaceless_resources_land_in_service_namespace() {
        let h = harness();
        h.discovery.set_resources(vec![
            ApiResourceList {
                group_version: GroupVersion::new("", "v1"),
                resources: vec![ApiResourceInfo::new("configmaps", "ConfigMap", true)],
            },
            ApiResourceList {
                group_version: GroupVersion::new("rbac.authorization.k8s.io", "v1"),
                resources: vec![ApiResourceInfo::new("clusterroles", "ClusterRole", false)],
            },
        ]);
        h.ctx.discovery.refresh().await.unwrap();

        let cluster_role = Manifest::from_value(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "ClusterRole",
            "metadata": {"name": "reader"}
        }))
        .unwrap();
        let mut bare = config_map("cfg", "apps").into_value();
        bare["metadata"].as_object_mut().unwrap().remove("namespace");

        h.remote.set_service(ServiceDescriptor::new("svc-1", "web", "apps"));
        h.manifests.set(
            "svc-1",
            vec![Manifest::from_value(bare).unwrap(), config_map("other", "edge"), cluster_role],
        );

        engine(&h).process_item(&SyncItem::new("svc-1")).await.unwrap();

        let desired = &h.applier.calls()[0].desired;
        let namespaces: Vec<_> = desired.iter().map(|m| m.namespace()).collect();
        assert_eq!(namespaces, vec![Some("apps"), Some("edge"), None]);
        assert_eq!(desired[0].key(), ResourceKey::new("", "ConfigMap", "apps", "cfg"));
    }

    #[tokio::test]
    async fn test_service_namespace_is_created_once() {
        let h = harness();
        h.remote.set_service(ServiceDescriptor::new("svc-1", "web", "apps"));
        h.manifests.set("svc-1", vec![config_map("cfg", "apps")]);
        let engine = engine(&h);

        engine.process_item(&SyncItem::new("svc-1")).await.unwrap();
        engine.process_item(&SyncItem::new("svc-1")).await.unwrap();

        let created = h.applier.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].kind(), "Namespace");
        assert_eq!(created[0].name(), "apps");
        assert_eq!(h.applier.sync_count(), 2);
        assert!(h.remote.last_update("svc-1").unwrap().errors.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_service_does_not_create_namespace() {
        let h = harness();
        let mut service = ServiceDescriptor::new("svc-1", "web", "apps");
        service.deleted_at = Some(Utc::now());
        h.remote.set_service(service);

        engine(&h).process_item(&SyncItem::new("svc-1")).await.unwrap();
        assert!(h.applier.created().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_pass_releases_service() {
        let h = harness();
        h.remote.set_service(ServiceDescriptor::new("svc-1", "web", "apps"));
        h.manifests.set_panicking("svc-1", true);
        let engine = Arc::new(engine(&h));
        engine.enqueue("svc-1");

        let worker = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.run().await })
        };
        assert!(worker.await.unwrap_err().is_panic());

        h.manifests.set_panicking("svc-1", false);
        engine.enqueue("svc-1");
        assert_eq!(engine.queue().len(), 1);

        engine.queue().shut_down();
        engine.run().await.unwrap();
        assert_eq!(h.manifests.calls(), 2);
        assert!(h.remote.last_update("svc-1").is_some());
    }

    #[test]
    fn test_worker_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let h = harness();
        let engine = engine(&h);
        let run = engine.run();
        assert_send(&run);
    }
}
