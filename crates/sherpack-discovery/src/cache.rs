//! In-memory mirror of the cluster API surface
//!
//! The cache keeps a [`DiscoverySnapshot`] of known kinds, resources and
//! group versions. Structural changes (`add`, `delete`, `refresh`) are
//! serialized by a coarse async lock; readers take a cheap `Arc` clone of the
//! current snapshot and never block writers for long.
//!
//! Invariants maintained after every operation:
//! - every cached kind maps to at most one resource
//! - a group version is cached iff at least one cached kind belongs to it

use futures::future::join_all;
use sherpack_core::{GroupVersion, GroupVersionKind, GroupVersionResource};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::client::{DiscoveryClient, RestMapper, RestMapping, ServerVersion};
use crate::error::{DiscoveryError, Result};
use crate::events::{DiscoveryEvent, DiscoveryObserver, ObserverRegistry};

/// Retry policy for resolving a kind to its REST resource
///
/// Freshly registered CRDs can take a moment to appear in discovery, so
/// `add` retries the mapping a few times before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingBackoff {
    pub initial: Duration,
    pub steps: u32,
    pub cap: Duration,
}

impl Default for MappingBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            steps: 3,
            cap: Duration::from_millis(500),
        }
    }
}

/// Point-in-time view of the API surface
#[derive(Debug, Clone, Default)]
pub struct DiscoverySnapshot {
    kinds: BTreeSet<GroupVersionKind>,
    resources: BTreeSet<GroupVersionResource>,
    group_versions: BTreeSet<GroupVersion>,
    kind_to_resource: HashMap<GroupVersionKind, GroupVersionResource>,
    resource_to_kind: HashMap<GroupVersionResource, GroupVersionKind>,
    namespaced: HashMap<GroupVersionKind, bool>,
    server_version: Option<ServerVersion>,
}

impl DiscoverySnapshot {
    pub fn kinds(&self) -> &BTreeSet<GroupVersionKind> {
        &self.kinds
    }

    pub fn resources(&self) -> &BTreeSet<GroupVersionResource> {
        &self.resources
    }

    pub fn group_versions(&self) -> &BTreeSet<GroupVersion> {
        &self.group_versions
    }

    pub fn server_version(&self) -> Option<&ServerVersion> {
        self.server_version.as_ref()
    }

    pub fn has_kind(&self, gvk: &GroupVersionKind) -> bool {
        self.kinds.contains(gvk)
    }

    pub fn resource_for(&self, gvk: &GroupVersionKind) -> Option<&GroupVersionResource> {
        self.kind_to_resource.get(gvk)
    }

    pub fn kind_for(&self, gvr: &GroupVersionResource) -> Option<&GroupVersionKind> {
        self.resource_to_kind.get(gvr)
    }

    /// Scope of a kind, if known
    pub fn is_namespaced(&self, gvk: &GroupVersionKind) -> Option<bool> {
        self.namespaced.get(gvk).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty() && self.resources.is_empty() && self.group_versions.is_empty()
    }

    /// Kinds paired with their resource, for callers that list live objects
    pub fn listable(&self) -> Vec<(GroupVersionKind, GroupVersionResource, bool)> {
        self.kinds
            .iter()
            .filter_map(|gvk| {
                let gvr = self.kind_to_resource.get(gvk)?;
                let namespaced = self.namespaced.get(gvk).copied().unwrap_or(true);
                Some((gvk.clone(), gvr.clone(), namespaced))
            })
            .collect()
    }

    fn has_kind_in(&self, gv: &GroupVersion) -> bool {
        self.kinds
            .iter()
            .any(|gvk| gvk.group == gv.group && gvk.version == gv.version)
    }

    /// Insert without producing events (used while building a candidate)
    fn merge(&mut self, gvk: GroupVersionKind, mapping: Option<(GroupVersionResource, bool)>) {
        self.group_versions.insert(gvk.group_version());
        if let Some((gvr, namespaced)) = mapping {
            self.namespaced.insert(gvk.clone(), namespaced);
            self.resources.insert(gvr.clone());
            self.resource_to_kind.insert(gvr.clone(), gvk.clone());
            self.kind_to_resource.insert(gvk.clone(), gvr);
        }
        self.kinds.insert(gvk);
    }

    /// Events that turn `self` into `next`, deletions first
    fn diff(&self, next: &DiscoverySnapshot) -> Vec<DiscoveryEvent> {
        let mut events = Vec::new();

        events.extend(
            self.kinds
                .difference(&next.kinds)
                .cloned()
                .map(DiscoveryEvent::KindDeleted),
        );
        events.extend(
            self.resources
                .difference(&next.resources)
                .cloned()
                .map(DiscoveryEvent::ResourceDeleted),
        );
        events.extend(
            self.group_versions
                .difference(&next.group_versions)
                .cloned()
                .map(DiscoveryEvent::GroupVersionDeleted),
        );

        events.extend(
            next.kinds
                .difference(&self.kinds)
                .cloned()
                .map(DiscoveryEvent::KindAdded),
        );
        events.extend(
            next.resources
                .difference(&self.resources)
                .cloned()
                .map(DiscoveryEvent::ResourceAdded),
        );
        events.extend(
            next.group_versions
                .difference(&self.group_versions)
                .cloned()
                .map(DiscoveryEvent::GroupVersionAdded),
        );

        events
    }
}

/// Periodically refreshed, event-emitting discovery cache
pub struct DiscoveryCache {
    client: Arc<dyn DiscoveryClient>,
    mapper: Arc<dyn RestMapper>,
    /// Serializes membership and structural changes
    structure: AsyncMutex<()>,
    snapshot: RwLock<Arc<DiscoverySnapshot>>,
    observers: ObserverRegistry,
    backoff: MappingBackoff,
}

impl DiscoveryCache {
    pub fn new(client: Arc<dyn DiscoveryClient>, mapper: Arc<dyn RestMapper>) -> Self {
        Self {
            client,
            mapper,
            structure: AsyncMutex::new(()),
            snapshot: RwLock::new(Arc::new(DiscoverySnapshot::default())),
            observers: ObserverRegistry::new(),
            backoff: MappingBackoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: MappingBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Register an observer; it sees every event emitted after this call
    pub fn subscribe(&self, observer: Arc<dyn DiscoveryObserver>) {
        self.observers.register(observer);
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<DiscoverySnapshot> {
        let guard = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn kinds(&self) -> BTreeSet<GroupVersionKind> {
        self.snapshot().kinds.clone()
    }

    pub fn resources(&self) -> BTreeSet<GroupVersionResource> {
        self.snapshot().resources.clone()
    }

    pub fn group_versions(&self) -> BTreeSet<GroupVersion> {
        self.snapshot().group_versions.clone()
    }

    /// Add kinds along with their resource and group version
    ///
    /// Already cached kinds are skipped. A kind whose resource cannot be
    /// resolved is still cached, without a resource.
    pub async fn add(&self, gvks: &[GroupVersionKind]) {
        let _guard = self.structure.lock().await;
        let mut next = (*self.snapshot()).clone();
        let mut events = Vec::new();

        for gvk in gvks {
            if gvk.kind.is_empty() {
                debug!(gvk = %gvk, "skipping group version without kind");
                continue;
            }
            if next.kinds.contains(gvk) {
                debug!(gvk = %gvk, "gvk already in cache, skipping");
                continue;
            }

            next.kinds.insert(gvk.clone());
            events.push(DiscoveryEvent::KindAdded(gvk.clone()));

            match self.resolve_with_backoff(gvk).await {
                Ok(mapping) => {
                    next.namespaced.insert(gvk.clone(), mapping.namespaced);
                    next.kind_to_resource.insert(gvk.clone(), mapping.gvr.clone());
                    next.resource_to_kind.insert(mapping.gvr.clone(), gvk.clone());
                    if next.resources.insert(mapping.gvr.clone()) {
                        events.push(DiscoveryEvent::ResourceAdded(mapping.gvr));
                    }
                }
                Err(e) => warn!(gvk = %gvk, error = %e, "unable to map gvk to gvr"),
            }

            let gv = gvk.group_version();
            if next.group_versions.insert(gv.clone()) {
                events.push(DiscoveryEvent::GroupVersionAdded(gv));
            }
        }

        self.commit(next, &events);
    }

    /// Remove kinds, their resource and (when unshared) their group version
    pub async fn delete(&self, gvks: &[GroupVersionKind]) {
        let _guard = self.structure.lock().await;
        let mut next = (*self.snapshot()).clone();
        let mut events = Vec::new();

        for gvk in gvks {
            if next.kinds.remove(gvk) {
                events.push(DiscoveryEvent::KindDeleted(gvk.clone()));
                debug!(gvk = %gvk, "deleted gvk from cache");
            }
            next.namespaced.remove(gvk);

            let gv = gvk.group_version();
            if !next.has_kind_in(&gv) && next.group_versions.remove(&gv) {
                events.push(DiscoveryEvent::GroupVersionDeleted(gv));
            }

            let gvr = match next.kind_to_resource.remove(gvk) {
                Some(gvr) => gvr,
                None => match self.mapper.rest_mapping(gvk).await {
                    Ok(mapping) => mapping.gvr,
                    Err(e) => {
                        warn!(gvk = %gvk, error = %e, "unable to map gvk to gvr, skipping resource removal");
                        continue;
                    }
                },
            };

            next.resource_to_kind.remove(&gvr);
            if next.resources.remove(&gvr) {
                events.push(DiscoveryEvent::ResourceDeleted(gvr));
            }
        }

        self.commit(next, &events);
    }

    /// Rebuild the snapshot from the server
    ///
    /// If the query fails outright the current snapshot is kept. If only some
    /// group versions fail, the rest is swapped in (entries of the failed
    /// group versions are carried over) and the partial failure is returned.
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.structure.lock().await;
        let started = Instant::now();
        debug!("started discovery cache refresh");

        self.mapper.reset();
        let server = self.client.server_resources().await?;
        let current = self.snapshot();

        let candidate = Mutex::new(DiscoverySnapshot::default());
        let resolutions = server
            .lists
            .iter()
            .flat_map(|list| {
                list.resources
                    .iter()
                    .map(move |resource| (&list.group_version, resource))
            })
            .filter(|(_, resource)| {
                if resource.verbs.is_empty() {
                    debug!(resource = %resource.name, "skipping resource without verbs");
                    return false;
                }
                !resource.is_subresource()
            })
            .map(|(gv, resource)| {
                let candidate = &candidate;
                async move {
                    let gvk = gv.with_kind(&resource.kind);
                    let mapping = match self.mapper.rest_mapping(&gvk).await {
                        Ok(RestMapping {
                            gvr, namespaced, ..
                        }) => (gvr, namespaced),
                        Err(e) => {
                            debug!(gvk = %gvk, error = %e, "falling back to discovered resource name");
                            (gv.with_resource(&resource.name), resource.namespaced)
                        }
                    };
                    let mut candidate = candidate.lock().unwrap_or_else(|e| e.into_inner());
                    candidate.merge(gvk, Some(mapping));
                }
            });
        join_all(resolutions).await;

        let mut next = candidate.into_inner().unwrap_or_else(|e| e.into_inner());

        for gv in server.failed.keys() {
            for gvk in current.kinds.iter().filter(|k| k.group_version() == *gv) {
                let mapping = current.kind_to_resource.get(gvk).map(|gvr| {
                    let namespaced = current.namespaced.get(gvk).copied().unwrap_or(true);
                    (gvr.clone(), namespaced)
                });
                next.merge(gvk.clone(), mapping);
            }
        }

        next.server_version = match self.client.server_version().await {
            Ok(version) => Some(version),
            Err(e) => {
                warn!(error = %e, "unable to get server version");
                current.server_version.clone()
            }
        };

        let events = current.diff(&next);
        self.commit(next, &events);

        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            changes = events.len(),
            "finished discovery cache refresh"
        );

        if server.failed.is_empty() {
            Ok(())
        } else {
            let failed = server
                .failed
                .iter()
                .map(|(gv, message)| format!("{}: {}", gv, message))
                .collect::<Vec<_>>()
                .join(", ");
            Err(DiscoveryError::PartialDiscovery { failed })
        }
    }

    /// Resolve the kind for a resource
    ///
    /// Served from the snapshot when possible, otherwise from the REST
    /// mapper. Mapper answers are not written back; use `add` for that.
    pub async fn kind_for(&self, gvr: &GroupVersionResource) -> Result<GroupVersionKind> {
        if let Some(gvk) = self.snapshot().kind_for(gvr) {
            return Ok(gvk.clone());
        }
        self.mapper.kind_for(gvr).await
    }

    pub async fn rest_mapping(&self, gvk: &GroupVersionKind) -> Result<RestMapping> {
        self.mapper.rest_mapping(gvk).await
    }

    /// Reset the REST mapper when any of the given kinds is not yet cached
    pub fn maybe_reset_rest_mapper(&self, gvks: &[GroupVersionKind]) {
        let snapshot = self.snapshot();
        if let Some(gvk) = gvks.iter().find(|gvk| !snapshot.has_kind(gvk)) {
            info!(gvk = %gvk, "resetting REST mapper");
            self.mapper.reset();
        }
    }

    /// Server version, fetched on first use and refreshed by `refresh`
    pub async fn server_version(&self) -> Result<ServerVersion> {
        if let Some(version) = self.snapshot().server_version() {
            return Ok(version.clone());
        }

        let _guard = self.structure.lock().await;
        let mut next = (*self.snapshot()).clone();
        if let Some(version) = next.server_version() {
            return Ok(version.clone());
        }

        let version = self.client.server_version().await?;
        debug!(version = %version, "updated server version");
        next.server_version = Some(version.clone());
        self.commit(next, &[]);
        Ok(version)
    }

    async fn resolve_with_backoff(&self, gvk: &GroupVersionKind) -> Result<RestMapping> {
        let steps = self.backoff.steps.max(1);
        let mut delay = self.backoff.initial;
        let mut attempt = 1;

        loop {
            match self.mapper.rest_mapping(gvk).await {
                Ok(mapping) => return Ok(mapping),
                Err(e) if attempt >= steps => return Err(e),
                Err(e) => {
                    debug!(gvk = %gvk, attempt, error = %e, "retrying to get REST mapping");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.backoff.cap);
                    attempt += 1;
                }
            }
        }
    }

    /// Swap in a new snapshot, then deliver its events
    fn commit(&self, next: DiscoverySnapshot, events: &[DiscoveryEvent]) {
        {
            let mut slot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
            *slot = Arc::new(next);
        }
        self.observers.notify(events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiResourceInfo, ApiResourceList};
    use crate::mock::MockDiscoveryClient;

    fn gvk(group: &str, version: &str, kind: &str) -> GroupVersionKind {
        GroupVersionKind::new(group, version, kind)
    }

    fn core_and_apps() -> Vec<ApiResourceList> {
        vec![
            ApiResourceList {
                group_version: GroupVersion::new("", "v1"),
                resources: vec![
                    ApiResourceInfo::new("configmaps", "ConfigMap", true),
                    ApiResourceInfo::new("namespaces", "Namespace", false),
                    ApiResourceInfo::new("pods/log", "Pod", true),
                    ApiResourceInfo::new("bindings", "Binding", true).with_verbs(&[]),
                ],
            },
            ApiResourceList {
                group_version: GroupVersion::new("apps", "v1"),
                resources: vec![
                    ApiResourceInfo::new("deployments", "Deployment", true),
                    ApiResourceInfo::new("statefulsets", "StatefulSet", true),
                ],
            },
        ]
    }

    fn cache_with(mock: &MockDiscoveryClient) -> DiscoveryCache {
        DiscoveryCache::new(Arc::new(mock.clone()), Arc::new(mock.clone())).with_backoff(
            MappingBackoff {
                initial: Duration::ZERO,
                steps: 3,
                cap: Duration::ZERO,
            },
        )
    }

    fn recorder(cache: &DiscoveryCache) -> Arc<Mutex<Vec<DiscoveryEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        cache.subscribe(Arc::new(move |e: &DiscoveryEvent| {
            sink.lock().unwrap().push(e.clone());
        }));
        events
    }

    fn assert_invariants(snapshot: &DiscoverySnapshot) {
        for gv in snapshot.group_versions() {
            assert!(snapshot.has_kind_in(gv), "group version {} has no kind", gv);
        }
        for kind in snapshot.kinds() {
            assert!(snapshot.group_versions().contains(&kind.group_version()));
        }
        for (gvr, gvk) in &snapshot.resource_to_kind {
            assert_eq!(snapshot.kind_to_resource.get(gvk), Some(gvr));
        }
    }

    #[tokio::test]
    async fn test_add_then_delete_round_trip() {
        let mock = MockDiscoveryClient::with_resources(core_and_apps());
        let cache = cache_with(&mock);
        let kinds = vec![
            gvk("apps", "v1", "Deployment"),
            gvk("apps", "v1", "StatefulSet"),
            gvk("", "v1", "ConfigMap"),
        ];

        cache.add(&kinds).await;
        let snapshot = cache.snapshot();
        assert_eq!(snapshot.kinds().len(), 3);
        assert_eq!(snapshot.resources().len(), 3);
        assert_eq!(snapshot.group_versions().len(), 2);
        assert_invariants(&snapshot);

        cache.delete(&kinds).await;
        assert!(cache.snapshot().is_empty());
        assert_invariants(&cache.snapshot());
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let mock = MockDiscoveryClient::with_resources(core_and_apps());
        let cache = cache_with(&mock);
        let events = recorder(&cache);

        cache.add(&[gvk("apps", "v1", "Deployment")]).await;
        cache.add(&[gvk("apps", "v1", "Deployment")]).await;

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                DiscoveryEvent::KindAdded(gvk("apps", "v1", "Deployment")),
                DiscoveryEvent::ResourceAdded(GroupVersionResource::new("apps", "v1", "deployments")),
                DiscoveryEvent::GroupVersionAdded(GroupVersion::new("apps", "v1")),
            ]
        );
    }

    #[tokio::test]
    async fn test_group_version_removed_with_last_kind() {
        let mock = MockDiscoveryClient::with_resources(core_and_apps());
        let cache = cache_with(&mock);
        cache
            .add(&[gvk("apps", "v1", "Deployment"), gvk("apps", "v1", "StatefulSet")])
            .await;

        cache.delete(&[gvk("apps", "v1", "Deployment")]).await;
        assert!(cache.group_versions().contains(&GroupVersion::new("apps", "v1")));
        assert_invariants(&cache.snapshot());

        cache.delete(&[gvk("apps", "v1", "StatefulSet")]).await;
        assert!(cache.group_versions().is_empty());
        assert_invariants(&cache.snapshot());
    }

    #[tokio::test]
    async fn test_add_retries_mapping() {
        let mock = MockDiscoveryClient::with_resources(core_and_apps());
        mock.fail_mapping(gvk("apps", "v1", "Deployment"), 2);
        let cache = cache_with(&mock);

        cache.add(&[gvk("apps", "v1", "Deployment")]).await;

        assert!(cache
            .resources()
            .contains(&GroupVersionResource::new("apps", "v1", "deployments")));
        assert_eq!(mock.call_counts().rest_mappings, 3);
    }

    #[tokio::test]
    async fn test_unresolvable_kind_is_cached_without_resource() {
        let mock = MockDiscoveryClient::with_resources(core_and_apps());
        let crd = gvk("example.com", "v1", "Widget");
        let cache = cache_with(&mock);

        cache.add(std::slice::from_ref(&crd)).await;
        let snapshot = cache.snapshot();
        assert!(snapshot.has_kind(&crd));
        assert!(snapshot.resources().is_empty());
        assert_invariants(&snapshot);

        // Resource removal is best effort
        cache.delete(std::slice::from_ref(&crd)).await;
        assert!(cache.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_populates_and_filters() {
        let mock = MockDiscoveryClient::with_resources(core_and_apps());
        mock.set_server_version(ServerVersion {
            major: "1".into(),
            minor: "31".into(),
            git_version: "v1.31.0".into(),
            platform: "linux/amd64".into(),
        });
        let cache = cache_with(&mock);

        cache.refresh().await.unwrap();

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.kinds().len(), 4);
        assert!(!snapshot.has_kind(&gvk("", "v1", "Binding")));
        assert!(!snapshot.has_kind(&gvk("", "v1", "Pod")));
        assert_eq!(snapshot.is_namespaced(&gvk("", "v1", "Namespace")), Some(false));
        assert_eq!(snapshot.server_version().unwrap().git_version, "v1.31.0");
        assert_invariants(&snapshot);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let mock = MockDiscoveryClient::with_resources(core_and_apps());
        let cache = cache_with(&mock);
        let events = recorder(&cache);

        cache.refresh().await.unwrap();
        let first = events.lock().unwrap().len();
        assert!(first > 0);

        cache.refresh().await.unwrap();
        assert_eq!(events.lock().unwrap().len(), first);
    }

    #[tokio::test]
    async fn test_refresh_emits_deletions() {
        let mock = MockDiscoveryClient::with_resources(core_and_apps());
        let cache = cache_with(&mock);
        cache.refresh().await.unwrap();

        let events = recorder(&cache);
        mock.set_resources(vec![core_and_apps().remove(0)]);
        cache.refresh().await.unwrap();

        let events = events.lock().unwrap();
        assert!(events.contains(&DiscoveryEvent::KindDeleted(gvk("apps", "v1", "Deployment"))));
        assert!(events.contains(&DiscoveryEvent::GroupVersionDeleted(GroupVersion::new("apps", "v1"))));
        assert!(events.iter().all(DiscoveryEvent::is_deletion));
        assert_invariants(&cache.snapshot());
    }

    #[tokio::test]
    async fn test_refresh_total_failure_keeps_snapshot() {
        let mock = MockDiscoveryClient::with_resources(core_and_apps());
        let cache = cache_with(&mock);
        cache.refresh().await.unwrap();
        let before = cache.kinds();

        mock.set_query_failure(true);
        let result = cache.refresh().await;

        assert!(matches!(result, Err(DiscoveryError::Query { .. })));
        assert_eq!(cache.kinds(), before);
    }

    #[tokio::test]
    async fn test_refresh_partial_failure_is_surfaced() {
        let mock = MockDiscoveryClient::with_resources(core_and_apps());
        let cache = cache_with(&mock);
        cache.refresh().await.unwrap();

        mock.set_failed_group_version(GroupVersion::new("apps", "v1"), "service unavailable");
        let result = cache.refresh().await;

        assert!(result.as_ref().is_err_and(DiscoveryError::is_partial));
        // Entries of the failed group version survive the swap
        assert!(cache.snapshot().has_kind(&gvk("apps", "v1", "Deployment")));
        assert!(cache.snapshot().has_kind(&gvk("", "v1", "ConfigMap")));
        assert_invariants(&cache.snapshot());
    }

    #[tokio::test]
    async fn test_kind_for_does_not_cache_back() {
        let mock = MockDiscoveryClient::with_resources(core_and_apps());
        let cache = cache_with(&mock);
        let gvr = GroupVersionResource::new("apps", "v1", "deployments");

        assert_eq!(cache.kind_for(&gvr).await.unwrap(), gvk("apps", "v1", "Deployment"));
        assert_eq!(cache.kind_for(&gvr).await.unwrap(), gvk("apps", "v1", "Deployment"));
        assert_eq!(mock.call_counts().kind_fors, 2);

        cache.add(&[gvk("apps", "v1", "Deployment")]).await;
        cache.kind_for(&gvr).await.unwrap();
        assert_eq!(mock.call_counts().kind_fors, 2);
    }

    #[tokio::test]
    async fn test_server_version_is_lazy() {
        let mock = MockDiscoveryClient::with_resources(core_and_apps());
        let cache = cache_with(&mock);

        cache.server_version().await.unwrap();
        cache.server_version().await.unwrap();
        assert_eq!(mock.call_counts().server_versions, 1);
    }

    #[tokio::test]
    async fn test_maybe_reset_rest_mapper() {
        let mock = MockDiscoveryClient::with_resources(core_and_apps());
        let cache = cache_with(&mock);
        cache.add(&[gvk("apps", "v1", "Deployment")]).await;

        cache.maybe_reset_rest_mapper(&[gvk("apps", "v1", "Deployment")]);
        assert_eq!(mock.call_counts().resets, 0);

        cache.maybe_reset_rest_mapper(&[gvk("example.com", "v1", "Widget")]);
        assert_eq!(mock.call_counts().resets, 1);
    }
}
