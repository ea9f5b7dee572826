//! Ordered apply of a service's manifests
//!
//! A sync pass runs in phases:
//! 1. pre-sync hooks (`pre-install` / `pre-upgrade`) in resolved order
//! 2. plain resources wave by wave with server-side apply, pausing between
//!    waves that applied something
//! 3. post-sync hooks (`post-install` / `post-upgrade`)
//! 4. pruning of owned objects that are no longer desired
//!
//! A failure in any phase stops the later phases. Per-resource outcomes are
//! always returned; use [`sync_error`] to turn failures into an error.

use async_trait::async_trait;
use kube::Client;
use kube::api::{
    Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams, PropagationPolicy,
};
use kube::discovery::ApiResource;
use metrics::counter;
use sherpack_core::{GroupVersionKind, Manifest, ResourceKey};
use sherpack_discovery::{DiscoveryCache, DiscoverySnapshot};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::annotations::DeletePolicy;
use crate::diff::{self, ChangeType, DiffResult, LiveObjectMap};
use crate::error::{KubeError, Result};
use crate::health::{self, HealthCode};
use crate::hooks::{Hook, resolve_hooks, split_hooks};
use crate::live::{api_resource, to_manifest};
use crate::waves::{Wave, plan_waves, sync_wave};

/// Field manager name for Server-Side Apply
pub const DEFAULT_FIELD_MANAGER: &str = "sherpack-agent";

/// Policy for one sync pass
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Delete owned objects that are no longer desired
    pub prune: bool,
    pub propagation: PropagationPolicy,
    pub field_manager: String,
    /// Pause after a wave that applied something, unless it is the last
    pub wave_delay: Duration,
    /// Skip objects whose applied digest matches
    pub check_modifications: bool,
    pub hook_timeout: Duration,
    pub hook_poll_interval: Duration,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            prune: true,
            propagation: PropagationPolicy::Background,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            wave_delay: Duration::from_secs(2),
            check_modifications: true,
            hook_timeout: Duration::from_secs(300),
            hook_poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Synced,
    SyncFailed,
    Pruned,
    PruneSkipped,
}

impl ResultCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCode::Synced => "synced",
            ResultCode::SyncFailed => "sync_failed",
            ResultCode::Pruned => "pruned",
            ResultCode::PruneSkipped => "prune_skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    PreSync,
    Sync,
    PostSync,
    Prune,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncPhase::PreSync => "pre-sync",
            SyncPhase::Sync => "sync",
            SyncPhase::PostSync => "post-sync",
            SyncPhase::Prune => "prune",
        };
        f.write_str(s)
    }
}

/// Outcome for one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSyncResult {
    pub key: ResourceKey,
    pub version: String,
    pub code: ResultCode,
    pub message: String,
    pub phase: SyncPhase,
    pub wave: i32,
}

impl ResourceSyncResult {
    pub fn new(
        manifest: &Manifest,
        code: ResultCode,
        phase: SyncPhase,
        message: impl Into<String>,
    ) -> Self {
        Self {
            key: manifest.key(),
            version: manifest.gvk().version,
            code,
            message: message.into(),
            phase,
            wave: sync_wave(manifest),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.code == ResultCode::SyncFailed
    }
}

/// Summarize the failed results of a pass, if any
pub fn sync_error(results: &[ResourceSyncResult]) -> Option<KubeError> {
    let failed: Vec<&ResourceSyncResult> = results.iter().filter(|r| r.is_failed()).collect();
    let first = failed.first()?;

    if matches!(first.phase, SyncPhase::PreSync | SyncPhase::PostSync) {
        return Some(KubeError::HookFailed {
            hook: first.key.to_string(),
            phase: first.phase.to_string(),
            message: first.message.clone(),
        });
    }

    let message = failed
        .iter()
        .take(3)
        .map(|r| format!("{}: {}", r.key, r.message))
        .collect::<Vec<_>>()
        .join("; ");
    Some(KubeError::Apply {
        failed: failed.len(),
        message,
    })
}

/// Diff/apply/prune primitive
#[async_trait]
pub trait ClusterApplier: Send + Sync {
    /// Reconcile `desired` against the live objects of a service
    async fn sync(
        &self,
        service_id: &str,
        desired: Vec<Manifest>,
        live: &LiveObjectMap,
        options: &ApplyOptions,
    ) -> Result<Vec<ResourceSyncResult>>;

    /// Create a single object; fails with an already-exists error if present
    async fn create(&self, manifest: &Manifest) -> Result<()>;
}

/// Work for one sync pass
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub diff: DiffResult,
    pub pre_hooks: Vec<Hook>,
    pub waves: Vec<Wave>,
    pub post_hooks: Vec<Hook>,
    /// Highest wave first
    pub prune: Vec<Manifest>,
    pub unchanged: HashSet<ResourceKey>,
}

impl SyncPlan {
    /// Whether any plain resource is created, updated or pruned
    ///
    /// Hooks only run when this holds, so a steady-state pass does not
    /// re-run them.
    pub fn has_work(&self) -> bool {
        let hook_keys: HashSet<ResourceKey> = self
            .pre_hooks
            .iter()
            .chain(&self.post_hooks)
            .map(|h| h.manifest.key())
            .collect();
        self.diff
            .changes
            .iter()
            .any(|c| c.change != ChangeType::Unchanged && !hook_keys.contains(&c.key))
    }
}

/// Build the plan for a pass
pub fn plan_sync(
    service_id: &str,
    desired: Vec<Manifest>,
    live: &LiveObjectMap,
    options: &ApplyOptions,
) -> SyncPlan {
    let diff = diff::diff(service_id, &desired, live, options.check_modifications);
    let unchanged = diff.keys_with(ChangeType::Unchanged);
    let prune_keys = diff.keys_with(ChangeType::Prune);

    let mut prune: Vec<Manifest> = live
        .iter()
        .filter(|(key, _)| prune_keys.contains(*key))
        .map(|(_, obj)| obj.clone())
        .collect();
    prune.sort_by_key(|m| Reverse(sync_wave(m)));

    let (plain, hook_manifests) = split_hooks(desired);
    let hooks = resolve_hooks(&hook_manifests);
    let pre_hooks = hooks
        .iter()
        .filter(|h| h.types.iter().any(|t| t.is_pre_sync()))
        .cloned()
        .collect();
    let post_hooks = hooks
        .iter()
        .filter(|h| h.types.iter().any(|t| t.is_post_sync()))
        .cloned()
        .collect();

    SyncPlan {
        diff,
        pre_hooks,
        waves: plan_waves(plain),
        post_hooks,
        prune,
        unchanged,
    }
}

/// Whether a finished hook is deleted by its policies
pub fn delete_after_run(hook: &Hook, succeeded: bool) -> bool {
    if succeeded {
        hook.has_policy(DeletePolicy::HookSucceeded)
    } else {
        hook.has_policy(DeletePolicy::HookFailed)
    }
}

/// Per-object calls a sync pass is built from
#[async_trait]
pub trait ObjectOps: Send + Sync {
    /// Server-side apply, taking ownership of conflicting fields
    async fn apply(&self, manifest: &Manifest, field_manager: &str) -> Result<()>;

    /// Delete an object; `false` when it was already gone
    async fn delete(&self, manifest: &Manifest, propagation: PropagationPolicy) -> Result<bool>;

    async fn get(&self, manifest: &Manifest) -> Result<Option<Manifest>>;
}

async fn wait_deleted<O: ObjectOps + ?Sized>(
    ops: &O,
    manifest: &Manifest,
    options: &ApplyOptions,
) -> Result<()> {
    let deadline = Instant::now() + options.hook_timeout;
    while ops.get(manifest).await?.is_some() {
        if Instant::now() >= deadline {
            return Err(KubeError::HookFailed {
                hook: manifest.to_string(),
                phase: "before-hook-creation".to_string(),
                message: "timed out waiting for previous hook to be deleted".to_string(),
            });
        }
        tokio::time::sleep(options.hook_poll_interval).await;
    }
    Ok(())
}

/// Poll a hook until its health settles
async fn await_hook<O: ObjectOps + ?Sized>(
    ops: &O,
    hook: &Hook,
    options: &ApplyOptions,
) -> std::result::Result<(), String> {
    let deadline = Instant::now() + options.hook_timeout;
    loop {
        match ops.get(&hook.manifest).await {
            Ok(Some(live)) => {
                let status = health::assess(&live);
                match status.code {
                    HealthCode::Healthy => return Ok(()),
                    HealthCode::Degraded => {
                        return Err(status.message.unwrap_or_else(|| "hook failed".to_string()));
                    }
                    _ => {}
                }
            }
            Ok(None) => {
                debug!(hook = %hook.name(), "hook removed itself after completion");
                return Ok(());
            }
            Err(e) => return Err(e.to_string()),
        }

        if Instant::now() >= deadline {
            return Err(format!("timed out after {}s", options.hook_timeout.as_secs()));
        }
        tokio::time::sleep(options.hook_poll_interval).await;
    }
}

/// Run hooks in order; returns false after the first failure
async fn run_hooks<O: ObjectOps + ?Sized>(
    ops: &O,
    hooks: &[Hook],
    phase: SyncPhase,
    options: &ApplyOptions,
    results: &mut Vec<ResourceSyncResult>,
) -> bool {
    for hook in hooks {
        let manifest = &hook.manifest;
        info!(hook = %hook.name(), phase = %phase, weight = hook.weight, "running hook");

        if hook.has_policy(DeletePolicy::BeforeHookCreation) {
            let cleared = match ops.delete(manifest, PropagationPolicy::Background).await {
                Ok(true) => wait_deleted(ops, manifest, options).await,
                Ok(false) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = cleared {
                results.push(ResourceSyncResult::new(
                    manifest,
                    ResultCode::SyncFailed,
                    phase,
                    e.to_string(),
                ));
                return false;
            }
        }

        let outcome = match ops.apply(manifest, &options.field_manager).await {
            Ok(()) => await_hook(ops, hook, options).await,
            Err(e) => Err(e.to_string()),
        };

        if delete_after_run(hook, outcome.is_ok()) {
            if let Err(e) = ops.delete(manifest, PropagationPolicy::Background).await {
                warn!(hook = %hook.name(), error = %e, "failed to delete finished hook");
            }
        }

        match outcome {
            Ok(()) => results.push(ResourceSyncResult::new(
                manifest,
                ResultCode::Synced,
                phase,
                "hook succeeded",
            )),
            Err(message) => {
                warn!(hook = %hook.name(), error = %message, "hook failed");
                results.push(ResourceSyncResult::new(
                    manifest,
                    ResultCode::SyncFailed,
                    phase,
                    message,
                ));
                return false;
            }
        }
    }
    true
}

/// Apply waves in order; returns false after a wave with a failure
async fn run_waves<O: ObjectOps + ?Sized>(
    ops: &O,
    plan: &SyncPlan,
    options: &ApplyOptions,
    results: &mut Vec<ResourceSyncResult>,
) -> bool {
    let total = plan.waves.len();
    for (index, wave) in plan.waves.iter().enumerate() {
        let mut applied = 0usize;
        let mut failed = false;

        for manifest in &wave.resources {
            if plan.unchanged.contains(&manifest.key()) {
                results.push(ResourceSyncResult::new(
                    manifest,
                    ResultCode::Synced,
                    SyncPhase::Sync,
                    "unchanged",
                ));
                continue;
            }

            match ops.apply(manifest, &options.field_manager).await {
                Ok(()) => {
                    applied += 1;
                    results.push(ResourceSyncResult::new(
                        manifest,
                        ResultCode::Synced,
                        SyncPhase::Sync,
                        "applied",
                    ));
                }
                Err(e) => {
                    warn!(resource = %manifest, wave = wave.number, error = %e, "failed to apply resource");
                    failed = true;
                    results.push(ResourceSyncResult::new(
                        manifest,
                        ResultCode::SyncFailed,
                        SyncPhase::Sync,
                        e.to_string(),
                    ));
                }
            }
        }

        if failed {
            return false;
        }

        debug!(wave = wave.number, applied, "finished wave");
        if applied > 0 && index + 1 < total {
            tokio::time::sleep(options.wave_delay).await;
        }
    }
    true
}

async fn run_prune<O: ObjectOps + ?Sized>(
    ops: &O,
    plan: &SyncPlan,
    options: &ApplyOptions,
    results: &mut Vec<ResourceSyncResult>,
) {
    for manifest in &plan.prune {
        let result = match ops.delete(manifest, options.propagation.clone()).await {
            Ok(_) => ResourceSyncResult::new(manifest, ResultCode::Pruned, SyncPhase::Prune, "pruned"),
            Err(e) => {
                warn!(resource = %manifest, error = %e, "failed to prune resource");
                ResourceSyncResult::new(
                    manifest,
                    ResultCode::SyncFailed,
                    SyncPhase::Prune,
                    e.to_string(),
                )
            }
        };
        results.push(result);
    }
}

/// Mark the remaining prune candidates as skipped
fn skip_prune(plan: &SyncPlan, reason: &str, results: &mut Vec<ResourceSyncResult>) {
    results.extend(plan.prune.iter().map(|m| {
        ResourceSyncResult::new(m, ResultCode::PruneSkipped, SyncPhase::Prune, reason)
    }));
}

fn record_results(results: &[ResourceSyncResult]) {
    for result in results {
        counter!("sync_resources_total", 1u64, "result" => result.code.as_str());
    }
}

/// Run a plan: pre-sync hooks, waves, post-sync hooks, then prune
///
/// Hooks only run when the plan has work. A failed phase stops the later
/// ones and marks every prune candidate as skipped.
pub async fn execute<O: ObjectOps + ?Sized>(
    ops: &O,
    plan: &SyncPlan,
    options: &ApplyOptions,
) -> Vec<ResourceSyncResult> {
    let mut results = Vec::new();
    let with_hooks = plan.has_work();

    if with_hooks && !run_hooks(ops, &plan.pre_hooks, SyncPhase::PreSync, options, &mut results).await {
        skip_prune(plan, "pre-sync hook failed", &mut results);
    } else if !run_waves(ops, plan, options, &mut results).await {
        skip_prune(plan, "sync failed", &mut results);
    } else if with_hooks
        && !run_hooks(ops, &plan.post_hooks, SyncPhase::PostSync, options, &mut results).await
    {
        skip_prune(plan, "post-sync hook failed", &mut results);
    } else if options.prune {
        run_prune(ops, plan, options, &mut results).await;
    } else {
        skip_prune(plan, "pruning disabled", &mut results);
    }

    record_results(&results);
    results
}

/// Applies through the API server
pub struct KubeApplier {
    client: Client,
    discovery: Arc<DiscoveryCache>,
}

impl KubeApplier {
    pub fn new(client: Client, discovery: Arc<DiscoveryCache>) -> Self {
        Self { client, discovery }
    }

    /// Resolve a kind, registering it with discovery when it is new
    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
        let lookup = |snapshot: &DiscoverySnapshot| {
            snapshot.resource_for(gvk).map(|gvr| {
                let namespaced = snapshot.is_namespaced(gvk).unwrap_or(true);
                (api_resource(gvk, gvr), namespaced)
            })
        };

        if let Some(found) = lookup(&self.discovery.snapshot()) {
            return Ok(found);
        }

        // Kinds registered by an earlier wave (CRDs) are not cached yet
        let gvks = std::slice::from_ref(gvk);
        self.discovery.maybe_reset_rest_mapper(gvks);
        self.discovery.add(gvks).await;

        lookup(&self.discovery.snapshot()).ok_or_else(|| KubeError::UnknownResource {
            gvk: gvk.to_string(),
        })
    }

    async fn api_for(&self, manifest: &Manifest) -> Result<Api<DynamicObject>> {
        let (ar, namespaced) = self.resolve(&manifest.gvk()).await?;
        Ok(if namespaced {
            let ns = manifest.namespace().unwrap_or("default");
            Api::namespaced_with(self.client.clone(), ns, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        })
    }
}

#[async_trait]
impl ObjectOps for KubeApplier {
    async fn apply(&self, manifest: &Manifest, field_manager: &str) -> Result<()> {
        let api = self.api_for(manifest).await?;

        let mut params = PatchParams::apply(field_manager);
        params.force = true;

        api.patch(manifest.name(), &params, &Patch::Apply(manifest.as_value()))
            .await?;
        Ok(())
    }

    async fn delete(&self, manifest: &Manifest, propagation: PropagationPolicy) -> Result<bool> {
        let api = self.api_for(manifest).await?;
        let params = DeleteParams {
            propagation_policy: Some(propagation),
            ..Default::default()
        };

        match api.delete(manifest.name(), &params).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(KubeError::Api(e)),
        }
    }

    async fn get(&self, manifest: &Manifest) -> Result<Option<Manifest>> {
        let api = self.api_for(manifest).await?;
        match api.get_opt(manifest.name()).await? {
            Some(obj) => Ok(Some(to_manifest(obj, &manifest.gvk())?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ClusterApplier for KubeApplier {
    async fn sync(
        &self,
        service_id: &str,
        desired: Vec<Manifest>,
        live: &LiveObjectMap,
        options: &ApplyOptions,
    ) -> Result<Vec<ResourceSyncResult>> {
        let plan = plan_sync(service_id, desired, live, options);
        info!(service_id = %service_id, plan = %plan.diff.summary(), "syncing");
        Ok(execute(self, &plan, options).await)
    }

    async fn create(&self, manifest: &Manifest) -> Result<()> {
        let api = self.api_for(manifest).await?;
        let obj: DynamicObject = serde_json::from_value(manifest.as_value().clone())?;
        api.create(&PostParams::default(), &obj).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ownership::stamp;
    use serde_json::json;
    use std::sync::Mutex;

    fn manifest(kind: &str, name: &str, annotations: serde_json::Value) -> Manifest {
        Manifest::from_value(json!({
            "apiVersion": "v1",
            "kind": kind,
            "metadata": {"name": name, "namespace": "apps", "annotations": annotations}
        }))
        .unwrap()
    }

    fn stamped(manifests: Vec<Manifest>) -> Vec<Manifest> {
        let mut manifests = manifests;
        stamp(&mut manifests, "svc-1");
        manifests
    }

    #[test]
    fn test_plan_separates_hooks_waves_and_prune() {
        let live: LiveObjectMap = stamped(vec![
            manifest("ConfigMap", "old", json!({})),
            manifest("Namespace", "old-ns", json!({})),
        ])
        .into_iter()
        .map(|m| (m.key(), m))
        .collect();

        let desired = stamped(vec![
            manifest("Service", "web", json!({})),
            manifest("ConfigMap", "cfg", json!({})),
            manifest("Job", "migrate", json!({"helm.sh/hook": "pre-install,pre-upgrade"})),
            manifest("Job", "smoke", json!({"helm.sh/hook": "post-install"})),
            manifest("CustomResourceDefinition", "crd", json!({"helm.sh/hook": "crd-install"})),
        ]);

        let plan = plan_sync("svc-1", desired, &live, &ApplyOptions::default());

        assert_eq!(plan.pre_hooks.len(), 1);
        assert_eq!(plan.pre_hooks[0].manifest.name(), "migrate");
        assert_eq!(plan.post_hooks.len(), 1);

        let waves: Vec<(i32, Vec<&str>)> = plan
            .waves
            .iter()
            .map(|w| (w.number, w.resources.iter().map(|m| m.name()).collect()))
            .collect();
        assert_eq!(
            waves,
            vec![(0, vec!["crd"]), (1, vec!["cfg"]), (3, vec!["web"])]
        );

        let prune: Vec<_> = plan.prune.iter().map(|m| m.name()).collect();
        assert_eq!(prune, vec!["old", "old-ns"]);
        assert!(plan.has_work());
    }

    #[test]
    fn test_steady_state_has_no_work() {
        let desired = stamped(vec![
            manifest("ConfigMap", "cfg", json!({})),
            manifest("Job", "migrate", json!({"helm.sh/hook": "pre-install", "helm.sh/hook-delete-policy": "hook-succeeded"})),
        ]);
        let live: LiveObjectMap = desired
            .iter()
            .filter(|m| m.kind() == "ConfigMap")
            .map(|m| (m.key(), m.clone()))
            .collect();

        let plan = plan_sync("svc-1", desired, &live, &ApplyOptions::default());
        assert!(plan.unchanged.contains(&ResourceKey::new("", "ConfigMap", "apps", "cfg")));
        assert!(!plan.has_work());
    }

    #[test]
    fn test_delete_after_run() {
        let hook = |policy: &str| {
            Hook::from_manifest(&manifest(
                "Job",
                "h",
                json!({"helm.sh/hook": "pre-install", "helm.sh/hook-delete-policy": policy}),
            ))
            .unwrap()
        };

        assert!(delete_after_run(&hook("hook-succeeded"), true));
        assert!(!delete_after_run(&hook("hook-succeeded"), false));
        assert!(delete_after_run(&hook("hook-failed"), false));
        assert!(!delete_after_run(&hook("before-hook-creation"), true));
    }

    #[test]
    fn test_sync_error_summaries() {
        let cm = manifest("ConfigMap", "cfg", json!({}));
        let ok = ResourceSyncResult::new(&cm, ResultCode::Synced, SyncPhase::Sync, "applied");
        assert!(sync_error(std::slice::from_ref(&ok)).is_none());

        let failed = ResourceSyncResult::new(&cm, ResultCode::SyncFailed, SyncPhase::Sync, "denied");
        let err = sync_error(&[ok.clone(), failed]).unwrap();
        assert!(matches!(err, KubeError::Apply { failed: 1, .. }));
        assert!(err.to_string().contains("denied"));

        let job = manifest("Job", "migrate", json!({}));
        let hook = ResourceSyncResult::new(&job, ResultCode::SyncFailed, SyncPhase::PreSync, "BackoffLimitExceeded");
        assert!(matches!(sync_error(&[hook]), Some(KubeError::HookFailed { .. })));
    }

    /// Records every call with the paused clock's elapsed time
    struct RecordingOps {
        start: Instant,
        calls: Mutex<Vec<(String, Duration)>>,
        failing: HashSet<String>,
    }

    impl RecordingOps {
        fn new(failing: &[&str]) -> Self {
            Self {
                start: Instant::now(),
                calls: Mutex::new(Vec::new()),
                failing: failing.iter().map(|s| s.to_string()).collect(),
            }
        }

        fn record(&self, op: &str, manifest: &Manifest) {
            let call = format!("{} {}", op, manifest.name());
            self.calls.lock().unwrap().push((call, self.start.elapsed()));
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
        }

        fn at(&self, call: &str) -> Duration {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .find(|(c, _)| c == call)
                .map(|(_, t)| *t)
                .unwrap()
        }
    }

    #[async_trait]
    impl ObjectOps for RecordingOps {
        async fn apply(&self, manifest: &Manifest, _field_manager: &str) -> Result<()> {
            self.record("apply", manifest);
            if self.failing.contains(manifest.name()) {
                return Err(KubeError::Apply {
                    failed: 1,
                    message: "denied".to_string(),
                });
            }
            Ok(())
        }

        async fn delete(&self, manifest: &Manifest, _propagation: PropagationPolicy) -> Result<bool> {
            self.record("delete", manifest);
            Ok(true)
        }

        async fn get(&self, _manifest: &Manifest) -> Result<Option<Manifest>> {
            Ok(None)
        }
    }

    fn live_map(manifests: Vec<Manifest>) -> LiveObjectMap {
        stamped(manifests).into_iter().map(|m| (m.key(), m)).collect()
    }

    fn paced() -> ApplyOptions {
        ApplyOptions {
            wave_delay: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_runs_hooks_around_waves_then_prunes() {
        let desired = stamped(vec![
            manifest("Job", "migrate", json!({"helm.sh/hook": "pre-install", "helm.sh/hook-delete-policy": "before-hook-creation"})),
            manifest("ConfigMap", "cfg", json!({})),
            manifest("Service", "web", json!({})),
            manifest("Job", "smoke", json!({"helm.sh/hook": "post-install"})),
        ]);
        let live = live_map(vec![manifest("ConfigMap", "old", json!({}))]);
        let options = paced();
        let plan = plan_sync("svc-1", desired, &live, &options);

        let ops = RecordingOps::new(&[]);
        let started = Instant::now();
        let results = execute(&ops, &plan, &options).await;

        assert_eq!(
            ops.calls(),
            vec![
                "delete migrate",
                "apply migrate",
                "apply cfg",
                "apply web",
                "apply smoke",
                "delete old",
            ]
        );
        // one pause, between the two waves
        assert_eq!(ops.at("apply cfg"), Duration::ZERO);
        assert_eq!(ops.at("apply web"), Duration::from_secs(5));
        assert_eq!(ops.at("apply smoke"), Duration::from_secs(5));
        assert_eq!(started.elapsed(), Duration::from_secs(5));

        assert!(results.iter().all(|r| !r.is_failed()));
        let pruned = results.last().unwrap();
        assert_eq!((pruned.code, pruned.phase), (ResultCode::Pruned, SyncPhase::Prune));
        assert_eq!(results[0].phase, SyncPhase::PreSync);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_wave_skips_later_phases_and_prune() {
        let desired = stamped(vec![
            manifest("ConfigMap", "cfg", json!({})),
            manifest("Service", "web", json!({})),
            manifest("Job", "smoke", json!({"helm.sh/hook": "post-install"})),
        ]);
        let live = live_map(vec![manifest("ConfigMap", "old", json!({}))]);
        let options = paced();
        let plan = plan_sync("svc-1", desired, &live, &options);

        let ops = RecordingOps::new(&["cfg"]);
        let started = Instant::now();
        let results = execute(&ops, &plan, &options).await;

        assert_eq!(ops.calls(), vec!["apply cfg"]);
        assert_eq!(started.elapsed(), Duration::ZERO);

        let codes: Vec<(&str, ResultCode)> = results
            .iter()
            .map(|r| (r.key.name.as_str(), r.code))
            .collect();
        assert_eq!(
            codes,
            vec![("cfg", ResultCode::SyncFailed), ("old", ResultCode::PruneSkipped)]
        );
        assert_eq!(results[1].message, "sync failed");
        assert!(matches!(sync_error(&results), Some(KubeError::Apply { failed: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_wave_does_not_pause() {
        let desired = stamped(vec![
            manifest("ConfigMap", "cfg", json!({})),
            manifest("Service", "web", json!({})),
        ]);
        let live: LiveObjectMap = desired
            .iter()
            .filter(|m| m.kind() == "ConfigMap")
            .map(|m| (m.key(), m.clone()))
            .collect();
        let options = paced();
        let plan = plan_sync("svc-1", desired, &live, &options);

        let ops = RecordingOps::new(&[]);
        let started = Instant::now();
        let results = execute(&ops, &plan, &options).await;

        assert_eq!(ops.calls(), vec!["apply web"]);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(results[0].message, "unchanged");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_pre_hook_stops_before_waves() {
        let desired = stamped(vec![
            manifest("Job", "migrate", json!({"helm.sh/hook": "pre-install"})),
            manifest("ConfigMap", "cfg", json!({})),
        ]);
        let live = live_map(vec![manifest("ConfigMap", "old", json!({}))]);
        let options = paced();
        let plan = plan_sync("svc-1", desired, &live, &options);

        let ops = RecordingOps::new(&["migrate"]);
        let results = execute(&ops, &plan, &options).await;

        assert_eq!(ops.calls(), vec!["apply migrate"]);
        assert_eq!(results.last().unwrap().message, "pre-sync hook failed");
        assert!(matches!(sync_error(&results), Some(KubeError::HookFailed { .. })));
    }
}
