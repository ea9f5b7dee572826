//! Annotation parsing with Helm compatibility
//!
//! Sherpack reads both `sherpack.io/*` and `helm.sh/*` hook annotations so
//! rendered Helm charts keep their hook semantics. Ownership and sync-wave
//! annotations are Sherpack-only.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Sherpack-native annotations
pub mod sherpack {
    /// Id of the service owning a live object
    pub const SERVICE_ID: &str = "sherpack.io/service-id";
    /// Content digest of the applied manifest
    pub const DIGEST: &str = "sherpack.io/digest";
    /// Hook types annotation
    pub const HOOK: &str = "sherpack.io/hook";
    /// Hook weight for ordering
    pub const HOOK_WEIGHT: &str = "sherpack.io/hook-weight";
    /// Hook delete policy
    pub const HOOK_DELETE_POLICY: &str = "sherpack.io/hook-delete-policy";
    /// Sync wave for ordering resources
    pub const SYNC_WAVE: &str = "sherpack.io/sync-wave";
}

/// Helm-compatible annotations
pub mod helm {
    pub const HOOK: &str = "helm.sh/hook";
    pub const HOOK_WEIGHT: &str = "helm.sh/hook-weight";
    pub const HOOK_DELETE_POLICY: &str = "helm.sh/hook-delete-policy";
}

/// Get annotation value, preferring Sherpack over Helm
pub fn get_annotation<'a>(
    annotations: &'a BTreeMap<String, String>,
    sherpack_key: &str,
    helm_key: &str,
) -> Option<&'a str> {
    annotations
        .get(sherpack_key)
        .or_else(|| annotations.get(helm_key))
        .map(|s| s.as_str())
}

/// Lifecycle point a hook runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookType {
    PreInstall,
    PostInstall,
    PreUpgrade,
    PostUpgrade,
    PreDelete,
    PostDelete,
    PreRollback,
    PostRollback,
    Test,
    /// Legacy Helm 2 marker; such resources are applied as plain resources
    CrdInstall,
}

impl HookType {
    /// Runs before the main waves of a sync
    pub fn is_pre_sync(&self) -> bool {
        matches!(self, HookType::PreInstall | HookType::PreUpgrade)
    }

    /// Runs after the main waves of a sync
    pub fn is_post_sync(&self) -> bool {
        matches!(self, HookType::PostInstall | HookType::PostUpgrade)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HookType::PreInstall => "pre-install",
            HookType::PostInstall => "post-install",
            HookType::PreUpgrade => "pre-upgrade",
            HookType::PostUpgrade => "post-upgrade",
            HookType::PreDelete => "pre-delete",
            HookType::PostDelete => "post-delete",
            HookType::PreRollback => "pre-rollback",
            HookType::PostRollback => "post-rollback",
            HookType::Test => "test",
            HookType::CrdInstall => "crd-install",
        }
    }
}

impl FromStr for HookType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pre-install" => HookType::PreInstall,
            "post-install" => HookType::PostInstall,
            "pre-upgrade" => HookType::PreUpgrade,
            "post-upgrade" => HookType::PostUpgrade,
            "pre-delete" => HookType::PreDelete,
            "post-delete" => HookType::PostDelete,
            "pre-rollback" => HookType::PreRollback,
            "post-rollback" => HookType::PostRollback,
            "test" | "test-success" => HookType::Test,
            "crd-install" => HookType::CrdInstall,
            _ => return Err(()),
        })
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a hook resource is removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeletePolicy {
    /// Delete the previous copy before applying the hook again
    BeforeHookCreation,
    /// Delete once the hook finished successfully
    HookSucceeded,
    /// Delete once the hook failed
    HookFailed,
}

impl FromStr for DeletePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "before-hook-creation" => DeletePolicy::BeforeHookCreation,
            "hook-succeeded" => DeletePolicy::HookSucceeded,
            "hook-failed" => DeletePolicy::HookFailed,
            _ => return Err(()),
        })
    }
}

/// Split a comma-separated annotation value, dropping unrecognized tokens
fn parse_tokens<T: FromStr + Ord>(value: &str) -> BTreeSet<T> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

/// Parse hook types; empty when the resource is not a hook
pub fn parse_hook_types(annotations: &BTreeMap<String, String>) -> BTreeSet<HookType> {
    get_annotation(annotations, sherpack::HOOK, helm::HOOK)
        .map(parse_tokens)
        .unwrap_or_default()
}

/// Parse hook weight (default: 0)
pub fn parse_hook_weight(annotations: &BTreeMap<String, String>) -> i32 {
    get_annotation(annotations, sherpack::HOOK_WEIGHT, helm::HOOK_WEIGHT)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

/// Parse hook delete policies
pub fn parse_delete_policies(
    annotations: &BTreeMap<String, String>,
) -> BTreeSet<DeletePolicy> {
    get_annotation(annotations, sherpack::HOOK_DELETE_POLICY, helm::HOOK_DELETE_POLICY)
        .map(parse_tokens)
        .unwrap_or_default()
}

/// Parse an explicit sync wave
pub fn parse_sync_wave(annotations: &BTreeMap<String, String>) -> Option<i32> {
    annotations
        .get(sherpack::SYNC_WAVE)
        .and_then(|s| s.trim().parse().ok())
}
