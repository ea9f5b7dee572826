//! Hook resolution
//!
//! Hooks are ordinary resources carrying a hook annotation. They are pulled
//! out of the rendered set, ordered by weight (kind name breaks ties) and
//! applied around the main sync waves.

use sherpack_core::Manifest;
use std::collections::BTreeSet;

use crate::annotations::{
    DeletePolicy, HookType, parse_delete_policies, parse_hook_types, parse_hook_weight,
};

/// A resource run at a lifecycle point
#[derive(Debug, Clone, PartialEq)]
pub struct Hook {
    pub weight: i32,
    pub types: BTreeSet<HookType>,
    pub delete_policies: BTreeSet<DeletePolicy>,
    pub manifest: Manifest,
}

impl Hook {
    /// Parse hook annotations; `None` when the resource is not a hook
    pub fn from_manifest(manifest: &Manifest) -> Option<Self> {
        let annotations = manifest.annotations();
        let types = parse_hook_types(&annotations);
        if types.is_empty() {
            return None;
        }

        Some(Self {
            weight: parse_hook_weight(&annotations),
            delete_policies: parse_delete_policies(&annotations),
            types,
            manifest: manifest.clone(),
        })
    }

    pub fn has_type(&self, hook_type: HookType) -> bool {
        self.types.contains(&hook_type)
    }

    pub fn has_policy(&self, policy: DeletePolicy) -> bool {
        self.delete_policies.contains(&policy)
    }

    pub fn name(&self) -> String {
        self.manifest.to_string()
    }
}

/// Whether a resource takes part in hook processing
///
/// `crd-install` is a legacy marker; such resources sync like any other.
pub fn is_hook(manifest: &Manifest) -> bool {
    let types = parse_hook_types(&manifest.annotations());
    !types.is_empty() && !types.contains(&HookType::CrdInstall)
}

/// Partition manifests into plain resources and hook resources
pub fn split_hooks(manifests: Vec<Manifest>) -> (Vec<Manifest>, Vec<Manifest>) {
    manifests.into_iter().partition(|m| !is_hook(m))
}

/// Resolve hooks in execution order
///
/// Sorted by kind name first and then stably by weight, so weight dominates
/// and kind name only breaks ties.
pub fn resolve_hooks(manifests: &[Manifest]) -> Vec<Hook> {
    let mut hooks: Vec<Hook> = manifests.iter().filter_map(Hook::from_manifest).collect();
    hooks.sort_by(|a, b| a.manifest.kind().cmp(b.manifest.kind()));
    hooks.sort_by_key(|h| h.weight);
    hooks
}
