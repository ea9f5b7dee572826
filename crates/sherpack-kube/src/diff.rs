//! Ownership-filtered diff between desired manifests and live objects
//!
//! Only live objects tagged with the service's id take part; everything
//! else in the cluster is invisible to the diff. Modification checks
//! compare the digest stamped at apply time, so server-populated fields
//! never register as drift.

use serde_json::{Map, Value};
use sherpack_core::{Manifest, ResourceKey};
use similar::{ChangeTag, TextDiff};
use std::collections::{BTreeMap, HashSet};

use crate::ownership;

/// Live objects keyed by identity
pub type LiveObjectMap = BTreeMap<ResourceKey, Manifest>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    /// Desired but not live
    Create,
    /// Live with a different (or unknown) applied digest
    Update,
    /// Live with the same applied digest
    Unchanged,
    /// Live and owned but no longer desired
    Prune,
}

/// A single resource change
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceChange {
    pub key: ResourceKey,
    pub change: ChangeType,
    /// Line diff of the fields the manifest sets, for updates
    pub diff: Option<String>,
}

/// Result of diffing one service
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffResult {
    pub changes: Vec<ResourceChange>,
}

impl DiffResult {
    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.change != ChangeType::Unchanged)
    }

    pub fn keys_with(&self, change: ChangeType) -> HashSet<ResourceKey> {
        self.changes
            .iter()
            .filter(|c| c.change == change)
            .map(|c| c.key.clone())
            .collect()
    }

    pub fn count(&self, change: ChangeType) -> usize {
        self.changes.iter().filter(|c| c.change == change).count()
    }

    /// Human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "{} to create, {} to update, {} unchanged, {} to prune",
            self.count(ChangeType::Create),
            self.count(ChangeType::Update),
            self.count(ChangeType::Unchanged),
            self.count(ChangeType::Prune)
        )
    }
}

/// Diff desired manifests against the live objects owned by `service_id`
///
/// With `check_modifications` off every live counterpart is reported as an
/// update. Prune candidates exclude objects controlled by another object
/// and objects already being deleted.
pub fn diff(
    service_id: &str,
    desired: &[Manifest],
    live: &LiveObjectMap,
    check_modifications: bool,
) -> DiffResult {
    let owned: LiveObjectMap = live
        .iter()
        .filter(|(_, obj)| ownership::is_owned_by(obj, service_id))
        .map(|(k, obj)| (k.clone(), obj.clone()))
        .collect();

    let mut changes = Vec::with_capacity(desired.len());
    let mut seen = HashSet::new();

    for manifest in desired {
        let key = manifest.key();
        seen.insert(key.clone());

        let change = match owned.get(&key) {
            None => ResourceChange {
                key,
                change: ChangeType::Create,
                diff: None,
            },
            Some(obj) if check_modifications && same_digest(manifest, obj) => ResourceChange {
                key,
                change: ChangeType::Unchanged,
                diff: None,
            },
            Some(obj) => ResourceChange {
                key,
                change: ChangeType::Update,
                diff: Some(text_diff(&project(obj, manifest), manifest.as_value())),
            },
        };
        changes.push(change);
    }

    for (key, obj) in &owned {
        if seen.contains(key) || obj.has_owner_references() || obj.is_pending_deletion() {
            continue;
        }
        changes.push(ResourceChange {
            key: key.clone(),
            change: ChangeType::Prune,
            diff: None,
        });
    }

    DiffResult { changes }
}

fn same_digest(desired: &Manifest, live: &Manifest) -> bool {
    match (
        ownership::applied_digest(desired),
        ownership::applied_digest(live),
    ) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// The live object restricted to the top-level fields the manifest sets
///
/// Metadata is narrowed to name, namespace, labels and annotations.
fn project(live: &Manifest, desired: &Manifest) -> Value {
    let mut projected = Map::new();
    let Some(fields) = desired.as_value().as_object() else {
        return Value::Object(projected);
    };

    for key in fields.keys() {
        let Some(value) = live.as_value().get(key) else {
            continue;
        };
        if key == "metadata" {
            let metadata: Map<String, Value> = ["name", "namespace", "labels", "annotations"]
                .iter()
                .filter_map(|f| value.get(*f).map(|v| (f.to_string(), v.clone())))
                .collect();
            projected.insert(key.clone(), Value::Object(metadata));
        } else {
            projected.insert(key.clone(), value.clone());
        }
    }
    Value::Object(projected)
}

/// Changed lines between two documents, rendered as YAML
fn text_diff(old: &Value, new: &Value) -> String {
    let old = serde_yaml::to_string(old).unwrap_or_default();
    let new = serde_yaml::to_string(new).unwrap_or_default();

    let mut output = String::new();
    for change in TextDiff::from_lines(&old, &new).iter_all_changes() {
        let prefix = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => continue,
        };
        output.push_str(prefix);
        output.push_str(change.value().trim_end());
        output.push('\n');
    }
    output
}
