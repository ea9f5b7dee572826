//! Sync wave planning
//!
//! Resources are grouped by wave number and applied wave by wave, lowest
//! first. A resource's wave comes from, in order:
//! - the `sherpack.io/sync-wave` annotation
//! - the `helm.sh/hook-weight` annotation
//! - a default by kind, so cluster-scoped foundations land before
//!   configuration, configuration before workloads and workloads before
//!   the networking that fronts them
//!
//! ```yaml
//! apiVersion: batch/v1
//! kind: Job
//! metadata:
//!   name: db-migrate
//!   annotations:
//!     sherpack.io/sync-wave: "5"  # after every default wave
//! ```

use sherpack_core::Manifest;
use std::collections::BTreeMap;

use crate::annotations::{self, helm};

/// Wave for kinds without a default priority
pub const DEFAULT_WAVE: i32 = 4;

/// Default wave of a kind
pub fn kind_priority(kind: &str) -> i32 {
    match kind {
        "Namespace"
        | "CustomResourceDefinition"
        | "PersistentVolume"
        | "ClusterRole"
        | "ClusterRoleList"
        | "ClusterRoleBinding"
        | "ClusterRoleBindingList"
        | "StorageClass" => 0,

        "ConfigMap" | "Secret" | "SecretList" | "ServiceAccount" | "Role" | "RoleList"
        | "RoleBinding" | "RoleBindingList" | "PodDisruptionBudget" | "ResourceQuota"
        | "NetworkPolicy" | "LimitRange" | "PodSecurityPolicy" | "IngressClass"
        | "PersistentVolumeClaim" => 1,

        "Deployment" | "DaemonSet" | "StatefulSet" | "ReplicaSet" | "Job" | "CronJob" | "Pod"
        | "ReplicationController" => 2,

        "Endpoints" | "Service" | "Ingress" | "APIService" => 3,

        _ => DEFAULT_WAVE,
    }
}

/// Wave a resource is applied in
pub fn sync_wave(manifest: &Manifest) -> i32 {
    let annotations = manifest.annotations();
    annotations::parse_sync_wave(&annotations)
        .or_else(|| {
            annotations
                .get(helm::HOOK_WEIGHT)
                .and_then(|w| w.trim().parse().ok())
        })
        .unwrap_or_else(|| kind_priority(manifest.kind()))
}

/// Resources applied together
#[derive(Debug, Clone, PartialEq)]
pub struct Wave {
    pub number: i32,
    pub resources: Vec<Manifest>,
}

impl Wave {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Group resources into ascending waves, keeping input order within a wave
pub fn plan_waves(manifests: Vec<Manifest>) -> Vec<Wave> {
    let mut grouped: BTreeMap<i32, Vec<Manifest>> = BTreeMap::new();
    for manifest in manifests {
        grouped.entry(sync_wave(&manifest)).or_default().push(manifest);
    }

    grouped
        .into_iter()
        .map(|(number, resources)| Wave { number, resources })
        .collect()
}
