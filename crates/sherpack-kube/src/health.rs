//! Health assessment of live objects
//!
//! Health is read from the object's own status, no extra API calls. The
//! rules follow what the workload controllers publish:
//! - Deployments are healthy once every desired replica is updated, ready
//!   and available
//! - StatefulSets additionally need the current revision to match the
//!   update revision
//! - Jobs are healthy once complete and degraded once failed
//! - Pods, claims, load balancers, ingresses and autoscalers report through
//!   their phase or conditions
//!
//! Kinds without a rule are healthy. Objects pending deletion are always
//! progressing.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use serde::de::DeserializeOwned;
use sherpack_core::Manifest;
use std::fmt;

/// Coarse health of a live object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthCode {
    Healthy,
    Progressing,
    Degraded,
    Suspended,
    Missing,
    Unknown,
}

impl fmt::Display for HealthCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthCode::Healthy => "Healthy",
            HealthCode::Progressing => "Progressing",
            HealthCode::Degraded => "Degraded",
            HealthCode::Suspended => "Suspended",
            HealthCode::Missing => "Missing",
            HealthCode::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Health of one object with an optional explanation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub code: HealthCode,
    pub message: Option<String>,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            code: HealthCode::Healthy,
            message: None,
        }
    }

    fn new(code: HealthCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.code == HealthCode::Healthy
    }
}

/// Assess the health of a live object
pub fn assess(manifest: &Manifest) -> HealthStatus {
    if manifest.is_pending_deletion() {
        return HealthStatus::new(HealthCode::Progressing, "Pending deletion");
    }

    let gvk = manifest.gvk();
    match (gvk.group.as_str(), gvk.kind.as_str()) {
        ("apps", "Deployment") => with_typed(manifest, deployment_health),
        ("apps", "StatefulSet") => with_typed(manifest, statefulset_health),
        ("apps", "DaemonSet") => with_typed(manifest, daemonset_health),
        ("apps", "ReplicaSet") => with_typed(manifest, replicaset_health),
        ("batch", "Job") => with_typed(manifest, job_health),
        ("", "Pod") => with_typed(manifest, pod_health),
        ("", "Service") => with_typed(manifest, service_health),
        ("", "PersistentVolumeClaim") => with_typed(manifest, pvc_health),
        ("networking.k8s.io", "Ingress") => with_typed(manifest, ingress_health),
        ("autoscaling", "HorizontalPodAutoscaler") if gvk.version == "v2" => {
            with_typed(manifest, hpa_health)
        }
        _ => HealthStatus::healthy(),
    }
}

fn with_typed<K, F>(manifest: &Manifest, check: F) -> HealthStatus
where
    K: DeserializeOwned,
    F: FnOnce(&K) -> HealthStatus,
{
    match serde_json::from_value::<K>(manifest.as_value().clone()) {
        Ok(object) => check(&object),
        Err(e) => HealthStatus::new(HealthCode::Unknown, format!("Unable to decode status: {}", e)),
    }
}

fn deployment_health(deployment: &Deployment) -> HealthStatus {
    let spec = deployment.spec.as_ref();
    let status = deployment.status.as_ref();

    if spec.and_then(|s| s.paused).unwrap_or(false) {
        return HealthStatus::new(HealthCode::Suspended, "Deployment is paused");
    }

    let generation = deployment.metadata.generation.unwrap_or(0);
    let observed = status.and_then(|s| s.observed_generation).unwrap_or(0);
    if observed < generation {
        return HealthStatus::new(HealthCode::Progressing, "Waiting for rollout to be observed");
    }

    let deadline_exceeded = status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|c| {
            c.iter().find(|cond| {
                cond.type_ == "Progressing"
                    && cond.reason.as_deref() == Some("ProgressDeadlineExceeded")
            })
        });
    if let Some(cond) = deadline_exceeded {
        let message = cond
            .message
            .clone()
            .unwrap_or_else(|| "Progress deadline exceeded".to_string());
        return HealthStatus::new(HealthCode::Degraded, message);
    }

    let desired = spec.and_then(|s| s.replicas).unwrap_or(1);
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    let updated = status.and_then(|s| s.updated_replicas).unwrap_or(0);
    let available = status.and_then(|s| s.available_replicas).unwrap_or(0);

    if ready == desired && updated == desired && available == desired {
        return HealthStatus::healthy();
    }

    HealthStatus::new(
        HealthCode::Progressing,
        format!(
            "Waiting: {}/{} ready, {}/{} updated, {}/{} available",
            ready, desired, updated, desired, available, desired
        ),
    )
}

fn statefulset_health(sts: &StatefulSet) -> HealthStatus {
    let spec = sts.spec.as_ref();
    let status = sts.status.as_ref();

    let desired = spec.and_then(|s| s.replicas).unwrap_or(1);
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);

    let on_delete = spec
        .and_then(|s| s.update_strategy.as_ref())
        .and_then(|u| u.type_.as_deref())
        == Some("OnDelete");
    if on_delete {
        return if ready == desired {
            HealthStatus::healthy()
        } else {
            HealthStatus::new(
                HealthCode::Progressing,
                format!("Waiting: {}/{} ready", ready, desired),
            )
        };
    }

    let current = status.and_then(|s| s.current_replicas).unwrap_or(0);
    let current_rev = status.and_then(|s| s.current_revision.as_ref());
    let update_rev = status.and_then(|s| s.update_revision.as_ref());
    let revision_match = current_rev == update_rev;

    if ready == desired && current == desired && revision_match {
        return HealthStatus::healthy();
    }

    HealthStatus::new(
        HealthCode::Progressing,
        format!(
            "Waiting: {}/{} ready, {}/{} current, revision match: {}",
            ready, desired, current, desired, revision_match
        ),
    )
}

fn daemonset_health(ds: &DaemonSet) -> HealthStatus {
    let status = ds.status.as_ref();

    let desired = status.map(|s| s.desired_number_scheduled).unwrap_or(0);
    let ready = status.map(|s| s.number_ready).unwrap_or(0);
    let updated = status.and_then(|s| s.updated_number_scheduled).unwrap_or(0);

    if ready == desired && updated == desired {
        return HealthStatus::healthy();
    }

    HealthStatus::new(
        HealthCode::Progressing,
        format!(
            "Waiting: {}/{} ready, {}/{} updated",
            ready, desired, updated, desired
        ),
    )
}

fn replicaset_health(rs: &ReplicaSet) -> HealthStatus {
    let desired = rs.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = rs.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);

    if ready >= desired {
        return HealthStatus::healthy();
    }
    HealthStatus::new(
        HealthCode::Progressing,
        format!("Waiting: {}/{} ready", ready, desired),
    )
}

fn job_health(job: &Job) -> HealthStatus {
    let status = job.status.as_ref();
    let conditions = status.and_then(|s| s.conditions.as_deref()).unwrap_or_default();

    if let Some(failed) = conditions
        .iter()
        .find(|c| c.type_ == "Failed" && c.status == "True")
    {
        let message = failed
            .message
            .clone()
            .unwrap_or_else(|| "Job failed".to_string());
        return HealthStatus::new(HealthCode::Degraded, message);
    }

    let complete = conditions
        .iter()
        .any(|c| c.type_ == "Complete" && c.status == "True");
    let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
    if complete || succeeded > 0 {
        return HealthStatus::healthy();
    }

    if job.spec.as_ref().and_then(|s| s.suspend).unwrap_or(false) {
        return HealthStatus::new(HealthCode::Suspended, "Job is suspended");
    }

    let active = status.and_then(|s| s.active).unwrap_or(0);
    HealthStatus::new(
        HealthCode::Progressing,
        format!("Running: {} active, {} succeeded", active, succeeded),
    )
}

/// Container waiting reasons that will not resolve on their own
const FATAL_WAIT_REASONS: &[&str] = &[
    "CrashLoopBackOff",
    "ImagePullBackOff",
    "ErrImagePull",
    "InvalidImageName",
    "CreateContainerConfigError",
];

fn pod_health(pod: &Pod) -> HealthStatus {
    let status = pod.status.as_ref();
    let containers = status
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default();

    for container in containers {
        let waiting = container.state.as_ref().and_then(|s| s.waiting.as_ref());
        if let Some(reason) = waiting.and_then(|w| w.reason.as_deref()) {
            if FATAL_WAIT_REASONS.contains(&reason) {
                let message = waiting
                    .and_then(|w| w.message.clone())
                    .unwrap_or_else(|| format!("{}: {}", container.name, reason));
                return HealthStatus::new(HealthCode::Degraded, message);
            }
        }
    }

    match status.and_then(|s| s.phase.as_deref()) {
        Some("Succeeded") => HealthStatus::healthy(),
        Some("Failed") => HealthStatus::new(
            HealthCode::Degraded,
            status
                .and_then(|s| s.message.clone())
                .unwrap_or_else(|| "Pod failed".to_string()),
        ),
        Some("Running") if containers.iter().all(|c| c.ready) => HealthStatus::healthy(),
        Some(phase) => HealthStatus::new(HealthCode::Progressing, format!("Pod is {}", phase)),
        None => HealthStatus::new(HealthCode::Progressing, "Pod has no phase yet"),
    }
}

fn service_health(service: &Service) -> HealthStatus {
    let is_lb = service.spec.as_ref().and_then(|s| s.type_.as_deref()) == Some("LoadBalancer");
    if !is_lb {
        return HealthStatus::healthy();
    }

    let has_ingress = service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .is_some_and(|i| !i.is_empty());
    if has_ingress {
        HealthStatus::healthy()
    } else {
        HealthStatus::new(HealthCode::Progressing, "Waiting for load balancer address")
    }
}

fn pvc_health(pvc: &PersistentVolumeClaim) -> HealthStatus {
    match pvc.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Bound") => HealthStatus::healthy(),
        Some("Lost") => HealthStatus::new(HealthCode::Degraded, "Claim lost its volume"),
        _ => HealthStatus::new(HealthCode::Progressing, "Waiting for volume binding"),
    }
}

fn ingress_health(ingress: &Ingress) -> HealthStatus {
    let has_ingress = ingress
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .is_some_and(|i| !i.is_empty());
    if has_ingress {
        HealthStatus::healthy()
    } else {
        HealthStatus::new(HealthCode::Progressing, "Waiting for ingress address")
    }
}

fn hpa_health(hpa: &HorizontalPodAutoscaler) -> HealthStatus {
    let conditions = hpa
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();

    let failing = conditions.iter().find(|c| {
        c.status == "False"
            && (c.type_ == "AbleToScale"
                || (c.type_ == "ScalingActive"
                    && c.reason.as_deref().is_some_and(|r| r.starts_with("Failed"))))
    });
    match failing {
        Some(cond) => HealthStatus::new(
            HealthCode::Degraded,
            cond.message
                .clone()
                .unwrap_or_else(|| format!("{} is False", cond.type_)),
        ),
        None => HealthStatus::healthy(),
    }
}
