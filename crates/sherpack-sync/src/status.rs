//! Status aggregation and reporting
//!
//! A pass's per-resource results are merged with the live objects the
//! service owns, so resources untouched by the pass still show their real
//! state. Health maps onto the control plane vocabulary: healthy is
//! running, degraded is failed, anything else is pending.

use metrics::counter;
use sherpack_core::{ComponentAttributes, ComponentState, ErrorSource, Manifest, ResourceKey, ServiceError};
use sherpack_kube::health::{self, HealthCode, HealthStatus};
use sherpack_kube::{LiveObjectMap, ResourceSyncResult, ResultCode, SyncPhase};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::remote::RemoteApi;

pub fn component_state(health: &HealthStatus) -> ComponentState {
    match health.code {
        HealthCode::Healthy => ComponentState::Running,
        HealthCode::Degraded => ComponentState::Failed,
        _ => ComponentState::Pending,
    }
}

fn live_state(obj: &Manifest) -> ComponentState {
    component_state(&health::assess(obj))
}

/// State of a resource with no live counterpart
fn settled_state(result: &ResourceSyncResult) -> Option<ComponentState> {
    match (result.code, result.phase) {
        // hooks deleted after success
        (ResultCode::Synced, SyncPhase::PreSync | SyncPhase::PostSync) => Some(ComponentState::Running),
        (ResultCode::Synced, _) => Some(ComponentState::Pending),
        (ResultCode::SyncFailed, _) => Some(ComponentState::Failed),
        _ => None,
    }
}

fn attributes(key: &ResourceKey, version: &str, state: Option<ComponentState>, synced: bool) -> ComponentAttributes {
    ComponentAttributes {
        group: key.group.clone(),
        version: version.to_string(),
        kind: key.kind.clone(),
        namespace: key.namespace.clone(),
        name: key.name.clone(),
        state,
        synced,
    }
}

/// Merge pass results with the live objects a service owns
///
/// Pruned resources are dropped. Live objects the pass did not touch are
/// reported as synced.
pub fn aggregate(results: &[ResourceSyncResult], live: &LiveObjectMap) -> Vec<ComponentAttributes> {
    let mut components: BTreeMap<ResourceKey, ComponentAttributes> = BTreeMap::new();

    for result in results {
        if result.code == ResultCode::Pruned {
            continue;
        }
        let state = match live.get(&result.key) {
            Some(obj) => Some(live_state(obj)),
            None => settled_state(result),
        };
        let synced = result.code == ResultCode::Synced;
        components.insert(
            result.key.clone(),
            attributes(&result.key, &result.version, state, synced),
        );
    }

    for (key, obj) in live {
        if components.contains_key(key) {
            continue;
        }
        let version = obj.gvk().version;
        components.insert(key.clone(), attributes(key, &version, Some(live_state(obj)), true));
    }

    components.into_values().collect()
}

/// Error attributes for an optional phase error
pub fn error_attributes(source: ErrorSource, error: Option<&dyn fmt::Display>) -> Vec<ServiceError> {
    error
        .map(|e| vec![ServiceError::new(source, e)])
        .unwrap_or_default()
}

/// Sends aggregated status to the control plane
#[derive(Clone)]
pub struct StatusReporter {
    remote: Arc<dyn RemoteApi>,
}

impl StatusReporter {
    pub fn new(remote: Arc<dyn RemoteApi>) -> Self {
        Self { remote }
    }

    /// Report components and errors of a service
    ///
    /// A failure to collect components is reported as a `reconciliation`
    /// error alongside `errors`. A failed report is logged, not retried.
    /// Returns whether the report was accepted.
    pub async fn update_status(
        &self,
        service_id: &str,
        components: Result<Vec<ComponentAttributes>>,
        mut errors: Vec<ServiceError>,
    ) -> bool {
        let components = match components {
            Ok(components) => components,
            Err(e) => {
                warn!(service_id = %service_id, error = %e, "failed to collect components");
                errors.push(ServiceError::new(ErrorSource::Reconciliation, &e));
                Vec::new()
            }
        };

        match self
            .remote
            .update_components(service_id, &components, &errors)
            .await
        {
            Ok(()) => {
                debug!(
                    service_id = %service_id,
                    components = components.len(),
                    errors = errors.len(),
                    "reported service status"
                );
                true
            }
            Err(e) => {
                counter!("status_report_failures_total", 1u64);
                warn!(service_id = %service_id, error = %e, "failed to update service status, ignoring for now");
                false
            }
        }
    }

    /// Report only an error, leaving components empty
    pub async fn report_error(
        &self,
        service_id: &str,
        source: ErrorSource,
        error: &(dyn fmt::Display + Sync),
    ) -> bool {
        let errors = error_attributes(source, Some(error as &dyn fmt::Display));
        self.update_status(service_id, Ok(Vec::new()), errors).await
    }
}
