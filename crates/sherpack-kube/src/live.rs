//! Live object lookup
//!
//! [`KubeLiveObjects`] lists every listable kind known to the discovery
//! cache with the ownership label selector, then keeps the root objects
//! whose ownership annotation matches. Kinds that cannot be listed are
//! skipped; a missing kind only means fewer prune candidates.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use kube::Client;
use kube::api::{Api, DynamicObject, ListParams};
use kube::discovery::ApiResource;
use sherpack_core::{GroupVersionKind, GroupVersionResource, Manifest};
use sherpack_discovery::DiscoveryCache;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::diff::LiveObjectMap;
use crate::error::{KubeError, Result};
use crate::ownership;

const LIST_CONCURRENCY: usize = 8;

/// Kinds never owned by a service
const SKIPPED_KINDS: &[&str] = &["Event", "Lease", "EndpointSlice", "Endpoints", "TokenReview"];

/// Source of the live objects owned by a service
#[async_trait]
pub trait LiveObjects: Send + Sync {
    /// Root objects tagged with `service_id`
    async fn owned_by(&self, service_id: &str) -> Result<LiveObjectMap>;
}

/// Lists live objects through the API server
pub struct KubeLiveObjects {
    client: Client,
    discovery: Arc<DiscoveryCache>,
}

impl KubeLiveObjects {
    pub fn new(client: Client, discovery: Arc<DiscoveryCache>) -> Self {
        Self { client, discovery }
    }

    async fn list_kind(
        &self,
        gvk: &GroupVersionKind,
        gvr: &GroupVersionResource,
        selector: &str,
    ) -> Result<Vec<Manifest>> {
        let ar = api_resource(gvk, gvr);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let list = api.list(&ListParams::default().labels(selector)).await?;

        list.items
            .into_iter()
            .map(|obj| to_manifest(obj, gvk))
            .collect()
    }
}

#[async_trait]
impl LiveObjects for KubeLiveObjects {
    async fn owned_by(&self, service_id: &str) -> Result<LiveObjectMap> {
        let selector = ownership::owner_selector(service_id);
        let kinds: Vec<_> = self
            .discovery
            .snapshot()
            .listable()
            .into_iter()
            .filter(|(gvk, _, _)| !SKIPPED_KINDS.contains(&gvk.kind.as_str()))
            .collect();
        let total = kinds.len();

        let listings: Vec<_> = stream::iter(kinds.into_iter())
            .map(|(gvk, gvr, _)| {
                let selector = selector.clone();
                async move {
                    let listing = self.list_kind(&gvk, &gvr, &selector).await;
                    (gvk, listing)
                }
            })
            .buffer_unordered(LIST_CONCURRENCY)
            .collect()
            .await;

        let mut objects = LiveObjectMap::new();
        let mut failures = Vec::new();
        for (gvk, listing) in listings {
            match listing {
                Ok(items) => {
                    for obj in ownership::filter_owned(&items, service_id) {
                        if !obj.has_owner_references() {
                            objects.insert(obj.key(), obj);
                        }
                    }
                }
                Err(e) => {
                    debug!(gvk = %gvk, error = %e, "skipping kind that could not be listed");
                    failures.push(e);
                }
            }
        }

        if total > 0 && failures.len() == total {
            warn!(service_id = %service_id, "no kind could be listed");
            if let Some(e) = failures.into_iter().next() {
                return Err(e);
            }
        }

        debug!(service_id = %service_id, count = objects.len(), "listed owned objects");
        Ok(objects)
    }
}

pub(crate) fn api_resource(gvk: &GroupVersionKind, gvr: &GroupVersionResource) -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &kube::core::GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind),
        &gvr.resource,
    )
}

/// Convert a listed object, filling in type information lists leave out
pub(crate) fn to_manifest(obj: DynamicObject, gvk: &GroupVersionKind) -> Result<Manifest> {
    let mut value = serde_json::to_value(&obj)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("apiVersion".to_string(), gvk.api_version().into());
        map.insert("kind".to_string(), gvk.kind.clone().into());
    }
    Manifest::from_value(value).map_err(KubeError::from)
}
