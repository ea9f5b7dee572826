//! TTL cache of service descriptors

use sherpack_core::ServiceDescriptor;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::remote::RemoteApi;

struct Entry {
    service: ServiceDescriptor,
    fetched: Instant,
}

/// Service descriptors mirrored from the control plane
pub struct ServiceCache {
    remote: Arc<dyn RemoteApi>,
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl ServiceCache {
    pub fn new(remote: Arc<dyn RemoteApi>, ttl: Duration) -> Self {
        Self {
            remote,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh descriptor for `id`, fetched through the remote API when stale
    pub async fn get(&self, id: &str) -> Result<ServiceDescriptor> {
        if let Some(entry) = self.lock().get(id) {
            if entry.fetched.elapsed() < self.ttl {
                return Ok(entry.service.clone());
            }
        }

        debug!(service_id = %id, "fetching service descriptor");
        let service = self
            .remote
            .get_service(id)
            .await?
            .ok_or_else(|| SyncError::ServiceNotFound { id: id.to_string() })?;
        self.set(service.clone());
        Ok(service)
    }

    /// Store a descriptor obtained elsewhere, e.g. from a listing
    pub fn set(&self, service: ServiceDescriptor) {
        self.lock().insert(
            service.id.clone(),
            Entry {
                service,
                fetched: Instant::now(),
            },
        );
    }

    pub fn expire(&self, id: &str) {
        self.lock().remove(id);
    }

    pub fn wipe(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
