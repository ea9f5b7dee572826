//! Control plane API seam
//!
//! The agent only needs a handful of calls: paged listing of services and
//! gates, single lookups, component status updates and a liveness ping.

use async_trait::async_trait;
use sherpack_core::{ComponentAttributes, Gate, ServiceDescriptor, ServiceError};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::{Result, SyncError};

/// Page size used when walking listings
pub const PAGE_SIZE: usize = 100;

/// One page of a cursor-paginated listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor to pass as `after` for the next page
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list_services(&self, after: Option<&str>, first: usize) -> Result<Page<ServiceDescriptor>>;

    /// `None` when the control plane no longer knows the service
    async fn get_service(&self, id: &str) -> Result<Option<ServiceDescriptor>>;

    /// Replace the reported components and errors of a service
    async fn update_components(
        &self,
        id: &str,
        components: &[ComponentAttributes],
        errors: &[ServiceError],
    ) -> Result<()>;

    async fn list_gates(&self, after: Option<&str>, first: usize) -> Result<Page<Gate>>;

    async fn get_gate(&self, id: &str) -> Result<Option<Gate>>;

    /// Report cluster liveness and its server version
    async fn ping(&self, version: &str) -> Result<()>;
}

/// Walk every page of the service listing
pub async fn list_all_services(remote: &dyn RemoteApi) -> Result<Vec<ServiceDescriptor>> {
    let mut services = Vec::new();
    let mut after: Option<String> = None;
    loop {
        let page = remote.list_services(after.as_deref(), PAGE_SIZE).await?;
        services.extend(page.items);
        if !page.has_next_page || page.end_cursor.is_none() {
            return Ok(services);
        }
        after = page.end_cursor;
    }
}

/// Walk every page of the gate listing
pub async fn list_all_gates(remote: &dyn RemoteApi) -> Result<Vec<Gate>> {
    let mut gates = Vec::new();
    let mut after: Option<String> = None;
    loop {
        let page = remote.list_gates(after.as_deref(), PAGE_SIZE).await?;
        gates.extend(page.items);
        if !page.has_next_page || page.end_cursor.is_none() {
            return Ok(gates);
        }
        after = page.end_cursor;
    }
}

/// A status update received by [`MockRemoteApi`]
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub id: String,
    pub components: Vec<ComponentAttributes>,
    pub errors: Vec<ServiceError>,
}

/// In-memory control plane for testing
#[derive(Clone, Default)]
pub struct MockRemoteApi {
    state: Arc<RwLock<RemoteState>>,
    operations: Arc<RwLock<RemoteCallCounts>>,
}

#[derive(Default)]
struct RemoteState {
    services: BTreeMap<String, ServiceDescriptor>,
    gates: BTreeMap<String, Gate>,
    updates: Vec<StatusUpdate>,
    pings: Vec<String>,
    fail_updates: bool,
    fail_lists: bool,
}

/// Counts of calls made against the mock
#[derive(Debug, Default, Clone)]
pub struct RemoteCallCounts {
    pub list_services: usize,
    pub get_service: usize,
    pub update_components: usize,
    pub list_gates: usize,
    pub get_gate: usize,
    pub pings: usize,
}

impl MockRemoteApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_services(services: Vec<ServiceDescriptor>) -> Self {
        let mock = Self::new();
        for service in services {
            mock.set_service(service);
        }
        mock
    }

    pub fn set_service(&self, service: ServiceDescriptor) {
        self.state
            .write()
            .unwrap()
            .services
            .insert(service.id.clone(), service);
    }

    pub fn remove_service(&self, id: &str) {
        self.state.write().unwrap().services.remove(id);
    }

    pub fn set_gate(&self, gate: Gate) {
        self.state.write().unwrap().gates.insert(gate.id.clone(), gate);
    }

    /// Make status updates fail
    pub fn set_update_failure(&self, fail: bool) {
        self.state.write().unwrap().fail_updates = fail;
    }

    /// Make listings fail
    pub fn set_list_failure(&self, fail: bool) {
        self.state.write().unwrap().fail_lists = fail;
    }

    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.state.read().unwrap().updates.clone()
    }

    pub fn last_update(&self, id: &str) -> Option<StatusUpdate> {
        self.updates().into_iter().rev().find(|u| u.id == id)
    }

    pub fn pings(&self) -> Vec<String> {
        self.state.read().unwrap().pings.clone()
    }

    pub fn call_counts(&self) -> RemoteCallCounts {
        self.operations.read().unwrap().clone()
    }

    fn page<T: Clone>(items: Vec<T>, ids: Vec<String>, after: Option<&str>, first: usize) -> Page<T> {
        let start = after
            .and_then(|cursor| ids.iter().position(|id| id == cursor))
            .map(|i| i + 1)
            .unwrap_or(0);
        let end = (start + first).min(items.len());
        Page {
            items: items[start..end].to_vec(),
            end_cursor: ids.get(end.saturating_sub(1)).filter(|_| end > start).cloned(),
            has_next_page: end < items.len(),
        }
    }
}

#[async_trait]
impl RemoteApi for MockRemoteApi {
    async fn list_services(&self, after: Option<&str>, first: usize) -> Result<Page<ServiceDescriptor>> {
        self.operations.write().unwrap().list_services += 1;
        let state = self.state.read().unwrap();
        if state.fail_lists {
            return Err(SyncError::remote("list services failed"));
        }
        let ids = state.services.keys().cloned().collect();
        let items = state.services.values().cloned().collect();
        Ok(Self::page(items, ids, after, first))
    }

    async fn get_service(&self, id: &str) -> Result<Option<ServiceDescriptor>> {
        self.operations.write().unwrap().get_service += 1;
        Ok(self.state.read().unwrap().services.get(id).cloned())
    }

    async fn update_components(
        &self,
        id: &str,
        components: &[ComponentAttributes],
        errors: &[ServiceError],
    ) -> Result<()> {
        self.operations.write().unwrap().update_components += 1;
        let mut state = self.state.write().unwrap();
        if state.fail_updates {
            return Err(SyncError::remote("update components failed"));
        }
        state.updates.push(StatusUpdate {
            id: id.to_string(),
            components: components.to_vec(),
            errors: errors.to_vec(),
        });
        Ok(())
    }

    async fn list_gates(&self, after: Option<&str>, first: usize) -> Result<Page<Gate>> {
        self.operations.write().unwrap().list_gates += 1;
        let state = self.state.read().unwrap();
        if state.fail_lists {
            return Err(SyncError::remote("list gates failed"));
        }
        let ids = state.gates.keys().cloned().collect();
        let items = state.gates.values().cloned().collect();
        Ok(Self::page(items, ids, after, first))
    }

    async fn get_gate(&self, id: &str) -> Result<Option<Gate>> {
        self.operations.write().unwrap().get_gate += 1;
        Ok(self.state.read().unwrap().gates.get(id).cloned())
    }

    async fn ping(&self, version: &str) -> Result<()> {
        self.operations.write().unwrap().pings += 1;
        self.state.write().unwrap().pings.push(version.to_string());
        Ok(())
    }
}
