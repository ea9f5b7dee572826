//! Sherpack Discovery - Cluster API surface tracking for the Sherpack agent
//!
//! This crate provides:
//! - **Discovery Cache**: An in-memory mirror of the cluster's kinds, resources and group versions
//! - **Events**: Synchronous, registration-ordered notifications of additions and deletions
//! - **Discovery Manager**: Periodic background refresh with start/stop lifecycle
//! - **Kube Backend**: `DiscoveryClient` and `RestMapper` implementations over `kube::Discovery`

pub mod cache;
pub mod client;
pub mod error;
pub mod events;
pub mod manager;
pub mod mock;
pub mod server;

pub use cache::{DiscoveryCache, DiscoverySnapshot, MappingBackoff};
pub use client::{
    ApiResourceInfo, ApiResourceList, DiscoveryClient, RestMapper, RestMapping, ServerResources,
    ServerVersion,
};
pub use error::{DiscoveryError, Result};
pub use events::{DiscoveryEvent, DiscoveryObserver, ObserverRegistry};
pub use manager::{DEFAULT_REFRESH_INTERVAL, DiscoveryManager};
pub use mock::{DiscoveryCallCounts, MockDiscoveryClient};
pub use server::KubeDiscovery;
