//! Sherpack Kube - Kubernetes apply machinery for the Sherpack agent
//!
//! This crate provides:
//! - **Ownership**: Tag applied objects with their service id and content digest
//! - **Diff Engine**: Compare desired manifests with the live objects a service owns
//! - **Hooks**: Helm-compatible hook annotations, ordering and delete policies
//! - **Sync Waves**: Resource ordering by annotation or kind
//! - **Health Checks**: Per-kind health of live objects
//! - **Applier**: Server-side apply wave by wave, hooks around it, pruning after it

pub mod annotations;
pub mod applier;
pub mod diff;
pub mod error;
pub mod health;
pub mod hooks;
pub mod live;
pub mod mock;
pub mod ownership;
pub mod waves;

pub use annotations::{DeletePolicy, HookType};
pub use applier::{
    ApplyOptions, ClusterApplier, KubeApplier, ObjectOps, ResourceSyncResult, ResultCode,
    SyncPhase, SyncPlan, execute, plan_sync, sync_error,
};
pub use diff::{ChangeType, DiffResult, LiveObjectMap, ResourceChange};
pub use error::{KubeError, Result};
pub use health::{HealthCode, HealthStatus};
pub use hooks::Hook;
pub use live::{KubeLiveObjects, LiveObjects};
pub use mock::{MockApplier, MockLiveObjects};
pub use waves::Wave;
