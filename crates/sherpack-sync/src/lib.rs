//! Sherpack Sync - reconciliation loops of the Sherpack cluster agent
//!
//! This crate provides:
//! - **Work Queues**: Deduplicating queues with per-item exponential backoff
//! - **Sync Engine**: One pass per service, from manifests to status report
//! - **Gates**: Closed job gates turned into cluster jobs
//! - **Status**: Component aggregation and reporting to the control plane
//! - **Agent**: Polling, discovery refresh and supervised worker loops
//!
//! # Example
//!
//! ```rust,ignore
//! use sherpack_sync::{Agent, AgentConfig, AgentContext};
//!
//! let config = AgentConfig::load()?;
//! let ctx = AgentContext::for_cluster(config, client, remote, discovery, manifests);
//! let agent = Arc::new(Agent::new(ctx));
//! let (supervisor, mut failures) = agent.start().await?;
//! ```

pub mod agent;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod gate;
pub mod queue;
pub mod remote;
pub mod service_cache;
pub mod status;
pub mod supervisor;

pub use agent::{Agent, PollSummary};
pub use config::{AgentConfig, QueueConfig};
pub use context::{AgentContext, ManifestSource};
pub use engine::{PassOutcome, SyncEngine};
pub use error::{Result, SyncError};
pub use gate::{GateApplier, GateLoop, GateOutcome, JobGateApplier, MockGateApplier};
pub use queue::{Backoff, GateItem, SyncItem, WorkQueue};
pub use remote::{MockRemoteApi, Page, RemoteApi, list_all_gates, list_all_services};
pub use service_cache::ServiceCache;
pub use status::StatusReporter;
pub use supervisor::{LoopFailure, Supervisor};
