//! Pipeline gate loop
//!
//! Gate state is owned by the control plane. The agent only reacts to
//! CLOSED job gates by creating the gate's job in the cluster; creating it
//! again is a no-op, so repeated passes over the same gate are harmless.
//! OPEN and PENDING gates need nothing from the agent.

use async_trait::async_trait;
use metrics::counter;
use serde_json::json;
use sherpack_core::{Gate, GateState, GateType, Manifest};
use sherpack_kube::ClusterApplier;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::context::AgentContext;
use crate::error::Result;
use crate::queue::{GateItem, WorkQueue};

/// Label carrying the gate id on created objects
pub const GATE_ID_LABEL: &str = "sherpack.io/gate-id";

/// Materializes a closed gate in the cluster
#[async_trait]
pub trait GateApplier: Send + Sync {
    async fn apply_gate(&self, gate: &Gate) -> Result<()>;
}

/// Creates a `batch/v1` Job from the gate's job spec
pub struct JobGateApplier {
    applier: Arc<dyn ClusterApplier>,
    namespace: String,
}

impl JobGateApplier {
    pub fn new(applier: Arc<dyn ClusterApplier>, namespace: impl Into<String>) -> Self {
        Self {
            applier,
            namespace: namespace.into(),
        }
    }
}

/// Job manifest for a gate, named deterministically from its id
pub fn gate_job(gate: &Gate, namespace: &str) -> Result<Manifest> {
    let spec = gate.spec.clone().unwrap_or_else(|| json!({}));
    let manifest = Manifest::from_value(json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": job_name(gate),
            "namespace": namespace,
            "labels": {GATE_ID_LABEL: gate.id},
            "annotations": {"sherpack.io/gate-name": gate.name}
        },
        "spec": spec
    }))
    .map_err(sherpack_kube::KubeError::from)?;
    Ok(manifest)
}

/// DNS-1123 label derived from the gate id
fn job_name(gate: &Gate) -> String {
    let mut name: String = gate
        .id
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    name.insert_str(0, "gate-");
    name.truncate(63);
    name.trim_end_matches('-').to_string()
}

#[async_trait]
impl GateApplier for JobGateApplier {
    async fn apply_gate(&self, gate: &Gate) -> Result<()> {
        let job = gate_job(gate, &self.namespace)?;
        match self.applier.create(&job).await {
            Ok(()) => {
                info!(gate_id = %gate.id, job = %job, "created gate job");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!(gate_id = %gate.id, "gate job already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Records applied gates
#[derive(Clone, Default)]
pub struct MockGateApplier {
    applied: Arc<RwLock<Vec<Gate>>>,
}

impl MockGateApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> Vec<Gate> {
        self.applied.read().unwrap().clone()
    }
}

#[async_trait]
impl GateApplier for MockGateApplier {
    async fn apply_gate(&self, gate: &Gate) -> Result<()> {
        self.applied.write().unwrap().push(gate.clone());
        Ok(())
    }
}

/// What a pass did with a gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Applied,
    Skipped,
}

/// Consumes gate ids and reconciles closed job gates
pub struct GateLoop {
    ctx: AgentContext,
    queue: WorkQueue<GateItem>,
}

impl GateLoop {
    pub fn new(ctx: AgentContext, queue: WorkQueue<GateItem>) -> Self {
        Self { ctx, queue }
    }

    pub fn queue(&self) -> &WorkQueue<GateItem> {
        &self.queue
    }

    pub async fn process_gate(&self, item: &GateItem) -> Result<GateOutcome> {
        if item.id().is_empty() {
            return Ok(GateOutcome::Skipped);
        }

        let Some(gate) = self.ctx.remote.get_gate(item.id()).await? else {
            debug!(gate_id = %item, "gate no longer exists");
            return Ok(GateOutcome::Skipped);
        };

        if gate.state != GateState::Closed {
            debug!(gate_id = %gate.id, state = %gate.state, "nothing to do for gate");
            return Ok(GateOutcome::Skipped);
        }
        if gate.gate_type != GateType::Job {
            debug!(gate_id = %gate.id, "only job gates are reconciled");
            return Ok(GateOutcome::Skipped);
        }

        info!(gate_id = %gate.id, name = %gate.name, "syncing gate");
        self.ctx.gates.apply_gate(&gate).await?;
        Ok(GateOutcome::Applied)
    }

    /// Run `workers` consumers until the queue shuts down
    pub async fn run(&self, workers: usize, delay: Duration) -> Result<()> {
        let consumers = (0..workers.max(1)).map(|_| self.worker(delay));
        futures::future::join_all(consumers).await;
        Ok(())
    }

    async fn worker(&self, delay: Duration) {
        info!("starting gate worker");
        while let Some(item) = self.queue.get().await {
            let in_flight = self.queue.in_flight(&item);
            match self.process_gate(&item).await {
                Ok(outcome) => {
                    let result = match outcome {
                        GateOutcome::Applied => "applied",
                        GateOutcome::Skipped => "skipped",
                    };
                    counter!("gate_items_total", 1u64, "result" => result);
                    self.queue.forget(&item);
                }
                Err(e) => {
                    counter!("gate_items_total", 1u64, "result" => "error");
                    error!(gate_id = %item, error = %e, "failed to process gate");
                    if e.is_retryable() {
                        self.queue.add_rate_limited(item.clone());
                    }
                }
            }
            drop(in_flight);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        info!("shutting down gate worker");
    }
}
