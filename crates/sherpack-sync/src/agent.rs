//! Agent lifecycle
//!
//! Starts discovery, then runs the sync workers, the gate workers and the
//! poll loop under a [`Supervisor`]. The poll loop lists services and gates
//! from the control plane, feeds the queues and pings with the cluster
//! version.

use sherpack_discovery::DiscoveryManager;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::context::AgentContext;
use crate::engine::SyncEngine;
use crate::error::Result;
use crate::gate::GateLoop;
use crate::queue::{Backoff, GateItem, WorkQueue};
use crate::remote::{list_all_gates, list_all_services};
use crate::supervisor::{LoopFailure, Supervisor};

/// Counts from one poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub services: usize,
    pub gates: usize,
}

pub struct Agent {
    ctx: AgentContext,
    engine: Arc<SyncEngine>,
    gates: Arc<GateLoop>,
    discovery: DiscoveryManager,
    stop: watch::Sender<bool>,
}

impl Agent {
    pub fn new(ctx: AgentContext) -> Self {
        let backoff = Backoff::from(&ctx.config.queue);
        let engine = Arc::new(SyncEngine::new(ctx.clone(), WorkQueue::new(backoff)));
        let gates = Arc::new(GateLoop::new(ctx.clone(), WorkQueue::<GateItem>::new(backoff)));
        let discovery = DiscoveryManager::new(Arc::clone(&ctx.discovery))
            .with_refresh_interval(ctx.config.discovery_refresh_interval);
        let (stop, _) = watch::channel(false);

        Self {
            ctx,
            engine,
            gates,
            discovery,
            stop,
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn gates(&self) -> &Arc<GateLoop> {
        &self.gates
    }

    /// List services and gates once, enqueue them and ping
    ///
    /// Listed descriptors refresh the service cache. A failed ping is only
    /// logged.
    pub async fn poll_once(&self) -> Result<PollSummary> {
        let services = list_all_services(self.ctx.remote.as_ref()).await?;
        let mut summary = PollSummary {
            services: services.len(),
            ..Default::default()
        };
        for service in services {
            let id = service.id.clone();
            self.ctx.services.set(service);
            self.engine.enqueue(id);
        }

        let gates = list_all_gates(self.ctx.remote.as_ref()).await?;
        summary.gates = gates.len();
        for gate in gates {
            self.gates.queue().add(GateItem::new(gate.id));
        }

        if let Err(e) = self.ping().await {
            warn!(error = %e, "failed to ping control plane");
        }

        debug!(services = summary.services, gates = summary.gates, "polled control plane");
        Ok(summary)
    }

    /// Report liveness with the server version known to discovery
    pub async fn ping(&self) -> Result<()> {
        let cached = self
            .ctx
            .discovery
            .snapshot()
            .server_version()
            .map(ToString::to_string);
        let version = match cached {
            Some(version) => version,
            None => self.ctx.discovery.server_version().await?.to_string(),
        };
        self.ctx.remote.ping(&version).await
    }

    /// Force a fresh fetch of a service on its next pass and enqueue it
    pub fn publish(&self, id: &str) {
        self.ctx.manifests.expire(id);
        self.ctx.services.expire(id);
        self.engine.enqueue(id);
    }

    /// Start discovery and every loop
    ///
    /// The returned receiver yields a [`LoopFailure`] each time a loop is
    /// restarted.
    pub async fn start(self: &Arc<Self>) -> Result<(Supervisor, mpsc::UnboundedReceiver<LoopFailure>)> {
        self.discovery.start().await?;

        let config = &self.ctx.config;
        let (mut supervisor, failures) = Supervisor::new(config.restart_backoff);

        for worker in 0..config.sync_workers {
            let engine = Arc::clone(&self.engine);
            supervisor.spawn(format!("sync-worker-{}", worker), move || {
                let engine = Arc::clone(&engine);
                async move { engine.run().await }
            });
        }

        let gates = Arc::clone(&self.gates);
        let (workers, delay) = (config.gate_workers, config.sync_delay);
        supervisor.spawn("gate-workers", move || {
            let gates = Arc::clone(&gates);
            async move { gates.run(workers, delay).await }
        });

        let agent = Arc::clone(self);
        supervisor.spawn("poll", move || {
            let agent = Arc::clone(&agent);
            async move { agent.poll_loop().await }
        });

        info!(
            sync_workers = config.sync_workers,
            gate_workers = config.gate_workers,
            poll_interval = ?config.poll_interval,
            "agent started"
        );
        Ok((supervisor, failures))
    }

    async fn poll_loop(&self) -> Result<()> {
        let mut stop = self.stop.subscribe();
        if *stop.borrow() {
            return Ok(());
        }

        let mut ticker = tokio::time::interval(self.ctx.config.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "failed to poll control plane");
                    }
                }
                _ = stop.changed() => return Ok(()),
            }
        }
    }

    /// Stop polling, drain the queues and stop discovery
    pub fn shutdown(&self) {
        info!("shutting down agent");
        self.stop.send_replace(true);
        self.engine.queue().shut_down();
        self.gates.queue().shut_down();
        self.discovery.stop();
    }
}
