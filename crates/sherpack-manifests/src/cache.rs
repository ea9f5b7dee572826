//! TTL cache of fetched manifest artifacts
//!
//! Each service maps to one extracted artifact directory. A live line is
//! re-rendered straight from disk; an expired line, or one fetched for a
//! different digest, is wiped and fetched again.

use chrono::{DateTime, Utc};
use metrics::counter;
use rand::Rng;
use sherpack_core::{Manifest, ServiceDescriptor};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ManifestError, Result};
use crate::fetch::ArtifactFetcher;
use crate::render::RendererSet;

struct CacheLine {
    dir: PathBuf,
    digest: Option<String>,
    created: DateTime<Utc>,
    expiry: Duration,
}

impl CacheLine {
    fn live(&self, now: DateTime<Utc>) -> bool {
        match (now - self.created).to_std() {
            Ok(age) => age < self.expiry,
            // created in the future, clock moved backwards
            Err(_) => true,
        }
    }

    fn wipe(&self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %self.dir.display(), error = %e, "failed to remove manifest directory");
            }
        }
    }
}

/// Manifest artifact cache keyed by service id
pub struct ManifestCache {
    lines: Mutex<HashMap<String, CacheLine>>,
    fetcher: Arc<dyn ArtifactFetcher>,
    renderers: RendererSet,
    token: String,
    expiry: Duration,
    jitter: Duration,
}

impl ManifestCache {
    pub fn new(
        fetcher: Arc<dyn ArtifactFetcher>,
        renderers: RendererSet,
        token: impl Into<String>,
        expiry: Duration,
    ) -> Self {
        Self {
            lines: Mutex::new(HashMap::new()),
            fetcher,
            renderers,
            token: token.into(),
            expiry,
            jitter: Duration::ZERO,
        }
    }

    /// Add a random extra lifetime of up to `jitter` to every line
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Render the manifests of a service, fetching its artifact when needed
    pub async fn fetch(&self, service: &ServiceDescriptor) -> Result<Vec<Manifest>> {
        if let Some(dir) = self.live_dir(service) {
            counter!("manifest_cache_hits_total", 1u64);
            debug!(service_id = %service.id, dir = %dir.display(), "rendering from cached manifests");
            return self.render(&dir, service);
        }
        counter!("manifest_cache_misses_total", 1u64);

        let url = service
            .tarball
            .as_deref()
            .ok_or_else(|| ManifestError::NoTarball {
                id: service.id.clone(),
            })?;

        let dir = self
            .fetcher
            .fetch(url, &self.token, service.digest.as_deref())
            .await?;
        info!(service_id = %service.id, dir = %dir.display(), "using cache dir");

        let line = CacheLine {
            dir: dir.clone(),
            digest: service.digest.clone(),
            created: Utc::now(),
            expiry: self.expiry_with_jitter(),
        };
        if let Some(previous) = self.lock_lines().insert(service.id.clone(), line) {
            if previous.dir != dir {
                previous.wipe();
            }
        }

        self.render(&dir, service)
    }

    /// Force-invalidate one service
    pub fn expire(&self, id: &str) {
        if let Some(line) = self.lock_lines().remove(id) {
            debug!(service_id = %id, "expiring manifest cache line");
            line.wipe();
        }
    }

    /// Evict and delete every line
    pub fn wipe(&self) {
        let lines: Vec<CacheLine> = self.lock_lines().drain().map(|(_, line)| line).collect();
        for line in &lines {
            line.wipe();
        }
        info!(count = lines.len(), "wiped manifest cache");
    }

    pub fn len(&self) -> usize {
        self.lock_lines().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Directory currently cached for a service, live or not
    pub fn cached_dir(&self, id: &str) -> Option<PathBuf> {
        self.lock_lines().get(id).map(|line| line.dir.clone())
    }

    pub fn expiry_with_jitter(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.expiry;
        }
        let extra = rand::rng().random_range(0..jitter_ms);
        self.expiry + Duration::from_millis(extra)
    }

    fn live_dir(&self, service: &ServiceDescriptor) -> Option<PathBuf> {
        let mut lines = self.lock_lines();
        let line = lines.get(&service.id)?;
        if line.live(Utc::now()) && line.digest == service.digest {
            return Some(line.dir.clone());
        }

        if let Some(stale) = lines.remove(&service.id) {
            debug!(service_id = %service.id, "manifest cache line is stale");
            stale.wipe();
        }
        None
    }

    fn render(&self, dir: &Path, service: &ServiceDescriptor) -> Result<Vec<Manifest>> {
        self.renderers.render(dir, service)
    }

    fn lock_lines(&self) -> MutexGuard<'_, HashMap<String, CacheLine>> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ManifestCache {
    fn drop(&mut self) {
        self.wipe();
    }
}
