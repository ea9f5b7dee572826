//! Agent configuration
//!
//! Stored in `~/.config/sherpack/agent.yaml` unless a path is given.
//! Durations use humantime notation (`2m`, `500ms`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Agent configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Period of the remote service and gate listing
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Discovery refresh period, clamped to the manager minimum
    #[serde(with = "humantime_serde")]
    pub discovery_refresh_interval: Duration,

    #[serde(with = "humantime_serde")]
    pub manifest_cache_expiry: Duration,

    /// Random extra lifetime per manifest cache line; zero disables
    #[serde(with = "humantime_serde")]
    pub manifest_cache_jitter: Duration,

    #[serde(with = "humantime_serde")]
    pub service_cache_expiry: Duration,

    pub sync_workers: usize,

    pub gate_workers: usize,

    /// Pause after each processed item
    #[serde(with = "humantime_serde")]
    pub sync_delay: Duration,

    /// Pause between non-final sync waves
    #[serde(with = "humantime_serde")]
    pub wave_delay: Duration,

    /// Server-side apply manager identity
    pub field_manager: String,

    /// Namespace gate jobs are created in
    pub gate_namespace: String,

    pub queue: QueueConfig,

    /// Pause before a failed loop is restarted
    #[serde(with = "humantime_serde")]
    pub restart_backoff: Duration,
}

/// Per-key exponential backoff of the work queues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueConfig {
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2 * 60),
            discovery_refresh_interval: Duration::from_secs(5 * 60),
            manifest_cache_expiry: Duration::from_secs(60 * 60),
            manifest_cache_jitter: Duration::from_secs(5 * 60),
            service_cache_expiry: Duration::from_secs(2 * 60),
            sync_workers: 1,
            gate_workers: 2,
            sync_delay: Duration::ZERO,
            wave_delay: Duration::from_secs(2),
            field_manager: sherpack_kube::applier::DEFAULT_FIELD_MANAGER.to_string(),
            gate_namespace: "sherpack-system".to_string(),
            queue: QueueConfig::default(),
            restart_backoff: Duration::from_secs(1),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the default location, or defaults if absent
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load and validate configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| SyncError::invalid_config("Could not determine config directory"))?;
        Ok(config_dir.join("sherpack").join("agent.yaml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync_workers == 0 {
            return Err(SyncError::invalid_config("syncWorkers must be at least 1"));
        }
        if self.gate_workers == 0 {
            return Err(SyncError::invalid_config("gateWorkers must be at least 1"));
        }

        let intervals = [
            ("pollInterval", self.poll_interval),
            ("discoveryRefreshInterval", self.discovery_refresh_interval),
            ("manifestCacheExpiry", self.manifest_cache_expiry),
            ("serviceCacheExpiry", self.service_cache_expiry),
            ("queue.baseDelay", self.queue.base_delay),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(SyncError::invalid_config(format!("{} must be non-zero", name)));
        }

        if self.queue.max_delay < self.queue.base_delay {
            return Err(SyncError::invalid_config(
                "queue.maxDelay must not be shorter than queue.baseDelay",
            ));
        }
        if self.field_manager.is_empty() {
            return Err(SyncError::invalid_config("fieldManager must not be empty"));
        }
        Ok(())
    }
}
