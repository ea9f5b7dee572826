//! Background refresh lifecycle for the discovery cache

use metrics::{counter, histogram};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::DiscoveryCache;
use crate::error::{DiscoveryError, Result};

/// Default and minimum interval between refreshes
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

const STOP_CAUSE: &str = "stop called on discovery cache manager";

/// Periodically refreshes a [`DiscoveryCache`]
pub struct DiscoveryManager {
    cache: Arc<DiscoveryCache>,
    refresh_interval: Duration,
    state: Mutex<ManagerState>,
}

#[derive(Default)]
struct ManagerState {
    started: bool,
    stop: Option<watch::Sender<Option<String>>>,
}

impl DiscoveryManager {
    pub fn new(cache: Arc<DiscoveryCache>) -> Self {
        Self {
            cache,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Set the refresh interval; shorter values are clamped to the default
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        if interval < DEFAULT_REFRESH_INTERVAL {
            info!(
                requested = ?interval,
                minimum = ?DEFAULT_REFRESH_INTERVAL,
                "refresh interval is too short, using the minimum"
            );
            self.refresh_interval = DEFAULT_REFRESH_INTERVAL;
        } else {
            self.refresh_interval = interval;
        }
        self
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn cache(&self) -> &Arc<DiscoveryCache> {
        &self.cache
    }

    pub fn is_started(&self) -> bool {
        self.lock_state().started
    }

    /// Start refreshing
    ///
    /// The first refresh runs before this returns. Refresh failures are
    /// logged and counted but never stop the loop. Calling `start` on a
    /// running manager is an error.
    pub async fn start(&self) -> Result<()> {
        let stop_rx = {
            let mut state = self.lock_state();
            if state.started {
                return Err(DiscoveryError::AlreadyStarted);
            }
            let (stop_tx, stop_rx) = watch::channel(None);
            state.started = true;
            state.stop = Some(stop_tx);
            stop_rx
        };

        info!(refresh_interval = ?self.refresh_interval, "starting discovery cache manager");
        refresh_once(&self.cache).await;

        tokio::spawn(refresh_loop(
            Arc::clone(&self.cache),
            self.refresh_interval,
            stop_rx,
        ));
        Ok(())
    }

    /// Stop refreshing; the manager may be started again afterwards
    pub fn stop(&self) {
        let mut state = self.lock_state();
        if !state.started {
            return;
        }

        if let Some(stop) = state.stop.take() {
            let _ = stop.send(Some(STOP_CAUSE.to_string()));
        }
        state.started = false;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for DiscoveryManager {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn refresh_loop(
    cache: Arc<DiscoveryCache>,
    interval: Duration,
    mut stop: watch::Receiver<Option<String>>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately and the initial refresh already ran
    ticker.tick().await;

    let signalled = loop {
        tokio::select! {
            _ = ticker.tick() => refresh_once(&cache).await,
            changed = stop.changed() => break changed.is_ok(),
        }
    };

    let cause = if signalled {
        stop.borrow().clone().unwrap_or_default()
    } else {
        "manager dropped".to_string()
    };
    info!(cause = %cause, "discovery cache manager stopped");
}

async fn refresh_once(cache: &DiscoveryCache) {
    let started = Instant::now();
    let result = cache.refresh().await;
    histogram!(
        "discovery_refresh_ms",
        started.elapsed().as_secs_f64() * 1000.0
    );

    match result {
        Ok(()) => {
            counter!("discovery_refresh_total", 1u64, "result" => "success");
            debug!("discovery cache refreshed");
        }
        Err(e) => {
            counter!("discovery_refresh_total", 1u64, "result" => "error");
            warn!(error = %e, "failed to refresh discovery cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiResourceInfo, ApiResourceList};
    use crate::mock::MockDiscoveryClient;
    use sherpack_core::GroupVersion;

    fn setup() -> (MockDiscoveryClient, DiscoveryManager) {
        let mock = MockDiscoveryClient::with_resources(vec![ApiResourceList {
            group_version: GroupVersion::new("", "v1"),
            resources: vec![ApiResourceInfo::new("configmaps", "ConfigMap", true)],
        }]);
        let cache = Arc::new(DiscoveryCache::new(
            Arc::new(mock.clone()),
            Arc::new(mock.clone()),
        ));
        (mock, DiscoveryManager::new(cache))
    }

    #[test]
    fn test_refresh_interval_is_clamped() {
        let (_, manager) = setup();
        let manager = manager.with_refresh_interval(Duration::from_secs(1));
        assert_eq!(manager.refresh_interval(), DEFAULT_REFRESH_INTERVAL);

        let (_, manager) = setup();
        let manager = manager.with_refresh_interval(Duration::from_secs(600));
        assert_eq!(manager.refresh_interval(), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_start_refreshes_synchronously() {
        let (mock, manager) = setup();

        manager.start().await.unwrap();

        assert!(manager.is_started());
        assert_eq!(mock.call_counts().server_resources, 1);
        assert_eq!(manager.cache().kinds().len(), 1);
        manager.stop();
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let (_, manager) = setup();
        manager.start().await.unwrap();

        let result = manager.start().await;
        assert!(matches!(result, Err(DiscoveryError::AlreadyStarted)));
        manager.stop();
    }

    #[tokio::test]
    async fn test_stop_allows_restart() {
        let (mock, manager) = setup();
        manager.start().await.unwrap();
        manager.stop();
        assert!(!manager.is_started());

        manager.start().await.unwrap();
        assert_eq!(mock.call_counts().server_resources, 2);
        manager.stop();
    }

    #[tokio::test]
    async fn test_refresh_errors_do_not_fail_start() {
        let (mock, manager) = setup();
        mock.set_query_failure(true);

        manager.start().await.unwrap();
        assert!(manager.cache().kinds().is_empty());
        manager.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_refreshes_on_interval() {
        let (mock, manager) = setup();
        manager.start().await.unwrap();

        tokio::time::sleep(DEFAULT_REFRESH_INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(mock.call_counts().server_resources, 2);

        manager.stop();
        tokio::time::sleep(DEFAULT_REFRESH_INTERVAL * 2).await;
        assert_eq!(mock.call_counts().server_resources, 2);
    }
}
