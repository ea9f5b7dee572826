//! Supervised loops
//!
//! Each loop runs in its own task. When it returns an error or panics the
//! cause is sent on the failure channel and the loop is started again
//! after a pause. A loop that returns `Ok` has finished and is not
//! restarted.

use std::any::Any;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};

use crate::error::Result;

/// A loop stopped unexpectedly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopFailure {
    pub name: String,
    pub reason: String,
}

/// Restarts failed loops
pub struct Supervisor {
    restart_backoff: Duration,
    failures: mpsc::UnboundedSender<LoopFailure>,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Create a supervisor and the receiving end of its failure channel
    pub fn new(restart_backoff: Duration) -> (Self, mpsc::UnboundedReceiver<LoopFailure>) {
        let (failures, rx) = mpsc::unbounded_channel();
        let supervisor = Self {
            restart_backoff,
            failures,
            handles: Vec::new(),
        };
        (supervisor, rx)
    }

    /// Run the loop built by `make`, rebuilding it after every failure
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, make: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let failures = self.failures.clone();
        let backoff = self.restart_backoff;

        self.handles.push(tokio::spawn(async move {
            loop {
                let mut task = AbortOnDrop(tokio::spawn(make()));
                let reason = match (&mut task.0).await {
                    Ok(Ok(())) => {
                        info!(name = %name, "loop finished");
                        return;
                    }
                    Ok(Err(e)) => e.to_string(),
                    Err(e) if e.is_cancelled() => {
                        info!(name = %name, "loop cancelled");
                        return;
                    }
                    Err(e) => panic_reason(e),
                };

                error!(name = %name, reason = %reason, "loop failed, restarting");
                // the receiver may be gone
                let _ = failures.send(LoopFailure {
                    name: name.clone(),
                    reason,
                });
                tokio::time::sleep(backoff).await;
            }
        }));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every loop to finish
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }

    /// Stop supervising; running loops are aborted
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Aborting the supervising task also aborts the loop it runs
struct AbortOnDrop(JoinHandle<Result<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_reason(e: JoinError) -> String {
    match e.try_into_panic() {
        Ok(payload) => panic_message(payload.as_ref()),
        Err(e) => e.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_failed_loop_is_restarted() {
        let (mut supervisor, mut failures) = Supervisor::new(Duration::from_secs(1));
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        supervisor.spawn("flaky", move || {
            let counter = Arc::clone(&counter);
            async move {
                match counter.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(SyncError::remote("connection reset")),
                    1 => panic!("worker exploded"),
                    _ => Ok(()),
                }
            }
        });

        let first = failures.recv().await.unwrap();
        assert_eq!(first.name, "flaky");
        assert!(first.reason.contains("connection reset"));

        let second = failures.recv().await.unwrap();
        assert_eq!(second.reason, "panic: worker exploded");

        supervisor.join().await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_finished_loop_is_not_restarted() {
        let (mut supervisor, mut failures) = Supervisor::new(Duration::from_millis(1));
        supervisor.spawn("once", || async { Ok(()) });
        assert_eq!(supervisor.len(), 1);

        supervisor.join().await;
        assert!(failures.try_recv().is_err());
    }
}
