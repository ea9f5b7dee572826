//! Rate-limited work queue
//!
//! Semantics follow the controller work queue:
//! - an item queued twice before it is taken is handed out once
//! - an item is never handed out while it is being processed; adding it
//!   meanwhile re-queues it when processing is [`done`](WorkQueue::done)
//! - an item backing off after a failure is not handed out until its delay
//!   elapses, even if it is added again meanwhile
//!
//! Backoff is exponential per item, `base * 2^failures` capped at `max`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

use crate::config::QueueConfig;

/// Queue item carrying a service id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncItem(pub String);

/// Queue item carrying a gate id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GateItem(pub String);

impl SyncItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl GateItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for GateItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exponential per-item failure backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    /// Delay after the `failures`-th consecutive failure (0-based)
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }
}

impl From<&QueueConfig> for Backoff {
    fn from(config: &QueueConfig) -> Self {
        Self {
            base: config.base_delay,
            max: config.max_delay,
        }
    }
}

struct QueueState<T> {
    queue: VecDeque<T>,
    /// Queued or waiting to be re-queued after processing
    dirty: HashSet<T>,
    processing: HashSet<T>,
    /// Backing off, scheduled to be added later
    waiting: HashSet<T>,
    failures: HashMap<T, u32>,
    shutting_down: bool,
}

struct Inner<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    backoff: Backoff,
}

/// Deduplicating work queue with per-item backoff
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    pub fn new(backoff: Backoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    waiting: HashSet::new(),
                    failures: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                backoff,
            }),
        }
    }

    pub fn add(&self, item: T) {
        let mut state = self.lock();
        if state.shutting_down || state.waiting.contains(&item) {
            return;
        }
        self.enqueue(&mut state, item);
    }

    fn enqueue(&self, state: &mut QueueState<T>, item: T) {
        if !state.dirty.insert(item.clone()) {
            return;
        }
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        self.inner.notify.notify_one();
    }

    /// Add after a delay
    pub fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }

        {
            let mut state = self.lock();
            if state.shutting_down || !state.waiting.insert(item.clone()) {
                return;
            }
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = queue.lock();
            state.waiting.remove(&item);
            if !state.shutting_down {
                queue.enqueue(&mut state, item);
            }
        });
    }

    /// Add after the item's next backoff delay
    pub fn add_rate_limited(&self, item: T) {
        let delay = {
            let mut state = self.lock();
            let failures = state.failures.entry(item.clone()).or_insert(0);
            let delay = self.inner.backoff.delay(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        self.add_after(item, delay);
    }

    /// Reset the failure count of an item
    pub fn forget(&self, item: &T) {
        self.lock().failures.remove(item);
    }

    pub fn num_requeues(&self, item: &T) -> u32 {
        self.lock().failures.get(item).copied().unwrap_or(0)
    }

    /// Wait for the next item; `None` once the queue is shut down and drained
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark processing of an item finished
    pub fn done(&self, item: &T) {
        let mut state = self.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            self.inner.notify.notify_one();
        }
    }

    /// Guard calling [`WorkQueue::done`] when dropped, even while unwinding
    pub fn in_flight(&self, item: &T) -> InFlight<'_, T> {
        InFlight {
            queue: self,
            item: item.clone(),
        }
    }

    /// Stop accepting items and wake every waiting consumer
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Items ready to be handed out
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// An item handed out by [`WorkQueue::get`] and not yet done
pub struct InFlight<'a, T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    queue: &'a WorkQueue<T>,
    item: T,
}

impl<T> Drop for InFlight<'_, T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    fn drop(&mut self) {
        self.queue.done(&self.item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> WorkQueue<SyncItem> {
        WorkQueue::new(Backoff {
            base: Duration::from_millis(5),
            max: Duration::from_secs(1000),
        })
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff {
            base: Duration::from_millis(5),
            max: Duration::from_secs(1000),
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(5));
        assert_eq!(backoff.delay(1), Duration::from_millis(10));
        assert_eq!(backoff.delay(3), Duration::from_millis(40));
        assert_eq!(backoff.delay(40), Duration::from_secs(1000));
    }

    #[tokio::test]
    async fn test_duplicates_are_collapsed() {
        let queue = queue();
        queue.add(SyncItem::new("a"));
        queue.add(SyncItem::new("a"));
        queue.add(SyncItem::new("b"));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get().await, Some(SyncItem::new("a")));
        assert_eq!(queue.get().await, Some(SyncItem::new("b")));
    }

    #[tokio::test]
    async fn test_in_flight_item_is_requeued_on_done() {
        let queue = queue();
        queue.add(SyncItem::new("a"));
        let item = queue.get().await.unwrap();

        queue.add(SyncItem::new("a"));
        assert!(queue.is_empty());

        queue.done(&item);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_guard_releases_item_on_panic() {
        let queue = queue();
        queue.add(SyncItem::new("a"));
        let item = queue.get().await.unwrap();

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _in_flight = queue.in_flight(&item);
            panic!("pass failed");
        }));
        assert!(unwound.is_err());

        queue.add(SyncItem::new("a"));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backing_off_item_is_held_back() {
        let queue = queue();
        let item = SyncItem::new("a");

        queue.add_rate_limited(item.clone());
        queue.add_rate_limited(item.clone());
        queue.add(item.clone());
        assert!(queue.is_empty());
        assert_eq!(queue.num_requeues(&item), 2);

        tokio::time::sleep(Duration::from_millis(6)).await;
        assert_eq!(queue.len(), 1);

        queue.forget(&item);
        assert_eq!(queue.num_requeues(&item), 0);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_consumers() {
        let queue = queue();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };

        tokio::task::yield_now().await;
        queue.shut_down();
        assert_eq!(consumer.await.unwrap(), None);

        queue.add(SyncItem::new("late"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_get_waits_for_add() {
        let queue = queue();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };

        tokio::task::yield_now().await;
        queue.add(SyncItem::new("a"));
        assert_eq!(consumer.await.unwrap(), Some(SyncItem::new("a")));
    }
}
