//! Change notifications for the discovery cache
//!
//! Observers are called synchronously, in registration order, on the task
//! that mutated the cache. They must not block.

use sherpack_core::{GroupVersion, GroupVersionKind, GroupVersionResource};
use std::sync::{Arc, RwLock};

/// A single membership change in the discovery snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    GroupVersionAdded(GroupVersion),
    GroupVersionDeleted(GroupVersion),
    KindAdded(GroupVersionKind),
    KindDeleted(GroupVersionKind),
    ResourceAdded(GroupVersionResource),
    ResourceDeleted(GroupVersionResource),
}

impl DiscoveryEvent {
    pub fn is_deletion(&self) -> bool {
        matches!(
            self,
            Self::GroupVersionDeleted(_) | Self::KindDeleted(_) | Self::ResourceDeleted(_)
        )
    }
}

/// Receives discovery events
pub trait DiscoveryObserver: Send + Sync {
    fn on_event(&self, event: &DiscoveryEvent);
}

impl<F> DiscoveryObserver for F
where
    F: Fn(&DiscoveryEvent) + Send + Sync,
{
    fn on_event(&self, event: &DiscoveryEvent) {
        self(event)
    }
}

/// Append-only list of observers
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<Arc<dyn DiscoveryObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn DiscoveryObserver>) {
        if let Ok(mut observers) = self.observers.write() {
            observers.push(observer);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver events in order to every observer in registration order
    pub fn notify(&self, events: &[DiscoveryEvent]) {
        if events.is_empty() {
            return;
        }
        // Snapshot so observers may register further observers without deadlocking
        let observers: Vec<_> = match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(_) => return,
        };
        for event in events {
            for observer in &observers {
                observer.on_event(event);
            }
        }
    }
}
