//! `ClosureHub` - fan-out of disconnect notifications.
//!
//! The transport reports each closed connection exactly once. The hub
//! synchronously invokes every subscribed observer with the participant id;
//! each observer decides whether the id is one it currently holds.
//!
//! Delivery and subscriber-list mutation are serialized by a single lock.
//! An observer must therefore never drop its own `ClosureSubscription` from
//! inside `on_connection_closed` (the unsubscribe would wait on the lock the
//! hub is holding for the delivery).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use common::types::ParticipantId;
use tracing::{debug, info};

use crate::errors::ServerError;
use crate::lifecycle::LifecycleObserver;
use crate::sync::lock;

/// Receives disconnect notifications from the hub.
pub trait ClosureObserver: Send + Sync {
    /// Purge every held entry for `id`. Returns the number removed.
    fn on_connection_closed(&self, id: ParticipantId) -> usize;
}

struct Subscriber {
    key: u64,
    observer: Arc<dyn ClosureObserver>,
}

/// Publish/subscribe registry of disconnect observers.
#[derive(Default)]
pub struct ClosureHub {
    subscribers: Mutex<Vec<Subscriber>>,
    next_key: AtomicU64,
}

impl ClosureHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribe `observer`. It stays subscribed until the returned guard is dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(self: &Arc<Self>, observer: Arc<dyn ClosureObserver>) -> ClosureSubscription {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        lock(&self.subscribers).push(Subscriber { key, observer });

        debug!(target: "table.closure", key, "Closure observer subscribed");

        ClosureSubscription {
            hub: Arc::downgrade(self),
            key,
        }
    }

    fn unsubscribe(&self, key: u64) {
        lock(&self.subscribers).retain(|s| s.key != key);
        debug!(target: "table.closure", key, "Closure observer unsubscribed");
    }

    /// Deliver a disconnect for `id` to every subscriber.
    ///
    /// Returns the total number of entries the observers reported removed.
    /// An id nobody holds is a silent no-op.
    pub fn notify(&self, id: ParticipantId) -> usize {
        let subscribers = lock(&self.subscribers);
        let removed: usize = subscribers
            .iter()
            .map(|s| s.observer.on_connection_closed(id))
            .sum();

        debug!(
            target: "table.closure",
            participant_id = %id,
            observers = subscribers.len(),
            removed,
            "Disconnect delivered"
        );

        removed
    }

    /// Number of current subscribers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

#[async_trait]
impl LifecycleObserver for ClosureHub {
    fn name(&self) -> &'static str {
        "closure_hub"
    }

    async fn start(&self) -> Result<(), ServerError> {
        Ok(())
    }

    async fn end(&self) {
        let cleared = {
            let mut subscribers = lock(&self.subscribers);
            let count = subscribers.len();
            subscribers.clear();
            count
        };
        info!(target: "table.closure", cleared, "Closure hub stopped");
    }
}

/// Scoped subscription; unsubscribes when dropped.
#[derive(Debug)]
pub struct ClosureSubscription {
    hub: Weak<ClosureHub>,
    key: u64,
}

impl ClosureSubscription {
    /// Unsubscribe now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ClosureSubscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.key);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    /// Records every id it is notified about and claims `removes` entries each time.
    struct Recorder {
        seen: Mutex<Vec<ParticipantId>>,
        removes: usize,
    }

    impl Recorder {
        fn new(removes: usize) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                removes,
            })
        }

        fn seen(&self) -> Vec<ParticipantId> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl ClosureObserver for Recorder {
        fn on_connection_closed(&self, id: ParticipantId) -> usize {
            self.seen.lock().unwrap().push(id);
            self.removes
        }
    }

    #[test]
    fn test_notify_fans_out_to_all_observers() {
        let hub = ClosureHub::new();
        let first = Recorder::new(1);
        let second = Recorder::new(0);

        let _a = hub.subscribe(first.clone());
        let _b = hub.subscribe(second.clone());

        let removed = hub.notify(ParticipantId(7));

        assert_eq!(removed, 1);
        assert_eq!(first.seen(), vec![ParticipantId(7)]);
        assert_eq!(second.seen(), vec![ParticipantId(7)]);
    }

    #[test]
    fn test_notify_without_observers_is_noop() {
        let hub = ClosureHub::new();
        assert_eq!(hub.notify(ParticipantId(1)), 0);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let hub = ClosureHub::new();
        let recorder = Recorder::new(1);

        let subscription = hub.subscribe(recorder.clone());
        assert_eq!(hub.observer_count(), 1);

        subscription.unsubscribe();
        assert_eq!(hub.observer_count(), 0);

        hub.notify(ParticipantId(3));
        assert!(recorder.seen().is_empty());
    }

    #[test]
    fn test_subscription_outliving_hub_is_harmless() {
        let hub = ClosureHub::new();
        let subscription = hub.subscribe(Recorder::new(0));
        drop(hub);
        drop(subscription);
    }

    #[tokio::test]
    async fn test_end_clears_subscribers() {
        let hub = ClosureHub::new();
        let recorder = Recorder::new(1);
        let _subscription = hub.subscribe(recorder.clone());

        hub.end().await;

        assert_eq!(hub.observer_count(), 0);
        assert_eq!(hub.notify(ParticipantId(5)), 0);
        assert!(recorder.seen().is_empty());
    }
}
