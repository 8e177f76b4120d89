//! Startup/shutdown sequencing.
//!
//! Every long-lived component registers with the [`LifecycleHub`] once it is
//! built. `start_all` walks the registrations in order; `end_all` walks them in
//! reverse, so a component is always torn down before anything it depends on.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::errors::ServerError;
use crate::sync::lock;

/// A component with a start/end lifecycle.
#[async_trait]
pub trait LifecycleObserver: Send + Sync {
    /// Short component name used in logs.
    fn name(&self) -> &'static str;

    /// Bring the component up. An error aborts startup.
    async fn start(&self) -> Result<(), ServerError>;

    /// Tear the component down. Must tolerate being called without `start`.
    async fn end(&self);
}

/// Ordered set of lifecycle observers.
#[derive(Default)]
pub struct LifecycleHub {
    observers: Mutex<Vec<Arc<dyn LifecycleObserver>>>,
}

impl LifecycleHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `observer` to the registration order.
    pub fn register(&self, observer: Arc<dyn LifecycleObserver>) {
        debug!(target: "table.lifecycle", component = observer.name(), "Registered");
        lock(&self.observers).push(observer);
    }

    /// Remove `observer` (matched by identity). Returns whether it was registered.
    pub fn deregister(&self, observer: &Arc<dyn LifecycleObserver>) -> bool {
        let mut observers = lock(&self.observers);
        let before = observers.len();
        observers.retain(|o| !Arc::ptr_eq(o, observer));
        before != observers.len()
    }

    /// Registered component names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        lock(&self.observers).iter().map(|o| o.name()).collect()
    }

    fn snapshot(&self) -> Vec<Arc<dyn LifecycleObserver>> {
        lock(&self.observers).clone()
    }

    /// Start every observer in registration order.
    ///
    /// Stops at the first failure and returns it. Observers already started
    /// are left running; the caller is expected to follow up with `end_all`.
    pub async fn start_all(&self) -> Result<(), ServerError> {
        for observer in self.snapshot() {
            if let Err(e) = observer.start().await {
                error!(
                    target: "table.lifecycle",
                    component = observer.name(),
                    error = %e,
                    "Component failed to start"
                );
                return Err(e);
            }
            info!(target: "table.lifecycle", component = observer.name(), "Component started");
        }
        Ok(())
    }

    /// End every observer in reverse registration order.
    pub async fn end_all(&self) {
        for observer in self.snapshot().into_iter().rev() {
            observer.end().await;
            info!(target: "table.lifecycle", component = observer.name(), "Component ended");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Step {
        name: &'static str,
        journal: Journal,
        fail_start: bool,
    }

    impl Step {
        fn new(name: &'static str, journal: &Journal) -> Arc<Self> {
            Arc::new(Self {
                name,
                journal: Arc::clone(journal),
                fail_start: false,
            })
        }
    }

    #[async_trait]
    impl LifecycleObserver for Step {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn start(&self) -> Result<(), ServerError> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("start:{}", self.name));
            if self.fail_start {
                return Err(ServerError::Internal(format!("{} refused", self.name)));
            }
            Ok(())
        }

        async fn end(&self) {
            self.journal.lock().unwrap().push(format!("end:{}", self.name));
        }
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_start_forward_end_reverse() {
        let journal = Journal::default();
        let hub = LifecycleHub::new();
        hub.register(Step::new("a", &journal));
        hub.register(Step::new("b", &journal));
        hub.register(Step::new("c", &journal));

        hub.start_all().await.unwrap();
        hub.end_all().await;

        assert_eq!(
            entries(&journal),
            vec!["start:a", "start:b", "start:c", "end:c", "end:b", "end:a"]
        );
    }

    #[tokio::test]
    async fn test_start_stops_at_first_failure() {
        let journal = Journal::default();
        let hub = LifecycleHub::new();
        hub.register(Step::new("a", &journal));
        hub.register(Arc::new(Step {
            name: "b",
            journal: Arc::clone(&journal),
            fail_start: true,
        }));
        hub.register(Step::new("c", &journal));

        let result = hub.start_all().await;

        assert!(matches!(result, Err(ServerError::Internal(msg)) if msg == "b refused"));
        assert_eq!(entries(&journal), vec!["start:a", "start:b"]);
    }

    #[tokio::test]
    async fn test_deregister_removes_by_identity() {
        let journal = Journal::default();
        let hub = LifecycleHub::new();
        let a: Arc<dyn LifecycleObserver> = Step::new("a", &journal);
        let b: Arc<dyn LifecycleObserver> = Step::new("b", &journal);
        hub.register(Arc::clone(&a));
        hub.register(Arc::clone(&b));

        assert!(hub.deregister(&a));
        assert!(!hub.deregister(&a));
        assert_eq!(hub.names(), vec!["b"]);

        hub.end_all().await;
        assert_eq!(entries(&journal), vec!["end:b"]);
    }
}
