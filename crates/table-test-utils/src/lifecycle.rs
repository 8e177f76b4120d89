//! Lifecycle observer that records the calls it receives.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use table_server::errors::ServerError;
use table_server::lifecycle::LifecycleObserver;

/// Shared, ordered record of `start:<name>` / `end:<name>` entries.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub struct RecordingObserver {
    name: &'static str,
    journal: Journal,
    fail_start: bool,
}

impl RecordingObserver {
    #[must_use]
    pub fn new(name: &'static str, journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            name,
            journal: Arc::clone(journal),
            fail_start: false,
        })
    }

    /// An observer whose `start` fails with `ServerError::Internal`.
    #[must_use]
    pub fn failing(name: &'static str, journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            name,
            journal: Arc::clone(journal),
            fail_start: true,
        })
    }
}

#[async_trait]
impl LifecycleObserver for RecordingObserver {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn start(&self) -> Result<(), ServerError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("start:{}", self.name));
        if self.fail_start {
            return Err(ServerError::Internal(format!("{} failed to start", self.name)));
        }
        Ok(())
    }

    async fn end(&self) {
        self.journal.lock().unwrap().push(format!("end:{}", self.name));
    }
}

/// Snapshot of a journal.
#[must_use]
pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}
