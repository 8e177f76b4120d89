//! `SessionRegistry` - owns every live session and its task.
//!
//! Sessions are created from dispatched cohorts and reaped lazily: each
//! `create_session` first drops the entries whose task has exited. Once
//! shutdown is requested no new session is created; the cohort is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::types::SessionId;
use futures::future::join_all;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::ServerError;
use crate::lifecycle::LifecycleObserver;
use crate::observability::metrics;
use crate::session::{Cohort, RulesFactory, Session};
use crate::sync::lock;
use crate::waiting_room::WaitingRoom;

struct Entry {
    session: Arc<Session>,
    task: JoinHandle<()>,
}

/// Registry of running sessions.
pub struct SessionRegistry {
    entries: Mutex<Vec<Entry>>,
    waiting_room: Arc<WaitingRoom>,
    rules: RulesFactory,
    check_interval: Duration,
    shutdown_timeout: Duration,
    shutdown_requested: AtomicBool,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(
        waiting_room: Arc<WaitingRoom>,
        rules: RulesFactory,
        check_interval: Duration,
        shutdown_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
            waiting_room,
            rules,
            check_interval,
            shutdown_timeout,
            shutdown_requested: AtomicBool::new(false),
        })
    }

    /// Start a session for `cohort`.
    ///
    /// Returns `None` (dropping the cohort) once shutdown has been requested.
    pub fn create_session(&self, cohort: Cohort) -> Option<SessionId> {
        if self.is_shutdown_requested() {
            metrics::record_cohort_dropped();
            warn!(
                target: "table.registry",
                dropped = cohort.len(),
                "Shutdown requested, discarding cohort"
            );
            return None;
        }

        self.reap();

        let session = Session::new(cohort, Arc::clone(&self.waiting_room), self.check_interval);
        let session_id = session.id();
        let task = tokio::spawn(Arc::clone(&session).run((self.rules)()));

        let live = {
            let mut entries = lock(&self.entries);
            // end_all may have swept the list between the check above and now.
            if self.is_shutdown_requested() {
                session.force_finish();
            }
            entries.push(Entry { session, task });
            entries.len()
        };
        metrics::set_sessions_active(live);

        debug!(target: "table.registry", session_id = %session_id, live, "Session created");
        Some(session_id)
    }

    /// Drop entries whose task has exited. Returns how many were reaped.
    pub fn reap(&self) -> usize {
        let (exited, live) = {
            let mut entries = lock(&self.entries);
            let (exited, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *entries)
                .into_iter()
                .partition(|e| e.task.is_finished());
            *entries = kept;
            (exited, entries.len())
        };

        if exited.is_empty() {
            return 0;
        }

        let reaped = exited.len();
        for entry in exited {
            if entry.session.has_finished() {
                continue;
            }
            metrics::record_session_panic();
            match entry.task.now_or_never() {
                Some(Err(e)) => error!(
                    target: "table.registry",
                    session_id = %entry.session.id(),
                    error = %e,
                    "Session task died before finishing"
                ),
                _ => error!(
                    target: "table.registry",
                    session_id = %entry.session.id(),
                    "Session task exited before finishing"
                ),
            }
        }

        metrics::set_sessions_active(live);
        debug!(target: "table.registry", reaped, live, "Reaped sessions");
        reaped
    }

    /// Request shutdown and force-finish every live session. Does not wait.
    pub fn end_all(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);

        let forced = {
            let entries = lock(&self.entries);
            for entry in entries.iter() {
                entry.session.force_finish();
            }
            entries.len()
        };

        info!(target: "table.registry", forced, "Force-finished all sessions");
    }

    /// Wait up to `timeout` for every session task to exit; abort the rest.
    pub async fn join(&self, timeout: Duration) {
        let tasks: Vec<_> = lock(&self.entries).drain(..).map(|e| e.task).collect();
        if tasks.is_empty() {
            return;
        }

        let count = tasks.len();
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(timeout, join_all(tasks)).await.is_err() {
            warn!(
                target: "table.registry",
                count,
                timeout_ms = timeout.as_millis(),
                "Session tasks did not exit in time, aborting"
            );
            for handle in aborts {
                handle.abort();
            }
        }
        metrics::set_sessions_active(0);
    }

    /// Sessions that have not finished yet.
    #[must_use]
    pub fn live_count(&self) -> usize {
        lock(&self.entries)
            .iter()
            .filter(|e| !e.session.has_finished())
            .count()
    }

    /// Snapshot of every held session, finished or not.
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        lock(&self.entries)
            .iter()
            .map(|e| Arc::clone(&e.session))
            .collect()
    }

    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LifecycleObserver for SessionRegistry {
    fn name(&self) -> &'static str {
        "session_registry"
    }

    async fn start(&self) -> Result<(), ServerError> {
        Ok(())
    }

    async fn end(&self) {
        self.end_all();
        self.join(self.shutdown_timeout).await;
        info!(target: "table.registry", "Session registry stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::participant::Participant;
    use crate::session::{FinishReason, GreetingRules, RulesEngine, Table, TurnOutcome};
    use common::types::ParticipantId;

    const CHECK: Duration = Duration::from_millis(100);

    struct Endless;

    impl RulesEngine for Endless {
        fn on_start(&mut self, _table: &Table) {}

        fn play_turn(&mut self, _table: &Table) -> TurnOutcome {
            TurnOutcome::Continue
        }
    }

    struct Exploding;

    impl RulesEngine for Exploding {
        fn on_start(&mut self, _table: &Table) {}

        fn play_turn(&mut self, _table: &Table) -> TurnOutcome {
            panic!("rules engine failure");
        }
    }

    fn registry_with(room: &Arc<WaitingRoom>, rules: RulesFactory) -> Arc<SessionRegistry> {
        SessionRegistry::new(Arc::clone(room), rules, CHECK, Duration::from_secs(1))
    }

    fn endless() -> RulesFactory {
        Arc::new(|| Box::new(Endless) as Box<dyn RulesEngine>)
    }

    fn cohort(ids: &[u64]) -> Cohort {
        ids.iter()
            .map(|id| Participant::detached(ParticipantId(*id)))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_session_tracks_roster() {
        let room = WaitingRoom::new();
        let registry = registry_with(&room, endless());

        let id = registry.create_session(cohort(&[1, 2, 3])).unwrap();

        let sessions = registry.sessions();
        assert_eq!(sessions.len(), 1);
        let session = sessions.first().unwrap();
        assert_eq!(session.id(), id);
        assert_eq!(
            session.roster_ids(),
            &[ParticipantId(1), ParticipantId(2), ParticipantId(3)]
        );
        assert_eq!(registry.live_count(), 1);

        registry.end().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_all_forces_and_rejects_new_cohorts() {
        let room = WaitingRoom::new();
        let registry = registry_with(&room, endless());
        registry.create_session(cohort(&[1, 2])).unwrap();
        let session = registry.sessions().pop().unwrap();

        registry.end_all();
        assert!(registry.is_shutdown_requested());
        assert!(registry.create_session(cohort(&[3, 4])).is_none());

        registry.join(Duration::from_secs(1)).await;

        assert_eq!(session.reason(), Some(FinishReason::ServerShutdown));
        assert_eq!(room.ids(), vec![ParticipantId(1), ParticipantId(2)]);
        assert!(registry.sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_sessions_are_reaped_on_create() {
        let room = WaitingRoom::new();
        let registry = registry_with(&room, GreetingRules::factory(1));

        registry.create_session(cohort(&[1])).unwrap();
        tokio::time::sleep(CHECK * 2).await;
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.sessions().len(), 1);

        registry.create_session(cohort(&[2])).unwrap();
        let remaining = registry.sessions();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining.first().unwrap().roster_ids(), &[ParticipantId(2)]);

        registry.end().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicked_session_is_reaped() {
        let room = WaitingRoom::new();
        let registry = registry_with(&room, Arc::new(|| Box::new(Exploding) as Box<dyn RulesEngine>));

        registry.create_session(cohort(&[1, 2])).unwrap();
        tokio::time::sleep(CHECK).await;

        assert_eq!(registry.reap(), 1);
        assert!(registry.sessions().is_empty());
        assert!(room.is_empty(), "participants of a crashed session are not returned");
    }
}
