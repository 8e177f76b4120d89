//! `Matchmaker` - assembles cohorts from the waiting room.
//!
//! One worker task repeatedly pops the waiting room with a bounded wait,
//! appends to a buffer and, once the buffer holds a full cohort, hands it to
//! the session registry in arrival order.
//!
//! The buffer has its own lock. The waiting room's lock is released by the
//! pop before the buffer lock is taken, and the buffer lock is released
//! before the registry is called, so no two core locks are ever held at once.
//!
//! On shutdown, participants still in the buffer are dropped rather than
//! returned to the waiting room; the whole server is going away.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::types::ParticipantId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::closure::ClosureObserver;
use crate::errors::ServerError;
use crate::invariant::{abort_on_violation, InvariantViolation};
use crate::lifecycle::LifecycleObserver;
use crate::observability::metrics;
use crate::participant::Participant;
use crate::registry::SessionRegistry;
use crate::session::Cohort;
use crate::sync::lock;
use crate::waiting_room::WaitingRoom;

const COMPONENT: &str = "matchmaker";

/// State shared between the handle and the worker task.
struct Assembly {
    waiting_room: Arc<WaitingRoom>,
    registry: Arc<SessionRegistry>,
    cohort_size: usize,
    poll_interval: Duration,
    buffer: Mutex<Cohort>,
}

impl Assembly {
    /// Buffer `participant`; returns a full cohort when this completes one.
    fn admit(&self, participant: Arc<Participant>) -> Option<Cohort> {
        let mut buffer = lock(&self.buffer);

        // Checked under the buffer lock: a disconnect that lands after this
        // point is purged from the buffer by `purge_closed`.
        if participant.is_closed() {
            debug!(
                target: "table.matchmaker",
                participant_id = %participant.id(),
                "Discarding participant that disconnected while being drained"
            );
            return None;
        }

        buffer.push(participant);

        // A buffered member may have closed without its notification having
        // arrived yet. Never seal it into a cohort.
        buffer.retain(|p| {
            let closed = p.is_closed();
            if closed {
                debug!(
                    target: "table.matchmaker",
                    participant_id = %p.id(),
                    "Discarding buffered participant that disconnected"
                );
            }
            !closed
        });

        if buffer.len() >= self.cohort_size {
            Some(std::mem::take(&mut *buffer))
        } else {
            None
        }
    }

    fn dispatch(&self, cohort: Cohort) {
        let roster: Vec<ParticipantId> = cohort.iter().map(|p| p.id()).collect();
        match self.registry.create_session(cohort) {
            Some(session_id) => {
                metrics::record_cohort_dispatched();
                info!(
                    target: "table.matchmaker",
                    session_id = %session_id,
                    roster = ?roster,
                    "Cohort dispatched"
                );
            }
            None => {
                warn!(
                    target: "table.matchmaker",
                    roster = ?roster,
                    "Cohort dropped, registry is shutting down"
                );
            }
        }
    }

    fn purge_closed(&self, id: ParticipantId) -> Result<usize, InvariantViolation> {
        let mut buffer = lock(&self.buffer);
        if buffer.iter().any(|p| p.id() == id && !p.is_closed()) {
            return Err(InvariantViolation::ClosedFlagNotSet {
                component: COMPONENT,
                id,
            });
        }
        let before = buffer.len();
        buffer.retain(|p| p.id() != id);
        Ok(before - buffer.len())
    }
}

/// Cohort assembly worker.
pub struct Matchmaker {
    assembly: Arc<Assembly>,
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl Matchmaker {
    #[must_use]
    pub fn new(
        waiting_room: Arc<WaitingRoom>,
        registry: Arc<SessionRegistry>,
        cohort_size: usize,
        poll_interval: Duration,
        shutdown_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            assembly: Arc::new(Assembly {
                waiting_room,
                registry,
                cohort_size: cohort_size.max(1),
                poll_interval,
                buffer: Mutex::new(Vec::new()),
            }),
            cancel: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
            shutdown_timeout,
        })
    }

    /// Spawn the worker. A no-op while it is already running.
    ///
    /// After [`Matchmaker::stop`] this starts a fresh worker.
    pub fn spawn(&self) {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let token = {
            let mut cancel = lock(&self.cancel);
            if cancel.is_cancelled() {
                *cancel = CancellationToken::new();
            }
            cancel.clone()
        };
        *task = Some(tokio::spawn(run(Arc::clone(&self.assembly), token)));
    }

    /// Whether the worker task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.task).as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Snapshot of buffered ids, in arrival order.
    #[must_use]
    pub fn buffered_ids(&self) -> Vec<ParticipantId> {
        lock(&self.assembly.buffer).iter().map(|p| p.id()).collect()
    }

    /// Stop the worker, wait for it within the shutdown timeout, and drop the
    /// undispatched buffer.
    pub async fn stop(&self) {
        lock(&self.cancel).cancel();

        let task = lock(&self.task).take();
        if let Some(task) = task {
            let abort = task.abort_handle();
            if tokio::time::timeout(self.shutdown_timeout, task).await.is_err() {
                warn!(
                    target: "table.matchmaker",
                    timeout_ms = self.shutdown_timeout.as_millis(),
                    "Matchmaker did not stop in time, aborting"
                );
                abort.abort();
            }
        }

        let dropped = std::mem::take(&mut *lock(&self.assembly.buffer));
        if !dropped.is_empty() {
            let ids: Vec<ParticipantId> = dropped.iter().map(|p| p.id()).collect();
            warn!(
                target: "table.matchmaker",
                dropped = ?ids,
                "Dropping undispatched participants at shutdown"
            );
        }
    }
}

#[instrument(skip_all, name = "table.matchmaker")]
async fn run(assembly: Arc<Assembly>, cancel: CancellationToken) {
    info!(
        target: "table.matchmaker",
        cohort_size = assembly.cohort_size,
        "Matchmaker started"
    );

    loop {
        let popped = tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            popped = assembly.waiting_room.wait_pop(assembly.poll_interval) => popped,
        };

        let Some(participant) = popped else {
            continue;
        };

        if let Some(cohort) = assembly.admit(participant) {
            assembly.dispatch(cohort);
        }
    }

    info!(target: "table.matchmaker", "Matchmaker stopped");
}

impl ClosureObserver for Matchmaker {
    fn on_connection_closed(&self, id: ParticipantId) -> usize {
        match self.assembly.purge_closed(id) {
            Ok(removed) => {
                if removed > 0 {
                    metrics::record_disconnect_purges(COMPONENT, removed);
                    debug!(
                        target: "table.matchmaker",
                        participant_id = %id,
                        removed,
                        "Purged disconnected participant from buffer"
                    );
                }
                removed
            }
            Err(violation) => abort_on_violation(&violation),
        }
    }
}

#[async_trait]
impl LifecycleObserver for Matchmaker {
    fn name(&self) -> &'static str {
        COMPONENT
    }

    async fn start(&self) -> Result<(), ServerError> {
        self.spawn();
        Ok(())
    }

    async fn end(&self) {
        self.stop().await;
    }
}
