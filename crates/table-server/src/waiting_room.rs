//! `WaitingRoom` - FIFO of participants not currently seated.
//!
//! Newly accepted participants and the survivors of finished sessions are
//! pushed here; the matchmaker drains it. Every mutation happens under one
//! lock, and a push wakes one blocked `wait_pop`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::types::ParticipantId;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::closure::ClosureObserver;
use crate::errors::ServerError;
use crate::invariant::{abort_on_violation, InvariantViolation};
use crate::lifecycle::LifecycleObserver;
use crate::observability::metrics;
use crate::participant::Participant;
use crate::protocol::ServerMessage;
use crate::sync::lock;

const COMPONENT: &str = "waiting_room";

/// Shared queue of unassigned participants.
#[derive(Debug, Default)]
pub struct WaitingRoom {
    queue: Mutex<VecDeque<Arc<Participant>>>,
    available: Notify,
}

impl WaitingRoom {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append `participant` and wake one waiter.
    ///
    /// The participant is told its 1-based queue position.
    pub fn push(&self, participant: Arc<Participant>) {
        let position = {
            let mut queue = lock(&self.queue);
            queue.push_back(Arc::clone(&participant));
            queue.len()
        };
        self.available.notify_one();
        metrics::set_waiting_room_depth(position);

        debug!(
            target: "table.waiting_room",
            participant_id = %participant.id(),
            position,
            "Participant queued"
        );
        participant.send(ServerMessage::Waiting { position });
    }

    /// Remove the oldest participant, if any.
    pub fn try_pop(&self) -> Option<Arc<Participant>> {
        let (participant, depth) = {
            let mut queue = lock(&self.queue);
            (queue.pop_front(), queue.len())
        };
        if participant.is_some() {
            metrics::set_waiting_room_depth(depth);
        }
        participant
    }

    /// Remove the oldest participant, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` when the timeout elapses with the room still empty.
    pub async fn wait_pop(&self, timeout: Duration) -> Option<Arc<Participant>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a push between the check
            // and the await is not missed.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(participant) = self.try_pop() {
                return Some(participant);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Remove every entry with `id` whose closed flag is set.
    ///
    /// Nothing is removed if a matching entry is still open; that case is
    /// reported as a violation instead.
    pub fn purge_closed(&self, id: ParticipantId) -> Result<usize, InvariantViolation> {
        let (removed, depth) = {
            let mut queue = lock(&self.queue);
            if queue.iter().any(|p| p.id() == id && !p.is_closed()) {
                return Err(InvariantViolation::ClosedFlagNotSet {
                    component: COMPONENT,
                    id,
                });
            }
            let before = queue.len();
            queue.retain(|p| p.id() != id);
            (before - queue.len(), queue.len())
        };
        if removed > 0 {
            metrics::set_waiting_room_depth(depth);
        }
        Ok(removed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    /// Snapshot of the queued ids, oldest first.
    #[must_use]
    pub fn ids(&self) -> Vec<ParticipantId> {
        lock(&self.queue).iter().map(|p| p.id()).collect()
    }

    /// Remove and return everything, oldest first.
    pub fn drain(&self) -> Vec<Arc<Participant>> {
        let drained: Vec<_> = lock(&self.queue).drain(..).collect();
        metrics::set_waiting_room_depth(0);
        drained
    }
}

impl ClosureObserver for WaitingRoom {
    fn on_connection_closed(&self, id: ParticipantId) -> usize {
        match self.purge_closed(id) {
            Ok(removed) => {
                if removed > 0 {
                    metrics::record_disconnect_purges(COMPONENT, removed);
                    debug!(
                        target: "table.waiting_room",
                        participant_id = %id,
                        removed,
                        "Purged disconnected participant"
                    );
                }
                removed
            }
            Err(violation) => abort_on_violation(&violation),
        }
    }
}

#[async_trait]
impl LifecycleObserver for WaitingRoom {
    fn name(&self) -> &'static str {
        COMPONENT
    }

    async fn start(&self) -> Result<(), ServerError> {
        Ok(())
    }

    async fn end(&self) {
        let dropped = self.drain().len();
        info!(target: "table.waiting_room", dropped, "Waiting room stopped");
    }
}
