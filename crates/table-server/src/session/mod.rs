//! `Session` - one running game over a cohort.
//!
//! A session is driven by a single task (`Session::run`). Every check
//! interval it looks at the force-finish token and the roster's closed flags,
//! then lets the rules engine play a turn. Whichever comes first of a forced
//! finish, a departed member or the game concluding moves it to `Finishing`.
//!
//! Finishing returns every still-open member to the waiting room, in roster
//! order, exactly once. Closed members are simply released.

pub mod rules;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::types::{ParticipantId, SessionId};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::observability::metrics;
use crate::participant::Participant;
use crate::protocol::ServerMessage;
use crate::sync::lock;
use crate::waiting_room::WaitingRoom;

pub use rules::{GreetingRules, RulesEngine, RulesFactory, Table, TurnOutcome};

/// Participants seated together, in arrival order.
pub type Cohort = Vec<Arc<Participant>>;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Normal,
    ServerShutdown,
    ParticipantLeft,
}

impl FinishReason {
    /// Human-readable text sent to participants.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            FinishReason::Normal => "The game has finished normally",
            FinishReason::ServerShutdown => "The server has forced the game to finish",
            FinishReason::ParticipantLeft => "A player has left",
        }
    }

    /// Bounded metric/log label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Normal => "normal",
            FinishReason::ServerShutdown => "server_shutdown",
            FinishReason::ParticipantLeft => "participant_left",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishState {
    NotFinished,
    Finishing,
    Finished,
}

impl FinishState {
    const fn as_u8(self) -> u8 {
        match self {
            FinishState::NotFinished => 0,
            FinishState::Finishing => 1,
            FinishState::Finished => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => FinishState::NotFinished,
            1 => FinishState::Finishing,
            _ => FinishState::Finished,
        }
    }
}

/// A running game instance.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    roster_ids: Vec<ParticipantId>,
    /// Emptied once, by `finish`.
    roster: Mutex<Cohort>,
    state: AtomicU8,
    reason: Mutex<Option<FinishReason>>,
    force: CancellationToken,
    waiting_room: Arc<WaitingRoom>,
    check_interval: Duration,
    created_at: DateTime<Utc>,
}

impl Session {
    /// Take ownership of `cohort`. Survivors go back to `waiting_room`.
    #[must_use]
    pub fn new(cohort: Cohort, waiting_room: Arc<WaitingRoom>, check_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: SessionId::new(),
            roster_ids: cohort.iter().map(|p| p.id()).collect(),
            roster: Mutex::new(cohort),
            state: AtomicU8::new(FinishState::NotFinished.as_u8()),
            reason: Mutex::new(None),
            force: CancellationToken::new(),
            waiting_room,
            check_interval,
            created_at: Utc::now(),
        })
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Ids seated at creation, in roster order.
    #[must_use]
    pub fn roster_ids(&self) -> &[ParticipantId] {
        &self.roster_ids
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time since the session was created.
    #[must_use]
    pub fn age(&self) -> TimeDelta {
        Utc::now() - self.created_at
    }

    #[must_use]
    pub fn finish_state(&self) -> FinishState {
        FinishState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn has_finished(&self) -> bool {
        self.finish_state() == FinishState::Finished
    }

    /// The recorded finish reason, once finishing has begun.
    #[must_use]
    pub fn reason(&self) -> Option<FinishReason> {
        *lock(&self.reason)
    }

    /// Ask the session to end with `ServerShutdown`. Cooperative; the session
    /// task observes it at its next check.
    pub fn force_finish(&self) {
        self.force.cancel();
    }

    /// Drive the session until it finishes.
    #[instrument(skip_all, name = "table.session", fields(session_id = %self.id))]
    pub async fn run(self: Arc<Self>, mut rules: Box<dyn RulesEngine>) {
        let table = Table::new(self.id, lock(&self.roster).clone());

        info!(
            target: "table.session",
            roster = ?self.roster_ids,
            "Session started"
        );
        table.broadcast(&ServerMessage::SessionStarted {
            session_id: self.id,
            roster: self.roster_ids.clone(),
        });
        rules.on_start(&table);

        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let reason = loop {
            tokio::select! {
                biased;

                () = self.force.cancelled() => break FinishReason::ServerShutdown,

                _ = ticker.tick() => {
                    if self.finish_state() != FinishState::NotFinished {
                        return;
                    }
                    if let Some(left) = table.first_closed() {
                        debug!(target: "table.session", participant_id = %left, "Roster member left");
                        break FinishReason::ParticipantLeft;
                    }
                    if rules.play_turn(&table) == TurnOutcome::Concluded {
                        break FinishReason::Normal;
                    }
                }
            }
        };

        // Release the table's references before the roster is handed back.
        drop(table);
        self.finish(reason);
    }

    /// Transition to finished, returning open members to the waiting room.
    ///
    /// Only the first call has any effect; it returns true.
    pub fn finish(&self, reason: FinishReason) -> bool {
        if self
            .state
            .compare_exchange(
                FinishState::NotFinished.as_u8(),
                FinishState::Finishing.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return false;
        }

        *lock(&self.reason) = Some(reason);
        let roster = std::mem::take(&mut *lock(&self.roster));

        let notice = ServerMessage::session_finished(reason);
        let mut returned = Vec::new();
        let mut released = Vec::new();
        for participant in roster {
            if participant.is_closed() {
                released.push(participant.id());
                continue;
            }
            participant.send(notice.clone());
            returned.push(participant.id());
            self.waiting_room.push(participant);
        }

        self.state
            .store(FinishState::Finished.as_u8(), Ordering::SeqCst);
        metrics::record_session_finished(reason.as_str());

        info!(
            target: "table.session",
            session_id = %self.id,
            reason = reason.as_str(),
            age_ms = self.age().num_milliseconds(),
            returned = ?returned,
            released = ?released,
            "Session finished"
        );
        true
    }
}
