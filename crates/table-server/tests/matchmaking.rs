//! Cohort assembly across the waiting room, matchmaker and session registry.
//!
//! The transport is replaced by `TestParticipant` fixtures; disconnects are
//! simulated the way the transport reports them: set the closed flag, then
//! notify the closure hub.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::types::ParticipantId;
use table_server::closure::{ClosureHub, ClosureSubscription};
use table_server::config::Config;
use table_server::lifecycle::LifecycleObserver;
use table_server::matchmaker::Matchmaker;
use table_server::protocol::ServerMessage;
use table_server::registry::SessionRegistry;
use table_server::session::{FinishReason, RulesFactory};
use table_server::waiting_room::WaitingRoom;
use table_test_utils::{endless_rules, test_config, wait_until, ScriptedRules, TestParticipant};

const SETTLE: Duration = Duration::from_secs(2);

struct Core {
    hub: Arc<ClosureHub>,
    room: Arc<WaitingRoom>,
    registry: Arc<SessionRegistry>,
    matchmaker: Arc<Matchmaker>,
    _subscriptions: Vec<ClosureSubscription>,
}

impl Core {
    fn new(config: &Config, rules: RulesFactory) -> Self {
        let hub = ClosureHub::new();
        let room = WaitingRoom::new();
        let registry = SessionRegistry::new(
            Arc::clone(&room),
            rules,
            config.session_check_interval,
            config.shutdown_timeout,
        );
        let matchmaker = Matchmaker::new(
            Arc::clone(&room),
            Arc::clone(&registry),
            config.players_per_session,
            config.matchmaker_poll_interval,
            config.shutdown_timeout,
        );
        let subscriptions = vec![
            hub.subscribe(room.clone()),
            hub.subscribe(matchmaker.clone()),
        ];
        Self {
            hub,
            room,
            registry,
            matchmaker,
            _subscriptions: subscriptions,
        }
    }

    fn disconnect(&self, participant: &TestParticipant) -> usize {
        participant.close();
        self.hub.notify(participant.id())
    }

    async fn shutdown(&self) {
        self.matchmaker.end().await;
        self.registry.end().await;
        self.room.end().await;
    }
}

fn ids(raw: &[u64]) -> Vec<ParticipantId> {
    raw.iter().copied().map(ParticipantId).collect()
}

// ============================================================================
// Quorum
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_first_n_arrivals_form_one_cohort() {
    let core = Core::new(&test_config(3), endless_rules());
    core.matchmaker.start().await.unwrap();

    let participants: Vec<_> = (1..=5).map(TestParticipant::new).collect();
    for p in &participants {
        core.room.push(p.participant());
    }

    assert!(wait_until(SETTLE, || core.matchmaker.buffered_ids().len() == 2).await);

    let sessions = core.registry.sessions();
    assert_eq!(sessions.len(), 1, "exactly one cohort for five arrivals");
    assert_eq!(sessions.first().unwrap().roster_ids(), ids(&[1, 2, 3]).as_slice());
    assert_eq!(core.matchmaker.buffered_ids(), ids(&[4, 5]));
    assert!(core.room.is_empty());

    core.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_dispatch_below_quorum() {
    let core = Core::new(&test_config(3), endless_rules());
    core.matchmaker.start().await.unwrap();

    let a = TestParticipant::new(1);
    let b = TestParticipant::new(2);
    core.room.push(a.participant());
    core.room.push(b.participant());

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(core.registry.sessions().is_empty());
    assert_eq!(core.matchmaker.buffered_ids(), ids(&[1, 2]));

    core.shutdown().await;
}

// ============================================================================
// Disconnect purge
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_disconnected_participants_never_seated() {
    let core = Core::new(&test_config(2), endless_rules());
    core.matchmaker.start().await.unwrap();

    let participants: Vec<_> = (1..=12).map(TestParticipant::new).collect();
    for p in &participants {
        core.room.push(p.participant());
        if p.id().get() % 3 == 0 {
            core.disconnect(p);
        }
    }

    assert!(wait_until(SETTLE, || core.registry.sessions().len() == 4).await);

    let seated: Vec<ParticipantId> = core
        .registry
        .sessions()
        .iter()
        .flat_map(|s| s.roster_ids().to_vec())
        .collect();
    assert_eq!(seated, ids(&[1, 2, 4, 5, 7, 8, 10, 11]));
    assert!(core.room.is_empty());
    assert!(core.matchmaker.buffered_ids().is_empty());

    core.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_buffered() {
    let core = Core::new(&test_config(3), endless_rules());
    core.matchmaker.start().await.unwrap();

    let a = TestParticipant::new(1);
    let b = TestParticipant::new(2);
    core.room.push(a.participant());
    core.room.push(b.participant());
    assert!(wait_until(SETTLE, || core.matchmaker.buffered_ids().len() == 2).await);

    assert_eq!(core.disconnect(&a), 1);
    assert_eq!(core.hub.notify(a.id()), 0, "second notification is a no-op");
    assert_eq!(core.matchmaker.buffered_ids(), ids(&[2]));

    let c = TestParticipant::new(3);
    let d = TestParticipant::new(4);
    core.room.push(c.participant());
    core.room.push(d.participant());

    assert!(wait_until(SETTLE, || core.registry.sessions().len() == 1).await);
    assert_eq!(
        core.registry.sessions().first().unwrap().roster_ids(),
        ids(&[2, 3, 4]).as_slice()
    );

    core.shutdown().await;
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_three_seat_departure_returns_survivors() {
    let core = Core::new(&test_config(3), endless_rules());
    core.matchmaker.start().await.unwrap();

    let mut one = TestParticipant::new(1);
    let two = TestParticipant::new(2);
    let mut three = TestParticipant::new(3);
    core.room.push(one.participant());
    core.room.push(two.participant());
    core.room.push(three.participant());

    assert!(wait_until(SETTLE, || core.registry.sessions().len() == 1).await);
    assert!(core.room.is_empty());
    let session = core.registry.sessions().pop().unwrap();
    assert_eq!(session.roster_ids(), ids(&[1, 2, 3]).as_slice());

    // Nothing consumes the room from here on, so returns stay observable.
    core.matchmaker.end().await;

    assert_eq!(core.disconnect(&two), 0, "a seated participant is held by neither observer");
    assert!(wait_until(SETTLE, || session.has_finished()).await);

    assert_eq!(session.reason(), Some(FinishReason::ParticipantLeft));
    assert_eq!(core.room.ids(), ids(&[1, 3]));

    let finished = ServerMessage::session_finished(FinishReason::ParticipantLeft);
    let seen_by_one = one.drain();
    assert!(seen_by_one.contains(&finished));
    assert_eq!(seen_by_one.last(), Some(&ServerMessage::Waiting { position: 1 }));
    assert_eq!(three.drain().last(), Some(&ServerMessage::Waiting { position: 2 }));

    core.registry.end().await;
}

#[tokio::test(start_paused = true)]
async fn test_survivors_are_rematched() {
    let (rules, turns) = ScriptedRules::factory(3);
    let core = Core::new(&test_config(2), rules);
    core.matchmaker.start().await.unwrap();

    let a = TestParticipant::new(1);
    let b = TestParticipant::new(2);
    core.room.push(a.participant());
    core.room.push(b.participant());

    // The first session concludes on its third turn; any later turn belongs
    // to the second session built from the returned pair.
    assert!(wait_until(SETTLE, || turns.load(Ordering::SeqCst) >= 4).await);

    let sessions = core.registry.sessions();
    let finished: Vec<_> = sessions.iter().filter(|s| s.has_finished()).collect();
    let running: Vec<_> = sessions.iter().filter(|s| !s.has_finished()).collect();
    assert!(finished
        .iter()
        .all(|s| s.reason() == Some(FinishReason::Normal)));
    assert_eq!(running.len(), 1);
    assert_eq!(running.first().unwrap().roster_ids(), ids(&[1, 2]).as_slice());

    core.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_forces_running_sessions() {
    let core = Core::new(&test_config(2), endless_rules());
    core.matchmaker.start().await.unwrap();

    let mut a = TestParticipant::new(1);
    let b = TestParticipant::new(2);
    core.room.push(a.participant());
    core.room.push(b.participant());
    assert!(wait_until(SETTLE, || core.registry.live_count() == 1).await);
    let session = core.registry.sessions().pop().unwrap();

    core.matchmaker.end().await;
    core.registry.end().await;

    assert!(session.has_finished());
    assert_eq!(session.reason(), Some(FinishReason::ServerShutdown));
    assert!(a
        .drain()
        .contains(&ServerMessage::session_finished(FinishReason::ServerShutdown)));
    assert_eq!(core.room.ids(), ids(&[1, 2]));
    assert!(core.registry.create_session(vec![a.participant()]).is_none());
}
