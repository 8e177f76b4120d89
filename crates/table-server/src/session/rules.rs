//! Seam between a session and the game it runs.
//!
//! A session owns the roster and the finish logic; the rules engine only sees
//! a [`Table`] through which it can address seated participants and it reports
//! whether the game is over after each turn.

use std::sync::Arc;

use common::types::{ParticipantId, SessionId};

use crate::participant::Participant;
use crate::protocol::ServerMessage;

/// Result of one rules-engine turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Continue,
    /// The game reached its natural end.
    Concluded,
}

/// Game logic driven by a session, one turn per check interval.
pub trait RulesEngine: Send {
    /// Called once before the first turn.
    fn on_start(&mut self, table: &Table);

    fn play_turn(&mut self, table: &Table) -> TurnOutcome;
}

/// Builds a fresh engine for each new session.
pub type RulesFactory = Arc<dyn Fn() -> Box<dyn RulesEngine> + Send + Sync>;

/// The rules engine's view of a running session.
pub struct Table {
    session_id: SessionId,
    seats: Vec<Arc<Participant>>,
}

impl Table {
    pub(crate) fn new(session_id: SessionId, seats: Vec<Arc<Participant>>) -> Self {
        Self { session_id, seats }
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Seated ids in roster order.
    pub fn roster(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.seats.iter().map(|p| p.id())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seats.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    /// Send to one seated participant. False if `id` is not seated or the
    /// send did not go through.
    pub fn send(&self, id: ParticipantId, message: ServerMessage) -> bool {
        self.seats
            .iter()
            .find(|p| p.id() == id)
            .is_some_and(|p| p.send(message))
    }

    /// Send to every seated participant. Returns how many sends went through.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        self.seats
            .iter()
            .filter(|p| p.send(message.clone()))
            .count()
    }

    pub(crate) fn first_closed(&self) -> Option<ParticipantId> {
        self.seats.iter().find(|p| p.is_closed()).map(|p| p.id())
    }
}

/// Placeholder game: greets every player, then concludes after a fixed
/// number of turns.
#[derive(Debug, Clone)]
pub struct GreetingRules {
    turns: u32,
    played: u32,
}

impl GreetingRules {
    #[must_use]
    pub fn new(turns: u32) -> Self {
        Self { turns, played: 0 }
    }

    /// Factory producing a `GreetingRules` per session.
    #[must_use]
    pub fn factory(turns: u32) -> RulesFactory {
        Arc::new(move || Box::new(GreetingRules::new(turns)) as Box<dyn RulesEngine>)
    }
}

impl RulesEngine for GreetingRules {
    fn on_start(&mut self, table: &Table) {
        for id in table.roster() {
            table.send(
                id,
                ServerMessage::Table {
                    text: format!("Welcome to the game player: {id}"),
                },
            );
        }
    }

    fn play_turn(&mut self, _table: &Table) -> TurnOutcome {
        self.played = self.played.saturating_add(1);
        if self.played >= self.turns {
            TurnOutcome::Concluded
        } else {
            TurnOutcome::Continue
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::participant::OutboundSender;
    use tokio::sync::mpsc;

    fn seated(id: u64) -> (Arc<Participant>, Arc<OutboundSender>, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(8);
        let outbound = Arc::new(tx);
        (Participant::new(ParticipantId(id), &outbound), outbound, rx)
    }

    #[tokio::test]
    async fn test_greeting_rules_greets_each_player() {
        let (a, _a_out, mut a_rx) = seated(1);
        let (b, _b_out, mut b_rx) = seated(2);
        let table = Table::new(SessionId::new(), vec![a, b]);

        let mut rules = GreetingRules::new(2);
        rules.on_start(&table);

        assert_eq!(
            a_rx.recv().await,
            Some(ServerMessage::Table {
                text: "Welcome to the game player: 1".to_string()
            })
        );
        assert_eq!(
            b_rx.recv().await,
            Some(ServerMessage::Table {
                text: "Welcome to the game player: 2".to_string()
            })
        );
    }

    #[test]
    fn test_greeting_rules_concludes_after_turns() {
        let table = Table::new(SessionId::new(), Vec::new());
        let mut rules = GreetingRules::new(3);

        assert_eq!(rules.play_turn(&table), TurnOutcome::Continue);
        assert_eq!(rules.play_turn(&table), TurnOutcome::Continue);
        assert_eq!(rules.play_turn(&table), TurnOutcome::Concluded);
    }

    #[test]
    fn test_zero_turns_concludes_immediately() {
        let table = Table::new(SessionId::new(), Vec::new());
        assert_eq!(GreetingRules::new(0).play_turn(&table), TurnOutcome::Concluded);
    }

    #[test]
    fn test_send_to_unseated_id_fails() {
        let (a, _out, _rx) = seated(1);
        let table = Table::new(SessionId::new(), vec![a]);

        assert!(!table.send(
            ParticipantId(99),
            ServerMessage::Table {
                text: "hi".to_string()
            }
        ));
    }

    #[test]
    fn test_broadcast_skips_closed_and_tracks_first_closed() {
        let (a, _a_out, _a_rx) = seated(1);
        let (b, _b_out, _b_rx) = seated(2);
        let (c, _c_out, _c_rx) = seated(3);
        b.mark_closed();

        let table = Table::new(SessionId::new(), vec![a, b, c]);

        let sent = table.broadcast(&ServerMessage::Table {
            text: "round".to_string(),
        });
        assert_eq!(sent, 2);
        assert_eq!(table.first_closed(), Some(ParticipantId(2)));
        assert_eq!(
            table.roster().collect::<Vec<_>>(),
            vec![ParticipantId(1), ParticipantId(2), ParticipantId(3)]
        );
    }
}
