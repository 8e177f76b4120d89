//! Rules engines for driving sessions deterministically.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use table_server::session::{RulesEngine, RulesFactory, Table, TurnOutcome};

/// Never concludes; the session ends only by departure or force.
pub struct EndlessRules;

impl RulesEngine for EndlessRules {
    fn on_start(&mut self, _table: &Table) {}

    fn play_turn(&mut self, _table: &Table) -> TurnOutcome {
        TurnOutcome::Continue
    }
}

/// Factory for [`EndlessRules`].
#[must_use]
pub fn endless_rules() -> RulesFactory {
    Arc::new(|| Box::new(EndlessRules) as Box<dyn RulesEngine>)
}

/// Concludes after `turns` turns and counts every turn played across all
/// sessions built by its factory.
pub struct ScriptedRules {
    turns: u32,
    played: u32,
    total_turns: Arc<AtomicU32>,
}

impl ScriptedRules {
    /// Factory plus the shared turn counter.
    #[must_use]
    pub fn factory(turns: u32) -> (RulesFactory, Arc<AtomicU32>) {
        let total_turns = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&total_turns);
        let factory: RulesFactory = Arc::new(move || {
            Box::new(ScriptedRules {
                turns,
                played: 0,
                total_turns: Arc::clone(&counter),
            }) as Box<dyn RulesEngine>
        });
        (factory, total_turns)
    }
}

impl RulesEngine for ScriptedRules {
    fn on_start(&mut self, _table: &Table) {}

    fn play_turn(&mut self, _table: &Table) -> TurnOutcome {
        self.played += 1;
        self.total_turns.fetch_add(1, Ordering::SeqCst);
        if self.played >= self.turns {
            TurnOutcome::Concluded
        } else {
            TurnOutcome::Continue
        }
    }
}
