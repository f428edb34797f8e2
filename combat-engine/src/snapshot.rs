//! Serializable views of a [`crate::state::CombatState`] emitted to the UI:
//! per-turn snapshots and the single terminal event that ends a resolution.

use crate::combatant::{CombatantKind, Condition, InstanceId};
use crate::error::EngineError;
use crate::log::LogEntry;
use crate::state::CombatState;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One combatant's externally-visible fields, as shipped in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatantView {
    pub instance_id: InstanceId,
    pub name: String,
    pub kind: CombatantKind,
    pub hp: u32,
    pub hp_max: u32,
    pub ac: u32,
    pub conditions: HashSet<Condition>,
    pub concentrating: bool,
    pub initiative: i32,
}

impl CombatantView {
    fn from(state: &CombatState, id: InstanceId) -> Option<Self> {
        state.get(id).map(|c| CombatantView {
            instance_id: c.instance_id,
            name: c.name.clone(),
            kind: c.kind,
            hp: c.hp_current,
            hp_max: c.hp_max,
            ac: c.ac,
            conditions: c.conditions.clone(),
            concentrating: c.concentrating,
            initiative: c.initiative,
        })
    }
}

/// Emitted once per turn (and once per round-start with `latest_action: None`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub round: u32,
    pub turn_index: usize,
    pub combatants: Vec<CombatantView>,
    pub latest_action: Option<LogEntry>,
}

impl Snapshot {
    pub fn capture(state: &CombatState, latest_action: Option<LogEntry>) -> Self {
        Self {
            round: state.round,
            turn_index: state.turn_index,
            combatants: state
                .order()
                .iter()
                .chain(
                    state
                        .combatants()
                        .map(|c| &c.instance_id)
                        .filter(|id| !state.order().contains(id)),
                )
                .filter_map(|id| CombatantView::from(state, *id))
                .collect(),
            latest_action,
        }
    }
}

/// The outcome of a completed resolution, carried by the sole terminal event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub narrative: String,
    pub rounds: u32,
    pub final_combatants: Vec<CombatantView>,
    pub log: Vec<LogEntry>,
}

impl ResolutionResult {
    pub fn capture(state: &CombatState, narrative: impl Into<String>) -> Self {
        Self {
            narrative: narrative.into(),
            rounds: state.round,
            final_combatants: state
                .combatants()
                .map(|c| CombatantView {
                    instance_id: c.instance_id,
                    name: c.name.clone(),
                    kind: c.kind,
                    hp: c.hp_current,
                    hp_max: c.hp_max,
                    ac: c.ac,
                    conditions: c.conditions.clone(),
                    concentrating: c.concentrating,
                    initiative: c.initiative,
                })
                .collect(),
            log: state.log.clone(),
        }
    }
}

/// Exactly one of `result`/`error` is populated; emitted exactly once at the
/// end of a resolution task's life, regardless of how it ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalEvent {
    pub result: Option<ResolutionResult>,
    pub error: Option<String>,
}

impl TerminalEvent {
    pub fn success(result: ResolutionResult) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(err: &EngineError) -> Self {
        Self {
            result: None,
            error: Some(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combatant::CombatantKind;
    use crate::state::CombatantInit;
    use std::collections::{HashMap, HashSet};

    fn init(name: &str) -> CombatantInit {
        CombatantInit {
            name: name.to_string(),
            kind: CombatantKind::Monster,
            initiative: 10,
            hp_current: 7,
            hp_max: 7,
            ac: 13,
            conditions: HashSet::new(),
            concentrating: false,
            concentration_effect: None,
            death_saves: None,
            abilities: HashMap::new(),
            limited_use: HashMap::new(),
            stats_block: None,
        }
    }

    #[test]
    fn capture_lists_every_combatant_in_order() {
        let mut state = CombatState::new();
        state.add(init("Goblin"));
        state.add(init("Goblin 2"));
        let snapshot = Snapshot::capture(&state, None);
        assert_eq!(snapshot.combatants.len(), 2);
        assert!(snapshot.latest_action.is_none());
    }

    #[test]
    fn terminal_event_carries_exactly_one_of_result_or_error() {
        let mut state = CombatState::new();
        state.add(init("Goblin"));
        let result = ResolutionResult::capture(&state, "The goblin stands alone.");
        let event = TerminalEvent::success(result);
        assert!(event.result.is_some());
        assert!(event.error.is_none());

        let err = EngineError::Canceled;
        let failed = TerminalEvent::failure(&err);
        assert!(failed.result.is_none());
        assert!(failed.error.is_some());
    }
}
