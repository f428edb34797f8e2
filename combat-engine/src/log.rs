//! The combat log: an append-only, immutable record of everything that
//! happened during a resolution.

use crate::combatant::InstanceId;
use crate::dice::DiceRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogCategory {
    Attack,
    Damage,
    Healing,
    Status,
    Initiative,
    DeathSave,
    Spell,
    Item,
    Other,
}

/// One immutable entry in a [`crate::state::CombatState`]'s log. Once
/// appended, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub round: u32,
    pub turn_index: usize,
    pub category: LogCategory,
    pub actor_instance_id: InstanceId,
    pub target_instance_id: Option<InstanceId>,
    pub action_description: String,
    pub result_description: Option<String>,
    pub dice: Vec<DiceRecord>,
}

impl LogEntry {
    pub fn new(
        round: u32,
        turn_index: usize,
        category: LogCategory,
        actor_instance_id: InstanceId,
        action_description: impl Into<String>,
    ) -> Self {
        Self {
            round,
            turn_index,
            category,
            actor_instance_id,
            target_instance_id: None,
            action_description: action_description.into(),
            result_description: None,
            dice: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: InstanceId) -> Self {
        self.target_instance_id = Some(target);
        self
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result_description = Some(result.into());
        self
    }

    pub fn with_dice(mut self, dice: Vec<DiceRecord>) -> Self {
        self.dice = dice;
        self
    }
}
