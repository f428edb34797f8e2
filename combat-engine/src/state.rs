//! Combat State Model (C2): initiative order, per-combatant HP/condition
//! bookkeeping, and the append-only log.

use crate::combatant::{Combatant, CombatantKind, Condition, DeathSaves, InstanceId, Side};
use crate::error::EngineError;
use crate::log::LogEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a [`CombatState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombatStatus {
    Idle,
    Resolving,
    Concluded,
    Failed,
}

/// Everything needed to insert a new combatant; the state assigns the
/// instance id and insertion sequence.
#[derive(Debug, Clone)]
pub struct CombatantInit {
    pub name: String,
    pub kind: CombatantKind,
    pub initiative: i32,
    pub hp_current: u32,
    pub hp_max: u32,
    pub ac: u32,
    pub conditions: std::collections::HashSet<Condition>,
    pub concentrating: bool,
    pub concentration_effect: Option<String>,
    pub death_saves: Option<DeathSaves>,
    pub abilities: HashMap<String, crate::combatant::AbilityDescriptor>,
    pub limited_use: HashMap<String, crate::combatant::LimitedUse>,
    pub stats_block: Option<serde_json::Value>,
}

/// Outcome of resolving one forced death saving throw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathSaveOutcome {
    Success,
    Failure,
    RegainedConsciousness,
    Died,
}

/// Round/turn state for one encounter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatState {
    pub round: u32,
    pub turn_index: usize,
    order: Vec<InstanceId>,
    combatants: HashMap<InstanceId, Combatant>,
    pub log: Vec<LogEntry>,
    pub status: CombatStatus,
    next_insertion_sequence: u64,
}

impl Default for CombatState {
    fn default() -> Self {
        Self::new()
    }
}

impl CombatState {
    pub fn new() -> Self {
        Self {
            round: 1,
            turn_index: 0,
            order: Vec::new(),
            combatants: HashMap::new(),
            log: Vec::new(),
            status: CombatStatus::Idle,
            next_insertion_sequence: 0,
        }
    }

    pub fn combatants(&self) -> impl Iterator<Item = &Combatant> {
        self.combatants.values()
    }

    pub fn order(&self) -> &[InstanceId] {
        &self.order
    }

    pub fn get(&self, id: InstanceId) -> Option<&Combatant> {
        self.combatants.get(&id)
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut Combatant> {
        self.combatants.get_mut(&id)
    }

    /// The combatant whose turn it currently is.
    pub fn current(&self) -> Option<&Combatant> {
        self.order
            .get(self.turn_index)
            .and_then(|id| self.combatants.get(id))
    }

    /// Insert a new combatant into initiative order, sorted by
    /// `(-initiative, insertion_sequence)`. Returns the freshly assigned id.
    pub fn add(&mut self, init: CombatantInit) -> InstanceId {
        let instance_id = InstanceId::new();
        let sequence = self.next_insertion_sequence;
        self.next_insertion_sequence += 1;

        let combatant = Combatant {
            instance_id,
            name: init.name,
            kind: init.kind,
            initiative: init.initiative,
            insertion_sequence: sequence,
            hp_current: init.hp_current,
            hp_max: init.hp_max,
            ac: init.ac,
            conditions: init.conditions,
            concentrating: init.concentrating,
            concentration_effect: init.concentration_effect,
            death_saves: init.death_saves,
            abilities: init.abilities,
            limited_use: init.limited_use,
            stats_block: init.stats_block,
        };

        let pos = self
            .order
            .iter()
            .position(|existing| {
                let e = &self.combatants[existing];
                (-combatant.initiative, combatant.insertion_sequence)
                    < (-e.initiative, e.insertion_sequence)
            })
            .unwrap_or(self.order.len());

        // Inserting before the current turn slot shifts it forward by one,
        // keeping the active combatant the same.
        if pos <= self.turn_index && !self.order.is_empty() {
            self.turn_index += 1;
        }

        self.order.insert(pos, instance_id);
        self.combatants.insert(instance_id, combatant);
        instance_id
    }

    /// Remove an instance from order and storage.
    pub fn remove(&mut self, id: InstanceId) -> Option<Combatant> {
        self.remove_from_order(id);
        self.combatants.remove(&id)
    }

    fn remove_from_order(&mut self, id: InstanceId) {
        if let Some(pos) = self.order.iter().position(|x| *x == id) {
            self.order.remove(pos);
            if pos <= self.turn_index {
                self.turn_index = self.turn_index.saturating_sub(1);
            }
        }
    }

    /// Remove every Dead or Fled combatant from the order (but keep their
    /// record so final snapshots and the log can still reference them). Must
    /// be called between turns, never mid-turn.
    pub fn sweep_retired(&mut self) -> Vec<InstanceId> {
        let retired: Vec<InstanceId> = self
            .order
            .iter()
            .copied()
            .filter(|id| {
                self.combatants
                    .get(id)
                    .map(|c| c.is_dead() || c.is_fled())
                    .unwrap_or(false)
            })
            .collect();
        for id in &retired {
            self.remove_from_order(*id);
        }
        retired
    }

    /// Clamp HP into `[0, hp_max]` and apply Dead/Unconscious transitions.
    pub fn update_hp(&mut self, id: InstanceId, new_hp: i64) -> Result<(), EngineError> {
        let combatant = self
            .combatants
            .get_mut(&id)
            .ok_or_else(|| EngineError::InvariantViolation(format!("unknown instance {id}")))?;

        let clamped = new_hp.clamp(0, combatant.hp_max as i64) as u32;
        let was_zero = combatant.hp_current == 0;
        combatant.hp_current = clamped;

        if clamped == 0 && !was_zero {
            match combatant.kind {
                CombatantKind::Monster => {
                    combatant.conditions.insert(Condition::Dead);
                }
                CombatantKind::PlayerCharacter | CombatantKind::Manual => {
                    combatant.conditions.insert(Condition::Unconscious);
                    combatant.death_saves = Some(DeathSaves::default());
                }
            }
        } else if clamped > 0 && combatant.conditions.remove(&Condition::Unconscious) {
            combatant.death_saves = None;
            combatant.conditions.remove(&Condition::Stable);
        }

        Ok(())
    }

    pub fn apply_condition(&mut self, id: InstanceId, condition: Condition, add: bool) -> Result<(), EngineError> {
        let combatant = self
            .combatants
            .get_mut(&id)
            .ok_or_else(|| EngineError::InvariantViolation(format!("unknown instance {id}")))?;
        if add {
            combatant.conditions.insert(condition);
        } else {
            combatant.conditions.remove(&condition);
        }
        Ok(())
    }

    /// Resolve one forced death saving throw for an Unconscious PC.
    pub fn apply_death_save(&mut self, id: InstanceId, d20: i64) -> Result<DeathSaveOutcome, EngineError> {
        let combatant = self
            .combatants
            .get_mut(&id)
            .ok_or_else(|| EngineError::InvariantViolation(format!("unknown instance {id}")))?;

        if d20 == 20 {
            combatant.hp_current = 1;
            combatant.conditions.remove(&Condition::Unconscious);
            combatant.death_saves = None;
            return Ok(DeathSaveOutcome::RegainedConsciousness);
        }

        let saves = combatant.death_saves.get_or_insert_with(DeathSaves::default);
        if d20 == 1 {
            saves.failures = (saves.failures + 2).min(3);
        } else if d20 >= 10 {
            saves.successes = (saves.successes + 1).min(3);
        } else {
            saves.failures = (saves.failures + 1).min(3);
        }

        if saves.failures >= 3 {
            combatant.conditions.insert(Condition::Dead);
            combatant.conditions.remove(&Condition::Unconscious);
            return Ok(DeathSaveOutcome::Died);
        }
        if saves.successes >= 3 {
            combatant.conditions.insert(Condition::Stable);
            return Ok(DeathSaveOutcome::Success);
        }
        if d20 < 10 {
            Ok(DeathSaveOutcome::Failure)
        } else {
            Ok(DeathSaveOutcome::Success)
        }
    }

    /// Advance to the next combatant in order, wrapping the round when the
    /// order is exhausted. Combatants that will never act again (Dead,
    /// Fled, or a stabilized PC) are skipped as the turn advances.
    pub fn next_turn(&mut self) -> Option<InstanceId> {
        if self.order.is_empty() {
            return None;
        }
        let n = self.order.len();
        for _ in 0..n {
            self.turn_index += 1;
            if self.turn_index >= n {
                self.turn_index = 0;
                self.round += 1;
            }
            let id = self.order[self.turn_index];
            if let Some(c) = self.combatants.get(&id) {
                if !c.is_out_of_action() {
                    return Some(id);
                }
            }
        }
        None
    }

    /// True once one side has no combatant left that can still fight or is
    /// still rolling death saves.
    pub fn is_concluded(&self) -> bool {
        let mut monsters_ready = false;
        let mut players_ready = false;
        for id in &self.order {
            if let Some(c) = self.combatants.get(id) {
                if c.is_out_of_action() {
                    continue;
                }
                match c.kind.side() {
                    Side::Monsters => monsters_ready = true,
                    Side::Players => players_ready = true,
                }
            }
        }
        !monsters_ready || !players_ready
    }
}
