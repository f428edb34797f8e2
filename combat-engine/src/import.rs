//! State-import interface: normalizes combatant records supplied by
//! whatever built the encounter (a combat tracker UI, a saved scene, a
//! scripted test) into the canonical [`CombatantInit`] shape and tags
//! ability ownership before insertion.

use crate::ability_isolator;
use crate::combatant::{AbilityCategory, CombatantKind, Condition, DeathSaves, LimitedUse, RawAbility};
use crate::error::EngineError;
use crate::state::{CombatState, CombatantInit};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A monster or player character as handed to the engine at encounter
/// start. Stat blocks arrive in "several historical shapes"; this is the
/// single normalized shape everything downstream agrees on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatantRecord {
    pub name: String,
    #[serde(default)]
    pub kind: Option<CombatantKind>,
    pub initiative: i32,
    pub hp_current: u32,
    pub hp_max: u32,
    pub ac: u32,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub concentrating: bool,
    #[serde(default)]
    pub concentration_effect: Option<String>,
    #[serde(default)]
    pub abilities: Vec<RawAbility>,
    #[serde(default)]
    pub stats_block: Option<serde_json::Value>,
}

fn parse_condition_name(name: &str) -> Option<Condition> {
    match name {
        "Blinded" => Some(Condition::Blinded),
        "Charmed" => Some(Condition::Charmed),
        "Deafened" => Some(Condition::Deafened),
        "Frightened" => Some(Condition::Frightened),
        "Grappled" => Some(Condition::Grappled),
        "Incapacitated" => Some(Condition::Incapacitated),
        "Invisible" => Some(Condition::Invisible),
        "Paralyzed" => Some(Condition::Paralyzed),
        "Petrified" => Some(Condition::Petrified),
        "Poisoned" => Some(Condition::Poisoned),
        "Prone" => Some(Condition::Prone),
        "Restrained" => Some(Condition::Restrained),
        "Stunned" => Some(Condition::Stunned),
        "Unconscious" => Some(Condition::Unconscious),
        "Dead" => Some(Condition::Dead),
        "Fled" => Some(Condition::Fled),
        "Stable" => Some(Condition::Stable),
        other if other.starts_with("Exhaustion") => {
            other.rsplit(' ').next().and_then(|n| n.parse().ok()).map(Condition::Exhaustion)
        }
        _ => None,
    }
}

/// Insert a normalized record into `state`, tagging its abilities via C3
/// before they become visible to anything else.
///
/// `kind` defaults to `Manual` when the record omits it (the importer, not
/// the state model, decides that default so callers can override per source).
pub fn import_combatant(state: &mut CombatState, record: CombatantRecord) -> Result<crate::combatant::InstanceId, EngineError> {
    if record.hp_max == 0 {
        return Err(EngineError::InvariantViolation(format!(
            "combatant {:?} has hp_max = 0",
            record.name
        )));
    }

    let mut conditions: HashSet<Condition> = record
        .conditions
        .iter()
        .filter_map(|c| parse_condition_name(c))
        .collect();

    let kind = record.kind.unwrap_or(CombatantKind::Manual);
    let hp_current = record.hp_current.min(record.hp_max);
    let death_saves = if kind == CombatantKind::PlayerCharacter && hp_current == 0 {
        conditions.insert(Condition::Unconscious);
        Some(DeathSaves::default())
    } else {
        None
    };

    let placeholder_id = crate::combatant::InstanceId::new();
    let tagged = ability_isolator::tag(placeholder_id, record.abilities.clone());

    let limited_use: HashMap<String, LimitedUse> = record
        .abilities
        .iter()
        .filter_map(|a| {
            a.limited_use.clone().map(|lu| (a.name.clone(), lu)).or_else(|| {
                a.recharge_on.clone().map(|recharge_on| {
                    (
                        a.name.clone(),
                        LimitedUse::Recharge {
                            available: true,
                            recharge_on,
                            recharge_dice: "1d6".to_string(),
                        },
                    )
                })
            })
        })
        .collect();

    let init = CombatantInit {
        name: record.name,
        kind,
        initiative: record.initiative,
        hp_current,
        hp_max: record.hp_max,
        ac: record.ac,
        conditions,
        concentrating: record.concentrating,
        concentration_effect: record.concentration_effect,
        death_saves,
        abilities: tagged,
        limited_use,
        stats_block: record.stats_block,
    };

    let instance_id = state.add(init);

    // tag() stamped a placeholder id before the real one was assigned;
    // retag now that the combatant actually exists in `state`.
    if let Some(combatant) = state.get_mut(instance_id) {
        combatant.abilities = ability_isolator::retag(instance_id, &combatant.abilities);
    }

    Ok(instance_id)
}

/// Import a full roster in initiative order, returning the assigned ids in
/// the same order as `records`.
pub fn import_roster(
    state: &mut CombatState,
    records: Vec<CombatantRecord>,
) -> Result<Vec<crate::combatant::InstanceId>, EngineError> {
    records
        .into_iter()
        .map(|r| import_combatant(state, r))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn goblin() -> CombatantRecord {
        CombatantRecord {
            name: "Goblin".to_string(),
            kind: Some(CombatantKind::Monster),
            initiative: 14,
            hp_current: 7,
            hp_max: 7,
            ac: 15,
            conditions: Vec::new(),
            concentrating: false,
            concentration_effect: None,
            abilities: vec![RawAbility {
                name: "Scimitar".to_string(),
                description: "Melee attack".to_string(),
                category: AbilityCategory::Action,
                cost: None,
                recharge_on: None,
                limited_use: None,
            }],
            stats_block: None,
        }
    }

    #[test]
    fn import_tags_abilities_to_the_new_instance() {
        let mut state = CombatState::new();
        let id = import_combatant(&mut state, goblin()).unwrap();
        let combatant = state.get(id).unwrap();
        assert_eq!(combatant.abilities["Scimitar"].source_instance_id, id);
    }

    #[test]
    fn two_identical_monsters_stay_isolated() {
        let mut state = CombatState::new();
        let a = import_combatant(&mut state, goblin()).unwrap();
        let b = import_combatant(&mut state, goblin()).unwrap();
        assert_ne!(a, b);
        assert_eq!(state.get(a).unwrap().abilities["Scimitar"].source_instance_id, a);
        assert_eq!(state.get(b).unwrap().abilities["Scimitar"].source_instance_id, b);
        assert!(ability_isolator::validate(state.get(a).unwrap()).is_empty());
        assert!(ability_isolator::validate(state.get(b).unwrap()).is_empty());
    }

    #[test]
    fn missing_kind_defaults_to_manual() {
        let mut state = CombatState::new();
        let mut record = goblin();
        record.kind = None;
        record.name = "Ally".to_string();
        let id = import_combatant(&mut state, record).unwrap();
        assert_eq!(state.get(id).unwrap().kind, CombatantKind::Manual);
    }

    #[test]
    fn rejects_zero_hp_max() {
        let mut state = CombatState::new();
        let mut record = goblin();
        record.hp_max = 0;
        assert!(import_combatant(&mut state, record).is_err());
    }
}
