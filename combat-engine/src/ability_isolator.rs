//! Ability Isolator (C3): guarantees one combatant's abilities can never be
//! attributed to, or exercised on behalf of, a sibling instance — the same
//! species appearing twice in an encounter must not let one copy "borrow"
//! the other's recharge state or action economy.

use crate::combatant::{AbilityDescriptor, Combatant, InstanceId, RawAbility};
use crate::error::EngineError;
use std::collections::HashMap;

/// Stamp ownership onto a batch of raw abilities at combatant-creation time.
/// This is the only place `source_instance_id` is assigned; every other
/// piece of code treats it as read-only.
pub fn tag(owner: InstanceId, raw: Vec<RawAbility>) -> HashMap<String, AbilityDescriptor> {
    raw.into_iter()
        .map(|r| {
            let descriptor = AbilityDescriptor {
                name: r.name.clone(),
                description: r.description,
                category: r.category,
                source_instance_id: owner,
                source_name: r.name.clone(),
                cost: r.cost,
                recharge_on: r.recharge_on,
                uses_remaining: None,
            };
            (r.name, descriptor)
        })
        .collect()
}

/// Re-tag an already-built ability map onto a (possibly different) owner.
/// Used when cloning a stat block for a second instance of the same
/// species: the clone must not retain the original's instance id.
pub fn retag(owner: InstanceId, abilities: &HashMap<String, AbilityDescriptor>) -> HashMap<String, AbilityDescriptor> {
    abilities
        .iter()
        .map(|(k, v)| {
            let mut descriptor = v.clone();
            descriptor.source_instance_id = owner;
            (k.clone(), descriptor)
        })
        .collect()
}

/// Scan a combatant for abilities whose `source_instance_id` does not match
/// their owner. Violations are non-fatal: logged and excluded from the
/// adjudicator prompt, never allowed to silently execute.
pub fn validate(combatant: &Combatant) -> Vec<EngineError> {
    combatant
        .abilities
        .values()
        .filter(|a| a.source_instance_id != combatant.instance_id)
        .map(|a| {
            EngineError::AbilityViolation(format!(
                "ability {:?} on combatant {} is tagged to foreign instance {}",
                a.name, combatant.instance_id, a.source_instance_id
            ))
        })
        .collect()
}

/// The subset of a combatant's abilities that are safe to surface to the
/// adjudicator: only those this combatant actually owns, and only those
/// with remaining uses (a depleted charge pool or un-recharged ability is
/// simply invisible, rather than something the adjudicator must be told
/// not to choose).
pub fn filter_for_prompt(combatant: &Combatant) -> Vec<&AbilityDescriptor> {
    combatant
        .abilities
        .values()
        .filter(|a| a.source_instance_id == combatant.instance_id)
        .filter(|a| {
            combatant
                .limited_use
                .get(&a.name)
                .map(|lu| lu.is_available())
                .unwrap_or(true)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combatant::AbilityCategory;

    fn raw(name: &str) -> RawAbility {
        RawAbility {
            name: name.to_string(),
            description: "does a thing".to_string(),
            category: AbilityCategory::Action,
            cost: None,
            recharge_on: None,
            limited_use: None,
        }
    }

    #[test]
    fn tag_stamps_owner_on_every_ability() {
        let owner = InstanceId::new();
        let tagged = tag(owner, vec![raw("Bite"), raw("Claw")]);
        assert_eq!(tagged.len(), 2);
        for descriptor in tagged.values() {
            assert_eq!(descriptor.source_instance_id, owner);
        }
    }

    #[test]
    fn retag_rewrites_source_instance_id_for_a_clone() {
        let original_owner = InstanceId::new();
        let tagged = tag(original_owner, vec![raw("Breath Weapon")]);

        let clone_owner = InstanceId::new();
        let retagged = retag(clone_owner, &tagged);
        assert_eq!(retagged["Breath Weapon"].source_instance_id, clone_owner);
        // original untouched
        assert_eq!(tagged["Breath Weapon"].source_instance_id, original_owner);
    }

    #[test]
    fn validate_flags_cross_contaminated_ability() {
        use crate::combatant::{CombatantKind, Condition};
        use std::collections::{HashMap as Map, HashSet};

        let owner = InstanceId::new();
        let foreign = InstanceId::new();
        let mut abilities = tag(foreign, vec![raw("Bite")]);

        let combatant = Combatant {
            instance_id: owner,
            name: "Wolf".to_string(),
            kind: CombatantKind::Monster,
            initiative: 12,
            insertion_sequence: 0,
            hp_current: 11,
            hp_max: 11,
            ac: 13,
            conditions: HashSet::<Condition>::new(),
            concentrating: false,
            concentration_effect: None,
            death_saves: None,
            abilities: abilities.drain().collect::<Map<_, _>>(),
            limited_use: Map::new(),
            stats_block: None,
        };

        let violations = validate(&combatant);
        assert_eq!(violations.len(), 1);
        assert!(filter_for_prompt(&combatant).is_empty());
    }

    #[test]
    fn filter_for_prompt_excludes_depleted_abilities() {
        use crate::combatant::{CombatantKind, Condition, LimitedUse};
        use std::collections::{HashMap as Map, HashSet};

        let owner = InstanceId::new();
        let abilities = tag(owner, vec![raw("Breath Weapon")]);
        let mut limited_use = Map::new();
        limited_use.insert(
            "Breath Weapon".to_string(),
            LimitedUse::Recharge {
                available: false,
                recharge_on: vec![5, 6],
                recharge_dice: "1d6".to_string(),
            },
        );

        let combatant = Combatant {
            instance_id: owner,
            name: "Dragon".to_string(),
            kind: CombatantKind::Monster,
            initiative: 20,
            insertion_sequence: 0,
            hp_current: 200,
            hp_max: 200,
            ac: 19,
            conditions: HashSet::<Condition>::new(),
            concentrating: false,
            concentration_effect: None,
            death_saves: None,
            abilities,
            limited_use,
            stats_block: None,
        };

        assert!(validate(&combatant).is_empty());
        assert!(filter_for_prompt(&combatant).is_empty());
    }
}
