//! Combatants, conditions, and abilities: the nouns the rest of the engine
//! operates on.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

/// Opaque, stable identifier for one combatant instance. Never reused, even
/// after the combatant is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which roster a combatant belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombatantKind {
    Monster,
    PlayerCharacter,
    /// Combatant added without a declared type. Treated as a player
    /// character for siding/termination purposes by convention.
    Manual,
}

/// Which side of the encounter a combatant's kind falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Monsters,
    Players,
}

impl CombatantKind {
    pub fn side(self) -> Side {
        match self {
            CombatantKind::Monster => Side::Monsters,
            CombatantKind::PlayerCharacter | CombatantKind::Manual => Side::Players,
        }
    }
}

/// The fixed condition vocabulary: the 14 PHB conditions plus the three
/// markers the engine itself uses to track combatants that can no longer act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    Blinded,
    Charmed,
    Deafened,
    Exhaustion(u8),
    Frightened,
    Grappled,
    Incapacitated,
    Invisible,
    Paralyzed,
    Petrified,
    Poisoned,
    Prone,
    Restrained,
    Stunned,
    Unconscious,
    // Engine-internal markers.
    Dead,
    Fled,
    Stable,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Exhaustion(level) => write!(f, "Exhaustion {level}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Death save tally for a player character at 0 HP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeathSaves {
    pub successes: u8,
    pub failures: u8,
}

/// Which bucket an ability belongs to on a stat block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbilityCategory {
    Action,
    Trait,
    LegendaryAction,
    Reaction,
}

/// Tracked resource state for a limited-use ability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LimitedUse {
    /// A flat pool of charges, decremented on use.
    Charges { remaining: u32 },
    /// A "Recharge X-Y" style ability: unavailable after use until a
    /// start-of-turn die roll lands in `recharge_on`.
    Recharge {
        available: bool,
        recharge_on: Vec<u8>,
        recharge_dice: String,
    },
}

impl LimitedUse {
    pub fn is_available(&self) -> bool {
        match self {
            LimitedUse::Charges { remaining } => *remaining > 0,
            LimitedUse::Recharge { available, .. } => *available,
        }
    }
}

/// One ability on a combatant's sheet. `source_instance_id` is the Ability
/// Isolator's enforced invariant: it must always equal the owning
/// combatant's own id, never a sibling instance's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbilityDescriptor {
    pub name: String,
    pub description: String,
    pub category: AbilityCategory,
    pub source_instance_id: InstanceId,
    pub source_name: String,
    /// Legendary action point cost; `None` for abilities that aren't legendary actions.
    pub cost: Option<u32>,
    pub recharge_on: Option<Vec<u8>>,
    pub uses_remaining: Option<u32>,
}

/// A raw ability as supplied by whatever created the combatant, before the
/// Ability Isolator stamps ownership onto it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAbility {
    pub name: String,
    pub description: String,
    pub category: AbilityCategory,
    pub cost: Option<u32>,
    pub recharge_on: Option<Vec<u8>>,
    pub limited_use: Option<LimitedUse>,
}

/// A single combatant's complete mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Combatant {
    pub instance_id: InstanceId,
    pub name: String,
    pub kind: CombatantKind,
    pub initiative: i32,
    pub insertion_sequence: u64,
    pub hp_current: u32,
    pub hp_max: u32,
    pub ac: u32,
    pub conditions: HashSet<Condition>,
    pub concentrating: bool,
    pub concentration_effect: Option<String>,
    pub death_saves: Option<DeathSaves>,
    pub abilities: HashMap<String, AbilityDescriptor>,
    pub limited_use: HashMap<String, LimitedUse>,
    pub stats_block: Option<serde_json::Value>,
}

impl Combatant {
    pub fn is_dead(&self) -> bool {
        self.conditions.contains(&Condition::Dead)
    }

    pub fn is_fled(&self) -> bool {
        self.conditions.contains(&Condition::Fled)
    }

    pub fn is_stable(&self) -> bool {
        self.conditions.contains(&Condition::Stable)
    }

    pub fn is_unconscious(&self) -> bool {
        self.conditions.contains(&Condition::Unconscious)
    }

    /// Combatants that never act again: dead, fled, or a stabilized PC.
    pub fn is_out_of_action(&self) -> bool {
        self.is_dead() || self.is_fled() || self.is_stable()
    }

    /// Whether this combatant's turn is skipped entirely: no action, and
    /// (for a PC) not even a death save. An Unconscious PC is deliberately
    /// excluded here — that turn still rolls a death save, handled as its
    /// own step rather than folded into "skipped".
    pub fn skips_normal_turn(&self) -> bool {
        match self.kind {
            CombatantKind::Monster => self.is_dead() || self.is_fled(),
            CombatantKind::PlayerCharacter | CombatantKind::Manual => {
                self.is_dead() || self.is_fled() || self.is_stable()
            }
        }
    }

    pub fn abilities_in_category(&self, category: AbilityCategory) -> Vec<&AbilityDescriptor> {
        self.abilities
            .values()
            .filter(|a| a.category == category)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_monster(hp: u32) -> Combatant {
        Combatant {
            instance_id: InstanceId::new(),
            name: "Goblin".to_string(),
            kind: CombatantKind::Monster,
            initiative: 10,
            insertion_sequence: 0,
            hp_current: hp,
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
    fn monster_skips_turn_only_when_dead_or_fled() {
        let mut m = bare_monster(7);
        assert!(!m.skips_normal_turn());
        m.conditions.insert(Condition::Dead);
        assert!(m.skips_normal_turn());
    }

    #[test]
    fn instance_ids_are_unique() {
        let a = InstanceId::new();
        let b = InstanceId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn limited_use_availability() {
        let charges = LimitedUse::Charges { remaining: 0 };
        assert!(!charges.is_available());
        let recharge = LimitedUse::Recharge {
            available: true,
            recharge_on: vec![5, 6],
            recharge_dice: "1d6".to_string(),
        };
        assert!(recharge.is_available());
    }
}
