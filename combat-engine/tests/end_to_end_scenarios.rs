//! Six literal end-to-end scenarios driving the scheduler against scripted
//! LLM and dice providers, with no network access and no live PRNG.

use combat_engine::combatant::{AbilityCategory, CombatantKind, LimitedUse, RawAbility};
use combat_engine::config::EngineConfig;
use combat_engine::import::{self, CombatantRecord};
use combat_engine::scheduler::{Scheduler, SeededDiceProvider, SharedCombatState};
use combat_engine::snapshot::{Snapshot, TerminalEvent};
use combat_engine::state::CombatState;
use combat_engine::testing::{HangingLlmClient, ScriptedDiceProvider, ScriptedLlmClient};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn fighter() -> CombatantRecord {
    CombatantRecord {
        name: "Fighter".to_string(),
        kind: Some(CombatantKind::PlayerCharacter),
        initiative: 14,
        hp_current: 12,
        hp_max: 12,
        ac: 15,
        conditions: Vec::new(),
        concentrating: false,
        concentration_effect: None,
        abilities: Vec::new(),
        stats_block: None,
    }
}

fn goblin() -> CombatantRecord {
    CombatantRecord {
        name: "Goblin".to_string(),
        kind: Some(CombatantKind::Monster),
        initiative: 18,
        hp_current: 7,
        hp_max: 7,
        ac: 13,
        conditions: Vec::new(),
        concentrating: false,
        concentration_effect: None,
        abilities: vec![RawAbility {
            name: "Scimitar".to_string(),
            description: "1d6+2 slashing".to_string(),
            category: AbilityCategory::Action,
            cost: None,
            recharge_on: None,
            limited_use: None,
        }],
        stats_block: None,
    }
}

fn attack_nearest_enemy(actor: &str, target: &str) -> String {
    format!(
        r#"{{"actor":"{actor}","action":"attacks {target}","targets":["{target}"],"dice":[{{"expression":"1d6+2","purpose":"attack"}}],"effects":[{{"target":"{target}","hp_delta":-4,"add_conditions":[],"remove_conditions":[]}}],"consumes_ability":null,"concentration":null,"narrative":"{actor} attacks {target}."}}"#
    )
}

/// Scenario 1: solo goblin vs. solo fighter, seeded PRNG, combat concludes.
#[tokio::test]
async fn solo_goblin_vs_solo_fighter_concludes() {
    let mut state = CombatState::new();
    import::import_combatant(&mut state, goblin()).unwrap();
    import::import_combatant(&mut state, fighter()).unwrap();

    let shared = SharedCombatState::new(state);
    let scripted_replies: Vec<String> = (0..20)
        .map(|i| {
            if i % 2 == 0 {
                attack_nearest_enemy("Goblin", "Fighter")
            } else {
                attack_nearest_enemy("Fighter", "Goblin")
            }
        })
        .collect();
    let llm = Arc::new(ScriptedLlmClient::new(scripted_replies));
    let scheduler = Scheduler::new(llm, EngineConfig::new());

    let updates: Arc<Mutex<Vec<Snapshot>>> = Arc::new(Mutex::new(Vec::new()));
    let updates_clone = updates.clone();
    let terminal: Arc<Mutex<Option<TerminalEvent>>> = Arc::new(Mutex::new(None));
    let terminal_clone = terminal.clone();

    let handle = scheduler
        .resolve(
            shared,
            Arc::new(SeededDiceProvider::new(0xC0FFEE)),
            Arc::new(move |s: Snapshot| updates_clone.lock().unwrap().push(s)),
            Arc::new(move |t: TerminalEvent| *terminal_clone.lock().unwrap() = Some(t)),
        )
        .unwrap();
    handle.join().await;

    let terminal = terminal.lock().unwrap();
    let event = terminal.as_ref().expect("terminal event must be emitted");
    assert!(event.error.is_none(), "combat should conclude without error: {:?}", event.error);
    let result = event.result.as_ref().unwrap();
    assert!(result.rounds <= 10, "expected combat to conclude within 10 rounds, took {}", result.rounds);
}

/// Scenario 2: two identical adult red dragons, each with a recharging
/// breath weapon, must never see or consume the other's ability.
#[tokio::test]
async fn two_identical_dragons_stay_ability_isolated() {
    let dragon = || CombatantRecord {
        name: "Adult Red Dragon".to_string(),
        kind: Some(CombatantKind::Monster),
        initiative: 20,
        hp_current: 256,
        hp_max: 256,
        ac: 19,
        conditions: Vec::new(),
        concentrating: false,
        concentration_effect: None,
        abilities: vec![RawAbility {
            name: "Breath Weapon".to_string(),
            description: "Recharge 5-6, 18d6 fire".to_string(),
            category: AbilityCategory::Action,
            cost: None,
            recharge_on: Some(vec![5, 6]),
            limited_use: None,
        }],
        stats_block: None,
    };

    let mut state = CombatState::new();
    let a = import::import_combatant(&mut state, dragon()).unwrap();
    let b = import::import_combatant(&mut state, dragon()).unwrap();

    // Dragon A uses its breath weapon.
    if let Some(combatant) = state.get_mut(a) {
        combatant.limited_use.insert(
            "Breath Weapon".to_string(),
            LimitedUse::Recharge {
                available: false,
                recharge_on: vec![5, 6],
                recharge_dice: "1d6".to_string(),
            },
        );
    }

    let a_combatant = state.get(a).unwrap();
    let b_combatant = state.get(b).unwrap();

    assert!(combat_engine::ability_isolator::validate(a_combatant).is_empty());
    assert!(combat_engine::ability_isolator::validate(b_combatant).is_empty());

    // Dragon A's prompt must not list its depleted breath weapon...
    let a_prompt_abilities = combat_engine::ability_isolator::filter_for_prompt(a_combatant);
    assert!(a_prompt_abilities.is_empty());

    // ...while dragon B's is untouched and still available.
    let b_prompt_abilities = combat_engine::ability_isolator::filter_for_prompt(b_combatant);
    assert_eq!(b_prompt_abilities.len(), 1);
    assert_eq!(b_prompt_abilities[0].source_instance_id, b);
}

/// Scenario 3: a PC at 0 HP rolls forced death saves 15, 9, 1 over three
/// turns and dies on the third (a natural 1 counts as two failures).
#[test]
fn pc_death_save_progression_to_death() {
    let mut state = CombatState::new();
    let pc = import::import_combatant(
        &mut state,
        CombatantRecord {
            name: "Cleric".to_string(),
            kind: Some(CombatantKind::PlayerCharacter),
            initiative: 8,
            hp_current: 0,
            hp_max: 18,
            ac: 14,
            conditions: Vec::new(),
            concentrating: false,
            concentration_effect: None,
            abilities: Vec::new(),
            stats_block: None,
        },
    )
    .unwrap();

    assert!(state.get(pc).unwrap().is_unconscious());

    let first = state.apply_death_save(pc, 15).unwrap();
    assert_eq!(
        state.get(pc).unwrap().death_saves,
        Some(combat_engine::combatant::DeathSaves { successes: 1, failures: 0 })
    );
    assert_eq!(first, combat_engine::state::DeathSaveOutcome::Success);

    let second = state.apply_death_save(pc, 9).unwrap();
    assert_eq!(
        state.get(pc).unwrap().death_saves,
        Some(combat_engine::combatant::DeathSaves { successes: 1, failures: 1 })
    );
    assert_eq!(second, combat_engine::state::DeathSaveOutcome::Failure);

    let third = state.apply_death_save(pc, 1).unwrap();
    assert_eq!(
        state.get(pc).unwrap().death_saves,
        Some(combat_engine::combatant::DeathSaves { successes: 1, failures: 3 })
    );
    assert_eq!(third, combat_engine::state::DeathSaveOutcome::Died);
    assert!(state.get(pc).unwrap().is_dead());
}

fn attack_with_damage(actor: &str, target: &str, hp_delta: i64) -> String {
    format!(
        r#"{{"actor":"{actor}","action":"attacks {target}","targets":["{target}"],"dice":[{{"expression":"1d8","purpose":"attack"}}],"effects":[{{"target":"{target}","hp_delta":{hp_delta},"add_conditions":[],"remove_conditions":[]}}],"consumes_ability":null,"concentration":null,"narrative":"{actor} attacks {target}."}}"#
    )
}

/// Scenario 4: a concentrating wizard takes 12 damage from the orc's turn;
/// DC 10 Con save of 9 fails and concentration breaks. The wizard then
/// finishes the orc off, concluding the encounter.
#[tokio::test]
async fn concentration_breaks_on_failed_save() {
    let mut state = CombatState::new();
    import::import_combatant(
        &mut state,
        CombatantRecord {
            name: "Orc".to_string(),
            kind: Some(CombatantKind::Monster),
            initiative: 20,
            hp_current: 1,
            hp_max: 1,
            ac: 13,
            conditions: Vec::new(),
            concentrating: false,
            concentration_effect: None,
            abilities: Vec::new(),
            stats_block: None,
        },
    )
    .unwrap();
    import::import_combatant(
        &mut state,
        CombatantRecord {
            name: "Wizard".to_string(),
            kind: Some(CombatantKind::PlayerCharacter),
            initiative: 10,
            hp_current: 20,
            hp_max: 20,
            ac: 12,
            conditions: Vec::new(),
            concentrating: true,
            concentration_effect: Some("Bless".to_string()),
            abilities: Vec::new(),
            stats_block: None,
        },
    )
    .unwrap();

    let shared = SharedCombatState::new(state);
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        attack_with_damage("Orc", "Wizard", -12),
        attack_with_damage("Wizard", "Orc", -4),
    ]));
    let scheduler = Scheduler::new(llm, EngineConfig::new());

    // forced rolls: Orc's attack die, the wizard's failed concentration
    // save (9, below the DC 10 floor), then the wizard's attack die.
    let dice = Arc::new(ScriptedDiceProvider::new(vec![5, 9, 5]));

    let terminal: Arc<Mutex<Option<TerminalEvent>>> = Arc::new(Mutex::new(None));
    let terminal_clone = terminal.clone();

    let handle = scheduler
        .resolve(
            shared,
            dice,
            Arc::new(move |_s: Snapshot| {}),
            Arc::new(move |t: TerminalEvent| *terminal_clone.lock().unwrap() = Some(t)),
        )
        .unwrap();
    handle.join().await;

    let terminal = terminal.lock().unwrap();
    let event = terminal.as_ref().expect("terminal event must be emitted");
    assert!(event.error.is_none(), "combat should conclude without error: {:?}", event.error);
    let result = event.result.as_ref().unwrap();

    let wizard = result
        .final_combatants
        .iter()
        .find(|c| c.name == "Wizard")
        .expect("wizard must still be present");
    assert!(!wizard.concentrating);
    assert_eq!(wizard.hp, 8);

    assert!(
        result
            .log
            .iter()
            .any(|entry| entry.category == combat_engine::LogCategory::Status
                && entry.action_description == "concentration broken"),
        "expected a concentration-broken log entry, got: {:?}",
        result.log
    );
}

/// Scenario 5: an LLM stub that hangs on the second call triggers the stall
/// timer; exactly one terminal event is emitted with error `stalled`.
#[tokio::test(flavor = "multi_thread")]
async fn stalled_llm_triggers_stall_timeout() {
    let mut state = CombatState::new();
    import::import_combatant(&mut state, goblin()).unwrap();
    import::import_combatant(&mut state, fighter()).unwrap();
    let shared = SharedCombatState::new(state);

    let llm = Arc::new(HangingLlmClient::new(
        Duration::from_secs(200),
        vec![attack_nearest_enemy("Goblin", "Fighter")],
    ));
    let config = EngineConfig::new().with_stall_timeout_secs(1).with_total_timeout_secs(10);
    let scheduler = Scheduler::new(llm, config);

    let update_count = Arc::new(AtomicUsize::new(0));
    let update_count_clone = update_count.clone();
    let terminal: Arc<Mutex<Option<TerminalEvent>>> = Arc::new(Mutex::new(None));
    let terminal_clone = terminal.clone();

    let handle = scheduler
        .resolve(
            shared,
            Arc::new(SeededDiceProvider::new(1)),
            Arc::new(move |_s: Snapshot| {
                update_count_clone.fetch_add(1, Ordering::SeqCst);
            }),
            Arc::new(move |t: TerminalEvent| *terminal_clone.lock().unwrap() = Some(t)),
        )
        .unwrap();
    handle.join().await;

    let terminal = terminal.lock().unwrap();
    let event = terminal.as_ref().expect("terminal event must be emitted even on stall");
    assert_eq!(event.error.as_deref(), Some("resolution stalled: no turn update for 1s"));
    assert!(event.result.is_none());
    assert_eq!(update_count.load(Ordering::SeqCst), 1, "exactly the first turn's update should have been emitted");
}

/// Scenario 6: canceling mid-flight yields at most one more turn-update,
/// then exactly one terminal event with error `canceled`.
#[tokio::test]
async fn cancel_mid_flight_yields_single_terminal_event() {
    let mut state = CombatState::new();
    import::import_combatant(&mut state, goblin()).unwrap();
    import::import_combatant(&mut state, fighter()).unwrap();
    let shared = SharedCombatState::new(state);

    let llm = Arc::new(HangingLlmClient::new(Duration::from_secs(300), Vec::<String>::new()));
    let config = EngineConfig::new().with_stall_timeout_secs(120).with_total_timeout_secs(300);
    let scheduler = Scheduler::new(llm, config);

    let update_count = Arc::new(AtomicUsize::new(0));
    let update_count_clone = update_count.clone();
    let terminal: Arc<Mutex<Option<TerminalEvent>>> = Arc::new(Mutex::new(None));
    let terminal_clone = terminal.clone();

    let handle = scheduler
        .resolve(
            shared,
            Arc::new(ScriptedDiceProvider::new(vec![10, 10, 10, 10])),
            Arc::new(move |_s: Snapshot| {
                update_count_clone.fetch_add(1, Ordering::SeqCst);
            }),
            Arc::new(move |t: TerminalEvent| *terminal_clone.lock().unwrap() = Some(t)),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();
    handle.cancel(); // idempotent
    handle.join().await;

    let terminal = terminal.lock().unwrap();
    let event = terminal.as_ref().expect("terminal event must be emitted on cancel");
    assert_eq!(event.error.as_deref(), Some("resolution canceled"));
    assert!(event.result.is_none());
    assert!(update_count.load(Ordering::SeqCst) <= 1);
}
