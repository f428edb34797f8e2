//! Turn Scheduler (C5): drives the round/turn loop, applies verdicts to
//! state, emits per-turn updates, and guarantees exactly one terminal event.

use crate::ability_isolator;
use crate::adjudicator::{self, ConcentrationAction, TurnVerdict};
use crate::combatant::{Condition, LimitedUse};
use crate::config::EngineConfig;
use crate::dice::DiceRecord;
use crate::error::EngineError;
use crate::log::{LogCategory, LogEntry};
use crate::snapshot::{ResolutionResult, Snapshot, TerminalEvent};
use crate::state::{CombatState, CombatStatus, DeathSaveOutcome};
use llm::LlmClient;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Source of die rolls consulted by the scheduler. The default implementation
/// draws from the process RNG; tests substitute a scripted or seeded one.
pub trait DiceProvider: Send + Sync {
    fn roll(&self, expression: &str, purpose: &str) -> Result<DiceRecord, EngineError>;
}

/// The engine's built-in C1-backed provider, using the process-wide RNG.
pub struct SystemDiceProvider;

impl DiceProvider for SystemDiceProvider {
    fn roll(&self, expression: &str, purpose: &str) -> Result<DiceRecord, EngineError> {
        Ok(crate::dice::roll(expression, purpose)?)
    }
}

/// A seeded provider for reproducible resolutions in tests and replays.
pub struct SeededDiceProvider {
    rng: StdMutex<rand::rngs::StdRng>,
}

impl SeededDiceProvider {
    pub fn new(seed: u64) -> Self {
        use rand::SeedableRng;
        Self {
            rng: StdMutex::new(rand::rngs::StdRng::seed_from_u64(seed)),
        }
    }
}

impl DiceProvider for SeededDiceProvider {
    fn roll(&self, expression: &str, purpose: &str) -> Result<DiceRecord, EngineError> {
        let mut rng = self.rng.lock().expect("dice rng poisoned");
        Ok(crate::dice::roll_with_rng(expression, &mut *rng, purpose)?)
    }
}

/// A `CombatState` shared between the scheduler and an external owner (e.g.
/// a UI thread). Guarantees at most one resolution task runs against it.
pub struct SharedCombatState {
    inner: AsyncMutex<CombatState>,
    in_flight: AtomicBool,
}

impl SharedCombatState {
    pub fn new(state: CombatState) -> Arc<Self> {
        Arc::new(Self {
            inner: AsyncMutex::new(state),
            in_flight: AtomicBool::new(false),
        })
    }

    fn try_begin(&self) -> Result<(), EngineError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| EngineError::AlreadyResolving)
    }

    fn end(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }

    /// Snapshot the current state without requiring a resolution to be running.
    pub async fn snapshot(&self) -> Snapshot {
        let state = self.inner.lock().await;
        Snapshot::capture(&state, None)
    }
}

pub type UpdateSink = Arc<dyn Fn(Snapshot) + Send + Sync>;
pub type CompletionSink = Arc<dyn Fn(TerminalEvent) + Send + Sync>;

/// Handle to a spawned resolution task; the only way to cancel it.
pub struct ResolutionHandle {
    cancellation: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl ResolutionHandle {
    /// Idempotent: requests cancellation, observed at the next suspension point.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Drives the round/turn loop for one encounter.
pub struct Scheduler {
    llm: Arc<dyn LlmClient>,
    config: EngineConfig,
}

impl Scheduler {
    pub fn new(llm: Arc<dyn LlmClient>, config: EngineConfig) -> Self {
        Self { llm, config }
    }

    /// Start a resolution task. Rejects a second concurrent resolution
    /// against the same `SharedCombatState` with `AlreadyResolving`.
    pub fn resolve(
        &self,
        shared: Arc<SharedCombatState>,
        dice: Arc<dyn DiceProvider>,
        update_sink: UpdateSink,
        completion_sink: CompletionSink,
    ) -> Result<ResolutionHandle, EngineError> {
        shared.try_begin()?;

        let cancellation = CancellationToken::new();
        let task_cancellation = cancellation.clone();
        let llm = self.llm.clone();
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            let outcome = run_resolution(
                shared.clone(),
                dice,
                update_sink,
                llm,
                config,
                task_cancellation,
            )
            .await;
            shared.end();
            let event = match outcome {
                Ok(result) => TerminalEvent::success(result),
                Err(e) => TerminalEvent::failure(&e),
            };
            completion_sink(event);
        });

        Ok(ResolutionHandle { cancellation, task })
    }
}

async fn run_resolution(
    shared: Arc<SharedCombatState>,
    dice: Arc<dyn DiceProvider>,
    update_sink: UpdateSink,
    llm: Arc<dyn LlmClient>,
    config: EngineConfig,
    cancellation: CancellationToken,
) -> Result<ResolutionResult, EngineError> {
    {
        let mut state = shared.inner.lock().await;
        state.status = CombatStatus::Resolving;
        let violations = state
            .combatants()
            .flat_map(ability_isolator::validate)
            .collect::<Vec<_>>();
        for v in &violations {
            warn!(%v, "ability isolation violation detected during preparation");
        }
    }

    let start = Instant::now();
    let total_timeout = Duration::from_secs(config.total_timeout_secs);
    let stall_timeout = Duration::from_secs(config.stall_timeout_secs);

    loop {
        if cancellation.is_cancelled() {
            let mut state = shared.inner.lock().await;
            state.status = CombatStatus::Failed;
            return Err(EngineError::Canceled);
        }
        if start.elapsed() >= total_timeout {
            let mut state = shared.inner.lock().await;
            state.status = CombatStatus::Failed;
            return Err(EngineError::TimedOut(config.total_timeout_secs));
        }

        let step = run_one_turn(&shared, &dice, &llm, &config, &cancellation, &update_sink);

        tokio::select! {
            _ = cancellation.cancelled() => {
                let mut state = shared.inner.lock().await;
                state.status = CombatStatus::Failed;
                return Err(EngineError::Canceled);
            }
            _ = tokio::time::sleep(stall_timeout) => {
                let mut state = shared.inner.lock().await;
                state.status = CombatStatus::Failed;
                return Err(EngineError::Stalled(config.stall_timeout_secs));
            }
            outcome = step => {
                outcome?;

                let mut state = shared.inner.lock().await;
                if state.is_concluded() {
                    state.status = CombatStatus::Concluded;
                    let result = ResolutionResult::capture(
                        &state,
                        "The encounter has concluded.",
                    );
                    return Ok(result);
                }
            }
        }
    }
}

/// Execute exactly one active combatant's turn, emitting the turn-update
/// (and, when the round wraps, a separate round-start snapshot) via
/// `update_sink`.
async fn run_one_turn(
    shared: &Arc<SharedCombatState>,
    dice: &Arc<dyn DiceProvider>,
    llm: &Arc<dyn LlmClient>,
    config: &EngineConfig,
    cancellation: &CancellationToken,
    update_sink: &UpdateSink,
) -> Result<(), EngineError> {
    let actor_id = {
        let state = shared.inner.lock().await;
        match state.current() {
            Some(c) => c.instance_id,
            None => {
                update_sink(Snapshot::capture(&state, None));
                return Ok(());
            }
        }
    };

    // Step 1-2: skip rule.
    let skip = {
        let state = shared.inner.lock().await;
        state.get(actor_id).map(|c| c.skips_normal_turn()).unwrap_or(true)
    };

    let (round, turn_index) = {
        let state = shared.inner.lock().await;
        (state.round, state.turn_index)
    };

    if skip {
        let entry = LogEntry::new(round, turn_index, LogCategory::Status, actor_id, "turn skipped");
        return finish_turn(shared, entry, update_sink).await;
    }

    // Step 3: forced death save for an Unconscious PC.
    let is_unconscious_pc = {
        let state = shared.inner.lock().await;
        state.get(actor_id).map(|c| c.is_unconscious()).unwrap_or(false)
    };
    if is_unconscious_pc {
        let record = dice.roll("1d20", "death save")?;
        let outcome = {
            let mut state = shared.inner.lock().await;
            state.apply_death_save(actor_id, record.total)?
        };
        let description = match outcome {
            DeathSaveOutcome::Success => "death save: success",
            DeathSaveOutcome::Failure => "death save: failure",
            DeathSaveOutcome::RegainedConsciousness => "death save: natural 20, regains consciousness",
            DeathSaveOutcome::Died => "death save: third failure, dies",
        };
        let entry = LogEntry::new(round, turn_index, LogCategory::DeathSave, actor_id, description)
            .with_dice(vec![record]);
        return finish_turn(shared, entry, update_sink).await;
    }

    // Step 4: start-of-turn recharges.
    {
        let mut state = shared.inner.lock().await;
        if let Some(combatant) = state.get_mut(actor_id) {
            let names: Vec<String> = combatant.limited_use.keys().cloned().collect();
            for name in names {
                if let Some(LimitedUse::Recharge { available, recharge_on, recharge_dice }) =
                    combatant.limited_use.get(&name).cloned()
                {
                    if !available {
                        let record = dice.roll(&recharge_dice, &format!("recharge: {name}"))?;
                        let recharged = recharge_on.iter().any(|&v| v as i64 == record.total);
                        if let Some(LimitedUse::Recharge { available, .. }) =
                            combatant.limited_use.get_mut(&name)
                        {
                            *available = recharged;
                        }
                    }
                }
            }
        }
    }

    // Step 5: adjudicate.
    let (prompt_snapshot_state, actor_clone) = {
        let state = shared.inner.lock().await;
        let actor = state
            .get(actor_id)
            .cloned()
            .ok_or_else(|| EngineError::InvariantViolation("actor vanished mid-turn".to_string()))?;
        (state.clone(), actor)
    };

    if cancellation.is_cancelled() {
        return Err(EngineError::Canceled);
    }

    let verdict = match adjudicator::adjudicate(llm, config, &prompt_snapshot_state, &actor_clone, cancellation).await {
        Ok(v) => v,
        Err(EngineError::Canceled) => return Err(EngineError::Canceled),
        Err(e) => {
            warn!(error = %e, "adjudicator failed, synthesizing default action");
            TurnVerdict::hesitates(&actor_clone)
        }
    };

    if cancellation.is_cancelled() {
        return Err(EngineError::Canceled);
    }

    // Step 6: apply the verdict.
    let mut entry = LogEntry::new(round, turn_index, LogCategory::Attack, actor_id, verdict.action.clone())
        .with_result(verdict.narrative.clone());

    let resolved_targets = adjudicator::resolve_targets(&prompt_snapshot_state, &verdict.targets);
    let mut rolled: Vec<DiceRecord> = Vec::new();
    for d in &verdict.dice {
        match dice.roll(&d.expression, &d.purpose) {
            Ok(record) => rolled.push(record),
            Err(e) => warn!(expression = %d.expression, error = %e, "dropping malformed dice expression"),
        }
    }

    for effect in &verdict.effects {
        let target_id = match resolved_targets.get(&effect.target).copied().flatten() {
            Some(id) => id,
            None => {
                warn!(target = %effect.target, "verdict referenced unresolved target, effect is a no-op");
                continue;
            }
        };

        let mut state = shared.inner.lock().await;
        if effect.hp_delta != 0 {
            let current_hp = state.get(target_id).map(|c| c.hp_current as i64).unwrap_or(0);
            let was_concentrating = state.get(target_id).map(|c| c.concentrating).unwrap_or(false);
            state.update_hp(target_id, current_hp + effect.hp_delta)?;

            if effect.hp_delta < 0 && was_concentrating {
                drop(state);
                let dc = std::cmp::max(10, (effect.hp_delta.unsigned_abs() / 2) as i64);
                let save = dice.roll("1d20", "concentration save")?;
                if save.total < dc {
                    let mut state = shared.inner.lock().await;
                    if let Some(c) = state.get_mut(target_id) {
                        c.concentrating = false;
                        c.concentration_effect = None;
                    }
                    let break_entry = LogEntry::new(
                        round,
                        turn_index,
                        LogCategory::Status,
                        target_id,
                        "concentration broken",
                    )
                    .with_dice(vec![save]);
                    state.log.push(break_entry);
                }
            }
        }
        let mut state = shared.inner.lock().await;
        for c in &effect.add_conditions {
            if let Some(condition) = parse_condition(c) {
                state.apply_condition(target_id, condition, true)?;
            }
        }
        for c in &effect.remove_conditions {
            if let Some(condition) = parse_condition(c) {
                state.apply_condition(target_id, condition, false)?;
            }
        }
    }

    if let Some(concentration) = &verdict.concentration {
        let mut state = shared.inner.lock().await;
        if let Some(actor) = state.get_mut(actor_id) {
            match concentration.action {
                ConcentrationAction::Start => {
                    actor.concentrating = true;
                    actor.concentration_effect = concentration.effect.clone();
                }
                ConcentrationAction::End => {
                    actor.concentrating = false;
                    actor.concentration_effect = None;
                }
                ConcentrationAction::Unchanged => {}
            }
        }
    }

    if let Some(ability_name) = &verdict.consumes_ability {
        let mut state = shared.inner.lock().await;
        if let Some(actor) = state.get_mut(actor_id) {
            let owns_ability = actor
                .abilities
                .get(ability_name)
                .map(|a| a.source_instance_id == actor_id)
                .unwrap_or(false);
            if owns_ability {
                if let Some(limited) = actor.limited_use.get_mut(ability_name) {
                    match limited {
                        LimitedUse::Charges { remaining } if *remaining > 0 => *remaining -= 1,
                        LimitedUse::Recharge { available, .. } if *available => *available = false,
                        _ => {
                            warn!(ability = %ability_name, "ability has no charges remaining, consumption dropped");
                        }
                    }
                }
            } else {
                warn!(ability = %ability_name, "consumed ability not owned by actor, consumption dropped");
            }
        }
    }

    entry.dice = rolled;
    finish_turn(shared, entry, update_sink).await
}

fn parse_condition(name: &str) -> Option<Condition> {
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
        other if other.starts_with("Exhaustion") => other
            .rsplit(' ')
            .next()
            .and_then(|n| n.parse().ok())
            .map(Condition::Exhaustion),
        _ => None,
    }
}

/// Append the log entry, sweep retired combatants, advance to the next
/// turn, and emit the turn-update snapshot — followed by a separate
/// round-start snapshot when this turn wrapped the round. Two distinct
/// events, never merged, so a round boundary never swallows the turn's
/// own action out of the emitted stream.
async fn finish_turn(
    shared: &Arc<SharedCombatState>,
    entry: LogEntry,
    update_sink: &UpdateSink,
) -> Result<(), EngineError> {
    let mut state = shared.inner.lock().await;
    state.log.push(entry.clone());
    state.sweep_retired();

    let turn_snapshot = Snapshot::capture(&state, Some(entry));

    let round_before = state.round;
    state.next_turn();
    let round_started = state.round != round_before;

    info!(round = state.round, turn_index = state.turn_index, "turn resolved");

    let round_start_snapshot = round_started.then(|| Snapshot::capture(&state, None));
    drop(state);

    update_sink(turn_snapshot);
    if let Some(snapshot) = round_start_snapshot {
        update_sink(snapshot);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_condition_recognizes_exhaustion_with_level() {
        assert_eq!(parse_condition("Exhaustion 3"), Some(Condition::Exhaustion(3)));
        assert_eq!(parse_condition("Prone"), Some(Condition::Prone));
        assert_eq!(parse_condition("Nonsense"), None);
    }
}
