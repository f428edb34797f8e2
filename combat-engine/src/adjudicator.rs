//! LLM Adjudicator (C4): turns the current encounter state into a prompt,
//! calls the configured client, and parses its reply into a [`TurnVerdict`].

use crate::ability_isolator;
use crate::combatant::{Combatant, InstanceId};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::log::LogEntry;
use crate::state::CombatState;
use llm::{LlmClient, Message};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One dice request embedded in a verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictDice {
    pub expression: String,
    pub purpose: String,
}

/// One effect embedded in a verdict, keyed by target name/id as the LLM
/// wrote it — resolution against a live [`InstanceId`] happens in the
/// scheduler, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictEffect {
    pub target: String,
    #[serde(default)]
    pub hp_delta: i64,
    #[serde(default)]
    pub add_conditions: Vec<String>,
    #[serde(default)]
    pub remove_conditions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcentrationAction {
    Start,
    End,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictConcentration {
    pub action: ConcentrationAction,
    #[serde(default)]
    pub effect: Option<String>,
}

/// The parsed shape of the LLM's JSON reply, before any effect has been
/// applied to the combat state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnVerdict {
    pub actor: String,
    pub action: String,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub dice: Vec<VerdictDice>,
    #[serde(default)]
    pub effects: Vec<VerdictEffect>,
    #[serde(default)]
    pub consumes_ability: Option<String>,
    #[serde(default)]
    pub concentration: Option<VerdictConcentration>,
    #[serde(default)]
    pub narrative: String,
}

impl TurnVerdict {
    /// The synthesized fallback action once retries are exhausted: the
    /// combatant does nothing observable and the turn still advances.
    pub fn hesitates(actor: &Combatant) -> Self {
        Self {
            actor: actor.name.clone(),
            action: "hesitates".to_string(),
            targets: Vec::new(),
            dice: Vec::new(),
            effects: Vec::new(),
            consumes_ability: None,
            concentration: None,
            narrative: format!("{} hesitates, unsure how to act.", actor.name),
        }
    }
}

const RULESET_PRELUDE: &str = r#"You are adjudicating one combatant's turn in a turn-based tabletop combat encounter.
Respond with exactly one JSON object, no surrounding prose, matching this schema:
{
  "actor": "<name or instance_id>",
  "action": "<short description>",
  "targets": ["<name or instance_id>", ...],
  "dice": [{"expression": "1d20+5", "purpose": "attack"}, ...],
  "effects": [{"target":"...", "hp_delta": -12, "add_conditions":["Prone"], "remove_conditions":[]}],
  "consumes_ability": "<ability name or null>",
  "concentration": {"action":"start|end|unchanged", "effect":"..."},
  "narrative": "<prose>"
}
Only reference dice expressions you want actually rolled; only name targets present in the encounter; only name abilities listed for this combatant."#;

/// Build the prompt for the active combatant's turn.
pub fn build_prompt(state: &CombatState, actor: &Combatant, log_window: usize) -> Vec<Message> {
    let mut others = String::new();
    for other in state.combatants() {
        if other.instance_id == actor.instance_id {
            continue;
        }
        others.push_str(&format!(
            "- {} ({:?}) HP {}/{} AC {} conditions {:?}\n",
            other.name, other.kind, other.hp_current, other.hp_max, other.ac, other.conditions
        ));
    }

    let abilities = ability_isolator::filter_for_prompt(actor);
    let mut ability_lines = String::new();
    for ability in &abilities {
        ability_lines.push_str(&format!("- {}: {}\n", ability.name, ability.description));
    }
    if ability_lines.is_empty() {
        ability_lines.push_str("(none available)\n");
    }

    let recent: Vec<&LogEntry> = state
        .log
        .iter()
        .rev()
        .take(log_window)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let mut history = String::new();
    for entry in recent {
        history.push_str(&format!(
            "round {} turn {}: {}{}\n",
            entry.round,
            entry.turn_index,
            entry.action_description,
            entry
                .result_description
                .as_ref()
                .map(|r| format!(" -> {r}"))
                .unwrap_or_default()
        ));
    }
    if history.is_empty() {
        history.push_str("(no prior turns)\n");
    }

    let user_content = format!(
        "Round {round}, turn index {turn_index}.\n\n\
         Active combatant: {name} ({kind:?}) HP {hp}/{hp_max} AC {ac} conditions {conditions:?} concentrating: {concentrating}\n\
         Available abilities:\n{ability_lines}\n\
         Other combatants:\n{others}\n\
         Recent log:\n{history}",
        round = state.round,
        turn_index = state.turn_index,
        name = actor.name,
        kind = actor.kind,
        hp = actor.hp_current,
        hp_max = actor.hp_max,
        ac = actor.ac,
        conditions = actor.conditions,
        concentrating = actor.concentrating,
    );

    vec![Message::user(user_content)]
}

/// Strip Markdown code fences, then on parse failure fall back to extracting
/// the largest `{...}` substring.
fn extract_json(raw: &str) -> Result<TurnVerdict, EngineError> {
    let trimmed = raw.trim();
    let stripped = if let Some(inner) = trimmed
        .strip_prefix("```json")
        .and_then(|s| s.strip_suffix("```"))
    {
        inner.trim()
    } else if let Some(inner) = trimmed.strip_prefix("```").and_then(|s| s.strip_suffix("```")) {
        inner.trim()
    } else {
        trimmed
    };

    if let Ok(verdict) = serde_json::from_str::<TurnVerdict>(stripped) {
        return Ok(verdict);
    }

    let start = stripped.find('{');
    let end = stripped.rfind('}');
    if let (Some(start), Some(end)) = (start, end) {
        if start < end {
            if let Ok(verdict) = serde_json::from_str::<TurnVerdict>(&stripped[start..=end]) {
                return Ok(verdict);
            }
        }
    }

    Err(EngineError::MalformedVerdict(format!(
        "could not parse verdict from: {}",
        raw.chars().take(200).collect::<String>()
    )))
}

/// Call the LLM for the active combatant's turn and parse its reply,
/// retrying on malformed output up to `config.max_parse_retries` times
/// before the caller should fall back to [`TurnVerdict::hesitates`].
pub async fn adjudicate(
    client: &Arc<dyn LlmClient>,
    config: &EngineConfig,
    state: &CombatState,
    actor: &Combatant,
    cancellation: &CancellationToken,
) -> Result<TurnVerdict, EngineError> {
    let messages = build_prompt(state, actor, config.log_window);
    let model_id = if config.model_id.is_empty() {
        llm::DEFAULT_MODEL
    } else {
        &config.model_id
    };

    let mut last_err = None;
    for attempt in 0..=config.max_parse_retries {
        if cancellation.is_cancelled() {
            return Err(EngineError::Canceled);
        }

        let mut attempt_messages = messages.clone();
        if attempt > 0 {
            attempt_messages.push(Message::user(
                "Your previous reply did not parse as the required JSON object. Reply with exactly one JSON object and nothing else.",
            ));
        }

        let reply = client
            .complete(
                model_id,
                &attempt_messages,
                Some(RULESET_PRELUDE),
                config.temperature,
                config.max_tokens,
            )
            .await
            .map_err(EngineError::from)?;

        if cancellation.is_cancelled() {
            return Err(EngineError::Canceled);
        }

        match extract_json(&reply) {
            Ok(verdict) => return Ok(verdict),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| EngineError::MalformedVerdict("no response".to_string())))
}

/// Resolve a verdict's target strings against live combatants by name or
/// stringified instance id. Unresolved targets are reported, not dropped
/// silently, so the scheduler can log a WARN and no-op that effect.
pub fn resolve_targets(state: &CombatState, names: &[String]) -> HashMap<String, Option<InstanceId>> {
    names
        .iter()
        .map(|name| {
            let found = state.combatants().find(|c| {
                c.name == *name || c.instance_id.to_string() == *name
            });
            (name.clone(), found.map(|c| c.instance_id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_parses_plain_object() {
        let raw = r#"{"actor":"Goblin","action":"attacks","targets":["Fighter"],"dice":[],"effects":[],"consumes_ability":null,"concentration":null,"narrative":"The goblin lunges."}"#;
        let verdict = extract_json(raw).unwrap();
        assert_eq!(verdict.actor, "Goblin");
        assert_eq!(verdict.targets, vec!["Fighter".to_string()]);
    }

    #[test]
    fn extract_json_strips_fenced_block() {
        let raw = "```json\n{\"actor\":\"Goblin\",\"action\":\"attacks\",\"narrative\":\"x\"}\n```";
        let verdict = extract_json(raw).unwrap();
        assert_eq!(verdict.actor, "Goblin");
    }

    #[test]
    fn extract_json_falls_back_to_largest_brace_span() {
        let raw = "Sure, here you go: {\"actor\":\"Goblin\",\"action\":\"attacks\",\"narrative\":\"x\"} hope that helps!";
        let verdict = extract_json(raw).unwrap();
        assert_eq!(verdict.actor, "Goblin");
    }

    #[test]
    fn extract_json_fails_on_garbage() {
        let raw = "I refuse to respond in JSON.";
        assert!(extract_json(raw).is_err());
    }

    #[test]
    fn hesitates_synthesizes_inert_verdict() {
        use crate::combatant::{CombatantKind, InstanceId};
        use std::collections::{HashMap as Map, HashSet};

        let actor = Combatant {
            instance_id: InstanceId::new(),
            name: "Fighter".to_string(),
            kind: CombatantKind::PlayerCharacter,
            initiative: 10,
            insertion_sequence: 0,
            hp_current: 20,
            hp_max: 20,
            ac: 16,
            conditions: HashSet::new(),
            concentrating: false,
            concentration_effect: None,
            death_saves: None,
            abilities: Map::new(),
            limited_use: Map::new(),
            stats_block: None,
        };
        let verdict = TurnVerdict::hesitates(&actor);
        assert_eq!(verdict.action, "hesitates");
        assert!(verdict.effects.is_empty());
        assert!(verdict.dice.is_empty());
    }
}
