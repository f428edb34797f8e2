//! Test-only scaffolding: a scripted LLM client and a scripted dice provider
//! so integration tests can drive a resolution to an exact, reproducible
//! outcome without a network call or a live PRNG.

use crate::error::EngineError;
use crate::scheduler::DiceProvider;
use async_trait::async_trait;
use llm::{LlmClient, Message, ModelDescriptor};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Plays back a fixed queue of JSON verdict strings, one per `complete` call.
/// Panics if the script runs dry, which is the point: a test harness should
/// know exactly how many turns it expects to drive.
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: impl IntoIterator<Item = String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        _model_id: &str,
        _messages: &[Message],
        _system: Option<&str>,
        _temperature: Option<f32>,
        _max_tokens: usize,
    ) -> Result<String, llm::Error> {
        let mut responses = self.responses.lock().expect("scripted responses poisoned");
        responses
            .pop_front()
            .ok_or_else(|| llm::Error::Config("scripted response queue exhausted".to_string()))
    }

    fn available_models(&self) -> Vec<ModelDescriptor> {
        vec![ModelDescriptor {
            id: "scripted-model".to_string(),
            display_name: "Scripted Test Model".to_string(),
            max_output_tokens: 4096,
        }]
    }
}

/// A client that answers its first `hang_after` calls immediately from a
/// scripted queue, then hangs for `delay` on every call after that — for
/// exercising the stall/total timeouts once a resolution is already underway.
pub struct HangingLlmClient {
    pub delay: std::time::Duration,
    immediate: Mutex<VecDeque<String>>,
}

impl HangingLlmClient {
    pub fn new(delay: std::time::Duration, immediate_responses: impl IntoIterator<Item = String>) -> Self {
        Self {
            delay,
            immediate: Mutex::new(immediate_responses.into_iter().collect()),
        }
    }
}

#[async_trait]
impl LlmClient for HangingLlmClient {
    async fn complete(
        &self,
        _model_id: &str,
        _messages: &[Message],
        _system: Option<&str>,
        _temperature: Option<f32>,
        _max_tokens: usize,
    ) -> Result<String, llm::Error> {
        let next = self.immediate.lock().expect("hanging client queue poisoned").pop_front();
        match next {
            Some(response) => Ok(response),
            None => {
                tokio::time::sleep(self.delay).await;
                Err(llm::Error::Config("should not be reached in tests".to_string()))
            }
        }
    }

    fn available_models(&self) -> Vec<ModelDescriptor> {
        Vec::new()
    }
}

/// Plays back a fixed queue of forced roll totals, ignoring the requested
/// expression's actual distribution. `rolls` preserves the supplied value
/// as the sole entry so `DiceRecord.rolls` still reflects what happened.
pub struct ScriptedDiceProvider {
    forced: Mutex<VecDeque<i64>>,
}

impl ScriptedDiceProvider {
    pub fn new(forced: impl IntoIterator<Item = i64>) -> Self {
        Self {
            forced: Mutex::new(forced.into_iter().collect()),
        }
    }
}

impl DiceProvider for ScriptedDiceProvider {
    fn roll(&self, expression: &str, purpose: &str) -> Result<crate::dice::DiceRecord, EngineError> {
        let mut forced = self.forced.lock().expect("scripted rolls poisoned");
        let total = forced
            .pop_front()
            .ok_or_else(|| EngineError::InvariantViolation("scripted dice queue exhausted".to_string()))?;
        Ok(crate::dice::DiceRecord {
            expression: expression.to_string(),
            rolls: vec![total],
            modifier: 0,
            total,
            purpose: purpose.to_string(),
        })
    }
}
