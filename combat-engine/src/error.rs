//! Error kinds raised across the engine, and their fatal/recoverable policy.
//!
//! Most variants here correspond to one row of the component/policy table:
//! dice and ability-isolation errors are recoverable (logged, turn
//! continues); invariant violations and the scheduler's own timers are
//! fatal and end the resolution with a terminal event carrying this error.

use crate::dice::DiceError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("malformed dice expression {0:?}")]
    MalformedExpression(String),

    #[error("dice expression {0:?} too large")]
    ExpressionTooLarge(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("ability isolation violation: {0}")]
    AbilityViolation(String),

    #[error("could not parse adjudicator verdict: {0}")]
    MalformedVerdict(String),

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("resolution stalled: no turn update for {0}s")]
    Stalled(u64),

    #[error("resolution timed out after {0}s")]
    TimedOut(u64),

    #[error("resolution canceled")]
    Canceled,

    #[error("a resolution is already in progress for this combat state")]
    AlreadyResolving,
}

impl From<DiceError> for EngineError {
    fn from(e: DiceError) -> Self {
        match e {
            DiceError::MalformedExpression(s) => EngineError::MalformedExpression(s),
            DiceError::ExpressionTooLarge(s, detail) => {
                EngineError::ExpressionTooLarge(format!("{s} ({detail})"))
            }
        }
    }
}

impl From<llm::Error> for EngineError {
    fn from(e: llm::Error) -> Self {
        EngineError::LlmUnavailable(e.to_string())
    }
}
