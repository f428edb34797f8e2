//! Turn-based combat resolution engine for a tabletop RPG assistant.
//!
//! Given a roster of combatants, this crate drives rounds and turns to
//! completion: it queries an LLM to decide each actor's action, resolves
//! the dice that action needs, applies damage/healing/conditions, tracks
//! limited-use and recharge abilities, detects when the encounter ends, and
//! streams a snapshot to the caller after every turn.
//!
//! # Quick Start
//!
//! ```ignore
//! use combat_engine::config::EngineConfig;
//! use combat_engine::import::{self, CombatantRecord};
//! use combat_engine::scheduler::{Scheduler, SharedCombatState, SystemDiceProvider};
//! use combat_engine::state::CombatState;
//! use llm::AnthropicClient;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut state = CombatState::new();
//!     import::import_combatant(&mut state, goblin_record())?;
//!     import::import_combatant(&mut state, fighter_record())?;
//!
//!     let shared = SharedCombatState::new(state);
//!     let scheduler = Scheduler::new(Arc::new(AnthropicClient::from_env()?), EngineConfig::new());
//!
//!     let handle = scheduler.resolve(
//!         shared,
//!         Arc::new(SystemDiceProvider),
//!         Arc::new(|snapshot| println!("{snapshot:?}")),
//!         Arc::new(|terminal| println!("{terminal:?}")),
//!     )?;
//!     handle.join().await;
//!     Ok(())
//! }
//! # fn goblin_record() -> combat_engine::import::CombatantRecord { unimplemented!() }
//! # fn fighter_record() -> combat_engine::import::CombatantRecord { unimplemented!() }
//! ```

pub mod ability_isolator;
pub mod adjudicator;
pub mod combatant;
pub mod config;
pub mod dice;
pub mod error;
pub mod import;
pub mod log;
pub mod scheduler;
pub mod snapshot;
pub mod state;

pub mod testing;

pub use combatant::{
    AbilityCategory, AbilityDescriptor, Combatant, CombatantKind, Condition, DeathSaves,
    InstanceId, LimitedUse, RawAbility, Side,
};
pub use config::EngineConfig;
pub use dice::{Advantage, DiceError, DiceExpression, DiceRecord};
pub use error::EngineError;
pub use import::{import_combatant, import_roster, CombatantRecord};
pub use log::{LogCategory, LogEntry};
pub use scheduler::{
    DiceProvider, ResolutionHandle, Scheduler, SeededDiceProvider, SharedCombatState,
    SystemDiceProvider,
};
pub use snapshot::{CombatantView, ResolutionResult, Snapshot, TerminalEvent};
pub use state::{CombatState, CombatStatus, CombatantInit, DeathSaveOutcome};
