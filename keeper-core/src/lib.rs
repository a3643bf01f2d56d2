//! Turn-based Call of Cthulhu combat keeper.
//!
//! This crate provides:
//! - A dice engine for `NdM±K` expressions
//! - Participants, combat state and per-round initiative
//! - A turn orchestrator that walks each player input through the combat
//!   state machine, delegating judgement and prose to an [`oracle::Oracle`]
//! - A language-model backed oracle with a dice tool
//! - An encounter driver with a step cap and JSON checkpoints
//!
//! # Quick Start
//!
//! ```ignore
//! use keeper_core::{Encounter, ModelOracle, TurnOrchestrator};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let oracle = ModelOracle::new(my_model);
//!     let mut encounter = Encounter::new(TurnOrchestrator::new(oracle), state);
//!
//!     let response = encounter.advance("")?;
//!     println!("{}", response.narration);
//!
//!     let response = encounter.advance("I fire my revolver at the ghoul")?;
//!     println!("{}", response.narration);
//!
//!     encounter.save("cellar.json")?;
//!     Ok(())
//! }
//! ```

// Lets `#[derive(Tool)]` name `::keeper_core` from inside this crate.
extern crate self as keeper_core;

pub mod config;
pub mod dice;
pub mod encounter;
pub mod initiative;
pub mod oracle;
pub mod orchestrator;
pub mod participant;
pub mod state;
pub mod testing;

// Re-export for convenience
pub use keeper_macros::Tool;

// Primary public API
pub use config::KeeperConfig;
pub use dice::{DiceError, DiceExpression, RollResult};
pub use encounter::{Encounter, Response};
pub use initiative::{compute_order, InitiativeDirection};
pub use oracle::{
    ActionResolution, LanguageModel, ModelOracle, ModelOracleConfig, MonsterAction, Oracle, OracleContext,
    OracleError,
};
pub use orchestrator::{determine_next_step, KeeperError, Step, StepOutcome, TurnOrchestrator};
pub use participant::{Participant, ParticipantId, ParticipantKind, ParticipantStatus, Stats, StatsError};
pub use state::{append_log, apply_deltas, CombatMap, CombatOutcome, CombatState, EncounterId, Intent, Zone};
pub use testing::{MockOracle, TestHarness};
