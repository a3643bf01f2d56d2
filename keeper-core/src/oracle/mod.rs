//! Reasoning oracle boundary.
//!
//! Everything that needs judgement or prose (classifying input, resolving
//! a player's action, running a monster, answering questions, narrating)
//! goes through the [`Oracle`] trait. Calls block until a complete
//! structured result or an error comes back; the orchestrator applies
//! nothing until then.
//!
//! Capabilities that decide hits, dodges or damage are expected to roll
//! through the dice engine (see [`DiceTools`]) and quote the roll in their
//! description. The orchestrator trusts and applies what comes back.

mod model;
mod tools;

pub use model::{LanguageModel, ModelError, ModelOracle, ModelOracleConfig, ModelRequest};
pub use tools::{DiceTools, RollDice, ToolCall, ToolDefinition, ToolOutput, ToolSpec};

use crate::participant::{Participant, ParticipantId};
use crate::state::{CombatMap, CombatState, Intent};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from an oracle capability.
#[derive(Debug, Error)]
pub enum OracleError {
    /// The reply could not be read as the expected structured shape.
    #[error("Oracle response malformed: {0}")]
    OracleResponseMalformed(String),

    /// The oracle could not be reached or gave up.
    #[error("Oracle unavailable: {0}")]
    Unavailable(String),
}

impl From<ModelError> for OracleError {
    fn from(err: ModelError) -> Self {
        OracleError::Unavailable(err.to_string())
    }
}

/// What an oracle call gets to see.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleContext {
    pub round_number: u32,
    /// Whoever is acting: the reacting investigator, else the turn holder.
    pub current_actor_id: Option<ParticipantId>,
    pub log_tail: Vec<String>,
    pub map: CombatMap,
    pub participants: Vec<Participant>,
    pub player_input: Option<String>,
    /// The player is answering a monster (dodge or fight back only).
    pub reaction: bool,
}

impl OracleContext {
    /// Snapshot `state`, keeping the last `log_tail` entries (`None` for all).
    pub fn from_state(state: &CombatState, log_tail: Option<usize>) -> Self {
        let log = match log_tail {
            Some(n) => state.log_tail(n),
            None => state.combat_log(),
        };
        Self {
            round_number: state.round_number,
            current_actor_id: state.acting_id().cloned(),
            log_tail: log.to_vec(),
            map: state.map.clone(),
            participants: state.participants.clone(),
            player_input: state.player_input.clone(),
            reaction: state.pending_reaction.is_some(),
        }
    }

    pub fn current_actor(&self) -> Option<&Participant> {
        let id = self.current_actor_id.as_ref()?;
        self.participants.iter().find(|p| &p.id == id)
    }
}

/// Outcome of resolving a player's action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResolution {
    pub is_valid: bool,
    /// Why the action was refused, or what it did (rolls included).
    pub description: String,
    #[serde(default)]
    pub participant_deltas: Vec<Participant>,
}

/// What a monster did on its turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonsterAction {
    pub description: String,
    #[serde(default)]
    pub participant_deltas: Vec<Participant>,
    /// The action demands an answer from a player (e.g. a forced dodge).
    #[serde(default)]
    pub requires_player_input: bool,
    /// Investigator who must answer, when `requires_player_input` is set.
    #[serde(default)]
    pub reaction_target: Option<ParticipantId>,
}

/// The external reasoning collaborator.
pub trait Oracle {
    fn classify_intent(&mut self, ctx: &OracleContext) -> Result<Intent, OracleError>;

    fn resolve_player_action(&mut self, ctx: &OracleContext) -> Result<ActionResolution, OracleError>;

    fn decide_monster_action(&mut self, ctx: &OracleContext) -> Result<MonsterAction, OracleError>;

    fn answer_rules_query(&mut self, ctx: &OracleContext) -> Result<String, OracleError>;

    fn answer_ooc(&mut self, ctx: &OracleContext) -> Result<String, OracleError>;

    fn narrate(&mut self, ctx: &OracleContext) -> Result<String, OracleError>;
}

impl<O: Oracle + ?Sized> Oracle for Box<O> {
    fn classify_intent(&mut self, ctx: &OracleContext) -> Result<Intent, OracleError> {
        (**self).classify_intent(ctx)
    }

    fn resolve_player_action(&mut self, ctx: &OracleContext) -> Result<ActionResolution, OracleError> {
        (**self).resolve_player_action(ctx)
    }

    fn decide_monster_action(&mut self, ctx: &OracleContext) -> Result<MonsterAction, OracleError> {
        (**self).decide_monster_action(ctx)
    }

    fn answer_rules_query(&mut self, ctx: &OracleContext) -> Result<String, OracleError> {
        (**self).answer_rules_query(ctx)
    }

    fn answer_ooc(&mut self, ctx: &OracleContext) -> Result<String, OracleError> {
        (**self).answer_ooc(ctx)
    }

    fn narrate(&mut self, ctx: &OracleContext) -> Result<String, OracleError> {
        (**self).narrate(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::Stats;

    fn state() -> CombatState {
        let mut state = CombatState::new(
            vec![
                Participant::investigator("inv1", "Amelia", Stats::new(12, 12).unwrap()),
                Participant::enemy("gh1", "Ghoul", Stats::new(13, 13).unwrap()),
            ],
            CombatMap::new("Cellar"),
        )
        .unwrap();
        for i in 0..10 {
            state.log(format!("entry {i}"));
        }
        state.initiative_order = vec!["gh1".into(), "inv1".into()];
        state.current_actor_index = Some(1);
        state.round_number = 2;
        state
    }

    #[test]
    fn test_context_log_tail() {
        let ctx = OracleContext::from_state(&state(), Some(3));
        assert_eq!(ctx.log_tail, ["entry 7", "entry 8", "entry 9"]);

        let ctx = OracleContext::from_state(&state(), None);
        assert_eq!(ctx.log_tail.len(), 10);
    }

    #[test]
    fn test_context_actor_prefers_reaction() {
        let mut state = state();
        let ctx = OracleContext::from_state(&state, None);
        assert_eq!(ctx.current_actor().unwrap().display_name, "Amelia");
        assert!(!ctx.reaction);

        state.current_actor_index = Some(0);
        state.pending_reaction = Some("inv1".into());
        let ctx = OracleContext::from_state(&state, None);
        assert_eq!(ctx.current_actor_id, Some(ParticipantId::from("inv1")));
        assert!(ctx.reaction);
    }
}
