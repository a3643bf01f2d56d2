//! Turn orchestrator: the combat state machine.
//!
//! One call to [`TurnOrchestrator::step`] takes the previous
//! [`CombatState`] and the player's raw input, walks the machine from
//! [`Step::RouteInput`] until it reaches a terminal step, and hands back
//! the new state with the narration for the player.
//!
//! - `RouteInput` goes to `InitializeCombat` before round 1, otherwise to
//!   `DirectAction`, `Query` or `Ooc` by classified intent.
//! - `InitializeCombat` and a valid `DirectAction` go to `DetermineNextStep`.
//! - `DetermineNextStep` goes to `CombatEnd`, `InitializeCombat`,
//!   `MonsterTurn` or `PrepareNextInput`; `MonsterTurn` comes back to it.
//! - `Query`, `Ooc`, `PrepareNextInput` and `CombatEnd` end the invocation.

use crate::config::KeeperConfig;
use crate::initiative::roll_initiative;
use crate::oracle::{Oracle, OracleContext, OracleError};
use crate::participant::{ParticipantId, ParticipantKind};
use crate::state::{apply_deltas, CombatOutcome, CombatState, Intent, StateError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Prefix for log entries written by the oracle.
const KEEPER_PREFIX: &str = "[Keeper]: ";

/// How many log entries stand in for narration when the narrator fails.
const FALLBACK_NARRATION_TAIL: usize = 3;

/// Errors from orchestration, encounters and checkpoints.
#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// The initiative order names someone who is not a participant.
    #[error("Actor integrity error: no participant with id {0}")]
    ActorIntegrity(ParticipantId),

    #[error("The encounter has already ended")]
    EncounterFinished,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// States of the turn machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    RouteInput,
    InitializeCombat,
    DirectAction,
    Query,
    Ooc,
    DetermineNextStep,
    MonsterTurn,
    PrepareNextInput,
    CombatEnd,
}

impl Step {
    /// An invocation ends once one of these has run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Step::Query | Step::Ooc | Step::PrepareNextInput | Step::CombatEnd
        )
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::RouteInput => "route_input",
            Step::InitializeCombat => "initialize_combat",
            Step::DirectAction => "direct_action",
            Step::Query => "query",
            Step::Ooc => "ooc",
            Step::DetermineNextStep => "determine_next_step",
            Step::MonsterTurn => "monster_turn",
            Step::PrepareNextInput => "prepare_next_input",
            Step::CombatEnd => "combat_end",
        };
        f.write_str(name)
    }
}

/// Result of one step invocation.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub state: CombatState,
    /// What the player should read.
    pub narration: String,
    /// Steps visited, in order, ending with a terminal one.
    pub path: Vec<Step>,
}

/// Drives one encounter's combat state machine.
///
/// Build one per encounter. The orchestrator owns the oracle and the
/// random source for initiative; the state travels through `step` by value.
pub struct TurnOrchestrator<O, R = StdRng> {
    oracle: O,
    config: KeeperConfig,
    rng: R,
}

impl<O: Oracle> TurnOrchestrator<O, StdRng> {
    pub fn new(oracle: O) -> Self {
        Self {
            oracle,
            config: KeeperConfig::default(),
            rng: StdRng::from_entropy(),
        }
    }
}

impl<O: Oracle, R: Rng> TurnOrchestrator<O, R> {
    pub fn with_config(mut self, config: KeeperConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a specific random source for initiative rolls.
    pub fn with_rng<R2: Rng>(self, rng: R2) -> TurnOrchestrator<O, R2> {
        TurnOrchestrator {
            oracle: self.oracle,
            config: self.config,
            rng,
        }
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    /// Run one invocation: from `RouteInput` to the first terminal step.
    ///
    /// Fails only when the fight has already ended. Oracle failures and
    /// broken initiative orders are absorbed into the log so the
    /// encounter can go on.
    pub fn step(&mut self, state: CombatState, input: &str) -> Result<StepOutcome, KeeperError> {
        if state.fight_ended {
            return Err(KeeperError::EncounterFinished);
        }

        let mut state = state;
        state.player_input = Some(input.to_string());

        let mut path = Vec::new();
        let mut current = Step::RouteInput;

        let narration = loop {
            path.push(current);
            debug!(step = %current, round = state.round_number, "orchestrator step");

            current = match current {
                Step::RouteInput => self.route_input(&mut state),
                Step::InitializeCombat => self.initialize_combat(&mut state),
                Step::DirectAction => self.direct_action(&mut state),
                Step::Query => break self.query(&mut state),
                Step::Ooc => break self.ooc(&mut state),
                Step::DetermineNextStep => match determine_next_step(&mut state) {
                    Ok(next) => next,
                    Err(e) => {
                        warn!(error = %e, round = state.round_number, "round abandoned");
                        break e.to_string();
                    }
                },
                Step::MonsterTurn => self.monster_turn(&mut state),
                Step::PrepareNextInput | Step::CombatEnd => break self.narrate(&mut state),
            };
        };

        state.last_narration = Some(narration.clone());
        Ok(StepOutcome {
            state,
            narration,
            path,
        })
    }

    /// Pick the path for this invocation.
    ///
    /// Before the first round, and after a round was abandoned, combat is
    /// (re)initialized without looking at the input. Otherwise the oracle
    /// classifies it; anything it cannot place goes to the OOC path.
    pub fn route_input(&mut self, state: &mut CombatState) -> Step {
        if state.round_number == 0 || state.round_ended {
            return Step::InitializeCombat;
        }

        let ctx = OracleContext::from_state(state, Some(self.config.query_log_tail));
        let intent = self.oracle.classify_intent(&ctx).unwrap_or_else(|e| {
            warn!(error = %e, "intent classification failed");
            Intent::FuzzyIntent
        });
        state.classified_intent = Some(intent);

        match intent {
            Intent::DirectAction => Step::DirectAction,
            Intent::Query => Step::Query,
            Intent::Ooc | Intent::FuzzyIntent => Step::Ooc,
        }
    }

    /// Start a round: fresh initiative, counters and flags reset.
    pub fn initialize_combat(&mut self, state: &mut CombatState) -> Step {
        if state.round_number == 0 {
            state.log("Combat begins");
        }

        let order = roll_initiative(&state.participants, self.config.initiative_direction, &mut self.rng);
        state.initiative_order = order.into_iter().map(|entry| entry.id).collect();
        state.round_number += 1;
        state.current_actor_index = None;

        state.is_valid_action = false;
        state.requires_player_input = false;
        state.round_ended = false;
        state.normal_circle_ended = false;
        state.pending_reaction = None;

        let names: Vec<String> = state.initiative_order.iter().map(ToString::to_string).collect();
        info!(round = state.round_number, order = ?names, "round started");
        state.log(format!(
            "Round {}: initiative order is {}",
            state.round_number,
            names.join(", ")
        ));

        Step::DetermineNextStep
    }

    /// Resolve the player's action through the oracle.
    pub fn direct_action(&mut self, state: &mut CombatState) -> Step {
        let ctx = OracleContext::from_state(state, None);
        match self.oracle.resolve_player_action(&ctx) {
            Ok(resolution) if resolution.is_valid => {
                let participants = std::mem::take(&mut state.participants);
                state.participants = apply_deltas(participants, &resolution.participant_deltas);
                state.log(format!("{KEEPER_PREFIX}{}", resolution.description));
                state.is_valid_action = true;
                if let Some(id) = state.pending_reaction.take() {
                    debug!(investigator = %id, "reaction resolved");
                }
                Step::DetermineNextStep
            }
            Ok(resolution) => {
                state.log(format!("{KEEPER_PREFIX}{}", resolution.description));
                state.is_valid_action = false;
                Step::PrepareNextInput
            }
            Err(e) => {
                warn!(error = %e, "player action could not be resolved");
                state.log(format!("{KEEPER_PREFIX}The action could not be resolved ({e}). Try again."));
                state.is_valid_action = false;
                Step::PrepareNextInput
            }
        }
    }

    /// Answer a rules question. Terminal.
    pub fn query(&mut self, state: &mut CombatState) -> String {
        let ctx = OracleContext::from_state(state, Some(self.config.query_log_tail));
        let answer = self.oracle.answer_rules_query(&ctx);
        record_answer(state, answer, "rules query")
    }

    /// Answer out-of-character chatter. Terminal.
    pub fn ooc(&mut self, state: &mut CombatState) -> String {
        let ctx = OracleContext::from_state(state, Some(self.config.ooc_log_tail));
        let answer = self.oracle.answer_ooc(&ctx);
        record_answer(state, answer, "ooc")
    }

    /// Let the oracle play the current monster.
    pub fn monster_turn(&mut self, state: &mut CombatState) -> Step {
        let ctx = OracleContext::from_state(state, None);
        match self.oracle.decide_monster_action(&ctx) {
            Ok(action) => {
                let participants = std::mem::take(&mut state.participants);
                state.participants = apply_deltas(participants, &action.participant_deltas);
                state.log(format!("{KEEPER_PREFIX}{}", action.description));
                state.requires_player_input = action.requires_player_input;
                if action.requires_player_input {
                    state.pending_reaction = action.reaction_target;
                }
            }
            Err(e) => {
                let actor = state
                    .current_actor()
                    .map(|p| p.display_name.clone())
                    .unwrap_or_default();
                warn!(error = %e, monster = %actor, "monster turn failed");
                state.log(format!("{KEEPER_PREFIX}{actor} hesitates."));
            }
        }
        Step::DetermineNextStep
    }

    /// Narrate the whole fight so far. Terminal.
    pub fn narrate(&mut self, state: &mut CombatState) -> String {
        let ctx = OracleContext::from_state(state, None);
        self.oracle.narrate(&ctx).unwrap_or_else(|e| {
            warn!(error = %e, "narration failed");
            state.log_tail(FALLBACK_NARRATION_TAIL).join("\n")
        })
    }
}

/// Decide who acts next, or whether the fight or the round is over.
///
/// Termination is checked before anything else. A pending reaction holds
/// the turn pointer in place. The next slot in the order is routed by
/// kind alone; the oracle decides what a downed participant can do.
pub fn determine_next_step(state: &mut CombatState) -> Result<Step, KeeperError> {
    if state.side_defeated(ParticipantKind::Investigator) {
        return Ok(end_fight(state, CombatOutcome::Defeat));
    }
    if state.side_defeated(ParticipantKind::Enemy) {
        return Ok(end_fight(state, CombatOutcome::Victory));
    }

    if let Some(id) = state.pending_reaction.clone() {
        match state.participant(&id) {
            Some(p) if p.is_investigator() && !p.is_down() => {
                let entry = format!("{} must respond", p.display_name);
                state.requires_player_input = true;
                state.log(entry);
                return Ok(Step::PrepareNextInput);
            }
            _ => {
                warn!(investigator = %id, "dropping reaction for unavailable participant");
                state.pending_reaction = None;
            }
        }
    }

    let next = state.current_actor_index.map_or(0, |i| i + 1);
    if next >= state.initiative_order.len() {
        state.round_ended = true;
        state.current_actor_index = None;
        state.log(format!("Round {} ends", state.round_number));
        return Ok(Step::InitializeCombat);
    }
    state.current_actor_index = Some(next);

    let id = state.initiative_order[next].clone();
    let Some(actor) = state.participant(&id) else {
        state.log(format!("Error: no participant with id {id} in the initiative order"));
        state.round_ended = true;
        return Err(KeeperError::ActorIntegrity(id));
    };

    let kind = actor.kind;
    let entry = format!("It is {}'s turn", actor.display_name);
    state.log(entry);

    Ok(match kind {
        ParticipantKind::Investigator => {
            state.requires_player_input = true;
            state.normal_circle_ended = true;
            Step::PrepareNextInput
        }
        ParticipantKind::Enemy => {
            state.requires_player_input = false;
            Step::MonsterTurn
        }
    })
}

fn record_answer(
    state: &mut CombatState,
    answer: Result<String, OracleError>,
    what: &'static str,
) -> String {
    let text = match answer {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, capability = what, "oracle call failed");
            "The Keeper pauses, lost in thought. Please ask again.".to_string()
        }
    };
    state.log(format!("{KEEPER_PREFIX}{text}"));
    text
}

fn end_fight(state: &mut CombatState, outcome: CombatOutcome) -> Step {
    let entry = match outcome {
        CombatOutcome::Defeat => "All investigators have fallen. The fight is over!",
        CombatOutcome::Victory => "All enemies have fallen. The investigators prevail!",
        CombatOutcome::StepLimit => "The fight is called off.",
    };
    state.log(entry);
    state.fight_ended = true;
    state.requires_player_input = false;
    state.outcome = Some(outcome);
    info!(?outcome, round = state.round_number, "combat ended");
    Step::CombatEnd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::{Participant, ParticipantStatus, Stats};
    use crate::state::CombatMap;
    use crate::testing::MockOracle;

    fn inv(id: &str, hp: i32) -> Participant {
        Participant::investigator(id, format!("Investigator {id}"), Stats::new(hp, 12).unwrap())
    }

    fn ghoul(id: &str, hp: i32) -> Participant {
        Participant::enemy(id, format!("Ghoul {id}"), Stats::new(hp, 13).unwrap())
    }

    fn state(participants: Vec<Participant>) -> CombatState {
        CombatState::new(participants, CombatMap::new("Cellar")).unwrap()
    }

    fn orchestrator(oracle: MockOracle) -> TurnOrchestrator<MockOracle, StdRng> {
        TurnOrchestrator::new(oracle).with_rng(StdRng::seed_from_u64(3))
    }

    #[test]
    fn test_defeat_ends_fight() {
        let mut state = state(vec![inv("inv1", 0), ghoul("gh1", 5)]);
        state.round_number = 1;
        state.initiative_order = vec!["inv1".into(), "gh1".into()];

        let next = determine_next_step(&mut state).unwrap();

        assert_eq!(next, Step::CombatEnd);
        assert!(state.fight_ended);
        assert_eq!(state.outcome, Some(CombatOutcome::Defeat));
        assert!(state.combat_log().last().unwrap().contains("investigators have fallen"));
    }

    #[test]
    fn test_victory_ends_fight() {
        let mut state = state(vec![inv("inv1", 8), ghoul("gh1", 5).with_status(ParticipantStatus::Fled)]);
        state.round_number = 1;

        assert_eq!(determine_next_step(&mut state).unwrap(), Step::CombatEnd);
        assert_eq!(state.outcome, Some(CombatOutcome::Victory));
    }

    #[test]
    fn test_round_rollover() {
        let mut state = state(vec![inv("a", 8), ghoul("b", 5)]);
        state.round_number = 1;
        state.initiative_order = vec!["a".into(), "b".into()];
        state.current_actor_index = Some(1);

        let next = determine_next_step(&mut state).unwrap();

        assert_eq!(next, Step::InitializeCombat);
        assert!(state.round_ended);
        assert_eq!(state.current_actor_index, None);
    }

    #[test]
    fn test_investigator_turn_waits_for_input() {
        let mut state = state(vec![inv("a", 8), ghoul("b", 5)]);
        state.round_number = 1;
        state.initiative_order = vec!["b".into(), "a".into()];
        state.current_actor_index = Some(0);

        assert_eq!(determine_next_step(&mut state).unwrap(), Step::PrepareNextInput);
        assert!(state.requires_player_input);
        assert!(state.normal_circle_ended);
        assert_eq!(state.current_actor_id(), Some(&ParticipantId::from("a")));
    }

    #[test]
    fn test_enemy_turn_goes_to_monster() {
        let mut state = state(vec![inv("a", 8), ghoul("b", 5)]);
        state.round_number = 1;
        state.initiative_order = vec!["b".into(), "a".into()];

        assert_eq!(determine_next_step(&mut state).unwrap(), Step::MonsterTurn);
        assert!(!state.requires_player_input);
    }

    #[test]
    fn test_downed_enemy_still_gets_its_slot() {
        let mut state = state(vec![inv("a", 8), ghoul("b", 0), ghoul("c", 5)]);
        state.round_number = 1;
        state.initiative_order = vec!["b".into(), "c".into(), "a".into()];

        assert_eq!(determine_next_step(&mut state).unwrap(), Step::MonsterTurn);
        assert_eq!(state.current_actor_id(), Some(&ParticipantId::from("b")));
        assert_eq!(state.combat_log().last().unwrap(), "It is Ghoul b's turn");
    }

    #[test]
    fn test_downed_investigator_still_waits_for_input() {
        let mut state = state(vec![inv("a", 0), inv("d", 6), ghoul("b", 5)]);
        state.round_number = 1;
        state.initiative_order = vec!["b".into(), "a".into(), "d".into()];
        state.current_actor_index = Some(0);

        assert_eq!(determine_next_step(&mut state).unwrap(), Step::PrepareNextInput);
        assert_eq!(state.current_actor_id(), Some(&ParticipantId::from("a")));
        assert!(state.requires_player_input);
    }

    #[test]
    fn test_unknown_actor_is_integrity_error() {
        let mut state = state(vec![inv("a", 8), ghoul("b", 5)]);
        state.round_number = 1;
        state.initiative_order = vec!["ghost".into(), "a".into()];

        let err = determine_next_step(&mut state).unwrap_err();

        assert!(matches!(err, KeeperError::ActorIntegrity(ref id) if id.as_str() == "ghost"));
        assert!(state.round_ended);
        assert!(state.combat_log().last().unwrap().starts_with("Error"));
    }

    #[test]
    fn test_pending_reaction_holds_turn() {
        let mut state = state(vec![inv("a", 8), ghoul("b", 5)]);
        state.round_number = 1;
        state.initiative_order = vec!["b".into(), "a".into()];
        state.current_actor_index = Some(0);
        state.pending_reaction = Some("a".into());

        assert_eq!(determine_next_step(&mut state).unwrap(), Step::PrepareNextInput);
        assert_eq!(state.current_actor_index, Some(0));
        assert!(state.requires_player_input);
    }

    #[test]
    fn test_round_zero_initializes_regardless_of_input() {
        let mut orch = orchestrator(MockOracle::new());
        for input in ["", "I attack!", "what are the rules?"] {
            let mut state = state(vec![inv("a", 8), ghoul("b", 5)]);
            state.player_input = Some(input.to_string());
            assert_eq!(orch.route_input(&mut state), Step::InitializeCombat);
        }
        assert!(orch.oracle().calls().is_empty());
    }

    #[test]
    fn test_initialize_combat_resets_flags() {
        let mut orch = orchestrator(MockOracle::new());
        let mut state = state(vec![inv("a", 8), ghoul("b", 5), ghoul("c", 0).with_status(ParticipantStatus::Dead)]);
        state.round_ended = true;
        state.requires_player_input = true;
        state.pending_reaction = Some("a".into());

        assert_eq!(orch.initialize_combat(&mut state), Step::DetermineNextStep);

        assert_eq!(state.round_number, 1);
        assert_eq!(state.initiative_order.len(), 2);
        assert_eq!(state.current_actor_index, None);
        assert!(!state.round_ended && !state.requires_player_input);
        assert_eq!(state.pending_reaction, None);
        assert_eq!(state.combat_log()[0], "Combat begins");
        let order_line = state.combat_log().last().unwrap();
        assert!(order_line.starts_with("Round 1: initiative order is "));
        assert!(order_line.ends_with("a, b") || order_line.ends_with("b, a"));
    }

    #[test]
    fn test_finished_fight_rejects_step() {
        let mut orch = orchestrator(MockOracle::new());
        let mut state = state(vec![inv("a", 8), ghoul("b", 5)]);
        state.fight_ended = true;
        assert!(matches!(orch.step(state, "hello"), Err(KeeperError::EncounterFinished)));
    }

    #[test]
    fn test_step_display() {
        assert_eq!(Step::DetermineNextStep.to_string(), "determine_next_step");
        assert!(Step::Ooc.is_terminal());
        assert!(!Step::MonsterTurn.is_terminal());
    }
}
