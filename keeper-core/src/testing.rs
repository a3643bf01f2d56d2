//! Testing utilities for combat scenarios.
//!
//! This module provides tools for integration testing:
//! - `MockOracle` for deterministic runs without a language model
//! - `TestHarness` for scripted encounters
//! - Assertion helpers for verifying combat state

use crate::oracle::{ActionResolution, MonsterAction, Oracle, OracleContext, OracleError};
use crate::orchestrator::{KeeperError, Step, TurnOrchestrator};
use crate::participant::{Participant, ParticipantId, ParticipantStatus, Stats};
use crate::state::{CombatMap, CombatOutcome, CombatState, Intent, Zone};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;

/// Oracle capabilities, as recorded by [`MockOracle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OracleCall {
    ClassifyIntent,
    ResolvePlayerAction,
    DecideMonsterAction,
    AnswerRulesQuery,
    AnswerOoc,
    Narrate,
}

type Scripted<T> = VecDeque<Result<T, OracleError>>;

/// An oracle that replays scripted answers.
///
/// Each capability has its own queue. When a queue runs dry the mock
/// falls back to a harmless default, so tests only script what they check.
#[derive(Default)]
pub struct MockOracle {
    intents: Scripted<Intent>,
    actions: Scripted<ActionResolution>,
    monsters: Scripted<MonsterAction>,
    rules: Scripted<String>,
    ooc: Scripted<String>,
    narrations: Scripted<String>,
    calls: Vec<OracleCall>,
    contexts: Vec<OracleContext>,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_intent(&mut self, intent: Intent) -> &mut Self {
        self.intents.push_back(Ok(intent));
        self
    }

    pub fn queue_action(&mut self, resolution: ActionResolution) -> &mut Self {
        self.actions.push_back(Ok(resolution));
        self
    }

    pub fn queue_monster(&mut self, action: MonsterAction) -> &mut Self {
        self.monsters.push_back(Ok(action));
        self
    }

    pub fn queue_rules(&mut self, answer: impl Into<String>) -> &mut Self {
        self.rules.push_back(Ok(answer.into()));
        self
    }

    pub fn queue_ooc(&mut self, answer: impl Into<String>) -> &mut Self {
        self.ooc.push_back(Ok(answer.into()));
        self
    }

    pub fn queue_narration(&mut self, text: impl Into<String>) -> &mut Self {
        self.narrations.push_back(Ok(text.into()));
        self
    }

    /// Make the next call to `call` fail with `error`.
    pub fn queue_failure(&mut self, call: OracleCall, error: OracleError) -> &mut Self {
        match call {
            OracleCall::ClassifyIntent => self.intents.push_back(Err(error)),
            OracleCall::ResolvePlayerAction => self.actions.push_back(Err(error)),
            OracleCall::DecideMonsterAction => self.monsters.push_back(Err(error)),
            OracleCall::AnswerRulesQuery => self.rules.push_back(Err(error)),
            OracleCall::AnswerOoc => self.ooc.push_back(Err(error)),
            OracleCall::Narrate => self.narrations.push_back(Err(error)),
        }
        self
    }

    /// Every capability invoked so far, in order.
    pub fn calls(&self) -> &[OracleCall] {
        &self.calls
    }

    pub fn call_count(&self, call: OracleCall) -> usize {
        self.calls.iter().filter(|c| **c == call).count()
    }

    /// Context passed to each call, parallel to [`MockOracle::calls`].
    pub fn contexts(&self) -> &[OracleContext] {
        &self.contexts
    }

    pub fn last_context(&self) -> Option<&OracleContext> {
        self.contexts.last()
    }

    fn record(&mut self, call: OracleCall, ctx: &OracleContext) {
        self.calls.push(call);
        self.contexts.push(ctx.clone());
    }
}

impl Oracle for MockOracle {
    fn classify_intent(&mut self, ctx: &OracleContext) -> Result<Intent, OracleError> {
        self.record(OracleCall::ClassifyIntent, ctx);
        self.intents.pop_front().unwrap_or(Ok(Intent::FuzzyIntent))
    }

    fn resolve_player_action(&mut self, ctx: &OracleContext) -> Result<ActionResolution, OracleError> {
        self.record(OracleCall::ResolvePlayerAction, ctx);
        self.actions
            .pop_front()
            .unwrap_or_else(|| Ok(invalid_action("The Keeper has no more scripted rulings.")))
    }

    fn decide_monster_action(&mut self, ctx: &OracleContext) -> Result<MonsterAction, OracleError> {
        self.record(OracleCall::DecideMonsterAction, ctx);
        self.monsters.pop_front().unwrap_or_else(|| {
            let name = ctx
                .current_actor()
                .map(|p| p.display_name.clone())
                .unwrap_or_else(|| "The creature".to_string());
            Ok(monster_action(format!("{name} circles, waiting."), vec![]))
        })
    }

    fn answer_rules_query(&mut self, ctx: &OracleContext) -> Result<String, OracleError> {
        self.record(OracleCall::AnswerRulesQuery, ctx);
        self.rules
            .pop_front()
            .unwrap_or_else(|| Ok("No more scripted rulings.".to_string()))
    }

    fn answer_ooc(&mut self, ctx: &OracleContext) -> Result<String, OracleError> {
        self.record(OracleCall::AnswerOoc, ctx);
        self.ooc
            .pop_front()
            .unwrap_or_else(|| Ok("No more scripted chatter.".to_string()))
    }

    fn narrate(&mut self, ctx: &OracleContext) -> Result<String, OracleError> {
        self.record(OracleCall::Narrate, ctx);
        self.narrations
            .pop_front()
            .unwrap_or_else(|| Ok(ctx.log_tail.last().cloned().unwrap_or_default()))
    }
}

// ============================================================================
// Scripted results
// ============================================================================

/// A valid action with the given outcome.
pub fn valid_action(description: impl Into<String>, deltas: Vec<Participant>) -> ActionResolution {
    ActionResolution {
        is_valid: true,
        description: description.into(),
        participant_deltas: deltas,
    }
}

/// A refused action.
pub fn invalid_action(reason: impl Into<String>) -> ActionResolution {
    ActionResolution {
        is_valid: false,
        description: reason.into(),
        participant_deltas: Vec::new(),
    }
}

pub fn monster_action(description: impl Into<String>, deltas: Vec<Participant>) -> MonsterAction {
    MonsterAction {
        description: description.into(),
        participant_deltas: deltas,
        requires_player_input: false,
        reaction_target: None,
    }
}

/// A monster action that forces `target` to dodge or fight back.
pub fn forced_reaction(description: impl Into<String>, target: &str) -> MonsterAction {
    MonsterAction {
        description: description.into(),
        participant_deltas: Vec::new(),
        requires_player_input: true,
        reaction_target: Some(ParticipantId::from(target)),
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A sample encounter: one investigator against one ghoul in a cellar.
///
/// DEX values are far apart so the investigator always acts first.
pub fn sample_encounter() -> CombatState {
    let participants = vec![
        Participant::investigator(
            "amelia",
            "Amelia Clark",
            Stats::new(12, 12)
                .expect("sample stats are valid")
                .with_san(60)
                .with_dex(0)
                .with_stat("Firearms", 45),
        )
        .with_item(".38 revolver"),
        Participant::enemy(
            "ghoul",
            "Ghoul",
            Stats::new(13, 13).expect("sample stats are valid").with_dex(200),
        ),
    ];
    let map = CombatMap::new("Arkham cellar")
        .with_zone("stairs", Zone::new("Rotten wooden stairs").adjacent_to("cellar"))
        .with_zone(
            "cellar",
            Zone::new("A damp cellar full of crates")
                .adjacent_to("stairs")
                .with_property("dark"),
        );

    CombatState::new(participants, map).expect("sample participant ids are unique")
}

/// Test harness for running scripted encounters.
pub struct TestHarness {
    pub orchestrator: TurnOrchestrator<MockOracle, StdRng>,
    pub state: CombatState,
    last_path: Vec<Step>,
}

impl TestHarness {
    /// A harness over [`sample_encounter`].
    pub fn new() -> Self {
        Self::with_state(sample_encounter())
    }

    pub fn with_state(state: CombatState) -> Self {
        let orchestrator = TurnOrchestrator::new(MockOracle::new()).with_rng(StdRng::seed_from_u64(7));
        Self {
            orchestrator,
            state,
            last_path: Vec::new(),
        }
    }

    pub fn oracle(&self) -> &MockOracle {
        self.orchestrator.oracle()
    }

    pub fn oracle_mut(&mut self) -> &mut MockOracle {
        self.orchestrator.oracle_mut()
    }

    /// Send player input through one step; returns the narration.
    pub fn input(&mut self, text: &str) -> Result<String, KeeperError> {
        let outcome = self.orchestrator.step(self.state.clone(), text)?;
        self.state = outcome.state;
        self.last_path = outcome.path;
        Ok(outcome.narration)
    }

    /// Run the opening step (round 0 has no player input).
    pub fn start(&mut self) -> Result<String, KeeperError> {
        self.input("")
    }

    /// Queue a classified intent followed by a resolution for it.
    pub fn expect_action(&mut self, resolution: ActionResolution) -> &mut Self {
        self.oracle_mut()
            .queue_intent(Intent::DirectAction)
            .queue_action(resolution);
        self
    }

    pub fn expect_monster(&mut self, action: MonsterAction) -> &mut Self {
        self.oracle_mut().queue_monster(action);
        self
    }

    pub fn last_path(&self) -> &[Step] {
        &self.last_path
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.state.participant(&ParticipantId::from(id))
    }

    pub fn hp(&self, id: &str) -> Option<i32> {
        self.participant(id).map(|p| p.stats.hp())
    }

    pub fn status(&self, id: &str) -> Option<ParticipantStatus> {
        self.participant(id).map(|p| p.status)
    }

    pub fn log_contains(&self, needle: &str) -> bool {
        self.state.combat_log().iter().any(|entry| entry.contains(needle))
    }

    /// Copy of `id` with HP set to `hp`, for scripting deltas.
    pub fn with_hp(&self, id: &str, hp: i32) -> Participant {
        let mut p = self
            .participant(id)
            .cloned()
            .unwrap_or_else(|| panic!("no participant '{id}' in harness"));
        p.stats.set_hp(hp);
        p
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert a participant's HP.
#[track_caller]
pub fn assert_hp(harness: &TestHarness, id: &str, hp: i32) {
    let actual = harness.hp(id);
    assert_eq!(actual, Some(hp), "Expected {id} to have HP {hp}, got {actual:?}");
}

/// Assert the path taken by the last step.
#[track_caller]
pub fn assert_path(harness: &TestHarness, expected: &[Step]) {
    assert_eq!(
        harness.last_path(),
        expected,
        "Unexpected path through the turn machine"
    );
}

/// Assert the encounter is waiting on `id`.
#[track_caller]
pub fn assert_awaiting(harness: &TestHarness, id: &str) {
    assert!(
        harness.state.requires_player_input,
        "Expected the encounter to wait for player input"
    );
    let acting = harness.state.acting_id().map(ParticipantId::as_str);
    assert_eq!(acting, Some(id), "Expected {id} to be acting, got {acting:?}");
}

/// Assert the fight ended with `outcome`.
#[track_caller]
pub fn assert_outcome(harness: &TestHarness, outcome: CombatOutcome) {
    assert!(harness.state.fight_ended, "Expected the fight to be over");
    assert_eq!(harness.state.outcome, Some(outcome));
}

#[track_caller]
pub fn assert_log_contains(harness: &TestHarness, needle: &str) {
    assert!(
        harness.log_contains(needle),
        "Expected combat log to contain '{needle}', got {:#?}",
        harness.state.combat_log()
    );
}
