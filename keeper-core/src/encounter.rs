//! Encounter - the driver around the turn orchestrator.
//!
//! An [`Encounter`] owns one orchestrator and one combat state. It feeds
//! player input in, counts step invocations against the configured cap,
//! and checkpoints the state to disk.

use crate::oracle::Oracle;
use crate::orchestrator::{KeeperError, Step, TurnOrchestrator};
use crate::state::{CombatOutcome, CombatState, EncounterId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What the player sees after one step.
#[derive(Debug, Clone)]
pub struct Response {
    /// Narration, or the oracle's answer on the query and OOC paths.
    pub narration: String,

    /// The next step needs real input from the player.
    pub requires_player_input: bool,

    /// Whether the fight is over.
    pub fight_ended: bool,

    pub outcome: Option<CombatOutcome>,

    /// Steps visited during this invocation; empty for a forced stop.
    pub path: Vec<Step>,
}

/// One combat encounter in progress.
pub struct Encounter<O, R> {
    orchestrator: TurnOrchestrator<O, R>,
    state: CombatState,
    steps_taken: usize,
}

impl<O: Oracle, R: Rng> Encounter<O, R> {
    pub fn new(orchestrator: TurnOrchestrator<O, R>, state: CombatState) -> Self {
        Self {
            orchestrator,
            state,
            steps_taken: 0,
        }
    }

    /// Resume from a checkpoint written by [`Encounter::save`].
    pub fn resume(orchestrator: TurnOrchestrator<O, R>, path: impl AsRef<Path>) -> Result<Self, KeeperError> {
        let content = fs::read_to_string(path)?;
        let saved: SavedEncounter = serde_json::from_str(&content)?;
        saved.state.validate()?;
        info!(
            encounter = %saved.state.encounter_id,
            round = saved.state.round_number,
            "encounter resumed"
        );

        Ok(Self {
            orchestrator,
            state: saved.state,
            steps_taken: saved.steps_taken,
        })
    }

    /// Write the current state as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), KeeperError> {
        let saved = SavedEncounter {
            state: self.state.clone(),
            steps_taken: self.steps_taken,
        };

        let content = serde_json::to_string_pretty(&saved)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Save under `dir`, named after the encounter id. Returns the file path.
    pub fn save_in(&self, dir: impl AsRef<Path>) -> Result<PathBuf, KeeperError> {
        let path = checkpoint_path(dir, self.state.encounter_id);
        self.save(&path)?;
        Ok(path)
    }

    /// Run one step with the given input.
    ///
    /// Pass an empty string when the encounter is not waiting on the
    /// player. Once the step cap is reached the fight is ended instead.
    pub fn advance(&mut self, input: &str) -> Result<Response, KeeperError> {
        if self.state.fight_ended {
            return Err(KeeperError::EncounterFinished);
        }

        let max_steps = self.orchestrator.config().max_steps;
        if self.steps_taken >= max_steps {
            return Ok(self.force_end(max_steps));
        }

        let outcome = self.orchestrator.step(self.state.clone(), input)?;
        self.steps_taken += 1;
        self.state = outcome.state;

        Ok(self.response(outcome.narration, outcome.path))
    }

    /// Play until the fight ends or `next_input` has nothing more to say.
    ///
    /// `next_input` is only asked when the player must act; it receives the
    /// latest response. Returns the outcome, or `None` if the input ran out.
    pub fn run<F>(&mut self, mut next_input: F) -> Result<Option<CombatOutcome>, KeeperError>
    where
        F: FnMut(&Response) -> Option<String>,
    {
        let mut response = self.advance("")?;

        while !response.fight_ended {
            let input = if response.requires_player_input {
                match next_input(&response) {
                    Some(input) => input,
                    None => return Ok(None),
                }
            } else {
                String::new()
            };
            response = self.advance(&input)?;
        }

        Ok(response.outcome)
    }

    pub fn state(&self) -> &CombatState {
        &self.state
    }

    pub fn into_state(self) -> CombatState {
        self.state
    }

    pub fn id(&self) -> EncounterId {
        self.state.encounter_id
    }

    pub fn steps_taken(&self) -> usize {
        self.steps_taken
    }

    pub fn requires_player_input(&self) -> bool {
        self.state.requires_player_input
    }

    pub fn is_over(&self) -> bool {
        self.state.fight_ended
    }

    pub fn orchestrator(&self) -> &TurnOrchestrator<O, R> {
        &self.orchestrator
    }

    pub fn orchestrator_mut(&mut self) -> &mut TurnOrchestrator<O, R> {
        &mut self.orchestrator
    }

    fn force_end(&mut self, max_steps: usize) -> Response {
        let entry = format!("Step limit of {max_steps} reached, the fight is called off");
        warn!(encounter = %self.state.encounter_id, max_steps, "encounter forced to end");

        self.state.log(entry.clone());
        self.state.fight_ended = true;
        self.state.requires_player_input = false;
        self.state.outcome = Some(CombatOutcome::StepLimit);
        self.state.last_narration = Some(entry.clone());

        self.response(entry, Vec::new())
    }

    fn response(&self, narration: String, path: Vec<Step>) -> Response {
        Response {
            narration,
            requires_player_input: self.state.requires_player_input,
            fight_ended: self.state.fight_ended,
            outcome: self.state.outcome,
            path,
        }
    }
}

/// Where [`Encounter::save_in`] puts the checkpoint for `id`.
pub fn checkpoint_path(dir: impl AsRef<Path>, id: EncounterId) -> PathBuf {
    dir.as_ref().join(format!("{id}.json"))
}

/// Serializable encounter state for persistence.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedEncounter {
    state: CombatState,
    #[serde(default)]
    steps_taken: usize,
}
