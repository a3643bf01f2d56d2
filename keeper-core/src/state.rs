//! Combat state: the aggregate carried through every orchestration step.
//!
//! A [`CombatState`] is created once per encounter (round 0, empty
//! initiative order), handed by value to each step, and returned updated.
//! The combat log only ever grows.

use crate::participant::{Participant, ParticipantId, ParticipantKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Identifier of one encounter, used to key checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncounterId(pub Uuid);

impl EncounterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EncounterId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EncounterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Map
// ============================================================================

/// One named area of the battlefield.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub description: String,
    #[serde(default, alias = "adjacent_zones")]
    pub adjacent_zones: Vec<String>,
    #[serde(default)]
    pub properties: Vec<String>,
}

impl Zone {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn adjacent_to(mut self, zone: impl Into<String>) -> Self {
        self.adjacent_zones.push(zone.into());
        self
    }

    pub fn with_property(mut self, tag: impl Into<String>) -> Self {
        self.properties.push(tag.into());
        self
    }
}

/// Zone graph of the encounter. Only ever read, for narration context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatMap {
    pub name: String,
    #[serde(default)]
    pub zones: BTreeMap<String, Zone>,
}

impl CombatMap {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            zones: BTreeMap::new(),
        }
    }

    pub fn with_zone(mut self, id: impl Into<String>, zone: Zone) -> Self {
        self.zones.insert(id.into(), zone);
        self
    }
}

// ============================================================================
// Intent and outcome
// ============================================================================

/// What a piece of player input is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    /// An in-fiction action: attack, dodge, move, fight back.
    DirectAction,
    /// A question about rules or the current state.
    Query,
    /// Out-of-character chatter.
    Ooc,
    /// Could not tell. Routed like [`Intent::Ooc`] so the keeper can ask
    /// the player to clarify instead of guessing an action.
    FuzzyIntent,
}

/// How an encounter finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombatOutcome {
    /// Every enemy is down.
    Victory,
    /// Every investigator is down.
    Defeat,
    /// The driver's step cap was hit first.
    StepLimit,
}

// ============================================================================
// Combat state
// ============================================================================

/// Errors from assembling a combat state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("Duplicate participant id: {0}")]
    DuplicateParticipant(ParticipantId),
}

/// Aggregate state of one encounter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatState {
    pub encounter_id: EncounterId,

    /// Display order, not turn order.
    pub participants: Vec<Participant>,
    /// Turn order for the current round only.
    pub initiative_order: Vec<ParticipantId>,
    /// 0 until combat starts.
    pub round_number: u32,
    /// `None` between rounds; otherwise an index into `initiative_order`.
    pub current_actor_index: Option<usize>,
    pub map: CombatMap,
    combat_log: Vec<String>,

    // Per-step fields
    pub player_input: Option<String>,
    pub classified_intent: Option<Intent>,
    pub is_valid_action: bool,
    pub requires_player_input: bool,
    pub round_ended: bool,
    pub fight_ended: bool,
    pub normal_circle_ended: bool,
    pub last_narration: Option<String>,

    /// Investigator who owes a reaction (dodge or fight back) to a monster.
    #[serde(default)]
    pub pending_reaction: Option<ParticipantId>,
    #[serde(default)]
    pub outcome: Option<CombatOutcome>,
}

fn check_unique_ids(participants: &[Participant]) -> Result<(), StateError> {
    let mut seen = HashSet::new();
    for p in participants {
        if !seen.insert(&p.id) {
            return Err(StateError::DuplicateParticipant(p.id.clone()));
        }
    }
    Ok(())
}

impl CombatState {
    /// Start a new encounter at round 0.
    pub fn new(participants: Vec<Participant>, map: CombatMap) -> Result<Self, StateError> {
        check_unique_ids(&participants)?;

        Ok(Self {
            encounter_id: EncounterId::new(),
            participants,
            initiative_order: Vec::new(),
            round_number: 0,
            current_actor_index: None,
            map,
            combat_log: Vec::new(),
            player_input: None,
            classified_intent: None,
            is_valid_action: false,
            requires_player_input: false,
            round_ended: false,
            fight_ended: false,
            normal_circle_ended: false,
            last_narration: None,
            pending_reaction: None,
            outcome: None,
        })
    }

    /// Re-check what `new` enforces, for states that came from elsewhere.
    pub fn validate(&self) -> Result<(), StateError> {
        check_unique_ids(&self.participants)
    }

    pub fn combat_log(&self) -> &[String] {
        &self.combat_log
    }

    /// The last `n` log entries (all of them if there are fewer).
    pub fn log_tail(&self, n: usize) -> &[String] {
        let start = self.combat_log.len().saturating_sub(n);
        &self.combat_log[start..]
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    /// Id of whoever holds the current turn slot.
    pub fn current_actor_id(&self) -> Option<&ParticipantId> {
        self.current_actor_index
            .and_then(|i| self.initiative_order.get(i))
    }

    pub fn current_actor(&self) -> Option<&Participant> {
        self.current_actor_id().and_then(|id| self.participant(id))
    }

    /// Who is acting right now: a pending reaction outranks the turn slot.
    pub fn acting_id(&self) -> Option<&ParticipantId> {
        self.pending_reaction.as_ref().or_else(|| self.current_actor_id())
    }

    pub fn side(&self, kind: ParticipantKind) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(move |p| p.kind == kind)
    }

    /// True when every member of `kind` is down.
    pub fn side_defeated(&self, kind: ParticipantKind) -> bool {
        self.side(kind).all(Participant::is_down)
    }
}

/// Append entries to the log. Nothing is ever removed.
pub fn append_log<I, S>(mut state: CombatState, entries: I) -> CombatState
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    state.combat_log.extend(entries.into_iter().map(Into::into));
    state
}

impl CombatState {
    /// In-place form of [`append_log`] for a single entry.
    pub(crate) fn log(&mut self, entry: impl Into<String>) {
        self.combat_log.push(entry.into());
    }
}

/// Merge participant deltas by whole-record replacement.
///
/// A delta replaces the participant with the same id; deltas for unknown
/// ids are dropped. Order and membership of `participants` never change.
pub fn apply_deltas(participants: Vec<Participant>, deltas: &[Participant]) -> Vec<Participant> {
    participants
        .into_iter()
        .map(|p| {
            deltas
                .iter()
                .rev()
                .find(|d| d.id == p.id)
                .cloned()
                .unwrap_or(p)
        })
        .collect()
}
