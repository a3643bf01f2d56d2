//! Initiative scheduling.
//!
//! Each round, every active participant rolls `1d100 + DEX` (DEX defaults
//! to 50). The order is recomputed from scratch at the start of every
//! round and never mid-round.

use crate::participant::{Participant, ParticipantId};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Which end of the initiative ranking acts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InitiativeDirection {
    /// Lowest `roll + DEX` acts first.
    #[default]
    LowestFirst,
    /// Highest `roll + DEX` acts first, the usual tabletop convention.
    HighestFirst,
}

/// One participant's initiative for a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiativeEntry {
    pub id: ParticipantId,
    pub roll: i32,
    pub dex: i32,
}

impl InitiativeEntry {
    /// `roll + dex`, widened so no stat block can overflow it.
    pub fn value(&self) -> i64 {
        i64::from(self.roll) + i64::from(self.dex)
    }
}

/// Roll initiative for every active participant, sorted into turn order.
///
/// The sort is stable, so ties keep the participants' list order.
pub fn roll_initiative<R: Rng + ?Sized>(
    participants: &[Participant],
    direction: InitiativeDirection,
    rng: &mut R,
) -> Vec<InitiativeEntry> {
    let mut entries: Vec<InitiativeEntry> = participants
        .iter()
        .filter(|p| p.is_active())
        .map(|p| InitiativeEntry {
            id: p.id.clone(),
            roll: rng.gen_range(1..=100),
            dex: p.stats.dex_or_default(),
        })
        .collect();

    match direction {
        InitiativeDirection::LowestFirst => entries.sort_by_key(|e| e.value()),
        InitiativeDirection::HighestFirst => entries.sort_by_key(|e| std::cmp::Reverse(e.value())),
    }
    entries
}

/// Turn order for the next round, lowest initiative first.
pub fn compute_order<R: Rng + ?Sized>(participants: &[Participant], rng: &mut R) -> Vec<ParticipantId> {
    roll_initiative(participants, InitiativeDirection::LowestFirst, rng)
        .into_iter()
        .map(|e| e.id)
        .collect()
}
