//! Combat participants: investigators and the things trying to eat them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// DEX assumed for initiative when a participant has none recorded.
pub const DEFAULT_DEX: i32 = 50;

/// Stable, unique key of a participant within one encounter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Which side a participant fights on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    Investigator,
    Enemy,
}

/// Whether a participant can still act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    #[default]
    Active,
    Unconscious,
    Dead,
    Insane,
    Fled,
}

/// Errors from validating a stat block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatsError {
    #[error("maxHP must not be negative (got {0})")]
    NegativeMaxHp(i32),
    #[error("HP {hp} exceeds maxHP {max_hp}")]
    HpAboveMax { hp: i32, max_hp: i32 },
}

/// A participant's numbers.
///
/// HP and maxHP are required and checked against each other; SAN and DEX
/// are the other keys the keeper reads. Everything else (STR, skills such
/// as `fighting` or `dodge`) lives in the open `extra` map and round-trips
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStats", into = "RawStats")]
pub struct Stats {
    hp: i32,
    max_hp: i32,
    san: Option<i32>,
    dex: Option<i32>,
    extra: BTreeMap<String, i32>,
}

impl Stats {
    pub fn new(hp: i32, max_hp: i32) -> Result<Self, StatsError> {
        Self::validate(hp, max_hp)?;
        Ok(Self {
            hp,
            max_hp,
            san: None,
            dex: None,
            extra: BTreeMap::new(),
        })
    }

    fn validate(hp: i32, max_hp: i32) -> Result<(), StatsError> {
        if max_hp < 0 {
            return Err(StatsError::NegativeMaxHp(max_hp));
        }
        if hp > max_hp {
            return Err(StatsError::HpAboveMax { hp, max_hp });
        }
        Ok(())
    }

    pub fn with_san(mut self, san: i32) -> Self {
        self.san = Some(san);
        self
    }

    pub fn with_dex(mut self, dex: i32) -> Self {
        self.dex = Some(dex);
        self
    }

    /// Add an open-ended stat or skill value (e.g. `"fighting"`).
    pub fn with_stat(mut self, name: impl Into<String>, value: i32) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    pub fn hp(&self) -> i32 {
        self.hp
    }

    pub fn max_hp(&self) -> i32 {
        self.max_hp
    }

    pub fn san(&self) -> Option<i32> {
        self.san
    }

    pub fn dex(&self) -> Option<i32> {
        self.dex
    }

    /// DEX for initiative purposes.
    pub fn dex_or_default(&self) -> i32 {
        self.dex.unwrap_or(DEFAULT_DEX)
    }

    /// Look up any stat by its wire name.
    pub fn get(&self, name: &str) -> Option<i32> {
        match name {
            "HP" => Some(self.hp),
            "maxHP" | "max_HP" => Some(self.max_hp),
            "SAN" => self.san,
            "DEX" => self.dex,
            other => self.extra.get(other).copied(),
        }
    }

    /// Set HP, keeping it at or below maxHP. May go negative.
    pub fn set_hp(&mut self, hp: i32) {
        self.hp = hp.min(self.max_hp);
    }
}

#[derive(Serialize, Deserialize)]
struct RawStats {
    #[serde(rename = "HP")]
    hp: i32,
    #[serde(rename = "maxHP", alias = "max_HP")]
    max_hp: i32,
    #[serde(rename = "SAN", default, skip_serializing_if = "Option::is_none")]
    san: Option<i32>,
    #[serde(rename = "DEX", default, skip_serializing_if = "Option::is_none")]
    dex: Option<i32>,
    #[serde(flatten)]
    extra: BTreeMap<String, i32>,
}

impl TryFrom<RawStats> for Stats {
    type Error = StatsError;

    fn try_from(raw: RawStats) -> Result<Self, Self::Error> {
        Stats::validate(raw.hp, raw.max_hp)?;
        Ok(Stats {
            hp: raw.hp,
            max_hp: raw.max_hp,
            san: raw.san,
            dex: raw.dex,
            extra: raw.extra,
        })
    }
}

impl From<Stats> for RawStats {
    fn from(stats: Stats) -> Self {
        RawStats {
            hp: stats.hp,
            max_hp: stats.max_hp,
            san: stats.san,
            dex: stats.dex,
            extra: stats.extra,
        }
    }
}

/// One combatant.
///
/// Updates always replace the whole record for an id; see
/// [`crate::state::apply_deltas`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "type")]
    pub kind: ParticipantKind,
    pub stats: Stats,
    #[serde(default)]
    pub status: ParticipantStatus,
    #[serde(default)]
    pub effects: Vec<String>,
    #[serde(default)]
    pub items: Vec<String>,
}

impl Participant {
    pub fn new(
        id: impl Into<ParticipantId>,
        display_name: impl Into<String>,
        kind: ParticipantKind,
        stats: Stats,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            kind,
            stats,
            status: ParticipantStatus::Active,
            effects: Vec::new(),
            items: Vec::new(),
        }
    }

    pub fn investigator(id: &str, display_name: impl Into<String>, stats: Stats) -> Self {
        Self::new(id, display_name, ParticipantKind::Investigator, stats)
    }

    pub fn enemy(id: &str, display_name: impl Into<String>, stats: Stats) -> Self {
        Self::new(id, display_name, ParticipantKind::Enemy, stats)
    }

    pub fn with_status(mut self, status: ParticipantStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_effect(mut self, effect: impl Into<String>) -> Self {
        self.effects.push(effect.into());
        self
    }

    pub fn with_item(mut self, item: impl Into<String>) -> Self {
        self.items.push(item.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == ParticipantStatus::Active
    }

    /// Down means out of the fight: no HP left or no longer active.
    pub fn is_down(&self) -> bool {
        self.stats.hp() <= 0 || !self.is_active()
    }

    pub fn is_investigator(&self) -> bool {
        self.kind == ParticipantKind::Investigator
    }
}
