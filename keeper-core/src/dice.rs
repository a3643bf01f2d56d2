//! Dice rolling system.
//!
//! Supports the notation `<count>d<sides>[(+|-)<modifier>]`, e.g. `1d20`,
//! `2d6+3` or `1d100-5`. Rolling is a pure function of the expression and
//! the random source handed in.

use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Most dice a single expression may roll.
pub const MAX_DICE: u32 = 1000;

/// Largest die an expression may name.
pub const MAX_SIDES: u32 = 10_000;

lazy_static! {
    static ref NOTATION: Regex = Regex::new(r"^(\d+)d(\d+)([+-]\d+)?$").unwrap();
}

/// Error type for dice parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("Invalid dice expression '{notation}': {reason}")]
    InvalidDiceExpression { notation: String, reason: String },
}

impl DiceError {
    fn invalid(notation: &str, reason: impl Into<String>) -> Self {
        DiceError::InvalidDiceExpression {
            notation: notation.to_string(),
            reason: reason.into(),
        }
    }
}

/// A parsed dice expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceExpression {
    pub count: u32,
    pub sides: u32,
    pub modifier: i32,
}

impl DiceExpression {
    /// Parse a dice notation string.
    pub fn parse(notation: &str) -> Result<Self, DiceError> {
        let caps = NOTATION
            .captures(notation)
            .ok_or_else(|| DiceError::invalid(notation, "expected <count>d<sides>[+/-<modifier>]"))?;

        let count: u32 = caps[1]
            .parse()
            .map_err(|_| DiceError::invalid(notation, "dice count out of range"))?;
        let sides: u32 = caps[2]
            .parse()
            .map_err(|_| DiceError::invalid(notation, "die size out of range"))?;
        let modifier: i32 = match caps.get(3) {
            Some(m) => m
                .as_str()
                .parse()
                .map_err(|_| DiceError::invalid(notation, "modifier out of range"))?,
            None => 0,
        };

        if count == 0 {
            return Err(DiceError::invalid(notation, "dice count must be positive"));
        }
        if sides == 0 {
            return Err(DiceError::invalid(notation, "die size must be positive"));
        }
        if count > MAX_DICE {
            return Err(DiceError::invalid(notation, format!("at most {MAX_DICE} dice per roll")));
        }
        if sides > MAX_SIDES {
            return Err(DiceError::invalid(notation, format!("dice have at most {MAX_SIDES} sides")));
        }

        let expr = Self {
            count,
            sides,
            modifier,
        };
        let (lo, hi) = expr.bounds();
        if i32::try_from(lo).is_err() || i32::try_from(hi).is_err() {
            return Err(DiceError::invalid(notation, "result out of range"));
        }
        Ok(expr)
    }

    /// Smallest and largest final result, unclamped.
    fn bounds(&self) -> (i64, i64) {
        let modifier = i64::from(self.modifier);
        let count = i64::from(self.count);
        (count + modifier, count * i64::from(self.sides) + modifier)
    }

    /// Roll the expression with thread-local entropy.
    pub fn roll(&self) -> RollResult {
        self.roll_with_rng(&mut rand::thread_rng())
    }

    /// Roll with a specific RNG (useful for testing).
    ///
    /// Sums saturate, which only matters for expressions built by hand
    /// past the limits `parse` enforces.
    pub fn roll_with_rng<R: Rng + ?Sized>(&self, rng: &mut R) -> RollResult {
        let rolls: Vec<u32> = (0..self.count)
            .map(|_| rng.gen_range(1..=self.sides.max(1)))
            .collect();
        let total = saturate(rolls.iter().map(|&r| i64::from(r)).sum());

        RollResult {
            notation: self.to_string(),
            rolls,
            total,
            modifier: self.modifier,
            final_result: saturate(i64::from(total) + i64::from(self.modifier)),
        }
    }

    /// Smallest possible final result.
    pub fn min(&self) -> i32 {
        saturate(self.bounds().0)
    }

    /// Largest possible final result.
    pub fn max(&self) -> i32 {
        saturate(self.bounds().1)
    }
}

fn saturate(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
}

impl FromStr for DiceExpression {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiceExpression::parse(s)
    }
}

impl fmt::Display for DiceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.modifier {
            0 => write!(f, "{}d{}", self.count, self.sides),
            m if m > 0 => write!(f, "{}d{}+{}", self.count, self.sides, m),
            m => write!(f, "{}d{}{}", self.count, self.sides, m),
        }
    }
}

/// Complete result of a dice roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollResult {
    pub notation: String,
    pub rolls: Vec<u32>,
    /// Sum of the individual dice.
    pub total: i32,
    pub modifier: i32,
    /// `total + modifier`.
    #[serde(rename = "final")]
    pub final_result: i32,
}

impl fmt::Display for RollResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dice = self
            .rolls
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}: [{}]", self.notation, dice)?;
        if self.modifier > 0 {
            write!(f, " + {}", self.modifier)?;
        } else if self.modifier < 0 {
            write!(f, " - {}", self.modifier.abs())?;
        }
        write!(f, " = {}", self.final_result)
    }
}

/// Convenience function to roll dice from a notation string.
pub fn roll(notation: &str) -> Result<RollResult, DiceError> {
    Ok(DiceExpression::parse(notation)?.roll())
}

/// Parse and roll against the supplied random source.
pub fn roll_with_rng<R: Rng + ?Sized>(notation: &str, rng: &mut R) -> Result<RollResult, DiceError> {
    Ok(DiceExpression::parse(notation)?.roll_with_rng(rng))
}
