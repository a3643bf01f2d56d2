//! Keeper configuration.

use crate::initiative::InitiativeDirection;

/// Configuration for the turn orchestrator and encounter driver.
#[derive(Debug, Clone)]
pub struct KeeperConfig {
    /// Safety cap on step invocations per encounter.
    pub max_steps: usize,

    /// Log entries given to the rules oracle.
    pub query_log_tail: usize,

    /// Log entries given to the out-of-character oracle.
    pub ooc_log_tail: usize,

    /// Which end of the initiative ranking acts first.
    pub initiative_direction: InitiativeDirection,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            query_log_tail: 7,
            ooc_log_tail: 5,
            initiative_direction: InitiativeDirection::LowestFirst,
        }
    }
}

impl KeeperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the step cap.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Set how much recent log the rules and OOC oracles see.
    pub fn with_log_tails(mut self, query: usize, ooc: usize) -> Self {
        self.query_log_tail = query;
        self.ooc_log_tail = ooc;
        self
    }

    pub fn with_initiative_direction(mut self, direction: InitiativeDirection) -> Self {
        self.initiative_direction = direction;
        self
    }
}
