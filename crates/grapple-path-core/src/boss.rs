//! Boss fight: a short, attempt-capped challenge at the end of a cycle.
//!
//! The session is ephemeral and never persisted. Only the
//! [`BossFightResult`] produced by [`BossFightSession::finalize`] reaches the
//! snapshot, where it is immutable.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::rules::EngineRules;
use crate::ProgressError;

pub const FULL_HEALTH: u32 = 100;

fn remaining_health(attempts: u32, max_attempts: u32) -> u32 {
    let max_attempts = u64::from(max_attempts.max(1));
    let left = max_attempts.saturating_sub(u64::from(attempts));
    u32::try_from(u64::from(FULL_HEALTH) * left / max_attempts).unwrap_or(FULL_HEALTH)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Medal {
    Bronze,
    Silver,
    Gold,
}

impl Medal {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BossFightResult {
    pub cycle: u8,
    pub score: u8,
    pub medal: Medal,
    pub attempts: u32,
    pub successes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BossFightSession {
    pub cycle: u8,
    pub attempts: u32,
    pub successes: u32,
    pub failures: u32,
    pub health: u32,
    pub max_attempts: u32,
}

impl BossFightSession {
    #[must_use]
    pub fn init(cycle: u8, rules: &EngineRules) -> Self {
        Self {
            cycle,
            attempts: 0,
            successes: 0,
            failures: 0,
            health: FULL_HEALTH,
            max_attempts: rules.boss_attempts.max(1),
        }
    }

    /// Consumes one attempt.
    ///
    /// Health decays linearly with attempts used,
    /// `100 × (1 − attempts / max_attempts)`, independent of the outcome.
    ///
    /// # Errors
    /// Returns [`ProgressError::Validation`] once every attempt is used.
    pub fn record_attempt(&self, success: bool) -> Result<Self, ProgressError> {
        if self.is_complete() {
            return Err(ProgressError::Validation(format!(
                "boss fight for cycle {} already used all {} attempts",
                self.cycle, self.max_attempts
            )));
        }

        let attempts = self.attempts + 1;
        let (successes, failures) = if success {
            (self.successes + 1, self.failures)
        } else {
            (self.successes, self.failures + 1)
        };

        Ok(Self {
            cycle: self.cycle,
            attempts,
            successes,
            failures,
            health: remaining_health(attempts, self.max_attempts),
            max_attempts: self.max_attempts,
        })
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Success percentage, truncated; `0` before the first attempt.
    #[must_use]
    pub fn score(&self) -> u8 {
        if self.attempts == 0 {
            return 0;
        }
        let percent = u64::from(self.successes) * 100 / u64::from(self.attempts);
        u8::try_from(percent).unwrap_or(100)
    }

    /// Turns a finished session into its immutable result.
    ///
    /// # Errors
    /// Returns [`ProgressError::Validation`] while attempts remain.
    pub fn finalize(
        &self,
        notes: Option<String>,
        completed_at: OffsetDateTime,
        rules: &EngineRules,
    ) -> Result<BossFightResult, ProgressError> {
        if !self.is_complete() {
            return Err(ProgressError::Validation(format!(
                "boss fight for cycle {} has {} attempts left",
                self.cycle,
                self.max_attempts - self.attempts
            )));
        }

        Ok(BossFightResult {
            cycle: self.cycle,
            score: self.score(),
            medal: medal_for(self.successes, self.attempts, rules),
            attempts: self.attempts,
            successes: self.successes,
            notes: notes.filter(|value| !value.trim().is_empty()),
            completed_at,
        })
    }
}

/// Medal by success rate, compared in integers so 8/10 is exactly 80 %.
#[must_use]
pub fn medal_for(successes: u32, attempts: u32, rules: &EngineRules) -> Medal {
    let scaled = u64::from(successes) * 100;
    let attempts = u64::from(attempts);

    if attempts > 0 && scaled >= u64::from(rules.boss_gold_min_rate) * attempts {
        Medal::Gold
    } else if attempts > 0 && scaled >= u64::from(rules.boss_silver_min_rate) * attempts {
        Medal::Silver
    } else {
        Medal::Bronze
    }
}
