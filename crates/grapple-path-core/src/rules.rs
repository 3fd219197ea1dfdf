use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::boss::Medal;
use crate::quest::QuestKind;
use crate::ProgressError;

/// Upper bound on attempts in one boss fight.
pub const MAX_BOSS_ATTEMPTS: u32 = 100;
/// Upper bound on each quest slot count and on the active quest cap.
pub const MAX_QUEST_SLOTS: u32 = 10;

/// Thresholds of the default mastery grader, in percentage points and
/// volume multiples of the catalog minimum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MasteryRules {
    pub gold_min_rate_margin: f64,
    pub gold_min_volume_ratio: f64,
    pub silver_min_rate_margin: f64,
    pub silver_min_volume_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineRules {
    pub rules_version: u32,
    pub knowledge_reps_required: u32,
    pub execution_total_reps_required: u32,
    pub execution_clean_reps_required: u32,
    pub application_min_attempts: u32,
    pub xp_per_level: u64,
    pub xp_per_checkpoint: u64,
    pub application_bonus_xp: u64,
    pub validation_xp: u64,
    pub validation_tokens: u64,
    pub cycle_completion_xp: u64,
    pub cycle_completion_tokens: u64,
    pub boss_bronze_xp: u64,
    pub boss_bronze_tokens: u64,
    pub boss_silver_xp: u64,
    pub boss_silver_tokens: u64,
    pub boss_gold_xp: u64,
    pub boss_gold_tokens: u64,
    pub streak_cap: u32,
    pub streak_day_bonus_xp: u64,
    pub streak_freeze_allowance: u32,
    pub daily_quest_slots: u32,
    pub weekly_quest_slots: u32,
    pub max_active_quests: u32,
    pub daily_quest_xp: u64,
    pub daily_quest_tokens: u64,
    pub weekly_quest_xp: u64,
    pub weekly_quest_tokens: u64,
    pub boss_attempts: u32,
    pub boss_gold_min_rate: u32,
    pub boss_silver_min_rate: u32,
    pub log_capacity: usize,
    pub mastery: MasteryRules,
}

impl EngineRules {
    #[must_use]
    pub fn v1() -> Self {
        Self {
            rules_version: 1,
            knowledge_reps_required: 10,
            execution_total_reps_required: 50,
            execution_clean_reps_required: 10,
            application_min_attempts: 10,
            xp_per_level: 250,
            xp_per_checkpoint: 5,
            application_bonus_xp: 25,
            validation_xp: 100,
            validation_tokens: 10,
            cycle_completion_xp: 300,
            cycle_completion_tokens: 50,
            boss_bronze_xp: 100,
            boss_bronze_tokens: 10,
            boss_silver_xp: 200,
            boss_silver_tokens: 20,
            boss_gold_xp: 300,
            boss_gold_tokens: 30,
            streak_cap: 7,
            streak_day_bonus_xp: 10,
            streak_freeze_allowance: 2,
            daily_quest_slots: 2,
            weekly_quest_slots: 1,
            max_active_quests: 3,
            daily_quest_xp: 50,
            daily_quest_tokens: 5,
            weekly_quest_xp: 150,
            weekly_quest_tokens: 20,
            boss_attempts: 10,
            boss_gold_min_rate: 80,
            boss_silver_min_rate: 60,
            log_capacity: 200,
            mastery: MasteryRules {
                gold_min_rate_margin: 30.0,
                gold_min_volume_ratio: 2.0,
                silver_min_rate_margin: 15.0,
                silver_min_volume_ratio: 1.5,
            },
        }
    }

    /// Validates numeric bounds and cross-field invariants.
    ///
    /// # Errors
    /// Returns [`ProgressError::Configuration`] when one or more fields are
    /// outside allowed bounds.
    pub fn validate(&self) -> Result<(), ProgressError> {
        if self.rules_version == 0 {
            return Err(ProgressError::Configuration(
                "rules_version MUST be >= 1".to_string(),
            ));
        }

        for (name, value) in [
            ("knowledge_reps_required", self.knowledge_reps_required),
            (
                "execution_total_reps_required",
                self.execution_total_reps_required,
            ),
            (
                "execution_clean_reps_required",
                self.execution_clean_reps_required,
            ),
            ("application_min_attempts", self.application_min_attempts),
            ("streak_cap", self.streak_cap),
            ("boss_attempts", self.boss_attempts),
        ] {
            if value == 0 {
                return Err(ProgressError::Configuration(format!(
                    "{name} MUST be >= 1"
                )));
            }
        }

        if self.xp_per_level == 0 {
            return Err(ProgressError::Configuration(
                "xp_per_level MUST be >= 1".to_string(),
            ));
        }

        if self.execution_clean_reps_required > self.execution_total_reps_required {
            return Err(ProgressError::Configuration(
                "execution_clean_reps_required MUST be <= execution_total_reps_required"
                    .to_string(),
            ));
        }

        if self.boss_gold_min_rate > 100 || self.boss_silver_min_rate > self.boss_gold_min_rate {
            return Err(ProgressError::Configuration(
                "boss medal rates MUST satisfy silver <= gold <= 100".to_string(),
            ));
        }

        if self.boss_attempts > MAX_BOSS_ATTEMPTS {
            return Err(ProgressError::Configuration(format!(
                "boss_attempts MUST be <= {MAX_BOSS_ATTEMPTS}"
            )));
        }

        for (name, value) in [
            ("daily_quest_slots", self.daily_quest_slots),
            ("weekly_quest_slots", self.weekly_quest_slots),
            ("max_active_quests", self.max_active_quests),
        ] {
            if value > MAX_QUEST_SLOTS {
                return Err(ProgressError::Configuration(format!(
                    "{name} MUST be <= {MAX_QUEST_SLOTS}"
                )));
            }
        }

        if (self.daily_quest_slots == 0 && self.weekly_quest_slots == 0)
            || self.max_active_quests == 0
        {
            return Err(ProgressError::Configuration(
                "quest slots and max_active_quests MUST be >= 1".to_string(),
            ));
        }

        if self.log_capacity == 0 {
            return Err(ProgressError::Configuration(
                "log_capacity MUST be >= 1".to_string(),
            ));
        }

        let mastery = &self.mastery;
        for (name, value) in [
            ("gold_min_rate_margin", mastery.gold_min_rate_margin),
            ("gold_min_volume_ratio", mastery.gold_min_volume_ratio),
            ("silver_min_rate_margin", mastery.silver_min_rate_margin),
            ("silver_min_volume_ratio", mastery.silver_min_volume_ratio),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ProgressError::Configuration(format!(
                    "mastery.{name} MUST be a finite value >= 0"
                )));
            }
        }

        if mastery.silver_min_rate_margin > mastery.gold_min_rate_margin
            || mastery.silver_min_volume_ratio > mastery.gold_min_volume_ratio
        {
            return Err(ProgressError::Configuration(
                "mastery silver thresholds cannot exceed gold thresholds".to_string(),
            ));
        }

        Ok(())
    }

    /// Decodes and validates rules from JSON.
    ///
    /// # Errors
    /// Returns [`ProgressError::Configuration`] when JSON decoding fails
    /// or decoded values violate rule constraints.
    pub fn from_json(value: &Value) -> Result<Self, ProgressError> {
        let rules: Self = serde_json::from_value(value.clone()).map_err(|err| {
            ProgressError::Configuration(format!("invalid rules JSON payload: {err}"))
        })?;
        rules.validate()?;
        Ok(rules)
    }

    #[must_use]
    pub fn boss_reward(&self, medal: Medal) -> (u64, u64) {
        match medal {
            Medal::Bronze => (self.boss_bronze_xp, self.boss_bronze_tokens),
            Medal::Silver => (self.boss_silver_xp, self.boss_silver_tokens),
            Medal::Gold => (self.boss_gold_xp, self.boss_gold_tokens),
        }
    }

    #[must_use]
    pub fn quest_reward(&self, kind: QuestKind) -> (u64, u64) {
        match kind {
            QuestKind::Daily => (self.daily_quest_xp, self.daily_quest_tokens),
            QuestKind::Weekly => (self.weekly_quest_xp, self.weekly_quest_tokens),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn v1_rules_are_valid() {
        assert!(EngineRules::v1().validate().is_ok());
    }

    #[test]
    fn huge_quest_slot_counts_are_rejected_without_overflow() {
        let mut value = crate::test_support::must_ok(serde_json::to_value(EngineRules::v1()));
        value["daily_quest_slots"] = json!(u32::MAX);
        value["weekly_quest_slots"] = json!(1);
        assert!(matches!(
            EngineRules::from_json(&value),
            Err(ProgressError::Configuration(_))
        ));

        let mut rules = EngineRules::v1();
        rules.daily_quest_slots = 0;
        rules.weekly_quest_slots = 0;
        assert!(rules.validate().is_err());

        rules.weekly_quest_slots = MAX_QUEST_SLOTS;
        assert!(rules.validate().is_ok());
        rules.max_active_quests = MAX_QUEST_SLOTS + 1;
        assert!(rules.validate().is_err());
    }

    #[test]
    fn boss_attempts_are_bounded() {
        let mut rules = EngineRules::v1();
        rules.boss_attempts = 50_000_000;
        assert!(matches!(rules.validate(), Err(ProgressError::Configuration(_))));

        rules.boss_attempts = MAX_BOSS_ATTEMPTS;
        assert!(rules.validate().is_ok());
    }

    #[test]
    fn clean_reps_cannot_exceed_total_reps() {
        let mut rules = EngineRules::v1();
        rules.execution_clean_reps_required = 60;
        assert!(matches!(
            rules.validate(),
            Err(ProgressError::Configuration(_))
        ));
    }

    #[test]
    fn medal_rates_must_be_ordered() {
        let mut rules = EngineRules::v1();
        rules.boss_silver_min_rate = 90;
        assert!(rules.validate().is_err());
    }

    #[test]
    fn from_json_rejects_partial_payloads() {
        let result = EngineRules::from_json(&json!({ "rules_version": 2 }));
        assert!(matches!(result, Err(ProgressError::Configuration(_))));
    }

    #[test]
    fn from_json_accepts_serialized_rules() {
        let mut rules = EngineRules::v1();
        rules.rules_version = 2;
        rules.xp_per_level = 300;
        let value = match serde_json::to_value(&rules) {
            Ok(value) => value,
            Err(err) => panic!("failed to serialize rules: {err}"),
        };
        assert_eq!(EngineRules::from_json(&value), Ok(rules));
    }
}
