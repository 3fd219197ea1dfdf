//! Qualitative grade of a validated Skill Item.
//!
//! The grader reads only the finished palier numbers and the catalog
//! thresholds. It is kept apart from the recalculator so its thresholds
//! ([`MasteryRules`]) can be tuned without touching anything else.

use serde::{Deserialize, Serialize};

use crate::catalog::SkillItem;
use crate::progress::SkillItemProgress;
use crate::rules::MasteryRules;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MasteryTier {
    Bronze,
    Silver,
    Gold,
}

impl MasteryTier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
        }
    }
}

/// Grades a validated item; unvalidated items have no tier.
///
/// * margin = application success rate − catalog target rate (points)
/// * volume ratio = `volume_completed` / catalog `volume_min`
///
/// Gold needs both the gold margin and the gold volume ratio. Silver needs
/// either silver threshold. Everything else is bronze.
#[must_use]
pub fn grade_mastery(
    item: &SkillItem,
    progress: &SkillItemProgress,
    rules: &MasteryRules,
) -> Option<MasteryTier> {
    progress.validated_at?;

    let margin = progress.paliers.application.positional_test.success_rate
        - item.validation.positional_test.target_rate;
    let volume_ratio =
        f64::from(progress.volume_completed) / f64::from(item.validation.volume_min.max(1));

    let tier = if margin >= rules.gold_min_rate_margin && volume_ratio >= rules.gold_min_volume_ratio
    {
        MasteryTier::Gold
    } else if margin >= rules.silver_min_rate_margin
        || volume_ratio >= rules.silver_min_volume_ratio
    {
        MasteryTier::Silver
    } else {
        MasteryTier::Bronze
    };

    Some(tier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::item;
    use crate::rules::EngineRules;
    use crate::test_support::*;

    fn graded(success_rate: f64, volume: u32, validated: bool) -> Option<MasteryTier> {
        let skill = item("a", 1, 1, &[]);
        let rules = EngineRules::v1();
        let mut progress = SkillItemProgress::new(&skill, &rules, at("2026-02-07T12:00:00Z"));
        progress.paliers.application.positional_test.success_rate = success_rate;
        progress.volume_completed = volume;
        if validated {
            progress.validated_at = Some(at("2026-02-07T12:00:00Z"));
        }
        grade_mastery(&skill, &progress, &rules.mastery)
    }

    #[test]
    fn unvalidated_items_have_no_tier() {
        assert_eq!(graded(100.0, 1_000, false), None);
    }

    #[test]
    fn gold_needs_margin_and_volume() {
        assert_eq!(graded(70.0, 200, true), Some(MasteryTier::Gold));
        assert_eq!(graded(70.0, 199, true), Some(MasteryTier::Silver));
        assert_eq!(graded(69.0, 200, true), Some(MasteryTier::Silver));
    }

    #[test]
    fn silver_needs_either_threshold() {
        assert_eq!(graded(55.0, 100, true), Some(MasteryTier::Silver));
        assert_eq!(graded(40.0, 150, true), Some(MasteryTier::Silver));
    }

    #[test]
    fn bare_pass_is_bronze() {
        assert_eq!(graded(40.0, 100, true), Some(MasteryTier::Bronze));
        assert_eq!(graded(54.9, 149, true), Some(MasteryTier::Bronze));
    }

    #[test]
    fn tiers_are_ordered() {
        assert!(MasteryTier::Gold > MasteryTier::Silver);
        assert!(MasteryTier::Silver > MasteryTier::Bronze);
    }
}
