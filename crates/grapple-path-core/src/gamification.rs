//! Gamification recalculation.
//!
//! Experience, tokens, mastery and badges are a pure fold over the snapshot
//! and are rebuilt from nothing on every pass. The streak is different: it is
//! a small state machine keyed by `today` against the stored
//! `last_active_date`, so it must read the previously persisted record and is
//! advanced separately by [`update_streak`] before the fold runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::boss::{BossFightResult, Medal};
use crate::catalog::Catalog;
use crate::mastery::{grade_mastery, MasteryTier};
use crate::progress::UserProgress;
use crate::rules::EngineRules;
use crate::ProgressError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Badge {
    pub id: String,
    pub name: String,
    pub description: String,
    pub earned_at: Date,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Gamification {
    pub experience_total: u64,
    pub tokens: u64,
    pub streak: u32,
    pub streak_freeze_used: u32,
    #[serde(default)]
    pub last_active_date: Option<Date>,
    /// Sum of every streak bonus paid so far. Carried forward, since streak
    /// history cannot be rebuilt from the snapshot.
    #[serde(default)]
    pub streak_bonus_experience: u64,
    #[serde(default)]
    pub badges: BTreeMap<String, Badge>,
    #[serde(default)]
    pub mastery: BTreeMap<String, MasteryTier>,
    #[serde(default)]
    pub boss_fight_results: BTreeMap<u8, BossFightResult>,
}

impl Gamification {
    #[must_use]
    pub fn level(&self, rules: &EngineRules) -> u64 {
        level_for(self.experience_total, rules.xp_per_level)
    }
}

/// `floor(experience / xp_per_level) + 1`.
#[must_use]
pub fn level_for(experience_total: u64, xp_per_level: u64) -> u64 {
    experience_total / xp_per_level.max(1) + 1
}

/// Inserts a badge unless one with the same id is already held. Returns
/// whether the badge is new.
pub fn insert_badge(badges: &mut BTreeMap<String, Badge>, badge: Badge) -> bool {
    if badges.contains_key(&badge.id) {
        return false;
    }
    badges.insert(badge.id.clone(), badge);
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case", tag = "transition")]
pub enum StreakTransition {
    /// Already active today.
    Unchanged,
    /// First activity ever.
    Started,
    /// Active on consecutive days. No bonus once the cap is reached.
    Advanced { bonus_awarded: bool },
    /// Missed days covered by a freeze.
    Frozen,
    /// Missed days with no freeze left.
    Reset,
}

/// Advances the streak for activity on `today`.
///
/// # Errors
/// Returns [`ProgressError::Validation`] when `today` is before the stored
/// `last_active_date`.
pub fn update_streak(
    current: &Gamification,
    today: Date,
    rules: &EngineRules,
) -> Result<(Gamification, StreakTransition), ProgressError> {
    let mut next = current.clone();

    let Some(last_active) = current.last_active_date else {
        next.streak = 1;
        next.streak_freeze_used = 0;
        next.streak_bonus_experience = next
            .streak_bonus_experience
            .saturating_add(rules.streak_day_bonus_xp);
        next.last_active_date = Some(today);
        return Ok((next, StreakTransition::Started));
    };

    let gap_days = (today - last_active).whole_days();
    let transition = match gap_days {
        days if days < 0 => {
            return Err(ProgressError::Validation(format!(
                "today ({today}) is before last_active_date ({last_active})"
            )));
        }
        0 => StreakTransition::Unchanged,
        1 => {
            let bonus_awarded = current.streak < rules.streak_cap;
            if bonus_awarded {
                next.streak = current.streak + 1;
                next.streak_bonus_experience = next
                    .streak_bonus_experience
                    .saturating_add(rules.streak_day_bonus_xp);
            }
            StreakTransition::Advanced { bonus_awarded }
        }
        _ => {
            if current.streak_freeze_used < rules.streak_freeze_allowance {
                next.streak_freeze_used = current.streak_freeze_used + 1;
                StreakTransition::Frozen
            } else {
                next.streak = 1;
                next.streak_freeze_used = 0;
                next.streak_bonus_experience = next
                    .streak_bonus_experience
                    .saturating_add(rules.streak_day_bonus_xp);
                StreakTransition::Reset
            }
        }
    };

    next.last_active_date = Some(today);
    Ok((next, transition))
}

/// Outcome of a full recalculation, with what changed for audit logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recalculation {
    pub gamification: Gamification,
    pub streak: StreakTransition,
    pub new_badges: Vec<Badge>,
}

/// Re-derives the whole gamification record for activity on `today`.
///
/// # Errors
/// Returns [`ProgressError::Derivation`] when the snapshot references Skill
/// Items the catalog does not contain, and [`ProgressError::Validation`] when
/// `today` precedes the stored activity date.
pub fn recalculate(
    snapshot: &UserProgress,
    catalog: &Catalog,
    rules: &EngineRules,
    today: Date,
) -> Result<Gamification, ProgressError> {
    recalculate_detailed(snapshot, catalog, rules, today).map(|outcome| outcome.gamification)
}

/// [`recalculate`], also reporting the streak transition and new badges.
///
/// # Errors
/// Same as [`recalculate`].
pub fn recalculate_detailed(
    snapshot: &UserProgress,
    catalog: &Catalog,
    rules: &EngineRules,
    today: Date,
) -> Result<Recalculation, ProgressError> {
    let (mut gamification, streak) = update_streak(&snapshot.gamification, today, rules)?;
    let totals = derive_totals(snapshot, catalog, rules)?;

    gamification.experience_total = totals
        .experience
        .saturating_add(gamification.streak_bonus_experience);
    gamification.tokens = totals.tokens;
    gamification.mastery = totals.mastery;

    let mut new_badges = Vec::new();
    for badge in earned_badges(snapshot, catalog, &gamification, rules, today) {
        if insert_badge(&mut gamification.badges, badge.clone()) {
            new_badges.push(badge);
        }
    }

    Ok(Recalculation {
        gamification,
        streak,
        new_badges,
    })
}

#[derive(Debug, Default)]
struct DerivedTotals {
    experience: u64,
    tokens: u64,
    mastery: BTreeMap<String, MasteryTier>,
}

fn derive_totals(
    snapshot: &UserProgress,
    catalog: &Catalog,
    rules: &EngineRules,
) -> Result<DerivedTotals, ProgressError> {
    let mut totals = DerivedTotals::default();

    for (id, progress) in &snapshot.skill_items {
        let item = catalog.get(id).ok_or_else(|| {
            ProgressError::Derivation(format!(
                "snapshot references skill item {id} missing from catalog {}",
                catalog.version()
            ))
        })?;

        let checkpoints = u64::try_from(item.checkpoints.len().max(1)).unwrap_or(u64::MAX);
        let stage_credit = rules.xp_per_checkpoint.saturating_mul(checkpoints);
        totals.experience = totals.experience.saturating_add(
            stage_credit.saturating_mul(u64::from(progress.paliers.completed_count())),
        );

        if progress.paliers.application.status.is_completed() {
            totals.experience = totals.experience.saturating_add(rules.application_bonus_xp);
        }

        if progress.is_validated() {
            totals.experience = totals.experience.saturating_add(rules.validation_xp);
            totals.tokens = totals.tokens.saturating_add(rules.validation_tokens);

            if let Some(tier) = grade_mastery(item, progress, &rules.mastery) {
                totals.mastery.insert(id.clone(), tier);
            }
        }
    }

    let cleared = u64::try_from(cleared_cycles(snapshot, catalog).len()).unwrap_or(u64::MAX);
    totals.experience = totals
        .experience
        .saturating_add(rules.cycle_completion_xp.saturating_mul(cleared));
    totals.tokens = totals
        .tokens
        .saturating_add(rules.cycle_completion_tokens.saturating_mul(cleared));

    for reward in &snapshot.quest_rewards {
        totals.experience = totals.experience.saturating_add(reward.experience);
        totals.tokens = totals.tokens.saturating_add(reward.tokens);
    }

    for result in snapshot.gamification.boss_fight_results.values() {
        let (experience, tokens) = rules.boss_reward(result.medal);
        totals.experience = totals.experience.saturating_add(experience);
        totals.tokens = totals.tokens.saturating_add(tokens);
    }

    Ok(totals)
}

/// Cycles whose every Skill Item is validated.
#[must_use]
pub fn cleared_cycles(snapshot: &UserProgress, catalog: &Catalog) -> Vec<u8> {
    catalog
        .cycles()
        .into_iter()
        .filter(|cycle| {
            catalog
                .items_in_cycle(*cycle)
                .all(|item| snapshot.is_validated(&item.id))
        })
        .collect()
}

fn earned_badges(
    snapshot: &UserProgress,
    catalog: &Catalog,
    gamification: &Gamification,
    rules: &EngineRules,
    today: Date,
) -> Vec<Badge> {
    let badge = |id: String, name: String, description: String| Badge {
        id,
        name,
        description,
        earned_at: today,
    };
    let mut earned = Vec::new();

    let validated = snapshot.validated_count();
    for (threshold, name) in [(1, "First Technique"), (5, "Technician"), (10, "Arsenal")] {
        if validated >= threshold {
            earned.push(badge(
                format!("validated.{threshold}"),
                name.to_string(),
                format!("Validate {threshold} skill item(s)"),
            ));
        }
    }

    let total_items = u32::try_from(catalog.items().len()).unwrap_or(u32::MAX);
    if validated >= total_items {
        earned.push(badge(
            "validated.all".to_string(),
            "Black Belt Mindset".to_string(),
            "Validate every skill item of the curriculum".to_string(),
        ));
    }

    for (threshold, name) in [(3, "On a Roll"), (7, "Mat Rat")] {
        if gamification.streak >= threshold {
            earned.push(badge(
                format!("streak.{threshold}"),
                name.to_string(),
                format!("Train {threshold} days in a row"),
            ));
        }
    }

    for cycle in cleared_cycles(snapshot, catalog) {
        earned.push(badge(
            format!("cycle.{cycle}.cleared"),
            format!("Cycle {cycle} Cleared"),
            format!("Validate every skill item of cycle {cycle}"),
        ));
    }

    let best_tier = gamification.mastery.values().copied().max();
    for tier in [MasteryTier::Silver, MasteryTier::Gold] {
        if best_tier.is_some_and(|best| best >= tier) {
            earned.push(badge(
                format!("mastery.{}", tier.as_str()),
                format!("{} Mastery", capitalize(tier.as_str())),
                format!("Reach {} mastery on a skill item", tier.as_str()),
            ));
        }
    }

    if gamification
        .boss_fight_results
        .values()
        .any(|result| result.medal == Medal::Gold)
    {
        earned.push(badge(
            "boss.gold".to_string(),
            "Giant Slayer".to_string(),
            "Win a gold medal in a boss fight".to_string(),
        ));
    }

    let level = gamification.level(rules);
    for threshold in [5_u64, 10] {
        if level >= threshold {
            earned.push(badge(
                format!("level.{threshold}"),
                format!("Level {threshold}"),
                format!("Reach level {threshold}"),
            ));
        }
    }

    earned
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boss::BossFightResult;
    use crate::catalog::fixtures::small_catalog;
    use crate::palier::PalierStatus;
    use crate::progress::{QuestReward, SkillItemProgress};
    use crate::quest::QuestKind;
    use crate::test_support::*;

    fn rules() -> EngineRules {
        EngineRules::v1()
    }

    fn with_streak(streak: u32, freeze_used: u32, last: &str) -> Gamification {
        Gamification {
            streak,
            streak_freeze_used: freeze_used,
            last_active_date: Some(day(last)),
            ..Gamification::default()
        }
    }

    fn validated_item(snapshot: &mut UserProgress, id: &str) {
        let catalog = small_catalog();
        let item = must_ok(catalog.require(id));
        let mut progress = SkillItemProgress::new(item, &rules(), at("2026-02-07T12:00:00Z"));
        progress.paliers.knowledge.status = PalierStatus::Completed;
        progress.paliers.execution.status = PalierStatus::Completed;
        progress.paliers.application.status = PalierStatus::Completed;
        progress.paliers.integration.status = PalierStatus::Completed;
        progress.paliers.application.positional_test.success_rate = 50.0;
        progress.volume_completed = 100;
        progress.validated_at = Some(at("2026-02-07T12:00:00Z"));
        snapshot.skill_items.insert(id.to_string(), progress);
    }

    #[test]
    fn level_derivation() {
        assert_eq!(level_for(0, 250), 1);
        assert_eq!(level_for(249, 250), 1);
        assert_eq!(level_for(250, 250), 2);
        assert_eq!(level_for(500, 250), 3);
    }

    #[test]
    fn badge_insert_is_idempotent() {
        let mut badges = BTreeMap::new();
        let badge = Badge {
            id: "validated.1".to_string(),
            name: "First Technique".to_string(),
            description: "Validate 1 skill item(s)".to_string(),
            earned_at: day("2026-02-07"),
        };

        assert!(insert_badge(&mut badges, badge.clone()));
        let mut later = badge;
        later.earned_at = day("2026-02-09");
        assert!(!insert_badge(&mut badges, later));

        assert_eq!(badges.len(), 1);
        assert_eq!(must_some(badges.get("validated.1")).earned_at, day("2026-02-07"));
    }

    #[test]
    fn first_activity_starts_streak_with_bonus() {
        let (next, transition) = must_ok(update_streak(
            &Gamification::default(),
            day("2026-02-07"),
            &rules(),
        ));
        assert_eq!(transition, StreakTransition::Started);
        assert_eq!(next.streak, 1);
        assert_eq!(next.streak_bonus_experience, 10);
        assert_eq!(next.last_active_date, Some(day("2026-02-07")));
    }

    #[test]
    fn same_day_leaves_streak_untouched() {
        let current = with_streak(3, 0, "2026-02-07");
        let (next, transition) = must_ok(update_streak(&current, day("2026-02-07"), &rules()));
        assert_eq!(transition, StreakTransition::Unchanged);
        assert_eq!(next, current);
    }

    #[test]
    fn next_day_advances_with_bonus() {
        let current = with_streak(3, 0, "2026-02-07");
        let (next, transition) = must_ok(update_streak(&current, day("2026-02-08"), &rules()));
        assert_eq!(
            transition,
            StreakTransition::Advanced {
                bonus_awarded: true
            }
        );
        assert_eq!(next.streak, 4);
        assert_eq!(next.streak_bonus_experience, 10);
    }

    #[test]
    fn capped_streak_earns_no_bonus() {
        let current = with_streak(7, 0, "2026-02-07");
        let (next, transition) = must_ok(update_streak(&current, day("2026-02-08"), &rules()));
        assert_eq!(
            transition,
            StreakTransition::Advanced {
                bonus_awarded: false
            }
        );
        assert_eq!(next.streak, 7);
        assert_eq!(next.streak_bonus_experience, 0);
        assert_eq!(next.last_active_date, Some(day("2026-02-08")));
    }

    #[test]
    fn gap_with_freeze_preserves_streak() {
        let current = with_streak(4, 1, "2026-02-05");
        let (next, transition) = must_ok(update_streak(&current, day("2026-02-07"), &rules()));
        assert_eq!(transition, StreakTransition::Frozen);
        assert_eq!(next.streak, 4);
        assert_eq!(next.streak_freeze_used, 2);
        assert_eq!(next.streak_bonus_experience, 0);
    }

    #[test]
    fn gap_without_freeze_resets_with_fresh_bonus() {
        let current = with_streak(4, 2, "2026-02-05");
        let (next, transition) = must_ok(update_streak(&current, day("2026-02-07"), &rules()));
        assert_eq!(transition, StreakTransition::Reset);
        assert_eq!(next.streak, 1);
        assert_eq!(next.streak_freeze_used, 0);
        assert_eq!(next.streak_bonus_experience, 10);
    }

    #[test]
    fn clock_going_backwards_is_rejected() {
        let current = with_streak(2, 0, "2026-02-07");
        assert!(matches!(
            update_streak(&current, day("2026-02-06"), &rules()),
            Err(ProgressError::Validation(_))
        ));
    }

    #[test]
    fn recalculation_is_idempotent_on_the_same_day() {
        let catalog = small_catalog();
        let mut snapshot = UserProgress::new("test-1");
        validated_item(&mut snapshot, "a");

        let first = must_ok(recalculate(&snapshot, &catalog, &rules(), day("2026-02-07")));
        snapshot.gamification = first.clone();
        let second = must_ok(recalculate(&snapshot, &catalog, &rules(), day("2026-02-07")));

        assert_eq!(first, second);
        assert_eq!(
            must_ok(serde_json::to_string(&first)),
            must_ok(serde_json::to_string(&second))
        );
    }

    #[test]
    fn experience_adds_up_from_every_source() {
        let catalog = small_catalog();
        let rules = rules();
        let mut snapshot = UserProgress::new("test-1");
        validated_item(&mut snapshot, "a");
        validated_item(&mut snapshot, "b");
        snapshot.quest_rewards.push(QuestReward {
            quest_id: "daily:2026-02-07:0".to_string(),
            kind: QuestKind::Daily,
            experience: 50,
            tokens: 5,
            completed_at: at("2026-02-07T12:00:00Z"),
        });
        snapshot.gamification.boss_fight_results.insert(
            1,
            BossFightResult {
                cycle: 1,
                score: 80,
                medal: Medal::Gold,
                attempts: 10,
                successes: 8,
                notes: None,
                completed_at: at("2026-02-07T12:00:00Z"),
            },
        );

        let gamification = must_ok(recalculate(&snapshot, &catalog, &rules, day("2026-02-07")));

        // Per item: 4 paliers x 5 xp x 2 checkpoints + 25 application + 100 validation.
        let per_item = 4 * 5 * 2 + 25 + 100;
        let expected_xp = 2 * per_item + 300 + 50 + 300 + 10;
        assert_eq!(gamification.experience_total, expected_xp);
        assert_eq!(gamification.tokens, 2 * 10 + 50 + 5 + 30);
        assert_eq!(gamification.level(&rules), level_for(expected_xp, 250));
        assert_eq!(gamification.mastery.len(), 2);
        assert!(gamification.badges.contains_key("cycle.1.cleared"));
        assert!(gamification.badges.contains_key("boss.gold"));
        assert!(gamification.badges.contains_key("validated.1"));
        assert!(!gamification.badges.contains_key("validated.5"));
    }

    #[test]
    fn unknown_skill_item_in_snapshot_is_a_derivation_error() {
        let catalog = small_catalog();
        let mut snapshot = UserProgress::new("test-1");
        validated_item(&mut snapshot, "a");
        let orphan = must_some(snapshot.skill_items.get("a")).clone();
        snapshot.skill_items.insert("ghost".to_string(), orphan);

        assert!(matches!(
            recalculate(&snapshot, &catalog, &rules(), day("2026-02-07")),
            Err(ProgressError::Derivation(_))
        ));
    }

    #[test]
    fn badges_are_never_removed() {
        let catalog = small_catalog();
        let mut snapshot = UserProgress::new("test-1");
        snapshot.gamification = with_streak(6, 0, "2026-02-06");

        let first = must_ok(recalculate_detailed(&snapshot, &catalog, &rules(), day("2026-02-07")));
        assert!(first.gamification.badges.contains_key("streak.7"));
        assert!(first.new_badges.iter().any(|badge| badge.id == "streak.7"));

        snapshot.gamification = first.gamification;
        let reset = must_ok(recalculate_detailed(&snapshot, &catalog, &rules(), day("2026-02-20")));
        assert_eq!(reset.streak, StreakTransition::Frozen);

        snapshot.gamification = reset.gamification;
        snapshot.gamification.streak_freeze_used = 2;
        let after = must_ok(recalculate_detailed(&snapshot, &catalog, &rules(), day("2026-03-20")));
        assert_eq!(after.streak, StreakTransition::Reset);
        assert_eq!(after.gamification.streak, 1);
        assert!(after.gamification.badges.contains_key("streak.7"));
        assert!(after.new_badges.is_empty());
    }
}
