//! Snapshot-level mutations.
//!
//! Each operation validates its input before touching the snapshot, so a
//! rejected call leaves it exactly as it was. Successful calls append an
//! audit [`LogEntry`].

use time::{Date, OffsetDateTime};

use crate::boss::BossFightResult;
use crate::catalog::Catalog;
use crate::gamification::{cleared_cycles, recalculate_detailed, Recalculation, StreakTransition};
use crate::mastery::{grade_mastery, MasteryTier};
use crate::palier::{
    validate_application, validate_execution, validate_integration, validate_knowledge,
    PalierStatus,
};
use crate::progress::{LogEntry, LogKind, SkillItemProgress, UserProgress};
use crate::quest::{refresh_quests, QuestRefresh};
use crate::rules::EngineRules;
use crate::unlock::{is_eligible_for_validation, skill_status, SkillStatus};
use crate::{format_calendar_day, ProgressError};

/// Newly reported numbers for one palier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PalierUpdate {
    Knowledge { reps_completed: u32 },
    Execution { total_reps_delta: u32, clean_reps: u32 },
    Application { attempts_delta: u32, successes_delta: u32 },
    Integration { rounds_delta: u32, occurrences_delta: u32 },
}

impl PalierUpdate {
    #[must_use]
    pub fn palier_name(self) -> &'static str {
        match self {
            Self::Knowledge { .. } => "knowledge",
            Self::Execution { .. } => "execution",
            Self::Application { .. } => "application",
            Self::Integration { .. } => "integration",
        }
    }
}

/// Applies one palier update to a Skill Item, creating its progress record on
/// first touch. Returns the palier's resulting status.
///
/// # Errors
/// Returns [`ProgressError::Validation`] for unknown items, session dates in
/// the future, and numbers the palier validators reject.
#[allow(clippy::too_many_arguments)]
pub fn apply_palier_update(
    snapshot: &mut UserProgress,
    catalog: &Catalog,
    rules: &EngineRules,
    item_id: &str,
    update: PalierUpdate,
    session_date: Date,
    today: Date,
    at: OffsetDateTime,
) -> Result<PalierStatus, ProgressError> {
    let item = catalog.require(item_id)?;
    if session_date > today {
        return Err(ProgressError::Validation(format!(
            "session date {session_date} is after today ({today})"
        )));
    }

    let mut progress = snapshot
        .progress(item_id)
        .cloned()
        .unwrap_or_else(|| SkillItemProgress::new(item, rules, at));
    let paliers = &mut progress.paliers;

    let (before, after, practiced) = match update {
        PalierUpdate::Knowledge { reps_completed } => {
            let before = paliers.knowledge.status;
            let practiced = reps_completed > paliers.knowledge.reps_completed;
            paliers.knowledge = validate_knowledge(&paliers.knowledge, reps_completed, at);
            (before, paliers.knowledge.status, practiced)
        }
        PalierUpdate::Execution {
            total_reps_delta,
            clean_reps,
        } => {
            let before = paliers.execution.status;
            let practiced = total_reps_delta > 0 || clean_reps > paliers.execution.clean_reps;
            paliers.execution =
                validate_execution(&paliers.execution, total_reps_delta, clean_reps, at)?;
            (before, paliers.execution.status, practiced)
        }
        PalierUpdate::Application {
            attempts_delta,
            successes_delta,
        } => {
            let before = paliers.application.status;
            paliers.application = validate_application(
                &paliers.application,
                attempts_delta,
                successes_delta,
                session_date,
                at,
            )?;
            (before, paliers.application.status, attempts_delta > 0)
        }
        PalierUpdate::Integration {
            rounds_delta,
            occurrences_delta,
        } => {
            let before = paliers.integration.status;
            paliers.integration = validate_integration(
                &paliers.integration,
                rounds_delta,
                occurrences_delta,
                session_date,
                at,
            )?;
            (
                before,
                paliers.integration.status,
                rounds_delta > 0 || occurrences_delta > 0,
            )
        }
    };

    if practiced {
        progress.session_dates.insert(session_date);
    }
    progress.volume_completed = progress
        .paliers
        .knowledge
        .reps_completed
        .saturating_add(progress.paliers.execution.total_reps);
    progress.updated_at = at;
    snapshot.skill_items.insert(item_id.to_string(), progress);

    let palier = update.palier_name();
    let (kind, label) = if after.is_completed() && !before.is_completed() {
        (LogKind::PalierCompleted, format!("{} {palier} palier completed", item.title))
    } else {
        (
            LogKind::PalierUpdated,
            format!("{} {palier} palier {}", item.title, after.as_str()),
        )
    };
    tracing::debug!(item_id, palier, status = after.as_str(), "palier updated");
    snapshot.push_log(
        LogEntry::new(kind, at, label).skill_item(item_id),
        rules.log_capacity,
    );

    Ok(after)
}

/// Explicit validation of a Skill Item whose four paliers are completed.
/// Stamps `validated_at` and the mastery tier.
///
/// # Errors
/// Returns [`ProgressError::Validation`] when the item is unknown, locked,
/// already validated, or has unfinished paliers.
///
/// # Panics
/// Panics if the grader refuses a freshly validated item.
pub fn validate_skill_item(
    snapshot: &mut UserProgress,
    catalog: &Catalog,
    rules: &EngineRules,
    item_id: &str,
    at: OffsetDateTime,
) -> Result<MasteryTier, ProgressError> {
    let item = catalog.require(item_id)?;

    if !is_eligible_for_validation(item, snapshot) {
        let reason = match skill_status(item, snapshot) {
            SkillStatus::Locked => "prerequisites are not validated",
            SkillStatus::Done => "it is already validated",
            SkillStatus::Available | SkillStatus::InProgress => "not all paliers are completed",
        };
        return Err(ProgressError::Validation(format!(
            "cannot validate {item_id}: {reason}"
        )));
    }

    let mut progress = snapshot
        .progress(item_id)
        .cloned()
        .ok_or_else(|| ProgressError::Validation(format!("no progress recorded for {item_id}")))?;
    progress.validated_at = Some(at);
    progress.updated_at = at;

    let Some(tier) = grade_mastery(item, &progress, &rules.mastery) else {
        unreachable!("validated skill item {item_id} must grade");
    };
    progress.mastery_tier = Some(tier);
    snapshot.skill_items.insert(item_id.to_string(), progress);

    tracing::info!(item_id, tier = tier.as_str(), "skill item validated");
    snapshot.push_log(
        LogEntry::new(
            LogKind::SkillItemValidated,
            at,
            format!("{} validated ({} mastery)", item.title, tier.as_str()),
        )
        .skill_item(item_id)
        .experience(rules.validation_xp)
        .tokens(rules.validation_tokens),
        rules.log_capacity,
    );

    Ok(tier)
}

/// Records the finalized result of a boss fight.
///
/// # Errors
/// Returns [`ProgressError::Validation`] when the cycle already has a result
/// or has not been cleared yet.
pub fn record_boss_fight(
    snapshot: &mut UserProgress,
    catalog: &Catalog,
    rules: &EngineRules,
    result: BossFightResult,
) -> Result<(), ProgressError> {
    let cycle = result.cycle;
    if snapshot.gamification.boss_fight_results.contains_key(&cycle) {
        return Err(ProgressError::Validation(format!(
            "boss fight for cycle {cycle} is already recorded"
        )));
    }
    if !cleared_cycles(snapshot, catalog).contains(&cycle) {
        return Err(ProgressError::Validation(format!(
            "cycle {cycle} must be cleared before its boss fight"
        )));
    }

    let (experience, tokens) = rules.boss_reward(result.medal);
    let entry = LogEntry::new(
        LogKind::BossFightRecorded,
        result.completed_at,
        format!(
            "Cycle {cycle} boss fight: {} medal, score {}",
            result.medal.as_str(),
            result.score
        ),
    )
    .experience(experience)
    .tokens(tokens);

    tracing::info!(cycle, medal = result.medal.as_str(), score = result.score, "boss fight recorded");
    snapshot.gamification.boss_fight_results.insert(cycle, result);
    snapshot.push_log(entry, rules.log_capacity);
    Ok(())
}

/// Replaces the free-text notes of a Skill Item.
///
/// # Errors
/// Returns [`ProgressError::Validation`] for unknown items.
pub fn set_notes(
    snapshot: &mut UserProgress,
    catalog: &Catalog,
    rules: &EngineRules,
    item_id: &str,
    notes: &str,
    at: OffsetDateTime,
) -> Result<(), ProgressError> {
    let item = catalog.require(item_id)?;
    let mut progress = snapshot
        .progress(item_id)
        .cloned()
        .unwrap_or_else(|| SkillItemProgress::new(item, rules, at));
    progress.notes = notes.to_string();
    progress.updated_at = at;
    snapshot.skill_items.insert(item_id.to_string(), progress);

    snapshot.push_log(
        LogEntry::new(LogKind::NotesUpdated, at, format!("{} notes updated", item.title))
            .skill_item(item_id),
        rules.log_capacity,
    );
    Ok(())
}

/// Expires, generates and re-measures quests, paying completed ones into the
/// reward ledger.
///
/// # Errors
/// Returns [`ProgressError::Validation`] when quest expiry cannot be computed.
pub fn sync_quests(
    snapshot: &mut UserProgress,
    rules: &EngineRules,
    today: Date,
    at: OffsetDateTime,
) -> Result<QuestRefresh, ProgressError> {
    let refresh = refresh_quests(snapshot, rules, today, at)?;

    for id in &refresh.expired {
        snapshot.push_log(
            LogEntry::new(LogKind::QuestExpired, at, format!("Quest {id} expired")).quest(id),
            rules.log_capacity,
        );
    }
    for id in &refresh.generated {
        snapshot.push_log(
            LogEntry::new(LogKind::QuestGenerated, at, format!("Quest {id} issued")).quest(id),
            rules.log_capacity,
        );
    }
    for reward in &refresh.rewards {
        snapshot.push_log(
            LogEntry::new(
                LogKind::QuestCompleted,
                at,
                format!("Quest {} completed", reward.quest_id),
            )
            .quest(&reward.quest_id)
            .experience(reward.experience)
            .tokens(reward.tokens),
            rules.log_capacity,
        );
    }

    if !refresh.generated.is_empty() || !refresh.completed.is_empty() {
        tracing::debug!(
            generated = refresh.generated.len(),
            expired = refresh.expired.len(),
            completed = refresh.completed.len(),
            "quests refreshed"
        );
    }

    snapshot.quests.clone_from(&refresh.quests);
    snapshot.quest_rewards.extend(refresh.rewards.iter().cloned());
    Ok(refresh)
}

/// Runs the recalculator and stores its result, logging streak transitions
/// and newly earned badges.
///
/// # Errors
/// Propagates [`recalculate_detailed`] errors; the snapshot is left untouched.
pub fn refresh_gamification(
    snapshot: &mut UserProgress,
    catalog: &Catalog,
    rules: &EngineRules,
    today: Date,
    at: OffsetDateTime,
) -> Result<Recalculation, ProgressError> {
    let outcome = recalculate_detailed(snapshot, catalog, rules, today)?;
    let streak = outcome.gamification.streak;
    let day = format_calendar_day(today);

    let streak_entry = match outcome.streak {
        StreakTransition::Unchanged => None,
        StreakTransition::Started => Some(
            LogEntry::new(LogKind::StreakAdvanced, at, format!("Streak started on {day}"))
                .experience(rules.streak_day_bonus_xp),
        ),
        StreakTransition::Advanced { bonus_awarded } => {
            let entry = LogEntry::new(
                LogKind::StreakAdvanced,
                at,
                format!("Streak at {streak} day(s) on {day}"),
            );
            Some(if bonus_awarded {
                entry.experience(rules.streak_day_bonus_xp)
            } else {
                entry
            })
        }
        StreakTransition::Frozen => Some(LogEntry::new(
            LogKind::StreakFrozen,
            at,
            format!(
                "Streak freeze used on {day} ({} of {})",
                outcome.gamification.streak_freeze_used, rules.streak_freeze_allowance
            ),
        )),
        StreakTransition::Reset => Some(
            LogEntry::new(LogKind::StreakReset, at, format!("Streak reset on {day}"))
                .experience(rules.streak_day_bonus_xp),
        ),
    };

    if let Some(entry) = streak_entry {
        tracing::debug!(streak, transition = ?outcome.streak, "streak updated");
        snapshot.push_log(entry, rules.log_capacity);
    }
    for badge in &outcome.new_badges {
        tracing::info!(badge = %badge.id, "badge earned");
        snapshot.push_log(
            LogEntry::new(LogKind::BadgeEarned, at, format!("Badge earned: {}", badge.name)),
            rules.log_capacity,
        );
    }

    snapshot.gamification = outcome.gamification.clone();
    Ok(outcome)
}
