//! Short-lived daily and weekly objectives.
//!
//! Quest ids are derived from the period and slot, so generating twice in the
//! same period yields the same quest. Progress is never incremented: it is
//! re-measured from the snapshot against a baseline captured at generation.
//! Rewards leave this module as [`QuestReward`] values for the snapshot's
//! ledger, produced only on the transition into `completed`.

use serde::{Deserialize, Serialize};
use time::{Date, Duration, OffsetDateTime, Time};

use crate::progress::{QuestReward, UserProgress};
use crate::rules::EngineRules;
use crate::{format_calendar_day, stable_hash, ProgressError};

/// Completed and expired quests stay visible this long past their expiry.
const RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestKind {
    Daily,
    Weekly,
}

impl QuestKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    Available,
    InProgress,
    Completed,
    Expired,
}

impl QuestStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Expired => "expired",
        }
    }

    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Available | Self::InProgress)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestObjective {
    LogPracticeSessions,
    CompletePaliers,
    ValidateSkillItems,
}

impl QuestObjective {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LogPracticeSessions => "log_practice_sessions",
            Self::CompletePaliers => "complete_paliers",
            Self::ValidateSkillItems => "validate_skill_items",
        }
    }

    fn title(self) -> &'static str {
        match self {
            Self::LogPracticeSessions => "Mat Time",
            Self::CompletePaliers => "Stage Climber",
            Self::ValidateSkillItems => "Seal the Deal",
        }
    }

    fn describe(self, target: u32) -> String {
        match self {
            Self::LogPracticeSessions => format!("Log practice on {target} distinct day(s)"),
            Self::CompletePaliers => format!("Complete {target} palier(s)"),
            Self::ValidateSkillItems => format!("Validate {target} skill item(s)"),
        }
    }

    /// Raw counter the objective tracks. Session objectives count distinct
    /// practice dates on or after `since`; the others are cumulative totals.
    fn measure(self, snapshot: &UserProgress, since: Date) -> u32 {
        match self {
            Self::LogPracticeSessions => {
                let days = snapshot.session_dates().range(since..).count();
                u32::try_from(days).unwrap_or(u32::MAX)
            }
            Self::CompletePaliers => snapshot.completed_palier_count(),
            Self::ValidateSkillItems => snapshot.validated_count(),
        }
    }

    /// Session objectives are already relative to the issue date.
    fn baseline(self, snapshot: &UserProgress, issued_on: Date) -> u32 {
        match self {
            Self::LogPracticeSessions => 0,
            Self::CompletePaliers | Self::ValidateSkillItems => self.measure(snapshot, issued_on),
        }
    }
}

const DAILY_ROTATION: [(QuestObjective, u32); 2] = [
    (QuestObjective::LogPracticeSessions, 1),
    (QuestObjective::CompletePaliers, 1),
];

const WEEKLY_ROTATION: [(QuestObjective, u32); 3] = [
    (QuestObjective::LogPracticeSessions, 3),
    (QuestObjective::CompletePaliers, 4),
    (QuestObjective::ValidateSkillItems, 1),
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct QuestProgress {
    pub current: u32,
    pub target: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Quest {
    pub id: String,
    pub kind: QuestKind,
    pub title: String,
    pub description: String,
    pub objective: QuestObjective,
    pub status: QuestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<QuestProgress>,
    pub baseline: u32,
    pub issued_on: Date,
    pub experience_reward: u64,
    pub token_reward: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Result of one refresh pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestRefresh {
    pub quests: Vec<Quest>,
    pub rewards: Vec<QuestReward>,
    pub generated: Vec<String>,
    pub expired: Vec<String>,
    pub completed: Vec<String>,
}

fn daily_id(today: Date, slot: u32) -> String {
    format!("daily:{}:{slot}", format_calendar_day(today))
}

fn weekly_id(today: Date, slot: u32) -> String {
    let (year, week, _) = today.to_iso_week_date();
    format!("weekly:{year}-W{week:02}:{slot}")
}

fn midnight(day: Date) -> OffsetDateTime {
    day.with_time(Time::MIDNIGHT).assume_utc()
}

fn out_of_range(today: Date) -> ProgressError {
    ProgressError::Validation(format!("cannot compute quest expiry after {today}"))
}

fn pick(rotation: &[(QuestObjective, u32)], period_key: &str, slot: u32) -> (QuestObjective, u32) {
    let len = rotation.len() as u64;
    let index = stable_hash(period_key).wrapping_add(u64::from(slot)) % len;
    rotation[usize::try_from(index).unwrap_or(0)]
}

fn build(
    snapshot: &UserProgress,
    rules: &EngineRules,
    id: String,
    kind: QuestKind,
    (objective, target): (QuestObjective, u32),
    issued_on: Date,
    expires_at: OffsetDateTime,
) -> Quest {
    let (experience_reward, token_reward) = rules.quest_reward(kind);
    Quest {
        id,
        kind,
        title: objective.title().to_string(),
        description: objective.describe(target),
        objective,
        status: QuestStatus::Available,
        progress: Some(QuestProgress { current: 0, target }),
        baseline: objective.baseline(snapshot, issued_on),
        issued_on,
        experience_reward,
        token_reward,
        expires_at,
    }
}

/// Daily quest for `slot`, expiring at the next UTC midnight.
///
/// # Errors
/// Returns [`ProgressError::Validation`] when the expiry falls outside the
/// supported calendar range.
pub fn generate_daily(
    snapshot: &UserProgress,
    rules: &EngineRules,
    today: Date,
    slot: u32,
) -> Result<Quest, ProgressError> {
    let expires_at = midnight(today.next_day().ok_or_else(|| out_of_range(today))?);
    let period_key = format!("daily:{}", format_calendar_day(today));
    Ok(build(
        snapshot,
        rules,
        daily_id(today, slot),
        QuestKind::Daily,
        pick(&DAILY_ROTATION, &period_key, slot),
        today,
        expires_at,
    ))
}

/// Weekly quest for `slot`, expiring at the start of next ISO week (Monday,
/// UTC midnight).
///
/// # Errors
/// Returns [`ProgressError::Validation`] when the expiry falls outside the
/// supported calendar range.
pub fn generate_weekly(
    snapshot: &UserProgress,
    rules: &EngineRules,
    today: Date,
    slot: u32,
) -> Result<Quest, ProgressError> {
    let days_left = 7 - i64::from(today.weekday().number_days_from_monday());
    let next_monday = today
        .checked_add(Duration::days(days_left))
        .ok_or_else(|| out_of_range(today))?;
    let (year, week, _) = today.to_iso_week_date();
    let period_key = format!("weekly:{year}-W{week:02}");
    Ok(build(
        snapshot,
        rules,
        weekly_id(today, slot),
        QuestKind::Weekly,
        pick(&WEEKLY_ROTATION, &period_key, slot),
        today,
        midnight(next_monday),
    ))
}

/// Re-measures a quest against the snapshot.
///
/// Completed and expired quests are returned untouched. A reward is returned
/// only when this call moves the quest into `completed` and the ledger holds
/// no payout for it yet.
#[must_use]
pub fn update_progress(
    quest: &Quest,
    snapshot: &UserProgress,
    at: OffsetDateTime,
) -> (Quest, Option<QuestReward>) {
    if !quest.status.is_active() {
        return (quest.clone(), None);
    }

    let target = quest.progress.map_or(1, |progress| progress.target);
    let current = quest
        .objective
        .measure(snapshot, quest.issued_on)
        .saturating_sub(quest.baseline)
        .min(target);

    let mut next = quest.clone();
    next.progress = Some(QuestProgress { current, target });
    next.status = if current >= target {
        QuestStatus::Completed
    } else if current > 0 {
        QuestStatus::InProgress
    } else {
        QuestStatus::Available
    };

    let already_paid = snapshot
        .quest_rewards
        .iter()
        .any(|reward| reward.quest_id == quest.id);
    let reward = (next.status == QuestStatus::Completed && !already_paid).then(|| QuestReward {
        quest_id: quest.id.clone(),
        kind: quest.kind,
        experience: quest.experience_reward,
        tokens: quest.token_reward,
        completed_at: at,
    });

    (next, reward)
}

/// Expires overdue quests, drops finished ones past retention, tops the
/// active list up to `max_active_quests` and re-measures everything active.
///
/// # Errors
/// Returns [`ProgressError::Validation`] when quest expiry cannot be computed.
pub fn refresh_quests(
    snapshot: &UserProgress,
    rules: &EngineRules,
    today: Date,
    now: OffsetDateTime,
) -> Result<QuestRefresh, ProgressError> {
    let mut refresh = QuestRefresh::default();

    for quest in &snapshot.quests {
        let mut quest = quest.clone();
        if quest.status.is_active() && now >= quest.expires_at {
            quest.status = QuestStatus::Expired;
            refresh.expired.push(quest.id.clone());
        }
        if !quest.status.is_active() && now >= quest.expires_at + Duration::days(RETENTION_DAYS) {
            continue;
        }
        refresh.quests.push(quest);
    }

    let paid = |id: &str| snapshot.quest_rewards.iter().any(|reward| reward.quest_id == id);
    let known = |quests: &[Quest], id: &str| quests.iter().any(|quest| quest.id == id);
    let max_active = usize::try_from(rules.max_active_quests).unwrap_or(usize::MAX);

    let mut candidates = Vec::new();
    for slot in 0..rules.daily_quest_slots {
        candidates.push((QuestKind::Daily, slot, daily_id(today, slot)));
    }
    for slot in 0..rules.weekly_quest_slots {
        candidates.push((QuestKind::Weekly, slot, weekly_id(today, slot)));
    }

    for (kind, slot, id) in candidates {
        let active = refresh
            .quests
            .iter()
            .filter(|quest| quest.status.is_active())
            .count();
        if active >= max_active {
            break;
        }
        if known(&refresh.quests, &id) || paid(&id) {
            continue;
        }
        let quest = match kind {
            QuestKind::Daily => generate_daily(snapshot, rules, today, slot)?,
            QuestKind::Weekly => generate_weekly(snapshot, rules, today, slot)?,
        };
        refresh.generated.push(quest.id.clone());
        refresh.quests.push(quest);
    }

    let mut ledger = snapshot.clone();
    for quest in &mut refresh.quests {
        let (next, reward) = update_progress(quest, &ledger, now);
        if let Some(reward) = reward {
            refresh.completed.push(next.id.clone());
            ledger.quest_rewards.push(reward.clone());
            refresh.rewards.push(reward);
        }
        *quest = next;
    }

    Ok(refresh)
}
