//! Skill-progression and gamification engine.
//!
//! The engine is a set of pure functions over a [`UserProgress`] snapshot:
//! callers load a snapshot through a [`ProgressStore`], apply one mutation
//! from [`engine`], run [`refresh_gamification`] and write the snapshot back.
//! Every derived number (experience, tokens, level, badges, mastery map) is
//! recomputed from scratch on each pass. The streak counter is the single
//! piece of state carried forward from the previous [`Gamification`] record.

use time::{Date, Month, OffsetDateTime, UtcOffset};

pub mod boss;
pub mod catalog;
pub mod clock;
pub mod engine;
pub mod gamification;
pub mod mastery;
pub mod migration;
pub mod palier;
pub mod progress;
pub mod quest;
pub mod rules;
pub mod store;
pub mod unlock;

pub use boss::{medal_for, BossFightResult, BossFightSession, Medal};
pub use catalog::{
    Catalog, Checkpoint, FreeSparringThreshold, PositionalTestThreshold, SkillItem, SkillType,
    StabilityThreshold, ValidationThresholds,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::{
    apply_palier_update, record_boss_fight, refresh_gamification, set_notes, sync_quests,
    validate_skill_item, PalierUpdate,
};
pub use gamification::{
    cleared_cycles, insert_badge, level_for, recalculate, recalculate_detailed, update_streak,
    Badge, Gamification, Recalculation, StreakTransition,
};
pub use mastery::{grade_mastery, MasteryTier};
pub use migration::{is_legacy_document, load_snapshot, LoadedSnapshot};
pub use palier::{
    validate_application, validate_execution, validate_integration, validate_knowledge,
    ApplicationState, ExecutionState, FreeSparringTest, IntegrationState, KnowledgeState,
    PalierStatus, Paliers, PositionalTest,
};
pub use progress::{LogEntry, LogKind, QuestReward, SkillItemProgress, UserProgress};
pub use quest::{
    generate_daily, generate_weekly, refresh_quests, update_progress, Quest, QuestKind,
    QuestObjective, QuestProgress, QuestRefresh, QuestStatus,
};
pub use rules::{EngineRules, MasteryRules, MAX_BOSS_ATTEMPTS, MAX_QUEST_SLOTS};
pub use store::{InMemoryProgressStore, MirroredStore, ProgressStore};
pub use unlock::{is_eligible_for_validation, skill_status, SkillStatus};

/// Snapshot schema written by this crate. Documents without a `pas` key
/// predate it (see [`migration`]).
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ProgressError {
    #[error("catalog error: {0}")]
    Catalog(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("derivation error: {0}")]
    Derivation(String),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl ProgressError {
    /// Persistence failures are the only ones worth retrying; the engine
    /// itself has no I/O and so never retries.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

/// Parses a calendar date in `YYYY-MM-DD` form.
///
/// # Errors
/// Returns [`ProgressError::Validation`] when the value is malformed or names
/// a date that does not exist.
pub fn parse_calendar_day(value: &str) -> Result<Date, ProgressError> {
    let invalid = || ProgressError::Validation(format!("invalid calendar date: {value}"));

    let mut parts = value.trim().split('-');
    let (Some(year_raw), Some(month_raw), Some(day_raw), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    if year_raw.len() != 4 || month_raw.len() != 2 || day_raw.len() != 2 {
        return Err(invalid());
    }

    let year: i32 = year_raw.parse().map_err(|_| invalid())?;
    let month: u8 = month_raw.parse().map_err(|_| invalid())?;
    let day: u8 = day_raw.parse().map_err(|_| invalid())?;
    let month = Month::try_from(month).map_err(|_| invalid())?;

    Date::from_calendar_date(year, month, day).map_err(|_| invalid())
}

#[must_use]
pub fn format_calendar_day(value: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        value.year(),
        u8::from(value.month()),
        value.day()
    )
}

/// Parses an RFC3339 timestamp and requires UTC (`Z`) offset.
///
/// # Errors
/// Returns [`ProgressError::Validation`] when parsing fails or an input
/// timestamp is not UTC.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, ProgressError> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| ProgressError::Validation(format!("invalid RFC3339 timestamp: {err}")))?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(ProgressError::Validation(
            "timestamp MUST use UTC offset Z".to_string(),
        ));
    }

    Ok(parsed)
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`ProgressError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, ProgressError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| {
            ProgressError::Validation(format!("failed to format RFC3339 timestamp: {err}"))
        })
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

/// Stable FNV-1a hash; platform hashers are randomized per process.
#[must_use]
pub(crate) fn stable_hash(input: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    pub fn must_some<T>(value: Option<T>) -> T {
        match value {
            Some(inner) => inner,
            None => panic!("expected Some(..), got None"),
        }
    }

    pub fn day(value: &str) -> Date {
        must_ok(parse_calendar_day(value))
    }

    pub fn at(value: &str) -> OffsetDateTime {
        must_ok(parse_rfc3339_utc(value))
    }
}
