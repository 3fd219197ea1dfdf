use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Date, OffsetDateTime};
use ulid::Ulid;

use crate::catalog::SkillItem;
use crate::gamification::Gamification;
use crate::mastery::MasteryTier;
use crate::palier::Paliers;
use crate::quest::{Quest, QuestKind};
use crate::rules::EngineRules;
use crate::SNAPSHOT_SCHEMA_VERSION;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillItemProgress {
    pub skill_item_id: String,
    pub paliers: Paliers,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub validated_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub mastery_tier: Option<MasteryTier>,
    pub volume_completed: u32,
    #[serde(default)]
    pub session_dates: BTreeSet<Date>,
    #[serde(default)]
    pub notes: String,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl SkillItemProgress {
    #[must_use]
    pub fn new(item: &SkillItem, rules: &EngineRules, at: OffsetDateTime) -> Self {
        Self {
            skill_item_id: item.id.clone(),
            paliers: Paliers::for_item(item, rules),
            validated_at: None,
            mastery_tier: None,
            volume_completed: 0,
            session_dates: BTreeSet::new(),
            notes: String::new(),
            updated_at: at,
        }
    }

    #[must_use]
    pub fn is_validated(&self) -> bool {
        self.validated_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    PalierUpdated,
    PalierCompleted,
    SkillItemValidated,
    NotesUpdated,
    QuestGenerated,
    QuestCompleted,
    QuestExpired,
    BossFightRecorded,
    StreakAdvanced,
    StreakFrozen,
    StreakReset,
    BadgeEarned,
    LegacyMigrated,
}

impl LogKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PalierUpdated => "palier_updated",
            Self::PalierCompleted => "palier_completed",
            Self::SkillItemValidated => "skill_item_validated",
            Self::NotesUpdated => "notes_updated",
            Self::QuestGenerated => "quest_generated",
            Self::QuestCompleted => "quest_completed",
            Self::QuestExpired => "quest_expired",
            Self::BossFightRecorded => "boss_fight_recorded",
            Self::StreakAdvanced => "streak_advanced",
            Self::StreakFrozen => "streak_frozen",
            Self::StreakReset => "streak_reset",
            Self::BadgeEarned => "badge_earned",
            Self::LegacyMigrated => "legacy_migrated",
        }
    }
}

/// Audit trail entry. Never read back to derive state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub id: Ulid,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub kind: LogKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quest_id: Option<String>,
    pub experience_delta: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_delta: Option<i64>,
    pub label: String,
}

impl LogEntry {
    #[must_use]
    pub fn new(kind: LogKind, timestamp: OffsetDateTime, label: impl Into<String>) -> Self {
        Self {
            id: Ulid::new(),
            timestamp,
            kind,
            skill_item_id: None,
            quest_id: None,
            experience_delta: 0,
            token_delta: None,
            label: label.into(),
        }
    }

    #[must_use]
    pub fn skill_item(mut self, id: &str) -> Self {
        self.skill_item_id = Some(id.to_string());
        self
    }

    #[must_use]
    pub fn quest(mut self, id: &str) -> Self {
        self.quest_id = Some(id.to_string());
        self
    }

    #[must_use]
    pub fn experience(mut self, delta: u64) -> Self {
        self.experience_delta = i64::try_from(delta).unwrap_or(i64::MAX);
        self
    }

    #[must_use]
    pub fn tokens(mut self, delta: u64) -> Self {
        self.token_delta = Some(i64::try_from(delta).unwrap_or(i64::MAX));
        self
    }
}

/// A quest payout. Written once, at the completion transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestReward {
    pub quest_id: String,
    pub kind: QuestKind,
    pub experience: u64,
    pub tokens: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

/// The unit exchanged with the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProgress {
    pub schema_version: u32,
    pub catalog_version: String,
    #[serde(rename = "pas", default)]
    pub skill_items: BTreeMap<String, SkillItemProgress>,
    #[serde(default)]
    pub gamification: Gamification,
    #[serde(default)]
    pub quests: Vec<Quest>,
    #[serde(default)]
    pub quest_rewards: Vec<QuestReward>,
    #[serde(default)]
    pub log: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_backup: Option<Value>,
}

impl UserProgress {
    #[must_use]
    pub fn new(catalog_version: impl Into<String>) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            catalog_version: catalog_version.into(),
            skill_items: BTreeMap::new(),
            gamification: Gamification::default(),
            quests: Vec::new(),
            quest_rewards: Vec::new(),
            log: Vec::new(),
            legacy_backup: None,
        }
    }

    #[must_use]
    pub fn progress(&self, id: &str) -> Option<&SkillItemProgress> {
        self.skill_items.get(id)
    }

    #[must_use]
    pub fn is_validated(&self, id: &str) -> bool {
        self.progress(id).is_some_and(SkillItemProgress::is_validated)
    }

    #[must_use]
    pub fn validated_count(&self) -> u32 {
        let count = self
            .skill_items
            .values()
            .filter(|progress| progress.is_validated())
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn completed_palier_count(&self) -> u32 {
        self.skill_items
            .values()
            .map(|progress| progress.paliers.completed_count())
            .fold(0_u32, u32::saturating_add)
    }

    /// Distinct practice dates across every Skill Item.
    #[must_use]
    pub fn session_dates(&self) -> BTreeSet<Date> {
        self.skill_items
            .values()
            .flat_map(|progress| progress.session_dates.iter().copied())
            .collect()
    }

    /// Appends to the audit log, dropping the oldest entries beyond
    /// `capacity`.
    pub fn push_log(&mut self, entry: LogEntry, capacity: usize) {
        self.log.push(entry);
        if self.log.len() > capacity {
            let excess = self.log.len() - capacity;
            self.log.drain(..excess);
        }
    }
}
