use serde::{Deserialize, Serialize};

use crate::catalog::SkillItem;
use crate::progress::UserProgress;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SkillStatus {
    Locked,
    Available,
    InProgress,
    Done,
}

impl SkillStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Available => "available",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }
}

/// Externally visible status of a Skill Item.
///
/// Locked wins over the item's own progress: an unvalidated prerequisite
/// hides palier work already recorded on the item.
#[must_use]
pub fn skill_status(item: &SkillItem, snapshot: &UserProgress) -> SkillStatus {
    let locked = item
        .prerequisites
        .iter()
        .any(|prerequisite| !snapshot.is_validated(prerequisite));
    if locked {
        return SkillStatus::Locked;
    }

    match snapshot.progress(&item.id) {
        None => SkillStatus::Available,
        Some(progress) if progress.is_validated() => SkillStatus::Done,
        Some(_) => SkillStatus::InProgress,
    }
}

/// True when the item may be validated right now: unlocked, not yet done,
/// and all four paliers completed.
#[must_use]
pub fn is_eligible_for_validation(item: &SkillItem, snapshot: &UserProgress) -> bool {
    skill_status(item, snapshot) == SkillStatus::InProgress
        && snapshot
            .progress(&item.id)
            .is_some_and(|progress| progress.paliers.all_completed())
}
