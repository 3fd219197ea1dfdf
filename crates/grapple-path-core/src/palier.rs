//! The four mastery stages (paliers) of a Skill Item.
//!
//! Each validator takes the current state plus newly reported numbers and
//! returns a fresh state; nothing is mutated in place. A validator is the only
//! place a stage status is written, and it always writes `completed` exactly
//! when that stage's own thresholds hold. Thresholds are copied into the state
//! when the progress record is created so the validators depend on nothing
//! but their arguments.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::catalog::SkillItem;
use crate::rules::EngineRules;
use crate::ProgressError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PalierStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

impl PalierStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    #[must_use]
    pub fn is_completed(self) -> bool {
        self == Self::Completed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KnowledgeState {
    pub status: PalierStatus,
    pub reps_completed: u32,
    pub reps_required: u32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionState {
    pub status: PalierStatus,
    pub total_reps: u32,
    pub clean_reps: u32,
    pub total_reps_required: u32,
    pub clean_reps_required: u32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionalTest {
    pub attempts: u32,
    pub successes: u32,
    /// Percent, `0.0` until the first attempt.
    pub success_rate: f64,
    pub session_dates: Vec<Date>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationState {
    pub status: PalierStatus,
    pub positional_test: PositionalTest,
    pub target_rate: f64,
    /// Attempts needed before the success rate is trusted.
    pub min_attempts: u32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FreeSparringTest {
    pub rounds: u32,
    pub occurrences: u32,
    pub session_dates: BTreeSet<Date>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrationState {
    pub status: PalierStatus,
    pub free_sparring_test: FreeSparringTest,
    pub occurrences_min: u32,
    pub sessions_required: u32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Paliers {
    pub knowledge: KnowledgeState,
    pub execution: ExecutionState,
    pub application: ApplicationState,
    pub integration: IntegrationState,
}

impl Paliers {
    /// Fresh, untouched stages with thresholds taken from the catalog item
    /// and the engine rules.
    #[must_use]
    pub fn for_item(item: &SkillItem, rules: &EngineRules) -> Self {
        let validation = &item.validation;
        Self {
            knowledge: KnowledgeState {
                status: PalierStatus::NotStarted,
                reps_completed: 0,
                reps_required: rules.knowledge_reps_required,
                completed_at: None,
            },
            execution: ExecutionState {
                status: PalierStatus::NotStarted,
                total_reps: 0,
                clean_reps: 0,
                total_reps_required: rules.execution_total_reps_required,
                clean_reps_required: rules.execution_clean_reps_required,
                completed_at: None,
            },
            application: ApplicationState {
                status: PalierStatus::NotStarted,
                positional_test: PositionalTest {
                    attempts: 0,
                    successes: 0,
                    success_rate: 0.0,
                    session_dates: Vec::new(),
                },
                target_rate: validation.positional_test.target_rate,
                min_attempts: validation
                    .positional_test
                    .attempts
                    .max(rules.application_min_attempts),
                completed_at: None,
            },
            integration: IntegrationState {
                status: PalierStatus::NotStarted,
                free_sparring_test: FreeSparringTest {
                    rounds: 0,
                    occurrences: 0,
                    session_dates: BTreeSet::new(),
                },
                occurrences_min: validation.free_sparring.min_occurrences,
                sessions_required: validation.stability.sessions_required,
                completed_at: None,
            },
        }
    }

    #[must_use]
    pub fn statuses(&self) -> [PalierStatus; 4] {
        [
            self.knowledge.status,
            self.execution.status,
            self.application.status,
            self.integration.status,
        ]
    }

    #[must_use]
    pub fn all_completed(&self) -> bool {
        self.statuses().iter().all(|status| status.is_completed())
    }

    #[must_use]
    pub fn completed_count(&self) -> u32 {
        let count = self
            .statuses()
            .iter()
            .filter(|status| status.is_completed())
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn any_started(&self) -> bool {
        self.statuses()
            .iter()
            .any(|status| *status != PalierStatus::NotStarted)
    }
}

/// Knowledge: reps only ever go up; reaching `reps_required` completes it.
#[must_use]
pub fn validate_knowledge(
    state: &KnowledgeState,
    reps_completed: u32,
    at: OffsetDateTime,
) -> KnowledgeState {
    let reps = state.reps_completed.max(reps_completed);
    let completed = reps >= state.reps_required;
    let (status, completed_at) = settle(completed, reps > 0, state.completed_at, at);

    KnowledgeState {
        status,
        reps_completed: reps,
        reps_required: state.reps_required,
        completed_at,
    }
}

/// Execution: total reps accumulate, clean reps are an absolute best.
///
/// # Errors
/// Returns [`ProgressError::Validation`] when clean reps would exceed total
/// reps or the counters overflow.
pub fn validate_execution(
    state: &ExecutionState,
    total_reps_delta: u32,
    clean_reps_absolute: u32,
    at: OffsetDateTime,
) -> Result<ExecutionState, ProgressError> {
    let total_reps = state
        .total_reps
        .checked_add(total_reps_delta)
        .ok_or_else(|| ProgressError::Validation("execution total_reps overflow".to_string()))?;
    let clean_reps = state.clean_reps.max(clean_reps_absolute);

    if clean_reps > total_reps {
        return Err(ProgressError::Validation(format!(
            "clean_reps ({clean_reps}) cannot exceed total_reps ({total_reps})"
        )));
    }

    let completed =
        total_reps >= state.total_reps_required && clean_reps >= state.clean_reps_required;
    let (status, completed_at) = settle(completed, total_reps > 0, state.completed_at, at);

    Ok(ExecutionState {
        status,
        total_reps,
        clean_reps,
        total_reps_required: state.total_reps_required,
        clean_reps_required: state.clean_reps_required,
        completed_at,
    })
}

/// Application: positional test attempts and successes accumulate. The rate
/// only counts once `min_attempts` have been made, and completion can be lost
/// again if later attempts drag the rate back under the target.
///
/// # Errors
/// Returns [`ProgressError::Validation`] when more successes than attempts are
/// reported or the counters overflow.
pub fn validate_application(
    state: &ApplicationState,
    attempts_delta: u32,
    successes_delta: u32,
    session_date: Date,
    at: OffsetDateTime,
) -> Result<ApplicationState, ProgressError> {
    if successes_delta > attempts_delta {
        return Err(ProgressError::Validation(format!(
            "successes ({successes_delta}) cannot exceed attempts ({attempts_delta})"
        )));
    }

    let test = &state.positional_test;
    let overflow = || ProgressError::Validation("positional test counter overflow".to_string());
    let attempts = test.attempts.checked_add(attempts_delta).ok_or_else(overflow)?;
    let successes = test.successes.checked_add(successes_delta).ok_or_else(overflow)?;

    let mut session_dates = test.session_dates.clone();
    if attempts_delta > 0 && !session_dates.contains(&session_date) {
        session_dates.push(session_date);
    }

    let rate = success_rate(successes, attempts);
    let completed = attempts >= state.min_attempts && rate >= state.target_rate;
    let (status, completed_at) = settle(completed, attempts > 0, state.completed_at, at);

    Ok(ApplicationState {
        status,
        positional_test: PositionalTest {
            attempts,
            successes,
            success_rate: rate,
            session_dates,
        },
        target_rate: state.target_rate,
        min_attempts: state.min_attempts,
        completed_at,
    })
}

/// Integration: occurrences in free sparring accumulate and every session
/// that reported activity adds its date to a set. Both the occurrence minimum
/// and the distinct-session count must hold.
///
/// # Errors
/// Returns [`ProgressError::Validation`] when the counters overflow.
pub fn validate_integration(
    state: &IntegrationState,
    rounds_delta: u32,
    occurrences_delta: u32,
    session_date: Date,
    at: OffsetDateTime,
) -> Result<IntegrationState, ProgressError> {
    let test = &state.free_sparring_test;
    let overflow = || ProgressError::Validation("free sparring counter overflow".to_string());
    let rounds = test.rounds.checked_add(rounds_delta).ok_or_else(overflow)?;
    let occurrences = test
        .occurrences
        .checked_add(occurrences_delta)
        .ok_or_else(overflow)?;

    let mut session_dates = test.session_dates.clone();
    if rounds_delta > 0 || occurrences_delta > 0 {
        session_dates.insert(session_date);
    }

    let sessions = u32::try_from(session_dates.len()).unwrap_or(u32::MAX);
    let completed = occurrences >= state.occurrences_min && sessions >= state.sessions_required;
    let started = rounds > 0 || occurrences > 0;
    let (status, completed_at) = settle(completed, started, state.completed_at, at);

    Ok(IntegrationState {
        status,
        free_sparring_test: FreeSparringTest {
            rounds,
            occurrences,
            session_dates,
        },
        occurrences_min: state.occurrences_min,
        sessions_required: state.sessions_required,
        completed_at,
    })
}

#[must_use]
pub fn success_rate(successes: u32, attempts: u32) -> f64 {
    if attempts == 0 {
        return 0.0;
    }
    f64::from(successes) * 100.0 / f64::from(attempts)
}

fn settle(
    completed: bool,
    started: bool,
    previous_completed_at: Option<OffsetDateTime>,
    at: OffsetDateTime,
) -> (PalierStatus, Option<OffsetDateTime>) {
    if completed {
        (PalierStatus::Completed, Some(previous_completed_at.unwrap_or(at)))
    } else if started {
        (PalierStatus::InProgress, None)
    } else {
        (PalierStatus::NotStarted, None)
    }
}
