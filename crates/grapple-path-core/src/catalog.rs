//! Immutable, versioned curriculum of Skill Items.
//!
//! The catalog is an arena: items live in one vector ordered by
//! `(cycle, week, order)` and prerequisites are stored as id lists. The graph
//! is checked once, at construction, for dangling references and cycles; a
//! catalog that fails those checks is never handed out.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProgressError;

pub const MIN_CYCLE: u8 = 1;
pub const MAX_CYCLE: u8 = 4;

const BUILTIN_CURRICULUM: &str = include_str!("../curriculum/v1.json");

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SkillType {
    Foundational,
    Escape,
    Sweep,
    Pass,
    Control,
    Submission,
}

impl SkillType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Foundational => "foundational",
            Self::Escape => "escape",
            Self::Sweep => "sweep",
            Self::Pass => "pass",
            Self::Control => "control",
            Self::Submission => "submission",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionalTestThreshold {
    pub attempts: u32,
    /// Success rate to reach, in percent.
    pub target_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FreeSparringThreshold {
    pub rounds: u32,
    pub min_occurrences: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StabilityThreshold {
    pub sessions_required: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationThresholds {
    pub volume_min: u32,
    pub positional_test: PositionalTestThreshold,
    pub free_sparring: FreeSparringThreshold,
    pub stability: StabilityThreshold,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillItem {
    pub id: String,
    pub cycle: u8,
    pub week: u32,
    pub order: u32,
    pub title: String,
    pub objectives: Vec<String>,
    #[serde(rename = "type")]
    pub skill_type: SkillType,
    pub checkpoints: Vec<Checkpoint>,
    pub validation: ValidationThresholds,
    #[serde(default)]
    pub prerequisites: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogDocument {
    catalog_version: String,
    items: Vec<SkillItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    version: String,
    items: Vec<SkillItem>,
    index: BTreeMap<String, usize>,
}

impl Catalog {
    /// Builds a catalog and checks it for authoring errors.
    ///
    /// # Errors
    /// Returns [`ProgressError::Catalog`] for duplicate ids, out-of-range
    /// cycles, malformed thresholds, dangling prerequisites or prerequisite
    /// cycles. No item is ever dropped silently.
    pub fn new(version: impl Into<String>, mut items: Vec<SkillItem>) -> Result<Self, ProgressError> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err(ProgressError::Catalog(
                "catalog_version MUST be provided".to_string(),
            ));
        }

        if items.is_empty() {
            return Err(ProgressError::Catalog(
                "catalog MUST contain at least one skill item".to_string(),
            ));
        }

        for item in &items {
            check_item(item)?;
        }

        items.sort_by(|lhs, rhs| {
            (lhs.cycle, lhs.week, lhs.order, &lhs.id).cmp(&(rhs.cycle, rhs.week, rhs.order, &rhs.id))
        });

        let mut index = BTreeMap::new();
        for (position, item) in items.iter().enumerate() {
            if index.insert(item.id.clone(), position).is_some() {
                return Err(ProgressError::Catalog(format!(
                    "duplicate skill item id: {}",
                    item.id
                )));
            }
        }

        for item in &items {
            for prerequisite in &item.prerequisites {
                if !index.contains_key(prerequisite) {
                    return Err(ProgressError::Catalog(format!(
                        "skill item {} references unknown prerequisite {prerequisite}",
                        item.id
                    )));
                }
            }
        }

        let catalog = Self {
            version,
            items,
            index,
        };
        catalog.check_acyclic()?;
        Ok(catalog)
    }

    /// Decodes and checks a catalog document.
    ///
    /// # Errors
    /// Returns [`ProgressError::Catalog`] when decoding fails or the decoded
    /// catalog is malformed.
    pub fn from_json(value: &Value) -> Result<Self, ProgressError> {
        let document: CatalogDocument = serde_json::from_value(value.clone())
            .map_err(|err| ProgressError::Catalog(format!("invalid catalog JSON payload: {err}")))?;
        Self::new(document.catalog_version, document.items)
    }

    /// The curriculum shipped with the crate.
    ///
    /// # Errors
    /// Returns [`ProgressError::Catalog`] if the embedded curriculum is
    /// malformed.
    pub fn builtin() -> Result<Self, ProgressError> {
        let value: Value = serde_json::from_str(BUILTIN_CURRICULUM).map_err(|err| {
            ProgressError::Catalog(format!("embedded curriculum is not valid JSON: {err}"))
        })?;
        Self::from_json(&value)
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        let document = CatalogDocument {
            catalog_version: self.version.clone(),
            items: self.items.clone(),
        };
        serde_json::to_value(document).unwrap_or(Value::Null)
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn items(&self) -> &[SkillItem] {
        &self.items
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&SkillItem> {
        self.index.get(id).and_then(|position| self.items.get(*position))
    }

    /// Looks up an item, reporting unknown ids as input errors.
    ///
    /// # Errors
    /// Returns [`ProgressError::Validation`] when `id` is not in the catalog.
    pub fn require(&self, id: &str) -> Result<&SkillItem, ProgressError> {
        self.get(id)
            .ok_or_else(|| ProgressError::Validation(format!("unknown skill item: {id}")))
    }

    pub fn items_in_cycle(&self, cycle: u8) -> impl Iterator<Item = &SkillItem> {
        self.items.iter().filter(move |item| item.cycle == cycle)
    }

    #[must_use]
    pub fn cycles(&self) -> BTreeSet<u8> {
        self.items.iter().map(|item| item.cycle).collect()
    }

    fn check_acyclic(&self) -> Result<(), ProgressError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            Visiting,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.items.len()];

        for start in 0..self.items.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }

            // Iterative DFS: (node, next prerequisite to explore).
            let mut stack = vec![(start, 0_usize)];
            marks[start] = Mark::Visiting;

            while let Some((node, next)) = stack.pop() {
                let prerequisites = &self.items[node].prerequisites;
                if let Some(prerequisite) = prerequisites.get(next) {
                    stack.push((node, next + 1));
                    let Some(&child) = self.index.get(prerequisite) else {
                        continue;
                    };
                    match marks[child] {
                        Mark::Visiting => {
                            return Err(ProgressError::Catalog(format!(
                                "prerequisite cycle through {} -> {}",
                                self.items[node].id, prerequisite
                            )));
                        }
                        Mark::Unvisited => {
                            marks[child] = Mark::Visiting;
                            stack.push((child, 0));
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                }
            }
        }

        Ok(())
    }
}

fn check_item(item: &SkillItem) -> Result<(), ProgressError> {
    let fail = |reason: &str| {
        Err(ProgressError::Catalog(format!(
            "skill item {}: {reason}",
            if item.id.is_empty() { "<empty>" } else { item.id.as_str() }
        )))
    };

    if item.id.trim().is_empty() {
        return fail("id MUST be provided");
    }
    if !(MIN_CYCLE..=MAX_CYCLE).contains(&item.cycle) {
        return fail("cycle MUST be in 1..=4");
    }
    if item.week == 0 || item.order == 0 {
        return fail("week and order MUST be >= 1");
    }
    if item.title.trim().is_empty() {
        return fail("title MUST be provided");
    }
    if item.objectives.is_empty() {
        return fail("objectives MUST contain at least one entry");
    }
    if item.checkpoints.iter().any(|checkpoint| checkpoint.label.trim().is_empty()) {
        return fail("checkpoint labels MUST be provided");
    }

    let validation = &item.validation;
    if validation.volume_min == 0 {
        return fail("volume_min MUST be >= 1");
    }
    if validation.positional_test.attempts == 0 {
        return fail("positional_test.attempts MUST be >= 1");
    }
    let rate = validation.positional_test.target_rate;
    if !rate.is_finite() || !(0.0..=100.0).contains(&rate) {
        return fail("positional_test.target_rate MUST be in [0, 100]");
    }
    if validation.free_sparring.min_occurrences == 0 {
        return fail("free_sparring.min_occurrences MUST be >= 1");
    }
    if validation.stability.sessions_required == 0 {
        return fail("stability.sessions_required MUST be >= 1");
    }

    let mut seen = BTreeSet::new();
    for prerequisite in &item.prerequisites {
        if !seen.insert(prerequisite.as_str()) {
            return fail("prerequisites MUST NOT repeat");
        }
    }

    Ok(())
}
