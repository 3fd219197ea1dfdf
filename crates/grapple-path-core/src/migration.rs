//! One-way upgrade of legacy step-based documents.
//!
//! The old curriculum tracked flat "steps" grouped in "blocks". It does not
//! map onto Skill Items and paliers, so nothing is carried over: the legacy
//! document is kept verbatim under `legacy_backup` and the learner restarts
//! from an empty snapshot. The upgrade is always logged.

use serde_json::Value;
use time::OffsetDateTime;

use crate::progress::{LogEntry, LogKind, UserProgress};
use crate::{ProgressError, SNAPSHOT_SCHEMA_VERSION};

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSnapshot {
    pub snapshot: UserProgress,
    pub migrated: bool,
}

/// A `steps` key without a `pas` key.
#[must_use]
pub fn is_legacy_document(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|object| object.contains_key("steps") && !object.contains_key("pas"))
}

/// Decodes a stored document, upgrading legacy ones.
///
/// # Errors
/// Returns [`ProgressError::Migration`] when the document is not an object,
/// does not decode as a snapshot, or was written by a newer schema.
pub fn load_snapshot(
    value: Value,
    catalog_version: &str,
    at: OffsetDateTime,
) -> Result<LoadedSnapshot, ProgressError> {
    if !value.is_object() {
        return Err(ProgressError::Migration(
            "stored progress document MUST be a JSON object".to_string(),
        ));
    }

    if is_legacy_document(&value) {
        let legacy_steps = value
            .get("steps")
            .and_then(Value::as_object)
            .map_or(0, serde_json::Map::len);
        tracing::warn!(
            legacy_steps,
            catalog_version,
            "legacy step-based progress found; starting fresh palier progress"
        );

        let mut snapshot = UserProgress::new(catalog_version);
        snapshot.legacy_backup = Some(value);
        snapshot.log.push(LogEntry::new(
            LogKind::LegacyMigrated,
            at,
            format!("Migrated legacy progress ({legacy_steps} steps backed up, not transferred)"),
        ));
        return Ok(LoadedSnapshot {
            snapshot,
            migrated: true,
        });
    }

    let mut snapshot: UserProgress = serde_json::from_value(value)
        .map_err(|err| ProgressError::Migration(format!("invalid progress snapshot: {err}")))?;

    if snapshot.schema_version > SNAPSHOT_SCHEMA_VERSION {
        return Err(ProgressError::Migration(format!(
            "snapshot schema_version {} is newer than supported {SNAPSHOT_SCHEMA_VERSION}",
            snapshot.schema_version
        )));
    }
    snapshot.schema_version = SNAPSHOT_SCHEMA_VERSION;

    Ok(LoadedSnapshot {
        snapshot,
        migrated: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use serde_json::json;

    fn legacy() -> Value {
        json!({
            "steps": { "step-1": { "validated": true }, "step-2": { "validated": false } },
            "blocks": [{ "id": "block-1", "steps": ["step-1", "step-2"] }],
            "xp": 420
        })
    }

    #[test]
    fn detects_steps_without_pas() {
        assert!(is_legacy_document(&legacy()));
        assert!(!is_legacy_document(&json!({ "steps": {}, "pas": {} })));
        assert!(!is_legacy_document(&json!({ "pas": {} })));
        assert!(!is_legacy_document(&json!(["steps"])));
    }

    #[test]
    fn legacy_document_is_backed_up_and_replaced() {
        let loaded = must_ok(load_snapshot(
            legacy(),
            "grapple-path.v1",
            at("2026-02-07T12:00:00Z"),
        ));

        assert!(loaded.migrated);
        let snapshot = loaded.snapshot;
        assert!(snapshot.skill_items.is_empty());
        assert_eq!(snapshot.gamification.experience_total, 0);
        assert_eq!(snapshot.legacy_backup, Some(legacy()));
        assert_eq!(snapshot.log.len(), 1);
        assert_eq!(must_some(snapshot.log.first()).kind, LogKind::LegacyMigrated);
    }

    #[test]
    fn current_document_loads_unchanged() {
        let original = UserProgress::new("grapple-path.v1");
        let value = must_ok(serde_json::to_value(&original));

        let loaded = must_ok(load_snapshot(value, "grapple-path.v1", at("2026-02-07T12:00:00Z")));
        assert!(!loaded.migrated);
        assert_eq!(loaded.snapshot, original);
    }

    #[test]
    fn newer_schema_is_refused() {
        let mut value = must_ok(serde_json::to_value(UserProgress::new("grapple-path.v1")));
        value["schema_version"] = json!(SNAPSHOT_SCHEMA_VERSION + 1);

        assert!(matches!(
            load_snapshot(value, "grapple-path.v1", at("2026-02-07T12:00:00Z")),
            Err(ProgressError::Migration(_))
        ));
    }

    #[test]
    fn non_object_document_is_refused() {
        assert!(matches!(
            load_snapshot(json!(42), "grapple-path.v1", at("2026-02-07T12:00:00Z")),
            Err(ProgressError::Migration(_))
        ));
    }
}
