#![allow(clippy::missing_errors_doc)]

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use grapple_path_core::{
    format_rfc3339, load_snapshot, now_utc, EngineRules, LoadedSnapshot, ProgressError,
    ProgressStore, UserProgress,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use time::OffsetDateTime;
use ulid::Ulid;

const PROGRESS_MIGRATION_VERSION: i64 = 1;

/// Catalog version assigned to snapshots rebuilt from legacy documents when
/// the caller does not choose one.
pub const DEFAULT_CATALOG_VERSION: &str = "grapple-path.v1";

const SCHEMA_PROGRESS_V1: &str = r"
CREATE TABLE IF NOT EXISTS engine_rules (
  rules_version INTEGER PRIMARY KEY,
  rules_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS progress_snapshots (
  user_key TEXT PRIMARY KEY,
  schema_version INTEGER NOT NULL CHECK (schema_version >= 1),
  catalog_version TEXT NOT NULL,
  snapshot_json TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS legacy_backups (
  backup_id TEXT PRIMARY KEY,
  user_key TEXT NOT NULL,
  document_json TEXT NOT NULL,
  migrated_at TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS trg_legacy_backups_no_update
BEFORE UPDATE ON legacy_backups
BEGIN
  SELECT RAISE(FAIL, 'legacy_backups is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_legacy_backups_no_delete
BEFORE DELETE ON legacy_backups
BEGIN
  SELECT RAISE(FAIL, 'legacy_backups is append-only');
END;

CREATE INDEX IF NOT EXISTS idx_legacy_backups_user
  ON legacy_backups(user_key, migrated_at);
";

pub struct SqliteProgressStore {
    conn: Connection,
    catalog_version: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct LegacyBackup {
    pub backup_id: String,
    pub user_key: String,
    pub document: Value,
    pub migrated_at: String,
}

impl SqliteProgressStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self {
            conn,
            catalog_version: DEFAULT_CATALOG_VERSION.to_string(),
        })
    }

    /// Catalog version stamped on snapshots rebuilt from legacy documents.
    #[must_use]
    pub fn with_catalog_version(mut self, catalog_version: impl Into<String>) -> Self {
        self.catalog_version = catalog_version.into();
        self
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_PROGRESS_V1)
            .context("failed to apply progress schema")?;

        let now = format_rfc3339(now_utc()).map_err(|err| anyhow!(err.to_string()))?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![PROGRESS_MIGRATION_VERSION, now],
            )
            .context("failed to register progress schema migration")?;

        let default_rules = EngineRules::v1();
        let payload = serde_json::to_string(&default_rules).context("failed to serialize rules")?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO engine_rules(rules_version, rules_json, created_at)
                 VALUES (?1, ?2, ?3)",
                params![i64::from(default_rules.rules_version), payload, now],
            )
            .context("failed to seed default rules")?;

        Ok(())
    }

    pub fn upsert_rules(&self, rules: &EngineRules) -> Result<()> {
        rules
            .validate()
            .map_err(|err| anyhow!("invalid rules configuration: {err}"))?;

        let payload = serde_json::to_string(rules).context("failed to serialize rules")?;
        let now = format_rfc3339(now_utc()).map_err(|err| anyhow!(err.to_string()))?;

        self.conn
            .execute(
                "INSERT INTO engine_rules(rules_version, rules_json, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(rules_version) DO UPDATE SET
                   rules_json = excluded.rules_json,
                   created_at = excluded.created_at",
                params![i64::from(rules.rules_version), payload, now],
            )
            .context("failed to upsert rules")?;

        Ok(())
    }

    pub fn get_rules(&self) -> Result<BTreeMap<u32, EngineRules>> {
        let mut stmt = self
            .conn
            .prepare("SELECT rules_version, rules_json FROM engine_rules ORDER BY rules_version ASC")?;

        let mut rows = stmt.query([])?;
        let mut map = BTreeMap::new();

        while let Some(row) = rows.next()? {
            let version_i64: i64 = row.get(0)?;
            let version = u32::try_from(version_i64)
                .with_context(|| format!("invalid rules_version: {version_i64}"))?;
            let json: String = row.get(1)?;
            let value: Value = serde_json::from_str(&json).context("invalid stored rules JSON")?;
            let rules = EngineRules::from_json(&value)
                .map_err(|err| anyhow!("failed to parse rules {version}: {err}"))?;
            map.insert(version, rules);
        }

        Ok(map)
    }

    /// The requested rules version, or the highest stored one.
    pub fn resolve_rules(&self, version: Option<u32>) -> Result<EngineRules> {
        let mut rules = self.get_rules()?;
        match version {
            Some(version) => rules
                .remove(&version)
                .ok_or_else(|| anyhow!("rules version {version} is not stored")),
            None => rules
                .pop_last()
                .map(|(_, rules)| rules)
                .ok_or_else(|| anyhow!("no rules stored; run migrate first")),
        }
    }

    pub fn save_snapshot(&self, user_key: &str, snapshot: &UserProgress) -> Result<()> {
        write_snapshot(&self.conn, user_key, snapshot)
    }

    /// Loads and decodes a snapshot, upgrading legacy documents.
    ///
    /// An upgraded document is backed up to `legacy_backups` and the fresh
    /// snapshot replaces it in the same transaction, so the upgrade runs once.
    pub fn load_progress(
        &mut self,
        user_key: &str,
        at: OffsetDateTime,
    ) -> Result<Option<LoadedSnapshot>> {
        let stored: Option<String> = self
            .conn
            .query_row(
                "SELECT snapshot_json FROM progress_snapshots WHERE user_key = ?1",
                params![user_key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to read snapshot for {user_key}"))?;

        let Some(json) = stored else {
            return Ok(None);
        };

        let value: Value = serde_json::from_str(&json).map_err(|err| {
            ProgressError::Migration(format!("stored snapshot for {user_key} is not JSON: {err}"))
        })?;
        let loaded = load_snapshot(value, &self.catalog_version, at)?;

        if loaded.migrated {
            let backup = loaded
                .snapshot
                .legacy_backup
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .context("failed to serialize legacy backup")?
                .unwrap_or_default();
            let migrated_at = format_rfc3339(at).map_err(|err| anyhow!(err.to_string()))?;

            let tx = self
                .conn
                .transaction()
                .context("failed to start legacy migration transaction")?;
            tx.execute(
                "INSERT INTO legacy_backups(backup_id, user_key, document_json, migrated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![Ulid::new().to_string(), user_key, backup, migrated_at],
            )
            .context("failed to store legacy backup")?;
            write_snapshot(&tx, user_key, &loaded.snapshot)?;
            tx.commit()
                .context("failed to commit legacy migration")?;

            tracing::info!(user_key, "legacy progress document migrated and backed up");
        }

        Ok(Some(loaded))
    }

    pub fn list_users(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_key FROM progress_snapshots ORDER BY user_key ASC")?;
        let users = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list users")?;
        Ok(users)
    }

    pub fn list_legacy_backups(&self, user_key: &str) -> Result<Vec<LegacyBackup>> {
        let mut stmt = self.conn.prepare(
            "SELECT backup_id, user_key, document_json, migrated_at
             FROM legacy_backups
             WHERE user_key = ?1
             ORDER BY migrated_at ASC, backup_id ASC",
        )?;

        let mut rows = stmt.query(params![user_key])?;
        let mut backups = Vec::new();
        while let Some(row) = rows.next()? {
            let json: String = row.get(2)?;
            backups.push(LegacyBackup {
                backup_id: row.get(0)?,
                user_key: row.get(1)?,
                document: serde_json::from_str(&json).context("invalid stored legacy backup")?,
                migrated_at: row.get(3)?,
            });
        }

        Ok(backups)
    }
}

fn write_snapshot(conn: &Connection, user_key: &str, snapshot: &UserProgress) -> Result<()> {
    let payload = serde_json::to_string(snapshot).context("failed to serialize snapshot")?;
    let now = format_rfc3339(now_utc()).map_err(|err| anyhow!(err.to_string()))?;

    conn.execute(
        "INSERT INTO progress_snapshots(user_key, schema_version, catalog_version, snapshot_json, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(user_key) DO UPDATE SET
           schema_version = excluded.schema_version,
           catalog_version = excluded.catalog_version,
           snapshot_json = excluded.snapshot_json,
           updated_at = excluded.updated_at",
        params![
            user_key,
            i64::from(snapshot.schema_version),
            snapshot.catalog_version,
            payload,
            now
        ],
    )
    .with_context(|| format!("failed to write snapshot for {user_key}"))?;

    Ok(())
}

/// Engine errors keep their kind; storage failures become retryable
/// persistence errors.
fn into_progress_error(err: &anyhow::Error) -> ProgressError {
    err.downcast_ref::<ProgressError>()
        .cloned()
        .unwrap_or_else(|| ProgressError::Persistence(format!("{err:#}")))
}

impl ProgressStore for SqliteProgressStore {
    fn load(&mut self, user_key: &str) -> Result<Option<UserProgress>, ProgressError> {
        self.load_progress(user_key, now_utc())
            .map(|loaded| loaded.map(|loaded| loaded.snapshot))
            .map_err(|err| into_progress_error(&err))
    }

    fn save(&mut self, user_key: &str, snapshot: &UserProgress) -> Result<(), ProgressError> {
        self.save_snapshot(user_key, snapshot)
            .map_err(|err| into_progress_error(&err))
    }
}
