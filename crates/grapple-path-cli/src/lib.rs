//! Embedded GrapplePath command surface for host runtimes.
//!
//! Hosts drive the progression engine through:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_progress_with_db`] for direct [`ProgressCommand`] execution against a DB path.
//! - [`run_progress`] for execution against an existing [`SqliteProgressStore`].
//!
//! Every mutating command follows the same cycle: load the snapshot, apply one
//! mutation, sync quests, recalculate gamification, save.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use grapple_path_core::{
    apply_palier_update, format_calendar_day, is_eligible_for_validation, parse_calendar_day,
    parse_rfc3339_utc, record_boss_fight, refresh_gamification, set_notes, skill_status,
    sync_quests, validate_skill_item, Badge, BossFightResult, BossFightSession, Catalog, Clock,
    EngineRules, FixedClock, Gamification, LogEntry, MasteryTier, PalierStatus, PalierUpdate,
    ProgressError, Quest, Recalculation, SkillStatus, SystemClock, UserProgress,
};
use grapple_path_store_sqlite::SqliteProgressStore;
use time::{Date, OffsetDateTime};

#[derive(Debug, Parser)]
#[command(name = "gp")]
#[command(about = "GrapplePath skill progression CLI")]
pub struct Cli {
    #[arg(long, default_value = "./grapple_path.sqlite3")]
    db: PathBuf,

    #[command(flatten)]
    session: SessionArgs,

    #[command(subcommand)]
    command: ProgressCommand,
}

/// Who is acting, when, and against which catalog and rules.
#[derive(Debug, Clone, Args)]
pub struct SessionArgs {
    #[arg(long, default_value = "default")]
    pub user: String,
    /// Calendar day to act on (YYYY-MM-DD); defaults to the UTC date of `--now`.
    #[arg(long)]
    pub today: Option<String>,
    /// Instant stamped on records (RFC3339, UTC); defaults to the system clock.
    #[arg(long)]
    pub now: Option<String>,
    /// Curriculum JSON to use instead of the built-in one.
    #[arg(long)]
    pub catalog: Option<PathBuf>,
    /// Stored rules version; defaults to the highest stored version.
    #[arg(long)]
    pub rules_version: Option<u32>,
}

impl Default for SessionArgs {
    fn default() -> Self {
        Self {
            user: "default".to_string(),
            today: None,
            now: None,
            catalog: None,
            rules_version: None,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ProgressCommand {
    Catalog {
        #[command(subcommand)]
        command: CatalogCommand,
    },
    Status(JsonArgs),
    Palier {
        #[command(subcommand)]
        command: PalierCommand,
    },
    Validate(ItemArgs),
    Notes(NotesArgs),
    Recalc,
    Quests {
        #[command(subcommand)]
        command: QuestsCommand,
    },
    Boss {
        #[command(subcommand)]
        command: BossCommand,
    },
    Log {
        #[command(subcommand)]
        command: LogCommand,
    },
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommand,
    },
}

#[derive(Debug, Args)]
pub struct JsonArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct ItemArgs {
    #[arg(long)]
    item: String,
}

#[derive(Debug, Args)]
pub struct NotesArgs {
    #[arg(long)]
    item: String,
    #[arg(long)]
    text: String,
}

#[derive(Debug, Subcommand)]
pub enum CatalogCommand {
    List(JsonArgs),
    Show(ItemArgs),
}

#[derive(Debug, Subcommand)]
pub enum PalierCommand {
    Knowledge(KnowledgeArgs),
    Execution(ExecutionArgs),
    Application(ApplicationArgs),
    Integration(IntegrationArgs),
}

#[derive(Debug, Args)]
pub struct KnowledgeArgs {
    #[arg(long)]
    item: String,
    /// Total reps completed so far (absolute).
    #[arg(long)]
    reps: u32,
    #[arg(long)]
    session_date: Option<String>,
}

#[derive(Debug, Args)]
pub struct ExecutionArgs {
    #[arg(long)]
    item: String,
    /// Reps done in this session.
    #[arg(long)]
    total_reps: u32,
    /// Best clean-rep count so far (absolute).
    #[arg(long, default_value_t = 0)]
    clean_reps: u32,
    #[arg(long)]
    session_date: Option<String>,
}

#[derive(Debug, Args)]
pub struct ApplicationArgs {
    #[arg(long)]
    item: String,
    #[arg(long)]
    attempts: u32,
    #[arg(long)]
    successes: u32,
    #[arg(long)]
    session_date: Option<String>,
}

#[derive(Debug, Args)]
pub struct IntegrationArgs {
    #[arg(long)]
    item: String,
    #[arg(long, default_value_t = 0)]
    rounds: u32,
    #[arg(long)]
    occurrences: u32,
    #[arg(long)]
    session_date: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum QuestsCommand {
    Refresh,
    List(JsonArgs),
}

#[derive(Debug, Subcommand)]
pub enum BossCommand {
    Run(BossRunArgs),
}

#[derive(Debug, Args)]
pub struct BossRunArgs {
    #[arg(long)]
    cycle: u8,
    /// One character per attempt: `1` for a success, `0` for a failure.
    #[arg(long)]
    outcomes: String,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum LogCommand {
    List(LogListArgs),
}

#[derive(Debug, Args)]
pub struct LogListArgs {
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    Show,
    Set(RulesSetArgs),
}

#[derive(Debug, Args)]
pub struct RulesSetArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum SnapshotCommand {
    Show,
}

/// Executes the parsed top-level CLI command graph.
///
/// # Errors
/// Returns an error when store open/migrate fails or the command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    run_progress_with_db(&cli.db, &cli.session, cli.command)
}

/// Executes a parsed command using the provided `SQLite` DB path.
///
/// # Errors
/// Returns an error when store open/migrate fails or the requested command fails.
pub fn run_progress_with_db(
    db_path: &Path,
    session: &SessionArgs,
    command: ProgressCommand,
) -> Result<()> {
    let mut store = SqliteProgressStore::open(db_path)?;
    store.migrate()?;
    run_progress(command, session, &mut store)
}

/// Executes a parsed command against an existing store handle.
///
/// # Errors
/// Returns an error when arguments are invalid, the engine rejects the
/// mutation, or persistence fails. A rejected mutation is never saved.
pub fn run_progress(
    command: ProgressCommand,
    session: &SessionArgs,
    store: &mut SqliteProgressStore,
) -> Result<()> {
    let context = Invocation::resolve(session, store)?;

    match command {
        ProgressCommand::Catalog { command } => run_catalog(command, &context),
        ProgressCommand::Rules { command } => run_rules(command, &context, store),
        ProgressCommand::Status(args) => {
            let snapshot = context.load(store)?;
            let report = build_status_report(&context, &snapshot);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_status_table(&report);
            }
            Ok(())
        }
        ProgressCommand::Palier { command } => run_palier(command, &context, store),
        ProgressCommand::Validate(args) => {
            let mut snapshot = context.load(store)?;
            let locked_before: Vec<String> = context
                .catalog
                .items()
                .iter()
                .filter(|item| skill_status(item, &snapshot) == SkillStatus::Locked)
                .map(|item| item.id.clone())
                .collect();

            let tier = validate_skill_item(
                &mut snapshot,
                &context.catalog,
                &context.rules,
                &args.item,
                context.now,
            )?;
            let outcome = context.commit(store, &mut snapshot)?;

            let unlocked = locked_before
                .into_iter()
                .filter(|id| {
                    context
                        .catalog
                        .get(id)
                        .is_some_and(|item| skill_status(item, &snapshot) != SkillStatus::Locked)
                })
                .collect();
            let payload = ValidationJsonPayload {
                contract_version: "validation.v1".to_string(),
                item_id: args.item,
                mastery_tier: tier,
                unlocked,
                gamification: summarize(&outcome.gamification, &context.rules, &outcome.new_badges),
            };
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }
        ProgressCommand::Notes(args) => {
            let mut snapshot = context.load(store)?;
            set_notes(
                &mut snapshot,
                &context.catalog,
                &context.rules,
                &args.item,
                &args.text,
                context.now,
            )?;
            context.commit(store, &mut snapshot)?;
            let progress = snapshot
                .progress(&args.item)
                .ok_or_else(|| anyhow!("progress for {} missing after notes update", args.item))?;
            println!("{}", serde_json::to_string_pretty(progress)?);
            Ok(())
        }
        ProgressCommand::Recalc => {
            let mut snapshot = context.load(store)?;
            let outcome = context.commit(store, &mut snapshot)?;
            let summary = summarize(&outcome.gamification, &context.rules, &outcome.new_badges);
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        ProgressCommand::Quests { command } => run_quests(command, &context, store),
        ProgressCommand::Boss { command } => run_boss(command, &context, store),
        ProgressCommand::Log { command } => match command {
            LogCommand::List(args) => {
                let snapshot = context.load(store)?;
                let limit = args.limit.unwrap_or(snapshot.log.len());
                let skip = snapshot.log.len().saturating_sub(limit);
                let entries: Vec<&LogEntry> = snapshot.log.iter().skip(skip).collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
                Ok(())
            }
        },
        ProgressCommand::Snapshot { command } => match command {
            SnapshotCommand::Show => {
                let Some(loaded) = store.load_progress(&context.user, context.now)? else {
                    return Err(anyhow!("no progress recorded for user {}", context.user));
                };
                println!("{}", serde_json::to_string_pretty(&loaded.snapshot)?);
                Ok(())
            }
        },
    }
}

struct Invocation {
    user: String,
    now: OffsetDateTime,
    today: Date,
    catalog: Catalog,
    rules: EngineRules,
}

impl Invocation {
    fn resolve(session: &SessionArgs, store: &SqliteProgressStore) -> Result<Self> {
        let clock = resolve_clock(session)?;
        let catalog = load_catalog(session.catalog.as_deref())?;
        let rules = store.resolve_rules(session.rules_version)?;

        Ok(Self {
            user: session.user.clone(),
            now: clock.now(),
            today: clock.today(),
            catalog,
            rules,
        })
    }

    fn load(&self, store: &mut SqliteProgressStore) -> Result<UserProgress> {
        let snapshot = match store.load_progress(&self.user, self.now)? {
            Some(loaded) => loaded.snapshot,
            None => UserProgress::new(self.catalog.version()),
        };

        if snapshot.catalog_version != self.catalog.version() {
            tracing::warn!(
                user = %self.user,
                snapshot_catalog = %snapshot.catalog_version,
                active_catalog = %self.catalog.version(),
                "snapshot was recorded against a different catalog version"
            );
        }

        Ok(snapshot)
    }

    fn commit(
        &self,
        store: &mut SqliteProgressStore,
        snapshot: &mut UserProgress,
    ) -> Result<Recalculation> {
        sync_quests(snapshot, &self.rules, self.today, self.now)?;
        let outcome =
            refresh_gamification(snapshot, &self.catalog, &self.rules, self.today, self.now)?;
        store.save_snapshot(&self.user, snapshot)?;
        Ok(outcome)
    }

    fn session_date(&self, raw: Option<&str>) -> Result<Date> {
        match raw {
            Some(raw) => parse_calendar_day(raw)
                .map_err(|err| anyhow!("invalid --session-date value: {err}")),
            None => Ok(self.today),
        }
    }
}

fn resolve_clock(session: &SessionArgs) -> Result<FixedClock> {
    let now = match session.now.as_deref() {
        Some(raw) => parse_rfc3339_utc(raw).map_err(|err| anyhow!("invalid --now value: {err}"))?,
        None => SystemClock.now(),
    };

    let clock = FixedClock::at(now);
    match session.today.as_deref() {
        Some(raw) => {
            let today =
                parse_calendar_day(raw).map_err(|err| anyhow!("invalid --today value: {err}"))?;
            Ok(clock.with_today(today))
        }
        None => Ok(clock),
    }
}

fn load_catalog(path: Option<&Path>) -> Result<Catalog> {
    let Some(path) = path else {
        return Ok(Catalog::builtin()?);
    };

    let body = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&body)
        .with_context(|| format!("catalog {} must be valid JSON", path.display()))?;
    Ok(Catalog::from_json(&value)?)
}

fn run_catalog(command: CatalogCommand, context: &Invocation) -> Result<()> {
    match command {
        CatalogCommand::List(args) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&context.catalog.to_json())?);
            } else {
                print_catalog_table(&context.catalog);
            }
            Ok(())
        }
        CatalogCommand::Show(args) => {
            let item = context.catalog.require(&args.item)?;
            println!("{}", serde_json::to_string_pretty(item)?);
            Ok(())
        }
    }
}

fn run_rules(
    command: RulesCommand,
    context: &Invocation,
    store: &SqliteProgressStore,
) -> Result<()> {
    match command {
        RulesCommand::Show => {
            println!("{}", serde_json::to_string_pretty(&context.rules)?);
            Ok(())
        }
        RulesCommand::Set(args) => {
            let body = std::fs::read_to_string(&args.file)
                .with_context(|| format!("failed to read rules {}", args.file.display()))?;
            let value: serde_json::Value = serde_json::from_str(&body)
                .with_context(|| format!("rules {} must be valid JSON", args.file.display()))?;
            let rules = EngineRules::from_json(&value)?;
            store.upsert_rules(&rules)?;
            println!("{}", serde_json::to_string_pretty(&rules)?);
            Ok(())
        }
    }
}

fn run_palier(
    command: PalierCommand,
    context: &Invocation,
    store: &mut SqliteProgressStore,
) -> Result<()> {
    let (item_id, update, session_date) = match command {
        PalierCommand::Knowledge(args) => (
            args.item,
            PalierUpdate::Knowledge {
                reps_completed: args.reps,
            },
            args.session_date,
        ),
        PalierCommand::Execution(args) => (
            args.item,
            PalierUpdate::Execution {
                total_reps_delta: args.total_reps,
                clean_reps: args.clean_reps,
            },
            args.session_date,
        ),
        PalierCommand::Application(args) => (
            args.item,
            PalierUpdate::Application {
                attempts_delta: args.attempts,
                successes_delta: args.successes,
            },
            args.session_date,
        ),
        PalierCommand::Integration(args) => (
            args.item,
            PalierUpdate::Integration {
                rounds_delta: args.rounds,
                occurrences_delta: args.occurrences,
            },
            args.session_date,
        ),
    };
    let session_date = context.session_date(session_date.as_deref())?;

    let mut snapshot = context.load(store)?;
    let status = apply_palier_update(
        &mut snapshot,
        &context.catalog,
        &context.rules,
        &item_id,
        update,
        session_date,
        context.today,
        context.now,
    )?;
    let outcome = context.commit(store, &mut snapshot)?;

    let item = context.catalog.require(&item_id)?;
    let payload = PalierJsonPayload {
        contract_version: "palier_update.v1".to_string(),
        item_id: item_id.clone(),
        palier: update.palier_name().to_string(),
        status,
        item_status: skill_status(item, &snapshot),
        eligible_for_validation: is_eligible_for_validation(item, &snapshot),
        gamification: summarize(&outcome.gamification, &context.rules, &outcome.new_badges),
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_quests(
    command: QuestsCommand,
    context: &Invocation,
    store: &mut SqliteProgressStore,
) -> Result<()> {
    match command {
        QuestsCommand::Refresh => {
            let mut snapshot = context.load(store)?;
            context.commit(store, &mut snapshot)?;
            println!("{}", serde_json::to_string_pretty(&snapshot.quests)?);
            Ok(())
        }
        QuestsCommand::List(args) => {
            let snapshot = context.load(store)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&snapshot.quests)?);
            } else {
                print_quests_table(&snapshot.quests);
            }
            Ok(())
        }
    }
}

fn run_boss(
    command: BossCommand,
    context: &Invocation,
    store: &mut SqliteProgressStore,
) -> Result<()> {
    match command {
        BossCommand::Run(args) => {
            let outcomes = parse_outcomes(&args.outcomes)?;
            let mut session = BossFightSession::init(args.cycle, &context.rules);
            if u32::try_from(outcomes.len()).ok() != Some(session.max_attempts) {
                return Err(anyhow!(
                    "boss fight needs exactly {} outcomes, got {}",
                    session.max_attempts,
                    outcomes.len()
                ));
            }

            let mut health = Vec::with_capacity(outcomes.len());
            for success in outcomes {
                session = session.record_attempt(success)?;
                health.push(session.health);
            }
            let result = session.finalize(args.notes, context.now, &context.rules)?;

            let mut snapshot = context.load(store)?;
            record_boss_fight(&mut snapshot, &context.catalog, &context.rules, result.clone())?;
            let outcome = context.commit(store, &mut snapshot)?;

            let payload = BossRunJsonPayload {
                contract_version: "boss_run.v1".to_string(),
                result,
                health,
                gamification: summarize(&outcome.gamification, &context.rules, &outcome.new_badges),
            };
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }
    }
}

fn parse_outcomes(raw: &str) -> Result<Vec<bool>> {
    raw.chars()
        .map(|symbol| match symbol {
            '1' => Ok(true),
            '0' => Ok(false),
            other => Err(anyhow!(
                "--outcomes accepts only 0 and 1, found {other:?}"
            )),
        })
        .collect()
}

/// Stable stderr shape for failed commands.
///
/// The kind comes from the first [`ProgressError`] in the error chain;
/// anything else is reported as `internal`.
#[must_use]
pub fn error_envelope(err: &anyhow::Error) -> serde_json::Value {
    let progress_error = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<ProgressError>());
    let (kind, retryable) = match progress_error {
        Some(ProgressError::Catalog(_)) => ("catalog", false),
        Some(ProgressError::Validation(_)) => ("validation", false),
        Some(ProgressError::Configuration(_)) => ("configuration", false),
        Some(ProgressError::Derivation(_)) => ("derivation", false),
        Some(ProgressError::Migration(_)) => ("migration", false),
        Some(ProgressError::Persistence(_)) => ("persistence", true),
        None => ("internal", false),
    };

    serde_json::json!({
        "error": {
            "kind": kind,
            "message": format!("{err:#}"),
            "retryable": retryable,
        }
    })
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct GamificationSummary {
    pub level: u64,
    pub experience_total: u64,
    pub tokens: u64,
    pub streak: u32,
    pub streak_freeze_used: u32,
    pub last_active_date: Option<String>,
    pub badges: Vec<String>,
    pub new_badges: Vec<String>,
}

fn summarize(
    gamification: &Gamification,
    rules: &EngineRules,
    new_badges: &[Badge],
) -> GamificationSummary {
    GamificationSummary {
        level: gamification.level(rules),
        experience_total: gamification.experience_total,
        tokens: gamification.tokens,
        streak: gamification.streak,
        streak_freeze_used: gamification.streak_freeze_used,
        last_active_date: gamification.last_active_date.map(format_calendar_day),
        badges: gamification.badges.keys().cloned().collect(),
        new_badges: new_badges.iter().map(|badge| badge.id.clone()).collect(),
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct PalierStatuses {
    knowledge: PalierStatus,
    execution: PalierStatus,
    application: PalierStatus,
    integration: PalierStatus,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ItemStatusRow {
    id: String,
    title: String,
    cycle: u8,
    week: u32,
    status: SkillStatus,
    paliers: PalierStatuses,
    mastery_tier: Option<MasteryTier>,
    eligible_for_validation: bool,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct StatusJsonPayload {
    contract_version: String,
    user: String,
    today: String,
    catalog_version: String,
    gamification: GamificationSummary,
    items: Vec<ItemStatusRow>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct PalierJsonPayload {
    contract_version: String,
    item_id: String,
    palier: String,
    status: PalierStatus,
    item_status: SkillStatus,
    eligible_for_validation: bool,
    gamification: GamificationSummary,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ValidationJsonPayload {
    contract_version: String,
    item_id: String,
    mastery_tier: MasteryTier,
    unlocked: Vec<String>,
    gamification: GamificationSummary,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct BossRunJsonPayload {
    contract_version: String,
    result: BossFightResult,
    health: Vec<u32>,
    gamification: GamificationSummary,
}

fn build_status_report(context: &Invocation, snapshot: &UserProgress) -> StatusJsonPayload {
    let items = context
        .catalog
        .items()
        .iter()
        .map(|item| {
            let progress = snapshot.progress(&item.id);
            let [knowledge, execution, application, integration] = progress
                .map_or([PalierStatus::NotStarted; 4], |progress| progress.paliers.statuses());
            ItemStatusRow {
                id: item.id.clone(),
                title: item.title.clone(),
                cycle: item.cycle,
                week: item.week,
                status: skill_status(item, snapshot),
                paliers: PalierStatuses {
                    knowledge,
                    execution,
                    application,
                    integration,
                },
                mastery_tier: progress.and_then(|progress| progress.mastery_tier),
                eligible_for_validation: is_eligible_for_validation(item, snapshot),
            }
        })
        .collect();

    StatusJsonPayload {
        contract_version: "status.v1".to_string(),
        user: context.user.clone(),
        today: format_calendar_day(context.today),
        catalog_version: context.catalog.version().to_string(),
        gamification: summarize(&snapshot.gamification, &context.rules, &[]),
        items,
    }
}

fn palier_mark(status: PalierStatus) -> char {
    match status {
        PalierStatus::NotStarted => '.',
        PalierStatus::InProgress => '~',
        PalierStatus::Completed => '#',
    }
}

fn print_status_table(report: &StatusJsonPayload) {
    let summary = &report.gamification;
    println!(
        "user={} today={} level={} xp={} tokens={} streak={} freezes_used={}",
        report.user,
        report.today,
        summary.level,
        summary.experience_total,
        summary.tokens,
        summary.streak,
        summary.streak_freeze_used
    );
    println!("id\tcycle\tstatus\tK E A I\tmastery\ttitle");
    for row in &report.items {
        let paliers = &row.paliers;
        println!(
            "{}\t{}\t{}\t{} {} {} {}\t{}\t{}",
            row.id,
            row.cycle,
            row.status.as_str(),
            palier_mark(paliers.knowledge),
            palier_mark(paliers.execution),
            palier_mark(paliers.application),
            palier_mark(paliers.integration),
            row.mastery_tier.map_or("-", MasteryTier::as_str),
            row.title
        );
    }
    if !summary.badges.is_empty() {
        println!("badges={}", summary.badges.join(","));
    }
}

fn print_catalog_table(catalog: &Catalog) {
    println!("catalog_version={}", catalog.version());
    println!("id\tcycle\tweek\ttype\tprerequisites\ttitle");
    for item in catalog.items() {
        let prerequisites = if item.prerequisites.is_empty() {
            "-".to_string()
        } else {
            item.prerequisites.join(",")
        };
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            item.id,
            item.cycle,
            item.week,
            item.skill_type.as_str(),
            prerequisites,
            item.title
        );
    }
}

fn print_quests_table(quests: &[Quest]) {
    if quests.is_empty() {
        println!("no quests; run `gp quests refresh`");
        return;
    }
    println!("id\tstatus\tprogress\treward\ttitle");
    for quest in quests {
        let progress = quest.progress.map_or_else(
            || "-".to_string(),
            |progress| format!("{}/{}", progress.current, progress.target),
        );
        println!(
            "{}\t{}\t{}\t{}xp+{}t\t{}",
            quest.id,
            quest.status.as_str(),
            progress,
            quest.experience_reward,
            quest.token_reward,
            quest.title
        );
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::too_many_lines)]

    use super::*;
    use grapple_path_core::QuestStatus;
    use std::fs;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err:#}"),
        }
    }

    fn temp_db(prefix: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{prefix}-{}.sqlite3", ulid::Ulid::new()))
    }

    fn execute_cli(db_path: &Path, args: &[&str]) -> Result<()> {
        let db = match db_path.to_str() {
            Some(value) => value.to_string(),
            None => panic!("temp db path must be valid UTF-8"),
        };
        let mut argv = vec!["gp".to_string(), "--db".to_string(), db];
        argv.extend(args.iter().map(|arg| (*arg).to_string()));
        let cli = Cli::try_parse_from(argv)?;
        run_cli(cli)
    }

    fn day_args(day: &str) -> Vec<String> {
        vec![
            "--today".to_string(),
            day.to_string(),
            "--now".to_string(),
            format!("{day}T12:00:00Z"),
        ]
    }

    fn run_on(db_path: &Path, day: &str, args: &[&str]) -> Result<()> {
        let owned = day_args(day);
        let mut full: Vec<&str> = owned.iter().map(String::as_str).collect();
        full.extend_from_slice(args);
        execute_cli(db_path, &full)
    }

    fn finish_item(db_path: &Path, item: &str, first_day: &str, second_day: &str) {
        must(run_on(db_path, first_day, &["palier", "knowledge", "--item", item, "--reps", "10"]));
        must(run_on(
            db_path,
            first_day,
            &["palier", "execution", "--item", item, "--total-reps", "50", "--clean-reps", "10"],
        ));
        must(run_on(
            db_path,
            first_day,
            &["palier", "application", "--item", item, "--attempts", "10", "--successes", "8"],
        ));
        must(run_on(
            db_path,
            first_day,
            &["palier", "integration", "--item", item, "--rounds", "3", "--occurrences", "1"],
        ));
        must(run_on(
            db_path,
            second_day,
            &["palier", "integration", "--item", item, "--rounds", "3", "--occurrences", "1"],
        ));
        must(run_on(db_path, second_day, &["validate", "--item", item]));
    }

    fn load(db_path: &Path) -> UserProgress {
        let mut store = must(SqliteProgressStore::open(db_path));
        must(store.migrate());
        match must(store.load_progress("default", parse_instant("2026-02-07T12:00:00Z"))) {
            Some(loaded) => loaded.snapshot,
            None => panic!("missing snapshot"),
        }
    }

    fn parse_instant(value: &str) -> OffsetDateTime {
        match parse_rfc3339_utc(value) {
            Ok(value) => value,
            Err(err) => panic!("invalid fixture instant: {err}"),
        }
    }

    #[test]
    fn parse_outcomes_accepts_binary_strings_only() {
        assert_eq!(must(parse_outcomes("1101")), vec![true, true, false, true]);
        assert!(parse_outcomes("11x1").is_err());
        assert!(must(parse_outcomes("")).is_empty());
    }

    #[test]
    fn error_envelope_reports_kind_through_context() {
        let err = anyhow::Error::from(ProgressError::Persistence("disk full".to_string()))
            .context("failed to save snapshot");
        let envelope = error_envelope(&err);
        assert_eq!(envelope["error"]["kind"], serde_json::json!("persistence"));
        assert_eq!(envelope["error"]["retryable"], serde_json::json!(true));

        let plain = error_envelope(&anyhow!("boom"));
        assert_eq!(plain["error"]["kind"], serde_json::json!("internal"));
        assert_eq!(plain["error"]["message"], serde_json::json!("boom"));
    }

    #[test]
    fn resolve_clock_honours_overrides() {
        let session = SessionArgs {
            today: Some("2026-02-09".to_string()),
            now: Some("2026-02-07T12:00:00Z".to_string()),
            ..SessionArgs::default()
        };
        let clock = must(resolve_clock(&session));
        assert_eq!(format_calendar_day(clock.today()), "2026-02-09");
        assert_eq!(clock.now(), parse_instant("2026-02-07T12:00:00Z"));

        let bad = SessionArgs {
            now: Some("2026-02-07T12:00:00+02:00".to_string()),
            ..SessionArgs::default()
        };
        assert!(resolve_clock(&bad).is_err());
    }

    #[test]
    fn status_report_contract_is_stable_v1() {
        let context = Invocation {
            user: "learner".to_string(),
            now: parse_instant("2026-02-07T12:00:00Z"),
            today: match parse_calendar_day("2026-02-07") {
                Ok(value) => value,
                Err(err) => panic!("invalid fixture day: {err}"),
            },
            catalog: must(Catalog::builtin().map_err(Into::into)),
            rules: EngineRules::v1(),
        };
        let snapshot = UserProgress::new(context.catalog.version());

        let report = build_status_report(&context, &snapshot);
        let value = must(serde_json::to_value(&report).map_err(Into::into));

        assert_eq!(value["contract_version"], serde_json::json!("status.v1"));
        assert_eq!(value["gamification"]["level"], serde_json::json!(1));
        assert_eq!(value["items"][0]["id"], serde_json::json!("c1-w1-shrimp"));
        assert_eq!(value["items"][0]["status"], serde_json::json!("available"));
        assert_eq!(
            value["items"][0]["paliers"],
            serde_json::json!({
                "knowledge": "not_started",
                "execution": "not_started",
                "application": "not_started",
                "integration": "not_started"
            })
        );
        let locked = report
            .items
            .iter()
            .filter(|row| row.status == SkillStatus::Locked)
            .count();
        assert_eq!(locked, 10);
    }

    #[test]
    fn stable_embed_api_host_path_stays_operational() {
        let db_path = temp_db("grapple-embed-host");
        let session = SessionArgs {
            now: Some("2026-02-07T12:00:00Z".to_string()),
            ..SessionArgs::default()
        };

        must(run_progress_with_db(
            &db_path,
            &session,
            ProgressCommand::Palier {
                command: PalierCommand::Knowledge(KnowledgeArgs {
                    item: "c1-w1-shrimp".to_string(),
                    reps: 4,
                    session_date: None,
                }),
            },
        ));

        let mut store = must(SqliteProgressStore::open(&db_path));
        must(store.migrate());
        must(run_progress(ProgressCommand::Recalc, &session, &mut store));

        let snapshot = load(&db_path);
        let progress = match snapshot.progress("c1-w1-shrimp") {
            Some(value) => value,
            None => panic!("missing progress after embed API call"),
        };
        assert_eq!(progress.paliers.knowledge.reps_completed, 4);
        assert_eq!(snapshot.gamification.streak, 1);

        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn cli_end_to_end_validate_unlock_and_boss_fight() {
        let db_path = temp_db("grapple-cli-e2e");

        finish_item(&db_path, "c1-w1-shrimp", "2026-02-06", "2026-02-07");

        let snapshot = load(&db_path);
        assert!(snapshot.is_validated("c1-w1-shrimp"));
        assert_eq!(snapshot.gamification.streak, 2);

        let early_boss = run_on(
            &db_path,
            "2026-02-07",
            &["boss", "run", "--cycle", "1", "--outcomes", "1111111100"],
        );
        assert!(early_boss.is_err());

        let replayed_day = run_on(
            &db_path,
            "2026-02-06",
            &["palier", "knowledge", "--item", "c1-w1-bridge", "--reps", "2"],
        );
        assert!(replayed_day.is_err());

        finish_item(&db_path, "c1-w1-bridge", "2026-02-07", "2026-02-08");
        finish_item(&db_path, "c1-w2-closed-guard", "2026-02-08", "2026-02-09");

        must(run_on(
            &db_path,
            "2026-02-09",
            &["boss", "run", "--cycle", "1", "--outcomes", "1111111100"],
        ));
        let repeat = run_on(
            &db_path,
            "2026-02-09",
            &["boss", "run", "--cycle", "1", "--outcomes", "1111111111"],
        );
        assert!(repeat.is_err());
        let short = run_on(
            &db_path,
            "2026-02-09",
            &["boss", "run", "--cycle", "2", "--outcomes", "111"],
        );
        assert!(short.is_err());

        let snapshot = load(&db_path);
        let gamification = &snapshot.gamification;
        assert_eq!(gamification.streak, 4);
        assert!(gamification.badges.contains_key("cycle.1.cleared"));
        assert!(gamification.badges.contains_key("boss.gold"));
        assert_eq!(gamification.boss_fight_results.len(), 1);
        assert!(snapshot
            .quests
            .iter()
            .any(|quest| quest.status == QuestStatus::Completed));

        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn rejected_mutation_is_not_saved() {
        let db_path = temp_db("grapple-cli-reject");
        must(run_on(
            &db_path,
            "2026-02-07",
            &["palier", "knowledge", "--item", "c1-w1-shrimp", "--reps", "3"],
        ));
        let before = load(&db_path);

        let result = run_on(
            &db_path,
            "2026-02-07",
            &[
                "palier",
                "application",
                "--item",
                "c1-w1-shrimp",
                "--attempts",
                "2",
                "--successes",
                "5",
            ],
        );
        assert!(result.is_err());

        let future = run_on(
            &db_path,
            "2026-02-07",
            &[
                "palier",
                "knowledge",
                "--item",
                "c1-w1-shrimp",
                "--reps",
                "9",
                "--session-date",
                "2026-02-08",
            ],
        );
        assert!(future.is_err());
        assert_eq!(load(&db_path), before);

        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn quests_and_streak_share_the_today_override() {
        let db_path = temp_db("grapple-cli-today");

        must(execute_cli(
            &db_path,
            &[
                "--today",
                "2026-02-09",
                "--now",
                "2026-02-07T12:00:00Z",
                "palier",
                "knowledge",
                "--item",
                "c1-w1-shrimp",
                "--reps",
                "3",
            ],
        ));

        let snapshot = load(&db_path);
        let today = must(parse_calendar_day("2026-02-09").map_err(Into::into));
        assert_eq!(snapshot.gamification.last_active_date, Some(today));
        assert!(!snapshot.quests.is_empty());
        for quest in &snapshot.quests {
            assert_eq!(quest.issued_on, today, "quest {} issued on the wrong day", quest.id);
            assert!(
                quest.id.starts_with("daily:2026-02-09:") || quest.id.starts_with("weekly:2026-W07:"),
                "unexpected quest id {}",
                quest.id
            );
        }

        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn rules_set_then_select_by_version() {
        let db_path = temp_db("grapple-cli-rules");
        let rules_path =
            std::env::temp_dir().join(format!("grapple-rules-{}.json", ulid::Ulid::new()));

        let mut rules = EngineRules::v1();
        rules.rules_version = 2;
        rules.xp_per_level = 100;
        must(fs::write(&rules_path, must(serde_json::to_string(&rules).map_err(Into::into)))
            .map_err(Into::into));

        let rules_arg = match rules_path.to_str() {
            Some(value) => value.to_string(),
            None => panic!("temp rules path must be valid UTF-8"),
        };
        must(execute_cli(&db_path, &["rules", "set", "--file", &rules_arg]));

        let mut store = must(SqliteProgressStore::open(&db_path));
        must(store.migrate());
        assert_eq!(must(store.resolve_rules(None)).xp_per_level, 100);

        let session = SessionArgs {
            rules_version: Some(1),
            ..SessionArgs::default()
        };
        must(run_progress(
            ProgressCommand::Rules {
                command: RulesCommand::Show,
            },
            &session,
            &mut store,
        ));

        let _ = fs::remove_file(&db_path);
        let _ = fs::remove_file(&rules_path);
    }
}
