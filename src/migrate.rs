//! Idempotent migration runner.
//!
//! Migration scripts are plain files in one directory, applied in filename
//! order, each exactly once. Applied scripts are recorded in a ledger table
//! inside the destination store:
//!
//! ```text
//! migrations(id, migration_name, applied_at)
//! ```
//!
//! A script that fails stops the run. Scripts applied before it stay applied
//! and recorded; the failing script and everything after it are attempted
//! again on the next run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use globset::Glob;
use tracing::info;
use walkdir::WalkDir;

use crate::config::Config;
use crate::db;

/// One row of the migration ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub name: String,
    pub applied_at: Option<NaiveDateTime>,
}

/// Storage for the migration ledger.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_ledger`](MigrationLedger::ensure_ledger) | Create the ledger table if absent |
/// | [`applied_migrations`](MigrationLedger::applied_migrations) | Read recorded scripts |
/// | [`apply_migration`](MigrationLedger::apply_migration) | Run a script, then record it |
#[async_trait]
pub trait MigrationLedger: Send {
    async fn ensure_ledger(&mut self, table: &str) -> Result<()>;

    async fn applied_migrations(&mut self, table: &str) -> Result<Vec<LedgerEntry>>;

    /// Execute the full script text in one call, then append `name` to the
    /// ledger. Nothing is recorded when execution fails.
    async fn apply_migration(&mut self, table: &str, name: &str, sql: &str) -> Result<()>;
}

/// A migration script found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    /// File name, used as the ledger key.
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Scripts applied by this run, in order.
    pub applied: Vec<String>,
    /// Scripts found in the directory that the ledger already records.
    pub already_applied: usize,
}

/// List the scripts in `dir` whose file name matches `pattern`, sorted by
/// file name. Subdirectories are not searched.
pub fn discover(dir: &Path, pattern: &str) -> Result<Vec<MigrationScript>> {
    if !dir.is_dir() {
        bail!("Migrations directory not found: {}", dir.display());
    }
    let matcher = Glob::new(pattern)
        .with_context(|| format!("Invalid migration pattern: '{}'", pattern))?
        .compile_matcher();

    let mut scripts = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if matcher.is_match(&name) {
            scripts.push(MigrationScript {
                name,
                path: entry.into_path(),
            });
        }
    }
    Ok(scripts)
}

/// Apply every script in `dir` that the ledger does not record yet.
pub async fn apply_pending<L>(
    ledger: &mut L,
    dir: &Path,
    pattern: &str,
    ledger_table: &str,
) -> Result<MigrationReport>
where
    L: MigrationLedger + ?Sized,
{
    ledger.ensure_ledger(ledger_table).await?;
    let applied: HashSet<String> = ledger
        .applied_migrations(ledger_table)
        .await?
        .into_iter()
        .map(|e| e.name)
        .collect();

    let mut report = MigrationReport::default();
    for script in discover(dir, pattern)? {
        if applied.contains(&script.name) {
            report.already_applied += 1;
            continue;
        }

        let sql = std::fs::read_to_string(&script.path)
            .with_context(|| format!("Failed to read migration {}", script.path.display()))?;
        ledger
            .apply_migration(ledger_table, &script.name, &sql)
            .await
            .with_context(|| format!("Migration {} failed", script.name))?;

        info!(migration = %script.name, "applied migration");
        report.applied.push(script.name);
    }
    Ok(report)
}

/// `tabload migrate`: connect, apply pending scripts, print a summary.
///
/// The connection is closed whether or not a script failed.
pub async fn run_migrations(config: &Config, dir: Option<&Path>) -> Result<MigrationReport> {
    let dir = dir.unwrap_or(config.migrations.dir.as_path());
    let mut backend = db::connect(config).await?;

    let result = apply_pending(
        &mut backend,
        dir,
        &config.migrations.pattern,
        &config.migrations.ledger_table,
    )
    .await;
    let closed = backend.close().await;
    let report = result?;
    closed?;

    println!("migrate {}", dir.display());
    for name in &report.applied {
        println!("  applied: {}", name);
    }
    println!("  newly applied: {}", report.applied.len());
    println!("  already applied: {}", report.already_applied);
    println!("ok");

    Ok(report)
}
