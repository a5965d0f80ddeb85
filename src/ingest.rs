//! Load orchestration.
//!
//! Coordinates the full load flow: CSV → normalization → pre-load checks →
//! column introspection → batched insert. Every selected dataset is read and
//! checked before the destination is touched, so a malformed file aborts the
//! run without a partial load.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tabload_core::destination::Destination;
use tabload_core::loader::{self, LoadOptions, ProgressReporter};
use tabload_core::models::{LoadCounters, RecordSet};
use tabload_core::normalize;
use tracing::warn;

use crate::config::{Config, DatasetConfig};
use crate::db;
use crate::progress::format_number;
use crate::sources;

/// Command-line overrides for `tabload load`.
#[derive(Debug, Clone, Default)]
pub struct LoadArgs {
    pub file: Option<PathBuf>,
    pub table: Option<String>,
    pub batch_size: Option<usize>,
    pub strict: bool,
    pub dry_run: bool,
}

/// Result of loading one dataset.
#[derive(Debug, Clone)]
pub struct DatasetLoad {
    pub dataset: String,
    pub table: String,
    pub counters: LoadCounters,
}

pub async fn run_load(
    config: &Config,
    target: &str,
    args: &LoadArgs,
    reporter: &dyn ProgressReporter,
) -> Result<Vec<DatasetLoad>> {
    let datasets = sources::select(config, target)?;
    if datasets.len() > 1 && (args.file.is_some() || args.table.is_some()) {
        bail!("--file and --table apply to a single dataset, not '{}'", target);
    }

    // Read everything first
    let mut prepared: Vec<(&DatasetConfig, RecordSet)> = Vec::with_capacity(datasets.len());
    for dataset in datasets {
        let records = sources::read_dataset(dataset, args.file.as_deref())?;
        prepared.push((dataset, records));
    }

    let options = LoadOptions {
        batch_size: args.batch_size.unwrap_or(config.load.batch_size),
        progress_interval: Duration::from_secs(config.load.progress_interval_secs),
    };
    if options.batch_size == 0 {
        bail!("--batch-size must be >= 1");
    }
    let strict = args.strict || config.load.strict_columns;

    let mut backend = db::connect(config).await?;
    let result = load_all(
        &mut backend,
        &prepared,
        args,
        &options,
        strict,
        reporter,
    )
    .await;
    let closed = backend.close().await;
    let loads = result?;
    closed?;

    println!("ok");
    Ok(loads)
}

async fn load_all<D>(
    dest: &mut D,
    prepared: &[(&DatasetConfig, RecordSet)],
    args: &LoadArgs,
    options: &LoadOptions,
    strict: bool,
    reporter: &dyn ProgressReporter,
) -> Result<Vec<DatasetLoad>>
where
    D: Destination + ?Sized,
{
    let mut loads = Vec::with_capacity(prepared.len());
    for (dataset, records) in prepared {
        let table = args.table.as_deref().unwrap_or(dataset.table_name());
        let load = load_dataset(
            dest,
            &dataset.name,
            records,
            table,
            options,
            strict,
            args.dry_run,
            reporter,
        )
        .await
        .with_context(|| format!("Failed to load dataset '{}' into {}", dataset.name, table))?;
        if let Some(load) = load {
            loads.push(load);
        }
    }
    Ok(loads)
}

/// Check and load one record set. Returns `None` on a dry run.
#[allow(clippy::too_many_arguments)]
pub async fn load_dataset<D>(
    dest: &mut D,
    name: &str,
    records: &RecordSet,
    table: &str,
    options: &LoadOptions,
    strict: bool,
    dry_run: bool,
    reporter: &dyn ProgressReporter,
) -> Result<Option<DatasetLoad>>
where
    D: Destination + ?Sized,
{
    let table_columns = dest.columns_of(table).await?;
    let missing = normalize::missing_columns(records, &table_columns);
    if !missing.is_empty() {
        if strict {
            bail!(
                "table {} has columns missing from the input: {}",
                table,
                missing.join(", ")
            );
        }
        warn!(table, missing = %missing.join(", "), "input does not provide every table column");
    }

    if dry_run {
        let projected = loader::project_columns(&table_columns, records);
        println!("load {} -> {} (dry-run)", name, table);
        println!("  rows read: {}", format_number(records.len() as u64));
        println!("  table columns: {}", table_columns.len());
        println!("  projected columns: {}", projected.join(", "));
        if !missing.is_empty() {
            println!("  missing columns: {}", missing.join(", "));
        }
        return Ok(None);
    }

    let counters = loader::insert(dest, records, table, options, reporter).await?;
    print_summary(name, table, &counters);

    Ok(Some(DatasetLoad {
        dataset: name.to_string(),
        table: table.to_string(),
        counters,
    }))
}

fn print_summary(name: &str, table: &str, counters: &LoadCounters) {
    println!("load {} -> {}", name, table);
    println!("  rows: {}", format_number(counters.total));
    println!("  inserted: {}", format_number(counters.inserted));
    println!("  skipped: {}", format_number(counters.skipped));
    println!(
        "  elapsed: {:.2}s ({} rows/s)",
        counters.elapsed.as_secs_f64(),
        format_number(counters.rows_per_sec().round() as u64)
    );
    if counters.skipped > 0 {
        println!(
            "  warning: {} rows were skipped; see the log for row numbers and reasons",
            format_number(counters.skipped)
        );
    }
}

/// `tabload columns <table>`: print the destination's column set.
pub async fn run_columns(config: &Config, table: &str) -> Result<Vec<String>> {
    let mut backend = db::connect(config).await?;
    let result = backend.columns_of(table).await;
    let closed = backend.close().await;
    let columns = result?;
    closed?;

    if columns.is_empty() {
        println!("{}: table not found or has no columns", table);
    } else {
        for column in &columns {
            println!("{}", column);
        }
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabload_core::destination::memory::{InMemoryDestination, MemoryTable};
    use tabload_core::loader::NoProgress;
    use tabload_core::models::Value;

    fn records() -> RecordSet {
        RecordSet::from_rows(
            vec!["article_id".into(), "name".into()],
            vec![
                vec![Value::Int(1), Value::Text("a".into())],
                vec![Value::Int(2), Value::Text("b".into())],
            ],
        )
        .unwrap()
    }

    fn dest() -> InMemoryDestination {
        InMemoryDestination::new().with_table(
            "articles",
            MemoryTable::new(&["article_id", "name", "colour"]),
        )
    }

    #[tokio::test]
    async fn missing_columns_warn_by_default() {
        let mut dest = dest();
        let load = load_dataset(
            &mut dest,
            "articles",
            &records(),
            "articles",
            &LoadOptions::default(),
            false,
            false,
            &NoProgress,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(load.counters.inserted, 2);
        assert_eq!(dest.rows("articles").len(), 2);
    }

    #[tokio::test]
    async fn strict_mode_rejects_missing_columns() {
        let mut dest = dest();
        let err = load_dataset(
            &mut dest,
            "articles",
            &records(),
            "articles",
            &LoadOptions::default(),
            true,
            false,
            &NoProgress,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("colour"));
        assert!(dest.statements().is_empty());
    }

    #[tokio::test]
    async fn dry_run_inserts_nothing() {
        let mut dest = dest();
        let load = load_dataset(
            &mut dest,
            "articles",
            &records(),
            "articles",
            &LoadOptions::default(),
            false,
            true,
            &NoProgress,
        )
        .await
        .unwrap();
        assert!(load.is_none());
        assert!(dest.statements().is_empty());
        assert_eq!(dest.commits(), 0);
    }
}
