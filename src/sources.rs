//! Dataset sources: read a configured CSV file and normalize it for its
//! destination table.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tabload_core::models::RecordSet;
use tabload_core::normalize;

use crate::config::{Config, DatasetConfig, DatasetKind};
use crate::source_csv::{self, CsvOptions};

/// Read `dataset` (from `path_override` when given) and apply the
/// normalizer for its kind. When `unique_key` is configured, duplicate keys
/// fail the read.
pub fn read_dataset(dataset: &DatasetConfig, path_override: Option<&Path>) -> Result<RecordSet> {
    let path = path_override.unwrap_or(dataset.path.as_path());
    let options = CsvOptions {
        delimiter: dataset.delimiter as u8,
        text_columns: dataset.text_columns.clone(),
    };
    let raw = source_csv::read_path(path, &options)?;

    let records = match dataset.kind {
        DatasetKind::Customers => normalize::customers(raw),
        DatasetKind::Articles => Ok(normalize::articles(raw)),
        DatasetKind::Transactions => normalize::transactions(raw, &dataset.date_column),
    }
    .with_context(|| format!("Failed to normalize dataset '{}'", dataset.name))?;

    if let Some(key) = &dataset.unique_key {
        if !normalize::has_no_duplicates(&records, key)
            .with_context(|| format!("dataset '{}'", dataset.name))?
        {
            bail!(
                "dataset '{}': duplicate values in unique key column '{}'",
                dataset.name,
                key
            );
        }
    }

    Ok(records)
}

/// Resolve a `load` target: `all` or one dataset name.
pub fn select<'a>(config: &'a Config, target: &str) -> Result<Vec<&'a DatasetConfig>> {
    if target == "all" {
        return Ok(config.datasets.iter().collect());
    }
    match config.dataset(target) {
        Some(dataset) => Ok(vec![dataset]),
        None => {
            let known: Vec<&str> = config.datasets.iter().map(|d| d.name.as_str()).collect();
            bail!(
                "Unknown dataset: '{}'. Available: all, {}",
                target,
                known.join(", ")
            )
        }
    }
}

pub fn list_datasets(config: &Config) -> Result<()> {
    println!(
        "{:<16} {:<14} {:<20} {:<8} PATH",
        "DATASET", "KIND", "TABLE", "FOUND"
    );
    for dataset in &config.datasets {
        println!(
            "{:<16} {:<14} {:<20} {:<8} {}",
            dataset.name,
            dataset.kind.as_str(),
            dataset.table_name(),
            dataset.path.exists(),
            dataset.path.display()
        );
    }
    Ok(())
}
