//! Per-dataset normalization and pre-load checks.
//!
//! Each dataset shape has one normalizer that turns the raw parsed
//! [`RecordSet`] into the form the destination schema expects:
//!
//! | Dataset | Normalization |
//! |---------|---------------|
//! | customers | `Active` flag → boolean `active`, `FN` → `fn`, missing `age` → 0 |
//! | articles | none |
//! | transactions | date column parsed to a timestamp and renamed `transaction_date` |

use std::collections::HashSet;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};

use crate::models::{RecordSet, Value};

/// Source column holding the numeric activity flag.
pub const CUSTOMER_FLAG_COLUMN: &str = "Active";
pub const CUSTOMER_ACTIVE_COLUMN: &str = "active";
pub const CUSTOMER_AGE_COLUMN: &str = "age";
pub const DEFAULT_TRANSACTION_DATE_COLUMN: &str = "t_dat";
pub const TRANSACTION_DATE_COLUMN: &str = "transaction_date";

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Normalize the customers dataset.
///
/// - `Active == 1.0` becomes `active = true`; any other value, including a
///   missing one, becomes `false`. The `Active` column is removed.
/// - `FN` is renamed to `fn` when present.
/// - Missing `age` values become 0 and the column is coerced to integers.
pub fn customers(mut records: RecordSet) -> Result<RecordSet> {
    let flags = records
        .column_values(CUSTOMER_FLAG_COLUMN)
        .ok_or_else(|| anyhow!("customers: column '{}' not found", CUSTOMER_FLAG_COLUMN))?;
    let active: Vec<Value> = flags.into_iter().map(|v| Value::Bool(is_one(v))).collect();
    records.set_column(CUSTOMER_ACTIVE_COLUMN, active)?;
    records.drop_column(CUSTOMER_FLAG_COLUMN);

    records.rename_column("FN", "fn")?;

    if !records.has_column(CUSTOMER_AGE_COLUMN) {
        bail!("customers: column '{}' not found", CUSTOMER_AGE_COLUMN);
    }
    records.map_column(CUSTOMER_AGE_COLUMN, age_to_int)?;

    Ok(records)
}

/// Articles pass through unchanged.
pub fn articles(records: RecordSet) -> RecordSet {
    records
}

/// Normalize the transactions dataset: parse `date_column` as a calendar
/// date (midnight timestamp) and rename it to `transaction_date`.
pub fn transactions(mut records: RecordSet, date_column: &str) -> Result<RecordSet> {
    if !records.has_column(date_column) {
        bail!("transactions: date column '{}' not found", date_column);
    }
    records.map_column(date_column, parse_date)?;
    records.rename_column(date_column, TRANSACTION_DATE_COLUMN)?;
    Ok(records)
}

fn is_one(value: &Value) -> bool {
    match value {
        Value::Int(i) => *i == 1,
        Value::Float(f) => *f == 1.0,
        _ => false,
    }
}

fn age_to_int(value: &Value) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Int(0)),
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
        Value::Text(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .with_context(|| format!("invalid age '{}'", s)),
        other => bail!("invalid age '{}'", other),
    }
}

fn parse_date(value: &Value) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Timestamp(ts) => Ok(Value::Timestamp(*ts)),
        Value::Text(s) => parse_date_text(s.trim())
            .map(Value::Timestamp)
            .ok_or_else(|| anyhow!("invalid date '{}'", s)),
        other => bail!("invalid date '{}'", other),
    }
}

fn parse_date_text(s: &str) -> Option<NaiveDateTime> {
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        })
}

/// `true` when no non-null value of `key_column` appears more than once.
pub fn has_no_duplicates(records: &RecordSet, key_column: &str) -> Result<bool> {
    let values = records
        .column_values(key_column)
        .ok_or_else(|| anyhow!("column '{}' not found", key_column))?;
    let mut seen = HashSet::with_capacity(values.len());
    for value in values {
        if value.is_null() {
            continue;
        }
        // Value holds f64, so compare on the textual form.
        if !seen.insert(value.to_string()) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Destination columns that the record set does not provide.
pub fn missing_columns(records: &RecordSet, table_columns: &[String]) -> Vec<String> {
    table_columns
        .iter()
        .filter(|c| !records.has_column(c))
        .cloned()
        .collect()
}
