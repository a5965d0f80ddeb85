//! Core data models used throughout tabload.
//!
//! A [`RecordSet`] is the in-memory form of one tabular dataset: an ordered
//! column list plus rows of scalar [`Value`]s. It is built once per load by a
//! record source, normalized, and then handed read-only to the loader.

use std::fmt;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::NaiveDateTime;

/// A single scalar cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

/// The type of a non-null [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
    Timestamp,
}

impl ValueKind {
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Bool => "boolean",
            ValueKind::Int => "integer",
            ValueKind::Float => "float",
            ValueKind::Text => "text",
            ValueKind::Timestamp => "timestamp",
        }
    }
}

impl Value {
    /// `None` for [`Value::Null`].
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueKind::Bool),
            Value::Int(_) => Some(ValueKind::Int),
            Value::Float(_) => Some(ValueKind::Float),
            Value::Text(_) => Some(ValueKind::Text),
            Value::Timestamp(_) => Some(ValueKind::Timestamp),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Textual rendering used when a backend binds every value as text and
    /// lets the database cast it to the column type.
    ///
    /// Floats with no fractional part render without a trailing `.0`, so
    /// `5.0` casts cleanly into an integer column.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Timestamp(ts) => Some(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("NULL"),
        }
    }
}

/// A borrowed view of one row, addressable by column name.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> Record<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }
}

/// An ordered collection of rows sharing one column set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl RecordSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a set from literal rows. Every row must match the column count.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut set = Self::new(columns);
        for row in rows {
            set.push_row(row)?;
        }
        Ok(set)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            bail!(
                "row {} has {} values, expected {}",
                self.rows.len(),
                row.len(),
                self.columns.len()
            );
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    pub fn record(&self, index: usize) -> Option<Record<'_>> {
        self.rows.get(index).map(|values| Record {
            columns: &self.columns,
            values,
        })
    }

    /// Rename a column. Returns `false` (and changes nothing) when `from` is
    /// absent. Fails if `to` already names a different column.
    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<bool> {
        let Some(idx) = self.column_index(from) else {
            return Ok(false);
        };
        if from != to && self.has_column(to) {
            bail!("cannot rename '{}' to '{}': column already exists", from, to);
        }
        self.columns[idx] = to.to_string();
        Ok(true)
    }

    /// Remove a column and its values. Returns `false` when absent.
    pub fn drop_column(&mut self, column: &str) -> bool {
        let Some(idx) = self.column_index(column) else {
            return false;
        };
        self.columns.remove(idx);
        for row in &mut self.rows {
            row.remove(idx);
        }
        true
    }

    /// Rewrite every value of an existing column.
    pub fn map_column<F>(&mut self, column: &str, mut f: F) -> Result<()>
    where
        F: FnMut(&Value) -> Result<Value>,
    {
        let Some(idx) = self.column_index(column) else {
            bail!("column '{}' not found", column);
        };
        for (i, row) in self.rows.iter_mut().enumerate() {
            row[idx] = f(&row[idx])
                .map_err(|e| e.context(format!("column '{}', row {}", column, i)))?;
        }
        Ok(())
    }

    /// Replace a column's values, or append it as the last column.
    pub fn set_column(&mut self, column: &str, values: Vec<Value>) -> Result<()> {
        if values.len() != self.rows.len() {
            bail!(
                "column '{}' has {} values, expected {}",
                column,
                values.len(),
                self.rows.len()
            );
        }
        match self.column_index(column) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.columns.push(column.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(())
    }

    /// Values of one column, top to bottom.
    pub fn column_values(&self, column: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(column)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }
}

/// Aggregate outcome of one bulk load.
///
/// `total` counts the rows the loader attempted: the size of the record set
/// when at least one column survived projection, zero otherwise. At
/// completion `inserted + skipped == total`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadCounters {
    pub total: u64,
    pub inserted: u64,
    pub skipped: u64,
    pub elapsed: Duration,
}

impl LoadCounters {
    /// Average inserted rows per second over the whole load.
    pub fn rows_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.inserted as f64 / secs
        } else {
            0.0
        }
    }

    pub fn processed(&self) -> u64 {
        self.inserted + self.skipped
    }

    pub fn is_balanced(&self) -> bool {
        self.processed() == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RecordSet {
        RecordSet::from_rows(
            vec!["id".into(), "name".into()],
            vec![
                vec![Value::Int(1), Value::Text("a".into())],
                vec![Value::Int(2), Value::Null],
            ],
        )
        .unwrap()
    }

    #[test]
    fn push_row_rejects_wrong_width() {
        let mut set = sample();
        assert!(set.push_row(vec![Value::Int(3)]).is_err());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn rename_missing_column_is_noop() {
        let mut set = sample();
        assert!(!set.rename_column("FN", "fn").unwrap());
        assert_eq!(set.columns(), &["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn rename_onto_existing_column_fails() {
        let mut set = sample();
        assert!(set.rename_column("id", "name").is_err());
    }

    #[test]
    fn drop_and_append_column() {
        let mut set = sample();
        assert!(set.drop_column("name"));
        set.set_column("flag", vec![Value::Bool(true), Value::Bool(false)])
            .unwrap();
        assert_eq!(set.columns(), &["id".to_string(), "flag".to_string()]);
        assert_eq!(set.record(1).unwrap().get("flag"), Some(&Value::Bool(false)));
    }

    #[test]
    fn float_text_drops_integral_fraction() {
        assert_eq!(Value::Float(5.0).to_text().as_deref(), Some("5"));
        assert_eq!(Value::Float(0.25).to_text().as_deref(), Some("0.25"));
        assert_eq!(Value::Null.to_text(), None);
    }

    #[test]
    fn counters_rate_handles_zero_elapsed() {
        let counters = LoadCounters {
            total: 10,
            inserted: 10,
            skipped: 0,
            elapsed: Duration::ZERO,
        };
        assert_eq!(counters.rows_per_sec(), 0.0);
        assert!(counters.is_balanced());
    }
}
