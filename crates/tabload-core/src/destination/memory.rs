//! In-memory [`Destination`] implementation for tests.
//!
//! Tables are declared up front with optional column types, unique and
//! not-null constraints. Type mismatches surface as
//! [`InsertOutcome::OtherError`], constraint breaches as
//! [`InsertOutcome::IntegrityViolation`]. Every insert attempt is logged
//! (by row count) so tests can assert whether row-level retries happened.

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{Value, ValueKind};
use crate::sql::InsertStatement;

use super::{Destination, InsertOutcome};

/// Schema and contents of one in-memory table.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    columns: Vec<String>,
    kinds: Vec<Option<ValueKind>>,
    unique: Vec<usize>,
    not_null: Vec<usize>,
    rows: Vec<Vec<Value>>,
}

impl MemoryTable {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            kinds: vec![None; columns.len()],
            unique: Vec::new(),
            not_null: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn typed(mut self, column: &str, kind: ValueKind) -> Self {
        let idx = self.index_of(column);
        self.kinds[idx] = Some(kind);
        self
    }

    pub fn unique(mut self, column: &str) -> Self {
        let idx = self.index_of(column);
        self.unique.push(idx);
        self
    }

    pub fn not_null(mut self, column: &str) -> Self {
        let idx = self.index_of(column);
        self.not_null.push(idx);
        self
    }

    /// Pre-existing rows, given in table column order.
    pub fn with_rows(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.rows = rows;
        self
    }

    fn index_of(&self, column: &str) -> usize {
        self.columns
            .iter()
            .position(|c| c == column)
            .unwrap_or_else(|| panic!("unknown column '{}'", column))
    }

    fn check_types(&self, positions: &[usize], rows: &[Vec<Value>]) -> Option<String> {
        for row in rows {
            for (value, &pos) in row.iter().zip(positions) {
                let (Some(actual), Some(expected)) = (value.kind(), self.kinds[pos]) else {
                    continue;
                };
                let widening = actual == ValueKind::Int && expected == ValueKind::Float;
                if actual != expected && !widening {
                    return Some(format!(
                        "column \"{}\" is of type {} but expression is of type {}",
                        self.columns[pos],
                        expected.name(),
                        actual.name()
                    ));
                }
            }
        }
        None
    }

    fn check_constraints(&self, staged: &[Vec<Value>]) -> Option<String> {
        for (i, row) in staged.iter().enumerate() {
            for &idx in &self.not_null {
                if row[idx].is_null() {
                    return Some(format!(
                        "null value in column \"{}\" violates not-null constraint",
                        self.columns[idx]
                    ));
                }
            }
            for &idx in &self.unique {
                let value = &row[idx];
                if value.is_null() {
                    continue;
                }
                let clash = self.rows.iter().any(|r| &r[idx] == value)
                    || staged[..i].iter().any(|r| &r[idx] == value);
                if clash {
                    return Some(format!(
                        "duplicate key value violates unique constraint: ({})=({})",
                        self.columns[idx], value
                    ));
                }
            }
        }
        None
    }
}

/// In-memory destination with a statement log.
#[derive(Debug, Default)]
pub struct InMemoryDestination {
    tables: HashMap<String, MemoryTable>,
    snapshot: Option<HashMap<String, Vec<Vec<Value>>>>,
    statements: Vec<usize>,
    commits: usize,
    rollbacks: usize,
    fail_after: Option<usize>,
    max_bind: Option<usize>,
}

impl InMemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: &str, table: MemoryTable) -> Self {
        self.tables.insert(name.to_string(), table);
        self
    }

    /// Simulate a lost connection: every insert attempt after the first
    /// `statements` ones returns `Err`.
    pub fn fail_after(mut self, statements: usize) -> Self {
        self.fail_after = Some(statements);
        self
    }

    pub fn with_max_bind_parameters(mut self, max: usize) -> Self {
        self.max_bind = Some(max);
        self
    }

    /// Current contents of `table`, including uncommitted rows.
    pub fn rows(&self, table: &str) -> &[Vec<Value>] {
        self.tables
            .get(table)
            .map(|t| t.rows.as_slice())
            .unwrap_or(&[])
    }

    /// Row count of every insert attempt, in order.
    pub fn statements(&self) -> &[usize] {
        &self.statements
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }
}

#[async_trait]
impl Destination for InMemoryDestination {
    async fn columns_of(&mut self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn begin(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            bail!("transaction already open");
        }
        let snapshot = self
            .tables
            .iter()
            .map(|(name, t)| (name.clone(), t.rows.clone()))
            .collect();
        self.snapshot = Some(snapshot);
        Ok(())
    }

    async fn insert_rows(
        &mut self,
        statement: &InsertStatement,
        rows: &[Vec<Value>],
    ) -> Result<InsertOutcome> {
        self.statements.push(rows.len());
        if let Some(limit) = self.fail_after {
            if self.statements.len() > limit {
                bail!("connection reset by peer");
            }
        }

        let Some(table) = self.tables.get_mut(&statement.table) else {
            return Ok(InsertOutcome::OtherError(format!(
                "relation \"{}\" does not exist",
                statement.table
            )));
        };

        let mut positions = Vec::with_capacity(statement.columns.len());
        for column in &statement.columns {
            match table.columns.iter().position(|c| c == column) {
                Some(pos) => positions.push(pos),
                None => {
                    return Ok(InsertOutcome::OtherError(format!(
                        "column \"{}\" does not exist",
                        column
                    )))
                }
            }
        }

        if let Some(message) = table.check_types(&positions, rows) {
            return Ok(InsertOutcome::OtherError(message));
        }

        let staged: Vec<Vec<Value>> = rows
            .iter()
            .map(|row| {
                let mut full = vec![Value::Null; table.columns.len()];
                for (value, &pos) in row.iter().zip(&positions) {
                    full[pos] = value.clone();
                }
                full
            })
            .collect();

        if let Some(message) = table.check_constraints(&staged) {
            return Ok(InsertOutcome::IntegrityViolation(message));
        }

        table.rows.extend(staged);
        Ok(InsertOutcome::Success)
    }

    async fn commit(&mut self) -> Result<()> {
        if self.snapshot.take().is_none() {
            bail!("no transaction to commit");
        }
        self.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(snapshot) = self.snapshot.take() {
            for (name, rows) in snapshot {
                if let Some(table) = self.tables.get_mut(&name) {
                    table.rows = rows;
                }
            }
        }
        self.rollbacks += 1;
        Ok(())
    }

    fn max_bind_parameters(&self) -> usize {
        self.max_bind.unwrap_or(usize::MAX)
    }
}
