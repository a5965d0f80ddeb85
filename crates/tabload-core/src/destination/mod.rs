//! Destination abstraction for the loader.
//!
//! The [`Destination`] trait is everything the batched loader needs from a
//! relational store: catalog introspection, one load-wide transaction, and
//! an insert attempt that reports *how* it failed instead of raising.
//!
//! # Error contract
//!
//! | Result | Meaning | Loader reaction |
//! |--------|---------|-----------------|
//! | `Ok(InsertOutcome::Success)` | rows written | count as inserted |
//! | `Ok(InsertOutcome::IntegrityViolation(_))` | unique / FK / not-null / check | retry row by row, or skip the row |
//! | `Ok(InsertOutcome::OtherError(_))` | anything else the statement raised | skip the whole batch |
//! | `Err(_)` | connection-level failure | abort the load |
//!
//! A failed insert attempt must leave the destination as if the attempt had
//! never happened (implementations use a savepoint around each attempt).

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Value;
use crate::sql::InsertStatement;

/// Outcome of one insert attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Success,
    IntegrityViolation(String),
    OtherError(String),
}

impl InsertOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InsertOutcome::Success)
    }
}

/// Abstract relational destination.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`columns_of`](Destination::columns_of) | Ordered column names of a table |
/// | [`begin`](Destination::begin) | Open the load transaction |
/// | [`insert_rows`](Destination::insert_rows) | One atomic multi-row insert attempt |
/// | [`commit`](Destination::commit) | Commit the load transaction |
/// | [`rollback`](Destination::rollback) | Abandon the load transaction |
#[async_trait]
pub trait Destination: Send {
    /// Column names of `table` in catalog order. An unknown table yields an
    /// empty list, not an error.
    async fn columns_of(&mut self, table: &str) -> Result<Vec<String>>;

    async fn begin(&mut self) -> Result<()>;

    /// Insert `rows` (each aligned with `statement.columns`) as a single
    /// statement. Either every row is written or none is.
    async fn insert_rows(
        &mut self,
        statement: &InsertStatement,
        rows: &[Vec<Value>],
    ) -> Result<InsertOutcome>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Upper bound on bind parameters in one statement.
    fn max_bind_parameters(&self) -> usize {
        usize::MAX
    }
}
