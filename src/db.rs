//! Connection acquisition and backend dispatch.
//!
//! [`Backend`] wraps one open connection to either supported store and
//! forwards both the [`Destination`] and [`MigrationLedger`] operations to
//! it. Every run opens exactly one connection and closes it on exit.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use tabload_core::destination::{Destination, InsertOutcome};
use tabload_core::models::Value;
use tabload_core::sql::InsertStatement;

use crate::config::{Config, ConnectionTarget};
use crate::migrate::{LedgerEntry, MigrationLedger};
use crate::pg_store::PgBackend;
use crate::sqlite_store::SqliteBackend;

/// Savepoint wrapped around every insert attempt inside the load transaction.
pub(crate) const SAVEPOINT: &str = "tabload_insert";

pub enum Backend {
    Postgres(PgBackend),
    Sqlite(SqliteBackend),
}

pub async fn connect(config: &Config) -> Result<Backend> {
    let target = config.db.resolve()?;
    connect_to(&target).await
}

pub async fn connect_to(target: &ConnectionTarget) -> Result<Backend> {
    info!(%target, "connecting");
    let backend = match target {
        ConnectionTarget::Postgres {
            host,
            port,
            database,
            user,
            password,
        } => Backend::Postgres(PgBackend::connect(host, *port, database, user, password).await?),
        ConnectionTarget::Sqlite { path } => Backend::Sqlite(SqliteBackend::connect(path).await?),
    };
    debug!(backend = backend.name(), "connected");
    Ok(backend)
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Postgres(_) => "postgres",
            Backend::Sqlite(_) => "sqlite",
        }
    }

    pub async fn close(self) -> Result<()> {
        match self {
            Backend::Postgres(b) => b.close().await,
            Backend::Sqlite(b) => b.close().await,
        }
    }
}

/// Map the result of one insert statement onto the loader's error contract.
///
/// Database errors become an [`InsertOutcome`]; anything else (I/O,
/// protocol, closed connection) is fatal and returned as `Err`.
pub(crate) fn classify_insert(
    result: std::result::Result<(), sqlx::Error>,
    is_integrity_violation: fn(&dyn sqlx::error::DatabaseError) -> bool,
) -> Result<InsertOutcome> {
    match result {
        Ok(()) => Ok(InsertOutcome::Success),
        Err(sqlx::Error::Database(err)) => {
            let message = err.message().to_string();
            if is_integrity_violation(&*err) {
                Ok(InsertOutcome::IntegrityViolation(message))
            } else {
                Ok(InsertOutcome::OtherError(message))
            }
        }
        Err(other) => Err(other.into()),
    }
}

#[async_trait]
impl Destination for Backend {
    async fn columns_of(&mut self, table: &str) -> Result<Vec<String>> {
        match self {
            Backend::Postgres(b) => b.columns_of(table).await,
            Backend::Sqlite(b) => b.columns_of(table).await,
        }
    }

    async fn begin(&mut self) -> Result<()> {
        match self {
            Backend::Postgres(b) => b.begin().await,
            Backend::Sqlite(b) => b.begin().await,
        }
    }

    async fn insert_rows(
        &mut self,
        statement: &InsertStatement,
        rows: &[Vec<Value>],
    ) -> Result<InsertOutcome> {
        match self {
            Backend::Postgres(b) => b.insert_rows(statement, rows).await,
            Backend::Sqlite(b) => b.insert_rows(statement, rows).await,
        }
    }

    async fn commit(&mut self) -> Result<()> {
        match self {
            Backend::Postgres(b) => b.commit().await,
            Backend::Sqlite(b) => b.commit().await,
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        match self {
            Backend::Postgres(b) => b.rollback().await,
            Backend::Sqlite(b) => b.rollback().await,
        }
    }

    fn max_bind_parameters(&self) -> usize {
        match self {
            Backend::Postgres(b) => b.max_bind_parameters(),
            Backend::Sqlite(b) => b.max_bind_parameters(),
        }
    }
}

#[async_trait]
impl MigrationLedger for Backend {
    async fn ensure_ledger(&mut self, table: &str) -> Result<()> {
        match self {
            Backend::Postgres(b) => b.ensure_ledger(table).await,
            Backend::Sqlite(b) => b.ensure_ledger(table).await,
        }
    }

    async fn applied_migrations(&mut self, table: &str) -> Result<Vec<LedgerEntry>> {
        match self {
            Backend::Postgres(b) => b.applied_migrations(table).await,
            Backend::Sqlite(b) => b.applied_migrations(table).await,
        }
    }

    async fn apply_migration(&mut self, table: &str, name: &str, sql: &str) -> Result<()> {
        match self {
            Backend::Postgres(b) => b.apply_migration(table, name, sql).await,
            Backend::Sqlite(b) => b.apply_migration(table, name, sql).await,
        }
    }
}
