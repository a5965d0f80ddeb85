//! SQLite destination backed by a single `sqlx` connection.
//!
//! Used for local database files and by the integration tests. Values are
//! bound with their own types; SQLite's type affinity handles the rest.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::error::ErrorKind;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::{Connection, QueryBuilder, Sqlite};

use tabload_core::destination::{Destination, InsertOutcome};
use tabload_core::models::Value;
use tabload_core::sql::{quote_qualified, split_qualified, InsertStatement};

use crate::db::{classify_insert, SAVEPOINT};
use crate::migrate::{LedgerEntry, MigrationLedger};

/// `SQLITE_MAX_VARIABLE_NUMBER` default since SQLite 3.32.
pub const MAX_BIND_PARAMETERS: usize = 32766;

pub struct SqliteBackend {
    conn: SqliteConnection,
}

impl SqliteBackend {
    pub async fn connect(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let conn = SqliteConnection::connect_with(&options)
            .await
            .with_context(|| format!("Failed to open sqlite database {}", path.display()))?;

        Ok(Self { conn })
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }

    async fn execute_raw(&mut self, sql: &str) -> Result<()> {
        sqlx::Executor::execute(&mut self.conn, sql).await?;
        Ok(())
    }
}

#[async_trait]
impl Destination for SqliteBackend {
    async fn columns_of(&mut self, table: &str) -> Result<Vec<String>> {
        let (schema, name) = split_qualified(table);
        let columns: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info(?1, ?2) ORDER BY cid")
                .bind(name)
                .bind(schema.unwrap_or("main"))
                .fetch_all(&mut self.conn)
                .await
                .with_context(|| format!("Failed to read columns of {}", table))?;
        Ok(columns)
    }

    async fn begin(&mut self) -> Result<()> {
        self.execute_raw("BEGIN").await
    }

    async fn insert_rows(
        &mut self,
        statement: &InsertStatement,
        rows: &[Vec<Value>],
    ) -> Result<InsertOutcome> {
        let mut builder = QueryBuilder::<Sqlite>::new(statement.prefix());
        builder.push_values(rows, |mut tuple, row| {
            for value in row {
                match value {
                    Value::Null => tuple.push_bind(None::<String>),
                    Value::Bool(b) => tuple.push_bind(*b),
                    Value::Int(i) => tuple.push_bind(*i),
                    Value::Float(f) => tuple.push_bind(*f),
                    Value::Text(s) => tuple.push_bind(s.clone()),
                    Value::Timestamp(ts) => tuple.push_bind(*ts),
                };
            }
        });

        self.execute_raw(&format!("SAVEPOINT {}", SAVEPOINT)).await?;
        let result = builder.build().execute(&mut self.conn).await;
        let outcome = classify_insert(result.map(|_| ()), is_integrity_violation)?;
        if outcome.is_success() {
            self.execute_raw(&format!("RELEASE SAVEPOINT {}", SAVEPOINT))
                .await?;
        } else {
            self.execute_raw(&format!(
                "ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}",
                SAVEPOINT
            ))
            .await?;
        }
        Ok(outcome)
    }

    async fn commit(&mut self) -> Result<()> {
        self.execute_raw("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.execute_raw("ROLLBACK").await
    }

    fn max_bind_parameters(&self) -> usize {
        MAX_BIND_PARAMETERS
    }
}

fn is_integrity_violation(err: &dyn sqlx::error::DatabaseError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::UniqueViolation
            | ErrorKind::ForeignKeyViolation
            | ErrorKind::NotNullViolation
            | ErrorKind::CheckViolation
    )
}

#[async_trait]
impl MigrationLedger for SqliteBackend {
    async fn ensure_ledger(&mut self, table: &str) -> Result<()> {
        self.execute_raw(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                migration_name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            quote_qualified(table)
        ))
        .await
        .with_context(|| format!("Failed to create migration ledger {}", table))
    }

    async fn applied_migrations(&mut self, table: &str) -> Result<Vec<LedgerEntry>> {
        let rows: Vec<(String, Option<NaiveDateTime>)> = sqlx::query_as(&format!(
            "SELECT migration_name, applied_at FROM {} ORDER BY id",
            quote_qualified(table)
        ))
        .fetch_all(&mut self.conn)
        .await
        .with_context(|| format!("Failed to read migration ledger {}", table))?;

        Ok(rows
            .into_iter()
            .map(|(name, applied_at)| LedgerEntry { name, applied_at })
            .collect())
    }

    async fn apply_migration(&mut self, table: &str, name: &str, sql: &str) -> Result<()> {
        self.execute_raw(sql).await?;

        sqlx::query(&format!(
            "INSERT INTO {} (migration_name, applied_at) VALUES (?1, ?2)",
            quote_qualified(table)
        ))
        .bind(name)
        .bind(Utc::now().naive_utc())
        .execute(&mut self.conn)
        .await
        .with_context(|| format!("Failed to record migration {}", name))?;
        Ok(())
    }
}
