//! PostgreSQL destination backed by a single `sqlx` connection.
//!
//! Every value is bound as text and cast to the destination column's
//! declared type (`$1::public.int4`), so the types inferred while reading a
//! CSV file never have to agree exactly with the table definition. A value
//! that does not cast fails the statement like any other type error.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Postgres, QueryBuilder};
use tracing::debug;

use tabload_core::destination::{Destination, InsertOutcome};
use tabload_core::models::Value;
use tabload_core::sql::{quote_ident, quote_qualified, split_qualified, InsertStatement};

use crate::db::{classify_insert, SAVEPOINT};
use crate::migrate::{LedgerEntry, MigrationLedger};

/// PostgreSQL accepts at most this many bind parameters per statement.
pub const MAX_BIND_PARAMETERS: usize = 65535;

#[derive(Debug, Clone)]
struct PgColumn {
    name: String,
    type_schema: String,
    type_name: String,
}

impl PgColumn {
    fn cast(&self) -> String {
        format!(
            "::{}.{}",
            quote_ident(&self.type_schema),
            quote_ident(&self.type_name)
        )
    }
}

pub struct PgBackend {
    conn: PgConnection,
    columns: HashMap<String, Vec<PgColumn>>,
}

impl PgBackend {
    pub async fn connect(
        host: &str,
        port: u16,
        database: &str,
        user: &str,
        password: &str,
    ) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database)
            .username(user)
            .password(password);
        Self::connect_with(&options).await
    }

    pub async fn connect_with(options: &PgConnectOptions) -> Result<Self> {
        let conn = PgConnection::connect_with(options).await.with_context(|| {
            format!(
                "Failed to connect to postgres at {}:{}",
                options.get_host(),
                options.get_port()
            )
        })?;

        Ok(Self {
            conn,
            columns: HashMap::new(),
        })
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }

    async fn table_columns(&mut self, table: &str) -> Result<&[PgColumn]> {
        if !self.columns.contains_key(table) {
            let (schema, name) = split_qualified(table);
            let rows: Vec<(String, String, String)> = sqlx::query_as(
                r#"
                SELECT column_name::text, udt_schema::text, udt_name::text
                FROM information_schema.columns
                WHERE table_name = $1
                  AND table_schema = COALESCE($2::text, current_schema())
                ORDER BY ordinal_position
                "#,
            )
            .bind(name)
            .bind(schema)
            .fetch_all(&mut self.conn)
            .await
            .with_context(|| format!("Failed to read columns of {}", table))?;

            let columns = rows
                .into_iter()
                .map(|(name, type_schema, type_name)| PgColumn {
                    name,
                    type_schema,
                    type_name,
                })
                .collect::<Vec<_>>();
            debug!(table, columns = columns.len(), "introspected table");

            // Unknown tables are not cached so a later migration can create them.
            if columns.is_empty() {
                return Ok(&[]);
            }
            self.columns.insert(table.to_string(), columns);
        }
        Ok(self.columns.get(table).map(Vec::as_slice).unwrap_or(&[]))
    }

    async fn execute_raw(&mut self, sql: &str) -> Result<()> {
        sqlx::Executor::execute(&mut self.conn, sql).await?;
        Ok(())
    }
}

#[async_trait]
impl Destination for PgBackend {
    async fn columns_of(&mut self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .table_columns(table)
            .await?
            .iter()
            .map(|c| c.name.clone())
            .collect())
    }

    async fn begin(&mut self) -> Result<()> {
        self.execute_raw("BEGIN").await
    }

    async fn insert_rows(
        &mut self,
        statement: &InsertStatement,
        rows: &[Vec<Value>],
    ) -> Result<InsertOutcome> {
        let known = self.table_columns(&statement.table).await?;
        // A column with no catalog entry stays uncast; the insert then fails
        // on the missing column itself.
        let casts: Vec<String> = statement
            .columns
            .iter()
            .map(|name| {
                known
                    .iter()
                    .find(|c| &c.name == name)
                    .map(PgColumn::cast)
                    .unwrap_or_default()
            })
            .collect();

        let mut builder = QueryBuilder::<Postgres>::new(statement.prefix());
        builder.push_values(rows, |mut tuple, row| {
            for (value, cast) in row.iter().zip(&casts) {
                tuple.push_bind(value.to_text());
                tuple.push_unseparated(cast);
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

/// SQLSTATE class 23: unique, foreign key, not null, check, exclusion.
fn is_integrity_violation(err: &dyn sqlx::error::DatabaseError) -> bool {
    err.code().is_some_and(|code| code.starts_with("23"))
}

#[async_trait]
impl MigrationLedger for PgBackend {
    async fn ensure_ledger(&mut self, table: &str) -> Result<()> {
        self.execute_raw(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id SERIAL PRIMARY KEY,
                migration_name VARCHAR(255) NOT NULL,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            quote_qualified(table)
        ))
        .await
        .with_context(|| format!("Failed to create migration ledger {}", table))
    }

    async fn applied_migrations(&mut self, table: &str) -> Result<Vec<LedgerEntry>> {
        let rows: Vec<(String, Option<NaiveDateTime>)> = sqlx::query_as(&format!(
            "SELECT migration_name::text, applied_at FROM {} ORDER BY id",
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
        // Scripts may create tables the loader has already looked up.
        self.columns.clear();

        sqlx::query(&format!(
            "INSERT INTO {} (migration_name, applied_at) VALUES ($1, $2)",
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
