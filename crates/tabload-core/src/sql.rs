//! SQL identifier quoting and the parameterized insert statement.
//!
//! Both supported backends (PostgreSQL and SQLite) accept double-quoted
//! identifiers, so quoting lives here rather than in each backend.

use std::fmt;

/// Quote a single identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Split `schema.table` into its parts. A bare name has no schema.
pub fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((schema, table)) => (Some(schema), table),
        None => (None, name),
    }
}

/// Quote a possibly schema-qualified table name.
pub fn quote_qualified(name: &str) -> String {
    match split_qualified(name) {
        (Some(schema), table) => format!("{}.{}", quote_ident(schema), quote_ident(table)),
        (None, table) => quote_ident(table),
    }
}

/// A multi-row insert naming an explicit column list.
///
/// Backends append the `VALUES` tuples and placeholders in their own
/// parameter syntax; [`prefix`](InsertStatement::prefix) is everything before
/// that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub table: String,
    pub columns: Vec<String>,
}

impl InsertStatement {
    pub fn new(table: &str, columns: Vec<String>) -> Self {
        Self {
            table: table.to_string(),
            columns,
        }
    }

    /// `INSERT INTO "t" ("a", "b") ` with a trailing space.
    pub fn prefix(&self) -> String {
        let cols: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        format!(
            "INSERT INTO {} ({}) ",
            quote_qualified(&self.table),
            cols.join(", ")
        )
    }

    /// Number of bind parameters one row contributes.
    pub fn width(&self) -> usize {
        self.columns.len()
    }
}

impl fmt::Display for InsertStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let placeholders = vec!["?"; self.columns.len()].join(", ");
        write!(f, "{}VALUES ({})", self.prefix(), placeholders)
    }
}
