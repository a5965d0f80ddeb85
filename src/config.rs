//! TOML configuration parsing.
//!
//! Every setting has a default, so an empty file (or no file at all) is a
//! valid configuration. PostgreSQL connection fields that the file leaves out
//! are taken from the environment when the target is resolved, see
//! [`DbConfig::resolve`].
//!
//! ```toml
//! [db]
//! backend = "postgres"
//! host = "localhost"
//! database = "shop"
//!
//! [load]
//! batch_size = 1000
//!
//! [[datasets]]
//! name = "customers"
//! kind = "customers"
//! path = "data/customers_filtered.csv"
//! unique_key = "customer_id"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use tabload_core::loader::{DEFAULT_BATCH_SIZE, DEFAULT_PROGRESS_INTERVAL};
use tabload_core::normalize::DEFAULT_TRANSACTION_DATE_COLUMN;

pub const DEFAULT_CONFIG_PATH: &str = "./config/tabload.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub migrations: MigrationsConfig,
    #[serde(default = "default_datasets")]
    pub datasets: Vec<DatasetConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            load: LoadConfig::default(),
            migrations: MigrationsConfig::default(),
            datasets: default_datasets(),
        }
    }
}

impl Config {
    pub fn dataset(&self, name: &str) -> Option<&DatasetConfig> {
        self.datasets.iter().find(|d| d.name == name)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// SQLite database file.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            host: None,
            port: None,
            database: None,
            user: None,
            password: None,
            path: None,
        }
    }
}

fn default_backend() -> String {
    "postgres".to_string()
}

const DEFAULT_PG_PORT: u16 = 5432;

/// A fully resolved connection target.
#[derive(Clone)]
pub enum ConnectionTarget {
    Postgres {
        host: String,
        port: u16,
        database: String,
        user: String,
        password: String,
    },
    Sqlite {
        path: PathBuf,
    },
}

// Keeps the password out of logs and error messages.
impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionTarget::Postgres {
                host,
                port,
                database,
                user,
                ..
            } => write!(f, "postgres://{}@{}:{}/{}", user, host, port, database),
            ConnectionTarget::Sqlite { path } => write!(f, "sqlite:{}", path.display()),
        }
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl DbConfig {
    /// Resolve the connection target, filling missing PostgreSQL fields
    /// from the process environment.
    pub fn resolve(&self) -> Result<ConnectionTarget> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Like [`resolve`](Self::resolve) with an explicit variable lookup.
    pub fn resolve_with<F>(&self, env: F) -> Result<ConnectionTarget>
    where
        F: Fn(&str) -> Option<String>,
    {
        match self.backend.as_str() {
            "sqlite" => {
                let Some(path) = self.path.clone() else {
                    bail!("db.path must be set when backend is 'sqlite'");
                };
                Ok(ConnectionTarget::Sqlite { path })
            }
            "postgres" => {
                let lookup = |field: &Option<String>, keys: &[&str]| {
                    field
                        .clone()
                        .or_else(|| keys.iter().find_map(|k| env(*k)))
                        .filter(|v| !v.is_empty())
                };

                let host = lookup(&self.host, &["DB_HOST"]);
                let database = lookup(&self.database, &["DB_NAME"]);
                let user = lookup(&self.user, &["DB_USER", "POSTGRES_USER"]);
                let password = lookup(&self.password, &["DB_PASSWORD", "POSTGRES_PASSWORD"]);

                let port = match self.port {
                    Some(port) => port,
                    None => match env("DB_PORT").filter(|v| !v.is_empty()) {
                        Some(raw) => raw
                            .trim()
                            .parse::<u16>()
                            .with_context(|| format!("DB_PORT is not a valid port: '{}'", raw))?,
                        None => DEFAULT_PG_PORT,
                    },
                };

                let missing: Vec<&str> = [
                    ("host (DB_HOST)", host.is_none()),
                    ("database (DB_NAME)", database.is_none()),
                    ("user (DB_USER)", user.is_none()),
                    ("password (DB_PASSWORD)", password.is_none()),
                ]
                .iter()
                .filter(|(_, absent)| *absent)
                .map(|(name, _)| *name)
                .collect();

                match (host, database, user, password) {
                    (Some(host), Some(database), Some(user), Some(password)) => {
                        Ok(ConnectionTarget::Postgres {
                            host,
                            port,
                            database,
                            user,
                            password,
                        })
                    }
                    _ => bail!(
                        "Missing database connection settings: {}",
                        missing.join(", ")
                    ),
                }
            }
            other => bail!(
                "Unknown db backend: '{}'. Must be postgres or sqlite.",
                other
            ),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoadConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
    /// Fail a dataset whose destination table has columns the file lacks.
    #[serde(default)]
    pub strict_columns: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            progress_interval_secs: default_progress_interval_secs(),
            strict_columns: false,
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_progress_interval_secs() -> u64 {
    DEFAULT_PROGRESS_INTERVAL.as_secs()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MigrationsConfig {
    #[serde(default = "default_migrations_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_migrations_pattern")]
    pub pattern: String,
    #[serde(default = "default_ledger_table")]
    pub ledger_table: String,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_migrations_dir(),
            pattern: default_migrations_pattern(),
            ledger_table: default_ledger_table(),
        }
    }
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}
fn default_migrations_pattern() -> String {
    "*.sql".to_string()
}
fn default_ledger_table() -> String {
    "migrations".to_string()
}

/// Which normalizer a dataset goes through.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Customers,
    Articles,
    Transactions,
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Customers => "customers",
            DatasetKind::Articles => "articles",
            DatasetKind::Transactions => "transactions",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    pub name: String,
    pub kind: DatasetKind,
    pub path: PathBuf,
    /// Destination table; defaults to the dataset name.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub unique_key: Option<String>,
    #[serde(default)]
    pub text_columns: Vec<String>,
    #[serde(default = "default_date_column")]
    pub date_column: String,
}

impl DatasetConfig {
    pub fn new(name: &str, kind: DatasetKind, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            path: path.into(),
            table: None,
            delimiter: default_delimiter(),
            unique_key: None,
            text_columns: Vec::new(),
            date_column: default_date_column(),
        }
    }

    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }
}

fn default_delimiter() -> char {
    ','
}
fn default_date_column() -> String {
    DEFAULT_TRANSACTION_DATE_COLUMN.to_string()
}

fn default_datasets() -> Vec<DatasetConfig> {
    vec![
        DatasetConfig::new(
            "customers",
            DatasetKind::Customers,
            "customers_filtered.csv",
        ),
        DatasetConfig::new("articles", DatasetKind::Articles, "articles_filtered.csv"),
        DatasetConfig::new(
            "transactions",
            DatasetKind::Transactions,
            "transaction_sample_3.csv",
        ),
    ]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` if given; otherwise the default path when it exists, else
/// built-in defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_config(path),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                load_config(default_path)
            } else {
                Ok(Config::default())
            }
        }
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    if config.datasets.is_empty() {
        config.datasets = default_datasets();
    }
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.db.backend.as_str() {
        "postgres" | "sqlite" => {}
        other => bail!(
            "Unknown db backend: '{}'. Must be postgres or sqlite.",
            other
        ),
    }

    if config.load.batch_size == 0 {
        bail!("load.batch_size must be >= 1");
    }

    if config.migrations.ledger_table.trim().is_empty() {
        bail!("migrations.ledger_table must not be empty");
    }
    globset::Glob::new(&config.migrations.pattern).with_context(|| {
        format!(
            "migrations.pattern is not a valid glob: '{}'",
            config.migrations.pattern
        )
    })?;

    let mut names = std::collections::HashSet::new();
    for dataset in &config.datasets {
        if dataset.name.trim().is_empty() {
            bail!("datasets: name must not be empty");
        }
        if dataset.name == "all" {
            bail!("datasets: 'all' is reserved and cannot be a dataset name");
        }
        if !names.insert(dataset.name.as_str()) {
            bail!("datasets: duplicate dataset name '{}'", dataset.name);
        }
        if !dataset.delimiter.is_ascii() {
            bail!(
                "datasets.{}: delimiter must be a single ASCII character",
                dataset.name
            );
        }
    }

    Ok(())
}
