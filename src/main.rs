//! # tabload CLI
//!
//! ## Usage
//!
//! ```bash
//! tabload --config ./config/tabload.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tabload migrate [DIR]` | Apply pending migration scripts |
//! | `tabload load <dataset\|all>` | Read, normalize and bulk load datasets |
//! | `tabload columns <table>` | Print a destination table's columns |
//! | `tabload datasets` | List configured datasets |
//!
//! Connection settings missing from the config file are read from the
//! environment (`DB_HOST`, `DB_PORT`, `DB_NAME`, `DB_USER`, `DB_PASSWORD`),
//! including a `.env` file in the working directory.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tabload::config;
use tabload::ingest::{self, LoadArgs};
use tabload::migrate;
use tabload::progress::ProgressMode;
use tabload::sources;

/// tabload: batched CSV bulk loader with row-level recovery, plus an
/// idempotent migration runner.
#[derive(Parser)]
#[command(
    name = "tabload",
    about = "Batched CSV bulk loader with row-level recovery and an idempotent migration runner",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/tabload.toml` when that file exists; otherwise
    /// built-in defaults and the environment are used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Read environment variables from this file instead of `./.env`.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Progress output on stderr. Defaults to `human` when stderr is a TTY.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply migration scripts that the ledger does not record yet.
    ///
    /// Scripts run in filename order; a failing script stops the run.
    /// Running it again is safe.
    Migrate {
        /// Directory holding the scripts (default: `migrations.dir`).
        dir: Option<PathBuf>,
    },

    /// Load one dataset, or `all`, into the destination.
    Load {
        /// Dataset name from the config, or `all`.
        dataset: String,

        /// Read this file instead of the dataset's configured path.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Load into this table instead of the dataset's configured table.
        #[arg(long)]
        table: Option<String>,

        /// Rows per multi-row insert (default: `load.batch_size`).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Fail when the table has columns the input does not provide.
        #[arg(long)]
        strict: bool,

        /// Read, normalize and check only; insert nothing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the columns of a destination table.
    Columns {
        /// Table name, optionally schema-qualified (`schema.table`).
        table: String,
    },

    /// List configured datasets.
    Datasets,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match &cli.env_file {
        Some(path) => {
            dotenv::from_path(path)
                .with_context(|| format!("Failed to read env file: {}", path.display()))?;
        }
        None => {
            dotenv::dotenv().ok();
        }
    }

    let cfg = config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Migrate { dir } => {
            migrate::run_migrations(&cfg, dir.as_deref()).await?;
        }
        Commands::Load {
            dataset,
            file,
            table,
            batch_size,
            strict,
            dry_run,
        } => {
            let mode = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
            let reporter = mode.reporter();
            let args = LoadArgs {
                file,
                table,
                batch_size,
                strict,
                dry_run,
            };
            ingest::run_load(&cfg, &dataset, &args, reporter.as_ref()).await?;
        }
        Commands::Columns { table } => {
            ingest::run_columns(&cfg, &table).await?;
        }
        Commands::Datasets => {
            sources::list_datasets(&cfg)?;
        }
    }

    Ok(())
}
