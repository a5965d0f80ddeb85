//! # tabload
//!
//! A batched CSV-to-relational bulk loader with partial-failure recovery, and
//! an idempotent migration runner for the destination schema.
//!
//! Rows go in as fixed-size multi-row inserts. A batch rejected by an
//! integrity constraint is retried row by row so one duplicate key costs one
//! row, not a thousand; a batch rejected for any other reason is skipped
//! whole. Every load ends with an exact count of inserted and skipped rows.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  CSV files  │──▶│  Normalize + │──▶│ Batch loader │──▶ PostgreSQL / SQLite
//! │             │   │    checks    │   │ (savepoints) │
//! └─────────────┘   └──────────────┘   └──────────────┘
//!                                             ▲
//!                     migrations/*.sql ───────┘ (ledger table)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tabload migrate                 # apply pending schema scripts
//! tabload load all                # load every configured dataset
//! tabload load customers --dry-run
//! tabload columns transactions
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment fallback |
//! | [`db`] | Connection acquisition and backend dispatch |
//! | [`pg_store`] | PostgreSQL destination and ledger |
//! | [`sqlite_store`] | SQLite destination and ledger |
//! | [`source_csv`] | CSV reading and column type inference |
//! | [`sources`] | Dataset selection and normalization |
//! | [`ingest`] | Load orchestration and summaries |
//! | [`migrate`] | Migration runner |
//! | [`progress`] | Progress reporters |
//!
//! The record model, normalizers, destination trait and the loader itself
//! live in the `tabload-core` crate, re-exported here as [`tabload_core`].

pub mod config;
pub mod db;
pub mod ingest;
pub mod migrate;
pub mod pg_store;
pub mod progress;
pub mod source_csv;
pub mod sources;
pub mod sqlite_store;

pub use tabload_core;
