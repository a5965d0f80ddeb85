//! Batched bulk loader with partial-failure recovery.
//!
//! Given a [`RecordSet`] and a destination table, [`insert`] writes the rows
//! in fixed-size batches inside one load transaction:
//!
//! 1. Fetch the table's columns and project the record set onto the columns
//!    both sides share (table order). No shared columns means a no-op.
//! 2. Attempt each batch as one multi-row insert.
//! 3. On an integrity violation, retry that batch row by row, skipping the
//!    rows that still fail.
//! 4. On any other statement error, skip the whole batch.
//! 5. Commit once at the end.
//!
//! Integrity violations are usually caused by a few bad rows (a duplicate
//! key among hundreds of valid ones), so retrying row by row recovers the
//! rest. Other errors usually affect every row of the statement alike, so
//! row-level retries would only repeat the failure.
//!
//! `Err` results from the destination are fatal: the load transaction is
//! rolled back and the error propagates.

use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tracing::{debug, warn};

use crate::destination::{Destination, InsertOutcome};
use crate::models::{LoadCounters, RecordSet, Value};
use crate::sql::InsertStatement;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Tuning knobs for one load.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Rows per multi-row insert attempt. Must be at least 1.
    pub batch_size: usize,
    /// Minimum time between two progress reports.
    pub progress_interval: Duration,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// A throttled progress observation.
#[derive(Debug, Clone)]
pub struct LoadProgress {
    pub table: String,
    pub processed: u64,
    pub total: u64,
    pub inserted: u64,
    pub skipped: u64,
    /// Rows processed per second since the previous observation.
    pub rows_per_sec: f64,
    pub elapsed: Duration,
}

impl LoadProgress {
    /// Processed share of the total, in `[0.0, 1.0]`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.processed as f64 / self.total as f64
        }
    }
}

/// Receives progress observations. Advisory only.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: &LoadProgress);
}

/// Discards progress.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _progress: &LoadProgress) {}
}

/// Destination columns that the record set also has, in destination order.
pub fn project_columns(table_columns: &[String], records: &RecordSet) -> Vec<String> {
    table_columns
        .iter()
        .filter(|c| records.has_column(c))
        .cloned()
        .collect()
}

fn project_rows(records: &RecordSet, columns: &[String]) -> Vec<Vec<Value>> {
    let indices: Vec<usize> = columns
        .iter()
        .filter_map(|c| records.column_index(c))
        .collect();
    records
        .rows()
        .iter()
        .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
        .collect()
}

/// Shrink `requested` so one statement stays within the bind-parameter limit.
pub fn effective_batch_size(requested: usize, width: usize, max_bind_parameters: usize) -> usize {
    if width == 0 {
        return requested.max(1);
    }
    requested.min(max_bind_parameters / width).max(1)
}

/// Mutable counters for one load run.
struct LoadRun<'a> {
    table: &'a str,
    total: u64,
    inserted: u64,
    skipped: u64,
    processed: u64,
    started: Instant,
    interval: Duration,
    last_report: Instant,
    processed_at_last_report: u64,
}

impl<'a> LoadRun<'a> {
    fn new(table: &'a str, total: u64, started: Instant, interval: Duration) -> Self {
        Self {
            table,
            total,
            inserted: 0,
            skipped: 0,
            processed: 0,
            started,
            interval,
            last_report: started,
            processed_at_last_report: 0,
        }
    }

    fn maybe_report(&mut self, reporter: &dyn ProgressReporter) {
        let now = Instant::now();
        let window = now.duration_since(self.last_report);
        if window < self.interval {
            return;
        }
        let window_secs = window.as_secs_f64();
        let rows_per_sec = if window_secs > 0.0 {
            (self.processed - self.processed_at_last_report) as f64 / window_secs
        } else {
            0.0
        };
        reporter.report(&LoadProgress {
            table: self.table.to_string(),
            processed: self.processed,
            total: self.total,
            inserted: self.inserted,
            skipped: self.skipped,
            rows_per_sec,
            elapsed: now.duration_since(self.started),
        });
        self.last_report = now;
        self.processed_at_last_report = self.processed;
    }

    fn finish(self) -> LoadCounters {
        LoadCounters {
            total: self.total,
            inserted: self.inserted,
            skipped: self.skipped,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Load `records` into `table`.
///
/// Returns the final counters; `inserted + skipped == total` always holds
/// on success. A non-zero `skipped` count means some rows need follow-up.
///
/// # Errors
///
/// Fails when `batch_size` is zero, when column introspection fails, or when
/// the destination reports a connection-level error mid-load.
pub async fn insert<D>(
    dest: &mut D,
    records: &RecordSet,
    table: &str,
    options: &LoadOptions,
    reporter: &dyn ProgressReporter,
) -> Result<LoadCounters>
where
    D: Destination + ?Sized,
{
    if options.batch_size == 0 {
        bail!("batch_size must be >= 1");
    }

    let started = Instant::now();
    let table_columns = dest.columns_of(table).await?;
    let columns = project_columns(&table_columns, records);

    if columns.is_empty() || records.is_empty() {
        warn!(
            table,
            rows = records.len(),
            "no matching columns found or record set is empty; nothing inserted"
        );
        return Ok(LoadCounters {
            elapsed: started.elapsed(),
            ..Default::default()
        });
    }

    let statement = InsertStatement::new(table, columns);
    let rows = project_rows(records, &statement.columns);
    let batch_size = effective_batch_size(
        options.batch_size,
        statement.width(),
        dest.max_bind_parameters(),
    );
    debug!(%statement, batch_size, rows = rows.len(), "starting load");

    let mut run = LoadRun::new(table, rows.len() as u64, started, options.progress_interval);

    dest.begin().await?;
    if let Err(err) = insert_batches(dest, &statement, &rows, batch_size, &mut run, reporter).await
    {
        if let Err(rollback_err) = dest.rollback().await {
            warn!(table, error = %rollback_err, "rollback after fatal error failed");
        }
        return Err(err);
    }
    dest.commit().await?;

    Ok(run.finish())
}

async fn insert_batches<D>(
    dest: &mut D,
    statement: &InsertStatement,
    rows: &[Vec<Value>],
    batch_size: usize,
    run: &mut LoadRun<'_>,
    reporter: &dyn ProgressReporter,
) -> Result<()>
where
    D: Destination + ?Sized,
{
    for (batch_index, batch) in rows.chunks(batch_size).enumerate() {
        let offset = batch_index * batch_size;
        match dest.insert_rows(statement, batch).await? {
            InsertOutcome::Success => {
                run.inserted += batch.len() as u64;
            }
            InsertOutcome::IntegrityViolation(reason) => {
                warn!(
                    table = run.table,
                    offset,
                    error = %reason,
                    "batch insert failed, trying individual inserts"
                );
                insert_individually(dest, statement, batch, offset, run).await?;
            }
            InsertOutcome::OtherError(reason) => {
                warn!(
                    table = run.table,
                    offset,
                    rows = batch.len(),
                    error = %reason,
                    "batch insert failed, skipping batch"
                );
                run.skipped += batch.len() as u64;
            }
        }
        run.processed += batch.len() as u64;
        run.maybe_report(reporter);
    }
    Ok(())
}

async fn insert_individually<D>(
    dest: &mut D,
    statement: &InsertStatement,
    batch: &[Vec<Value>],
    offset: usize,
    run: &mut LoadRun<'_>,
) -> Result<()>
where
    D: Destination + ?Sized,
{
    for (j, row) in batch.iter().enumerate() {
        match dest.insert_rows(statement, std::slice::from_ref(row)).await? {
            InsertOutcome::Success => run.inserted += 1,
            InsertOutcome::IntegrityViolation(reason) => {
                warn!(
                    table = run.table,
                    row = offset + j,
                    error = %reason,
                    "skipping row due to integrity violation"
                );
                run.skipped += 1;
            }
            InsertOutcome::OtherError(reason) => {
                warn!(
                    table = run.table,
                    row = offset + j,
                    error = %reason,
                    "error inserting row, skipping"
                );
                run.skipped += 1;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::memory::{InMemoryDestination, MemoryTable};
    use crate::models::ValueKind;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<LoadProgress>>,
    }

    impl ProgressReporter for Recorder {
        fn report(&self, progress: &LoadProgress) {
            self.seen.lock().unwrap().push(progress.clone());
        }
    }

    fn customers(n: usize) -> RecordSet {
        let rows = (0..n)
            .map(|i| {
                vec![
                    Value::Text(format!("c{}", i)),
                    Value::Int(20 + (i % 50) as i64),
                    Value::Text("ignored".into()),
                ]
            })
            .collect();
        RecordSet::from_rows(
            vec!["customer_id".into(), "age".into(), "postal_code".into()],
            rows,
        )
        .unwrap()
    }

    fn customers_table() -> MemoryTable {
        MemoryTable::new(&["age", "customer_id", "active"])
            .unique("customer_id")
            .typed("age", ValueKind::Int)
    }

    fn opts(batch_size: usize) -> LoadOptions {
        LoadOptions {
            batch_size,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn clean_load_inserts_everything_in_batches() {
        let mut dest = InMemoryDestination::new().with_table("customers", customers_table());
        let counters = insert(&mut dest, &customers(2500), "customers", &opts(1000), &NoProgress)
            .await
            .unwrap();

        assert_eq!(counters.total, 2500);
        assert_eq!(counters.inserted, 2500);
        assert_eq!(counters.skipped, 0);
        assert_eq!(dest.statements(), &[1000, 1000, 500]);
        assert_eq!(dest.commits(), 1);
        assert_eq!(dest.rows("customers").len(), 2500);
    }

    #[tokio::test]
    async fn projection_follows_table_order_and_drops_extra_columns() {
        let mut dest = InMemoryDestination::new().with_table("customers", customers_table());
        insert(&mut dest, &customers(1), "customers", &opts(10), &NoProgress)
            .await
            .unwrap();
        assert_eq!(
            dest.rows("customers"),
            &[vec![Value::Int(20), Value::Text("c0".into()), Value::Null]]
        );
    }

    #[tokio::test]
    async fn one_duplicate_in_a_thousand_skips_only_that_row() {
        let mut records = customers(1000);
        let dup = records.rows()[10].clone();
        let mut rows = records.rows().to_vec();
        rows[500] = dup;
        records = RecordSet::from_rows(records.columns().to_vec(), rows).unwrap();

        let mut dest = InMemoryDestination::new().with_table("customers", customers_table());
        let counters = insert(&mut dest, &records, "customers", &opts(1000), &NoProgress)
            .await
            .unwrap();

        assert_eq!(counters.inserted, 999);
        assert_eq!(counters.skipped, 1);
        assert_eq!(dest.rows("customers").len(), 999);
        // one failed batch attempt, then 1000 single-row attempts
        assert_eq!(dest.statements().len(), 1001);
    }

    #[tokio::test]
    async fn non_integrity_failure_skips_whole_batch_without_row_retry() {
        let mut rows = customers(30).rows().to_vec();
        rows[15][1] = Value::Text("not a number".into());
        let records = RecordSet::from_rows(customers(0).columns().to_vec(), rows).unwrap();

        let mut dest = InMemoryDestination::new().with_table("customers", customers_table());
        let counters = insert(&mut dest, &records, "customers", &opts(10), &NoProgress)
            .await
            .unwrap();

        assert_eq!(counters.inserted, 20);
        assert_eq!(counters.skipped, 10);
        assert_eq!(dest.statements(), &[10, 10, 10]);
    }

    #[tokio::test]
    async fn single_row_batches_skip_each_failing_row() {
        // row 0 duplicates an existing key, row 1 has a bad type
        let table = customers_table().with_rows(vec![vec![
            Value::Int(1),
            Value::Text("c0".into()),
            Value::Null,
        ]]);
        let mut rows = customers(3).rows().to_vec();
        rows[1][1] = Value::Text("x".into());
        let records = RecordSet::from_rows(customers(0).columns().to_vec(), rows).unwrap();

        let mut dest = InMemoryDestination::new().with_table("customers", table);
        let counters = insert(&mut dest, &records, "customers", &opts(1), &NoProgress)
            .await
            .unwrap();
        assert_eq!((counters.inserted, counters.skipped), (1, 2));
    }

    #[tokio::test]
    async fn empty_projection_attempts_no_rows() {
        let records = RecordSet::from_rows(
            vec!["unrelated".into()],
            vec![vec![Value::Int(1)], vec![Value::Int(2)]],
        )
        .unwrap();
        let mut dest = InMemoryDestination::new().with_table("customers", customers_table());
        let counters = insert(&mut dest, &records, "customers", &opts(10), &NoProgress)
            .await
            .unwrap();

        // total counts rows attempted after projection, so it is zero here
        assert_eq!((counters.total, counters.inserted, counters.skipped), (0, 0, 0));
        assert!(dest.statements().is_empty());
        assert_eq!(dest.commits(), 0);
    }

    #[tokio::test]
    async fn unknown_table_is_a_noop() {
        let mut dest = InMemoryDestination::new();
        let counters = insert(&mut dest, &customers(5), "nope", &opts(10), &NoProgress)
            .await
            .unwrap();
        assert_eq!(counters, LoadCounters { elapsed: counters.elapsed, ..Default::default() });
    }

    #[tokio::test]
    async fn counters_balance_for_any_batch_size() {
        let mut rows = customers(57).rows().to_vec();
        rows[3] = rows[0].clone();
        rows[40] = rows[39].clone();
        rows[22][1] = Value::Text("bad".into());
        let records = RecordSet::from_rows(customers(0).columns().to_vec(), rows).unwrap();

        for batch_size in [1, 2, 3, 7, 10, 56, 57, 1000] {
            let mut dest = InMemoryDestination::new().with_table("customers", customers_table());
            let counters = insert(&mut dest, &records, "customers", &opts(batch_size), &NoProgress)
                .await
                .unwrap();
            assert_eq!(counters.total, 57, "batch_size {}", batch_size);
            assert!(counters.is_balanced(), "batch_size {}", batch_size);
            assert_eq!(
                dest.rows("customers").len() as u64,
                counters.inserted,
                "batch_size {}",
                batch_size
            );
        }
    }

    #[tokio::test]
    async fn zero_batch_size_is_rejected() {
        let mut dest = InMemoryDestination::new().with_table("customers", customers_table());
        assert!(insert(&mut dest, &customers(1), "customers", &opts(0), &NoProgress)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn connection_failure_rolls_back_and_propagates() {
        let mut dest = InMemoryDestination::new()
            .with_table("customers", customers_table())
            .fail_after(2);
        let result = insert(&mut dest, &customers(50), "customers", &opts(10), &NoProgress).await;

        assert!(result.is_err());
        assert_eq!(dest.rollbacks(), 1);
        assert_eq!(dest.commits(), 0);
        assert!(dest.rows("customers").is_empty());
    }

    #[tokio::test]
    async fn batch_size_respects_bind_limit() {
        let mut dest = InMemoryDestination::new()
            .with_table("customers", customers_table())
            .with_max_bind_parameters(10);
        insert(&mut dest, &customers(12), "customers", &opts(1000), &NoProgress)
            .await
            .unwrap();
        // two projected columns, at most 10 parameters => 5 rows per statement
        assert_eq!(dest.statements(), &[5, 5, 2]);
    }

    #[tokio::test]
    async fn zero_interval_reports_after_every_batch() {
        let recorder = Recorder::default();
        let mut dest = InMemoryDestination::new().with_table("customers", customers_table());
        let options = LoadOptions {
            batch_size: 4,
            progress_interval: Duration::ZERO,
        };
        insert(&mut dest, &customers(10), "customers", &options, &recorder)
            .await
            .unwrap();

        let seen = recorder.seen.lock().unwrap();
        let processed: Vec<u64> = seen.iter().map(|p| p.processed).collect();
        assert_eq!(processed, vec![4, 8, 10]);
        assert!((seen[2].fraction() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn long_interval_suppresses_reports() {
        let recorder = Recorder::default();
        let mut dest = InMemoryDestination::new().with_table("customers", customers_table());
        let options = LoadOptions {
            batch_size: 4,
            progress_interval: Duration::from_secs(3600),
        };
        let counters = insert(&mut dest, &customers(10), "customers", &options, &recorder)
            .await
            .unwrap();

        assert_eq!(counters.inserted, 10);
        assert_eq!(dest.statements().len(), 3);
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn effective_batch_size_never_zero() {
        assert_eq!(effective_batch_size(1000, 3, 65535), 1000);
        assert_eq!(effective_batch_size(1000, 100, 65535), 655);
        assert_eq!(effective_batch_size(1000, 70000, 65535), 1);
    }
}
