//! Load progress reporting.
//!
//! Reports observable progress while `tabload load` runs so users see how far
//! a table has got and how fast rows are going in. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use tabload_core::loader::{LoadProgress, NoProgress, ProgressReporter};

/// Human-friendly progress on stderr:
/// "load customers  1,000 / 2,500 rows (40.0%)  inserted 990  skipped 10  812 rows/s".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, progress: &LoadProgress) {
        let line = format!(
            "load {}  {} / {} rows ({:.1}%)  inserted {}  skipped {}  {} rows/s  {:.1}s\n",
            progress.table,
            format_number(progress.processed),
            format_number(progress.total),
            progress.fraction() * 100.0,
            format_number(progress.inserted),
            format_number(progress.skipped),
            format_number(progress.rows_per_sec.round() as u64),
            progress.elapsed.as_secs_f64(),
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, progress: &LoadProgress) {
        let obj = serde_json::json!({
            "event": "progress",
            "table": progress.table,
            "processed": progress.processed,
            "total": progress.total,
            "inserted": progress.inserted,
            "skipped": progress.skipped,
            "fraction": progress.fraction(),
            "rows_per_sec": progress.rows_per_sec,
            "elapsed_secs": progress.elapsed.as_secs_f64(),
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode. Caller can pass it to the loader.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
