//! Delimited-text record source.
//!
//! Reads a header row plus data rows into a [`RecordSet`], then infers one
//! type per column from its non-null cells:
//!
//! | All cells parse as | Column type |
//! |--------------------|-------------|
//! | integer | `Int` |
//! | number | `Float` |
//! | `true` / `false` (any of `true`, `True`, `TRUE`) | `Bool` |
//! | anything else | `Text` |
//!
//! Common null markers (`""`, `NA`, `NULL`, `NaN`, ...) become `Null`.

use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, StringRecord};
use tabload_core::models::{RecordSet, Value};

const NULL_MARKERS: &[&str] = &[
    "", "NA", "N/A", "n/a", "#N/A", "NULL", "null", "NaN", "nan", "None", "<NA>",
];

#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: u8,
    /// Columns kept as text regardless of their content.
    pub text_columns: Vec<String>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            text_columns: Vec::new(),
        }
    }
}

pub fn read_path(path: &Path, options: &CsvOptions) -> Result<RecordSet> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    read(file, options).with_context(|| format!("Failed to read {}", path.display()))
}

pub fn read<R: Read>(input: R, options: &CsvOptions) -> Result<RecordSet> {
    let mut reader = ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(input);

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read header row")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        bail!("missing header row");
    }

    let mut cells: Vec<Vec<Option<String>>> = Vec::new();
    let mut record = StringRecord::new();
    while reader.read_record(&mut record)? {
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        if record.len() > headers.len() {
            bail!(
                "line {}: expected {} fields, found {}",
                line,
                headers.len(),
                record.len()
            );
        }
        let mut row: Vec<Option<String>> = record.iter().map(parse_cell).collect();
        row.resize(headers.len(), None);
        cells.push(row);
    }

    let kinds: Vec<ColumnKind> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| {
            if options.text_columns.iter().any(|c| c == name) {
                ColumnKind::Text
            } else {
                infer(cells.iter().filter_map(|row| row[i].as_deref()))
            }
        })
        .collect();

    let rows = cells
        .into_iter()
        .map(|row| {
            row.into_iter()
                .zip(&kinds)
                .map(|(cell, kind)| match cell {
                    None => Value::Null,
                    Some(text) => kind.convert(text),
                })
                .collect()
        })
        .collect();

    RecordSet::from_rows(headers, rows)
}

fn parse_cell(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if NULL_MARKERS.contains(&trimmed) {
        None
    } else {
        Some(raw.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Float,
    Bool,
    Text,
}

impl ColumnKind {
    fn convert(&self, text: String) -> Value {
        let trimmed = text.trim();
        let parsed = match self {
            ColumnKind::Int => trimmed.parse().ok().map(Value::Int),
            ColumnKind::Float => trimmed.parse().ok().map(Value::Float),
            ColumnKind::Bool => parse_bool(trimmed).map(Value::Bool),
            ColumnKind::Text => None,
        };
        parsed.unwrap_or(Value::Text(text))
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" | "True" | "TRUE" => Some(true),
        "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

/// Narrowest kind every cell parses as. An all-null column is text.
fn infer<'a>(cells: impl Iterator<Item = &'a str> + Clone) -> ColumnKind {
    let mut cells = cells.map(str::trim).peekable();
    if cells.peek().is_none() {
        return ColumnKind::Text;
    }
    let all = |pred: fn(&str) -> bool| cells.clone().all(pred);
    if all(|s| s.parse::<i64>().is_ok()) {
        ColumnKind::Int
    } else if all(|s| s.parse::<f64>().is_ok()) {
        ColumnKind::Float
    } else if all(|s| parse_bool(s).is_some()) {
        ColumnKind::Bool
    } else {
        ColumnKind::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> RecordSet {
        read(input.as_bytes(), &CsvOptions::default()).unwrap()
    }

    #[test]
    fn infers_column_types() {
        let set = parse(
            "customer_id,Active,age,score,club_member_status,fn\n\
             a1,1.0,31,0.5,ACTIVE,true\n\
             a2,,NA,2,PRE-CREATE,False\n",
        );
        let first = set.record(0).unwrap();
        assert_eq!(first.get("customer_id"), Some(&Value::Text("a1".into())));
        assert_eq!(first.get("Active"), Some(&Value::Float(1.0)));
        assert_eq!(first.get("age"), Some(&Value::Int(31)));
        assert_eq!(first.get("score"), Some(&Value::Float(0.5)));
        assert_eq!(first.get("fn"), Some(&Value::Bool(true)));

        let second = set.record(1).unwrap();
        assert_eq!(second.get("Active"), Some(&Value::Null));
        assert_eq!(second.get("age"), Some(&Value::Null));
        // an integer cell in a float column stays a float
        assert_eq!(second.get("score"), Some(&Value::Float(2.0)));
        assert_eq!(second.get("fn"), Some(&Value::Bool(false)));
    }

    #[test]
    fn text_columns_skip_inference() {
        let options = CsvOptions {
            text_columns: vec!["article_id".into()],
            ..Default::default()
        };
        let set = read("article_id,price\n0108775015,1\n".as_bytes(), &options).unwrap();
        let row = set.record(0).unwrap();
        assert_eq!(row.get("article_id"), Some(&Value::Text("0108775015".into())));
        assert_eq!(row.get("price"), Some(&Value::Int(1)));
    }

    #[test]
    fn mixed_column_falls_back_to_text() {
        let set = parse("code\n12\nabc\n");
        assert_eq!(set.record(0).unwrap().get("code"), Some(&Value::Text("12".into())));
    }

    #[test]
    fn short_rows_are_padded_long_rows_fail() {
        let set = parse("a,b,c\n1,2\n");
        assert_eq!(set.record(0).unwrap().get("c"), Some(&Value::Null));

        let err = read("a,b\n1,2\n1,2,3\n".as_bytes(), &CsvOptions::default())
            .unwrap_err()
            .to_string();
        assert!(err.contains("line 3"), "{}", err);
    }

    #[test]
    fn custom_delimiter_and_quotes() {
        let options = CsvOptions {
            delimiter: b';',
            ..Default::default()
        };
        let set = read("name;desc\nx;\"a; b\"\n".as_bytes(), &options).unwrap();
        assert_eq!(
            set.record(0).unwrap().get("desc"),
            Some(&Value::Text("a; b".into()))
        );
    }

    #[test]
    fn header_only_file_is_empty() {
        let set = parse("a,b\n");
        assert!(set.is_empty());
        assert_eq!(set.columns().len(), 2);
    }
}
