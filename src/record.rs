//! Bibliographic record rows and in-memory record tables.
//!
//! Record files are line-delimited JSON, one paper per line. The well-known
//! fields get typed slots; anything else (authors, keywords, boolean
//! membership columns, ...) is kept verbatim in `extra`.

use crate::error::{PubmetaError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// A single bibliographic record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub journal: Option<String>,
    /// Publication date, ISO `YYYY-MM-DD` or partial
    #[serde(default, deserialize_with = "deserialize_date")]
    pub date: Option<String>,
    /// Calendar year, set by normalization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// Query label the record was retrieved under
    #[serde(default, alias = "Query", skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Accept ISO strings as-is and epoch milliseconds (pandas' JSON default) as dates.
fn deserialize_date<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|dt| dt.format("%Y-%m-%d").to_string()),
        _ => None,
    })
}

impl Record {
    /// True when `column` holds the JSON boolean `true`
    pub fn flag(&self, column: &str) -> bool {
        matches!(self.extra.get(column), Some(Value::Bool(true)))
    }

    pub fn set_flag(&mut self, column: &str, value: bool) {
        self.extra.insert(column.to_string(), Value::Bool(value));
    }
}

/// Typed column names, in export order
pub const RECORD_COLUMNS: &[&str] = &["title", "abstract", "doi", "journal", "date", "year", "query"];

/// An ordered collection of records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordTable {
    rows: Vec<Record>,
}

impl RecordTable {
    pub fn new(rows: Vec<Record>) -> Self {
        Self { rows }
    }

    /// Read line-delimited JSON. Blank lines are skipped.
    pub fn read_jsonl<R: BufRead>(reader: R) -> Result<Self> {
        let mut rows = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: Record = serde_json::from_str(&line).map_err(|e| {
                PubmetaError::Parse(format!("line {}: {}", idx + 1, e))
            })?;
            rows.push(record);
        }
        Ok(Self { rows })
    }

    pub fn from_jsonl_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let table = Self::read_jsonl(BufReader::new(file))?;
        debug!(path = ?path, rows = table.len(), "Read record file");
        Ok(table)
    }

    pub fn write_jsonl<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = BufWriter::new(writer);
        for record in &self.rows {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Concatenate tables, preserving table order then row order
    pub fn concat<'a, I>(tables: I) -> Self
    where
        I: IntoIterator<Item = &'a RecordTable>,
    {
        Self {
            rows: tables
                .into_iter()
                .flat_map(|t| t.rows.iter().cloned())
                .collect(),
        }
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.rows.iter()
    }

    pub fn into_rows(self) -> Vec<Record> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether any row carries `column` among its extras.
    ///
    /// Typed fields are not extra columns and never hold a flag.
    pub fn has_column(&self, column: &str) -> bool {
        self.rows.iter().any(|r| r.extra.contains_key(column))
    }

    /// Extra (untyped) column names across all rows, sorted
    pub fn extra_columns(&self) -> Vec<String> {
        self.rows
            .iter()
            .flat_map(|r| r.extra.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Keep rows matching `predicate`, cloning them into a new table
    pub fn filter<F>(&self, mut predicate: F) -> Self
    where
        F: FnMut(&Record) -> bool,
    {
        Self {
            rows: self.rows.iter().filter(|r| predicate(r)).cloned().collect(),
        }
    }
}

impl FromIterator<Record> for RecordTable {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a RecordTable {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
