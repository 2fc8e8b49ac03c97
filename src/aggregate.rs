//! Aggregation over normalized record tables.
//!
//! Per-year counts by query label, boolean membership columns, and
//! intersections over those columns.

use crate::error::{PubmetaError, Result};
use crate::record::RecordTable;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{info, warn};

/// Row key of a [`CountTable`]: a publication year or the synthetic total
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum YearKey {
    Year(i32),
    Total,
}

impl fmt::Display for YearKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            YearKey::Year(y) => write!(f, "{}", y),
            YearKey::Total => f.write_str("Total"),
        }
    }
}

/// Year x label paper counts, years ascending, then a `Total` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountTable {
    labels: Vec<String>,
    rows: Vec<(YearKey, Vec<u64>)>,
}

impl CountTable {
    /// Query labels (column order), sorted
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// All rows including the trailing `Total`
    pub fn rows(&self) -> &[(YearKey, Vec<u64>)] {
        &self.rows
    }

    /// Per-year rows only, the series a line plot draws
    pub fn series(&self) -> impl Iterator<Item = (i32, &[u64])> {
        self.rows.iter().filter_map(|(key, counts)| match key {
            YearKey::Year(y) => Some((*y, counts.as_slice())),
            YearKey::Total => None,
        })
    }

    /// Count for one cell; unknown years or labels are 0
    pub fn get(&self, key: YearKey, label: &str) -> u64 {
        let Some(col) = self.labels.iter().position(|l| l == label) else {
            return 0;
        };
        self.rows
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, counts)| counts[col])
            .unwrap_or(0)
    }

    pub fn total(&self, label: &str) -> u64 {
        self.get(YearKey::Total, label)
    }
}

impl fmt::Display for CountTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.labels.iter().map(|l| l.len()).max().unwrap_or(0).max(6);
        write!(f, "{:<6}", "year")?;
        for label in &self.labels {
            write!(f, "  {:>width$}", label, width = width)?;
        }
        writeln!(f)?;
        for (key, counts) in &self.rows {
            write!(f, "{:<6}", key.to_string())?;
            for count in counts {
                write!(f, "  {:>width$}", count, width = width)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Count rows per `(year, query label)` and append the column-wise `Total`.
///
/// Rows lacking a year or a label are not counted.
pub fn count_per_year(table: &RecordTable) -> CountTable {
    let mut groups: BTreeMap<i32, BTreeMap<&str, u64>> = BTreeMap::new();
    let mut labels: BTreeSet<&str> = BTreeSet::new();

    for row in table {
        let (Some(year), Some(label)) = (row.year, row.query.as_deref()) else {
            continue;
        };
        *groups.entry(year).or_default().entry(label).or_insert(0) += 1;
        labels.insert(label);
    }

    let labels: Vec<String> = labels.into_iter().map(str::to_string).collect();
    let mut totals = vec![0u64; labels.len()];
    let mut rows = Vec::with_capacity(groups.len() + 1);

    for (year, by_label) in groups {
        let counts: Vec<u64> = labels
            .iter()
            .map(|l| by_label.get(l.as_str()).copied().unwrap_or(0))
            .collect();
        for (total, count) in totals.iter_mut().zip(&counts) {
            *total += count;
        }
        rows.push((YearKey::Year(year), counts));
    }
    rows.push((YearKey::Total, totals));

    info!(years = rows.len() - 1, labels = labels.len(), "Counted papers per year");
    CountTable { labels, rows }
}

/// Column name for a term: spaces become underscores
pub fn column_name(term: &str) -> String {
    term.replace(' ', "_")
}

/// Rows whose title contains `phrase`, case-insensitively.
///
/// `phrase` is matched literally; rows without a title never match.
pub fn search_phrase(table: &RecordTable, phrase: &str) -> RecordTable {
    let needle = phrase.to_lowercase();
    let hits = table.filter(|row| {
        row.title
            .as_deref()
            .is_some_and(|t| t.to_lowercase().contains(needle.as_str()))
    });
    info!(phrase = %phrase, rows = hits.len(), "Searched titles");
    hits
}

/// Copy of `table` with one boolean column per term.
///
/// A row's column is true when the term occurs, case-insensitively, in its
/// title or abstract.
pub fn annotate_terms<S: AsRef<str>>(table: &RecordTable, terms: &[S]) -> RecordTable {
    let needles: Vec<(String, String)> = terms
        .iter()
        .map(|t| (column_name(t.as_ref()), t.as_ref().to_lowercase()))
        .collect();

    table
        .iter()
        .map(|row| {
            let mut row = row.clone();
            let title = row.title.as_deref().unwrap_or("").to_lowercase();
            let abstract_text = row.abstract_text.as_deref().unwrap_or("").to_lowercase();
            for (column, needle) in &needles {
                let hit = title.contains(needle.as_str()) || abstract_text.contains(needle.as_str());
                row.set_flag(column, hit);
            }
            row
        })
        .collect()
}

/// Rows where every requested term's boolean column is true.
///
/// Terms without a matching column are dropped. When none remain the result
/// is `NoIntersectionColumns`, and the caller can fall back to an empty table.
pub fn find_intersection<S: AsRef<str>>(table: &RecordTable, terms: &[S]) -> Result<RecordTable> {
    let columns: Vec<String> = terms
        .iter()
        .map(|t| column_name(t.as_ref()))
        .filter(|c| table.has_column(c))
        .collect();

    if columns.is_empty() {
        let e = PubmetaError::NoIntersectionColumns(
            terms.iter().map(|t| t.as_ref().to_string()).collect(),
        );
        warn!(error = %e, "No intersection columns found in table");
        return Err(e);
    }

    let result = table.filter(|row| columns.iter().all(|c| row.flag(c)));
    info!(columns = ?columns, rows = result.len(), "Computed intersection");
    Ok(result)
}
