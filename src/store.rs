//! Record store: one raw table per fetched record file.
//!
//! Tables are keyed by file stem (everything before the first `.`), which
//! for files written by [`crate::pubmed`] is `<sanitized-query-id>_PubMed`.

use crate::error::{PubmetaError, Result};
use crate::record::RecordTable;
use std::path::Path;
use tracing::{info, warn};

/// Record file extension
pub const RECORD_EXTENSION: &str = "jsonl";

/// Named raw tables in load order
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    tables: Vec<(String, RecordTable)>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.jsonl` file in `dir`, sorted by file name.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == RECORD_EXTENSION))
            .collect();
        paths.sort();

        let mut store = Self::new();
        for path in paths {
            let Some(key) = table_key(&path) else {
                warn!(path = ?path, "Skipping record file with unusable name");
                continue;
            };
            let table = RecordTable::from_jsonl_path(&path)?;
            store.insert(key, table);
        }

        info!(dir = ?dir, tables = store.len(), "Loaded record tables");
        Ok(store)
    }

    /// Insert or replace a table, keeping the original position on replace
    pub fn insert(&mut self, key: impl Into<String>, table: RecordTable) {
        let key = key.into();
        match self.tables.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = table,
            None => self.tables.push((key, table)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&RecordTable> {
        self.tables.iter().find(|(k, _)| k == key).map(|(_, t)| t)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Concatenate every table whose key contains `term`, case-insensitively.
    ///
    /// Rows without a query label are labelled with `term`, so several
    /// selections can be concatenated and still be told apart by
    /// [`crate::aggregate::count_per_year`].
    pub fn select_by_term(&self, term: &str) -> Result<RecordTable> {
        let needle = term.to_lowercase();
        let matching: Vec<&RecordTable> = self
            .tables
            .iter()
            .filter(|(key, _)| key.to_lowercase().contains(&needle))
            .map(|(_, table)| table)
            .collect();

        if matching.is_empty() {
            let e = PubmetaError::NoMatchingTables(term.to_string());
            warn!(error = %e, "No tables selected");
            return Err(e);
        }

        let rows = RecordTable::concat(matching).into_rows().into_iter().map(|mut row| {
            if row.query.is_none() {
                row.query = Some(term.to_string());
            }
            row
        });
        let selected: RecordTable = rows.collect();
        info!(term = term, rows = selected.len(), "Selected tables by term");
        Ok(selected)
    }
}

fn table_key(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let key = name.split('.').next()?;
    (!key.is_empty()).then(|| key.to_string())
}
