//! Record normalization: deduplicate, backfill, derive year, filter.
//!
//! [`clean`] never touches its input. The normalized table is a fresh copy,
//! so one raw selection can feed several analyses.

use crate::error::{PubmetaError, Result};
use crate::record::{Record, RecordTable};
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, error, info};

/// Placeholder for missing abstract, DOI and journal
pub const NOT_AVAILABLE: &str = "Not Available";

/// Records published before this year are dropped
pub const MIN_YEAR: i32 = 2000;

const LEADING_YEAR_PATTERN: &str = r"^\s*(\d{4})\b";

static LEADING_YEAR: LazyLock<Option<Regex>> = LazyLock::new(|| {
    leading_year_regex()
        .inspect_err(|e| error!(error = %e, "Year fallback disabled"))
        .ok()
});

fn leading_year_regex() -> Result<Regex> {
    Regex::new(LEADING_YEAR_PATTERN)
        .map_err(|e| PubmetaError::Parse(format!("Invalid year pattern: {}", e)))
}

/// Produce the normalized table.
///
/// 1. keep the first row per title (a missing title counts as one title)
/// 2. fill `abstract`, `doi` and `journal` with [`NOT_AVAILABLE`]
/// 3. derive `year` from `date`
/// 4. keep rows with `year >= MIN_YEAR`; rows without a parseable date go too
pub fn clean(table: &RecordTable) -> RecordTable {
    let mut seen: HashSet<Option<&str>> = HashSet::with_capacity(table.len());
    let mut duplicates = 0usize;
    let mut too_old = 0usize;

    let cleaned: RecordTable = table
        .iter()
        .filter(|row| {
            let first = seen.insert(row.title.as_deref());
            if !first {
                duplicates += 1;
            }
            first
        })
        .map(backfill)
        .filter(|row| {
            let keep = row.year.is_some_and(|y| y >= MIN_YEAR);
            if !keep {
                too_old += 1;
            }
            keep
        })
        .collect();

    info!(
        input = table.len(),
        output = cleaned.len(),
        duplicates = duplicates,
        dropped_by_year = too_old,
        "Cleaned record table"
    );
    cleaned
}

fn backfill(row: &Record) -> Record {
    let mut row = row.clone();
    for field in [&mut row.abstract_text, &mut row.doi, &mut row.journal] {
        if field.is_none() {
            *field = Some(NOT_AVAILABLE.to_string());
        }
    }
    row.year = row.date.as_deref().and_then(year_of);
    if row.year.is_none() {
        debug!(title = ?row.title, date = ?row.date, "No year derivable from date");
    }
    row
}

/// Calendar year of an ISO date, a datetime, or any string starting with a year
pub fn year_of(date: &str) -> Option<i32> {
    let date = date.trim();
    if let Some(day) = date.get(..10) {
        if let Ok(parsed) = NaiveDate::parse_from_str(day, "%Y-%m-%d") {
            return Some(parsed.year());
        }
    }
    LEADING_YEAR
        .as_ref()?
        .captures(date)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: Option<&str>, date: Option<&str>) -> Record {
        Record {
            title: title.map(str::to_string),
            date: date.map(str::to_string),
            ..Default::default()
        }
    }

    fn fixture() -> RecordTable {
        let mut with_fields = record(Some("Keep me"), Some("2012-05-01"));
        with_fields.doi = Some("10.1/x".to_string());
        with_fields.journal = Some("Cell".to_string());

        RecordTable::new(vec![
            with_fields,
            record(Some("Keep me"), Some("2019-01-01")),
            record(Some("Old"), Some("1998-07-12")),
            record(Some("Boundary"), Some("2000-01-01")),
            record(Some("Undated"), None),
            record(Some("PubMed style"), Some("2015 Mar 3")),
            record(None, Some("2010-01-01")),
            record(None, Some("2011-01-01")),
        ])
    }

    #[test]
    fn test_clean() {
        let cleaned = clean(&fixture());
        let titles: Vec<_> = cleaned.iter().map(|r| r.title.as_deref()).collect();
        assert_eq!(
            titles,
            vec![Some("Keep me"), Some("Boundary"), Some("PubMed style"), None]
        );

        let first = &cleaned.rows()[0];
        assert_eq!(first.year, Some(2012));
        assert_eq!(first.doi.as_deref(), Some("10.1/x"));
        assert_eq!(first.journal.as_deref(), Some("Cell"));
        assert_eq!(first.abstract_text.as_deref(), Some(NOT_AVAILABLE));

        assert_eq!(cleaned.rows()[2].year, Some(2015));
        assert_eq!(cleaned.rows()[3].year, Some(2010));
    }

    #[test]
    fn test_clean_is_idempotent() {
        let once = clean(&fixture());
        let twice = clean(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_clean_invariants() {
        let cleaned = clean(&fixture());
        let mut titles = HashSet::new();
        for row in &cleaned {
            assert!(row.year.is_some_and(|y| y >= MIN_YEAR));
            assert!(titles.insert(row.title.clone()));
            assert!(row.abstract_text.is_some());
            assert!(row.doi.is_some());
            assert!(row.journal.is_some());
        }
    }

    #[test]
    fn test_clean_leaves_input_untouched() {
        let raw = fixture();
        let before = raw.clone();
        let _ = clean(&raw);
        assert_eq!(raw, before);
    }

    #[test]
    fn test_year_of() {
        assert_eq!(year_of("2021-06-30"), Some(2021));
        assert_eq!(year_of("2021-06-30T12:00:00Z"), Some(2021));
        assert_eq!(year_of("2003 Dec"), Some(2003));
        assert_eq!(year_of("2007"), Some(2007));
        assert_eq!(year_of("unknown"), None);
        assert_eq!(year_of(""), None);
    }

    #[test]
    fn test_year_fallback_enabled() {
        assert!(leading_year_regex().is_ok());
        assert!(LEADING_YEAR.is_some());
    }
}
