//! CSV export for aggregation results.
//!
//! Count tables and normalized record tables are written as plain CSV, the
//! input the plotting side consumes.

use crate::aggregate::CountTable;
use crate::error::Result;
use crate::record::{RecordTable, RECORD_COLUMNS};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Write a count table: a `year` column, one column per label, `Total` last.
pub fn write_counts<W: Write>(counts: &CountTable, writer: W) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(writer);

    let mut header = vec!["year".to_string()];
    header.extend(counts.labels().iter().cloned());
    wtr.write_record(&header)?;

    for (key, row) in counts.rows() {
        let mut record = vec![key.to_string()];
        record.extend(row.iter().map(|c| c.to_string()));
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Write a record table with the typed columns followed by every extra column.
///
/// Missing cells are empty, nested values are written as JSON.
pub fn write_records<W: Write>(table: &RecordTable, writer: W) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    let extras = table.extra_columns();

    let mut header: Vec<&str> = RECORD_COLUMNS.to_vec();
    header.extend(extras.iter().map(String::as_str));
    wtr.write_record(&header)?;

    for row in table {
        let mut record = vec![
            row.title.clone().unwrap_or_default(),
            row.abstract_text.clone().unwrap_or_default(),
            row.doi.clone().unwrap_or_default(),
            row.journal.clone().unwrap_or_default(),
            row.date.clone().unwrap_or_default(),
            row.year.map(|y| y.to_string()).unwrap_or_default(),
            row.query.clone().unwrap_or_default(),
        ];
        for column in &extras {
            record.push(match row.extra.get(column) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            });
        }
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Save a count table to a CSV file
pub fn save_counts(path: &Path, counts: &CountTable) -> Result<()> {
    write_counts(counts, std::fs::File::create(path)?)?;
    info!(path = ?path, "Saved count table");
    Ok(())
}

/// Save a record table to a CSV file
pub fn save_records(path: &Path, table: &RecordTable) -> Result<()> {
    write_records(table, std::fs::File::create(path)?)?;
    info!(path = ?path, rows = table.len(), "Saved records");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::count_per_year;
    use crate::record::Record;

    fn table() -> RecordTable {
        let mut first = Record {
            title: Some("Vessels, and more".to_string()),
            year: Some(2020),
            query: Some("vascular".to_string()),
            ..Default::default()
        };
        first.set_flag("angiogenesis", true);
        first.extra.insert("authors".to_string(), serde_json::json!(["A", "B"]));

        let second = Record {
            title: Some("Tumours".to_string()),
            year: Some(2021),
            query: Some("cancer".to_string()),
            ..Default::default()
        };
        RecordTable::new(vec![first, second])
    }

    #[test]
    fn test_write_counts() -> Result<()> {
        let mut buf = Vec::new();
        write_counts(&count_per_year(&table()), &mut buf)?;
        let text = String::from_utf8_lossy(&buf);
        assert_eq!(text, "year,cancer,vascular\n2020,0,1\n2021,1,0\nTotal,1,1\n");
        Ok(())
    }

    #[test]
    fn test_write_records() -> Result<()> {
        let mut buf = Vec::new();
        write_records(&table(), &mut buf)?;
        let text = String::from_utf8_lossy(&buf);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "title,abstract,doi,journal,date,year,query,angiogenesis,authors");
        assert_eq!(
            lines[1],
            r#""Vessels, and more",,,,,2020,vascular,true,"[""A"",""B""]""#
        );
        assert_eq!(lines[2], "Tumours,,,,,2021,cancer,,");
        Ok(())
    }

    #[test]
    fn test_save_counts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("counts.csv");
        save_counts(&path, &count_per_year(&table()))?;
        assert!(std::fs::read_to_string(&path)?.starts_with("year,"));
        Ok(())
    }
}
