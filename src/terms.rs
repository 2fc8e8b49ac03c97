//! Term index: the search vocabulary that drives query generation.
//!
//! Each label maps to an ordered list of clause-groups. Synonyms inside a
//! clause-group are ORed, clause-groups under one label are ANDed.

use crate::error::{PubmetaError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Default term index location: `<config dir>/pubmeta/terms.json`
pub fn default_terms_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|p| p.join("pubmeta").join("terms.json"))
        .ok_or_else(|| PubmetaError::Config("Cannot determine config directory".to_string()))
}

/// Synonymous search terms combined with OR
pub type ClauseGroup = Vec<String>;

/// One labelled entry of a [`TermIndex`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermGroup {
    pub label: String,
    pub clauses: Vec<ClauseGroup>,
}

impl TermGroup {
    /// At least one clause-group, and every clause-group has a non-blank term
    pub fn is_well_formed(&self) -> bool {
        !self.clauses.is_empty()
            && self
                .clauses
                .iter()
                .all(|group| group.iter().any(|term| !term.trim().is_empty()))
    }
}

/// Immutable mapping from label to clause-groups, in caller order.
///
/// Nothing is validated here; query generation skips labels that are not
/// [well formed](TermGroup::is_well_formed).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermIndex {
    groups: Vec<TermGroup>,
}

impl TermIndex {
    /// Build an index from `(label, clause-groups)` pairs.
    ///
    /// A repeated label replaces the earlier entry in place, so labels stay unique.
    pub fn new<L, I>(entries: I) -> Self
    where
        L: Into<String>,
        I: IntoIterator<Item = (L, Vec<ClauseGroup>)>,
    {
        let mut groups: Vec<TermGroup> = Vec::new();
        for (label, clauses) in entries {
            let label = label.into();
            match groups.iter_mut().find(|g| g.label == label) {
                Some(existing) => existing.clauses = clauses,
                None => groups.push(TermGroup { label, clauses }),
            }
        }
        Self { groups }
    }

    /// Parse a JSON object of the form `{"label": [["a", "b"], ["c"]]}`.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_map(serde_json::from_str(json)?)
    }

    /// Build from an already parsed JSON object
    pub fn from_map(map: serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        let mut entries = Vec::with_capacity(map.len());
        for (label, value) in map {
            let clauses: Vec<ClauseGroup> = serde_json::from_value(value)?;
            entries.push((label, clauses));
        }
        Ok(Self::new(entries))
    }

    /// Load a term index from a JSON file
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let index = Self::from_json(&content)?;
        info!(path = ?path, labels = index.len(), "Loaded term index");
        Ok(index)
    }

    pub fn get(&self, label: &str) -> Option<&[ClauseGroup]> {
        self.groups
            .iter()
            .find(|g| g.label == label)
            .map(|g| g.clauses.as_slice())
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.label.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &TermGroup> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_json_preserves_order() {
        let index = TermIndex::from_json(
            r#"{"vascular": [["vessel", "vascular"]], "cancer": [["cancer", "neoplasm"], ["human"]]}"#,
        )
        .expect("Parse failed");

        assert_eq!(index.labels().collect::<Vec<_>>(), vec!["vascular", "cancer"]);
        assert_eq!(
            index.get("cancer"),
            Some(&[strings(&["cancer", "neoplasm"]), strings(&["human"])][..])
        );
        assert!(index.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_label_replaces() {
        let index = TermIndex::new(vec![
            ("a", vec![strings(&["x"])]),
            ("b", vec![strings(&["y"])]),
            ("a", vec![strings(&["z"])]),
        ]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("a"), Some(&[strings(&["z"])][..]));
    }

    #[test]
    fn test_well_formed_groups() {
        let index = TermIndex::from_json(
            r#"{"ok": [["a", ""], ["b"]], "none": [], "empty": [["a"], []], "blank": [[" "]]}"#,
        )
        .expect("Parse failed");
        let well_formed: Vec<&str> = index
            .iter()
            .filter(|g| g.is_well_formed())
            .map(|g| g.label.as_str())
            .collect();
        assert_eq!(well_formed, vec!["ok"]);
    }

    #[test]
    fn test_from_json_rejects_non_lists() {
        assert!(TermIndex::from_json(r#"{"a": "not a list"}"#).is_err());
    }

    #[test]
    fn test_from_path() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("terms.json");
        std::fs::write(&path, r#"{"cancer": [["cancer"]]}"#)?;
        let index = TermIndex::from_path(&path)?;
        assert_eq!(index.len(), 1);
        Ok(())
    }
}
