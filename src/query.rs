//! Dated boolean query generation for PubMed.
//!
//! A [`QueryGenerator`] expands every label of a [`TermIndex`] over a year
//! range cut into sub-ranges of `increment` years. Each sub-range gets its own
//! query with a `[dp]` (date of publication) clause, which keeps individual
//! result sets under the fetch service's 10,000 record ceiling.
//!
//! The lifecycle is explicit: `generate_queries` stores the query set on the
//! generator, `generate_search_strings` renders it, and the fetch step in
//! [`crate::pubmed`] consumes the rendered strings.

use crate::error::{PubmetaError, Result};
use crate::terms::{ClauseGroup, TermGroup, TermIndex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Year range sliced into sub-ranges of `increment` years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearPartition {
    pub start: i32,
    pub end: i32,
    pub increment: i32,
}

impl YearPartition {
    /// Validate a partition. Range is checked before increment.
    pub fn new(start: i32, end: i32, increment: i32) -> Result<Self> {
        if start > end {
            return Err(PubmetaError::InvalidRange { start, end });
        }
        if increment <= 0 {
            return Err(PubmetaError::InvalidIncrement(increment));
        }
        Ok(Self {
            start,
            end,
            increment,
        })
    }

    /// Parse untyped arguments (CLI flags, request fields) into a partition.
    pub fn parse(start: &str, end: &str, increment: &str) -> Result<Self> {
        let start = parse_int("start_year", start)?;
        let end = parse_int("end_year", end)?;
        let increment = parse_int("increment", increment)?;
        Self::new(start, end, increment)
    }

    /// Inclusive `(first, last)` year pairs.
    ///
    /// Sub-range starts run over the half-open interval `[start, end)`, so
    /// `end` itself never opens a sub-range. A single-year partition
    /// (`start == end`) would otherwise be empty and yields the one
    /// sub-range starting at `start`.
    pub fn sub_ranges(&self) -> Vec<(i32, i32)> {
        let span = self.increment - 1;
        if self.start == self.end {
            return vec![(self.start, self.start.saturating_add(span))];
        }
        (self.start..self.end)
            .step_by(self.increment as usize)
            .map(|s| (s, s.saturating_add(span)))
            .collect()
    }
}

fn parse_int(name: &'static str, value: &str) -> Result<i32> {
    value
        .trim()
        .parse::<i32>()
        .map_err(|_| PubmetaError::InvalidArgumentType {
            name,
            value: value.to_string(),
        })
}

/// One dated search for one label. Never mutated after generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// `{label}_{first}_{last}`, or `{label}_{year}` for yearly partitions
    pub id: String,
    pub label: String,
    pub first_year: i32,
    pub last_year: i32,
    /// Term clause-groups copied from the index
    pub clauses: Vec<ClauseGroup>,
    /// Quoted `"<first>:<last>[dp]"` restriction
    pub date_clause: String,
}

impl SearchQuery {
    fn new(label: &str, clauses: &[ClauseGroup], first: i32, last: i32, yearly: bool) -> Self {
        let id = if yearly {
            format!("{}_{}", label, first)
        } else {
            format!("{}_{}_{}", label, first, last)
        };
        Self {
            id,
            label: label.to_string(),
            first_year: first,
            last_year: last,
            clauses: clauses.to_vec(),
            date_clause: format!("\"{}:{}[dp]\"", first, last),
        }
    }

    /// Render as `(a OR b) AND (c) AND ("2020:2020[dp]")`.
    pub fn render(&self) -> String {
        self.clauses
            .iter()
            .map(|group| format!("({})", group.join(" OR ")))
            .chain(std::iter::once(format!("({})", self.date_clause)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

/// A rendered query ready for the fetch step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchString {
    pub id: String,
    pub expression: String,
}

/// Owns the term index and the most recently generated query set.
#[derive(Debug, Clone, Default)]
pub struct QueryGenerator {
    terms: TermIndex,
    queries: Vec<SearchQuery>,
}

impl QueryGenerator {
    pub fn new(terms: TermIndex) -> Self {
        Self {
            terms,
            queries: Vec::new(),
        }
    }

    pub fn terms(&self) -> &TermIndex {
        &self.terms
    }

    /// Queries from the last successful generation, in year-then-label order
    pub fn queries(&self) -> &[SearchQuery] {
        &self.queries
    }

    pub fn query(&self, id: &str) -> Option<&SearchQuery> {
        self.queries.iter().find(|q| q.id == id)
    }

    /// Generate queries for `[start_year, end_year]` in steps of `increment`.
    ///
    /// Replaces the stored query set. On invalid input the error is logged,
    /// the stored set is left empty and the error is returned.
    pub fn generate_queries(
        &mut self,
        start_year: i32,
        end_year: i32,
        increment: i32,
    ) -> Result<&[SearchQuery]> {
        match YearPartition::new(start_year, end_year, increment) {
            Ok(partition) => Ok(self.generate_partition(&partition)),
            Err(e) => {
                warn!(error = %e, "An error occurred while generating queries");
                self.queries.clear();
                Err(e)
            }
        }
    }

    /// Generate from untyped arguments, reporting `InvalidArgumentType` the same way.
    pub fn generate_queries_from_args(
        &mut self,
        start_year: &str,
        end_year: &str,
        increment: &str,
    ) -> Result<&[SearchQuery]> {
        match YearPartition::parse(start_year, end_year, increment) {
            Ok(partition) => Ok(self.generate_partition(&partition)),
            Err(e) => {
                warn!(error = %e, "An error occurred while generating queries");
                self.queries.clear();
                Err(e)
            }
        }
    }

    /// Generate from an already validated partition.
    ///
    /// Labels without clause-groups, or with an empty clause-group, are
    /// skipped with a warning instead of rendering a date-only query.
    pub fn generate_partition(&mut self, partition: &YearPartition) -> &[SearchQuery] {
        let yearly = partition.increment == 1;
        let mut queries = Vec::new();

        let groups: Vec<&TermGroup> = self
            .terms
            .iter()
            .filter(|group| {
                let ok = group.is_well_formed();
                if !ok {
                    warn!(label = %group.label, "Skipping label with empty clause-groups");
                }
                ok
            })
            .collect();

        for (first, last) in partition.sub_ranges() {
            for group in &groups {
                let query = SearchQuery::new(&group.label, &group.clauses, first, last, yearly);
                debug!(id = %query.id, "Generated query");
                queries.push(query);
            }
        }

        info!(
            start = partition.start,
            end = partition.end,
            increment = partition.increment,
            count = queries.len(),
            "Generated queries"
        );
        self.queries = queries;
        &self.queries
    }

    /// Render every stored query into its boolean search string.
    pub fn generate_search_strings(&self) -> Result<Vec<SearchString>> {
        if self.queries.is_empty() {
            let e = PubmetaError::NoQueriesGenerated;
            warn!(error = %e, "An error occurred while generating search strings");
            return Err(e);
        }

        Ok(self
            .queries
            .iter()
            .map(|q| SearchString {
                id: q.id.clone(),
                expression: q.render(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn cancer_index() -> TermIndex {
        TermIndex::new(vec![(
            "cancer",
            vec![vec!["cancer".to_string(), "neoplasm".to_string()]],
        )])
    }

    fn two_label_index() -> TermIndex {
        TermIndex::new(vec![
            ("cancer", vec![vec!["cancer".to_string()]]),
            (
                "vascular",
                vec![
                    vec!["vessel".to_string(), "vascular".to_string()],
                    vec!["human".to_string()],
                ],
            ),
        ])
    }

    #[test]
    fn test_single_year_rendering() {
        let mut generator = QueryGenerator::new(cancer_index());
        let queries = generator.generate_queries(2020, 2020, 1).expect("Generation failed");
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].id, "cancer_2020");

        let strings = generator.generate_search_strings().expect("Render failed");
        assert_eq!(strings.len(), 1);
        assert_eq!(strings[0].id, "cancer_2020");
        assert_eq!(
            strings[0].expression,
            "(cancer OR neoplasm) AND (\"2020:2020[dp]\")"
        );
    }

    #[test]
    fn test_end_year_excluded_as_start() {
        let mut generator = QueryGenerator::new(cancer_index());
        let queries = generator.generate_queries(2020, 2022, 2).expect("Generation failed");
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].id, "cancer_2020_2021");
        assert_eq!(queries[0].date_clause, "\"2020:2021[dp]\"");
    }

    #[test]
    fn test_yearly_excludes_end_year() {
        let mut generator = QueryGenerator::new(cancer_index());
        let ids: Vec<String> = generator
            .generate_queries(2018, 2021, 1)
            .expect("Generation failed")
            .iter()
            .map(|q| q.id.clone())
            .collect();
        assert_eq!(ids, vec!["cancer_2018", "cancer_2019", "cancer_2020"]);
    }

    #[test]
    fn test_last_sub_range_may_overhang() {
        let partition = YearPartition::new(2000, 2010, 4).expect("Valid partition");
        assert_eq!(
            partition.sub_ranges(),
            vec![(2000, 2003), (2004, 2007), (2008, 2011)]
        );
    }

    #[test]
    fn test_sub_range_count_and_unique_ids() {
        let index = two_label_index();
        for (start, end, increment) in [(2000, 2010, 1), (2000, 2010, 3), (1990, 2024, 5), (2001, 2002, 7)] {
            let mut generator = QueryGenerator::new(index.clone());
            let queries = generator
                .generate_queries(start, end, increment)
                .expect("Generation failed");

            let span = end - start;
            let expected_ranges = ((span + increment - 1) / increment) as usize;
            assert_eq!(queries.len(), expected_ranges * index.len());

            let ids: HashSet<&str> = queries.iter().map(|q| q.id.as_str()).collect();
            assert_eq!(ids.len(), queries.len());
        }
    }

    #[test]
    fn test_multiple_clause_groups_anded() {
        let mut generator = QueryGenerator::new(two_label_index());
        generator.generate_queries(2015, 2016, 1).expect("Generation failed");
        let strings = generator.generate_search_strings().expect("Render failed");
        assert_eq!(strings[0].id, "cancer_2015");
        assert_eq!(strings[1].id, "vascular_2015");
        assert_eq!(
            strings[1].expression,
            "(vessel OR vascular) AND (human) AND (\"2015:2015[dp]\")"
        );
    }

    #[test]
    fn test_invalid_range_leaves_empty_set() {
        let mut generator = QueryGenerator::new(cancer_index());
        generator.generate_queries(2000, 2005, 1).expect("Generation failed");

        let err = generator.generate_queries(2021, 2020, 1).expect_err("Expected an error");
        assert!(matches!(err, PubmetaError::InvalidRange { start: 2021, end: 2020 }));
        assert!(generator.queries().is_empty());
    }

    #[test]
    fn test_invalid_increment() {
        let mut generator = QueryGenerator::new(cancer_index());
        for increment in [0, -3] {
            let err = generator.generate_queries(2000, 2005, increment).expect_err("Expected an error");
            assert!(matches!(err, PubmetaError::InvalidIncrement(i) if i == increment));
            assert!(generator.queries().is_empty());
        }
    }

    #[test]
    fn test_invalid_argument_type() {
        let mut generator = QueryGenerator::new(cancer_index());
        let err = generator
            .generate_queries_from_args("2020", "twenty", "1")
            .expect_err("Expected an error");
        assert!(matches!(err, PubmetaError::InvalidArgumentType { name: "end_year", .. }));
        assert!(generator.queries().is_empty());

        let queries = generator
            .generate_queries_from_args(" 2020", "2022", "2")
            .expect("Generation failed");
        assert_eq!(queries.len(), 1);
    }

    #[test]
    fn test_malformed_labels_skipped() {
        let index = TermIndex::new(vec![
            ("empty_group", vec![vec![]]),
            ("no_groups", vec![]),
            ("cancer", vec![vec!["cancer".to_string()]]),
        ]);
        let mut generator = QueryGenerator::new(index);
        let ids: Vec<String> = generator
            .generate_queries(2020, 2020, 1)
            .expect("Generation failed")
            .iter()
            .map(|q| q.id.clone())
            .collect();
        assert_eq!(ids, vec!["cancer_2020"]);

        let strings = generator.generate_search_strings().expect("Render failed");
        assert_eq!(strings[0].expression, "(cancer) AND (\"2020:2020[dp]\")");
    }

    #[test]
    fn test_only_malformed_labels() {
        let index = TermIndex::new(vec![("x", vec![vec![]]), ("y", vec![])]);
        let mut generator = QueryGenerator::new(index);
        let queries = generator.generate_queries(2020, 2020, 1).expect("Generation failed");
        assert!(queries.is_empty());

        let err = generator.generate_search_strings().expect_err("Expected an error");
        assert!(matches!(err, PubmetaError::NoQueriesGenerated));
    }

    #[test]
    fn test_render_before_generate() {
        let generator = QueryGenerator::new(cancer_index());
        let err = generator.generate_search_strings().expect_err("Expected an error");
        assert!(matches!(err, PubmetaError::NoQueriesGenerated));
    }

    #[test]
    fn test_regeneration_replaces_and_is_deterministic() {
        let mut generator = QueryGenerator::new(two_label_index());
        let first = generator.generate_queries(2000, 2004, 2).expect("Generation failed").to_vec();
        generator.generate_queries(2010, 2012, 1).expect("Generation failed");
        assert!(generator.query("cancer_2000_2001").is_none());

        let again = generator.generate_queries(2000, 2004, 2).expect("Generation failed");
        assert_eq!(first, again);
    }
}
