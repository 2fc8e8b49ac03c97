//! # pubmeta
//!
//! PubMed Meta-Analysis Pipeline - dated query generation, record
//! normalization and per-year aggregation.
//!
//! ## Modules
//!
//! - [`terms`] - Term index (label -> clause-groups)
//! - [`query`] - Year-partitioned boolean query generation
//! - [`pubmed`] - E-utilities fetch step and record file naming
//! - [`record`] - Record rows and JSONL tables
//! - [`store`] - Raw tables keyed by record file name
//! - [`normalize`] - Deduplication, backfill and year filtering
//! - [`aggregate`] - Per-year counts and term intersections
//! - [`report`] - CSV export
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pubmeta::{aggregate, normalize, query::QueryGenerator, store::RecordStore, terms::TermIndex};
//!
//! fn main() -> pubmeta::Result<()> {
//!     let terms = TermIndex::from_json(r#"{"cancer": [["cancer", "neoplasm"]]}"#)?;
//!     let mut generator = QueryGenerator::new(terms);
//!     generator.generate_queries(2010, 2020, 2)?;
//!     for s in generator.generate_search_strings()? {
//!         println!("{}: {}", s.id, s.expression);
//!     }
//!
//!     let store = RecordStore::load("json_files".as_ref())?;
//!     let cleaned = normalize::clean(&store.select_by_term("cancer")?);
//!     println!("{}", aggregate::count_per_year(&cleaned));
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod error;
pub mod normalize;
pub mod pubmed;
pub mod query;
pub mod record;
pub mod report;
pub mod store;
pub mod terms;

pub use error::{PubmetaError, Result};
