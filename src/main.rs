//! pubmeta - PubMed Meta-Analysis Pipeline
//!
//! Generates date-partitioned PubMed queries, fetches the record files, and
//! aggregates them into per-year counts and term intersections.
//!
//! ## Usage
//!
//! ### CLI Mode
//! ```bash
//! pubmeta queries --terms terms.json --start 2000 --end 2024 --increment 2
//! pubmeta fetch --terms terms.json --start 2000 --end 2024 --output-dir ./json_files
//! pubmeta counts --dir ./json_files --term Vascular --term Cancer
//! ```
//!
//! ### HTTP Server Mode
//! ```bash
//! pubmeta serve --port 3000
//! ```

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Json, Router,
};
use clap::{Parser, Subcommand};
use pubmeta::{
    aggregate,
    normalize,
    pubmed::{self, FetchConfig, PubMedClient},
    query::{QueryGenerator, SearchString},
    record::RecordTable,
    report,
    store::RecordStore,
    terms::{self, TermIndex},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// PubMed Meta-Analysis Pipeline
#[derive(Parser)]
#[command(name = "pubmeta")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Term file and year partition shared by `queries` and `fetch`
#[derive(clap::Args)]
struct PartitionArgs {
    /// Term index JSON file (default: <config dir>/pubmeta/terms.json)
    #[arg(long)]
    terms: Option<PathBuf>,

    /// First year of the range
    #[arg(long)]
    start: String,

    /// Last year of the range
    #[arg(long)]
    end: String,

    /// Years per query
    #[arg(long, default_value = "1")]
    increment: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate and print the boolean search strings
    Queries {
        #[command(flatten)]
        partition: PartitionArgs,

        /// Write search strings as JSON instead of printing them
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate queries and fetch every result set from PubMed
    Fetch {
        #[command(flatten)]
        partition: PartitionArgs,

        /// Directory for the JSONL record files
        #[arg(long, default_value = "./json_files")]
        output_dir: PathBuf,

        /// Maximum concurrent requests (NCBI allows 3/s without a key)
        #[arg(long, default_value = "3")]
        max_concurrent: usize,

        /// NCBI API key (falls back to NCBI_API_KEY)
        #[arg(long)]
        api_key: Option<String>,

        /// Contact email sent to NCBI
        #[arg(long)]
        email: Option<String>,
    },

    /// Count papers per year for one or more terms
    Counts {
        /// Directory of JSONL record files
        #[arg(long, default_value = "./json_files")]
        dir: PathBuf,

        /// Term selecting record files; repeat for several series
        #[arg(long = "term", required = true)]
        terms: Vec<String>,

        /// Write the count table to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write the normalized records to this CSV file
        #[arg(long)]
        records: Option<PathBuf>,
    },

    /// Papers matching every given term, within one selection
    Intersect {
        /// Directory of JSONL record files
        #[arg(long, default_value = "./json_files")]
        dir: PathBuf,

        /// Term selecting record files
        #[arg(long)]
        term: String,

        /// Terms that must all occur in title or abstract
        #[arg(long = "column", required = true)]
        columns: Vec<String>,

        /// Only keep papers whose title contains this phrase
        #[arg(long)]
        phrase: Option<String>,

        /// Write matching records to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run as HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    match cli.command {
        Commands::Queries { partition, output } => run_queries(partition, output),
        Commands::Fetch {
            partition,
            output_dir,
            max_concurrent,
            api_key,
            email,
        } => run_fetch(partition, output_dir, max_concurrent, api_key, email).await,
        Commands::Counts {
            dir,
            terms,
            output,
            records,
        } => run_counts(&dir, &terms, output, records),
        Commands::Intersect {
            dir,
            term,
            columns,
            phrase,
            output,
        } => run_intersect(&dir, &term, &columns, phrase, output),
        Commands::Serve { port, host } => run_server(host, port).await,
    }
}

// ============================================================================
// Query Generation & Fetch
// ============================================================================

/// Load the term index and generate queries; an invalid partition is an error.
fn build_generator(args: &PartitionArgs) -> Result<QueryGenerator> {
    let path = match &args.terms {
        Some(path) => path.clone(),
        None => terms::default_terms_path()?,
    };
    let index = TermIndex::from_path(&path)
        .with_context(|| format!("Failed to load term index from {:?}", path))?;

    let mut generator = QueryGenerator::new(index);
    let generated = generator
        .generate_queries_from_args(&args.start, &args.end, &args.increment)
        .map(|queries| queries.len());
    if let Err(e) = generated {
        anyhow::bail!("Query generation failed: {}", e);
    }
    Ok(generator)
}

fn run_queries(args: PartitionArgs, output: Option<PathBuf>) -> Result<()> {
    let generator = build_generator(&args)?;
    let search_strings = generator.generate_search_strings().unwrap_or_default();

    if search_strings.is_empty() {
        println!("No queries generated.");
        return Ok(());
    }

    match output {
        Some(path) => {
            let json = serde_json::to_string_pretty(&search_strings)?;
            std::fs::write(&path, json).context("Failed to write search strings")?;
            println!("Saved {} search strings to {:?}", search_strings.len(), path);
        }
        None => {
            for s in &search_strings {
                println!("{}\t{}", s.id, s.expression);
            }
        }
    }
    Ok(())
}

async fn run_fetch(
    args: PartitionArgs,
    output_dir: PathBuf,
    max_concurrent: usize,
    api_key: Option<String>,
    email: Option<String>,
) -> Result<()> {
    let generator = build_generator(&args)?;
    if generator.queries().is_empty() {
        println!("No queries generated.");
        return Ok(());
    }

    let defaults = FetchConfig::default();
    let config = FetchConfig {
        api_key: api_key.or(defaults.api_key.clone()),
        email,
        max_concurrent,
        ..defaults
    };
    let client = PubMedClient::new(config)?;

    println!(
        "Fetching {} queries into {}",
        generator.queries().len(),
        output_dir.display()
    );
    let reports = pubmed::scrape_pubmed(&generator, &client, &output_dir, max_concurrent).await?;

    for r in reports.iter().filter(|r| r.truncated) {
        println!(
            "  truncated: {} ({} hits, {} kept)",
            r.query_id, r.total_hits, r.written
        );
    }
    println!("\n✓ Fetched {} result sets into {}", reports.len(), output_dir.display());
    Ok(())
}

// ============================================================================
// Aggregation
// ============================================================================

/// Select and concatenate the tables for each term; terms without tables are skipped
fn select_terms(store: &RecordStore, terms: &[String]) -> RecordTable {
    let selections: Vec<RecordTable> = terms
        .iter()
        .filter_map(|t| store.select_by_term(t).ok())
        .collect();
    RecordTable::concat(&selections)
}

fn run_counts(
    dir: &Path,
    terms: &[String],
    output: Option<PathBuf>,
    records: Option<PathBuf>,
) -> Result<()> {
    let store = RecordStore::load(dir).with_context(|| format!("Failed to load {:?}", dir))?;
    let cleaned = normalize::clean(&select_terms(&store, terms));

    if cleaned.is_empty() {
        println!("No records to count.");
        return Ok(());
    }

    let counts = aggregate::count_per_year(&cleaned);
    println!("{}", counts);

    if let Some(path) = output {
        report::save_counts(&path, &counts)?;
        println!("Saved: {:?}", path);
    }
    if let Some(path) = records {
        report::save_records(&path, &cleaned)?;
        println!("Saved: {:?}", path);
    }
    Ok(())
}

fn run_intersect(
    dir: &Path,
    term: &str,
    columns: &[String],
    phrase: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let store = RecordStore::load(dir).with_context(|| format!("Failed to load {:?}", dir))?;
    let selected = store.select_by_term(term).unwrap_or_default();
    let mut cleaned = normalize::clean(&selected);

    if let Some(pattern) = phrase {
        cleaned = aggregate::search_phrase(&cleaned, &pattern);
    }

    let annotated = aggregate::annotate_terms(&cleaned, columns);
    let matches = aggregate::find_intersection(&annotated, columns).unwrap_or_default();
    println!(
        "{} of {} papers mention all of {:?}",
        matches.len(),
        annotated.len(),
        columns
    );

    for row in &matches {
        println!(
            "  {} | {}",
            row.year.map(|y| y.to_string()).unwrap_or_default(),
            row.title.as_deref().unwrap_or("")
        );
    }

    if let Some(path) = output {
        report::save_records(&path, &matches)?;
        println!("Saved: {:?}", path);
    }
    Ok(())
}

// ============================================================================
// HTTP Server
// ============================================================================

async fn run_server(host: String, port: u16) -> Result<()> {
    info!(host = %host, port = port, "Starting HTTP server");
    println!("Starting server at http://{}:{}", host, port);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/queries", post(queries_handler))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Invalid host:port")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Query generation request body
#[derive(Debug, Deserialize)]
struct QueriesRequest {
    terms: serde_json::Map<String, serde_json::Value>,
    start_year: serde_json::Value,
    end_year: serde_json::Value,
    #[serde(default = "default_increment")]
    increment: serde_json::Value,
}

fn default_increment() -> serde_json::Value {
    serde_json::Value::from(1)
}

/// Query generation response
#[derive(Debug, Serialize)]
struct QueriesResponse {
    status: String,
    count: usize,
    search_strings: Vec<SearchString>,
}

/// Render a JSON scalar the way a CLI flag would arrive
fn arg_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Query generation endpoint handler
async fn queries_handler(Json(req): Json<QueriesRequest>) -> Json<QueriesResponse> {
    let index = match TermIndex::from_map(req.terms) {
        Ok(index) => index,
        Err(e) => {
            error!(error = %e, "Invalid term index");
            return Json(QueriesResponse {
                status: format!("error: {}", e),
                count: 0,
                search_strings: vec![],
            });
        }
    };

    let mut generator = QueryGenerator::new(index);
    let generated = generator.generate_queries_from_args(
        &arg_text(&req.start_year),
        &arg_text(&req.end_year),
        &arg_text(&req.increment),
    );
    if let Err(e) = generated {
        return Json(QueriesResponse {
            status: format!("error: {}", e),
            count: 0,
            search_strings: vec![],
        });
    }

    match generator.generate_search_strings() {
        Ok(search_strings) => Json(QueriesResponse {
            status: "success".to_string(),
            count: search_strings.len(),
            search_strings,
        }),
        Err(e) => {
            warn!(error = %e, "No search strings rendered");
            Json(QueriesResponse {
                status: format!("error: {}", e),
                count: 0,
                search_strings: vec![],
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(terms: &Path, start: &str, end: &str, increment: &str) -> PartitionArgs {
        PartitionArgs {
            terms: Some(terms.to_path_buf()),
            start: start.to_string(),
            end: end.to_string(),
            increment: increment.to_string(),
        }
    }

    #[test]
    fn test_build_generator() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("terms.json");
        std::fs::write(&path, r#"{"cancer": [["cancer", "neoplasm"]]}"#)?;

        let generator = build_generator(&partition(&path, "2018", "2021", "1"))?;
        assert_eq!(generator.queries().len(), 3);

        let err = build_generator(&partition(&path, "2021", "2018", "1"))
            .err()
            .expect("Expected an error");
        assert!(err.to_string().contains("cannot be greater than"));

        let err = build_generator(&partition(&path, "2018", "soon", "1"))
            .err()
            .expect("Expected an error");
        assert!(err.to_string().contains("end_year"));
        Ok(())
    }

    #[tokio::test]
    async fn test_queries_handler() {
        let request = |increment: serde_json::Value| QueriesRequest {
            terms: serde_json::json!({"cancer": [["cancer"]]})
                .as_object()
                .cloned()
                .unwrap_or_default(),
            start_year: serde_json::json!(2020),
            end_year: serde_json::json!("2022"),
            increment,
        };

        let Json(ok) = queries_handler(Json(request(serde_json::json!(2)))).await;
        assert_eq!(ok.status, "success");
        assert_eq!(ok.count, 1);
        assert_eq!(ok.search_strings[0].id, "cancer_2020_2021");

        let Json(bad) = queries_handler(Json(request(serde_json::json!(0)))).await;
        assert!(bad.status.starts_with("error:"));
        assert_eq!(bad.count, 0);
    }
}
