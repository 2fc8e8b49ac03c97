//! Custom error types for pubmeta.
//!
//! This module defines all error types used throughout the pipeline.
//! All functions return `Result<T, PubmetaError>` instead of using `unwrap()`.
//!
//! The first six variants are the "soft" analysis errors: they are logged where
//! they occur and the operation leaves an empty result behind, so callers can
//! carry on with `unwrap_or_default()` or match on the variant.

use thiserror::Error;

/// Main error type for pubmeta operations.
#[derive(Debug, Error)]
pub enum PubmetaError {
    /// A year or increment argument was not an integer
    #[error("Invalid argument type for '{name}': expected an integer, got '{value}'")]
    InvalidArgumentType {
        /// Argument name
        name: &'static str,
        /// Raw value supplied by the caller
        value: String,
    },

    /// Start year after end year
    #[error("Start year {start} cannot be greater than end year {end}")]
    InvalidRange { start: i32, end: i32 },

    /// Increment must be strictly positive
    #[error("Increment value must be greater than zero, got {0}")]
    InvalidIncrement(i32),

    /// Rendering or scraping requested before any queries were generated
    #[error("No queries generated, generate queries first")]
    NoQueriesGenerated,

    /// No loaded table key contains the requested term
    #[error("No tables match term '{0}'")]
    NoMatchingTables(String),

    /// None of the requested intersection terms has a column in the table
    #[error("No intersection columns found for terms {0:?}")]
    NoIntersectionColumns(Vec<String>),

    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Rate limited by external API
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// External API returned an error
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: i32,
        /// Error message from API
        message: String,
    },

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Record parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),
}

impl PubmetaError {
    /// True for the non-fatal analysis errors that leave an empty result behind.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgumentType { .. }
                | Self::InvalidRange { .. }
                | Self::InvalidIncrement(_)
                | Self::NoQueriesGenerated
                | Self::NoMatchingTables(_)
                | Self::NoIntersectionColumns(_)
        )
    }
}

/// Result type alias using `PubmetaError`
pub type Result<T> = std::result::Result<T, PubmetaError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| PubmetaError::Parse(msg.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_errors() {
        assert!(PubmetaError::InvalidRange { start: 2021, end: 2020 }.is_soft());
        assert!(PubmetaError::NoQueriesGenerated.is_soft());
        assert!(PubmetaError::NoIntersectionColumns(vec![]).is_soft());
        assert!(!PubmetaError::RateLimited(5).is_soft());
        assert!(!PubmetaError::Config("bad".to_string()).is_soft());
    }

    #[test]
    fn test_ok_or_parse() {
        let missing: Option<i32> = None;
        let err = missing.ok_or_parse("no year").expect_err("Expected an error");
        assert_eq!(err.to_string(), "Parse error: no year");
    }
}
