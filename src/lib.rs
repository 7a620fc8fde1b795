use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub mod cache;
pub mod config;
pub mod fetch;
pub mod ledger;
pub mod orchestrator;
pub mod queries;
pub mod scraper;
pub mod search;
pub mod types;

// Re-export commonly used types
pub use crate::cache::HashCache;
pub use crate::config::{FileType, HarvestConfig, SearchStrategy};
pub use crate::orchestrator::{clear_cache, Orchestrator};
pub use crate::types::{Fingerprint, LedgerEntry, QueryReport, RunEvent, RunReport};

/// The `HarvestError` enum represents the errors that can end a harvest run or one of its steps.
#[derive(Error, Debug)]
pub enum HarvestError {
    /// A required input is missing or invalid; the run never starts.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
    /// The layered configuration sources could not be read or merged.
    #[error("Configuration source failed: {0}")]
    ConfigSourceError(#[from] ::config::ConfigError),
    /// Represents an error that occurs during an HTTP request.
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    /// The server answered a fetch with a non-success status.
    #[error("{url} returned HTTP {status}")]
    StatusError { url: String, status: u16 },
    /// Represents an error that occurs during a search operation.
    #[error("Search failed: {0}")]
    SearchError(String),
    /// A filesystem operation failed.
    #[error("I/O error on {}: {source}", path.display())]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The link ledger could not be read or written.
    #[error("Ledger error: {0}")]
    LedgerError(#[from] csv::Error),
    /// The query source could not be read.
    #[error("Query source error: {0}")]
    QuerySourceError(String),
}

impl HarvestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            source,
        }
    }
}

/// A type alias for `Result` with the `HarvestError` error type.
pub type Result<T> = std::result::Result<T, HarvestError>;

// Constants

/// The default timeout duration for HTTP requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// The default cap on accepted downloads per query for the direct strategy.
pub const DEFAULT_MAX_RESULTS: usize = 10;
/// Results per search page; also the per-page share of the paged cap.
pub const RESULTS_PER_PAGE: usize = 10;
/// The default pause after each query.
pub const DEFAULT_QUERY_DELAY: Duration = Duration::from_secs(5);
/// The default pause after each scraped result page.
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(5);
/// The default number of attempts per download. One means no retry.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;
/// Upper bound accepted for the attempts per download.
pub const MAX_ATTEMPTS: u32 = 10;
/// Longest pause between two attempts of one download.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// File name of the per-query ledger.
pub const LEDGER_FILE_NAME: &str = "download_links.csv";
/// File name of the fingerprint cache when none is configured.
pub const DEFAULT_CACHE_FILE: &str = "downloaded_files_cache.txt";
