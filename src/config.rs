use crate::{HarvestError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Prefix for environment variable overrides, e.g. `DOCHARVEST_PAGES=3`.
pub const ENV_PREFIX: &str = "DOCHARVEST";

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// The document types a harvest can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Docx,
    Doc,
    Pptx,
    Ppt,
    Csv,
    Xlsx,
    Xls,
    Rtf,
}

impl FileType {
    pub const ALL: [FileType; 9] = [
        FileType::Pdf,
        FileType::Docx,
        FileType::Doc,
        FileType::Pptx,
        FileType::Ppt,
        FileType::Csv,
        FileType::Xlsx,
        FileType::Xls,
        FileType::Rtf,
    ];

    /// The bare extension, as used in `filetype:` search filters.
    pub fn extension(self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
            FileType::Doc => "doc",
            FileType::Pptx => "pptx",
            FileType::Ppt => "ppt",
            FileType::Csv => "csv",
            FileType::Xlsx => "xlsx",
            FileType::Xls => "xls",
            FileType::Rtf => "rtf",
        }
    }

    /// Returns `true` if `url` ends with `.` + extension, ignoring case.
    pub fn matches(self, url: &str) -> bool {
        let suffix = format!(".{}", self.extension());
        url.len() >= suffix.len()
            && url
                .get(url.len() - suffix.len()..)
                .is_some_and(|tail| tail.eq_ignore_ascii_case(&suffix))
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for FileType {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().trim_start_matches('.');
        FileType::ALL
            .into_iter()
            .find(|t| t.extension().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| HarvestError::ConfigError(format!("unsupported file extension '{}'", s)))
    }
}

/// Which search strategy produces candidate URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    /// One structured search call per query.
    Direct,
    /// One result-page request per page index.
    Paged,
}

/// The `HarvestConfig` struct holds every tunable of a harvest run.
/// Values come from built-in defaults, an optional TOML file, `DOCHARVEST_*` environment
/// variables and finally command line flags, in increasing order of precedence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Directory under which one folder per query is created.
    pub output_dir: PathBuf,
    /// The fingerprint cache file shared by all queries and runs.
    pub cache_file: PathBuf,
    /// The document type to search for and accept.
    pub file_type: FileType,
    /// The search strategy.
    pub strategy: SearchStrategy,
    /// Result pages per query for the paged strategy.
    pub pages: u32,
    /// Accepted downloads per query for the direct strategy.
    pub max_results: usize,
    /// Pause after each query, in milliseconds.
    pub query_delay_ms: u64,
    /// Pause after each scraped result page, in milliseconds.
    pub page_delay_ms: u64,
    /// Timeout for every HTTP request, in seconds.
    pub timeout_secs: u64,
    /// Attempts per download before the candidate is given up.
    pub max_attempts: u32,
    /// Base delay of the exponential retry backoff, in milliseconds.
    pub retry_backoff_ms: u64,
    /// User agent sent to the scraped search provider and its downloads.
    pub user_agent: String,
    /// Endpoint of the direct search backend.
    pub direct_search_url: String,
    /// Endpoint of the scraped result pages.
    pub paged_search_url: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloads"),
            cache_file: PathBuf::from(crate::DEFAULT_CACHE_FILE),
            file_type: FileType::Pdf,
            strategy: SearchStrategy::Direct,
            pages: 1,
            max_results: crate::DEFAULT_MAX_RESULTS,
            query_delay_ms: crate::DEFAULT_QUERY_DELAY.as_millis() as u64,
            page_delay_ms: crate::DEFAULT_PAGE_DELAY.as_millis() as u64,
            timeout_secs: crate::DEFAULT_TIMEOUT.as_secs(),
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
            retry_backoff_ms: 1000,
            user_agent: String::from(BROWSER_USER_AGENT),
            direct_search_url: String::from("https://www.google.com/search"),
            paged_search_url: String::from("https://www.google.com/search"),
        }
    }
}

impl HarvestConfig {
    /// Loads defaults, then `file` if given, then `DOCHARVEST_*` environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let defaults = ::config::Config::try_from(&HarvestConfig::default())?;
        let mut builder = ::config::Config::builder().add_source(defaults);

        if let Some(path) = file {
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        let config: HarvestConfig = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Rejects settings that would make a run meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(HarvestError::ConfigError("output directory is required".into()));
        }
        if self.cache_file.as_os_str().is_empty() {
            return Err(HarvestError::ConfigError("cache file path is required".into()));
        }
        if self.strategy == SearchStrategy::Paged && self.pages == 0 {
            return Err(HarvestError::ConfigError(
                "page count must be a positive integer".into(),
            ));
        }
        if self.strategy == SearchStrategy::Direct && self.max_results == 0 {
            return Err(HarvestError::ConfigError("max results must be at least 1".into()));
        }
        if self.max_attempts == 0 || self.max_attempts > crate::MAX_ATTEMPTS {
            return Err(HarvestError::ConfigError(format!(
                "max attempts must be between 1 and {}",
                crate::MAX_ATTEMPTS
            )));
        }
        Ok(())
    }

    pub fn query_delay(&self) -> Duration {
        Duration::from_millis(self.query_delay_ms)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}
