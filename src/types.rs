use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Hex MD5 digest of a URL's exact string form. No normalization is applied,
/// so `http://a/x.pdf` and `http://a/x.pdf/` are different fingerprints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(url: &str) -> Self {
        Self(hex::encode(Md5::digest(url.as_bytes())))
    }

    /// Wraps a line read back from the cache file. Returns `None` for blank lines.
    pub fn from_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of a query's link ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(rename = "Link")]
    pub url: String,
    #[serde(rename = "Downloaded File Name")]
    pub filename: String,
}

/// Per-query outcome counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryReport {
    pub query: String,
    pub folder: PathBuf,
    /// Candidates returned by the search provider.
    pub candidates: usize,
    /// Files written, ledgered and cached.
    pub downloaded: usize,
    /// Candidates rejected by the extension filter.
    pub rejected: usize,
    /// Candidates whose fingerprint was already cached.
    pub duplicates: usize,
    /// Candidates that could not be fetched or persisted.
    pub failed: usize,
}

/// Summary of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub output_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub queries: Vec<QueryReport>,
    /// Set when the run stopped early on a cancellation request.
    pub cancelled: bool,
}

impl RunReport {
    pub fn total_downloaded(&self) -> usize {
        self.queries.iter().map(|q| q.downloaded).sum()
    }
}

/// Progress notifications sent to a front end while a run is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    QueryStarted { index: usize, query: String },
    PageStarted { query: String, page: u32 },
    Downloaded { url: String, path: PathBuf },
    Skipped { url: String, reason: SkipReason },
    QueryFinished { query: String, downloaded: usize },
    Finished { output_dir: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Extension,
    Duplicate,
    Failed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::Extension => "wrong extension",
            SkipReason::Duplicate => "already downloaded",
            SkipReason::Failed => "failed",
        };
        f.write_str(reason)
    }
}
