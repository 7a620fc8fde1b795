use crate::{HarvestConfig, HarvestError, Result, MAX_BACKOFF};
use reqwest::{Client, StatusCode};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

/// The `Fetcher` downloads candidate documents and writes them into query folders.
/// Fetches are plain GETs; transient failures are retried with exponential backoff up to
/// the configured number of attempts.
pub struct Fetcher {
    /// The HTTP client used for making requests.
    client: Client,
    max_attempts: u32,
    backoff: Duration,
}

impl Fetcher {
    /// Creates a new `Fetcher` from the timeout and retry settings of `config`.
    pub fn new(config: &HarvestConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            max_attempts: config.max_attempts.max(1),
            backoff: config.retry_backoff(),
        })
    }

    /// Downloads `url` into `dest`, overwriting any existing file of that name.
    /// Returns the number of bytes written. On failure no partial file is left behind.
    pub async fn download(&self, url: &str, user_agent: Option<&str>, dest: &Path) -> Result<u64> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.try_download(url, user_agent, dest).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if attempt < self.max_attempts && is_transient(&e) => {
                    let delay = self.retry_delay(attempt);
                    warn!(url, attempt, ?delay, "Transient fetch failure, retrying: {}", e);
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Pause after the given failed attempt: the base backoff doubled per attempt, capped.
    fn retry_delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.backoff.checked_mul(factor))
            .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
    }

    async fn try_download(&self, url: &str, user_agent: Option<&str>, dest: &Path) -> Result<u64> {
        let mut request = self.client.get(url);
        if let Some(agent) = user_agent {
            request = request.header(reqwest::header::USER_AGENT, agent);
        }

        let mut response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::StatusError {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = File::create(dest)
            .await
            .map_err(|e| HarvestError::io(dest, e))?;

        let written = async {
            let mut written = 0u64;
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| HarvestError::io(dest, e))?;
                written += chunk.len() as u64;
            }
            file.flush().await.map_err(|e| HarvestError::io(dest, e))?;
            file.sync_all().await.map_err(|e| HarvestError::io(dest, e))?;
            Ok::<_, HarvestError>(written)
        }
        .await;

        match written {
            Ok(bytes) => {
                debug!(url, bytes, path = %dest.display(), "Wrote artifact");
                Ok(bytes)
            }
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                Err(e)
            }
        }
    }
}

fn is_transient(error: &HarvestError) -> bool {
    match error {
        HarvestError::RequestError(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
        HarvestError::StatusError { status, .. } => {
            *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
        }
        _ => false,
    }
}

/// Derives the save name of a download: the last segment of the percent-decoded URL path.
/// The query string and fragment are not part of the name.
pub fn filename_for(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let decoded = urlencoding::decode(parsed.path()).ok()?;
    let name = decoded.rsplit(['/', '\\']).next()?.trim();

    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

/// Folder name of a query: spaces and path separators become underscores.
/// A result that would name the output root or its parent gets a leading underscore,
/// so the folder always lies inside the output root.
pub fn folder_name(query: &str) -> String {
    let name = query.replace([' ', '/', '\\'], "_");
    match name.as_str() {
        "" | "." | ".." => format!("_{}", name),
        _ => name,
    }
}
