use crate::scraper::LinkExtractor;
use crate::{FileType, HarvestConfig, HarvestError, Result, SearchStrategy, RESULTS_PER_PAGE};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// A source of candidate URLs for a query.
///
/// Implementations are stateless per call. Returned URLs are unfiltered and may repeat;
/// extension filtering and deduplication belong to the caller.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Candidate URLs for `query` on zero-based result page `page`.
    async fn search(&self, query: &str, page: u32) -> Result<Vec<String>>;

    /// Number of result pages to request per query.
    fn pages(&self) -> u32;

    /// Maximum number of accepted downloads per query.
    fn accept_cap(&self) -> usize;

    /// Pause after each result page.
    fn page_delay(&self) -> Duration {
        Duration::ZERO
    }

    /// User agent to send when downloading this provider's candidates.
    fn download_user_agent(&self) -> Option<&str> {
        None
    }
}

/// A structured search service answering one query with a ranked list of URLs.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Up to `limit` URLs for `query`, restricted to `file_type` by the backend.
    async fn query(&self, query: &str, file_type: FileType, limit: usize) -> Result<Vec<String>>;
}

/// Direct search strategy: one backend call per query, results capped at `max_results`.
/// Backend failures are returned unchanged so the caller can abort the run.
pub struct DirectQuery {
    backend: Arc<dyn SearchBackend>,
    file_type: FileType,
    max_results: usize,
}

impl DirectQuery {
    pub fn new(backend: Arc<dyn SearchBackend>, file_type: FileType, max_results: usize) -> Self {
        Self {
            backend,
            file_type,
            max_results,
        }
    }
}

#[async_trait]
impl SearchProvider for DirectQuery {
    #[instrument(skip(self))]
    async fn search(&self, query: &str, page: u32) -> Result<Vec<String>> {
        if page > 0 {
            return Ok(Vec::new());
        }
        self.backend
            .query(query, self.file_type, self.max_results)
            .await
    }

    fn pages(&self) -> u32 {
        1
    }

    fn accept_cap(&self) -> usize {
        self.max_results
    }
}

/// The bundled [`SearchBackend`]: a single result-page request asking for `limit`
/// results, with organic result links pulled from the markup.
pub struct GoogleResults {
    /// The HTTP client used for making requests.
    client: Client,
    endpoint: String,
    extractor: LinkExtractor,
}

impl GoogleResults {
    pub fn new(config: &HarvestConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.direct_search_url.clone(),
            extractor: LinkExtractor::search_results(),
        })
    }
}

#[async_trait]
impl SearchBackend for GoogleResults {
    async fn query(&self, query: &str, file_type: FileType, limit: usize) -> Result<Vec<String>> {
        let url = format!(
            "{}?q={}+filetype:{}&hl=en&num={}",
            self.endpoint,
            urlencoding::encode(query),
            file_type,
            limit
        );

        debug!("Search URL: {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.5")
            .send()
            .await
            .map_err(|e| HarvestError::SearchError(e.to_string()))?;

        let status = response.status();
        debug!("Response status: {}", status);
        if !status.is_success() {
            return Err(HarvestError::SearchError(format!(
                "search provider returned HTTP {} for '{}'",
                status.as_u16(),
                query
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| HarvestError::SearchError(e.to_string()))?;

        Ok(self.extractor.extract(&html))
    }
}

/// Paged scrape strategy: one result-page request per page index, every absolute anchor
/// kept as a candidate. A failed page is logged and treated as empty.
pub struct PagedScrape {
    /// The HTTP client used for making requests.
    client: Client,
    endpoint: String,
    user_agent: String,
    file_type: FileType,
    pages: u32,
    page_delay: Duration,
    extractor: LinkExtractor,
}

impl PagedScrape {
    pub fn new(config: &HarvestConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.paged_search_url.clone(),
            user_agent: config.user_agent.clone(),
            file_type: config.file_type,
            pages: config.pages,
            page_delay: config.page_delay(),
            extractor: LinkExtractor::anchors(),
        })
    }

    /// The result-page URL for `query` and `page`.
    pub fn page_url(&self, query: &str, page: u32) -> String {
        format!(
            "{}?q={}+filetype:{}&start={}",
            self.endpoint,
            urlencoding::encode(query),
            self.file_type,
            page as usize * RESULTS_PER_PAGE
        )
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl SearchProvider for PagedScrape {
    #[instrument(skip(self))]
    async fn search(&self, query: &str, page: u32) -> Result<Vec<String>> {
        let url = self.page_url(query, page);
        debug!("Search URL: {}", url);

        match self.fetch_page(&url).await {
            Ok(html) => Ok(self.extractor.extract(&html)),
            Err(e) => {
                warn!(page, "Search failed: {}", e);
                Ok(Vec::new())
            }
        }
    }

    fn pages(&self) -> u32 {
        self.pages
    }

    fn accept_cap(&self) -> usize {
        self.pages as usize * RESULTS_PER_PAGE
    }

    fn page_delay(&self) -> Duration {
        self.page_delay
    }

    fn download_user_agent(&self) -> Option<&str> {
        Some(self.user_agent.as_str())
    }
}

/// Builds the provider selected by `config.strategy`.
pub fn provider_for(config: &HarvestConfig) -> Result<Box<dyn SearchProvider>> {
    let provider: Box<dyn SearchProvider> = match config.strategy {
        SearchStrategy::Direct => Box::new(DirectQuery::new(
            Arc::new(GoogleResults::new(config)?),
            config.file_type,
            config.max_results,
        )),
        SearchStrategy::Paged => Box::new(PagedScrape::new(config)?),
    };
    Ok(provider)
}
