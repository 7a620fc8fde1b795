use crate::fetch::{filename_for, folder_name, Fetcher};
use crate::ledger::Ledger;
use crate::search::{provider_for, SearchProvider};
use crate::types::SkipReason;
use crate::{
    Fingerprint, HarvestConfig, HarvestError, HashCache, QueryReport, Result, RunEvent, RunReport,
};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// What happened to a single candidate URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Downloaded,
    Skipped(SkipReason),
}

/// The `Orchestrator` drives a harvest run: for each query it collects candidate URLs
/// from its search provider, filters and deduplicates them, downloads the survivors and
/// records them in the query's ledger and the shared hash cache.
///
/// Everything runs sequentially. Search failures from the provider end the run; failures
/// of individual candidates are logged and skipped.
pub struct Orchestrator {
    config: HarvestConfig,
    provider: Box<dyn SearchProvider>,
    fetcher: Fetcher,
    events: Option<UnboundedSender<RunEvent>>,
}

impl Orchestrator {
    /// Creates an orchestrator around an explicit provider.
    pub fn new(config: HarvestConfig, provider: Box<dyn SearchProvider>) -> Result<Self> {
        config.validate()?;
        let fetcher = Fetcher::new(&config)?;

        Ok(Self {
            config,
            provider,
            fetcher,
            events: None,
        })
    }

    /// Creates an orchestrator using the provider selected by `config.strategy`.
    pub fn from_config(config: HarvestConfig) -> Result<Self> {
        config.validate()?;
        let provider = provider_for(&config)?;
        Self::new(config, provider)
    }

    /// Sends progress events to `sender` for the duration of each run.
    pub fn with_events(mut self, sender: UnboundedSender<RunEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Processes `queries` in order. Blank queries are skipped.
    ///
    /// Returns the run report on completion or cancellation. The first fatal error aborts
    /// the remaining queries; files and cache entries written before it are kept.
    pub async fn run(&self, queries: &[String], cancel: &CancellationToken) -> Result<RunReport> {
        let started_at = Utc::now();
        let output_dir = self.config.output_dir.clone();

        std::fs::create_dir_all(&output_dir).map_err(|e| HarvestError::io(&output_dir, e))?;
        let mut cache = HashCache::load(&self.config.cache_file)?;

        info!(
            queries = queries.len(),
            cached = cache.len(),
            strategy = ?self.config.strategy,
            file_type = %self.config.file_type,
            "Starting harvest"
        );

        let mut reports = Vec::new();
        let mut cancelled = false;
        let mut first = true;

        for (index, query) in queries.iter().enumerate() {
            let query = query.trim();
            if query.is_empty() {
                debug!(index, "Skipping blank query");
                continue;
            }

            if !first {
                self.pause(self.config.query_delay(), cancel).await;
            }
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            first = false;

            self.emit(RunEvent::QueryStarted {
                index,
                query: query.to_string(),
            });

            let report = self
                .process_query(query, &mut cache, cancel)
                .await
                .inspect_err(|e| error!(query, "Aborting run: {}", e))?;

            self.emit(RunEvent::QueryFinished {
                query: query.to_string(),
                downloaded: report.downloaded,
            });
            reports.push(report);
        }

        cancelled |= cancel.is_cancelled();
        if cancelled {
            warn!("Harvest cancelled");
        } else {
            info!(output = %output_dir.display(), "Harvest completed");
        }
        self.emit(RunEvent::Finished {
            output_dir: output_dir.clone(),
        });

        Ok(RunReport {
            output_dir,
            started_at,
            finished_at: Utc::now(),
            queries: reports,
            cancelled,
        })
    }

    #[instrument(skip(self, cache, cancel))]
    async fn process_query(
        &self,
        query: &str,
        cache: &mut HashCache,
        cancel: &CancellationToken,
    ) -> Result<QueryReport> {
        let folder = self.config.output_dir.join(folder_name(query));
        std::fs::create_dir_all(&folder).map_err(|e| HarvestError::io(&folder, e))?;
        let ledger = Ledger::open(&folder)?;

        info!("Processing query: {}", query);

        let mut report = QueryReport {
            query: query.to_string(),
            folder: folder.clone(),
            ..QueryReport::default()
        };
        let cap = self.provider.accept_cap();
        let pages = self.provider.pages();

        'pages: for page in 0..pages {
            if report.downloaded >= cap || cancel.is_cancelled() {
                break;
            }
            if page > 0 {
                self.pause(self.provider.page_delay(), cancel).await;
            }

            self.emit(RunEvent::PageStarted {
                query: query.to_string(),
                page,
            });
            let candidates = self.provider.search(query, page).await?;
            debug!(page, candidates = candidates.len(), "Search returned");
            report.candidates += candidates.len();

            for url in candidates {
                if cancel.is_cancelled() {
                    break 'pages;
                }

                match self.consider(&url, &folder, &ledger, cache).await? {
                    Outcome::Downloaded => report.downloaded += 1,
                    Outcome::Skipped(SkipReason::Extension) => report.rejected += 1,
                    Outcome::Skipped(SkipReason::Duplicate) => report.duplicates += 1,
                    Outcome::Skipped(SkipReason::Failed) => report.failed += 1,
                }

                if report.downloaded >= cap {
                    debug!(cap, "Reached download cap");
                    break 'pages;
                }
            }
        }

        info!(
            downloaded = report.downloaded,
            duplicates = report.duplicates,
            failed = report.failed,
            "Finished query: {}",
            query
        );
        Ok(report)
    }

    /// Filters, deduplicates, downloads and records one candidate.
    /// Only a failure to update the hash cache is returned as an error.
    async fn consider(
        &self,
        url: &str,
        folder: &Path,
        ledger: &Ledger,
        cache: &mut HashCache,
    ) -> Result<Outcome> {
        if !self.config.file_type.matches(url) {
            debug!(url, "Rejecting, wrong extension");
            return Ok(self.skipped(url, SkipReason::Extension));
        }

        let fingerprint = Fingerprint::of(url);
        if cache.contains(&fingerprint) {
            info!("Skipping already downloaded: {}", url);
            return Ok(self.skipped(url, SkipReason::Duplicate));
        }

        let Some(filename) = filename_for(url) else {
            warn!(url, "Cannot derive a file name, skipping");
            return Ok(self.skipped(url, SkipReason::Failed));
        };
        let path: PathBuf = folder.join(&filename);

        debug!("Downloading {} from {}", filename, url);
        if let Err(e) = self
            .fetcher
            .download(url, self.provider.download_user_agent(), &path)
            .await
        {
            warn!("Failed to download from {}: {}", url, e);
            return Ok(self.skipped(url, SkipReason::Failed));
        }
        info!("Saved: {}", path.display());

        if let Err(e) = ledger.append(url, &filename) {
            error!(url, "Failed to record download in ledger: {}", e);
            return Ok(self.skipped(url, SkipReason::Failed));
        }
        cache.record(fingerprint)?;

        self.emit(RunEvent::Downloaded {
            url: url.to_string(),
            path,
        });
        Ok(Outcome::Downloaded)
    }

    fn skipped(&self, url: &str, reason: SkipReason) -> Outcome {
        self.emit(RunEvent::Skipped {
            url: url.to_string(),
            reason,
        });
        Outcome::Skipped(reason)
    }

    async fn pause(&self, delay: Duration, cancel: &CancellationToken) {
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = sleep(delay) => {}
            _ = cancel.cancelled() => {}
        }
    }

    fn emit(&self, event: RunEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }
}

/// Deletes the hash cache file so every URL becomes downloadable again.
/// Returns `false` if no cache file existed.
pub fn clear_cache(path: &Path) -> Result<bool> {
    HashCache::clear(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockito::Matcher;

    /// Serves fixed candidate lists per page and can fail for one query.
    struct ScriptedProvider {
        pages: Vec<Vec<String>>,
        cap: usize,
        fail_on: Option<String>,
    }

    impl ScriptedProvider {
        fn new(pages: Vec<Vec<String>>, cap: usize) -> Self {
            Self {
                pages,
                cap,
                fail_on: None,
            }
        }
    }

    #[async_trait]
    impl SearchProvider for ScriptedProvider {
        async fn search(&self, query: &str, page: u32) -> Result<Vec<String>> {
            if self.fail_on.as_deref() == Some(query) {
                return Err(HarvestError::SearchError("provider unavailable".into()));
            }
            Ok(self.pages.get(page as usize).cloned().unwrap_or_default())
        }

        fn pages(&self) -> u32 {
            self.pages.len() as u32
        }

        fn accept_cap(&self) -> usize {
            self.cap
        }
    }

    fn test_config(root: &Path) -> HarvestConfig {
        HarvestConfig {
            output_dir: root.join("out"),
            cache_file: root.join("cache.txt"),
            query_delay_ms: 0,
            page_delay_ms: 0,
            ..HarvestConfig::default()
        }
    }

    fn docs(server: &mockito::Server, range: std::ops::Range<usize>) -> Vec<String> {
        range
            .map(|i| format!("{}/doc{}.pdf", server.url(), i))
            .collect()
    }

    async fn serve_docs(server: &mut mockito::Server, hits: usize) -> mockito::Mock {
        server
            .mock("GET", Matcher::Regex(r"^/doc\d+\.pdf$".into()))
            .with_status(200)
            .with_body("%PDF")
            .expect(hits)
            .create_async()
            .await
    }

    async fn run_once(config: &HarvestConfig, candidates: &[String]) -> RunReport {
        let provider = ScriptedProvider::new(vec![candidates.to_vec()], 10);
        Orchestrator::new(config.clone(), Box::new(provider))
            .unwrap()
            .run(&["repeat".to_string()], &CancellationToken::new())
            .await
            .unwrap()
    }

    /// Tests the worked example: one save, one duplicate, one wrong extension.
    #[tokio::test]
    async fn test_duplicate_and_extension_in_one_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/x.pdf")
            .with_status(200)
            .with_body("%PDF")
            .expect(1)
            .create_async()
            .await;

        let x = format!("{}/x.pdf", server.url());
        let y = format!("{}/y.doc", server.url());
        let provider = ScriptedProvider::new(vec![vec![x.clone(), x.clone(), y]], 10);

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let orchestrator = Orchestrator::new(config.clone(), Box::new(provider)).unwrap();
        let report = orchestrator
            .run(&["annual report".to_string()], &CancellationToken::new())
            .await
            .unwrap();

        mock.assert_async().await;
        let folder = config.output_dir.join("annual_report");
        assert!(folder.join("x.pdf").exists());

        let entries = Ledger::open(&folder).unwrap().entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, x);
        assert_eq!(entries[0].filename, "x.pdf");

        let query = &report.queries[0];
        assert_eq!(
            (query.downloaded, query.duplicates, query.rejected),
            (1, 1, 1)
        );
        assert!(HashCache::load(&config.cache_file)
            .unwrap()
            .contains(&Fingerprint::of(&x)));
    }

    /// Tests that a single-page provider stops at its cap.
    #[tokio::test]
    async fn test_cap_single_page() {
        let mut server = mockito::Server::new_async().await;
        let mock = serve_docs(&mut server, 10).await;
        let provider = ScriptedProvider::new(vec![docs(&server, 0..25)], 10);

        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(test_config(dir.path()), Box::new(provider)).unwrap();
        let report = orchestrator
            .run(&["cap".to_string()], &CancellationToken::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(report.queries[0].downloaded, 10);
    }

    /// Tests that the cap counts accepted downloads across pages.
    #[tokio::test]
    async fn test_cap_across_pages() {
        let mut server = mockito::Server::new_async().await;
        let mock = serve_docs(&mut server, 20).await;
        let provider = ScriptedProvider::new(
            vec![docs(&server, 0..15), docs(&server, 15..25)],
            20,
        );

        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(test_config(dir.path()), Box::new(provider)).unwrap();
        let report = orchestrator
            .run(&["paged".to_string()], &CancellationToken::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(report.queries[0].downloaded, 20);
        assert_eq!(report.queries[0].candidates, 25);
    }

    /// Tests that a failed fetch does not stop the remaining candidates.
    #[tokio::test]
    async fn test_fetch_failure_is_isolated() {
        let mut server = mockito::Server::new_async().await;
        let broken = server
            .mock("GET", "/doc3.pdf")
            .with_status(500)
            .create_async()
            .await;
        let ok = server
            .mock("GET", Matcher::Regex(r"^/doc([0-24-9])\.pdf$".into()))
            .with_status(200)
            .with_body("%PDF")
            .expect(9)
            .create_async()
            .await;
        let provider = ScriptedProvider::new(vec![docs(&server, 0..10)], 10);

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let orchestrator = Orchestrator::new(config.clone(), Box::new(provider)).unwrap();
        let report = orchestrator
            .run(&["isolation".to_string()], &CancellationToken::new())
            .await
            .unwrap();

        broken.assert_async().await;
        ok.assert_async().await;
        assert_eq!(report.queries[0].downloaded, 9);
        assert_eq!(report.queries[0].failed, 1);

        let cache = HashCache::load(&config.cache_file).unwrap();
        assert!(!cache.contains(&Fingerprint::of(&format!("{}/doc3.pdf", server.url()))));
    }

    /// Tests that a search failure aborts the remaining queries.
    #[tokio::test]
    async fn test_search_failure_aborts_run() {
        let mut server = mockito::Server::new_async().await;
        let _mock = serve_docs(&mut server, 1).await;
        let mut provider = ScriptedProvider::new(vec![docs(&server, 0..1)], 10);
        provider.fail_on = Some("second".into());

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let orchestrator = Orchestrator::new(config.clone(), Box::new(provider)).unwrap();
        let queries = vec!["first".to_string(), "second".to_string(), "third".to_string()];
        let result = orchestrator.run(&queries, &CancellationToken::new()).await;

        assert!(matches!(result, Err(HarvestError::SearchError(_))));
        assert!(config.output_dir.join("first").join("doc0.pdf").exists());
        assert!(!config.output_dir.join("third").exists());
        assert!(HashCache::load(&config.cache_file)
            .unwrap()
            .contains(&Fingerprint::of(&format!("{}/doc0.pdf", server.url()))));
    }

    /// Tests that a second run skips everything and clearing the cache re-enables downloads.
    #[tokio::test]
    async fn test_rerun_and_clear_cache() {
        let mut server = mockito::Server::new_async().await;
        let mock = serve_docs(&mut server, 6).await;
        let candidates = docs(&server, 0..3);

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        assert_eq!(run_once(&config, &candidates).await.queries[0].downloaded, 3);

        let second = run_once(&config, &candidates).await;
        assert_eq!(second.queries[0].downloaded, 0);
        assert_eq!(second.queries[0].duplicates, 3);

        assert!(clear_cache(&config.cache_file).unwrap());
        assert_eq!(run_once(&config, &candidates).await.queries[0].downloaded, 3);

        mock.assert_async().await;
        let ledger = Ledger::open(&config.output_dir.join("repeat")).unwrap();
        assert_eq!(ledger.entries().unwrap().len(), 6);
    }

    /// Tests that blank queries are skipped without searching.
    #[tokio::test]
    async fn test_blank_queries_skipped() {
        let provider = ScriptedProvider::new(vec![Vec::new()], 10);
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(test_config(dir.path()), Box::new(provider)).unwrap();
        let queries = vec!["".to_string(), "  ".to_string(), "real".to_string()];

        let report = orchestrator
            .run(&queries, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.queries.len(), 1);
        assert_eq!(report.queries[0].query, "real");
    }

    /// Tests that a cancelled token stops the run before any query.
    #[tokio::test]
    async fn test_cancelled_run() {
        let provider = ScriptedProvider::new(vec![Vec::new()], 10);
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let orchestrator = Orchestrator::new(config.clone(), Box::new(provider)).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = orchestrator.run(&["q".to_string()], &cancel).await.unwrap();

        assert!(report.cancelled);
        assert!(report.queries.is_empty());
        assert!(!config.output_dir.join("q").exists());
    }

    /// Tests that an artifact that cannot be written counts as failed and is not cached.
    #[tokio::test]
    async fn test_artifact_write_failure_is_not_cached() {
        let mut server = mockito::Server::new_async().await;
        let _mock = serve_docs(&mut server, 2).await;
        let candidates = docs(&server, 0..2);
        let provider = ScriptedProvider::new(vec![candidates.clone()], 10);

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let folder = config.output_dir.join("artifact");
        std::fs::create_dir_all(folder.join("doc0.pdf")).unwrap();

        let report = Orchestrator::new(config.clone(), Box::new(provider))
            .unwrap()
            .run(&["artifact".to_string()], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.queries[0].failed, 1);
        assert_eq!(report.queries[0].downloaded, 1);
        let cache = HashCache::load(&config.cache_file).unwrap();
        assert!(!cache.contains(&Fingerprint::of(&candidates[0])));
        assert!(cache.contains(&Fingerprint::of(&candidates[1])));

        let entries = Ledger::open(&folder).unwrap().entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].filename, "doc1.pdf");
    }

    /// Tests that a ledger that cannot be appended to fails the candidate and skips the cache.
    #[tokio::test]
    async fn test_ledger_failure_is_not_cached() {
        let mut server = mockito::Server::new_async().await;
        let _mock = serve_docs(&mut server, 2).await;
        let candidates = docs(&server, 0..2);
        let provider = ScriptedProvider::new(vec![candidates.clone()], 10);

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let folder = config.output_dir.join("ledger");
        std::fs::create_dir_all(folder.join(crate::LEDGER_FILE_NAME)).unwrap();

        let report = Orchestrator::new(config.clone(), Box::new(provider))
            .unwrap()
            .run(&["ledger".to_string()], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.queries[0].failed, 2);
        assert_eq!(report.queries[0].downloaded, 0);
        let cache = HashCache::load(&config.cache_file).unwrap();
        assert!(cache.is_empty());
        assert!(!cache.contains(&Fingerprint::of(&candidates[0])));
    }

    /// Cancels `cancel` as soon as the first download is reported.
    fn cancel_on_first_download(
        mut events: tokio::sync::mpsc::UnboundedReceiver<RunEvent>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if matches!(event, RunEvent::Downloaded { .. }) {
                    cancel.cancel();
                    break;
                }
            }
        })
    }

    /// Tests that cancelling mid-query leaves the remaining candidates unfetched.
    #[tokio::test]
    async fn test_cancel_between_candidates() {
        let mut server = mockito::Server::new_async().await;
        let _early = server
            .mock("GET", Matcher::Regex(r"^/doc[01]\.pdf$".into()))
            .with_status(200)
            .with_body("%PDF")
            .create_async()
            .await;
        let late = server
            .mock("GET", Matcher::Regex(r"^/doc[2-5]\.pdf$".into()))
            .with_status(200)
            .with_body("%PDF")
            .expect(0)
            .create_async()
            .await;
        let provider = ScriptedProvider::new(vec![docs(&server, 0..6)], 10);

        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let watcher = cancel_on_first_download(rx, cancel.clone());
        let orchestrator = Orchestrator::new(test_config(dir.path()), Box::new(provider))
            .unwrap()
            .with_events(tx);

        let report = orchestrator.run(&["cancel".to_string()], &cancel).await.unwrap();
        drop(orchestrator);
        watcher.await.unwrap();

        late.assert_async().await;
        assert!(report.cancelled);
        assert!((1..=2).contains(&report.queries[0].downloaded));
    }

    /// Tests that cancellation ends a query delay early and skips the next query.
    #[tokio::test]
    async fn test_cancel_during_query_delay() {
        let mut server = mockito::Server::new_async().await;
        let _mock = serve_docs(&mut server, 1).await;
        let provider = ScriptedProvider::new(vec![docs(&server, 0..1)], 10);

        let dir = tempfile::tempdir().unwrap();
        let config = HarvestConfig {
            query_delay_ms: 60_000,
            ..test_config(dir.path())
        };
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let _watcher = cancel_on_first_download(rx, cancel.clone());
        let orchestrator = Orchestrator::new(config.clone(), Box::new(provider))
            .unwrap()
            .with_events(tx);

        let queries = vec!["one".to_string(), "two".to_string()];
        let report = tokio::time::timeout(
            Duration::from_secs(10),
            orchestrator.run(&queries, &cancel),
        )
        .await
        .expect("run should stop waiting once cancelled")
        .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.queries.len(), 1);
        assert_eq!(report.queries[0].downloaded, 1);
        assert!(!config.output_dir.join("two").exists());
    }

    /// Tests that progress events are delivered in order.
    #[tokio::test]
    async fn test_events() {
        let mut server = mockito::Server::new_async().await;
        let _mock = serve_docs(&mut server, 1).await;
        let provider = ScriptedProvider::new(vec![docs(&server, 0..1)], 10);

        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let orchestrator = Orchestrator::new(test_config(dir.path()), Box::new(provider))
            .unwrap()
            .with_events(tx);
        orchestrator
            .run(&["events".to_string()], &CancellationToken::new())
            .await
            .unwrap();
        drop(orchestrator);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(RunEvent::QueryStarted { index: 0, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, RunEvent::Downloaded { .. })));
        assert!(matches!(events.last(), Some(RunEvent::Finished { .. })));
    }
}
