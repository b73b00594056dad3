//! Harvest orchestration for one source
//!
//! This module contains the run loop that ties a source adapter to the record
//! sink and the checkpoint, including:
//! - Discovering the page universe and skipping pages completed earlier
//! - Spreading pending pages over a pool of workers
//! - Retrying failed or short pages with classified backoff
//! - Flushing the checkpoint periodically and once more at the end
//! - Stopping cleanly on a shutdown signal

mod coordinator;
mod documents;
mod scheduler;
mod summary;

pub use documents::{DocumentFetcher, DocumentOutcome};
pub use scheduler::{politeness_delay, ConcurrencyGate, PageQueue, PageTask};
pub use summary::{FailedPageReport, HarvestSummary};

use crate::checkpoint::Checkpoint;
use crate::config::{Config, SourceConfig, UserAgentConfig};
use crate::retry::RetryPolicy;
use crate::source::{build_http_client, SourceAdapter};
use crate::storage::RecordSink;
use crate::HarvestError;
use coordinator::{run_worker, RunContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Per-run tuning for one source
#[derive(Debug, Clone)]
pub struct HarvestSettings {
    /// Number of concurrent workers
    pub workers: usize,

    pub retry: RetryPolicy,

    /// Download the document linked from each record
    pub download_documents: bool,

    /// Politeness delay bounds before each attempt
    pub delay_min: Duration,
    pub delay_max: Duration,

    pub document_timeout: Duration,
    pub document_attempts: u32,
    pub document_retry_base: Duration,

    pub user_agent: UserAgentConfig,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            workers: 10,
            retry: RetryPolicy::default(),
            download_documents: true,
            delay_min: Duration::ZERO,
            delay_max: Duration::ZERO,
            document_timeout: Duration::from_secs(60),
            document_attempts: 3,
            document_retry_base: Duration::from_secs(1),
            user_agent: UserAgentConfig::default(),
        }
    }
}

impl HarvestSettings {
    /// Settings for a source from the loaded configuration
    pub fn for_source(config: &Config, source: &SourceConfig) -> Self {
        Self {
            workers: source.workers,
            retry: config.retry.to_policy(),
            download_documents: config.harvest.download_documents,
            delay_min: Duration::from_millis(source.delay_min_ms),
            delay_max: Duration::from_millis(source.delay_max_ms),
            user_agent: config.user_agent.clone(),
            ..Self::default()
        }
    }
}

/// Drives a source adapter through every pending page
pub struct Harvester {
    settings: HarvestSettings,
    documents: Option<Arc<DocumentFetcher>>,
}

impl Harvester {
    /// Creates a harvester
    ///
    /// # Returns
    ///
    /// * `Ok(Harvester)` - Ready to run
    /// * `Err(HarvestError)` - The document HTTP client could not be built
    pub fn new(settings: HarvestSettings) -> Result<Self, HarvestError> {
        let documents = if settings.download_documents {
            let client = build_http_client(&settings.user_agent, settings.document_timeout)?;
            Some(Arc::new(DocumentFetcher::new(
                client,
                settings.document_attempts,
                settings.document_retry_base,
            )))
        } else {
            None
        };

        Ok(Self {
            settings,
            documents,
        })
    }

    /// Harvests every page of a source not yet completed in the checkpoint
    ///
    /// Pages are handed to at most `workers` concurrent workers. A page that
    /// keeps failing is recorded as failed in the checkpoint and the run moves
    /// on; only discovery, storage and checkpoint errors fail the run. The
    /// checkpoint is always flushed before returning.
    ///
    /// # Arguments
    ///
    /// * `adapter` - The source to harvest
    /// * `sink` - Where records and documents go
    /// * `checkpoint` - Progress for this source, loaded or fresh
    /// * `shutdown` - Flips to `true` to stop dispatching new pages
    pub async fn run(
        &self,
        adapter: Arc<dyn SourceAdapter>,
        sink: Arc<dyn RecordSink>,
        checkpoint: Arc<Checkpoint>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<HarvestSummary, HarvestError> {
        let source_id = adapter.source_id().to_string();

        let total_pages =
            adapter
                .total_pages()
                .await
                .map_err(|source| HarvestError::Discovery {
                    source_id: source_id.clone(),
                    source,
                })?;

        let pending = checkpoint.pending_pages(total_pages);
        let skipped_pages = (total_pages as u64).saturating_sub(pending.len() as u64);
        let workers = self.settings.workers.max(1);
        tracing::info!(
            "Harvesting {}: {} pages total, {} already completed, {} pending, {} workers",
            source_id,
            total_pages,
            skipped_pages,
            pending.len(),
            workers
        );

        let ctx = Arc::new(RunContext::new(
            adapter,
            sink,
            checkpoint.clone(),
            self.documents.clone(),
            pending,
            workers,
            self.settings.retry.clone(),
            total_pages,
            (self.settings.delay_min, self.settings.delay_max),
        ));

        if *shutdown.borrow() {
            ctx.interrupt();
        }
        let watcher = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                while shutdown.changed().await.is_ok() {
                    if *shutdown.borrow() {
                        ctx.interrupt();
                        return;
                    }
                }
            })
        };

        let handles: Vec<_> = (0..workers)
            .map(|id| tokio::spawn(run_worker(ctx.clone(), id)))
            .collect();

        let mut first_error = None;
        for handle in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(HarvestError::Worker(e.to_string())),
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        watcher.abort();

        let flushed = checkpoint.flush();
        if let Some(e) = first_error {
            if let Err(flush_error) = flushed {
                tracing::error!("Final checkpoint flush failed for {}: {}", source_id, flush_error);
            }
            return Err(e);
        }
        flushed?;

        let mut summary = HarvestSummary {
            source_id,
            total_pages,
            skipped_pages,
            errors_by_kind: ctx.errors.counts_by_kind(),
            interrupted: ctx.was_interrupted(),
            concurrency_limit: ctx.gate.limit(),
            elapsed: ctx.started.elapsed(),
            ..Default::default()
        };
        ctx.counters.fill(&mut summary);

        tracing::info!(
            "Finished {}: {} pages completed, {} failed, {} new items, {} duplicates, {} retries",
            summary.source_id,
            summary.completed_pages,
            summary.failed_pages.len(),
            summary.items_inserted,
            summary.duplicates_skipped,
            summary.retries
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointBackend, FlushPolicy, JsonFileBackend};
    use crate::retry::{BackoffPolicy, ErrorKind};
    use crate::source::{DiscoveryError, Item, PageError, PageId};
    use crate::storage::SqliteSink;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Adapter whose pages return scripted item counts or errors
    ///
    /// Each page pops its next scripted response; once the script runs out the
    /// page keeps returning `default_items` items.
    struct ScriptedAdapter {
        total: u32,
        default_items: usize,
        floors: HashMap<PageId, usize>,
        default_floor: usize,
        scripts: Mutex<HashMap<PageId, VecDeque<Result<usize, PageError>>>>,
        calls: Mutex<HashMap<PageId, u32>>,
        shared_urls: bool,
        gate_hook: Option<watch::Sender<bool>>,
        detail_document: Option<String>,
    }

    impl ScriptedAdapter {
        fn new(total: u32, default_items: usize, default_floor: usize) -> Self {
            Self {
                total,
                default_items,
                floors: HashMap::new(),
                default_floor,
                scripts: Mutex::new(HashMap::new()),
                calls: Mutex::new(HashMap::new()),
                shared_urls: false,
                gate_hook: None,
                detail_document: None,
            }
        }

        fn floor(mut self, page: PageId, floor: usize) -> Self {
            self.floors.insert(page, floor);
            self
        }

        fn script(self, page: PageId, responses: Vec<Result<usize, PageError>>) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(page, responses.into_iter().collect());
            self
        }

        fn calls(&self, page: PageId) -> u32 {
            self.calls.lock().unwrap().get(&page).copied().unwrap_or(0)
        }

        fn total_calls(&self) -> u32 {
            self.calls.lock().unwrap().values().sum()
        }
    }

    #[async_trait]
    impl SourceAdapter for ScriptedAdapter {
        fn source_id(&self) -> &str {
            "mock"
        }

        async fn total_pages(&self) -> Result<u32, DiscoveryError> {
            Ok(self.total)
        }

        async fn fetch_and_parse(&self, page: PageId) -> Result<Vec<Item>, PageError> {
            *self.calls.lock().unwrap().entry(page).or_insert(0) += 1;
            if let Some(hook) = &self.gate_hook {
                let _ = hook.send(true);
            }

            let scripted = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&page)
                .and_then(|script| script.pop_front());
            let count = match scripted {
                Some(Ok(count)) => count,
                Some(Err(e)) => return Err(e),
                None => self.default_items,
            };

            Ok((0..count)
                .map(|i| {
                    let url = if self.shared_urls {
                        format!("https://example.com/shared/{}", i)
                    } else {
                        format!("https://example.com/{}/{}", page, i)
                    };
                    Item::new("mock", format!("Perda {} {}", page, i), url)
                })
                .collect())
        }

        fn minimum_items(&self, page: PageId, _total_pages: u32) -> usize {
            self.floors.get(&page).copied().unwrap_or(self.default_floor)
        }

        async fn resolve_document_url(&self, _item: &Item) -> Option<String> {
            self.detail_document.clone()
        }
    }

    fn tiny_policy(max_retries: u32) -> RetryPolicy {
        let tiny = BackoffPolicy::from_millis(1, 5);
        RetryPolicy {
            max_retries,
            parse_error_limit: 3,
            network: tiny,
            rate_limit: tiny,
            connection: tiny,
            low_items: tiny,
        }
    }

    fn harvester(workers: usize, max_retries: u32) -> Harvester {
        Harvester::new(HarvestSettings {
            workers,
            retry: tiny_policy(max_retries),
            download_documents: false,
            ..Default::default()
        })
        .unwrap()
    }

    struct Fixture {
        _dir: TempDir,
        sink: Arc<SqliteSink>,
        backend: Arc<dyn CheckpointBackend>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let sink = Arc::new(SqliteSink::new_in_memory(dir.path().join("docs")).unwrap());
            let backend: Arc<dyn CheckpointBackend> =
                Arc::new(JsonFileBackend::new(dir.path().join("state")));
            Self {
                _dir: dir,
                sink,
                backend,
            }
        }

        fn checkpoint(&self) -> Arc<Checkpoint> {
            Arc::new(Checkpoint::load(self.backend.clone(), "mock", FlushPolicy::default()).unwrap())
        }

        async fn run(
            &self,
            harvester: &Harvester,
            adapter: Arc<ScriptedAdapter>,
        ) -> HarvestSummary {
            let (_tx, rx) = watch::channel(false);
            harvester
                .run(adapter, self.sink.clone(), self.checkpoint(), rx)
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_resolved_document_url_stored_with_record() {
        let fixture = Fixture::new();
        let mut adapter = ScriptedAdapter::new(1, 2, 0);
        // Nothing listens on the discard port, so every download fails fast
        adapter.detail_document = Some("http://127.0.0.1:9/perda.pdf".to_string());
        let harvester = Harvester::new(HarvestSettings {
            workers: 1,
            retry: tiny_policy(3),
            download_documents: true,
            document_retry_base: Duration::from_millis(1),
            ..Default::default()
        })
        .unwrap();

        let summary = fixture.run(&harvester, Arc::new(adapter)).await;

        assert_eq!(summary.completed_pages, 1);
        assert_eq!(summary.download_errors, 2);
        let stored = fixture
            .sink
            .get_record("https://example.com/1/0")
            .unwrap()
            .unwrap();
        assert_eq!(stored.document_url.as_deref(), Some("http://127.0.0.1:9/perda.pdf"));
        assert!(stored.document_path.is_none());
    }

    #[tokio::test]
    async fn test_short_last_page_completes() {
        let fixture = Fixture::new();
        let adapter = Arc::new(ScriptedAdapter::new(3, 5, 5).floor(3, 0).script(3, vec![Ok(2)]));

        let summary = fixture.run(&harvester(2, 5), adapter.clone()).await;

        assert_eq!(summary.completed_pages, 3);
        assert!(summary.failed_pages.is_empty());
        assert_eq!(summary.items_inserted, 12);
        assert_eq!(summary.retries, 0);
        assert_eq!(fixture.sink.count_records().unwrap(), 12);

        let state = fixture.backend.load("mock").unwrap().unwrap();
        assert_eq!(state.completed_pages.len(), 3);
        assert_eq!(state.total_items, 12);
    }

    #[tokio::test]
    async fn test_empty_last_page_completes() {
        let fixture = Fixture::new();
        let adapter = Arc::new(ScriptedAdapter::new(2, 5, 5).floor(2, 0).script(2, vec![Ok(0)]));

        let summary = fixture.run(&harvester(2, 5), adapter).await;
        assert_eq!(summary.completed_pages, 2);
        assert!(summary.is_clean());
    }

    #[tokio::test]
    async fn test_low_items_retried_until_full() {
        let fixture = Fixture::new();
        let adapter = Arc::new(
            ScriptedAdapter::new(1, 5, 5).script(1, vec![Ok(2), Ok(3), Ok(5)]),
        );

        let summary = fixture.run(&harvester(1, 5), adapter.clone()).await;

        assert_eq!(adapter.calls(1), 3);
        assert_eq!(summary.completed_pages, 1);
        assert_eq!(summary.retries, 2);
        assert_eq!(summary.errors_by_kind.get(&ErrorKind::LowItems), Some(&2));
        assert_eq!(summary.items_inserted, 5);
    }

    #[tokio::test]
    async fn test_persistent_low_items_fails_after_budget() {
        let fixture = Fixture::new();
        let adapter = Arc::new(ScriptedAdapter::new(2, 5, 5).script(2, vec![Ok(1); 10]));

        let summary = fixture.run(&harvester(2, 4), adapter.clone()).await;

        assert_eq!(adapter.calls(2), 4);
        assert_eq!(summary.completed_pages, 1);
        assert_eq!(summary.failed_pages.len(), 1);

        let report = &summary.failed_pages[0];
        assert_eq!(report.page, 2);
        assert_eq!(report.kind, ErrorKind::LowItems);
        assert_eq!(report.attempts, 4);
        assert_eq!(report.reason, "Insufficient items: 1 (min: 5)");

        // Short pages are never written
        assert_eq!(fixture.sink.count_records().unwrap(), 5);

        let state = fixture.backend.load("mock").unwrap().unwrap();
        let failed = state.failed_pages.get(&2).unwrap();
        assert_eq!(failed.kind, ErrorKind::LowItems);
        assert_eq!(failed.retry_count, 4);
        assert!(!state.completed_pages.contains(&2));
    }

    #[tokio::test]
    async fn test_parse_errors_capped() {
        let fixture = Fixture::new();
        let parse = || {
            Err(PageError::Parse {
                detail: "no listing".to_string(),
            })
        };
        let adapter = Arc::new(ScriptedAdapter::new(1, 5, 5).script(1, (0..10).map(|_| parse()).collect()));

        let summary = fixture.run(&harvester(1, 5), adapter.clone()).await;

        assert_eq!(adapter.calls(1), 3);
        assert_eq!(summary.failed_pages[0].kind, ErrorKind::ParseError);
    }

    #[tokio::test]
    async fn test_resume_skips_completed_pages() {
        let fixture = Fixture::new();
        {
            let checkpoint = fixture.checkpoint();
            checkpoint.mark_completed_through(10);
            checkpoint.flush().unwrap();
        }

        let adapter = Arc::new(ScriptedAdapter::new(15, 5, 5));
        let summary = fixture.run(&harvester(3, 5), adapter.clone()).await;

        for page in 1..=10 {
            assert_eq!(adapter.calls(page), 0, "page {} refetched", page);
        }
        for page in 11..=15 {
            assert_eq!(adapter.calls(page), 1);
        }
        assert_eq!(summary.skipped_pages, 10);
        assert_eq!(summary.completed_pages, 5);

        let state = fixture.backend.load("mock").unwrap().unwrap();
        assert_eq!(state.completed_pages.len(), 15);
    }

    #[tokio::test]
    async fn test_second_run_fetches_nothing() {
        let fixture = Fixture::new();
        let harvester = harvester(4, 5);

        let adapter = Arc::new(ScriptedAdapter::new(6, 5, 5));
        fixture.run(&harvester, adapter).await;

        let adapter = Arc::new(ScriptedAdapter::new(6, 5, 5));
        let summary = fixture.run(&harvester, adapter.clone()).await;
        assert_eq!(adapter.total_calls(), 0);
        assert_eq!(summary.skipped_pages, 6);
        assert_eq!(fixture.sink.count_records().unwrap(), 30);
    }

    #[tokio::test]
    async fn test_duplicates_stored_once() {
        let fixture = Fixture::new();
        let mut adapter = ScriptedAdapter::new(3, 4, 4);
        adapter.shared_urls = true;

        let summary = fixture.run(&harvester(1, 5), Arc::new(adapter)).await;

        assert_eq!(summary.completed_pages, 3);
        assert_eq!(summary.items_inserted, 4);
        assert_eq!(summary.duplicates_skipped, 8);
        assert_eq!(fixture.sink.count_records().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_every_page_reaches_terminal_state() {
        let fixture = Fixture::new();
        let timeout = || {
            Err(PageError::Timeout {
                detail: "slow".to_string(),
            })
        };
        let adapter = Arc::new(
            ScriptedAdapter::new(20, 5, 5)
                .script(4, vec![timeout(), Ok(5)])
                .script(9, vec![timeout(); 10])
                .script(
                    13,
                    vec![Err(PageError::Connection {
                        detail: "reset".to_string(),
                    })],
                ),
        );

        let summary = fixture.run(&harvester(6, 3), adapter.clone()).await;

        assert_eq!(summary.completed_pages, 19);
        assert_eq!(summary.failed_pages.len(), 1);
        assert_eq!(summary.failed_pages[0].page, 9);
        assert_eq!(summary.unprocessed_pages(), 0);
        assert_eq!(adapter.calls(9), 3);
        assert_eq!(adapter.calls(13), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_shrinks_concurrency() {
        let fixture = Fixture::new();
        let rate_limited = || {
            Err(PageError::RateLimit {
                retry_after: None,
                detail: "HTTP 429".to_string(),
            })
        };
        let adapter = Arc::new(
            ScriptedAdapter::new(4, 5, 5)
                .script(1, vec![rate_limited(), rate_limited()])
                .script(2, vec![rate_limited()]),
        );

        let summary = fixture.run(&harvester(4, 5), adapter).await;

        assert_eq!(summary.completed_pages, 4);
        assert_eq!(summary.errors_by_kind.get(&ErrorKind::RateLimit), Some(&3));
        assert_eq!(summary.retries, 3);
        assert_eq!(summary.concurrency_limit, 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_dispatch_and_flushes() {
        let fixture = Fixture::new();
        let (tx, rx) = watch::channel(false);
        let mut adapter = ScriptedAdapter::new(50, 5, 5);
        adapter.gate_hook = Some(tx);
        let adapter = Arc::new(adapter);

        let harvester = Harvester::new(HarvestSettings {
            workers: 1,
            retry: tiny_policy(5),
            download_documents: false,
            delay_min: Duration::from_millis(2),
            delay_max: Duration::from_millis(2),
            ..Default::default()
        })
        .unwrap();

        let summary = harvester
            .run(adapter.clone(), fixture.sink.clone(), fixture.checkpoint(), rx)
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert!(summary.completed_pages >= 1);
        assert!(summary.completed_pages < 50);
        assert_eq!(adapter.total_calls() as u64, summary.completed_pages);

        let state = fixture.backend.load("mock").unwrap().unwrap();
        assert_eq!(state.completed_pages.len() as u64, summary.completed_pages);
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let fixture = Fixture::new();
        let (_tx, rx) = watch::channel(true);
        let adapter = Arc::new(ScriptedAdapter::new(5, 5, 5));

        let summary = harvester(2, 5)
            .run(adapter.clone(), fixture.sink.clone(), fixture.checkpoint(), rx)
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert_eq!(adapter.total_calls(), 0);
        assert_eq!(summary.unprocessed_pages(), 5);
    }

    #[tokio::test]
    async fn test_zero_pages() {
        let fixture = Fixture::new();
        let adapter = Arc::new(ScriptedAdapter::new(0, 5, 5));
        let summary = fixture.run(&harvester(4, 5), adapter).await;
        assert_eq!(summary.total_pages, 0);
        assert!(summary.is_clean());
    }

    #[tokio::test]
    async fn test_page_log_matches_outcomes() {
        let fixture = Fixture::new();
        let adapter = Arc::new(ScriptedAdapter::new(3, 5, 5).script(3, vec![Ok(1); 5]));

        fixture.run(&harvester(2, 2), adapter).await;

        let mut logged = fixture.sink.completed_pages("mock").unwrap();
        logged.sort();
        assert_eq!(logged, vec![(1, 5), (2, 5)]);
    }
}
