//! Worker loop for a single source run
//!
//! Each worker repeatedly:
//! - Takes the next ready page from the queue
//! - Waits a politeness delay, then fetches under a concurrency permit
//! - Checks the item count against the page's floor
//! - Stores items, downloads documents and records the page as completed, or
//! - Classifies the failure and either requeues the page or gives up on it

use crate::checkpoint::Checkpoint;
use crate::harvest::documents::{DocumentFetcher, DocumentOutcome};
use crate::harvest::scheduler::{politeness_delay, ConcurrencyGate, PageQueue, PageTask};
use crate::harvest::summary::{FailedPageReport, RunCounters};
use crate::retry::{classify, ErrorKind, ErrorLog, RemedyTag, RetryPolicy};
use crate::source::{Item, PageError, PageId, SourceAdapter};
use crate::state::PageState;
use crate::storage::{DownloadError, PageLogStatus, RecordSink, UpsertOutcome};
use crate::HarvestError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Everything the workers of one run share
pub(crate) struct RunContext {
    pub adapter: Arc<dyn SourceAdapter>,
    pub sink: Arc<dyn RecordSink>,
    pub checkpoint: Arc<Checkpoint>,
    pub documents: Option<Arc<DocumentFetcher>>,
    pub queue: PageQueue,
    pub gate: ConcurrencyGate,
    pub retry: RetryPolicy,
    pub errors: ErrorLog,
    pub counters: RunCounters,
    pub total_pages: u32,
    pub delay_min: Duration,
    pub delay_max: Duration,
    pub started: std::time::Instant,
    interrupted: AtomicBool,
}

impl RunContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapter: Arc<dyn SourceAdapter>,
        sink: Arc<dyn RecordSink>,
        checkpoint: Arc<Checkpoint>,
        documents: Option<Arc<DocumentFetcher>>,
        pending: Vec<PageId>,
        workers: usize,
        retry: RetryPolicy,
        total_pages: u32,
        delay: (Duration, Duration),
    ) -> Self {
        Self {
            adapter,
            sink,
            checkpoint,
            documents,
            queue: PageQueue::new(pending),
            gate: ConcurrencyGate::new(workers),
            retry,
            errors: ErrorLog::new(),
            counters: RunCounters::default(),
            total_pages,
            delay_min: delay.0,
            delay_max: delay.1,
            started: std::time::Instant::now(),
            interrupted: AtomicBool::new(false),
        }
    }

    /// Stops dispatching new pages; attempts already in flight still finish
    pub fn interrupt(&self) {
        if !self.interrupted.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                "Shutdown requested for {}, finishing {} in-flight pages",
                self.adapter.source_id(),
                self.queue.in_flight()
            );
        }
        self.queue.close();
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

/// Runs one worker until the queue is exhausted or closed
///
/// A storage or state-machine error is fatal to the whole run: the queue is
/// closed so the other workers drain, and the error is returned.
pub(crate) async fn run_worker(ctx: Arc<RunContext>, worker_id: usize) -> Result<(), HarvestError> {
    tracing::debug!("Worker {} started for {}", worker_id, ctx.adapter.source_id());

    while let Some(task) = ctx.queue.next().await {
        if let Err(e) = process_task(&ctx, task).await {
            tracing::error!("Worker {} stopping {}: {}", worker_id, ctx.adapter.source_id(), e);
            ctx.queue.close();
            return Err(e);
        }
    }

    tracing::debug!("Worker {} finished", worker_id);
    Ok(())
}

fn transition(task: &mut PageTask, to: PageState) -> Result<(), HarvestError> {
    if !task.state.can_transition_to(to) {
        return Err(HarvestError::InvalidTransition {
            page: task.page,
            from: task.state,
            to,
        });
    }
    task.state = to;
    Ok(())
}

async fn process_task(ctx: &RunContext, mut task: PageTask) -> Result<(), HarvestError> {
    transition(&mut task, PageState::InFlight)?;
    task.attempts += 1;

    match attempt_page(ctx, task.page).await {
        Ok(items) => complete_page(ctx, task, items).await,
        Err(error) => fail_attempt(ctx, task, error),
    }
}

/// One fetch-and-validate attempt
async fn attempt_page(ctx: &RunContext, page: PageId) -> Result<Vec<Item>, PageError> {
    let delay = politeness_delay(ctx.delay_min, ctx.delay_max);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let _permit = ctx.gate.acquire().await;
    let items = ctx.adapter.fetch_and_parse(page).await?;

    let floor = ctx.adapter.minimum_items(page, ctx.total_pages);
    if items.len() < floor {
        return Err(PageError::LowItems {
            found: items.len(),
            floor,
        });
    }
    Ok(items)
}

async fn complete_page(
    ctx: &RunContext,
    mut task: PageTask,
    items: Vec<Item>,
) -> Result<(), HarvestError> {
    let page = task.page;
    let source_id = ctx.adapter.source_id();
    let item_count = items.len();
    let mut inserted = 0u64;

    for mut item in items {
        // Records are stored complete, with any detail-page document URL
        if let Some(documents) = &ctx.documents {
            documents.resolve_url(ctx.adapter.as_ref(), &mut item).await;
        }

        match ctx.sink.upsert(&item).await? {
            UpsertOutcome::Inserted => inserted += 1,
            UpsertOutcome::AlreadyPresent => {
                RunCounters::add(&ctx.counters.duplicates_skipped, 1);
            }
        }

        if let Some(documents) = &ctx.documents {
            download_document(ctx, documents, page, &mut item).await;
        }
    }
    RunCounters::add(&ctx.counters.items_inserted, inserted);

    // Items are in the sink before the page is marked completed
    transition(&mut task, PageState::Completed)?;
    ctx.checkpoint.record_success(page, item_count);
    ctx.sink
        .log_page(source_id, page, item_count, PageLogStatus::Success, None)?;
    ctx.queue.finish();

    if task.attempts > 1 {
        tracing::info!(
            "Page {} succeeded on attempt {} with {} items",
            page,
            task.attempts,
            item_count
        );
    } else {
        tracing::debug!("Page {}: {} items ({} new)", page, item_count, inserted);
    }

    let completed = ctx.counters.completed_pages.fetch_add(1, Ordering::Relaxed) + 1;
    if completed % 10 == 0 {
        let rate = completed as f64 / ctx.started.elapsed().as_secs_f64().max(f64::EPSILON);
        tracing::info!(
            "Progress {}: {} pages completed, {} queued, {} items new, {:.2} pages/sec",
            source_id,
            completed,
            ctx.queue.queued(),
            RunCounters::get(&ctx.counters.items_inserted),
            rate
        );
    }

    flush_if_due(ctx);
    Ok(())
}

async fn download_document(
    ctx: &RunContext,
    documents: &DocumentFetcher,
    page: PageId,
    item: &mut Item,
) {
    match documents
        .fetch(ctx.adapter.as_ref(), ctx.sink.as_ref(), item)
        .await
    {
        Ok(DocumentOutcome::Downloaded) => {
            RunCounters::add(&ctx.counters.documents_downloaded, 1);
        }
        Ok(DocumentOutcome::AlreadyStored | DocumentOutcome::NoDocument) => {}
        Err(e) => {
            RunCounters::add(&ctx.counters.download_errors, 1);
            let remedy = match e {
                DownloadError::ContentTypeMismatch { .. } => RemedyTag::CheckContentType,
                _ => RemedyTag::RetryRequest,
            };
            tracing::warn!("Document download failed for {}: {}", item.detail_url, e);
            ctx.errors.record(
                ErrorKind::DownloadError,
                page,
                format!("{}: {}", item.detail_url, e),
                remedy,
            );
        }
    }
}

fn fail_attempt(ctx: &RunContext, mut task: PageTask, error: PageError) -> Result<(), HarvestError> {
    let page = task.page;
    let classification = classify(&error, &ctx.retry);
    let reason = error.to_string();
    ctx.errors
        .record(classification.kind, page, reason.clone(), classification.remedy);

    if classification.reduce_concurrency && ctx.gate.shrink() {
        tracing::warn!(
            "Rate limited on page {}, concurrency lowered to {}",
            page,
            ctx.gate.limit()
        );
    }

    let limit = ctx.retry.attempt_limit(&classification);
    if classification.retryable && task.attempts < limit {
        transition(&mut task, PageState::Retrying)?;
        let wait = classification.backoff.delay(task.attempts);
        tracing::warn!(
            "Page {} attempt {}/{} failed ({}): {}; retrying in {:.1}s",
            page,
            task.attempts,
            limit,
            classification.kind,
            reason,
            wait.as_secs_f64()
        );

        task.ready_at = Instant::now() + wait;
        RunCounters::add(&ctx.counters.retries, 1);
        ctx.queue.requeue(task);
        return Ok(());
    }

    transition(&mut task, PageState::PermanentlyFailed)?;
    tracing::error!(
        "Page {} permanently failed after {} attempts ({}): {}",
        page,
        task.attempts,
        classification.kind,
        reason
    );

    ctx.checkpoint
        .record_failure(page, &reason, classification.kind, task.attempts);
    ctx.sink.log_page(
        ctx.adapter.source_id(),
        page,
        0,
        PageLogStatus::Failed,
        Some(&reason),
    )?;
    ctx.counters.push_failure(FailedPageReport {
        page,
        kind: classification.kind,
        reason,
        attempts: task.attempts,
    });
    ctx.queue.finish();

    flush_if_due(ctx);
    Ok(())
}

/// Periodic flushes are best effort; the final flush at the end of the run is not
fn flush_if_due(ctx: &RunContext) {
    if let Err(e) = ctx.checkpoint.maybe_flush() {
        tracing::warn!(
            "Checkpoint flush failed for {}: {}",
            ctx.adapter.source_id(),
            e
        );
    }
}
