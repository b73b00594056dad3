//! Checkpoint store for resumable harvests
//!
//! A `Checkpoint` owns the in-memory `ScrapeState` of one source and persists
//! it through a `CheckpointBackend`. Workers report page outcomes through
//! `record_success` and `record_failure`; `maybe_flush` writes the state out
//! according to the configured `FlushPolicy`, and a final `flush` at the end
//! of every run is mandatory.

mod file;

pub use file::JsonFileBackend;

use crate::retry::ErrorKind;
use crate::source::PageId;
use crate::state::{FailedPage, ScrapeState};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Checkpoint persistence errors
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize checkpoint: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt checkpoint at {path}: {source}")]
    Corrupt {
        path: String,
        source: serde_json::Error,
    },
}

/// Durable storage for per-source scrape state
pub trait CheckpointBackend: Send + Sync {
    /// Loads the stored state, or `None` if the source has no checkpoint yet
    fn load(&self, source_id: &str) -> Result<Option<ScrapeState>, CheckpointError>;

    /// Atomically replaces the stored state
    fn save(&self, source_id: &str, state: &ScrapeState) -> Result<(), CheckpointError>;

    /// Removes the stored state
    fn clear(&self, source_id: &str) -> Result<(), CheckpointError>;
}

/// When to persist the checkpoint during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Flush after this many recorded page outcomes
    pub every_pages: u32,

    /// Flush when this much time has passed since the last flush
    pub every: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            every_pages: 10,
            every: Duration::from_secs(30),
        }
    }
}

struct Inner {
    state: ScrapeState,
    dirty: u32,
    last_flush: Instant,
}

/// Per-source scrape state with flush-on-policy persistence
///
/// State is only mutated through these methods. The state lock is held just
/// long enough to update or snapshot; backend writes happen under a separate
/// flush lock so workers are never blocked on disk I/O.
pub struct Checkpoint {
    source_id: String,
    backend: Arc<dyn CheckpointBackend>,
    policy: FlushPolicy,
    inner: Mutex<Inner>,
    flush_lock: Mutex<()>,
}

impl Checkpoint {
    /// Loads the checkpoint for a source
    ///
    /// A missing checkpoint yields empty state. A corrupt one is logged and
    /// also treated as empty, so a damaged file never blocks a run.
    ///
    /// # Arguments
    ///
    /// * `backend` - Where the state is persisted
    /// * `source_id` - The source whose state to load
    /// * `policy` - Flush policy for this run
    pub fn load(
        backend: Arc<dyn CheckpointBackend>,
        source_id: &str,
        policy: FlushPolicy,
    ) -> Result<Self, CheckpointError> {
        let state = match backend.load(source_id) {
            Ok(Some(state)) => {
                tracing::info!(
                    "Loaded checkpoint for {}: {} pages completed, {} failed, {} items",
                    source_id,
                    state.completed_pages.len(),
                    state.failed_pages.len(),
                    state.total_items
                );
                state
            }
            Ok(None) => ScrapeState::new(),
            Err(e @ CheckpointError::Corrupt { .. }) => {
                tracing::warn!("{}; starting {} from empty state", e, source_id);
                ScrapeState::new()
            }
            Err(e) => return Err(e),
        };

        Ok(Self::with_state(backend, source_id, policy, state))
    }

    /// Starts from empty state, discarding any stored checkpoint
    pub fn fresh(
        backend: Arc<dyn CheckpointBackend>,
        source_id: &str,
        policy: FlushPolicy,
    ) -> Result<Self, CheckpointError> {
        backend.clear(source_id)?;
        Ok(Self::with_state(backend, source_id, policy, ScrapeState::new()))
    }

    fn with_state(
        backend: Arc<dyn CheckpointBackend>,
        source_id: &str,
        policy: FlushPolicy,
        state: ScrapeState,
    ) -> Self {
        Self {
            source_id: source_id.to_string(),
            backend,
            policy,
            inner: Mutex::new(Inner {
                state,
                dirty: 0,
                last_flush: Instant::now(),
            }),
            flush_lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Copy of the current in-memory state
    pub fn snapshot(&self) -> ScrapeState {
        self.lock().state.clone()
    }

    pub fn is_completed(&self, page: PageId) -> bool {
        self.lock().state.is_completed(page)
    }

    /// Pages in `[1, total_pages]` not yet completed
    pub fn pending_pages(&self, total_pages: u32) -> Vec<PageId> {
        self.lock().state.pending_pages(total_pages)
    }

    /// Marks a page completed and clears any failure entry for it
    pub fn record_success(&self, page: PageId, item_count: usize) {
        let mut inner = self.lock();
        inner.state.mark_completed(page, item_count);
        inner.dirty += 1;
    }

    /// Records a page that exhausted its retries in this run
    ///
    /// A page already completed stays completed.
    pub fn record_failure(&self, page: PageId, reason: &str, kind: ErrorKind, retry_count: u32) {
        let failure = FailedPage {
            reason: reason.to_string(),
            kind,
            retry_count,
            failed_at: Utc::now(),
        };

        let mut inner = self.lock();
        inner.state.mark_failed(page, failure);
        inner.dirty += 1;
    }

    /// Writes the current state to the backend
    ///
    /// Safe to call repeatedly; concurrent callers are serialised so an older
    /// snapshot never overwrites a newer one.
    pub fn flush(&self) -> Result<(), CheckpointError> {
        let _guard = self.flush_lock.lock().unwrap_or_else(|e| e.into_inner());

        let snapshot = {
            let mut inner = self.lock();
            inner.state.updated_at = Utc::now();
            inner.dirty = 0;
            inner.last_flush = Instant::now();
            inner.state.clone()
        };

        self.backend.save(&self.source_id, &snapshot)?;
        tracing::debug!(
            "Checkpoint flushed for {}: {} pages completed",
            self.source_id,
            snapshot.completed_pages.len()
        );
        Ok(())
    }

    /// Flushes if the policy's page count or interval has been reached
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - A flush happened
    /// * `Ok(false)` - Nothing was due
    pub fn maybe_flush(&self) -> Result<bool, CheckpointError> {
        let due = {
            let inner = self.lock();
            inner.dirty > 0
                && (inner.dirty >= self.policy.every_pages
                    || inner.last_flush.elapsed() >= self.policy.every)
        };

        if due {
            self.flush()?;
        }
        Ok(due)
    }

    /// Marks pages `1..=last_page` completed without fetching them
    ///
    /// Used to seed a checkpoint for a source that was harvested before
    /// checkpointing existed.
    pub fn mark_completed_through(&self, last_page: PageId) -> usize {
        let mut inner = self.lock();
        let before = inner.state.completed_pages.len();
        for page in 1..=last_page {
            inner.state.mark_completed(page, 0);
        }
        let added = inner.state.completed_pages.len() - before;
        inner.dirty += added as u32;
        added
    }

    /// Rebuilds completed pages from the sink's page log
    ///
    /// Each entry is a page that was logged as successfully stored, with its
    /// item count. Returns how many pages were newly marked completed.
    pub fn rebuild_from_page_log<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (PageId, usize)>,
    {
        let mut inner = self.lock();
        let before = inner.state.completed_pages.len();
        for (page, item_count) in entries {
            inner.state.mark_completed(page, item_count);
        }
        let added = inner.state.completed_pages.len() - before;
        inner.dirty += added as u32;
        added
    }
}
