use crate::retry::ErrorKind;
use crate::source::PageId;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A page that exhausted its attempts in this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedPageReport {
    pub page: PageId,
    pub kind: ErrorKind,
    pub reason: String,
    pub attempts: u32,
}

/// Outcome of harvesting one source
#[derive(Debug, Clone, Default)]
pub struct HarvestSummary {
    pub source_id: String,

    /// Pages the source reported
    pub total_pages: u32,

    /// Pages already completed by an earlier run
    pub skipped_pages: u64,

    /// Pages completed in this run
    pub completed_pages: u64,

    /// Pages that ended this run permanently failed, ordered by page
    pub failed_pages: Vec<FailedPageReport>,

    pub items_inserted: u64,
    pub duplicates_skipped: u64,

    /// Requeues across all pages
    pub retries: u64,

    pub documents_downloaded: u64,
    pub download_errors: u64,

    /// Failed attempts, including those that were retried successfully
    pub errors_by_kind: BTreeMap<ErrorKind, u64>,

    /// The run stopped on a shutdown signal before the queue drained
    pub interrupted: bool,

    /// Concurrency limit at the end of the run, after any rate-limit shrinking
    pub concurrency_limit: usize,

    pub elapsed: Duration,
}

impl HarvestSummary {
    /// Pages neither skipped, completed nor failed
    pub fn unprocessed_pages(&self) -> u64 {
        (self.total_pages as u64).saturating_sub(
            self.skipped_pages + self.completed_pages + self.failed_pages.len() as u64,
        )
    }

    pub fn is_clean(&self) -> bool {
        self.failed_pages.is_empty() && !self.interrupted
    }

    pub fn pages_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.completed_pages as f64 / secs
        } else {
            0.0
        }
    }
}

/// Counters updated by workers while a run is in progress
#[derive(Debug, Default)]
pub(crate) struct RunCounters {
    pub completed_pages: AtomicU64,
    pub items_inserted: AtomicU64,
    pub duplicates_skipped: AtomicU64,
    pub retries: AtomicU64,
    pub documents_downloaded: AtomicU64,
    pub download_errors: AtomicU64,
    failed_pages: Mutex<Vec<FailedPageReport>>,
}

impl RunCounters {
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn push_failure(&self, report: FailedPageReport) {
        self.failed_pages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(report);
    }

    /// Copies the counters into a summary
    pub fn fill(&self, summary: &mut HarvestSummary) {
        summary.completed_pages = Self::get(&self.completed_pages);
        summary.items_inserted = Self::get(&self.items_inserted);
        summary.duplicates_skipped = Self::get(&self.duplicates_skipped);
        summary.retries = Self::get(&self.retries);
        summary.documents_downloaded = Self::get(&self.documents_downloaded);
        summary.download_errors = Self::get(&self.download_errors);

        let mut failed = self
            .failed_pages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        failed.sort_by_key(|report| report.page);
        summary.failed_pages = failed;
    }
}
