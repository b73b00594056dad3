use crate::retry::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Last known failure of a page that exhausted its retries in some run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPage {
    /// Human-readable reason from the final attempt
    pub reason: String,

    /// Classified kind of the final failure
    pub kind: ErrorKind,

    /// Number of attempts spent on the page before giving up
    pub retry_count: u32,

    /// When the page was marked as permanently failed
    pub failed_at: DateTime<Utc>,
}

/// Durable per-source progress record
///
/// Only pages in `completed_pages` are skipped on resume. Entries in
/// `failed_pages` describe the last run's outcome and are retried from scratch
/// the next time the source is harvested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeState {
    #[serde(default)]
    pub completed_pages: BTreeSet<u32>,

    #[serde(default)]
    pub failed_pages: BTreeMap<u32, FailedPage>,

    /// Running count of items accepted from completed pages
    #[serde(default)]
    pub total_items: u64,

    pub updated_at: DateTime<Utc>,
}

impl ScrapeState {
    /// Creates an empty state, used when no checkpoint exists yet
    pub fn new() -> Self {
        Self {
            completed_pages: BTreeSet::new(),
            failed_pages: BTreeMap::new(),
            total_items: 0,
            updated_at: Utc::now(),
        }
    }

    /// Returns true if the page finished successfully in an earlier flush or run
    pub fn is_completed(&self, page: u32) -> bool {
        self.completed_pages.contains(&page)
    }

    /// Marks a page as completed and clears any stale failure entry
    pub fn mark_completed(&mut self, page: u32, item_count: usize) {
        if self.completed_pages.insert(page) {
            self.total_items += item_count as u64;
        }
        self.failed_pages.remove(&page);
        self.updated_at = Utc::now();
    }

    /// Records the last failure of a page that gave up in this run
    pub fn mark_failed(&mut self, page: u32, failure: FailedPage) {
        // A page that already completed keeps its completion
        if !self.completed_pages.contains(&page) {
            self.failed_pages.insert(page, failure);
        }
        self.updated_at = Utc::now();
    }

    /// Page identifiers in `[1, total_pages]` that still need work
    pub fn pending_pages(&self, total_pages: u32) -> Vec<u32> {
        (1..=total_pages)
            .filter(|page| !self.completed_pages.contains(page))
            .collect()
    }
}

impl Default for ScrapeState {
    fn default() -> Self {
        Self::new()
    }
}
