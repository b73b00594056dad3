use crate::retry::{ErrorKind, RemedyTag};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// One recorded failure, kept for diagnostics only
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub page: u32,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
    pub remedy: RemedyTag,
}

/// Append-only log of failures shared by all workers of a run
#[derive(Debug, Default)]
pub struct ErrorLog {
    records: Mutex<Vec<ErrorRecord>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record and mirrors it to the tracing error stream
    pub fn record(&self, kind: ErrorKind, page: u32, detail: impl Into<String>, remedy: RemedyTag) {
        let detail = detail.into();
        tracing::debug!(
            "Error recorded - kind: {}, page: {}, remedy: {}, detail: {}",
            kind,
            page,
            remedy,
            detail
        );

        let record = ErrorRecord {
            kind,
            page,
            detail,
            timestamp: Utc::now(),
            remedy,
        };

        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }

    /// Number of records per failure kind
    pub fn counts_by_kind(&self) -> BTreeMap<ErrorKind, u64> {
        let mut counts = BTreeMap::new();
        if let Ok(records) = self.records.lock() {
            for record in records.iter() {
                *counts.entry(record.kind).or_insert(0) += 1;
            }
        }
        counts
    }

    /// All records for one page, oldest first
    pub fn records_for(&self, page: u32) -> Vec<ErrorRecord> {
        self.records
            .lock()
            .map(|records| records.iter().filter(|r| r.page == page).cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
