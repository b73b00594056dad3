//! Storage module for persisting harvested records
//!
//! This module handles all database operations for the harvester, including:
//! - SQLite database initialization and schema management
//! - Deduplicated record writes keyed on detail URL
//! - Document artifact storage on disk
//! - The page log used to rebuild checkpoints
//! - Aggregate statistics

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteSink;
pub use traits::{
    ArtifactStream, DownloadError, PageLogStatus, RecordSink, StorageError, StorageResult,
    UpsertOutcome,
};

use std::path::Path;

/// Opens or creates the record database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
/// * `documents_dir` - Root directory for downloaded documents
pub fn open_sink(path: &Path, documents_dir: &Path) -> StorageResult<SqliteSink> {
    SqliteSink::new(path, documents_dir)
}

/// Aggregate view over the record store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub total_records: u64,
    pub total_regions: u64,
    pub total_years: u64,
    pub documents_downloaded: u64,

    /// Record count per source
    pub by_source: Vec<(String, u64)>,

    /// The ten regions with the most records
    pub top_regions: Vec<(String, u64)>,

    /// Record counts for the ten most recent years
    pub recent_years: Vec<(i32, u64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_log_status_strings() {
        assert_eq!(PageLogStatus::Success.to_db_string(), "success");
        assert_eq!(PageLogStatus::Failed.to_db_string(), "failed");
    }

    #[test]
    fn test_open_sink_creates_parent_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = dir.path().join("database").join("perda.db");
        open_sink(&db, &dir.path().join("docs")).unwrap();
        assert!(db.exists());
    }
}
