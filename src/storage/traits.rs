//! Record sink trait and error types
//!
//! This module defines the interface the harvester writes through and the
//! error types of the storage layer.

use crate::source::{Item, PageId};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record not found: {0}")]
    RecordNotFound(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors from fetching or storing a document artifact
///
/// These are scoped to one item and never fail its page.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Expected a document but got content type {content_type:?}")]
    ContentTypeMismatch { content_type: String },

    #[error("Download request failed: {0}")]
    Http(String),

    #[error("Failed to write document: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to record document path: {0}")]
    Storage(#[from] StorageError),
}

/// Byte stream of a document being downloaded
pub type ArtifactStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Result of writing one item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The detail URL was new
    Inserted,

    /// A record with this detail URL already existed and was left as is
    AlreadyPresent,
}

/// Outcome of a page, as written to the page log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLogStatus {
    Success,
    Failed,
}

impl PageLogStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Trait for record sink implementations
///
/// A sink is shared by every worker of a run, and by every source when sources
/// run concurrently, so all methods take `&self` and must be safe under
/// concurrent use. Uniqueness of `detail_url` is enforced here, not by callers.
#[async_trait]
pub trait RecordSink: Send + Sync {
    // ===== Records =====

    /// Stores an item unless one with the same detail URL exists
    ///
    /// # Returns
    ///
    /// * `Ok(UpsertOutcome::Inserted)` - The item was new
    /// * `Ok(UpsertOutcome::AlreadyPresent)` - A duplicate was skipped
    async fn upsert(&self, item: &Item) -> StorageResult<UpsertOutcome>;

    // ===== Artifacts =====

    /// Writes a document for an item and records its path
    ///
    /// Rejects HTML or text content before anything is written. The item's
    /// metadata row is untouched on failure.
    ///
    /// # Arguments
    ///
    /// * `item` - The item the document belongs to; `document_path` is set on success
    /// * `content` - The document bytes
    /// * `declared_content_type` - Content-Type reported by the server
    async fn store_artifact(
        &self,
        item: &mut Item,
        content: ArtifactStream,
        declared_content_type: &str,
    ) -> Result<PathBuf, DownloadError>;

    /// Returns true if the item's document is already stored on disk
    async fn has_artifact(&self, item: &Item) -> StorageResult<bool>;

    // ===== Page Log =====

    /// Appends a page outcome to the page log
    fn log_page(
        &self,
        source: &str,
        page: PageId,
        item_count: usize,
        status: PageLogStatus,
        error_message: Option<&str>,
    ) -> StorageResult<()>;
}
