//! SQLite record sink implementation
//!
//! This module provides a SQLite-based implementation of the RecordSink trait.
//! Documents are written to a directory tree next to the database rather than
//! into it; the database only keeps their paths.

use crate::source::{Item, PageId};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    ArtifactStream, DownloadError, PageLogStatus, RecordSink, StorageError, StorageResult,
    UpsertOutcome,
};
use crate::storage::CatalogStats;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tokio::io::AsyncWriteExt;

lazy_static! {
    static ref UNSAFE_CHARS_RE: Regex = Regex::new(r"[^\w\s-]").unwrap();
    static ref SEPARATORS_RE: Regex = Regex::new(r"[-\s]+").unwrap();
}

/// Maximum number of title characters used in a document file name
const MAX_FILE_STEM_CHARS: usize = 100;

/// Hex digits of the detail URL hash appended to each document file name
const URL_TAG_CHARS: usize = 10;

/// SQLite record sink
///
/// The connection sits behind a mutex so one sink can be shared across
/// workers and sources.
pub struct SqliteSink {
    conn: Mutex<Connection>,
    documents_dir: PathBuf,
}

impl SqliteSink {
    /// Opens or creates the database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `documents_dir` - Root directory for downloaded documents
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteSink)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path, documents_dir: impl Into<PathBuf>) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            documents_dir: documents_dir.into(),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory(documents_dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            documents_dir: documents_dir.into(),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Where the document for an item is stored
    ///
    /// Layout: `<documents_dir>/<source>/<year>/<region>/<title>_<tag>.pdf`,
    /// where the tag is a short hash of the detail URL so records sharing a
    /// title never share a file.
    pub fn artifact_path(&self, item: &Item) -> PathBuf {
        let year = item
            .year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "unknown_year".to_string());
        let region = item
            .region_name
            .as_deref()
            .map(sanitize_component)
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "unknown_region".to_string());

        let title: String = item.title.chars().take(MAX_FILE_STEM_CHARS).collect();
        let mut stem = sanitize_component(&title);
        if stem.is_empty() {
            stem = "untitled".to_string();
        }

        self.documents_dir
            .join(sanitize_component(&item.source))
            .join(year)
            .join(region)
            .join(format!("{}_{}.pdf", stem, url_tag(&item.detail_url)))
    }

    /// Number of stored records
    pub fn count_records(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Looks up a stored record by detail URL
    pub fn get_record(&self, detail_url: &str) -> StorageResult<Option<Item>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT source, title, number, year, region_name, region_type, status, detail_url,
                    document_url, document_path, description, metadata, captured_at
             FROM records WHERE detail_url = ?1",
        )?;

        let row = stmt
            .query_row(params![detail_url], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<i32>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, Option<String>>(10)?,
                    row.get::<_, Option<String>>(11)?,
                    row.get::<_, String>(12)?,
                ))
            })
            .optional()?;

        let Some((
            source,
            title,
            number,
            year,
            region_name,
            region_type,
            status,
            detail_url,
            document_url,
            document_path,
            description,
            metadata,
            captured_at,
        )) = row
        else {
            return Ok(None);
        };

        let metadata = match metadata {
            Some(json) => serde_json::from_str(&json)?,
            None => serde_json::Map::new(),
        };
        let captured_at = chrono::DateTime::parse_from_rfc3339(&captured_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Some(Item {
            title,
            number,
            year,
            region_name,
            region_type,
            detail_url,
            document_url,
            document_path,
            description,
            status,
            source,
            metadata,
            captured_at,
        }))
    }

    /// Pages logged as successful for a source, with their item counts
    ///
    /// When a page was logged more than once the latest entry wins.
    pub fn completed_pages(&self, source: &str) -> StorageResult<Vec<(PageId, usize)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT page, items_count FROM page_log
             WHERE source = ?1 AND status = ?2
               AND id IN (SELECT MAX(id) FROM page_log WHERE source = ?1 GROUP BY page)
             ORDER BY page",
        )?;

        let pages = stmt
            .query_map(
                params![source, PageLogStatus::Success.to_db_string()],
                |row| Ok((row.get::<_, i64>(0)? as PageId, row.get::<_, i64>(1)? as usize)),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(pages)
    }

    /// Aggregate statistics over all stored records
    pub fn statistics(&self) -> StorageResult<CatalogStats> {
        let conn = self.conn();

        let total_records: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))?;
        let total_regions: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT region_name) FROM records WHERE region_name IS NOT NULL",
            [],
            |r| r.get(0),
        )?;
        let total_years: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT year) FROM records WHERE year IS NOT NULL",
            [],
            |r| r.get(0),
        )?;
        let documents_downloaded: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE document_path IS NOT NULL",
            [],
            |r| r.get(0),
        )?;

        let by_source = conn
            .prepare("SELECT source, COUNT(*) FROM records GROUP BY source ORDER BY source")?
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<Result<Vec<_>, _>>()?;

        let top_regions = conn
            .prepare(
                "SELECT region_name, COUNT(*) AS n FROM records
                 WHERE region_name IS NOT NULL
                 GROUP BY region_name ORDER BY n DESC, region_name LIMIT 10",
            )?
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<Result<Vec<_>, _>>()?;

        let recent_years = conn
            .prepare(
                "SELECT year, COUNT(*) FROM records
                 WHERE year IS NOT NULL
                 GROUP BY year ORDER BY year DESC LIMIT 10",
            )?
            .query_map([], |row| Ok((row.get::<_, i32>(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CatalogStats {
            total_records: total_records as u64,
            total_regions: total_regions as u64,
            total_years: total_years as u64,
            documents_downloaded: documents_downloaded as u64,
            by_source,
            top_regions,
            recent_years,
        })
    }

    /// Records where an item's document was stored
    ///
    /// A document URL resolved after the record was created fills in a
    /// missing one; a URL already on the record is kept.
    fn record_document_path(
        &self,
        detail_url: &str,
        document_url: Option<&str>,
        path: &str,
    ) -> StorageResult<()> {
        let updated = self.conn().execute(
            "UPDATE records
             SET document_path = ?1, document_url = COALESCE(document_url, ?2), updated_at = ?3
             WHERE detail_url = ?4",
            params![path, document_url, Utc::now().to_rfc3339(), detail_url],
        )?;
        if updated == 0 {
            return Err(StorageError::RecordNotFound(detail_url.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordSink for SqliteSink {
    async fn upsert(&self, item: &Item) -> StorageResult<UpsertOutcome> {
        let metadata = serde_json::to_string(&item.metadata)?;
        let now = Utc::now().to_rfc3339();

        let changed = self.conn().execute(
            "INSERT INTO records (
                source, title, number, year, region_name, region_type, status, detail_url,
                document_url, document_path, description, metadata, captured_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(detail_url) DO NOTHING",
            params![
                item.source,
                item.title,
                item.number,
                item.year,
                item.region_name,
                item.region_type,
                item.status,
                item.detail_url,
                item.document_url,
                item.document_path,
                item.description,
                metadata,
                item.captured_at.to_rfc3339(),
                now,
            ],
        )?;

        Ok(if changed == 1 {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::AlreadyPresent
        })
    }

    async fn store_artifact(
        &self,
        item: &mut Item,
        mut content: ArtifactStream,
        declared_content_type: &str,
    ) -> Result<PathBuf, DownloadError> {
        let content_type = declared_content_type.to_ascii_lowercase();
        if content_type.contains("html") || content_type.contains("text") {
            return Err(DownloadError::ContentTypeMismatch {
                content_type: declared_content_type.to_string(),
            });
        }

        let path = self.artifact_path(item);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp = path.with_extension("pdf.part");
        let written = async {
            let mut file = tokio::fs::File::create(&temp).await?;
            while let Some(chunk) = content.next().await {
                file.write_all(&chunk?).await?;
            }
            file.sync_all().await?;
            Ok::<_, std::io::Error>(())
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(DownloadError::Io(e));
        }
        tokio::fs::rename(&temp, &path).await?;

        let path_str = path.display().to_string();
        self.record_document_path(&item.detail_url, item.document_url.as_deref(), &path_str)?;
        item.document_path = Some(path_str);

        Ok(path)
    }

    async fn has_artifact(&self, item: &Item) -> StorageResult<bool> {
        let stored: Option<Option<String>> = self
            .conn()
            .query_row(
                "SELECT document_path FROM records WHERE detail_url = ?1",
                params![item.detail_url],
                |row| row.get(0),
            )
            .optional()?;

        // Only a path recorded on this item's own row counts
        match stored.flatten() {
            Some(path) => Ok(tokio::fs::try_exists(&path).await.unwrap_or(false)),
            None => Ok(false),
        }
    }

    fn log_page(
        &self,
        source: &str,
        page: PageId,
        item_count: usize,
        status: PageLogStatus,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        self.conn().execute(
            "INSERT INTO page_log (source, page, items_count, status, error_message, logged_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                source,
                page,
                item_count as i64,
                status.to_db_string(),
                error_message,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

/// Short stable hash of a detail URL
fn url_tag(detail_url: &str) -> String {
    let mut tag = hex::encode(Sha256::digest(detail_url.as_bytes()));
    tag.truncate(URL_TAG_CHARS);
    tag
}

/// Reduces text to a safe path component: word characters joined by `_`
fn sanitize_component(text: &str) -> String {
    let stripped = UNSAFE_CHARS_RE.replace_all(text, "");
    SEPARATORS_RE
        .replace_all(stripped.trim(), "_")
        .into_owned()
}
