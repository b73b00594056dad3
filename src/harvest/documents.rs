//! Document downloads for harvested records
//!
//! Failures here are scoped to one item: they are counted and logged by the
//! caller but never fail the page the item came from.

use crate::source::{Item, SourceAdapter};
use crate::storage::{DownloadError, RecordSink};
use futures::{StreamExt, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;

/// What happened to one item's document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOutcome {
    Downloaded,

    /// The document is already on disk
    AlreadyStored,

    /// Neither the listing nor the detail page links a document
    NoDocument,
}

/// Downloads documents with a small retry budget of its own
pub struct DocumentFetcher {
    client: Client,
    max_attempts: u32,
    retry_base: Duration,
}

impl DocumentFetcher {
    pub fn new(client: Client, max_attempts: u32, retry_base: Duration) -> Self {
        Self {
            client,
            max_attempts: max_attempts.max(1),
            retry_base,
        }
    }

    /// Fills in a missing `document_url` through the adapter's detail-page
    /// lookup
    pub async fn resolve_url(&self, adapter: &dyn SourceAdapter, item: &mut Item) {
        if item.document_url.is_none() {
            item.document_url = adapter.resolve_document_url(item).await;
            if let Some(url) = &item.document_url {
                tracing::debug!("Resolved document for {}: {}", item.detail_url, url);
            }
        }
    }

    /// Fetches and stores the document for an item, if it has one
    ///
    /// An item without a `document_url` gets one more chance through
    /// `resolve_url`; the sink keeps a URL found this way with the stored path.
    pub async fn fetch(
        &self,
        adapter: &dyn SourceAdapter,
        sink: &dyn RecordSink,
        item: &mut Item,
    ) -> Result<DocumentOutcome, DownloadError> {
        self.resolve_url(adapter, item).await;
        let Some(url) = item.document_url.clone() else {
            return Ok(DocumentOutcome::NoDocument);
        };

        if sink.has_artifact(item).await? {
            tracing::debug!("Document for {} already stored", item.detail_url);
            return Ok(DocumentOutcome::AlreadyStored);
        }

        let mut attempt = 1;
        loop {
            match self.download_once(sink, item, &url).await {
                Ok(()) => return Ok(DocumentOutcome::Downloaded),
                Err(e @ (DownloadError::Http(_) | DownloadError::Io(_)))
                    if attempt < self.max_attempts =>
                {
                    let wait = self.retry_base * 2u32.saturating_pow(attempt);
                    tracing::debug!(
                        "Download attempt {}/{} for {} failed: {}; retrying in {:?}",
                        attempt,
                        self.max_attempts,
                        url,
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn download_once(
        &self,
        sink: &dyn RecordSink,
        item: &mut Item,
        url: &str,
    ) -> Result<(), DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Http(format!("HTTP {} for {}", status, url)));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let stream = response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed();

        let path = sink.store_artifact(item, stream, &content_type).await?;
        tracing::debug!("Saved document {}", path.display());
        Ok(())
    }
}
