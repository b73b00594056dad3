//! Source adapters for remote regulation catalogs
//!
//! This module contains:
//! - The `SourceAdapter` contract every catalog implements
//! - The `Item` record produced by page parsing
//! - Page and discovery error types consumed by the retry classifier
//! - Concrete adapters for peraturan.go.id and peraturan.bpk.go.id
//! - Shared HTTP and text-extraction helpers

mod bpk;
mod http;
mod peraturan;
mod text;
mod traits;

pub use bpk::BpkAdapter;
pub use http::{build_http_client, fetch_html};
pub use peraturan::PeraturanGoIdAdapter;
pub use text::{extract_number, extract_region, extract_year, RegionInfo};
pub use traits::SourceAdapter;

use crate::config::{SourceConfig, SourceKind, UserAgentConfig};
use crate::HarvestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// 1-based ordinal of a page within a source
pub type PageId = u32;

/// One scraped regulation record
///
/// Created by an adapter while parsing a page. The only field that changes
/// afterwards is `document_path`, once the document has been downloaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub title: String,
    pub number: Option<String>,
    pub year: Option<i32>,
    pub region_name: Option<String>,
    pub region_type: Option<String>,

    /// Natural unique key across all sources and runs
    pub detail_url: String,

    pub document_url: Option<String>,
    pub document_path: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,

    /// Identifier of the source that produced the item
    pub source: String,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    pub captured_at: DateTime<Utc>,
}

impl Item {
    /// Creates an item with only the required fields set
    pub fn new(source: &str, title: impl Into<String>, detail_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            number: None,
            year: None,
            region_name: None,
            region_type: None,
            detail_url: detail_url.into(),
            document_url: None,
            document_path: None,
            description: None,
            status: None,
            source: source.to_string(),
            metadata: serde_json::Map::new(),
            captured_at: Utc::now(),
        }
    }
}

/// Failure of a single page fetch-and-parse attempt
///
/// The variants mirror the retry taxonomy so every failure can be classified;
/// there is deliberately no catch-all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("Request timed out: {detail}")]
    Timeout { detail: String },

    #[error("Rate limited: {detail}")]
    RateLimit {
        retry_after: Option<Duration>,
        detail: String,
    },

    #[error("Connection failed: {detail}")]
    Connection { detail: String },

    #[error("Parse error: {detail}")]
    Parse { detail: String },

    #[error("Insufficient items: {found} (min: {floor})")]
    LowItems { found: usize, floor: usize },
}

/// The page universe of a source could not be determined
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    #[error("Page count indicator not found: {0}")]
    Unparseable(String),

    #[error("Failed to fetch listing: {0}")]
    Fetch(#[from] PageError),
}

/// Builds the adapter configured for a source
pub fn build_adapter(
    source: &SourceConfig,
    user_agent: &UserAgentConfig,
) -> Result<Arc<dyn SourceAdapter>, HarvestError> {
    let adapter: Arc<dyn SourceAdapter> = match source.kind {
        SourceKind::PeraturanGoId => Arc::new(PeraturanGoIdAdapter::new(source, user_agent)?),
        SourceKind::Bpk => Arc::new(BpkAdapter::new(source, user_agent)?),
    };
    Ok(adapter)
}
