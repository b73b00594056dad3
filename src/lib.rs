//! Perda-Harvest: a resumable harvester for paginated regulation catalogs
//!
//! This crate walks every page of one or more remote HTML catalogs, validates
//! that each page yielded a complete batch of records, retries pages that come
//! back short or fail, and stores deduplicated records in a shared SQLite
//! database. Progress is checkpointed per source so an interrupted run picks up
//! where it stopped.

pub mod checkpoint;
pub mod config;
pub mod harvest;
pub mod output;
pub mod retry;
pub mod source;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Perda-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Page discovery failed for source {source_id}: {source}")]
    Discovery {
        source_id: String,
        source: source::DiscoveryError,
    },

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] checkpoint::CheckpointError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Invalid state transition for page {page}: {from:?} -> {to:?}")]
    InvalidTransition {
        page: u32,
        from: state::PageState,
        to: state::PageState,
    },

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Perda-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use harvest::{HarvestSettings, HarvestSummary, Harvester};
pub use source::{Item, PageId, SourceAdapter};
pub use state::{PageState, ScrapeState};
