use crate::checkpoint::FlushPolicy;
use crate::retry::{BackoffPolicy, RetryPolicy};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure for Perda-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(rename = "source", default)]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Looks up a source by id
    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Applies a tuning preset to every source
    ///
    /// Sources the preset does not support keep their configured values.
    pub fn apply_preset(&mut self, preset: Preset) {
        for source in &mut self.sources {
            match preset.tuning(source.kind) {
                Some(tuning) => {
                    source.workers = tuning.workers;
                    source.min_items = tuning.min_items;
                }
                None => tracing::warn!(
                    "Preset {} is not supported for source {}, keeping its settings",
                    preset,
                    source.id
                ),
            }
        }
        self.retry.max_retries = preset.max_retries();
    }
}

/// Run-wide harvest behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct HarvestConfig {
    /// Directory holding one checkpoint file per source
    #[serde(rename = "checkpoint-dir", default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,

    /// Flush the checkpoint after this many page outcomes
    #[serde(rename = "flush-every-pages", default = "default_flush_every_pages")]
    pub flush_every_pages: u32,

    /// Flush the checkpoint at least this often (seconds)
    #[serde(rename = "flush-every-secs", default = "default_flush_every_secs")]
    pub flush_every_secs: u64,

    /// Download the document linked from each record
    #[serde(rename = "download-documents", default = "default_true")]
    pub download_documents: bool,
}

impl HarvestConfig {
    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy {
            every_pages: self.flush_every_pages,
            every: Duration::from_secs(self.flush_every_secs),
        }
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            flush_every_pages: default_flush_every_pages(),
            flush_every_secs: default_flush_every_secs(),
            download_documents: true,
        }
    }
}

/// Backoff curve in milliseconds
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BackoffConfig {
    #[serde(rename = "base-ms")]
    pub base_ms: u64,
    #[serde(rename = "max-ms")]
    pub max_ms: u64,
}

impl From<BackoffConfig> for BackoffPolicy {
    fn from(config: BackoffConfig) -> Self {
        BackoffPolicy::from_millis(config.base_ms, config.max_ms)
    }
}

impl From<BackoffPolicy> for BackoffConfig {
    fn from(policy: BackoffPolicy) -> Self {
        Self {
            base_ms: policy.base.as_millis() as u64,
            max_ms: policy.max.as_millis() as u64,
        }
    }
}

/// Retry budget and backoff curves
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per page per run
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Maximum attempts for pages that keep failing to parse
    #[serde(rename = "parse-error-limit")]
    pub parse_error_limit: u32,

    pub network: BackoffConfig,
    #[serde(rename = "rate-limit")]
    pub rate_limit: BackoffConfig,
    pub connection: BackoffConfig,
    #[serde(rename = "low-items")]
    pub low_items: BackoffConfig,
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            parse_error_limit: self.parse_error_limit,
            network: self.network.into(),
            rate_limit: self.rate_limit.into(),
            connection: self.connection.into(),
            low_items: self.low_items.into(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            parse_error_limit: policy.parse_error_limit,
            network: policy.network.into(),
            rate_limit: policy.rate_limit.into(),
            connection: policy.connection.into(),
            low_items: policy.low_items.into(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the harvester
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the harvester
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the harvester
    #[serde(rename = "contact-url", default)]
    pub contact_url: Option<String>,

    /// Email address for harvester-related contact
    #[serde(rename = "contact-email", default)]
    pub contact_email: Option<String>,
}

impl UserAgentConfig {
    /// Formats the User-Agent header: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        let contact: Vec<String> = [
            self.contact_url.as_ref().map(|u| format!("+{}", u)),
            self.contact_email.clone(),
        ]
        .into_iter()
        .flatten()
        .collect();

        if contact.is_empty() {
            format!("{}/{}", self.crawler_name, self.crawler_version)
        } else {
            format!(
                "{}/{} ({})",
                self.crawler_name,
                self.crawler_version,
                contact.join("; ")
            )
        }
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "PerdaHarvest".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: None,
            contact_email: None,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Root directory for downloaded documents
    #[serde(rename = "documents-dir", default = "default_documents_dir")]
    pub documents_dir: String,
}

/// Which adapter a source uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    PeraturanGoId,
    Bpk,
}

/// One remote catalog
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Stable identifier used for checkpoints and record tagging
    pub id: String,

    pub kind: SourceKind,

    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Validation floor for every page except the last
    #[serde(rename = "min-items")]
    pub min_items: usize,

    #[serde(rename = "items-per-page")]
    pub items_per_page: u32,

    /// Fallback for computing the page count
    #[serde(rename = "expected-total-items", default)]
    pub expected_total_items: Option<u64>,

    /// Page count used when the site does not expose one
    #[serde(rename = "expected-total-pages", default)]
    pub expected_total_pages: Option<u32>,

    /// Upper bound on discovered pages
    #[serde(rename = "max-pages", default)]
    pub max_pages: Option<u32>,

    /// Regulation type filters (BPK search)
    #[serde(default)]
    pub jenis: Vec<String>,

    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Politeness delay bounds before each page attempt (milliseconds)
    #[serde(rename = "delay-min-ms", default)]
    pub delay_min_ms: u64,
    #[serde(rename = "delay-max-ms", default)]
    pub delay_max_ms: u64,
}

/// Tuning presets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// More workers, lower floors, fewer retries
    Fast,
    /// Conservative concurrency, full floors
    Stable,
    /// Maximum throughput; peraturan.go.id only
    Ultra,
}

/// Per-source values a preset sets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresetTuning {
    pub workers: usize,
    pub min_items: usize,
}

impl Preset {
    /// Tuning for a source kind, or None if the preset does not support it
    pub fn tuning(&self, kind: SourceKind) -> Option<PresetTuning> {
        let (workers, min_items) = match (self, kind) {
            (Self::Fast, SourceKind::PeraturanGoId) => (40, 12),
            (Self::Stable, SourceKind::PeraturanGoId) => (15, 18),
            (Self::Ultra, SourceKind::PeraturanGoId) => (50, 10),
            (Self::Fast, SourceKind::Bpk) => (15, 8),
            (Self::Stable, SourceKind::Bpk) => (5, 8),
            (Self::Ultra, SourceKind::Bpk) => return None,
        };
        Some(PresetTuning { workers, min_items })
    }

    pub fn max_retries(&self) -> u32 {
        match self {
            Self::Fast => 3,
            Self::Stable => 5,
            Self::Ultra => 2,
        }
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "stable" => Ok(Self::Stable),
            "ultra" => Ok(Self::Ultra),
            other => Err(format!("unknown preset '{}'", other)),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fast => "fast",
            Self::Stable => "stable",
            Self::Ultra => "ultra",
        };
        f.write_str(name)
    }
}

fn default_checkpoint_dir() -> String {
    "./state".to_string()
}

fn default_flush_every_pages() -> u32 {
    10
}

fn default_flush_every_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_documents_dir() -> String {
    "./docs".to_string()
}

fn default_workers() -> usize {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}
