//! Configuration module for Perda-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files,
//! and the tuning presets that can be layered on top.
//!
//! # Example
//!
//! ```no_run
//! use perda_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! for source in &config.sources {
//!     println!("{}: {} workers", source.id, source.workers);
//! }
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BackoffConfig, Config, HarvestConfig, OutputConfig, Preset, PresetTuning, RetryConfig,
    SourceConfig, SourceKind, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};

pub use validation::validate;
