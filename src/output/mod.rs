//! Output module for run summaries and reports
//!
//! This module handles:
//! - Printing per-source run summaries to the terminal
//! - Printing catalog statistics from the record store
//! - Writing a markdown run report alongside the checkpoints

mod markdown;
pub mod stats;

pub use markdown::{format_run_report, write_run_report, RunReport};
pub use stats::{format_statistics, format_summary, print_statistics, print_summary};

use std::path::{Path, PathBuf};

/// Path of the run report inside the checkpoint directory
pub fn report_path(checkpoint_dir: &Path) -> PathBuf {
    checkpoint_dir.join("harvest_report.md")
}
