//! Markdown run reports
//!
//! Written next to the checkpoints after every harvest run so an operator can
//! see which pages failed and why without digging through logs.

use crate::harvest::HarvestSummary;
use crate::storage::CatalogStats;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Everything a run report covers
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub config_hash: String,
    pub summaries: Vec<HarvestSummary>,

    /// Sources that could not be harvested at all, with the reason
    pub aborted_sources: Vec<(String, String)>,

    pub catalog: Option<CatalogStats>,
}

/// Writes a run report as markdown
///
/// # Arguments
///
/// * `report` - The run to describe
/// * `output_path` - Path where the markdown file should be written
pub fn write_run_report(report: &RunReport, output_path: &Path) -> std::io::Result<()> {
    let markdown = format_run_report(report);

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a run report as markdown
pub fn format_run_report(report: &RunReport) -> String {
    let mut md = String::new();

    md.push_str("# Perda-Harvest Run Report\n\n");

    md.push_str("## Run Information\n\n");
    md.push_str(&format!(
        "- **Started**: {}\n",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    md.push_str(&format!("- **Config Hash**: {}\n", report.config_hash));
    md.push_str(&format!("- **Sources**: {}\n\n", report.summaries.len()));

    if !report.summaries.is_empty() {
        md.push_str("## Sources\n\n");
        md.push_str("| Source | Pages | Skipped | Completed | Failed | New Items | Duplicates | Retries | Documents | Status |\n");
        md.push_str("|--------|-------|---------|-----------|--------|-----------|------------|---------|-----------|--------|\n");
        for summary in &report.summaries {
            let status = if summary.interrupted {
                "interrupted"
            } else if summary.failed_pages.is_empty() {
                "complete"
            } else {
                "partial"
            };
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {} | {} | {} | {} |\n",
                summary.source_id,
                summary.total_pages,
                summary.skipped_pages,
                summary.completed_pages,
                summary.failed_pages.len(),
                summary.items_inserted,
                summary.duplicates_skipped,
                summary.retries,
                summary.documents_downloaded,
                status
            ));
        }
        md.push('\n');
    }

    for summary in &report.summaries {
        if !summary.errors_by_kind.is_empty() {
            md.push_str(&format!("## Errors: {}\n\n", summary.source_id));
            md.push_str("| Kind | Count |\n");
            md.push_str("|------|-------|\n");
            for (kind, count) in &summary.errors_by_kind {
                md.push_str(&format!("| {} | {} |\n", kind, count));
            }
            md.push('\n');
        }

        if !summary.failed_pages.is_empty() {
            md.push_str(&format!("## Failed Pages: {}\n\n", summary.source_id));
            md.push_str("| Page | Kind | Attempts | Reason |\n");
            md.push_str("|------|------|----------|--------|\n");
            for failed in summary.failed_pages.iter().take(100) {
                md.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    failed.page,
                    failed.kind,
                    failed.attempts,
                    failed.reason.replace('|', "\\|")
                ));
            }
            if summary.failed_pages.len() > 100 {
                md.push_str(&format!(
                    "\n... and {} more\n",
                    summary.failed_pages.len() - 100
                ));
            }
            md.push('\n');
        }
    }

    if !report.aborted_sources.is_empty() {
        md.push_str("## Aborted Sources\n\n");
        for (source, reason) in &report.aborted_sources {
            md.push_str(&format!("- **{}**: {}\n", source, reason));
        }
        md.push('\n');
    }

    if let Some(catalog) = &report.catalog {
        md.push_str("## Catalog\n\n");
        md.push_str(&format!("- **Total Records**: {}\n", catalog.total_records));
        md.push_str(&format!("- **Regions**: {}\n", catalog.total_regions));
        md.push_str(&format!("- **Years**: {}\n", catalog.total_years));
        md.push_str(&format!(
            "- **Documents Downloaded**: {}\n\n",
            catalog.documents_downloaded
        ));
    }

    md
}
