//! Console output for run summaries and catalog statistics

use crate::harvest::HarvestSummary;
use crate::storage::CatalogStats;
use std::fmt::Write;

/// Formats catalog statistics for the terminal
pub fn format_statistics(stats: &CatalogStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Catalog Statistics ===\n");

    let _ = writeln!(out, "Overview:");
    let _ = writeln!(out, "  Total records: {}", stats.total_records);
    let _ = writeln!(out, "  Regions: {}", stats.total_regions);
    let _ = writeln!(out, "  Years: {}", stats.total_years);
    let _ = writeln!(out, "  Documents downloaded: {}", stats.documents_downloaded);
    let _ = writeln!(out);

    if !stats.by_source.is_empty() {
        let _ = writeln!(out, "Records by Source:");
        for (source, count) in &stats.by_source {
            let _ = writeln!(out, "  {}: {}", source, count);
        }
        let _ = writeln!(out);
    }

    if !stats.top_regions.is_empty() {
        let _ = writeln!(out, "Top Regions:");
        for (region, count) in &stats.top_regions {
            let _ = writeln!(out, "  {}: {}", region, count);
        }
        let _ = writeln!(out);
    }

    if !stats.recent_years.is_empty() {
        let _ = writeln!(out, "Recent Years:");
        for (year, count) in &stats.recent_years {
            let _ = writeln!(out, "  {}: {}", year, count);
        }
        let _ = writeln!(out);
    }

    let coverage = if stats.total_records > 0 {
        (stats.documents_downloaded as f64 / stats.total_records as f64) * 100.0
    } else {
        0.0
    };
    let _ = writeln!(
        out,
        "Document Coverage: {:.1}% ({} / {} records)",
        coverage, stats.documents_downloaded, stats.total_records
    );

    out
}

/// Prints catalog statistics to stdout
pub fn print_statistics(stats: &CatalogStats) {
    print!("{}", format_statistics(stats));
}

/// Formats the outcome of one source run for the terminal
pub fn format_summary(summary: &HarvestSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== {} ===", summary.source_id);
    if summary.interrupted {
        let _ = writeln!(out, "  (interrupted, progress saved)");
    }

    let _ = writeln!(out, "  Pages: {} total", summary.total_pages);
    let _ = writeln!(out, "    Already completed: {}", summary.skipped_pages);
    let _ = writeln!(out, "    Completed this run: {}", summary.completed_pages);
    let _ = writeln!(out, "    Failed: {}", summary.failed_pages.len());
    let unprocessed = summary.unprocessed_pages();
    if unprocessed > 0 {
        let _ = writeln!(out, "    Not processed: {}", unprocessed);
    }

    let _ = writeln!(
        out,
        "  Items: {} new, {} duplicates",
        summary.items_inserted, summary.duplicates_skipped
    );
    let _ = writeln!(
        out,
        "  Documents: {} downloaded, {} errors",
        summary.documents_downloaded, summary.download_errors
    );
    let _ = writeln!(out, "  Retries: {}", summary.retries);
    let _ = writeln!(
        out,
        "  Elapsed: {:.1}s ({:.2} pages/sec, final concurrency {})",
        summary.elapsed.as_secs_f64(),
        summary.pages_per_second(),
        summary.concurrency_limit
    );

    if !summary.errors_by_kind.is_empty() {
        let _ = writeln!(out, "  Errors by kind:");
        for (kind, count) in &summary.errors_by_kind {
            let _ = writeln!(out, "    {}: {}", kind, count);
        }
    }

    if !summary.failed_pages.is_empty() {
        let _ = writeln!(out, "  Failed pages:");
        for failed in summary.failed_pages.iter().take(20) {
            let _ = writeln!(
                out,
                "    page {} ({}, {} attempts): {}",
                failed.page, failed.kind, failed.attempts, failed.reason
            );
        }
        if summary.failed_pages.len() > 20 {
            let _ = writeln!(out, "    ... and {} more", summary.failed_pages.len() - 20);
        }
    }

    out
}

/// Prints a source run summary to stdout
pub fn print_summary(summary: &HarvestSummary) {
    print!("{}", format_summary(summary));
}
