//! Perda-Harvest main entry point
//!
//! This is the command-line interface for the regional regulation harvester.

use chrono::Utc;
use clap::Parser;
use futures::{Stream, StreamExt};
use perda_harvest::checkpoint::{Checkpoint, CheckpointBackend, JsonFileBackend};
use perda_harvest::config::{load_config_with_hash, validate, Config, Preset, SourceConfig};
use perda_harvest::output::{print_statistics, print_summary, report_path, write_run_report, RunReport};
use perda_harvest::source::build_adapter;
use perda_harvest::storage::{open_sink, SqliteSink};
use perda_harvest::{HarvestError, HarvestSettings, HarvestSummary, Harvester};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Perda-Harvest: a resumable harvester for regional regulation catalogs
///
/// Walks every listing page of the configured catalogs, retries pages that
/// come back short or fail, and stores deduplicated records in SQLite.
/// Progress is checkpointed per source, so an interrupted run resumes where it
/// stopped.
#[derive(Parser, Debug)]
#[command(name = "perda-harvest")]
#[command(version)]
#[command(about = "A resumable harvester for regional regulation catalogs", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Source id to harvest, or "all"
    #[arg(long, default_value = "all")]
    source: String,

    /// Tuning preset: fast, stable or ultra
    #[arg(long)]
    preset: Option<Preset>,

    /// Override the worker count of every selected source
    #[arg(long)]
    workers: Option<usize>,

    /// Override the maximum attempts per page
    #[arg(long)]
    retries: Option<u32>,

    /// Override the minimum items per page of every selected source
    #[arg(long)]
    min_items: Option<usize>,

    /// Skip document downloads
    #[arg(long)]
    no_docs: bool,

    /// Discard checkpoints and start from page 1
    #[arg(long)]
    fresh: bool,

    /// Harvest selected sources concurrently instead of one after another
    #[arg(long)]
    parallel: bool,

    /// Validate config and show what would be harvested without fetching
    #[arg(long, conflicts_with_all = ["stats", "rebuild_state", "mark_completed"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "rebuild_state", "mark_completed"])]
    stats: bool,

    /// Rebuild checkpoints from the database page log and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats", "mark_completed"])]
    rebuild_state: bool,

    /// Mark pages 1..=N completed in the checkpoint and exit
    #[arg(long, value_name = "N", conflicts_with_all = ["dry_run", "stats", "rebuild_state"])]
    mark_completed: Option<u32>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    apply_overrides(&mut config, &cli);
    validate(&config)?;
    let selected = select_sources(&config, &cli.source)?;

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config, &selected)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.rebuild_state {
        handle_rebuild_state(&config, &selected)?;
    } else if let Some(last_page) = cli.mark_completed {
        handle_mark_completed(&config, &selected, last_page)?;
    } else {
        handle_harvest(config, selected, config_hash, cli.fresh, cli.parallel).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("perda_harvest=info,warn"),
            1 => EnvFilter::new("perda_harvest=debug,info"),
            2 => EnvFilter::new("perda_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Applies the preset first, then explicit flags on top
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(preset) = cli.preset {
        tracing::info!("Applying preset: {}", preset);
        config.apply_preset(preset);
    }

    for source in &mut config.sources {
        if cli.source != "all" && source.id != cli.source {
            continue;
        }
        if let Some(workers) = cli.workers {
            source.workers = workers;
        }
        if let Some(min_items) = cli.min_items {
            source.min_items = min_items;
        }
    }

    if let Some(retries) = cli.retries {
        config.retry.max_retries = retries;
    }
    if cli.no_docs {
        config.harvest.download_documents = false;
    }
}

fn select_sources(config: &Config, selector: &str) -> Result<Vec<SourceConfig>, HarvestError> {
    if selector == "all" {
        return Ok(config.sources.clone());
    }
    config
        .source(selector)
        .cloned()
        .map(|source| vec![source])
        .ok_or_else(|| HarvestError::UnknownSource(selector.to_string()))
}

fn checkpoint_backend(config: &Config) -> Arc<dyn CheckpointBackend> {
    Arc::new(JsonFileBackend::new(&config.harvest.checkpoint_dir))
}

fn open_database(config: &Config) -> Result<SqliteSink, HarvestError> {
    Ok(open_sink(
        Path::new(&config.output.database_path),
        Path::new(&config.output.documents_dir),
    )?)
}

/// Handles the --dry-run mode: validates config and shows what would be harvested
fn handle_dry_run(
    config: &Config,
    selected: &[SourceConfig],
) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Perda-Harvest Dry Run ===\n");

    println!("Retry Policy:");
    println!("  Max attempts per page: {}", config.retry.max_retries);
    println!("  Parse error limit: {}", config.retry.parse_error_limit);

    println!("\nUser Agent: {}", config.user_agent.header_value());

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Documents: {}", config.output.documents_dir);
    println!(
        "  Download documents: {}",
        config.harvest.download_documents
    );
    println!("  Checkpoints: {}", config.harvest.checkpoint_dir);

    let backend = checkpoint_backend(config);
    println!("\nSources ({}):", selected.len());
    for source in selected {
        println!("  - {} ({})", source.id, source.base_url);
        println!(
            "    workers: {}, min items: {}, items per page: {}",
            source.workers, source.min_items, source.items_per_page
        );
        println!(
            "    delay: {}-{}ms, timeout: {}s",
            source.delay_min_ms, source.delay_max_ms, source.request_timeout_secs
        );
        match backend.load(&source.id) {
            Ok(Some(state)) => println!(
                "    checkpoint: {} pages completed, {} failed, {} items",
                state.completed_pages.len(),
                state.failed_pages.len(),
                state.total_items
            ),
            Ok(None) => println!("    checkpoint: none"),
            Err(e) => println!("    checkpoint: unreadable ({})", e),
        }
    }

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Database: {}\n", config.output.database_path);

    let sink = open_database(config)?;
    let stats = sink.statistics()?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --rebuild-state mode: reconstructs checkpoints from the page log
fn handle_rebuild_state(
    config: &Config,
    selected: &[SourceConfig],
) -> Result<(), Box<dyn std::error::Error>> {
    let sink = open_database(config)?;
    let backend = checkpoint_backend(config);

    for source in selected {
        let checkpoint = Checkpoint::load(backend.clone(), &source.id, config.harvest.flush_policy())?;
        let logged = sink.completed_pages(&source.id)?;
        let added = checkpoint.rebuild_from_page_log(logged);
        checkpoint.flush()?;
        println!(
            "✓ {}: {} pages added from page log ({} completed)",
            source.id,
            added,
            checkpoint.snapshot().completed_pages.len()
        );
    }

    Ok(())
}

/// Handles the --mark-completed mode: seeds checkpoints for earlier harvests
fn handle_mark_completed(
    config: &Config,
    selected: &[SourceConfig],
    last_page: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let backend = checkpoint_backend(config);

    for source in selected {
        let checkpoint = Checkpoint::load(backend.clone(), &source.id, config.harvest.flush_policy())?;
        let added = checkpoint.mark_completed_through(last_page);
        checkpoint.flush()?;
        println!(
            "✓ {}: pages 1-{} marked completed ({} newly)",
            source.id, last_page, added
        );
    }

    Ok(())
}

/// Harvests one source from adapter construction to summary
async fn harvest_source(
    config: Arc<Config>,
    source: SourceConfig,
    sink: Arc<SqliteSink>,
    backend: Arc<dyn CheckpointBackend>,
    fresh: bool,
    shutdown: watch::Receiver<bool>,
) -> Result<HarvestSummary, HarvestError> {
    let adapter = build_adapter(&source, &config.user_agent)?;

    let policy = config.harvest.flush_policy();
    let checkpoint = if fresh {
        tracing::info!("Starting {} fresh (ignoring previous checkpoint)", source.id);
        Checkpoint::fresh(backend, &source.id, policy)?
    } else {
        Checkpoint::load(backend, &source.id, policy)?
    };

    let harvester = Harvester::new(HarvestSettings::for_source(&config, &source))?;
    harvester
        .run(adapter, sink, Arc::new(checkpoint), shutdown)
        .await
}

/// Relays Ctrl-C to the shutdown channel
///
/// The first interrupt asks every run to drain and flush. Returns true once a
/// second interrupt arrives, meaning the process should quit without waiting.
async fn relay_interrupts<S>(mut interrupts: S, shutdown_tx: watch::Sender<bool>) -> bool
where
    S: Stream<Item = ()> + Unpin,
{
    if interrupts.next().await.is_none() {
        return false;
    }
    tracing::warn!("Interrupt received, stopping after in-flight pages (Ctrl-C again to quit now)");
    let _ = shutdown_tx.send(true);

    if interrupts.next().await.is_none() {
        return false;
    }
    tracing::error!("Second interrupt received, exiting without waiting for in-flight pages");
    true
}

/// Handles the main harvest operation
async fn handle_harvest(
    config: Config,
    selected: Vec<SourceConfig>,
    config_hash: String,
    fresh: bool,
    parallel: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let started_at = Utc::now();
    let config = Arc::new(config);
    let sink = Arc::new(open_database(&config)?);
    let backend = checkpoint_backend(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interrupts = futures::stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok().map(|()| ((), ()))
    })
    .boxed();
    tokio::spawn(async move {
        if relay_interrupts(interrupts, shutdown_tx).await {
            std::process::exit(130);
        }
    });

    tracing::info!(
        "Harvesting {} source(s){}",
        selected.len(),
        if parallel { " in parallel" } else { "" }
    );

    let mut results = Vec::new();
    if parallel {
        let runs = selected.iter().map(|source| {
            harvest_source(
                config.clone(),
                source.clone(),
                sink.clone(),
                backend.clone(),
                fresh,
                shutdown_rx.clone(),
            )
        });
        let outcomes = futures::future::join_all(runs).await;
        results.extend(selected.iter().map(|s| s.id.clone()).zip(outcomes));
    } else {
        for source in &selected {
            if *shutdown_rx.borrow() {
                tracing::warn!("Skipping {} after interrupt", source.id);
                break;
            }
            let outcome = harvest_source(
                config.clone(),
                source.clone(),
                sink.clone(),
                backend.clone(),
                fresh,
                shutdown_rx.clone(),
            )
            .await;
            results.push((source.id.clone(), outcome));
        }
    }

    let mut summaries = Vec::new();
    let mut aborted_sources = Vec::new();
    let mut fatal = None;
    for (source_id, outcome) in results {
        match outcome {
            Ok(summary) => summaries.push(summary),
            Err(e @ HarvestError::Discovery { .. }) => {
                tracing::error!("Skipping {}: {}", source_id, e);
                aborted_sources.push((source_id, e.to_string()));
            }
            Err(e) => {
                tracing::error!("Harvest of {} failed: {}", source_id, e);
                aborted_sources.push((source_id, e.to_string()));
                fatal.get_or_insert(e);
            }
        }
    }

    println!();
    for summary in &summaries {
        print_summary(summary);
        println!();
    }

    let catalog = match sink.statistics() {
        Ok(stats) => Some(stats),
        Err(e) => {
            tracing::warn!("Could not load catalog statistics: {}", e);
            None
        }
    };
    let report = RunReport {
        started_at,
        config_hash,
        summaries,
        aborted_sources,
        catalog,
    };
    let path = report_path(Path::new(&config.harvest.checkpoint_dir));
    match write_run_report(&report, &path) {
        Ok(()) => tracing::info!("Run report written to {}", path.display()),
        Err(e) => tracing::warn!("Failed to write run report {}: {}", path.display(), e),
    }

    if let Some(e) = fatal {
        return Err(e.into());
    }
    Ok(())
}
