//! Sumi-Harvest main entry point
//!
//! This is the command-line interface for the Sumi-Harvest crawler.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sumi_harvest::config::{apply_overrides, load_config_with_hash, Config, ConfigOverrides};
use sumi_harvest::crawler::{crawl_scope, Orchestrator, StartMode};
use sumi_harvest::output::{
    export_records, export_target, format_report, load_statistics, print_statistics,
};
use sumi_harvest::storage::{open_store, RecordStore};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Sumi-Harvest: a polite crawling and extraction engine
///
/// Sumi-Harvest crawls websites while respecting robots.txt and per-host
/// rate limits, extracts structured records with CSS rules and stores them
/// deduplicated in SQLite.
#[derive(Parser, Debug)]
#[command(name = "sumi-harvest")]
#[command(version)]
#[command(about = "A polite crawling and extraction engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (defaults are used without one)
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Seed URL; replaces the seeds of the configuration file
    #[arg(long = "seed", value_name = "URL", env = "HARVEST_SEEDS", value_delimiter = ',')]
    seeds: Vec<String>,

    /// Maximum concurrent fetch pipelines
    #[arg(long, value_name = "N", env = "HARVEST_CONCURRENCY")]
    concurrency: Option<u32>,

    /// Minimum interval between requests to one host, in milliseconds
    #[arg(long, value_name = "N", env = "HARVEST_INTERVAL_MS")]
    interval_ms: Option<u64>,

    /// Maximum link depth from the seeds
    #[arg(long, value_name = "N", env = "HARVEST_MAX_DEPTH")]
    max_depth: Option<u32>,

    /// Stop after this many pages
    #[arg(long, value_name = "N", env = "HARVEST_MAX_PAGES")]
    max_pages: Option<u64>,

    /// Retries per URL after the first attempt
    #[arg(long, value_name = "N", env = "HARVEST_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// SQLite database path
    #[arg(long, value_name = "PATH", env = "HARVEST_DATABASE")]
    database: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume the previous crawl's visited URLs and frontier
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Start a fresh crawl, ignoring previous state (records are kept)
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["stats", "export"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "export"])]
    stats: bool,

    /// Write stored records to PATH and exit: CSV for `.csv`, JSON Lines
    /// otherwise, a timestamped CSV inside PATH if it is a directory
    #[arg(long, value_name = "PATH", conflicts_with_all = ["dry_run", "stats"])]
    export: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            seeds: self.seeds.clone(),
            concurrency: self.concurrency,
            interval_ms: self.interval_ms,
            max_depth: self.max_depth,
            max_pages: self.max_pages,
            max_retries: self.max_retries,
            database: self.database.clone(),
        }
    }

    fn start_mode(&self) -> StartMode {
        if self.fresh {
            StartMode::Fresh
        } else if self.resume {
            StartMode::Resume
        } else {
            StartMode::Auto
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, file_hash) = match &cli.config {
        Some(path) => {
            let (config, hash) = load_config_with_hash(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
            (config, Some(hash))
        }
        None => (Config::default(), None),
    };

    let overrides = cli.overrides();
    apply_overrides(&mut config, &overrides).context("Invalid configuration")?;

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = setup_logging(cli.verbose, cli.quiet, config.output.log_file.as_deref())?;

    match (&cli.config, &file_hash) {
        (Some(path), Some(hash)) => {
            tracing::info!("Configuration loaded from {} (hash: {})", path.display(), hash)
        }
        _ => tracing::info!("No configuration file, using defaults"),
    }
    if !overrides.is_empty() {
        tracing::info!("Command line / environment overrides applied");
    }

    if cli.dry_run {
        handle_dry_run(&config);
        Ok(())
    } else if cli.stats {
        handle_stats(&config)
    } else if let Some(path) = &cli.export {
        handle_export(&config, path)
    } else {
        handle_crawl(config, cli.start_mode()).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// With a log file configured, the same events are also written there
/// through a non-blocking writer; the returned guard flushes it.
fn setup_logging(verbose: u8, quiet: bool, log_file: Option<&str>) -> Result<Option<WorkerGuard>> {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_harvest=info,warn"),
            1 => EnvFilter::new("sumi_harvest=debug,info"),
            2 => EnvFilter::new("sumi_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    let console_layer = fmt::Layer::new()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false);

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let path = Path::new(path);
            let dir = match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir,
                _ => Path::new("."),
            };
            let name = path
                .file_name()
                .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create log directory {}", dir.display()))?;

            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = fmt::Layer::new()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    Registry::default()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Handles the --dry-run mode: shows what would be crawled
fn handle_dry_run(config: &Config) {
    println!("=== Sumi-Harvest Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Max depth: {}", config.crawler.max_depth);
    println!("  Max concurrency: {}", config.crawler.max_concurrency);
    match config.crawler.max_pages {
        Some(pages) => println!("  Max pages: {}", pages),
        None => println!("  Max pages: unlimited"),
    }
    if let Some(secs) = config.crawler.time_budget_secs {
        println!("  Time budget: {}s", secs);
    }
    println!("  Respect robots.txt: {}", config.crawler.respect_robots);
    println!("  Minimum interval per host: {}ms", config.rate_limit.min_interval_ms);
    println!(
        "  Retries: {} (backoff {}ms to {}ms)",
        config.retry.max_retries, config.retry.initial_backoff_ms, config.retry.max_backoff_ms
    );

    println!("\nUser Agent: {}", config.user_agent.header_value());
    println!("Database: {}", config.output.database_path);

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        println!("  - {}", seed);
    }

    let scope = crawl_scope(config);
    println!("\nScope ({}):", scope.len());
    for domain in &scope {
        println!("  - {}", domain);
    }

    if config.extract.is_empty() {
        println!("\nExtraction: one page record per URL");
    } else {
        println!("\nExtraction rules ({}):", config.extract.len());
        for rule in &config.extract {
            println!(
                "  - {} ({} fields, container {})",
                rule.name,
                rule.fields.len(),
                rule.container
            );
        }
    }

    println!("\nConfiguration is valid");
    println!("Would start crawling with {} seed URLs", config.seeds.len());
}

fn open_record_store(config: &Config) -> Result<Arc<dyn RecordStore>> {
    let store = open_store(Path::new(&config.output.database_path))
        .with_context(|| format!("Cannot open database {}", config.output.database_path))?;
    Ok(Arc::new(store))
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> Result<()> {
    println!("Database: {}\n", config.output.database_path);
    let store = open_record_store(config)?;
    let stats = load_statistics(store.as_ref()).context("Failed to load statistics")?;
    print_statistics(&stats);
    Ok(())
}

/// Handles the --export mode: writes stored records as CSV or JSON Lines
fn handle_export(config: &Config, path: &Path) -> Result<()> {
    let store = open_record_store(config)?;
    let target = export_target(path, chrono::Utc::now());
    let count = export_records(store.as_ref(), &target)
        .with_context(|| format!("Failed to export records to {}", target.display()))?;
    println!("Exported {} records to {}", count, target.display());
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, mode: StartMode) -> Result<()> {
    tracing::info!(
        "Seeds: {}, max depth: {}, concurrency: {}",
        config.seeds.len(),
        config.crawler.max_depth,
        config.crawler.max_concurrency
    );

    let store = open_record_store(&config)?;
    let mut orchestrator = Orchestrator::new(config, store, mode)?;

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, letting in-flight pages finish");
            cancel.cancel();
        }
    });

    match orchestrator.run().await {
        Ok(report) => {
            print!("{}", format_report(&report));
            Ok(())
        }
        Err(e) => {
            eprint!("{}", format_report(orchestrator.report()));
            tracing::error!("Crawl failed: {}", e);
            Err(anyhow::Error::new(e).context("Crawl stopped on a fatal error"))
        }
    }
}
