//! Review Harvester main entry point
//!
//! This is the command-line interface for the harvester jobs.

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use review_harvester::config::{default_config, load_config_with_hash, validate, Config};
use review_harvester::crawler::historical_windows;
use review_harvester::jobs::{
    api_fetcher, latest_url_file, read_url_file, run_catalog, run_history, run_reviews,
    run_snapshot, web_fetcher,
};
use review_harvester::output::{print_report, RunReport};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Review Harvester: resumable collector for skincare discussions and reviews
///
/// Collects subreddit posts and comments through the Reddit API and product
/// reviews from retailer pages into CSV files. Requests are rate limited,
/// identities rotate when the upstream starts blocking, and long backfills
/// resume from a checkpoint.
#[derive(Parser, Debug)]
#[command(name = "review-harvester")]
#[command(version = "1.0.0")]
#[command(about = "Resumable, rate-limited scraper for posts and reviews", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (defaults apply when omitted)
    #[arg(short, long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Backfill subreddits month by month, resuming from the checkpoint
    History(HistoryArgs),

    /// Scrape today's top posts of every subreddit into aggregate files
    Snapshot(RedditArgs),

    /// Collect product URLs from the catalog listing pages
    Catalog {
        /// Maximum number of listing pages to scan
        #[arg(long)]
        max_pages: Option<u32>,
    },

    /// Scrape reviews of the products listed in a URL file
    Reviews {
        /// URL file (defaults to the newest product_urls_*.txt in the raw dir)
        #[arg(long, value_name = "FILE")]
        urls: Option<PathBuf>,

        /// Route requests through the proxy pool
        #[arg(long)]
        use_proxies: bool,
    },

    /// Validate the configuration and show what would run
    Check,
}

#[derive(Args, Debug, Default)]
struct RedditArgs {
    /// Subreddits to scrape
    #[arg(long, num_args = 1.., value_name = "NAME")]
    subreddits: Option<Vec<String>>,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    #[command(flatten)]
    reddit: RedditArgs,

    /// Number of years of history to scrape
    #[arg(long)]
    years: Option<u32>,

    /// Maximum number of posts per subreddit per month
    #[arg(long)]
    limit: Option<u32>,

    /// Directory for the monthly CSV files
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Checkpoint file for resuming
    #[arg(long, value_name = "FILE")]
    checkpoint_file: Option<PathBuf>,

    /// Ignore the checkpoint and start from the beginning
    #[arg(long)]
    fresh: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("review_harvester=info,warn"),
            1 => EnvFilter::new("review_harvester=debug,info"),
            2 => EnvFilter::new("review_harvester=trace,debug"),
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

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = load(cli.config.as_ref())?;
    apply_cli_overrides(&mut config, &cli.command);
    validate(&config).context("Invalid configuration after command-line overrides")?;

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());
    let now = Utc::now();

    let report = match cli.command {
        Command::History(args) => {
            require_credentials(&config)?;
            let fetcher = api_fetcher(&config, cancel.clone());
            run_history(&config, fetcher, now, args.fresh, cancel).await
        }
        Command::Snapshot(_) => {
            require_credentials(&config)?;
            let fetcher = api_fetcher(&config, cancel.clone());
            run_snapshot(&config, fetcher, now, cancel).await
        }
        Command::Catalog { .. } => {
            let fetcher = web_fetcher(&config, cancel.clone()).await;
            run_catalog(&config, fetcher, now, cancel).await
        }
        Command::Reviews { urls, .. } => {
            let path = match urls.or_else(|| latest_url_file(&config.output.raw_dir)) {
                Some(path) => path,
                None => bail!(
                    "No product_urls_*.txt found in {}; run the catalog job first",
                    config.output.raw_dir.display()
                ),
            };
            let urls = read_url_file(&path)
                .with_context(|| format!("Failed to read URL file {}", path.display()))?;
            if urls.is_empty() {
                bail!("URL file {} is empty", path.display());
            }
            tracing::info!("Loaded {} URLs from {}", urls.len(), path.display());

            let fetcher = web_fetcher(&config, cancel.clone()).await;
            run_reviews(&config, fetcher, urls, now, cancel).await
        }
        Command::Check => {
            handle_check(&config);
            return Ok(ExitCode::SUCCESS);
        }
    };

    Ok(finish(&report))
}

/// Loads the configuration file, or the defaults when none is given
fn load(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let (config, hash) = load_config_with_hash(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            Ok(config)
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            default_config().context("Invalid default configuration")
        }
    }
}

/// Applies subcommand flags on top of the configuration file
fn apply_cli_overrides(config: &mut Config, command: &Command) {
    match command {
        Command::History(args) => {
            if let Some(subreddits) = &args.reddit.subreddits {
                config.reddit.subreddits = subreddits.clone();
            }
            if let Some(years) = args.years {
                config.reddit.years = years;
            }
            if let Some(limit) = args.limit {
                config.reddit.limit = limit;
            }
            if let Some(dir) = &args.output_dir {
                config.output.output_dir = dir.clone();
            }
            if let Some(file) = &args.checkpoint_file {
                config.output.checkpoint_file = file.clone();
            }
        }
        Command::Snapshot(args) => {
            if let Some(subreddits) = &args.subreddits {
                config.reddit.subreddits = subreddits.clone();
            }
        }
        Command::Catalog { max_pages } => {
            if let Some(max_pages) = max_pages {
                config.catalog.max_pages = *max_pages;
            }
        }
        Command::Reviews { use_proxies, .. } => {
            if *use_proxies {
                config.identity.use_proxies = true;
            }
        }
        Command::Check => {}
    }
}

fn require_credentials(config: &Config) -> anyhow::Result<()> {
    if config.reddit.client_id.is_empty() || config.reddit.client_secret.is_empty() {
        bail!("Reddit credentials missing: set [reddit] client-id/client-secret or REDDIT_CLIENT_ID/REDDIT_CLIENT_SECRET");
    }
    Ok(())
}

/// Trips the token on Ctrl-C; a second Ctrl-C exits immediately
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("Interrupt received, stopping after the current request");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Second interrupt, exiting");
            std::process::exit(130);
        }
    });
}

fn finish(report: &RunReport) -> ExitCode {
    print_report(report);
    ExitCode::from(report.state.exit_code())
}

/// Handles the `check` command: shows what the jobs would do
fn handle_check(config: &Config) {
    println!("=== Review Harvester Check ===\n");

    println!("Reddit:");
    println!("  Subreddits: {}", config.reddit.subreddits.join(", "));
    println!("  Time period (snapshot uses day): {}", config.reddit.time_period);
    println!("  Posts per subreddit: {}", config.reddit.limit);
    println!(
        "  Credentials: {}",
        if config.reddit.client_id.is_empty() {
            "missing"
        } else {
            "present"
        }
    );

    let windows = historical_windows(Utc::now(), config.reddit.years);
    println!("\nHistory:");
    println!("  Years: {} ({} monthly units)", config.reddit.years, windows.len());
    println!("  Output: {}", config.output.output_dir.display());
    println!("  Checkpoint: {}", config.output.checkpoint_file.display());

    println!("\nFetching:");
    println!("  Max retries: {}", config.fetch.max_retries);
    println!("  Request timeout: {}s", config.fetch.request_timeout_secs);
    println!(
        "  Politeness jitter: {}-{}ms",
        config.fetch.politeness_jitter.min_ms, config.fetch.politeness_jitter.max_ms
    );
    println!("  Proxies: {}", if config.identity.use_proxies { "on" } else { "off" });

    println!("\nCatalog:");
    println!("  Listing: {}", config.catalog.catalog_url);
    println!("  Max pages: {}", config.catalog.max_pages);
    println!("  Raw output: {}", config.output.raw_dir.display());

    println!("\n✓ Configuration is valid");
}
