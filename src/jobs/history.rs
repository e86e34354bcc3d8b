//! Monthly backfill of subreddit posts and comments

use crate::config::Config;
use crate::crawler::{historical_windows, BatchDriver, DriverSettings, Fetcher, MonthWindow};
use crate::output::RunReport;
use crate::sources::{RedditSettings, RedditSource};
use crate::state::DriverState;
use crate::storage::{CheckpointStore, CsvSink};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Month windows the backfill covers when run at `now`
pub fn history_windows(config: &Config, now: DateTime<Utc>) -> Vec<MonthWindow> {
    historical_windows(now, config.reddit.years)
}

/// Runs the backfill
///
/// Writes `reddit_posts_{YYYY-MM}.csv` and `reddit_comments_{YYYY-MM}.csv`
/// into the output directory and checkpoints after every month. With
/// `fresh` the checkpoint is removed first.
///
/// # Arguments
///
/// * `config` - Loaded configuration, CLI overrides applied
/// * `fetcher` - Fetcher for the Reddit API
/// * `now` - End of the backfill range
/// * `fresh` - Ignore any previous checkpoint
/// * `cancel` - Token tripped on interrupt
pub async fn run_history(
    config: &Config,
    fetcher: Fetcher,
    now: DateTime<Utc>,
    fresh: bool,
    cancel: CancellationToken,
) -> RunReport {
    let checkpoints = CheckpointStore::new(&config.output.checkpoint_file);
    if fresh {
        if let Err(e) = checkpoints.clear() {
            tracing::error!("Cannot remove checkpoint: {}", e);
            let mut report = RunReport::new("history");
            report.abort_reason = Some(e.to_string());
            report.finish(DriverState::Aborted);
            return report;
        }
        tracing::info!("Starting fresh, checkpoint removed");
    }

    let mut settings = RedditSettings::from_config(&config.reddit);
    settings.time_period = "month".to_string();

    let windows = history_windows(config, now);
    tracing::info!(
        "Backfilling {} months of {} subreddits into {}",
        windows.len(),
        config.reddit.subreddits.len(),
        config.output.output_dir.display()
    );

    let source = RedditSource::new(fetcher, settings);
    let sink = CsvSink::new(&config.output.output_dir);

    let mut driver = BatchDriver::new(
        "history",
        source,
        sink,
        checkpoints,
        config.reddit.subreddits.clone(),
    )
    .with_settings(DriverSettings::from_config(&config.schedule))
    .with_cancellation(cancel);

    driver.run(windows).await
}
