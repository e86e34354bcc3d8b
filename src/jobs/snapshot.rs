//! Daily snapshot of subreddit top posts
//!
//! Unlike the backfill this job has no work units or checkpoint: one pass
//! collects every subreddit and writes aggregate files named after the run's
//! start time. A pass that yields no posts at all is retried after a wait.

use crate::config::Config;
use crate::crawler::{pacing, FetchError, Fetcher};
use crate::extract::{Record, COMMENTS_ENTITY, POSTS_ENTITY};
use crate::jobs::file_stamp;
use crate::output::RunReport;
use crate::sources::{RedditSettings, RedditSource};
use crate::state::DriverState;
use crate::storage::{ensure_dir, CsvSink};
use crate::HarvestError;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// `top` time filter of a snapshot
pub const SNAPSHOT_TIME_PERIOD: &str = "day";

/// Posts per subreddit in a snapshot
pub const SNAPSHOT_LIMIT: u32 = 100;

/// Records of one pass over all subreddits
#[derive(Debug, Default)]
struct Pass {
    posts: Vec<Record>,
    comments: Vec<Record>,
    failures: u64,
    cancelled: bool,
}

/// Collects every subreddit once
async fn collect_pass(
    source: &mut RedditSource,
    subreddits: &[String],
    delay: Duration,
    cancel: &CancellationToken,
) -> Pass {
    let mut pass = Pass::default();

    for (index, subreddit) in subreddits.iter().enumerate() {
        match source.collect_subreddit(subreddit).await {
            Ok(mut batch) => {
                let tag = |records: Vec<Record>| -> Vec<Record> {
                    records
                        .into_iter()
                        .map(|r| r.with("subreddit", subreddit.as_str()))
                        .collect()
                };
                pass.posts.extend(tag(batch.remove(POSTS_ENTITY).unwrap_or_default()));
                pass.comments
                    .extend(tag(batch.remove(COMMENTS_ENTITY).unwrap_or_default()));
            }
            Err(HarvestError::Fetch(FetchError::Cancelled { .. })) => {
                pass.cancelled = true;
                return pass;
            }
            Err(e) => {
                tracing::warn!("Skipping r/{}: {}", subreddit, e);
                pass.failures += 1;
            }
        }

        let is_last = index + 1 == subreddits.len();
        if !is_last && !pacing::pause(delay, cancel).await {
            pass.cancelled = true;
            return pass;
        }
    }

    pass
}

/// Runs the snapshot
///
/// # Arguments
///
/// * `config` - Loaded configuration
/// * `fetcher` - Fetcher for the Reddit API
/// * `now` - Start time of the run, used in file names
/// * `cancel` - Token tripped on interrupt
pub async fn run_snapshot(
    config: &Config,
    fetcher: Fetcher,
    now: DateTime<Utc>,
    cancel: CancellationToken,
) -> RunReport {
    let mut report = RunReport::new("snapshot");
    let raw_dir = &config.output.raw_dir;

    if let Err(e) = ensure_dir(raw_dir) {
        tracing::error!("Cannot create {}: {}", raw_dir.display(), e);
        report.abort_reason = Some(e.to_string());
        report.finish(DriverState::Aborted);
        return report;
    }
    report.state = DriverState::Running;

    let mut settings = RedditSettings::from_config(&config.reddit);
    settings.time_period = SNAPSHOT_TIME_PERIOD.to_string();
    settings.limit = SNAPSHOT_LIMIT;
    let mut source = RedditSource::new(fetcher, settings);

    let attempts = config.schedule.snapshot_attempts.max(1);
    let sub_delay = Duration::from_secs(config.schedule.sub_source_delay_secs);
    let retry_delay = Duration::from_secs(config.schedule.snapshot_retry_delay_secs);

    let mut pass = Pass::default();
    for attempt in 1..=attempts {
        tracing::info!("Snapshot pass {}/{}", attempt, attempts);
        pass = collect_pass(&mut source, &config.reddit.subreddits, sub_delay, &cancel).await;
        report.sub_source_failures += pass.failures;
        report.fetch = source.fetcher().stats();

        if pass.cancelled {
            tracing::warn!("Snapshot cancelled, nothing written");
            report.finish(DriverState::Cancelled);
            return report;
        }
        if !pass.posts.is_empty() {
            break;
        }

        tracing::warn!("No posts collected on pass {}", attempt);
        if attempt < attempts && !pacing::pause(retry_delay, &cancel).await {
            report.finish(DriverState::Cancelled);
            return report;
        }
    }

    let sink = CsvSink::new(raw_dir);
    let stamp = file_stamp(now);

    for (entity, records) in [(POSTS_ENTITY, &pass.posts), (COMMENTS_ENTITY, &pass.comments)] {
        if records.is_empty() {
            continue;
        }
        match sink.write_aggregate(entity, &stamp, records) {
            Ok(path) => {
                tracing::info!("Saved {} {} to {}", records.len(), entity, path.display());
                report.add_records(entity, records.len());
                report.files.push(path.display().to_string());
            }
            Err(e) => {
                tracing::error!("Cannot save {}: {}", entity, e);
                report.abort_reason = Some(e.to_string());
                report.finish(DriverState::Aborted);
                return report;
            }
        }
    }

    if pass.posts.is_empty() {
        tracing::warn!("Snapshot found no posts after {} passes", attempts);
    } else {
        report.units_completed = 1;
    }
    report.finish(DriverState::Completed);
    report
}
