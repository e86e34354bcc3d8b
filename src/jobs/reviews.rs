//! Product reviews from a list of product URLs
//!
//! Products are processed one at a time. Reviews collected so far are
//! written to an interim file every few products, so a crash or interrupt
//! loses at most the last few pages of work.

use crate::config::Config;
use crate::crawler::{pacing, FetchError, Fetcher, Target};
use crate::extract::{extract_reviews, Record, REVIEWS_ENTITY};
use crate::jobs::file_stamp;
use crate::output::RunReport;
use crate::state::DriverState;
use crate::storage::{ensure_dir, newest_matching, CsvSink, StorageResult};
use crate::{HarvestError, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Newest `product_urls_*.txt` in a directory
pub fn latest_url_file(dir: &Path) -> Option<PathBuf> {
    newest_matching(dir, "product_urls_", ".txt")
}

/// Reads a newline-delimited URL file, skipping blank lines
pub fn read_url_file(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Runs the review scrape over `urls`
///
/// # Arguments
///
/// * `config` - Loaded configuration
/// * `fetcher` - Fetcher rotating browser identities
/// * `urls` - Product pages to visit, in order
/// * `now` - Start time of the run, used in file names
/// * `cancel` - Token tripped on interrupt
pub async fn run_reviews(
    config: &Config,
    mut fetcher: Fetcher,
    urls: Vec<String>,
    now: DateTime<Utc>,
    cancel: CancellationToken,
) -> RunReport {
    let mut report = RunReport::new("reviews");
    let raw_dir = &config.output.raw_dir;

    if let Err(e) = ensure_dir(raw_dir) {
        tracing::error!("Cannot create {}: {}", raw_dir.display(), e);
        report.abort_reason = Some(e.to_string());
        report.finish(DriverState::Aborted);
        return report;
    }
    report.state = DriverState::Running;

    let sink = CsvSink::new(raw_dir);
    let stamp = file_stamp(now);
    let settings = &config.reviews;
    let interim_every = settings.interim_every.max(1);
    let rotate_every = settings.rotate_every.max(1);
    let total = urls.len();
    let mut reviews: Vec<Record> = Vec::new();

    for (index, url) in urls.iter().enumerate() {
        let processed = index + 1;
        tracing::info!("Processing product {}/{}: {}", processed, total, url);

        match fetcher.fetch(&Target::get(url.clone())).await {
            Ok(page) => {
                let found = extract_reviews(&page.body, url);
                tracing::info!("Found {} reviews", found.len());
                report.units_completed += 1;

                if !found.is_empty() {
                    reviews.extend(found);

                    if processed % interim_every == 0 {
                        if let Err(e) = save_interim(&sink, &stamp, &reviews) {
                            return abort(report, &fetcher, e.into());
                        }
                    }
                    if processed % rotate_every == 0 {
                        fetcher.rotate_identity().await;
                    }
                }
            }
            Err(FetchError::Cancelled { .. }) => {
                return cancelled(report, &fetcher, &sink, &stamp, &reviews);
            }
            Err(e) => {
                tracing::warn!("Skipping {}: {}", url, e);
                report.sub_source_failures += 1;
            }
        }

        let is_last = processed == total;
        if !is_last && !pacing::pause_jittered(settings.product_delay, &cancel).await {
            return cancelled(report, &fetcher, &sink, &stamp, &reviews);
        }
    }

    report.fetch = fetcher.stats();
    if reviews.is_empty() {
        tracing::warn!("No reviews collected");
        report.finish(DriverState::Completed);
        return report;
    }

    match sink.write_aggregate(REVIEWS_ENTITY, &stamp, &reviews) {
        Ok(path) => {
            tracing::info!("Saved {} reviews to {}", reviews.len(), path.display());
            report.add_records(REVIEWS_ENTITY, reviews.len());
            report.files.push(path.display().to_string());
            report.finish(DriverState::Completed);
            report
        }
        Err(e) => abort(report, &fetcher, e.into()),
    }
}

fn save_interim(sink: &CsvSink, stamp: &str, reviews: &[Record]) -> StorageResult<PathBuf> {
    let path = sink.write_interim(REVIEWS_ENTITY, stamp, reviews)?;
    tracing::info!("Saved {} reviews to {}", reviews.len(), path.display());
    Ok(path)
}

fn abort(mut report: RunReport, fetcher: &Fetcher, error: HarvestError) -> RunReport {
    tracing::error!("Aborting reviews: {}", error);
    report.fetch = fetcher.stats();
    report.abort_reason = Some(error.to_string());
    report.finish(DriverState::Aborted);
    report
}

/// Saves what was collected to the interim file, then reports cancellation
fn cancelled(
    mut report: RunReport,
    fetcher: &Fetcher,
    sink: &CsvSink,
    stamp: &str,
    reviews: &[Record],
) -> RunReport {
    tracing::warn!("Review scrape interrupted");
    report.fetch = fetcher.stats();

    if !reviews.is_empty() {
        match save_interim(sink, stamp, reviews) {
            Ok(path) => {
                report.add_records(REVIEWS_ENTITY, reviews.len());
                report.files.push(path.display().to_string());
            }
            Err(e) => {
                tracing::error!("Cannot save partial results: {}", e);
                report.abort_reason = Some(e.to_string());
                report.finish(DriverState::Aborted);
                return report;
            }
        }
    }

    report.finish(DriverState::Cancelled);
    report
}
