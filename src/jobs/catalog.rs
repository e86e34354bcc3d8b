//! Product URL collection from catalog listing pages

use crate::config::{CatalogConfig, Config};
use crate::crawler::{pacing, FetchError, Fetcher, Target};
use crate::extract::extract_product_links;
use crate::jobs::file_stamp;
use crate::output::RunReport;
use crate::state::DriverState;
use crate::storage::write_url_list;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Why the page scan stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogOutcome {
    /// A page without product cards was reached
    EndOfCatalog,

    /// `max_pages` pages were scanned
    PageLimit,

    /// Too many pages in a row failed
    TooManyErrors,

    Cancelled,
}

/// URL of listing page `page` (1-based)
pub fn catalog_page_url(catalog_url: &str, page: u32) -> String {
    match Url::parse(catalog_url) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("p", &page.to_string());
            url.to_string()
        }
        Err(_) => format!("{}?p={}", catalog_url, page),
    }
}

/// Scans listing pages from page 1 and collects product URLs
///
/// Stops at the first page without product cards, after `max_pages`
/// pages, or after `max_consecutive_errors` failed pages in a row.
///
/// # Returns
///
/// The unique URLs found and the reason the scan stopped. Scanned and
/// failed pages are counted in `report`.
pub async fn collect_product_urls(
    fetcher: &mut Fetcher,
    catalog: &CatalogConfig,
    cancel: &CancellationToken,
    report: &mut RunReport,
) -> (BTreeSet<String>, CatalogOutcome) {
    let mut urls = BTreeSet::new();
    let mut consecutive_errors = 0u32;

    for page_number in 1..=catalog.max_pages {
        if page_number > 1 && !pacing::pause_jittered(catalog.page_delay, cancel).await {
            return (urls, CatalogOutcome::Cancelled);
        }

        let page_url = catalog_page_url(&catalog.catalog_url, page_number);
        tracing::info!("Scanning page {}...", page_number);

        let page = match fetcher.fetch(&Target::get(page_url.clone())).await {
            Ok(page) => page,
            Err(FetchError::Cancelled { .. }) => return (urls, CatalogOutcome::Cancelled),
            Err(e) => {
                consecutive_errors += 1;
                report.sub_source_failures += 1;
                tracing::warn!(
                    "Error on page {} ({} consecutive): {}",
                    page_number,
                    consecutive_errors,
                    e
                );
                if consecutive_errors >= catalog.max_consecutive_errors {
                    tracing::warn!("Too many consecutive errors, stopping");
                    return (urls, CatalogOutcome::TooManyErrors);
                }
                continue;
            }
        };

        let base = Url::parse(&page.url)
            .or_else(|_| Url::parse(&page_url))
            .or_else(|_| Url::parse(&catalog.base_url));
        let listing = match base {
            Ok(base) => extract_product_links(&page.body, &base, &catalog.product_selector),
            Err(e) => Err(e.to_string()),
        };

        match listing {
            Ok(listing) if listing.is_empty() => {
                tracing::info!("No more products found after page {}", page_number - 1);
                return (urls, CatalogOutcome::EndOfCatalog);
            }
            Ok(listing) => {
                consecutive_errors = 0;
                report.units_completed += 1;
                tracing::info!(
                    "Found {} products on page {}",
                    listing.cards,
                    page_number
                );
                urls.extend(listing.links);
            }
            Err(e) => {
                consecutive_errors += 1;
                report.sub_source_failures += 1;
                tracing::warn!("Cannot parse page {}: {}", page_number, e);
                if consecutive_errors >= catalog.max_consecutive_errors {
                    return (urls, CatalogOutcome::TooManyErrors);
                }
            }
        }
    }

    tracing::info!("Reached maximum pages limit ({})", catalog.max_pages);
    (urls, CatalogOutcome::PageLimit)
}

/// Runs the catalog scan and saves `product_urls_{stamp}.txt`
///
/// URLs are written sorted. A cancelled scan still saves what it found.
pub async fn run_catalog(
    config: &Config,
    mut fetcher: Fetcher,
    now: DateTime<Utc>,
    cancel: CancellationToken,
) -> RunReport {
    let mut report = RunReport::new("catalog");
    report.state = DriverState::Running;

    let (urls, outcome) =
        collect_product_urls(&mut fetcher, &config.catalog, &cancel, &mut report).await;
    report.fetch = fetcher.stats();
    tracing::info!("Total unique product URLs collected: {}", urls.len());

    let path = config
        .output
        .raw_dir
        .join(format!("product_urls_{}.txt", file_stamp(now)));
    let urls: Vec<String> = urls.into_iter().collect();

    if let Err(e) = write_url_list(&path, &urls) {
        tracing::error!("Cannot save URLs: {}", e);
        report.abort_reason = Some(e.to_string());
        report.finish(DriverState::Aborted);
        return report;
    }
    tracing::info!("Saved {} URLs to {}", urls.len(), path.display());
    report.add_records("product_urls", urls.len());
    report.files.push(path.display().to_string());

    let state = match outcome {
        CatalogOutcome::Cancelled => DriverState::Cancelled,
        _ => DriverState::Completed,
    };
    report.finish(state);
    report
}
