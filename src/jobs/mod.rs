//! Runnable jobs
//!
//! Each job wires configuration into the fetcher, a source or extractor and
//! the sink, runs to a terminal state and returns a [`RunReport`]:
//! - `history`: monthly backfill of subreddits with checkpointed resume
//! - `snapshot`: one pass over today's top posts, written as aggregate CSVs
//! - `catalog`: product URLs from paginated listing pages
//! - `reviews`: product reviews from a URL list, with interim saves
//!
//! [`RunReport`]: crate::output::RunReport

mod catalog;
mod history;
mod reviews;
mod snapshot;

pub use catalog::{catalog_page_url, collect_product_urls, run_catalog, CatalogOutcome};
pub use history::{history_windows, run_history};
pub use reviews::{latest_url_file, read_url_file, run_reviews};
pub use snapshot::{run_snapshot, SNAPSHOT_LIMIT, SNAPSHOT_TIME_PERIOD};

use crate::config::Config;
use crate::crawler::{load_proxy_pool, Fetcher, IdentityManager, RetryPolicy};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Timestamp format embedded in aggregate file names
pub const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// File-name stamp for a run started at `at`
pub fn file_stamp(at: DateTime<Utc>) -> String {
    at.format(STAMP_FORMAT).to_string()
}

/// Fetcher for the Reddit API
///
/// The API requires one registered user agent, so no user-agent or proxy
/// rotation pool is used.
pub fn api_fetcher(config: &Config, cancel: CancellationToken) -> Fetcher {
    let identities =
        IdentityManager::fixed(config.reddit.user_agent.clone(), config.fetch.rotation_pause);
    Fetcher::new(identities, RetryPolicy::from_config(&config.fetch), cancel)
}

/// Fetcher for retailer pages, rotating browser identities and proxies
pub async fn web_fetcher(config: &Config, cancel: CancellationToken) -> Fetcher {
    let proxies = load_proxy_pool(&config.identity).await;
    let identities =
        IdentityManager::from_config(&config.identity, proxies, config.fetch.rotation_pause);
    Fetcher::new(identities, RetryPolicy::from_config(&config.fetch), cancel)
}
