use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure for the harvester
///
/// Every section is optional; a missing section falls back to the defaults
/// the collector has always run with.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub reddit: RedditConfig,
    pub fetch: FetchConfig,
    pub identity: IdentityConfig,
    pub schedule: ScheduleConfig,
    pub catalog: CatalogConfig,
    pub reviews: ReviewsConfig,
    pub output: OutputConfig,
}

/// A closed range of milliseconds a randomized pause is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct JitterRange {
    #[serde(rename = "min-ms")]
    pub min_ms: u64,

    #[serde(rename = "max-ms")]
    pub max_ms: u64,
}

impl JitterRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// A range that never pauses; used by tests and dry runs
    pub const fn zero() -> Self {
        Self::new(0, 0)
    }
}

/// Reddit API credentials and scrape scope
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    #[serde(rename = "client-id")]
    pub client_id: String,

    #[serde(rename = "client-secret")]
    pub client_secret: String,

    /// Descriptive user agent registered with the Reddit app
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    pub subreddits: Vec<String>,

    /// Listing filter window: all, year, month, week or day
    #[serde(rename = "time-period")]
    pub time_period: String,

    /// Maximum posts fetched per subreddit per work unit
    pub limit: u32,

    /// Historical span of the monthly backfill
    pub years: u32,

    #[serde(rename = "auth-url")]
    pub auth_url: String,

    #[serde(rename = "api-url")]
    pub api_url: String,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            user_agent: "skincare_ratings_project/1.0".to_string(),
            subreddits: vec![
                "AsianBeauty".to_string(),
                "SkincareAddiction".to_string(),
                "30PlusSkinCare".to_string(),
            ],
            time_period: "month".to_string(),
            limit: 500,
            years: 5,
            auth_url: "https://www.reddit.com/api/v1/access_token".to_string(),
            api_url: "https://oauth.reddit.com".to_string(),
        }
    }
}

/// Retry and politeness policy for every network fetch
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    #[serde(rename = "request-timeout-secs")]
    pub request_timeout_secs: u64,

    /// Pause before every attempt
    #[serde(rename = "politeness-jitter")]
    pub politeness_jitter: JitterRange,

    /// Extra pause after a soft block
    #[serde(rename = "soft-block-cooldown")]
    pub soft_block_cooldown: JitterRange,

    /// Pause introduced by every identity rotation
    #[serde(rename = "rotation-pause")]
    pub rotation_pause: JitterRange,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            request_timeout_secs: 10,
            politeness_jitter: JitterRange::new(2_000, 5_000),
            soft_block_cooldown: JitterRange::new(5_000, 10_000),
            rotation_pause: JitterRange::new(2_000, 4_000),
        }
    }
}

/// Public HTTP proxy list fetched when proxy mode has no other source
pub const DEFAULT_PROXY_LIST_URL: &str =
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt";

/// User agent and proxy pools used for identity rotation
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Browser user agents to rotate through; empty means the built-in pool
    #[serde(rename = "user-agents")]
    pub user_agents: Vec<String>,

    #[serde(rename = "use-proxies")]
    pub use_proxies: bool,

    /// Newline-delimited `host:port` list served over HTTP
    #[serde(rename = "proxy-list-url")]
    pub proxy_list_url: Option<String>,

    /// Newline-delimited `host:port` list on disk; preferred over the URL
    #[serde(rename = "proxy-file")]
    pub proxy_file: Option<PathBuf>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_agents: Vec::new(),
            use_proxies: false,
            proxy_list_url: Some(DEFAULT_PROXY_LIST_URL.to_string()),
            proxy_file: None,
        }
    }
}

/// Fixed delays of the batch driver
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    #[serde(rename = "unit-delay-secs")]
    pub unit_delay_secs: u64,

    #[serde(rename = "sub-source-delay-secs")]
    pub sub_source_delay_secs: u64,

    /// Attempts of a snapshot pass that collected no posts
    #[serde(rename = "snapshot-attempts")]
    pub snapshot_attempts: u32,

    #[serde(rename = "snapshot-retry-delay-secs")]
    pub snapshot_retry_delay_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            unit_delay_secs: 60,
            sub_source_delay_secs: 10,
            snapshot_attempts: 3,
            snapshot_retry_delay_secs: 60,
        }
    }
}

/// Product catalog scan
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// First listing page; page `n` is requested as `?p=n`
    #[serde(rename = "catalog-url")]
    pub catalog_url: String,

    /// CSS selector of one product card on a listing page
    #[serde(rename = "product-selector")]
    pub product_selector: String,

    #[serde(rename = "max-pages")]
    pub max_pages: u32,

    #[serde(rename = "max-consecutive-errors")]
    pub max_consecutive_errors: u32,

    #[serde(rename = "page-delay")]
    pub page_delay: JitterRange,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.adorebeauty.com.au".to_string(),
            catalog_url: "https://www.adorebeauty.com.au/c/skin-care.html".to_string(),
            product_selector: r#"div[class="relative rounded-md border-[1px] border-[#e1dfdf]"]"#
                .to_string(),
            max_pages: 200,
            max_consecutive_errors: 5,
            page_delay: JitterRange::new(1_000, 3_000),
        }
    }
}

/// Product review scrape
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReviewsConfig {
    /// Write an interim CSV after this many processed products
    #[serde(rename = "interim-every")]
    pub interim_every: usize,

    /// Rotate the identity after this many processed products
    #[serde(rename = "rotate-every")]
    pub rotate_every: usize,

    #[serde(rename = "product-delay")]
    pub product_delay: JitterRange,
}

impl Default for ReviewsConfig {
    fn default() -> Self {
        Self {
            interim_every: 5,
            rotate_every: 10,
            product_delay: JitterRange::new(3_000, 7_000),
        }
    }
}

/// Output locations
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Destination of the per-month backfill files
    #[serde(rename = "output-dir")]
    pub output_dir: PathBuf,

    /// Destination of snapshot, catalog and review files
    #[serde(rename = "raw-dir")]
    pub raw_dir: PathBuf,

    #[serde(rename = "checkpoint-file")]
    pub checkpoint_file: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data/historical"),
            raw_dir: PathBuf::from("data/raw"),
            checkpoint_file: PathBuf::from("data/historical/checkpoint.json"),
        }
    }
}
