use crate::config::types::{
    CatalogConfig, Config, FetchConfig, JitterRange, RedditConfig, ReviewsConfig,
};
use crate::ConfigError;
use url::Url;

/// Listing windows accepted by the Reddit `top` endpoint
pub const TIME_PERIODS: [&str; 5] = ["all", "year", "month", "week", "day"];

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_reddit_config(&config.reddit)?;
    validate_fetch_config(&config.fetch)?;
    validate_catalog_config(&config.catalog)?;
    validate_reviews_config(&config.reviews)?;
    Ok(())
}

/// Validates subreddit scope and endpoints
///
/// Credentials are not required here: only the Reddit jobs need them, and
/// they check at startup.
fn validate_reddit_config(config: &RedditConfig) -> Result<(), ConfigError> {
    for name in &config.subreddits {
        validate_subreddit_name(name)?;
    }

    if !TIME_PERIODS.contains(&config.time_period.as_str()) {
        return Err(ConfigError::Validation(format!(
            "time-period must be one of {:?}, got '{}'",
            TIME_PERIODS, config.time_period
        )));
    }

    if config.limit < 1 {
        return Err(ConfigError::Validation(
            "limit must be >= 1".to_string(),
        ));
    }

    if config.years < 1 {
        return Err(ConfigError::Validation(
            "years must be >= 1".to_string(),
        ));
    }

    validate_url("auth-url", &config.auth_url)?;
    validate_url("api-url", &config.api_url)?;

    Ok(())
}

/// Validates the retry policy
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.max_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "max-retries must be >= 1, got {}",
            config.max_retries
        )));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be >= 1".to_string(),
        ));
    }

    validate_jitter("politeness-jitter", &config.politeness_jitter)?;
    validate_jitter("soft-block-cooldown", &config.soft_block_cooldown)?;
    validate_jitter("rotation-pause", &config.rotation_pause)?;

    Ok(())
}

fn validate_catalog_config(config: &CatalogConfig) -> Result<(), ConfigError> {
    validate_url("base-url", &config.base_url)?;
    validate_url("catalog-url", &config.catalog_url)?;

    if scraper::Selector::parse(&config.product_selector).is_err() {
        return Err(ConfigError::Validation(format!(
            "product-selector is not a valid CSS selector: '{}'",
            config.product_selector
        )));
    }

    if config.max_consecutive_errors < 1 {
        return Err(ConfigError::Validation(
            "max-consecutive-errors must be >= 1".to_string(),
        ));
    }

    validate_jitter("page-delay", &config.page_delay)
}

fn validate_reviews_config(config: &ReviewsConfig) -> Result<(), ConfigError> {
    if config.interim_every < 1 || config.rotate_every < 1 {
        return Err(ConfigError::Validation(
            "interim-every and rotate-every must be >= 1".to_string(),
        ));
    }

    validate_jitter("product-delay", &config.product_delay)
}

fn validate_jitter(name: &str, range: &JitterRange) -> Result<(), ConfigError> {
    if range.min_ms > range.max_ms {
        return Err(ConfigError::Validation(format!(
            "{}: min-ms ({}) must not exceed max-ms ({})",
            name, range.min_ms, range.max_ms
        )));
    }
    Ok(())
}

fn validate_url(name: &str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", name, value, e)))
}

/// Subreddit names are 2-21 characters of letters, digits and underscores
fn validate_subreddit_name(name: &str) -> Result<(), ConfigError> {
    let valid_chars = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_chars || name.len() < 2 || name.len() > 21 {
        return Err(ConfigError::Validation(format!(
            "Invalid subreddit name: '{}'",
            name
        )));
    }
    Ok(())
}
