//! Configuration module for the harvester
//!
//! This module handles loading, parsing, and validating the TOML configuration
//! file. Configuration is loaded once by the binary and passed explicitly into
//! every constructor.
//!
//! # Example
//!
//! ```no_run
//! use review_harvester::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvester.toml")).unwrap();
//! println!("Fetches retry up to {} times", config.fetch.max_retries);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CatalogConfig, Config, FetchConfig, IdentityConfig, JitterRange, OutputConfig, RedditConfig,
    ReviewsConfig, ScheduleConfig, DEFAULT_PROXY_LIST_URL,
};

// Re-export parser functions
pub use parser::{
    apply_env_overrides, compute_config_hash, default_config, load_config, load_config_with_hash,
    parse_config, ENV_CLIENT_ID, ENV_CLIENT_SECRET, ENV_USER_AGENT,
};
pub use validation::{validate, TIME_PERIODS};
