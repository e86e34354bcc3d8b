//! Upstream sources that produce records per sub-source
//!
//! A source turns a named sub-source (a subreddit) into entity batches by
//! driving the fetcher and the extractors.

mod reddit;

pub use reddit::{RedditSettings, RedditSource};
