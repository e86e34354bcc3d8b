//! Crawler module for rate-limited, resumable fetching
//!
//! This module contains the core fetch loop, including:
//! - Client identities and their rotation
//! - HTTP fetching with bounded retries and soft-block handling
//! - Pacing (politeness jitter, cooldowns, fixed delays)
//! - Work units and the batch driver that commits them one at a time

mod coordinator;
mod fetcher;
mod identity;
pub mod pacing;
mod units;

pub use coordinator::{filter_to_unit, BatchDriver, DriverSettings, EntityBatch, UnitSource};
pub use fetcher::{
    build_http_client, classify_status, classify_transport, FailureClass, FetchError, FetchStats,
    Fetcher, Page, Target,
};
pub use identity::{
    load_proxy_pool, parse_proxy_list, FetchIdentity, IdentityManager, DEFAULT_USER_AGENTS,
};
pub use pacing::RetryPolicy;
pub use units::{historical_windows, month_windows, MonthWindow, WorkUnit};
