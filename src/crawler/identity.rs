//! Client identities presented to upstream services
//!
//! An identity is the user agent plus an optional HTTP proxy. Soft blocks are
//! assumed to come from fingerprinting, so the fetcher rotates to a fresh
//! identity when it sees one. Proxies that fail at the transport layer are
//! excluded for the rest of the job.

use crate::config::{IdentityConfig, JitterRange};
use crate::crawler::pacing;
use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Desktop browser user agents used when the configuration lists none
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.2420.81",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

/// The headers and proxy one request is sent with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchIdentity {
    pub user_agent: String,

    /// `host:port` (or a full proxy URL) when proxy mode is active
    pub proxy: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl FetchIdentity {
    pub fn new(user_agent: impl Into<String>, proxy: Option<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            proxy,
            created_at: Utc::now(),
        }
    }
}

/// Produces and rotates fetch identities
pub struct IdentityManager {
    user_agents: Vec<String>,
    proxies: Vec<String>,
    failed_proxies: HashSet<String>,
    use_proxies: bool,
    rotation_pause: JitterRange,
    current: FetchIdentity,
    rotations: u32,
    cancel: CancellationToken,
}

impl IdentityManager {
    /// Creates a manager and draws the first identity
    ///
    /// An empty `user_agents` list falls back to [`DEFAULT_USER_AGENTS`].
    pub fn new(
        user_agents: Vec<String>,
        proxies: Vec<String>,
        use_proxies: bool,
        rotation_pause: JitterRange,
    ) -> Self {
        let user_agents = if user_agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|ua| ua.to_string()).collect()
        } else {
            user_agents
        };

        let mut manager = Self {
            user_agents,
            proxies,
            failed_proxies: HashSet::new(),
            use_proxies,
            rotation_pause,
            current: FetchIdentity::new(String::new(), None),
            rotations: 0,
            cancel: CancellationToken::new(),
        };
        manager.current = manager.draw_identity();

        if use_proxies && manager.proxies.is_empty() {
            tracing::warn!("Proxy mode enabled but the proxy pool is empty, connecting directly");
        }

        manager
    }

    /// Builds a manager from the `[identity]` section and a loaded proxy pool
    pub fn from_config(
        config: &IdentityConfig,
        proxies: Vec<String>,
        rotation_pause: JitterRange,
    ) -> Self {
        Self::new(
            config.user_agents.clone(),
            proxies,
            config.use_proxies,
            rotation_pause,
        )
    }

    /// A single-user-agent manager without proxies
    ///
    /// APIs that require a registered, stable user agent use this; rotating
    /// still rebuilds the client and pauses.
    pub fn fixed(user_agent: impl Into<String>, rotation_pause: JitterRange) -> Self {
        Self::new(vec![user_agent.into()], Vec::new(), false, rotation_pause)
    }

    /// Makes rotation pauses end early when the job is cancelled
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn current_identity(&self) -> &FetchIdentity {
        &self.current
    }

    /// Switches to a new identity, then pauses for a randomized interval
    pub async fn rotate(&mut self) -> FetchIdentity {
        self.current = self.draw_identity();
        self.rotations += 1;

        tracing::info!(
            "Rotated identity (proxy: {})",
            self.current.proxy.as_deref().unwrap_or("none")
        );

        let wait = pacing::sample(self.rotation_pause);
        self.pause_after_rotation(wait).await;

        self.current.clone()
    }

    /// Excludes the identity's proxy for the remainder of the job
    pub fn mark_failed(&mut self, identity: &FetchIdentity) {
        if let Some(proxy) = &identity.proxy {
            if self.failed_proxies.insert(proxy.clone()) {
                tracing::warn!(
                    "Marked proxy as failed: {} ({} left)",
                    proxy,
                    self.available_proxies()
                );
            }
        }
    }

    /// Number of rotations performed since the manager was created
    pub fn rotations(&self) -> u32 {
        self.rotations
    }

    /// Proxies not yet marked as failed
    pub fn available_proxies(&self) -> usize {
        self.proxies
            .iter()
            .filter(|p| !self.failed_proxies.contains(*p))
            .count()
    }

    pub fn is_failed(&self, proxy: &str) -> bool {
        self.failed_proxies.contains(proxy)
    }

    async fn pause_after_rotation(&self, wait: Duration) {
        if !pacing::pause(wait, &self.cancel).await {
            tracing::debug!("Rotation pause interrupted by cancellation");
        }
    }

    fn draw_identity(&self) -> FetchIdentity {
        let mut rng = rand::rng();

        let user_agent = self
            .user_agents
            .choose(&mut rng)
            .cloned()
            .unwrap_or_default();

        let proxy = if self.use_proxies {
            let available: Vec<&String> = self
                .proxies
                .iter()
                .filter(|p| !self.failed_proxies.contains(*p))
                .collect();
            let chosen = available.choose(&mut rng).map(|p| (*p).clone());
            if chosen.is_none() && !self.proxies.is_empty() {
                tracing::debug!("Proxy pool exhausted, falling back to direct connections");
            }
            chosen
        } else {
            None
        };

        FetchIdentity::new(user_agent, proxy)
    }
}

/// Loads the proxy pool named by the `[identity]` section
///
/// A proxy file takes precedence over a proxy list URL. Failures are logged
/// and produce an empty pool, which makes proxy mode connect directly.
pub async fn load_proxy_pool(config: &IdentityConfig) -> Vec<String> {
    if !config.use_proxies {
        return Vec::new();
    }

    if let Some(path) = &config.proxy_file {
        return match tokio::fs::read_to_string(path).await {
            Ok(text) => parse_proxy_list(&text),
            Err(e) => {
                tracing::warn!("Could not read proxy file {}: {}", path.display(), e);
                Vec::new()
            }
        };
    }

    let Some(url) = &config.proxy_list_url else {
        tracing::warn!("Proxy mode enabled without proxy-file or proxy-list-url");
        return Vec::new();
    };

    match fetch_proxy_list(url).await {
        Ok(proxies) => {
            tracing::info!("Loaded {} proxies from {}", proxies.len(), url);
            proxies
        }
        Err(e) => {
            tracing::warn!("Could not fetch proxy list, will proceed without proxies: {}", e);
            Vec::new()
        }
    }
}

async fn fetch_proxy_list(url: &str) -> crate::Result<Vec<String>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let text = client.get(url).send().await?.error_for_status()?.text().await?;
    Ok(parse_proxy_list(&text))
}

/// Parses a newline-delimited proxy list, skipping blanks and comments
pub fn parse_proxy_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
