//! Rate-limited HTTP fetcher
//!
//! This module performs every network request of the harvester:
//! - Building HTTP clients for the current identity (user agent, proxy)
//! - A politeness pause before each attempt
//! - Outcome classification into soft blocks, network errors and the rest
//! - Bounded retries with identity rotation and cooldowns
//!
//! # Retry Logic
//!
//! | Outcome | Action |
//! |---------|--------|
//! | HTTP 2xx | Return the page |
//! | HTTP 403 / 429 / 503 | Retry, rotate identity, cooldown |
//! | Proxy transport error | Retry, mark proxy failed, rotate, cooldown |
//! | Connect / timeout error | Retry, rotate identity |
//! | Anything else | Retry with the same identity |
//!
//! After `max_retries + 1` failed attempts the fetch gives up with
//! [`FetchError::UpstreamExhausted`]; callers skip that piece of work.

use crate::crawler::identity::{FetchIdentity, IdentityManager};
use crate::crawler::pacing::{self, RetryPolicy};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION};
use reqwest::{Client, Proxy, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failure of a whole fetch call, after its retry loop
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Gave up on {target} after {attempts} attempts: {last_failure}")]
    UpstreamExhausted {
        target: String,
        attempts: u32,
        last_failure: String,
    },

    #[error("Fetch of {target} cancelled")]
    Cancelled { target: String },
}

/// How a single failed attempt is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Throttling or fingerprint detection; rotate and cool down
    SoftBlock,

    /// Connection-level failure; rotate
    TransientNetwork,

    /// Everything else; retry as-is
    Other,
}

/// One failed attempt
#[derive(Debug, Clone)]
struct AttemptFailure {
    class: FailureClass,
    message: String,
    proxy_fault: bool,
}

/// HTTP method and body of a target
#[derive(Debug, Clone, PartialEq, Eq)]
enum TargetMethod {
    Get,
    PostForm(Vec<(String, String)>),
}

/// A request to perform
#[derive(Debug, Clone)]
pub struct Target {
    url: String,
    method: TargetMethod,
    query: Vec<(String, String)>,
    bearer: Option<String>,
    basic: Option<(String, String)>,
}

impl Target {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: TargetMethod::Get,
            query: Vec::new(),
            bearer: None,
            basic: None,
        }
    }

    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: TargetMethod::PostForm(form),
            ..Self::get(url)
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn bearer_auth(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic = Some((user.into(), password.into()));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// A successfully fetched response
#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// Per-job fetch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub attempts: u64,
    pub successes: u64,
    pub soft_blocks: u64,
    pub exhausted: u64,

    /// Failed attempts since the last success
    pub consecutive_errors: u32,
}

/// Per-call retry bookkeeping; discarded when the call returns
#[derive(Debug, Default)]
struct RetryState {
    failures: u32,
}

/// Builds an HTTP client presenting the given identity
///
/// # Arguments
///
/// * `identity` - User agent and optional proxy to present
/// * `timeout` - Per-request timeout
///
/// # Example
///
/// ```no_run
/// use review_harvester::crawler::{build_http_client, FetchIdentity};
/// use std::time::Duration;
///
/// let identity = FetchIdentity::new("harvester/1.0", None);
/// let client = build_http_client(&identity, Duration::from_secs(10)).unwrap();
/// ```
pub fn build_http_client(
    identity: &FetchIdentity,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

    let mut builder = Client::builder()
        .user_agent(identity.user_agent.as_str())
        .default_headers(headers)
        .timeout(timeout)
        .connect_timeout(timeout)
        .gzip(true)
        .brotli(true);

    builder = match &identity.proxy {
        Some(proxy) => builder.proxy(Proxy::all(proxy_url(proxy))?),
        None => builder.no_proxy(),
    };

    builder.build()
}

fn proxy_url(proxy: &str) -> String {
    if proxy.contains("://") {
        proxy.to_string()
    } else {
        format!("http://{}", proxy)
    }
}

/// Classifies a response status; `None` means success
pub fn classify_status(status: StatusCode) -> Option<FailureClass> {
    if status.is_success() {
        return None;
    }
    match status {
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            Some(FailureClass::SoftBlock)
        }
        _ => Some(FailureClass::Other),
    }
}

/// Classifies a transport error
///
/// Connection failures and timeouts through a proxy are blamed on the proxy
/// and treated like soft blocks.
pub fn classify_transport(error: &reqwest::Error, via_proxy: bool) -> FailureClass {
    let network = error.is_connect() || error.is_timeout();
    match (network, via_proxy) {
        (true, true) => FailureClass::SoftBlock,
        (true, false) => FailureClass::TransientNetwork,
        _ => FailureClass::Other,
    }
}

/// Performs fetches with bounded retries and identity rotation
pub struct Fetcher {
    identities: IdentityManager,
    policy: RetryPolicy,
    client: Option<(FetchIdentity, Client)>,
    cancel: CancellationToken,
    stats: FetchStats,
}

impl Fetcher {
    pub fn new(identities: IdentityManager, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            identities: identities.with_cancellation(cancel.clone()),
            policy,
            client: None,
            cancel,
            stats: FetchStats::default(),
        }
    }

    pub fn identities(&self) -> &IdentityManager {
        &self.identities
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> FetchStats {
        self.stats
    }

    /// Rotates the identity outside of the retry loop
    pub async fn rotate_identity(&mut self) -> FetchIdentity {
        self.identities.rotate().await
    }

    /// Fetches a target, retrying per the policy
    ///
    /// # Returns
    ///
    /// * `Ok(Page)` - A 2xx response
    /// * `Err(FetchError::UpstreamExhausted)` - Retries used up
    /// * `Err(FetchError::Cancelled)` - The job was cancelled during a pause
    pub async fn fetch(&mut self, target: &Target) -> Result<Page, FetchError> {
        let mut retry = RetryState::default();

        loop {
            if !pacing::pause_jittered(self.policy.politeness_jitter, &self.cancel).await {
                return Err(FetchError::Cancelled {
                    target: target.url.clone(),
                });
            }

            let identity = self.identities.current_identity().clone();
            self.stats.attempts += 1;

            let failure = match self.attempt(target, &identity).await {
                Ok(page) => {
                    self.stats.successes += 1;
                    self.stats.consecutive_errors = 0;
                    tracing::debug!("Fetched {} ({})", page.url, page.status);
                    return Ok(page);
                }
                Err(failure) => failure,
            };

            retry.failures += 1;
            self.stats.consecutive_errors += 1;
            tracing::warn!(
                "Attempt {}/{} for {} failed: {}",
                retry.failures,
                self.policy.max_retries + 1,
                target.url,
                failure.message
            );

            if retry.failures > self.policy.max_retries {
                self.stats.exhausted += 1;
                return Err(FetchError::UpstreamExhausted {
                    target: target.url.clone(),
                    attempts: retry.failures,
                    last_failure: failure.message,
                });
            }

            match failure.class {
                FailureClass::SoftBlock => {
                    self.stats.soft_blocks += 1;
                    if failure.proxy_fault {
                        self.identities.mark_failed(&identity);
                    }
                    self.identities.rotate().await;
                    if !pacing::pause_jittered(self.policy.soft_block_cooldown, &self.cancel).await
                    {
                        return Err(FetchError::Cancelled {
                            target: target.url.clone(),
                        });
                    }
                }
                FailureClass::TransientNetwork => {
                    self.identities.rotate().await;
                }
                FailureClass::Other => {}
            }
        }
    }

    async fn attempt(
        &mut self,
        target: &Target,
        identity: &FetchIdentity,
    ) -> Result<Page, AttemptFailure> {
        let via_proxy = identity.proxy.is_some();
        let client = self.client_for(identity).map_err(|e| AttemptFailure {
            class: if via_proxy {
                FailureClass::SoftBlock
            } else {
                FailureClass::Other
            },
            message: format!("Failed to build HTTP client: {}", e),
            proxy_fault: via_proxy,
        })?;

        let mut request = match &target.method {
            TargetMethod::Get => client.get(&target.url),
            TargetMethod::PostForm(form) => client.post(&target.url).form(form),
        };
        if !target.query.is_empty() {
            request = request.query(&target.query);
        }
        if let Some(token) = &target.bearer {
            request = request.bearer_auth(token);
        }
        if let Some((user, password)) = &target.basic {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().await.map_err(|e| {
            let class = classify_transport(&e, via_proxy);
            AttemptFailure {
                class,
                message: e.to_string(),
                proxy_fault: via_proxy && class == FailureClass::SoftBlock,
            }
        })?;

        let status = response.status();
        let url = response.url().to_string();

        if let Some(class) = classify_status(status) {
            return Err(AttemptFailure {
                class,
                message: format!("HTTP {}", status.as_u16()),
                proxy_fault: false,
            });
        }

        let body = response.text().await.map_err(|e| AttemptFailure {
            class: FailureClass::Other,
            message: format!("Failed to read body: {}", e),
            proxy_fault: false,
        })?;

        Ok(Page {
            url,
            status: status.as_u16(),
            body,
        })
    }

    /// Returns a client for the identity, rebuilding it after a rotation
    fn client_for(&mut self, identity: &FetchIdentity) -> Result<Client, reqwest::Error> {
        if let Some((built_for, client)) = &self.client {
            if built_for == identity {
                return Ok(client.clone());
            }
        }

        let client = build_http_client(identity, self.policy.request_timeout)?;
        self.client = Some((identity.clone(), client.clone()));
        Ok(client)
    }
}
