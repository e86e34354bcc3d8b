//! Reddit API source
//!
//! A thin client over the OAuth API:
//! - Application-only tokens via the client-credentials grant
//! - Paginated `top` listings per subreddit
//! - Exhaustive comment trees, expanding every `more` stub
//!
//! Every request goes through the rate-limited [`Fetcher`], so retries,
//! pacing and identity rotation apply to API calls as well.

use crate::config::RedditConfig;
use crate::crawler::{EntityBatch, FetchStats, Fetcher, Target, UnitSource, WorkUnit};
use crate::extract::reddit::{
    comment_listing_things, flatten_comments, more_children_things, posts_from_listing, Listing,
    MoreStub,
};
use crate::extract::{FieldValue, Record, COMMENTS_ENTITY, POSTS_ENTITY};
use crate::{HarvestError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Largest page the listing endpoint serves
const MAX_PAGE_SIZE: u32 = 100;

/// Most ids `morechildren` accepts per request
const MORE_CHILDREN_BATCH: usize = 100;

/// Tokens are refreshed this long before they expire
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

/// Connection and query settings of the source
#[derive(Debug, Clone)]
pub struct RedditSettings {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub api_url: String,

    /// `top` time filter: all, year, month, week or day
    pub time_period: String,

    /// Posts per subreddit per collection
    pub limit: u32,
}

impl RedditSettings {
    pub fn from_config(config: &RedditConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            auth_url: config.auth_url.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            time_period: config.time_period.clone(),
            limit: config.limit,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// Collects posts and comments of subreddits
pub struct RedditSource {
    fetcher: Fetcher,
    settings: RedditSettings,
    token: Option<AccessToken>,
}

impl RedditSource {
    pub fn new(fetcher: Fetcher, settings: RedditSettings) -> Self {
        Self {
            fetcher,
            settings,
            token: None,
        }
    }

    pub fn settings(&self) -> &RedditSettings {
        &self.settings
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Returns a valid bearer token, requesting a new one when needed
    async fn access_token(&mut self) -> Result<String> {
        if let Some(token) = &self.token {
            if Instant::now() + TOKEN_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let target = Target::post_form(
            self.settings.auth_url.clone(),
            vec![("grant_type".to_string(), "client_credentials".to_string())],
        )
        .basic_auth(
            self.settings.client_id.clone(),
            self.settings.client_secret.clone(),
        );

        let page = self.fetcher.fetch(&target).await?;
        let response: TokenResponse =
            serde_json::from_str(&page.body).map_err(|e| HarvestError::Payload {
                url: page.url.clone(),
                message: e.to_string(),
            })?;

        let value = match (response.access_token, response.error) {
            (Some(value), _) if !value.is_empty() => value,
            (_, Some(error)) => return Err(HarvestError::Auth(error)),
            _ => return Err(HarvestError::Auth("no access token in response".to_string())),
        };

        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(3600));
        tracing::debug!("Obtained API token valid for {}s", lifetime.as_secs());
        self.token = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(value)
    }

    /// Performs an authenticated GET and parses the JSON body
    async fn get_json(&mut self, target: Target) -> Result<Value> {
        let token = self.access_token().await?;
        let target = target.query("raw_json", "1").bearer_auth(token);

        let page = self.fetcher.fetch(&target).await?;
        serde_json::from_str(&page.body).map_err(|e| HarvestError::Payload {
            url: page.url,
            message: e.to_string(),
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}", self.settings.api_url, path)
    }

    /// Fetches up to `limit` top posts of a subreddit
    pub async fn top_posts(&mut self, subreddit: &str) -> Result<Vec<Record>> {
        let limit = self.settings.limit;
        let mut posts = Vec::new();
        let mut after: Option<String> = None;

        while (posts.len() as u32) < limit {
            let page_size = (limit - posts.len() as u32).min(MAX_PAGE_SIZE);
            let mut target = Target::get(self.api(&format!("/r/{}/top", subreddit)))
                .query("t", self.settings.time_period.clone())
                .query("limit", page_size.to_string());
            if let Some(cursor) = &after {
                target = target.query("after", cursor.clone());
            }

            let url = target.url().to_string();
            let value = self.get_json(target).await?;
            let listing: Listing =
                serde_json::from_value(value).map_err(|e| HarvestError::Payload {
                    url,
                    message: e.to_string(),
                })?;

            let page = posts_from_listing(&listing);
            if page.is_empty() {
                break;
            }
            posts.extend(page);

            match listing.data.after {
                Some(next) => after = Some(next),
                None => break,
            }
        }

        posts.truncate(limit as usize);
        tracing::debug!("Fetched {} top posts from r/{}", posts.len(), subreddit);
        Ok(posts)
    }

    /// Fetches every comment of a post, expanding all `more` stubs
    pub async fn post_comments(&mut self, post_id: &str) -> Result<Vec<Record>> {
        let value = self
            .get_json(Target::get(self.api(&format!("/comments/{}", post_id))))
            .await?;
        let tree = flatten_comments(&comment_listing_things(&value), post_id);

        let mut seen: HashSet<String> = HashSet::new();
        let mut comments = Vec::new();
        let mut pending: VecDeque<MoreStub> = tree.more.into();
        keep_unseen(tree.comments, &mut seen, &mut comments);

        while let Some(stub) = pending.pop_front() {
            let things = match stub {
                MoreStub::Children(ids) => {
                    let ids: Vec<String> = ids.into_iter().filter(|id| !seen.contains(id)).collect();
                    let mut things = Vec::new();
                    for chunk in ids.chunks(MORE_CHILDREN_BATCH) {
                        let target = Target::get(self.api("/api/morechildren"))
                            .query("api_type", "json")
                            .query("link_id", format!("t3_{}", post_id))
                            .query("children", chunk.join(","));
                        let value = self.get_json(target).await?;
                        things.extend(more_children_things(&value));
                    }
                    things
                }
                MoreStub::Thread(parent) => {
                    let comment_id = parent.trim_start_matches("t1_").to_string();
                    let target = Target::get(self.api(&format!("/comments/{}", post_id)))
                        .query("comment", comment_id);
                    let value = self.get_json(target).await?;
                    comment_listing_things(&value)
                }
            };

            let expanded = flatten_comments(&things, post_id);
            let before = comments.len();
            keep_unseen(expanded.comments, &mut seen, &mut comments);

            // A stub that yields nothing new would loop forever
            if comments.len() > before {
                pending.extend(expanded.more);
            }
        }

        Ok(comments)
    }

    /// Collects the top posts of a subreddit and all of their comments
    ///
    /// A post whose comments cannot be fetched is kept without comments.
    pub async fn collect_subreddit(&mut self, subreddit: &str) -> Result<EntityBatch> {
        tracing::info!("Collecting r/{}", subreddit);
        let posts = self.top_posts(subreddit).await?;
        let mut comments = Vec::new();

        for post in &posts {
            let Some(FieldValue::Text(post_id)) = post.get("id") else {
                continue;
            };
            if post.get("num_comments") == Some(&FieldValue::Integer(0)) {
                continue;
            }
            match self.post_comments(post_id).await {
                Ok(found) => comments.extend(found),
                Err(HarvestError::Fetch(e @ crate::crawler::FetchError::Cancelled { .. })) => {
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::warn!("Skipping comments of post {}: {}", post_id, e);
                }
            }
        }

        tracing::info!(
            "r/{}: {} posts, {} comments",
            subreddit,
            posts.len(),
            comments.len()
        );

        let mut batch = EntityBatch::new();
        batch.insert(POSTS_ENTITY, posts);
        batch.insert(COMMENTS_ENTITY, comments);
        Ok(batch)
    }
}

/// Appends comments whose id has not been seen yet
fn keep_unseen(found: Vec<Record>, seen: &mut HashSet<String>, into: &mut Vec<Record>) {
    for comment in found {
        let id = comment
            .get("comment_id")
            .map(|v| v.to_string())
            .unwrap_or_default();
        if seen.insert(id) {
            into.push(comment);
        }
    }
}

#[async_trait]
impl<U: WorkUnit + 'static> UnitSource<U> for RedditSource {
    fn entities(&self) -> Vec<&'static str> {
        vec![POSTS_ENTITY, COMMENTS_ENTITY]
    }

    /// The API has no date-range query; the `top` listing for the configured
    /// period is fetched and the driver filters it to the unit
    async fn collect(&mut self, sub_source: &str, _unit: &U) -> Result<EntityBatch> {
        self.collect_subreddit(sub_source).await
    }

    fn fetch_stats(&self) -> FetchStats {
        self.fetcher.stats()
    }
}
