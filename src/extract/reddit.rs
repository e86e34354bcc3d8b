//! Reddit API objects to flat records
//!
//! The API wraps everything in "things": `{"kind": "...", "data": {...}}`.
//! Posts are `t3`, comments `t1`, and truncated parts of a comment tree are
//! `more` stubs. A `more` stub with child ids is expanded through the
//! `morechildren` endpoint; one without ids ("continue this thread") is
//! expanded by fetching the parent comment's permalink.

use crate::extract::record::{synthetic_id, Record};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Entity name of post output files
pub const POSTS_ENTITY: &str = "reddit_posts";

/// Entity name of comment output files
pub const COMMENTS_ENTITY: &str = "reddit_comments";

/// A tagged API object
#[derive(Debug, Clone, Deserialize)]
pub struct Thing {
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

/// A page of things with its pagination cursor
#[derive(Debug, Clone, Deserialize)]
pub struct Listing {
    pub data: ListingData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingData {
    pub after: Option<String>,
    #[serde(default)]
    pub children: Vec<Thing>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PostData {
    id: String,
    title: String,
    selftext: String,
    score: i64,
    created_utc: f64,
    num_comments: i64,
    author: Option<String>,
    subreddit: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct CommentData {
    id: Option<String>,
    parent_id: String,
    body: String,
    score: i64,
    created_utc: f64,
    author: Option<String>,
    subreddit: String,
    replies: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct MoreData {
    children: Vec<String>,
    parent_id: String,
}

/// An unexpanded part of a comment tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoreStub {
    /// "Load more comments": ids to request through `morechildren`
    Children(Vec<String>),

    /// "Continue this thread": the fullname of the comment to refetch
    Thread(String),
}

/// Comments found in a tree plus the stubs still to expand
#[derive(Debug, Clone, Default)]
pub struct CommentTree {
    pub comments: Vec<Record>,
    pub more: Vec<MoreStub>,
}

/// Converts an epoch-seconds float to a UTC timestamp
pub fn from_epoch(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    DateTime::from_timestamp(seconds.trunc() as i64, 0)
}

/// Maps a `t3` thing to a post record; other kinds yield `None`
pub fn post_record(thing: &Thing) -> Option<Record> {
    if thing.kind != "t3" {
        return None;
    }
    let post: PostData = serde_json::from_value(thing.data.clone()).ok()?;
    if post.id.is_empty() {
        return None;
    }

    let record = Record::new()
        .with("id", post.id)
        .with("title", post.title)
        .with("body", post.selftext);
    let record = match from_epoch(post.created_utc) {
        Some(at) => record.with("score", post.score).with_timestamp("created_utc", at),
        None => record.with("score", post.score).with("created_utc", None::<String>),
    };

    Some(
        record
            .with("num_comments", post.num_comments)
            .with("author", post.author)
            .with("subreddit", post.subreddit),
    )
}

/// Maps every post in a listing page
pub fn posts_from_listing(listing: &Listing) -> Vec<Record> {
    listing.data.children.iter().filter_map(post_record).collect()
}

/// Flattens a comment tree into records, depth first
///
/// Nested `replies` are walked without a depth limit. `more` stubs are not
/// followed here; they are returned for the caller to fetch.
///
/// # Arguments
///
/// * `things` - Top-level things of the tree (or a `morechildren` result)
/// * `post_id` - Id of the post the comments belong to, without prefix
pub fn flatten_comments(things: &[Thing], post_id: &str) -> CommentTree {
    let mut tree = CommentTree::default();
    // Reversed so the explicit stack pops in document order
    let mut stack: Vec<Thing> = things.iter().rev().cloned().collect();

    while let Some(thing) = stack.pop() {
        match thing.kind.as_str() {
            "t1" => {
                let Ok(comment) = serde_json::from_value::<CommentData>(thing.data) else {
                    tracing::debug!("Skipping malformed comment under post {}", post_id);
                    continue;
                };

                if let Ok(replies) = serde_json::from_value::<Listing>(comment.replies.clone()) {
                    stack.extend(replies.data.children.into_iter().rev());
                }

                tree.comments.push(comment_record(comment, post_id));
            }
            "more" => {
                let Ok(more) = serde_json::from_value::<MoreData>(thing.data) else {
                    continue;
                };
                if more.children.is_empty() {
                    if !more.parent_id.is_empty() {
                        tree.more.push(MoreStub::Thread(more.parent_id));
                    }
                } else {
                    tree.more.push(MoreStub::Children(more.children));
                }
            }
            _ => {}
        }
    }

    tree
}

fn comment_record(comment: CommentData, post_id: &str) -> Record {
    let comment_id = match comment.id {
        Some(id) if !id.is_empty() => id,
        _ => synthetic_id(&comment.body),
    };

    let record = Record::new()
        .with("comment_id", comment_id)
        .with("post_id", post_id)
        .with("parent_id", comment.parent_id)
        .with("body", comment.body)
        .with("score", comment.score);
    let record = match from_epoch(comment.created_utc) {
        Some(at) => record.with_timestamp("created_utc", at),
        None => record.with("created_utc", None::<String>),
    };

    record
        .with("author", comment.author)
        .with("subreddit", comment.subreddit)
}

/// Extracts the things of a `morechildren` response
///
/// The endpoint answers `{"json": {"data": {"things": [...]}}}`.
pub fn more_children_things(response: &Value) -> Vec<Thing> {
    response
        .pointer("/json/data/things")
        .and_then(|things| serde_json::from_value(things.clone()).ok())
        .unwrap_or_default()
}

/// Extracts the comment listing of a `comments/{id}` response
///
/// The endpoint answers a two-element array: the post listing, then the
/// comment listing.
pub fn comment_listing_things(response: &Value) -> Vec<Thing> {
    response
        .get(1)
        .and_then(|listing| serde_json::from_value::<Listing>(listing.clone()).ok())
        .map(|listing| listing.data.children)
        .unwrap_or_default()
}
