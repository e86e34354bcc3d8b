//! Integration tests for the harvest jobs
//!
//! These tests drive the batch driver with stub sources and sinks, and run
//! the Reddit source, snapshot, catalog and review jobs against a wiremock
//! upstream.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use review_harvester::config::{Config, JitterRange};
use review_harvester::crawler::{
    month_windows, BatchDriver, DriverSettings, EntityBatch, FetchError, Fetcher,
    IdentityManager, MonthWindow, RetryPolicy, UnitSource, WorkUnit,
};
use review_harvester::extract::{Record, COMMENTS_ENTITY, POSTS_ENTITY};
use review_harvester::jobs::{
    collect_product_urls, run_catalog, run_reviews, run_snapshot, CatalogOutcome,
};
use review_harvester::output::RunReport;
use review_harvester::sources::{RedditSettings, RedditSource};
use review_harvester::state::DriverState;
use review_harvester::storage::{
    Checkpoint, CheckpointStore, CsvSink, RecordSink, StorageError, StorageResult,
};
use review_harvester::HarvestError;
use serde_json::json;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Helpers
// ============================================================================

fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

/// Jan, Feb and Mar 2024
fn three_months() -> Vec<MonthWindow> {
    month_windows(utc(2024, 1, 1), utc(2024, 4, 1))
}

fn row_count(path: &Path) -> usize {
    csv::Reader::from_path(path).unwrap().records().count()
}

fn column(path: &Path, name: &str) -> Vec<String> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let index = reader
        .headers()
        .unwrap()
        .iter()
        .position(|h| h == name)
        .unwrap_or_else(|| panic!("no column {} in {}", name, path.display()));
    reader
        .records()
        .map(|r| r.unwrap().get(index).unwrap_or_default().to_string())
        .collect()
}

fn quiet_fetcher(max_retries: u32) -> Fetcher {
    Fetcher::new(
        IdentityManager::new(vec![], vec![], false, JitterRange::zero()),
        RetryPolicy::immediate(max_retries),
        CancellationToken::new(),
    )
}

/// Source producing a fixed number of timed records per call
#[derive(Default)]
struct StubSource {
    calls: Vec<(String, String)>,
    failing: Vec<String>,
    posts: usize,
    comments: usize,
    cancel_on_unit: Option<String>,
}

impl StubSource {
    fn new(posts: usize, comments: usize) -> Self {
        Self {
            posts,
            comments,
            ..Self::default()
        }
    }

    fn collected_units(&self) -> Vec<String> {
        let mut units: Vec<String> = self.calls.iter().map(|(_, unit)| unit.clone()).collect();
        units.dedup();
        units
    }
}

#[async_trait]
impl UnitSource<MonthWindow> for StubSource {
    fn entities(&self) -> Vec<&'static str> {
        vec![POSTS_ENTITY, COMMENTS_ENTITY]
    }

    async fn collect(
        &mut self,
        sub_source: &str,
        unit: &MonthWindow,
    ) -> Result<EntityBatch, HarvestError> {
        let label = unit.label();
        self.calls.push((sub_source.to_string(), label.clone()));

        if self.cancel_on_unit.as_deref() == Some(label.as_str()) {
            return Err(FetchError::Cancelled {
                target: sub_source.to_string(),
            }
            .into());
        }
        if self.failing.iter().any(|f| f == sub_source) {
            return Err(HarvestError::Payload {
                url: format!("stub://{}", sub_source),
                message: "unexpected payload".to_string(),
            });
        }

        let timed = |prefix: &str, i: usize| {
            Record::new()
                .with("id", format!("{}-{}-{}-{}", prefix, sub_source, label, i))
                .with_timestamp(
                    "created_utc",
                    unit.start + ChronoDuration::hours(i as i64 + 1),
                )
        };

        let mut batch = EntityBatch::new();
        batch.insert(POSTS_ENTITY, (0..self.posts).map(|i| timed("p", i)).collect());
        batch.insert(
            COMMENTS_ENTITY,
            (0..self.comments).map(|i| timed("c", i)).collect(),
        );
        Ok(batch)
    }
}

/// Sink whose writes always fail
struct BrokenSink {
    fail_prepare: bool,
}

impl RecordSink for BrokenSink {
    fn prepare(&mut self) -> StorageResult<()> {
        if self.fail_prepare {
            return Err(StorageError::CreateDir {
                path: PathBuf::from("/unwritable"),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            });
        }
        Ok(())
    }

    fn has_unit(&self, _entity: &str, _label: &str) -> bool {
        false
    }

    fn write_unit(&mut self, _entity: &str, label: &str, _records: &[Record]) -> StorageResult<usize> {
        Err(StorageError::Write {
            path: PathBuf::from(format!("/unwritable/{}.csv", label)),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        })
    }
}

fn driver_for<K: RecordSink>(
    source: StubSource,
    sink: K,
    checkpoint_file: &Path,
    sub_sources: &[&str],
) -> BatchDriver<StubSource, K> {
    BatchDriver::new(
        "test",
        source,
        sink,
        CheckpointStore::new(checkpoint_file),
        sub_sources.iter().map(|s| s.to_string()).collect(),
    )
    .with_settings(DriverSettings::immediate())
}

fn saved_cursor(checkpoint_file: &Path) -> Option<DateTime<Utc>> {
    CheckpointStore::new(checkpoint_file)
        .load::<DateTime<Utc>>()
        .map(|c| c.last_unit_end)
}

// ============================================================================
// Batch driver
// ============================================================================

#[tokio::test]
async fn test_full_run_writes_every_unit_and_checkpoints_last() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path().join("out");
    let checkpoint = temp_dir.path().join("checkpoint.json");

    let mut driver = driver_for(
        StubSource::new(2, 3),
        CsvSink::new(&out),
        &checkpoint,
        &["SkincareAddiction", "AsianBeauty"],
    );
    let report = driver.run(three_months()).await;

    assert_eq!(report.state, DriverState::Completed);
    assert_eq!(driver.state(), DriverState::Completed);
    assert_eq!(report.units_completed, 3);
    assert_eq!(report.records_written.get(POSTS_ENTITY), Some(&12));
    assert_eq!(report.records_written.get(COMMENTS_ENTITY), Some(&18));

    let posts = out.join("reddit_posts_2024-02.csv");
    assert_eq!(row_count(&posts), 4);
    assert!(column(&posts, "scrape_month").iter().all(|m| m == "2024-02"));
    assert_eq!(row_count(&out.join("reddit_comments_2024-03.csv")), 6);

    assert_eq!(saved_cursor(&checkpoint), Some(utc(2024, 4, 1)));
}

#[tokio::test]
async fn test_resume_after_checkpoint() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path().join("out");
    let checkpoint = temp_dir.path().join("checkpoint.json");

    // January was committed by an earlier, interrupted run
    CheckpointStore::new(&checkpoint)
        .save(&Checkpoint::new(utc(2024, 2, 1)))
        .unwrap();

    let mut driver = driver_for(StubSource::new(1, 1), CsvSink::new(&out), &checkpoint, &["a"]);
    let report = driver.run(three_months()).await;

    assert_eq!(report.state, DriverState::Completed);
    assert_eq!(driver.source().collected_units(), vec!["2024-02", "2024-03"]);
    assert!(!out.join("reddit_posts_2024-01.csv").exists());
    assert_eq!(saved_cursor(&checkpoint), Some(utc(2024, 4, 1)));
}

#[tokio::test]
async fn test_rerun_with_all_outputs_fetches_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path().join("out");
    let checkpoint = temp_dir.path().join("checkpoint.json");

    let mut first = driver_for(StubSource::new(1, 1), CsvSink::new(&out), &checkpoint, &["a"]);
    assert_eq!(first.run(three_months()).await.state, DriverState::Completed);

    // Without the checkpoint every unit is found complete on disk
    std::fs::remove_file(&checkpoint).unwrap();

    let mut second = driver_for(StubSource::new(1, 1), CsvSink::new(&out), &checkpoint, &["a"]);
    let report = second.run(three_months()).await;

    assert_eq!(report.state, DriverState::Completed);
    assert!(second.source().calls.is_empty());
    assert_eq!(report.units_skipped, 3);
    assert_eq!(report.units_completed, 0);
    assert_eq!(saved_cursor(&checkpoint), Some(utc(2024, 4, 1)));
}

#[tokio::test]
async fn test_unit_with_existing_output_is_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path().join("out");
    let checkpoint = temp_dir.path().join("checkpoint.json");

    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("reddit_posts_2024-02.csv"), "id\nold\n").unwrap();
    std::fs::write(out.join("reddit_comments_2024-02.csv"), "id\nold\n").unwrap();

    let mut driver = driver_for(StubSource::new(2, 0), CsvSink::new(&out), &checkpoint, &["a"]);
    let report = driver.run(three_months()).await;

    assert_eq!(report.state, DriverState::Completed);
    assert_eq!(driver.source().collected_units(), vec!["2024-01", "2024-03"]);
    assert_eq!(report.units_skipped, 1);

    // The existing file is untouched
    let kept = std::fs::read_to_string(out.join("reddit_posts_2024-02.csv")).unwrap();
    assert_eq!(kept, "id\nold\n");
    assert_eq!(saved_cursor(&checkpoint), Some(utc(2024, 4, 1)));
}

#[tokio::test]
async fn test_partial_output_is_recollected() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path().join("out");
    let checkpoint = temp_dir.path().join("checkpoint.json");

    // Only one of the two entities exists for January
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("reddit_posts_2024-01.csv"), "id\nold\n").unwrap();

    let mut driver = driver_for(StubSource::new(1, 1), CsvSink::new(&out), &checkpoint, &["a"]);
    driver.run(three_months()).await;

    assert_eq!(
        driver.source().collected_units(),
        vec!["2024-01", "2024-02", "2024-03"]
    );
}

#[tokio::test]
async fn test_failing_sub_source_is_contained() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path().join("out");
    let checkpoint = temp_dir.path().join("checkpoint.json");

    let mut source = StubSource::new(5, 0);
    source.failing = vec!["broken".to_string()];

    let mut driver = driver_for(source, CsvSink::new(&out), &checkpoint, &["broken", "working"]);
    let report = driver.run(month_windows(utc(2024, 1, 1), utc(2024, 2, 1))).await;

    assert_eq!(report.state, DriverState::Completed);
    assert_eq!(report.sub_source_failures, 1);

    let posts = out.join("reddit_posts_2024-01.csv");
    assert_eq!(row_count(&posts), 5);
    assert!(column(&posts, "id").iter().all(|id| id.contains("-working-")));

    // No comments at all: no file, so the unit stays incomplete on disk
    assert!(!out.join("reddit_comments_2024-01.csv").exists());
    assert_eq!(saved_cursor(&checkpoint), Some(utc(2024, 2, 1)));
}

#[tokio::test]
async fn test_sink_failure_aborts_without_checkpoint() {
    let temp_dir = TempDir::new().unwrap();
    let checkpoint = temp_dir.path().join("checkpoint.json");

    let mut driver = driver_for(
        StubSource::new(1, 1),
        BrokenSink { fail_prepare: false },
        &checkpoint,
        &["a"],
    );
    let report = driver.run(three_months()).await;

    assert_eq!(report.state, DriverState::Aborted);
    assert_eq!(report.state.exit_code(), 1);
    assert!(report.abort_reason.as_deref().unwrap_or_default().contains("disk full"));
    assert_eq!(driver.source().collected_units(), vec!["2024-01"]);
    assert_eq!(saved_cursor(&checkpoint), None);
}

#[tokio::test]
async fn test_unpreparable_sink_aborts_before_collecting() {
    let temp_dir = TempDir::new().unwrap();
    let checkpoint = temp_dir.path().join("checkpoint.json");

    let mut driver = driver_for(
        StubSource::new(1, 1),
        BrokenSink { fail_prepare: true },
        &checkpoint,
        &["a"],
    );
    let report = driver.run(three_months()).await;

    assert_eq!(report.state, DriverState::Aborted);
    assert!(driver.source().calls.is_empty());
}

#[tokio::test]
async fn test_cancellation_keeps_committed_units() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path().join("out");
    let checkpoint = temp_dir.path().join("checkpoint.json");

    let mut source = StubSource::new(1, 1);
    source.cancel_on_unit = Some("2024-02".to_string());

    let mut driver = driver_for(source, CsvSink::new(&out), &checkpoint, &["a"]);
    let report = driver.run(three_months()).await;

    assert_eq!(report.state, DriverState::Cancelled);
    assert_eq!(report.state.exit_code(), 130);
    assert_eq!(report.units_completed, 1);
    assert!(out.join("reddit_posts_2024-01.csv").exists());
    assert!(!out.join("reddit_posts_2024-02.csv").exists());
    assert_eq!(saved_cursor(&checkpoint), Some(utc(2024, 2, 1)));
}

#[tokio::test]
async fn test_cancelled_before_start_collects_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let checkpoint = temp_dir.path().join("checkpoint.json");

    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut driver = driver_for(
        StubSource::new(1, 1),
        CsvSink::new(temp_dir.path().join("out")),
        &checkpoint,
        &["a"],
    )
    .with_cancellation(cancel);
    let report = driver.run(three_months()).await;

    assert_eq!(report.state, DriverState::Cancelled);
    assert!(driver.source().calls.is_empty());
    assert_eq!(saved_cursor(&checkpoint), None);
}

// ============================================================================
// Reddit source against a mock API
// ============================================================================

fn post(id: &str, created: i64, num_comments: i64) -> serde_json::Value {
    json!({
        "kind": "t3",
        "data": {
            "id": id,
            "title": format!("Post {}", id),
            "selftext": "Routine help",
            "score": 10,
            "created_utc": created,
            "num_comments": num_comments,
            "author": "poster",
            "subreddit": "AsianBeauty"
        }
    })
}

fn comment(id: &str, parent: &str, created: i64, replies: serde_json::Value) -> serde_json::Value {
    json!({
        "kind": "t1",
        "data": {
            "id": id,
            "parent_id": parent,
            "body": format!("Comment {}", id),
            "score": 1,
            "created_utc": created,
            "author": "commenter",
            "subreddit": "AsianBeauty",
            "replies": replies
        }
    })
}

fn listing(children: Vec<serde_json::Value>, after: Option<&str>) -> serde_json::Value {
    json!({"kind": "Listing", "data": {"after": after, "children": children}})
}

/// 2024-01-11
const JANUARY: i64 = 1_705_000_000;
/// 2023-12-02
const DECEMBER: i64 = 1_701_500_000;

async fn mount_reddit(mock_server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok",
            "token_type": "bearer",
            "expires_in": 86400
        })))
        .expect(1)
        .mount(mock_server)
        .await;

    // Second page first: both requests match the plain listing mock
    Mock::given(method("GET"))
        .and(path("/r/AsianBeauty/top"))
        .and(query_param("after", "t3_p2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(listing(vec![post("p3", DECEMBER, 1)], None)),
        )
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/r/AsianBeauty/top"))
        .and(query_param("t", "month"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(
            vec![post("p1", JANUARY, 3), post("p2", JANUARY + 60, 0)],
            Some("t3_p2"),
        )))
        .mount(mock_server)
        .await;

    let replies = listing(vec![comment("c2", "t1_c1", JANUARY + 20, json!(""))], None);
    let more = json!({"kind": "more", "data": {"children": ["c3"], "parent_id": "t3_p1"}});
    Mock::given(method("GET"))
        .and(path("/comments/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            listing(vec![post("p1", JANUARY, 3)], None),
            listing(vec![comment("c1", "t3_p1", JANUARY + 10, replies), more], None)
        ])))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/morechildren"))
        .and(query_param("link_id", "t3_p1"))
        .and(query_param("children", "c3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "json": {"errors": [], "data": {"things": [comment("c3", "t3_p1", JANUARY + 30, json!(""))]}}
        })))
        .expect(1)
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/comments/p2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/comments/p3"))
        .respond_with(ResponseTemplate::new(500))
        .mount(mock_server)
        .await;
}

fn reddit_settings(mock_server: &MockServer) -> RedditSettings {
    RedditSettings {
        client_id: "id".to_string(),
        client_secret: "secret".to_string(),
        auth_url: format!("{}/api/v1/access_token", mock_server.uri()),
        api_url: mock_server.uri(),
        time_period: "month".to_string(),
        limit: 10,
    }
}

#[tokio::test]
async fn test_reddit_source_collects_posts_and_expanded_comments() {
    let mock_server = MockServer::start().await;
    mount_reddit(&mock_server).await;

    let mut source = RedditSource::new(quiet_fetcher(1), reddit_settings(&mock_server));
    let mut batch = source.collect_subreddit("AsianBeauty").await.unwrap();

    let posts = batch.remove(POSTS_ENTITY).unwrap();
    assert_eq!(posts.len(), 3);

    let comments = batch.remove(COMMENTS_ENTITY).unwrap();
    let ids: Vec<String> = comments
        .iter()
        .map(|c| c.get("comment_id").unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["c1", "c2", "c3"]);
}

#[tokio::test]
async fn test_monthly_backfill_against_mock_api() {
    let mock_server = MockServer::start().await;
    mount_reddit(&mock_server).await;

    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path().join("reddit_data");
    let checkpoint = temp_dir.path().join("checkpoint.json");

    let source = RedditSource::new(quiet_fetcher(1), reddit_settings(&mock_server));
    let mut driver = BatchDriver::new(
        "history",
        source,
        CsvSink::new(&out),
        CheckpointStore::new(&checkpoint),
        vec!["AsianBeauty".to_string()],
    )
    .with_settings(DriverSettings::immediate());

    let january = MonthWindow::containing(utc(2024, 1, 15));
    let report = driver.run(vec![january]).await;

    assert_eq!(report.state, DriverState::Completed);
    assert_eq!(report.sub_source_failures, 0);

    // p3 is from December and falls outside the window
    let posts = out.join("reddit_posts_2024-01.csv");
    assert_eq!(column(&posts, "id"), vec!["p1", "p2"]);
    assert!(column(&posts, "scrape_month").iter().all(|m| m == "2024-01"));
    assert!(column(&posts, "created_utc")[0].starts_with("2024-01-11"));

    let comments = out.join("reddit_comments_2024-01.csv");
    assert_eq!(row_count(&comments), 3);
    assert_eq!(column(&comments, "post_id"), vec!["p1", "p1", "p1"]);

    assert_eq!(saved_cursor(&checkpoint), Some(utc(2024, 2, 1)));
}

// ============================================================================
// Snapshot job
// ============================================================================

fn snapshot_config(mock_server: &MockServer, root: &Path) -> Config {
    let mut config = Config::default();
    config.reddit.client_id = "id".to_string();
    config.reddit.client_secret = "secret".to_string();
    config.reddit.auth_url = format!("{}/api/v1/access_token", mock_server.uri());
    config.reddit.api_url = mock_server.uri();
    config.reddit.subreddits = vec!["AsianBeauty".to_string()];
    config.schedule.sub_source_delay_secs = 0;
    config.schedule.snapshot_attempts = 3;
    config.schedule.snapshot_retry_delay_secs = 0;
    config.output.raw_dir = root.join("raw");
    config
}

async fn mount_token(mock_server: &MockServer, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok",
            "expires_in": 86400
        })))
        .expect(expected)
        .mount(mock_server)
        .await;
}

fn snapshot_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 3, 10, 0, 0).unwrap()
}

#[tokio::test]
async fn test_snapshot_retries_empty_pass_then_writes_aggregates() {
    let mock_server = MockServer::start().await;
    mount_token(&mock_server, 1).await;

    // First pass finds nothing, second pass finds one post
    Mock::given(method("GET"))
        .and(path("/r/AsianBeauty/top"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(vec![], None)))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;

    // The API reports another subreddit; the snapshot tag wins
    let mut crosspost = post("p1", JANUARY, 1);
    crosspost["data"]["subreddit"] = json!("CrossPosted");
    Mock::given(method("GET"))
        .and(path("/r/AsianBeauty/top"))
        .and(query_param("t", "day"))
        .and(query_param("limit", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(vec![crosspost.clone()], None)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut reply = comment("c1", "t3_p1", JANUARY + 5, json!(""));
    reply["data"]["subreddit"] = json!("CrossPosted");
    Mock::given(method("GET"))
        .and(path("/comments/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            listing(vec![crosspost], None),
            listing(vec![reply], None)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let config = snapshot_config(&mock_server, temp_dir.path());

    let report = run_snapshot(&config, quiet_fetcher(0), snapshot_now(), CancellationToken::new()).await;

    assert_eq!(report.state, DriverState::Completed);
    assert_eq!(report.units_completed, 1);
    assert_eq!(report.files.len(), 2);

    let posts = config.output.raw_dir.join("reddit_posts_20240503_100000.csv");
    assert_eq!(column(&posts, "id"), vec!["p1"]);
    assert_eq!(column(&posts, "subreddit"), vec!["AsianBeauty"]);

    let comments = config.output.raw_dir.join("reddit_comments_20240503_100000.csv");
    assert_eq!(column(&comments, "comment_id"), vec!["c1"]);
    assert_eq!(column(&comments, "subreddit"), vec!["AsianBeauty"]);
}

#[tokio::test]
async fn test_snapshot_with_no_posts_writes_nothing() {
    let mock_server = MockServer::start().await;
    mount_token(&mock_server, 1).await;

    Mock::given(method("GET"))
        .and(path("/r/AsianBeauty/top"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(vec![], None)))
        .expect(3)
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let config = snapshot_config(&mock_server, temp_dir.path());

    let report = run_snapshot(&config, quiet_fetcher(0), snapshot_now(), CancellationToken::new()).await;

    assert_eq!(report.state, DriverState::Completed);
    assert_eq!(report.units_completed, 0);
    assert!(report.files.is_empty());
    assert_eq!(std::fs::read_dir(&config.output.raw_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn test_cancelled_snapshot_writes_nothing() {
    let mock_server = MockServer::start().await;
    mount_token(&mock_server, 0).await;

    let temp_dir = TempDir::new().unwrap();
    let config = snapshot_config(&mock_server, temp_dir.path());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let fetcher = Fetcher::new(
        IdentityManager::fixed("harvester-test/1.0", JitterRange::zero()),
        RetryPolicy::immediate(0),
        cancel.clone(),
    );

    let report = run_snapshot(&config, fetcher, snapshot_now(), cancel).await;

    assert_eq!(report.state, DriverState::Cancelled);
    assert_eq!(report.state.exit_code(), 130);
    assert_eq!(std::fs::read_dir(&config.output.raw_dir).unwrap().count(), 0);
}

// ============================================================================
// Catalog and reviews jobs
// ============================================================================

fn catalog_page(links: &[&str]) -> String {
    let cards: String = links
        .iter()
        .map(|l| format!(r#"<div class="card"><a href="{}">Product</a></div>"#, l))
        .collect();
    format!("<html><body>{}</body></html>", cards)
}

fn test_config(mock_server: &MockServer, root: &Path) -> Config {
    let mut config = Config::default();
    config.catalog.base_url = mock_server.uri();
    config.catalog.catalog_url = format!("{}/c/skin-care.html", mock_server.uri());
    config.catalog.product_selector = "div.card".to_string();
    config.catalog.max_pages = 10;
    config.catalog.max_consecutive_errors = 2;
    config.catalog.page_delay = JitterRange::zero();
    config.reviews.product_delay = JitterRange::zero();
    config.reviews.interim_every = 2;
    config.reviews.rotate_every = 2;
    config.output.raw_dir = root.join("raw");
    config.output.output_dir = root.join("out");
    config.output.checkpoint_file = root.join("checkpoint.json");
    config
}

#[tokio::test]
async fn test_catalog_stops_at_first_empty_page() {
    let mock_server = MockServer::start().await;
    let pages = [
        catalog_page(&["/p/b-serum/", "/p/a-cream/"]),
        catalog_page(&["/p/c-toner/", "/p/a-cream/"]),
        catalog_page(&[]),
    ];
    for (index, body) in pages.iter().enumerate() {
        Mock::given(method("GET"))
            .and(path("/c/skin-care.html"))
            .and(query_param("p", (index + 1).to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&mock_server, temp_dir.path());
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();

    let report = run_catalog(&config, quiet_fetcher(0), now, CancellationToken::new()).await;

    assert_eq!(report.state, DriverState::Completed);
    assert_eq!(report.units_completed, 2);

    let saved = config.output.raw_dir.join("product_urls_20240501_083000.txt");
    let urls: Vec<String> = std::fs::read_to_string(&saved)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    let base = mock_server.uri();
    assert_eq!(
        urls,
        vec![
            format!("{}/p/a-cream/", base),
            format!("{}/p/b-serum/", base),
            format!("{}/p/c-toner/", base),
        ]
    );
}

#[tokio::test]
async fn test_catalog_gives_up_after_consecutive_errors() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/c/skin-care.html"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&mock_server, temp_dir.path());
    let mut fetcher = quiet_fetcher(0);
    let mut report = RunReport::new("catalog");

    let (urls, outcome) = collect_product_urls(
        &mut fetcher,
        &config.catalog,
        &CancellationToken::new(),
        &mut report,
    )
    .await;

    assert!(urls.is_empty());
    assert_eq!(outcome, CatalogOutcome::TooManyErrors);
    assert_eq!(report.sub_source_failures, 2);
}

fn product_page(sku: &str, reviews: &[&str]) -> String {
    let reviews: Vec<serde_json::Value> = reviews
        .iter()
        .map(|body| {
            json!({
                "author": {"name": "Reviewer"},
                "reviewBody": body,
                "reviewRating": {"ratingValue": 5},
                "datePublished": "2024-04-01"
            })
        })
        .collect();
    let payload = json!({"sku": sku, "name": "Cream", "brand": {"name": "Brand"}, "review": reviews});
    format!(
        r#"<html><body><script id="product_structured_data" type="application/ld+json">{}</script></body></html>"#,
        payload
    )
}

#[tokio::test]
async fn test_reviews_job_saves_interim_and_final_files() {
    let mock_server = MockServer::start().await;
    let products = [
        ("/p/a/", ResponseTemplate::new(200).set_body_string(product_page("A", &["Great", "Oily"]))),
        ("/p/b/", ResponseTemplate::new(200).set_body_string("<html><body>No data</body></html>")),
        ("/p/c/", ResponseTemplate::new(404)),
        ("/p/d/", ResponseTemplate::new(200).set_body_string(product_page("D", &["Fine"]))),
    ];
    for (product_path, response) in products.iter() {
        Mock::given(method("GET"))
            .and(path(*product_path))
            .respond_with(response.clone())
            .mount(&mock_server)
            .await;
    }

    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&mock_server, temp_dir.path());
    let urls: Vec<String> = products
        .iter()
        .map(|(p, _)| format!("{}{}", mock_server.uri(), p))
        .collect();
    let now = Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap();

    let fetcher = quiet_fetcher(1);
    let report = run_reviews(&config, fetcher, urls, now, CancellationToken::new()).await;

    assert_eq!(report.state, DriverState::Completed);
    assert_eq!(report.units_completed, 3);
    assert_eq!(report.sub_source_failures, 1);
    assert_eq!(report.records_written.get("reviews"), Some(&3));

    let final_file = config.output.raw_dir.join("reviews_20240502_090000.csv");
    assert_eq!(column(&final_file, "product_sku"), vec!["A", "A", "D"]);
    assert_eq!(column(&final_file, "brand"), vec!["Brand", "Brand", "Brand"]);

    // Product 4 of 4 had reviews, so the interim file holds everything
    let interim = config.output.raw_dir.join("reviews_20240502_090000_interim.csv");
    assert_eq!(row_count(&interim), 3);
}

#[tokio::test]
async fn test_cancelled_reviews_keep_partial_results() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/p/a/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(product_page("A", &["Great"])))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(&mock_server, temp_dir.path());
    config.reviews.product_delay = JitterRange {
        min_ms: 60_000,
        max_ms: 60_000,
    };
    let urls = vec![
        format!("{}/p/a/", mock_server.uri()),
        format!("{}/p/b/", mock_server.uri()),
    ];
    let now = Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap();

    // Cancel while the job waits between products
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let report = run_reviews(&config, quiet_fetcher(0), urls, now, cancel).await;

    assert_eq!(report.state, DriverState::Cancelled);
    let interim = config.output.raw_dir.join("reviews_20240502_090000_interim.csv");
    assert_eq!(row_count(&interim), 1);
    assert!(!config.output.raw_dir.join("reviews_20240502_090000.csv").exists());
}
