//! Run reports
//!
//! Every job ends with a `RunReport`: how it ended, how much work it did and
//! what it wrote. The binary prints it to stdout.

use crate::crawler::FetchStats;
use crate::state::DriverState;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Summary of one job run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Name of the job ("history", "snapshot", ...)
    pub job: String,

    pub state: DriverState,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Units whose output was written and checkpointed
    pub units_completed: u64,

    /// Units skipped because their output already existed
    pub units_skipped: u64,

    /// Sub-source collections that failed and were skipped
    pub sub_source_failures: u64,

    /// Records written, per entity
    pub records_written: BTreeMap<String, u64>,

    /// Files written during the run
    pub files: Vec<String>,

    pub fetch: FetchStats,

    /// Message of the error that aborted the run, if any
    pub abort_reason: Option<String>,
}

impl RunReport {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            state: DriverState::Idle,
            started_at: Utc::now(),
            finished_at: None,
            units_completed: 0,
            units_skipped: 0,
            sub_source_failures: 0,
            records_written: BTreeMap::new(),
            files: Vec::new(),
            fetch: FetchStats::default(),
            abort_reason: None,
        }
    }

    /// Adds to the written-record count of an entity
    pub fn add_records(&mut self, entity: &str, count: usize) {
        *self.records_written.entry(entity.to_string()).or_insert(0) += count as u64;
    }

    pub fn total_records(&self) -> u64 {
        self.records_written.values().sum()
    }

    /// Records the terminal state and the finish time
    pub fn finish(&mut self, state: DriverState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_seconds())
    }
}

/// Prints a report to stdout in a formatted manner
///
/// # Arguments
///
/// * `report` - The report to display
pub fn print_report(report: &RunReport) {
    println!("=== {} run: {} ===\n", report.job, report.state);

    println!("Overview:");
    println!("  Started: {}", report.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(seconds) = report.duration_seconds() {
        println!("  Duration: {}s", seconds);
    }
    println!("  Units completed: {}", report.units_completed);
    println!("  Units skipped (output present): {}", report.units_skipped);
    println!("  Sub-source failures: {}", report.sub_source_failures);
    println!();

    if !report.records_written.is_empty() {
        println!("Records Written:");
        for (entity, count) in &report.records_written {
            println!("  {}: {}", entity, count);
        }
        println!();
    }

    if !report.files.is_empty() {
        println!("Files ({}):", report.files.len());
        for file in &report.files {
            println!("  - {}", file);
        }
        println!();
    }

    let fetch = &report.fetch;
    let success_rate = if fetch.attempts > 0 {
        (fetch.successes as f64 / fetch.attempts as f64) * 100.0
    } else {
        0.0
    };
    println!(
        "Fetches: {} attempts, {} succeeded ({:.1}%), {} soft blocks, {} gave up",
        fetch.attempts, fetch.successes, success_rate, fetch.soft_blocks, fetch.exhausted
    );

    if let Some(reason) = &report.abort_reason {
        println!();
        println!("Aborted: {}", reason);
    }
}
